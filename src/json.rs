use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path as FsPath;

use anyhow::{bail,ensure,Context,Result};
use itertools::Itertools;
use serde::{Deserialize,Serialize};

use crate::block::Block;
use crate::block::alleles::Alleles;
use crate::graph::Graph;
use crate::node::{BlockId,NodeId,PathId};
use crate::path::Path;
use crate::utils;


// canonical persisted state. Node identity is spelled (path name, occurrence
// number, strand): `number` is the 1-based count of occurrences of the block
// on that path, which keeps paralogs apart without exposing arena ids.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonGraph {
    pub paths: Vec<JsonPath>,
    pub blocks: Vec<JsonBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonPath {
    pub name: String,
    pub offset: usize,
    pub circular: bool,
    pub position: Vec<usize>,
    pub blocks: Vec<JsonStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonStep {
    pub id: usize,
    pub name: String,
    pub number: usize,
    pub strand: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JsonNodeRef {
    pub name: String,
    pub number: usize,
    pub strand: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonBlock {
    pub id: usize,
    pub sequence: String,
    pub gaps: BTreeMap<String,usize>,
    pub mutate: Vec<(JsonNodeRef, Vec<(usize,String)>)>,
    pub insert: Vec<(JsonNodeRef, Vec<((usize,usize),String)>)>,
    pub delete: Vec<(JsonNodeRef, Vec<(usize,usize)>)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positions: Option<BTreeMap<String,(usize,usize)>>,
}


fn strand_string(strand: u8) -> String {
    (strand as char).to_string()
}

fn parse_strand(text: &str) -> Result<u8> {
    match text {
        "+" => Ok(b'+'),
        "-" => Ok(b'-'),
        other => bail!("invalid strand \"{other}\" in graph json"),
    }
}


pub fn marshal(graph: &Graph) -> JsonGraph {

    // spell out every node as (path name, occurrence number, strand)
    let mut refs: BTreeMap<NodeId,JsonNodeRef> = BTreeMap::new();
    let mut steps: BTreeMap<PathId,Vec<JsonStep>> = BTreeMap::new();
    for p in graph.paths.values() {
        let mut occurrences: BTreeMap<BlockId,usize> = BTreeMap::new();
        let mut path_steps = vec![];
        for &nid in &p.nodes {
            let node = &graph.nodes[&nid];
            let number = occurrences.entry(node.block).and_modify(|n| *n += 1).or_insert(1);
            refs.insert(nid, JsonNodeRef {
                name: p.name.clone(),
                number: *number,
                strand: strand_string(node.strand),
            });
            path_steps.push(JsonStep {
                id: node.block.0,
                name: p.name.clone(),
                number: *number,
                strand: strand_string(node.strand),
            });
        }
        steps.insert(p.id, path_steps);
    }

    let paths = graph.paths.values()
        .map(|p| JsonPath {
            name: p.name.clone(),
            offset: p.offset,
            circular: p.circular,
            position: p.position.clone(),
            blocks: steps.remove(&p.id).unwrap(),
        })
        .collect_vec();

    let blocks = graph.blocks.values()
        .map(|block| {
            let entries = block.alleles.iter()
                .map(|(nid, al)| (refs[nid].clone(), al))
                .sorted_by(|(a,_),(b,_)| a.cmp(b))
                .collect_vec();
            JsonBlock {
                id: block.id.0,
                sequence: String::from_utf8_lossy(&block.consensus).into_owned(),
                gaps: block.gaps.iter().map(|(&p,&w)| (p.to_string(), w)).collect(),
                mutate: entries.iter()
                    .map(|(r, al)| (r.clone(), al.subs.iter().map(|(&p,&b)| (p, (b as char).to_string())).collect()))
                    .collect(),
                insert: entries.iter()
                    .map(|(r, al)| (r.clone(), al.inss.iter().map(|(&k,s)| (k, String::from_utf8_lossy(s).into_owned())).collect()))
                    .collect(),
                delete: entries.iter()
                    .map(|(r, al)| (r.clone(), al.dels.iter().map(|(&p,&l)| (p, l)).collect()))
                    .collect(),
                positions: block_positions(graph, block, &refs),
            }
        })
        .collect_vec();

    JsonGraph { paths, blocks }
}


// (start, stop) of every node on its reconstructed path, for tooling; only
// available once Graph::finalize has filled the position tables
fn block_positions(graph: &Graph, block: &Block, refs: &BTreeMap<NodeId,JsonNodeRef>) -> Option<BTreeMap<String,(usize,usize)>> {
    let mut positions = BTreeMap::new();
    for nid in block.nodes() {
        let node = &graph.nodes[&nid];
        let p = &graph.paths[&node.path];
        if p.position.len() != p.nodes.len() {
            return None
        }
        let idx = p.nodes.iter().position(|&other| other == nid).unwrap();
        let start = p.position[idx];
        let total = graph.path_length(node.path);
        let mut stop = start + graph.length_of_node(nid);
        if p.circular && total > 0 {
            stop %= total;
        }
        let r = &refs[&nid];
        positions.insert(format!("{}#{}#{}", r.name, r.number, r.strand), (start, stop));
    }
    Some(positions)
}


pub fn unmarshal(json: &JsonGraph) -> Result<Graph> {

    let mut blocks: BTreeMap<BlockId,Block> = BTreeMap::new();
    let mut nodes = BTreeMap::new();
    let mut paths = BTreeMap::new();

    // mint nodes by walking the paths, keyed for allele lookup
    let mut lookup: BTreeMap<(usize,String,usize),NodeId> = BTreeMap::new();
    let mut next_node = 0usize;
    for (path_idx, jpath) in json.paths.iter().enumerate() {
        let pid = PathId(path_idx);
        let mut path_nodes = vec![];
        let mut occurrences: BTreeMap<usize,usize> = BTreeMap::new();
        for step in &jpath.blocks {
            ensure!(step.name == jpath.name, "step of path \"{}\" names path \"{}\"", jpath.name, step.name);
            let number = occurrences.entry(step.id).and_modify(|n| *n += 1).or_insert(1);
            ensure!(*number == step.number, "occurrence numbers of path \"{}\" are out of order", jpath.name);
            let nid = NodeId(next_node);
            next_node += 1;
            nodes.insert(nid, crate::node::Node::new(nid, BlockId(step.id), pid, parse_strand(&step.strand)?));
            lookup.insert((step.id, step.name.clone(), step.number), nid);
            path_nodes.push(nid);
        }
        let mut path = Path::new(pid, jpath.name.clone(), path_nodes, jpath.offset, jpath.circular);
        path.position = jpath.position.clone();
        paths.insert(pid, path);
    }

    for jblock in &json.blocks {
        let bid = BlockId(jblock.id);
        let mut gaps = BTreeMap::new();
        for (locus, &width) in &jblock.gaps {
            let locus = locus.parse::<usize>()
                .with_context(|| format!("invalid gap locus \"{locus}\" in block {}", jblock.id))?;
            gaps.insert(locus, width);
        }

        let mut alleles: BTreeMap<NodeId,Alleles> = BTreeMap::new();
        let node_of = |r: &JsonNodeRef| -> Result<NodeId> {
            let nid = lookup.get(&(jblock.id, r.name.clone(), r.number))
                .with_context(|| format!("block {} references unknown node {}#{}", jblock.id, r.name, r.number))?;
            ensure!(strand_string(nodes[nid].strand) == r.strand, "strand mismatch for node {}#{}", r.name, r.number);
            Ok(*nid)
        };
        for (r, subs) in &jblock.mutate {
            let entry = alleles.entry(node_of(r)?).or_default();
            for (locus, base) in subs {
                ensure!(base.len() == 1, "multi-byte substitution in block {}", jblock.id);
                entry.subs.insert(*locus, base.as_bytes()[0]);
            }
        }
        for (r, inss) in &jblock.insert {
            let entry = alleles.entry(node_of(r)?).or_default();
            for (key, bytes) in inss {
                entry.inss.insert(*key, bytes.as_bytes().to_vec());
            }
        }
        for (r, dels) in &jblock.delete {
            let entry = alleles.entry(node_of(r)?).or_default();
            for &(locus, length) in dels {
                entry.dels.insert(locus, length);
            }
        }
        blocks.insert(bid, Block::new(bid, jblock.sequence.as_bytes().to_vec(), gaps, alleles));
    }

    // every path node must be keyed in its block, even when it carries no edits
    for node in nodes.values() {
        let block = blocks.get_mut(&node.block)
            .with_context(|| format!("path references unknown block {}", node.block))?;
        block.alleles.entry(node.id).or_default();
    }

    let graph = Graph::assemble(blocks, nodes, paths);
    graph.consistency_check().context("deserialized graph is inconsistent")?;
    Ok(graph)
}


pub fn write_json(graph: &Graph, json_path: &FsPath) -> Result<()> {
    let mut writer = utils::get_file_writer(json_path)?;
    serde_json::to_writer(&mut writer, &marshal(graph))?;
    writer.write_all(b"\n")?;
    Ok(())
}


pub fn read_json(json_path: &FsPath) -> Result<Graph> {
    let reader = utils::get_file_reader(json_path)?;
    let json: JsonGraph = serde_json::from_reader(reader)
        .with_context(|| format!("malformed graph json: \"{}\"", json_path.display()))?;
    unmarshal(&json)
}
