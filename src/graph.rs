pub mod detransitive;
pub mod junction;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path as FsPath;

use ahash::AHashSet as HashSet;
use anyhow::{bail,ensure,Result};
use itertools::Itertools;

use crate::block::Block;
use crate::node::{BlockId,Node,NodeId,PathId};
use crate::path::{self,Path};
use crate::seq;
use crate::utils::flip_strand;


// the single-writer arena owning every block, node and path. All
// cross-references are ids; nodes are minted here and never reused.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub blocks: BTreeMap<BlockId,Block>,
    pub nodes: BTreeMap<NodeId,Node>,
    pub paths: BTreeMap<PathId,Path>,
    next_block_id: usize,
    next_node_id: usize,
    next_path_id: usize,
}

impl Graph {

    pub fn new() -> Self {
        Self::default()
    }

    // singleton graph: one block, one node, one path per input record
    pub fn build(records: Vec<(String,Vec<u8>)>, circular: bool) -> Result<Graph> {
        let mut graph = Graph::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (name, sequence) in records {
            ensure!(seen.insert(name.clone()), "duplicate genome name: \"{name}\"");
            let pid = graph.new_path_id();
            let bid = graph.new_block_id();
            let nid = graph.mint_node(bid, pid, b'+');
            graph.blocks.insert(bid, Block::from_sequence(bid, nid, sequence));
            graph.paths.insert(pid, Path::new(pid, name, vec![nid], 0, circular));
        }
        Ok(graph)
    }

    // rebuild from deserialized parts, advancing the id counters past them
    pub fn assemble(blocks: BTreeMap<BlockId,Block>, nodes: BTreeMap<NodeId,Node>, paths: BTreeMap<PathId,Path>) -> Graph {
        let next_block_id = blocks.keys().map(|b| b.0 + 1).max().unwrap_or(0);
        let next_node_id = nodes.keys().map(|n| n.0 + 1).max().unwrap_or(0);
        let next_path_id = paths.keys().map(|p| p.0 + 1).max().unwrap_or(0);
        Graph { blocks, nodes, paths, next_block_id, next_node_id, next_path_id }
    }

    pub fn new_block_id(&mut self) -> BlockId {
        self.next_block_id += 1;
        BlockId(self.next_block_id - 1)
    }

    pub fn new_path_id(&mut self) -> PathId {
        self.next_path_id += 1;
        PathId(self.next_path_id - 1)
    }

    pub fn mint_node(&mut self, block:BlockId, path:PathId, strand:u8) -> NodeId {
        let nid = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.insert(nid, Node::new(nid, block, path, strand));
        nid
    }

    pub fn path_by_name(&self, name: &str) -> Option<&Path> {
        self.paths.values().find(|p| p.name == name)
    }

    /* MATERIALIZATION */

    pub fn length_of_node(&self, nid:NodeId) -> usize {
        let node = &self.nodes[&nid];
        self.blocks[&node.block].length_of(nid)
    }

    // node bytes as traversed by its path
    pub fn sequence_of_node(&self, nid:NodeId) -> Vec<u8> {
        let node = &self.nodes[&nid];
        let bytes = self.blocks[&node.block].sequence_of(nid);
        if node.is_forward() { bytes } else { seq::revcomp(&bytes) }
    }

    // concatenation of the path's nodes, starting at the current rotation
    pub fn reconstruct_path(&self, pid:PathId) -> Vec<u8> {
        self.paths[&pid].nodes.iter()
            .flat_map(|&nid| self.sequence_of_node(nid))
            .collect()
    }

    // the original input genome: the reconstruction un-rotated by `offset`
    pub fn original_sequence(&self, pid:PathId) -> Vec<u8> {
        let mut bytes = self.reconstruct_path(pid);
        let p = &self.paths[&pid];
        if p.circular && !bytes.is_empty() && p.offset > 0 {
            let shift = p.offset % bytes.len();
            bytes.rotate_right(shift);
        }
        bytes
    }

    pub fn path_length(&self, pid:PathId) -> usize {
        self.paths[&pid].nodes.iter().map(|&nid| self.length_of_node(nid)).sum()
    }

    // recompute every path's per-node start offsets
    pub fn finalize(&mut self) {
        let pids = self.paths.keys().cloned().collect_vec();
        for pid in pids {
            let total = self.path_length(pid);
            let lengths = self.paths[&pid].nodes.iter().map(|&nid| self.length_of_node(nid)).collect_vec();
            let p = self.paths.get_mut(&pid).unwrap();
            let circular = p.circular;
            let mut start = p.offset;
            p.position = lengths.iter().map(|&len| {
                let pos = if circular && total > 0 { start % total } else { start };
                start += len;
                pos
            }).collect();
        }
    }

    /* GRAPH SIMPLIFICATION */

    // drop every block no longer referenced by any path
    pub fn prune(&mut self) {
        let referenced: HashSet<BlockId> = self.paths.values()
            .flat_map(|p| p.nodes.iter().map(|nid| self.nodes[nid].block))
            .collect();
        self.blocks.retain(|bid, _| referenced.contains(bid));
        self.nodes.retain(|_, node| referenced.contains(&node.block));
    }

    // drop nodes whose materialized sequence is empty
    pub fn purge(&mut self) {
        let empty: Vec<NodeId> = self.nodes.keys()
            .filter(|&&nid| self.length_of_node(nid) == 0)
            .cloned()
            .collect();
        for nid in empty {
            let node = self.nodes.remove(&nid).unwrap();
            self.blocks.get_mut(&node.block).unwrap().remove_node(nid);
            self.paths.get_mut(&node.path).unwrap().replace_node(nid, &[]);
        }
        self.blocks.retain(|_, block| block.depth() > 0);
    }

    // keep only the named genomes, then prune
    pub fn marginalize(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            ensure!(self.path_by_name(name).is_some(), "unknown genome name: \"{name}\"");
        }
        let dropped = self.paths.values()
            .filter(|p| !names.contains(&p.name))
            .map(|p| p.id)
            .collect_vec();
        for pid in dropped {
            let p = self.paths.remove(&pid).unwrap();
            for nid in p.nodes {
                let node = self.nodes.remove(&nid).unwrap();
                self.blocks.get_mut(&node.block).unwrap().remove_node(nid);
            }
        }
        self.blocks.retain(|_, block| block.depth() > 0);
        self.prune();
        Ok(())
    }

    pub fn detransitive(&mut self) {
        detransitive::detransitive(self)
    }

    /* CONSISTENCY */

    // verify the arena invariants; fatal defects in mutation code show up here
    pub fn consistency_check(&self) -> Result<()> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        for p in self.paths.values() {
            for &nid in &p.nodes {
                ensure!(seen.insert(nid), "node {nid} appears on more than one path position");
                let Some(node) = self.nodes.get(&nid) else {
                    bail!("path {} references unknown node {nid}", p.name);
                };
                ensure!(node.path == p.id, "node {nid} does not belong to path {}", p.name);
                let Some(block) = self.blocks.get(&node.block) else {
                    bail!("node {nid} references unknown block {}", node.block);
                };
                ensure!(block.contains_node(nid), "block {} is missing alleles for node {nid}", block.id);
            }
        }
        ensure!(seen.len() == self.nodes.len(), "orphan nodes in the arena");
        for block in self.blocks.values() {
            ensure!(block.depth() > 0, "block {} is unreferenced", block.id);
            let ins_loci: HashSet<usize> = block.alleles.values()
                .flat_map(|al| al.inss.keys().map(|&(p,_)| p))
                .collect();
            let gap_loci: HashSet<usize> = block.gaps.keys().cloned().collect();
            ensure!(ins_loci == gap_loci, "block {}: gap table out of sync with insertions", block.id);
            for (nid, al) in &block.alleles {
                ensure!(seen.contains(nid), "block {} keyed by dangling node {nid}", block.id);
                ensure!(al.subs.keys().all(|&p| p < block.len()), "block {}: substitution out of bounds", block.id);
                ensure!(al.dels.iter().all(|(&p,&l)| l > 0 && p + l <= block.len()), "block {}: deletion out of bounds", block.id);
                ensure!(al.inss.keys().all(|&(p,_)| p <= block.len()), "block {}: insertion out of bounds", block.id);
                ensure!(
                    al.inss.iter().all(|(&(p,d),s)| d + s.len() <= block.gaps[&p]),
                    "block {}: insertion exceeds its reserved gap", block.id
                );
                ensure!(
                    al.dels.iter().tuple_windows().all(|((&p,&l),(&q,_))| p + l <= q),
                    "block {}: overlapping deletions", block.id
                );
                ensure!(
                    al.subs.keys().all(|&p| !al.dels.iter().any(|(&q,&l)| q <= p && p < q + l)),
                    "block {}: substitution inside a deletion", block.id
                );
            }
        }
        Ok(())
    }

    /* OUTPUT */

    pub fn write_gfa(&self, gfa_path: &FsPath) -> Result<()> {
        let mut gfa = crate::utils::get_file_writer(gfa_path)?;
        gfa.write_all(b"H\tVN:Z:1.0\n")?;

        for block in self.blocks.values() {
            let line = format!(
                "S\t{}\t{}\tLN:i:{}\tRC:i:{}\n",
                block.id,
                String::from_utf8_lossy(&block.consensus),
                block.len(),
                block.depth()
            );
            gfa.write_all(line.as_bytes())?;
        }

        // aggregate traversals per unordered node pair
        let mut links: BTreeMap<((BlockId,u8),(BlockId,u8)), usize> = BTreeMap::new();
        for p in self.paths.values() {
            for (i, j) in path::adjacent_pairs(p) {
                let a = &self.nodes[&p.nodes[i]];
                let b = &self.nodes[&p.nodes[j]];
                let fwd = ((a.block, a.strand), (b.block, b.strand));
                let rev = ((b.block, flip_strand(b.strand)), (a.block, flip_strand(a.strand)));
                *links.entry(std::cmp::min(fwd, rev)).or_insert(0) += 1;
            }
        }
        for (((from, from_strand), (to, to_strand)), count) in links {
            let line = format!(
                "L\t{}\t{}\t{}\t{}\t0M\tRC:i:{}\n",
                from, from_strand as char, to, to_strand as char, count
            );
            gfa.write_all(line.as_bytes())?;
        }

        for p in self.paths.values() {
            let walk = p.nodes.iter()
                .map(|nid| {
                    let node = &self.nodes[nid];
                    format!("{}{}", node.block, node.strand as char)
                })
                .join(",");
            let circular = if p.circular { "\tTP:Z:circular" } else { "" };
            let line = format!("P\t{}\t{}\t*{}\n", p.name, walk, circular);
            gfa.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    // consensus of every block, keyed by its id
    pub fn write_fasta(&self, fasta_path: &FsPath) -> Result<()> {
        let mut writer = crate::utils::get_file_writer(fasta_path)?;
        for block in self.blocks.values() {
            seq::write_fasta_record(&mut writer, &block.id.to_string(), &block.consensus)?;
        }
        Ok(())
    }
}
