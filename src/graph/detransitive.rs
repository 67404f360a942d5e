use std::collections::VecDeque;

use ahash::AHashMap as HashMap;
use itertools::Itertools;
use tinyvec::TinyVec;

use crate::block::Block;
use crate::graph::Graph;
use crate::graph::junction::{Junction,JunctionIndex};
use crate::node::{BlockId,NodeId,PathId};
use crate::utils::flip_strand;

type ChainEntry = (BlockId,u8);


// collapse every maximal chain of blocks that all genomes traverse together
// into a single block. Afterwards no transitive junction remains and every
// path materializes to the same sequence as before.
pub fn detransitive(graph: &mut Graph) {

    let index = JunctionIndex::build(graph);
    let transitive = index.transitive_junctions();
    if transitive.is_empty() {
        return
    }

    let chains = thread_chains(&transitive);
    spdlog::debug!("detransitive: {} junctions threaded into {} chains", transitive.len(), chains.len());
    for chain in chains {
        fuse_chain(graph, &chain);
    }
}


#[inline(always)]
fn flip_entry(entry: ChainEntry) -> ChainEntry {
    (entry.0, flip_strand(entry.1))
}

fn reverse_chain(chain: &mut VecDeque<ChainEntry>) {
    let reversed = chain.iter().rev().map(|&e| flip_entry(e)).collect_vec();
    *chain = reversed.into();
}


// thread transitive junctions into maximal oriented chains. Junctions arrive
// in a stable total order, so the result is deterministic. A junction that
// touches a chain anywhere but at a compatible endpoint signals corrupted
// upstream data and is fatal; one that would close a cycle is skipped.
fn thread_chains(junctions: &[Junction]) -> Vec<VecDeque<ChainEntry>> {

    let mut chains: Vec<Option<VecDeque<ChainEntry>>> = vec![];
    let mut member: HashMap<BlockId,usize> = HashMap::new();

    // make `entry` the chain's tail, reversing if it sits at the head
    fn orient_tail(chain: &mut VecDeque<ChainEntry>, entry: ChainEntry) {
        if *chain.back().unwrap() == entry {
            return
        }
        if *chain.front().unwrap() == flip_entry(entry) {
            reverse_chain(chain);
            return
        }
        panic!("transitive junction meets chain {:?} away from its tail at {:?}", chain, entry);
    }

    fn orient_head(chain: &mut VecDeque<ChainEntry>, entry: ChainEntry) {
        if *chain.front().unwrap() == entry {
            return
        }
        if *chain.back().unwrap() == flip_entry(entry) {
            reverse_chain(chain);
            return
        }
        panic!("transitive junction meets chain {:?} away from its head at {:?}", chain, entry);
    }

    for junction in junctions {
        let (left, right) = (junction.left, junction.right);
        match (member.get(&left.0).copied(), member.get(&right.0).copied()) {
            (None, None) => {
                let idx = chains.len();
                chains.push(Some(VecDeque::from([left, right])));
                member.insert(left.0, idx);
                member.insert(right.0, idx);
            },
            (Some(a), None) => {
                let chain = chains[a].as_mut().unwrap();
                orient_tail(chain, left);
                chain.push_back(right);
                member.insert(right.0, a);
            },
            (None, Some(b)) => {
                let chain = chains[b].as_mut().unwrap();
                orient_head(chain, right);
                chain.push_front(left);
                member.insert(left.0, b);
            },
            (Some(a), Some(b)) if a == b => {
                // the chain would bite its own tail; leave the cycle open
                spdlog::debug!("skipping cycle-closing junction {junction}");
            },
            (Some(a), Some(b)) => {
                let mut tail = chains[b].take().unwrap();
                orient_head(&mut tail, right);
                let chain = chains[a].as_mut().unwrap();
                orient_tail(chain, left);
                for entry in tail {
                    member.insert(entry.0, a);
                    chain.push_back(entry);
                }
            },
        }
    }

    chains.into_iter().flatten().filter(|c| c.len() >= 2).collect()
}


// one path occurrence of a chain: `nodes` in path order, starting at `beg`
struct Run {
    path: PathId,
    beg: usize,
    strand: u8,
    nodes: TinyVec<[NodeId;8]>,
}


fn match_run(graph: &Graph, pid:PathId, beg:usize, chain: &[ChainEntry]) -> Option<Run> {
    let path = &graph.paths[&pid];
    let n = path.nodes.len();
    let k = chain.len();
    if n < k {
        return None
    }
    let indices = (0..k).map(|t| (beg + t) % n).collect_vec();
    if !path.circular && indices.iter().tuple_windows().any(|(&a,&b)| b < a) {
        return None
    }
    let forward = indices.iter().enumerate().all(|(t, &i)| {
        let node = &graph.nodes[&path.nodes[i]];
        (node.block, node.strand) == chain[t]
    });
    if forward {
        let nodes = indices.iter().map(|&i| path.nodes[i]).collect();
        return Some(Run { path: pid, beg, strand: b'+', nodes })
    }
    let reverse = indices.iter().enumerate().all(|(t, &i)| {
        let node = &graph.nodes[&path.nodes[i]];
        (node.block, node.strand) == flip_entry(chain[k - 1 - t])
    });
    if reverse {
        let nodes = indices.iter().map(|&i| path.nodes[i]).collect();
        return Some(Run { path: pid, beg, strand: b'-', nodes })
    }
    None
}


// fuse one chain into a single block and collapse every occurrence on every
// path into one new node
fn fuse_chain(graph: &mut Graph, chain: &VecDeque<ChainEntry>) {

    let chain = chain.iter().cloned().collect_vec();
    let k = chain.len();

    let oriented: Vec<Block> = chain.iter()
        .map(|&(bid, strand)| {
            let block = &graph.blocks[&bid];
            if strand == b'+' { block.clone() } else { block.reverse_complement() }
        })
        .collect();

    // rotate circular paths so no occurrence wraps the origin
    let pids = graph.paths.keys().cloned().collect_vec();
    for &pid in &pids {
        if !graph.paths[&pid].circular {
            continue
        }
        let n = graph.paths[&pid].nodes.len();
        for beg in 0..n {
            if let Some(run) = match_run(graph, pid, beg, &chain) {
                if run.beg + k > n {
                    let nucleotides: usize = graph.paths[&pid].nodes[..run.beg].iter()
                        .map(|&nid| graph.length_of_node(nid))
                        .sum();
                    let total = graph.path_length(pid);
                    graph.paths.get_mut(&pid).unwrap().rotate_left(run.beg, nucleotides, total);
                    break
                }
            }
        }
    }

    // locate all occurrences
    let mut runs: Vec<Run> = vec![];
    for &pid in &pids {
        let n = graph.paths[&pid].nodes.len();
        let mut beg = 0;
        while beg + k <= n {
            match match_run(graph, pid, beg, &chain) {
                Some(run) => {
                    beg += k;
                    runs.push(run);
                },
                None => { beg += 1; },
            }
        }
    }

    let expected: usize = graph.paths.values()
        .flat_map(|p| p.nodes.iter())
        .filter(|&nid| graph.nodes[nid].block == chain[0].0)
        .count();
    assert_eq!(runs.len(), expected, "chain occurrences do not cover every traversal");

    // one fresh node per occurrence
    let fused_bid = graph.new_block_id();
    let new_nids = runs.iter()
        .map(|run| graph.mint_node(fused_bid, run.path, run.strand))
        .collect_vec();

    // per chain entry, the allele maps re-keyed from the old occurrence nodes
    // to the fused ones; concatenation handles offsets and seam gaps
    let parts = oriented.into_iter().enumerate()
        .map(|(j, block)| {
            let alleles = runs.iter().zip(&new_nids)
                .map(|(run, &new_nid)| {
                    let t = if run.strand == b'+' { j } else { k - 1 - j };
                    (new_nid, block.alleles[&run.nodes[t]].clone())
                })
                .collect();
            Block::new(block.id, block.consensus, block.gaps, alleles)
        })
        .collect_vec();
    let mut fused = Block::concatenate(fused_bid, parts);
    fused.reconsensus();
    graph.blocks.insert(fused_bid, fused);

    // rewire paths back to front so run indices stay valid
    let mut by_path: HashMap<PathId, Vec<(usize, NodeId)>> = HashMap::new();
    for (run, &new_nid) in runs.iter().zip(&new_nids) {
        by_path.entry(run.path).or_default().push((run.beg, new_nid));
    }
    for (pid, mut replacements) in by_path {
        replacements.sort_unstable_by_key(|&(beg, _)| std::cmp::Reverse(beg));
        let p = graph.paths.get_mut(&pid).unwrap();
        for (beg, new_nid) in replacements {
            p.replace_range(beg, k, &[new_nid]);
        }
    }
    for run in &runs {
        for &nid in &run.nodes {
            graph.nodes.remove(&nid);
        }
    }
    for &(bid, _) in &chain {
        graph.blocks.remove(&bid);
    }
}
