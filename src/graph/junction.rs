use std::collections::BTreeMap;
use std::fmt;

use crate::graph::Graph;
use crate::node::{BlockId,PathId};
use crate::path;
use crate::utils::flip_strand;


// a directed pair of adjacent block occurrences on some path. A junction and
// its reverse complement are the same adjacency, so only the canonical
// orientation is ever stored.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Junction {
    pub left: (BlockId,u8),
    pub right: (BlockId,u8),
}

impl Junction {

    pub fn new(left:(BlockId,u8), right:(BlockId,u8)) -> Self {
        let junction = Self { left, right };
        let flipped = junction.flipped();
        if flipped < junction { flipped } else { junction }
    }

    // the same adjacency read along the other strand
    pub fn flipped(&self) -> Junction {
        Junction {
            left: (self.right.0, flip_strand(self.right.1)),
            right: (self.left.0, flip_strand(self.left.1)),
        }
    }
}

impl fmt::Display for Junction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Junction({}{}|{}{})", self.left.0, self.left.1 as char, self.right.0, self.right.1 as char)
    }
}


// per-path tallies of junction crossings and block occurrences; a junction is
// transitive when every genome using either of its blocks crosses it every
// time it visits them
#[derive(Debug, Default)]
pub struct JunctionIndex {
    pub crossings: BTreeMap<Junction, BTreeMap<PathId,usize>>,
    pub occurrences: BTreeMap<BlockId, BTreeMap<PathId,usize>>,
}

impl JunctionIndex {

    pub fn build(graph: &Graph) -> Self {
        let mut index = JunctionIndex::default();
        for p in graph.paths.values() {
            for &nid in &p.nodes {
                let node = &graph.nodes[&nid];
                *index.occurrences.entry(node.block).or_default().entry(p.id).or_insert(0) += 1;
            }
            for (i, j) in path::adjacent_pairs(p) {
                let a = &graph.nodes[&p.nodes[i]];
                let b = &graph.nodes[&p.nodes[j]];
                let junction = Junction::new((a.block, a.strand), (b.block, b.strand));
                *index.crossings.entry(junction).or_default().entry(p.id).or_insert(0) += 1;
            }
        }
        index
    }

    pub fn is_transitive(&self, junction: &Junction) -> bool {
        let (lb, rb) = (junction.left.0, junction.right.0);
        if lb == rb {
            // a self-adjacency can only close a cycle
            return false
        }
        let crossed = &self.crossings[junction];
        let left = &self.occurrences[&lb];
        let right = &self.occurrences[&rb];
        left == right && left == crossed
    }

    // all transitive junctions, in a stable total order
    pub fn transitive_junctions(&self) -> Vec<Junction> {
        self.crossings.keys()
            .filter(|j| self.is_transitive(j))
            .cloned()
            .collect()
    }
}
