use std::fmt;

use itertools::Itertools;

use crate::node::{NodeId,PathId};


// one genome: an ordered (optionally circular) walk over nodes. `offset` is
// the rotation origin for circular genomes, in nucleotides on the original
// input sequence; `position` holds per-node start offsets and is recomputed
// by Graph::finalize.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub id: PathId,
    pub name: String,
    pub nodes: Vec<NodeId>,
    pub offset: usize,
    pub circular: bool,
    pub position: Vec<usize>,
}

impl Path {

    pub fn new(id:PathId, name:String, nodes:Vec<NodeId>, offset:usize, circular:bool) -> Self {
        Self { id, name, nodes, offset, circular, position: vec![] }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // splice an ordered replacement list in place of one node
    pub fn replace_node(&mut self, old:NodeId, replacement:&[NodeId]) -> bool {
        match self.nodes.iter().position(|&nid| nid == old) {
            Some(idx) => {
                self.nodes.splice(idx..idx+1, replacement.iter().cloned());
                true
            },
            None => false,
        }
    }

    // splice a replacement for the node range [beg, beg+count)
    pub fn replace_range(&mut self, beg:usize, count:usize, replacement:&[NodeId]) {
        assert!(beg + count <= self.nodes.len());
        self.nodes.splice(beg..beg+count, replacement.iter().cloned());
    }

    // move the first `count` nodes to the back of a circular walk;
    // `nucleotides` is their total materialized length, `total` the genome's
    pub fn rotate_left(&mut self, count:usize, nucleotides:usize, total:usize) {
        assert!(self.circular, "cannot rotate a linear path");
        if count == 0 || self.nodes.is_empty() {
            return
        }
        let len = self.nodes.len();
        self.nodes.rotate_left(count % len);
        if total > 0 {
            self.offset = (self.offset + nucleotides) % total;
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Path({}, {} nodes{})", self.name, self.nodes.len(), if self.circular { ", circular" } else { "" })
    }
}


// junction walk: ordered pairs of adjacent node indices, wrapping for
// circular paths with more than one node
pub fn adjacent_pairs(path: &Path) -> Vec<(usize,usize)> {
    let n = path.nodes.len();
    if n < 2 {
        return vec![]
    }
    let mut pairs = (0..n-1).map(|i| (i, i+1)).collect_vec();
    if path.circular {
        pairs.push((n-1, 0));
    }
    pairs
}
