use std::fmt;

use serde::{Deserialize,Serialize};


#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.0) }
}


// one directed occurrence of a block on a path; identity (not structure) keys
// the block's allele maps, so ids are minted once by the graph and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub block: BlockId,
    pub path: PathId,
    pub strand: u8,
}

impl Node {

    pub fn new(id:NodeId, block:BlockId, path:PathId, strand:u8) -> Self {
        debug_assert!(strand == b'+' || strand == b'-');
        Self { id, block, path, strand }
    }

    pub fn is_forward(&self) -> bool {
        self.strand == b'+'
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Node({},b{},p{},{})", self.id, self.block, self.path, self.strand as char)
    }
}
