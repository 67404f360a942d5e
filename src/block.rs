pub mod alleles;
pub mod reconsensus;

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::block::alleles::Alleles;
use crate::node::{BlockId,NodeId};
use crate::seq;


// unit of homology: a consensus sequence plus per-node sparse variants.
// `gaps` reserves alignment-column width immediately before each consensus
// position that carries at least one insertion (locus == consensus length
// reserves space past the end).
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub consensus: Vec<u8>,
    pub gaps: BTreeMap<usize,usize>,
    pub alleles: BTreeMap<NodeId,Alleles>,
}

impl Block {

    pub fn new(id:BlockId, consensus:Vec<u8>, gaps:BTreeMap<usize,usize>, alleles:BTreeMap<NodeId,Alleles>) -> Self {
        Self { id, consensus, gaps, alleles }
    }

    // singleton block wrapping one input genome
    pub fn from_sequence(id:BlockId, node:NodeId, consensus:Vec<u8>) -> Self {
        let alleles = BTreeMap::from([(node, Alleles::new())]);
        Self { id, consensus, gaps: BTreeMap::new(), alleles }
    }

    pub fn len(&self) -> usize {
        self.consensus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consensus.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.alleles.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + use<'_> {
        self.alleles.keys().cloned()
    }

    pub fn contains_node(&self, node:NodeId) -> bool {
        self.alleles.contains_key(&node)
    }

    // width of the full alignment matrix: consensus plus reserved gap columns
    pub fn aligned_width(&self) -> usize {
        self.len() + self.gaps.values().sum::<usize>()
    }

    // materialized length of one node's sequence
    pub fn length_of(&self, node:NodeId) -> usize {
        let delta = self.alleles[&node].len_delta();
        (self.len() as isize + delta) as usize
    }

    // unaligned bytes of the original genomic substring the node represents
    pub fn sequence_of(&self, node:NodeId) -> Vec<u8> {
        alleles::apply(&self.consensus, &self.alleles[&node])
    }

    /* ALIGNED MATRIX VIEW */

    // column of each consensus position once gap columns are laid out before
    // their locus; the extra trailing entry marks the end-gap start
    fn column_index(&self) -> Vec<usize> {
        let mut columns = Vec::with_capacity(self.len() + 1);
        let mut acc = 0;
        for pos in 0..=self.len() {
            acc += self.gaps.get(&pos).copied().unwrap_or(0);
            columns.push(pos + acc);
        }
        columns
    }

    // aligned row of the consensus itself: bases at their columns, '-' in gaps
    pub fn consensus_row(&self) -> Vec<u8> {
        let columns = self.column_index();
        let mut row = vec![b'-'; self.aligned_width()];
        for (pos, &base) in self.consensus.iter().enumerate() {
            row[columns[pos]] = base;
        }
        row
    }

    // aligned row of one node: length aligned_width(), '-' in every reserved
    // column the node does not cover
    pub fn aligned_row(&self, node:NodeId) -> Vec<u8> {
        let columns = self.column_index();
        let mut row = self.consensus_row();
        let al = &self.alleles[&node];
        for (&pos, &del_len) in &al.dels {
            for q in pos..std::cmp::min(pos + del_len, self.len()) {
                row[columns[q]] = b'-';
            }
        }
        for (&pos, &base) in &al.subs {
            row[columns[pos]] = base;
        }
        for (&(locus, offset), bytes) in &al.inss {
            let width = *self.gaps.get(&locus).expect("insertion outside any reserved gap");
            assert!(offset + bytes.len() <= width, "insertion exceeds its reserved gap");
            let start = columns[locus] - width + offset;
            row[start..start + bytes.len()].copy_from_slice(bytes);
        }
        row
    }

    /* STRUCTURAL OPERATIONS */

    // restriction to the consensus window [beg,end); keeps the full node set
    pub fn slice(&self, beg:usize, end:usize, new_id:BlockId) -> Block {
        assert!(beg <= end && end <= self.len(), "invalid slice bounds {beg}..{end}");
        let include_end = end == self.len() && beg < end;
        let consensus = self.consensus[beg..end].to_vec();
        let gaps = self.gaps.iter()
            .filter(|&(&p,_)| (beg <= p && p < end) || (p == end && include_end))
            .map(|(&p,&w)| (p - beg, w))
            .collect();
        let alleles = self.alleles.iter()
            .map(|(&node, al)| (node, al.window(beg, end, include_end)))
            .collect();
        Block::new(new_id, consensus, gaps, alleles)
    }

    // concatenation of blocks sharing one node set; gap reservations meeting
    // at a seam collapse into one widened gap
    pub fn concatenate(new_id:BlockId, parts:Vec<Block>) -> Block {
        assert!(!parts.is_empty());
        let node_set = parts[0].alleles.keys().cloned().collect_vec();
        assert!(
            parts.iter().all(|p| p.alleles.keys().cloned().collect_vec() == node_set),
            "concatenated blocks must share the same node set"
        );

        let mut consensus: Vec<u8> = vec![];
        let mut gaps: BTreeMap<usize,usize> = BTreeMap::new();
        let mut alleles: BTreeMap<NodeId,Alleles> = node_set.into_iter().map(|n| (n, Alleles::new())).collect();

        for part in parts {
            let delta = consensus.len();
            let seam_width = gaps.get(&delta).copied().unwrap_or(0);
            for (&p, &w) in &part.gaps {
                *gaps.entry(p + delta).or_insert(0) += w;
            }
            for (node, al) in part.alleles {
                let mut shifted = al.shift(delta);
                if seam_width > 0 {
                    // the right-hand gap at the seam starts after the left-hand reservation
                    let seam_keys = shifted.inss.range((delta,0)..(delta+1,0)).map(|(&k,_)| k).collect_vec();
                    for (p, d) in seam_keys {
                        let bytes = shifted.inss.remove(&(p, d)).unwrap();
                        shifted.inss.insert((p, d + seam_width), bytes);
                    }
                }
                alleles.get_mut(&node).unwrap().merge(shifted);
            }
            consensus.extend_from_slice(&part.consensus);
        }

        Block::new(new_id, consensus, gaps, alleles)
    }

    pub fn reverse_complement(&self) -> Block {
        let len = self.len();
        let consensus = seq::revcomp(&self.consensus);
        let alleles = self.alleles.iter()
            .map(|(&node, al)| (node, al.reverse_complement(len, &self.gaps)))
            .collect();
        let gaps = self.gaps.iter().map(|(&p,&w)| (len - p, w)).collect();
        Block::new(self.id, consensus, gaps, alleles)
    }

    // rename the node keys of the allele maps; `mapping` must cover every node
    pub fn rekey(mut self, mapping: &ahash::AHashMap<NodeId,NodeId>) -> Block {
        self.alleles = self.alleles.into_iter()
            .map(|(node, al)| (mapping[&node], al))
            .collect();
        self
    }

    pub fn insert_node(&mut self, node:NodeId, al:Alleles) {
        let prev = self.alleles.insert(node, al);
        assert!(prev.is_none(), "node {node} already present in block {}", self.id);
    }

    pub fn remove_node(&mut self, node:NodeId) {
        self.alleles.remove(&node);
        // a gap reservation is only kept while some node still inserts into it
        let loci: std::collections::BTreeSet<usize> = self.alleles.values()
            .flat_map(|al| al.inss.keys().map(|&(locus,_)| locus))
            .collect();
        self.gaps.retain(|locus, _| loci.contains(locus));
    }

    // re-derive the consensus from the column-wise plurality (no-op under depth 3)
    pub fn reconsensus(&mut self) {
        reconsensus::reconsensus(self)
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    fn block_with(consensus: &str, entries: Vec<(usize, Alleles)>, gaps: &[(usize,usize)]) -> Block {
        Block::new(
            BlockId(1),
            consensus.as_bytes().to_vec(),
            gaps.iter().cloned().collect(),
            entries.into_iter().map(|(n, al)| (NodeId(n), al)).collect(),
        )
    }

    fn toy_block() -> Block {
        //          0         1         2         3
        //          01234567890123456789012345678901
        // cons:    ACTATATTACGGCGATCGATCGATTACTCGCT
        //   n1:    ...G............................
        //   n2:    .......|.....xxx................
        //   n3:    ................................|
        let mut n1 = Alleles::new();
        n1.subs.insert(3, b'G');
        let mut n2 = Alleles::new();
        n2.inss.insert((7,0), b"AA".to_vec());
        n2.dels.insert(13, 3);
        let mut n3 = Alleles::new();
        n3.inss.insert((32,0), b"CCC".to_vec());
        block_with(
            "ACTATATTACGGCGATCGATCGATTACTCGCT",
            vec![(1, n1), (2, n2), (3, n3)],
            &[(7,2), (32,3)],
        )
    }

    #[test]
    fn test_materialize_nodes() {
        let b = toy_block();
        assert_eq!(b.sequence_of(NodeId(1)), b"ACTGTATTACGGCGATCGATCGATTACTCGCT".to_vec());
        assert_eq!(b.sequence_of(NodeId(2)), b"ACTATATAATACGGCCGATCGATTACTCGCT".to_vec());
        assert_eq!(b.sequence_of(NodeId(3)), b"ACTATATTACGGCGATCGATCGATTACTCGCTCCC".to_vec());
        assert_eq!(b.length_of(NodeId(2)), 31);
        assert_eq!(b.depth(), 3);
    }

    #[test]
    fn test_aligned_rows() {
        let b = toy_block();
        assert_eq!(b.aligned_width(), 32 + 5);
        let cons = b.consensus_row();
        assert_eq!(&cons[..10], b"ACTATAT--T".as_slice());
        assert_eq!(&cons[34..], b"---".as_slice());
        let r2 = b.aligned_row(NodeId(2));
        assert_eq!(&r2[7..9], b"AA".as_slice());
        assert_eq!(&r2[15..18], b"---".as_slice());
        let r3 = b.aligned_row(NodeId(3));
        assert_eq!(&r3[34..], b"CCC".as_slice());
        // every row strips back to the materialized sequence
        for node in [NodeId(1), NodeId(2), NodeId(3)] {
            let stripped = b.aligned_row(node).into_iter().filter(|&c| c != b'-').collect::<Vec<_>>();
            assert_eq!(stripped, b.sequence_of(node));
        }
    }

    #[test]
    fn test_slice_concat_roundtrip() {
        // P2: slicing at any point and concatenating back preserves every node
        let b = toy_block();
        for cut in [0usize, 1, 7, 8, 13, 15, 31, 32] {
            let left = b.slice(0, cut, BlockId(10));
            let right = b.slice(cut, b.len(), BlockId(11));
            let merged = Block::concatenate(BlockId(12), vec![left, right]);
            for node in b.nodes() {
                assert_eq!(merged.sequence_of(node), b.sequence_of(node), "cut at {cut}");
            }
        }
    }

    #[test]
    fn test_slice_three_way() {
        let b = toy_block();
        let parts = vec![
            b.slice(0, 7, BlockId(10)),
            b.slice(7, 20, BlockId(11)),
            b.slice(20, 32, BlockId(12)),
        ];
        let merged = Block::concatenate(BlockId(13), parts);
        for node in b.nodes() {
            assert_eq!(merged.sequence_of(node), b.sequence_of(node));
        }
    }

    #[test]
    fn test_reverse_complement_block() {
        let b = toy_block();
        let rc = b.reverse_complement();
        assert_eq!(rc.consensus, b"AGCGAGTAATCGATCGATCGCCGTAATATAGT".to_vec());
        assert_eq!(rc.alleles[&NodeId(1)].subs.iter().next(), Some((&28, &b'C')));
        assert_eq!(rc.alleles[&NodeId(2)].dels.iter().next(), Some((&16, &3)));
        assert_eq!(rc.alleles[&NodeId(2)].inss.keys().next(), Some(&(25,0)));
        assert_eq!(rc.alleles[&NodeId(3)].inss.keys().next(), Some(&(0,0)));
    }

    #[test]
    fn test_reverse_complement_involution() {
        // P3: revcomp twice is materially the identity
        let b = toy_block();
        let back = b.reverse_complement().reverse_complement();
        for node in b.nodes() {
            assert_eq!(back.sequence_of(node), b.sequence_of(node));
        }
        assert_eq!(back.consensus, b.consensus);
        assert_eq!(back.gaps, b.gaps);
    }

    #[test]
    fn test_revcomp_materialization_commutes() {
        let b = toy_block();
        let rc = b.reverse_complement();
        for node in b.nodes() {
            assert_eq!(rc.sequence_of(node), seq::revcomp(&b.sequence_of(node)));
        }
    }

    #[test]
    fn test_concat_merges_seam_gaps() {
        // left part ends with a reserved gap, right part starts with one
        let mut left_n1 = Alleles::new();
        left_n1.inss.insert((4,0), b"TT".to_vec());
        let left = block_with("ACGT", vec![(1, left_n1), (2, Alleles::new())], &[(4,2)]);
        let mut right_n2 = Alleles::new();
        right_n2.inss.insert((0,0), b"GG".to_vec());
        let right = block_with("CCCC", vec![(1, Alleles::new()), (2, right_n2)], &[(0,2)]);
        let merged = Block::concatenate(BlockId(3), vec![left, right]);
        assert_eq!(merged.gaps, [(4usize,4usize)].into_iter().collect::<BTreeMap<_,_>>());
        assert_eq!(merged.sequence_of(NodeId(1)), b"ACGTTTCCCC".to_vec());
        assert_eq!(merged.sequence_of(NodeId(2)), b"ACGTGGCCCC".to_vec());
        // the seam keeps insertions in distinct sub-columns
        assert_eq!(merged.alleles[&NodeId(1)].inss.keys().next(), Some(&(4,0)));
        assert_eq!(merged.alleles[&NodeId(2)].inss.keys().next(), Some(&(4,2)));
    }

    #[test]
    fn test_remove_node_reconciles_gaps() {
        let mut b = toy_block();
        b.remove_node(NodeId(3));
        assert_eq!(b.gaps.keys().cloned().collect::<Vec<_>>(), vec![7]);
        b.remove_node(NodeId(2));
        assert!(b.gaps.is_empty());
    }

    #[test]
    fn test_empty_slice_is_allowed() {
        let b = toy_block();
        let empty = b.slice(5, 5, BlockId(9));
        assert!(empty.is_empty());
        assert_eq!(empty.depth(), 3);
        for node in empty.nodes() {
            assert!(empty.sequence_of(node).is_empty());
        }
    }
}
