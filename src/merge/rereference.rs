use std::collections::BTreeMap;

use itertools::Itertools;

use crate::align::Cigar;
use crate::block::Block;
use crate::block::alleles::{self,Alleles};
use crate::node::{BlockId,NodeId};


// fuse a matched query slice onto a reference slice: the output block keeps
// the reference consensus and node set, and gains re-referenced allele maps
// for every query node. Walks the segment's interior cigar with one cursor
// per side.
pub fn rereference(qry: &Block, target: &Block, ops: &[Cigar], new_id: BlockId) -> Block {

    let qlen = qry.len();

    let mut out = target.slice(0, target.len(), new_id);

    // working copies of the query maps; each op consumes its window so that
    // boundary insertions are handed to exactly one op
    let mut qwork: BTreeMap<NodeId,Alleles> = qry.alleles.clone();
    let mut fused: BTreeMap<NodeId,Alleles> = qry.nodes().map(|nid| (nid, Alleles::new())).collect();
    let qnodes = qry.nodes().collect_vec();

    let (mut xq, mut xr) = (0usize, 0usize);
    for op in ops {
        match op.op {
            b'M' => {
                let include_end = xq + op.len == qlen;
                for &nid in &qnodes {
                    let qal = qwork.get_mut(&nid).unwrap();
                    let window = qal.window(xq, xq + op.len, include_end);
                    drain_insertions(qal, xq, xq + op.len, include_end);
                    let window = rereference_aligned(window, &qry.consensus[xq..xq+op.len], &target.consensus[xr..xr+op.len]);
                    fused.get_mut(&nid).unwrap().merge(window.shift(xr));
                }
                xq += op.len;
                xr += op.len;
            },
            b'D' => {
                // the query lacks these reference columns; a query insertion
                // sitting right at the boundary is paid back against them
                for &nid in &qnodes {
                    let pieces = qwork.get_mut(&nid).unwrap().take_insertions_at(xq);
                    let bytes = pieces.concat();
                    place_on_deleted(fused.get_mut(&nid).unwrap(), &bytes, &target.consensus, xr, op.len);
                }
                xr += op.len;
            },
            b'I' => {
                // query content absent from the reference becomes an insertion
                // at the boundary locus, packed after the node's prior content
                let include_end = xq + op.len == qlen;
                for &nid in &qnodes {
                    let qal = qwork.get_mut(&nid).unwrap();
                    let window = qal.window(xq, xq + op.len, include_end);
                    drain_insertions(qal, xq, xq + op.len, include_end);
                    let bytes = alleles::apply(&qry.consensus[xq..xq+op.len], &window);
                    if bytes.is_empty() {
                        continue
                    }
                    let al = fused.get_mut(&nid).unwrap();
                    let offset = al.ins_reach(xr);
                    al.inss.insert((xr, offset), bytes);
                }
                xq += op.len;
            },
            other => unreachable!("cigar operation '{}' survived the partition", other as char),
        }
    }
    assert_eq!(xq, qlen, "query cursor did not reach the end of the slice");
    assert_eq!(xr, target.len(), "reference cursor did not reach the end of the slice");

    for (nid, al) in fused {
        out.insert_node(nid, al);
    }

    // reconcile reserved gap widths with the maximum insertion reach
    let mut gaps: BTreeMap<usize,usize> = BTreeMap::new();
    for al in out.alleles.values() {
        for (&(locus, offset), bytes) in &al.inss {
            let reach = offset + bytes.len();
            gaps.entry(locus).and_modify(|w| *w = std::cmp::max(*w, reach)).or_insert(reach);
        }
    }
    out.gaps = gaps;

    #[cfg(any(test, debug_assertions))]
    for &nid in &qnodes {
        assert_eq!(out.sequence_of(nid), qry.sequence_of(nid), "re-reference corrupted query node {nid}");
    }

    out.reconsensus();
    out
}


fn drain_insertions(al: &mut Alleles, beg: usize, end: usize, include_end: bool) {
    al.inss.retain(|&(p,_),_| p < beg || p > end || (p == end && !include_end));
}


// translate one aligned window: the node's own edits stay, and every column
// where the two consensi disagree becomes a substitution for the node unless
// its own variants already cover that column
fn rereference_aligned(window: Alleles, qry_cons: &[u8], target_cons: &[u8]) -> Alleles {
    debug_assert_eq!(qry_cons.len(), target_cons.len());
    let mut subs: BTreeMap<usize,u8> = BTreeMap::new();
    for (&pos, &base) in &window.subs {
        if base != target_cons[pos] {
            subs.insert(pos, base);
        }
    }
    for pos in 0..qry_cons.len() {
        if qry_cons[pos] != target_cons[pos]
            && !window.subs.contains_key(&pos)
            && !deleted_at(&window, pos)
        {
            subs.insert(pos, qry_cons[pos]);
        }
    }
    Alleles { subs, inss: window.inss, dels: window.dels }
}


fn deleted_at(al: &Alleles, pos: usize) -> bool {
    al.dels.range(..=pos).next_back()
        .is_some_and(|(&p, &len)| p <= pos && pos < p + len)
}


// lay query insertion bytes over a reference range the query consensus lacks:
// the best gapless placement keeps matching columns, the uncovered flanks
// become deletions, and any overhang past the range is re-inserted at its end
fn place_on_deleted(al: &mut Alleles, bytes: &[u8], target_cons: &[u8], xr: usize, len: usize) {
    if bytes.is_empty() {
        al.dels.insert(xr, len);
        return
    }
    let window = &target_cons[xr..xr+len];
    if bytes.len() <= len {
        let offset = hamming_align(bytes, window);
        for (i, &b) in bytes.iter().enumerate() {
            if b != window[offset + i] {
                al.subs.insert(xr + offset + i, b);
            }
        }
        if offset > 0 {
            al.dels.insert(xr, offset);
        }
        if offset + bytes.len() < len {
            al.dels.insert(xr + offset + bytes.len(), len - offset - bytes.len());
        }
    } else {
        for i in 0..len {
            if bytes[i] != window[i] {
                al.subs.insert(xr + i, bytes[i]);
            }
        }
        let overhang = bytes[len..].to_vec();
        let d = al.ins_reach(xr + len);
        al.inss.insert((xr + len, d), overhang);
    }
}


// offset minimizing the hamming distance of `bytes` inside `window`;
// the leftmost offset wins ties. TODO: negative offsets would let an
// insertion overlap the preceding aligned column run
fn hamming_align(bytes: &[u8], window: &[u8]) -> usize {
    debug_assert!(!bytes.is_empty() && bytes.len() <= window.len());
    let mut best = (0usize, 0usize);
    for offset in 0..=(window.len() - bytes.len()) {
        let matches = bytes.iter().zip(&window[offset..]).filter(|(a,b)| a == b).count();
        if matches > best.1 {
            best = (offset, matches);
        }
    }
    best.0
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::align::parse_cigar;

    fn block(id:usize, consensus:&str, nodes:&[usize]) -> Block {
        Block::new(
            BlockId(id),
            consensus.as_bytes().to_vec(),
            BTreeMap::new(),
            nodes.iter().map(|&n| (NodeId(n), Alleles::new())).collect(),
        )
    }

    #[test]
    fn test_hamming_align() {
        assert_eq!(hamming_align(b"CGT", b"AACGTAA"), 2);
        assert_eq!(hamming_align(b"AA", b"AAAA"), 0); // leftmost tie
        assert_eq!(hamming_align(b"TT", b"ACGT"), 2);
    }

    #[test]
    fn test_rereference_snp() {
        let q = block(1, "ACGTAGGT", &[10]);
        let r = block(2, "ACGTACGT", &[20]);
        let fused = rereference(&q, &r, &parse_cigar("8M").unwrap(), BlockId(3));
        assert_eq!(fused.consensus, b"ACGTACGT".to_vec());
        assert_eq!(fused.depth(), 2);
        assert_eq!(fused.alleles[&NodeId(10)].subs, [(5usize, b'G')].into_iter().collect());
        assert!(fused.alleles[&NodeId(20)].is_empty());
    }

    #[test]
    fn test_rereference_local_deletion() {
        let q = block(1, "ACGTCGT", &[10]);
        let r = block(2, "ACGTAAAAACGT", &[20]);
        let fused = rereference(&q, &r, &parse_cigar("4M5D3M").unwrap(), BlockId(3));
        assert_eq!(fused.len(), 12);
        assert_eq!(fused.alleles[&NodeId(10)].dels, [(4usize, 5usize)].into_iter().collect());
        assert_eq!(fused.sequence_of(NodeId(10)), b"ACGTCGT".to_vec());
    }

    #[test]
    fn test_rereference_local_insertion() {
        let q = block(1, "ACGTTTACGT", &[10]);
        let r = block(2, "ACGTACGT", &[20]);
        let fused = rereference(&q, &r, &parse_cigar("4M2I4M").unwrap(), BlockId(3));
        assert_eq!(fused.len(), 8);
        assert_eq!(fused.alleles[&NodeId(10)].inss, [((4usize,0usize), b"TT".to_vec())].into_iter().collect());
        assert_eq!(fused.gaps, [(4usize, 2usize)].into_iter().collect());
        assert_eq!(fused.sequence_of(NodeId(10)), b"ACGTTTACGT".to_vec());
    }

    #[test]
    fn test_rereference_carries_query_variants() {
        // the query block already holds a variant for its node
        let mut q = block(1, "ACGTACGT", &[10]);
        q.alleles.get_mut(&NodeId(10)).unwrap().subs.insert(2, b'A');
        let r = block(2, "ACGTACGT", &[20]);
        let fused = rereference(&q, &r, &parse_cigar("8M").unwrap(), BlockId(3));
        assert_eq!(fused.alleles[&NodeId(10)].subs, [(2usize, b'A')].into_iter().collect());
        assert_eq!(fused.sequence_of(NodeId(10)), b"ACATACGT".to_vec());
    }

    #[test]
    fn test_rereference_drops_identity_substitutions() {
        // the node's variant restores exactly the reference base
        let mut q = block(1, "ACGTAGGT", &[10]);
        q.alleles.get_mut(&NodeId(10)).unwrap().subs.insert(5, b'C');
        let r = block(2, "ACGTACGT", &[20]);
        let fused = rereference(&q, &r, &parse_cigar("8M").unwrap(), BlockId(3));
        assert!(fused.alleles[&NodeId(10)].is_empty());
        assert_eq!(fused.sequence_of(NodeId(10)), b"ACGTACGT".to_vec());
    }

    #[test]
    fn test_boundary_insertion_payback() {
        // the query node carries an insertion right before the deleted range;
        // its bytes match the reference there and collapse into plain columns
        let mut q = block(1, "ACGTCGT", &[10]);
        q.alleles.get_mut(&NodeId(10)).unwrap().inss.insert((4,0), b"AAAAA".to_vec());
        q.gaps.insert(4, 5);
        let r = block(2, "ACGTAAAAACGT", &[20]);
        let fused = rereference(&q, &r, &parse_cigar("4M5D3M").unwrap(), BlockId(3));
        // the payback fills the whole deleted range: no variants remain
        assert!(fused.alleles[&NodeId(10)].is_empty());
        assert_eq!(fused.sequence_of(NodeId(10)), b"ACGTAAAAACGT".to_vec());
    }

    #[test]
    fn test_boundary_insertion_partial_payback() {
        let mut q = block(1, "ACGTCGT", &[10]);
        q.alleles.get_mut(&NodeId(10)).unwrap().inss.insert((4,0), b"AA".to_vec());
        q.gaps.insert(4, 2);
        let r = block(2, "ACGTAAAAACGT", &[20]);
        let fused = rereference(&q, &r, &parse_cigar("4M5D3M").unwrap(), BlockId(3));
        let al = &fused.alleles[&NodeId(10)];
        assert!(al.subs.is_empty());
        assert_eq!(al.dels.values().sum::<usize>(), 3);
        assert_eq!(fused.sequence_of(NodeId(10)), b"ACGTAACGT".to_vec());
    }

    #[test]
    fn test_boundary_insertion_overhang() {
        // more inserted bytes than deleted columns: the rest re-inserts
        let mut q = block(1, "ACGTCGT", &[10]);
        q.alleles.get_mut(&NodeId(10)).unwrap().inss.insert((4,0), b"AAAAATT".to_vec());
        q.gaps.insert(4, 7);
        let r = block(2, "ACGTAAAAACGT", &[20]);
        let fused = rereference(&q, &r, &parse_cigar("4M5D3M").unwrap(), BlockId(3));
        let al = &fused.alleles[&NodeId(10)];
        assert_eq!(al.inss, [((9usize,0usize), b"TT".to_vec())].into_iter().collect());
        assert_eq!(fused.gaps, [(9usize, 2usize)].into_iter().collect());
        assert_eq!(fused.sequence_of(NodeId(10)), b"ACGTAAAAATTCGT".to_vec());
    }
}
