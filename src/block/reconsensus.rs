use std::collections::BTreeMap;

use crate::block::Block;
use crate::block::alleles::Alleles;
use crate::node::NodeId;


// re-derive the consensus as the column-wise plurality of the aligned matrix
// and rebuild every allele map against it. Running it twice yields the same
// block, and every node still materializes to the same sequence.
pub fn reconsensus(block: &mut Block) {

    if block.depth() < 3 {
        return
    }

    let rows: Vec<(NodeId, Vec<u8>)> = block.nodes()
        .map(|node| (node, block.aligned_row(node)))
        .collect();
    let old_row = block.consensus_row();
    let new_row = modal_consensus(&rows, Some(&old_row));
    if new_row == old_row {
        return
    }

    spdlog::debug!("block {}: consensus drifted, rebuilding {} columns", block.id, new_row.len());

    #[cfg(any(test, debug_assertions))]
    let before: Vec<Vec<u8>> = block.nodes().map(|node| block.sequence_of(node)).collect();

    let (consensus, gaps, alleles) = rebuild_from_rows(&new_row, &rows);
    block.consensus = consensus;
    block.gaps = gaps;
    block.alleles = alleles;

    #[cfg(any(test, debug_assertions))]
    for (node, expected) in block.nodes().collect::<Vec<_>>().into_iter().zip(before) {
        assert_eq!(block.sequence_of(node), expected, "reconsensus corrupted node {node}");
    }
}


// plurality byte of every column; ties keep the incumbent consensus byte when
// it is among the winners, the smallest byte otherwise
pub fn modal_consensus(rows: &[(NodeId, Vec<u8>)], incumbent: Option<&[u8]>) -> Vec<u8> {

    assert!(!rows.is_empty());
    let width = rows[0].1.len();
    assert!(rows.iter().all(|(_, row)| row.len() == width), "aligned rows differ in width");

    let mut consensus = Vec::with_capacity(width);
    for col in 0..width {
        let mut counts: BTreeMap<u8,usize> = BTreeMap::new();
        for (_, row) in rows {
            *counts.entry(row[col]).or_insert(0) += 1;
        }
        let best = *counts.values().max().unwrap();
        let winner = match incumbent.map(|row| row[col]) {
            Some(byte) if counts.get(&byte) == Some(&best) => byte,
            _ => *counts.iter().find(|(_, &count)| count == best).unwrap().0,
        };
        consensus.push(winner);
    }
    consensus
}


// rebuild a block body from a gapped consensus row and the per-node aligned
// rows: non-gap mismatches become substitutions, gapped stretches of a row
// under consensus bases become deletions, bases under consensus gaps become
// insertions. Gap widths are reconciled to the maximum insertion reach.
pub fn rebuild_from_rows(cons_row: &[u8], rows: &[(NodeId, Vec<u8>)])
    -> (Vec<u8>, BTreeMap<usize,usize>, BTreeMap<NodeId,Alleles>)
{
    let width = cons_row.len();

    // locus of each column: consensus position, or insertion locus inside a gap
    let mut locus = vec![0usize; width];
    let mut gap_start = vec![0usize; width];
    let mut position = 0;
    for col in 0..width {
        locus[col] = position;
        if cons_row[col] != b'-' {
            position += 1;
        } else {
            gap_start[col] = if col > 0 && cons_row[col-1] == b'-' { gap_start[col-1] } else { col };
        }
    }

    let consensus: Vec<u8> = cons_row.iter().filter(|&&c| c != b'-').cloned().collect();
    let mut alleles: BTreeMap<NodeId,Alleles> = BTreeMap::new();
    let mut gaps: BTreeMap<usize,usize> = BTreeMap::new();

    for (node, row) in rows {
        assert_eq!(row.len(), width, "aligned row width mismatch");
        let mut al = Alleles::new();
        let mut del: Option<(usize,usize)> = None;
        let mut ins: Option<(usize,usize,Vec<u8>)> = None;
        for col in 0..width {
            let c = cons_row[col];
            let r = row[col];
            if c == b'-' {
                if r != b'-' {
                    // content inside the gap terminates any pending deletion,
                    // otherwise the deletion would swallow the insertion locus
                    if let Some((p, len)) = del.take() {
                        al.dels.insert(p, len);
                    }
                    match ins.as_mut() {
                        Some((_, _, bytes)) => bytes.push(r),
                        None => ins = Some((locus[col], col - gap_start[col], vec![r])),
                    }
                } else if let Some((p, d, bytes)) = ins.take() {
                    al.inss.insert((p, d), bytes);
                }
                continue
            }
            if let Some((p, d, bytes)) = ins.take() {
                al.inss.insert((p, d), bytes);
            }
            if r == b'-' {
                match del.as_mut() {
                    Some((_, len)) => *len += 1,
                    None => del = Some((locus[col], 1)),
                }
            } else {
                if let Some((p, len)) = del.take() {
                    al.dels.insert(p, len);
                }
                if r != c {
                    al.subs.insert(locus[col], r);
                }
            }
        }
        if let Some((p, d, bytes)) = ins.take() {
            al.inss.insert((p, d), bytes);
        }
        if let Some((p, len)) = del.take() {
            al.dels.insert(p, len);
        }
        for (&(p, d), bytes) in &al.inss {
            let reach = d + bytes.len();
            gaps.entry(p).and_modify(|w| *w = std::cmp::max(*w, reach)).or_insert(reach);
        }
        alleles.insert(*node, al);
    }

    (consensus, gaps, alleles)
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::node::BlockId;

    fn block_of_rows(consensus: &str, rows: &[(usize, &str)]) -> Block {
        let cons_row: Vec<u8> = consensus.as_bytes().to_vec();
        let rows: Vec<(NodeId, Vec<u8>)> = rows.iter()
            .map(|&(n, row)| (NodeId(n), row.as_bytes().to_vec()))
            .collect();
        let (seq, gaps, alleles) = rebuild_from_rows(&cons_row, &rows);
        Block::new(BlockId(1), seq, gaps, alleles)
    }

    #[test]
    fn test_rebuild_from_rows() {
        let b = block_of_rows("AC-GT", &[
            (1, "ACTGT"),
            (2, "AC-G-"),
            (3, "GC-GT"),
        ]);
        assert_eq!(b.consensus, b"ACGT".to_vec());
        assert_eq!(b.gaps, [(2usize,1usize)].into_iter().collect());
        assert_eq!(b.alleles[&NodeId(1)].inss[&(2,0)], b"T".to_vec());
        assert_eq!(b.alleles[&NodeId(2)].dels[&3], 1);
        assert_eq!(b.alleles[&NodeId(3)].subs[&0], b'G');
        assert_eq!(b.sequence_of(NodeId(1)), b"ACTGT".to_vec());
        assert_eq!(b.sequence_of(NodeId(2)), b"ACG".to_vec());
        assert_eq!(b.sequence_of(NodeId(3)), b"GCGT".to_vec());
    }

    #[test]
    fn test_rebuild_groups_runs() {
        let b = block_of_rows("ACGTACGT--", &[
            (1, "AC--ACGTTT"),
            (2, "ACGTACGT--"),
        ]);
        assert_eq!(b.alleles[&NodeId(1)].dels, [(2usize,2usize)].into_iter().collect());
        assert_eq!(b.alleles[&NodeId(1)].inss[&(8,0)], b"TT".to_vec());
        assert!(b.alleles[&NodeId(2)].is_empty());
        assert_eq!(b.gaps, [(8usize,2usize)].into_iter().collect());
    }

    #[test]
    fn test_rebuild_insertion_inside_deleted_stretch() {
        // a row that keeps only the gap content must not fold the insertion
        // locus into the surrounding deletion
        let b = block_of_rows("A-C", &[
            (1, "-T-"),
            (2, "A-C"),
        ]);
        assert_eq!(b.consensus, b"AC".to_vec());
        let al = &b.alleles[&NodeId(1)];
        assert_eq!(al.dels, [(0usize,1usize), (1usize,1usize)].into_iter().collect());
        assert_eq!(al.inss, [((1usize,0usize), b"T".to_vec())].into_iter().collect());
        assert_eq!(b.sequence_of(NodeId(1)), b"T".to_vec());
        assert_eq!(b.sequence_of(NodeId(2)), b"AC".to_vec());
    }

    #[test]
    fn test_modal_prefers_incumbent_on_tie() {
        let rows = vec![
            (NodeId(1), b"ACGT".to_vec()),
            (NodeId(2), b"AGGT".to_vec()),
        ];
        let modal = modal_consensus(&rows, Some(b"ACGT"));
        assert_eq!(modal, b"ACGT".to_vec());
        let modal = modal_consensus(&rows, None);
        assert_eq!(modal, b"ACGT".to_vec()); // 'C' < 'G'
    }

    #[test]
    fn test_reconsensus_moves_to_majority() {
        // three nodes, two share a variant: the consensus must follow them
        let mut n1 = Alleles::new();
        n1.subs.insert(1, b'T');
        let mut n2 = Alleles::new();
        n2.subs.insert(1, b'T');
        let b = Block::new(
            BlockId(7),
            b"ACGA".to_vec(),
            BTreeMap::new(),
            [(NodeId(1), n1), (NodeId(2), n2), (NodeId(3), Alleles::new())].into_iter().collect(),
        );
        let before: Vec<Vec<u8>> = b.nodes().map(|n| b.sequence_of(n)).collect();
        let mut b = b;
        b.reconsensus();
        assert_eq!(b.consensus, b"ATGA".to_vec());
        assert!(b.alleles[&NodeId(1)].is_empty());
        assert!(b.alleles[&NodeId(2)].is_empty());
        assert_eq!(b.alleles[&NodeId(3)].subs[&1], b'C');
        let after: Vec<Vec<u8>> = b.nodes().map(|n| b.sequence_of(n)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_reconsensus_is_idempotent() {
        let mut n1 = Alleles::new();
        n1.subs.insert(2, b'A');
        n1.inss.insert((4,0), b"GG".to_vec());
        let mut n2 = Alleles::new();
        n2.subs.insert(2, b'A');
        n2.inss.insert((4,0), b"GG".to_vec());
        let mut n3 = Alleles::new();
        n3.dels.insert(0, 1);
        let mut b = Block::new(
            BlockId(8),
            b"CCGT".to_vec(),
            [(4usize,2usize)].into_iter().collect(),
            [(NodeId(1), n1), (NodeId(2), n2), (NodeId(3), n3)].into_iter().collect(),
        );
        b.reconsensus();
        let once = b.clone();
        b.reconsensus();
        assert_eq!(b, once);
        // majority insertion was pulled into the consensus
        assert_eq!(b.consensus, b"CCATGG".to_vec());
        assert_eq!(b.alleles[&NodeId(3)].dels[&0], 1);
        assert_eq!(b.alleles[&NodeId(3)].dels[&4], 2);
    }

    #[test]
    fn test_reconsensus_skips_shallow_blocks() {
        let mut n2 = Alleles::new();
        n2.subs.insert(5, b'G');
        let mut b = Block::new(
            BlockId(9),
            b"ACGTACGT".to_vec(),
            BTreeMap::new(),
            [(NodeId(1), Alleles::new()), (NodeId(2), n2)].into_iter().collect(),
        );
        let before = b.clone();
        b.reconsensus();
        assert_eq!(b, before);
    }
}
