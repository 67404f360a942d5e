use std::collections::BTreeMap;

use crate::seq;


// sparse edits of one node against its block consensus. Loci are 0-based
// consensus positions; an insertion key (p,d) places its bytes immediately
// before consensus position p (p == consensus length appends at the end),
// at offset d inside the alignment gap reserved at p.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alleles {
    pub subs: BTreeMap<usize, u8>,
    pub inss: BTreeMap<(usize,usize), Vec<u8>>,
    pub dels: BTreeMap<usize, usize>,
}

impl Alleles {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty() && self.inss.is_empty() && self.dels.is_empty()
    }

    // length of the materialized sequence relative to the consensus
    pub fn len_delta(&self) -> isize {
        let inserted: usize = self.inss.values().map(|s| s.len()).sum();
        let deleted: usize = self.dels.values().sum();
        inserted as isize - deleted as isize
    }

    // translate every locus rightward
    pub fn shift(&self, delta: usize) -> Alleles {
        Alleles {
            subs: self.subs.iter().map(|(&p,&b)| (p+delta, b)).collect(),
            inss: self.inss.iter().map(|(&(p,d),s)| ((p+delta, d), s.clone())).collect(),
            dels: self.dels.iter().map(|(&p,&l)| (p+delta, l)).collect(),
        }
    }

    // restrict to the window [beg,end) and translate to window coordinates.
    // Deletions crossing either boundary are clipped so that slicing then
    // concatenating reproduces every materialized sequence. The gap at the
    // right boundary belongs to the next window unless `include_end`.
    pub fn window(&self, beg: usize, end: usize, include_end: bool) -> Alleles {
        let mut out = Alleles::new();
        for (&p, &b) in self.subs.range(beg..end) {
            out.subs.insert(p - beg, b);
        }
        for (&p, &l) in &self.dels {
            if p >= end {
                break
            }
            let clip_beg = std::cmp::max(p, beg);
            let clip_end = std::cmp::min(p + l, end);
            if clip_beg < clip_end {
                out.dels.insert(clip_beg - beg, clip_end - clip_beg);
            }
        }
        for (&(p,d), s) in self.inss.range((beg,0)..) {
            if p > end || (p == end && !include_end) {
                break
            }
            out.inss.insert((p - beg, d), s.clone());
        }
        out
    }

    // union of two edit sets; keys are expected to be disjoint
    pub fn merge(&mut self, other: Alleles) {
        for (p, b) in other.subs {
            let prev = self.subs.insert(p, b);
            debug_assert!(prev.is_none(), "colliding substitution at locus {p}");
        }
        for (k, s) in other.inss {
            let prev = self.inss.insert(k, s);
            debug_assert!(prev.is_none(), "colliding insertion at locus {:?}", k);
        }
        for (p, l) in other.dels {
            let prev = self.dels.insert(p, l);
            debug_assert!(prev.is_none(), "colliding deletion at locus {p}");
        }
    }

    // remap onto the reverse-complemented consensus of length `len`;
    // `gaps` are the parent block's reserved gap widths
    pub fn reverse_complement(&self, len: usize, gaps: &BTreeMap<usize,usize>) -> Alleles {
        let subs = self.subs.iter()
            .map(|(&p,&b)| (len - p - 1, seq::complement(b)))
            .collect();
        let dels = self.dels.iter()
            .map(|(&p,&l)| (len - p - l, l))
            .collect();
        let inss = self.inss.iter()
            .map(|(&(p,d),s)| {
                let width = *gaps.get(&p).expect("insertion outside any reserved gap");
                debug_assert!(d + s.len() <= width);
                ((len - p, width - d - s.len()), seq::revcomp(s))
            })
            .collect();
        Alleles { subs, inss, dels }
    }

    // rightmost extent reached by this node's insertions inside the gap at `locus`
    pub fn ins_reach(&self, locus: usize) -> usize {
        self.inss.range((locus,0)..(locus+1,0))
            .map(|(&(_,d),s)| d + s.len())
            .max()
            .unwrap_or(0)
    }

    // drain the insertions at `locus`, in offset order
    pub fn take_insertions_at(&mut self, locus: usize) -> Vec<Vec<u8>> {
        let keys: Vec<(usize,usize)> = self.inss.range((locus,0)..(locus+1,0)).map(|(&k,_)| k).collect();
        keys.into_iter().map(|k| self.inss.remove(&k).unwrap()).collect()
    }
}


// materialize `alleles` against `consensus`: the unaligned bytes of the node.
// Loci are walked in sorted order; at equal loci an insertion is emitted first
// (its bytes sit before the consensus base a deletion or substitution consumes).
pub fn apply(consensus: &[u8], alleles: &Alleles) -> Vec<u8> {

    enum Edit<'a> {
        Ins(&'a [u8]),
        Del(usize),
        Sub(u8),
    }

    let mut events: Vec<(usize, u8, usize, Edit)> = Vec::with_capacity(
        alleles.subs.len() + alleles.inss.len() + alleles.dels.len()
    );
    events.extend(alleles.inss.iter().map(|(&(p,d),s)| (p, 0u8, d, Edit::Ins(s.as_slice()))));
    events.extend(alleles.dels.iter().map(|(&p,&l)| (p, 1u8, 0, Edit::Del(l))));
    events.extend(alleles.subs.iter().map(|(&p,&b)| (p, 2u8, 0, Edit::Sub(b))));
    events.sort_by_key(|&(p,rank,d,_)| (p,rank,d));

    let mut out = Vec::with_capacity((consensus.len() as isize + alleles.len_delta()) as usize);
    let mut read = 0;
    for (pos, _, _, edit) in events {
        debug_assert!(pos >= read, "overlapping edits at locus {pos}");
        if pos > read {
            out.extend_from_slice(&consensus[read..pos]);
            read = pos;
        }
        match edit {
            Edit::Ins(s) => { out.extend_from_slice(s); },
            Edit::Del(l) => { read = std::cmp::min(pos + l, consensus.len()); },
            Edit::Sub(b) => { out.push(b); read = pos + 1; },
        }
    }
    out.extend_from_slice(&consensus[read..]);
    out
}


#[cfg(test)]
mod tests {

    use super::*;

    fn alleles(subs: &[(usize,u8)], inss: &[((usize,usize),&str)], dels: &[(usize,usize)]) -> Alleles {
        Alleles {
            subs: subs.iter().cloned().collect(),
            inss: inss.iter().map(|(k,s)| (*k, s.as_bytes().to_vec())).collect(),
            dels: dels.iter().cloned().collect(),
        }
    }

    #[test]
    fn test_apply_substitution() {
        let al = alleles(&[(5, b'G')], &[], &[]);
        assert_eq!(apply(b"ACGTACGT", &al), b"ACGTAGGT".to_vec());
    }

    #[test]
    fn test_apply_insertion_before_locus() {
        let al = alleles(&[], &[((4,0),"TT")], &[]);
        assert_eq!(apply(b"ACGTACGT", &al), b"ACGTTTACGT".to_vec());
        let leading = alleles(&[], &[((0,0),"GG")], &[]);
        assert_eq!(apply(b"ACGT", &leading), b"GGACGT".to_vec());
        let trailing = alleles(&[], &[((4,0),"GG")], &[]);
        assert_eq!(apply(b"ACGT", &trailing), b"ACGTGG".to_vec());
    }

    #[test]
    fn test_apply_deletion() {
        let al = alleles(&[], &[], &[(4,5)]);
        assert_eq!(apply(b"ACGTAAAAACGT", &al), b"ACGTCGT".to_vec());
    }

    #[test]
    fn test_apply_combined_order() {
        // insertion at a locus precedes the substituted base at the same locus
        let al = alleles(&[(2, b'A')], &[((2,0),"TT")], &[(0,1)]);
        assert_eq!(apply(b"CCGG", &al), b"CTTAG".to_vec());
    }

    #[test]
    fn test_apply_to_empty_result() {
        let al = alleles(&[], &[], &[(0,4)]);
        assert_eq!(apply(b"ACGT", &al), Vec::<u8>::new());
    }

    #[test]
    fn test_window_clips_deletions() {
        let al = alleles(&[(9, b'T')], &[((4,0),"AA")], &[(1,2), (5,4)]);
        // window [2,8): left deletion clipped to 2..3, right one to 5..8
        let w = al.window(2, 8, false);
        assert_eq!(w.dels, alleles(&[], &[], &[(0,1), (3,3)]).dels);
        assert!(w.subs.is_empty());
        assert_eq!(w.inss, alleles(&[], &[((2,0),"AA")], &[]).inss);
        // window [0,4): the gap at the right boundary belongs to the next window
        let w = al.window(0, 4, false);
        assert_eq!(w.dels, alleles(&[], &[], &[(1,2)]).dels);
        assert!(w.inss.is_empty());
        // unless include_end is set
        let w = al.window(0, 4, true);
        assert_eq!(w.inss, alleles(&[], &[((4,0),"AA")], &[]).inss);
    }

    #[test]
    fn test_shift_then_apply() {
        let al = alleles(&[(1, b'G')], &[((2,0),"T")], &[(0,1)]);
        let shifted = al.shift(4);
        assert_eq!(shifted.subs.keys().cloned().collect::<Vec<_>>(), vec![5]);
        assert_eq!(shifted.inss.keys().cloned().collect::<Vec<_>>(), vec![(6,0)]);
        assert_eq!(shifted.dels.keys().cloned().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_reverse_complement_mapping() {
        // fixture mirrors a 32 nt consensus with edits at both ends
        let gaps: BTreeMap<usize,usize> = [(7,2), (32,3)].into_iter().collect();
        let al = alleles(&[(3, b'G')], &[((7,0),"AA"), ((32,0),"CCC")], &[(13,3)]);
        let rc = al.reverse_complement(32, &gaps);
        assert_eq!(rc.subs, alleles(&[(28, b'C')], &[], &[]).subs);
        assert_eq!(rc.dels, alleles(&[], &[], &[(16,3)]).dels);
        assert_eq!(rc.inss, alleles(&[], &[((25,0),"TT"), ((0,0),"GGG")], &[]).inss);
    }

    #[test]
    fn test_reverse_complement_involution() {
        let gaps: BTreeMap<usize,usize> = [(0,2), (5,4)].into_iter().collect();
        let al = alleles(&[(4, b'T')], &[((0,0),"CA"), ((5,0),"GGT")], &[(6,2)]);
        let rc_gaps: BTreeMap<usize,usize> = gaps.iter().map(|(&p,&w)| (10-p, w)).collect();
        assert_eq!(al.reverse_complement(10, &gaps).reverse_complement(10, &rc_gaps), al);
    }

    #[test]
    fn test_len_delta() {
        let al = alleles(&[(1, b'A')], &[((0,0),"TTTT")], &[(2,3)]);
        assert_eq!(al.len_delta(), 1);
    }
}
