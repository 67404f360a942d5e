pub mod rereference;

use ahash::AHashMap as HashMap;
use anyhow::{bail,ensure,Result};
use itertools::Itertools;

use crate::align::{Alignment,Cigar,MIN_ALIGNMENT_LENGTH};
use crate::block::Block;
use crate::graph::Graph;
use crate::interval::{self,Interval};
use crate::node::NodeId;
use crate::utils::flip_strand;


// indels at least this long split a matched range into separate blocks;
// shorter ones stay inside it as local gaps
pub const DEFAULT_MINBLOCK: usize = 500;


// one stretch of the pairwise alignment between two block consensi
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    QryOnly(Interval),
    RefOnly(Interval),
    Matched { qry: Interval, target: Interval, ops: Vec<Cigar> },
}

impl Segment {

    pub fn covers_qry(&self) -> bool {
        !matches!(self, Segment::RefOnly(_))
    }

    pub fn covers_target(&self) -> bool {
        !matches!(self, Segment::QryOnly(_))
    }
}


fn close_matched(segments: &mut Vec<Segment>, qry:Interval, target:Interval, ops: Vec<Cigar>) {
    if ops.iter().any(|op| op.op == b'M') {
        segments.push(Segment::Matched { qry, target, ops });
        return
    }
    // a range with no aligned column is unmatched on each populated side
    if !qry.is_empty() {
        segments.push(Segment::QryOnly(qry));
    }
    if !target.is_empty() {
        segments.push(Segment::RefOnly(target));
    }
}


// walk the cigar of an oriented alignment and emit the ordered segment list.
// Flanks outside the hit intervals become unmatched segments; indels of at
// least `minblock` columns split the matched range.
pub fn partition(aln: &Alignment, minblock: usize) -> Result<Vec<Segment>> {

    ensure!(aln.strand == b'+', "partition requires an oriented alignment");

    let mut segments = vec![];
    for flank in interval::difference(Interval::new(0, aln.qry.length), &[Interval::new(aln.qry.beg, aln.qry.end)]) {
        if flank.end <= aln.qry.beg {
            segments.push(Segment::QryOnly(flank));
        }
    }
    for flank in interval::difference(Interval::new(0, aln.target.length), &[Interval::new(aln.target.beg, aln.target.end)]) {
        if flank.end <= aln.target.beg {
            segments.push(Segment::RefOnly(flank));
        }
    }

    let (mut xq, mut xr) = (aln.qry.beg, aln.target.beg);
    let (mut held_q, mut held_r) = (xq, xr);
    let mut held_ops: Vec<Cigar> = vec![];

    for &op in &aln.cigar {
        match op.op {
            b'M' => {
                held_ops.push(op);
                xq += op.len;
                xr += op.len;
            },
            b'D' if op.len < minblock => {
                held_ops.push(op);
                xr += op.len;
            },
            b'D' => {
                close_matched(&mut segments, Interval::new(held_q, xq), Interval::new(held_r, xr), std::mem::take(&mut held_ops));
                segments.push(Segment::RefOnly(Interval::new(xr, xr + op.len)));
                xr += op.len;
                (held_q, held_r) = (xq, xr);
            },
            b'I' if op.len < minblock => {
                held_ops.push(op);
                xq += op.len;
            },
            b'I' => {
                close_matched(&mut segments, Interval::new(held_q, xq), Interval::new(held_r, xr), std::mem::take(&mut held_ops));
                segments.push(Segment::QryOnly(Interval::new(xq, xq + op.len)));
                xq += op.len;
                (held_q, held_r) = (xq, xr);
            },
            other => bail!("unsupported cigar operation '{}' reached the partition", other as char),
        }
    }
    close_matched(&mut segments, Interval::new(held_q, xq), Interval::new(held_r, xr), held_ops);

    ensure!(
        xq == aln.qry.end && xr == aln.target.end,
        "cigar does not span the hit intervals: reached {xq}/{}, {xr}/{}", aln.qry.end, aln.target.end
    );

    for flank in interval::difference(Interval::new(0, aln.qry.length), &[Interval::new(0, aln.qry.end)]) {
        segments.push(Segment::QryOnly(flank));
    }
    for flank in interval::difference(Interval::new(0, aln.target.length), &[Interval::new(0, aln.target.end)]) {
        segments.push(Segment::RefOnly(flank));
    }

    Ok(segments)
}


// reverse-complement the query block when the alignment is on the minus
// strand, remapping the query hit onto the flipped coordinates
fn oriented_query(graph: &Graph, aln: &Alignment) -> (Block, Alignment) {
    let block = &graph.blocks[&aln.qry.name];
    if aln.strand == b'+' {
        return (block.clone(), aln.clone())
    }
    let mut oriented = aln.clone();
    oriented.strand = b'+';
    oriented.qry.beg = aln.qry.length - aln.qry.end;
    oriented.qry.end = aln.qry.length - aln.qry.beg;
    (block.reverse_complement(), oriented)
}


// integrate one pairwise alignment: partition both blocks along the cigar,
// instantiate one new block per segment, rewire every affected path, and
// drop the two originals
pub fn merge_blocks(graph: &mut Graph, aln: &Alignment, minblock: usize) -> Result<()> {

    ensure!(aln.qry.name != aln.target.name, "self-alignments cannot be merged");
    ensure!(graph.blocks.contains_key(&aln.qry.name), "unknown query block {}", aln.qry.name);
    ensure!(graph.blocks.contains_key(&aln.target.name), "unknown target block {}", aln.target.name);

    let flipped = aln.strand == b'-';
    let (qry_block, aln) = oriented_query(graph, aln);
    let target_block = graph.blocks[&aln.target.name].clone();
    ensure!(
        aln.qry.length == qry_block.len() && aln.target.length == target_block.len(),
        "alignment lengths do not match blocks {} and {}", qry_block.id, target_block.id
    );

    let segments = partition(&aln, minblock)?;

    // one new block per segment, still keyed by the original node ids
    let mut new_blocks = Vec::with_capacity(segments.len());
    for segment in &segments {
        let bid = graph.new_block_id();
        let block = match segment {
            Segment::QryOnly(iv) => qry_block.slice(iv.beg, iv.end, bid),
            Segment::RefOnly(iv) => target_block.slice(iv.beg, iv.end, bid),
            Segment::Matched { qry, target, ops } => {
                let q = qry_block.slice(qry.beg, qry.end, bid);
                let r = target_block.slice(target.beg, target.end, bid);
                rereference::rereference(&q, &r, ops, bid)
            },
        };
        new_blocks.push(block);
    }

    // mint one node per (original node, covering segment)
    let mut replacements: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut rekeyed_blocks = Vec::with_capacity(new_blocks.len());
    for (segment, block) in segments.iter().zip(new_blocks) {
        let mut mapping = HashMap::new();
        for old_nid in block.nodes().collect_vec() {
            let old = graph.nodes[&old_nid];
            let from_qry = qry_block.contains_node(old_nid);
            debug_assert!(if from_qry { segment.covers_qry() } else { segment.covers_target() });
            let strand = if from_qry && flipped { flip_strand(old.strand) } else { old.strand };
            let new_nid = graph.mint_node(block.id, old.path, strand);
            mapping.insert(old_nid, new_nid);
            replacements.entry(old_nid).or_default().push(new_nid);
        }
        rekeyed_blocks.push(block.rekey(&mapping));
    }

    // splice the ordered replacement lists into the paths; a node traversed
    // against the oriented consensus receives its segments right-to-left
    for old_nid in qry_block.nodes().chain(target_block.nodes()).collect_vec() {
        let old = graph.nodes[&old_nid];
        let mut list = replacements.remove(&old_nid).unwrap_or_default();
        let effective = if qry_block.contains_node(old_nid) && flipped { flip_strand(old.strand) } else { old.strand };
        if effective == b'-' {
            list.reverse();
        }
        let spliced = graph.paths.get_mut(&old.path).unwrap().replace_node(old_nid, &list);
        assert!(spliced, "node {old_nid} vanished from path {}", old.path);
        graph.nodes.remove(&old_nid);
    }

    graph.blocks.remove(&qry_block.id);
    graph.blocks.remove(&target_block.id);
    for block in rekeyed_blocks {
        graph.blocks.insert(block.id, block);
    }

    Ok(())
}


// integrate a batch of alignments from the external aligner. The guide-tree
// driver supplies `energy` as an opaque scoring callback; only hits long
// enough and with non-positive energy are consumed. Alignments whose blocks
// were already consumed by an earlier merger in the batch are stale and
// skipped.
pub fn merge_alignments(
    graph: &mut Graph,
    alignments: &[Alignment],
    minblock: usize,
    energy: impl Fn(&Alignment) -> f64,
) -> Result<usize> {
    let mut merged = 0;
    for aln in alignments {
        if aln.length < MIN_ALIGNMENT_LENGTH || energy(aln) > 0.0 {
            continue
        }
        if !graph.blocks.contains_key(&aln.qry.name) || !graph.blocks.contains_key(&aln.target.name) {
            spdlog::debug!("skipping stale alignment {} vs {}", aln.qry.name, aln.target.name);
            continue
        }
        merge_blocks(graph, aln, minblock)?;
        merged += 1;
    }
    Ok(merged)
}
