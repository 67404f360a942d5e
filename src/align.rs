use std::str::FromStr;

use anyhow::{anyhow,bail,Context,Result};
use itertools::Itertools;

use crate::node::BlockId;


// minimal length for an alignment to be worth merging
pub const MIN_ALIGNMENT_LENGTH: usize = 100;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cigar {
    pub len: usize,
    pub op: u8,
}

impl Cigar {

    pub fn new(len:usize, op:u8) -> Self {
        debug_assert!(matches!(op, b'M'|b'I'|b'D'));
        Self { len, op }
    }
}


// only M/I/D are meaningful between two block consensi; soft/hard clips and
// the extended match operators are rejected rather than silently degraded
pub fn parse_cigar(text: &str) -> Result<Vec<Cigar>> {
    let mut ops = vec![];
    let mut len = 0usize;
    for c in text.bytes() {
        match c {
            b'0'..=b'9' => { len = len*10 + (c - b'0') as usize; },
            b'M' | b'I' | b'D' => {
                if len == 0 {
                    bail!("zero-length operation in cigar string: \"{text}\"");
                }
                ops.push(Cigar::new(len, c));
                len = 0;
            },
            b'S' | b'H' | b'N' | b'P' | b'=' | b'X' => {
                bail!("unsupported cigar operation '{}' in \"{text}\"", c as char);
            },
            _ => bail!("malformed cigar string: \"{text}\""),
        }
    }
    if len != 0 {
        bail!("trailing length without operation in cigar string: \"{text}\"");
    }
    Ok(ops)
}


pub fn cigar_string(ops: &[Cigar]) -> String {
    ops.iter().map(|c| format!("{}{}", c.len, c.op as char)).join("")
}


// one side of a pairwise hit between two block consensi
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub name: BlockId,
    pub length: usize,
    pub beg: usize,
    pub end: usize,
}

impl Hit {

    pub fn new(name:BlockId, length:usize, beg:usize, end:usize) -> Self {
        assert!(beg <= end && end <= length, "invalid hit coordinates: {beg}..{end}/{length}");
        Self { name, length, beg, end }
    }

    // number of alignment ends that would cut a new block out of this side
    fn cuts(&self, minblock:usize) -> usize {
        (self.beg > minblock) as usize + (self.length - self.end > minblock) as usize
    }
}


#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub qry: Hit,
    pub target: Hit,
    pub matches: usize,
    pub length: usize,
    pub quality: u8,
    pub strand: u8,
    pub cigar: Vec<Cigar>,
    pub divergence: Option<f64>,
    pub score: Option<f64>,
}

impl Alignment {

    pub fn mismatches(&self) -> f64 {
        match self.divergence {
            Some(div) => div * self.length as f64,
            None => self.length.saturating_sub(self.matches) as f64,
        }
    }
}

impl FromStr for Alignment {
    type Err = anyhow::Error;

    // PAF record with a cg:Z tag, as emitted by the external aligner
    fn from_str(line: &str) -> Result<Self> {
        let fields = line.split('\t').collect_vec();
        if fields.len() < 12 {
            bail!("truncated paf record: \"{line}\"");
        }
        let parse_id = |s: &str| -> Result<BlockId> {
            Ok(BlockId(s.parse::<usize>().with_context(|| format!("invalid block id \"{s}\" in paf record"))?))
        };
        let parse_num = |s: &str| -> Result<usize> {
            s.parse::<usize>().with_context(|| format!("invalid number \"{s}\" in paf record"))
        };
        let strand = match fields[4] {
            "+" => b'+',
            "-" => b'-',
            other => bail!("invalid strand \"{other}\" in paf record"),
        };
        let mut cigar = None;
        let mut divergence = None;
        let mut score = None;
        for tag in &fields[12..] {
            match tag.split(':').collect_tuple() {
                Some(("cg", "Z", value)) => { cigar = Some(parse_cigar(value)?); },
                Some(("de", "f", value)) => { divergence = value.parse::<f64>().ok(); },
                Some(("AS", "i", value)) => { score = value.parse::<f64>().ok(); },
                _ => {},
            }
        }
        Ok(Alignment {
            qry: Hit::new(parse_id(fields[0])?, parse_num(fields[1])?, parse_num(fields[2])?, parse_num(fields[3])?),
            target: Hit::new(parse_id(fields[5])?, parse_num(fields[6])?, parse_num(fields[7])?, parse_num(fields[8])?),
            matches: parse_num(fields[9])?,
            length: parse_num(fields[10])?,
            quality: parse_num(fields[11])? as u8,
            strand,
            cigar: cigar.ok_or_else(|| anyhow!("missing cg:Z tag in paf record: \"{line}\""))?,
            divergence,
            score,
        })
    }
}


// merge-worthiness of an alignment: negative is good. The guide-tree driver
// treats this as an opaque callback and only consumes hits with energy <= 0.
pub fn energy(aln: &Alignment, minblock: usize) -> f64 {
    if aln.length < MIN_ALIGNMENT_LENGTH {
        return f64::INFINITY;
    }
    let cuts = aln.qry.cuts(minblock) + aln.target.cuts(minblock);
    -(aln.length as f64) + 100.0 * cuts as f64 + 20.0 * aln.mismatches()
}
