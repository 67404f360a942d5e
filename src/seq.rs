use std::io::Write;
use std::path::Path;

use ahash::AHashSet as HashSet;
use anyhow::{bail,Context,Result};
use needletail::Sequence;

pub const FASTA_LINE_WIDTH: usize = 80;


// from ffforf: https://github.com/jguhlin/ffforf/blob/master/src/lib.rs
#[inline(always)]
pub fn complement(nuc: u8) -> u8 {
    if nuc != b'N' {
        if nuc & 2 != 0 {
            nuc ^ 4
        } else {
            nuc ^ 21
        }
    } else {
        nuc
    }
}

pub fn revcomp_inplace(seq: &mut [u8]) {
    seq.reverse();
    seq.iter_mut().for_each(|nuc| { *nuc = complement(*nuc) });
}


pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    let mut rev_seq = seq.to_vec();
    revcomp_inplace(&mut rev_seq);
    rev_seq
}


// load all records from a (possibly gzipped) multi-fasta; duplicate names are fatal
pub fn load_fasta(fasta_path: &Path) -> Result<Vec<(String,Vec<u8>)>> {

    let mut records = vec![];
    let mut seen: HashSet<String> = HashSet::new();

    let mut fasta_reader = needletail::parse_fastx_file(fasta_path)
        .with_context(|| format!("cannot open fasta file: \"{}\"", fasta_path.display()))?;
    while let Some(record) = fasta_reader.next() {
        let record = record.with_context(|| format!("error parsing fasta file: \"{}\"", fasta_path.display()))?;
        let name = std::str::from_utf8(record.id())?
            .split_ascii_whitespace().next().unwrap_or_default()
            .to_string();
        if name.is_empty() {
            bail!("unnamed record in fasta file: \"{}\"", fasta_path.display());
        }
        if !seen.insert(name.clone()) {
            bail!("duplicate record name \"{name}\" in fasta file: \"{}\"", fasta_path.display());
        }
        records.push((name, record.normalize(false).to_vec()));
    }

    Ok(records)
}


pub fn write_fasta_record(writer: &mut dyn Write, name: &str, seq: &[u8]) -> std::io::Result<()> {
    writeln!(writer, ">{name}")?;
    for chunk in seq.chunks(FASTA_LINE_WIDTH) {
        writer.write_all(chunk)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_complement() {
        assert_eq!(complement(b'A'), b'T');
        assert_eq!(complement(b'C'), b'G');
        assert_eq!(complement(b'G'), b'C');
        assert_eq!(complement(b'T'), b'A');
        assert_eq!(complement(b'N'), b'N');
    }

    #[test]
    fn test_revcomp_involution() {
        let seq = b"ACGTTGCANNAT".to_vec();
        assert_eq!(revcomp(&revcomp(&seq)), seq);
        assert_eq!(revcomp(b"ACGT"), b"ACGT".to_vec());
        assert_eq!(revcomp(b"AAAC"), b"GTTT".to_vec());
    }

    #[test]
    fn test_write_fasta_wraps_lines() {
        let mut out = vec![];
        let seq = vec![b'A'; FASTA_LINE_WIDTH + 10];
        write_fasta_record(&mut out, "b42", &seq).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], ">b42");
        assert_eq!(lines[1].len(), FASTA_LINE_WIDTH);
        assert_eq!(lines[2].len(), 10);
    }
}
