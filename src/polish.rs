use std::collections::BTreeMap;
use std::fs;
use std::path::Path as FsPath;
use std::process::Command;

use anyhow::{bail,ensure,Context,Result};
use itertools::Itertools;
use rayon::prelude::*;

use crate::block::Block;
use crate::block::alleles::Alleles;
use crate::block::reconsensus;
use crate::graph::Graph;
use crate::node::NodeId;
use crate::seq;
use crate::utils;


// re-align the node-wise sequences of every accepted block with an external
// MSA tool and rebuild the block from the aligned columns. Block identity
// (id and node set) is preserved. Blocks run in parallel; a failing block is
// left untouched and the first error is reported once the sweep is done.
pub fn realign(graph: &mut Graph, accept: impl Fn(&Block) -> bool + Sync, work_dir: &FsPath) -> Result<()> {

    utils::check_dependencies(&["mafft"])?;
    fs::create_dir_all(work_dir)
        .with_context(|| format!("cannot create work directory: \"{}\"", work_dir.display()))?;

    let targets = graph.blocks.values()
        .filter(|block| block.depth() >= 2 && accept(block))
        .map(|block| block.id)
        .collect_vec();
    spdlog::debug!("realigning {} blocks", targets.len());

    let blocks = &graph.blocks;
    let results: Vec<_> = targets.par_iter()
        .map(|&bid| (bid, realign_block(&blocks[&bid], work_dir)))
        .collect();

    let mut first_error = None;
    for (bid, result) in results {
        match result {
            Ok((consensus, gaps, alleles)) => {
                let block = graph.blocks.get_mut(&bid).unwrap();
                block.consensus = consensus;
                block.gaps = gaps;
                block.alleles = alleles;
            },
            Err(err) => {
                spdlog::warn!("realignment of block {bid} failed: {err:#}");
                if first_error.is_none() {
                    first_error = Some(err.context(format!("realignment of block {bid} failed")));
                }
            },
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}


type BlockBody = (Vec<u8>, BTreeMap<usize,usize>, BTreeMap<NodeId,Alleles>);

fn realign_block(block: &Block, work_dir: &FsPath) -> Result<BlockBody> {

    let sequences = block.nodes()
        .map(|nid| (nid, block.sequence_of(nid)))
        .collect_vec();
    let populated = sequences.iter().filter(|(_, s)| !s.is_empty()).count();
    ensure!(populated >= 2, "fewer than two non-empty sequences to align");

    let fasta_path = work_dir.join(format!("block_{}.fasta", block.id));
    {
        let mut writer = utils::get_file_writer(&fasta_path)?;
        for (nid, bytes) in &sequences {
            if !bytes.is_empty() {
                seq::write_fasta_record(&mut writer, &nid.to_string(), bytes)?;
            }
        }
    }

    let output = Command::new("mafft")
        .args(["--auto", "--quiet", fasta_path.to_str().unwrap()])
        .output()
        .context("cannot run mafft")?;
    if !output.status.success() {
        bail!("mafft exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr).trim());
    }

    let mut aligned: BTreeMap<NodeId,Vec<u8>> = parse_aligned_fasta(&output.stdout)?;
    let width = aligned.values().map(|row| row.len()).max().unwrap_or(0);
    ensure!(width > 0, "mafft produced an empty alignment");
    ensure!(aligned.values().all(|row| row.len() == width), "mafft rows differ in width");

    // nodes whose sequence vanished entirely become all-gap rows
    let rows = sequences.iter()
        .map(|(nid, _)| (*nid, aligned.remove(nid).unwrap_or_else(|| vec![b'-'; width])))
        .collect_vec();
    ensure!(aligned.is_empty(), "mafft emitted unknown record names");

    let cons_row = reconsensus::modal_consensus(&rows, None);
    Ok(reconsensus::rebuild_from_rows(&cons_row, &rows))
}


fn parse_aligned_fasta(bytes: &[u8]) -> Result<BTreeMap<NodeId,Vec<u8>>> {
    let text = std::str::from_utf8(bytes).context("mafft wrote non-utf8 output")?;
    let mut rows: BTreeMap<NodeId,Vec<u8>> = BTreeMap::new();
    let mut current: Option<NodeId> = None;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue
        }
        if let Some(name) = line.strip_prefix('>') {
            let name = name.split_ascii_whitespace().next().unwrap_or_default();
            let nid = NodeId(name.parse::<usize>().with_context(|| format!("unexpected record name \"{name}\" in msa"))?);
            ensure!(rows.insert(nid, vec![]).is_none(), "duplicate record {nid} in msa");
            current = Some(nid);
        } else {
            let Some(nid) = current else {
                bail!("msa output starts without a fasta header");
            };
            rows.get_mut(&nid).unwrap().extend(line.bytes().map(|b| b.to_ascii_uppercase()));
        }
    }
    ensure!(!rows.is_empty(), "msa output holds no records");
    Ok(rows)
}
