use std::fs;
use std::io::BufRead;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail,Context};
use clap::Parser;
use itertools::Itertools;

use panblocks::align::{self,Alignment};
use panblocks::cli;
use panblocks::graph::Graph;
use panblocks::json;
use panblocks::merge;
use panblocks::polish;
use panblocks::seq;
use panblocks::utils;


fn main() -> anyhow::Result<(), anyhow::Error> {

    let t_start = Instant::now();

    let opts = cli::Options::parse();

    if opts.verbose {
        spdlog::default_logger().set_level_filter(spdlog::LevelFilter::MoreSevereEqual(spdlog::Level::Debug));
    }

    rayon::ThreadPoolBuilder::new().num_threads(opts.nb_threads).build_global().unwrap();

    let output_dir = Path::new(&opts.output_dir);
    fs::create_dir_all(output_dir).with_context(|| format!("Cannot create output directory: \"{}\"", output_dir.display()))?;

    let mut graph = match (opts.fasta_file.as_ref(), opts.graph_file.as_ref()) {
        (Some(fasta_path), None) => {
            println!("Building singleton graph from: {fasta_path}");
            let records = seq::load_fasta(Path::new(fasta_path))?;
            println!("  {} genomes loaded", records.len());
            Graph::build(records, opts.circular)?
        },
        (None, Some(graph_path)) => {
            println!("Loading graph from: {graph_path}");
            json::read_json(Path::new(graph_path))?
        },
        _ => { bail!("Exactly one of --fasta or --graph is required. For more information, try '--help'.") },
    };
    println!("  {} blocks, {} paths", graph.blocks.len(), graph.paths.len());

    if let Some(paf_path) = opts.alignment_file.as_ref() {
        println!("Merging alignments from: {paf_path}");
        let reader = utils::get_file_reader(Path::new(paf_path))?;
        let alignments = reader.lines()
            .map_while(Result::ok)
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .map(|line| line.parse::<Alignment>().with_context(|| format!("error parsing paf record:\n{line}")))
            .collect::<Result<Vec<_>, _>>()?;
        let minblock = opts.minblock;
        let merged = merge::merge_alignments(&mut graph, &alignments, minblock, |aln| align::energy(aln, minblock))?;
        println!("  {merged} of {} alignments merged", alignments.len());
        println!("  {} blocks, {} paths", graph.blocks.len(), graph.paths.len());
    }

    if let Some(names) = opts.keep_only.as_ref() {
        let names = names.split(',').map(|name| name.trim().to_string()).collect_vec();
        println!("Keeping only: {}", names.iter().join(", "));
        graph.marginalize(&names)?;
        println!("  {} blocks remain", graph.blocks.len());
    }

    if opts.purge {
        println!("Purging empty nodes");
        graph.purge();
    }

    if opts.detransitive {
        println!("Collapsing transitive chains");
        let before = graph.blocks.len();
        graph.detransitive();
        println!("  {} blocks fused into {}", before, graph.blocks.len());
    }

    if opts.polish {
        println!("Re-aligning blocks with mafft");
        let work_dir = output_dir.join("msa");
        let accept_len = opts.polish_accept_len;
        polish::realign(&mut graph, |block| block.len() >= accept_len, &work_dir)?;
    }

    if opts.verify {
        graph.consistency_check()?;
        println!("Graph invariants hold");
    }

    graph.finalize();

    if opts.export_json {
        let json_path = output_dir.join("graph.json");
        json::write_json(&graph, &json_path)?;
        println!("Graph written to: {}", json_path.display());
    }
    if opts.export_gfa {
        let gfa_path = output_dir.join("graph.gfa");
        graph.write_gfa(&gfa_path)?;
        println!("GFA written to: {}", gfa_path.display());
    }
    if opts.export_fasta {
        let fasta_path = output_dir.join("consensus.fasta");
        graph.write_fasta(&fasta_path)?;
        println!("Consensi written to: {}", fasta_path.display());
    }

    println!("Time: {:.2}s | MaxRSS: {:.2}GB", t_start.elapsed().as_secs_f64(), utils::get_maxrss());

    Ok(())
}
