use clap::Parser;

use crate::merge;

#[derive(Parser)]
#[command(version)]
#[command(about = "panblocks: pangenome graph core built from homologous blocks", long_about = None)]
pub struct Options {

    /// Input genomes in FASTA format (optionally gzipped)
    #[arg(short = 'f', long = "fasta", value_name = "PATH")]
    pub fasta_file: Option<String>,

    /// Input graph in JSON format
    #[arg(short = 'g', long = "graph", value_name = "PATH")]
    pub graph_file: Option<String>,

    /// Pairwise alignments between block consensi in PAF format (with cg:Z tags)
    #[arg(short = 'a', long = "alignments", value_name = "PATH")]
    pub alignment_file: Option<String>,

    /// Output directory
    #[arg(short = 'o', long = "out-dir", value_name = "PATH")]
    pub output_dir: String,

    /// Treat input genomes as circular
    #[arg(long = "circular")]
    pub circular: bool,

    /// Minimum indel length that splits a matched range during a merge
    #[arg(long = "minblock", value_name = "NUM", default_value_t = merge::DEFAULT_MINBLOCK)]
    pub minblock: usize,

    /// Collapse chains of blocks that are always traversed together
    #[arg(long = "detransitive")]
    pub detransitive: bool,

    /// Drop nodes that no longer carry any sequence
    #[arg(long = "purge")]
    pub purge: bool,

    /// Keep only the named genomes (comma separated)
    #[arg(long = "keep-only", value_name = "NAMES")]
    pub keep_only: Option<String>,

    /// Re-align block alignments with an external MSA tool
    #[arg(long = "polish")]
    pub polish: bool,

    /// Minimum consensus length for a block to be accepted for polishing
    #[arg(long = "polish-accept-len", value_name = "NUM", default_value_t = 100)]
    pub polish_accept_len: usize,

    /// Export the graph in JSON format
    #[arg(long = "export-json")]
    pub export_json: bool,

    /// Export the graph in GFA format
    #[arg(long = "export-gfa")]
    pub export_gfa: bool,

    /// Export the block consensus sequences in FASTA format
    #[arg(long = "export-fasta")]
    pub export_fasta: bool,

    /// Verify graph invariants after every operation
    #[arg(long = "verify")]
    pub verify: bool,

    /// Maximum number of threads
    #[arg(short = 't', long = "threads", value_name = "NUM", default_value_t = 1)]
    pub nb_threads: usize,

    /// Print debug-level logs
    #[arg(long = "verbose")]
    pub verbose: bool,
}
