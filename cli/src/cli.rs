use std::path::PathBuf;

/// TopDown synthetic microdata engine (argument schema only)
#[derive(clap::Parser, Debug)]
#[command(name = "topdown", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Run a fresh TopDown pass from a configuration file
    Run(RunArgs),

    /// Resume a checkpointed run and extend it to a deeper geographic level
    Resume(ResumeArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// TOML configuration file describing this run
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Hex-encoded 32-byte noise seed; a fresh seed is drawn and reported if omitted
    #[arg(long)]
    pub seed: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ResumeArgs {
    /// TOML configuration file this checkpoint was produced from
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Checkpoint file to resume from; defaults to "<output_path>/<output_file>.ckpt"
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub checkpoint: Option<PathBuf>,

    /// Geographic depth to extend the tree to (overrides the config file's process_until)
    #[arg(long)]
    pub extend_to: usize,
}
