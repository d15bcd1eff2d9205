mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{resume, run};

fn main() {
    use clap::Parser;

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Run(args) => run::run(&cli, args),
        Commands::Resume(args) => resume::run(&cli, args),
    };

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code_of(&err));
    }
}

/// Maps a failed command onto the engine's exit-code table when the error
/// came from the engine itself; anything raised purely at the CLI layer
/// (a malformed config file, a bad --seed) exits 1.
fn exit_code_of(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<topdown::EngineError>().map(topdown::EngineError::exit_code).unwrap_or(1)
}
