use anyhow::{Context, Result};
use topdown::CancellationFlag;

pub fn run(cli: &crate::cli::Cli, args: &crate::cli::ResumeArgs) -> Result<()> {
    let mut config = super::load_config(&args.config)?;
    config.process_until = args.extend_to;
    let checkpoint = args.checkpoint.clone().unwrap_or_else(|| super::checkpoint_path(&config));

    let cancel = CancellationFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || handler_flag.cancel()).context("failed to install Ctrl+C handler")?;

    if cli.verbose > 0 {
        eprintln!("[resume] loading checkpoint {}", checkpoint.display());
    }
    topdown::resume_cancellable(&config, &checkpoint, &cancel)?;
    if cli.verbose > 0 {
        eprintln!("[resume] wrote {}", config.output_path.join(&config.output_file).display());
    }
    Ok(())
}
