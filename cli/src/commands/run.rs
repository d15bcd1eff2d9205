use anyhow::{Context, Result};
use rand::RngCore;
use topdown::CancellationFlag;

pub fn run(cli: &crate::cli::Cli, args: &crate::cli::RunArgs) -> Result<()> {
    let config = super::load_config(&args.config)?;

    let seed = match &args.seed {
        Some(hex_seed) => parse_seed(hex_seed)?,
        None => {
            let mut seed = [0u8; 32];
            rand::rng().fill_bytes(&mut seed);
            if cli.verbose > 0 {
                eprintln!("[run] drew seed {}", hex::encode(seed));
            }
            seed
        }
    };

    let cancel = CancellationFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || handler_flag.cancel()).context("failed to install Ctrl+C handler")?;

    if cli.verbose > 0 {
        eprintln!("[run] reading {}", config.data_path.display());
    }
    topdown::run_cancellable(&config, &seed, &cancel)?;
    if cli.verbose > 0 {
        eprintln!("[run] wrote {}", config.output_path.join(&config.output_file).display());
    }
    Ok(())
}

fn parse_seed(hex_seed: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_seed).context("--seed must be hex-encoded")?;
    bytes.try_into().map_err(|_| anyhow::anyhow!("--seed must decode to exactly 32 bytes"))
}
