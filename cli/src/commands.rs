use std::path::Path;

use anyhow::{Context, Result};
use topdown::Config;

pub mod resume;
pub mod run;

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("failed to parse config file {}", path.display()))
}

fn checkpoint_path(config: &Config) -> std::path::PathBuf {
    config.output_path.join(format!("{}.ckpt", config.output_file))
}
