use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use epochreg_core::pipeline::config::{PipelineConfig, StageSelection};

#[derive(Args)]
pub struct ConfigArgs {
    /// Root name written into the config
    #[arg(long, default_value = "target")]
    pub root: String,

    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save a full default PipelineConfig as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let mut config = PipelineConfig::new(args.root.clone());
    config.stages = StageSelection::all();
    let toml_str = toml::to_string_pretty(&config)?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}
