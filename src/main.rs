use std::fs::File;

use anyhow::Result;
use clap::Parser;

use piano_genie::registry::{all_configs, get_config, DEFAULT_CFG_NAME};
use piano_genie::weights::Weights;

/// Lists the known model configurations and inspects checkpoints.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CFG_NAME)]
    config: String,

    /// JSON weight map to check against the configuration
    #[arg(short, long)]
    weights: Option<String>,

    #[arg(short, long)]
    list: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list {
        for cfg in all_configs() {
            println!("{:<32} {}", cfg.key, cfg.name);
        }
        return Ok(());
    }

    let cfg = get_config(&args.config)?;
    println!("{cfg:#?}");

    if let Some(path) = args.weights {
        let weights = Weights::from_json_reader(File::open(path)?)?;
        let mut names: Vec<&str> = weights.names().collect();
        names.sort_unstable();
        for name in names {
            println!("{name}: {:?}", weights.get(name)?.layout());
        }
    }

    Ok(())
}
