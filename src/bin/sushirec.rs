use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sushirec::config::PipelineConfig;
use sushirec::pipeline;

/// Fit latent-factor models on a sushi preference survey and write
/// top-N recommendations per user.
#[derive(Debug, Parser)]
#[command(name = "sushirec", version)]
struct Args {
    /// TOML configuration file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Score matrix to read instead of the configured one.
    #[arg(long)]
    scores: Option<PathBuf>,
    /// Item metadata to read instead of the configured one.
    #[arg(long)]
    items: Option<PathBuf>,
    /// Directory to write the output tables to.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Number of recommendations per user.
    #[arg(short = 'n', long)]
    top_n: Option<usize>,
}

fn load_config(args: Args) -> Result<PipelineConfig, failure::Error> {
    let mut config = match args.config {
        Some(ref path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(scores) = args.scores {
        config.scores_path = scores;
    }
    if let Some(items) = args.items {
        config.items_path = items;
    }
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }
    if let Some(top_n) = args.top_n {
        config.top_n = top_n;
    }

    Ok(config)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let result = load_config(Args::parse()).and_then(|config| pipeline::run(&config));

    match result {
        Ok(summary) => {
            info!(
                num_users = summary.num_users,
                num_ratings = summary.num_ratings,
                "done"
            );
            for path in &summary.outputs {
                println!("{}", path.display());
            }
        }
        Err(err) => {
            eprintln!("error: {}", err);
            for cause in err.iter_causes() {
                eprintln!("  caused by: {}", cause);
            }
            process::exit(1);
        }
    }
}
