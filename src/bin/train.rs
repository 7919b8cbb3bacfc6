use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use dbtext::config::Config;
use dbtext::training::Trainer;
use dbtext::utils::init_tracing;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train a DB text detector on Total-Text style data", long_about = None)]
struct Args {
    /// Training configuration
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    init_tracing(Some(&config.resolve(&config.logging.logger_file)))?;

    let mut trainer = Trainer::new(config)?;
    let summaries = trainer.run()?;

    if let Some(best) = summaries.iter().rev().find(|s| s.saved_best) {
        tracing::info!(
            "best checkpoint from epoch {}: train loss {:.4}, test loss {:.4}",
            best.epoch + 1,
            best.train_loss,
            best.test_loss
        );
    }
    Ok(())
}
