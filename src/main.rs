use anyhow::{Context, Result};
use clap::Parser;
use mini_ppl::config::Config;
use mini_ppl::experiment::run_experiment;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn main() -> Result<()> {
    let config = Config::parse();
    setup_logging(config.verbose)?;

    run_experiment(&config).with_context(|| {
        format!(
            "Experiment writing to {} failed",
            config.output_dir.display()
        )
    })?;

    println!("Done");
    Ok(())
}
