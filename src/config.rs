//! Command-line configuration of the experiment.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "mini-ppl")]
#[command(version)]
#[command(
    about = "Infer the mean of a Gaussian whose prior is sampled with the Marsaglia polar method"
)]
pub struct Config {
    /// Master random seed; every phase derives its own seed from it
    #[arg(long, default_value_t = 123)]
    pub seed: u64,

    /// Number of traces drawn by each inference run
    #[arg(short, long, default_value_t = 2000)]
    pub num_traces: usize,

    /// Mean of the prior over mu
    #[arg(long, default_value_t = 1.0)]
    pub prior_mean: f64,

    /// Standard deviation of the prior over mu
    #[arg(long, default_value_t = 5f64.sqrt())]
    pub prior_stddev: f64,

    /// Standard deviation of the observation noise
    #[arg(long, default_value_t = std::f64::consts::SQRT_2)]
    pub likelihood_stddev: f64,

    /// Number of controlled addresses the chain diagnostics look at
    #[arg(long, default_value_t = 50)]
    pub n_most_frequent: usize,

    /// Number of histogram bins
    #[arg(long, default_value_t = 30)]
    pub bins: usize,

    /// Directory for posteriors and diagnostics; it is wiped on every run
    #[arg(short, long, default_value = "posteriors")]
    pub output_dir: PathBuf,

    /// Skip the SVG plots
    #[arg(long = "no-plot", action = ArgAction::SetFalse)]
    pub plot: bool,

    /// Show progress bars
    #[arg(long)]
    pub progress: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["mini-ppl"])
    }
}
