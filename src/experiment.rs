/*!
# The Gaussian-with-unknown-mean experiment

Draws a ground truth from the prior of [`GaussianUnknownMean`], conditions on its two
observations and compares importance sampling with random-walk Metropolis–Hastings. All
posteriors and diagnostics land in [`Config::output_dir`]:

- `posterior_is.csv`, `posterior_rmh.csv`, `posterior_rmh_gt.csv`
- `posterior_rmh_autocorrelation.{csv,svg}`
- `posterior_rmh_gelman_rubin.{csv,svg}`
- `posterior_rmh_log_prob.{csv,svg}`
- `posterior_rmh_addresses.{csv,svg}`

Every phase draws its seed from one master generator, so a run is fully determined by
[`Config::seed`].
*/

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;
use crate::core::InferenceEngine;
use crate::diagnostics::{address_histograms, autocorrelations, gelman_rubin, log_prob, PlotOptions};
use crate::error::{PplError, Result};
use crate::gum_marsaglia::{GaussianUnknownMean, OBSERVATION_NAMES};
use crate::model::{Model, PosteriorOptions};
use crate::trace::ObserveMap;

/// What a run found, next to what it should have found.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentSummary {
    pub observations: ObserveMap,
    pub ground_truth_mu: f64,
    pub analytic_mean: f64,
    pub analytic_stddev: f64,
    pub is_mean: f64,
    pub rmh_mean: f64,
}

/// Removes `dir` if present and creates it empty.
fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

fn observation(observe: &ObserveMap, name: &str) -> Result<f64> {
    observe
        .get(name)
        .copied()
        .ok_or_else(|| PplError::InvalidArgument(format!("ground truth has no {name}")))
}

pub fn run_experiment(config: &Config) -> Result<ExperimentSummary> {
    info!(cwd = %std::env::current_dir()?.display(), "Working directory");
    let mut rng = SmallRng::seed_from_u64(config.seed);
    let out = |name: &str| -> PathBuf { config.output_dir.join(name) };

    let model = GaussianUnknownMean::new(
        config.prior_mean,
        config.prior_stddev,
        config.likelihood_stddev,
    )?;
    let ground_truth =
        model.prior_trace(&ObserveMap::new(), &mut SmallRng::seed_from_u64(rng.gen()))?;
    let observe = ground_truth.observations();
    let ground_truth_mu = ground_truth
        .value("mu")
        .ok_or_else(|| PplError::InvalidArgument("ground truth has no mu".into()))?;
    info!(?observe, ground_truth_mu, "Ground truth");

    prepare_output_dir(&config.output_dir)?;

    let mut posterior_is = model.posterior_traces(
        config.num_traces,
        InferenceEngine::ImportanceSampling,
        &observe,
        PosteriorOptions::default()
            .seed(rng.gen())
            .file_name(out("posterior_is"))
            .progress(config.progress),
    )?;
    let proposal_is = posterior_is
        .unweighted()
        .rename(posterior_is.name().replace("Posterior", "Proposal"));

    let mut posterior_rmh = model.posterior_traces(
        config.num_traces,
        InferenceEngine::RandomWalkMetropolisHastings,
        &observe,
        PosteriorOptions::default()
            .seed(rng.gen())
            .file_name(out("posterior_rmh"))
            .progress(config.progress),
    )?;

    autocorrelations(
        &posterior_rmh,
        config.n_most_frequent,
        &PlotOptions::new(out("posterior_rmh_autocorrelation"), config.plot),
    )?;

    let posterior_rmh_gt = model.posterior_traces(
        config.num_traces,
        InferenceEngine::RandomWalkMetropolisHastings,
        &observe,
        PosteriorOptions::default()
            .seed(rng.gen())
            .initial_trace(ground_truth.clone())
            .file_name(out("posterior_rmh_gt"))
            .progress(config.progress),
    )?;
    let name = posterior_rmh_gt
        .name()
        .replacen("Posterior", "Posterior from ground truth", 1);
    let mut posterior_rmh_gt = posterior_rmh_gt.rename(name);

    gelman_rubin(
        &[&posterior_rmh, &posterior_rmh_gt],
        config.n_most_frequent,
        &PlotOptions::new(out("posterior_rmh_gelman_rubin"), config.plot),
    )?;
    log_prob(
        &[&posterior_rmh, &posterior_rmh_gt],
        &PlotOptions::new(out("posterior_rmh_log_prob"), config.plot),
    )?;
    address_histograms(
        &[&proposal_is, &posterior_is, &posterior_rmh],
        Some(&ground_truth),
        config.bins,
        &PlotOptions::new(out("posterior_rmh_addresses"), config.plot),
    )?;

    posterior_is.close()?;
    posterior_rmh.close()?;
    posterior_rmh_gt.close()?;

    let (analytic_mean, analytic_stddev) = model.analytic_posterior(
        observation(&observe, OBSERVATION_NAMES[0])?,
        observation(&observe, OBSERVATION_NAMES[1])?,
    );
    let summary = ExperimentSummary {
        is_mean: posterior_is.named_values("mu")?.mean(),
        rmh_mean: posterior_rmh.named_values("mu")?.mean(),
        observations: observe,
        ground_truth_mu,
        analytic_mean,
        analytic_stddev,
    };
    info!(
        is_mean = summary.is_mean,
        rmh_mean = summary.rmh_mean,
        analytic_mean,
        analytic_stddev,
        effective_sample_size = posterior_is.effective_sample_size(),
        "Posterior means of mu"
    );
    Ok(summary)
}
