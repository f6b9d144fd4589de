//! Engine selection and the generic machinery for running Markov chains over traces.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fmt;

use crate::error::{PplError, Result};

/// The inference engines a model can be conditioned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InferenceEngine {
    ImportanceSampling,
    RandomWalkMetropolisHastings,
}

impl fmt::Display for InferenceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceEngine::ImportanceSampling => write!(f, "importance sampling"),
            InferenceEngine::RandomWalkMetropolisHastings => {
                write!(f, "random-walk Metropolis Hastings")
            }
        }
    }
}

pub trait MarkovChain<S> {
    /// Does one iteration of the chain, returning the new current state.
    fn step(&mut self) -> Result<&S>;

    /// Get the current state without stepping.
    fn current_state(&self) -> &S;
}

pub fn run_chain<S, M>(chain: &mut M, n_steps: usize) -> Result<Vec<S>>
where
    M: MarkovChain<S>,
    S: Clone,
{
    let mut out = Vec::with_capacity(n_steps);
    for _ in 0..n_steps {
        out.push(chain.step()?.clone());
    }
    Ok(out)
}

pub fn run_chain_with_progress<S, M>(
    chain: &mut M,
    n_steps: usize,
    pb: &ProgressBar,
) -> Result<Vec<S>>
where
    M: MarkovChain<S>,
    S: Clone,
{
    let mut out = Vec::with_capacity(n_steps);
    pb.set_length(n_steps as u64);

    for _ in 0..n_steps {
        out.push(chain.step()?.clone());
        pb.inc(1);
    }

    Ok(out)
}

pub(crate) fn progress_style() -> Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .map_err(|e| PplError::InvalidArgument(format!("progress template: {e}")))?
        .progress_chars("##-"))
}

/// A trait for "anything that owns multiple MarkovChains".
pub trait HasChains<S> {
    type Chain: MarkovChain<S> + Send;

    fn chains_mut(&mut self) -> &mut Vec<Self::Chain>;
}

pub trait ChainRunner<S>: HasChains<S>
where
    S: Clone + Send,
{
    /// Runs every chain for `n_steps` in parallel and drops the first `discard` states
    /// of each.
    fn run(&mut self, n_steps: usize, discard: usize) -> Result<Vec<Vec<S>>> {
        check_discard(n_steps, discard)?;
        self.chains_mut()
            .par_iter_mut()
            .map(|chain| {
                let mut samples = run_chain(chain, n_steps)?;
                samples.drain(..discard);
                Ok(samples)
            })
            .collect()
    }

    /// Like [`ChainRunner::run`], with one progress bar per chain.
    fn run_progress(&mut self, n_steps: usize, discard: usize) -> Result<Vec<Vec<S>>> {
        check_discard(n_steps, discard)?;
        let multi = MultiProgress::new();
        let pb_style = progress_style()?;

        self.chains_mut()
            .par_iter_mut()
            .enumerate()
            .map(|(i, chain)| {
                let pb = multi.add(ProgressBar::new(n_steps as u64));
                pb.set_prefix(format!("Chain {i}"));
                pb.set_style(pb_style.clone());

                let mut samples = run_chain_with_progress(chain, n_steps, &pb)?;
                pb.finish_with_message("Done!");

                samples.drain(..discard);
                Ok(samples)
            })
            .collect()
    }
}

impl<S: Clone + Send, T: HasChains<S>> ChainRunner<S> for T {}

fn check_discard(n_steps: usize, discard: usize) -> Result<()> {
    if discard > n_steps {
        return Err(PplError::InvalidArgument(format!(
            "cannot discard {discard} of {n_steps} steps"
        )));
    }
    Ok(())
}
