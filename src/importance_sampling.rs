/*!
# Importance sampling with the prior as proposal

Every trace is an independent prior execution. The observation sites are conditioned on
the observe map, and the trace is weighted by the observations' log-likelihood. The
unweighted view of the result ([`Empirical::unweighted`]) is the proposal distribution.

```rust
use mini_ppl::gum_marsaglia::GaussianUnknownMean;
use mini_ppl::importance_sampling::ImportanceSampler;
use mini_ppl::trace::ObserveMap;

let model = GaussianUnknownMean::default();
let observe = ObserveMap::from([("obs0".to_string(), 8.0), ("obs1".to_string(), 9.0)]);
let posterior = ImportanceSampler::new(&model, &observe)
    .set_seed(42)
    .run(1_000)
    .unwrap();
assert_eq!(posterior.len(), 1_000);
```
*/

use indicatif::ProgressBar;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};
use tracing::{debug, info};

use crate::core::{progress_style, InferenceEngine};
use crate::empirical::Empirical;
use crate::error::Result;
use crate::model::{execute, Model, TraceState};
use crate::trace::{ObserveMap, Trace};

pub struct ImportanceSampler<'a, M> {
    model: &'a M,
    observe: &'a ObserveMap,
    /// The random seed.
    pub seed: u64,
}

impl<'a, M: Model> ImportanceSampler<'a, M> {
    pub fn new(model: &'a M, observe: &'a ObserveMap) -> Self {
        Self {
            model,
            observe,
            seed: thread_rng().gen::<u64>(),
        }
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Draws `num_traces` weighted traces.
    pub fn run(&self, num_traces: usize) -> Result<Empirical<Trace>> {
        self.sample(num_traces, None)
    }

    /// Like [`ImportanceSampler::run`], with a progress bar.
    pub fn run_progress(&self, num_traces: usize) -> Result<Empirical<Trace>> {
        let pb = ProgressBar::new(num_traces as u64);
        pb.set_prefix("Importance sampling");
        pb.set_style(progress_style()?);
        let out = self.sample(num_traces, Some(&pb));
        pb.finish_with_message("Done!");
        out
    }

    fn sample(&self, num_traces: usize, pb: Option<&ProgressBar>) -> Result<Empirical<Trace>> {
        info!(
            model = self.model.name(),
            num_traces,
            seed = self.seed,
            "Running {}",
            InferenceEngine::ImportanceSampling
        );
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut traces = Vec::with_capacity(num_traces);
        let mut log_weights = Vec::with_capacity(num_traces);
        for _ in 0..num_traces {
            let trace = execute(self.model, TraceState::prior(&mut rng, self.observe))?;
            log_weights.push(trace.log_importance_weight);
            traces.push(trace);
            if let Some(pb) = pb {
                pb.inc(1);
            }
        }
        let empirical = Empirical::new(
            traces,
            log_weights,
            format!(
                "Posterior, {} (num_traces: {num_traces})",
                InferenceEngine::ImportanceSampling
            ),
        )?;
        debug!(
            effective_sample_size = empirical.effective_sample_size(),
            "Importance sampling finished"
        );
        Ok(empirical)
    }
}
