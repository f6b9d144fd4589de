/*!
# Generative models

A model is any type implementing [`Model`]. Its `forward` pass declares random choices
through a [`TraceState`]: `sample` for latent choices, `observe` for data sites and `tag`
for named deterministic values. The state decides what those calls mean. A prior run
draws everything fresh. A replay run reuses the values of a previous trace except at one
resampled address. Whether an observation is conditioned depends on the [`ObserveMap`].

## Example

```rust
use mini_ppl::core::InferenceEngine;
use mini_ppl::distributions::Distribution;
use mini_ppl::error::Result;
use mini_ppl::model::{Model, PosteriorOptions, TraceState};
use mini_ppl::trace::ObserveMap;

struct Coin;

impl Model for Coin {
    fn name(&self) -> &str {
        "Coin"
    }

    fn forward(&self, state: &mut TraceState<'_>) -> Result<f64> {
        let p = state.sample(&Distribution::uniform(0.0, 1.0)?, "p", false);
        state.observe(&Distribution::normal(p, 0.1)?, "obs");
        Ok(p)
    }
}

let observe = ObserveMap::from([("obs".to_string(), 0.8)]);
let posterior = Coin
    .posterior_traces(
        500,
        InferenceEngine::ImportanceSampling,
        &observe,
        PosteriorOptions::default().seed(1),
    )
    .unwrap();
assert_eq!(posterior.len(), 500);
```
*/

use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::core::InferenceEngine;
use crate::distributions::Distribution;
use crate::empirical::Empirical;
use crate::error::Result;
use crate::importance_sampling::ImportanceSampler;
use crate::metropolis_hastings::MetropolisHastings;
use crate::trace::{ObserveMap, Trace, Variable, VariableKind};

/// A generative model whose forward pass is traced.
pub trait Model: Sync {
    /// Human readable name, used in the names of the empiricals built from this model.
    fn name(&self) -> &str;

    /// One execution of the generative process. Returns the model output.
    fn forward(&self, state: &mut TraceState<'_>) -> Result<f64>;

    /// Runs the model once from the prior, conditioning on whatever `observe` holds.
    fn prior_trace(&self, observe: &ObserveMap, rng: &mut SmallRng) -> Result<Trace>
    where
        Self: Sized,
    {
        execute(self, TraceState::prior(rng, observe))
    }

    /// Draws `num_traces` unweighted traces from the prior.
    fn prior_traces(
        &self,
        num_traces: usize,
        observe: &ObserveMap,
        seed: u64,
    ) -> Result<Empirical<Trace>>
    where
        Self: Sized,
    {
        let mut rng = SmallRng::seed_from_u64(seed);
        let traces = (0..num_traces)
            .map(|_| self.prior_trace(observe, &mut rng))
            .collect::<Result<Vec<_>>>()?;
        Empirical::unweighted_from(
            traces,
            format!("Prior, {} (num_traces: {num_traces})", self.name()),
        )
    }

    /// Draws `num_traces` traces from the posterior given `observe` using `engine`.
    ///
    /// If `options` carries a file name, the result is written there when the empirical
    /// is closed.
    fn posterior_traces(
        &self,
        num_traces: usize,
        engine: InferenceEngine,
        observe: &ObserveMap,
        options: PosteriorOptions,
    ) -> Result<Empirical<Trace>>
    where
        Self: Sized,
    {
        let empirical = match engine {
            InferenceEngine::ImportanceSampling => {
                let sampler = ImportanceSampler::new(self, observe).set_seed(options.seed);
                if options.progress {
                    sampler.run_progress(num_traces)?
                } else {
                    sampler.run(num_traces)?
                }
            }
            InferenceEngine::RandomWalkMetropolisHastings => {
                let initial = options.initial_trace.as_ref().map(std::slice::from_ref);
                let mut mh = MetropolisHastings::new(self, observe, initial, 1)?
                    .set_seed(options.seed);
                mh.posterior(num_traces, options.progress)?
            }
        };
        Ok(match options.file_name {
            Some(path) => empirical.with_file(path),
            None => empirical,
        })
    }
}

/// Knobs for [`Model::posterior_traces`].
#[derive(Debug, Clone, Default)]
pub struct PosteriorOptions {
    pub seed: u64,
    /// Starting state for Metropolis-Hastings; ignored by importance sampling.
    pub initial_trace: Option<Trace>,
    pub file_name: Option<PathBuf>,
    pub progress: bool,
}

impl PosteriorOptions {
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn initial_trace(mut self, trace: Trace) -> Self {
        self.initial_trace = Some(trace);
        self
    }

    pub fn file_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_name = Some(path.into());
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

enum Mode<'a> {
    Prior,
    Replay {
        previous: &'a Trace,
        resample: &'a str,
    },
}

/// Interprets the sample, observe and tag calls of one model execution.
pub struct TraceState<'a> {
    rng: &'a mut SmallRng,
    observe: &'a ObserveMap,
    mode: Mode<'a>,
    trace: Trace,
    instances: HashMap<String, usize>,
    reused: HashSet<String>,
}

impl<'a> TraceState<'a> {
    /// Every sample site draws fresh from its distribution.
    pub fn prior(rng: &'a mut SmallRng, observe: &'a ObserveMap) -> Self {
        Self::with_mode(rng, observe, Mode::Prior)
    }

    /// Sample sites reuse the values stored in `previous`, except for `resample`, which is
    /// drawn fresh. A site visited again in the same run is drawn fresh too, so a
    /// rejection loop cannot spin on a reused value.
    pub fn replay(
        rng: &'a mut SmallRng,
        observe: &'a ObserveMap,
        previous: &'a Trace,
        resample: &'a str,
    ) -> Self {
        Self::with_mode(rng, observe, Mode::Replay { previous, resample })
    }

    fn with_mode(rng: &'a mut SmallRng, observe: &'a ObserveMap, mode: Mode<'a>) -> Self {
        Self {
            rng,
            observe,
            mode,
            trace: Trace::new(),
            instances: HashMap::new(),
            reused: HashSet::new(),
        }
    }

    fn address(&mut self, base: &str, kind: &str, replace: bool) -> String {
        let key = format!("{base}__{kind}");
        let instance = if replace {
            1
        } else {
            let counter = self.instances.entry(key.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        format!("{key}__{instance}")
    }

    fn reusable(&self, address: &str, distribution: &Distribution) -> Option<f64> {
        let Mode::Replay { previous, resample } = &self.mode else {
            return None;
        };
        if address == *resample || self.reused.contains(address) {
            return None;
        }
        previous
            .at_address(address)
            .filter(|v| v.control)
            .filter(|v| v.distribution.map(|d| d.kind()) == Some(distribution.kind()))
            .map(|v| v.value)
    }

    /// Declares a latent random choice at `base` and returns its value.
    ///
    /// With `replace = true` every visit maps to the same address and overwrites the
    /// previous value, so only the last draw of a loop stays in the trace.
    pub fn sample(&mut self, distribution: &Distribution, base: &str, replace: bool) -> f64 {
        let address = self.address(base, distribution.kind(), replace);
        self.trace.samples_drawn += 1;
        let (value, reused) = match self.reusable(&address, distribution) {
            Some(value) => {
                self.reused.insert(address.clone());
                (value, true)
            }
            None => (distribution.sample(&mut *self.rng), false),
        };
        self.trace.record(Variable {
            log_prob: distribution.log_prob(value),
            address,
            name: None,
            kind: VariableKind::Sample,
            distribution: Some(*distribution),
            value,
            control: true,
            replace,
            observed: false,
            reused,
        });
        value
    }

    /// Declares the observation site `name`.
    ///
    /// When the observe map holds `name` the site is conditioned on that value. Otherwise
    /// the value is drawn from `distribution`, which is how ground-truth traces are made.
    pub fn observe(&mut self, distribution: &Distribution, name: &str) -> f64 {
        let address = self.address(name, distribution.kind(), false);
        let (value, observed) = match self.observe.get(name) {
            Some(&value) => (value, true),
            None => (distribution.sample(&mut *self.rng), false),
        };
        self.trace.record(Variable {
            log_prob: distribution.log_prob(value),
            address,
            name: Some(name.to_string()),
            kind: VariableKind::Observe,
            distribution: Some(*distribution),
            value,
            control: false,
            replace: false,
            observed,
            reused: false,
        });
        value
    }

    /// Records `value` under `name` for later inspection.
    pub fn tag(&mut self, value: f64, name: &str) {
        self.trace.record(Variable {
            address: format!("{name}__Tag"),
            name: Some(name.to_string()),
            kind: VariableKind::Tag,
            distribution: None,
            value,
            log_prob: 0.0,
            control: false,
            replace: false,
            observed: false,
            reused: false,
        });
    }

    fn into_trace(mut self, result: f64) -> Trace {
        self.trace.finish(result);
        self.trace
    }
}

/// Runs `model` once under `state` and returns the finished trace.
pub(crate) fn execute<M: Model + ?Sized>(model: &M, mut state: TraceState<'_>) -> Result<Trace> {
    let result = model.forward(&mut state)?;
    Ok(state.into_trace(result))
}
