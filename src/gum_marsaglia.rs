//! A Gaussian with an unknown mean whose prior is sampled with the Marsaglia polar method.
//!
//! `mu ~ Normal(prior_mean, prior_stddev)` is drawn through two traced `Uniform(-1, 1)`
//! sites inside a rejection loop. Two observations share the likelihood
//! `Normal(mu, likelihood_stddev)`.

use crate::distributions::Distribution;
use crate::error::{PplError, Result};
use crate::marsaglia::{marsaglia, UNIT_SQUARE_SIDE};
use crate::model::{Model, TraceState};

pub const MODEL_NAME: &str = "Gaussian with unknown mean (Marsaglia)";
pub const OBSERVATION_NAMES: [&str; 2] = ["obs0", "obs1"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianUnknownMean {
    prior_mean: f64,
    prior_stddev: f64,
    likelihood_stddev: f64,
}

impl Default for GaussianUnknownMean {
    fn default() -> Self {
        Self {
            prior_mean: 1.0,
            prior_stddev: 5f64.sqrt(),
            likelihood_stddev: 2f64.sqrt(),
        }
    }
}

impl GaussianUnknownMean {
    pub fn new(prior_mean: f64, prior_stddev: f64, likelihood_stddev: f64) -> Result<Self> {
        for (label, stddev) in [
            ("prior_stddev", prior_stddev),
            ("likelihood_stddev", likelihood_stddev),
        ] {
            if !(stddev.is_finite() && stddev > 0.0) {
                return Err(PplError::InvalidParameter {
                    distribution: "GaussianUnknownMean",
                    reason: format!("{label} must be finite and positive, got {stddev}"),
                });
            }
        }
        if !prior_mean.is_finite() {
            return Err(PplError::InvalidParameter {
                distribution: "GaussianUnknownMean",
                reason: format!("prior_mean must be finite, got {prior_mean}"),
            });
        }
        Ok(Self {
            prior_mean,
            prior_stddev,
            likelihood_stddev,
        })
    }

    pub fn prior_mean(&self) -> f64 {
        self.prior_mean
    }

    pub fn prior_stddev(&self) -> f64 {
        self.prior_stddev
    }

    pub fn likelihood_stddev(&self) -> f64 {
        self.likelihood_stddev
    }

    /// Closed-form posterior `(mean, stddev)` of `mu` given the two observations.
    pub fn analytic_posterior(&self, obs0: f64, obs1: f64) -> (f64, f64) {
        let prior_precision = self.prior_stddev.powi(-2);
        let likelihood_precision = self.likelihood_stddev.powi(-2);
        let precision = prior_precision + 2.0 * likelihood_precision;
        let mean = (self.prior_mean * prior_precision + (obs0 + obs1) * likelihood_precision)
            / precision;
        (mean, precision.sqrt().recip())
    }
}

impl Model for GaussianUnknownMean {
    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn forward(&self, state: &mut TraceState<'_>) -> Result<f64> {
        let mut coordinate = 0usize;
        let mu = marsaglia(self.prior_mean, self.prior_stddev, || {
            let base = if coordinate % 2 == 0 { "x" } else { "y" };
            coordinate += 1;
            state.sample(&UNIT_SQUARE_SIDE, base, true)
        });
        let likelihood = Distribution::normal(mu, self.likelihood_stddev)?;
        state.tag(mu, "mu");
        for name in OBSERVATION_NAMES {
            state.observe(&likelihood, name);
        }
        Ok(mu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{ObserveMap, VariableKind};
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn forward_declares_two_observation_sites() {
        let model = GaussianUnknownMean::default();
        let mut rng = SmallRng::seed_from_u64(123);
        let trace = model.prior_trace(&ObserveMap::new(), &mut rng).unwrap();

        let names: Vec<&str> = trace
            .observation_sites()
            .filter_map(|v| v.name.as_deref())
            .collect();
        assert_eq!(names, OBSERVATION_NAMES);
        assert_eq!(trace.value("mu"), Some(trace.result));
        assert!(trace.result.is_finite());

        let controlled: Vec<&str> = trace.controlled().map(|v| v.address.as_str()).collect();
        assert_eq!(controlled, vec!["x__Uniform__1", "y__Uniform__1"]);
        assert!(trace.samples_drawn >= 2 && trace.samples_drawn % 2 == 0);
        assert_eq!(trace.tagged().count(), 1);
        assert!(trace
            .variables
            .iter()
            .filter(|v| v.kind == VariableKind::Sample)
            .all(|v| v.replace));
    }

    #[test]
    fn mu_is_the_polar_transform_of_the_recorded_pair() {
        let model = GaussianUnknownMean::default();
        let mut rng = SmallRng::seed_from_u64(5);
        let trace = model.prior_trace(&ObserveMap::new(), &mut rng).unwrap();
        let x = trace.at_address("x__Uniform__1").unwrap().value;
        let y = trace.at_address("y__Uniform__1").unwrap().value;
        let s = x * x + y * y;
        assert!(s < 1.0);
        let expected = 1.0 + 5f64.sqrt() * x * (-2.0 * s.ln() / s).sqrt();
        assert_abs_diff_eq!(trace.result, expected, epsilon = 1e-12);
    }

    #[test]
    fn conditioned_observations_drive_the_weight() {
        let model = GaussianUnknownMean::default();
        let observe = ObserveMap::from([("obs0".to_string(), 8.0), ("obs1".to_string(), 9.0)]);
        let mut rng = SmallRng::seed_from_u64(11);
        let trace = model.prior_trace(&observe, &mut rng).unwrap();

        let likelihood = Distribution::normal(trace.result, 2f64.sqrt()).unwrap();
        let expected = likelihood.log_prob(8.0) + likelihood.log_prob(9.0);
        assert_eq!(trace.value("obs0"), Some(8.0));
        assert_abs_diff_eq!(trace.log_importance_weight, expected, epsilon = 1e-12);
    }

    #[test]
    fn same_seed_same_trace() {
        let model = GaussianUnknownMean::default();
        let a = model
            .prior_trace(&ObserveMap::new(), &mut SmallRng::seed_from_u64(123))
            .unwrap();
        let b = model
            .prior_trace(&ObserveMap::new(), &mut SmallRng::seed_from_u64(123))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn analytic_posterior_for_reference_data() {
        let (mean, stddev) = GaussianUnknownMean::default().analytic_posterior(8.0, 9.0);
        assert_abs_diff_eq!(mean, 7.25, epsilon = 1e-12);
        assert_abs_diff_eq!(stddev, (1.0f64 / 1.2).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn rejects_non_positive_stddev() {
        assert!(GaussianUnknownMean::new(1.0, 0.0, 1.0).is_err());
        assert!(GaussianUnknownMean::new(1.0, 1.0, -2.0).is_err());
    }
}
