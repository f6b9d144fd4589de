/*!
# Weighted empirical distributions

An [`Empirical`] holds the values produced by an inference engine together with their log
weights. Importance sampling produces weighted empiricals. Metropolis-Hastings and prior
sampling produce unweighted ones, where every log weight is 0.

```rust
use mini_ppl::empirical::Empirical;

let e = Empirical::new(vec![1.0, 2.0, 3.0], vec![0.0, 0.0, 2f64.ln()], "example").unwrap();
assert!((e.mean() - 2.25).abs() < 1e-12);
assert!((e.unweighted().mean() - 2.0).abs() < 1e-12);
```
*/

use rand::Rng;
use rand_distr::{Distribution as _, WeightedIndex};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{PplError, Result};
use crate::stats;
use crate::trace::Trace;

#[derive(Debug, Clone, PartialEq)]
pub struct Empirical<T> {
    values: Vec<T>,
    log_weights: Vec<f64>,
    name: String,
    file_name: Option<PathBuf>,
    closed: bool,
}

impl<T> Empirical<T> {
    /// Builds an empirical from values and matching log weights.
    pub fn new(values: Vec<T>, log_weights: Vec<f64>, name: impl Into<String>) -> Result<Self> {
        if values.is_empty() {
            return Err(PplError::EmptyEmpirical);
        }
        if values.len() != log_weights.len() {
            return Err(PplError::InvalidArgument(format!(
                "{} values but {} log weights",
                values.len(),
                log_weights.len()
            )));
        }
        Ok(Self {
            values,
            log_weights,
            name: name.into(),
            file_name: None,
            closed: false,
        })
    }

    /// Builds an empirical in which every value has the same weight.
    pub fn unweighted_from(values: Vec<T>, name: impl Into<String>) -> Result<Self> {
        let log_weights = vec![0.0; values.len()];
        Self::new(values, log_weights, name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn log_weights(&self) -> &[f64] {
        &self.log_weights
    }

    /// Normalized weights.
    pub fn weights(&self) -> Vec<f64> {
        stats::normalize_log_weights(&self.log_weights)
    }

    /// Kish's effective sample size of the weights.
    pub fn effective_sample_size(&self) -> f64 {
        let w = self.weights();
        let sum_sq: f64 = w.iter().map(|x| x * x).sum();
        if sum_sq > 0.0 {
            sum_sq.recip()
        } else {
            0.0
        }
    }

    /// Weighted expectation of `f`.
    pub fn expectation<F: Fn(&T) -> f64>(&self, f: F) -> f64 {
        self.values
            .iter()
            .zip(self.weights())
            .map(|(v, w)| w * f(v))
            .sum()
    }

    /// Applies `f` to every value and keeps the weights.
    pub fn map<U, F: FnMut(&T) -> U>(&self, f: F) -> Empirical<U> {
        Empirical {
            values: self.values.iter().map(f).collect(),
            log_weights: self.log_weights.clone(),
            name: self.name.clone(),
            file_name: None,
            closed: false,
        }
    }

    /// Draws one value according to the weights.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&T> {
        let index = WeightedIndex::new(self.weights())
            .map_err(|e| PplError::InvalidArgument(format!("degenerate weights: {e}")))?;
        Ok(&self.values[index.sample(rng)])
    }
}

impl<T: Clone> Empirical<T> {
    /// The same values with uniform weights.
    pub fn unweighted(&self) -> Self {
        Self {
            values: self.values.clone(),
            log_weights: vec![0.0; self.values.len()],
            name: self.name.clone(),
            file_name: None,
            closed: false,
        }
    }
}

impl Empirical<f64> {
    pub fn mean(&self) -> f64 {
        self.expectation(|&x| x)
    }

    pub fn variance(&self) -> f64 {
        let mean = self.mean();
        self.expectation(|&x| (x - mean).powi(2))
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

impl Empirical<Trace> {
    /// Values of the variable called `name`, for the traces that have one.
    pub fn named_values(&self, name: &str) -> Result<Empirical<f64>> {
        self.filter_values(name, |t| t.value(name))
    }

    /// Values of the variable at `address`, for the traces that have one.
    pub fn address_values(&self, address: &str) -> Result<Empirical<f64>> {
        self.filter_values(address, |t| t.at_address(address).map(|v| v.value))
    }

    pub fn result_values(&self) -> Empirical<f64> {
        self.map(|t| t.result)
    }

    pub fn log_probs(&self) -> Vec<f64> {
        self.values.iter().map(|t| t.log_prob).collect()
    }

    fn filter_values<F: Fn(&Trace) -> Option<f64>>(
        &self,
        label: &str,
        f: F,
    ) -> Result<Empirical<f64>> {
        let (values, log_weights): (Vec<f64>, Vec<f64>) = self
            .values
            .iter()
            .zip(&self.log_weights)
            .filter_map(|(t, &w)| f(t).map(|v| (v, w)))
            .unzip();
        Empirical::new(values, log_weights, format!("{} ({label})", self.name))
    }

    /// Controlled addresses, most frequent first; ties are ordered by address.
    pub fn address_frequencies(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for trace in &self.values {
            for v in trace.controlled() {
                *counts.entry(v.address.as_str()).or_insert(0) += 1;
            }
        }
        let mut out: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(a, c)| (a.to_string(), c))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }

    /// Names of the tagged variables, in order of first appearance.
    pub fn tagged_names(&self) -> Vec<String> {
        let mut seen = BTreeMap::new();
        for trace in &self.values {
            for v in trace.tagged() {
                if let Some(name) = &v.name {
                    let next = seen.len();
                    seen.entry(name.clone()).or_insert(next);
                }
            }
        }
        let mut names: Vec<(String, usize)> = seen.into_iter().collect();
        names.sort_by_key(|(_, order)| *order);
        names.into_iter().map(|(name, _)| name).collect()
    }

    /// Attaches a file that [`Empirical::close`] writes the traces to.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_name = Some(path.into());
        self
    }

    pub fn file_name(&self) -> Option<&Path> {
        self.file_name.as_deref()
    }

    /// Writes the traces to the attached file, if any. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(path) = &self.file_name {
            let path = crate::io::csv::csv_path(path);
            crate::io::csv::save_traces(self, &path)?;
            debug!(path = %path.display(), "Saved {}", self.name);
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gum_marsaglia::GaussianUnknownMean;
    use crate::model::Model;
    use crate::trace::ObserveMap;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    #[test]
    fn rejects_empty_and_mismatched_inputs() {
        assert!(matches!(
            Empirical::<f64>::unweighted_from(vec![], "e"),
            Err(PplError::EmptyEmpirical)
        ));
        assert!(Empirical::new(vec![1.0], vec![0.0, 0.0], "e").is_err());
    }

    #[test]
    fn weighted_moments() {
        let e = Empirical::new(
            vec![0.0, 10.0],
            vec![3f64.ln(), 1f64.ln()],
            "two points",
        )
        .unwrap();
        assert_abs_diff_eq!(e.mean(), 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(e.variance(), 18.75, epsilon = 1e-12);
        assert_abs_diff_eq!(e.effective_sample_size(), 1.6, epsilon = 1e-12);
        assert_eq!(e.min(), 0.0);
        assert_eq!(e.max(), 10.0);
    }

    #[test]
    fn large_log_weights_do_not_overflow() {
        let e = Empirical::new(vec![1.0, 3.0], vec![1000.0, 1000.0], "big").unwrap();
        assert_abs_diff_eq!(e.mean(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn unweighted_rename_and_map() {
        let e = Empirical::new(vec![1.0, 2.0], vec![0.0, 5.0], "Posterior, x").unwrap();
        let proposal = e.unweighted().rename(e.name().replace("Posterior", "Proposal"));
        assert_eq!(proposal.name(), "Proposal, x");
        assert_abs_diff_eq!(proposal.mean(), 1.5, epsilon = 1e-12);

        let doubled = e.map(|x| 2.0 * x);
        assert_eq!(doubled.values(), &[2.0, 4.0]);
        assert_eq!(doubled.log_weights(), e.log_weights());
    }

    fn weighted_prior(n: usize) -> Empirical<Trace> {
        let prior = GaussianUnknownMean::default()
            .prior_traces(n, &ObserveMap::new(), 21)
            .unwrap();
        let log_weights = (0..n).map(|i| -(i as f64)).collect();
        Empirical::new(prior.values().to_vec(), log_weights, "weighted prior").unwrap()
    }

    #[test]
    fn address_values_keep_matching_weights() {
        let e = weighted_prior(6);
        let x = e.address_values("x__Uniform__1").unwrap();
        let expected: Vec<f64> = e
            .values()
            .iter()
            .map(|t| t.at_address("x__Uniform__1").unwrap().value)
            .collect();
        assert_eq!(x.values(), expected.as_slice());
        assert_eq!(x.log_weights(), e.log_weights());
        assert_eq!(x.name(), "weighted prior (x__Uniform__1)");
        assert!(matches!(
            e.address_values("z__Uniform__1"),
            Err(PplError::EmptyEmpirical)
        ));
    }

    #[test]
    fn result_values_are_the_tagged_mu() {
        let e = weighted_prior(6);
        let results = e.result_values();
        let mu = e.named_values("mu").unwrap();
        assert_eq!(results.values(), mu.values());
        assert_eq!(results.log_weights(), e.log_weights());
        assert_abs_diff_eq!(results.mean(), mu.mean(), epsilon = 1e-12);
    }

    #[test]
    fn close_writes_the_attached_file_once() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("prior");
        let mut e = weighted_prior(3).with_file(&base);
        assert_eq!(e.file_name(), Some(base.as_path()));

        e.close().unwrap();
        let path = dir.path().join("prior.csv");
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 4);

        std::fs::remove_file(&path).unwrap();
        e.close().unwrap();
        assert!(!path.exists());

        let mut unattached = weighted_prior(2);
        assert_eq!(unattached.file_name(), None);
        unattached.close().unwrap();
    }

    #[test]
    fn sample_respects_weights() {
        let e = Empirical::new(vec![0usize, 1], vec![f64::NEG_INFINITY, 0.0], "one").unwrap();
        let mut rng = SmallRng::seed_from_u64(0);
        for _ in 0..100 {
            assert_eq!(*e.sample(&mut rng).unwrap(), 1);
        }
    }
}
