//! Execution traces: the record of every sample, observe and tag call made by one run of a
//! model.

use std::collections::BTreeMap;

use crate::distributions::Distribution;

/// Map from observation name to the value the model should be conditioned on.
pub type ObserveMap = BTreeMap<String, f64>;

/// What kind of call produced a [`Variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Sample,
    Observe,
    Tag,
}

/// One recorded random choice, observation or tagged value.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub address: String,
    pub name: Option<String>,
    pub kind: VariableKind,
    pub distribution: Option<Distribution>,
    pub value: f64,
    pub log_prob: f64,
    /// A latent random choice that inference is allowed to propose over.
    pub control: bool,
    /// The site is redrawn in place on every visit (rejection loops).
    pub replace: bool,
    /// The value was conditioned from an [`ObserveMap`].
    pub observed: bool,
    /// The value was carried over from the previous Metropolis-Hastings state.
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub variables: Vec<Variable>,
    pub result: f64,
    /// Sum of the log-probabilities of the controlled and the conditioned variables.
    pub log_prob: f64,
    pub log_prob_observed: f64,
    pub log_importance_weight: f64,
    /// Every sample call, including the draws a rejection loop threw away.
    pub samples_drawn: usize,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace {
    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
            result: f64::NAN,
            log_prob: 0.0,
            log_prob_observed: 0.0,
            log_importance_weight: 0.0,
            samples_drawn: 0,
        }
    }

    /// Appends `variable`, or overwrites the variable already recorded at the same address.
    pub(crate) fn record(&mut self, variable: Variable) {
        match self
            .variables
            .iter_mut()
            .find(|v| v.address == variable.address)
        {
            Some(existing) => *existing = variable,
            None => self.variables.push(variable),
        }
    }

    /// Stores the model's return value and recomputes the log-probability summaries.
    pub(crate) fn finish(&mut self, result: f64) {
        self.result = result;
        self.log_prob_observed = self
            .variables
            .iter()
            .filter(|v| v.observed)
            .map(|v| v.log_prob)
            .sum();
        self.log_prob = self
            .variables
            .iter()
            .filter(|v| v.control || v.observed)
            .map(|v| v.log_prob)
            .sum();
        self.log_importance_weight = self.log_prob_observed;
    }

    pub fn named(&self, name: &str) -> Option<&Variable> {
        self.variables
            .iter()
            .find(|v| v.name.as_deref() == Some(name))
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.named(name).map(|v| v.value)
    }

    pub fn at_address(&self, address: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.address == address)
    }

    pub fn controlled(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(|v| v.control)
    }

    pub fn observation_sites(&self) -> impl Iterator<Item = &Variable> {
        self.variables
            .iter()
            .filter(|v| v.kind == VariableKind::Observe)
    }

    pub fn tagged(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(|v| v.kind == VariableKind::Tag)
    }

    pub fn len_controlled(&self) -> usize {
        self.controlled().count()
    }

    /// Values of the observation sites, keyed by name; ready to condition another run on.
    pub fn observations(&self) -> ObserveMap {
        self.observation_sites()
            .filter_map(|v| v.name.clone().map(|name| (name, v.value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(address: &str, kind: VariableKind, value: f64, log_prob: f64) -> Variable {
        Variable {
            address: address.to_string(),
            name: None,
            kind,
            distribution: None,
            value,
            log_prob,
            control: kind == VariableKind::Sample,
            replace: false,
            observed: false,
            reused: false,
        }
    }

    #[test]
    fn record_overwrites_same_address() {
        let mut trace = Trace::new();
        trace.record(var("x__Uniform__1", VariableKind::Sample, 0.1, -0.7));
        trace.record(var("y__Uniform__1", VariableKind::Sample, 0.2, -0.7));
        trace.record(var("x__Uniform__1", VariableKind::Sample, 0.9, -0.7));
        assert_eq!(trace.variables.len(), 2);
        assert_eq!(trace.variables[0].value, 0.9);
    }

    #[test]
    fn finish_sums_controlled_and_conditioned() {
        let mut trace = Trace::new();
        trace.record(var("x", VariableKind::Sample, 0.1, -1.0));
        let mut obs = var("obs0", VariableKind::Observe, 3.0, -2.0);
        obs.name = Some("obs0".into());
        obs.observed = true;
        trace.record(obs);
        let mut unconditioned = var("obs1", VariableKind::Observe, 4.0, -5.0);
        unconditioned.name = Some("obs1".into());
        trace.record(unconditioned);
        trace.finish(0.5);

        assert_eq!(trace.result, 0.5);
        assert_eq!(trace.log_prob_observed, -2.0);
        assert_eq!(trace.log_prob, -3.0);
        assert_eq!(trace.log_importance_weight, -2.0);
        assert_eq!(trace.value("obs1"), Some(4.0));
        assert_eq!(trace.observations().len(), 2);
    }
}
