//! Provides functions for computing weighted moments and MCMC statistics.

use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{PplError, Result};

/// Turns log weights into normalized weights, using log-sum-exp for stability.
///
/// All `-inf` log weights give all-zero weights.
pub fn normalize_log_weights(log_weights: &[f64]) -> Vec<f64> {
    let max = log_weights
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![0.0; log_weights.len()];
    }
    let unnorm: Vec<f64> = log_weights.iter().map(|w| (w - max).exp()).collect();
    let total: f64 = unnorm.iter().sum();
    unnorm.into_iter().map(|w| w / total).collect()
}

/// Weighted mean and (biased) variance of `values`.
pub fn weighted_mean_var(values: &[f64], log_weights: &[f64]) -> Result<(f64, f64)> {
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
    let w = normalize_log_weights(log_weights);
    let mean: f64 = values.iter().zip(&w).map(|(x, w)| x * w).sum();
    let var: f64 = values
        .iter()
        .zip(&w)
        .map(|(x, w)| w * (x - mean).powi(2))
        .sum();
    Ok((mean, var))
}

/// Normalized autocorrelation of `x` for lags `0..x.len()`, computed with an FFT.
///
/// A constant series has no defined autocorrelation; its lag-0 value is 1 and the rest 0.
pub fn autocorrelation(x: &[f64]) -> Result<Vec<f64>> {
    let n = x.len();
    if n == 0 {
        return Err(PplError::EmptyEmpirical);
    }
    let mean = x.iter().sum::<f64>() / n as f64;
    let size = (2 * n).next_power_of_two();
    let mut buffer: Vec<Complex<f64>> = x
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(size).process(&mut buffer);
    for c in buffer.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    planner.plan_fft_inverse(size).process(&mut buffer);

    let r0 = buffer[0].re;
    if r0.abs() <= f64::EPSILON * size as f64 {
        let mut out = vec![0.0; n];
        out[0] = 1.0;
        return Ok(out);
    }
    Ok(buffer[..n].iter().map(|c| c.re / r0).collect())
}

/// Incremental Gelman-Rubin potential scale reduction factor over several chains.
///
/// Every call to [`GelmanRubin::step`] adds one draw per chain and parameter. The
/// running means and means of squares are kept, so R-hat can be read at any point.
#[derive(Debug, Clone, PartialEq)]
pub struct GelmanRubin {
    n: usize,
    mean: Array2<f64>,    // n_chains x n_params
    mean_sq: Array2<f64>, // n_chains x n_params
    n_chains: usize,
    n_params: usize,
}

impl GelmanRubin {
    pub fn new(n_chains: usize, n_params: usize) -> Self {
        Self {
            n: 0,
            mean: Array2::<f64>::zeros((n_chains, n_params)),
            mean_sq: Array2::<f64>::zeros((n_chains, n_params)),
            n_chains,
            n_params,
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Adds one draw per chain; `x` is chain-major (`n_chains x n_params`).
    pub fn step(&mut self, x: &[f64]) -> Result<()> {
        let x_arr = ArrayView2::from_shape((self.n_chains, self.n_params), x)
            .map_err(|e| PplError::ChainMismatch(format!("bad step shape: {e}")))?;
        self.n += 1;
        let n = self.n as f64;
        self.mean = (&self.mean * (n - 1.0) + &x_arr) / n;
        self.mean_sq = (&self.mean_sq * (n - 1.0) + &x_arr.mapv(|v| v * v)) / n;
        Ok(())
    }

    /// R-hat per parameter. Needs at least two chains and two draws.
    pub fn all(&self) -> Result<Array1<f64>> {
        if self.n_chains < 2 || self.n < 2 {
            return Err(PplError::ChainMismatch(format!(
                "R-hat needs at least 2 chains and 2 draws, got {} chains and {} draws",
                self.n_chains, self.n
            )));
        }
        let mean_chain = self
            .mean
            .mean_axis(Axis(0))
            .ok_or_else(|| PplError::ChainMismatch("mean across chains failed".into()))?;
        let n_chains = self.n_chains as f64;
        let n = self.n as f64;
        let between = (&self.mean - &mean_chain.insert_axis(Axis(0)))
            .mapv(|v| v * v)
            .sum_axis(Axis(0))
            * (n / (n_chains - 1.0));
        let sm2 = (&self.mean_sq - &self.mean.mapv(|v| v * v)) * (n / (n - 1.0));
        let within = sm2
            .mean_axis(Axis(0))
            .ok_or_else(|| PplError::ChainMismatch("mean of variances failed".into()))?;
        let var = &within * ((n - 1.0) / n) + &between * (1.0 / n);
        Ok((var / within).mapv(f64::sqrt))
    }

    pub fn max(&self) -> Result<f64> {
        let all = self.all()?;
        let max = *all
            .max()
            .map_err(|e| PplError::ChainMismatch(format!("R-hat max failed: {e}")))?;
        Ok(max)
    }
}

/// A histogram with shared bin edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub edges: Vec<f64>,
    /// Weight per bin divided by the bin width, so it integrates to 1.
    pub density: Vec<f64>,
}

/// `bins` equal-width edges spanning `[low, high]`; widens a degenerate range.
pub fn bin_edges(low: f64, high: f64, bins: usize) -> Result<Vec<f64>> {
    if bins == 0 || !low.is_finite() || !high.is_finite() || low > high {
        return Err(PplError::InvalidArgument(format!(
            "cannot bin [{low}, {high}] into {bins} bins"
        )));
    }
    let (low, high) = if low == high {
        (low - 0.5, high + 0.5)
    } else {
        (low, high)
    };
    let width = (high - low) / bins as f64;
    Ok((0..=bins).map(|i| low + width * i as f64).collect())
}

/// Weighted, normalized histogram over the given edges. Values outside are dropped.
pub fn weighted_histogram(values: &[f64], log_weights: &[f64], edges: &[f64]) -> Result<Histogram> {
    if edges.len() < 2 {
        return Err(PplError::InvalidArgument("need at least two bin edges".into()));
    }
    let bins = edges.len() - 1;
    let low = edges[0];
    let high = edges[bins];
    let width = (high - low) / bins as f64;
    let weights = normalize_log_weights(log_weights);
    let mut mass = vec![0.0; bins];
    for (&x, &w) in values.iter().zip(&weights) {
        if x < low || x > high || !x.is_finite() {
            continue;
        }
        let i = (((x - low) / width) as usize).min(bins - 1);
        mass[i] += w;
    }
    let total: f64 = mass.iter().sum();
    let density = mass
        .into_iter()
        .map(|m| if total > 0.0 { m / (total * width) } else { 0.0 })
        .collect();
    Ok(Histogram {
        edges: edges.to_vec(),
        density,
    })
}

#[cfg(test)]
mod tests {
    use std::f64;

    use super::*;
    use approx::assert_abs_diff_eq;

    fn run_rhat_test(data0: Array2<f64>, data1: Array2<f64>, expected: Array1<f64>, tol: f64) {
        let mut psr = GelmanRubin::new(3, 4);
        psr.step(data0.as_slice().unwrap()).unwrap();
        psr.step(data1.as_slice().unwrap()).unwrap();
        let rhat = psr.all().unwrap();
        let diff = *(rhat.clone() - expected.clone()).abs().max().unwrap();
        assert!(
            diff < tol,
            "Mismatch in Rhat. Got {:?}, expected {:?}, diff = {:?}",
            rhat,
            expected,
            diff
        );
    }

    #[test]
    fn test_rhat_1() {
        let data_step_0 = arr2(&[
            [0.0, 1.0, 0.0, 1.0], // chain 0
            [1.0, 2.0, 0.0, 2.0], // chain 1
            [0.0, 0.0, 0.0, 2.0], // chain 2
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 2.0, 0.0], // chain 0
            [1.0, 1.0, 1.0, 1.0], // chain 1
            [0.0, 1.0, 0.0, 0.0], // chain 2
        ]);
        let expected = array![f64::consts::SQRT_2, 1.08012345, 0.89442719, 0.8660254];
        run_rhat_test(data_step_0, data_step_1, expected, 1e-7);
    }

    #[test]
    fn test_rhat_2() {
        let data_step_0 = arr2(&[
            [1.0, 0.0, 0.0, 1.0],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, 2.0],
        ]);
        let data_step_1 = arr2(&[
            [1.0, 2.0, 0.0, 2.0],
            [1.0, 2.0, 0.0, 0.0],
            [2.0, 0.0, 1.0, 2.0],
        ]);
        let expected = array![f64::consts::FRAC_1_SQRT_2, 0.74535599, 1.0, 1.5];
        run_rhat_test(data_step_0, data_step_1, expected, 1e-7);
    }

    #[test]
    fn rhat_needs_two_draws() {
        let mut psr = GelmanRubin::new(2, 1);
        psr.step(&[0.0, 1.0]).unwrap();
        assert_eq!(psr.n(), 1);
        assert!(psr.all().is_err());
        assert!(psr.max().is_err());
        assert!(psr.step(&[0.0]).is_err());
        assert_eq!(psr.n(), 1);
    }

    #[test]
    fn rhat_max_picks_the_worst_parameter() {
        let mut psr = GelmanRubin::new(3, 4);
        psr.step(&[0.0, 1.0, 0.0, 1.0, 1.0, 2.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0])
            .unwrap();
        psr.step(&[1.0, 2.0, 2.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(psr.n(), 2);
        assert_abs_diff_eq!(psr.max().unwrap(), f64::consts::SQRT_2, epsilon = 1e-7);
    }

    #[test]
    fn autocorrelation_of_alternating_series() {
        let x: Vec<f64> = (0..8).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let acf = autocorrelation(&x).unwrap();
        assert_abs_diff_eq!(acf[0], 1.0, epsilon = 1e-12);
        // Biased estimator: r_k = (n - k) / n * (-1)^k.
        for (k, &r) in acf.iter().enumerate() {
            let expected = (8 - k) as f64 / 8.0 * if k % 2 == 0 { 1.0 } else { -1.0 };
            assert_abs_diff_eq!(r, expected, epsilon = 1e-10);
        }
    }

    #[test]
    fn autocorrelation_of_constant_series() {
        let acf = autocorrelation(&[3.0; 5]).unwrap();
        assert_eq!(acf, vec![1.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(autocorrelation(&[]).is_err());
    }

    #[test]
    fn histogram_integrates_to_one() {
        let edges = bin_edges(0.0, 4.0, 4).unwrap();
        let hist = weighted_histogram(&[0.5, 1.5, 1.5, 4.0], &[0.0; 4], &edges).unwrap();
        assert_eq!(hist.density, vec![0.25, 0.5, 0.0, 0.25]);
        let area: f64 = hist.density.iter().sum::<f64>() * 1.0;
        assert_abs_diff_eq!(area, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_range_is_widened() {
        let edges = bin_edges(2.0, 2.0, 2).unwrap();
        assert_eq!(edges, vec![1.5, 2.0, 2.5]);
        assert!(bin_edges(0.0, 1.0, 0).is_err());
    }

    #[test]
    fn weighted_mean_var_uses_weights() {
        let (mean, var) = weighted_mean_var(&[0.0, 10.0], &[3f64.ln(), 0.0]).unwrap();
        assert_abs_diff_eq!(mean, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(var, 18.75, epsilon = 1e-12);
    }
}
