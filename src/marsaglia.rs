/*!
Normal sampling with the Marsaglia polar method.

Pairs `(x, y)` are drawn uniformly from `(-1, 1)²` until they land strictly inside the
unit disk (about π/4 of the time). The accepted pair is mapped to a standard normal
deviate by `x * sqrt(-2 ln(s) / s)` with `s = x² + y²`. The loop has no iteration cap, so
a source that never lands inside the disk never returns.

The routines are generic over the source of uniforms. This lets the same loop run on a
plain RNG ([`MarsagliaNormal`]) or through a model's traced sample sites.

# Examples

```rust
use mini_ppl::marsaglia::MarsagliaNormal;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::Distribution;

let normal = MarsagliaNormal::new(1.0, 2.0).unwrap();
let mut rng = SmallRng::seed_from_u64(123);
let xs: Vec<f64> = normal.sample_iter(&mut rng).take(1000).collect();
assert_eq!(xs.len(), 1000);
```
*/

use rand::Rng;

use crate::distributions::Distribution;
use crate::error::{PplError, Result};

/// The proposal each coordinate of the polar pair is drawn from.
pub const UNIT_SQUARE_SIDE: Distribution = Distribution::Uniform {
    low: -1.0,
    high: 1.0,
};

/// Draws pairs from `draw` until `0 < s < 1` and returns the accepted `(x, y, s)`.
///
/// `s == 0` is rejected along with `s >= 1`; the transform is undefined there.
pub fn polar_pair<F: FnMut() -> f64>(mut draw: F) -> (f64, f64, f64) {
    loop {
        let x = draw();
        let y = draw();
        let s = x * x + y * y;
        if s < 1.0 && s > 0.0 {
            return (x, y, s);
        }
    }
}

/// One draw from `Normal(mean, stddev)` using uniforms supplied by `draw`.
pub fn marsaglia<F: FnMut() -> f64>(mean: f64, stddev: f64, draw: F) -> f64 {
    let (x, _, s) = polar_pair(draw);
    mean + stddev * (x * (-2.0 * s.ln() / s).sqrt())
}

/// A normal distribution sampled with the polar method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarsagliaNormal {
    mean: f64,
    stddev: f64,
}

impl MarsagliaNormal {
    pub fn new(mean: f64, stddev: f64) -> Result<Self> {
        if !mean.is_finite() || !(stddev.is_finite() && stddev > 0.0) {
            return Err(PplError::InvalidParameter {
                distribution: "MarsagliaNormal",
                reason: format!("expected finite mean and stddev > 0, got ({mean}, {stddev})"),
            });
        }
        Ok(Self { mean, stddev })
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stddev(&self) -> f64 {
        self.stddev
    }
}

impl rand_distr::Distribution<f64> for MarsagliaNormal {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        marsaglia(self.mean, self.stddev, || UNIT_SQUARE_SIDE.sample(&mut *rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ks_test::{normal_cdf, one_sample_ks_test, two_sample_ks_test};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rand_distr::Distribution as _;

    #[test]
    fn accepted_pairs_lie_inside_unit_disk() {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..10_000 {
            let (x, y, s) = polar_pair(|| UNIT_SQUARE_SIDE.sample(&mut rng));
            assert!(s > 0.0 && s < 1.0, "Expected 0 < s < 1, got {s}");
            assert_eq!(s, x * x + y * y);
        }
    }

    #[test]
    fn rejects_pairs_until_inside() {
        // Two pairs outside the disk, one on the origin, then an accepted one.
        let mut values = vec![0.9, 0.9, -1.0, 0.5, 0.0, 0.0, 0.6, 0.0].into_iter();
        let (x, y, s) = polar_pair(|| values.next().unwrap());
        assert_eq!((x, y), (0.6, 0.0));
        assert!((s - 0.36).abs() < 1e-12);
        assert!(values.next().is_none());
    }

    #[test]
    fn transform_matches_closed_form() {
        let mut values = vec![0.3, 0.4].into_iter();
        let z = marsaglia(1.0, 2.0, || values.next().unwrap());
        let s: f64 = 0.25;
        let expected = 1.0 + 2.0 * 0.3 * (-2.0 * s.ln() / s).sqrt();
        assert!((z - expected).abs() < 1e-12);
    }

    #[test]
    fn fixed_seed_is_deterministic() {
        let normal = MarsagliaNormal::new(1.0, 5f64.sqrt()).unwrap();
        let a: Vec<f64> = normal
            .sample_iter(SmallRng::seed_from_u64(123))
            .take(100)
            .collect();
        let b: Vec<f64> = normal
            .sample_iter(SmallRng::seed_from_u64(123))
            .take(100)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn matches_normal_cdf() {
        const N: usize = 5_000;
        for (mean, stddev, seed) in [(0.0, 1.0, 1), (1.0, 5f64.sqrt(), 2), (-3.0, 0.25, 3)] {
            let normal = MarsagliaNormal::new(mean, stddev).unwrap();
            let mut xs: Vec<f64> = normal
                .sample_iter(SmallRng::seed_from_u64(seed))
                .take(N)
                .collect();
            let result =
                one_sample_ks_test(&mut xs, |x| normal_cdf(x, mean, stddev), 0.001).unwrap();
            assert!(
                !result.is_rejected,
                "KS test rejected N({mean}, {stddev}): {result:?}"
            );
        }
    }

    #[test]
    fn matches_rand_distr_normal() {
        const N: usize = 5_000;
        let mut rng = SmallRng::seed_from_u64(99);
        let polar = MarsagliaNormal::new(2.0, 3.0).unwrap();
        let reference = rand_distr::Normal::new(2.0, 3.0).unwrap();
        let mut a: Vec<f64> = (0..N).map(|_| polar.sample(&mut rng)).collect();
        let mut b: Vec<f64> = (0..N).map(|_| reference.sample(&mut rng)).collect();
        let result = two_sample_ks_test(&mut a, &mut b, 0.001).unwrap();
        assert!(!result.is_rejected, "KS test rejected: {result:?}");
    }

    #[test]
    fn invalid_stddev_is_rejected() {
        assert!(MarsagliaNormal::new(0.0, 0.0).is_err());
        assert!(MarsagliaNormal::new(0.0, f64::NAN).is_err());
    }
}
