/*!
Scalar distributions that models can sample from and observe against.

Both distributions are small `Copy` values with validated parameters, so they can be stored
inside trace variables and re-scored when a Metropolis-Hastings proposal replays a trace.

# Examples

```rust
use mini_ppl::distributions::Distribution;
use rand::rngs::SmallRng;
use rand::SeedableRng;

let uniform = Distribution::uniform(-1.0, 1.0).unwrap();
let normal = Distribution::normal(1.0, 2.0).unwrap();

let mut rng = SmallRng::seed_from_u64(42);
let u = uniform.sample(&mut rng);
assert!(u > -1.0 && u < 1.0);
assert_eq!(uniform.log_prob(u), -(2.0f64).ln());

let lp = normal.log_prob(1.0);
println!("log N(1 | 1, 2) = {lp}");
```
*/

use rand::Rng;
use rand_distr::Distribution as _;
use std::f64::consts::PI;
use std::fmt;

use crate::error::{PplError, Result};

/// A univariate distribution over `f64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distribution {
    /// Uniform on the open interval `(low, high)`.
    Uniform { low: f64, high: f64 },
    /// Gaussian with the given mean and standard deviation.
    Normal { mean: f64, stddev: f64 },
}

impl Distribution {
    /// Creates a uniform distribution, requiring finite bounds with `low < high`.
    pub fn uniform(low: f64, high: f64) -> Result<Self> {
        if !low.is_finite() || !high.is_finite() {
            return Err(PplError::InvalidParameter {
                distribution: "Uniform",
                reason: format!("bounds must be finite, got ({low}, {high})"),
            });
        }
        if low >= high {
            return Err(PplError::InvalidParameter {
                distribution: "Uniform",
                reason: format!("expected low < high, got ({low}, {high})"),
            });
        }
        Ok(Distribution::Uniform { low, high })
    }

    /// Creates a normal distribution, requiring a finite mean and a finite `stddev > 0`.
    pub fn normal(mean: f64, stddev: f64) -> Result<Self> {
        if !mean.is_finite() {
            return Err(PplError::InvalidParameter {
                distribution: "Normal",
                reason: format!("mean must be finite, got {mean}"),
            });
        }
        if !(stddev.is_finite() && stddev > 0.0) {
            return Err(PplError::InvalidParameter {
                distribution: "Normal",
                reason: format!("stddev must be finite and positive, got {stddev}"),
            });
        }
        Ok(Distribution::Normal { mean, stddev })
    }

    /// Short name used when building trace addresses.
    pub fn kind(&self) -> &'static str {
        match self {
            Distribution::Uniform { .. } => "Uniform",
            Distribution::Normal { .. } => "Normal",
        }
    }

    /// Draws one value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Distribution::Uniform { low, high } => loop {
                // gen_range is half-open; the support here is open on both sides.
                let u = rng.gen_range(low..high);
                if u > low {
                    break u;
                }
            },
            Distribution::Normal { mean, stddev } => {
                // Parameters were validated in the constructor.
                let z: f64 = rand_distr::StandardNormal.sample(rng);
                mean + stddev * z
            }
        }
    }

    /// Evaluates the normalized log-density at `x`.
    pub fn log_prob(&self, x: f64) -> f64 {
        match *self {
            Distribution::Uniform { low, high } => {
                if x > low && x < high {
                    -(high - low).ln()
                } else {
                    f64::NEG_INFINITY
                }
            }
            Distribution::Normal { mean, stddev } => {
                let z = (x - mean) / stddev;
                -0.5 * z * z - stddev.ln() - 0.5 * (2.0 * PI).ln()
            }
        }
    }

    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Uniform { low, high } => 0.5 * (low + high),
            Distribution::Normal { mean, .. } => mean,
        }
    }

    pub fn stddev(&self) -> f64 {
        match *self {
            Distribution::Uniform { low, high } => (high - low) / 12f64.sqrt(),
            Distribution::Normal { stddev, .. } => stddev,
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Uniform { low, high } => write!(f, "Uniform(low={low}, high={high})"),
            Distribution::Normal { mean, stddev } => {
                write!(f, "Normal(mean={mean}, stddev={stddev})")
            }
        }
    }
}
