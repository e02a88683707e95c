//! Random duration samplers
//!
//! Stations draw service, dwell and inter-arrival times through the
//! [`Sampler`] trait. Parameters are given in seconds; samples come back as
//! [`Duration`]s rounded to the millisecond and are never negative.

use crate::error::ConfigError;
use crate::simulator::{DeterministicRng, Duration};
use rand_distr::{Distribution, Exp, LogNormal as LogNormalDist, Uniform as UniformDist};

pub trait Sampler: Send + Sync {
    fn sample(&self, rng: &mut DeterministicRng) -> Duration;

    /// Expected value in seconds, if known.
    fn mean(&self) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fixed(pub Duration);

impl Sampler for Fixed {
    fn sample(&self, _rng: &mut DeterministicRng) -> Duration {
        self.0
    }

    fn mean(&self) -> Option<f64> {
        Some(self.0.as_secs_f64())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Exponential {
    mean: f64,
    dist: Exp<f64>,
}

impl Exponential {
    pub fn new(mean_secs: f64) -> Result<Self, ConfigError> {
        if !(mean_secs.is_finite() && mean_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "exponential mean must be positive, got {}",
                mean_secs
            )));
        }
        let dist = Exp::new(1.0 / mean_secs)
            .map_err(|e| ConfigError::Invalid(format!("exponential: {}", e)))?;
        Ok(Exponential {
            mean: mean_secs,
            dist,
        })
    }
}

impl Sampler for Exponential {
    fn sample(&self, rng: &mut DeterministicRng) -> Duration {
        Duration::from_secs_f64(self.dist.sample(rng))
    }

    fn mean(&self) -> Option<f64> {
        Some(self.mean)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Uniform {
    low: f64,
    high: f64,
    dist: UniformDist<f64>,
}

impl Uniform {
    pub fn new(low_secs: f64, high_secs: f64) -> Result<Self, ConfigError> {
        if !(low_secs.is_finite() && high_secs.is_finite()) || low_secs < 0.0 || low_secs >= high_secs {
            return Err(ConfigError::Invalid(format!(
                "uniform bounds must satisfy 0 <= low < high, got [{}, {})",
                low_secs, high_secs
            )));
        }
        Ok(Uniform {
            low: low_secs,
            high: high_secs,
            dist: UniformDist::new(low_secs, high_secs),
        })
    }
}

impl Sampler for Uniform {
    fn sample(&self, rng: &mut DeterministicRng) -> Duration {
        Duration::from_secs_f64(self.dist.sample(rng))
    }

    fn mean(&self) -> Option<f64> {
        Some((self.low + self.high) / 2.0)
    }
}

/// Log-normal parameterised by the mean and standard deviation of the
/// samples themselves, not of the underlying normal.
#[derive(Debug, Clone, Copy)]
pub struct LogNormal {
    mean: f64,
    dist: LogNormalDist<f64>,
}

impl LogNormal {
    pub fn new(mean_secs: f64, std_dev_secs: f64) -> Result<Self, ConfigError> {
        if !(mean_secs.is_finite() && mean_secs > 0.0 && std_dev_secs.is_finite() && std_dev_secs >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "log-normal needs mean > 0 and std dev >= 0, got {} / {}",
                mean_secs, std_dev_secs
            )));
        }
        let variance = (std_dev_secs / mean_secs).powi(2);
        let sigma = (1.0 + variance).ln().sqrt();
        let mu = mean_secs.ln() - sigma * sigma / 2.0;
        let dist = LogNormalDist::new(mu, sigma)
            .map_err(|e| ConfigError::Invalid(format!("log-normal: {}", e)))?;
        Ok(LogNormal {
            mean: mean_secs,
            dist,
        })
    }
}

impl Sampler for LogNormal {
    fn sample(&self, rng: &mut DeterministicRng) -> Duration {
        Duration::from_secs_f64(self.dist.sample(rng))
    }

    fn mean(&self) -> Option<f64> {
        Some(self.mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mean(sampler: &dyn Sampler, n: usize) -> f64 {
        let mut rng = DeterministicRng::new(11);
        let total: f64 = (0..n).map(|_| sampler.sample(&mut rng).as_secs_f64()).sum();
        total / n as f64
    }

    #[test]
    fn test_fixed_is_constant() {
        let sampler = Fixed(Duration::from_millis(1500));
        let mut rng = DeterministicRng::new(1);
        assert_eq!(sampler.sample(&mut rng), Duration(1500));
        assert_eq!(sampler.mean(), Some(1.5));
    }

    #[test]
    fn test_exponential_mean_close() {
        let sampler = Exponential::new(2.0).unwrap();
        let mean = sample_mean(&sampler, 20_000);
        assert!((mean - 2.0).abs() < 0.1, "mean {}", mean);
    }

    #[test]
    fn test_uniform_within_bounds() {
        let sampler = Uniform::new(1.0, 3.0).unwrap();
        let mut rng = DeterministicRng::new(3);
        for _ in 0..1000 {
            let d = sampler.sample(&mut rng);
            assert!(d >= Duration(1000) && d <= Duration(3000));
        }
    }

    #[test]
    fn test_log_normal_mean_close() {
        let sampler = LogNormal::new(4.0, 1.0).unwrap();
        let mean = sample_mean(&sampler, 20_000);
        assert!((mean - 4.0).abs() < 0.1, "mean {}", mean);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(Exponential::new(0.0).is_err());
        assert!(Exponential::new(f64::NAN).is_err());
        assert!(Uniform::new(3.0, 1.0).is_err());
        assert!(LogNormal::new(-1.0, 1.0).is_err());
    }

    #[test]
    fn test_same_seed_same_samples() {
        let sampler = Exponential::new(1.0).unwrap();
        let mut a = DeterministicRng::new(5);
        let mut b = DeterministicRng::new(5);
        for _ in 0..50 {
            assert_eq!(sampler.sample(&mut a), sampler.sample(&mut b));
        }
    }
}
