//! Candidate generation for the swept hyperparameter.

use hs_types::{DistributionError, DistributionKind, Hyperparameter, SamplingConfig};
use rand::distr::{Distribution, Uniform};
use rand::Rng;

/// Draws independent values from a validated distribution.
///
/// The sampler holds no RNG of its own; callers pass one in so a seeded
/// generator yields a reproducible sequence.
#[derive(Debug, Clone)]
pub struct ParameterSampler {
    name: String,
    kind: DistributionKind,
    low: f64,
    high: f64,
    /// Over `[low, high]`, or over `[ln low, ln high]` for log-uniform.
    range: Uniform<f64>,
}

impl ParameterSampler {
    pub fn new(config: &SamplingConfig) -> Result<Self, DistributionError> {
        config.validate()?;
        let (low, high) = (config.low, config.high);
        let (from, to) = match config.distribution {
            DistributionKind::Uniform => (low, high),
            DistributionKind::LogUniform => (low.ln(), high.ln()),
        };
        let range = Uniform::new_inclusive(from, to)
            .map_err(|_| DistributionError::UnrepresentableRange { low, high })?;
        Ok(Self {
            name: config.parameter.clone(),
            kind: config.distribution,
            low,
            high,
            range,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    /// One draw from the thread-local generator.
    pub fn sample(&self) -> f64 {
        self.sample_with(&mut rand::rng())
    }

    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let drawn = self.range.sample(rng);
        match self.kind {
            DistributionKind::Uniform => drawn,
            // exp(ln(x)) can land one ulp outside the interval.
            DistributionKind::LogUniform => drawn.exp().clamp(self.low, self.high),
        }
    }

    pub fn sample_hyperparameter<R: Rng + ?Sized>(&self, rng: &mut R) -> Hyperparameter {
        Hyperparameter {
            name: self.name.clone(),
            value: self.sample_with(rng),
        }
    }

    /// Generate a batch of draws.
    pub fn suggest<R: Rng + ?Sized>(&self, rng: &mut R, count: usize) -> Vec<f64> {
        (0..count).map(|_| self.sample_with(rng)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Two-sided KS statistic of `values` (already in [0, 1]) against U(0, 1).
    fn ks_statistic(mut values: Vec<f64>) -> f64 {
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = values.len() as f64;
        values
            .iter()
            .enumerate()
            .map(|(i, &u)| {
                let above = (i as f64 + 1.0) / n - u;
                let below = u - i as f64 / n;
                above.max(below)
            })
            .fold(0.0, f64::max)
    }

    #[test]
    fn rejects_malformed_bounds() {
        assert!(ParameterSampler::new(&SamplingConfig::uniform(1.0, 0.0)).is_err());
        assert!(ParameterSampler::new(&SamplingConfig::uniform(f64::NEG_INFINITY, 0.0)).is_err());
        assert!(ParameterSampler::new(&SamplingConfig::log_uniform(-1.0, 1.0)).is_err());
    }

    #[test]
    fn range_wider_than_f64_is_refused() {
        let err = ParameterSampler::new(&SamplingConfig::uniform(-1e308, 1e308)).unwrap_err();
        assert_eq!(
            err,
            DistributionError::UnrepresentableRange {
                low: -1e308,
                high: 1e308
            }
        );

        let sampler = ParameterSampler::new(&SamplingConfig::uniform(-1e307, 1e307)).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(sampler
            .suggest(&mut rng, 100)
            .iter()
            .all(|v| v.is_finite() && (-1e307..=1e307).contains(v)));
    }

    #[test]
    fn uniform_respects_bounds() {
        let sampler = ParameterSampler::new(&SamplingConfig::uniform(0.5, 1.0)).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let draws = sampler.suggest(&mut rng, 2_000);
        assert_eq!(draws.len(), 2_000);
        assert!(draws.iter().all(|v| (0.5..=1.0).contains(v)));

        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        assert!((mean - 0.75).abs() < 0.02, "mean drifted: {mean}");
    }

    #[test]
    fn log_uniform_stays_in_bounds() {
        let sampler = ParameterSampler::new(&SamplingConfig::log_uniform(1e-15, 1e-3)).unwrap();
        for _ in 0..1_000 {
            let v = sampler.sample();
            assert!((1e-15..=1e-3).contains(&v), "lr out of bounds: {v}");
        }
    }

    #[test]
    fn log_uniform_is_uniform_in_log_space() {
        let (low, high) = (1e-15_f64, 1e-3_f64);
        let sampler = ParameterSampler::new(&SamplingConfig::log_uniform(low, high)).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        let draws = sampler.suggest(&mut rng, 10_000);
        assert!(draws.iter().all(|v| *v >= low && *v <= high));

        let (log_low, log_high) = (low.ln(), high.ln());
        let scaled: Vec<f64> = draws
            .iter()
            .map(|v| (v.ln() - log_low) / (log_high - log_low))
            .collect();

        // Critical value for alpha = 0.01.
        let critical = 1.63 / (draws.len() as f64).sqrt();
        let d = ks_statistic(scaled);
        assert!(d < critical, "KS statistic {d} exceeds {critical}");
    }

    #[test]
    fn seeded_draws_are_reproducible() {
        let sampler = ParameterSampler::new(&SamplingConfig::uniform(0.0, 1.0)).unwrap();
        let a = sampler.suggest(&mut StdRng::seed_from_u64(5), 8);
        let b = sampler.suggest(&mut StdRng::seed_from_u64(5), 8);
        assert_eq!(a, b);
    }

    #[test]
    fn hyperparameter_carries_name() {
        let config = SamplingConfig::uniform(0.0, 1.0).named("dropout");
        let sampler = ParameterSampler::new(&config).unwrap();
        let hp = sampler.sample_hyperparameter(&mut StdRng::seed_from_u64(1));
        assert_eq!(hp.name, "dropout");
        assert!((0.0..=1.0).contains(&hp.value));
        assert_eq!(sampler.bounds(), (0.0, 1.0));
    }
}
