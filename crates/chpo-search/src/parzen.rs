//! Univariate Parzen estimators over model coordinates, plus the sampling
//! helpers shared with the multivariate KDE.

use rand::Rng;
use std::f64::consts::{PI, SQRT_2};

const PRIOR_MU: f64 = 0.5;
const PRIOR_SIGMA: f64 = 1.0;

/// Standard normal draw (Box-Muller).
pub(crate) fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-12);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Normal draw truncated to `[0, 1]` by rejection, clamped if the mass
/// inside the interval is too small to hit.
pub(crate) fn truncated_normal<R: Rng + ?Sized>(rng: &mut R, mu: f64, sigma: f64) -> f64 {
    for _ in 0..64 {
        let x = mu + sigma * standard_normal(rng);
        if (0.0..=1.0).contains(&x) {
            return x;
        }
    }
    mu.clamp(0.0, 1.0)
}

/// Abramowitz-Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / SQRT_2))
}

fn normal_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    (-0.5 * z * z).exp() / (sigma * (2.0 * PI).sqrt())
}

/// Mixture density fitted to a set of observations of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParzenEstimator {
    /// Truncated-normal mixture on `[0, 1]`, one component per observation
    /// plus a wide prior component centred on the interval.
    Continuous {
        weights: Vec<f64>,
        mus: Vec<f64>,
        sigmas: Vec<f64>,
    },
    /// Smoothed category frequencies.
    Categorical { probs: Vec<f64> },
}

impl ParzenEstimator {
    /// Adaptive bandwidths: each component spans the larger gap to its
    /// sorted neighbours, clipped to `[PRIOR_SIGMA / min(100, n + 1), PRIOR_SIGMA]`.
    pub fn continuous(observations: &[f64], prior_weight: f64) -> Self {
        let mut points: Vec<(f64, bool)> = observations.iter().map(|&x| (x, false)).collect();
        points.push((PRIOR_MU, true));
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let n = points.len();
        let min_sigma = PRIOR_SIGMA / (100.0_f64).min(1.0 + n as f64);

        let mut weights = Vec::with_capacity(n);
        let mut mus = Vec::with_capacity(n);
        let mut sigmas = Vec::with_capacity(n);

        for (i, &(mu, is_prior)) in points.iter().enumerate() {
            let sigma = if is_prior || n == 1 {
                PRIOR_SIGMA
            } else {
                let left = if i > 0 { mu - points[i - 1].0 } else { 0.0 };
                let right = if i + 1 < n { points[i + 1].0 - mu } else { 0.0 };
                left.max(right).clamp(min_sigma, PRIOR_SIGMA)
            };
            weights.push(if is_prior { prior_weight } else { 1.0 });
            mus.push(mu);
            sigmas.push(sigma);
        }

        let total: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }

        Self::Continuous {
            weights,
            mus,
            sigmas,
        }
    }

    /// Category counts smoothed by a uniform prior of total mass `prior_weight`.
    pub fn categorical(observations: &[f64], choices: usize, prior_weight: f64) -> Self {
        let choices = choices.max(1);
        let mut probs = vec![prior_weight / choices as f64; choices];
        for &x in observations {
            let idx = (x.round().max(0.0) as usize).min(choices - 1);
            probs[idx] += 1.0;
        }
        let total: f64 = probs.iter().sum();
        for p in &mut probs {
            *p /= total;
        }
        Self::Categorical { probs }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Self::Continuous {
                weights,
                mus,
                sigmas,
            } => {
                let k = pick_weighted(weights, rng);
                truncated_normal(rng, mus[k], sigmas[k])
            }
            Self::Categorical { probs } => pick_weighted(probs, rng) as f64,
        }
    }

    pub fn log_pdf(&self, x: f64) -> f64 {
        match self {
            Self::Continuous {
                weights,
                mus,
                sigmas,
            } => {
                let density: f64 = weights
                    .iter()
                    .zip(mus)
                    .zip(sigmas)
                    .map(|((w, &mu), &sigma)| {
                        let mass = normal_cdf((1.0 - mu) / sigma) - normal_cdf(-mu / sigma);
                        w * normal_pdf(x, mu, sigma) / mass.max(1e-12)
                    })
                    .sum();
                density.max(f64::MIN_POSITIVE).ln()
            }
            Self::Categorical { probs } => {
                let idx = (x.round().max(0.0) as usize).min(probs.len() - 1);
                probs[idx].max(f64::MIN_POSITIVE).ln()
            }
        }
    }
}

pub(crate) fn pick_weighted<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    let r: f64 = rng.random::<f64>() * weights.iter().sum::<f64>();
    let mut cumsum = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumsum += w;
        if r < cumsum {
            return i;
        }
    }
    weights.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn erf_matches_known_values() {
        assert!(erf(0.0).abs() < 1e-7);
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert!((erf(-1.0) + 0.842_700_79).abs() < 1e-6);
    }

    #[test]
    fn empty_estimator_is_the_prior() {
        match ParzenEstimator::continuous(&[], 1.0) {
            ParzenEstimator::Continuous { weights, mus, sigmas } => {
                assert_eq!(weights, vec![1.0]);
                assert_eq!(mus, vec![PRIOR_MU]);
                assert_eq!(sigmas, vec![PRIOR_SIGMA]);
            }
            other => panic!("unexpected estimator: {other:?}"),
        }
    }

    #[test]
    fn density_concentrates_near_observations() {
        let est = ParzenEstimator::continuous(&[0.1, 0.12, 0.15, 0.11], 1.0);
        assert!(est.log_pdf(0.12) > est.log_pdf(0.9));
    }

    #[test]
    fn samples_stay_in_unit_interval() {
        let est = ParzenEstimator::continuous(&[0.0, 0.98, 1.0], 1.0);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..500 {
            let x = est.sample(&mut rng);
            assert!((0.0..=1.0).contains(&x));
        }
    }

    #[test]
    fn categorical_counts_are_smoothed() {
        let est = ParzenEstimator::categorical(&[1.0, 1.0, 1.0], 3, 1.0);
        match &est {
            ParzenEstimator::Categorical { probs } => {
                assert_eq!(probs.len(), 3);
                assert!(probs[1] > probs[0]);
                assert!(probs[0] > 0.0);
                assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            }
            other => panic!("unexpected estimator: {other:?}"),
        }
        assert!(est.log_pdf(1.0) > est.log_pdf(2.0));
    }
}
