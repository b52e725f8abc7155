//! Statistical primitives shared by the experiment manager and the bandit.
//!
//! Every function is total over its domain: degenerate inputs (zero counts,
//! zero variance, all-zero probabilities) return neutral values instead of
//! NaN or a panic. Randomised helpers take the RNG as a parameter so callers
//! can inject a seeded source.
//!
//! The Beta sampler and the credible interval use a normal approximation.
//! It is biased below roughly ten effective observations; callers must not
//! rely on tail accuracy there.

use rand::Rng;
use std::f64::consts::PI;

/// Conjugate Beta update. The result never drops below the prior.
pub fn beta_posterior(prior_alpha: f64, prior_beta: f64, successes: u64, failures: u64) -> (f64, f64) {
    (prior_alpha + successes as f64, prior_beta + failures as f64)
}

pub fn beta_mean(alpha: f64, beta: f64) -> f64 {
    let total = alpha + beta;
    if total <= 0.0 || !total.is_finite() {
        return 0.0;
    }
    alpha / total
}

pub fn beta_variance(alpha: f64, beta: f64) -> f64 {
    let total = alpha + beta;
    if total <= 0.0 || !total.is_finite() {
        return 0.0;
    }
    (alpha * beta) / (total.powi(2) * (total + 1.0))
}

/// Box–Muller draw from `N(mean, std_dev²)`.
pub fn sample_normal(rng: &mut impl Rng, mean: f64, std_dev: f64) -> f64 {
    if std_dev <= 0.0 || !std_dev.is_finite() {
        return mean;
    }
    // gen() is in [0, 1); flip it so ln never sees zero.
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    mean + z * std_dev
}

/// Approximate Beta draw in `[0, 1]`.
///
/// Uniform when both shape parameters are at most 1, otherwise a clamped
/// normal draw with the Beta's mean and variance.
pub fn sample_beta(rng: &mut impl Rng, alpha: f64, beta: f64) -> f64 {
    if alpha <= 1.0 && beta <= 1.0 {
        return rng.gen::<f64>();
    }
    let mean = beta_mean(alpha, beta);
    let std_dev = beta_variance(alpha, beta).sqrt();
    sample_normal(rng, mean, std_dev).clamp(0.0, 1.0)
}

/// Inverse standard normal CDF (Abramowitz & Stegun 26.2.23, |error| < 4.5e-4).
pub fn normal_quantile(p: f64) -> f64 {
    const C0: f64 = 2.515517;
    const C1: f64 = 0.802853;
    const C2: f64 = 0.010328;
    const D1: f64 = 1.432788;
    const D2: f64 = 0.189269;
    const D3: f64 = 0.001308;

    if p.is_nan() {
        return 0.0;
    }
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    let tail = if p < 0.5 { p } else { 1.0 - p };
    let t = (-2.0 * tail.ln()).sqrt();
    let x = t - (C0 + C1 * t + C2 * t * t) / (1.0 + D1 * t + D2 * t * t + D3 * t * t * t);
    if p < 0.5 {
        -x
    } else {
        x
    }
}

/// Standard normal CDF via the A&S 7.1.26 erf approximation.
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return 0.5;
    }
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Two-sided interval around the Beta mean, clamped to `[0, 1]`.
pub fn credible_interval(alpha: f64, beta: f64, confidence_level: f64) -> (f64, f64) {
    let total = alpha + beta;
    if total <= 0.0 || !total.is_finite() {
        return (0.0, 0.0);
    }
    let mean = beta_mean(alpha, beta);
    let std_dev = beta_variance(alpha, beta).sqrt();
    let z = two_sided_z(confidence_level);
    ((mean - z * std_dev).max(0.0), (mean + z * std_dev).min(1.0))
}

/// z such that `P(|Z| <= z) = confidence_level`.
pub fn two_sided_z(confidence_level: f64) -> f64 {
    let level = if confidence_level.is_finite() {
        confidence_level.clamp(0.0, 1.0 - 1e-9)
    } else {
        0.95
    };
    normal_quantile(1.0 - (1.0 - level) / 2.0)
}

/// KL divergence of a win-probability distribution from uniform.
///
/// Zero for fewer than two arms, a non-positive total, or any probability
/// that is exactly zero (the divergence is undefined there).
pub fn information_gain<I>(probabilities: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let probs: Vec<f64> = probabilities.into_iter().collect();
    let n = probs.len();
    if n < 2 {
        return 0.0;
    }
    if probs.iter().any(|p| *p <= 0.0 || !p.is_finite()) {
        return 0.0;
    }
    let total: f64 = probs.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let kl: f64 = probs
        .iter()
        .map(|p| {
            let q = p / total;
            q * (q * n as f64).ln()
        })
        .sum();
    kl.max(0.0)
}

const T_DEGREES: [f64; 5] = [1.0, 5.0, 10.0, 30.0, 100.0];
const T_TABLE: [(f64, [f64; 5]); 3] = [
    (0.90, [6.314, 2.015, 1.812, 1.697, 1.660]),
    (0.95, [12.706, 2.571, 2.228, 2.042, 1.984]),
    (0.99, [63.657, 4.032, 3.169, 2.750, 2.626]),
];

/// Two-sided critical t value by nearest-neighbour lookup.
///
/// This is a coarse table, not an exact Student-t quantile. Falls back to
/// 1.96 when the confidence level is not within 0.01 of a tabulated level.
pub fn t_value(confidence_level: f64, degrees_of_freedom: f64) -> f64 {
    let row = T_TABLE
        .iter()
        .filter(|(level, _)| (level - confidence_level).abs() <= 0.01)
        .min_by(|a, b| {
            (a.0 - confidence_level)
                .abs()
                .total_cmp(&(b.0 - confidence_level).abs())
        });

    let Some((_, values)) = row else {
        return 1.96;
    };

    let idx = T_DEGREES
        .iter()
        .enumerate()
        .min_by(|a, b| {
            (a.1 - degrees_of_freedom)
                .abs()
                .total_cmp(&(b.1 - degrees_of_freedom).abs())
        })
        .map(|(i, _)| i)
        .unwrap_or(T_DEGREES.len() - 1);

    values[idx]
}

/// Order-sensitive string hash, stable across processes and releases.
pub fn stable_hash(input: &str) -> u64 {
    input
        .bytes()
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_posterior_never_below_prior() {
        for (a, b) in [(1.0, 1.0), (0.5, 2.0), (10.0, 3.0)] {
            for (s, f) in [(0, 0), (5, 0), (0, 7), (40, 40)] {
                let (alpha, beta) = beta_posterior(a, b, s, f);
                assert!(alpha >= a);
                assert!(beta >= b);
            }
        }
        assert_eq!(beta_posterior(1.0, 1.0, 3, 2), (4.0, 3.0));
    }

    #[test]
    fn test_beta_moments() {
        assert!((beta_mean(2.0, 2.0) - 0.5).abs() < 1e-12);
        assert!((beta_variance(2.0, 2.0) - 0.05).abs() < 1e-12);
        assert_eq!(beta_mean(0.0, 0.0), 0.0);
        assert_eq!(beta_variance(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_sample_beta_bounds_and_determinism() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let x = sample_beta(&mut rng, 3.0, 200.0);
            assert!((0.0..=1.0).contains(&x));
            let u = sample_beta(&mut rng, 1.0, 0.5);
            assert!((0.0..1.0).contains(&u));
        }

        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for _ in 0..10 {
            assert_eq!(sample_beta(&mut a, 20.0, 5.0), sample_beta(&mut b, 20.0, 5.0));
        }
    }

    #[test]
    fn test_sample_beta_centres_on_mean() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 20_000;
        let mean: f64 = (0..n).map(|_| sample_beta(&mut rng, 30.0, 70.0)).sum::<f64>() / n as f64;
        assert!((mean - 0.3).abs() < 0.01, "mean was {mean}");
    }

    #[test]
    fn test_normal_quantile_and_cdf() {
        assert!((normal_quantile(0.975) - 1.96).abs() < 1e-3);
        assert!((normal_quantile(0.025) + 1.96).abs() < 1e-3);
        assert!(normal_quantile(0.5).abs() < 1e-3);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-9);
        assert!(normal_cdf(-8.0) < 1e-6);
    }

    #[test]
    fn test_credible_interval() {
        let (lo, hi) = credible_interval(50.0, 50.0, 0.95);
        assert!(lo < 0.5 && hi > 0.5);
        assert!((0.5 - lo - (hi - 0.5)).abs() < 1e-12);

        let (lo, hi) = credible_interval(2.0, 1000.0, 0.99);
        assert!(lo >= 0.0 && hi <= 1.0);

        assert_eq!(credible_interval(0.0, 0.0, 0.95), (0.0, 0.0));
    }

    #[test]
    fn test_information_gain() {
        assert!(information_gain([0.25, 0.25, 0.25, 0.25]).abs() < 1e-12);
        assert_eq!(information_gain([0.5, 0.5, 0.0]), 0.0);
        assert_eq!(information_gain([1.0]), 0.0);
        assert_eq!(information_gain(Vec::<f64>::new()), 0.0);

        let skewed = information_gain([0.9, 0.05, 0.05]);
        let mild = information_gain([0.4, 0.3, 0.3]);
        assert!(skewed > mild);
        assert!(mild > 0.0);
    }

    #[test]
    fn test_t_value_lookup() {
        assert_eq!(t_value(0.95, 1.0), 12.706);
        assert_eq!(t_value(0.95, 28.0), 2.042);
        assert_eq!(t_value(0.95, 500.0), 1.984);
        assert_eq!(t_value(0.99, 7.0), 4.032);
        assert_eq!(t_value(0.90, 12.0), 1.812);
        assert_eq!(t_value(0.85, 30.0), 1.96);
    }

    #[test]
    fn test_stable_hash_is_order_sensitive() {
        assert_eq!(stable_hash("user-1exp"), stable_hash("user-1exp"));
        assert_ne!(stable_hash("ab"), stable_hash("ba"));
        assert_eq!(stable_hash(""), 0);
    }
}
