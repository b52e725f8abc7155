//! Statistical analysis of experiment outcomes.
//!
//! Two variants get a pooled-variance two-sample t-test; three or more get a
//! Thompson-sampling estimate of each variant's probability of being best,
//! with information gain as a sequential stopping signal. Summary statistics
//! are deterministic functions of the tallies; only the Thompson-derived
//! fields depend on the RNG.

use chrono::Utc;
use engage_core::config::ExperimentConfig;
use engage_core::stats;
use engage_core::types::{
    AnalysisMethod, AnalysisStatus, Experiment, ExperimentAnalysis, OutcomeRecord,
    VariantAnalysis,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Running sufficient statistics for one variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantTally {
    pub count: u64,
    pub conversions: u64,
    pub sum: f64,
    pub sum_sq: f64,
}

impl VariantTally {
    pub fn record(&mut self, value: f64, converted: bool) {
        self.count += 1;
        if converted {
            self.conversions += 1;
        }
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn failures(&self) -> u64 {
        self.count.saturating_sub(self.conversions)
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Unbiased sample variance; zero below two observations.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0)).max(0.0)
    }
}

/// Tunable stopping policy for the analysis.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisPolicy {
    pub thompson_draws: usize,
    pub probability_threshold: f64,
    pub information_gain_threshold: f64,
}

impl Default for AnalysisPolicy {
    fn default() -> Self {
        Self::from(&ExperimentConfig::default())
    }
}

impl From<&ExperimentConfig> for AnalysisPolicy {
    fn from(config: &ExperimentConfig) -> Self {
        Self {
            thompson_draws: config.thompson_draws.max(1),
            probability_threshold: config.probability_threshold,
            information_gain_threshold: config.information_gain_threshold,
        }
    }
}

/// Group outcome records by variant, in the experiment's variant order.
/// Records for variants no longer on the experiment are ignored.
pub fn tally_outcomes(experiment: &Experiment, records: &[OutcomeRecord]) -> Vec<(String, VariantTally)> {
    let mut tallies: Vec<(String, VariantTally)> = experiment
        .variants
        .iter()
        .map(|v| (v.id.clone(), VariantTally::default()))
        .collect();

    for record in records {
        if let Some((_, tally)) = tallies.iter_mut().find(|(id, _)| *id == record.variant_id) {
            tally.record(record.value, record.converted);
        }
    }
    tallies
}

pub fn analyze_tallies(
    experiment: &Experiment,
    tallies: &[(String, VariantTally)],
    policy: &AnalysisPolicy,
    rng: &mut impl Rng,
) -> ExperimentAnalysis {
    let prior = experiment.prior_or_default();
    let mut variants: Vec<VariantAnalysis> = tallies
        .iter()
        .map(|(id, tally)| summarize(id, tally, prior.alpha, prior.beta, experiment.confidence_level))
        .collect();

    let smallest = tallies.iter().map(|(_, t)| t.count).min().unwrap_or(0);

    let mut analysis = ExperimentAnalysis {
        experiment_id: experiment.id,
        status: AnalysisStatus::InsufficientData,
        method: AnalysisMethod::None,
        variants: Vec::new(),
        winning_variant: None,
        effect_size: 0.0,
        p_value: None,
        information_gain: None,
        recommendations: Vec::new(),
        analyzed_at: Utc::now(),
    };

    if tallies.len() < 2 || smallest < experiment.min_sample_size {
        analysis.variants = variants;
        analysis.recommendations = recommendations(experiment, &analysis, smallest);
        return analysis;
    }

    if tallies.len() == 2 {
        two_sample_test(experiment, tallies, &mut variants, &mut analysis);
    } else {
        thompson_analysis(tallies, prior.alpha, prior.beta, policy, rng, &mut variants, &mut analysis);
    }

    analysis.variants = variants;
    analysis.recommendations = recommendations(experiment, &analysis, smallest);
    analysis
}

fn summarize(id: &str, tally: &VariantTally, prior_alpha: f64, prior_beta: f64, confidence: f64) -> VariantAnalysis {
    if tally.count == 0 {
        return VariantAnalysis::empty(id);
    }
    let (alpha, beta) = stats::beta_posterior(prior_alpha, prior_beta, tally.conversions, tally.failures());
    let (lo, hi) = stats::credible_interval(alpha, beta, confidence);
    VariantAnalysis {
        variant_id: id.to_string(),
        sample_size: tally.count,
        conversions: tally.conversions,
        mean_value: tally.mean(),
        posterior_mean: stats::beta_mean(alpha, beta),
        posterior_std: stats::beta_variance(alpha, beta).sqrt(),
        interval_lower: lo,
        interval_upper: hi,
        probability_best: None,
    }
}

fn two_sample_test(
    experiment: &Experiment,
    tallies: &[(String, VariantTally)],
    variants: &mut [VariantAnalysis],
    analysis: &mut ExperimentAnalysis,
) {
    let (id_a, a) = &tallies[0];
    let (id_b, b) = &tallies[1];
    let (n1, n2) = (a.count as f64, b.count as f64);
    let diff = a.mean() - b.mean();

    let df = (n1 + n2 - 2.0).max(1.0);
    let pooled_var = ((n1 - 1.0).max(0.0) * a.variance() + (n2 - 1.0).max(0.0) * b.variance()) / df;
    let pooled_sd = pooled_var.sqrt();
    let se = pooled_sd * (1.0 / n1.max(1.0) + 1.0 / n2.max(1.0)).sqrt();

    let t_crit = stats::t_value(experiment.confidence_level, df);
    // Significance is decided against the t-table; the p-value is a normal
    // approximation reported alongside it.
    let (significant, p_value) = if se > 0.0 {
        let t_stat = diff / se;
        (t_stat.abs() > t_crit, 2.0 * (1.0 - stats::normal_cdf(t_stat.abs())))
    } else if diff.abs() > f64::EPSILON {
        // Zero variance with distinct means: perfectly separated groups.
        (true, 0.0)
    } else {
        (false, 1.0)
    };

    // Cohen's d; with zero pooled spread the raw difference is reported.
    analysis.effect_size = if pooled_sd > 0.0 {
        diff.abs() / pooled_sd
    } else {
        diff.abs()
    };
    analysis.p_value = Some(p_value.clamp(0.0, 1.0));
    analysis.method = AnalysisMethod::TwoSampleTTest;

    // Confidence intervals on each variant's mean metric value.
    for (variant, tally) in variants.iter_mut().zip([a, b]) {
        if tally.count == 0 {
            continue;
        }
        let t_crit = stats::t_value(experiment.confidence_level, (tally.count as f64 - 1.0).max(1.0));
        let half = t_crit * (tally.variance() / tally.count as f64).sqrt();
        variant.interval_lower = (tally.mean() - half).max(0.0);
        variant.interval_upper = tally.mean() + half;
    }

    if significant {
        analysis.status = AnalysisStatus::SignificantDifference;
        analysis.winning_variant = Some(if diff >= 0.0 { id_a.clone() } else { id_b.clone() });
    } else {
        analysis.status = AnalysisStatus::NoSignificantDifference;
    }
}

/// Fraction of simulated draws in which each variant's posterior sample wins.
pub fn probability_best(
    posteriors: &[(f64, f64)],
    draws: usize,
    rng: &mut impl Rng,
) -> Vec<f64> {
    let draws = draws.max(1);
    let mut wins = vec![0u64; posteriors.len()];
    for _ in 0..draws {
        let mut best = f64::NEG_INFINITY;
        let mut best_idx = 0;
        for (i, (alpha, beta)) in posteriors.iter().enumerate() {
            let sample = stats::sample_beta(rng, *alpha, *beta);
            if sample > best {
                best = sample;
                best_idx = i;
            }
        }
        if let Some(w) = wins.get_mut(best_idx) {
            *w += 1;
        }
    }
    wins.into_iter().map(|w| w as f64 / draws as f64).collect()
}

fn thompson_analysis(
    tallies: &[(String, VariantTally)],
    prior_alpha: f64,
    prior_beta: f64,
    policy: &AnalysisPolicy,
    rng: &mut impl Rng,
    variants: &mut [VariantAnalysis],
    analysis: &mut ExperimentAnalysis,
) {
    let posteriors: Vec<(f64, f64)> = tallies
        .iter()
        .map(|(_, t)| stats::beta_posterior(prior_alpha, prior_beta, t.conversions, t.failures()))
        .collect();

    let probabilities = probability_best(&posteriors, policy.thompson_draws, rng);
    let gain = stats::information_gain(probabilities.iter().copied());

    for (variant, p) in variants.iter_mut().zip(probabilities.iter()) {
        variant.probability_best = Some(*p);
    }

    let mut ranked: Vec<(usize, f64)> = probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (best_idx, best_p) = ranked[0];
    let runner_up = ranked.get(1).map(|(_, p)| *p).unwrap_or(0.0);

    analysis.method = AnalysisMethod::ThompsonSampling;
    analysis.information_gain = Some(gain);
    analysis.effect_size = best_p - runner_up;

    if best_p > policy.probability_threshold || gain > policy.information_gain_threshold {
        analysis.status = AnalysisStatus::SignificantDifference;
        analysis.winning_variant = Some(tallies[best_idx].0.clone());
    } else {
        analysis.status = AnalysisStatus::NoSignificantDifference;
    }
}

fn recommendations(experiment: &Experiment, analysis: &ExperimentAnalysis, smallest: u64) -> Vec<String> {
    match analysis.status {
        AnalysisStatus::InsufficientData => vec![
            format!(
                "Continue collecting data: every variant needs at least {} samples (smallest has {}).",
                experiment.min_sample_size, smallest
            ),
            "Keep the experiment running until the minimum sample size is reached.".to_string(),
        ],
        AnalysisStatus::NoSignificantDifference => vec![
            "No significant difference detected between variants yet.".to_string(),
            "Consider testing larger variations between variants.".to_string(),
            "Continue running the experiment to increase statistical power.".to_string(),
        ],
        AnalysisStatus::SignificantDifference => {
            let winner = analysis.winning_variant.as_deref().unwrap_or_default();
            let name = experiment
                .variant(winner)
                .map(|v| v.name.as_str())
                .unwrap_or(winner);
            let mut recs = vec![format!("Implement variant '{name}' as the winner.")];
            match analysis.method {
                AnalysisMethod::TwoSampleTTest => recs.push(format!(
                    "Observed effect size (Cohen's d): {:.2}.",
                    analysis.effect_size
                )),
                AnalysisMethod::ThompsonSampling => {
                    let p = analysis
                        .variant(winner)
                        .and_then(|v| v.probability_best)
                        .unwrap_or_default();
                    recs.push(format!(
                        "Variant '{name}' is best with estimated probability {:.1}%.",
                        p * 100.0
                    ));
                }
                AnalysisMethod::None => {}
            }
            recs
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use engage_core::types::{ExperimentStatus, Platform, TargetMetric, Variant};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn experiment(variant_ids: &[&str], min_sample_size: u64) -> Experiment {
        let now = Utc::now();
        let weight = 100.0 / variant_ids.len() as f64;
        Experiment {
            id: Uuid::new_v4(),
            name: "test".into(),
            description: String::new(),
            platform: Platform::Twitter,
            owner_id: None,
            status: ExperimentStatus::Running,
            variants: variant_ids.iter().map(|id| Variant::new(*id, *id, weight)).collect(),
            target_metric: TargetMetric::Likes,
            min_sample_size,
            confidence_level: 0.95,
            prior: None,
            information_gain: None,
            started_at: Some(now),
            ended_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn tally(conversions: u64, trials: u64) -> VariantTally {
        let mut t = VariantTally::default();
        for i in 0..trials {
            let converted = i < conversions;
            t.record(if converted { 1.0 } else { 0.0 }, converted);
        }
        t
    }

    #[test]
    fn test_tally_moments() {
        let t = tally(5, 40);
        assert_eq!(t.count, 40);
        assert_eq!(t.failures(), 35);
        assert!((t.mean() - 0.125).abs() < 1e-12);
        let expected = (5.0 * 0.875f64.powi(2) + 35.0 * 0.125f64.powi(2)) / 39.0;
        assert!((t.variance() - expected).abs() < 1e-12);
        assert_eq!(VariantTally::default().variance(), 0.0);
    }

    #[test]
    fn test_two_sample_detects_clear_winner() {
        let exp = experiment(&["A", "B"], 30);
        let tallies = vec![("A".to_string(), tally(40, 40)), ("B".to_string(), tally(5, 40))];
        let mut rng = StdRng::seed_from_u64(1);
        let analysis = analyze_tallies(&exp, &tallies, &AnalysisPolicy::default(), &mut rng);

        assert_eq!(analysis.status, AnalysisStatus::SignificantDifference);
        assert_eq!(analysis.method, AnalysisMethod::TwoSampleTTest);
        assert_eq!(analysis.winning_variant.as_deref(), Some("A"));
        assert!(analysis.effect_size > 1.0);
        assert!(analysis.p_value.unwrap() < 0.05);
        assert!(analysis.recommendations[0].contains("Implement"));
    }

    #[test]
    fn test_two_sample_identical_groups_not_significant() {
        let exp = experiment(&["A", "B"], 10);
        let tallies = vec![("A".to_string(), tally(10, 40)), ("B".to_string(), tally(10, 40))];
        let mut rng = StdRng::seed_from_u64(1);
        let analysis = analyze_tallies(&exp, &tallies, &AnalysisPolicy::default(), &mut rng);

        assert_eq!(analysis.status, AnalysisStatus::NoSignificantDifference);
        assert!(analysis.winning_variant.is_none());
        assert_eq!(analysis.effect_size, 0.0);
    }

    fn tally_values(values: &[f64]) -> VariantTally {
        let mut t = VariantTally::default();
        for v in values {
            t.record(*v, *v > 0.0);
        }
        t
    }

    #[test]
    fn test_small_samples_use_t_table_critical_value() {
        // |t| = 2.449: past the normal 1.96 but short of t(0.95, df=6) = 2.571.
        let exp = experiment(&["A", "B"], 4);
        let tallies = vec![
            ("A".to_string(), tally_values(&[2.0, 2.0, 3.0, 3.0])),
            ("B".to_string(), tally_values(&[1.0, 1.0, 2.0, 2.0])),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let analysis = analyze_tallies(&exp, &tallies, &AnalysisPolicy::default(), &mut rng);

        assert_eq!(analysis.method, AnalysisMethod::TwoSampleTTest);
        assert_eq!(analysis.status, AnalysisStatus::NoSignificantDifference);
        assert!(analysis.winning_variant.is_none());
        assert!(analysis.p_value.unwrap() < 0.05);
    }

    #[test]
    fn test_insufficient_data_with_empty_variants() {
        let exp = experiment(&["A", "B", "C"], 30);
        let tallies = tally_outcomes(&exp, &[]);
        let mut rng = StdRng::seed_from_u64(1);
        let analysis = analyze_tallies(&exp, &tallies, &AnalysisPolicy::default(), &mut rng);

        assert_eq!(analysis.status, AnalysisStatus::InsufficientData);
        assert_eq!(analysis.variants.len(), 3);
        for v in &analysis.variants {
            assert_eq!(v.sample_size, 0);
            assert_eq!(v.posterior_mean, 0.0);
            assert_eq!((v.interval_lower, v.interval_upper), (0.0, 0.0));
        }
        assert!(analysis.recommendations[0].contains("Continue collecting data"));
    }

    #[test]
    fn test_thompson_picks_dominant_variant() {
        let exp = experiment(&["A", "B", "C"], 50);
        let tallies = vec![
            ("A".to_string(), tally(10, 200)),
            ("B".to_string(), tally(80, 200)),
            ("C".to_string(), tally(12, 200)),
        ];
        let mut rng = StdRng::seed_from_u64(3);
        let analysis = analyze_tallies(&exp, &tallies, &AnalysisPolicy::default(), &mut rng);

        assert_eq!(analysis.method, AnalysisMethod::ThompsonSampling);
        assert_eq!(analysis.status, AnalysisStatus::SignificantDifference);
        assert_eq!(analysis.winning_variant.as_deref(), Some("B"));
        let p_b = analysis.variant("B").unwrap().probability_best.unwrap();
        assert!(p_b > 0.95);
        let total: f64 = analysis.variants.iter().map(|v| v.probability_best.unwrap()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_thompson_equal_variants_not_significant() {
        let exp = experiment(&["A", "B", "C"], 50);
        let tallies = vec![
            ("A".to_string(), tally(50, 500)),
            ("B".to_string(), tally(50, 500)),
            ("C".to_string(), tally(50, 500)),
        ];
        let mut rng = StdRng::seed_from_u64(5);
        let analysis = analyze_tallies(&exp, &tallies, &AnalysisPolicy::default(), &mut rng);

        assert_eq!(analysis.status, AnalysisStatus::NoSignificantDifference);
        assert!(analysis.information_gain.unwrap() < 0.10);
    }

    #[test]
    fn test_probability_estimates_tighten_with_more_draws() {
        let posteriors = vec![(21.0, 81.0), (26.0, 76.0), (18.0, 84.0)];
        let spread = |draws: usize| {
            let estimates: Vec<f64> = (0..20)
                .map(|seed| {
                    let mut rng = StdRng::seed_from_u64(seed);
                    probability_best(&posteriors, draws, &mut rng)[1]
                })
                .collect();
            let max = estimates.iter().cloned().fold(f64::MIN, f64::max);
            let min = estimates.iter().cloned().fold(f64::MAX, f64::min);
            max - min
        };
        assert!(spread(20_000) < spread(200));
    }
}
