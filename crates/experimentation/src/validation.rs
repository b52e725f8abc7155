use engage_core::error::{EngineError, EngineResult};
use engage_core::types::{BetaPrior, Variant};
use std::collections::HashSet;

pub const MIN_CONFIDENCE: f64 = 0.80;
pub const MAX_CONFIDENCE: f64 = 0.99;
pub const WEIGHT_TOTAL: f64 = 100.0;
pub const WEIGHT_TOLERANCE: f64 = 0.01;

/// Check every experiment invariant. Run on create and on every update.
pub fn validate_definition(
    name: &str,
    variants: &[Variant],
    confidence_level: f64,
    prior: Option<&BetaPrior>,
) -> EngineResult<()> {
    if name.trim().is_empty() {
        return Err(EngineError::validation("experiment name must not be empty"));
    }

    validate_variants(variants)?;

    if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&confidence_level) {
        return Err(EngineError::validation(format!(
            "confidence level {confidence_level} outside [{MIN_CONFIDENCE}, {MAX_CONFIDENCE}]"
        )));
    }

    if let Some(prior) = prior {
        let valid = |x: f64| x.is_finite() && x > 0.0;
        if !valid(prior.alpha) || !valid(prior.beta) {
            return Err(EngineError::validation(format!(
                "prior parameters must be positive, got alpha={} beta={}",
                prior.alpha, prior.beta
            )));
        }
    }

    Ok(())
}

pub fn validate_variants(variants: &[Variant]) -> EngineResult<()> {
    if variants.len() < 2 {
        return Err(EngineError::validation(format!(
            "experiment needs at least two variants, got {}",
            variants.len()
        )));
    }

    let mut seen = HashSet::new();
    for variant in variants {
        if variant.id.trim().is_empty() {
            return Err(EngineError::validation("variant id must not be empty"));
        }
        if !seen.insert(variant.id.as_str()) {
            return Err(EngineError::validation(format!(
                "duplicate variant id '{}'",
                variant.id
            )));
        }
        if !variant.weight.is_finite() || !(0.0..=WEIGHT_TOTAL).contains(&variant.weight) {
            return Err(EngineError::validation(format!(
                "variant '{}' weight {} outside [0, 100]",
                variant.id, variant.weight
            )));
        }
    }

    let total: f64 = variants.iter().map(|v| v.weight).sum();
    if (total - WEIGHT_TOTAL).abs() > WEIGHT_TOLERANCE {
        return Err(EngineError::validation(format!(
            "variant weights sum to {total}, expected 100"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variants(weights: &[f64]) -> Vec<Variant> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| Variant::new(format!("v{i}"), format!("Variant {i}"), *w))
            .collect()
    }

    #[test]
    fn test_weight_sum_tolerance() {
        assert!(validate_variants(&variants(&[50.0, 50.0])).is_ok());
        assert!(validate_variants(&variants(&[33.33, 33.33, 33.34])).is_ok());
        assert!(validate_variants(&variants(&[50.0, 50.005])).is_ok());
        assert!(validate_variants(&variants(&[50.0, 49.98])).is_err());
        assert!(validate_variants(&variants(&[60.0, 50.0])).is_err());
    }

    #[test]
    fn test_variant_shape() {
        assert!(validate_variants(&variants(&[100.0])).is_err());
        assert!(validate_variants(&variants(&[120.0, -20.0])).is_err());

        let mut dup = variants(&[50.0, 50.0]);
        dup[1].id = "v0".into();
        assert!(validate_variants(&dup).is_err());
    }

    #[test]
    fn test_confidence_and_prior() {
        let v = variants(&[50.0, 50.0]);
        assert!(validate_definition("x", &v, 0.80, None).is_ok());
        assert!(validate_definition("x", &v, 0.99, None).is_ok());
        assert!(validate_definition("x", &v, 0.79, None).is_err());
        assert!(validate_definition("x", &v, 0.995, None).is_err());
        assert!(validate_definition(" ", &v, 0.95, None).is_err());

        let bad_prior = BetaPrior { alpha: 0.0, beta: 1.0 };
        assert!(validate_definition("x", &v, 0.95, Some(&bad_prior)).is_err());
    }
}
