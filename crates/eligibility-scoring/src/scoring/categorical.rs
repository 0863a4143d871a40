use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{DimensionTuple, DirectStatus, EligibilityState, StateProbabilities};
use crate::config::ConfigError;

/// Historical adverse-outcome rate for visits matching a dimension pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    pub name: String,
    /// Wildcard dimensions match anything.
    #[serde(default)]
    pub when: DimensionTuple,
    pub adverse_rate: f64,
}

impl RiskRule {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidRiskRule {
                name: self.name.clone(),
                reason: "rule name must not be blank".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.adverse_rate) {
            return Err(ConfigError::InvalidRiskRule {
                name: self.name.clone(),
                reason: format!("adverse rate {} is outside [0, 1]", self.adverse_rate),
            });
        }
        Ok(())
    }
}

/// Four-way distribution for a visit.
///
/// Direct evidence is authoritative. Without it, the historical propensity is split between
/// eligible and not-eligible, and a missing propensity leaves everything unestablished.
pub fn resolve_states(
    direct: Option<DirectStatus>,
    probability: Option<f64>,
) -> StateProbabilities {
    match direct {
        Some(DirectStatus::Yes) => StateProbabilities::certain(EligibilityState::Eligible),
        Some(DirectStatus::No) => StateProbabilities::certain(EligibilityState::NotEligible),
        Some(DirectStatus::NoInfo) => StateProbabilities::certain(EligibilityState::NoInfo),
        None => match probability {
            Some(probability) => StateProbabilities::from_propensity(probability),
            None => StateProbabilities::unestablished(),
        },
    }
}

/// Risk sub-probabilities for a visit; the highest rate wins when rule names repeat.
pub fn risk_probabilities(rules: &[RiskRule], dimensions: &DimensionTuple) -> BTreeMap<String, f64> {
    let mut risks: BTreeMap<String, f64> = BTreeMap::new();
    for rule in rules.iter().filter(|rule| rule.when.matches(dimensions)) {
        let entry = risks.entry(rule.name.clone()).or_insert(0.0);
        *entry = entry.max(rule.adverse_rate);
    }
    risks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::domain::Dimension;

    fn rule(name: &str, when: DimensionTuple, adverse_rate: f64) -> RiskRule {
        RiskRule {
            name: name.to_string(),
            when,
            adverse_rate,
        }
    }

    #[test]
    fn direct_evidence_takes_all_mass() {
        let yes = resolve_states(Some(DirectStatus::Yes), Some(0.2));
        assert_eq!(yes.eligible, 1.0);
        assert_eq!(yes.total(), 1.0);

        let no = resolve_states(Some(DirectStatus::No), None);
        assert_eq!(no.not_eligible, 1.0);

        let no_info = resolve_states(Some(DirectStatus::NoInfo), Some(0.6));
        assert_eq!(no_info.no_info, 1.0);
    }

    #[test]
    fn propensity_splits_between_binary_states() {
        let states = resolve_states(None, Some(0.7));
        assert!((states.eligible - 0.7).abs() < 1e-12);
        assert!((states.not_eligible - 0.3).abs() < 1e-12);
        assert!((states.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn missing_propensity_is_unestablished() {
        assert_eq!(resolve_states(None, None).unestablished, 1.0);
    }

    #[test]
    fn risk_rules_match_on_dimension_subsets() {
        let visit = DimensionTuple::default()
            .with(Dimension::Payer, "MEDICAID")
            .with(Dimension::VisitType, "imaging");
        let rules = vec![
            rule(
                "prior_authorization",
                DimensionTuple::default().with(Dimension::VisitType, "imaging"),
                0.35,
            ),
            rule(
                "prior_authorization",
                DimensionTuple::default().with(Dimension::Payer, "MEDICAID"),
                0.5,
            ),
            rule(
                "out_of_network",
                DimensionTuple::default().with(Dimension::Plan, "HMO"),
                0.2,
            ),
            rule("timely_filing", DimensionTuple::global(), 0.05),
        ];

        let risks = risk_probabilities(&rules, &visit);

        assert_eq!(risks.get("prior_authorization"), Some(&0.5));
        assert_eq!(risks.get("timely_filing"), Some(&0.05));
        assert!(!risks.contains_key("out_of_network"));
    }

    #[test]
    fn rule_validation_rejects_rates_above_one() {
        let invalid = rule("denial", DimensionTuple::global(), 1.2);
        assert!(matches!(
            invalid.validate(),
            Err(ConfigError::InvalidRiskRule { .. })
        ));
    }
}
