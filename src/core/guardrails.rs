use serde::{Deserialize, Serialize};

use super::error::{EngineResult, ensure};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailSettings {
    pub initial_rate: f64,
    /// Portfolio/initial ratio at or above which spending rises.
    pub upper_guardrail: f64,
    /// Portfolio/initial ratio at or below which spending is cut.
    pub lower_guardrail: f64,
    pub prosperity_bonus: f64,
    pub austerity_reduction: f64,
    /// Years at the start of retirement in which only austerity cuts apply.
    pub guardrail_period: u32,
}

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            initial_rate: 0.04,
            upper_guardrail: 1.2,
            lower_guardrail: 0.8,
            prosperity_bonus: 0.10,
            austerity_reduction: 0.10,
            guardrail_period: 3,
        }
    }
}

impl GuardrailSettings {
    pub fn validate(&self) -> EngineResult<()> {
        ensure(
            self.initial_rate > 0.0 && self.initial_rate <= 1.0,
            "guardrails.initial_rate",
            "must be > 0% and <= 100%",
        )?;
        ensure(
            self.lower_guardrail > 0.0 && self.lower_guardrail < self.upper_guardrail,
            "guardrails.lower_guardrail",
            "must be > 0 and below the upper guardrail",
        )?;
        ensure(
            self.upper_guardrail.is_finite(),
            "guardrails.upper_guardrail",
            "must be finite",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.prosperity_bonus),
            "guardrails.prosperity_bonus",
            "must be between 0 and 1",
        )?;
        ensure(
            (0.0..1.0).contains(&self.austerity_reduction),
            "guardrails.austerity_reduction",
            "must be >= 0 and < 1",
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStatus {
    Prosperity,
    Normal,
    Austerity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailDecision {
    pub rate: f64,
    pub status: GuardrailStatus,
    pub reason: String,
}

pub fn adjust(
    current_value: f64,
    initial_value: f64,
    current_rate: f64,
    guardrails: &GuardrailSettings,
    years_in_retirement: u32,
) -> GuardrailDecision {
    let ratio = if initial_value > 0.0 {
        current_value / initial_value
    } else {
        1.0
    };

    if ratio <= guardrails.lower_guardrail {
        return GuardrailDecision {
            rate: current_rate * (1.0 - guardrails.austerity_reduction),
            status: GuardrailStatus::Austerity,
            reason: format!(
                "Portfolio at {:.0}% of initial value breached the lower guardrail; cutting rate by {:.0}%",
                ratio * 100.0,
                guardrails.austerity_reduction * 100.0
            ),
        };
    }

    if ratio >= guardrails.upper_guardrail {
        if years_in_retirement < guardrails.guardrail_period {
            return GuardrailDecision {
                rate: current_rate,
                status: GuardrailStatus::Prosperity,
                reason: format!(
                    "Upper guardrail reached but increases are held for the first {} years of retirement",
                    guardrails.guardrail_period
                ),
            };
        }
        return GuardrailDecision {
            rate: current_rate * (1.0 + guardrails.prosperity_bonus),
            status: GuardrailStatus::Prosperity,
            reason: format!(
                "Portfolio at {:.0}% of initial value crossed the upper guardrail; raising rate by {:.0}%",
                ratio * 100.0,
                guardrails.prosperity_bonus * 100.0
            ),
        };
    }

    GuardrailDecision {
        rate: current_rate,
        status: GuardrailStatus::Normal,
        reason: "Portfolio within guardrails".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    #[test]
    fn prosperity_raises_rate_after_guardrail_period() {
        let g = GuardrailSettings::default();
        let decision = adjust(1_300_000.0, 1_000_000.0, 0.04, &g, 5);
        assert_eq!(decision.status, GuardrailStatus::Prosperity);
        assert_relative_eq!(decision.rate, 0.044, epsilon = 1e-12);
    }

    #[test]
    fn prosperity_is_suppressed_early_in_retirement() {
        let g = GuardrailSettings::default();
        let decision = adjust(1_300_000.0, 1_000_000.0, 0.04, &g, 1);
        assert_eq!(decision.status, GuardrailStatus::Prosperity);
        assert_relative_eq!(decision.rate, 0.04);
        assert!(decision.reason.contains("held"));
    }

    #[test]
    fn austerity_is_never_suppressed() {
        let g = GuardrailSettings::default();
        let decision = adjust(700_000.0, 1_000_000.0, 0.05, &g, 0);
        assert_eq!(decision.status, GuardrailStatus::Austerity);
        assert_relative_eq!(decision.rate, 0.045, epsilon = 1e-12);
    }

    #[test]
    fn guardrail_boundaries_are_inclusive() {
        let g = GuardrailSettings::default();
        assert_eq!(
            adjust(1_200_000.0, 1_000_000.0, 0.04, &g, 10).status,
            GuardrailStatus::Prosperity
        );
        assert_eq!(
            adjust(800_000.0, 1_000_000.0, 0.04, &g, 10).status,
            GuardrailStatus::Austerity
        );
        assert_eq!(
            adjust(1_000_000.0, 1_000_000.0, 0.04, &g, 10).status,
            GuardrailStatus::Normal
        );
    }

    #[test]
    fn settings_reject_crossed_guardrails() {
        let g = GuardrailSettings {
            lower_guardrail: 1.3,
            ..GuardrailSettings::default()
        };
        let err = g.validate().expect_err("lower above upper");
        assert_eq!(err.field(), Some("guardrails.lower_guardrail"));
    }

    proptest! {
        #[test]
        fn prop_status_follows_ratio_bands(
            value in 0u32..3_000_000,
            years in 0u32..40,
            rate_bp in 100u32..1000,
        ) {
            let g = GuardrailSettings::default();
            let initial = 1_000_000.0;
            let ratio = value as f64 / initial;
            let decision = adjust(value as f64, initial, rate_bp as f64 / 10_000.0, &g, years);

            if ratio >= g.upper_guardrail {
                prop_assert_eq!(decision.status, GuardrailStatus::Prosperity);
            } else if ratio <= g.lower_guardrail {
                prop_assert_eq!(decision.status, GuardrailStatus::Austerity);
                prop_assert!(decision.rate < rate_bp as f64 / 10_000.0);
            } else {
                prop_assert_eq!(decision.status, GuardrailStatus::Normal);
            }
        }
    }
}
