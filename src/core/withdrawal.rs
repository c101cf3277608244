use log::trace;
use serde::{Deserialize, Serialize};

use super::error::{EngineResult, ensure};
use super::types::MarketCondition;

const STRONG_RETURN: f64 = 0.08;
const WEAK_RETURN: f64 = 0.02;
const STRESSED_HEALTH: f64 = 0.9;
const HIGH_VOLATILITY: f64 = 0.25;
const LOW_VOLATILITY: f64 = 0.12;
const HIGH_INFLATION: f64 = 0.04;
const INFLATION_ANCHOR: f64 = 0.025;

const STRONG_RETURN_STEP: f64 = 0.005;
const WEAK_RETURN_STEP: f64 = -0.010;
const HEALTHY_STEP: f64 = 0.003;
const STRESSED_STEP: f64 = -0.008;
const HIGH_VOLATILITY_STEP: f64 = -0.003;
const LOW_VOLATILITY_STEP: f64 = 0.002;
const MAX_INFLATION_STEP: f64 = 0.005;

/// 0.1 percentage points.
const RATE_PRECISION: f64 = 0.001;

const BASE_CONFIDENCE: i32 = 50;
const NO_HISTORY_CONFIDENCE: u8 = 30;
const STEADY_CONFIDENCE: u8 = 80;
const MAX_CONFIDENCE: i32 = 95;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRule {
    pub name: String,
    pub min_rate: f64,
    pub base_rate: f64,
    pub max_rate: f64,
    /// Share of the raw adjustment that is applied, 0-1.
    pub adjustment_factor: f64,
    /// Portfolio health ratio above which the portfolio counts as healthy.
    pub safety_buffer: f64,
    pub lookback_years: u32,
}

impl WithdrawalRule {
    pub fn new(
        name: &str,
        min_rate: f64,
        base_rate: f64,
        max_rate: f64,
        adjustment_factor: f64,
        safety_buffer: f64,
        lookback_years: u32,
    ) -> EngineResult<Self> {
        let rule = Self {
            name: name.to_string(),
            min_rate,
            base_rate,
            max_rate,
            adjustment_factor,
            safety_buffer,
            lookback_years,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> EngineResult<()> {
        ensure(
            self.min_rate.is_finite() && self.min_rate >= 0.0,
            "withdrawal_rule.min_rate",
            "must be a finite number >= 0",
        )?;
        ensure(
            self.max_rate.is_finite() && self.max_rate <= 1.0,
            "withdrawal_rule.max_rate",
            "must be a finite number <= 100%",
        )?;
        ensure(
            self.min_rate <= self.base_rate && self.base_rate <= self.max_rate,
            "withdrawal_rule.base_rate",
            "must satisfy min_rate <= base_rate <= max_rate",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.adjustment_factor),
            "withdrawal_rule.adjustment_factor",
            "must be between 0 and 1",
        )?;
        ensure(
            self.safety_buffer.is_finite() && self.safety_buffer > 0.0,
            "withdrawal_rule.safety_buffer",
            "must be > 0",
        )?;
        ensure(
            self.lookback_years > 0,
            "withdrawal_rule.lookback_years",
            "must be > 0",
        )
    }

    pub fn catalog() -> Vec<WithdrawalRule> {
        vec![
            Self::preset("conservative", 0.030, 0.035, 0.045, 0.5, 1.2, 5),
            Self::preset("balanced", 0.035, 0.040, 0.055, 0.7, 1.1, 3),
            Self::preset("aggressive", 0.040, 0.050, 0.070, 1.0, 1.0, 2),
        ]
    }

    pub fn from_catalog(name: &str) -> Option<WithdrawalRule> {
        Self::catalog()
            .into_iter()
            .find(|rule| rule.name.eq_ignore_ascii_case(name))
    }

    fn preset(
        name: &str,
        min_rate: f64,
        base_rate: f64,
        max_rate: f64,
        adjustment_factor: f64,
        safety_buffer: f64,
        lookback_years: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            min_rate,
            base_rate,
            max_rate,
            adjustment_factor,
            safety_buffer,
            lookback_years,
        }
    }

    pub fn clamp_rate(&self, rate: f64) -> f64 {
        rate.clamp(self.min_rate, self.max_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRecommendation {
    pub rate: f64,
    pub reason: String,
    /// 0-95.
    pub confidence: u8,
}

/// Recommend next period's withdrawal rate from recent market history.
///
/// Only the last `rule.lookback_years` entries are considered, and portfolio
/// health is the latest portfolio value relative to `initial_value`.
pub fn recommend(
    current_rate: f64,
    history: &[MarketCondition],
    rule: &WithdrawalRule,
    initial_value: f64,
) -> RateRecommendation {
    let window_start = history.len().saturating_sub(rule.lookback_years as usize);
    let window = &history[window_start..];

    let Some(latest) = window.last() else {
        return RateRecommendation {
            rate: current_rate,
            reason: "Insufficient market history; keeping current rate".to_string(),
            confidence: NO_HISTORY_CONFIDENCE,
        };
    };

    let count = window.len() as f64;
    let avg_return = window.iter().map(|c| c.annual_return).sum::<f64>() / count;
    let avg_volatility = window.iter().map(|c| c.volatility).sum::<f64>() / count;
    let health = if initial_value > 0.0 {
        latest.portfolio_value / initial_value
    } else {
        1.0
    };

    let mut adjustment = 0.0;
    let mut confidence = BASE_CONFIDENCE;
    let mut reasons = Vec::new();

    if avg_return > STRONG_RETURN {
        adjustment += STRONG_RETURN_STEP;
        confidence += 10;
        reasons.push(format!(
            "strong average return of {:.1}%",
            avg_return * 100.0
        ));
    } else if avg_return < WEAK_RETURN {
        adjustment += WEAK_RETURN_STEP;
        confidence += 15;
        reasons.push(format!("weak average return of {:.1}%", avg_return * 100.0));
    }

    if health > rule.safety_buffer {
        adjustment += HEALTHY_STEP;
        confidence += 10;
        reasons.push(format!(
            "portfolio at {:.0}% of initial value",
            health * 100.0
        ));
    } else if health < STRESSED_HEALTH {
        adjustment += STRESSED_STEP;
        confidence += 20;
        reasons.push(format!(
            "portfolio down to {:.0}% of initial value",
            health * 100.0
        ));
    }

    if avg_volatility > HIGH_VOLATILITY {
        adjustment += HIGH_VOLATILITY_STEP;
        confidence += 5;
        reasons.push(format!(
            "high volatility of {:.1}%",
            avg_volatility * 100.0
        ));
    } else if avg_volatility < LOW_VOLATILITY {
        adjustment += LOW_VOLATILITY_STEP;
        confidence += 5;
        reasons.push(format!("low volatility of {:.1}%", avg_volatility * 100.0));
    }

    if latest.inflation > HIGH_INFLATION {
        adjustment += MAX_INFLATION_STEP.min(latest.inflation - INFLATION_ANCHOR);
        confidence -= 5;
        reasons.push(format!(
            "inflation of {:.1}% eroding purchasing power",
            latest.inflation * 100.0
        ));
    }

    let proposed = current_rate + adjustment * rule.adjustment_factor;
    let rate = rule.clamp_rate(round_rate(rule.clamp_rate(proposed)));
    let change = rate - current_rate;

    trace!(
        "rule {}: avg_return={avg_return:.4} health={health:.3} avg_vol={avg_volatility:.4} \
         adjustment={adjustment:.4} rate {current_rate:.4} -> {rate:.4}",
        rule.name
    );

    if change.abs() < RATE_PRECISION - 1e-9 {
        return RateRecommendation {
            rate,
            reason: "No significant adjustment needed".to_string(),
            confidence: STEADY_CONFIDENCE,
        };
    }

    let direction = if change > 0.0 { "Increase" } else { "Decrease" };
    let detail = if reasons.is_empty() {
        "rate brought within rule bounds".to_string()
    } else {
        reasons.join("; ")
    };

    RateRecommendation {
        rate,
        reason: format!("{direction} by {:.1}pp: {detail}", change.abs() * 100.0),
        confidence: confidence.clamp(0, MAX_CONFIDENCE) as u8,
    }
}

fn round_rate(rate: f64) -> f64 {
    (rate / RATE_PRECISION).round() * RATE_PRECISION
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::{prop_assert, proptest};

    fn balanced() -> WithdrawalRule {
        WithdrawalRule::from_catalog("balanced").expect("catalog rule")
    }

    fn condition(annual_return: f64, value: f64, volatility: f64, inflation: f64) -> MarketCondition {
        MarketCondition {
            year: 2030,
            annual_return,
            portfolio_value: value,
            volatility,
            inflation,
            withdrawal_amount: 40_000.0,
        }
    }

    #[test]
    fn empty_history_keeps_rate_with_low_confidence() {
        let rec = recommend(0.042, &[], &balanced(), 1_000_000.0);
        assert_relative_eq!(rec.rate, 0.042);
        assert_eq!(rec.confidence, NO_HISTORY_CONFIDENCE);
    }

    #[test]
    fn strong_healthy_calm_market_raises_rate() {
        let history = vec![condition(0.12, 1_300_000.0, 0.10, 0.025); 3];
        let rec = recommend(0.040, &history, &balanced(), 1_000_000.0);

        assert_relative_eq!(rec.rate, 0.047, epsilon = 1e-12);
        assert_eq!(rec.confidence, 75);
        assert!(rec.reason.starts_with("Increase by 0.7pp"));
        assert!(rec.reason.contains("strong average return"));
        assert!(rec.reason.contains("low volatility"));
    }

    #[test]
    fn stressed_market_cuts_rate_to_rule_minimum() {
        let history = vec![condition(-0.05, 800_000.0, 0.30, 0.05); 3];
        let rec = recommend(0.040, &history, &balanced(), 1_000_000.0);

        assert_relative_eq!(rec.rate, 0.035, epsilon = 1e-12);
        assert_eq!(rec.confidence, 85);
        assert!(rec.reason.starts_with("Decrease"));
        assert!(rec.reason.contains("inflation"));
    }

    #[test]
    fn only_lookback_window_is_considered() {
        let mut history = vec![condition(-0.30, 600_000.0, 0.40, 0.02); 10];
        history.extend(vec![condition(0.05, 1_050_000.0, 0.15, 0.02); 3]);
        let rec = recommend(0.040, &history, &balanced(), 1_000_000.0);

        assert_relative_eq!(rec.rate, 0.040, epsilon = 1e-12);
        assert_eq!(rec.reason, "No significant adjustment needed");
        assert_eq!(rec.confidence, STEADY_CONFIDENCE);
    }

    #[test]
    fn adjustment_factor_dampens_change() {
        let history = vec![condition(0.12, 1_300_000.0, 0.10, 0.025); 5];
        let mut rule = balanced();
        rule.max_rate = 0.08;

        rule.adjustment_factor = 1.0;
        let full = recommend(0.040, &history, &rule, 1_000_000.0);
        rule.adjustment_factor = 0.5;
        let half = recommend(0.040, &history, &rule, 1_000_000.0);

        assert_relative_eq!(full.rate, 0.050, epsilon = 1e-12);
        assert_relative_eq!(half.rate, 0.045, epsilon = 1e-12);
    }

    #[test]
    fn high_inflation_adds_capped_increment() {
        let history = vec![condition(0.05, 1_000_000.0, 0.15, 0.045)];
        let mut rule = balanced();
        rule.adjustment_factor = 1.0;
        let rec = recommend(0.040, &history, &rule, 1_000_000.0);

        // min(0.5pp, 4.5% - 2.5%) = 0.5pp
        assert_relative_eq!(rec.rate, 0.045, epsilon = 1e-12);
        assert_eq!(rec.confidence, 45);
    }

    #[test]
    fn out_of_bounds_current_rate_is_pulled_into_range() {
        let history = vec![condition(0.05, 1_000_000.0, 0.15, 0.02)];
        let rec = recommend(0.09, &history, &balanced(), 1_000_000.0);
        assert_relative_eq!(rec.rate, 0.055, epsilon = 1e-12);
        assert!(rec.reason.contains("within rule bounds"));
    }

    #[test]
    fn rule_validation_rejects_inverted_bounds() {
        let err = WithdrawalRule::new("bad", 0.05, 0.04, 0.06, 0.5, 1.1, 3)
            .expect_err("base below min");
        assert_eq!(err.field(), Some("withdrawal_rule.base_rate"));

        let err = WithdrawalRule::new("bad", 0.03, 0.04, 0.06, 1.5, 1.1, 3)
            .expect_err("factor above one");
        assert_eq!(err.field(), Some("withdrawal_rule.adjustment_factor"));
    }

    #[test]
    fn catalog_rules_are_valid() {
        for rule in WithdrawalRule::catalog() {
            rule.validate().expect("catalog rule must validate");
        }
        assert!(WithdrawalRule::from_catalog("Conservative").is_some());
        assert!(WithdrawalRule::from_catalog("reckless").is_none());
    }

    proptest! {
        #[test]
        fn prop_recommended_rate_stays_within_rule_bounds(
            current_bp in 0u32..1500,
            returns in proptest::collection::vec(-4000i32..6000, 0..8),
            health_pct in 10u32..300,
            vol_bp in 0u32..6000,
            inflation_bp in 0u32..1500,
            rule_index in 0usize..3,
        ) {
            let rule = WithdrawalRule::catalog()[rule_index].clone();
            let history: Vec<MarketCondition> = returns
                .iter()
                .map(|r| condition(
                    *r as f64 / 10_000.0,
                    health_pct as f64 * 10_000.0,
                    vol_bp as f64 / 10_000.0,
                    inflation_bp as f64 / 10_000.0,
                ))
                .collect();

            let rec = recommend(current_bp as f64 / 10_000.0, &history, &rule, 1_000_000.0);
            if history.is_empty() {
                prop_assert!((rec.rate - current_bp as f64 / 10_000.0).abs() < 1e-12);
            } else {
                prop_assert!(rec.rate >= rule.min_rate - 1e-12);
                prop_assert!(rec.rate <= rule.max_rate + 1e-12);
            }
            prop_assert!(rec.confidence <= 95);
        }
    }
}
