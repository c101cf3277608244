use serde::{Deserialize, Serialize};

use super::annuity::spend_to_zero_withdrawal;
use super::error::{EngineResult, ensure, ensure_finite};

/// Combined balance below which the pool counts as exhausted.
const EXHAUSTION_THRESHOLD: f64 = 1.0;

/// Years simulated past the planning age before giving up on exhaustion.
const OVERRUN_YEARS: u32 = 5;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalOrdering {
    /// Drain person 1 fully, then person 2.
    #[default]
    Sequential,
    /// Split each draw by current balance share.
    Proportional,
    /// Reserved for tax-aware ordering; draws sequentially for now.
    OptimizeTax,
}

impl WithdrawalOrdering {
    pub fn description(self) -> &'static str {
        match self {
            Self::Sequential => "Sequential: draw person 1's balance to zero, then person 2's",
            Self::Proportional => "Proportional: split each withdrawal by current balance share",
            Self::OptimizeTax => {
                "Optimize tax: not yet tax-aware, drawing person 1 first then person 2"
            }
        }
    }

    /// Returns the amounts drawn from person 1 and person 2.
    fn split(self, amount: f64, balance1: f64, balance2: f64) -> (f64, f64) {
        match self {
            Self::Sequential | Self::OptimizeTax => {
                let from1 = amount.min(balance1);
                let from2 = (amount - from1).min(balance2);
                (from1, from2)
            }
            Self::Proportional => {
                let total = balance1 + balance2;
                if total <= 0.0 {
                    return (0.0, 0.0);
                }
                let from1 = (amount * balance1 / total).min(balance1);
                let from2 = (amount - from1).min(balance2);
                (from1, from2)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperSpendSettings {
    pub person1_balance: f64,
    pub person2_balance: f64,
    pub start_age: u32,
    pub planning_age: u32,
    pub nominal_return: f64,
    pub inflation_rate: f64,
    pub annual_expenses: f64,
    pub ordering: WithdrawalOrdering,
}

impl SuperSpendSettings {
    pub fn validate(&self) -> EngineResult<()> {
        for (field, value) in [
            ("person1_balance", self.person1_balance),
            ("person2_balance", self.person2_balance),
            ("annual_expenses", self.annual_expenses),
        ] {
            ensure_finite(value, field)?;
            ensure(value >= 0.0, field, "must be >= 0")?;
        }
        ensure(
            self.planning_age > self.start_age,
            "planning_age",
            "must be greater than start age",
        )?;
        ensure(self.planning_age <= 120, "planning_age", "must be <= 120")?;
        ensure(
            (-0.5..=0.5).contains(&self.nominal_return),
            "nominal_return",
            "must be between -50% and 50%",
        )?;
        ensure(
            (0.0..=0.10).contains(&self.inflation_rate),
            "inflation_rate",
            "must be between 0% and 10%",
        )
    }

    pub fn years_to_live(&self) -> u32 {
        self.planning_age - self.start_age
    }

    pub fn real_return(&self) -> f64 {
        self.nominal_return - self.inflation_rate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendZeroYear {
    pub year: u32,
    pub age: u32,
    pub withdrawal: f64,
    pub person1_withdrawal: f64,
    pub person2_withdrawal: f64,
    pub person1_balance: f64,
    pub person2_balance: f64,
    pub combined_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendZeroProjection {
    pub years_to_live: u32,
    pub real_return: f64,
    pub initial_withdrawal: f64,
    pub exhaustion_age: Option<u32>,
    pub years_simulated: u32,
    pub strategy_description: String,
    pub success_probability: f64,
    pub yearly: Vec<SpendZeroYear>,
}

pub fn simulate(settings: &SuperSpendSettings) -> EngineResult<SpendZeroProjection> {
    settings.validate()?;

    let years_to_live = settings.years_to_live();
    let real_return = settings.real_return();
    let mut balance1 = settings.person1_balance;
    let mut balance2 = settings.person2_balance;

    let initial_withdrawal = spend_to_zero_withdrawal(
        balance1 + balance2,
        years_to_live,
        real_return,
        settings.annual_expenses,
    );

    if settings.ordering == WithdrawalOrdering::OptimizeTax {
        log::warn!("optimize_tax ordering has no tax-aware logic; drawing sequentially");
    }

    let mut yearly = Vec::with_capacity((years_to_live + OVERRUN_YEARS) as usize);
    let mut exhaustion_age = None;
    if balance1 + balance2 < EXHAUSTION_THRESHOLD {
        exhaustion_age = Some(settings.start_age);
    }

    let mut year = 0;
    while exhaustion_age.is_none() && year < years_to_live + OVERRUN_YEARS {
        year += 1;
        balance1 *= 1.0 + settings.nominal_return;
        balance2 *= 1.0 + settings.nominal_return;

        let target =
            initial_withdrawal * (1.0 + settings.inflation_rate).powi(year as i32 - 1);
        let (from1, from2) = settings.ordering.split(target, balance1, balance2);
        balance1 -= from1;
        balance2 -= from2;

        let combined = balance1 + balance2;
        yearly.push(SpendZeroYear {
            year,
            age: settings.start_age + year,
            withdrawal: from1 + from2,
            person1_withdrawal: from1,
            person2_withdrawal: from2,
            person1_balance: balance1,
            person2_balance: balance2,
            combined_balance: combined,
        });

        if combined < EXHAUSTION_THRESHOLD {
            exhaustion_age = Some(settings.start_age + year);
        }
    }

    let success_probability = success_probability(exhaustion_age, settings.planning_age);
    log::info!(
        "spend-to-zero withdrawal={initial_withdrawal:.2} exhaustion_age={exhaustion_age:?} success={success_probability:.2}"
    );

    Ok(SpendZeroProjection {
        years_to_live,
        real_return,
        initial_withdrawal,
        exhaustion_age,
        years_simulated: year,
        strategy_description: settings.ordering.description().to_string(),
        success_probability,
        yearly,
    })
}

/// Coarse heuristic from how close exhaustion came to the planning age.
pub fn success_probability(exhaustion_age: Option<u32>, planning_age: u32) -> f64 {
    let Some(age) = exhaustion_age else {
        return 0.95;
    };
    if age >= planning_age {
        return 0.90;
    }
    match planning_age - age {
        0..=2 => 0.75,
        3..=5 => 0.50,
        _ => 0.25,
    }
}
