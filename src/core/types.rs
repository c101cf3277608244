use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::{EngineResult, ensure, ensure_finite};
use super::guardrails::GuardrailSettings;
use super::tax::preservation_age;
use super::withdrawal::WithdrawalRule;

const MAX_AGE: u32 = 120;
const SPLIT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub name: String,
    pub birth_year: i32,
    pub current_age: u32,
    pub current_balance: f64,
    /// Net amount added to super each working year when no salary is given.
    pub annual_contribution: f64,
    /// Gross salary; when present, contributions come from the contribution rules.
    pub annual_salary: Option<f64>,
    pub voluntary_contribution: f64,
    pub target_retirement_age: u32,
    pub preservation_age: u32,
}

impl Person {
    pub fn new(
        name: &str,
        birth_year: i32,
        current_age: u32,
        current_balance: f64,
        annual_contribution: f64,
        target_retirement_age: u32,
    ) -> EngineResult<Self> {
        let person = Self {
            name: name.to_string(),
            birth_year,
            current_age,
            current_balance,
            annual_contribution,
            annual_salary: None,
            voluntary_contribution: 0.0,
            target_retirement_age,
            preservation_age: preservation_age(birth_year),
        };
        person.validate("person")?;
        Ok(person)
    }

    pub fn with_salary(
        mut self,
        annual_salary: f64,
        voluntary_contribution: f64,
    ) -> EngineResult<Self> {
        self.annual_salary = Some(annual_salary);
        self.voluntary_contribution = voluntary_contribution;
        self.validate("person")?;
        Ok(self)
    }

    pub fn validate(&self, prefix: &str) -> EngineResult<()> {
        let field = |name: &str| format!("{prefix}.{name}");

        ensure(
            self.current_age <= MAX_AGE,
            &field("current_age"),
            "must be <= 120",
        )?;
        ensure(
            self.target_retirement_age <= MAX_AGE,
            &field("target_retirement_age"),
            "must be <= 120",
        )?;
        ensure(
            self.preservation_age <= MAX_AGE,
            &field("preservation_age"),
            "must be <= 120",
        )?;
        ensure_finite(self.current_balance, &field("current_balance"))?;
        ensure(
            self.current_balance >= 0.0,
            &field("current_balance"),
            "must be >= 0",
        )?;
        ensure_finite(self.annual_contribution, &field("annual_contribution"))?;
        ensure(
            self.annual_contribution >= 0.0,
            &field("annual_contribution"),
            "must be >= 0",
        )?;
        ensure_finite(self.voluntary_contribution, &field("voluntary_contribution"))?;
        ensure(
            self.voluntary_contribution >= 0.0,
            &field("voluntary_contribution"),
            "must be >= 0",
        )?;
        if let Some(salary) = self.annual_salary {
            ensure(
                salary.is_finite() && salary >= 0.0,
                &field("annual_salary"),
                "must be a finite number >= 0",
            )?;
        }
        Ok(())
    }

    pub fn age_at(&self, year_index: u32) -> u32 {
        self.current_age + year_index
    }

    /// Year index (from projection start) in which this person no longer works.
    pub fn stop_work_index(&self) -> u32 {
        self.target_retirement_age.saturating_sub(self.current_age)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MortgageTerms {
    pub principal: f64,
    pub annual_rate: f64,
    pub remaining_years: u32,
}

impl MortgageTerms {
    pub fn validate(&self) -> EngineResult<()> {
        ensure(
            self.principal.is_finite() && self.principal >= 0.0,
            "mortgage.principal",
            "must be a finite number >= 0",
        )?;
        ensure(
            (0.0..=0.25).contains(&self.annual_rate),
            "mortgage.annual_rate",
            "must be between 0% and 25%",
        )?;
        ensure(
            self.principal <= 0.0 || self.remaining_years > 0,
            "mortgage.remaining_years",
            "must be > 0 while principal is outstanding",
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineSettings {
    pub person1: Person,
    pub person2: Person,
    /// Calendar year of projection year index 0.
    pub start_year: i32,
    pub expected_return_mean: f64,
    pub expected_return_volatility: f64,
    pub inflation_rate: f64,
    pub safe_withdrawal_rate: f64,
    pub planning_age: u32,
    pub mortgage: Option<MortgageTerms>,
}

impl BaselineSettings {
    pub fn validate(&self) -> EngineResult<()> {
        self.person1.validate("person1")?;
        self.person2.validate("person2")?;

        ensure_finite(self.expected_return_mean, "expected_return_mean")?;
        ensure(
            (-0.5..=0.5).contains(&self.expected_return_mean),
            "expected_return_mean",
            "must be between -50% and 50%",
        )?;
        ensure_finite(self.expected_return_volatility, "expected_return_volatility")?;
        ensure(
            self.expected_return_volatility >= 0.0,
            "expected_return_volatility",
            "must be >= 0",
        )?;
        ensure(
            (0.0..=0.10).contains(&self.inflation_rate),
            "inflation_rate",
            "must be between 0% and 10%",
        )?;
        ensure(
            self.safe_withdrawal_rate > 0.0 && self.safe_withdrawal_rate <= 0.20,
            "safe_withdrawal_rate",
            "must be > 0% and <= 20%",
        )?;
        ensure(
            self.planning_age <= MAX_AGE,
            "planning_age",
            "must be <= 120",
        )?;
        ensure(
            self.planning_age > self.person1.current_age
                && self.planning_age > self.person2.current_age,
            "planning_age",
            "must be greater than both persons' current ages",
        )?;
        if let Some(mortgage) = &self.mortgage {
            mortgage.validate()?;
        }
        Ok(())
    }

    /// Projection length in years: until the younger person reaches the planning age.
    pub fn horizon_years(&self) -> u32 {
        let youngest = self.person1.current_age.min(self.person2.current_age);
        self.planning_age.saturating_sub(youngest)
    }

    pub fn combined_balance(&self) -> f64 {
        self.person1.current_balance + self.person2.current_balance
    }

    pub fn year_for_index(&self, year_index: u32) -> i32 {
        self.start_year + year_index as i32
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationTarget {
    Super,
    MortgagePayoff,
    TaxableInvestment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LumpSumEvent {
    /// Positive for income or gifts, negative for planned expenses.
    pub amount: f64,
    pub date: NaiveDate,
    pub allocation: AllocationTarget,
    pub person1_share_pct: f64,
    pub person2_share_pct: f64,
}

impl LumpSumEvent {
    pub fn new(
        amount: f64,
        date: NaiveDate,
        allocation: AllocationTarget,
        person1_share_pct: f64,
        person2_share_pct: f64,
    ) -> EngineResult<Self> {
        let event = Self {
            amount,
            date,
            allocation,
            person1_share_pct,
            person2_share_pct,
        };
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> EngineResult<()> {
        ensure_finite(self.amount, "lump_sum_event.amount")?;
        ensure(
            self.person1_share_pct >= 0.0 && self.person2_share_pct >= 0.0,
            "lump_sum_event.split",
            "split percentages must be >= 0",
        )?;
        let total = self.person1_share_pct + self.person2_share_pct;
        ensure(
            (total - 100.0).abs() <= SPLIT_TOLERANCE,
            "lump_sum_event.split",
            "split percentages must sum to 100",
        )
    }

    pub fn person1_fraction(&self) -> f64 {
        self.person1_share_pct / 100.0
    }

    pub fn person2_fraction(&self) -> f64 {
        self.person2_share_pct / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScenarioMode {
    TargetIncome { target_annual_income: f64 },
    TargetDate { target_retirement_date: NaiveDate },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WithdrawalPolicy {
    /// Baseline safe withdrawal rate, held constant.
    #[default]
    FixedRate,
    Dynamic { rule: WithdrawalRule },
    Guardrails { settings: GuardrailSettings },
}

impl WithdrawalPolicy {
    pub fn initial_rate(&self, safe_withdrawal_rate: f64) -> f64 {
        match self {
            Self::FixedRate => safe_withdrawal_rate,
            Self::Dynamic { rule } => rule.base_rate,
            Self::Guardrails { settings } => settings.initial_rate,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        match self {
            Self::FixedRate => Ok(()),
            Self::Dynamic { rule } => rule.validate(),
            Self::Guardrails { settings } => settings.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub mode: ScenarioMode,
    pub monte_carlo_runs: u32,
    pub lump_sum_events: Vec<LumpSumEvent>,
    pub withdrawal_policy: WithdrawalPolicy,
    pub seed: Option<u64>,
}

impl Scenario {
    pub fn new(name: &str, mode: ScenarioMode, monte_carlo_runs: u32) -> EngineResult<Self> {
        let scenario = Self {
            name: name.to_string(),
            mode,
            monte_carlo_runs,
            lump_sum_events: Vec::new(),
            withdrawal_policy: WithdrawalPolicy::default(),
            seed: None,
        };
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn with_events(mut self, events: Vec<LumpSumEvent>) -> EngineResult<Self> {
        self.lump_sum_events = events;
        self.validate()?;
        Ok(self)
    }

    pub fn with_policy(mut self, policy: WithdrawalPolicy) -> EngineResult<Self> {
        self.withdrawal_policy = policy;
        self.validate()?;
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        ensure(
            self.monte_carlo_runs > 0,
            "monte_carlo_runs",
            "must be > 0",
        )?;
        if let ScenarioMode::TargetIncome {
            target_annual_income,
        } = self.mode
        {
            ensure(
                target_annual_income.is_finite() && target_annual_income > 0.0,
                "target_annual_income",
                "must be a finite number > 0",
            )?;
        }
        for event in &self.lump_sum_events {
            event.validate()?;
        }
        self.withdrawal_policy.validate()
    }
}

/// One simulated year of market history as seen by the withdrawal engines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketCondition {
    pub year: i32,
    pub annual_return: f64,
    pub portfolio_value: f64,
    pub volatility: f64,
    pub inflation: f64,
    pub withdrawal_amount: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileBand {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

impl PercentileBand {
    pub fn width(&self) -> f64 {
        self.p90 - self.p10
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyProjection {
    pub year: i32,
    pub year_index: u32,
    pub person1_age: u32,
    pub person2_age: u32,
    pub person1_balance: PercentileBand,
    pub person2_balance: PercentileBand,
    pub taxable_balance: PercentileBand,
    pub combined_balance: PercentileBand,
    /// Income actually drawn in the year (zero while working).
    pub income: PercentileBand,
    /// Income the combined balance would sustain if retirement started this year.
    pub achievable_income: PercentileBand,
    pub depleted_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeOutcome {
    TargetIncome {
        target_annual_income: f64,
        median_retirement_year: Option<i32>,
        p10_retirement_year: Option<i32>,
        p90_retirement_year: Option<i32>,
    },
    TargetDate {
        target_retirement_date: NaiveDate,
        median_sustainable_income: f64,
        p10_sustainable_income: f64,
        p90_sustainable_income: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub scenario_name: String,
    pub runs: u32,
    pub seed: u64,
    pub success_rate: f64,
    pub outcome: ModeOutcome,
    pub yearly: Vec<YearlyProjection>,
    pub final_balance_histogram: Vec<HistogramBin>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn person_new_derives_preservation_age_from_birth_year() {
        let person = Person::new("Alex", 1962, 63, 400_000.0, 0.0, 65).expect("valid person");
        assert_eq!(person.preservation_age, 58);

        let younger = Person::new("Sam", 1985, 40, 100_000.0, 20_000.0, 60).expect("valid person");
        assert_eq!(younger.preservation_age, 60);
    }

    #[test]
    fn person_rejects_negative_balance() {
        let err = Person::new("Alex", 1980, 45, -1.0, 0.0, 60).expect_err("negative balance");
        assert_eq!(err.field(), Some("person.current_balance"));
    }

    #[test]
    fn stop_work_index_saturates_for_retired_person() {
        let person = Person::new("Alex", 1955, 70, 100_000.0, 0.0, 65).expect("valid person");
        assert_eq!(person.stop_work_index(), 0);
    }

    #[test]
    fn lump_sum_split_must_sum_to_one_hundred() {
        let err = LumpSumEvent::new(
            50_000.0,
            date(2030, 1, 1),
            AllocationTarget::Super,
            60.0,
            30.0,
        )
        .expect_err("split of 90 must fail");
        assert_eq!(err.field(), Some("lump_sum_event.split"));

        let ok = LumpSumEvent::new(
            -20_000.0,
            date(2030, 1, 1),
            AllocationTarget::TaxableInvestment,
            50.0,
            50.0,
        )
        .expect("valid expense event");
        assert!((ok.person1_fraction() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn scenario_rejects_zero_runs_and_non_positive_target_income() {
        let err = Scenario::new(
            "none",
            ScenarioMode::TargetIncome {
                target_annual_income: 80_000.0,
            },
            0,
        )
        .expect_err("zero runs");
        assert_eq!(err.field(), Some("monte_carlo_runs"));

        let err = Scenario::new(
            "zero target",
            ScenarioMode::TargetIncome {
                target_annual_income: 0.0,
            },
            100,
        )
        .expect_err("zero target");
        assert_eq!(err.field(), Some("target_annual_income"));
    }

    #[test]
    fn scenario_mode_serializes_with_tag() {
        let mode = ScenarioMode::TargetDate {
            target_retirement_date: date(2040, 7, 1),
        };
        let json = serde_json::to_string(&mode).expect("serialize");
        assert!(json.contains("\"mode\":\"target_date\""));
        assert!(json.contains("\"target_retirement_date\":\"2040-07-01\""));
    }
}
