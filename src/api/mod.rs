use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{
    AllocationTarget, BaselineSettings, BridgeLumpSumEvent, BridgePerson, EngineError,
    GuardrailSettings, HouseholdStrategy, LumpSumEvent, LumpSumFunding, MarketCondition,
    MortgageTerms, Person, Pre60FireSettings, RateRecommendation, Scenario, ScenarioMode,
    SuperSpendSettings, WithdrawalOrdering, WithdrawalPolicy, WithdrawalRule, bridge, engine,
    preservation_age, spend_zero, withdrawal,
};

const DEFAULT_RULE: &str = "balanced";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Request(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

fn request_error(message: &str) -> ApiError {
    ApiError::Request(message.to_string())
}

#[derive(Parser, Debug)]
#[command(
    name = "retire-sim",
    about = "Retirement funding simulator (Monte Carlo projections, bridge funding, spend-to-zero)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Simulate {
        #[command(flatten)]
        io: IoArgs,
        #[arg(long, help = "Override the seed given in the request")]
        seed: Option<u64>,
        #[arg(long, help = "Override the number of Monte Carlo runs")]
        runs: Option<u32>,
    },
    Bridge {
        #[command(flatten)]
        io: IoArgs,
    },
    SpendToZero {
        #[command(flatten)]
        io: IoArgs,
    },
    RecommendRate {
        #[command(flatten)]
        io: IoArgs,
    },
    Rules {
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct IoArgs {
    #[arg(long, help = "JSON request file; reads stdin when omitted")]
    pub input: Option<PathBuf>,
    #[arg(long)]
    pub pretty: bool,
}

pub fn run(cli: Cli) -> Result<String, ApiError> {
    match cli.command {
        Command::Simulate { io, seed, runs } => {
            let raw = read_input(io.input.as_deref())?;
            let result = simulate_from_json(&raw, SimulateOverrides { seed, runs })?;
            render(&result, io.pretty)
        }
        Command::Bridge { io } => {
            let raw = read_input(io.input.as_deref())?;
            let settings = bridge_settings_from_json(&raw)?;
            render(&bridge::project(&settings)?, io.pretty)
        }
        Command::SpendToZero { io } => {
            let raw = read_input(io.input.as_deref())?;
            let settings = spend_settings_from_json(&raw)?;
            render(&spend_zero::simulate(&settings)?, io.pretty)
        }
        Command::RecommendRate { io } => {
            let raw = read_input(io.input.as_deref())?;
            render(&recommend_from_json(&raw)?, io.pretty)
        }
        Command::Rules { pretty } => render(&WithdrawalRule::catalog(), pretty),
    }
}

fn read_input(path: Option<&Path>) -> Result<String, ApiError> {
    match path {
        Some(path) => Ok(fs::read_to_string(path)?),
        None => {
            let mut raw = String::new();
            io::stdin().read_to_string(&mut raw)?;
            Ok(raw)
        }
    }
}

fn render<T: Serialize>(value: &T, pretty: bool) -> Result<String, ApiError> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}

fn pct(value: f64) -> f64 {
    value / 100.0
}

fn current_year() -> i32 {
    Utc::now().year()
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiWithdrawalStrategy {
    FixedRate,
    Dynamic,
    Guardrails,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiAllocationTarget {
    Super,
    MortgagePayoff,
    TaxableInvestment,
}

impl From<ApiAllocationTarget> for AllocationTarget {
    fn from(value: ApiAllocationTarget) -> Self {
        match value {
            ApiAllocationTarget::Super => AllocationTarget::Super,
            ApiAllocationTarget::MortgagePayoff => AllocationTarget::MortgagePayoff,
            ApiAllocationTarget::TaxableInvestment => AllocationTarget::TaxableInvestment,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PersonPayload {
    name: Option<String>,
    birth_year: Option<i32>,
    current_age: Option<u32>,
    balance: Option<f64>,
    annual_contribution: Option<f64>,
    annual_salary: Option<f64>,
    voluntary_contribution: Option<f64>,
    retirement_age: Option<u32>,
}

struct PersonDefaults {
    name: &'static str,
    current_age: u32,
    balance: f64,
    annual_contribution: f64,
    retirement_age: u32,
}

const PERSON1_DEFAULTS: PersonDefaults = PersonDefaults {
    name: "Person 1",
    current_age: 45,
    balance: 300_000.0,
    annual_contribution: 20_000.0,
    retirement_age: 60,
};

const PERSON2_DEFAULTS: PersonDefaults = PersonDefaults {
    name: "Person 2",
    current_age: 43,
    balance: 200_000.0,
    annual_contribution: 15_000.0,
    retirement_age: 60,
};

impl PersonPayload {
    fn into_person(
        self,
        defaults: &PersonDefaults,
        start_year: i32,
        prefix: &str,
    ) -> Result<Person, ApiError> {
        let current_age = self.current_age.unwrap_or(defaults.current_age);
        let birth_year = self.birth_year.unwrap_or(start_year - current_age as i32);
        let person = Person {
            name: self.name.unwrap_or_else(|| defaults.name.to_string()),
            birth_year,
            current_age,
            current_balance: self.balance.unwrap_or(defaults.balance),
            annual_contribution: self
                .annual_contribution
                .unwrap_or(defaults.annual_contribution),
            annual_salary: self.annual_salary,
            voluntary_contribution: self.voluntary_contribution.unwrap_or(0.0),
            target_retirement_age: self.retirement_age.unwrap_or(defaults.retirement_age),
            preservation_age: preservation_age(birth_year),
        };
        person.validate(prefix)?;
        Ok(person)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MortgagePayload {
    principal: Option<f64>,
    rate: Option<f64>,
    remaining_years: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LumpSumPayload {
    amount: Option<f64>,
    date: Option<NaiveDate>,
    allocation: Option<ApiAllocationTarget>,
    person1_share: Option<f64>,
    person2_share: Option<f64>,
}

impl LumpSumPayload {
    fn into_event(self) -> Result<LumpSumEvent, ApiError> {
        let amount = self
            .amount
            .ok_or_else(|| request_error("lumpSumEvents.amount is required"))?;
        let date = self
            .date
            .ok_or_else(|| request_error("lumpSumEvents.date is required"))?;
        let (person1_share, person2_share) = match (self.person1_share, self.person2_share) {
            (None, None) => (50.0, 50.0),
            (Some(p1), None) => (p1, 100.0 - p1),
            (None, Some(p2)) => (100.0 - p2, p2),
            (Some(p1), Some(p2)) => (p1, p2),
        };
        Ok(LumpSumEvent::new(
            amount,
            date,
            self.allocation
                .map_or(AllocationTarget::Super, AllocationTarget::from),
            person1_share,
            person2_share,
        )?)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GuardrailPayload {
    initial_rate: Option<f64>,
    upper_guardrail: Option<f64>,
    lower_guardrail: Option<f64>,
    prosperity_bonus: Option<f64>,
    austerity_reduction: Option<f64>,
    guardrail_period: Option<u32>,
}

impl GuardrailPayload {
    fn into_settings(self) -> GuardrailSettings {
        let defaults = GuardrailSettings::default();
        GuardrailSettings {
            initial_rate: self.initial_rate.map_or(defaults.initial_rate, pct),
            upper_guardrail: self.upper_guardrail.map_or(defaults.upper_guardrail, pct),
            lower_guardrail: self.lower_guardrail.map_or(defaults.lower_guardrail, pct),
            prosperity_bonus: self.prosperity_bonus.map_or(defaults.prosperity_bonus, pct),
            austerity_reduction: self
                .austerity_reduction
                .map_or(defaults.austerity_reduction, pct),
            guardrail_period: self.guardrail_period.unwrap_or(defaults.guardrail_period),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    person1: PersonPayload,
    person2: PersonPayload,
    start_year: Option<i32>,
    expected_return: Option<f64>,
    volatility: Option<f64>,
    inflation: Option<f64>,
    safe_withdrawal_rate: Option<f64>,
    planning_age: Option<u32>,
    mortgage: Option<MortgagePayload>,

    scenario_name: Option<String>,
    target_annual_income: Option<f64>,
    target_retirement_date: Option<NaiveDate>,
    monte_carlo_runs: Option<u32>,
    seed: Option<u64>,
    lump_sum_events: Vec<LumpSumPayload>,

    withdrawal_strategy: Option<ApiWithdrawalStrategy>,
    withdrawal_rule: Option<String>,
    guardrails: GuardrailPayload,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SimulateOverrides {
    pub seed: Option<u64>,
    pub runs: Option<u32>,
}

fn build_simulation(
    payload: SimulatePayload,
    overrides: SimulateOverrides,
) -> Result<(BaselineSettings, Scenario), ApiError> {
    let start_year = payload.start_year.unwrap_or_else(current_year);
    let person1 = payload
        .person1
        .into_person(&PERSON1_DEFAULTS, start_year, "person1")?;
    let person2 = payload
        .person2
        .into_person(&PERSON2_DEFAULTS, start_year, "person2")?;

    let mortgage = payload.mortgage.map(|m| MortgageTerms {
        principal: m.principal.unwrap_or(0.0),
        annual_rate: m.rate.map_or(0.06, pct),
        remaining_years: m.remaining_years.unwrap_or(25),
    });

    let baseline = BaselineSettings {
        person1,
        person2,
        start_year,
        expected_return_mean: pct(payload.expected_return.unwrap_or(7.0)),
        expected_return_volatility: pct(payload.volatility.unwrap_or(12.0)),
        inflation_rate: pct(payload.inflation.unwrap_or(2.5)),
        safe_withdrawal_rate: pct(payload.safe_withdrawal_rate.unwrap_or(4.0)),
        planning_age: payload.planning_age.unwrap_or(90),
        mortgage,
    };
    baseline.validate()?;

    let mode = match (payload.target_annual_income, payload.target_retirement_date) {
        (Some(_), Some(_)) => {
            return Err(request_error(
                "targetAnnualIncome and targetRetirementDate are mutually exclusive",
            ));
        }
        (Some(target_annual_income), None) => ScenarioMode::TargetIncome {
            target_annual_income,
        },
        (None, Some(target_retirement_date)) => ScenarioMode::TargetDate {
            target_retirement_date,
        },
        (None, None) => {
            return Err(request_error(
                "one of targetAnnualIncome or targetRetirementDate is required",
            ));
        }
    };

    let policy = match payload.withdrawal_strategy {
        None | Some(ApiWithdrawalStrategy::FixedRate) => {
            if payload.withdrawal_rule.is_some() {
                return Err(request_error(
                    "withdrawalRule requires withdrawalStrategy \"dynamic\"",
                ));
            }
            WithdrawalPolicy::FixedRate
        }
        Some(ApiWithdrawalStrategy::Dynamic) => WithdrawalPolicy::Dynamic {
            rule: lookup_rule(payload.withdrawal_rule.as_deref())?,
        },
        Some(ApiWithdrawalStrategy::Guardrails) => WithdrawalPolicy::Guardrails {
            settings: payload.guardrails.into_settings(),
        },
    };

    let events = payload
        .lump_sum_events
        .into_iter()
        .map(LumpSumPayload::into_event)
        .collect::<Result<Vec<_>, _>>()?;

    let name = payload
        .scenario_name
        .unwrap_or_else(|| "Scenario".to_string());
    let runs = overrides
        .runs
        .or(payload.monte_carlo_runs)
        .unwrap_or(1_000);
    let mut scenario = Scenario::new(&name, mode, runs)?
        .with_events(events)?
        .with_policy(policy)?;
    if let Some(seed) = overrides.seed.or(payload.seed) {
        scenario = scenario.with_seed(seed);
    }

    Ok((baseline, scenario))
}

fn lookup_rule(name: Option<&str>) -> Result<WithdrawalRule, ApiError> {
    let name = name.unwrap_or(DEFAULT_RULE);
    WithdrawalRule::from_catalog(name).ok_or_else(|| {
        ApiError::Request(format!(
            "unknown withdrawal rule '{name}' (expected conservative, balanced or aggressive)"
        ))
    })
}

pub fn simulate_from_json(
    raw: &str,
    overrides: SimulateOverrides,
) -> Result<crate::core::SimulationResult, ApiError> {
    let payload: SimulatePayload = serde_json::from_str(raw)?;
    let (baseline, scenario) = build_simulation(payload, overrides)?;
    Ok(engine::simulate(&baseline, &scenario)?)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiHouseholdStrategy {
    BothSimultaneous,
    Staggered,
    LumpSumBridge,
    SinglePerson,
}

impl From<ApiHouseholdStrategy> for HouseholdStrategy {
    fn from(value: ApiHouseholdStrategy) -> Self {
        match value {
            ApiHouseholdStrategy::BothSimultaneous => HouseholdStrategy::BothSimultaneous,
            ApiHouseholdStrategy::Staggered => HouseholdStrategy::Staggered,
            ApiHouseholdStrategy::LumpSumBridge => HouseholdStrategy::LumpSumBridge,
            ApiHouseholdStrategy::SinglePerson => HouseholdStrategy::SinglePerson,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BridgePersonPayload {
    current_age: Option<u32>,
    fire_age: Option<u32>,
    birth_year: Option<i32>,
    preservation_age: Option<u32>,
    super_balance: Option<f64>,
    annual_super_contribution: Option<f64>,
    annual_salary: Option<f64>,
    part_time_income: Option<f64>,
}

impl BridgePersonPayload {
    fn into_person(self, prefix: &str) -> Result<BridgePerson, ApiError> {
        let current_age = self
            .current_age
            .ok_or_else(|| ApiError::Request(format!("{prefix}.currentAge is required")))?;
        let preservation = match (self.preservation_age, self.birth_year) {
            (Some(age), _) => age,
            (None, Some(year)) => preservation_age(year),
            (None, None) => 60,
        };
        Ok(BridgePerson {
            current_age,
            fire_age: self.fire_age.unwrap_or(current_age),
            preservation_age: preservation,
            super_balance: self.super_balance.unwrap_or(0.0),
            annual_super_contribution: self.annual_super_contribution.unwrap_or(0.0),
            annual_salary: self.annual_salary.unwrap_or(0.0),
            part_time_income: self.part_time_income.unwrap_or(0.0),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BridgeEventPayload {
    amount: Option<f64>,
    years_from_now: Option<u32>,
    probability: Option<f64>,
    tax_rate: Option<f64>,
}

impl BridgeEventPayload {
    fn into_event(self) -> Result<BridgeLumpSumEvent, ApiError> {
        Ok(BridgeLumpSumEvent {
            amount: self
                .amount
                .ok_or_else(|| request_error("lumpSumEvents.amount is required"))?,
            years_from_now: self
                .years_from_now
                .ok_or_else(|| request_error("lumpSumEvents.yearsFromNow is required"))?,
            probability: self.probability.map_or(1.0, pct),
            tax_rate: self.tax_rate.map_or(0.0, pct),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BridgePayload {
    person1: BridgePersonPayload,
    person2: Option<BridgePersonPayload>,
    strategy: Option<ApiHouseholdStrategy>,
    annual_expenses: Option<f64>,
    investment_income: Option<f64>,
    expected_return: Option<f64>,
    inflation: Option<f64>,
    advanced_lump_sums: bool,
    flat_lump_sum: Option<f64>,
    lump_sum_events: Option<Vec<BridgeEventPayload>>,
}

fn build_bridge_settings(payload: BridgePayload) -> Result<Pre60FireSettings, ApiError> {
    let lump_sum = match (
        payload.advanced_lump_sums,
        payload.flat_lump_sum,
        payload.lump_sum_events,
    ) {
        (_, Some(_), Some(_)) => {
            return Err(request_error(
                "flatLumpSum and lumpSumEvents are mutually exclusive",
            ));
        }
        (true, None, Some(events)) => LumpSumFunding::Events {
            events: events
                .into_iter()
                .map(BridgeEventPayload::into_event)
                .collect::<Result<Vec<_>, _>>()?,
        },
        (true, _, None) => {
            return Err(request_error(
                "lumpSumEvents is required when advancedLumpSums is enabled",
            ));
        }
        (false, _, Some(_)) => {
            return Err(request_error(
                "lumpSumEvents requires advancedLumpSums to be enabled",
            ));
        }
        (false, amount, None) => LumpSumFunding::Flat {
            amount: amount.unwrap_or(0.0),
        },
    };

    let person2 = payload
        .person2
        .map(|p| p.into_person("person2"))
        .transpose()?;
    let default_strategy = if person2.is_some() {
        HouseholdStrategy::BothSimultaneous
    } else {
        HouseholdStrategy::SinglePerson
    };

    Ok(Pre60FireSettings {
        person1: payload.person1.into_person("person1")?,
        person2,
        strategy: payload
            .strategy
            .map_or(default_strategy, HouseholdStrategy::from),
        annual_expenses: payload.annual_expenses.unwrap_or(60_000.0),
        investment_income: payload.investment_income.unwrap_or(0.0),
        expected_return: pct(payload.expected_return.unwrap_or(7.0)),
        inflation_rate: pct(payload.inflation.unwrap_or(2.5)),
        lump_sum,
    })
}

pub fn bridge_settings_from_json(raw: &str) -> Result<Pre60FireSettings, ApiError> {
    let payload: BridgePayload = serde_json::from_str(raw)?;
    let settings = build_bridge_settings(payload)?;
    settings.validate()?;
    Ok(settings)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiWithdrawalOrdering {
    Sequential,
    Proportional,
    OptimizeTax,
}

impl From<ApiWithdrawalOrdering> for WithdrawalOrdering {
    fn from(value: ApiWithdrawalOrdering) -> Self {
        match value {
            ApiWithdrawalOrdering::Sequential => WithdrawalOrdering::Sequential,
            ApiWithdrawalOrdering::Proportional => WithdrawalOrdering::Proportional,
            ApiWithdrawalOrdering::OptimizeTax => WithdrawalOrdering::OptimizeTax,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SpendPayload {
    person1_balance: Option<f64>,
    person2_balance: Option<f64>,
    start_age: Option<u32>,
    planning_age: Option<u32>,
    nominal_return: Option<f64>,
    inflation: Option<f64>,
    annual_expenses: Option<f64>,
    ordering: Option<ApiWithdrawalOrdering>,
}

pub fn spend_settings_from_json(raw: &str) -> Result<SuperSpendSettings, ApiError> {
    let payload: SpendPayload = serde_json::from_str(raw)?;
    let settings = SuperSpendSettings {
        person1_balance: payload.person1_balance.unwrap_or(0.0),
        person2_balance: payload.person2_balance.unwrap_or(0.0),
        start_age: payload.start_age.unwrap_or(60),
        planning_age: payload.planning_age.unwrap_or(90),
        nominal_return: pct(payload.nominal_return.unwrap_or(6.0)),
        inflation_rate: pct(payload.inflation.unwrap_or(2.5)),
        annual_expenses: payload.annual_expenses.unwrap_or(0.0),
        ordering: payload
            .ordering
            .map_or(WithdrawalOrdering::default(), WithdrawalOrdering::from),
    };
    settings.validate()?;
    Ok(settings)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MarketConditionPayload {
    year: i32,
    annual_return: f64,
    portfolio_value: f64,
    volatility: f64,
    inflation: f64,
    withdrawal_amount: f64,
}

impl From<MarketConditionPayload> for MarketCondition {
    fn from(value: MarketConditionPayload) -> Self {
        MarketCondition {
            year: value.year,
            annual_return: pct(value.annual_return),
            portfolio_value: value.portfolio_value,
            volatility: pct(value.volatility),
            inflation: pct(value.inflation),
            withdrawal_amount: value.withdrawal_amount,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RecommendPayload {
    current_rate: Option<f64>,
    rule: Option<String>,
    initial_value: Option<f64>,
    history: Vec<MarketConditionPayload>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendResponse {
    pub rule: WithdrawalRule,
    pub recommendation: RateRecommendation,
}

pub fn recommend_from_json(raw: &str) -> Result<RecommendResponse, ApiError> {
    let payload: RecommendPayload = serde_json::from_str(raw)?;
    let rule = lookup_rule(payload.rule.as_deref())?;
    let current_rate = payload.current_rate.map_or(rule.base_rate, pct);
    if !current_rate.is_finite() || current_rate < 0.0 {
        return Err(request_error("currentRate must be a finite number >= 0"));
    }
    let initial_value = payload.initial_value.unwrap_or(0.0);
    if !initial_value.is_finite() || initial_value < 0.0 {
        return Err(request_error("initialValue must be a finite number >= 0"));
    }

    let history = payload
        .history
        .into_iter()
        .map(MarketCondition::from)
        .collect::<Vec<_>>();
    let recommendation = withdrawal::recommend(current_rate, &history, &rule, initial_value);
    Ok(RecommendResponse {
        rule,
        recommendation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ModeOutcome;
    use std::io::Write;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn build(json: &str) -> Result<(BaselineSettings, Scenario), ApiError> {
        let payload: SimulatePayload = serde_json::from_str(json)?;
        build_simulation(payload, SimulateOverrides::default())
    }

    #[test]
    fn simulate_payload_parses_camel_case_and_converts_percentages() {
        let json = r#"{
          "person1": { "name": "Alex", "currentAge": 50, "balance": 400000, "retirementAge": 58 },
          "person2": { "currentAge": 48, "birthYear": 1977, "annualSalary": 120000, "voluntaryContribution": 5000 },
          "startYear": 2025,
          "expectedReturn": 6.5,
          "volatility": 14,
          "inflation": 3,
          "safeWithdrawalRate": 4.5,
          "planningAge": 95,
          "mortgage": { "principal": 250000, "rate": 5.5, "remainingYears": 20 },
          "targetAnnualIncome": 90000,
          "monteCarloRuns": 250,
          "seed": 7,
          "withdrawalStrategy": "dynamic",
          "withdrawalRule": "Conservative"
        }"#;
        let (baseline, scenario) = build(json).expect("valid request");

        assert_eq!(baseline.person1.name, "Alex");
        assert_eq!(baseline.person1.birth_year, 1975);
        assert_eq!(baseline.person1.preservation_age, 60);
        assert_eq!(baseline.person2.name, "Person 2");
        assert_eq!(baseline.person2.annual_salary, Some(120_000.0));
        assert_approx(baseline.expected_return_mean, 0.065);
        assert_approx(baseline.expected_return_volatility, 0.14);
        assert_approx(baseline.inflation_rate, 0.03);
        assert_approx(baseline.safe_withdrawal_rate, 0.045);
        assert_eq!(baseline.planning_age, 95);
        let mortgage = baseline.mortgage.expect("mortgage");
        assert_approx(mortgage.annual_rate, 0.055);
        assert_eq!(mortgage.remaining_years, 20);

        assert_eq!(scenario.monte_carlo_runs, 250);
        assert_eq!(scenario.seed, Some(7));
        assert_eq!(
            scenario.mode,
            ScenarioMode::TargetIncome {
                target_annual_income: 90_000.0
            }
        );
        match &scenario.withdrawal_policy {
            WithdrawalPolicy::Dynamic { rule } => assert_eq!(rule.name, "conservative"),
            other => panic!("unexpected policy {other:?}"),
        }
    }

    #[test]
    fn overrides_take_precedence_over_payload() {
        let payload: SimulatePayload =
            serde_json::from_str(r#"{ "targetAnnualIncome": 50000, "seed": 1, "monteCarloRuns": 10 }"#)
                .expect("json");
        let (_, scenario) = build_simulation(
            payload,
            SimulateOverrides {
                seed: Some(99),
                runs: Some(3),
            },
        )
        .expect("valid");
        assert_eq!(scenario.seed, Some(99));
        assert_eq!(scenario.monte_carlo_runs, 3);
    }

    #[test]
    fn target_fields_are_mutually_exclusive_and_required() {
        let err = build(r#"{ "targetAnnualIncome": 50000, "targetRetirementDate": "2040-01-01" }"#)
            .expect_err("both targets");
        assert!(err.to_string().contains("mutually exclusive"));

        let err = build("{}").expect_err("no target");
        assert!(err.to_string().contains("is required"));

        let (_, scenario) = build(r#"{ "targetRetirementDate": "2040-01-01" }"#).expect("date");
        assert!(matches!(scenario.mode, ScenarioMode::TargetDate { .. }));
    }

    #[test]
    fn lump_sum_split_defaults_and_validation() {
        let (_, scenario) = build(
            r#"{
              "targetAnnualIncome": 50000,
              "lumpSumEvents": [
                { "amount": 80000, "date": "2030-05-01" },
                { "amount": -30000, "date": "2032-01-01", "allocation": "taxable-investment", "person1Share": 70 }
              ]
            }"#,
        )
        .expect("valid events");
        assert_approx(scenario.lump_sum_events[0].person1_share_pct, 50.0);
        assert_eq!(scenario.lump_sum_events[0].allocation, AllocationTarget::Super);
        assert_approx(scenario.lump_sum_events[1].person2_share_pct, 30.0);

        let err = build(
            r#"{
              "targetAnnualIncome": 50000,
              "lumpSumEvents": [
                { "amount": 80000, "date": "2030-05-01", "person1Share": 60, "person2Share": 30 }
              ]
            }"#,
        )
        .expect_err("split of 90");
        match err {
            ApiError::Engine(engine_err) => {
                assert_eq!(engine_err.field(), Some("lump_sum_event.split"))
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn invalid_person_reports_prefixed_field() {
        let err = build(r#"{ "targetAnnualIncome": 50000, "person2": { "balance": -5 } }"#)
            .expect_err("negative balance");
        assert_eq!(err.to_string(), "invalid person2.current_balance: must be >= 0");
    }

    #[test]
    fn withdrawal_rule_requires_dynamic_strategy_and_known_name() {
        let err = build(r#"{ "targetAnnualIncome": 50000, "withdrawalRule": "balanced" }"#)
            .expect_err("rule without dynamic");
        assert!(err.to_string().contains("withdrawalRule"));

        let err = build(
            r#"{ "targetAnnualIncome": 50000, "withdrawalStrategy": "dynamic", "withdrawalRule": "yolo" }"#,
        )
        .expect_err("unknown rule");
        assert!(err.to_string().contains("unknown withdrawal rule"));
    }

    #[test]
    fn guardrail_payload_overlays_defaults() {
        let (_, scenario) = build(
            r#"{
              "targetAnnualIncome": 50000,
              "withdrawalStrategy": "guardrails",
              "guardrails": { "initialRate": 5, "upperGuardrail": 125 }
            }"#,
        )
        .expect("valid");
        let WithdrawalPolicy::Guardrails { settings } = scenario.withdrawal_policy else {
            panic!("expected guardrails policy");
        };
        assert_approx(settings.initial_rate, 0.05);
        assert_approx(settings.upper_guardrail, 1.25);
        assert_approx(settings.lower_guardrail, 0.8);
    }

    #[test]
    fn simulate_from_json_runs_end_to_end() {
        let json = r#"{
          "person1": { "currentAge": 60, "balance": 600000, "retirementAge": 60, "birthYear": 1965 },
          "person2": { "currentAge": 60, "balance": 400000, "retirementAge": 60, "birthYear": 1965 },
          "startYear": 2025,
          "targetRetirementDate": "2025-07-01",
          "monteCarloRuns": 40
        }"#;
        let result = simulate_from_json(
            json,
            SimulateOverrides {
                seed: Some(5),
                runs: None,
            },
        )
        .expect("simulation");

        assert_eq!(result.runs, 40);
        assert_eq!(result.seed, 5);
        assert_eq!(result.yearly.len(), 30);
        assert!(matches!(result.outcome, ModeOutcome::TargetDate { .. }));

        let rendered = render(&result, false).expect("render");
        assert!(rendered.contains("\"successRate\""));
        assert!(rendered.contains("\"finalBalanceHistogram\""));
    }

    #[test]
    fn bridge_payload_enforces_lump_sum_modes() {
        let err = bridge_settings_from_json(
            r#"{
              "person1": { "currentAge": 50, "fireAge": 52 },
              "flatLumpSum": 100000,
              "lumpSumEvents": []
            }"#,
        )
        .expect_err("both modes");
        assert!(err.to_string().contains("mutually exclusive"));

        let err = bridge_settings_from_json(
            r#"{ "person1": { "currentAge": 50, "fireAge": 52 }, "advancedLumpSums": true }"#,
        )
        .expect_err("advanced without events");
        assert!(err.to_string().contains("lumpSumEvents is required"));

        let settings = bridge_settings_from_json(
            r#"{
              "person1": { "currentAge": 50, "fireAge": 52, "birthYear": 1962 },
              "advancedLumpSums": true,
              "lumpSumEvents": [ { "amount": 100000, "yearsFromNow": 3, "probability": 80, "taxRate": 10 } ]
            }"#,
        )
        .expect("valid");
        assert_eq!(settings.strategy, HouseholdStrategy::SinglePerson);
        assert_eq!(settings.person1.preservation_age, 58);
        let LumpSumFunding::Events { events } = &settings.lump_sum else {
            panic!("expected events");
        };
        assert_approx(events[0].expected_value(), 72_000.0);
    }

    #[test]
    fn bridge_events_require_amount_and_timing() {
        let err = bridge_settings_from_json(
            r#"{
              "person1": { "currentAge": 50, "fireAge": 52 },
              "advancedLumpSums": true,
              "lumpSumEvents": [ { "yearsFromNow": 3 } ]
            }"#,
        )
        .expect_err("missing amount");
        assert_eq!(err.to_string(), "lumpSumEvents.amount is required");

        let err = bridge_settings_from_json(
            r#"{
              "person1": { "currentAge": 50, "fireAge": 52 },
              "advancedLumpSums": true,
              "lumpSumEvents": [ { "amount": 50000 } ]
            }"#,
        )
        .expect_err("missing timing");
        assert_eq!(err.to_string(), "lumpSumEvents.yearsFromNow is required");
    }

    #[test]
    fn bridge_payload_rejects_fire_age_before_current_age() {
        let err = bridge_settings_from_json(
            r#"{
              "person1": { "currentAge": 50, "fireAge": 52 },
              "person2": { "currentAge": 48, "fireAge": 40 },
              "strategy": "staggered"
            }"#,
        )
        .expect_err("fire age in the past");
        assert_eq!(err.to_string(), "invalid person2.fire_age: must be >= current age");
    }

    #[test]
    fn spend_payload_parses_ordering_and_rates() {
        let settings = spend_settings_from_json(
            r#"{
              "person1Balance": 700000,
              "person2Balance": 300000,
              "startAge": 62,
              "planningAge": 95,
              "nominalReturn": 6.5,
              "inflation": 2.5,
              "annualExpenses": 55000,
              "ordering": "optimize-tax"
            }"#,
        )
        .expect("valid");
        assert_eq!(settings.ordering, WithdrawalOrdering::OptimizeTax);
        assert_approx(settings.nominal_return, 0.065);
        assert_approx(settings.real_return(), 0.04);
        assert_eq!(settings.years_to_live(), 33);
    }

    #[test]
    fn recommend_converts_history_percentages() {
        let response = recommend_from_json(
            r#"{
              "rule": "aggressive",
              "currentRate": 5,
              "initialValue": 1000000,
              "history": [
                { "year": 2024, "annualReturn": 12, "portfolioValue": 1100000, "volatility": 15, "inflation": 3 },
                { "year": 2025, "annualReturn": 10, "portfolioValue": 1150000, "volatility": 15, "inflation": 3 }
              ]
            }"#,
        )
        .expect("valid");

        assert_eq!(response.rule.name, "aggressive");
        // +0.5pp for strong returns, +0.3pp for health above the buffer.
        assert_approx(response.recommendation.rate, 0.058);
    }

    #[test]
    fn recommend_rejects_unknown_rule() {
        let err = recommend_from_json(r#"{ "rule": "reckless" }"#).expect_err("unknown rule");
        assert!(matches!(err, ApiError::Request(_)));
    }

    #[test]
    fn run_reads_input_file_and_lists_rules() {
        let path = std::env::temp_dir().join(format!("retire-sim-spend-{}.json", std::process::id()));
        let mut file = fs::File::create(&path).expect("temp file");
        file.write_all(br#"{ "person1Balance": 500000, "person2Balance": 500000 }"#)
            .expect("write temp file");

        let output = run(Cli {
            command: Command::SpendToZero {
                io: IoArgs {
                    input: Some(path.clone()),
                    pretty: false,
                },
            },
        })
        .expect("spend-to-zero");
        fs::remove_file(&path).ok();
        assert!(output.contains("\"initialWithdrawal\""));

        let rules = run(Cli {
            command: Command::Rules { pretty: true },
        })
        .expect("rules");
        for name in ["conservative", "balanced", "aggressive"] {
            assert!(rules.contains(name));
        }
    }

    #[test]
    fn cli_parses_simulate_overrides() {
        let cli = Cli::try_parse_from([
            "retire-sim",
            "simulate",
            "--input",
            "request.json",
            "--seed",
            "11",
            "--runs",
            "500",
            "--pretty",
        ])
        .expect("valid args");
        match cli.command {
            Command::Simulate { io, seed, runs } => {
                assert_eq!(io.input, Some(PathBuf::from("request.json")));
                assert!(io.pretty);
                assert_eq!(seed, Some(11));
                assert_eq!(runs, Some(500));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
