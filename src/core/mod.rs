pub mod annuity;
pub mod bridge;
pub mod engine;
pub mod error;
pub mod guardrails;
pub mod spend_zero;
pub mod tax;
pub mod types;
pub mod withdrawal;

pub use annuity::{AmortizationRow, amortization_schedule, annuity_payment, spend_to_zero_withdrawal};
pub use bridge::{
    BridgeLumpSumEvent, BridgePerson, BridgeYear, FireProjection, HouseholdStrategy,
    LumpSumFunding, Pre60FireSettings,
};
pub use engine::{simulate, simulate_with_seed};
pub use error::{EngineError, EngineResult};
pub use guardrails::{GuardrailDecision, GuardrailSettings, GuardrailStatus};
pub use spend_zero::{SpendZeroProjection, SpendZeroYear, SuperSpendSettings, WithdrawalOrdering};
pub use tax::{ContributionBreakdown, ContributionRules, income_tax, preservation_age};
pub use types::{
    AllocationTarget, BaselineSettings, HistogramBin, LumpSumEvent, MarketCondition, ModeOutcome,
    MortgageTerms, PercentileBand, Person, Scenario, ScenarioMode, SimulationResult,
    WithdrawalPolicy, YearlyProjection,
};
pub use withdrawal::{RateRecommendation, WithdrawalRule};
