use serde::{Deserialize, Serialize};

use super::annuity::future_value;
use super::error::{EngineResult, ensure, ensure_finite};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HouseholdStrategy {
    BothSimultaneous,
    /// Person 1 stops first while the partner keeps earning.
    Staggered,
    /// Both stop together; the first eligible balance funds the gap until the second is eligible.
    LumpSumBridge,
    SinglePerson,
}

impl HouseholdStrategy {
    fn requires_partner(self) -> bool {
        !matches!(self, Self::SinglePerson)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgePerson {
    pub current_age: u32,
    pub fire_age: u32,
    pub preservation_age: u32,
    pub super_balance: f64,
    pub annual_super_contribution: f64,
    /// Take-home salary while still working.
    pub annual_salary: f64,
    pub part_time_income: f64,
}

impl BridgePerson {
    fn validate(&self, prefix: &str) -> EngineResult<()> {
        let field = |name: &str| format!("{prefix}.{name}");
        ensure(
            self.fire_age >= self.current_age,
            &field("fire_age"),
            "must be >= current age",
        )?;
        for (name, value) in [
            ("super_balance", self.super_balance),
            ("annual_super_contribution", self.annual_super_contribution),
            ("annual_salary", self.annual_salary),
            ("part_time_income", self.part_time_income),
        ] {
            ensure_finite(value, &field(name))?;
            ensure(value >= 0.0, &field(name), "must be >= 0")?;
        }
        Ok(())
    }

    fn fire_offset(&self) -> u32 {
        self.fire_age.saturating_sub(self.current_age)
    }

    fn eligibility_offset(&self) -> u32 {
        self.preservation_age.saturating_sub(self.current_age)
    }

    fn is_working(&self, offset: u32) -> bool {
        offset < self.fire_offset()
    }

    /// Super balance on reaching preservation age: contributions stop at the
    /// earlier of FIRE and preservation age, growth continues after.
    pub fn super_at_preservation(&self, annual_return: f64) -> f64 {
        let eligibility = self.eligibility_offset();
        let contributing = self.fire_offset().min(eligibility);
        let accumulated = future_value(
            self.super_balance,
            self.annual_super_contribution,
            annual_return,
            contributing,
        );
        accumulated * (1.0 + annual_return).powi((eligibility - contributing) as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeLumpSumEvent {
    pub amount: f64,
    /// Years from now until the money arrives.
    pub years_from_now: u32,
    pub probability: f64,
    pub tax_rate: f64,
}

impl BridgeLumpSumEvent {
    pub fn expected_value(&self) -> f64 {
        self.amount * self.probability * (1.0 - self.tax_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LumpSumFunding {
    Flat { amount: f64 },
    Events { events: Vec<BridgeLumpSumEvent> },
}

impl Default for LumpSumFunding {
    fn default() -> Self {
        Self::Flat { amount: 0.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pre60FireSettings {
    pub person1: BridgePerson,
    pub person2: Option<BridgePerson>,
    pub strategy: HouseholdStrategy,
    pub annual_expenses: f64,
    pub investment_income: f64,
    pub expected_return: f64,
    pub inflation_rate: f64,
    pub lump_sum: LumpSumFunding,
}

impl Pre60FireSettings {
    pub fn validate(&self) -> EngineResult<()> {
        self.person1.validate("person1")?;
        match &self.person2 {
            Some(partner) => partner.validate("person2")?,
            None => ensure(
                !self.strategy.requires_partner(),
                "person2",
                "required for household strategies other than single_person",
            )?,
        }

        ensure_finite(self.annual_expenses, "annual_expenses")?;
        ensure(self.annual_expenses >= 0.0, "annual_expenses", "must be >= 0")?;
        ensure_finite(self.investment_income, "investment_income")?;
        ensure(
            self.investment_income >= 0.0,
            "investment_income",
            "must be >= 0",
        )?;
        ensure(
            (0.0..=0.20).contains(&self.expected_return),
            "expected_return",
            "must be between 0% and 20%",
        )?;
        ensure(
            (0.0..=0.10).contains(&self.inflation_rate),
            "inflation_rate",
            "must be between 0% and 10%",
        )?;

        match &self.lump_sum {
            LumpSumFunding::Flat { amount } => ensure(
                amount.is_finite() && *amount >= 0.0,
                "flat_lump_sum",
                "must be a finite number >= 0",
            ),
            LumpSumFunding::Events { events } => {
                for event in events {
                    ensure_finite(event.amount, "lump_sum_events.amount")?;
                    ensure(
                        (0.0..=1.0).contains(&event.probability),
                        "lump_sum_events.probability",
                        "must be between 0 and 1",
                    )?;
                    ensure(
                        (0.0..=1.0).contains(&event.tax_rate),
                        "lump_sum_events.tax_rate",
                        "must be between 0 and 1",
                    )?;
                }
                Ok(())
            }
        }
    }

    fn partner(&self) -> Option<&BridgePerson> {
        match self.strategy {
            HouseholdStrategy::SinglePerson => None,
            _ => self.person2.as_ref(),
        }
    }

    /// Bridge window as `[start, end)` offsets in years from now.
    fn bridge_window(&self) -> (u32, u32) {
        let p1 = &self.person1;
        let start = p1.fire_offset();
        let end = match (self.strategy, self.partner()) {
            (HouseholdStrategy::BothSimultaneous, Some(p2)) => {
                p1.eligibility_offset().max(p2.eligibility_offset())
            }
            (HouseholdStrategy::LumpSumBridge, Some(p2)) => {
                p1.eligibility_offset().min(p2.eligibility_offset())
            }
            _ => p1.eligibility_offset(),
        };
        (start, end.max(start))
    }

    /// Ongoing household income in the year `offset` years from now.
    fn income_at(&self, offset: u32) -> f64 {
        let p1 = &self.person1;
        let mut income = self.investment_income + p1.part_time_income;
        if let Some(p2) = self.partner() {
            income += match self.strategy {
                HouseholdStrategy::Staggered if p2.is_working(offset) => p2.annual_salary,
                _ => p2.part_time_income,
            };
        }
        income
    }

    fn gap_at(&self, offset: u32) -> f64 {
        (self.annual_expenses - self.income_at(offset)).max(0.0)
    }

    fn inflated_gap(&self, offset: u32, start: u32) -> f64 {
        self.gap_at(offset) * (1.0 + self.inflation_rate).powi((offset - start) as i32)
    }

    fn effective_lump_sum(&self, start: u32, end: u32) -> f64 {
        match &self.lump_sum {
            LumpSumFunding::Flat { amount } => *amount,
            LumpSumFunding::Events { events } => events
                .iter()
                .filter(|event| (start..end).contains(&event.years_from_now))
                .map(BridgeLumpSumEvent::expected_value)
                .sum(),
        }
    }

    /// Whether the first eligible person's super covers the gap until the
    /// partner's super also becomes accessible.
    fn sequential_drain_covered(&self, start: u32) -> Option<bool> {
        if self.strategy != HouseholdStrategy::LumpSumBridge {
            return None;
        }
        let p2 = self.partner()?;
        let p1 = &self.person1;

        let (first, first_eligible, second_eligible) =
            if p1.eligibility_offset() <= p2.eligibility_offset() {
                (p1, p1.eligibility_offset(), p2.eligibility_offset())
            } else {
                (p2, p2.eligibility_offset(), p1.eligibility_offset())
            };

        let from = first_eligible.max(start);
        let needed: f64 = (from..second_eligible)
            .map(|offset| self.inflated_gap(offset, start))
            .sum();
        Some(first.super_at_preservation(self.expected_return) >= needed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeYear {
    pub year_offset: u32,
    pub person1_age: u32,
    pub person2_age: Option<u32>,
    pub income: f64,
    pub gap: f64,
    pub inflated_gap: f64,
    pub cumulative_required: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FireProjection {
    pub strategy: HouseholdStrategy,
    pub bridge_start_age: u32,
    pub bridge_years: u32,
    /// Funding gap in the first bridge year, before inflation.
    pub annual_gap: f64,
    pub lump_sum_required: f64,
    pub effective_lump_sum: f64,
    pub lump_sum_shortfall: f64,
    pub is_feasible: bool,
    pub person1_super_at_preservation: f64,
    pub person2_super_at_preservation: Option<f64>,
    pub sequential_drain_covered: Option<bool>,
    pub yearly: Vec<BridgeYear>,
}

pub fn project(settings: &Pre60FireSettings) -> EngineResult<FireProjection> {
    settings.validate()?;

    let (start, end) = settings.bridge_window();
    let p1 = &settings.person1;
    let partner = settings.partner();

    let mut yearly = Vec::with_capacity((end - start) as usize);
    let mut required = 0.0;
    for offset in start..end {
        let inflated_gap = settings.inflated_gap(offset, start);
        required += inflated_gap;
        yearly.push(BridgeYear {
            year_offset: offset,
            person1_age: p1.current_age + offset,
            person2_age: partner.map(|p2| p2.current_age + offset),
            income: settings.income_at(offset),
            gap: settings.gap_at(offset),
            inflated_gap,
            cumulative_required: required,
        });
    }

    let effective = settings.effective_lump_sum(start, end);
    let shortfall = (required - effective).max(0.0);

    log::debug!(
        "bridge projection strategy={:?} window={}..{} required={:.2} effective={:.2}",
        settings.strategy,
        start,
        end,
        required,
        effective
    );

    Ok(FireProjection {
        strategy: settings.strategy,
        bridge_start_age: p1.fire_age,
        bridge_years: end - start,
        annual_gap: settings.gap_at(start),
        lump_sum_required: required,
        effective_lump_sum: effective,
        lump_sum_shortfall: shortfall,
        is_feasible: shortfall == 0.0,
        person1_super_at_preservation: p1.super_at_preservation(settings.expected_return),
        person2_super_at_preservation: settings
            .person2
            .as_ref()
            .map(|p2| p2.super_at_preservation(settings.expected_return)),
        sequential_drain_covered: settings.sequential_drain_covered(start),
        yearly,
    })
}
