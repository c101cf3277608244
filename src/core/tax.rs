use serde::{Deserialize, Serialize};

use super::types::Person;

const TAX_FREE_THRESHOLD: f64 = 18_200.0;
const MEDICARE_LEVY_RATE: f64 = 0.02;

/// Resident marginal brackets as (lower bound, marginal rate).
const INCOME_TAX_BRACKETS: [(f64, f64); 5] = [
    (0.0, 0.0),
    (18_200.0, 0.16),
    (45_000.0, 0.30),
    (135_000.0, 0.37),
    (190_000.0, 0.45),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionRules {
    pub super_guarantee_rate: f64,
    pub concessional_cap: f64,
    pub contributions_tax_rate: f64,
    /// Voluntary contributions stop from this age.
    pub voluntary_age_limit: u32,
}

impl Default for ContributionRules {
    fn default() -> Self {
        Self {
            super_guarantee_rate: 0.12,
            concessional_cap: 30_000.0,
            contributions_tax_rate: 0.15,
            voluntary_age_limit: 75,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionBreakdown {
    pub mandatory: f64,
    pub voluntary: f64,
    pub contributions_tax: f64,
    /// Amount that lands in the super balance.
    pub net: f64,
    pub take_home_pay: f64,
}

/// Annual income tax including the Medicare levy.
pub fn income_tax(taxable_income: f64) -> f64 {
    let income = taxable_income.max(0.0);

    let mut tax = 0.0;
    for (idx, &(lower, rate)) in INCOME_TAX_BRACKETS.iter().enumerate() {
        if income <= lower {
            break;
        }
        let upper = INCOME_TAX_BRACKETS
            .get(idx + 1)
            .map(|&(next_lower, _)| next_lower)
            .unwrap_or(f64::INFINITY);
        tax += (income.min(upper) - lower) * rate;
    }

    let levy = if income > TAX_FREE_THRESHOLD {
        income * MEDICARE_LEVY_RATE
    } else {
        0.0
    };
    tax + levy
}

pub fn take_home_pay(salary: f64) -> f64 {
    let gross = salary.max(0.0);
    (gross - income_tax(gross)).max(0.0)
}

/// Earliest age super becomes accessible, graduated for birth years 1960-1964.
pub fn preservation_age(birth_year: i32) -> u32 {
    match birth_year {
        ..=1959 => 55,
        1960 => 56,
        1961 => 57,
        1962 => 58,
        1963 => 59,
        _ => 60,
    }
}

/// Contributions made on a person's behalf in the year they turn `age`.
///
/// Nothing is contributed once the person has reached their retirement age.
/// Without a salary the declared net contribution is used unchanged.
pub fn contribution_for_year(
    person: &Person,
    age: u32,
    rules: &ContributionRules,
) -> ContributionBreakdown {
    if age >= person.target_retirement_age {
        return ContributionBreakdown::default();
    }

    let Some(salary) = person.annual_salary else {
        let declared = person.annual_contribution.max(0.0);
        return ContributionBreakdown {
            mandatory: declared,
            voluntary: 0.0,
            contributions_tax: 0.0,
            net: declared,
            take_home_pay: 0.0,
        };
    };

    let salary = salary.max(0.0);
    let mandatory = salary * rules.super_guarantee_rate.clamp(0.0, 1.0);
    let voluntary = if age < rules.voluntary_age_limit {
        let room = (rules.concessional_cap - mandatory).max(0.0);
        person.voluntary_contribution.max(0.0).min(room).min(salary)
    } else {
        0.0
    };

    let gross = mandatory + voluntary;
    let contributions_tax = gross * rules.contributions_tax_rate.clamp(0.0, 1.0);

    ContributionBreakdown {
        mandatory,
        voluntary,
        contributions_tax,
        net: gross - contributions_tax,
        take_home_pay: take_home_pay(salary - voluntary),
    }
}
