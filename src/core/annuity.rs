use serde::Serialize;

/// Below this magnitude a rate is treated as zero and payments fall back to simple division.
pub const ZERO_RATE_THRESHOLD: f64 = 0.001;

/// Hard ceiling on a spend-to-zero withdrawal as a share of the balance.
pub const SUSTAINABILITY_CEILING: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmortizationRow {
    pub year: u32,
    pub opening_balance: f64,
    pub payment: f64,
    pub interest: f64,
    pub principal_paid: f64,
    pub closing_balance: f64,
}

/// Level end-of-period payment that exhausts `principal` over `periods` at `rate`.
pub fn annuity_payment(principal: f64, rate: f64, periods: u32) -> f64 {
    if principal <= 0.0 {
        return 0.0;
    }

    let n = periods.max(1) as f64;
    if rate.abs() < ZERO_RATE_THRESHOLD {
        return principal / n;
    }

    if rate <= -0.99 {
        return principal;
    }

    let growth = (1.0 + rate).powf(n);
    let denom = growth - 1.0;
    if denom.abs() <= 1e-12 {
        principal / n
    } else {
        principal * rate * growth / denom
    }
}

/// Level annual withdrawal that spends `balance` down to zero over `years`,
/// floored at `annual_expenses` and capped at 15% of the balance.
pub fn spend_to_zero_withdrawal(
    balance: f64,
    years: u32,
    real_return: f64,
    annual_expenses: f64,
) -> f64 {
    if balance <= 0.0 {
        return 0.0;
    }

    let payment = annuity_payment(balance, real_return, years);
    let ceiling = balance * SUSTAINABILITY_CEILING;
    payment.max(annual_expenses.max(0.0)).min(ceiling)
}

/// Closed-form balance after `years` of growth with end-of-year contributions.
pub fn future_value(balance: f64, annual_contribution: f64, rate: f64, years: u32) -> f64 {
    let n = years as i32;
    if rate.abs() < 1e-12 {
        return balance + annual_contribution * years as f64;
    }
    let growth = (1.0 + rate).powi(n);
    balance * growth + annual_contribution * (growth - 1.0) / rate
}

/// One year of a mortgage-style loan with `years_left` repayments remaining.
///
/// The final repayment clears whatever principal is left.
pub fn amortization_step(year: u32, opening: f64, rate: f64, years_left: u32) -> AmortizationRow {
    if opening <= 0.0 {
        return AmortizationRow {
            year,
            opening_balance: 0.0,
            payment: 0.0,
            interest: 0.0,
            principal_paid: 0.0,
            closing_balance: 0.0,
        };
    }

    let interest = opening * rate.max(0.0);
    let payment = if years_left <= 1 {
        opening + interest
    } else {
        annuity_payment(opening, rate, years_left)
    };
    let principal_paid = (payment - interest).clamp(0.0, opening);

    AmortizationRow {
        year,
        opening_balance: opening,
        payment: interest + principal_paid,
        interest,
        principal_paid,
        closing_balance: opening - principal_paid,
    }
}

pub fn amortization_schedule(principal: f64, annual_rate: f64, years: u32) -> Vec<AmortizationRow> {
    let mut rows = Vec::with_capacity(years as usize);
    let mut balance = principal.max(0.0);
    for year in 1..=years {
        if balance <= 0.0 {
            break;
        }
        let row = amortization_step(year, balance, annual_rate, years - year + 1);
        balance = row.closing_balance;
        rows.push(row);
    }
    rows
}
