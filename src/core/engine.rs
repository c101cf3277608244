use chrono::Datelike;
use log::{debug, info, trace};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

use super::annuity::amortization_step;
use super::error::{EngineError, EngineResult};
use super::guardrails;
use super::tax::{ContributionRules, contribution_for_year};
use super::types::{
    AllocationTarget, BaselineSettings, HistogramBin, LumpSumEvent, MarketCondition, ModeOutcome,
    PercentileBand, Person, Scenario, ScenarioMode, SimulationResult, WithdrawalPolicy,
    YearlyProjection,
};
use super::withdrawal;

const RETURN_FLOOR: f64 = -0.95;
const RETURN_CEILING: f64 = 2.5;
const DEPLETION_THRESHOLD: f64 = 1.0;
const UNFUNDED_TOLERANCE: f64 = 0.01;
const HISTOGRAM_BINS: usize = 20;

pub fn simulate(baseline: &BaselineSettings, scenario: &Scenario) -> EngineResult<SimulationResult> {
    let seed = scenario.seed.unwrap_or_else(rand::random::<u64>);
    simulate_with_seed(baseline, scenario, seed)
}

pub fn simulate_with_seed(
    baseline: &BaselineSettings,
    scenario: &Scenario,
    seed: u64,
) -> EngineResult<SimulationResult> {
    baseline.validate()?;
    scenario.validate()?;

    let returns = Normal::new(
        baseline.expected_return_mean,
        baseline.expected_return_volatility,
    )
    .map_err(|err| EngineError::Distribution(err.to_string()))?;

    let plan = TrialPlan::new(baseline, scenario);
    debug!(
        "simulating '{}' runs={} seed={} horizon={} retirement_index={}",
        scenario.name, scenario.monte_carlo_runs, seed, plan.horizon, plan.retirement_index
    );

    let mut master = StdRng::seed_from_u64(seed);
    let trial_seeds = (0..scenario.monte_carlo_runs)
        .map(|_| master.next_u64())
        .collect::<Vec<_>>();

    let trials = trial_seeds
        .into_par_iter()
        .map(|trial_seed| run_trial(&plan, &returns, trial_seed))
        .collect::<Vec<_>>();

    let runs = trials.len();
    let failures = trials.iter().filter(|trial| trial.failed).count();
    let success_rate = (runs - failures) as f64 / runs as f64;

    let mut acc = YearlyAccumulator::new(plan.horizon as usize, runs);
    let mut final_balances = Vec::with_capacity(runs);
    for trial in &trials {
        for (idx, year) in trial.years.iter().enumerate() {
            acc.push(idx, *year);
        }
        final_balances.push(trial.years.last().map_or(0.0, |year| year.combined));
    }
    let yearly = acc.into_projections(baseline);
    let outcome = resolve_outcome(&scenario.mode, &yearly, plan.retirement_index);

    info!(
        "simulated '{}': success_rate={:.3} outcome={:?}",
        scenario.name, success_rate, outcome
    );

    Ok(SimulationResult {
        scenario_name: scenario.name.clone(),
        runs: scenario.monte_carlo_runs,
        seed,
        success_rate,
        outcome,
        yearly,
        final_balance_histogram: final_balance_histogram(&final_balances),
    })
}

struct TrialPlan<'a> {
    baseline: &'a BaselineSettings,
    policy: &'a WithdrawalPolicy,
    horizon: u32,
    stop_index: [u32; 2],
    retirement_index: u32,
    initial_rate: f64,
    // net, per person, indexed by year
    contributions: Vec<[f64; 2]>,
    events: Vec<Vec<&'a LumpSumEvent>>,
}

impl<'a> TrialPlan<'a> {
    fn new(baseline: &'a BaselineSettings, scenario: &'a Scenario) -> Self {
        let horizon = baseline.horizon_years();
        let stop_index = match scenario.mode {
            ScenarioMode::TargetIncome { .. } => [
                baseline.person1.stop_work_index(),
                baseline.person2.stop_work_index(),
            ],
            ScenarioMode::TargetDate {
                target_retirement_date,
            } => {
                let idx = (target_retirement_date.year() - baseline.start_year).max(0) as u32;
                [idx, idx]
            }
        };
        let retirement_index = stop_index[0].max(stop_index[1]);

        let rules = ContributionRules::default();
        let working = [
            working_person(&baseline.person1, stop_index[0]),
            working_person(&baseline.person2, stop_index[1]),
        ];
        let contributions = (0..horizon)
            .map(|idx| {
                [0, 1].map(|i| {
                    let person = &working[i];
                    contribution_for_year(person, person.age_at(idx), &rules).net
                })
            })
            .collect();

        let mut events = vec![Vec::new(); horizon as usize];
        for event in &scenario.lump_sum_events {
            let offset = event.date.year() - baseline.start_year;
            match usize::try_from(offset).ok().and_then(|idx| events.get_mut(idx)) {
                Some(slot) => slot.push(event),
                None => debug!(
                    "lump sum event dated {} falls outside the projection and is ignored",
                    event.date
                ),
            }
        }

        Self {
            baseline,
            policy: &scenario.withdrawal_policy,
            horizon,
            stop_index,
            retirement_index,
            initial_rate: scenario
                .withdrawal_policy
                .initial_rate(baseline.safe_withdrawal_rate),
            contributions,
            events,
        }
    }

    fn accessible(&self, idx: u32) -> [bool; 2] {
        let b = self.baseline;
        [
            b.person1.age_at(idx) >= b.person1.preservation_age,
            b.person2.age_at(idx) >= b.person2.preservation_age,
        ]
    }
}

fn working_person(person: &Person, stop_index: u32) -> Person {
    Person {
        target_retirement_age: person.current_age + stop_index,
        ..person.clone()
    }
}

#[derive(Debug, Clone, Copy)]
struct Pools {
    supers: [f64; 2],
    taxable: f64,
}

impl Pools {
    fn combined(&self) -> f64 {
        self.supers[0] + self.supers[1] + self.taxable
    }

    fn grow(&mut self, annual_return: f64) {
        let factor = 1.0 + annual_return;
        self.supers = self.supers.map(|balance| (balance * factor).max(0.0));
        self.taxable = (self.taxable * factor).max(0.0);
    }

    // Taxable first, then pro rata from accessible super. Returns the unfunded part.
    fn withdraw(&mut self, amount: f64, accessible: [bool; 2]) -> f64 {
        let mut remaining = amount.max(0.0);

        let from_taxable = remaining.min(self.taxable);
        self.taxable -= from_taxable;
        remaining -= from_taxable;

        let available: f64 = (0..2)
            .filter(|&i| accessible[i])
            .map(|i| self.supers[i])
            .sum();
        if remaining > 0.0 && available > 0.0 {
            let take = remaining.min(available);
            for i in 0..2 {
                if accessible[i] {
                    let share = self.supers[i] / available;
                    self.supers[i] = (self.supers[i] - take * share).max(0.0);
                }
            }
            remaining -= take;
        }

        remaining
    }

    fn apply_event(
        &mut self,
        event: &LumpSumEvent,
        mortgage: &mut MortgageState,
        accessible: [bool; 2],
    ) -> f64 {
        match event.allocation {
            AllocationTarget::Super => {
                let shares = [event.person1_fraction(), event.person2_fraction()];
                let mut deficit = 0.0;
                for (balance, share) in self.supers.iter_mut().zip(shares) {
                    *balance += event.amount * share;
                    if *balance < 0.0 {
                        deficit -= *balance;
                        *balance = 0.0;
                    }
                }
                self.withdraw(deficit, accessible)
            }
            AllocationTarget::TaxableInvestment => {
                self.taxable += event.amount;
                if self.taxable < 0.0 {
                    let deficit = -self.taxable;
                    self.taxable = 0.0;
                    self.withdraw(deficit, accessible)
                } else {
                    0.0
                }
            }
            AllocationTarget::MortgagePayoff => {
                if event.amount >= 0.0 {
                    let payoff = event.amount.min(mortgage.principal);
                    mortgage.principal -= payoff;
                    self.taxable += event.amount - payoff;
                } else {
                    mortgage.principal -= event.amount;
                    mortgage.years_left = mortgage.years_left.max(1);
                }
                0.0
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MortgageState {
    principal: f64,
    annual_rate: f64,
    years_left: u32,
}

impl MortgageState {
    fn repay(&mut self, idx: u32) -> f64 {
        if self.principal <= 0.0 {
            return 0.0;
        }
        let row = amortization_step(idx, self.principal, self.annual_rate, self.years_left);
        self.principal = row.closing_balance;
        self.years_left = self.years_left.saturating_sub(1);
        row.payment
    }
}

#[derive(Debug, Default)]
struct ReturnStats {
    count: u32,
    sum: f64,
    sum_sq: f64,
}

impl ReturnStats {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    fn std_dev_or(&self, fallback: f64) -> f64 {
        if self.count < 2 {
            return fallback;
        }
        let n = self.count as f64;
        ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0))
            .max(0.0)
            .sqrt()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TrialYear {
    super1: f64,
    super2: f64,
    taxable: f64,
    combined: f64,
    income: f64,
    achievable: f64,
    depleted: bool,
}

impl TrialYear {
    fn depleted() -> Self {
        Self {
            depleted: true,
            ..Self::default()
        }
    }
}

struct TrialOutcome {
    years: Vec<TrialYear>,
    failed: bool,
}

fn run_trial(plan: &TrialPlan<'_>, returns: &Normal<f64>, seed: u64) -> TrialOutcome {
    let baseline = plan.baseline;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut pools = Pools {
        supers: [baseline.person1.current_balance, baseline.person2.current_balance],
        taxable: 0.0,
    };
    let mut mortgage = baseline
        .mortgage
        .map(|terms| MortgageState {
            principal: terms.principal,
            annual_rate: terms.annual_rate,
            years_left: terms.remaining_years,
        })
        .unwrap_or_default();

    let mut years = Vec::with_capacity(plan.horizon as usize);
    let mut history: Vec<MarketCondition> = Vec::with_capacity(plan.horizon as usize);
    let mut stats = ReturnStats::default();
    let mut rate = plan.initial_rate;
    let mut retirement_balance = 0.0;
    let mut failed = false;

    for idx in 0..plan.horizon {
        let annual_return = returns.sample(&mut rng).clamp(RETURN_FLOOR, RETURN_CEILING);
        stats.push(annual_return);
        pools.grow(annual_return);

        let contribution = plan.contributions[idx as usize];
        for i in 0..2 {
            if idx < plan.stop_index[i] {
                pools.supers[i] += contribution[i];
            }
        }

        let accessible = plan.accessible(idx);
        let mut unfunded = 0.0;
        for event in &plan.events[idx as usize] {
            unfunded += pools.apply_event(event, &mut mortgage, accessible);
        }

        let mortgage_payment = mortgage.repay(idx);
        let opening = pools.combined();
        let achievable = opening * plan.initial_rate;

        let mut income = 0.0;
        let mut outflow = 0.0;
        if idx >= plan.retirement_index {
            let years_in_retirement = idx - plan.retirement_index;
            if years_in_retirement == 0 {
                retirement_balance = opening;
                rate = plan.initial_rate;
            } else {
                rate = next_rate(
                    plan.policy,
                    rate,
                    &history,
                    opening,
                    retirement_balance,
                    years_in_retirement,
                );
            }

            let price_level = (1.0 + baseline.inflation_rate).powi(years_in_retirement as i32);
            income = rate * retirement_balance * price_level;
            outflow = income + mortgage_payment;
            // Balances still locked below preservation age keep compounding;
            // the year's income is capped at what is accessible.
            let short = pools.withdraw(outflow, accessible);
            income = (income - short).max(0.0);
            unfunded += short;
        }

        let closing = pools.combined();
        history.push(MarketCondition {
            year: baseline.year_for_index(idx),
            annual_return,
            portfolio_value: closing,
            volatility: stats.std_dev_or(baseline.expected_return_volatility),
            inflation: baseline.inflation_rate,
            withdrawal_amount: income,
        });

        let depleted = closing < DEPLETION_THRESHOLD
            && (outflow > 0.0 || unfunded > UNFUNDED_TOLERANCE);
        years.push(TrialYear {
            super1: pools.supers[0],
            super2: pools.supers[1],
            taxable: pools.taxable,
            combined: closing,
            income,
            achievable,
            depleted,
        });

        if depleted {
            failed = true;
            push_depleted_tail(&mut years, idx + 1, plan.horizon);
            break;
        }
    }

    TrialOutcome { years, failed }
}

fn next_rate(
    policy: &WithdrawalPolicy,
    current_rate: f64,
    history: &[MarketCondition],
    current_value: f64,
    retirement_balance: f64,
    years_in_retirement: u32,
) -> f64 {
    match policy {
        WithdrawalPolicy::FixedRate => current_rate,
        WithdrawalPolicy::Dynamic { rule } => {
            let recommendation =
                withdrawal::recommend(current_rate, history, rule, retirement_balance);
            trace!(
                "retirement year {}: rate {:.4} -> {:.4} ({})",
                years_in_retirement, current_rate, recommendation.rate, recommendation.reason
            );
            recommendation.rate
        }
        WithdrawalPolicy::Guardrails { settings } => {
            let decision = guardrails::adjust(
                current_value,
                retirement_balance,
                current_rate,
                settings,
                years_in_retirement,
            );
            trace!(
                "retirement year {}: rate {:.4} -> {:.4} [{:?}] ({})",
                years_in_retirement, current_rate, decision.rate, decision.status, decision.reason
            );
            decision.rate
        }
    }
}

fn push_depleted_tail(years: &mut Vec<TrialYear>, from: u32, horizon: u32) {
    for _ in from..horizon {
        years.push(TrialYear::depleted());
    }
}

struct YearlyAccumulator {
    super1: Vec<Vec<f64>>,
    super2: Vec<Vec<f64>>,
    taxable: Vec<Vec<f64>>,
    combined: Vec<Vec<f64>>,
    income: Vec<Vec<f64>>,
    achievable: Vec<Vec<f64>>,
    depleted: Vec<u32>,
    samples: usize,
}

impl YearlyAccumulator {
    fn new(year_count: usize, expected_samples: usize) -> Self {
        let make = || {
            (0..year_count)
                .map(|_| Vec::with_capacity(expected_samples))
                .collect::<Vec<_>>()
        };

        Self {
            super1: make(),
            super2: make(),
            taxable: make(),
            combined: make(),
            income: make(),
            achievable: make(),
            depleted: vec![0; year_count],
            samples: expected_samples,
        }
    }

    fn push(&mut self, index: usize, year: TrialYear) {
        self.super1[index].push(year.super1);
        self.super2[index].push(year.super2);
        self.taxable[index].push(year.taxable);
        self.combined[index].push(year.combined);
        self.income[index].push(year.income);
        self.achievable[index].push(year.achievable);
        if year.depleted {
            self.depleted[index] += 1;
        }
    }

    fn into_projections(mut self, baseline: &BaselineSettings) -> Vec<YearlyProjection> {
        let samples = self.samples.max(1) as f64;
        (0..self.combined.len())
            .map(|idx| {
                let year_index = idx as u32;
                YearlyProjection {
                    year: baseline.year_for_index(year_index),
                    year_index,
                    person1_age: baseline.person1.age_at(year_index),
                    person2_age: baseline.person2.age_at(year_index),
                    person1_balance: band(&mut self.super1[idx]),
                    person2_balance: band(&mut self.super2[idx]),
                    taxable_balance: band(&mut self.taxable[idx]),
                    combined_balance: band(&mut self.combined[idx]),
                    income: band(&mut self.income[idx]),
                    achievable_income: band(&mut self.achievable[idx]),
                    depleted_fraction: self.depleted[idx] as f64 / samples,
                }
            })
            .collect()
    }
}

fn band(values: &mut [f64]) -> PercentileBand {
    PercentileBand {
        p10: percentile(values, 10.0),
        p50: percentile(values, 50.0),
        p90: percentile(values, 90.0),
    }
}

fn resolve_outcome(
    mode: &ScenarioMode,
    yearly: &[YearlyProjection],
    retirement_index: u32,
) -> ModeOutcome {
    match *mode {
        ScenarioMode::TargetIncome {
            target_annual_income,
        } => {
            let first_year = |pick: fn(&PercentileBand) -> f64| {
                yearly
                    .iter()
                    .find(|row| pick(&row.achievable_income) >= target_annual_income)
                    .map(|row| row.year)
            };
            ModeOutcome::TargetIncome {
                target_annual_income,
                median_retirement_year: first_year(|b| b.p50),
                p10_retirement_year: first_year(|b| b.p10),
                p90_retirement_year: first_year(|b| b.p90),
            }
        }
        ScenarioMode::TargetDate {
            target_retirement_date,
        } => {
            let at_retirement = yearly
                .get(retirement_index as usize)
                .or_else(|| yearly.last())
                .map(|row| row.achievable_income)
                .unwrap_or_default();
            ModeOutcome::TargetDate {
                target_retirement_date,
                median_sustainable_income: at_retirement.p50,
                p10_sustainable_income: at_retirement.p10,
                p90_sustainable_income: at_retirement.p90,
            }
        }
    }
}

fn final_balance_histogram(values: &[f64]) -> Vec<HistogramBin> {
    if values.is_empty() {
        return Vec::new();
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (max - min) / HISTOGRAM_BINS as f64;
    if width <= 0.0 {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: values.len() as u32,
        }];
    }

    let mut bins = (0..HISTOGRAM_BINS)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: min + width * (i + 1) as f64,
            count: 0,
        })
        .collect::<Vec<_>>();
    for &value in values {
        let idx = (((value - min) / width) as usize).min(HISTOGRAM_BINS - 1);
        bins[idx].count += 1;
    }
    bins
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
