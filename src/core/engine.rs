use tracing::debug;

use super::expenses::ExpenseSchedule;
use super::pension::monthly_pension;
use super::types::{
    AnnualSummary, GrowthRow, GrowthTable, MonthlyState, SimulationParams, SimulationResult,
};

/// Fire age used for pension accrual when independence is never reached.
const NEVER_FIRE_AGE_OFFSET: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct ProjectionOptions<'a> {
    pub fire_month: Option<usize>,
    /// Monthly return per month index. Missing entries are treated as 0.
    pub returns: &'a [f64],
    pub record_monthly: bool,
    pub skip_required_assets: bool,
    /// Post-FIRE, treat a withdrawal above the spending shortfall as consumed
    /// instead of leaving it in cash.
    pub spend_surplus: bool,
}

impl<'a> ProjectionOptions<'a> {
    /// Survival-only run: no rows recorded.
    pub fn survival(fire_month: Option<usize>, returns: &'a [f64]) -> Self {
        Self {
            fire_month,
            returns,
            record_monthly: false,
            skip_required_assets: true,
            spend_surplus: false,
        }
    }
}

/// Options for [`perform_fire_simulation`].
#[derive(Debug, Clone, Default)]
pub struct SimulationOptions {
    pub force_fire_month: Option<usize>,
    pub returns: Option<Vec<f64>>,
    pub record_monthly: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RiskSale {
    net: f64,
    gross: f64,
}

/// Running balances for one projection.
///
/// `cash` and `risk` never go below zero. Spending that neither balance can
/// cover is carried in `unfunded`, so `cash - unfunded` is the signed cash
/// position.
#[derive(Debug, Clone, Copy)]
struct Portfolio {
    cash: f64,
    risk: f64,
    cost_basis: f64,
    unfunded: f64,
}

impl Portfolio {
    fn new(initial_assets: f64, risk_assets: f64) -> Self {
        let mut portfolio = Self {
            cash: 0.0,
            risk: risk_assets.max(0.0),
            cost_basis: risk_assets.max(0.0),
            unfunded: 0.0,
        };
        portfolio.set_net_cash(initial_assets - portfolio.risk);
        portfolio
    }

    fn net_cash(&self) -> f64 {
        self.cash - self.unfunded
    }

    fn set_net_cash(&mut self, value: f64) {
        if value >= 0.0 {
            self.cash = value;
            self.unfunded = 0.0;
        } else {
            self.cash = 0.0;
            self.unfunded = -value;
        }
    }

    fn total(&self) -> f64 {
        self.cash + self.risk - self.unfunded
    }

    fn contribute(&mut self, amount: f64) {
        self.risk += amount;
        self.cost_basis += amount;
    }

    /// Sell enough risk assets to raise `needed` after tax on the gain share.
    fn sell_for_net(&mut self, needed: f64, tax_rate: f64) -> RiskSale {
        if needed <= 0.0 || self.risk <= 0.0 {
            return RiskSale::default();
        }

        let gain_ratio = ((self.risk - self.cost_basis) / self.risk).max(0.0);
        let factor = 1.0 - tax_rate * gain_ratio;
        debug_assert!(factor > 0.0, "tax factor must stay positive, got {factor}");

        let net = needed.min((self.risk * factor).max(0.0));
        let gross = net / factor;

        self.cost_basis = (self.cost_basis - gross * (1.0 - gain_ratio)).max(0.0);
        self.risk = (self.risk - gross).max(0.0);
        RiskSale { net, gross }
    }

    fn apply_return(&mut self, rate: f64) -> f64 {
        let gain = self.risk * rate;
        self.risk = (self.risk + gain).max(0.0);
        self.cost_basis = self.cost_basis.min(self.risk);
        gain
    }
}

struct MonthFlows {
    assets: f64,
    income: f64,
    pension: f64,
    expenses: f64,
}

/// Pre-FIRE month: invest the surplus up to the cap, or cover a deficit from
/// risk assets. Returns the gross amount sold.
fn accumulate(portfolio: &mut Portfolio, flows: &MonthFlows, monthly_investment: f64, tax_rate: f64) -> f64 {
    let available = portfolio.net_cash() + flows.income + flows.pension - flows.expenses;

    if available < 0.0 {
        let sale = portfolio.sell_for_net(-available, tax_rate);
        portfolio.set_net_cash(available + sale.net);
        if sale.net > 0.0 { sale.gross } else { 0.0 }
    } else {
        let invest = monthly_investment.min(available);
        portfolio.set_net_cash(available - invest);
        portfolio.contribute(invest);
        0.0
    }
}

/// Post-FIRE month: withdraw the larger of the spending shortfall and the
/// withdrawal-rate floor, cash first. Anything above need stays in cash unless
/// `spend_surplus` is set. Returns the reported withdrawal.
fn draw_down(
    portfolio: &mut Portfolio,
    flows: &MonthFlows,
    withdrawal_rate: f64,
    tax_rate: f64,
    spend_surplus: bool,
) -> f64 {
    let floor = flows.assets * withdrawal_rate / 12.0;
    let shortfall = (flows.expenses - flows.income - flows.pension).max(0.0);
    let target = shortfall.max(floor);
    let consumed_surplus = if spend_surplus { target - shortfall } else { 0.0 };

    let net_cash = portfolio.net_cash();
    let from_cash = net_cash.min(target);
    let sale = portfolio.sell_for_net(target - from_cash, tax_rate);

    portfolio.set_net_cash(
        net_cash + flows.income + flows.pension + sale.net - flows.expenses - consumed_surplus,
    );
    from_cash.max(0.0) + sale.gross
}

/// Project balances month by month from the start month to the horizon.
pub fn run_core_simulation(
    params: &SimulationParams,
    schedule: &ExpenseSchedule,
    options: &ProjectionOptions<'_>,
) -> SimulationResult {
    let total_months = params.total_months().min(schedule.months());
    let tax_rate = params.effective_tax_rate();
    let fire_month = options.fire_month;
    let fire_age = match fire_month {
        Some(month) => params.age_at_month(month),
        None => params.current_age + NEVER_FIRE_AGE_OFFSET,
    };

    let mut portfolio = Portfolio::new(params.initial_assets, params.risk_assets);
    let mut monthly_data = if options.record_monthly {
        Vec::with_capacity(params.max_months.min(total_months) + 1)
    } else {
        Vec::new()
    };

    for month in 0..=total_months {
        let age = params.age_at_month(month);
        let is_fire = fire_month.is_some_and(|f| month >= f);

        if fire_month == Some(month) {
            portfolio.set_net_cash(portfolio.net_cash() + params.retirement_lump_sum_at_fire);
        }

        let spike = match fire_month {
            Some(f) if month >= f && month < f + 12 => {
                schedule.first_year_spike(params.post_fire_first_year_extra_expense, month)
            }
            _ => 0.0,
        };

        let pension = if params.include_pension {
            monthly_pension(age, fire_age, &params.pension_config)
        } else {
            0.0
        };
        let extra = if is_fire { schedule.extra[month] } else { 0.0 };
        let flows = MonthFlows {
            assets: portfolio.total().max(0.0),
            income: if is_fire { 0.0 } else { params.monthly_income },
            pension,
            expenses: schedule.base[month] + extra + spike,
        };

        let recording = options.record_monthly && month <= params.max_months;
        if recording {
            let required_assets =
                (!options.skip_required_assets).then(|| required_assets(params, schedule, month));
            monthly_data.push(MonthlyState {
                month,
                age,
                assets: flows.assets,
                risk_assets: portfolio.risk,
                cash_assets: portfolio.cash,
                is_fire,
                income: flows.income,
                pension: flows.pension,
                expenses: flows.expenses,
                investment_gain: 0.0,
                withdrawal: 0.0,
                required_assets,
            });
        }

        if month == total_months {
            break;
        }

        let withdrawal = if is_fire {
            draw_down(
                &mut portfolio,
                &flows,
                params.withdrawal_rate,
                tax_rate,
                options.spend_surplus,
            )
        } else {
            accumulate(&mut portfolio, &flows, params.monthly_investment, tax_rate)
        };

        let rate = options.returns.get(month).copied().unwrap_or(0.0);
        let investment_gain = portfolio.apply_return(rate);

        if recording {
            if let Some(row) = monthly_data.last_mut() {
                row.investment_gain = investment_gain;
                row.withdrawal = withdrawal;
            }
        }
    }

    let final_assets = portfolio.total();
    SimulationResult {
        fire_reached_month: fire_month,
        monthly_data,
        survived: final_assets >= 0.0,
        final_assets,
    }
}

/// Minimum balance at `month` that, retired from that month on and growing at
/// the mean return, lasts to the horizon.
pub fn required_assets(params: &SimulationParams, schedule: &ExpenseSchedule, month: usize) -> f64 {
    let total_months = params.total_months().min(schedule.months());
    let remaining = total_months.saturating_sub(month);
    if remaining == 0 {
        return 0.0;
    }

    let r = params.monthly_return_mean();
    let t = params.effective_tax_rate();
    let w = params.withdrawal_rate / 12.0;
    let age_at_month = params.age_at_month(month);

    let mut required = 0.0_f64;
    for i in (0..remaining).rev() {
        let age = age_at_month + i as f64 / 12.0;
        let pension = if params.include_pension {
            monthly_pension(age, age_at_month, &params.pension_config)
        } else {
            0.0
        };

        let index = month + i;
        let spike = if i < 12 {
            schedule.first_year_spike(params.post_fire_first_year_extra_expense, index)
        } else {
            0.0
        };
        let expense = schedule.base[index] + schedule.extra[index] + spike;

        let shortfall = (expense - pension).max(0.0);
        let discounted = required / (1.0 + r);
        let cover_shortfall = discounted + shortfall / (1.0 - t);
        let respect_floor = (discounted - pension / (1.0 - t)) / (1.0 - w / (1.0 - t));

        required = cover_shortfall.max(respect_floor).max(0.0);
    }

    required
}

/// Earliest FIRE month that survives to the horizon, or `None`.
///
/// Steps a year at a time, then binary-searches the eleven months before the
/// first surviving year. Relies on survival being non-decreasing in the FIRE
/// month.
pub fn find_survival_month(params: &SimulationParams, schedule: &ExpenseSchedule, returns: &[f64]) -> Option<usize> {
    let limit = params.max_months.min(params.total_months());
    let survives = |month: usize| {
        run_core_simulation(params, schedule, &ProjectionOptions::survival(Some(month), returns)).survived
    };

    let first_year = (0..=limit).step_by(12).find(|&month| survives(month))?;

    let mut low = first_year.saturating_sub(11);
    let mut high = first_year;
    while low < high {
        let mid = low + (high - low) / 2;
        if survives(mid) {
            high = mid;
        } else {
            low = mid + 1;
        }
    }

    debug!(fire_month = high, coarse = first_year, "located earliest surviving FIRE month");
    Some(high)
}

/// Deterministic run: searches for the FIRE month unless one is forced, using
/// the mean return path unless one is supplied.
pub fn perform_fire_simulation(params: &SimulationParams, options: &SimulationOptions) -> SimulationResult {
    let schedule = ExpenseSchedule::build(params);
    let mean_returns;
    let returns = match &options.returns {
        Some(returns) => returns.as_slice(),
        None => {
            mean_returns = params.mean_returns();
            mean_returns.as_slice()
        }
    };

    let fire_month = match options.force_fire_month {
        Some(month) => Some(month),
        None => find_survival_month(params, &schedule, returns),
    };

    run_core_simulation(
        params,
        &schedule,
        &ProjectionOptions {
            fire_month,
            returns,
            record_monthly: options.record_monthly,
            skip_required_assets: false,
            spend_surplus: false,
        },
    )
}

fn recorded_run(params: &SimulationParams) -> SimulationResult {
    perform_fire_simulation(
        params,
        &SimulationOptions {
            record_monthly: true,
            ..SimulationOptions::default()
        },
    )
}

pub fn generate_growth_table(params: &SimulationParams) -> GrowthTable {
    growth_table_from(&recorded_run(params))
}

/// Growth rows for an existing recorded run, so the table agrees with it.
pub fn growth_table_from(result: &SimulationResult) -> GrowthTable {
    GrowthTable {
        table: result
            .monthly_data
            .iter()
            .map(|row| GrowthRow {
                month: row.month,
                age: row.age,
                assets: row.assets,
                required_assets: row.required_assets.unwrap_or(0.0),
                is_fire: row.is_fire,
            })
            .collect(),
        fire_reached_month: result.fire_reached_month,
    }
}

/// Roll recorded months up into twelve-month rows.
pub fn summarize_years(monthly_data: &[MonthlyState], fire_month: Option<usize>) -> Vec<AnnualSummary> {
    monthly_data
        .chunks(12)
        .enumerate()
        .filter_map(|(year, slice)| {
            let first = slice.first()?;
            let start = year * 12;
            let end = start + slice.len();
            let year_end = monthly_data.get(end).or(slice.last())?;

            let sum = |field: fn(&MonthlyState) -> f64| slice.iter().map(field).sum::<f64>().round();

            Some(AnnualSummary {
                age: first.age.floor().max(0.0) as u32,
                income: sum(|m| m.income),
                pension: sum(|m| m.pension),
                expenses: sum(|m| m.expenses),
                withdrawal: sum(|m| m.withdrawal),
                investment_gain: sum(|m| m.investment_gain),
                assets: first.assets.round(),
                assets_year_end: year_end.assets.round(),
                risk_assets: first.risk_assets.round(),
                cash_assets: first.cash_assets.round(),
                savings: (year_end.cash_assets - first.cash_assets).round(),
                fire_month_in_year: fire_month.filter(|m| (start..end).contains(m)),
            })
        })
        .collect()
}

pub fn generate_annual_simulation(params: &SimulationParams) -> Vec<AnnualSummary> {
    let result = recorded_run(params);
    summarize_years(&result.monthly_data, result.fire_reached_month)
}
