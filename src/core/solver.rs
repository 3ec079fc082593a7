use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{SimulationOptions, perform_fire_simulation};
use super::montecarlo::{CancellationToken, MonteCarloOptions, run_monte_carlo_with_cancel};
use super::types::SimulationParams;
use crate::error::SimulationError;

pub const DEFAULT_RATE_SEARCH_MAX: f64 = 0.2;
pub const DEFAULT_TOLERANCE: f64 = 100_000.0;
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// Which end of the search range already brackets the target.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryHit {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DepletionSearch {
    /// Median terminal balance to aim for, in yen.
    pub target: f64,
    /// Lower bound of the searched variable. Solver-specific default when unset.
    pub search_min: Option<f64>,
    pub search_max: Option<f64>,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub monte_carlo: MonteCarloOptions,
}

impl Default for DepletionSearch {
    fn default() -> Self {
        Self {
            target: 0.0,
            search_min: None,
            search_max: None,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            monte_carlo: MonteCarloOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepletionIteration<T> {
    pub iteration: u32,
    pub lower_bound: T,
    pub upper_bound: T,
    pub candidate: T,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepletionSolveResult<T> {
    pub value: T,
    pub median: f64,
    pub target: f64,
    pub boundary_hit: Option<BoundaryHit>,
    pub iterations: Vec<DepletionIteration<T>>,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy)]
struct Evaluated<T> {
    value: T,
    median: f64,
}

impl<T: Copy> Evaluated<T> {
    fn closer(self, other: Self, target: f64) -> Self {
        if (other.median - target).abs() < (self.median - target).abs() {
            other
        } else {
            self
        }
    }
}

fn validate_search(search: &DepletionSearch, low: f64, high: f64) -> Result<(), SimulationError> {
    let invalid = |msg: &str| Err(SimulationError::InvalidSolverConfig(msg.to_string()));
    if !search.target.is_finite() {
        return invalid("target must be finite");
    }
    if !low.is_finite() || !high.is_finite() {
        return invalid("search bounds must be finite");
    }
    if low < 0.0 {
        return invalid("search_min must be >= 0");
    }
    if high <= low {
        return invalid("search_max must be greater than search_min");
    }
    if !search.tolerance.is_finite() || search.tolerance <= 0.0 {
        return invalid("tolerance must be > 0");
    }
    if search.max_iterations == 0 {
        return invalid("max_iterations must be > 0");
    }
    Ok(())
}

/// FIRE month the solvers hold fixed: the forced month if any, otherwise the
/// deterministic one for the unmodified params.
fn pinned_fire_month(params: &SimulationParams, options: &MonteCarloOptions) -> Option<usize> {
    options
        .force_fire_month
        .or_else(|| perform_fire_simulation(params, &SimulationOptions::default()).fire_reached_month)
}

fn median_at(
    params: &SimulationParams,
    options: &MonteCarloOptions,
    token: &CancellationToken,
) -> Result<f64, SimulationError> {
    Ok(run_monte_carlo_with_cancel(params, options, token)?.p50)
}

/// Withdrawal rate whose median terminal balance lands on `search.target`.
///
/// Unlike a plain projection, every evaluation treats withdrawals above the
/// spending shortfall as spent instead of returning them to cash, so results
/// (and `terminalDepletionPlan` in the full analysis) describe a plan that
/// actually draws the balance down.
pub fn find_withdrawal_rate_for_median_depletion(
    params: &SimulationParams,
    search: &DepletionSearch,
) -> Result<DepletionSolveResult<f64>, SimulationError> {
    find_withdrawal_rate_with_cancel(params, search, &CancellationToken::new())
}

/// Bisect the withdrawal rate until the median terminal balance is within
/// tolerance of the target. Withdrawals above need are treated as spent, so the
/// median falls as the rate rises.
pub fn find_withdrawal_rate_with_cancel(
    params: &SimulationParams,
    search: &DepletionSearch,
    token: &CancellationToken,
) -> Result<DepletionSolveResult<f64>, SimulationError> {
    let mut lo = search.search_min.unwrap_or(0.0);
    let mut hi = search.search_max.unwrap_or(DEFAULT_RATE_SEARCH_MAX);
    validate_search(search, lo, hi)?;

    let options = MonteCarloOptions {
        force_fire_month: pinned_fire_month(params, &search.monte_carlo),
        spend_withdrawal_surplus: true,
        ..search.monte_carlo
    };
    let evaluate = |rate: f64| {
        let candidate = SimulationParams {
            withdrawal_rate: rate,
            ..params.clone()
        };
        median_at(&candidate, &options, token).map(|median| Evaluated { value: rate, median })
    };

    let low_eval = evaluate(lo)?;
    let high_eval = evaluate(hi)?;
    if search.target > low_eval.median {
        return Ok(boundary(low_eval, search.target, BoundaryHit::Low));
    }
    if search.target < high_eval.median {
        return Ok(boundary(high_eval, search.target, BoundaryHit::High));
    }

    let mut best = low_eval.closer(high_eval, search.target);
    let mut iterations = Vec::with_capacity(search.max_iterations as usize);
    let mut converged = (best.median - search.target).abs() <= search.tolerance;

    let mut it = 0;
    while !converged && it < search.max_iterations {
        it += 1;
        let mid = (lo + hi) * 0.5;
        let eval = evaluate(mid)?;
        iterations.push(DepletionIteration {
            iteration: it,
            lower_bound: lo,
            upper_bound: hi,
            candidate: mid,
            median: eval.median,
        });
        debug!(iteration = it, rate = mid, median = eval.median, "withdrawal rate bisection");

        best = best.closer(eval, search.target);
        if eval.median > search.target {
            lo = mid;
        } else {
            hi = mid;
        }
        converged = (eval.median - search.target).abs() <= search.tolerance;
    }

    Ok(DepletionSolveResult {
        value: best.value,
        median: best.median,
        target: search.target,
        boundary_hit: None,
        iterations,
        converged,
    })
}

pub fn find_fire_month_for_median_depletion(
    params: &SimulationParams,
    search: &DepletionSearch,
) -> Result<DepletionSolveResult<usize>, SimulationError> {
    find_fire_month_with_cancel(params, search, &CancellationToken::new())
}

/// Bisect over whole FIRE months. The median rises the later independence
/// starts. Converged also covers the case where adjacent months straddle the
/// target and no finer month exists.
pub fn find_fire_month_with_cancel(
    params: &SimulationParams,
    search: &DepletionSearch,
    token: &CancellationToken,
) -> Result<DepletionSolveResult<usize>, SimulationError> {
    let horizon = params.max_months.min(params.total_months());
    let low_bound = search.search_min.unwrap_or(0.0);
    let high_bound = search.search_max.unwrap_or(horizon as f64);
    validate_search(search, low_bound, high_bound)?;

    let mut lo = low_bound.floor() as usize;
    let mut hi = (high_bound.ceil() as usize).min(horizon).max(lo + 1);

    let evaluate = |month: usize| {
        let options = MonteCarloOptions {
            force_fire_month: Some(month),
            ..search.monte_carlo
        };
        median_at(params, &options, token).map(|median| Evaluated { value: month, median })
    };

    let low_eval = evaluate(lo)?;
    let high_eval = evaluate(hi)?;
    if search.target < low_eval.median {
        return Ok(boundary(low_eval, search.target, BoundaryHit::Low));
    }
    if search.target > high_eval.median {
        return Ok(boundary(high_eval, search.target, BoundaryHit::High));
    }

    let mut best = low_eval.closer(high_eval, search.target);
    let mut iterations = Vec::with_capacity(search.max_iterations as usize);
    let mut converged = (best.median - search.target).abs() <= search.tolerance;

    let mut it = 0;
    while !converged && hi - lo > 1 && it < search.max_iterations {
        it += 1;
        let mid = lo + (hi - lo) / 2;
        let eval = evaluate(mid)?;
        iterations.push(DepletionIteration {
            iteration: it,
            lower_bound: lo,
            upper_bound: hi,
            candidate: mid,
            median: eval.median,
        });
        debug!(iteration = it, fire_month = mid, median = eval.median, "fire month bisection");

        best = best.closer(eval, search.target);
        if eval.median < search.target {
            lo = mid;
        } else {
            hi = mid;
        }
        converged = (eval.median - search.target).abs() <= search.tolerance;
    }

    Ok(DepletionSolveResult {
        value: best.value,
        median: best.median,
        target: search.target,
        boundary_hit: None,
        iterations,
        converged: converged || hi - lo <= 1,
    })
}

fn boundary<T>(eval: Evaluated<T>, target: f64, hit: BoundaryHit) -> DepletionSolveResult<T> {
    debug!(?hit, median = eval.median, target, "target outside search range");
    DepletionSolveResult {
        value: eval.value,
        median: eval.median,
        target,
        boundary_hit: Some(hit),
        iterations: Vec::new(),
        converged: false,
    }
}
