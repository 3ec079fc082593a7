use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::montecarlo::{
    CancellationToken, DEFAULT_ANNUAL_VOLATILITY, DEFAULT_SEED, DEFAULT_TRIALS, MAX_TRIALS,
    MonteCarloOptions, run_monte_carlo_with_cancel,
};
use super::normalize::{Loose, RawSimulationParams, normalize_params};
use super::solver::{DepletionSearch, DepletionSolveResult, find_withdrawal_rate_with_cancel};
use super::types::{MonteCarloResult, SimulationParams, fire_month};
use crate::error::SimulationError;

pub const DEFAULT_TARGET_SUCCESS_RATE: f64 = 0.9;

/// Slack on the success-rate comparison so that `9 / 10` meets a 0.9 target.
const SUCCESS_RATE_EPSILON: f64 = 1e-12;

/// Options of a full analysis request. Every field is optional and loosely typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisOptions {
    pub trials: Option<f64>,
    pub annual_volatility: Option<f64>,
    pub seed: Option<u32>,
    pub target_success_rate: Option<f64>,
    pub simulation_end_age: Option<f64>,
    pub current_age: Option<f64>,
}

impl AnalysisOptions {
    pub fn monte_carlo(&self) -> MonteCarloOptions {
        let trials = match self.trials {
            Some(t) if t.is_finite() => t.clamp(1.0, MAX_TRIALS as f64).floor() as usize,
            Some(_) => 1,
            None => DEFAULT_TRIALS,
        };
        MonteCarloOptions {
            trials,
            annual_volatility: self.annual_volatility.unwrap_or(DEFAULT_ANNUAL_VOLATILITY),
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            ..MonteCarloOptions::default()
        }
    }

    pub fn target_success_rate(&self) -> f64 {
        match self.target_success_rate {
            Some(rate) if rate.is_finite() => rate.clamp(0.0, 1.0),
            _ => DEFAULT_TARGET_SUCCESS_RATE,
        }
    }

    /// Apply the age overrides to a copy of `raw`.
    fn apply_overrides(&self, raw: &RawSimulationParams) -> RawSimulationParams {
        let mut raw = raw.clone();
        if let Some(age) = self.current_age {
            raw.current_age = Some(Loose::Number(age));
        }
        if let Some(age) = self.simulation_end_age {
            raw.simulation_end_age = Some(Loose::Number(age));
        }
        raw
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullAnalysisResult {
    #[serde(flatten)]
    pub monte_carlo: MonteCarloResult,
    pub target_success_rate: f64,
    #[serde(with = "fire_month")]
    pub recommended_fire_month: Option<usize>,
    pub recommended_fire_age: Option<f64>,
    pub terminal_depletion_plan: Option<DepletionSolveResult<f64>>,
}

fn success_rate_at(
    params: &SimulationParams,
    options: &MonteCarloOptions,
    month: usize,
    token: &CancellationToken,
) -> Result<f64, SimulationError> {
    let forced = MonteCarloOptions {
        force_fire_month: Some(month),
        ..*options
    };
    Ok(run_monte_carlo_with_cancel(params, &forced, token)?.success_rate)
}

/// Earliest FIRE month whose Monte Carlo success rate reaches `target`.
///
/// Same stepping as the deterministic finder: whole years first, then a binary
/// search over the eleven months before the first passing year.
pub fn find_recommended_fire_month(
    params: &SimulationParams,
    options: &MonteCarloOptions,
    target: f64,
    token: &CancellationToken,
) -> Result<Option<usize>, SimulationError> {
    let limit = params.max_months.min(params.total_months());
    let passes = |month: usize| -> Result<bool, SimulationError> {
        Ok(success_rate_at(params, options, month, token)? + SUCCESS_RATE_EPSILON >= target)
    };

    let mut first_year = None;
    for month in (0..=limit).step_by(12) {
        if passes(month)? {
            first_year = Some(month);
            break;
        }
    }
    let Some(first_year) = first_year else {
        return Ok(None);
    };

    let mut low = first_year.saturating_sub(11);
    let mut high = first_year;
    while low < high {
        let mid = low + (high - low) / 2;
        if passes(mid)? {
            high = mid;
        } else {
            low = mid + 1;
        }
    }

    debug!(month = high, target, "located recommended FIRE month");
    Ok(Some(high))
}

/// Everything the Monte Carlo view needs from one request: the base run, the
/// FIRE month that meets the success target and a withdrawal rate that spends
/// the median balance down to zero from that month.
pub fn run_full_monte_carlo_analysis(
    raw: &RawSimulationParams,
    options: &AnalysisOptions,
    token: &CancellationToken,
) -> Result<FullAnalysisResult, SimulationError> {
    let params = normalize_params(&options.apply_overrides(raw));
    analyze(&params, options, token)
}

fn analyze(
    params: &SimulationParams,
    options: &AnalysisOptions,
    token: &CancellationToken,
) -> Result<FullAnalysisResult, SimulationError> {
    let mc_options = options.monte_carlo();
    let target_success_rate = options.target_success_rate();

    let monte_carlo = run_monte_carlo_with_cancel(params, &mc_options, token)?;
    let recommended_fire_month =
        find_recommended_fire_month(params, &mc_options, target_success_rate, token)?;
    let recommended_fire_age = recommended_fire_month.map(|month| params.age_at_month(month));

    let plan_month = recommended_fire_month.or(monte_carlo.fire_reached_month);
    let terminal_depletion_plan = match plan_month {
        Some(month) => {
            let search = DepletionSearch {
                target: 0.0,
                monte_carlo: MonteCarloOptions {
                    force_fire_month: Some(month),
                    ..mc_options
                },
                ..DepletionSearch::default()
            };
            Some(find_withdrawal_rate_with_cancel(params, &search, token)?)
        }
        None => None,
    };

    info!(
        trials = monte_carlo.trials,
        success_rate = monte_carlo.success_rate,
        recommended_fire_month = ?recommended_fire_month,
        "full monte carlo analysis complete"
    );

    Ok(FullAnalysisResult {
        monte_carlo,
        target_success_rate,
        recommended_fire_month,
        recommended_fire_age,
        terminal_depletion_plan,
    })
}
