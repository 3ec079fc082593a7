use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::engine::{ProjectionOptions, SimulationOptions, perform_fire_simulation, run_core_simulation};
use super::expenses::ExpenseSchedule;
use super::types::{MonteCarloResult, SimulationParams, fire_month};
use crate::error::SimulationError;

pub const DEFAULT_TRIALS: usize = 1000;
pub const DEFAULT_ANNUAL_VOLATILITY: f64 = 0.15;
pub const DEFAULT_SEED: u32 = 123;
pub const MAX_TRIALS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonteCarloOptions {
    pub trials: usize,
    pub annual_volatility: f64,
    pub seed: u32,
    /// Skips the deterministic FIRE-month search when set.
    #[serde(with = "fire_month")]
    pub force_fire_month: Option<usize>,
    /// Consume withdrawals above the spending shortfall after FIRE.
    pub spend_withdrawal_surplus: bool,
}

impl Default for MonteCarloOptions {
    fn default() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            annual_volatility: DEFAULT_ANNUAL_VOLATILITY,
            seed: DEFAULT_SEED,
            force_fire_month: None,
            spend_withdrawal_surplus: false,
        }
    }
}

impl MonteCarloOptions {
    pub fn sanitized_trials(&self) -> usize {
        self.trials.clamp(1, MAX_TRIALS)
    }

    pub fn sanitized_volatility(&self) -> f64 {
        if self.annual_volatility.is_finite() {
            self.annual_volatility.max(0.0)
        } else {
            0.0
        }
    }
}

/// Shared flag checked between trials.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Mulberry32 generator. Small state, fully determined by the seed.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x6D2B_79F5);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }

    /// Box-Muller, cosine branch only. Consumes one pair of non-zero uniforms
    /// per sample.
    pub fn standard_normal(&mut self) -> f64 {
        let mut u = 0.0;
        while u == 0.0 {
            u = self.next_f64();
        }
        let mut v = 0.0;
        while v == 0.0 {
            v = self.next_f64();
        }
        (-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos()
    }
}

/// Monthly parameters of the normal underlying a log-normal return whose
/// arithmetic annual mean and volatility match the inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormalMonthly {
    pub mean: f64,
    pub std_dev: f64,
}

impl LogNormalMonthly {
    pub fn from_annual(mean: f64, volatility: f64) -> Self {
        let growth = (1.0 + mean).max(f64::EPSILON);
        let spread = (1.0 + (volatility / growth).powi(2)).ln();
        let alpha = growth.ln() - 0.5 * spread;
        Self {
            mean: alpha / 12.0,
            std_dev: (spread / 12.0).sqrt(),
        }
    }

    pub fn sample(&self, rng: &mut Rng) -> f64 {
        (self.mean + self.std_dev * rng.standard_normal()).exp() - 1.0
    }

    pub fn sample_path(&self, rng: &mut Rng, months: usize) -> Vec<f64> {
        (0..=months).map(|_| self.sample(rng)).collect()
    }
}

/// Linear interpolation between order statistics. Sorts `values` in place.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
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
        values[lower] + (values[upper] - values[lower]) * w
    }
}

pub fn run_monte_carlo_simulation(params: &SimulationParams, options: &MonteCarloOptions) -> MonteCarloResult {
    run_trials(params, options, || true)
}

/// Runs the trials sequentially from one seeded generator, checking `token`
/// before each trial.
pub fn run_monte_carlo_with_cancel(
    params: &SimulationParams,
    options: &MonteCarloOptions,
    token: &CancellationToken,
) -> Result<MonteCarloResult, SimulationError> {
    let mut cancelled = false;
    let result = run_trials(params, options, || {
        cancelled = token.is_cancelled();
        !cancelled
    });
    if cancelled {
        return Err(SimulationError::Cancelled);
    }
    Ok(result)
}

/// Trial loop shared by both entry points. `proceed` is asked before each
/// trial; returning false stops the run early.
fn run_trials<F>(params: &SimulationParams, options: &MonteCarloOptions, mut proceed: F) -> MonteCarloResult
where
    F: FnMut() -> bool,
{
    let fire_month = match options.force_fire_month {
        Some(month) => Some(month),
        None => perform_fire_simulation(params, &SimulationOptions::default()).fire_reached_month,
    };

    let trials = options.sanitized_trials();
    let distribution = LogNormalMonthly::from_annual(params.annual_return_rate, options.sanitized_volatility());
    let schedule = ExpenseSchedule::build(params);
    let total_months = params.total_months();
    let total_years = total_months.div_ceil(12);
    let mut rng = Rng::new(options.seed);

    let mut final_assets = Vec::new();
    let mut yearly = vec![Vec::new(); total_years + 1];
    let mut successes = 0usize;

    for _ in 0..trials {
        if !proceed() {
            break;
        }

        let returns = distribution.sample_path(&mut rng, total_months);
        let result = run_core_simulation(
            params,
            &schedule,
            &ProjectionOptions {
                fire_month,
                returns: &returns,
                record_monthly: true,
                skip_required_assets: true,
                spend_surplus: options.spend_withdrawal_surplus,
            },
        );

        final_assets.push(result.final_assets);
        if result.survived {
            successes += 1;
        }

        for (year, samples) in yearly.iter_mut().enumerate() {
            let row = result
                .monthly_data
                .get(year * 12)
                .or(result.monthly_data.last());
            samples.push(row.map_or(0.0, |r| r.assets));
        }
    }

    let mut p10_path = Vec::with_capacity(yearly.len());
    let mut p50_path = Vec::with_capacity(yearly.len());
    let mut p90_path = Vec::with_capacity(yearly.len());
    for samples in &mut yearly {
        p10_path.push(percentile(samples, 10.0));
        p50_path.push(percentile(samples, 50.0));
        p90_path.push(percentile(samples, 90.0));
    }

    let result = MonteCarloResult {
        success_rate: successes as f64 / trials as f64,
        p10: percentile(&mut final_assets, 10.0),
        p50: percentile(&mut final_assets, 50.0),
        p90: percentile(&mut final_assets, 90.0),
        p10_path,
        p50_path,
        p90_path,
        trials,
        fire_reached_month: fire_month,
    };

    debug!(
        trials,
        seed = options.seed,
        success_rate = result.success_rate,
        p50 = result.p50,
        "monte carlo run complete"
    );
    result
}
