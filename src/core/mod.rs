mod analysis;
mod engine;
mod expenses;
mod montecarlo;
mod normalize;
mod pension;
mod solver;
mod types;

pub use analysis::{
    AnalysisOptions, DEFAULT_TARGET_SUCCESS_RATE, FullAnalysisResult, find_recommended_fire_month,
    run_full_monte_carlo_analysis,
};
pub use engine::{
    ProjectionOptions, SimulationOptions, find_survival_month, generate_annual_simulation,
    generate_growth_table, growth_table_from, perform_fire_simulation, required_assets, run_core_simulation,
    summarize_years,
};
pub use expenses::{
    ExpenseSchedule, LifestyleReduction, calculate_age, independence_months,
    lifestyle_reduction_from_breakdown, parse_birth_date,
};
pub use montecarlo::{
    CancellationToken, LogNormalMonthly, MonteCarloOptions, Rng, percentile,
    run_monte_carlo_simulation, run_monte_carlo_with_cancel,
};
pub use normalize::{
    Loose, RawPensionConfig, RawSimulationParams, default_params, normalize_params,
    normalize_params_at, params_from_json,
};
pub use pension::{annual_pension_at_fire, monthly_pension, start_age_adjustment_rate};
pub use solver::{
    BoundaryHit, DepletionIteration, DepletionSearch, DepletionSolveResult,
    find_fire_month_for_median_depletion, find_fire_month_with_cancel,
    find_withdrawal_rate_for_median_depletion, find_withdrawal_rate_with_cancel,
};
pub use types::{
    AnnualSummary, ExpenseCategory, ExpenseItem, GrowthRow, GrowthTable, HouseholdType,
    MonteCarloResult, MonthlyState, PensionConfig, SimulationParams, SimulationResult, YearMonth,
    fire_month,
};
