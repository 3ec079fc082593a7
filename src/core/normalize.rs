use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use super::expenses::{calculate_age, parse_birth_date};
use super::types::{ExpenseItem, HouseholdType, PensionConfig, SimulationParams, YearMonth};
use crate::error::SimulationError;

pub const DEFAULT_CURRENT_AGE: f64 = 40.0;
pub const DEFAULT_END_AGE: f64 = 100.0;
pub const MIN_END_AGE: f64 = 80.0;
pub const DEFAULT_TAX_RATE: f64 = 0.20315;
pub const MAX_TAX_RATE: f64 = 0.99;
pub const DEFAULT_INFLATION_RATE: f64 = 0.02;
pub const DEFAULT_WITHDRAWAL_RATE: f64 = 0.04;
pub const DEFAULT_LUMP_SUM: f64 = 5_000_000.0;
pub const DEFAULT_MAX_MONTHS: usize = 1200;
pub const DEFAULT_INDEPENDENCE_AGE: u32 = 24;
pub const MAX_DEPENDENTS: usize = 3;
pub const MAX_INDEPENDENCE_AGE: u32 = 150;

/// A field as it arrives from a form or a hand-written JSON file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Loose {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl Loose {
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Loose::Number(v) => *v,
            Loose::Flag(b) => f64::from(u8::from(*b)),
            Loose::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Loose::Number(v) => *v != 0.0 && !v.is_nan(),
            Loose::Flag(b) => *b,
            Loose::Text(s) => !s.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Loose::Text(s) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<f64> for Loose {
    fn from(value: f64) -> Self {
        Loose::Number(value)
    }
}

impl From<bool> for Loose {
    fn from(value: bool) -> Self {
        Loose::Flag(value)
    }
}

impl From<&str> for Loose {
    fn from(value: &str) -> Self {
        Loose::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawPensionConfig {
    pub user_start_age: Option<Loose>,
    pub spouse_start_age: Option<Loose>,
    pub basic_full_annual: Option<Loose>,
    pub basic_participation: Option<Loose>,
    pub start_age_adjustment: Option<Loose>,
    pub data_age: Option<Loose>,
    pub accrued_at_data_age: Option<Loose>,
    pub accrual_per_year: Option<Loose>,
    pub include_spouse: Option<Loose>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawSimulationParams {
    pub initial_assets: Option<Loose>,
    pub risk_assets: Option<Loose>,
    pub annual_return_rate: Option<Loose>,
    pub monthly_expense: Option<Loose>,
    /// Annual total, used only when `monthly_expense` is absent.
    pub monthly_expenses: Option<Loose>,
    pub monthly_income: Option<Loose>,
    pub current_age: Option<Loose>,
    pub user_birth_date: Option<String>,
    pub simulation_end_age: Option<Loose>,
    pub include_inflation: Option<Loose>,
    pub inflation_rate: Option<Loose>,
    pub include_tax: Option<Loose>,
    pub tax_rate: Option<Loose>,
    pub withdrawal_rate: Option<Loose>,
    pub mortgage_monthly_payment: Option<Loose>,
    pub mortgage_payoff_date: Option<String>,
    pub post_fire_extra_expense: Option<Loose>,
    pub post_fire_first_year_extra_expense: Option<Loose>,
    pub retirement_lump_sum_at_fire: Option<Loose>,
    pub include_pension: Option<Loose>,
    pub monthly_investment: Option<Loose>,
    pub max_months: Option<Loose>,
    pub pension_config: Option<RawPensionConfig>,
    pub household_type: Option<String>,
    pub dependent_birth_date: Option<String>,
    pub dependent_birth_dates: Option<Vec<Option<String>>>,
    pub independence_age: Option<Loose>,
    pub start_month: Option<String>,
    pub expense_breakdown: Option<Vec<ExpenseItem>>,
}

fn number(field: &Option<Loose>, default: f64) -> f64 {
    field.as_ref().and_then(Loose::as_f64).unwrap_or(default)
}

/// Like [`number`] but zero also falls back to the default.
fn nonzero_number(field: &Option<Loose>, default: f64) -> f64 {
    match field.as_ref().and_then(Loose::as_f64) {
        Some(v) if v != 0.0 => v,
        _ => default,
    }
}

fn flag(field: &Option<Loose>) -> bool {
    field.as_ref().is_some_and(Loose::is_truthy)
}

fn household_type(raw: Option<&str>) -> HouseholdType {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("couple") => HouseholdType::Couple,
        Some("family") => HouseholdType::Family,
        _ => HouseholdType::Single,
    }
}

pub fn normalize_pension_config(raw: &RawPensionConfig) -> PensionConfig {
    let defaults = PensionConfig::default();
    PensionConfig {
        user_start_age: number(&raw.user_start_age, defaults.user_start_age),
        spouse_start_age: number(&raw.spouse_start_age, defaults.spouse_start_age),
        basic_full_annual: number(&raw.basic_full_annual, defaults.basic_full_annual),
        basic_participation: number(&raw.basic_participation, defaults.basic_participation),
        start_age_adjustment: raw.start_age_adjustment.as_ref().and_then(Loose::as_f64),
        data_age: number(&raw.data_age, defaults.data_age),
        accrued_at_data_age: number(&raw.accrued_at_data_age, defaults.accrued_at_data_age),
        accrual_per_year: number(&raw.accrual_per_year, defaults.accrual_per_year),
        include_spouse: raw
            .include_spouse
            .as_ref()
            .map_or(defaults.include_spouse, Loose::is_truthy),
    }
}

fn dependent_birth_dates(raw: &RawSimulationParams) -> Vec<NaiveDate> {
    let listed = raw
        .dependent_birth_dates
        .as_ref()
        .map(|dates| {
            dates
                .iter()
                .flatten()
                .filter(|s| !s.trim().is_empty())
                .take(MAX_DEPENDENTS)
                .cloned()
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let entries = if listed.is_empty() {
        raw.dependent_birth_date.iter().cloned().collect()
    } else {
        listed
    };

    entries.iter().filter_map(|s| parse_birth_date(s)).collect()
}

/// Clamp the horizon into `[max(80, ceil(current_age)), 100]`.
pub fn clamp_end_age(end_age: f64, current_age: f64) -> f64 {
    let lower = MIN_END_AGE.max(current_age.ceil());
    end_age.max(lower).min(DEFAULT_END_AGE)
}

/// Coerce raw input into immutable params, taking "now" from `today`.
pub fn normalize_params_at(raw: &RawSimulationParams, today: NaiveDate) -> SimulationParams {
    let initial_assets = number(&raw.initial_assets, 0.0);
    let risk_assets = number(&raw.risk_assets, 0.0).clamp(0.0, initial_assets.max(0.0));

    let monthly_expense = match raw.monthly_expense.as_ref().and_then(Loose::as_f64) {
        Some(v) => v,
        None => number(&raw.monthly_expenses, 0.0) / 12.0,
    };

    let mut current_age = nonzero_number(&raw.current_age, 0.0);
    if current_age == 0.0 {
        current_age = raw
            .user_birth_date
            .as_deref()
            .map(|birth| calculate_age(birth, today) as f64)
            .filter(|age| *age > 0.0)
            .unwrap_or(DEFAULT_CURRENT_AGE);
    }

    let start_month = raw
        .start_month
        .as_deref()
        .and_then(YearMonth::parse)
        .unwrap_or_else(|| YearMonth::from_date(today));

    let max_months = raw
        .max_months
        .as_ref()
        .and_then(Loose::as_f64)
        .filter(|v| *v >= 0.0)
        .map_or(DEFAULT_MAX_MONTHS, |v| v.floor() as usize);

    SimulationParams {
        initial_assets,
        risk_assets,
        annual_return_rate: number(&raw.annual_return_rate, 0.0),
        monthly_expense,
        monthly_income: number(&raw.monthly_income, 0.0),
        current_age,
        simulation_end_age: clamp_end_age(number(&raw.simulation_end_age, DEFAULT_END_AGE), current_age),
        include_inflation: flag(&raw.include_inflation),
        inflation_rate: number(&raw.inflation_rate, DEFAULT_INFLATION_RATE),
        include_tax: flag(&raw.include_tax),
        tax_rate: number(&raw.tax_rate, DEFAULT_TAX_RATE).clamp(0.0, MAX_TAX_RATE),
        withdrawal_rate: number(&raw.withdrawal_rate, DEFAULT_WITHDRAWAL_RATE).max(0.0),
        mortgage_monthly_payment: number(&raw.mortgage_monthly_payment, 0.0).max(0.0),
        mortgage_payoff: raw.mortgage_payoff_date.as_deref().and_then(YearMonth::parse),
        post_fire_extra_expense: number(&raw.post_fire_extra_expense, 0.0),
        post_fire_first_year_extra_expense: number(&raw.post_fire_first_year_extra_expense, 0.0),
        retirement_lump_sum_at_fire: number(&raw.retirement_lump_sum_at_fire, DEFAULT_LUMP_SUM),
        include_pension: flag(&raw.include_pension),
        monthly_investment: number(&raw.monthly_investment, 0.0).max(0.0),
        max_months,
        pension_config: raw
            .pension_config
            .as_ref()
            .map(normalize_pension_config)
            .unwrap_or_default(),
        household_type: household_type(raw.household_type.as_deref()),
        dependent_birth_dates: dependent_birth_dates(raw),
        independence_age: nonzero_number(&raw.independence_age, DEFAULT_INDEPENDENCE_AGE as f64)
            .clamp(0.0, MAX_INDEPENDENCE_AGE as f64) as u32,
        start_month,
        expense_breakdown: raw.expense_breakdown.clone(),
    }
}

pub fn normalize_params(raw: &RawSimulationParams) -> SimulationParams {
    normalize_params_at(raw, Local::now().date_naive())
}

pub fn params_from_json(json: &str) -> Result<SimulationParams, SimulationError> {
    let raw = serde_json::from_str::<RawSimulationParams>(json)?;
    Ok(normalize_params(&raw))
}

pub fn default_params() -> SimulationParams {
    normalize_params(&RawSimulationParams::default())
}
