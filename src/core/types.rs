use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HouseholdType {
    #[default]
    Single,
    Couple,
    Family,
}

/// Spending categories recognised by the breakdown-driven lifestyle reduction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpenseCategory {
    Food,
    Education,
    Communication,
    ClothingBeauty,
    DailyGoods,
    #[serde(other)]
    Other,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseItem {
    pub category: ExpenseCategory,
    pub amount: f64,
}

/// Calendar month used for mortgage payoff and dependent independence keys.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn plus_months(self, months: usize) -> Self {
        let zero_based = self.year as i64 * 12 + (self.month as i64 - 1) + months as i64;
        Self {
            year: zero_based.div_euclid(12) as i32,
            month: zero_based.rem_euclid(12) as u32 + 1,
        }
    }

    /// Parses `YYYY-MM`, also accepting a trailing `-DD`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().split('-');
        let year = parts.next()?.parse::<i32>().ok()?;
        let month = parts.next()?.parse::<u32>().ok()?;
        Self::new(year, month)
    }

    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PensionConfig {
    pub user_start_age: f64,
    pub spouse_start_age: f64,
    pub basic_full_annual: f64,
    pub basic_participation: f64,
    /// Overrides the rate derived from `user_start_age` when set.
    pub start_age_adjustment: Option<f64>,
    pub data_age: f64,
    pub accrued_at_data_age: f64,
    pub accrual_per_year: f64,
    pub include_spouse: bool,
}

impl Default for PensionConfig {
    fn default() -> Self {
        Self {
            user_start_age: 65.0,
            spouse_start_age: 65.0,
            basic_full_annual: 780_000.0,
            basic_participation: 0.9,
            start_age_adjustment: None,
            data_age: 44.0,
            accrued_at_data_age: 1_000_000.0,
            accrual_per_year: 42_000.0,
            include_spouse: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    pub initial_assets: f64,
    pub risk_assets: f64,
    pub annual_return_rate: f64,
    pub monthly_expense: f64,
    pub monthly_income: f64,
    pub current_age: f64,
    pub simulation_end_age: f64,
    pub include_inflation: bool,
    pub inflation_rate: f64,
    pub include_tax: bool,
    pub tax_rate: f64,
    pub withdrawal_rate: f64,
    pub mortgage_monthly_payment: f64,
    pub mortgage_payoff: Option<YearMonth>,
    pub post_fire_extra_expense: f64,
    pub post_fire_first_year_extra_expense: f64,
    pub retirement_lump_sum_at_fire: f64,
    pub include_pension: bool,
    pub monthly_investment: f64,
    pub max_months: usize,
    pub pension_config: PensionConfig,
    pub household_type: HouseholdType,
    pub dependent_birth_dates: Vec<NaiveDate>,
    pub independence_age: u32,
    pub start_month: YearMonth,
    pub expense_breakdown: Option<Vec<ExpenseItem>>,
}

impl SimulationParams {
    /// Number of month transitions between now and the end age.
    pub fn total_months(&self) -> usize {
        ((self.simulation_end_age - self.current_age) * 12.0)
            .floor()
            .max(0.0) as usize
    }

    pub fn monthly_return_mean(&self) -> f64 {
        (1.0 + self.annual_return_rate).powf(1.0 / 12.0) - 1.0
    }

    pub fn monthly_inflation_rate(&self) -> f64 {
        let annual = if self.include_inflation {
            self.inflation_rate
        } else {
            0.0
        };
        (1.0 + annual).powf(1.0 / 12.0) - 1.0
    }

    pub fn effective_tax_rate(&self) -> f64 {
        if self.include_tax { self.tax_rate } else { 0.0 }
    }

    /// Flat monthly return path at the expected mean, one entry per simulated month.
    pub fn mean_returns(&self) -> Vec<f64> {
        vec![self.monthly_return_mean(); self.total_months() + 1]
    }

    pub fn age_at_month(&self, month: usize) -> f64 {
        self.current_age + month as f64 / 12.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyState {
    pub month: usize,
    pub age: f64,
    pub assets: f64,
    pub risk_assets: f64,
    pub cash_assets: f64,
    pub is_fire: bool,
    pub income: f64,
    pub pension: f64,
    pub expenses: f64,
    pub investment_gain: f64,
    pub withdrawal: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_assets: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    #[serde(with = "fire_month")]
    pub fire_reached_month: Option<usize>,
    pub monthly_data: Vec<MonthlyState>,
    pub survived: bool,
    pub final_assets: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub success_rate: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub p10_path: Vec<f64>,
    pub p50_path: Vec<f64>,
    pub p90_path: Vec<f64>,
    pub trials: usize,
    #[serde(with = "fire_month")]
    pub fire_reached_month: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthRow {
    pub month: usize,
    pub age: f64,
    pub assets: f64,
    pub required_assets: f64,
    pub is_fire: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthTable {
    pub table: Vec<GrowthRow>,
    #[serde(with = "fire_month")]
    pub fire_reached_month: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnualSummary {
    pub age: u32,
    pub income: f64,
    pub pension: f64,
    pub expenses: f64,
    pub withdrawal: f64,
    pub investment_gain: f64,
    pub assets: f64,
    pub assets_year_end: f64,
    pub risk_assets: f64,
    pub cash_assets: f64,
    pub savings: f64,
    pub fire_month_in_year: Option<usize>,
}

/// FIRE months travel as `-1` on the wire when independence is never reached.
pub mod fire_month {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(month) => serializer.serialize_i64(*month as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
        let raw = Option::<i64>::deserialize(deserializer)?;
        Ok(raw.and_then(|m| usize::try_from(m).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_month_adds_across_year_boundary() {
        let start = YearMonth::new(2025, 11).expect("valid month");
        assert_eq!(start.plus_months(2), YearMonth::new(2026, 1).expect("valid"));
        assert_eq!(start.plus_months(14).to_string(), "2027-01");
    }

    #[test]
    fn year_month_parse_accepts_day_suffix_and_rejects_garbage() {
        assert_eq!(YearMonth::parse("2030-04"), YearMonth::new(2030, 4));
        assert_eq!(YearMonth::parse("2030-04-15"), YearMonth::new(2030, 4));
        assert_eq!(YearMonth::parse("2030-13"), None);
        assert_eq!(YearMonth::parse("soon"), None);
        assert_eq!(YearMonth::parse(""), None);
    }

    #[test]
    fn never_reached_fire_month_serializes_as_minus_one() {
        let result = SimulationResult {
            fire_reached_month: None,
            monthly_data: Vec::new(),
            survived: false,
            final_assets: -1.0,
        };
        let json = serde_json::to_value(&result).expect("serializable");
        assert_eq!(json["fireReachedMonth"], -1);
        assert_eq!(json["survived"], false);
    }
}
