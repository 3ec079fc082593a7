use chrono::{Datelike, NaiveDate};

use super::types::{ExpenseCategory, ExpenseItem, HouseholdType, SimulationParams, YearMonth};

/// Month when independence takes effect: April of the year the dependent reaches
/// `independence_age`.
const INDEPENDENCE_MONTH: u32 = 4;

const SINGLE_DEPENDENT_FACTORS: [f64; 2] = [1.0, 0.8];
const TWO_DEPENDENT_FACTORS: [f64; 3] = [1.0, 0.85, 0.70];
const THREE_DEPENDENT_FACTORS: [f64; 4] = [1.0, 0.90, 0.80, 0.65];

/// Household-size-dependent reduction applied to non-mortgage living costs as
/// dependents become independent.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LifestyleReduction {
    None,
    OneDependent,
    TwoDependents,
    ThreeDependents,
}

impl LifestyleReduction {
    pub fn for_household(household_type: HouseholdType, dependents: usize) -> Self {
        if household_type != HouseholdType::Family {
            return Self::None;
        }
        match dependents {
            0 => Self::None,
            1 => Self::OneDependent,
            2 => Self::TwoDependents,
            _ => Self::ThreeDependents,
        }
    }

    fn factors(self) -> &'static [f64] {
        match self {
            Self::None => &[1.0],
            Self::OneDependent => &SINGLE_DEPENDENT_FACTORS,
            Self::TwoDependents => &TWO_DEPENDENT_FACTORS,
            Self::ThreeDependents => &THREE_DEPENDENT_FACTORS,
        }
    }

    pub fn factor(self, independent_count: usize) -> f64 {
        let factors = self.factors();
        factors[independent_count.min(factors.len() - 1)]
    }
}

/// Sorted independence months for each dependent.
pub fn independence_months(birth_dates: &[NaiveDate], independence_age: u32) -> Vec<YearMonth> {
    let mut months = birth_dates
        .iter()
        .filter_map(|birth| {
            let year = i32::try_from(independence_age)
                .ok()
                .and_then(|age| birth.year().checked_add(age))?;
            YearMonth::new(year, INDEPENDENCE_MONTH)
        })
        .collect::<Vec<_>>();
    months.sort();
    months
}

/// Completed years between `birth_date` and `on`. Unparsable dates give 0.
pub fn calculate_age(birth_date: &str, on: NaiveDate) -> u32 {
    let Some(birth) = parse_birth_date(birth_date) else {
        return 0;
    };
    let mut age = on.year() - birth.year();
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age.max(0) as u32
}

pub fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y/%m/%d"))
        .ok()
        .or_else(|| YearMonth::parse(raw).and_then(YearMonth::first_day))
}

/// Weighted reduction derived from an itemised budget.
///
/// This is the older breakdown-driven variant. The schedule builder uses the
/// fixed per-household tables in [`LifestyleReduction`] instead; this stays
/// available for callers that want to show the itemised estimate.
pub fn lifestyle_reduction_from_breakdown(breakdown: &[ExpenseItem]) -> f64 {
    let mut original_total = 0.0;
    let mut reduced_total = 0.0;
    for item in breakdown {
        original_total += item.amount;
        reduced_total += item.amount * category_multiplier(item.category);
    }
    if original_total == 0.0 {
        return 1.0;
    }
    reduced_total / original_total
}

fn category_multiplier(category: ExpenseCategory) -> f64 {
    match category {
        ExpenseCategory::Food
        | ExpenseCategory::Communication
        | ExpenseCategory::ClothingBeauty
        | ExpenseCategory::DailyGoods => 2.0 / 3.0,
        ExpenseCategory::Education => 0.0,
        ExpenseCategory::Other => 1.0,
    }
}

/// Per-month expense vectors, indexed by month offset from the start month.
#[derive(Debug, Clone)]
pub struct ExpenseSchedule {
    /// Inflation-adjusted living cost, lifestyle reduction applied, plus any
    /// mortgage still being paid.
    pub base: Vec<f64>,
    /// Inflation-adjusted post-FIRE extra cost, charged only once FIRE is active.
    pub extra: Vec<f64>,
    monthly_inflation: f64,
}

impl ExpenseSchedule {
    pub fn build(params: &SimulationParams) -> Self {
        let months = params.total_months();
        let monthly_inflation = params.monthly_inflation_rate();
        let mortgage = params.mortgage_monthly_payment.max(0.0);
        let non_mortgage = (params.monthly_expense - mortgage).max(0.0);

        let independence = independence_months(&params.dependent_birth_dates, params.independence_age);
        let reduction = LifestyleReduction::for_household(params.household_type, independence.len());

        let mut base = Vec::with_capacity(months + 1);
        let mut extra = Vec::with_capacity(months + 1);
        for k in 0..=months {
            let calendar_month = params.start_month.plus_months(k);
            let independent_count = independence.iter().filter(|m| calendar_month >= **m).count();
            let inflation_index = (1.0 + monthly_inflation).powi(k as i32);

            let mortgage_due = match params.mortgage_payoff {
                Some(payoff) if calendar_month > payoff => 0.0,
                _ => mortgage,
            };

            base.push(non_mortgage * reduction.factor(independent_count) * inflation_index + mortgage_due);
            extra.push(params.post_fire_extra_expense * inflation_index);
        }

        Self {
            base,
            extra,
            monthly_inflation,
        }
    }

    pub fn months(&self) -> usize {
        self.base.len().saturating_sub(1)
    }

    /// Inflation factor from the start month to month `k`.
    pub fn inflation_index(&self, k: usize) -> f64 {
        (1.0 + self.monthly_inflation).powi(k as i32)
    }

    /// Monthly slice of the first-year post-FIRE spike at month `k`.
    pub fn first_year_spike(&self, annual_amount: f64, k: usize) -> f64 {
        (annual_amount / 12.0) * self.inflation_index(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize::default_params;

    fn date(raw: &str) -> NaiveDate {
        parse_birth_date(raw).expect("valid date")
    }

    fn family_params(birth_dates: &[&str], monthly_expense: f64) -> SimulationParams {
        let mut params = default_params();
        params.current_age = 45.0;
        params.monthly_expense = monthly_expense;
        params.household_type = HouseholdType::Family;
        params.dependent_birth_dates = birth_dates.iter().map(|d| date(d)).collect();
        params.start_month = YearMonth::new(2025, 5).expect("valid");
        params
    }

    #[test]
    fn independence_is_april_of_the_year_the_dependent_turns_the_age() {
        let months = independence_months(&[date("2013-02-20")], 24);
        assert_eq!(months, vec![YearMonth::new(2037, 4).expect("valid")]);
    }

    #[test]
    fn out_of_range_independence_age_drops_the_dependent() {
        assert!(independence_months(&[date("2013-02-20")], u32::MAX).is_empty());
        assert!(independence_months(&[date("2013-02-20")], i32::MAX as u32).is_empty());
    }

    #[test]
    fn single_dependent_reduction_starts_in_april_2037() {
        let schedule = ExpenseSchedule::build(&family_params(&["2013-02-20"], 140_000.0));
        // 2025-05 + 142 months = 2037-03
        assert_eq!(schedule.base[142], 140_000.0);
        assert_eq!(schedule.base[143], 112_000.0);
        assert_eq!(schedule.base[200], 112_000.0);
    }

    #[test]
    fn three_dependents_step_through_reduction_table() {
        let schedule = ExpenseSchedule::build(&family_params(
            &["2013-02-20", "2015-05-10", "2018-10-01"],
            200_000.0,
        ));
        assert_eq!(schedule.base[142], 200_000.0);
        assert_eq!(schedule.base[143], 180_000.0);
        assert_eq!(schedule.base[167], 160_000.0);
        assert_eq!(schedule.base[203], 130_000.0);
    }

    #[test]
    fn two_dependents_use_their_own_table() {
        let schedule = ExpenseSchedule::build(&family_params(&["2013-02-20", "2015-05-10"], 100_000.0));
        assert!((schedule.base[143] - 85_000.0).abs() < 1e-9);
        assert!((schedule.base[167] - 70_000.0).abs() < 1e-9);
    }

    #[test]
    fn non_family_household_never_reduces() {
        let mut params = family_params(&["2013-02-20"], 140_000.0);
        params.household_type = HouseholdType::Couple;
        let schedule = ExpenseSchedule::build(&params);
        assert_eq!(schedule.base[143], 140_000.0);
    }

    #[test]
    fn mortgage_is_paid_through_payoff_month_then_dropped() {
        let mut params = default_params();
        params.monthly_expense = 90_000.0;
        params.mortgage_monthly_payment = 50_000.0;
        params.mortgage_payoff = YearMonth::new(2026, 2);
        params.start_month = YearMonth::new(2026, 1).expect("valid");
        let schedule = ExpenseSchedule::build(&params);
        assert_eq!(schedule.base[0], 90_000.0);
        assert_eq!(schedule.base[1], 90_000.0);
        assert_eq!(schedule.base[2], 40_000.0);
    }

    #[test]
    fn mortgage_without_payoff_is_paid_for_the_whole_horizon_uninflated() {
        let mut params = default_params();
        params.monthly_expense = 100_000.0;
        params.mortgage_monthly_payment = 30_000.0;
        params.include_inflation = true;
        params.inflation_rate = 0.02;
        let schedule = ExpenseSchedule::build(&params);
        let last = schedule.months();
        let expected = 70_000.0 * schedule.inflation_index(last) + 30_000.0;
        assert!((schedule.base[last] - expected).abs() < 1e-6);
    }

    #[test]
    fn extra_expense_inflates_monthly() {
        let mut params = default_params();
        params.post_fire_extra_expense = 60_000.0;
        params.include_inflation = true;
        params.inflation_rate = 0.02;
        let schedule = ExpenseSchedule::build(&params);
        assert_eq!(schedule.extra[0], 60_000.0);
        assert!((schedule.extra[12] - 61_200.0).abs() < 1e-6);
    }

    #[test]
    fn breakdown_reduction_weights_categories() {
        let breakdown = [
            ExpenseItem {
                category: ExpenseCategory::Food,
                amount: 60_000.0,
            },
            ExpenseItem {
                category: ExpenseCategory::Other,
                amount: 80_000.0,
            },
        ];
        let factor = lifestyle_reduction_from_breakdown(&breakdown);
        assert!((factor - 120_000.0 / 140_000.0).abs() < 1e-12);
        assert_eq!(lifestyle_reduction_from_breakdown(&[]), 1.0);
    }

    #[test]
    fn calculate_age_handles_birthdays_and_bad_input() {
        let on = date("2025-05-14");
        assert_eq!(calculate_age("1979-09-02", on), 45);
        assert_eq!(calculate_age("1979-05-14", on), 46);
        assert_eq!(calculate_age("not a date", on), 0);
        assert_eq!(calculate_age("", on), 0);
    }
}
