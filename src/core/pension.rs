use super::types::PensionConfig;

const BASELINE_START_AGE: f64 = 65.0;
const EARLIEST_START_AGE: f64 = 60.0;
const LATEST_START_AGE: f64 = 75.0;
const EARLY_REDUCTION_PER_MONTH: f64 = 0.004;
const LATE_INCREASE_PER_MONTH: f64 = 0.007;
/// Employee-pension contributions are not credited past this age.
const PARTICIPATION_CAP_AGE: f64 = 60.0;

/// Benefit multiplier for claiming at `start_age` instead of 65.
pub fn start_age_adjustment_rate(start_age: f64) -> f64 {
    let start_age = start_age.clamp(EARLIEST_START_AGE, LATEST_START_AGE);
    let months_offset = ((start_age - BASELINE_START_AGE) * 12.0).round();
    if months_offset < 0.0 {
        1.0 + EARLY_REDUCTION_PER_MONTH * months_offset
    } else {
        1.0 + LATE_INCREASE_PER_MONTH * months_offset
    }
}

/// Monthly household pension in yen at `age`, for a primary earner who stopped
/// working at `fire_age`.
pub fn monthly_pension(age: f64, fire_age: f64, config: &PensionConfig) -> f64 {
    let mut total_annual = 0.0;

    if age >= config.user_start_age {
        let adjustment = config
            .start_age_adjustment
            .unwrap_or_else(|| start_age_adjustment_rate(config.user_start_age));
        let basic_part = config.basic_full_annual * config.basic_participation * adjustment;

        let participation_end_age = fire_age.min(PARTICIPATION_CAP_AGE);
        let future_years = (participation_end_age - config.data_age).max(0.0);
        let employee_part = config.accrued_at_data_age + future_years * config.accrual_per_year;

        total_annual += basic_part + employee_part * adjustment;
    }

    if config.include_spouse && age >= config.spouse_start_age {
        total_annual += config.basic_full_annual;
    }

    (total_annual / 12.0).round()
}

/// Annual household pension at age 60 for someone who retires at `fire_age`.
pub fn annual_pension_at_fire(fire_age: f64, config: &PensionConfig) -> f64 {
    monthly_pension(PARTICIPATION_CAP_AGE, fire_age, config) * 12.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert_eq, proptest};

    fn legacy_config() -> PensionConfig {
        PensionConfig {
            user_start_age: 60.0,
            spouse_start_age: 62.0,
            basic_full_annual: 780_000.0,
            basic_participation: 0.9,
            start_age_adjustment: Some(0.76),
            data_age: 44.0,
            accrued_at_data_age: 892_252.0,
            accrual_per_year: 42_000.0,
            include_spouse: true,
        }
    }

    #[test]
    fn no_benefit_before_start_age() {
        assert_eq!(monthly_pension(59.99, 50.0, &legacy_config()), 0.0);
        assert_eq!(monthly_pension(-3.0, 50.0, &legacy_config()), 0.0);
    }

    #[test]
    fn early_start_with_explicit_adjustment() {
        // (702,000 * 0.76) + (892,252 + 6 * 42,000) * 0.76 = 1,403,152 / 12
        assert_eq!(monthly_pension(60.0, 50.0, &legacy_config()), 116_929.0);
    }

    #[test]
    fn spouse_basic_pension_is_added_unscaled() {
        assert_eq!(monthly_pension(62.0, 50.0, &legacy_config()), 181_929.0);
    }

    #[test]
    fn retiring_before_data_age_keeps_only_accrued_amount() {
        assert_eq!(monthly_pension(60.0, 40.0, &legacy_config()), 100_969.0);
    }

    #[test]
    fn baseline_start_age_uses_unit_adjustment() {
        let config = PensionConfig {
            user_start_age: 65.0,
            spouse_start_age: 99.0,
            start_age_adjustment: None,
            ..legacy_config()
        };
        assert_eq!(monthly_pension(65.0, 50.0, &config), 153_854.0);
    }

    #[test]
    fn derived_adjustment_reduces_early_and_increases_late_claims() {
        let early = PensionConfig {
            user_start_age: 64.0,
            spouse_start_age: 99.0,
            start_age_adjustment: None,
            ..legacy_config()
        };
        assert_eq!(monthly_pension(64.0, 50.0, &early), 146_469.0);

        let late = PensionConfig {
            user_start_age: 66.0,
            ..early
        };
        assert_eq!(monthly_pension(66.0, 50.0, &late), 166_778.0);
    }

    #[test]
    fn adjustment_rate_is_bounded_by_claiming_window() {
        assert!((start_age_adjustment_rate(65.0) - 1.0).abs() < 1e-12);
        assert!((start_age_adjustment_rate(66.0) - 1.084).abs() < 1e-12);
        assert!((start_age_adjustment_rate(55.0) - 0.76).abs() < 1e-12);
        assert!((start_age_adjustment_rate(80.0) - 1.84).abs() < 1e-12);
    }

    #[test]
    fn annual_pension_at_fire_is_twelve_monthly_payments() {
        let config = legacy_config();
        assert_eq!(
            annual_pension_at_fire(50.0, &config),
            monthly_pension(60.0, 50.0, &config) * 12.0
        );
    }

    proptest! {
        #[test]
        fn prop_participation_caps_at_sixty(fire_age in 60.0f64..100.0) {
            let config = legacy_config();
            prop_assert_eq!(
                monthly_pension(60.0, fire_age, &config),
                monthly_pension(60.0, 60.0, &config)
            );
        }
    }
}
