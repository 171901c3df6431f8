//! Monthly-grid date arithmetic and the fiscal calendar.
//!
//! The organization's fiscal year starts three calendar months before the
//! calendar year: fiscal month 1 is calendar April of the prior fiscal
//! year's label. All series in the pipeline live on a first-of-month grid.

use serde::{Deserialize, Serialize};
use time::{Date, Month};

/// First day of the month containing `d`.
pub fn month_start(d: Date) -> Date {
    Date::from_calendar_date(d.year(), d.month(), 1).expect("day 1 is valid for every month")
}

/// Shift a first-of-month date by `months` (may be negative).
pub fn add_months(d: Date, months: i32) -> Date {
    let zero_based = d.year() * 12 + (d.month() as i32 - 1) + months;
    let year = zero_based.div_euclid(12);
    let month = Month::try_from((zero_based.rem_euclid(12) + 1) as u8)
        .expect("month index in 1..=12");
    Date::from_calendar_date(year, month, 1).expect("day 1 is valid for every month")
}

/// Whole months from `from` to `to` on the monthly grid.
pub fn months_between(from: Date, to: Date) -> i32 {
    (to.year() - from.year()) * 12 + (to.month() as i32 - from.month() as i32)
}

/// Inclusive monthly range `[start, end]`, both first-of-month.
pub fn month_range(start: Date, end: Date) -> Vec<Date> {
    let n = months_between(start, end);
    if n < 0 {
        return Vec::new();
    }
    (0..=n).map(|i| add_months(start, i)).collect()
}

/// Ceiling to the first of the next month unless already a month start.
pub fn ceil_to_month_start(d: Date) -> Date {
    if d.day() == 1 {
        d
    } else {
        add_months(month_start(d), 1)
    }
}

/// Calendar date for a fiscal (year, month) period. Fiscal month 1 maps to
/// calendar April.
pub fn fiscal_to_calendar(fiscal_year: i32, fiscal_month: u8) -> Option<Date> {
    if !(1..=12).contains(&fiscal_month) {
        return None;
    }
    let base = Date::from_calendar_date(fiscal_year, Month::January, 1).ok()?;
    Some(add_months(base, fiscal_month as i32 - 1 + 3))
}

/// Quarter of a calendar or fiscal month number.
pub fn quarter_of(month: u8) -> u8 {
    (month - 1) / 3 + 1
}

/// Fiscal month number for a calendar month: Jan-Mar map to 10-12, the
/// rest shift back by three.
pub fn fiscal_month_of(calendar_month: u8) -> u8 {
    if calendar_month <= 3 {
        calendar_month + 9
    } else {
        calendar_month - 3
    }
}

/// Calendar and fiscal period labels for a reporting month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodLabels {
    pub calendar_month: u8,
    pub calendar_year: i32,
    pub calendar_quarter: u8,
    pub fiscal_month: u8,
    pub fiscal_year: i32,
    pub fiscal_quarter: u8,
}

impl PeriodLabels {
    pub fn for_month(d: Date) -> Self {
        let calendar_month = d.month() as u8;
        let fiscal_month = fiscal_month_of(calendar_month);
        // Jan-Mar still belong to the previous fiscal year.
        let fiscal_year = if calendar_month <= 3 {
            d.year() - 1
        } else {
            d.year()
        };
        Self {
            calendar_month,
            calendar_year: d.year(),
            calendar_quarter: quarter_of(calendar_month),
            fiscal_month,
            fiscal_year,
            fiscal_quarter: quarter_of(fiscal_month),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn add_months_crosses_year_boundaries() {
        assert_eq!(add_months(date!(2023 - 11 - 01), 3), date!(2024 - 02 - 01));
        assert_eq!(add_months(date!(2023 - 01 - 01), -2), date!(2022 - 11 - 01));
        assert_eq!(add_months(date!(2020 - 06 - 01), 36), date!(2023 - 06 - 01));
    }

    #[test]
    fn months_between_is_signed() {
        assert_eq!(months_between(date!(2022 - 03 - 01), date!(2023 - 03 - 01)), 12);
        assert_eq!(months_between(date!(2023 - 03 - 01), date!(2022 - 12 - 01)), -3);
    }

    #[test]
    fn month_range_is_inclusive() {
        let range = month_range(date!(2023 - 10 - 01), date!(2024 - 01 - 01));
        assert_eq!(
            range,
            vec![
                date!(2023 - 10 - 01),
                date!(2023 - 11 - 01),
                date!(2023 - 12 - 01),
                date!(2024 - 01 - 01),
            ]
        );
        assert!(month_range(date!(2024 - 02 - 01), date!(2024 - 01 - 01)).is_empty());
    }

    #[test]
    fn fiscal_month_one_is_calendar_april() {
        assert_eq!(fiscal_to_calendar(2023, 1), Some(date!(2023 - 04 - 01)));
        // Fiscal month 10 spills into the next calendar year.
        assert_eq!(fiscal_to_calendar(2023, 10), Some(date!(2024 - 01 - 01)));
        assert_eq!(fiscal_to_calendar(2023, 0), None);
        assert_eq!(fiscal_to_calendar(2023, 13), None);
    }

    #[test]
    fn ceiling_keeps_month_starts() {
        assert_eq!(ceil_to_month_start(date!(2024 - 05 - 01)), date!(2024 - 05 - 01));
        assert_eq!(ceil_to_month_start(date!(2024 - 05 - 17)), date!(2024 - 06 - 01));
        assert_eq!(ceil_to_month_start(date!(2024 - 12 - 31)), date!(2025 - 01 - 01));
    }

    #[test]
    fn labels_lag_fiscal_year_in_first_quarter() {
        let labels = PeriodLabels::for_month(date!(2024 - 02 - 01));
        assert_eq!(labels.calendar_year, 2024);
        assert_eq!(labels.fiscal_year, 2023);
        assert_eq!(labels.fiscal_month, 11);
        assert_eq!(labels.fiscal_quarter, 4);

        let labels = PeriodLabels::for_month(date!(2024 - 04 - 01));
        assert_eq!(labels.fiscal_year, 2024);
        assert_eq!(labels.fiscal_month, 1);
        assert_eq!(labels.fiscal_quarter, 1);
    }
}
