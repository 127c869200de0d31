//! Billing-month boundaries anchored on a day of month.

use chrono::{Datelike, NaiveDate};

use crate::domain::BillingMonth;
use crate::BillingError;

fn check_anchor(anchor_day: u32) -> Result<(), BillingError> {
    if (1..=28).contains(&anchor_day) {
        Ok(())
    } else {
        Err(BillingError::InvalidAnchorDay(anchor_day))
    }
}

fn anchor_date(year: i32, month: u32, anchor_day: u32) -> Result<NaiveDate, BillingError> {
    NaiveDate::from_ymd_opt(year, month, anchor_day).ok_or_else(|| {
        BillingError::InvalidConfig(format!("no anchor date {year}-{month:02}-{anchor_day:02}"))
    })
}

fn next_calendar_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn prev_calendar_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Billing month starting on the anchor day of calendar `(year, month)`.
pub fn billing_month_starting(
    year: i32,
    month: u32,
    anchor_day: u32,
) -> Result<BillingMonth, BillingError> {
    check_anchor(anchor_day)?;
    let start = anchor_date(year, month, anchor_day)?;
    let (ny, nm) = next_calendar_month(year, month);
    let end = anchor_date(ny, nm, anchor_day)?;
    Ok(BillingMonth::new(start, end))
}

/// The 12 billing months of `year`, month `i` starting on the anchor day of
/// calendar month `i`. The last one ends on the anchor day of next January.
pub fn billing_months_for_year(year: i32, anchor_day: u32) -> Result<Vec<BillingMonth>, BillingError> {
    (1..=12)
        .map(|month| billing_month_starting(year, month, anchor_day))
        .collect()
}

/// Billing month that contains `date`.
pub fn billing_month_containing(date: NaiveDate, anchor_day: u32) -> Result<BillingMonth, BillingError> {
    check_anchor(anchor_day)?;
    let (year, month) = if date.day() >= anchor_day {
        (date.year(), date.month())
    } else {
        prev_calendar_month(date.year(), date.month())
    };
    billing_month_starting(year, month, anchor_day)
}

/// The billing month immediately before `month`.
pub fn previous_billing_month(month: &BillingMonth, anchor_day: u32) -> Result<BillingMonth, BillingError> {
    let (year, m) = prev_calendar_month(month.start.year(), month.start.month());
    billing_month_starting(year, m, anchor_day)
}

pub fn is_last_day_of_billing_month(date: NaiveDate, anchor_day: u32) -> Result<bool, BillingError> {
    Ok(billing_month_containing(date, anchor_day)?.last_day() == date)
}

pub fn days_in_billing_month(date: NaiveDate, anchor_day: u32) -> Result<u32, BillingError> {
    Ok(billing_month_containing(date, anchor_day)?.days())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_year_boundaries_are_contiguous() {
        let months = billing_months_for_year(2024, 15).unwrap();
        assert_eq!(months.len(), 12);
        assert_eq!(months[0].start, d(2024, 1, 15));
        assert_eq!(months[0].label, "2024-01");
        assert_eq!(months[11].end, d(2025, 1, 15));
        for pair in months.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let total_days: u32 = months.iter().map(|m| m.days()).sum();
        assert_eq!(total_days, 366);
    }

    #[test]
    fn test_month_numbers_follow_position() {
        let months = billing_months_for_year(2025, 1).unwrap();
        let numbers: Vec<u32> = months.iter().map(|m| m.month_number).collect();
        assert_eq!(numbers, (1..=12).collect::<Vec<_>>());
        assert_eq!(months[1].days(), 28);
    }

    #[rstest]
    #[case(d(2025, 3, 15), "2025-03")]
    #[case(d(2025, 3, 14), "2025-02")]
    #[case(d(2025, 1, 3), "2024-12")]
    #[case(d(2024, 12, 31), "2024-12")]
    fn test_billing_month_containing(#[case] date: NaiveDate, #[case] label: &str) {
        let month = billing_month_containing(date, 15).unwrap();
        assert_eq!(month.label, label);
        assert!(month.contains(date));
    }

    #[test]
    fn test_anchor_one_matches_calendar_months() {
        let month = billing_month_containing(d(2024, 2, 29), 1).unwrap();
        assert_eq!(month.start, d(2024, 2, 1));
        assert_eq!(month.end, d(2024, 3, 1));
        assert_eq!(month.days(), 29);
    }

    #[test]
    fn test_last_day_detection() {
        assert!(is_last_day_of_billing_month(d(2025, 2, 14), 15).unwrap());
        assert!(!is_last_day_of_billing_month(d(2025, 2, 15), 15).unwrap());
        assert_eq!(days_in_billing_month(d(2025, 2, 20), 15).unwrap(), 28);
    }

    #[test]
    fn test_previous_month_wraps_year() {
        let jan = billing_month_starting(2025, 1, 10).unwrap();
        let prev = previous_billing_month(&jan, 10).unwrap();
        assert_eq!(prev.label, "2024-12");
        assert_eq!(prev.end, jan.start);
        assert_eq!(prev.month_number, 12);
    }

    #[rstest]
    #[case(0)]
    #[case(29)]
    fn test_invalid_anchor(#[case] anchor: u32) {
        assert!(matches!(
            billing_month_containing(d(2025, 1, 1), anchor),
            Err(BillingError::InvalidAnchorDay(_))
        ));
    }
}
