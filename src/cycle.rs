use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// key: billing-cycle -> recurrence interval for obligations
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Cycle {
    Once,
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CycleError {
    #[error("unknown billing cycle `{0}`")]
    Unknown(String),
    #[error("due date {0} cannot be advanced past the supported calendar range")]
    OutOfRange(NaiveDate),
}

impl Cycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cycle::Once => "once",
            Cycle::Monthly => "monthly",
            Cycle::Quarterly => "quarterly",
            Cycle::HalfYearly => "half_yearly",
            Cycle::Yearly => "yearly",
        }
    }

    pub fn parse(value: &str) -> Result<Self, CycleError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "once" | "one_time" => Ok(Cycle::Once),
            "monthly" => Ok(Cycle::Monthly),
            "quarterly" => Ok(Cycle::Quarterly),
            "half_yearly" | "half-yearly" | "semiannual" => Ok(Cycle::HalfYearly),
            "yearly" | "annual" => Ok(Cycle::Yearly),
            _ => Err(CycleError::Unknown(value.to_string())),
        }
    }

    /// Calendar months covered by one cycle; `None` for one-off obligations.
    pub fn months(&self) -> Option<u32> {
        match self {
            Cycle::Once => None,
            Cycle::Monthly => Some(1),
            Cycle::Quarterly => Some(3),
            Cycle::HalfYearly => Some(6),
            Cycle::Yearly => Some(12),
        }
    }
}

/// Next due date after `anchor`, or `None` when the cycle does not repeat.
///
/// Days that do not exist in the target month clamp to its last day
/// (31 Jan + 1 month = 28/29 Feb). The result is always derived from the
/// previous due date, never from the current date, so a late sweep does not
/// shorten the following interval.
pub fn next_due(anchor: NaiveDate, cycle: Cycle) -> Result<Option<NaiveDate>, CycleError> {
    let Some(months) = cycle.months() else {
        return Ok(None);
    };
    anchor
        .checked_add_months(Months::new(months))
        .map(Some)
        .ok_or(CycleError::OutOfRange(anchor))
}

#[cfg(test)]
mod tests {
    use super::{next_due, Cycle, CycleError};
    use chrono::{Datelike, NaiveDate};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn once_has_no_next_due_date() {
        assert_eq!(next_due(date(2024, 3, 15), Cycle::Once), Ok(None));
    }

    #[test]
    fn month_end_clamps_to_last_day_of_target_month() {
        assert_eq!(
            next_due(date(2024, 1, 31), Cycle::Monthly),
            Ok(Some(date(2024, 2, 29)))
        );
        assert_eq!(
            next_due(date(2023, 1, 31), Cycle::Monthly),
            Ok(Some(date(2023, 2, 28)))
        );
        assert_eq!(
            next_due(date(2024, 8, 31), Cycle::Quarterly),
            Ok(Some(date(2024, 11, 30)))
        );
        assert_eq!(
            next_due(date(2024, 3, 31), Cycle::HalfYearly),
            Ok(Some(date(2024, 9, 30)))
        );
        assert_eq!(
            next_due(date(2024, 2, 29), Cycle::Yearly),
            Ok(Some(date(2025, 2, 28)))
        );
    }

    #[test]
    fn repeated_advances_keep_the_same_calendar_interval() {
        for cycle in [
            Cycle::Monthly,
            Cycle::Quarterly,
            Cycle::HalfYearly,
            Cycle::Yearly,
        ] {
            let months = cycle.months().unwrap() as i32;
            let mut current = date(2023, 1, 15);
            for _ in 0..24 {
                let next = next_due(current, cycle).unwrap().unwrap();
                let elapsed = (next.year() - current.year()) * 12 + next.month() as i32
                    - current.month() as i32;
                assert_eq!(elapsed, months, "{cycle:?} advanced from {current}");
                assert_eq!(next.day(), 15);
                current = next;
            }
        }
    }

    #[test]
    fn clamped_dates_degrade_predictably() {
        let feb = next_due(date(2023, 1, 31), Cycle::Monthly).unwrap().unwrap();
        let mar = next_due(feb, Cycle::Monthly).unwrap().unwrap();
        assert_eq!(feb, date(2023, 2, 28));
        assert_eq!(mar, date(2023, 3, 28));
    }

    #[test]
    fn same_anchor_always_gives_same_result() {
        let anchor = date(2024, 5, 31);
        let first = next_due(anchor, Cycle::Monthly);
        let second = next_due(anchor, Cycle::Monthly);
        assert_eq!(first, second);
        assert_eq!(first, Ok(Some(date(2024, 6, 30))));
    }

    #[test]
    fn parse_accepts_aliases_and_rejects_unknown_values() {
        assert_eq!(Cycle::parse("Monthly"), Ok(Cycle::Monthly));
        assert_eq!(Cycle::parse(" half_yearly "), Ok(Cycle::HalfYearly));
        assert_eq!(Cycle::parse("annual"), Ok(Cycle::Yearly));
        assert_eq!(
            Cycle::parse("fortnightly"),
            Err(CycleError::Unknown("fortnightly".to_string()))
        );
        for cycle in [
            Cycle::Once,
            Cycle::Monthly,
            Cycle::Quarterly,
            Cycle::HalfYearly,
            Cycle::Yearly,
        ] {
            assert_eq!(Cycle::parse(cycle.as_str()), Ok(cycle));
        }
    }

    #[test]
    fn far_future_anchor_reports_out_of_range() {
        let anchor = NaiveDate::MAX;
        assert_eq!(
            next_due(anchor, Cycle::Yearly),
            Err(CycleError::OutOfRange(anchor))
        );
    }
}
