//! Inclusive day ranges.

use chrono::{Days, NaiveDate, Utc};

use crate::error::{LocsyncError, LocsyncResult};

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DayRange {
    pub fn new(first: NaiveDate, last: NaiveDate) -> LocsyncResult<Self> {
        if last < first {
            return Err(LocsyncError::InvalidRange { first, last });
        }
        Ok(DayRange { first, last })
    }

    /// `past` days before `today` through `future` days after it.
    pub fn around(today: NaiveDate, past: u32, future: u32) -> Self {
        DayRange {
            first: today
                .checked_sub_days(Days::new(past.into()))
                .unwrap_or(NaiveDate::MIN),
            last: today
                .checked_add_days(Days::new(future.into()))
                .unwrap_or(NaiveDate::MAX),
        }
    }

    /// Parse command-line bounds.
    /// - `from`: YYYY-MM-DD, defaults to `today`
    /// - `to`: YYYY-MM-DD, defaults to `default_future` days after `from`
    pub fn from_args(
        from: Option<&str>,
        to: Option<&str>,
        today: NaiveDate,
        default_future: u32,
    ) -> LocsyncResult<Self> {
        let first = match from {
            Some(s) => parse_day(s)?,
            None => today,
        };
        let last = match to {
            Some(s) => parse_day(s)?,
            None => DayRange::around(first, 0, default_future).last,
        };
        DayRange::new(first, last)
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let last = self.last;
        self.first.iter_days().take_while(move |d| *d <= last)
    }

    pub fn len(&self) -> usize {
        usize::try_from((self.last - self.first).num_days() + 1).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }
}

/// Parse YYYY-MM-DD
pub fn parse_day(s: &str) -> LocsyncResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| LocsyncError::InvalidDate(s.to_string()))
}

/// Current UTC date
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn test_around_spans_past_and_future() {
        let range = DayRange::around(day(6, 10), 2, 3);
        assert_eq!(range.first, day(6, 8));
        assert_eq!(range.last, day(6, 13));
        assert_eq!(range.len(), 6);
        assert_eq!(range.days().count(), 6);
    }

    #[test]
    fn test_single_day_range() {
        let range = DayRange::around(day(7, 1), 0, 0);
        assert_eq!(range.days().collect::<Vec<_>>(), vec![day(7, 1)]);
    }

    #[test]
    fn test_from_args_defaults() {
        let range = DayRange::from_args(None, None, day(6, 10), 5).unwrap();
        assert_eq!(range.first, day(6, 10));
        assert_eq!(range.last, day(6, 15));

        let range = DayRange::from_args(Some("2024-06-01"), Some("2024-06-03"), day(6, 10), 5)
            .unwrap();
        assert_eq!(range.len(), 3);
    }

    #[test]
    fn test_from_args_rejects_bad_input() {
        assert!(matches!(
            DayRange::from_args(Some("06/01/2024"), None, day(6, 10), 5),
            Err(LocsyncError::InvalidDate(s)) if s == "06/01/2024"
        ));
        assert!(matches!(
            DayRange::from_args(Some("2024-06-05"), Some("2024-06-01"), day(6, 10), 5),
            Err(LocsyncError::InvalidRange { .. })
        ));
    }
}
