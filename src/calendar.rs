use crate::errors::{EngineError, EngineResult};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeSet;

/// Trading-day arithmetic supplied by the hosting application.
/// Send + Sync so one calendar can serve concurrent simulations.
pub trait TradingCalendar: Send + Sync {
    fn is_business_day(&self, date: NaiveDate) -> bool;

    /// Business days in `[start, end)`; negative when `end < start`.
    fn business_days_between(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        if end < start {
            return -self.business_days_between(end, start);
        }
        start
            .iter_days()
            .take_while(|d| *d < end)
            .filter(|d| self.is_business_day(*d))
            .count() as i64
    }

    /// Step `n` business days forward (or backward when negative).
    /// `n = 0` returns the date unchanged. Running off chrono's date range
    /// is a `Calendar` error.
    fn offset_business_days(&self, date: NaiveDate, n: i64) -> EngineResult<NaiveDate> {
        let out_of_range =
            || EngineError::Calendar(format!("{n} business days from {date} is out of range"));
        // Every business day is at least one calendar day.
        Duration::try_days(n)
            .and_then(|span| date.checked_add_signed(span))
            .ok_or_else(out_of_range)?;

        let step = if n >= 0 { Duration::days(1) } else { Duration::days(-1) };
        let mut current = date;
        let mut remaining = n.unsigned_abs();
        while remaining > 0 {
            current = current.checked_add_signed(step).ok_or_else(out_of_range)?;
            if self.is_business_day(current) {
                remaining -= 1;
            }
        }
        Ok(current)
    }
}

/// Saturday/Sunday weekends plus an explicit holiday list
/// (the national holidays table the dashboard downloads).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct HolidayCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn weekends_only() -> Self {
        Self::default()
    }

    pub fn with_holidays<I>(holidays: I) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }
}

impl TradingCalendar for HolidayCalendar {
    fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }
}
