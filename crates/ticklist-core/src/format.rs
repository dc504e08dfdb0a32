use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::datetime::{is_local_midnight, to_local_date, to_local_naive};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClockType {
    TwelveHour,
    #[default]
    TwentyFourHour,
}

impl fmt::Display for ClockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockType::TwelveHour => f.write_str("12h"),
            ClockType::TwentyFourHour => f.write_str("24h"),
        }
    }
}

impl FromStr for ClockType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "12" | "12h" | "twelve_hour" => Ok(ClockType::TwelveHour),
            "24" | "24h" | "twenty_four_hour" => Ok(ClockType::TwentyFourHour),
            other => Err(anyhow!("clock must be 12h or 24h, not {other}")),
        }
    }
}

/// Human labels for due dates, relative to `now` in the formatter's zone.
#[derive(Debug, Clone, Copy)]
pub struct DateTimeFormatter {
    pub clock: ClockType,
    pub now: DateTime<Utc>,
    pub tz: Tz,
}

impl DateTimeFormatter {
    pub fn new(clock: ClockType, now: DateTime<Utc>, tz: Tz) -> Self {
        Self { clock, now, tz }
    }

    /// `Today, 15:05`, or just `Today` for a local-midnight (date-only) due.
    pub fn format(&self, timestamp: Option<DateTime<Utc>>) -> String {
        let Some(timestamp) = timestamp else {
            return String::new();
        };

        let date = self.format_date(Some(timestamp));
        let time = self.format_time(Some(timestamp));
        if time.is_empty() {
            date
        } else {
            format!("{date}, {time}")
        }
    }

    pub fn format_date(&self, timestamp: Option<DateTime<Utc>>) -> String {
        timestamp
            .map(|ts| self.date_label(to_local_date(ts, self.tz)))
            .unwrap_or_default()
    }

    /// Empty for local midnight, which encodes "no time of day".
    pub fn format_time(&self, timestamp: Option<DateTime<Utc>>) -> String {
        match timestamp {
            Some(ts) if !is_local_midnight(ts, self.tz) => {
                self.time_label(to_local_naive(ts, self.tz).time())
            }
            _ => String::new(),
        }
    }

    pub fn date_label(&self, date: NaiveDate) -> String {
        let today = to_local_date(self.now, self.tz);
        if date == today {
            return "Today".to_string();
        }
        if today.pred_opt() == Some(date) {
            return "Yesterday".to_string();
        }
        if today.succ_opt() == Some(date) {
            return "Tomorrow".to_string();
        }

        if date.year() == today.year() {
            date.format("%b %-d").to_string()
        } else {
            date.format("%b %-d, %Y").to_string()
        }
    }

    pub fn time_label(&self, time: NaiveTime) -> String {
        match self.clock {
            ClockType::TwelveHour => time.format("%-I:%M %p").to_string(),
            ClockType::TwentyFourHour => time.format("%H:%M").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use chrono_tz::Asia::Tokyo;

    use super::{ClockType, DateTimeFormatter};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Tokyo
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("valid local time")
            .with_timezone(&Utc)
    }

    fn formatter(clock: ClockType) -> DateTimeFormatter {
        DateTimeFormatter::new(clock, at(2026, 10, 14, 10, 0), Tokyo)
    }

    #[test]
    fn absent_timestamp_is_empty() {
        let f = formatter(ClockType::TwentyFourHour);
        assert_eq!(f.format(None), "");
        assert_eq!(f.format_date(None), "");
        assert_eq!(f.format_time(None), "");
    }

    #[test]
    fn relative_day_words() {
        let f = formatter(ClockType::TwentyFourHour);
        assert_eq!(f.format(Some(at(2026, 10, 14, 15, 5))), "Today, 15:05");
        assert_eq!(f.format(Some(at(2026, 10, 13, 9, 0))), "Yesterday, 09:00");
        assert_eq!(f.format(Some(at(2026, 10, 15, 0, 0))), "Tomorrow");
    }

    #[test]
    fn calendar_dates_omit_current_year() {
        let f = formatter(ClockType::TwentyFourHour);
        assert_eq!(f.format(Some(at(2026, 3, 5, 0, 0))), "Mar 5");
        assert_eq!(f.format(Some(at(2027, 3, 5, 0, 0))), "Mar 5, 2027");
        assert_eq!(f.format(Some(at(2025, 12, 31, 18, 30))), "Dec 31, 2025, 18:30");
    }

    #[test]
    fn twelve_hour_clock() {
        let f = formatter(ClockType::TwelveHour);
        assert_eq!(f.format_time(Some(at(2026, 10, 14, 15, 5))), "3:05 PM");
        assert_eq!(f.format_time(Some(at(2026, 10, 14, 0, 30))), "12:30 AM");
        assert_eq!(f.format_time(Some(at(2026, 10, 14, 0, 0))), "");
    }

    #[test]
    fn midnight_is_date_only_in_local_zone() {
        // Local midnight in Tokyo is 15:00 UTC the day before.
        let local_midnight = at(2026, 10, 20, 0, 0);
        let f = formatter(ClockType::TwentyFourHour);
        assert_eq!(f.format(Some(local_midnight)), "Oct 20");

        let utc_view = DateTimeFormatter::new(ClockType::TwentyFourHour, f.now, chrono_tz::UTC);
        assert_eq!(utc_view.format(Some(local_midnight)), "Oct 19, 15:00");
    }
}
