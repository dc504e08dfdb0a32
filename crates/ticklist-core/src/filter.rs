use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  Days,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use serde::{
  Deserialize,
  Serialize
};
use tracing::trace;

use crate::datetime::to_local_date;
use crate::task::{
  RecurrenceType,
  Task
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "snake_case")]
pub enum DueDateFilter {
  #[default]
  None,
  Today,
  ThisWeek,
  ThisMonth,
  ThisYear
}

impl DueDateFilter {
  pub fn label(self) -> &'static str {
    match self {
      | DueDateFilter::None => "none",
      | DueDateFilter::Today => "today",
      | DueDateFilter::ThisWeek => {
        "week"
      }
      | DueDateFilter::ThisMonth => {
        "month"
      }
      | DueDateFilter::ThisYear => {
        "year"
      }
    }
  }
}

impl fmt::Display for DueDateFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for DueDateFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "" | "none" | "all" => {
        Ok(DueDateFilter::None)
      }
      | "today" => {
        Ok(DueDateFilter::Today)
      }
      | "week" | "this_week" => {
        Ok(DueDateFilter::ThisWeek)
      }
      | "month" | "this_month" => {
        Ok(DueDateFilter::ThisMonth)
      }
      | "year" | "this_year" => {
        Ok(DueDateFilter::ThisYear)
      }
      | other => Err(anyhow!(
        "unknown due-date filter: \
         {other}"
      ))
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "snake_case")]
pub enum FirstDayOfWeek {
  #[default]
  Monday,
  Sunday,
  Saturday
}

impl FirstDayOfWeek {
  pub fn weekday(self) -> Weekday {
    match self {
      | FirstDayOfWeek::Monday => {
        Weekday::Mon
      }
      | FirstDayOfWeek::Sunday => {
        Weekday::Sun
      }
      | FirstDayOfWeek::Saturday => {
        Weekday::Sat
      }
    }
  }
}

impl fmt::Display for FirstDayOfWeek {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    let label = match self {
      | FirstDayOfWeek::Monday => {
        "monday"
      }
      | FirstDayOfWeek::Sunday => {
        "sunday"
      }
      | FirstDayOfWeek::Saturday => {
        "saturday"
      }
    };
    f.write_str(label)
  }
}

impl FromStr for FirstDayOfWeek {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "monday" | "mon" => {
        Ok(FirstDayOfWeek::Monday)
      }
      | "sunday" | "sun" => {
        Ok(FirstDayOfWeek::Sunday)
      }
      | "saturday" | "sat" => {
        Ok(FirstDayOfWeek::Saturday)
      }
      | other => Err(anyhow!(
        "week may start on monday, \
         sunday or saturday, not \
         {other}"
      ))
    }
  }
}

/// Whether the task's due date lies in
/// the named range around `now`.
/// Undated tasks only pass the `None`
/// filter.
pub fn is_within_filter(
  task: &Task,
  filter: DueDateFilter,
  first_day: FirstDayOfWeek,
  now: DateTime<Utc>,
  tz: Tz
) -> bool {
  if filter == DueDateFilter::None {
    return true;
  }
  let Some(due) = task.due_date else {
    return false;
  };

  let today = to_local_date(now, tz);
  let due_day = to_local_date(due, tz);

  let ok = match filter {
    | DueDateFilter::None => true,
    | DueDateFilter::Today => {
      due_day == today
    }
    | DueDateFilter::ThisWeek => {
      let back = (7
        + today
          .weekday()
          .num_days_from_monday()
        - first_day
          .weekday()
          .num_days_from_monday())
        % 7;
      let start = today
        .checked_sub_days(Days::new(
          u64::from(back)
        ))
        .unwrap_or(today);
      let end = start
        .checked_add_days(Days::new(6))
        .unwrap_or(start);
      start <= due_day
        && due_day <= end
    }
    | DueDateFilter::ThisMonth => {
      due_day.year() == today.year()
        && due_day.month()
          == today.month()
    }
    | DueDateFilter::ThisYear => {
      due_day.year() == today.year()
    }
  };

  trace!(
    task = task.id,
    filter = %filter,
    matched = ok,
    "evaluated due-date filter"
  );
  ok
}

/// `RecurrenceType::None` disables the
/// recurrence filter.
pub fn matches_recurrence(
  task: &Task,
  filter: RecurrenceType
) -> bool {
  filter == RecurrenceType::None
    || task.recurrence == filter
}
