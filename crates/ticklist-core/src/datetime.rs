use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Offset,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

const TIMEZONE_ENV_VAR: &str =
  "TICK_TIMEZONE";
const SYSTEM_TZ_ENV_VAR: &str = "TZ";

/// Source of the current instant and the
/// zone all calendar math runs in.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  fn zone(&self) -> Tz;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
  tz: Tz
}

impl SystemClock {
  pub fn new(tz: Tz) -> Self {
    Self {
      tz
    }
  }
}

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }

  fn zone(&self) -> Tz {
    self.tz
  }
}

/// Frozen clock for tests and replay.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
  pub now: DateTime<Utc>,
  pub tz:  Tz
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> {
    self.now
  }

  fn zone(&self) -> Tz {
    self.tz
  }
}

/// Resolves the zone from the
/// environment, then the configured
/// value, then `TZ`, falling back to
/// UTC.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config")
  {
    return tz;
  }

  if let Ok(raw) =
    std::env::var(SYSTEM_TZ_ENV_VAR)
    && let Some(tz) = parse_timezone(
      raw.trim_start_matches(':'),
      SYSTEM_TZ_ENV_VAR
    )
  {
    return tz;
  }

  tracing::warn!(
    "no timezone configured; using \
     UTC"
  );
  chrono_tz::UTC
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::debug!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

#[must_use]
pub fn to_local_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  dt.with_timezone(&tz).date_naive()
}

#[must_use]
pub fn to_local_naive(
  dt: DateTime<Utc>,
  tz: Tz
) -> NaiveDateTime {
  dt.with_timezone(&tz).naive_local()
}

/// A local time of exactly midnight is
/// the convention for "date only".
#[must_use]
pub fn is_local_midnight(
  dt: DateTime<Utc>,
  tz: Tz
) -> bool {
  to_local_naive(dt, tz).time()
    == NaiveTime::MIN
}

/// Maps a wall-clock time back to an
/// instant. Ambiguous times take the
/// earlier instant; times inside a DST
/// gap move forward by the gap length.
pub fn from_local(
  local_naive: NaiveDateTime,
  tz: Tz
) -> Option<DateTime<Utc>> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Some(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::trace!(
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Some(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      let shifted = local_naive
        .checked_sub_signed(
          Duration::days(1)
        )?;
      let before = tz
        .from_local_datetime(&shifted)
        .earliest()?
        .offset()
        .fix();
      let utc_naive = local_naive
        .checked_sub_signed(
          Duration::seconds(i64::from(
            before.local_minus_utc()
          ))
        )?;
      tracing::trace!(
        local = %local_naive,
        "local datetime falls in a gap; shifting forward"
      );
      Some(
        Utc.from_utc_datetime(
          &utc_naive
        )
      )
    }
  }
}

#[must_use]
pub fn local_midnight(
  date: NaiveDate,
  tz: Tz
) -> Option<DateTime<Utc>> {
  from_local(
    date.and_time(NaiveTime::MIN),
    tz
  )
}

/// Date part of a due expression plus
/// an optional clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueInput {
  pub date: NaiveDate,
  pub time: Option<NaiveTime>
}

/// Parses the `due:` modifier. `none`
/// clears the due date.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_due_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<Option<DueInput>>
{
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let today = to_local_date(now, tz);

  let date_only = |date: NaiveDate|
   -> anyhow::Result<Option<DueInput>> {
    Ok(Some(DueInput {
      date,
      time: None
    }))
  };

  match lower.as_str() {
    | "" | "none" | "never" => {
      return Ok(None);
    }
    | "today" => return date_only(today),
    | "tomorrow" => {
      return date_only(
        today
          .succ_opt()
          .ok_or_else(|| {
            anyhow!(
              "failed to advance to \
               tomorrow"
            )
          })?
      );
    }
    | "yesterday" => {
      return date_only(
        today
          .pred_opt()
          .ok_or_else(|| {
            anyhow!(
              "failed to step back \
               to yesterday"
            )
          })?
      );
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    return date_only(
      next_weekday_date(
        today,
        target_weekday
      )
    );
  }

  let rel_re = Regex::new(
    r"^\+(?P<num>\d+)(?P<unit>[dw])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;
  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let days = match caps
      .name("unit")
      .map(|m| m.as_str())
    {
      | Some("w") => num.checked_mul(7),
      | _ => Some(num)
    };
    let date = days
      .and_then(Duration::try_days)
      .and_then(|delta| {
        today.checked_add_signed(delta)
      })
      .ok_or_else(|| {
        anyhow!(
          "relative date out of \
           range: {input}"
        )
      })?;
    return date_only(date);
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return date_only(date);
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return Ok(Some(DueInput {
        date: ndt.date(),
        time: Some(ndt.time())
      }));
    }
  }

  Err(anyhow!(
    "unrecognized due expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     none/today/tomorrow/yesterday, \
     weekday names (e.g. monday), \
     +Nd/+Nw, YYYY-MM-DD, \
     YYYY-MM-DDTHH:MM, YYYY-MM-DD \
     HH:MM"
  })
}

/// Parses `15:23`, `3:23pm` or `3pm`.
pub fn parse_clock_time(
  token: &str
) -> Option<NaiveTime> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2})(:(?P<minute>\d{2}))?\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = match captures
    .name("minute")
  {
    | Some(m) => {
      m.as_str().parse::<u32>().ok()?
    }
    | None => {
      captures.name("ampm")?;
      0
    }
  };
  if minute > 59 {
    return None;
  }

  let hour = if let Some(ampm_match) =
    captures.name("ampm")
  {
    let ampm = ampm_match
      .as_str()
      .to_ascii_lowercase();
    if raw_hour == 0 || raw_hour > 12 {
      return None;
    }
    match ampm.as_str() {
      | "am" => {
        if raw_hour == 12 {
          0
        } else {
          raw_hour
        }
      }
      | "pm" => {
        if raw_hour == 12 {
          12
        } else {
          raw_hour + 12
        }
      }
      | _ => return None
    }
  } else {
    if raw_hour > 23 {
      return None;
    }
    raw_hour
  };

  NaiveTime::from_hms_opt(
    hour, minute, 0
  )
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}
