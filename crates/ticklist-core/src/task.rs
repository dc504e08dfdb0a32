use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage-assigned identifier. `0` marks a task that was never persisted.
pub type TaskId = u64;

pub const UNSAVED_ID: TaskId = 0;
pub const MAX_PRIORITY: u8 = 3;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceType {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrenceType {
    pub fn is_recurring(self) -> bool {
        self != RecurrenceType::None
    }

    pub fn label(self) -> &'static str {
        match self {
            RecurrenceType::None => "none",
            RecurrenceType::Daily => "daily",
            RecurrenceType::Weekly => "weekly",
            RecurrenceType::Monthly => "monthly",
            RecurrenceType::Yearly => "yearly",
        }
    }
}

impl fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RecurrenceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "off" | "no" => Ok(RecurrenceType::None),
            "daily" | "day" | "d" => Ok(RecurrenceType::Daily),
            "weekly" | "week" | "w" => Ok(RecurrenceType::Weekly),
            "monthly" | "month" | "m" => Ok(RecurrenceType::Monthly),
            "yearly" | "year" | "annual" | "y" => Ok(RecurrenceType::Yearly),
            other => Err(anyhow!("unknown recurrence: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    #[serde(default)]
    pub id: TaskId,

    pub title: String,

    #[serde(default)]
    pub priority: u8,

    #[serde(default)]
    pub note: String,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub due_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub recurrence: RecurrenceType,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: UNSAVED_ID,
            title: title.into(),
            priority: 0,
            note: String::new(),
            due_date: None,
            recurrence: RecurrenceType::None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id != UNSAVED_ID
    }

    pub fn is_due_or_past(&self, now: DateTime<Utc>) -> bool {
        self.due_date.map(|due| due <= now).unwrap_or(false)
    }

    pub fn archive(self, deleted_at: DateTime<Utc>) -> DeletedTask {
        DeletedTask {
            id: self.id,
            title: self.title,
            priority: self.priority,
            note: self.note,
            due_date: self.due_date,
            recurrence: self.recurrence,
            deleted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedTask {
    #[serde(default)]
    pub id: TaskId,

    pub title: String,

    #[serde(default)]
    pub priority: u8,

    #[serde(default)]
    pub note: String,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub due_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub recurrence: RecurrenceType,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub deleted_at: DateTime<Utc>,
}

impl DeletedTask {
    /// History rows are keyed by the archived id plus the archival instant,
    /// since ids can be reused by storage after the original row is gone.
    pub fn same_record(&self, other: &DeletedTask) -> bool {
        self.id == other.id && self.deleted_at == other.deleted_at
    }

    /// Drops `deleted_at` and clears the id so storage assigns a fresh one.
    pub fn into_restored(self) -> Task {
        Task {
            id: UNSAVED_ID,
            title: self.title,
            priority: self.priority,
            note: self.note,
            due_date: self.due_date,
            recurrence: self.recurrence,
        }
    }
}
