use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::filter::{DueDateFilter, FirstDayOfWeek};
use crate::format::ClockType;
use crate::sort::SortType;
use crate::task::RecurrenceType;

pub const PREFERENCES_FILE: &str = "preferences.toml";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreferenceValues {
    pub sort_type: SortType,
    pub recurrence_filter: RecurrenceType,
    pub due_date_filter: DueDateFilter,
    pub first_day_of_week: FirstDayOfWeek,
    pub clock_type: ClockType,
}

/// Observable user settings. Each setting is its own watch channel so
/// consumers can react to exactly the values they combine.
#[derive(Debug)]
pub struct Preferences {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
    sort_type: watch::Sender<SortType>,
    recurrence_filter: watch::Sender<RecurrenceType>,
    due_date_filter: watch::Sender<DueDateFilter>,
    first_day_of_week: watch::Sender<FirstDayOfWeek>,
    clock_type: watch::Sender<ClockType>,
}

impl Preferences {
    #[tracing::instrument(skip(path))]
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let values = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading {}", path.display()))?;
            toml::from_str::<PreferenceValues>(&raw)
                .with_context(|| format!("failed parsing {}", path.display()))?
        } else {
            info!(file = %path.display(), "no preferences file; using defaults");
            PreferenceValues::default()
        };
        debug!(?values, "loaded preferences");

        let mut prefs = Self::in_memory(values);
        prefs.path = Some(path.to_path_buf());
        Ok(prefs)
    }

    /// Settings that live only as long as this value.
    pub fn in_memory(values: PreferenceValues) -> Self {
        Self {
            path: None,
            write_lock: Mutex::new(()),
            sort_type: watch::Sender::new(values.sort_type),
            recurrence_filter: watch::Sender::new(values.recurrence_filter),
            due_date_filter: watch::Sender::new(values.due_date_filter),
            first_day_of_week: watch::Sender::new(values.first_day_of_week),
            clock_type: watch::Sender::new(values.clock_type),
        }
    }

    pub fn snapshot(&self) -> PreferenceValues {
        PreferenceValues {
            sort_type: self.sort_type(),
            recurrence_filter: self.recurrence_filter(),
            due_date_filter: self.due_date_filter(),
            first_day_of_week: self.first_day_of_week(),
            clock_type: self.clock_type(),
        }
    }

    pub fn sort_type(&self) -> SortType {
        *self.sort_type.borrow()
    }

    pub fn recurrence_filter(&self) -> RecurrenceType {
        *self.recurrence_filter.borrow()
    }

    pub fn due_date_filter(&self) -> DueDateFilter {
        *self.due_date_filter.borrow()
    }

    pub fn first_day_of_week(&self) -> FirstDayOfWeek {
        *self.first_day_of_week.borrow()
    }

    pub fn clock_type(&self) -> ClockType {
        *self.clock_type.borrow()
    }

    pub fn subscribe_sort_type(&self) -> watch::Receiver<SortType> {
        self.sort_type.subscribe()
    }

    pub fn subscribe_recurrence_filter(&self) -> watch::Receiver<RecurrenceType> {
        self.recurrence_filter.subscribe()
    }

    pub fn subscribe_due_date_filter(&self) -> watch::Receiver<DueDateFilter> {
        self.due_date_filter.subscribe()
    }

    pub fn subscribe_first_day_of_week(&self) -> watch::Receiver<FirstDayOfWeek> {
        self.first_day_of_week.subscribe()
    }

    pub fn subscribe_clock_type(&self) -> watch::Receiver<ClockType> {
        self.clock_type.subscribe()
    }

    pub fn set_sort_type(&self, value: SortType) -> anyhow::Result<()> {
        self.update(&self.sort_type, value, "sort_type", |v, x| v.sort_type = x)
    }

    pub fn set_recurrence_filter(&self, value: RecurrenceType) -> anyhow::Result<()> {
        self.update(&self.recurrence_filter, value, "recurrence_filter", |v, x| v.recurrence_filter = x)
    }

    pub fn set_due_date_filter(&self, value: DueDateFilter) -> anyhow::Result<()> {
        self.update(&self.due_date_filter, value, "due_date_filter", |v, x| v.due_date_filter = x)
    }

    pub fn set_first_day_of_week(&self, value: FirstDayOfWeek) -> anyhow::Result<()> {
        self.update(&self.first_day_of_week, value, "first_day_of_week", |v, x| v.first_day_of_week = x)
    }

    pub fn set_clock_type(&self, value: ClockType) -> anyhow::Result<()> {
        self.update(&self.clock_type, value, "clock_type", |v, x| v.clock_type = x)
    }

    /// Observers only hear about a value once it is on disk.
    fn update<T>(
        &self,
        sender: &watch::Sender<T>,
        value: T,
        key: &str,
        apply: fn(&mut PreferenceValues, T),
    ) -> anyhow::Result<()>
    where
        T: PartialEq + Copy,
    {
        let _guard = self.write_lock.lock();
        if *sender.borrow() == value {
            debug!(key, "preference unchanged");
            return Ok(());
        }

        let mut next = self.snapshot();
        apply(&mut next, value);
        self.persist(&next)?;
        sender.send_replace(value);
        debug!(key, "preference updated");
        Ok(())
    }

    fn persist(&self, values: &PreferenceValues) -> anyhow::Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let text = toml::to_string(values).context("failed encoding preferences")?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed creating temp file in {}", dir.display()))?;
        temp.write_all(text.as_bytes())?;
        temp.flush()?;
        temp.persist(path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }
}
