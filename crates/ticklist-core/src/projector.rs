use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::datastore::{StoreError, TaskStore};
use crate::datetime::Clock;
use crate::filter::{DueDateFilter, FirstDayOfWeek, is_within_filter, matches_recurrence};
use crate::live::live_tasks;
use crate::preferences::{PreferenceValues, Preferences};
use crate::sort::SortType;
use crate::task::{RecurrenceType, Task};

/// The settings a visible list is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionParams {
    pub sort: SortType,
    pub recurrence_filter: RecurrenceType,
    pub due_date_filter: DueDateFilter,
    pub first_day_of_week: FirstDayOfWeek,
}

impl From<&PreferenceValues> for ProjectionParams {
    fn from(values: &PreferenceValues) -> Self {
        Self {
            sort: values.sort_type,
            recurrence_filter: values.recurrence_filter,
            due_date_filter: values.due_date_filter,
            first_day_of_week: values.first_day_of_week,
        }
    }
}

/// Keeps tasks passing both filters, in the order given. Ordering is the
/// store's job.
pub fn project(
    tasks: Vec<Task>,
    params: &ProjectionParams,
    now: DateTime<Utc>,
    tz: Tz,
) -> Vec<Task> {
    tasks
        .into_iter()
        .filter(|task| matches_recurrence(task, params.recurrence_filter))
        .filter(|task| {
            is_within_filter(
                task,
                params.due_date_filter,
                params.first_day_of_week,
                now,
                tz,
            )
        })
        .collect()
}

struct Inputs {
    sort: watch::Receiver<SortType>,
    recurrence: watch::Receiver<RecurrenceType>,
    due: watch::Receiver<DueDateFilter>,
    week_start: watch::Receiver<FirstDayOfWeek>,
}

impl Inputs {
    fn latest(&mut self) -> ProjectionParams {
        ProjectionParams {
            sort: *self.sort.borrow_and_update(),
            recurrence_filter: *self.recurrence.borrow_and_update(),
            due_date_filter: *self.due.borrow_and_update(),
            first_day_of_week: *self.week_start.borrow_and_update(),
        }
    }

    /// Resolves when any setting moves; `false` once preferences are gone.
    async fn changed(&mut self) -> bool {
        let result = tokio::select! {
            r = self.sort.changed() => r,
            r = self.recurrence.changed() => r,
            r = self.due.changed() => r,
            r = self.week_start.changed() => r,
        };
        result.is_ok()
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProjectionError {
    #[error("cannot read tasks: {0}")]
    Store(Arc<StoreError>),
    #[error("task list projector stopped")]
    Stopped,
}

/// Background task publishing the visible task list.
///
/// Combines the latest sort and filter settings with a live store query.
/// A settings change drops the running query and starts a fresh one, so
/// the output never mixes results from an old combination. Store failures
/// are logged and the last published list stays in place; the failure
/// itself is published on a side channel until a query succeeds again.
pub struct TaskListProjector {
    output: watch::Receiver<Vec<Task>>,
    failure: watch::Receiver<Option<Arc<StoreError>>>,
    handle: JoinHandle<()>,
}

impl TaskListProjector {
    pub fn spawn(store: Arc<dyn TaskStore>, prefs: &Preferences, clock: Arc<dyn Clock>) -> Self {
        let inputs = Inputs {
            sort: prefs.subscribe_sort_type(),
            recurrence: prefs.subscribe_recurrence_filter(),
            due: prefs.subscribe_due_date_filter(),
            week_start: prefs.subscribe_first_day_of_week(),
        };
        let (tx, output) = watch::channel(Vec::new());
        let (failure_tx, failure) = watch::channel(None);
        let handle = tokio::spawn(drive(store, inputs, clock, tx, failure_tx));
        Self {
            output,
            failure,
            handle,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Task>> {
        self.output.clone()
    }

    pub fn current(&self) -> Vec<Task> {
        self.output.borrow().clone()
    }

    /// Failure of the most recent query, cleared by the next success.
    pub fn last_error(&self) -> Option<Arc<StoreError>> {
        self.failure.borrow().clone()
    }

    /// Waits until a list has been published and returns the latest one.
    /// Errors when the store fails before any list was published.
    pub async fn published(&self) -> Result<Vec<Task>, ProjectionError> {
        let mut tasks = self.output.clone();
        let mut failure = self.failure.clone();
        loop {
            if tasks.has_changed().unwrap_or(false) {
                return Ok(tasks.borrow().clone());
            }
            if let Some(err) = failure.borrow_and_update().clone() {
                return Err(ProjectionError::Store(err));
            }

            tokio::select! {
                changed = tasks.changed() => {
                    changed.map_err(|_| ProjectionError::Stopped)?;
                    return Ok(tasks.borrow().clone());
                }
                changed = failure.changed() => {
                    changed.map_err(|_| ProjectionError::Stopped)?;
                }
            }
        }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for TaskListProjector {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn drive(
    store: Arc<dyn TaskStore>,
    mut inputs: Inputs,
    clock: Arc<dyn Clock>,
    tx: watch::Sender<Vec<Task>>,
    failure: watch::Sender<Option<Arc<StoreError>>>,
) {
    loop {
        let params = inputs.latest();
        debug!(?params, "starting list query");
        let mut query = live_tasks(store.clone(), params.sort);

        loop {
            tokio::select! {
                next = query.next() => match next {
                    Some(Ok(tasks)) => {
                        let visible = project(tasks, &params, clock.now(), clock.zone());
                        trace!(count = visible.len(), "publishing task list");
                        tx.send_replace(visible);
                        failure.send_if_modified(|last| last.take().is_some());
                    }
                    Some(Err(err)) => {
                        error!(error = %err, "task list query failed");
                        failure.send_replace(Some(Arc::new(err)));
                    }
                    None => {
                        debug!("store closed; projector exiting");
                        return;
                    }
                },
                alive = inputs.changed() => {
                    if !alive {
                        debug!("preferences closed; projector exiting");
                        return;
                    }
                    break;
                }
            }
        }
    }
}
