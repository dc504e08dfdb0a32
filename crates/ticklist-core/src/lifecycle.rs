use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};

use crate::datastore::{StoreError, TaskStore};
use crate::datetime::{
    Clock, from_local, is_local_midnight, local_midnight, to_local_date, to_local_naive,
};
use crate::recurrence::next_due_date;
use crate::task::{DeletedTask, MAX_PRIORITY, RecurrenceType, Task, TaskId, UNSAVED_ID};

pub const DEFAULT_COMPLETION_DELAY: Duration = Duration::from_millis(500);

/// Reminder side channel. Calls are fire-and-forget.
pub trait NotificationScheduler: Send + Sync {
    fn schedule(&self, task: &Task);

    fn cancel(&self, id: TaskId);
}

/// In-memory fields of an add/edit session. Nothing here touches storage
/// until the draft is saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub title: String,
    pub priority: u8,
    pub note: String,
    pub due_date: Option<NaiveDate>,
    pub due_time: Option<NaiveTime>,
    pub recurrence: RecurrenceType,
    pub editing_id: Option<TaskId>,
}

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits the due instant into local date and time parts. A local
    /// midnight loads as a date with no time.
    pub fn from_task(task: &Task, tz: Tz) -> Self {
        let (due_date, due_time) = match task.due_date {
            Some(due) if is_local_midnight(due, tz) => (Some(to_local_date(due, tz)), None),
            Some(due) => {
                let local = to_local_naive(due, tz);
                (Some(local.date()), Some(local.time()))
            }
            None => (None, None),
        };

        Self {
            title: task.title.clone(),
            priority: task.priority.min(MAX_PRIORITY),
            note: task.note.clone(),
            due_date,
            due_time,
            recurrence: task.recurrence,
            editing_id: task.is_persisted().then_some(task.id),
        }
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority.min(MAX_PRIORITY);
    }

    pub fn is_blank(&self) -> bool {
        self.title.trim().is_empty()
    }

    /// A time without a date is anchored to today, and so is a recurring
    /// draft without any due date.
    pub fn due_timestamp(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let date = match (self.due_date, self.due_time) {
            (Some(date), _) => date,
            (None, Some(_)) => to_local_date(now, tz),
            (None, None) if self.recurrence.is_recurring() => to_local_date(now, tz),
            (None, None) => return None,
        };
        match self.due_time {
            Some(time) => from_local(date.and_time(time), tz),
            None => local_midnight(date, tz),
        }
    }

    pub fn to_task(&self, now: DateTime<Utc>, tz: Tz) -> Task {
        Task {
            id: self.editing_id.unwrap_or(UNSAVED_ID),
            title: self.title.trim().to_string(),
            priority: self.priority.min(MAX_PRIORITY),
            note: self.note.clone(),
            due_date: self.due_timestamp(now, tz),
            recurrence: self.recurrence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Rejected,
    Saved(Task),
}

/// What finishing a task does to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAction {
    Archive,
    Advance,
}

impl CompletionAction {
    /// | recurring | due or past | action  |
    /// |-----------|-------------|---------|
    /// | no        | any         | Archive |
    /// | yes       | yes         | Advance |
    /// | yes       | no          | Archive |
    pub fn decide(task: &Task, now: DateTime<Utc>) -> Self {
        match (task.recurrence.is_recurring(), task.is_due_or_past(now)) {
            (false, _) => CompletionAction::Archive,
            (true, true) => CompletionAction::Advance,
            (true, false) => CompletionAction::Archive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Archived(DeletedTask),
    Advanced(Task),
}

#[derive(Clone)]
pub struct TaskLifecycleManager {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn NotificationScheduler>,
    clock: Arc<dyn Clock>,
    completion_delay: Duration,
}

impl TaskLifecycleManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn NotificationScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            completion_delay: DEFAULT_COMPLETION_DELAY,
        }
    }

    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = delay;
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn edit_draft(&self, id: TaskId) -> Result<Draft, StoreError> {
        let task = self.store.get_by_id(id)?.ok_or(StoreError::NotFound(id))?;
        Ok(Draft::from_task(&task, self.clock.zone()))
    }

    #[instrument(skip(self, draft), fields(editing = ?draft.editing_id))]
    pub fn save(&self, draft: &Draft) -> Result<SaveOutcome, StoreError> {
        if draft.is_blank() {
            debug!("rejecting draft with blank title");
            return Ok(SaveOutcome::Rejected);
        }

        let mut task = draft.to_task(self.clock.now(), self.clock.zone());
        task.id = self.store.upsert(&task)?;
        info!(id = task.id, "saved task");

        if task.due_date.is_some() {
            self.notifier.schedule(&task);
        } else if draft.editing_id.is_some() {
            self.notifier.cancel(task.id);
        }
        Ok(SaveOutcome::Saved(task))
    }

    /// Marks a task done. Waits out the completion delay first so a
    /// dismiss animation can finish before the row disappears.
    #[instrument(skip(self, task), fields(id = task.id, recurrence = %task.recurrence))]
    pub async fn complete(&self, task: Task) -> Result<Completion, StoreError> {
        if !self.completion_delay.is_zero() {
            tokio::time::sleep(self.completion_delay).await;
        }

        let now = self.clock.now();
        match CompletionAction::decide(&task, now) {
            CompletionAction::Archive => self.archive(task, now).map(Completion::Archived),
            CompletionAction::Advance => {
                let Some(next) = next_due_date(task.due_date, task.recurrence, self.clock.zone())
                else {
                    warn!("recurring task has no next due date; archiving");
                    return self.archive(task, now).map(Completion::Archived);
                };

                if self.store.get_by_id(task.id)?.is_none() {
                    return Err(StoreError::NotFound(task.id));
                }
                let advanced = Task {
                    due_date: Some(next),
                    ..task
                };
                self.store.upsert(&advanced)?;
                self.notifier.cancel(advanced.id);
                self.notifier.schedule(&advanced);
                info!(%next, "advanced recurring task");
                Ok(Completion::Advanced(advanced))
            }
        }
    }

    /// A task that is no longer active is not archived again.
    fn archive(&self, task: Task, now: DateTime<Utc>) -> Result<DeletedTask, StoreError> {
        let archived = self
            .store
            .archive(&task, now)?
            .ok_or(StoreError::NotFound(task.id))?;
        self.notifier.cancel(archived.id);
        info!(id = archived.id, "archived task");
        Ok(archived)
    }

    #[instrument(skip(self, deleted), fields(id = deleted.id))]
    pub fn restore(&self, deleted: &DeletedTask) -> Result<Task, StoreError> {
        let task = self
            .store
            .restore(deleted)?
            .ok_or(StoreError::NotFound(deleted.id))?;
        if task.due_date.is_some() {
            self.notifier.schedule(&task);
        }
        info!(new_id = task.id, "restored task from history");
        Ok(task)
    }

    #[instrument(skip(self, deleted), fields(id = deleted.id))]
    pub fn delete_permanently(&self, deleted: &DeletedTask) -> Result<(), StoreError> {
        self.store.delete_deleted(deleted)
    }

    #[instrument(skip(self))]
    pub fn clear_history(&self) -> Result<(), StoreError> {
        self.store.delete_all_deleted()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
    use chrono_tz::Tz;
    use parking_lot::Mutex;
    use tempfile::{TempDir, tempdir};

    use super::{
        Completion, CompletionAction, Draft, NotificationScheduler, SaveOutcome,
        TaskLifecycleManager,
    };
    use crate::datastore::{JsonlStore, StoreError, TaskStore};
    use crate::datetime::FixedClock;
    use crate::sort::SortType;
    use crate::task::{RecurrenceType, Task, TaskId};

    pub(crate) const TZ: Tz = chrono_tz::Europe::Paris;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Reminder {
        Scheduled(TaskId, Option<DateTime<Utc>>),
        Cancelled(TaskId),
    }

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) events: Mutex<Vec<Reminder>>,
    }

    impl NotificationScheduler for RecordingNotifier {
        fn schedule(&self, task: &Task) {
            self.events
                .lock()
                .push(Reminder::Scheduled(task.id, task.due_date));
        }

        fn cancel(&self, id: TaskId) {
            self.events.lock().push(Reminder::Cancelled(id));
        }
    }

    pub(crate) struct Fixture {
        pub(crate) dir: TempDir,
        pub(crate) store: Arc<dyn TaskStore>,
        pub(crate) notifier: Arc<RecordingNotifier>,
        pub(crate) manager: TaskLifecycleManager,
        pub(crate) now: DateTime<Utc>,
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = tempdir().expect("tempdir");
        let store: Arc<dyn TaskStore> =
            Arc::new(JsonlStore::open(dir.path()).expect("open datastore"));
        let notifier = Arc::new(RecordingNotifier::default());
        let now = TZ
            .with_ymd_and_hms(2026, 10, 14, 12, 0, 0)
            .single()
            .expect("valid now")
            .with_timezone(&Utc);
        let clock = Arc::new(FixedClock { now, tz: TZ });
        let manager = TaskLifecycleManager::new(store.clone(), notifier.clone(), clock)
            .with_completion_delay(Duration::ZERO);
        Fixture {
            dir,
            store,
            notifier,
            manager,
            now,
        }
    }

    fn insert(fx: &Fixture, title: &str, due: Option<DateTime<Utc>>, recurrence: RecurrenceType) -> Task {
        let mut task = Task::new(title);
        task.priority = 1;
        task.note = "n".to_string();
        task.due_date = due;
        task.recurrence = recurrence;
        task.id = fx.store.upsert(&task).expect("insert");
        task
    }

    #[test]
    fn decision_table() {
        let now = Utc::now();
        let mut task = Task::new("t");
        assert_eq!(CompletionAction::decide(&task, now), CompletionAction::Archive);

        task.due_date = Some(now - ChronoDuration::seconds(1));
        assert_eq!(CompletionAction::decide(&task, now), CompletionAction::Archive);

        task.recurrence = RecurrenceType::Daily;
        assert_eq!(CompletionAction::decide(&task, now), CompletionAction::Advance);

        task.due_date = Some(now);
        assert_eq!(CompletionAction::decide(&task, now), CompletionAction::Advance);

        task.due_date = Some(now + ChronoDuration::seconds(1));
        assert_eq!(CompletionAction::decide(&task, now), CompletionAction::Archive);

        task.due_date = None;
        assert_eq!(CompletionAction::decide(&task, now), CompletionAction::Archive);
    }

    #[tokio::test]
    async fn completing_one_off_task_archives_it() {
        let fx = fixture();
        let task = insert(
            &fx,
            "Return library books",
            Some(fx.now - ChronoDuration::milliseconds(1000)),
            RecurrenceType::None,
        );

        let outcome = fx.manager.complete(task.clone()).await.expect("complete");
        let Completion::Archived(archived) = outcome else {
            panic!("expected archive, got {outcome:?}");
        };

        assert!(fx.store.get_by_id(task.id).expect("read").is_none());
        let history = fx.store.all_deleted().expect("history");
        assert_eq!(history, vec![archived.clone()]);
        assert_eq!(archived.title, task.title);
        assert_eq!(archived.priority, task.priority);
        assert_eq!(archived.note, task.note);
        assert_eq!(archived.due_date, task.due_date);
        assert!(archived.deleted_at >= fx.now);
        assert_eq!(*fx.notifier.events.lock(), vec![Reminder::Cancelled(task.id)]);
    }

    #[tokio::test]
    async fn completing_overdue_daily_task_advances_it() {
        let fx = fixture();
        let due = fx.now - ChronoDuration::milliseconds(1000);
        let task = insert(&fx, "Stretch", Some(due), RecurrenceType::Daily);

        let outcome = fx.manager.complete(task.clone()).await.expect("complete");
        let Completion::Advanced(advanced) = outcome else {
            panic!("expected advance, got {outcome:?}");
        };

        assert!(fx.store.all_deleted().expect("history").is_empty());
        let stored = fx
            .store
            .get_by_id(task.id)
            .expect("read")
            .expect("still active");
        assert_eq!(stored, advanced);
        assert_eq!(stored.due_date, Some(due + ChronoDuration::days(1)));
        assert_eq!(
            *fx.notifier.events.lock(),
            vec![
                Reminder::Cancelled(task.id),
                Reminder::Scheduled(task.id, stored.due_date),
            ]
        );
    }

    #[tokio::test]
    async fn completing_future_daily_task_archives_early() {
        let fx = fixture();
        let task = insert(
            &fx,
            "Stretch",
            Some(fx.now + ChronoDuration::days(1)),
            RecurrenceType::Daily,
        );

        let outcome = fx.manager.complete(task.clone()).await.expect("complete");
        assert!(matches!(outcome, Completion::Archived(_)));
        assert!(fx.store.all_sorted_by(SortType::Priority).expect("query").is_empty());
        assert_eq!(fx.store.all_deleted().expect("history").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_waits_for_delay() {
        let fx = fixture();
        let manager = fx
            .manager
            .clone()
            .with_completion_delay(Duration::from_millis(500));
        let task = insert(&fx, "Slow", None, RecurrenceType::None);

        let started = tokio::time::Instant::now();
        manager.complete(task).await.expect("complete");
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn restore_preserves_fields_with_fresh_id() {
        let fx = fixture();
        let mut task = insert(
            &fx,
            "Call the bank",
            Some(fx.now + ChronoDuration::hours(3)),
            RecurrenceType::Monthly,
        );
        task.priority = 3;
        fx.store.upsert(&task).expect("update");
        fx.store.delete(&task).expect("remove");
        let archived = task.clone().archive(fx.now);
        fx.store.insert_deleted(&archived).expect("archive");

        let restored = fx.manager.restore(&archived).expect("restore");
        assert_ne!(restored.id, 0);
        assert_eq!(restored.title, task.title);
        assert_eq!(restored.priority, 3);
        assert_eq!(restored.note, task.note);
        assert_eq!(restored.due_date, task.due_date);
        assert_eq!(restored.recurrence, RecurrenceType::Monthly);
        assert!(fx.store.all_deleted().expect("history").is_empty());
        assert_eq!(
            fx.store.get_by_id(restored.id).expect("read"),
            Some(restored.clone())
        );
        assert_eq!(
            *fx.notifier.events.lock(),
            vec![Reminder::Scheduled(restored.id, restored.due_date)]
        );
    }

    #[test]
    fn blank_title_is_rejected_without_writes() {
        let fx = fixture();
        let rx = fx.store.subscribe();
        let draft = Draft {
            title: "   ".to_string(),
            ..Draft::new()
        };
        assert_eq!(fx.manager.save(&draft).expect("save"), SaveOutcome::Rejected);
        assert!(!rx.has_changed().expect("store alive"));
    }

    #[test]
    fn save_splits_and_rejoins_local_date_and_time() {
        let fx = fixture();
        let mut draft = Draft::new();
        draft.title = "  Dentist ".to_string();
        draft.set_priority(9);
        draft.due_date = NaiveDate::from_ymd_opt(2026, 10, 20);
        draft.due_time = NaiveTime::from_hms_opt(8, 45, 0);

        let SaveOutcome::Saved(saved) = fx.manager.save(&draft).expect("save") else {
            panic!("draft should save");
        };
        assert_eq!(saved.title, "Dentist");
        assert_eq!(saved.priority, 3);
        assert_eq!(
            saved.due_date,
            TZ.with_ymd_and_hms(2026, 10, 20, 8, 45, 0)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        );
        assert_eq!(
            *fx.notifier.events.lock(),
            vec![Reminder::Scheduled(saved.id, saved.due_date)]
        );

        let reopened = fx.manager.edit_draft(saved.id).expect("load draft");
        assert_eq!(reopened.editing_id, Some(saved.id));
        assert_eq!(reopened.due_date, draft.due_date);
        assert_eq!(reopened.due_time, draft.due_time);
    }

    #[test]
    fn editing_keeps_id_and_date_only_stays_midnight() {
        let fx = fixture();
        let task = insert(&fx, "Plan trip", None, RecurrenceType::None);

        let mut draft = fx.manager.edit_draft(task.id).expect("load draft");
        draft.due_date = NaiveDate::from_ymd_opt(2026, 12, 1);
        let SaveOutcome::Saved(saved) = fx.manager.save(&draft).expect("save") else {
            panic!("draft should save");
        };

        assert_eq!(saved.id, task.id);
        let reopened = fx.manager.edit_draft(saved.id).expect("load draft");
        assert_eq!(reopened.due_time, None);
        assert_eq!(fx.store.all_sorted_by(SortType::DueDate).expect("query").len(), 1);
    }

    #[test]
    fn recurring_draft_without_date_is_anchored_today() {
        let fx = fixture();
        let draft = Draft {
            title: "Journal".to_string(),
            recurrence: RecurrenceType::Daily,
            ..Draft::new()
        };
        let SaveOutcome::Saved(saved) = fx.manager.save(&draft).expect("save") else {
            panic!("draft should save");
        };
        assert_eq!(
            saved.due_date,
            TZ.with_ymd_and_hms(2026, 10, 14, 0, 0, 0)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        );
    }

    fn corrupt(fx: &Fixture, file: &str) {
        std::fs::write(fx.dir.path().join(file), "not json\n").expect("corrupt file");
    }

    #[tokio::test]
    async fn completing_same_snapshot_twice_archives_once() {
        let fx = fixture();
        let task = insert(&fx, "Water plants", None, RecurrenceType::None);

        fx.manager.complete(task.clone()).await.expect("first completion");
        let second = fx.manager.complete(task.clone()).await;
        assert!(matches!(second, Err(StoreError::NotFound(id)) if id == task.id));

        assert_eq!(fx.store.all_deleted().expect("history").len(), 1);
        assert_eq!(*fx.notifier.events.lock(), vec![Reminder::Cancelled(task.id)]);
    }

    #[tokio::test]
    async fn failed_archive_keeps_task_active() {
        let fx = fixture();
        let task = insert(&fx, "Renew passport", None, RecurrenceType::None);
        corrupt(&fx, "history.data");

        let result = fx.manager.complete(task.clone()).await;
        assert!(matches!(result, Err(StoreError::Json { line: 1, .. })));
        assert_eq!(fx.store.get_by_id(task.id).expect("read"), Some(task));
        assert!(fx.notifier.events.lock().is_empty());
    }

    #[test]
    fn failed_save_schedules_nothing() {
        let fx = fixture();
        corrupt(&fx, "tasks.data");
        let draft = Draft {
            title: "Book flights".to_string(),
            due_date: NaiveDate::from_ymd_opt(2026, 11, 2),
            ..Draft::new()
        };

        assert!(fx.manager.save(&draft).is_err());
        assert!(fx.notifier.events.lock().is_empty());
        assert!(fx.store.all_deleted().expect("history").is_empty());
    }

    #[test]
    fn failed_restore_keeps_history_row() {
        let fx = fixture();
        let task = insert(&fx, "Fix bike", Some(fx.now), RecurrenceType::None);
        let archived = fx
            .store
            .archive(&task, fx.now)
            .expect("archive")
            .expect("row archived");
        corrupt(&fx, "tasks.data");

        assert!(fx.manager.restore(&archived).is_err());
        assert_eq!(fx.store.all_deleted().expect("history"), vec![archived]);
        assert!(fx.notifier.events.lock().is_empty());
    }

    #[test]
    fn history_can_be_purged() {
        let fx = fixture();
        for title in ["a", "b"] {
            let task = insert(&fx, title, None, RecurrenceType::None);
            fx.store.insert_deleted(&task.archive(fx.now)).expect("archive");
        }
        let history = fx.store.all_deleted().expect("history");
        fx.manager.delete_permanently(&history[0]).expect("purge one");
        assert_eq!(fx.store.all_deleted().expect("history").len(), 1);

        fx.manager.clear_history().expect("clear");
        assert!(fx.store.all_deleted().expect("history").is_empty());
    }
}
