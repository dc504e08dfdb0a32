use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use crate::datastore::StoreError;
use crate::lifecycle::{Completion, Draft, SaveOutcome, TaskLifecycleManager};
use crate::preferences::Preferences;
use crate::projector::{ProjectionError, TaskListProjector};
use crate::task::{DeletedTask, Task, TaskId};

/// Result of one background intent that finished without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Saved(SaveOutcome),
    Completed(Completion),
    Restored(Task),
    Purged(DeletedTask),
    HistoryCleared,
}

/// Owns one list session: the draft being edited, the projected task list,
/// and every intent still running in the background.
///
/// Intents are fire-and-forget. Failures are logged and never returned;
/// [`Board::settle`] hands back what did succeed.
pub struct Board {
    manager: TaskLifecycleManager,
    prefs: Arc<Preferences>,
    projector: TaskListProjector,
    draft: Draft,
    scope: JoinSet<Option<Outcome>>,
}

impl Board {
    pub fn new(manager: TaskLifecycleManager, prefs: Arc<Preferences>) -> Self {
        let projector =
            TaskListProjector::spawn(manager.store().clone(), &prefs, manager.clock().clone());
        Self {
            manager,
            prefs,
            projector,
            draft: Draft::new(),
            scope: JoinSet::new(),
        }
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub fn manager(&self) -> &TaskLifecycleManager {
        &self.manager
    }

    pub fn tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.projector.subscribe()
    }

    pub async fn visible_tasks(&self) -> Result<Vec<Task>, ProjectionError> {
        self.projector.published().await
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut Draft {
        &mut self.draft
    }

    pub fn begin_add(&mut self) {
        self.draft = Draft::new();
    }

    pub fn begin_edit(&mut self, id: TaskId) -> Result<(), StoreError> {
        self.draft = self.manager.edit_draft(id)?;
        Ok(())
    }

    /// Saves in the background. The draft resets whatever the outcome.
    #[instrument(skip(self))]
    pub fn save_draft(&mut self) {
        let draft = std::mem::take(&mut self.draft);
        let manager = self.manager.clone();
        self.spawn("save", async move { manager.save(&draft).map(Outcome::Saved) });
    }

    #[instrument(skip(self, task), fields(id = task.id))]
    pub fn complete(&mut self, task: Task) {
        let manager = self.manager.clone();
        self.spawn("complete", async move {
            manager.complete(task).await.map(Outcome::Completed)
        });
    }

    #[instrument(skip(self, deleted), fields(id = deleted.id))]
    pub fn restore(&mut self, deleted: DeletedTask) {
        let manager = self.manager.clone();
        self.spawn("restore", async move {
            manager.restore(&deleted).map(Outcome::Restored)
        });
    }

    #[instrument(skip(self, deleted), fields(id = deleted.id))]
    pub fn delete_permanently(&mut self, deleted: DeletedTask) {
        let manager = self.manager.clone();
        self.spawn("purge", async move {
            manager.delete_permanently(&deleted)?;
            Ok(Outcome::Purged(deleted))
        });
    }

    #[instrument(skip(self))]
    pub fn clear_history(&mut self) {
        let manager = self.manager.clone();
        self.spawn("clear-history", async move {
            manager.clear_history()?;
            Ok(Outcome::HistoryCleared)
        });
    }

    fn spawn<F>(&mut self, intent: &'static str, work: F)
    where
        F: Future<Output = Result<Outcome, StoreError>> + Send + 'static,
    {
        debug!(intent, "spawning intent");
        self.scope.spawn(async move {
            match work.await {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    error!(intent, error = %err, "intent failed");
                    None
                }
            }
        });
    }

    /// Awaits every in-flight intent, returning the successful outcomes in
    /// the order they finished.
    pub async fn settle(&mut self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(joined) = self.scope.join_next().await {
            match joined {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(err) => error!(error = %err, "intent task did not finish"),
            }
        }
        outcomes
    }

    /// Stops the projector and cancels intents still waiting on their
    /// completion delay.
    pub fn shutdown(mut self) {
        info!(pending = self.scope.len(), "shutting down board");
        self.scope.abort_all();
        self.projector.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;

    use super::{Board, Outcome};
    use crate::lifecycle::tests::{Reminder, fixture};
    use crate::lifecycle::{Completion, SaveOutcome};
    use crate::preferences::{PreferenceValues, Preferences};
    use crate::projector::ProjectionError;
    use crate::sort::SortType;
    use crate::task::RecurrenceType;

    fn prefs() -> Arc<Preferences> {
        Arc::new(Preferences::in_memory(PreferenceValues::default()))
    }

    #[tokio::test]
    async fn draft_resets_even_when_rejected() {
        let fx = fixture();
        let mut board = Board::new(fx.manager.clone(), prefs());

        board.draft_mut().title = " ".to_string();
        board.save_draft();
        assert_eq!(board.draft().title, "");
        assert_eq!(board.settle().await, vec![Outcome::Saved(SaveOutcome::Rejected)]);

        board.begin_add();
        board.draft_mut().title = "Buy stamps".to_string();
        board.draft_mut().set_priority(2);
        board.save_draft();
        let outcomes = board.settle().await;
        assert!(matches!(outcomes.as_slice(), [Outcome::Saved(SaveOutcome::Saved(t))] if t.title == "Buy stamps"));

        let mut rx = board.tasks();
        let listed = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|tasks| tasks.len() == 1),
        )
        .await
        .map(|found| found.map(|tasks| tasks[0].priority));
        assert!(matches!(listed, Ok(Ok(2))));
        board.shutdown();
    }

    #[tokio::test]
    async fn edit_then_complete_recurring_task() {
        let fx = fixture();
        let mut board = Board::new(fx.manager.clone(), prefs());

        board.draft_mut().title = "Water plants".to_string();
        board.draft_mut().recurrence = RecurrenceType::Weekly;
        board.save_draft();
        let outcomes = board.settle().await;
        let [Outcome::Saved(SaveOutcome::Saved(saved))] = outcomes.as_slice() else {
            panic!("expected one save, got {outcomes:?}");
        };
        let saved = saved.clone();
        assert!(saved.due_date.is_some_and(|due| due <= fx.now));

        board.begin_edit(saved.id).expect("load draft");
        assert_eq!(board.draft().editing_id, Some(saved.id));
        board.draft_mut().note = "the fern too".to_string();
        board.save_draft();
        board.settle().await;

        let edited = fx
            .store
            .get_by_id(saved.id)
            .expect("read")
            .expect("still stored");
        assert_eq!(edited.note, "the fern too");

        board.complete(edited.clone());
        let outcomes = board.settle().await;
        let [Outcome::Completed(Completion::Advanced(advanced))] = outcomes.as_slice() else {
            panic!("expected advance, got {outcomes:?}");
        };
        assert_eq!(advanced.id, saved.id);
        assert_eq!(
            advanced.due_date,
            edited.due_date.map(|due| due + ChronoDuration::weeks(1))
        );
        assert!(
            fx.notifier
                .events
                .lock()
                .contains(&Reminder::Scheduled(saved.id, advanced.due_date))
        );
        board.shutdown();
    }

    #[tokio::test]
    async fn history_intents_round_trip() {
        let fx = fixture();
        let mut board = Board::new(fx.manager.clone(), prefs());

        board.draft_mut().title = "Send invoice".to_string();
        board.save_draft();
        board.settle().await;
        let task = fx
            .store
            .all_sorted_by(SortType::Priority)
            .expect("query")
            .remove(0);

        board.complete(task.clone());
        board.settle().await;
        let archived = fx.store.all_deleted().expect("history").remove(0);

        board.restore(archived);
        let outcomes = board.settle().await;
        let [Outcome::Restored(restored)] = outcomes.as_slice() else {
            panic!("expected restore, got {outcomes:?}");
        };
        assert_eq!(restored.title, task.title);
        assert!(fx.store.all_deleted().expect("history").is_empty());

        board.complete(restored.clone());
        board.settle().await;
        board.clear_history();
        assert_eq!(board.settle().await, vec![Outcome::HistoryCleared]);
        assert!(fx.store.all_deleted().expect("history").is_empty());
        board.shutdown();
    }

    #[tokio::test]
    async fn double_complete_archives_once() {
        let fx = fixture();
        let mut board = Board::new(fx.manager.clone(), prefs());

        board.draft_mut().title = "Take out bins".to_string();
        board.save_draft();
        board.settle().await;
        let task = fx
            .store
            .all_sorted_by(SortType::Priority)
            .expect("query")
            .remove(0);

        board.complete(task.clone());
        board.complete(task);
        let outcomes = board.settle().await;
        assert!(matches!(
            outcomes.as_slice(),
            [Outcome::Completed(Completion::Archived(_))]
        ));
        assert_eq!(fx.store.all_deleted().expect("history").len(), 1);
        board.shutdown();
    }

    #[tokio::test]
    async fn unreadable_tasks_file_is_reported() {
        let fx = fixture();
        std::fs::write(fx.dir.path().join("tasks.data"), "garbage\n").expect("corrupt file");
        let board = Board::new(fx.manager.clone(), prefs());

        let listed = tokio::time::timeout(Duration::from_secs(5), board.visible_tasks())
            .await
            .expect("listing returns");
        assert!(matches!(listed, Err(ProjectionError::Store(_))));
        board.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_delayed_completion() {
        let fx = fixture();
        let manager = fx
            .manager
            .clone()
            .with_completion_delay(Duration::from_millis(500));
        let mut board = Board::new(manager, prefs());

        board.draft_mut().title = "Maybe later".to_string();
        board.save_draft();
        board.settle().await;
        let task = fx
            .store
            .all_sorted_by(SortType::Priority)
            .expect("query")
            .remove(0);

        board.complete(task.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        board.shutdown();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(fx.store.get_by_id(task.id).expect("read").is_some());
        assert!(fx.store.all_deleted().expect("history").is_empty());
    }
}
