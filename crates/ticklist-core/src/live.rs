use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use crate::datastore::{StoreError, TaskStore};
use crate::sort::SortType;
use crate::task::{DeletedTask, Task};

type Query<T> = Box<dyn Fn(&dyn TaskStore) -> Result<T, StoreError> + Send + Sync>;

/// A query that re-runs whenever the store's revision moves.
///
/// The first call to [`LiveQuery::next`] yields the current snapshot
/// immediately. Returns `None` if the change channel closes.
pub struct LiveQuery<T> {
    store: Arc<dyn TaskStore>,
    changes: watch::Receiver<u64>,
    query: Query<T>,
    primed: bool,
}

impl<T> LiveQuery<T> {
    pub fn new<F>(store: Arc<dyn TaskStore>, query: F) -> Self
    where
        F: Fn(&dyn TaskStore) -> Result<T, StoreError> + Send + Sync + 'static,
    {
        let changes = store.subscribe();
        Self {
            store,
            changes,
            query: Box::new(query),
            primed: false,
        }
    }

    pub async fn next(&mut self) -> Option<Result<T, StoreError>> {
        if self.primed {
            self.changes.changed().await.ok()?;
        } else {
            self.primed = true;
        }
        let revision = *self.changes.borrow_and_update();
        trace!(revision, "live query re-running");
        Some((self.query)(self.store.as_ref()))
    }
}

pub fn live_tasks(store: Arc<dyn TaskStore>, sort: SortType) -> LiveQuery<Vec<Task>> {
    LiveQuery::new(store, move |store| store.all_sorted_by(sort))
}

pub fn live_deleted(store: Arc<dyn TaskStore>) -> LiveQuery<Vec<DeletedTask>> {
    LiveQuery::new(store, |store| store.all_deleted())
}
