use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::sort::{SortType, sort_tasks};
use crate::task::{DeletedTask, Task, TaskId, UNSAVED_ID};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed parsing {} line {line}: {source}", .path.display())]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to persist {}: {message}", .path.display())]
    Persist { path: PathBuf, message: String },
    #[error("task {0} not found")]
    NotFound(TaskId),
}

/// Row storage for active and archived tasks.
///
/// Every successful write bumps the revision published through
/// [`TaskStore::subscribe`], which is what drives live queries.
pub trait TaskStore: Send + Sync {
    /// Inserts when `task.id` is unsaved, replaces the row otherwise.
    fn upsert(&self, task: &Task) -> Result<TaskId, StoreError>;

    /// Returns whether a row matched.
    fn delete(&self, task: &Task) -> Result<bool, StoreError>;

    fn get_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    fn all_sorted_by(&self, sort: SortType) -> Result<Vec<Task>, StoreError>;

    fn insert_deleted(&self, task: &DeletedTask) -> Result<(), StoreError>;

    fn delete_deleted(&self, task: &DeletedTask) -> Result<(), StoreError>;

    /// Most recently archived first.
    fn all_deleted(&self) -> Result<Vec<DeletedTask>, StoreError>;

    fn delete_all_deleted(&self) -> Result<(), StoreError>;

    /// Moves the active row for `task` into history in one write.
    /// `None` when no active row has that id.
    fn archive(
        &self,
        task: &Task,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<DeletedTask>, StoreError>;

    /// Moves a history row back into the active table under a fresh id.
    /// `None` when the history row is already gone.
    fn restore(&self, deleted: &DeletedTask) -> Result<Option<Task>, StoreError>;

    fn subscribe(&self) -> watch::Receiver<u64>;
}

#[derive(Debug)]
pub struct JsonlStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub history_path: PathBuf,
    write_lock: Mutex<()>,
    revision: watch::Sender<u64>,
}

impl JsonlStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::Io {
            path: data_dir.clone(),
            source,
        })?;

        let tasks_path = data_dir.join("tasks.data");
        let history_path = data_dir.join("history.data");

        for path in [&tasks_path, &history_path] {
            if !path.exists() {
                fs::write(path, "").map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
            }
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            history = %history_path.display(),
            "opened datastore"
        );

        let (revision, _) = watch::channel(0);
        Ok(Self {
            data_dir,
            tasks_path,
            history_path,
            write_lock: Mutex::new(()),
            revision,
        })
    }

    fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        load_jsonl(&self.tasks_path)
    }

    fn load_history(&self) -> Result<Vec<DeletedTask>, StoreError> {
        load_jsonl(&self.history_path)
    }

    fn next_id(&self, tasks: &[Task]) -> Result<TaskId, StoreError> {
        Ok(fresh_id(tasks, &self.load_history()?))
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl TaskStore for JsonlStore {
    #[tracing::instrument(skip(self, task), fields(id = task.id))]
    fn upsert(&self, task: &Task) -> Result<TaskId, StoreError> {
        let _guard = self.write_lock.lock();
        let mut tasks = self.load_tasks()?;

        let mut row = task.clone();
        if row.id == UNSAVED_ID {
            row.id = self.next_id(&tasks)?;
            debug!(id = row.id, "assigned id to new task");
        }
        let id = row.id;

        match tasks.iter_mut().find(|t| t.id == id) {
            Some(existing) => *existing = row,
            None => tasks.push(row),
        }
        tasks.sort_by_key(|t| t.id);

        save_jsonl_atomic(&self.tasks_path, &tasks)?;
        self.bump();
        Ok(id)
    }

    #[tracing::instrument(skip(self, task), fields(id = task.id))]
    fn delete(&self, task: &Task) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let mut tasks = self.load_tasks()?;
        let before = tasks.len();
        tasks.retain(|t| t.id != task.id);
        if tasks.len() == before {
            debug!("delete matched no row");
            return Ok(false);
        }

        save_jsonl_atomic(&self.tasks_path, &tasks)?;
        self.bump();
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    fn get_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.load_tasks()?.into_iter().find(|t| t.id == id))
    }

    #[tracing::instrument(skip(self))]
    fn all_sorted_by(&self, sort: SortType) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.load_tasks()?;
        sort_tasks(&mut tasks, sort);
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, task), fields(id = task.id))]
    fn insert_deleted(&self, task: &DeletedTask) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut history = self.load_history()?;
        history.push(task.clone());

        save_jsonl_atomic(&self.history_path, &history)?;
        self.bump();
        Ok(())
    }

    #[tracing::instrument(skip(self, task), fields(id = task.id))]
    fn delete_deleted(&self, task: &DeletedTask) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut history = self.load_history()?;
        let before = history.len();
        history.retain(|t| !t.same_record(task));
        if history.len() == before {
            debug!("history delete matched no row");
            return Ok(());
        }

        save_jsonl_atomic(&self.history_path, &history)?;
        self.bump();
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn all_deleted(&self) -> Result<Vec<DeletedTask>, StoreError> {
        let mut history = self.load_history()?;
        history.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at).then_with(|| a.id.cmp(&b.id)));
        Ok(history)
    }

    #[tracing::instrument(skip(self))]
    fn delete_all_deleted(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let count = self.load_history()?.len();
        save_jsonl_atomic::<DeletedTask>(&self.history_path, &[])?;
        info!(count, "cleared history");
        self.bump();
        Ok(())
    }

    // History is written first. If the active table then fails to save,
    // the history file is put back so neither table changes.
    #[tracing::instrument(skip(self, task), fields(id = task.id))]
    fn archive(
        &self,
        task: &Task,
        deleted_at: DateTime<Utc>,
    ) -> Result<Option<DeletedTask>, StoreError> {
        let _guard = self.write_lock.lock();
        let mut tasks = self.load_tasks()?;
        let Some(pos) = tasks.iter().position(|t| t.id == task.id) else {
            debug!("archive matched no active row");
            return Ok(None);
        };
        let history = self.load_history()?;

        tasks.remove(pos);
        let archived = task.clone().archive(deleted_at);
        let mut next_history = history.clone();
        next_history.push(archived.clone());

        save_jsonl_atomic(&self.history_path, &next_history)?;
        if let Err(err) = save_jsonl_atomic(&self.tasks_path, &tasks) {
            rollback(&self.history_path, &history);
            return Err(err);
        }

        self.bump();
        Ok(Some(archived))
    }

    #[tracing::instrument(skip(self, deleted), fields(id = deleted.id))]
    fn restore(&self, deleted: &DeletedTask) -> Result<Option<Task>, StoreError> {
        let _guard = self.write_lock.lock();
        let history = self.load_history()?;
        if !history.iter().any(|t| t.same_record(deleted)) {
            debug!("restore matched no history row");
            return Ok(None);
        }
        let tasks = self.load_tasks()?;

        let mut task = deleted.clone().into_restored();
        task.id = fresh_id(&tasks, &history);
        let mut next_tasks = tasks.clone();
        next_tasks.push(task.clone());
        let remaining: Vec<DeletedTask> = history
            .into_iter()
            .filter(|t| !t.same_record(deleted))
            .collect();

        save_jsonl_atomic(&self.tasks_path, &next_tasks)?;
        if let Err(err) = save_jsonl_atomic(&self.history_path, &remaining) {
            rollback(&self.tasks_path, &tasks);
            return Err(err);
        }

        self.bump();
        Ok(Some(task))
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

fn fresh_id(tasks: &[Task], history: &[DeletedTask]) -> TaskId {
    let max_active = tasks.iter().map(|t| t.id).max().unwrap_or(0);
    let max_archived = history.iter().map(|t| t.id).max().unwrap_or(0);
    max_active.max(max_archived) + 1
}

fn rollback<T: Serialize>(path: &Path, rows: &[T]) {
    if let Err(err) = save_jsonl_atomic(path, rows) {
        error!(file = %path.display(), %err, "failed to roll back partial write");
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    debug!(file = %path.display(), "loading jsonl");
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::open(path).map_err(io_err)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let row: T = serde_json::from_str(trimmed).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        out.push(row);
    }

    debug!(count = out.len(), "loaded rows from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, rows))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), StoreError> {
    debug!(file = %path.display(), count = rows.len(), "saving jsonl atomically");
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
    for row in rows {
        let serialized = serde_json::to_string(row)?;
        writeln!(temp, "{serialized}").map_err(io_err)?;
    }
    temp.flush().map_err(io_err)?;

    temp.persist(path).map_err(|err| StoreError::Persist {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    Ok(())
}
