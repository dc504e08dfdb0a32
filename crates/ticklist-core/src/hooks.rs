use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::lifecycle::NotificationScheduler;
use crate::task::{Task, TaskId};

pub const SCHEDULE_EVENT: &str = "on-schedule";
pub const CANCEL_EVENT: &str = "on-cancel";

/// Delivers reminder requests to user scripts in `<data>/hooks`.
///
/// `on-schedule.*` scripts receive the task as one JSON line on stdin;
/// `on-cancel.*` scripts receive `{"id":N}`. A failing script is logged
/// and never reaches the caller.
#[derive(Debug, Clone)]
pub struct HookNotifier {
    enabled: bool,
    hooks_dir: PathBuf,
}

impl HookNotifier {
    pub fn new(cfg: &Config, data_dir: &Path) -> Self {
        let enabled = cfg.get_bool("hooks").unwrap_or(true);
        Self::with_dir(data_dir.join("hooks"), enabled)
    }

    pub fn with_dir(hooks_dir: PathBuf, enabled: bool) -> Self {
        debug!(
            enabled,
            hooks_dir = %hooks_dir.display(),
            "initialized hook notifier"
        );
        Self { enabled, hooks_dir }
    }

    #[instrument(skip(self, payload))]
    fn fire(&self, event: &str, payload: &str) {
        if !self.enabled {
            debug!("hooks disabled; skipping");
            return;
        }

        let scripts = match self.list_scripts(event) {
            Ok(scripts) => scripts,
            Err(err) => {
                warn!(error = %err, "could not list hook scripts");
                return;
            }
        };
        debug!(count = scripts.len(), "running hooks");
        for script in scripts {
            if let Err(err) = run_hook(&script, payload) {
                warn!(hook = %script.display(), error = %err, "hook failed");
            }
        }
    }

    fn list_scripts(&self, event: &str) -> anyhow::Result<Vec<PathBuf>> {
        if !self.hooks_dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{event}.");
        let mut scripts = Vec::new();
        for entry in fs::read_dir(&self.hooks_dir)
            .with_context(|| format!("failed to read hooks dir {}", self.hooks_dir.display()))?
        {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !name.starts_with(&prefix) {
                continue;
            }

            if !is_executable(&path)? {
                debug!(path = %path.display(), "skipping non-executable hook");
                continue;
            }
            scripts.push(path);
        }

        scripts.sort();
        Ok(scripts)
    }
}

impl NotificationScheduler for HookNotifier {
    fn schedule(&self, task: &Task) {
        match serde_json::to_string(task) {
            Ok(payload) => self.fire(SCHEDULE_EVENT, &payload),
            Err(err) => warn!(id = task.id, error = %err, "could not encode task for hook"),
        }
    }

    fn cancel(&self, id: TaskId) {
        let payload = serde_json::json!({ "id": id }).to_string();
        self.fire(CANCEL_EVENT, &payload);
    }
}

fn run_hook(path: &Path, payload: &str) -> anyhow::Result<()> {
    info!(hook = %path.display(), "running hook");
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run hook {}", path.display()))?;

    if let Some(mut stdin) = child.stdin.take() {
        writeln!(stdin, "{payload}")?;
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to wait for hook {}", path.display()))?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        warn!(hook = %path.display(), stderr = %stderr, "hook wrote stderr");
    }

    if !output.status.success() {
        return Err(anyhow!(
            "script {} exited with status {}",
            path.display(),
            output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> anyhow::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> anyhow::Result<bool> {
    Ok(path.is_file())
}
