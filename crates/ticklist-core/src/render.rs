use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::format::DateTimeFormatter;
use crate::task::{DeletedTask, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(count = tasks.len()))]
    pub fn print_task_table(
        &self,
        tasks: &[Task],
        formatter: &DateTimeFormatter,
    ) -> anyhow::Result<()> {
        self.write_task_table(io::stdout().lock(), tasks, formatter)
    }

    pub fn write_task_table<W: Write>(
        &self,
        mut out: W,
        tasks: &[Task],
        formatter: &DateTimeFormatter,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = ["ID", "Due", "Pri", "Recur", "Title"];
        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    self.due_cell(task.due_date, formatter.now, formatter),
                    priority_marks(task.priority),
                    recurrence_cell(task),
                    task.title.clone(),
                ]
            })
            .collect();

        write_table(&mut out, &headers, rows)?;
        writeln!(out)?;
        writeln!(out, "{} task{}", tasks.len(), plural(tasks.len()))?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(count = history.len()))]
    pub fn print_history_table(
        &self,
        history: &[DeletedTask],
        formatter: &DateTimeFormatter,
    ) -> anyhow::Result<()> {
        self.write_history_table(io::stdout().lock(), history, formatter)
    }

    /// Rows are numbered from 1 in newest-first order; `restore` and
    /// `purge` take these numbers.
    pub fn write_history_table<W: Write>(
        &self,
        mut out: W,
        history: &[DeletedTask],
        formatter: &DateTimeFormatter,
    ) -> anyhow::Result<()> {
        if history.is_empty() {
            writeln!(out, "History is empty.")?;
            return Ok(());
        }

        let headers = ["#", "Completed", "Due", "Pri", "Title"];
        let rows = history
            .iter()
            .enumerate()
            .map(|(idx, task)| {
                vec![
                    self.paint(&(idx + 1).to_string(), "33"),
                    formatter.format(Some(task.deleted_at)),
                    formatter.format(task.due_date),
                    priority_marks(task.priority),
                    task.title.clone(),
                ]
            })
            .collect();

        write_table(&mut out, &headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(id = task.id))]
    pub fn print_task_info(&self, task: &Task, formatter: &DateTimeFormatter) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(out, "priority    {}", task.priority)?;
        writeln!(out, "recurrence  {}", task.recurrence)?;
        if let Some(due) = task.due_date {
            writeln!(out, "due         {}", formatter.format(Some(due)))?;
            writeln!(out, "due (utc)   {}", due.format("%Y-%m-%dT%H:%M:%SZ"))?;
        }
        if !task.note.is_empty() {
            writeln!(out, "note        {}", task.note)?;
        }

        Ok(())
    }

    fn due_cell(
        &self,
        due: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        formatter: &DateTimeFormatter,
    ) -> String {
        let text = formatter.format(due);
        match due {
            Some(due) if due < now => self.paint(&text, "31"),
            _ => text,
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn priority_marks(priority: u8) -> String {
    "!".repeat(usize::from(priority))
}

fn recurrence_cell(task: &Task) -> String {
    if task.recurrence.is_recurring() {
        task.recurrence.label().to_string()
    } else {
        String::new()
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(*header))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let last = headers.len().saturating_sub(1);
    for (idx, (header, width)) in headers.iter().zip(&widths).enumerate() {
        if idx == last {
            write!(writer, "{header}")?;
        } else {
            write!(writer, "{header:width$} ")?;
        }
    }
    writeln!(writer)?;

    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        for (idx, (cell, width)) in row.iter().zip(&widths).enumerate() {
            if idx == last {
                write!(writer, "{cell}")?;
                continue;
            }
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
