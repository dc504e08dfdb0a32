use std::collections::HashSet;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};

use crate::board::{Board, Outcome};
use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::{DueInput, parse_clock_time, parse_due_expr};
use crate::filter::{DueDateFilter, FirstDayOfWeek};
use crate::format::{ClockType, DateTimeFormatter};
use crate::lifecycle::{Completion, Draft, SaveOutcome};
use crate::live::live_deleted;
use crate::render::Renderer;
use crate::sort::SortType;
use crate::task::{DeletedTask, RecurrenceType, TaskId};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "edit",
        "list",
        "info",
        "done",
        "history",
        "restore",
        "purge",
        "clear-history",
        "sort",
        "filter",
        "week-start",
        "clock",
        "show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(board, cfg, renderer, inv))]
pub async fn dispatch(
    board: &mut Board,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    debug!(
        command,
        filter = ?inv.filter_terms,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "add" => cmd_add(board, &inv.command_args).await,
        "edit" => cmd_edit(board, &inv.filter_terms, &inv.command_args).await,
        "list" => cmd_list(board, renderer).await,
        "info" => cmd_info(board, renderer, &inv.filter_terms, &inv.command_args),
        "done" => cmd_done(board, &inv.filter_terms, &inv.command_args).await,
        "history" => cmd_history(board, renderer).await,
        "restore" => cmd_restore(board, &inv.filter_terms, &inv.command_args).await,
        "purge" => cmd_purge(board, &inv.filter_terms, &inv.command_args).await,
        "clear-history" => cmd_clear_history(board).await,
        "sort" => cmd_sort(board, &inv.command_args),
        "filter" => cmd_filter(board, &inv.command_args),
        "week-start" => cmd_week_start(board, &inv.command_args),
        "clock" => cmd_clock(board, &inv.command_args),
        "show" => cmd_show(board, cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn formatter(board: &Board) -> DateTimeFormatter {
    let clock = board.manager().clock();
    DateTimeFormatter::new(board.preferences().clock_type(), clock.now(), clock.zone())
}

#[instrument(skip(board, args))]
async fn cmd_add(board: &mut Board, args: &[String]) -> anyhow::Result<()> {
    info!("command add");
    let clock = board.manager().clock().clone();
    let (title, edits) = parse_title_and_edits(args, clock.now(), clock.zone())?;
    if title.is_empty() {
        return Err(anyhow!("add: a title is required"));
    }

    board.begin_add();
    let draft = board.draft_mut();
    draft.title = title;
    apply_edits(draft, &edits);

    let task = save(board).await?;
    println!("Created task {}.", task.id);
    Ok(())
}

#[instrument(skip(board, filter_terms, args))]
async fn cmd_edit(
    board: &mut Board,
    filter_terms: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command edit");
    let (id, rest) = single_selector(filter_terms, args, "edit")?;
    let clock = board.manager().clock().clone();
    let (title, edits) = parse_title_and_edits(rest, clock.now(), clock.zone())?;
    if title.is_empty() && edits.is_empty() {
        return Err(anyhow!("edit: nothing to change"));
    }

    board
        .begin_edit(id)
        .with_context(|| format!("cannot edit task {id}"))?;
    let draft = board.draft_mut();
    if !title.is_empty() {
        draft.title = title;
    }
    apply_edits(draft, &edits);

    let task = save(board).await?;
    println!("Modified task {}.", task.id);
    Ok(())
}

async fn save(board: &mut Board) -> anyhow::Result<crate::task::Task> {
    board.save_draft();
    match board.settle().await.pop() {
        Some(Outcome::Saved(SaveOutcome::Saved(task))) => Ok(task),
        Some(Outcome::Saved(SaveOutcome::Rejected)) => Err(anyhow!("task title cannot be blank")),
        _ => Err(anyhow!("task was not saved")),
    }
}

#[instrument(skip(board, renderer))]
async fn cmd_list(board: &mut Board, renderer: &Renderer) -> anyhow::Result<()> {
    info!("command list");
    let tasks = board.visible_tasks().await?;
    let prefs = board.preferences().snapshot();
    debug!(
        count = tasks.len(),
        sort = %prefs.sort_type,
        recurrence = %prefs.recurrence_filter,
        due = %prefs.due_date_filter,
        "listing tasks"
    );
    renderer.print_task_table(&tasks, &formatter(board))
}

#[instrument(skip(board, renderer, filter_terms, args))]
fn cmd_info(
    board: &Board,
    renderer: &Renderer,
    filter_terms: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    let (id, _) = single_selector(filter_terms, args, "info")?;
    let task = board
        .manager()
        .store()
        .get_by_id(id)?
        .ok_or_else(|| anyhow!("no task with id {id}"))?;
    renderer.print_task_info(&task, &formatter(board))
}

#[instrument(skip(board, filter_terms, args))]
async fn cmd_done(
    board: &mut Board,
    filter_terms: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command done");
    let mut ids = parse_ids(filter_terms.iter().chain(args))?;
    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(*id));
    if ids.is_empty() {
        return Err(anyhow!("done: give at least one task id"));
    }

    for id in &ids {
        let task = board
            .manager()
            .store()
            .get_by_id(*id)?
            .ok_or_else(|| anyhow!("no task with id {id}"))?;
        board.complete(task);
    }

    let view = formatter(board);
    let outcomes = board.settle().await;
    let mut finished = 0;
    for outcome in outcomes {
        match outcome {
            Outcome::Completed(Completion::Archived(task)) => {
                finished += 1;
                println!("Completed task {} '{}'.", task.id, task.title);
            }
            Outcome::Completed(Completion::Advanced(task)) => {
                finished += 1;
                println!(
                    "Task {} '{}' is next due {}.",
                    task.id,
                    task.title,
                    view.format(task.due_date)
                );
            }
            other => warn!(?other, "unexpected outcome from completion"),
        }
    }

    if finished < ids.len() {
        return Err(anyhow!(
            "completed {finished} of {} task(s); see log for details",
            ids.len()
        ));
    }
    Ok(())
}

#[instrument(skip(board, renderer))]
async fn cmd_history(board: &Board, renderer: &Renderer) -> anyhow::Result<()> {
    info!("command history");
    let history = live_deleted(board.manager().store().clone())
        .next()
        .await
        .context("history query closed")??;
    renderer.print_history_table(&history, &formatter(board))
}

fn history_entry(
    board: &Board,
    filter_terms: &[String],
    args: &[String],
    command: &str,
) -> anyhow::Result<DeletedTask> {
    let (index, _) = single_selector(filter_terms, args, command)?;
    let history = board.manager().store().all_deleted()?;
    usize::try_from(index)
        .ok()
        .and_then(|index| index.checked_sub(1))
        .and_then(|index| history.into_iter().nth(index))
        .ok_or_else(|| anyhow!("{command}: no history entry #{index}; see `tick history`"))
}

#[instrument(skip(board, filter_terms, args))]
async fn cmd_restore(
    board: &mut Board,
    filter_terms: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command restore");
    let deleted = history_entry(board, filter_terms, args, "restore")?;
    board.restore(deleted);
    match board.settle().await.pop() {
        Some(Outcome::Restored(task)) => {
            println!("Restored '{}' as task {}.", task.title, task.id);
            Ok(())
        }
        _ => Err(anyhow!("task was not restored")),
    }
}

#[instrument(skip(board, filter_terms, args))]
async fn cmd_purge(
    board: &mut Board,
    filter_terms: &[String],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command purge");
    let deleted = history_entry(board, filter_terms, args, "purge")?;
    board.delete_permanently(deleted);
    match board.settle().await.pop() {
        Some(Outcome::Purged(task)) => {
            println!("Purged '{}' from history.", task.title);
            Ok(())
        }
        _ => Err(anyhow!("history entry was not purged")),
    }
}

#[instrument(skip(board))]
async fn cmd_clear_history(board: &mut Board) -> anyhow::Result<()> {
    info!("command clear-history");
    board.clear_history();
    match board.settle().await.pop() {
        Some(Outcome::HistoryCleared) => {
            println!("History cleared.");
            Ok(())
        }
        _ => Err(anyhow!("history was not cleared")),
    }
}

fn single_value<'a>(args: &'a [String], command: &str, usage: &str) -> anyhow::Result<&'a str> {
    match args {
        [value] => Ok(value.as_str()),
        _ => Err(anyhow!("usage: tick {command} <{usage}>")),
    }
}

fn cmd_sort(board: &Board, args: &[String]) -> anyhow::Result<()> {
    let sort: SortType = single_value(args, "sort", "priority|due|alpha|alpha-rev")?.parse()?;
    board.preferences().set_sort_type(sort)?;
    println!("Sorting by {sort}.");
    Ok(())
}

fn cmd_filter(board: &Board, args: &[String]) -> anyhow::Result<()> {
    let prefs = board.preferences();
    if args.is_empty() {
        println!(
            "recur:{} due:{}",
            prefs.recurrence_filter(),
            prefs.due_date_filter()
        );
        return Ok(());
    }

    for arg in args {
        match arg.split_once(':') {
            Some(("recur" | "recurrence", value)) => {
                prefs.set_recurrence_filter(value.parse::<RecurrenceType>()?)?
            }
            Some(("due", value)) => prefs.set_due_date_filter(value.parse::<DueDateFilter>()?)?,
            None if matches!(arg.as_str(), "none" | "clear" | "off") => {
                prefs.set_recurrence_filter(RecurrenceType::None)?;
                prefs.set_due_date_filter(DueDateFilter::None)?;
            }
            _ => return Err(anyhow!("filter: expected recur:<type> or due:<range>, got {arg}")),
        }
    }

    println!(
        "Filtering recur:{} due:{}.",
        prefs.recurrence_filter(),
        prefs.due_date_filter()
    );
    Ok(())
}

fn cmd_week_start(board: &Board, args: &[String]) -> anyhow::Result<()> {
    let day: FirstDayOfWeek = single_value(args, "week-start", "monday|sunday|saturday")?.parse()?;
    board.preferences().set_first_day_of_week(day)?;
    println!("Weeks start on {day}.");
    Ok(())
}

fn cmd_clock(board: &Board, args: &[String]) -> anyhow::Result<()> {
    let clock: ClockType = single_value(args, "clock", "12h|24h")?.parse()?;
    board.preferences().set_clock_type(clock)?;
    println!("Using the {clock} clock.");
    Ok(())
}

fn cmd_show(board: &Board, cfg: &Config) -> anyhow::Result<()> {
    for (k, v) in cfg.iter() {
        println!("{k}={v}");
    }

    let prefs = board.preferences().snapshot();
    println!("pref.sort={}", prefs.sort_type);
    println!("pref.filter.recur={}", prefs.recurrence_filter);
    println!("pref.filter.due={}", prefs.due_date_filter);
    println!("pref.week-start={}", prefs.first_day_of_week);
    println!("pref.clock={}", prefs.clock_type);
    println!("timezone={}", board.manager().clock().zone());
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "\
usage: tick [-v|-q] [--tickrc PATH] [--data DIR] [--rc KEY=VALUE] <command> [args]

  add <title> [mods]            create a task
  edit <id> [title] [mods]      change a task
  list                          show tasks with the saved sort and filters
  info <id>                     show one task
  done <id>...                  complete tasks (recurring ones advance)
  history                       show completed tasks, newest first
  restore <n> | purge <n>       bring back or drop history entry n
  clear-history                 drop all history
  sort <priority|due|alpha|alpha-rev>
  filter [recur:<type>] [due:<none|today|week|month|year>] | filter none
  week-start <monday|sunday|saturday>
  clock <12h|24h>
  show | help | version

mods: pri:0-3 due:<today|tomorrow|monday|YYYY-MM-DD|+3d|none> at:<HH:MM|3pm|none>
      recur:<none|daily|weekly|monthly|yearly> note:<text>"
    );
    Ok(())
}

/// Changes a `key:value` token can make to a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Edit {
    Priority(u8),
    Due(Option<DueInput>),
    At(Option<NaiveTime>),
    Recur(RecurrenceType),
    Note(String),
}

fn parse_title_and_edits(
    args: &[String],
    now: DateTime<Utc>,
    tz: Tz,
) -> anyhow::Result<(String, Vec<Edit>)> {
    let mut title_parts = Vec::new();
    let mut edits = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal && let Some(edit) = parse_one_edit(arg, now, tz)? {
            edits.push(edit);
            continue;
        }

        title_parts.push(arg.as_str());
    }

    Ok((title_parts.join(" "), edits))
}

fn parse_one_edit(tok: &str, now: DateTime<Utc>, tz: Tz) -> anyhow::Result<Option<Edit>> {
    let Some((key, value)) = tok.split_once(':') else {
        return Ok(None);
    };

    let edit = match key.to_ascii_lowercase().as_str() {
        "pri" | "priority" => {
            let level = value
                .parse::<u8>()
                .with_context(|| format!("priority must be 0-3, got {value}"))?;
            Edit::Priority(level)
        }
        "due" => Edit::Due(parse_due_expr(value, now, tz)?),
        "at" | "time" => match value.to_ascii_lowercase().as_str() {
            "" | "none" => Edit::At(None),
            _ => Edit::At(Some(
                parse_clock_time(value).ok_or_else(|| anyhow!("unrecognized time: {value}"))?,
            )),
        },
        "recur" | "repeat" => Edit::Recur(value.parse()?),
        "note" => Edit::Note(value.to_string()),
        _ => return Ok(None),
    };
    Ok(Some(edit))
}

/// Date edits land before time edits, so `at:9am due:friday` keeps the
/// time whatever the token order.
fn apply_edits(draft: &mut Draft, edits: &[Edit]) {
    let (times, others): (Vec<&Edit>, Vec<&Edit>) =
        edits.iter().partition(|edit| matches!(edit, Edit::At(_)));

    for edit in others.into_iter().chain(times) {
        match edit {
            Edit::Priority(level) => draft.set_priority(*level),
            Edit::Due(None) => {
                draft.due_date = None;
                draft.due_time = None;
            }
            Edit::Due(Some(input)) => {
                draft.due_date = Some(input.date);
                draft.due_time = input.time;
            }
            Edit::At(time) => draft.due_time = *time,
            Edit::Recur(recurrence) => draft.recurrence = *recurrence,
            Edit::Note(note) => draft.note = note.clone(),
        }
    }
}

fn parse_ids<'a, I>(terms: I) -> anyhow::Result<Vec<TaskId>>
where
    I: IntoIterator<Item = &'a String>,
{
    terms
        .into_iter()
        .map(|term| {
            term.parse::<TaskId>()
                .with_context(|| format!("expected a task id, got {term}"))
        })
        .collect()
}

/// One numeric selector, either before the command or as its first
/// argument. Returns the remaining arguments.
fn single_selector<'a>(
    filter_terms: &[String],
    args: &'a [String],
    command: &str,
) -> anyhow::Result<(u64, &'a [String])> {
    match (filter_terms, args) {
        ([term], rest) => Ok((parse_ids([term])?[0], rest)),
        ([], [first, rest @ ..]) => Ok((parse_ids([first])?[0], rest)),
        _ => Err(anyhow!("{command}: give exactly one id")),
    }
}
