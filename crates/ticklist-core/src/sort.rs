use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::task::Task;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortType {
    #[default]
    Priority,
    DueDate,
    Alphabetical,
    AlphabeticalRev,
}

impl SortType {
    pub fn label(self) -> &'static str {
        match self {
            SortType::Priority => "priority",
            SortType::DueDate => "due",
            SortType::Alphabetical => "alpha",
            SortType::AlphabeticalRev => "alpha-rev",
        }
    }
}

impl fmt::Display for SortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SortType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" | "pri" => Ok(SortType::Priority),
            "due" | "due_date" | "date" => Ok(SortType::DueDate),
            "alpha" | "alphabetical" | "title" => Ok(SortType::Alphabetical),
            "alpha-rev" | "alphabetical_rev" | "title-rev" => Ok(SortType::AlphabeticalRev),
            other => Err(anyhow!("unknown sort type: {other}")),
        }
    }
}

pub fn sort_tasks(tasks: &mut [Task], sort: SortType) {
    tasks.sort_by(|a, b| compare_tasks(a, b, sort));
}

pub fn compare_tasks(a: &Task, b: &Task, sort: SortType) -> Ordering {
    let ordering = match sort {
        SortType::Priority => b
            .priority
            .cmp(&a.priority)
            .then_with(|| cmp_optional(a.due_date.as_ref(), b.due_date.as_ref())),
        SortType::DueDate => cmp_optional(a.due_date.as_ref(), b.due_date.as_ref()),
        SortType::Alphabetical => cmp_title(a, b),
        SortType::AlphabeticalRev => cmp_title(a, b).reverse(),
    };

    ordering.then_with(|| a.id.cmp(&b.id))
}

fn cmp_title(a: &Task, b: &Task) -> Ordering {
    a.title
        .to_lowercase()
        .cmp(&b.title.to_lowercase())
        .then_with(|| a.title.cmp(&b.title))
}

/// Present values sort before absent ones.
fn cmp_optional<T: Ord>(left: Option<&T>, right: Option<&T>) -> Ordering {
    match (left, right) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
