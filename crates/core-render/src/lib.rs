//! Progress report rendering for a batch.
//!
//! Two stages, mirroring each other:
//! 1. [`compose_report`] reads a [`BatchState`] and produces a [`Report`]: a
//!    summary, an optional condensed marker strip and one [`ItemLine`] per
//!    tracked plugin.
//! 2. [`format_report`] turns that into the exact lines pushed to the host.
//!
//! Item order is ascending by plugin directory, the iteration order of the
//! state's status map, and stays stable for the lifetime of a batch. The marker
//! strip uses the same order and is padded with spaces up to `total`.

use core_state::{BatchState, PluginStatus};
use std::fmt::Write as _;
use std::path::Path;

/// Width of abbreviated revisions in "Updated [from - to]".
pub const SHORT_REV: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum Summary {
    InFlight { finished: usize, total: usize },
    Done { cost_secs: f64, success: usize, fail: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Installed,
    UpToDate,
    Updated { from: String, to: String },
    /// No revision resolved yet; most recent captured log line, if any.
    Progress(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLine {
    pub glyph: char,
    pub name: String,
    pub branch: Option<String>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub summary: Summary,
    pub strip: Option<String>,
    pub items: Vec<ItemLine>,
}

fn short(rev: &str) -> String {
    rev.chars().take(SHORT_REV).collect()
}

fn outcome(state: &BatchState, dir: &Path, status: &PluginStatus) -> Outcome {
    let revs = &status.revisions;
    match (&revs.from, &revs.to) {
        (None, Some(_)) => Outcome::Installed,
        (Some(from), Some(to)) if from == to => Outcome::UpToDate,
        (Some(from), Some(to)) => Outcome::Updated {
            from: short(from),
            to: short(to),
        },
        (_, None) => Outcome::Progress(state.last_log(dir).map(str::to_string)),
    }
}

pub fn compose_report(state: &BatchState) -> Report {
    let mut items = Vec::with_capacity(state.total);
    let mut markers = String::with_capacity(state.total);
    for (dir, status) in state.statuses() {
        markers.push(status.phase.marker());
        items.push(ItemLine {
            glyph: status.phase.glyph(),
            name: display_name(dir),
            branch: status.branch.clone(),
            outcome: outcome(state, dir, status),
        });
    }

    let counts = state.counts();
    let summary = if state.updating {
        Summary::InFlight {
            finished: counts.finished,
            total: state.total,
        }
    } else {
        Summary::Done {
            cost_secs: state
                .elapsed
                .map(|d| d.as_millis() as f64 / 1000.0)
                .unwrap_or(0.0),
            success: counts.success,
            fail: counts.fail,
        }
    };

    let strip = (state.total > 1).then(|| {
        let pad = state.total.saturating_sub(markers.chars().count());
        markers.extend(std::iter::repeat_n(' ', pad));
        markers
    });

    Report {
        summary,
        strip,
        items,
    }
}

fn display_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

pub fn format_item(item: &ItemLine) -> String {
    let mut s = String::with_capacity(64);
    s.push(item.glyph);
    s.push(' ');
    s.push_str(&item.name);
    if let Some(branch) = &item.branch {
        let _ = write!(s, " [{branch}]");
    }
    s.push(':');
    match &item.outcome {
        Outcome::Installed => s.push_str(" Installed"),
        Outcome::UpToDate => s.push_str(" Already up-to-date."),
        Outcome::Updated { from, to } => {
            let _ = write!(s, " Updated [{from} - {to}]");
        }
        Outcome::Progress(Some(line)) => {
            s.push(' ');
            s.push_str(line);
        }
        Outcome::Progress(None) => {}
    }
    s
}

pub fn format_summary(summary: &Summary) -> String {
    match summary {
        Summary::InFlight { finished, total } => {
            format!("Install/Updating plugins {finished}/{total}")
        }
        Summary::Done {
            cost_secs,
            success,
            fail,
        } => format!("Cost:{cost_secs}s Success:{success} Fail:{fail}"),
    }
}

pub fn format_report(report: &Report) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.items.len() + 2);
    lines.push(format_summary(&report.summary));
    if let Some(strip) = &report.strip {
        lines.push(format!("[{strip}]"));
    }
    lines.extend(report.items.iter().map(format_item));
    lines
}

/// Compose and format in one step.
pub fn render_report(state: &BatchState) -> Vec<String> {
    format_report(&compose_report(state))
}
