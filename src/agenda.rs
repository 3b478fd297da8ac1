//! AgendaBriefing: upcoming events from a plain Markdown agenda file
//!
//! Lines look like `- 2026-10-20 09:30: Dentist`. Anything else is ignored.
//! Entries whose `when` parses as a date (`YYYY-MM-DD`, optionally with
//! `HH:MM`) and lies in the past are skipped. Free-form times like `Fri`
//! are always shown.

use chrono::{Local, NaiveDate, NaiveDateTime};
use regex::Regex;
use reverie_core::{BriefingProvider, Error, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const AGENDA_FILE: &str = "agenda.md";
pub const NO_EVENTS: &str = "No upcoming events found.";

/// Entries shown per briefing.
const MAX_EVENTS: usize = 3;

fn entry_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*]\s+(.+?):\s+(.+?)\s*$").ok())
        .as_ref()
}

/// `(when, what)` pairs in file order.
pub fn parse_agenda(text: &str) -> Vec<(String, String)> {
    let Some(re) = entry_pattern() else {
        return Vec::new();
    };
    text.lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some((caps[1].trim().to_string(), caps[2].to_string()))
        })
        .collect()
}

/// Whether `when` names a moment before `now`. Unparseable values are never past.
fn is_past(when: &str, now: NaiveDateTime) -> bool {
    if let Ok(at) = NaiveDateTime::parse_from_str(when, "%Y-%m-%d %H:%M") {
        return at < now;
    }
    if let Ok(day) = NaiveDate::parse_from_str(when, "%Y-%m-%d") {
        return day < now.date();
    }
    false
}

/// Briefing text for `text` as of `now`.
pub fn upcoming_at(text: &str, now: NaiveDateTime) -> String {
    let events: Vec<String> = parse_agenda(text)
        .into_iter()
        .filter(|(when, _)| !is_past(when, now))
        .take(MAX_EVENTS)
        .map(|(when, what)| format!("- {when}: {what}"))
        .collect();
    if events.is_empty() {
        return NO_EVENTS.into();
    }
    events.join("\n")
}

pub struct AgendaBriefing {
    path: PathBuf,
}

impl AgendaBriefing {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(AGENDA_FILE))
    }
}

#[async_trait::async_trait]
impl BriefingProvider for AgendaBriefing {
    async fn upcoming_events(&self) -> Result<String> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(NO_EVENTS.into()),
            Err(e) => {
                return Err(Error::Briefing(format!("{}: {}", self.path.display(), e)));
            }
        };
        Ok(upcoming_at(&text, Local::now().naive_local()))
    }
}
