//! An append-only JSONL log of engine state transitions, persisted under the
//! cache directory. This is the structured-logging counterpart of the
//! dashboard's "live" feed, usable without the dashboard itself.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const EVENTS_FILE: &str = "events.jsonl";

pub fn events_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(EVENTS_FILE)
}

/// One state transition, tagged with the tag of the entity it concerns
/// (a build tag, or a `case/compile-build/opts/exec-build` run key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    WorktreeCreated,
    ConfigureStarted,
    ConfigureFinished { success: bool },
    MakeStarted,
    MakeFinished { success: bool },
    CompileStarted,
    CompileFinished { success: bool },
    ExecStarted,
    ExecFinished { success: bool },
    RunClassified { result: String },
}

impl Event {
    pub fn new(subject: impl Into<String>, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            subject: subject.into(),
            kind,
        }
    }
}

/// An append-only, in-memory-buffered JSONL event log.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Append all recorded events to `path`, then clear the in-memory buffer.
    /// Safe to call repeatedly from one process: previously appended events
    /// are never rewritten.
    pub fn flush_to_file(&mut self, path: &Path) -> Result<()> {
        if self.events.is_empty() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;

        self.events.clear();
        Ok(())
    }

    pub fn read_from_file(path: &Path) -> Result<Vec<Event>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.context("failed to read events file line")?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event JSON: {line}"))?;
            events.push(event);
        }
        Ok(events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_log_is_empty() {
        assert!(EventLog::new().is_empty());
    }

    #[test]
    fn flush_writes_jsonl_and_clears_buffer() {
        let td = tempdir().unwrap();
        let path = td.path().join(EVENTS_FILE);

        let mut log = EventLog::new();
        log.record(Event::new("v3.13.0", EventKind::WorktreeCreated));
        log.flush_to_file(&path).unwrap();
        assert!(log.is_empty());

        let loaded = EventLog::read_from_file(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].subject, "v3.13.0");
        assert_eq!(loaded[0].kind, EventKind::WorktreeCreated);
    }

    #[test]
    fn repeated_flushes_append_rather_than_overwrite() {
        let td = tempdir().unwrap();
        let path = td.path().join(EVENTS_FILE);

        let mut log = EventLog::new();
        log.record(Event::new("a", EventKind::CompileStarted));
        log.flush_to_file(&path).unwrap();

        log.record(Event::new("b", EventKind::CompileFinished { success: true }));
        log.flush_to_file(&path).unwrap();

        let loaded = EventLog::read_from_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].subject, "a");
        assert_eq!(loaded[1].subject, "b");
    }

    #[test]
    fn read_from_missing_file_is_empty() {
        let td = tempdir().unwrap();
        let loaded = EventLog::read_from_file(&td.path().join("nope.jsonl")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn run_classified_round_trips() {
        let event = Event::new(
            "tutorial-simple-3.13/v3.13.0/~/v3.13.0",
            EventKind::RunClassified {
                result: "success".to_string(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, event.kind);
    }
}
