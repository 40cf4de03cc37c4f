//! Run journal (`runs.jsonl`)
//!
//! One JSON line per finished run, appended by the aggregator as outcomes
//! arrive. The journal is the sweep's checkpoint: a resumed sweep replays it
//! instead of re-evaluating completed runs, and `summarize` rebuilds every table
//! from it.
//!
//! Every record carries the fingerprint of the sweep settings that produced it.
//! Records with another fingerprint are never replayed.

use crate::aggregator::RunOutcome;
use crate::error::{SweepError, SweepResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const JOURNAL_FILE: &str = "runs.jsonl";

/// One journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub fingerprint: String,
    pub run: RunOutcome,
}

#[derive(Serialize)]
struct RecordRef<'a> {
    fingerprint: &'a str,
    run: &'a RunOutcome,
}

/// Records readable under one fingerprint
#[derive(Debug, Default)]
pub struct JournalContents {
    pub outcomes: Vec<RunOutcome>,
    /// Intact records written under other settings
    pub stale: usize,
}

/// Append-only writer
pub struct RunJournal {
    path: PathBuf,
    fingerprint: String,
    writer: BufWriter<File>,
}

impl RunJournal {
    /// Open for appending; `truncate` starts a fresh journal
    ///
    /// When appending, a torn final line left by an interrupted write is cut
    /// off so the next record starts on a line of its own.
    pub fn open(path: &Path, truncate: bool, fingerprint: impl Into<String>) -> SweepResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opened = if truncate {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
        } else {
            open_after_last_line(path)
        };
        let file = opened.map_err(|e| {
            SweepError::Journal(format!("Open {} failed: {}", path.display(), e))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            fingerprint: fingerprint.into(),
            writer: BufWriter::new(file),
        })
    }

    /// Append one outcome and flush it to disk
    pub fn append(&mut self, outcome: &RunOutcome) -> SweepResult<()> {
        let record = RecordRef {
            fingerprint: &self.fingerprint,
            run: outcome,
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| SweepError::Journal(format!("Serialize run failed: {}", e)))?;
        writeln!(self.writer, "{}", line)
            .and_then(|_| self.writer.flush())
            .map_err(|e| {
                SweepError::Journal(format!("Write {} failed: {}", self.path.display(), e))
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Open positioned after the last complete line, dropping any torn tail
fn open_after_last_line(path: &Path) -> std::io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;

    let intact = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);
    if intact < contents.len() {
        warn!(
            path = %path.display(),
            bytes = contents.len() - intact,
            "Dropping torn journal tail"
        );
        file.set_len(intact as u64)?;
    }
    file.seek(SeekFrom::Start(intact as u64))?;
    Ok(file)
}

/// Read every intact record written under `fingerprint`
///
/// A truncated or malformed line is skipped with a warning; records from other
/// settings are counted in [`JournalContents::stale`].
pub fn read_journal(path: &Path, fingerprint: &str) -> SweepResult<JournalContents> {
    let mut contents = JournalContents::default();
    if !path.exists() {
        return Ok(contents);
    }
    let file = File::open(path)
        .map_err(|e| SweepError::Journal(format!("Open {} failed: {}", path.display(), e)))?;

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line =
            line.map_err(|e| SweepError::Journal(format!("Read {} failed: {}", path.display(), e)))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalRecord>(&line) {
            Ok(record) if record.fingerprint == fingerprint => contents.outcomes.push(record.run),
            Ok(_) => contents.stale += 1,
            Err(e) => warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "Skipping unreadable journal record"
            ),
        }
    }

    if contents.stale > 0 {
        warn!(
            path = %path.display(),
            stale = contents.stale,
            "Ignoring journal records written under other sweep settings"
        );
    }
    Ok(contents)
}
