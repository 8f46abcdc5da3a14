use crate::{
    audit::canonical::to_canonical_string,
    channel::UnboundedRx,
    event::Event,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, info, warn};

/// Canonical JSON rendering used by the event log and every replay hash.
pub mod canonical;

/// Event-sequence canonicalisation, hashing and two-log diffing.
pub mod replay;

/// Audit failures are fatal: the core halts rather than produce an unaudited action.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum AuditError {
    #[error("audit serialization failed: {0}")]
    Serialization(String),

    #[error("audit io failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for AuditError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Append-only JSONL event writer with file rotation.
///
/// Files are named `events_{run_id}_{seq}.jsonl` with monotone `seq`. Writes are atomic at the
/// line level: a line is rendered in full before any byte reaches the file, and each line is
/// flushed whole; on any failure the writer reports a fatal [`AuditError`].
#[derive(Debug)]
pub struct EventLogWriter {
    dir: PathBuf,
    run_id: SmolStr,
    seq: u64,
    lines_in_file: u64,
    max_lines_per_file: u64,
    file: BufWriter<File>,
}

/// Default rotation threshold, in lines per file.
pub const DEFAULT_MAX_LINES_PER_FILE: u64 = 100_000;

impl EventLogWriter {
    pub fn new(dir: impl Into<PathBuf>, run_id: SmolStr) -> Result<Self, AuditError> {
        Self::with_max_lines(dir, run_id, DEFAULT_MAX_LINES_PER_FILE)
    }

    pub fn with_max_lines(
        dir: impl Into<PathBuf>,
        run_id: SmolStr,
        max_lines_per_file: u64,
    ) -> Result<Self, AuditError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let seq = 0;
        let file = Self::open_segment(&dir, &run_id, seq)?;
        Ok(Self {
            dir,
            run_id,
            seq,
            lines_in_file: 0,
            max_lines_per_file,
            file,
        })
    }

    fn open_segment(dir: &Path, run_id: &SmolStr, seq: u64) -> Result<BufWriter<File>, AuditError> {
        let path = dir.join(format!("events_{run_id}_{seq}.jsonl"));
        let file = File::create(&path)?;
        info!(path = %path.display(), "audit segment opened");
        Ok(BufWriter::new(file))
    }

    /// Path of the segment currently being written.
    pub fn current_path(&self) -> PathBuf {
        self.dir
            .join(format!("events_{}_{}.jsonl", self.run_id, self.seq))
    }

    /// Append one event as a canonical JSON line and flush it whole.
    pub fn append(&mut self, event: &Event) -> Result<(), AuditError> {
        let value = serde_json::to_value(event)?;
        let line = to_canonical_string(&value);

        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;

        self.lines_in_file += 1;
        if self.lines_in_file >= self.max_lines_per_file {
            self.rotate()?;
        }
        Ok(())
    }

    /// Close the current segment and open the next.
    pub fn rotate(&mut self) -> Result<(), AuditError> {
        self.file.flush()?;
        self.seq += 1;
        self.file = Self::open_segment(&self.dir, &self.run_id, self.seq)?;
        self.lines_in_file = 0;
        Ok(())
    }
}

/// Restartable reader over one event-log segment.
///
/// A trailing partial line (eg/ from a crash mid-write) is skipped with a warning; a malformed
/// line anywhere else is a hard error.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<Value>, AuditError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let lines: Vec<&str> = content.lines().filter(|line| !line.is_empty()).collect();

    let mut events = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => events.push(value),
            Err(parse_error) if index == lines.len() - 1 => {
                warn!(
                    path = %path.as_ref().display(),
                    %parse_error,
                    "skipping trailing partial audit line"
                );
            }
            Err(parse_error) => return Err(AuditError::Serialization(parse_error.to_string())),
        }
    }
    Ok(events)
}

/// Run the audit writer worker loop until the producing channel closes.
///
/// The worker owns the [`EventLogWriter`]; the core is the sole producer. On an append failure
/// the worker exits, dropping its receiver, which surfaces to the core as a failed audit send -
/// the core then halts (audit faults are fatal).
pub fn run_audit_writer(mut rx: UnboundedRx<Event>, mut writer: EventLogWriter) {
    loop {
        match rx.rx.try_recv() {
            Ok(event) => {
                if let Err(audit_error) = writer.append(&event) {
                    error!(%audit_error, "audit append failed - writer exiting");
                    return;
                }
            }
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => {
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                info!("audit channel closed - writer exiting");
                return;
            }
        }
    }
}

/// Spawn the audit writer on its own thread.
pub fn spawn_audit_writer(
    rx: UnboundedRx<Event>,
    writer: EventLogWriter,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("qilin-audit-writer".to_string())
        .spawn(move || run_audit_writer(rx, writer))
        .expect("spawning audit writer thread")
}
