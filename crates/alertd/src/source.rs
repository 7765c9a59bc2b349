//! Classified event sources.
//!
//! The daemon polls a source on a fixed cadence. The bundled source tails a
//! JSONL file: it remembers a byte cursor, consumes only complete lines and
//! can persist the cursor so a restart does not re-deliver old events.
//!
//! Reading is two-phase. `poll` hands out the records past the committed
//! cursor without moving it; `commit` moves it once the caller has processed
//! the batch and persisted its state. A batch that fails half way is read
//! again on the next poll, so delivery stays at-least-once.

use std::path::{Path, PathBuf};

use alerting::ClassifiedEvent;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::error::{DaemonError, DaemonResult};

/// One record pulled from a source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRecord {
    Event(ClassifiedEvent),
    /// A record that could not be decoded as an event at all.
    Unparsable { origin: String, error: String },
}

impl SourceRecord {
    /// Decode one JSON line.
    pub fn from_json_line(line: &str, origin: impl Into<String>) -> Self {
        match serde_json::from_str(line) {
            Ok(event) => Self::Event(event),
            Err(e) => Self::Unparsable {
                origin: origin.into(),
                error: e.to_string(),
            },
        }
    }
}

/// Pull-based supplier of classified events.
#[async_trait]
pub trait EventSource: Send {
    fn name(&self) -> &str;

    /// Return every record past the committed position.
    async fn poll(&mut self) -> DaemonResult<Vec<SourceRecord>>;

    /// Mark the records returned by the last `poll` as processed.
    async fn commit(&mut self) -> DaemonResult<()>;
}

/// Tails a JSONL file of classified events.
#[derive(Debug)]
pub struct JsonlEventSource {
    path: PathBuf,
    cursor_path: Option<PathBuf>,
    offset: u64,
    line_no: u64,
    /// Cursor after the last polled batch, applied on commit.
    pending: Option<(u64, u64)>,
}

impl JsonlEventSource {
    /// Start reading `path` from the beginning.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cursor_path: None,
            offset: 0,
            line_no: 0,
            pending: None,
        }
    }

    /// Resume from the cursor stored at `cursor_path`, and keep it updated.
    pub async fn with_cursor_file(
        path: impl Into<PathBuf>,
        cursor_path: impl Into<PathBuf>,
    ) -> DaemonResult<Self> {
        let cursor_path = cursor_path.into();
        let mut source = Self::new(path);
        match tokio::fs::read_to_string(&cursor_path).await {
            Ok(text) => {
                let mut parts = text.split_whitespace();
                source.offset = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                source.line_no = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                debug!(offset = source.offset, path = %cursor_path.display(), "Resumed event cursor");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DaemonError::source_io(cursor_path, e)),
        }
        source.cursor_path = Some(cursor_path);
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether a polled batch is waiting for `commit`.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    async fn save_cursor(&self) -> DaemonResult<()> {
        if let Some(cursor_path) = &self.cursor_path {
            let text = format!("{} {}\n", self.offset, self.line_no);
            tokio::fs::write(cursor_path, text)
                .await
                .map_err(|e| DaemonError::source_io(cursor_path.clone(), e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventSource for JsonlEventSource {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn poll(&mut self) -> DaemonResult<Vec<SourceRecord>> {
        self.pending = None;
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DaemonError::source_io(self.path.clone(), e)),
        };

        let len = file
            .metadata()
            .await
            .map_err(|e| DaemonError::source_io(self.path.clone(), e))?
            .len();
        if len < self.offset {
            warn!(
                path = %self.path.display(),
                offset = self.offset,
                len,
                "Event file shrank, restarting from the beginning"
            );
            self.offset = 0;
            self.line_no = 0;
        }

        file.seek(std::io::SeekFrom::Start(self.offset))
            .await
            .map_err(|e| DaemonError::source_io(self.path.clone(), e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| DaemonError::source_io(self.path.clone(), e))?;

        // A trailing partial line is left for the next poll.
        let complete = match buf.iter().rposition(|b| *b == b'\n') {
            Some(idx) => idx + 1,
            None => return Ok(Vec::new()),
        };

        let mut records = Vec::new();
        let mut line_no = self.line_no;
        for raw in buf[..complete - 1].split(|b| *b == b'\n') {
            line_no += 1;
            let line = String::from_utf8_lossy(raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let origin = format!("{}:{}", self.path.display(), line_no);
            records.push(SourceRecord::from_json_line(line, origin));
        }

        self.pending = Some((self.offset + complete as u64, line_no));
        debug!(records = records.len(), from = self.offset, "Polled event file");
        Ok(records)
    }

    async fn commit(&mut self) -> DaemonResult<()> {
        let Some((offset, line_no)) = self.pending.take() else {
            return Ok(());
        };
        self.offset = offset;
        self.line_no = line_no;
        self.save_cursor().await?;
        debug!(offset, "Committed event cursor");
        Ok(())
    }
}
