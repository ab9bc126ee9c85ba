//! Append-only request journal shared across threads and processes.
//!
//! Each line is `success||status||request||response`, with both texts cut to
//! [`RECORD_PREVIEW_CHARS`] characters. Appends hold an exclusive advisory
//! lock on the file so concurrent writers never interleave partial lines.

use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub const RECORD_DELIMITER: &str = "||";

/// Characters of request and response text kept per line.
pub const RECORD_PREVIEW_CHARS: usize = 200;

/// One dispatch attempt's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub success: bool,
    /// HTTP status, 0 when no response was received.
    pub status: u16,
    pub request: String,
    pub response: String,
}

impl JournalEntry {
    pub fn success(status: u16, request: &str, response: &str) -> Self {
        Self {
            success: true,
            status,
            request: preview(request),
            response: preview(response),
        }
    }

    pub fn failure(status: u16, request: &str, response: &str) -> Self {
        Self {
            success: false,
            status,
            request: preview(request),
            response: preview(response),
        }
    }

    /// Render as a single newline-terminated line with exactly four fields.
    pub fn to_line(&self) -> String {
        format!(
            "{}{}{}{}{}{}{}\n",
            u8::from(self.success),
            RECORD_DELIMITER,
            self.status,
            RECORD_DELIMITER,
            sanitize(&self.request),
            RECORD_DELIMITER,
            sanitize(&self.response),
        )
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.trim_end_matches('\n').split(RECORD_DELIMITER);
        let success = match fields.next()? {
            "1" => true,
            "0" => false,
            _ => return None,
        };
        let status = fields.next()?.parse().ok()?;
        let request = fields.next()?.to_string();
        let response = fields.next()?.to_string();
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            success,
            status,
            request,
            response,
        })
    }
}

fn preview(text: &str) -> String {
    text.chars().take(RECORD_PREVIEW_CHARS).collect()
}

/// Strip line breaks and pipes so a field can neither end the line nor
/// form a delimiter.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\n' | '\r'))
        .map(|c| if c == '|' { '¦' } else { c })
        .collect()
}

/// Success counts read back from a journal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JournalStats {
    pub total: usize,
    pub succeeded: usize,
}

impl JournalStats {
    /// Success rate as a percentage rounded to two decimals.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let rate = self.succeeded as f64 / self.total as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }
}

/// Handle to a journal file. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry under an exclusive file lock.
    pub async fn append(&self, entry: &JournalEntry) -> io::Result<()> {
        let path = self.path.clone();
        let line = entry.to_line();

        tokio::task::spawn_blocking(move || append_locked(&path, &line))
            .await
            .map_err(io::Error::other)?
    }

    /// Count attempts and successes. A missing journal counts as empty.
    pub async fn stats(&self) -> io::Result<JournalStats> {
        if !fs::try_exists(&self.path).await? {
            return Ok(JournalStats::default());
        }

        let contents = fs::read_to_string(&self.path).await?;
        let mut stats = JournalStats::default();
        for entry in contents.lines().filter_map(JournalEntry::parse_line) {
            stats.total += 1;
            stats.succeeded += usize::from(entry.success);
        }

        debug!(
            "Journal {:?}: {}/{} succeeded",
            self.path, stats.succeeded, stats.total
        );
        Ok(stats)
    }
}

fn append_locked(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock_exclusive()?;

    let written = file.write_all(line.as_bytes()).and_then(|_| file.flush());
    let unlocked = FileExt::unlock(&file);

    written.and(unlocked)
}
