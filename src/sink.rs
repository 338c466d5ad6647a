//! Sink module appending mirrored events to per-stream files.
//!
//! Each stream owns one base file named after its group and stream. Names
//! are escaped reversibly, so distinct streams never share a file. After
//! every append the file size is checked; past the rotation threshold the
//! base file is renamed with an epoch-seconds suffix and the next append
//! starts a fresh base file.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_ROTATION_BYTES;
use crate::model::{Event, Stream};

/// Suffix of the base (active) file for a stream.
const BASE_SUFFIX: &str = "-0";

/// Joins the escaped group and stream names; never produced by [`sanitize`].
const NAME_JOINER: char = '+';

/// Extension of every mirrored file.
const EXTENSION: &str = "log";

/// Errors that can occur while writing mirrored events.
#[derive(Debug)]
pub enum SinkError {
    /// The output directory could not be created
    CreateDir { path: PathBuf, source: io::Error },

    /// Opening, writing or flushing the stream file failed
    Write { path: PathBuf, source: io::Error },
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::CreateDir { path, source } => {
                write!(f, "Failed to create output directory {}: {}", path.display(), source)
            }
            SinkError::Write { path, source } => {
                write!(f, "Failed to append to {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::CreateDir { source, .. } | SinkError::Write { source, .. } => Some(source),
        }
    }
}

/// Result of one append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkOutcome {
    /// Number of events appended
    pub written: usize,

    /// Size of the base file after the append
    pub bytes: u64,

    /// Path the base file was rotated to, if it was
    pub rotated_to: Option<PathBuf>,
}

/// File sink with size-based rotation.
#[derive(Debug, Clone)]
pub struct FileSink {
    output_dir: PathBuf,
    rotation_threshold: u64,
}

impl FileSink {
    pub fn new(output_dir: impl Into<PathBuf>, rotation_threshold: u64) -> Self {
        Self {
            output_dir: output_dir.into(),
            rotation_threshold,
        }
    }

    pub fn with_defaults(output_dir: impl Into<PathBuf>) -> Self {
        Self::new(output_dir, DEFAULT_ROTATION_BYTES)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn rotation_threshold(&self) -> u64 {
        self.rotation_threshold
    }

    /// Path of the base file for `stream`.
    pub fn path_for(&self, stream: &Stream) -> PathBuf {
        self.output_dir.join(format!(
            "{}.{}",
            base_stem(stream.group(), stream.name()),
            EXTENSION
        ))
    }

    /// Append each event's message as one line, then rotate if needed.
    ///
    /// An empty batch is a no-op: the file is neither created nor opened.
    /// A failed rotation is logged and the base file keeps growing.
    pub async fn append_and_rotate(
        &self,
        stream: &Stream,
        events: &[Event],
    ) -> Result<SinkOutcome, SinkError> {
        if events.is_empty() {
            return Ok(SinkOutcome::default());
        }

        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| SinkError::CreateDir {
                path: self.output_dir.clone(),
                source,
            })?;

        let path = self.path_for(stream);
        let bytes = append_lines(&path, events)
            .await
            .map_err(|source| SinkError::Write {
                path: path.clone(),
                source,
            })?;

        debug!(
            group = %stream.group(),
            stream = %stream.name(),
            events = events.len(),
            bytes = bytes,
            path = %path.display(),
            "Appended events"
        );

        let mut outcome = SinkOutcome {
            written: events.len(),
            bytes,
            rotated_to: None,
        };

        if bytes > self.rotation_threshold {
            let stem = base_stem(stream.group(), stream.name());
            match self.rotate(&path, &stem).await {
                Ok(rotated) => {
                    info!(
                        from = %path.display(),
                        to = %rotated.display(),
                        bytes = bytes,
                        "Rotated log file"
                    );
                    outcome.rotated_to = Some(rotated);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Rotation failed, continuing with the current file"
                    );
                }
            }
        }

        Ok(outcome)
    }

    /// Rename the base file to a free timestamp-suffixed name.
    async fn rotate(&self, path: &Path, stem: &str) -> io::Result<PathBuf> {
        let stamp = Utc::now().timestamp();
        let mut target = self.output_dir.join(format!("{}-{}.{}", stem, stamp, EXTENSION));
        let mut attempt = 1;

        // Two rotations within the same second must not clobber each other
        while fs::try_exists(&target).await? {
            target = self
                .output_dir
                .join(format!("{}-{}-{}.{}", stem, stamp, attempt, EXTENSION));
            attempt += 1;
        }

        fs::rename(path, &target).await?;
        Ok(target)
    }
}

/// Append every message plus a newline; returns the file size afterwards.
async fn append_lines(path: &Path, events: &[Event]) -> io::Result<u64> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let mut writer = BufWriter::new(file);
    for event in events {
        writer.write_all(event.message.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;

    let file = writer.into_inner();
    file.sync_data().await?;
    Ok(file.metadata().await?.len())
}

/// Escape a name so it fits in one path component.
///
/// `/` becomes `-`; a literal `-`, `+`, `\` or `%` is percent-encoded, so
/// the mapping can be reversed and `+` stays free to join names.
pub fn sanitize(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '/' => escaped.push('-'),
            '-' => escaped.push_str("%2D"),
            '+' => escaped.push_str("%2B"),
            '\\' => escaped.push_str("%5C"),
            '%' => escaped.push_str("%25"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// File stem of the base file, without extension.
fn base_stem(group: &str, stream: &str) -> String {
    format!(
        "{}{}{}{}",
        sanitize(group),
        NAME_JOINER,
        sanitize(stream),
        BASE_SUFFIX
    )
}
