// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only capture file for a supervised process.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Prefix written in front of every stderr chunk.
pub const STDERR_PREFIX: &[u8] = b"ERR: ";

/// Capture file owned by one supervisor.
///
/// Once [`close`](LogSink::close) has run the sink is no longer writable and
/// further appends are dropped silently.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: Option<File>,
    writable: bool,
}

impl LogSink {
    /// Remove any previous capture at `path` and open a fresh one for appending.
    pub async fn create(path: &Path) -> io::Result<Self> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            writable: true,
        })
    }

    /// `false` once the sink has been closed.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Append a stdout chunk verbatim.
    pub async fn stdout(&mut self, chunk: &[u8]) {
        self.append(chunk).await;
    }

    /// Append a stderr chunk behind [`STDERR_PREFIX`].
    pub async fn stderr(&mut self, chunk: &[u8]) {
        let mut line = Vec::with_capacity(STDERR_PREFIX.len() + chunk.len());
        line.extend_from_slice(STDERR_PREFIX);
        line.extend_from_slice(chunk);
        self.append(&line).await;
    }

    /// Append raw bytes. Dropped when the sink is no longer writable.
    pub async fn append(&mut self, bytes: &[u8]) {
        if !self.writable {
            return;
        }
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.write_all(bytes).await {
                warn!(target: "launchpad.host", path = %self.path.display(), error = %e, "log write failed");
            }
        }
    }

    /// Stop accepting writes, then flush and close the file.
    pub async fn close(&mut self) {
        self.writable = false;
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                warn!(target: "launchpad.host", path = %self.path.display(), error = %e, "log flush failed");
            }
            if let Err(e) = file.sync_all().await {
                warn!(target: "launchpad.host", path = %self.path.display(), error = %e, "log sync failed");
            }
        }
    }
}
