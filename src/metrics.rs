//! Append-only CSV log of per-exchange phase durations.
//!
//! Every row is formatted up front and written with one `write_all` while the
//! file mutex is held, so concurrent callers can never interleave bytes.

use crate::timing::PhaseDurations;
use anyhow::Context;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const COLUMNS: [&str; 9] = [
    "dnsLookup",
    "tcpConnection",
    "tlsHandshake",
    "serverProcessing",
    "contentTransfer",
    "connect",
    "preTransfer",
    "startTransfer",
    "total",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsRow([Duration; 9]);

impl From<&PhaseDurations> for MetricsRow {
    fn from(durations: &PhaseDurations) -> Self {
        Self(durations.as_array())
    }
}

impl fmt::Display for MetricsRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{:?}", value)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MetricsRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl MetricsRecorder {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open metrics log {}", path.display()))?;

        let len = file.metadata().await?.len();
        if len == 0 {
            let header = format!("{}\n", COLUMNS.join(","));
            file.write_all(header.as_bytes()).await?;
            file.flush()
                .await
                .with_context(|| format!("Failed to write metrics log {}", path.display()))?;
        }
        debug!("Appending metrics to {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, row: &MetricsRow) -> Result<(), anyhow::Error> {
        let line = format!("{}\n", row);
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write metrics log {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("Failed to write metrics log {}", self.path.display()))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_std_file(path: impl AsRef<Path>, file: std::fs::File) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(File::from_std(file)),
        }
    }
}
