//! On-disk append-only file

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::FsyncPolicy;
use crate::errors::AofError;

const EVERYSEC: Duration = Duration::from_secs(1);

pub struct AofFile {
    path: PathBuf,
    file: File,
    /// Length covered by fully written entries
    len: u64,
    fsync: FsyncPolicy,
    last_sync: Instant,
    dirty: bool,
}

impl AofFile {
    pub async fn open(path: impl AsRef<Path>, fsync: FsyncPolicy) -> Result<Self, AofError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let len = file.metadata().await?.len();
        debug!(path = %path.display(), len, "AOF opened");

        Ok(Self {
            path,
            file,
            len,
            fsync,
            last_sync: Instant::now(),
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a batch of whole entries. On failure the file is cut back to
    /// its previous length so a retry cannot leave a partial entry behind.
    pub async fn append(&mut self, bytes: &[u8]) -> Result<(), AofError> {
        if bytes.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.write(bytes).await {
            if let Err(truncate_err) = self.file.set_len(self.len).await {
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "Failed to roll back partial AOF write"
                );
            }
            return Err(e.into());
        }

        self.len += bytes.len() as u64;
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        self.dirty = true;

        match self.fsync {
            FsyncPolicy::Always => self.sync_now().await,
            FsyncPolicy::EverySec if self.last_sync.elapsed() >= EVERYSEC => self.sync_now().await,
            FsyncPolicy::EverySec | FsyncPolicy::No => Ok(()),
        }
    }

    async fn sync_now(&mut self) -> std::io::Result<()> {
        self.file.sync_data().await?;
        self.last_sync = Instant::now();
        self.dirty = false;
        Ok(())
    }

    /// Periodic hook for `everysec`: sync written-but-unsynced data once due
    pub async fn sync_if_due(&mut self) -> Result<(), AofError> {
        if self.dirty && self.fsync == FsyncPolicy::EverySec && self.last_sync.elapsed() >= EVERYSEC {
            self.sync_now().await?;
        }
        Ok(())
    }

    pub async fn sync(&mut self) -> Result<(), AofError> {
        if self.dirty {
            self.sync_now().await?;
        }
        Ok(())
    }

    /// Drop everything past `len`, used to cut a torn tail found on replay
    pub async fn truncate(&mut self, len: u64) -> Result<(), AofError> {
        self.file.set_len(len).await?;
        self.file.sync_all().await?;
        warn!(path = %self.path.display(), from = self.len, to = len, "AOF truncated");
        self.len = len;
        Ok(())
    }
}
