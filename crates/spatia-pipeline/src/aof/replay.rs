//! Startup replay
//!
//! Re-executes every logged command against an empty store. Only changes
//! are logged, so the store ends up exactly where it was when the last
//! complete entry was written.

use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use super::codec;
use crate::errors::AofError;
use crate::executor;
use crate::store::ObjectStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub entries: usize,
    pub applied: usize,
    pub noops: usize,
    /// Bytes covered by complete entries
    pub valid_len: u64,
    pub truncated_tail: bool,
}

impl ReplayReport {
    /// Sequence number of the last replayed change
    pub fn last_seq(&self) -> u64 {
        self.applied as u64
    }
}

pub fn replay_bytes(data: &[u8], store: &mut dyn ObjectStore) -> Result<ReplayReport, AofError> {
    let decoded = codec::decode_entries(data)?;
    let mut report = ReplayReport {
        entries: decoded.commands.len(),
        valid_len: decoded.valid_len as u64,
        truncated_tail: decoded.truncated_tail,
        ..Default::default()
    };

    for (index, command) in decoded.commands.iter().enumerate() {
        let detail = executor::execute(store, command).map_err(|source| AofError::Replay { index, source })?;
        if detail.kind.is_change() {
            report.applied += 1;
        } else {
            report.noops += 1;
        }
    }

    Ok(report)
}

/// Replay the file at `path`; a missing file is an empty log
pub async fn replay_file(path: &Path, store: &mut dyn ObjectStore) -> Result<ReplayReport, AofError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No AOF found, starting empty");
            return Ok(ReplayReport::default());
        }
        Err(e) => return Err(e.into()),
    };

    let report = replay_bytes(&data, store)?;
    if report.truncated_tail {
        warn!(
            path = %path.display(),
            valid_len = report.valid_len,
            file_len = data.len(),
            "AOF ends with an incomplete entry"
        );
    }
    info!(
        path = %path.display(),
        entries = report.entries,
        applied = report.applied,
        objects = store.len(),
        "AOF replayed"
    );
    Ok(report)
}
