//! Per-replica debug state dump.
//!
//! Each replica rewrites `<state_dir>/<id>.node` after every handler. The
//! file is a human-readable JSON rendering of the replica snapshot; the
//! format is a debugging aid, not API.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::raft::replica::ReplicaSnapshot;

#[derive(Debug)]
pub struct StateDumper {
    path: PathBuf,
}

impl StateDumper {
    pub fn new(dir: &Path, id: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(format!("{}.node", id)),
        })
    }

    /// Truncate and rewrite the dump file. Failures are logged and ignored;
    /// the dump is never on the correctness path.
    pub fn write(&self, snapshot: &ReplicaSnapshot) {
        let rendered = match serde_json::to_string_pretty(snapshot) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to render state dump");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, rendered) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write state dump");
        }
    }
}
