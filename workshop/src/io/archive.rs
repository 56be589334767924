//! Archive of finished commissions (`<archive_dir>/<id>.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::commission::CommissionRecord;
use crate::io::config::write_atomic;

/// Receives every commission record once it reaches a terminal state.
pub trait Archive {
    fn archive(&self, record: &CommissionRecord) -> Result<()>;
}

/// One pretty-printed JSON file per commission.
#[derive(Debug, Clone)]
pub struct JsonArchive {
    dir: PathBuf,
}

impl JsonArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where the record for `id` lands.
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl Archive for JsonArchive {
    fn archive(&self, record: &CommissionRecord) -> Result<()> {
        let path = self.record_path(record.id.as_str());
        debug!(path = %path.display(), state = %record.state, "archiving commission");
        let mut buf = serde_json::to_string_pretty(record).context("serialize commission record")?;
        buf.push('\n');
        write_atomic(&path, &buf)
    }
}

/// Load an archived record from disk.
pub fn load_record(path: &Path) -> Result<CommissionRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read record {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse record {}", path.display()))
}
