//! Storage Module
//!
//! On-disk persistence for the two pipelines: the dated raw-document tree the
//! unpacker writes extracted XML into, and the JSON snapshot of the last
//! observed DNS state. The snapshot repository is a trait so the diff engine
//! can be driven from tests without touching the filesystem.

use crate::error::Result;
use crate::models::DnsState;
use chrono::{DateTime, Datelike, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Stores raw XML documents under `<base>/<yyyy>/<mm>/<name>`.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    base: PathBuf,
}

impl DocumentStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Writes `bytes` into the dated directory for `date` and returns the
    /// final path. Directory components in `name` are discarded.
    pub fn save(&self, date: &DateTime<Utc>, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string());
        let dir = self
            .base
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()));
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

/// Repository for the DNS snapshot persisted between check cycles.
pub trait SnapshotStore {
    /// Loads the last observed state; an absent snapshot is an empty state.
    fn load(&self) -> Result<DnsState>;
    /// Replaces the snapshot wholesale.
    fn save(&self, state: &DnsState) -> Result<()>;
}

/// Reads a `DnsState` JSON file, returning an empty state when the file does
/// not exist. Also used for the expectation baseline, which shares the shape.
pub fn load_state(path: &Path) -> Result<DnsState> {
    if !path.exists() {
        return Ok(DnsState::default());
    }
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Snapshot repository backed by a single JSON file. Saves go through a
/// sibling temp file and an atomic rename so a crash mid-write leaves the
/// previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotStore for JsonSnapshotStore {
    fn load(&self) -> Result<DnsState> {
        load_state(&self.path)
    }

    fn save(&self, state: &DnsState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
