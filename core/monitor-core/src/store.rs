//! File-backed activity log.
//!
//! The log is a JSON array of [`ActivityRecord`] capped at the registry capacity.
//! Before each overwrite the current file is copied to a sibling `.bak`, then the new
//! contents are written to a temp file and renamed into place so readers never see a
//! partial write.
//!
//! Reads are forgiving: a missing or empty file is an empty log, and a corrupt
//! primary falls back to the backup copy before giving up with an empty log.

use std::path::{Path, PathBuf};

use fs_err as fs;

use crate::error::{MonitorError, Result};
use crate::types::ActivityRecord;

/// Sink the write queue drains into.
pub trait ActivityLogWriter: Send + Sync {
    fn write(&self, records: &[ActivityRecord]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ActivityLogStore {
    path: PathBuf,
    capacity: usize,
}

impl ActivityLogStore {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".bak");
        self.path.with_file_name(name)
    }

    /// Loads the persisted log. Absent file → empty list.
    pub fn load(&self) -> Result<Vec<ActivityRecord>> {
        match read_records(&self.path) {
            Ok(records) => Ok(records),
            Err(err @ MonitorError::Json { .. }) => {
                tracing::warn!(
                    error = %err,
                    path = %self.path.display(),
                    "Activity log is corrupt; trying backup"
                );
                match read_records(&self.backup_path()) {
                    Ok(records) => Ok(records),
                    Err(backup_err) => {
                        tracing::warn!(
                            error = %backup_err,
                            "Activity log backup unusable; starting empty"
                        );
                        Ok(Vec::new())
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Overwrites the log with the newest `capacity` records.
    pub fn save(&self, records: &[ActivityRecord]) -> Result<()> {
        let start = records.len().saturating_sub(self.capacity);
        let records = &records[start..];

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| MonitorError::io("Failed to create activity log dir", err))?;
        }

        if self.path.exists() {
            fs::copy(&self.path, self.backup_path())
                .map_err(|err| MonitorError::io("Failed to back up activity log", err))?;
        }

        let payload = serde_json::to_vec_pretty(records)
            .map_err(|err| MonitorError::json("Failed to serialize activity log", err))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload)
            .map_err(|err| MonitorError::io("Failed to write activity log", err))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|err| MonitorError::io("Failed to commit activity log", err))?;
        Ok(())
    }
}

impl ActivityLogWriter for ActivityLogStore {
    fn write(&self, records: &[ActivityRecord]) -> Result<()> {
        self.save(records)
    }
}

fn read_records(path: &Path) -> Result<Vec<ActivityRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(MonitorError::io("Failed to read activity log", err)),
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&content)
        .map_err(|err| MonitorError::json(format!("Failed to parse {}", path.display()), err))
}
