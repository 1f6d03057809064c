use crate::models::{ArtifactEvent, ArtifactKind};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub filename: String,
    pub path: String,
    pub file_type: ArtifactKind,
}

impl HistoryRecord {
    pub fn full_path(&self) -> PathBuf {
        PathBuf::from(&self.path).join(&self.filename)
    }
}

impl From<&ArtifactEvent> for HistoryRecord {
    fn from(artifact: &ArtifactEvent) -> Self {
        let file_type = match artifact.kind {
            ArtifactKind::Unknown => ArtifactKind::from_file_name(&artifact.file_name),
            kind => kind,
        };
        Self {
            filename: artifact.file_name.clone(),
            path: artifact.directory.clone(),
            file_type,
        }
    }
}

/// Newest-first list of produced artifacts, persisted as a JSON array.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    records: Vec<HistoryRecord>,
}

impl HistoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            Vec::new()
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn record_artifact(&mut self, artifact: &ArtifactEvent) -> Result<&HistoryRecord> {
        let mut records = Vec::with_capacity(self.records.len() + 1);
        records.push(HistoryRecord::from(artifact));
        records.extend(self.records.iter().cloned());
        save_records(&self.path, &records)?;
        self.records = records;
        tracing::debug!(file = %artifact.file_name, "recorded history entry");
        Ok(&self.records[0])
    }

    /// Drops the entry at `index`. With `delete_file` the artifact itself is
    /// also removed from disk; a failed delete is reported after the entry
    /// is gone.
    pub fn remove(&mut self, index: usize, delete_file: bool) -> Result<Option<HistoryRecord>> {
        if index >= self.records.len() {
            return Ok(None);
        }
        let mut records = self.records.clone();
        let removed = records.remove(index);
        save_records(&self.path, &records)?;
        self.records = records;

        if delete_file {
            let file = removed.full_path();
            std::fs::remove_file(&file)?;
            tracing::info!(file = %file.display(), "deleted artifact from disk");
        }
        Ok(Some(removed))
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        self.records.clear();
        Ok(())
    }
}

fn save_records(path: &Path, records: &[HistoryRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, format!("{json}\n"))?;
    Ok(())
}
