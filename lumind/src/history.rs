//! Ingestion history.
//!
//! Keeps a ring buffer of recently finished ingestions for the
//! `/api/1v/ingestions` endpoint, optionally appended to a JSONL file so the
//! buffer survives restarts. The file is trimmed back to the buffer each
//! time it is opened.

use lumin_common::{IngestionOutcome, IngestionRecord, ProjectId};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::OpenOptions as AsyncOpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: usize = 100;

/// Aggregate view over the buffered records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub files_materialized: usize,
    pub avg_duration_ms: u64,
}

pub struct IngestionHistory {
    records: RwLock<VecDeque<IngestionRecord>>,
    capacity: usize,
    next_id: AtomicU64,
    persistence_path: Option<PathBuf>,
    append_lock: Arc<AsyncMutex<()>>,
}

impl IngestionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            next_id: AtomicU64::new(1),
            persistence_path: None,
            append_lock: Arc::default(),
        }
    }

    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        self.persistence_path = Some(path);
        self
    }

    /// Load `path` if it exists, otherwise start empty; either way new
    /// records are appended to it. Lines beyond `capacity` are dropped from
    /// the file on load.
    pub fn open(path: &Path, capacity: usize) -> std::io::Result<Self> {
        if path.exists() {
            let history = Self::load_from_file(path, capacity)?;
            if let Err(e) = history.compact() {
                warn!("Failed to compact history file {:?}: {}", path, e);
            }
            Ok(history)
        } else {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Self::new(capacity).with_persistence(path.to_path_buf()))
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Record a finished ingestion, evicting the oldest when full.
    ///
    /// Returns the persistence task handle when persistence is enabled.
    pub fn record(&self, record: IngestionRecord) -> Option<tokio::task::JoinHandle<()>> {
        debug!(
            "Recording ingestion {} for {} ({} ms)",
            record.id, record.repo, record.duration_ms
        );

        let persistence_task = self
            .persistence_path
            .as_ref()
            .map(|path| (path.clone(), record.clone(), Arc::clone(&self.append_lock)));

        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            if records.len() >= self.capacity {
                records.pop_front();
            }
            records.push_back(record);
        }

        persistence_task.map(|(path, record, append_lock)| {
            tokio::spawn(async move {
                let _append = append_lock.lock().await;
                if let Err(e) = Self::persist_record_async(&path, &record).await {
                    warn!("Failed to persist ingestion record: {}", e);
                }
            })
        })
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<IngestionRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn by_project(&self, project_id: ProjectId, limit: usize) -> Vec<IngestionRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .rev()
            .filter(|r| r.project_id == project_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> IngestionStats {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let total = records.len();
        if total == 0 {
            return IngestionStats::default();
        }

        let mut stats = IngestionStats {
            total,
            ..IngestionStats::default()
        };
        for record in records.iter() {
            match &record.outcome {
                IngestionOutcome::Succeeded { files, .. } => {
                    stats.succeeded += 1;
                    stats.files_materialized += files;
                }
                IngestionOutcome::Failed { .. } => stats.failed += 1,
            }
        }
        let total_duration: u64 = records.iter().map(|r| r.duration_ms).sum();
        stats.avg_duration_ms = total_duration / total as u64;
        stats
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load history from a JSONL file, skipping lines that do not parse.
    pub fn load_from_file(path: &Path, capacity: usize) -> std::io::Result<Self> {
        let capacity = capacity.max(1);
        let reader = BufReader::new(File::open(path)?);

        let mut records = VecDeque::with_capacity(capacity);
        let mut max_id = 0u64;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<IngestionRecord>(&line) {
                Ok(record) => {
                    max_id = max_id.max(record.id);
                    if records.len() >= capacity {
                        records.pop_front();
                    }
                    records.push_back(record);
                }
                Err(e) => warn!("Skipping invalid history line: {}", e),
            }
        }

        debug!("Loaded {} ingestion records from {:?}", records.len(), path);
        Ok(Self {
            records: RwLock::new(records),
            capacity,
            next_id: AtomicU64::new(max_id + 1),
            persistence_path: Some(path.to_path_buf()),
            append_lock: Arc::default(),
        })
    }

    async fn persist_record_async(path: &Path, record: &IngestionRecord) -> std::io::Result<()> {
        let mut file = AsyncOpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Rewrite the persistence file with only the buffered records.
    pub fn compact(&self) -> std::io::Result<()> {
        let Some(ref path) = self.persistence_path else {
            return Ok(());
        };
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            for record in records.iter() {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
            }
        }
        std::fs::rename(temp_path, path)?;
        debug!("Compacted history file: {:?}", path);
        Ok(())
    }
}

impl Default for IngestionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
