//! Durable scan cursor.
//!
//! The cursor is the last block height that was fully processed. It is the
//! only scanner state that survives a restart.

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{block::Height, error::StorageError};

/// Persistence for the scan cursor.
///
/// Exactly one scan loop may own a store at a time.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the persisted cursor, `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<Height>, StorageError>;

    /// Persist the cursor. Must be durable when this returns.
    async fn save(&self, height: Height) -> Result<(), StorageError>;
}

/// On-disk cursor file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorFile {
    /// Last fully processed block height
    pub last_processed_height: Height,

    /// Timestamp of the last save (Unix timestamp)
    pub updated_at: u64,
}

impl CursorFile {
    pub fn new(last_processed_height: Height) -> Self {
        Self {
            last_processed_height,
            updated_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    /// Read a cursor file. Returns `None` if the file doesn't exist.
    pub fn read(path: &Path) -> Result<Option<Self>, StorageError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Write the cursor file.
    ///
    /// Uses atomic write (write to temp file, sync, then rename) so a crash
    /// never leaves a torn file behind.
    pub fn write(&self, path: &Path) -> Result<(), StorageError> {
        use std::io::Write;

        let content = serde_json::to_string_pretty(self)?;

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Format a human-readable summary.
    pub fn summary(&self) -> String {
        let updated = if self.updated_at > 0 {
            chrono::DateTime::from_timestamp(self.updated_at as i64, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unknown".to_string())
        } else {
            "never".to_string()
        };

        format!(
            "Scan cursor:\n  Last processed height: {}\n  Updated: {}",
            self.last_processed_height, updated
        )
    }
}

/// Cursor persisted as a JSON file.
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<Option<Height>, StorageError> {
        let path = self.path.clone();
        let file = tokio::task::spawn_blocking(move || CursorFile::read(&path))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;

        match &file {
            Some(file) => tracing::info!(
                "Loaded scan cursor: height={}",
                file.last_processed_height
            ),
            None => tracing::info!("No cursor file at {:?}", self.path),
        }

        Ok(file.map(|f| f.last_processed_height))
    }

    async fn save(&self, height: Height) -> Result<(), StorageError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || CursorFile::new(height).write(&path))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;

        tracing::debug!("Saved scan cursor: height={}", height);
        Ok(())
    }
}

/// In-process cursor, for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    height: Mutex<Option<Height>>,
    saves: Mutex<Vec<Height>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_height(height: Height) -> Self {
        Self {
            height: Mutex::new(Some(height)),
            saves: Mutex::new(Vec::new()),
        }
    }

    /// Current stored value.
    pub fn height(&self) -> Option<Height> {
        *self.height.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every value passed to `save`, in order.
    pub fn saves(&self) -> Vec<Height> {
        self.saves.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<Height>, StorageError> {
        Ok(self.height())
    }

    async fn save(&self, height: Height) -> Result<(), StorageError> {
        *self.height.lock().unwrap_or_else(|e| e.into_inner()) = Some(height);
        self.saves
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(height);
        Ok(())
    }
}
