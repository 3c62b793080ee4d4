// src/store.rs - Controller state checkpointing.
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Persists the controller's integral term across process restarts.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<Option<Decimal>, StoreError>;
    async fn save(&self, integral: Decimal) -> Result<(), StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    integral: Decimal,
}

/// JSON file checkpoint.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<Decimal>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let state: SavedState = serde_json::from_str(&raw)?;
                Ok(Some(state.integral))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, integral: Decimal) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&SavedState { integral })?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}
