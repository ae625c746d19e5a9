// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of PGE TGE.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use crate::error::{Result, TgeError};
use crate::traits::SnapshotStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_STATE_PATH: &str = "./data/pge_tge_cache.json";

/// Stores the serialized rolling cache as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    /// Path to the cache file.
    state_path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.state_path
    }

    pub fn exists(&self) -> bool {
        self.state_path.exists()
    }
}

impl Default for JsonFileSnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_PATH)
    }
}

impl SnapshotStore for JsonFileSnapshotStore {
    /// Returns `None` if the file doesn't exist. Unparseable content is
    /// reported as [`TgeError::CacheCorrupt`].
    fn load(&self) -> Result<Option<Value>> {
        if !self.state_path.exists() {
            info!(
                "No persisted price cache at {}, starting empty",
                self.state_path.display()
            );
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.state_path)?;
        let value = serde_json::from_str(&contents).map_err(|e| {
            TgeError::CacheCorrupt(format!("{}: {e}", self.state_path.display()))
        })?;

        debug!("Loaded persisted price cache from {}", self.state_path.display());
        Ok(Some(value))
    }

    /// Atomic write (temp file + rename).
    fn save(&self, snapshot: &Value) -> Result<()> {
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;

        let temp_path = self.state_path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.state_path)?;

        debug!("Saved price cache to {}", self.state_path.display());
        Ok(())
    }
}

/// Volatile store for tests and `--once` runs
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshot: Mutex<Option<Value>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Value) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }

    pub fn current(&self) -> Option<Value> {
        self.snapshot.lock().clone()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load(&self) -> Result<Option<Value>> {
        Ok(self.snapshot.lock().clone())
    }

    fn save(&self, snapshot: &Value) -> Result<()> {
        *self.snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }
}
