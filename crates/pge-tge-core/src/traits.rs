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

use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use pge_tge_types::{HourRecord, MetricState};

// ============= Data Source Traits =============

/// Provider of raw hourly fixing records
///
/// `fetch` is blocking. The coordinator always runs it on a blocking worker so
/// it never stalls the async scheduler.
pub trait RemoteDataSource: Send + Sync {
    /// Human-readable source name for logs
    fn name(&self) -> &str;

    /// Fetch all hourly records between `from` and `to`, both inclusive
    fn fetch(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<HourRecord>>;
}

/// Key-value store for the serialized rolling cache
pub trait SnapshotStore: Send + Sync {
    /// Last saved snapshot, `None` when nothing was persisted yet
    fn load(&self) -> Result<Option<serde_json::Value>>;

    fn save(&self, snapshot: &serde_json::Value) -> Result<()>;
}

// ============= Output Traits =============

/// Consumer of metric states (e.g. Home Assistant sensors)
#[async_trait]
pub trait MetricPublisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, state: &MetricState) -> anyhow::Result<()>;
}
