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

//! Owner of all per-configuration state: refresh policy, raw and calculated
//! caches and the snapshot store.

use crate::cache::{CalculatedCache, RollingCache};
use crate::derive::DerivedValueCalculator;
use crate::error::{Result, TgeError};
use crate::refresh::{RefreshBookkeeping, RefreshPolicy, RefreshResult};
use crate::traits::{RemoteDataSource, SnapshotStore};
use crate::view::ExposedMetricView;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use pge_tge_types::{MarketSnapshot, MetricField, MetricState, PriceUnit};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Remote source was queried
    Fetched,
    /// Not due; the last snapshot was re-applied
    Cached,
    /// Previous cycle still running
    Skipped,
}

/// Coordinator health as seen by the runner and the CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub has_fetched: bool,
    pub cached_days: usize,
    pub bookkeeping: RefreshBookkeeping,
    pub last_error: Option<String>,
}

impl Readiness {
    /// Ready once any data was obtained, fetched or restored
    pub fn is_ready(&self) -> bool {
        self.has_fetched || self.cached_days > 0
    }
}

/// Clears the in-flight flag when the cycle ends, including on error
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PriceCoordinator {
    policy: Arc<Mutex<RefreshPolicy>>,
    raw: Mutex<RollingCache>,
    calculated: RwLock<Arc<CalculatedCache>>,
    calculator: DerivedValueCalculator,
    store: Arc<dyn SnapshotStore>,
    in_flight: AtomicBool,
    has_fetched: AtomicBool,
    last_error: Mutex<Option<String>>,
    tz: Tz,
}

impl fmt::Debug for PriceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriceCoordinator")
            .field("policy", &*self.policy.lock())
            .field("cached_days", &self.raw.lock().len())
            .field("calculator", &self.calculator)
            .field("tz", &self.tz)
            .finish_non_exhaustive()
    }
}

impl PriceCoordinator {
    pub fn new(
        source: Arc<dyn RemoteDataSource>,
        calculator: DerivedValueCalculator,
        store: Arc<dyn SnapshotStore>,
        tz: Tz,
    ) -> Self {
        Self {
            policy: Arc::new(Mutex::new(RefreshPolicy::new(source))),
            raw: Mutex::new(RollingCache::new()),
            calculated: RwLock::new(Arc::new(CalculatedCache::default())),
            calculator,
            store,
            in_flight: AtomicBool::new(false),
            has_fetched: AtomicBool::new(false),
            last_error: Mutex::new(None),
            tz,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Current wall-clock time in the market timezone
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    // ============= Lifecycle Hooks =============

    /// Restore the persisted cache. Missing or corrupt data starts empty.
    pub fn on_attach(&self, today: NaiveDate) {
        let mut restored = match self.store.load() {
            Ok(Some(blob)) => RollingCache::deserialize(&blob).unwrap_or_else(|e| {
                warn!("Discarding persisted price cache: {e}");
                RollingCache::new()
            }),
            Ok(None) => RollingCache::new(),
            Err(e) => {
                warn!("Could not read persisted price cache, starting empty: {e}");
                RollingCache::new()
            }
        };

        let pruned = restored.prune(today);
        info!(
            "Restored {} cached day(s) ({pruned} stale day(s) dropped)",
            restored.len()
        );

        let mut raw = self.raw.lock();
        *raw = restored;
        self.recalculate(&raw, today);
    }

    /// Merge a snapshot into the raw cache, prune, recompute and persist when
    /// the raw cache changed. Returns whether it changed.
    ///
    /// The raw lock is held until the derived values and the persisted copy
    /// match the merged cache.
    pub fn on_update(&self, snapshot: &MarketSnapshot, today: NaiveDate) -> bool {
        let mut raw = self.raw.lock();
        let before = raw.clone();
        raw.merge(snapshot);
        raw.prune(today);
        let changed = *raw != before;

        self.recalculate(&raw, today);
        if changed {
            self.persist(&raw);
        }
        changed
    }

    /// Persist the raw cache before shutdown
    pub fn on_detach(&self) {
        let raw = self.raw.lock();
        self.persist(&raw);
        info!("Price coordinator detached, {} day(s) persisted", raw.len());
    }

    // ============= Refresh =============

    pub async fn tick(&self) -> Result<TickOutcome> {
        self.tick_at(self.now()).await
    }

    /// Run one refresh cycle as of `now`.
    ///
    /// The blocking fetch runs on a blocking worker. A tick arriving while a
    /// cycle is in flight is skipped, not queued.
    pub async fn tick_at(&self, now: DateTime<Tz>) -> Result<TickOutcome> {
        let Some(_guard) = FlightGuard::acquire(&self.in_flight) else {
            debug!("Price refresh still in flight, skipping tick");
            return Ok(TickOutcome::Skipped);
        };

        let policy = Arc::clone(&self.policy);
        let result = tokio::task::spawn_blocking(move || policy.lock().refresh(&now))
            .await
            .map_err(|e| TgeError::Worker(e.to_string()))
            .and_then(|r| r);

        let today = now.date_naive();
        match result {
            Ok(RefreshResult::Fetched(snapshot)) => {
                self.has_fetched.store(true, Ordering::Release);
                *self.last_error.lock() = None;
                self.on_update(&snapshot, today);
                info!(
                    "✅ Price data refreshed: {} hour(s) for {} day(s)",
                    snapshot.hour_count(),
                    snapshot.days.len()
                );
                Ok(TickOutcome::Fetched)
            }
            Ok(RefreshResult::Cached(snapshot)) => {
                self.on_update(&snapshot, today);
                Ok(TickOutcome::Cached)
            }
            Err(e) => {
                match e.http_status() {
                    Some(status) => error!("❌ Failed to refresh prices (HTTP {status}): {e}"),
                    None => error!("❌ Failed to refresh prices: {e}"),
                }
                *self.last_error.lock() = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// First refresh after attach. Fails with [`TgeError::NotReady`] when it
    /// fails and no data was ever fetched.
    pub async fn first_refresh(&self, now: DateTime<Tz>) -> Result<TickOutcome> {
        match self.tick_at(now).await {
            Err(e) if !self.has_fetched.load(Ordering::Acquire) => {
                Err(TgeError::NotReady(e.to_string()))
            }
            other => other,
        }
    }

    // ============= Reads =============

    /// Consumer state of one metric as of `now`
    pub fn metric_state(&self, field: MetricField, unit: PriceUnit, now: &DateTime<Tz>) -> MetricState {
        self.refresh_window(now.date_naive());
        let calculated = self.calculated();
        ExposedMetricView::new(&calculated, field, unit, now).state(self.is_available())
    }

    pub fn calculated(&self) -> Arc<CalculatedCache> {
        Arc::clone(&self.calculated.read())
    }

    pub fn raw_snapshot(&self) -> RollingCache {
        self.raw.lock().clone()
    }

    pub fn is_available(&self) -> bool {
        self.has_fetched.load(Ordering::Acquire) || !self.calculated.read().is_empty()
    }

    pub fn readiness(&self) -> Readiness {
        Readiness {
            has_fetched: self.has_fetched.load(Ordering::Acquire),
            cached_days: self.raw.lock().len(),
            bookkeeping: self.policy.lock().bookkeeping(),
            last_error: self.last_error.lock().clone(),
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    // ============= Internals =============

    /// Drop days that fell out of the window since the last update
    fn refresh_window(&self, today: NaiveDate) {
        let mut raw = self.raw.lock();
        if !raw.has_days_before(today) {
            return;
        }

        debug!("Date rolled over to {today}, pruning price cache");
        raw.prune(today);
        self.recalculate(&raw, today);
        self.persist(&raw);
    }

    /// Replace the calculated cache. On failure the previous one is kept,
    /// pruned to `today`.
    ///
    /// Callers hold the raw lock; lock order is raw, then calculated.
    fn recalculate(&self, raw: &RollingCache, today: NaiveDate) {
        match self.calculator.recompute(raw) {
            Ok(calculated) => {
                *self.calculated.write() = Arc::new(calculated);
            }
            Err(e) => {
                error!("Keeping previous derived values, recompute failed: {e}");
                *self.last_error.lock() = Some(e.to_string());

                let mut calculated = self.calculated.write();
                if calculated.has_days_before(today) {
                    let mut kept = calculated.as_cache().clone();
                    kept.prune(today);
                    *calculated = Arc::new(CalculatedCache::new(kept));
                }
            }
        }
    }

    fn persist(&self, raw: &RollingCache) {
        let saved = raw.serialize().and_then(|blob| self.store.save(&blob));
        if let Err(e) = saved {
            error!("Failed to persist price cache: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flight_guard_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        {
            let guard = FlightGuard::acquire(&flag);
            assert!(guard.is_some());
            assert!(FlightGuard::acquire(&flag).is_none());
        }
        assert!(FlightGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_readiness() {
        let mut readiness = Readiness {
            has_fetched: false,
            cached_days: 0,
            bookkeeping: RefreshBookkeeping::default(),
            last_error: Some("boom".to_owned()),
        };
        assert!(!readiness.is_ready());

        readiness.cached_days = 1;
        assert!(readiness.is_ready());
    }
}
