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

use crate::coordinator::{PriceCoordinator, TickOutcome};
use crate::error::{Result, TgeError};
use crate::traits::MetricPublisher;
use chrono::DateTime;
use chrono_tz::Tz;
use pge_tge_types::{MetricField, MetricState, PriceUnit};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default wall-clock check interval; the network fetch itself is hourly
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic driver: ticks the coordinator and publishes the exposed metrics
pub struct PriceRunner {
    coordinator: Arc<PriceCoordinator>,
    publisher: Option<Arc<dyn MetricPublisher>>,
    metrics: Vec<MetricField>,
    unit: PriceUnit,
    interval: Duration,
}

impl fmt::Debug for PriceRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriceRunner")
            .field("publisher", &self.publisher.as_ref().map(|p| p.name()))
            .field("metrics", &self.metrics)
            .field("unit", &self.unit)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl PriceRunner {
    pub fn new(coordinator: Arc<PriceCoordinator>, unit: PriceUnit) -> Self {
        Self {
            coordinator,
            publisher: None,
            metrics: vec![MetricField::Rate],
            unit,
            interval: DEFAULT_UPDATE_INTERVAL,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn MetricPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<MetricField>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn coordinator(&self) -> &Arc<PriceCoordinator> {
        &self.coordinator
    }

    /// States of all configured metrics as of `now`
    pub fn states(&self, now: &DateTime<Tz>) -> Vec<MetricState> {
        self.metrics
            .iter()
            .map(|field| self.coordinator.metric_state(*field, self.unit, now))
            .collect()
    }

    /// Attach and run the first refresh. A not-ready coordinator is not fatal;
    /// the next cycle retries.
    pub async fn start(&self) -> Result<TickOutcome> {
        self.start_at(self.coordinator.now()).await
    }

    pub async fn start_at(&self, now: DateTime<Tz>) -> Result<TickOutcome> {
        self.coordinator.on_attach(now.date_naive());

        let outcome = self.coordinator.first_refresh(now).await;
        if let Err(TgeError::NotReady(reason)) = &outcome {
            warn!("Price data not ready yet, will retry on next cycle: {reason}");
        }

        self.publish(&now).await;
        outcome
    }

    /// One tick followed by publishing every metric
    pub async fn cycle(&self) -> Result<TickOutcome> {
        self.cycle_at(self.coordinator.now()).await
    }

    /// A skipped tick publishes nothing; the tick in flight will.
    pub async fn cycle_at(&self, now: DateTime<Tz>) -> Result<TickOutcome> {
        let outcome = self.coordinator.tick_at(now).await;
        if !matches!(outcome, Ok(TickOutcome::Skipped)) {
            self.publish(&now).await;
        }
        outcome
    }

    pub async fn publish(&self, now: &DateTime<Tz>) {
        let Some(publisher) = &self.publisher else {
            return;
        };

        for state in self.states(now) {
            match publisher.publish(&state).await {
                Ok(()) => debug!("Published {} via {}", state.field, publisher.name()),
                Err(e) => warn!(
                    "Failed to publish {} via {}: {e:#}",
                    state.field,
                    publisher.name()
                ),
            }
        }
    }

    /// Start, then cycle on the interval until `shutdown` resolves. The cache
    /// is persisted on the way out.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting price runner (interval {}s, {} metric(s))",
            self.interval.as_secs(),
            self.metrics.len()
        );

        let _ = self.start().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately and start() already refreshed
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    // Failures are logged by the coordinator
                    let _ = self.cycle().await;
                }
            }
        }

        self.coordinator.on_detach();
        info!("Price runner stopped");
    }
}
