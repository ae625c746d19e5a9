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

//! Hourly refresh gate in front of a [`RemoteDataSource`].

use crate::error::Result;
use crate::traits::RemoteDataSource;
use chrono::{DateTime, Days, NaiveDate, Timelike};
use chrono_tz::Tz;
use pge_tge_types::{DayRecord, HourRecord, MarketSnapshot};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Bookkeeping used only to decide whether a fetch is due
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshBookkeeping {
    pub last_refreshed_hour: Option<u32>,
    pub has_data: bool,
}

/// Result of [`RefreshPolicy::refresh`]
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshResult {
    /// Remote source was queried and produced this snapshot
    Fetched(MarketSnapshot),
    /// Not due; last successful snapshot returned unchanged
    Cached(MarketSnapshot),
}

impl RefreshResult {
    pub fn snapshot(&self) -> &MarketSnapshot {
        match self {
            Self::Fetched(s) | Self::Cached(s) => s,
        }
    }

    pub fn into_snapshot(self) -> MarketSnapshot {
        match self {
            Self::Fetched(s) | Self::Cached(s) => s,
        }
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, Self::Fetched(_))
    }
}

/// Fetches at most once per wall-clock hour, but retries every call until the
/// first success.
///
/// Not meant for overlapping calls; the coordinator serializes access.
pub struct RefreshPolicy {
    source: Arc<dyn RemoteDataSource>,
    bookkeeping: RefreshBookkeeping,
    last_snapshot: Option<MarketSnapshot>,
}

impl fmt::Debug for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshPolicy")
            .field("source", &self.source.name())
            .field("bookkeeping", &self.bookkeeping)
            .field("has_snapshot", &self.last_snapshot.is_some())
            .finish()
    }
}

impl RefreshPolicy {
    pub fn new(source: Arc<dyn RemoteDataSource>) -> Self {
        Self {
            source,
            bookkeeping: RefreshBookkeeping::default(),
            last_snapshot: None,
        }
    }

    pub fn bookkeeping(&self) -> RefreshBookkeeping {
        self.bookkeeping
    }

    pub fn last_snapshot(&self) -> Option<&MarketSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn is_due(&self, now: &DateTime<Tz>) -> bool {
        match self.bookkeeping.last_refreshed_hour {
            None => true,
            Some(hour) => hour != now.hour() || !self.bookkeeping.has_data,
        }
    }

    /// Return the cached snapshot when not due, otherwise fetch yesterday
    /// through today and keep only today's and tomorrow's days.
    ///
    /// On failure bookkeeping is left untouched so the next call retries.
    pub fn refresh(&mut self, now: &DateTime<Tz>) -> Result<RefreshResult> {
        if !self.is_due(now) {
            if let Some(snapshot) = &self.last_snapshot {
                debug!(
                    "Price data for hour {} already fetched from {}",
                    now.hour(),
                    self.source.name()
                );
                return Ok(RefreshResult::Cached(snapshot.clone()));
            }
        }

        let today = now.date_naive();
        let (from, to) = fetch_range(today);
        debug!("Fetching {} prices for {from}..={to}", self.source.name());

        let records = self.source.fetch(from, to)?;
        let fetched = records.len();
        let snapshot = partition_snapshot(records, today);

        info!(
            "Fetched {fetched} records from {}, kept {} hours over {} day(s)",
            self.source.name(),
            snapshot.hour_count(),
            snapshot.days.len()
        );

        self.bookkeeping = RefreshBookkeeping {
            last_refreshed_hour: Some(now.hour()),
            has_data: true,
        };
        self.last_snapshot = Some(snapshot.clone());

        Ok(RefreshResult::Fetched(snapshot))
    }
}

/// Inclusive date range queried for `today`: yesterday through today
pub fn fetch_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    (yesterday, today)
}

/// Group records by date, keeping only `today` and the day after.
/// Days without records are omitted.
pub fn partition_snapshot(records: Vec<HourRecord>, today: NaiveDate) -> MarketSnapshot {
    let tomorrow = today.succ_opt();

    let mut by_date: BTreeMap<NaiveDate, Vec<HourRecord>> = BTreeMap::new();
    for record in records {
        let date = record.date();
        if date == today || Some(date) == tomorrow {
            by_date.entry(date).or_default().push(record);
        }
    }

    MarketSnapshot::new(
        by_date
            .into_iter()
            .map(|(date, hours)| DayRecord::new(date, hours))
            .collect(),
    )
}
