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

//! Rolling per-day cache of fixing records.
//!
//! Keys are calendar dates. `merge` replaces whole days, `prune` drops days
//! before a reference date, and the serialized form is what gets persisted
//! between restarts.

use crate::error::{Result, TgeError};
use chrono::NaiveDate;
use pge_tge_types::{DayRecord, HourRecord, MarketSnapshot};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::Deref;

/// Top-level key of the serialized cache
const STORED_CACHE_KEY: &str = "cache";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollingCache {
    days: BTreeMap<NaiveDate, DayRecord>,
}

impl RollingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert every day of the snapshot. A re-fetched date always replaces
    /// the cached one in full.
    pub fn merge(&mut self, snapshot: &MarketSnapshot) {
        for day in &snapshot.days {
            self.days.insert(day.date, day.clone());
        }
    }

    /// Remove every day strictly before `reference_date`, returning how many
    /// were dropped
    pub fn prune(&mut self, reference_date: NaiveDate) -> usize {
        let before = self.days.len();
        self.days.retain(|date, _| *date >= reference_date);
        before - self.days.len()
    }

    /// True if `prune(reference_date)` would remove anything
    pub fn has_days_before(&self, reference_date: NaiveDate) -> bool {
        self.days
            .keys()
            .next()
            .is_some_and(|first| *first < reference_date)
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayRecord> {
        self.days.get(&date)
    }

    pub fn days(&self) -> impl Iterator<Item = &DayRecord> {
        self.days.values()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.days.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Every cached hour, ascending by timestamp. Recomputed on each call.
    pub fn combined_hours(&self) -> impl Iterator<Item = &HourRecord> {
        let mut hours: Vec<&HourRecord> = self.days.values().flat_map(|d| d.hours.iter()).collect();
        hours.sort_by_key(|h| h.time);
        hours.into_iter()
    }

    /// Build a new cache with every hour passed through `f`, failing on the
    /// first error
    pub fn try_map_hours<E, F>(&self, mut f: F) -> std::result::Result<Self, E>
    where
        F: FnMut(&HourRecord) -> std::result::Result<HourRecord, E>,
    {
        let mut days = BTreeMap::new();
        for (date, day) in &self.days {
            let hours = day
                .hours
                .iter()
                .map(&mut f)
                .collect::<std::result::Result<Vec<_>, E>>()?;
            days.insert(*date, DayRecord::new(day.date, hours));
        }
        Ok(Self { days })
    }

    /// Nested primitive form: `{"cache": {"YYYY-MM-DD": {"date", "hours": [...]}}}`
    pub fn serialize(&self) -> Result<Value> {
        let mut cache = Map::new();
        for (date, day) in &self.days {
            cache.insert(date.format(DATE_FORMAT).to_string(), serde_json::to_value(day)?);
        }

        let mut root = Map::new();
        root.insert(STORED_CACHE_KEY.to_owned(), Value::Object(cache));
        Ok(Value::Object(root))
    }

    /// Inverse of [`RollingCache::serialize`]. Any malformed date or hour entry
    /// yields [`TgeError::CacheCorrupt`].
    pub fn deserialize(blob: &Value) -> Result<Self> {
        let cache = blob
            .get(STORED_CACHE_KEY)
            .and_then(Value::as_object)
            .ok_or_else(|| TgeError::CacheCorrupt(format!("missing '{STORED_CACHE_KEY}' object")))?;

        let mut days = BTreeMap::new();
        for (key, value) in cache {
            let date = NaiveDate::parse_from_str(key, DATE_FORMAT)
                .map_err(|e| TgeError::CacheCorrupt(format!("invalid date key '{key}': {e}")))?;

            let day: DayRecord = serde_json::from_value(value.clone())
                .map_err(|e| TgeError::CacheCorrupt(format!("invalid entry for {key}: {e}")))?;

            if day.date != date {
                return Err(TgeError::CacheCorrupt(format!(
                    "entry stored under {key} is for {}",
                    day.date
                )));
            }

            days.insert(date, day);
        }

        Ok(Self { days })
    }
}

impl FromIterator<DayRecord> for RollingCache {
    fn from_iter<I: IntoIterator<Item = DayRecord>>(iter: I) -> Self {
        Self {
            days: iter.into_iter().map(|d| (d.date, d)).collect(),
        }
    }
}

/// Rolling cache after the configured expressions were applied.
///
/// Only [`crate::derive::DerivedValueCalculator`] builds one, always from
/// scratch, so it never carries results of an older configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalculatedCache(RollingCache);

impl CalculatedCache {
    pub(crate) fn new(cache: RollingCache) -> Self {
        Self(cache)
    }

    pub fn as_cache(&self) -> &RollingCache {
        &self.0
    }
}

impl Deref for CalculatedCache {
    type Target = RollingCache;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, TimeZone};
    use serde_json::json;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn at(day: u32, hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, day, hour, 0, 0)
            .unwrap()
    }

    fn day_record(day: u32, rates: &[f64]) -> DayRecord {
        let hours = rates
            .iter()
            .enumerate()
            .map(|(hour, rate)| HourRecord::new(at(day, hour as u32), *rate, 10.0))
            .collect();
        DayRecord::new(date(day), hours)
    }

    #[test]
    fn test_merge_replaces_whole_day() {
        let mut cache = RollingCache::new();
        cache.merge(&MarketSnapshot::new(vec![day_record(10, &[1.0, 2.0, 3.0])]));
        cache.merge(&MarketSnapshot::new(vec![day_record(10, &[9.0])]));

        let day = cache.day(date(10)).unwrap();
        assert_eq!(day.hours.len(), 1);
        assert_eq!(day.hours[0].rate, 9.0);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let snapshot =
            MarketSnapshot::new(vec![day_record(10, &[1.0, 2.0]), day_record(11, &[3.0])]);

        let mut once = RollingCache::new();
        once.merge(&snapshot);

        let mut twice = RollingCache::new();
        twice.merge(&snapshot);
        twice.merge(&snapshot);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_prune_keeps_reference_date_and_later() {
        let mut cache: RollingCache = [8, 9, 10, 11]
            .into_iter()
            .map(|d| day_record(d, &[1.0]))
            .collect();

        assert!(cache.has_days_before(date(10)));
        assert_eq!(cache.prune(date(10)), 2);
        assert!(!cache.has_days_before(date(10)));
        assert_eq!(cache.dates().collect::<Vec<_>>(), vec![date(10), date(11)]);
    }

    #[test]
    fn test_prune_after_any_merge_sequence() {
        let mut cache = RollingCache::new();
        for start in [5, 7, 9, 11] {
            cache.merge(&MarketSnapshot::new(vec![
                day_record(start, &[1.0]),
                day_record(start + 1, &[2.0]),
            ]));
        }

        cache.prune(date(10));
        assert!(cache.dates().all(|d| d >= date(10)));
    }

    #[test]
    fn test_combined_hours_sorted_across_days() {
        let mut tomorrow = day_record(11, &[30.0, 40.0]);
        tomorrow.hours.reverse();
        let cache: RollingCache = [tomorrow, day_record(10, &[10.0, 20.0])].into_iter().collect();

        let rates: Vec<f64> = cache.combined_hours().map(|h| h.rate).collect();
        assert_eq!(rates, vec![10.0, 20.0, 30.0, 40.0]);

        // restartable
        assert_eq!(cache.combined_hours().count(), 4);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let cache: RollingCache = [day_record(10, &[101.5, 99.25]), day_record(11, &[87.0])]
            .into_iter()
            .collect();

        let blob = cache.serialize().unwrap();
        assert_eq!(blob["cache"]["2025-06-10"]["date"], "2025-06-10");
        assert_eq!(
            blob["cache"]["2025-06-10"]["hours"][1]["time"],
            "2025-06-10T01:00:00+02:00"
        );

        let restored = RollingCache::deserialize(&blob).unwrap();
        assert_eq!(restored, cache);
    }

    #[test]
    fn test_deserialize_empty_cache() {
        let restored = RollingCache::deserialize(&json!({ "cache": {} })).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_deserialize_rejects_bad_date_key() {
        let blob = json!({ "cache": { "yesterday": { "date": "2025-06-10", "hours": [] } } });
        assert!(matches!(
            RollingCache::deserialize(&blob),
            Err(TgeError::CacheCorrupt(_))
        ));
    }

    #[test]
    fn test_deserialize_rejects_bad_hour() {
        let blob = json!({
            "cache": {
                "2025-06-10": {
                    "date": "2025-06-10",
                    "hours": [{ "time": "not a time", "fixing1_rate": 1.0, "fixing1_volume": 2.0 }]
                }
            }
        });
        assert!(matches!(
            RollingCache::deserialize(&blob),
            Err(TgeError::CacheCorrupt(_))
        ));
    }

    #[test]
    fn test_deserialize_rejects_mismatched_date() {
        let blob = json!({ "cache": { "2025-06-10": { "date": "2025-06-11", "hours": [] } } });
        assert!(matches!(
            RollingCache::deserialize(&blob),
            Err(TgeError::CacheCorrupt(_))
        ));
    }

    #[test]
    fn test_deserialize_rejects_missing_root() {
        assert!(matches!(
            RollingCache::deserialize(&json!([1, 2, 3])),
            Err(TgeError::CacheCorrupt(_))
        ));
    }

    #[test]
    fn test_try_map_hours_stops_on_error() {
        let cache: RollingCache = [day_record(10, &[1.0, 2.0])].into_iter().collect();

        let doubled = cache
            .try_map_hours::<(), _>(|h| Ok(h.with_values(h.rate * 2.0, h.volume)))
            .unwrap();
        let rates: Vec<f64> = doubled.combined_hours().map(|h| h.rate).collect();
        assert_eq!(rates, vec![2.0, 4.0]);

        let failed = cache.try_map_hours(|h| if h.hour() == 1 { Err("boom") } else { Ok(*h) });
        assert_eq!(failed, Err("boom"));
    }
}
