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

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

// ============= Fixing Price Records =============

/// A single delivery hour of the TGE Fixing 1 auction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourRecord {
    /// Start of the delivery hour, in market local time
    pub time: DateTime<FixedOffset>,

    /// Fixing rate (zł/MWh)
    #[serde(rename = "fixing1_rate")]
    pub rate: f64,

    /// Traded volume (MWh)
    #[serde(rename = "fixing1_volume")]
    pub volume: f64,
}

impl HourRecord {
    pub fn new(time: DateTime<FixedOffset>, rate: f64, volume: f64) -> Self {
        Self { time, rate, volume }
    }

    /// Calendar date of the delivery hour in its own offset
    pub fn date(&self) -> NaiveDate {
        self.time.date_naive()
    }

    /// Hour of day (0-23) in its own offset
    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    /// Same timestamp with replaced values
    pub fn with_values(&self, rate: f64, volume: f64) -> Self {
        Self {
            time: self.time,
            rate,
            volume,
        }
    }
}

/// All published hours of one calendar day
///
/// Producers may hand over hours in any order; use [`DayRecord::sorted_hours`]
/// when order matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub hours: Vec<HourRecord>,
}

impl DayRecord {
    pub fn new(date: NaiveDate, hours: Vec<HourRecord>) -> Self {
        Self { date, hours }
    }

    /// Hours ordered by timestamp
    pub fn sorted_hours(&self) -> Vec<HourRecord> {
        let mut hours = self.hours.clone();
        hours.sort_by_key(|h| h.time);
        hours
    }

    /// First record whose hour of day equals `hour`
    pub fn hour_at(&self, hour: u32) -> Option<&HourRecord> {
        self.hours.iter().find(|h| h.hour() == hour)
    }

    pub fn is_empty(&self) -> bool {
        self.hours.is_empty()
    }
}

/// Result of one refresh cycle: today's and (once published) tomorrow's prices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub days: Vec<DayRecord>,
}

impl MarketSnapshot {
    pub fn new(days: Vec<DayRecord>) -> Self {
        Self { days }
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayRecord> {
        self.days.iter().find(|d| d.date == date)
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Total number of hourly records across all days
    pub fn hour_count(&self) -> usize {
        self.days.iter().map(|d| d.hours.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2025, 3, day, hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_hour_record_date_and_hour() {
        let record = HourRecord::new(at(10, 23), 512.5, 1200.0);
        assert_eq!(record.date(), NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(record.hour(), 23);
    }

    #[test]
    fn test_day_record_sorted_hours() {
        let day = DayRecord::new(
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            vec![
                HourRecord::new(at(10, 2), 3.0, 0.0),
                HourRecord::new(at(10, 0), 1.0, 0.0),
                HourRecord::new(at(10, 1), 2.0, 0.0),
            ],
        );

        let rates: Vec<f64> = day.sorted_hours().iter().map(|h| h.rate).collect();
        assert_eq!(rates, vec![1.0, 2.0, 3.0]);
        assert_eq!(day.hour_at(1).map(|h| h.rate), Some(2.0));
        assert!(day.hour_at(5).is_none());
    }

    #[test]
    fn test_hour_record_serde_field_names() {
        let record = HourRecord::new(at(10, 5), 420.0, 99.5);
        let json = serde_json::to_value(record).unwrap();

        assert_eq!(json["time"], "2025-03-10T05:00:00+01:00");
        assert_eq!(json["fixing1_rate"], 420.0);
        assert_eq!(json["fixing1_volume"], 99.5);
    }
}
