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

//! Consumer projection of the calculated cache for one metric

use crate::cache::CalculatedCache;
use chrono::{DateTime, NaiveDate, Timelike};
use chrono_tz::Tz;
use pge_tge_types::{HourRecord, MetricField, MetricState, PriceUnit, SeriesPoint, SeriesWindow};

/// Read-only view of one field in one unit, anchored at the moment it was built
#[derive(Debug, Clone, Copy)]
pub struct ExposedMetricView<'a> {
    cache: &'a CalculatedCache,
    field: MetricField,
    accessor: fn(&HourRecord) -> f64,
    unit: PriceUnit,
    today: NaiveDate,
    current_hour: u32,
}

impl<'a> ExposedMetricView<'a> {
    pub fn new(
        cache: &'a CalculatedCache,
        field: MetricField,
        unit: PriceUnit,
        now: &DateTime<Tz>,
    ) -> Self {
        Self {
            cache,
            field,
            accessor: field.accessor(),
            unit,
            today: now.date_naive(),
            current_hour: now.hour(),
        }
    }

    fn scaled(&self, record: &HourRecord) -> f64 {
        self.field.scale(self.unit, (self.accessor)(record))
    }

    /// Scaled value for the current hour of today, `None` when unavailable
    pub fn current_value(&self) -> Option<f64> {
        self.cache
            .day(self.today)?
            .hour_at(self.current_hour)
            .map(|record| self.scaled(record))
    }

    /// Scaled points of the requested window, ascending by time
    pub fn series_for(&self, window: SeriesWindow) -> Vec<SeriesPoint> {
        let tomorrow = self.today.succ_opt();
        self.cache
            .combined_hours()
            .filter(|record| match window {
                SeriesWindow::Today => record.date() == self.today,
                SeriesWindow::Tomorrow => Some(record.date()) == tomorrow,
                SeriesWindow::Combined => true,
            })
            .map(|record| SeriesPoint {
                time: record.time,
                value: self.scaled(record),
            })
            .collect()
    }

    /// Full consumer state. `available` is decided by the owner of the cache.
    pub fn state(&self, available: bool) -> MetricState {
        MetricState {
            field: self.field,
            value: if available { self.current_value() } else { None },
            available,
            today: self.series_for(SeriesWindow::Today),
            tomorrow: self.series_for(SeriesWindow::Tomorrow),
            combined: self.series_for(SeriesWindow::Combined),
            unit: self.field.unit_label(self.unit).to_owned(),
            display_precision: self.field.display_precision(self.unit),
        }
    }
}
