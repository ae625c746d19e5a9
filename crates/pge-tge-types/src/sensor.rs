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

//! Consumer-facing metric definitions: which field a sensor exposes, in which
//! unit, and the state shape handed to publishers.

use crate::pricing::HourRecord;
use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Round to `digits` decimal places, ties to even (banker's rounding)
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10_f64.powi(digits);
    (value * factor).round_ties_even() / factor
}

// ============= Price Units =============

/// Display unit for fixing rates. Raw rates are published in zł/MWh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PriceUnit {
    #[default]
    #[serde(rename = "zł/MWh", alias = "zl/MWh", alias = "zl-mwh")]
    ZlPerMwh,
    #[serde(rename = "gr/kWh", alias = "gr-kwh")]
    GrPerKwh,
    #[serde(rename = "zł/kWh", alias = "zl/kWh", alias = "zl-kwh")]
    ZlPerKwh,
}

impl PriceUnit {
    pub fn label(self) -> &'static str {
        match self {
            Self::ZlPerMwh => "zł/MWh",
            Self::GrPerKwh => "gr/kWh",
            Self::ZlPerKwh => "zł/kWh",
        }
    }

    /// Convert a zł/MWh value into this unit
    pub fn scale(self, value: f64) -> f64 {
        match self {
            Self::ZlPerMwh => value,
            Self::GrPerKwh => round_to(value / 10.0, 3),
            Self::ZlPerKwh => round_to(value / 1000.0, 5),
        }
    }

    /// Suggested number of decimals when displaying values in this unit
    pub fn display_precision(self) -> u32 {
        match self {
            Self::ZlPerMwh => 2,
            Self::GrPerKwh => 3,
            Self::ZlPerKwh => 5,
        }
    }

    pub fn all() -> &'static [PriceUnit] {
        &[Self::ZlPerMwh, Self::GrPerKwh, Self::ZlPerKwh]
    }
}

impl fmt::Display for PriceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PriceUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "zł/mwh" | "zl/mwh" | "zl-mwh" => Ok(Self::ZlPerMwh),
            "gr/kwh" | "gr-kwh" => Ok(Self::GrPerKwh),
            "zł/kwh" | "zl/kwh" | "zl-kwh" => Ok(Self::ZlPerKwh),
            _ => Err(anyhow::anyhow!(
                "Unknown price unit: '{}'. Supported units: {}",
                s,
                Self::all()
                    .iter()
                    .map(|u| u.label())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

// ============= Metric Fields =============

/// Hourly field a sensor exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    Rate,
    Volume,
}

impl MetricField {
    pub fn all() -> &'static [MetricField] {
        &[Self::Rate, Self::Volume]
    }

    /// Accessor reading this field from an hour record
    pub fn accessor(self) -> fn(&HourRecord) -> f64 {
        match self {
            Self::Rate => |h: &HourRecord| h.rate,
            Self::Volume => |h: &HourRecord| h.volume,
        }
    }

    /// Name under which the raw value is bound in expressions and stored state
    pub fn parameter_name(self) -> &'static str {
        match self {
            Self::Rate => "fixing1_rate",
            Self::Volume => "fixing1_volume",
        }
    }

    /// Base name of the list attributes (`prices`, `prices_today`, ...)
    pub fn attribute_name(self) -> &'static str {
        match self {
            Self::Rate => "prices",
            Self::Volume => "volumes",
        }
    }

    /// Key of the value inside each list item
    pub fn attribute_parameter_name(self) -> &'static str {
        match self {
            Self::Rate => "price",
            Self::Volume => "volume",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Rate => "Fixing 1 Rate",
            Self::Volume => "Fixing 1 Volume",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Rate => "mdi:cash",
            Self::Volume => "mdi:meter-electric",
        }
    }

    /// Unit label shown to consumers. Volumes are always MWh.
    pub fn unit_label(self, unit: PriceUnit) -> &'static str {
        match self {
            Self::Rate => unit.label(),
            Self::Volume => "MWh",
        }
    }

    pub fn scale(self, unit: PriceUnit, value: f64) -> f64 {
        match self {
            Self::Rate => unit.scale(value),
            Self::Volume => value,
        }
    }

    pub fn display_precision(self, unit: PriceUnit) -> Option<u32> {
        match self {
            Self::Rate => Some(unit.display_precision()),
            Self::Volume => None,
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.parameter_name())
    }
}

// ============= Metric State =============

/// Which part of the day-ahead window a series covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesWindow {
    Today,
    Tomorrow,
    Combined,
}

/// A scaled value for one delivery hour
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time: DateTime<FixedOffset>,
    pub value: f64,
}

/// Everything a consumer needs to render one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricState {
    pub field: MetricField,

    /// Scaled value for the current hour, `None` when unavailable
    pub value: Option<f64>,

    /// False until the integration has data to show
    pub available: bool,

    pub today: Vec<SeriesPoint>,
    pub tomorrow: Vec<SeriesPoint>,
    pub combined: Vec<SeriesPoint>,

    pub unit: String,
    pub display_precision: Option<u32>,
}
