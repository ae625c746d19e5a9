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

//! Shared data types for the PGE TGE price integration.

pub mod pricing;
pub mod sensor;

pub use pricing::{DayRecord, HourRecord, MarketSnapshot};
pub use sensor::{MetricField, MetricState, PriceUnit, SeriesPoint, SeriesWindow, round_to};
