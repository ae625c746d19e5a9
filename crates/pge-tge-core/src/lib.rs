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

//! Caching and derivation core for TGE Fixing 1 day-ahead prices.
//!
//! The [`PriceCoordinator`] drives a [`RefreshPolicy`] in front of a
//! [`RemoteDataSource`], keeps a date-keyed [`RollingCache`], derives display
//! values with a [`DerivedValueCalculator`] and exposes them per metric via
//! [`ExposedMetricView`].

pub mod cache;
pub mod coordinator;
pub mod derive;
pub mod error;
pub mod expression;
pub mod persistence;
pub mod refresh;
pub mod runner;
pub mod traits;
pub mod view;

pub use cache::{CalculatedCache, RollingCache};
pub use coordinator::{PriceCoordinator, Readiness, TickOutcome};
pub use derive::DerivedValueCalculator;
pub use error::{ExpressionError, Result, TgeError};
pub use expression::{ArithmeticEvaluator, Bindings, Evaluator};
pub use persistence::{DEFAULT_STATE_PATH, InMemorySnapshotStore, JsonFileSnapshotStore};
pub use refresh::{RefreshBookkeeping, RefreshPolicy, RefreshResult};
pub use runner::{DEFAULT_UPDATE_INTERVAL, PriceRunner};
pub use traits::{MetricPublisher, RemoteDataSource, SnapshotStore};
pub use view::ExposedMetricView;
