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

use crate::cache::{CalculatedCache, RollingCache};
use crate::error::{Result, TgeError};
use crate::expression::{ArithmeticEvaluator, Bindings, Evaluator};
use pge_tge_types::{HourRecord, MetricField};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Applies the configured per-field expressions to every cached hour.
///
/// A field without an expression passes its raw value through.
pub struct DerivedValueCalculator {
    evaluator: Arc<dyn Evaluator>,
    rate_template: Option<String>,
    volume_template: Option<String>,
}

impl fmt::Debug for DerivedValueCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedValueCalculator")
            .field("rate_template", &self.rate_template)
            .field("volume_template", &self.volume_template)
            .finish_non_exhaustive()
    }
}

fn normalize(template: Option<String>) -> Option<String> {
    template.filter(|t| !t.trim().is_empty())
}

impl DerivedValueCalculator {
    /// Empty or whitespace-only templates mean identity
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        rate_template: Option<String>,
        volume_template: Option<String>,
    ) -> Self {
        Self {
            evaluator,
            rate_template: normalize(rate_template),
            volume_template: normalize(volume_template),
        }
    }

    /// Pass-through calculator with no expressions
    pub fn identity() -> Self {
        Self::new(Arc::new(ArithmeticEvaluator::new()), None, None)
    }

    pub fn template(&self, field: MetricField) -> Option<&str> {
        match field {
            MetricField::Rate => self.rate_template.as_deref(),
            MetricField::Volume => self.volume_template.as_deref(),
        }
    }

    /// Parse every configured expression once, without data
    pub fn validate(&self) -> Result<()> {
        for field in MetricField::all() {
            if let Some(template) = self.template(*field) {
                self.evaluator.check(template).map_err(|e| {
                    TgeError::Config(format!("invalid {field} template '{template}': {e}"))
                })?;
            }
        }
        Ok(())
    }

    fn derive(&self, field: MetricField, record: &HourRecord, bindings: &Bindings) -> Result<f64> {
        let raw = field.accessor()(record);
        let Some(template) = self.template(field) else {
            return Ok(raw);
        };

        self.evaluator
            .evaluate(template, bindings)
            .map_err(|source| TgeError::TemplateEvaluation {
                field,
                timestamp: record.time,
                source,
            })
    }

    /// Build a fresh calculated cache from `cache`.
    ///
    /// The first failing hour fails the whole recompute; no partially derived
    /// cache is ever returned.
    pub fn recompute(&self, cache: &RollingCache) -> Result<CalculatedCache> {
        let calculated = cache.try_map_hours(|record| {
            let bindings = Bindings::for_hour(record);
            let rate = self.derive(MetricField::Rate, record, &bindings)?;
            let volume = self.derive(MetricField::Volume, record, &bindings)?;
            Ok::<_, TgeError>(record.with_values(rate, volume))
        })?;

        debug!(
            "Recomputed {} day(s) of derived values",
            calculated.len()
        );
        Ok(CalculatedCache::new(calculated))
    }
}
