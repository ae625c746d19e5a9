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

//! Error types for the price core

use chrono::{DateTime, FixedOffset};
use pge_tge_types::MetricField;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TgeError {
    /// Transport failure or non-200 response from the price provider
    #[error("fetch failed: {message}")]
    Fetch {
        status: Option<u16>,
        body: Option<String>,
        message: String,
    },

    /// Provider answered, but the payload is missing or has unparseable fields
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("persisted cache is corrupt: {0}")]
    CacheCorrupt(String),

    #[error("expression for {field} failed at {timestamp}: {source}")]
    TemplateEvaluation {
        field: MetricField,
        timestamp: DateTime<FixedOffset>,
        #[source]
        source: ExpressionError,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("background worker failed: {0}")]
    Worker(String),

    #[error("config error: {0}")]
    Config(String),
}

impl TgeError {
    /// Errors that mean "the remote refresh did not produce data"
    pub fn is_refresh_failure(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::MalformedPayload(_))
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Fetch { status, .. } => *status,
            _ => None,
        }
    }
}

/// Failure while parsing or evaluating a user expression
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} argument(s), got {actual}")]
    Arity {
        name: String,
        expected: &'static str,
        actual: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("expression did not produce a finite number")]
    NonNumeric,
}

pub type Result<T> = std::result::Result<T, TgeError>;
