//! Tracing initialisation shared by toolmesh binaries.

#![warn(missing_docs, clippy::pedantic)]

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, one event per line.
    #[default]
    Text,
    /// Newline-delimited JSON objects.
    Json,
}

impl LogFormat {
    /// Picks JSON when `json` is set.
    #[must_use]
    pub const fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Text }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The fallback filter directive did not parse.
    #[error("invalid log filter `{directive}`: {reason}")]
    InvalidFilter {
        /// Directive that failed to parse.
        directive: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber was already installed.
    #[error("tracing subscriber already initialised: {reason}")]
    AlreadyInitialised {
        /// Underlying error text.
        reason: String,
    },
}

/// Builds the filter: `RUST_LOG` when set, otherwise `fallback`.
///
/// # Errors
///
/// Returns [`TelemetryError::InvalidFilter`] when `RUST_LOG` is unset and the
/// fallback directive is malformed.
pub fn env_filter(fallback: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(fallback).map_err(|err| TelemetryError::InvalidFilter {
        directive: fallback.to_owned(),
        reason: err.to_string(),
    })
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is malformed or a subscriber is
/// already installed.
pub fn init_tracing(fallback_filter: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter = env_filter(fallback_filter)?;
    let (text, json) = match format {
        LogFormat::Text => (Some(fmt::layer().with_target(true)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_current_span(false))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .map_err(|err| TelemetryError::AlreadyInitialised {
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_selects_format() {
        assert_eq!(LogFormat::from_json_flag(true), LogFormat::Json);
        assert_eq!(LogFormat::from_json_flag(false), LogFormat::Text);
    }

    #[test]
    fn second_initialisation_fails() {
        // Another test in this binary may have installed a subscriber first.
        let _ = init_tracing("info", LogFormat::Text);
        let err = init_tracing("info", LogFormat::Text).expect_err("already installed");
        assert!(matches!(err, TelemetryError::AlreadyInitialised { .. }));
    }
}
