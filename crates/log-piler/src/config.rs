// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{DEFAULT_INTERVAL_MS, DEFAULT_LOG_LEVEL, DEFAULT_PILE_MAX};
use crate::errors::PilerError;
use serde::Deserialize;
use std::env;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the piler.
///
/// Piling is enabled only when both `interval_ms` and `pile_max` are non-zero;
/// otherwise every entry is forwarded to the queue as-is.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PilerConfig {
    /// Period of the flush timer, in milliseconds.
    pub interval_ms: u64,
    /// Maximum buffered bytes across all keys before a forced flush.
    pub pile_max: usize,
    pub log_level: String,
}

impl Default for PilerConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            pile_max: DEFAULT_PILE_MAX,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl PilerConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, PilerError> {
        let interval_ms = env::var("PILER_INTERVAL_MS")
            .ok()
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_INTERVAL_MS);
        let pile_max = env::var("PILER_PILE_MAX")
            .ok()
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_PILE_MAX);
        let log_level = env::var("PILER_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        let config = Self {
            interval_ms,
            pile_max,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PilerError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(PilerError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Whether entries are buffered per key rather than forwarded directly.
    #[must_use]
    pub fn is_pile(&self) -> bool {
        self.interval_ms > 0 && self.pile_max > 0
    }
}
