// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the piler and its configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PilerError {
    /// `input` was called after `stop`; the entry was dropped.
    #[error("piler is shutting down, message ignored")]
    ShuttingDown,

    #[error("piler already started")]
    AlreadyStarted,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to install logging: {0}")]
    Logging(String),

    /// `start` was called outside a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// A thread panicked while holding the pile lock.
    #[error("pile lock poisoned")]
    LockPoisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = PilerError::InvalidConfig("bad log level".to_string());
        assert_eq!(error.to_string(), "Invalid configuration: bad log level");
        assert_eq!(
            PilerError::ShuttingDown.to_string(),
            "piler is shutting down, message ignored"
        );
    }

    #[test]
    fn test_error_debug() {
        let debug_str = format!("{:?}", PilerError::LockPoisoned);
        assert!(debug_str.contains("LockPoisoned"));
    }
}
