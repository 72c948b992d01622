// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing setup for hosts embedding the piler.
//!
//! Lines are written as:
//!
//! ```text
//! LOG_PILER | LEVEL | [span{fields}: ]message fields
//! ```
//!
//! so piler output stays distinguishable from the host's own logs.

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::errors::PilerError;

pub const DEFAULT_PREFIX: &str = "LOG_PILER";

/// Event formatter that prefixes every line with a fixed tag and the level.
#[derive(Debug, Clone)]
pub struct Formatter {
    prefix: String,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl Formatter {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{} | {} | ", self.prefix, metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Installs a global subscriber filtered at `log_level`.
///
/// Fails if the level does not parse as a filter directive, or if a global
/// subscriber is already installed.
pub fn init(log_level: &str) -> Result<(), PilerError> {
    let env_filter = EnvFilter::try_new(log_level)
        .map_err(|e| PilerError::InvalidConfig(format!("could not parse log level: {e}")))?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .event_format(Formatter::default())
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| PilerError::Logging(e.to_string()))?;

    tracing::debug!("PILER | Logging subsystem enabled");
    Ok(())
}
