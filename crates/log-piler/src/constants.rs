// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Separator placed between entries of the same key when a pile is flushed.
pub const LINE_SEPARATOR: &str = "\n";

/// Default maximum number of buffered bytes before a size-triggered flush (100KiB).
pub const DEFAULT_PILE_MAX: usize = 102_400;

/// Default flush interval in milliseconds. Zero keeps the piler in pass-through mode.
pub const DEFAULT_INTERVAL_MS: u64 = 0;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Response key recorded for requests that never produced an HTTP status.
pub const RESPONSE_FAILURE_KEY: &str = "failure";

/// The only status counted as a successful delivery.
pub const STATUS_OK: u16 = 200;
