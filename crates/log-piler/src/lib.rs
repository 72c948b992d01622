// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching layer of a log-shipping pipeline.
//!
//! Individual log entries arrive tagged with a partition key. The
//! [`piler::Piler`] buffers them per key and emits one combined
//! [`queue::QueueItem`] per key whenever the buffered byte total would exceed
//! the configured maximum, or when the flush timer fires.
//!
//! ```text
//!   producers ──input(entry, key)──> Piler ──QueueItem──> MessageQueue ──> sender
//!                                      │
//!                                      v
//!                                  Statistics
//! ```
//!
//! The delivery side (HTTP client, retries, compression) lives outside this
//! crate and consumes items from a [`queue::MessageQueue`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod constants;
pub mod errors;
pub mod logger;
pub mod piler;
pub mod queue;
pub mod statistics;
