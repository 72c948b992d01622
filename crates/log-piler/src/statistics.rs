// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline counters shared by the piler, the queue and the sender.
//!
//! Every counter is its own atomic, so recording never takes a lock and
//! never contends with the pile critical section. Reads of a single counter
//! are never torn; reads across counters are not a consistent snapshot.
//!
//! The two pile gauges are the exception to "record from anywhere": the piler
//! only touches them while holding its pile lock, so they always agree with the
//! buffered state.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tracing::{error, info};

use crate::constants::{RESPONSE_FAILURE_KEY, STATUS_OK};

#[derive(Debug)]
pub struct Statistics {
    initialize_time: SystemTime,
    started: Instant,
    total_input_events: AtomicU64,
    total_input_bytes: AtomicU64,
    total_metrics_datapoints: AtomicU64,
    total_log_lines: AtomicU64,
    current_pile_items: AtomicU64,
    current_pile_bytes: AtomicU64,
    total_enqueue_times: AtomicU64,
    total_enqueue_bytes: AtomicU64,
    total_dequeue_times: AtomicU64,
    total_dequeue_bytes: AtomicU64,
    current_queue_items: AtomicU64,
    current_queue_bytes: AtomicU64,
    total_output_requests: AtomicU64,
    total_output_bytes: AtomicU64,
    total_output_bytes_compressed: AtomicU64,
    /// Response counts keyed by status code string, or [`RESPONSE_FAILURE_KEY`].
    total_response: DashMap<String, AtomicU64>,
    total_response_times: AtomicU64,
    total_response_success: AtomicU64,
}

/// Point-in-time copy of every counter, for periodic reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub uptime_secs: u64,
    pub total_input_events: u64,
    pub total_input_bytes: u64,
    pub total_metrics_datapoints: u64,
    pub total_log_lines: u64,
    pub current_pile_items: u64,
    pub current_pile_bytes: u64,
    pub total_enqueue_times: u64,
    pub total_enqueue_bytes: u64,
    pub total_dequeue_times: u64,
    pub total_dequeue_bytes: u64,
    pub current_queue_items: u64,
    pub current_queue_bytes: u64,
    pub total_output_requests: u64,
    pub total_output_bytes: u64,
    pub total_output_bytes_compressed: u64,
    pub total_response: BTreeMap<String, u64>,
    pub total_response_times: u64,
    pub total_response_success: u64,
}

fn len_u64(bytes: usize) -> u64 {
    u64::try_from(bytes).unwrap_or(u64::MAX)
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialize_time: SystemTime::now(),
            started: Instant::now(),
            total_input_events: AtomicU64::new(0),
            total_input_bytes: AtomicU64::new(0),
            total_metrics_datapoints: AtomicU64::new(0),
            total_log_lines: AtomicU64::new(0),
            current_pile_items: AtomicU64::new(0),
            current_pile_bytes: AtomicU64::new(0),
            total_enqueue_times: AtomicU64::new(0),
            total_enqueue_bytes: AtomicU64::new(0),
            total_dequeue_times: AtomicU64::new(0),
            total_dequeue_bytes: AtomicU64::new(0),
            current_queue_items: AtomicU64::new(0),
            current_queue_bytes: AtomicU64::new(0),
            total_output_requests: AtomicU64::new(0),
            total_output_bytes: AtomicU64::new(0),
            total_output_bytes_compressed: AtomicU64::new(0),
            total_response: DashMap::new(),
            total_response_times: AtomicU64::new(0),
            total_response_success: AtomicU64::new(0),
        }
    }

    pub fn record_input(&self, entry: &str) {
        let bytes = len_u64(entry.len());
        self.total_input_events.fetch_add(1, Ordering::Relaxed);
        self.total_input_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.current_pile_items.fetch_add(1, Ordering::Relaxed);
        self.current_pile_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a batch of inputs that bypassed the pile.
    pub fn record_multi_input(&self, events: u64, bytes: u64) {
        self.total_input_events.fetch_add(events, Ordering::Relaxed);
        self.total_input_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_log_process(&self) {
        self.total_log_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_metrics_process(&self, datapoints: u64) {
        self.total_metrics_datapoints
            .fetch_add(datapoints, Ordering::Relaxed);
    }

    pub fn record_clear_pile(&self) {
        self.current_pile_items.store(0, Ordering::Relaxed);
        self.current_pile_bytes.store(0, Ordering::Relaxed);
    }

    pub fn record_enqueue(&self, payload: &str) {
        let bytes = len_u64(payload.len());
        self.total_enqueue_times.fetch_add(1, Ordering::Relaxed);
        self.total_enqueue_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.current_queue_items.fetch_add(1, Ordering::Relaxed);
        self.current_queue_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Undoes a [`Statistics::record_enqueue`] whose payload never reached the queue.
    pub fn revert_enqueue(&self, payload: &str) {
        let bytes = len_u64(payload.len());
        self.total_enqueue_times.fetch_sub(1, Ordering::Relaxed);
        self.total_enqueue_bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.current_queue_items.fetch_sub(1, Ordering::Relaxed);
        self.current_queue_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Every dequeue must pair with an earlier [`Statistics::record_enqueue`]
    /// of the same payload.
    pub fn record_dequeue(&self, payload: &str) {
        let bytes = len_u64(payload.len());
        self.total_dequeue_times.fetch_add(1, Ordering::Relaxed);
        self.total_dequeue_bytes.fetch_add(bytes, Ordering::Relaxed);
        let items = self.current_queue_items.fetch_sub(1, Ordering::Relaxed);
        let queued_bytes = self.current_queue_bytes.fetch_sub(bytes, Ordering::Relaxed);
        debug_assert!(items > 0, "dequeue recorded without a matching enqueue");
        debug_assert!(queued_bytes >= bytes, "dequeued more bytes than enqueued");
    }

    pub fn record_request(&self, size: u64, size_compressed: u64) {
        self.total_output_requests.fetch_add(1, Ordering::Relaxed);
        self.total_output_bytes.fetch_add(size, Ordering::Relaxed);
        self.total_output_bytes_compressed
            .fetch_add(size_compressed, Ordering::Relaxed);
    }

    /// Records a response that carried an HTTP status, successful or not.
    pub fn record_response_success(&self, code: u16) {
        self.increase_response(&code.to_string());
        if code == STATUS_OK {
            self.total_response_success.fetch_add(1, Ordering::Relaxed);
        }
        self.total_response_times.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request that failed before any response arrived.
    pub fn record_response_failure(&self) {
        self.increase_response(RESPONSE_FAILURE_KEY);
    }

    fn increase_response(&self, key: &str) {
        // Fast path: shard read lock only.
        if let Some(counter) = self.total_response.get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        // Racing creators all land on whichever counter the entry API stored first.
        self.total_response
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Count recorded under `key`, or 0 if nothing was ever recorded for it.
    #[must_use]
    pub fn response_count(&self, key: &str) -> u64 {
        self.total_response
            .get(key)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn initialize_time(&self) -> SystemTime {
        self.initialize_time
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn total_input_events(&self) -> u64 {
        self.total_input_events.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_input_bytes(&self) -> u64 {
        self.total_input_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_metrics_datapoints(&self) -> u64 {
        self.total_metrics_datapoints.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_log_lines(&self) -> u64 {
        self.total_log_lines.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_pile_items(&self) -> u64 {
        self.current_pile_items.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_pile_bytes(&self) -> u64 {
        self.current_pile_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_enqueue_times(&self) -> u64 {
        self.total_enqueue_times.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_enqueue_bytes(&self) -> u64 {
        self.total_enqueue_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_dequeue_times(&self) -> u64 {
        self.total_dequeue_times.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_dequeue_bytes(&self) -> u64 {
        self.total_dequeue_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_queue_items(&self) -> u64 {
        self.current_queue_items.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_queue_bytes(&self) -> u64 {
        self.current_queue_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_output_requests(&self) -> u64 {
        self.total_output_requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_output_bytes(&self) -> u64 {
        self.total_output_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_output_bytes_compressed(&self) -> u64 {
        self.total_output_bytes_compressed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_response_times(&self) -> u64 {
        self.total_response_times.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_response_success(&self) -> u64 {
        self.total_response_success.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let total_response = self
            .total_response
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        StatisticsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            total_input_events: self.total_input_events(),
            total_input_bytes: self.total_input_bytes(),
            total_metrics_datapoints: self.total_metrics_datapoints(),
            total_log_lines: self.total_log_lines(),
            current_pile_items: self.current_pile_items(),
            current_pile_bytes: self.current_pile_bytes(),
            total_enqueue_times: self.total_enqueue_times(),
            total_enqueue_bytes: self.total_enqueue_bytes(),
            total_dequeue_times: self.total_dequeue_times(),
            total_dequeue_bytes: self.total_dequeue_bytes(),
            current_queue_items: self.current_queue_items(),
            current_queue_bytes: self.current_queue_bytes(),
            total_output_requests: self.total_output_requests(),
            total_output_bytes: self.total_output_bytes(),
            total_output_bytes_compressed: self.total_output_bytes_compressed(),
            total_response,
            total_response_times: self.total_response_times(),
            total_response_success: self.total_response_success(),
        }
    }

    /// Logs the current snapshot as a single JSON line.
    pub fn report(&self) {
        match serde_json::to_string(&self.snapshot()) {
            Ok(json) => info!("PILER | Statistics: {}", json),
            Err(e) => error!("PILER | Failed to serialize statistics: {}", e),
        }
    }
}
