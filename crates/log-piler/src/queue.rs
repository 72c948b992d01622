// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The unit handed to the delivery queue, and the queue seam itself.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

use crate::statistics::Statistics;

/// A combined message and the partition key it was piled under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    message: String,
    key: String,
}

impl QueueItem {
    #[must_use]
    pub fn new(message: String, key: String) -> Self {
        Self { message, key }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn into_parts(self) -> (String, String) {
        (self.message, self.key)
    }
}

/// Downstream delivery queue consumed by the piler.
///
/// Implementations must accept concurrent producers and must not block for
/// long: `enqueue` is called while the pile lock is held.
pub trait MessageQueue: Send + Sync {
    fn enqueue(&self, item: QueueItem);
}

/// Unbounded in-process queue that records enqueue and dequeue statistics.
#[derive(Clone, Debug)]
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    stats: Arc<Statistics>,
}

/// Consuming end of a [`ChannelQueue`], owned by the sender's worker.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
    stats: Arc<Statistics>,
}

impl ChannelQueue {
    #[must_use]
    pub fn new(stats: Arc<Statistics>) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            stats: Arc::clone(&stats),
        };
        (queue, QueueReceiver { rx, stats })
    }
}

impl MessageQueue for ChannelQueue {
    fn enqueue(&self, item: QueueItem) {
        // Recorded before sending so a fast consumer never dequeues ahead of the gauge.
        self.stats.record_enqueue(item.message());
        if let Err(e) = self.tx.send(item) {
            let item = e.0;
            self.stats.revert_enqueue(item.message());
            error!(
                "PILER | Queue receiver dropped, discarding message for key {}",
                item.key()
            );
        }
    }
}

impl QueueReceiver {
    /// Waits for the next item. Returns `None` once every sender is dropped
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<QueueItem> {
        let item = self.rx.recv().await?;
        self.stats.record_dequeue(item.message());
        Some(item)
    }

    pub fn try_recv(&mut self) -> Option<QueueItem> {
        let item = self.rx.try_recv().ok()?;
        self.stats.record_dequeue(item.message());
        Some(item)
    }
}
