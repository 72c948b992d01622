// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-key piling of log entries with size- and time-triggered flushes.
//!
//! # Flush triggers
//!
//! 1. **Size**: an `input` that would push the buffered total past `pile_max`
//!    flushes every pile first, then buffers the new entry.
//! 2. **Timer**: a background task flushes every `interval`.
//! 3. **Shutdown**: `stop` flushes whatever is still piled once the timer exits.
//!
//! A single entry larger than `pile_max` is still accepted; it sits alone in
//! the piles and goes out with the next flush as one oversized message.
//!
//! # Locking
//!
//! One mutex guards the piles, the buffered byte total and the pile gauges in
//! [`Statistics`]. Flushes enqueue while holding it, so a size flush and a
//! timer flush never interleave.
//!
//! ```rust,ignore
//! let stats = Arc::new(Statistics::new());
//! let (queue, mut receiver) = ChannelQueue::new(Arc::clone(&stats));
//! let piler = Piler::new(Arc::new(queue), stats, &config);
//!
//! piler.start()?;
//! piler.input("GET /health 200".to_string(), "nginx")?;
//! // ...
//! piler.stop().await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PilerConfig;
use crate::constants::LINE_SEPARATOR;
use crate::errors::PilerError;
use crate::queue::{MessageQueue, QueueItem};
use crate::statistics::Statistics;

#[derive(Debug, Default)]
struct PileSet {
    /// Pending entries per partition key, in arrival order.
    piles: HashMap<String, Vec<String>>,
    /// Sum of `len()` over every pending entry.
    size: usize,
}

impl PileSet {
    fn items(&self) -> usize {
        self.piles.values().map(Vec::len).sum()
    }
}

struct Shared {
    queue: Arc<dyn MessageQueue>,
    stats: Arc<Statistics>,
    pile_max: usize,
    stopping: AtomicBool,
    /// `None` in pass-through mode.
    piles: Option<Mutex<PileSet>>,
}

impl Shared {
    fn flush(&self) -> Result<usize, PilerError> {
        let Some(piles) = &self.piles else {
            return Ok(0);
        };
        let mut pile_set = piles.lock().map_err(|_| PilerError::LockPoisoned)?;
        Ok(self.flush_locked(&mut pile_set))
    }

    /// Emits one item per non-empty pile. Must be called with the pile lock held.
    fn flush_locked(&self, pile_set: &mut PileSet) -> usize {
        if pile_set.piles.is_empty() {
            return 0;
        }

        let mut flushed = 0;
        for (key, pile) in pile_set.piles.drain() {
            if pile.is_empty() {
                continue;
            }
            self.queue
                .enqueue(QueueItem::new(pile.join(LINE_SEPARATOR), key));
            flushed += 1;
        }
        pile_set.size = 0;
        self.stats.record_clear_pile();

        debug!("PILER | Flushed {} piles", flushed);
        flushed
    }

    fn reject(&self, entry: &str, key: &str) -> PilerError {
        warn!(
            "PILER | Piler is shutting down, message ignored: key={} bytes={}",
            key,
            entry.len()
        );
        PilerError::ShuttingDown
    }
}

struct Worker {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Buffers log entries per partition key and hands combined messages to a
/// [`MessageQueue`].
///
/// Piling is active only when both the interval and `pile_max` are non-zero.
/// Otherwise `input` forwards each entry as its own [`QueueItem`] and no pile
/// state is allocated.
pub struct Piler {
    shared: Arc<Shared>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl Piler {
    #[must_use]
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        stats: Arc<Statistics>,
        config: &PilerConfig,
    ) -> Self {
        let piles = config
            .is_pile()
            .then(|| Mutex::new(PileSet::default()));

        Self {
            shared: Arc::new(Shared {
                queue,
                stats,
                pile_max: config.pile_max,
                stopping: AtomicBool::new(false),
                piles,
            }),
            interval: config.interval(),
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_pile(&self) -> bool {
        self.shared.piles.is_some()
    }

    /// Clears the stop flag and, when piling, spawns the flush timer.
    ///
    /// When piling, must be called from within a tokio runtime; otherwise
    /// returns [`PilerError::NoRuntime`] and leaves the piler untouched.
    pub fn start(&self) -> Result<(), PilerError> {
        let mut worker = self.worker.lock().map_err(|_| PilerError::LockPoisoned)?;
        if worker.is_some() {
            return Err(PilerError::AlreadyStarted);
        }
        let runtime = if self.is_pile() {
            Some(
                tokio::runtime::Handle::try_current()
                    .map_err(|e| PilerError::NoRuntime(e.to_string()))?,
            )
        } else {
            None
        };
        self.shared.stopping.store(false, Ordering::SeqCst);

        if let Some(runtime) = runtime {
            let cancel_token = CancellationToken::new();
            let handle = runtime.spawn(run_timer(
                Arc::clone(&self.shared),
                self.interval,
                cancel_token.clone(),
            ));
            *worker = Some(Worker {
                cancel_token,
                handle,
            });
            info!(
                "PILER | Piler started, flushing every {:?} or above {} bytes",
                self.interval, self.shared.pile_max
            );
        } else {
            info!("PILER | Piler started in pass-through mode");
        }
        Ok(())
    }

    /// Rejects further input, waits for the flush timer to exit, then flushes
    /// whatever is still piled.
    pub async fn stop(&self) -> Result<(), PilerError> {
        self.shared.stopping.store(true, Ordering::SeqCst);
        if !self.is_pile() {
            return Ok(());
        }

        info!("PILER | Shutting down piler...");
        let worker = {
            let mut guard = self.worker.lock().map_err(|_| PilerError::LockPoisoned)?;
            guard.take()
        };
        if let Some(worker) = worker {
            worker.cancel_token.cancel();
            if let Err(e) = worker.handle.await {
                error!("PILER | Flush timer task failed: {}", e);
            }
        }

        let flushed = self.shared.flush()?;
        info!(
            "PILER | Piler is fully shut down, flushed {} remaining piles",
            flushed
        );
        Ok(())
    }

    /// Accepts one entry for `key`.
    ///
    /// Returns [`PilerError::ShuttingDown`] once `stop` has been called; the
    /// entry is dropped.
    pub fn input(&self, entry: String, key: &str) -> Result<(), PilerError> {
        let Some(piles) = &self.shared.piles else {
            if self.shared.stopping.load(Ordering::SeqCst) {
                return Err(self.shared.reject(&entry, key));
            }
            self.shared
                .queue
                .enqueue(QueueItem::new(entry, key.to_string()));
            return Ok(());
        };

        let mut pile_set = piles.lock().map_err(|_| PilerError::LockPoisoned)?;
        // Checked under the lock so nothing lands after the final flush in `stop`.
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Err(self.shared.reject(&entry, key));
        }

        let len = entry.len();
        if pile_set.size + len > self.shared.pile_max {
            self.shared.flush_locked(&mut pile_set);
        }
        if len > self.shared.pile_max {
            warn!(
                "PILER | Entry of {} bytes exceeds pile_max of {} bytes, it will be sent on its own",
                len, self.shared.pile_max
            );
        }

        self.shared.stats.record_input(&entry);
        pile_set.size += len;
        if let Some(pile) = pile_set.piles.get_mut(key) {
            pile.push(entry);
        } else {
            pile_set.piles.insert(key.to_string(), vec![entry]);
        }
        Ok(())
    }

    /// Flushes every non-empty pile now. A no-op in pass-through mode or when
    /// nothing is piled.
    ///
    /// Returns the number of items handed to the queue.
    pub fn flush(&self) -> Result<usize, PilerError> {
        self.shared.flush()
    }

    /// Bytes currently piled across all keys.
    #[must_use]
    pub fn pile_bytes(&self) -> usize {
        self.shared.piles.as_ref().map_or(0, |piles| {
            piles.lock().unwrap_or_else(PoisonError::into_inner).size
        })
    }

    /// Entries currently piled across all keys.
    #[must_use]
    pub fn pile_items(&self) -> usize {
        self.shared.piles.as_ref().map_or(0, |piles| {
            piles.lock().unwrap_or_else(PoisonError::into_inner).items()
        })
    }
}

impl Drop for Piler {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(worker) = worker.take() {
                worker.cancel_token.cancel();
            }
        }
        let pending = self.pile_items();
        if pending > 0 {
            warn!(
                "PILER | Piler dropped without stop, discarding {} piled entries ({} bytes)",
                pending,
                self.pile_bytes()
            );
        }
    }
}

async fn run_timer(shared: Arc<Shared>, interval: Duration, cancel_token: CancellationToken) {
    debug!("PILER | Flush timer started");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                break;
            }
            () = tokio::time::sleep(interval) => {
                debug!("PILER | Timeout, enqueue piles now");
                if let Err(e) = shared.flush() {
                    error!("PILER | Timer flush failed: {}", e);
                }
            }
        }
    }

    debug!("PILER | Flush timer stopped");
}
