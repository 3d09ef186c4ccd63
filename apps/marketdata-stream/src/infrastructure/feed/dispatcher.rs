//! Tick Dispatcher
//!
//! Decouples the socket reader from tick consumption. The reader enqueues
//! raw frames into a bounded queue without awaiting; one dispatcher task
//! decodes them and hands each tick to the registered consumer.
//!
//! # Overflow
//!
//! When the queue is full the incoming frame is dropped (drop-newest) and
//! counted. The reader never blocks on a slow consumer.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::application::ports::TickConsumer;
use crate::infrastructure::feed::codec::TickDecoder;
use crate::infrastructure::feed::messages::RawFrame;
use crate::infrastructure::metrics::{self, DropReason};

/// Default dispatch queue capacity in frames.
pub const DEFAULT_TICK_QUEUE_CAPACITY: usize = 10_000;

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames accepted into the queue.
    pub enqueued: u64,
    /// Ticks delivered to a consumer.
    pub dispatched: u64,
    /// Frames that failed to decode.
    pub decode_failures: u64,
    /// Frames dropped because the queue was full.
    pub dropped: u64,
    /// Ticks discarded because no consumer was registered.
    pub unconsumed: u64,
    /// Consumer calls that panicked.
    pub consumer_panics: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    dispatched: AtomicU64,
    decode_failures: AtomicU64,
    dropped: AtomicU64,
    unconsumed: AtomicU64,
    consumer_panics: AtomicU64,
}

/// Bounded decode-and-deliver stage between the reader and the consumer.
pub struct TickDispatcher {
    decoder: TickDecoder,
    consumer: RwLock<Option<Arc<dyn TickConsumer>>>,
    queue_tx: mpsc::Sender<RawFrame>,
    queue_rx: Mutex<Option<mpsc::Receiver<RawFrame>>>,
    counters: Counters,
}

impl std::fmt::Debug for TickDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickDispatcher")
            .field("has_consumer", &self.has_consumer())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl TickDispatcher {
    /// Create a dispatcher with the given queue capacity (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
        Self {
            decoder: TickDecoder::new(),
            consumer: RwLock::new(None),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            counters: Counters::default(),
        }
    }

    /// Register the tick consumer, replacing any previous one.
    pub fn set_consumer(&self, consumer: Arc<dyn TickConsumer>) {
        *self.consumer.write() = Some(consumer);
    }

    /// Remove the tick consumer.
    pub fn clear_consumer(&self) {
        *self.consumer.write() = None;
    }

    /// Whether a consumer is registered.
    #[must_use]
    pub fn has_consumer(&self) -> bool {
        self.consumer.read().is_some()
    }

    /// Queue a frame for dispatch without waiting.
    ///
    /// Returns `false` if the frame was dropped.
    pub fn enqueue(&self, frame: RawFrame) -> bool {
        match self.queue_tx.try_send(frame) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_ticks_dropped(DropReason::QueueFull, 1);
                if dropped.is_power_of_two() {
                    tracing::warn!(dropped, "Tick queue full, dropping frames");
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Tick queue closed, frame discarded");
                false
            }
        }
    }

    /// Decode one frame and deliver it to the consumer.
    pub fn dispatch(&self, frame: &RawFrame) {
        let started = Instant::now();

        let tick = match self.decoder.decode(frame) {
            Ok(tick) => tick,
            Err(error) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_decode_failure(error.as_str());
                tracing::warn!(%error, frame_len = frame.len(), "Failed to decode frame");
                return;
            }
        };

        let Some(consumer) = self.consumer.read().clone() else {
            self.counters.unconsumed.fetch_add(1, Ordering::Relaxed);
            metrics::record_ticks_dropped(DropReason::NoConsumer, 1);
            return;
        };

        let kind = tick.kind;
        let instrument_id = tick.instrument_id;
        match catch_unwind(AssertUnwindSafe(|| consumer.on_tick(tick))) {
            Ok(()) => {
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                metrics::record_tick_dispatched(kind);
                metrics::record_dispatch_duration(started.elapsed());
            }
            Err(_) => {
                self.counters.consumer_panics.fetch_add(1, Ordering::Relaxed);
                metrics::record_ticks_dropped(DropReason::ConsumerPanic, 1);
                tracing::error!(instrument_id, kind = kind.as_str(), "Tick consumer panicked");
            }
        }
    }

    /// Drain the queue until cancelled.
    ///
    /// Only the first call runs; later calls return immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let Some(mut queue_rx) = self.queue_rx.lock().take() else {
            tracing::warn!("Tick dispatcher already running");
            return;
        };

        tracing::debug!("Tick dispatcher started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Tick dispatcher cancelled");
                    break;
                }
                frame = queue_rx.recv() => {
                    match frame {
                        Some(frame) => self.dispatch(&frame),
                        None => break,
                    }
                }
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            unconsumed: self.counters.unconsumed.load(Ordering::Relaxed),
            consumer_panics: self.counters.consumer_panics.load(Ordering::Relaxed),
        }
    }
}
