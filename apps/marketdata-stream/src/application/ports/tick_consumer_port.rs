//! Tick Consumer Port (Driver Port)
//!
//! Callback invoked for every decoded tick.

use crate::domain::streaming::Tick;

/// Receives decoded ticks.
///
/// Called from the dispatcher task, one tick at a time and in arrival
/// order. A panicking consumer is logged and does not stop dispatch.
pub trait TickConsumer: Send + Sync {
    /// Handle one tick.
    fn on_tick(&self, tick: Tick);
}

impl<F> TickConsumer for F
where
    F: Fn(Tick) + Send + Sync,
{
    fn on_tick(&self, tick: Tick) {
        self(tick);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;
    use crate::domain::streaming::TickKind;

    #[test]
    fn closures_are_consumers() {
        let seen = Arc::new(AtomicI64::new(0));
        let sink = Arc::clone(&seen);
        let consumer: Box<dyn TickConsumer> = Box::new(move |tick: Tick| {
            sink.store(tick.instrument_id, Ordering::SeqCst);
        });

        consumer.on_tick(Tick::new(100, TickKind::Trade));
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }
}
