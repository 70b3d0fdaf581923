//! Per-run event fan-out.
//!
//! Every subscriber gets its own bounded channel. Publishing never blocks:
//! a full sink drops that event for that sink only, so one stalled client
//! cannot slow the executor or its other subscribers. Persisted events in
//! the store keep the full sequence; the bus is the lossy live view.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use arb_store::Event;

/// Buffered events per sink before overflow dropping kicks in.
pub const SINK_CAPACITY: usize = 100;

struct EventSink {
    id: u64,
    tx: mpsc::Sender<Event>,
}

/// A live event feed for one run. Dropping the subscription without
/// unsubscribing leaves a dead sink that publishes drop silently until
/// `unsubscribe` or `close_all` reaps it.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<Event>,
}

#[derive(Default)]
pub struct EventBus {
    sinks: RwLock<HashMap<String, Vec<EventSink>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new sink for a run and return its receiving half.
    pub fn subscribe(&self, run_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sinks
            .write()
            .entry(run_id.to_string())
            .or_default()
            .push(EventSink { id, tx });
        Subscription { id, rx }
    }

    /// Close and remove one sink. Unknown run or sink ids are silent
    /// no-ops. The run's entry is dropped when its last sink goes.
    pub fn unsubscribe(&self, run_id: &str, sink_id: u64) {
        let mut sinks = self.sinks.write();
        if let Some(list) = sinks.get_mut(run_id) {
            list.retain(|s| s.id != sink_id);
            if list.is_empty() {
                sinks.remove(run_id);
            }
        }
    }

    /// Deliver an event to every sink of the run. Non-blocking: a full
    /// sink loses this event; other sinks are unaffected. Publishing to a
    /// run with no subscribers is a no-op.
    pub fn publish(&self, run_id: &str, event: &Event) {
        let sinks = self.sinks.read();
        let Some(list) = sinks.get(run_id) else {
            return;
        };
        for sink in list {
            if let Err(mpsc::error::TrySendError::Full(_)) = sink.tx.try_send(event.clone()) {
                tracing::debug!(
                    run_id,
                    sink_id = sink.id,
                    event_type = %event.event_type,
                    "slow subscriber, dropping event"
                );
            }
        }
    }

    /// Close every sink for a run and drop its entry. Called by the
    /// executor when the run reaches a terminal state.
    pub fn close_all(&self, run_id: &str) {
        self.sinks.write().remove(run_id);
    }

    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.sinks.read().get(run_id).map(|l| l.len()).unwrap_or(0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use arb_store::EventType;

    fn ev(run_id: &str, n: usize) -> Event {
        Event::new(
            run_id,
            EventType::TextDelta,
            serde_json::json!({ "seq": n }),
        )
    }

    #[tokio::test]
    async fn fan_out_preserves_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("r1");
        let mut b = bus.subscribe("r1");

        for n in 0..5 {
            bus.publish("r1", &ev("r1", n));
        }

        for n in 0..5 {
            assert_eq!(a.rx.recv().await.unwrap().data["seq"], n);
            assert_eq!(b.rx.recv().await.unwrap().data["seq"], n);
        }
    }

    #[tokio::test]
    async fn runs_are_isolated() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("r1");
        let mut b = bus.subscribe("r2");

        bus.publish("r1", &ev("r1", 1));
        bus.close_all("r1");
        bus.close_all("r2");

        assert_eq!(a.rx.recv().await.unwrap().run_id, "r1");
        assert!(a.rx.recv().await.is_none());
        // r2's subscriber sees nothing but the close.
        assert!(b.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_overflow_only() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe("r1");
        let mut fast = bus.subscribe("r1");

        // Publish double the sink capacity; the fast reader drains as we go.
        let total = SINK_CAPACITY * 2;
        let mut fast_seen = 0;
        for n in 0..total {
            bus.publish("r1", &ev("r1", n));
            // Drain fast concurrently so its buffer never fills.
            while let Ok(e) = fast.rx.try_recv() {
                assert_eq!(e.data["seq"], fast_seen);
                fast_seen += 1;
            }
        }
        bus.close_all("r1");
        while let Some(e) = fast.rx.recv().await {
            assert_eq!(e.data["seq"], fast_seen);
            fast_seen += 1;
        }
        assert_eq!(fast_seen, total);

        // The slow reader kept only the first SINK_CAPACITY events, in order.
        let mut slow_seen = 0;
        while let Some(e) = slow.rx.recv().await {
            assert_eq!(e.data["seq"], slow_seen);
            slow_seen += 1;
        }
        assert_eq!(slow_seen, SINK_CAPACITY);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.publish("ghost", &ev("ghost", 0));
        assert_eq!(bus.subscriber_count("ghost"), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_sink_and_entry() {
        let bus = EventBus::new();
        let sub = bus.subscribe("r1");
        assert_eq!(bus.subscriber_count("r1"), 1);

        bus.unsubscribe("r1", sub.id);
        assert_eq!(bus.subscriber_count("r1"), 0);

        // Unknown sink or run: silent no-ops.
        bus.unsubscribe("r1", 999);
        bus.unsubscribe("ghost", 0);
    }

    #[tokio::test]
    async fn close_all_closes_receivers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("r1");
        bus.publish("r1", &ev("r1", 0));
        bus.close_all("r1");

        // Buffered event still readable, then the channel closes.
        assert!(a.rx.recv().await.is_some());
        assert!(a.rx.recv().await.is_none());
        assert_eq!(bus.subscriber_count("r1"), 0);
    }
}
