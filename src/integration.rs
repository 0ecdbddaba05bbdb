use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::concurrency::WaitQueue;
use crate::{VmError, Word};

/// Instrumentation published by a running engine.
///
/// Register events carry the new register value. Snapshot and disassembly payloads
/// are rendered when the event is produced, so they never alias live engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VmEvent {
    InstructionPointerChanged(Word),
    StackPointerChanged(Word),
    CallStackPointerChanged(Word),
    OpcodeChanged(Word),
    StdoutProduced(String),
    StackSnapshot(String),
    MemorySnapshot(String),
    DisassembledInstruction(String),
    PausedStateChanged(bool),
    /// The run failed; always followed by [`VmEvent::Finished`].
    Faulted(VmError),
    /// Last event of every run.
    Finished,
}

impl VmEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VmEvent::Finished)
    }
}

impl fmt::Display for VmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmEvent::InstructionPointerChanged(ip) => write!(f, "ip = {ip}"),
            VmEvent::StackPointerChanged(sp) => write!(f, "sp = {sp}"),
            VmEvent::CallStackPointerChanged(callsp) => write!(f, "callsp = {callsp}"),
            VmEvent::OpcodeChanged(opcode) => write!(f, "opcode = {opcode}"),
            VmEvent::StdoutProduced(text) => write!(f, "stdout: {text}"),
            VmEvent::StackSnapshot(stack) => write!(f, "stack:{stack}"),
            VmEvent::MemorySnapshot(memory) => write!(f, "memory:\n{}", memory.trim_end()),
            VmEvent::DisassembledInstruction(line) => write!(f, "{line}"),
            VmEvent::PausedStateChanged(paused) => write!(f, "paused = {paused}"),
            VmEvent::Faulted(err) => write!(f, "fault: {err}"),
            VmEvent::Finished => write!(f, "finished"),
        }
    }
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<Vec<WaitQueue<VmEvent>>>,
    closed: AtomicBool,
}

/// Fan-out of [`VmEvent`]s to any number of subscribers.
///
/// Each subscriber owns an unbounded queue, so publishing never blocks on a slow or
/// absent consumer. Queues whose [`Subscription`] was dropped are pruned on the next
/// publish.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Subscribing to a closed bus yields an already closed
    /// subscription.
    pub fn subscribe(&self) -> Subscription {
        let queue = WaitQueue::new();
        let mut subscribers = self.inner.subscribers.write();
        if self.is_closed() {
            queue.close();
        } else {
            subscribers.push(queue.clone());
            debug!(subscribers = subscribers.len(), "subscriber attached");
        }
        Subscription { queue }
    }

    pub fn publish(&self, event: VmEvent) {
        let mut stale = false;
        {
            let subscribers = self.inner.subscribers.read();
            for queue in subscribers.iter() {
                if queue.handle_count() > 1 {
                    queue.push(event.clone());
                } else {
                    stale = true;
                }
            }
        }
        if stale {
            let mut subscribers = self.inner.subscribers.write();
            subscribers.retain(|queue| queue.handle_count() > 1);
            debug!(subscribers = subscribers.len(), "pruned dropped subscribers");
        }
    }

    /// Ends the stream. Pending events stay readable; later publishes are discarded.
    pub fn close(&self) {
        let mut subscribers = self.inner.subscribers.write();
        self.inner.closed.store(true, Ordering::SeqCst);
        for queue in subscribers.drain(..) {
            queue.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Subscribers whose [`Subscription`] is still alive.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .iter()
            .filter(|queue| queue.handle_count() > 1)
            .count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Receiving end of one bus registration. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    queue: WaitQueue<VmEvent>,
}

impl Subscription {
    pub fn try_recv(&self) -> Option<VmEvent> {
        self.queue.try_pop()
    }

    /// Blocks for the next event. Returns `None` once the bus is closed and every
    /// pending event has been received.
    pub fn recv(&self) -> Option<VmEvent> {
        self.queue.pop_blocking()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<VmEvent> {
        self.queue.pop_timeout(timeout)
    }

    /// Everything queued right now, without waiting.
    pub fn drain(&self) -> Vec<VmEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl Iterator for Subscription {
    type Item = VmEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_every_event_in_order() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let second = bus.subscribe();
        bus.publish(VmEvent::InstructionPointerChanged(3));
        bus.publish(VmEvent::StdoutProduced("7".into()));
        let expected = vec![
            VmEvent::InstructionPointerChanged(3),
            VmEvent::StdoutProduced("7".into()),
        ];
        assert_eq!(first.drain(), expected);
        assert_eq!(second.drain(), expected);
    }

    #[test]
    fn publishing_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish(VmEvent::Finished);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        let dropped = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(dropped);
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(VmEvent::PausedStateChanged(true));
        assert_eq!(bus.inner.subscribers.read().len(), 1);
        assert_eq!(kept.try_recv(), Some(VmEvent::PausedStateChanged(true)));
    }

    #[test]
    fn close_ends_iteration_after_pending_events() {
        let bus = EventBus::new();
        let subscription = bus.subscribe();
        bus.publish(VmEvent::OpcodeChanged(9));
        bus.close();
        bus.publish(VmEvent::Finished);
        let events: Vec<_> = subscription.collect();
        assert_eq!(events, vec![VmEvent::OpcodeChanged(9)]);
        assert!(bus.subscribe().is_closed());
    }

    #[test]
    fn events_serialize_with_kind_tags() {
        let json = serde_json::to_string(&VmEvent::StackPointerChanged(-1)).unwrap();
        assert_eq!(json, r#"{"kind":"stack_pointer_changed","value":-1}"#);
        let json = serde_json::to_string(&VmEvent::Finished).unwrap();
        assert_eq!(json, r#"{"kind":"finished"}"#);
    }
}
