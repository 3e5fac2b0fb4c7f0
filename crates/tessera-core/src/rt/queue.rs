//! Wait-free queues across the audio boundary
//!
//! Two independent single-producer/single-consumer rings connect the engine
//! to the control plane: control→engine (inbound) and engine→dispatcher
//! (outbound). Push and pop are O(1), never block, and never allocate; a
//! full queue fails the push and the event is dropped and counted.
//!
//! The inbound producer is shared between several non-realtime threads
//! (dispatcher, worker, frontends) behind a mutex. Contention is short and
//! only ever between non-realtime threads; the audio-side consumer stays
//! wait-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::event::RtEvent;

/// Create a bounded RT event channel
///
/// `capacity` is the number of event slots; the engine configuration
/// validates that it is a power of two.
pub fn rt_event_channel(capacity: usize) -> (RtEventSender, RtEventReceiver) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    (RtEventSender { producer }, RtEventReceiver { consumer })
}

/// Producer half of an RT event channel
pub struct RtEventSender {
    producer: rtrb::Producer<RtEvent>,
}

impl RtEventSender {
    /// Push an event; returns `false` (and drops the event) when full
    #[inline]
    pub fn push(&mut self, event: RtEvent) -> bool {
        self.producer.push(event).is_ok()
    }

    /// Number of free slots
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer half of an RT event channel
pub struct RtEventReceiver {
    consumer: rtrb::Consumer<RtEvent>,
}

impl RtEventReceiver {
    /// Pop the oldest event; `None` when empty
    #[inline]
    pub fn pop(&mut self) -> Option<RtEvent> {
        self.consumer.pop().ok()
    }

    /// Number of events waiting
    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The inbound producer, shareable between non-realtime threads
///
/// Overflowed pushes are counted so the control plane can report them.
#[derive(Clone)]
pub struct SharedRtEventSender {
    inner: Arc<SharedSenderInner>,
}

struct SharedSenderInner {
    producer: Mutex<RtEventSender>,
    overflow: AtomicU64,
}

impl SharedRtEventSender {
    /// Wrap a sender for shared use
    pub fn new(sender: RtEventSender) -> Self {
        Self {
            inner: Arc::new(SharedSenderInner {
                producer: Mutex::new(sender),
                overflow: AtomicU64::new(0),
            }),
        }
    }

    /// Push an event; returns `false` and counts the drop when full
    pub fn send(&self, event: RtEvent) -> bool {
        let pushed = self
            .inner
            .producer
            .lock()
            .expect("RT sender lock poisoned")
            .push(event);
        if !pushed {
            self.inner.overflow.fetch_add(1, Ordering::Relaxed);
        }
        pushed
    }

    /// Number of free slots at this instant
    pub fn slots(&self) -> usize {
        self.inner
            .producer
            .lock()
            .expect("RT sender lock poisoned")
            .slots()
    }

    /// How many events have been dropped on overflow
    pub fn overflow_count(&self) -> u64 {
        self.inner.overflow.load(Ordering::Relaxed)
    }
}

/// The engine's outbound event path, handed to processors per call
///
/// Borrows the outbound producer for the duration of one block, keeping the
/// queue single-producer while letting every processor in the graph emit.
pub struct EventSink<'a> {
    sender: &'a mut RtEventSender,
    dropped: &'a AtomicU64,
}

impl<'a> EventSink<'a> {
    /// Wrap the outbound producer for one block
    pub fn new(sender: &'a mut RtEventSender, dropped: &'a AtomicU64) -> Self {
        Self { sender, dropped }
    }

    /// Emit an event towards the control plane
    ///
    /// Returns `false` and counts the drop when the outbound queue is full.
    pub fn output_event(&mut self, event: RtEvent) -> bool {
        let pushed = self.sender.push(event);
        if !pushed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        pushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;

    fn parameter_change(value: f32, offset: usize) -> RtEvent {
        RtEvent::ParameterChange {
            processor_id: ObjectId::allocate(),
            sample_offset: offset,
            parameter_id: ObjectId::allocate(),
            value,
        }
    }

    #[test]
    fn test_push_pop_round_trip() {
        let (mut tx, mut rx) = rt_event_channel(8);
        let id = ObjectId::allocate();
        assert!(tx.push(RtEvent::NoteOn {
            processor_id: id,
            sample_offset: 17,
            note: 64,
            velocity: 0.5,
        }));
        match rx.pop() {
            Some(RtEvent::NoteOn { processor_id, sample_offset, note, velocity }) => {
                assert_eq!(processor_id, id);
                assert_eq!(sample_offset, 17);
                assert_eq!(note, 64);
                assert_eq!(velocity, 0.5);
            }
            other => panic!("unexpected pop result: {other:?}"),
        }
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_capacity_full_fails_and_preserves_order() {
        let (mut tx, mut rx) = rt_event_channel(4);
        for i in 0..4 {
            assert!(tx.push(parameter_change(i as f32, i)));
        }
        assert!(!tx.push(parameter_change(99.0, 99)));

        for i in 0..4 {
            match rx.pop() {
                Some(RtEvent::ParameterChange { value, .. }) => assert_eq!(value, i as f32),
                other => panic!("unexpected pop result: {other:?}"),
            }
        }
        assert!(rx.pop().is_none());
    }

    #[test]
    fn test_fifo_across_threads() {
        let (mut tx, mut rx) = rt_event_channel(1024);
        std::thread::scope(|scope| {
            scope.spawn(move || {
                for i in 0..1000 {
                    while !tx.push(parameter_change(i as f32, 0)) {
                        std::hint::spin_loop();
                    }
                }
            });
            let mut expected = 0;
            while expected < 1000 {
                if let Some(RtEvent::ParameterChange { value, .. }) = rx.pop() {
                    assert_eq!(value, expected as f32);
                    expected += 1;
                }
            }
        });
    }

    #[test]
    fn test_shared_sender_counts_overflow() {
        let (tx, _rx) = rt_event_channel(2);
        let shared = SharedRtEventSender::new(tx);
        assert!(shared.send(parameter_change(0.0, 0)));
        assert!(shared.send(parameter_change(1.0, 0)));
        assert!(!shared.send(parameter_change(2.0, 0)));
        assert!(!shared.send(parameter_change(3.0, 0)));
        assert_eq!(shared.overflow_count(), 2);
    }

    #[test]
    fn test_sink_counts_drops() {
        let (mut tx, mut rx) = rt_event_channel(1);
        let dropped = AtomicU64::new(0);
        let mut sink = EventSink::new(&mut tx, &dropped);
        assert!(sink.output_event(parameter_change(1.0, 0)));
        assert!(!sink.output_event(parameter_change(2.0, 0)));
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert!(rx.pop().is_some());
        assert!(rx.pop().is_none());
    }
}
