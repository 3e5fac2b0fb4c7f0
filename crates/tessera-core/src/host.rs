//! The host-control facade handed to processors
//!
//! A processor never sees the engine or the dispatcher; this handle is its
//! only channel to the outside world. Realtime event output goes through the
//! [`EventSink`] passed into each processing call instead, which keeps the
//! outbound queue single-producer.
//!
//! [`EventSink`]: crate::rt::EventSink

use std::sync::Arc;

use crate::dispatch::dispatcher::{DispatcherHandle, PostError};
use crate::dispatch::event::Event;
use crate::types::{Clock, Time};

/// Capabilities a processor gets at construction
#[derive(Clone)]
pub struct HostControl {
    dispatcher: DispatcherHandle,
    clock: Arc<Clock>,
    sample_rate: f32,
}

impl HostControl {
    pub(crate) fn new(dispatcher: DispatcherHandle, clock: Arc<Clock>, sample_rate: f32) -> Self {
        Self { dispatcher, clock, sample_rate }
    }

    /// A host control that is not connected to a running dispatcher
    ///
    /// Posted events are rejected. Useful for offline tooling and tests that
    /// exercise processors in isolation.
    pub fn offline(sample_rate: f32) -> Self {
        Self {
            dispatcher: DispatcherHandle::detached(),
            clock: Arc::new(Clock::new()),
            sample_rate,
        }
    }

    /// Post a control-plane event to the dispatcher
    pub fn post_event(&self, event: Event) -> Result<(), PostError> {
        self.dispatcher.post_event(event)
    }

    /// Current wall-clock time against the engine epoch
    pub fn time_now(&self) -> Time {
        self.clock.now()
    }

    /// The engine sample rate
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::event::EngineMutation;

    #[test]
    fn test_offline_host_rejects_events() {
        let host = HostControl::offline(48_000.0);
        assert_eq!(host.sample_rate(), 48_000.0);
        let event = Event::engine_mutation(
            EngineMutation::DeleteChain { name: "x".into() },
            host.time_now(),
        );
        assert!(host.post_event(event).is_err());
    }
}
