//! Base functionality for control frontends
//!
//! MIDI, OSC and RPC frontends all talk to the engine the same two ways:
//! parameter and keyboard changes are pushed straight onto the inbound
//! realtime queue (fire and forget, dropped and logged on overflow), while
//! graph mutations are wrapped as asynchronous events and posted through the
//! dispatcher so they execute on the worker.

use std::sync::Arc;

use crate::dispatch::{
    CompletionCallback, DispatcherError, DispatcherHandle, EngineMutation, Event, EventStatus,
    PostError,
};
use crate::engine::EngineHandle;
use crate::processor::PluginType;
use crate::rt::{KeyboardEventKind, RtEvent, StringValue};
use crate::types::{Clock, ObjectId};

pub struct ControlFrontend {
    engine: Arc<EngineHandle>,
    dispatcher: DispatcherHandle,
    clock: Arc<Clock>,
}

impl ControlFrontend {
    pub fn new(engine: Arc<EngineHandle>, dispatcher: DispatcherHandle, clock: Arc<Clock>) -> Self {
        Self { engine, dispatcher, clock }
    }

    /// The engine handle, for id and parameter lookups
    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Push a parameter change straight onto the realtime queue
    pub fn send_parameter_change_event(
        &self,
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: f32,
    ) {
        let sent = self.engine.send_rt_event(RtEvent::ParameterChange {
            processor_id,
            sample_offset: 0,
            parameter_id,
            value,
        });
        if !sent {
            log::warn!("Parameter change for {} dropped: realtime queue full", processor_id);
        }
    }

    /// Push a string parameter change; the value is moved into the arena and
    /// its ownership rides the event
    pub fn send_string_parameter_change_event(
        &self,
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: &str,
    ) {
        let sent = self.engine.send_rt_event(RtEvent::StringParameterChange {
            processor_id,
            sample_offset: 0,
            parameter_id,
            value: StringValue::new(self.engine.arena(), value),
        });
        if !sent {
            log::warn!(
                "String parameter change for {} dropped: realtime queue full",
                processor_id
            );
        }
    }

    /// Push a keyboard event straight onto the realtime queue
    pub fn send_keyboard_event(
        &self,
        processor_id: ObjectId,
        kind: KeyboardEventKind,
        note: u8,
        value: f32,
    ) {
        let sent = self
            .engine
            .send_rt_event(RtEvent::keyboard(kind, processor_id, 0, note, value));
        if !sent {
            log::warn!("Keyboard event for {} dropped: realtime queue full", processor_id);
        }
    }

    /// Create a chain; completes asynchronously on the worker
    pub fn add_chain(&self, name: &str, channels: usize) -> Result<(), DispatcherError> {
        self.post_mutation(
            EngineMutation::AddChain { name: name.to_string(), channels },
            None,
        )
    }

    /// Delete a chain and everything in it
    pub fn delete_chain(&self, name: &str) -> Result<(), DispatcherError> {
        self.post_mutation(EngineMutation::DeleteChain { name: name.to_string() }, None)
    }

    /// Add a processor to a chain
    pub fn add_processor(
        &self,
        chain: &str,
        uid: &str,
        name: &str,
        plugin_type: PluginType,
    ) -> Result<(), DispatcherError> {
        self.post_mutation(
            EngineMutation::AddProcessor {
                chain: chain.to_string(),
                uid: uid.to_string(),
                name: name.to_string(),
                plugin_type,
            },
            None,
        )
    }

    /// Remove a processor from a chain
    pub fn delete_processor(&self, chain: &str, name: &str) -> Result<(), DispatcherError> {
        self.post_mutation(
            EngineMutation::DeleteProcessor { chain: chain.to_string(), name: name.to_string() },
            None,
        )
    }

    /// Post a graph mutation, optionally with a completion callback
    ///
    /// When the dispatcher has already stopped, the callback (if any) fires
    /// with `Cancelled` before this returns, so completion-once holds on
    /// every path.
    pub fn post_mutation(
        &self,
        mutation: EngineMutation,
        completion: Option<CompletionCallback>,
    ) -> Result<(), DispatcherError> {
        let mut event = Event::engine_mutation(mutation, self.clock.now());
        if let Some(callback) = completion {
            event = event.with_completion(callback);
        }
        match self.dispatcher.post_event(event) {
            Ok(()) => Ok(()),
            Err(PostError(event)) => {
                event.complete(EventStatus::Cancelled);
                Err(DispatcherError::Stopped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ProcessTimings;
    use crate::gc::arena_handle;
    use crate::rt::{rt_event_channel, SharedRtEventSender};
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    fn frontend(capacity: usize) -> (ControlFrontend, crate::rt::RtEventReceiver) {
        let (tx, rx) = rt_event_channel(capacity);
        let engine = Arc::new(EngineHandle::new(
            SharedRtEventSender::new(tx),
            48_000.0,
            arena_handle(),
            Arc::new(ProcessTimings::new()),
            Arc::new(AtomicU64::new(0)),
            Arc::new(AtomicU64::new(0)),
        ));
        let frontend = ControlFrontend::new(engine, DispatcherHandle::detached(), Arc::new(Clock::new()));
        (frontend, rx)
    }

    #[test]
    fn test_parameter_change_goes_straight_to_rt_queue() {
        let (frontend, mut rx) = frontend(8);
        let processor = ObjectId::allocate();
        let parameter = ObjectId::allocate();
        frontend.send_parameter_change_event(processor, parameter, 0.5);

        match rx.pop() {
            Some(RtEvent::ParameterChange { processor_id, parameter_id, value, sample_offset }) => {
                assert_eq!(processor_id, processor);
                assert_eq!(parameter_id, parameter);
                assert_eq!(value, 0.5);
                assert_eq!(sample_offset, 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_overflow_drops_and_counts() {
        let (frontend, _rx) = frontend(2);
        for i in 0..4 {
            frontend.send_parameter_change_event(ObjectId::allocate(), ObjectId::allocate(), i as f32);
        }
        assert_eq!(frontend.engine().rt_overflow_count(), 2);
    }

    #[test]
    fn test_string_parameter_rides_the_event() {
        let (frontend, mut rx) = frontend(8);
        frontend.send_string_parameter_change_event(
            ObjectId::allocate(),
            ObjectId::allocate(),
            "presets/big_hall.json",
        );
        match rx.pop() {
            Some(RtEvent::StringParameterChange { value, .. }) => {
                assert_eq!(value.as_str(), "presets/big_hall.json");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_mutation_on_stopped_dispatcher_fails_with_callback() {
        let (frontend, _rx) = frontend(8);
        let status = Arc::new(Mutex::new(None));
        let status_in_cb = status.clone();
        let result = frontend.post_mutation(
            EngineMutation::AddChain { name: "main".into(), channels: 2 },
            Some(Box::new(move |s| {
                *status_in_cb.lock().unwrap() = Some(s);
            })),
        );
        assert_eq!(result, Err(DispatcherError::Stopped));
        assert_eq!(*status.lock().unwrap(), Some(EventStatus::Cancelled));
    }
}
