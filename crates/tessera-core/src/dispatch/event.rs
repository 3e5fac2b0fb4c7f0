//! Control-plane events
//!
//! [`Event`] is the unit of work on the non-realtime side: frontends post
//! them, the dispatcher routes them, the worker executes them. An event owns
//! its payload while it sits in a queue and is destroyed exactly once at its
//! terminal point, after the completion callback (if any) has fired.

use basedrop::Handle;

use crate::processor::PluginType;
use crate::rt::{KeyboardEventKind, RtEvent, StringValue};
use crate::types::{ObjectId, Time};

/// Endpoints addressable by the dispatcher
///
/// `Controller` (the dispatcher itself) and `Worker` are built in; the
/// remaining slots are filled by registered posters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosterId {
    AudioEngine = 0,
    MidiDispatcher = 1,
    OscFrontend = 2,
    Worker = 3,
    Controller = 4,
}

/// Size of the dispatcher's poster table
pub const MAX_POSTERS: usize = 5;

impl PosterId {
    /// Slot index in the poster table
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Terminal status of an event, delivered to completion callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    HandledOk,
    Error,
    Cancelled,
    TimedOut,
    UnrecognizedEvent,
    UnrecognizedReceiver,
}

/// Completion callback, invoked exactly once with a terminal status
pub type CompletionCallback = Box<dyn FnOnce(EventStatus) + Send>;

/// Control-plane background job; may produce a follow-up event to post
pub type AsyncWorkTask = Box<dyn FnOnce() -> Option<Event> + Send>;

/// Structural mutations of the processor graph, executed by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMutation {
    AddChain { name: String, channels: usize },
    DeleteChain { name: String },
    AddProcessor {
        chain: String,
        uid: String,
        name: String,
        plugin_type: PluginType,
    },
    DeleteProcessor { chain: String, name: String },
}

/// The payload of a control-plane event
pub enum EventPayload {
    /// A note/controller action aimed at a processor
    Keyboard {
        processor_id: ObjectId,
        kind: KeyboardEventKind,
        note: u8,
        value: f32,
    },
    /// A parameter change aimed at a processor
    ParameterChange {
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: f32,
    },
    /// A string parameter change aimed at a processor
    StringParameterChange {
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: String,
    },
    /// A parameter value announcement, broadcast to subscribers
    ParameterNotification {
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: f32,
    },
    /// A graph mutation to execute off the audio thread
    EngineMutation(EngineMutation),
    /// A background job to run on the worker
    AsyncWork(AsyncWorkTask),
    /// Result of a processor's background job, headed back to it
    AsyncWorkCompletion {
        processor_id: ObjectId,
        work_id: u16,
        status: i32,
    },
}

impl std::fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventPayload::Keyboard { processor_id, kind, note, value } => f
                .debug_struct("Keyboard")
                .field("processor_id", processor_id)
                .field("kind", kind)
                .field("note", note)
                .field("value", value)
                .finish(),
            EventPayload::ParameterChange { processor_id, parameter_id, value } => f
                .debug_struct("ParameterChange")
                .field("processor_id", processor_id)
                .field("parameter_id", parameter_id)
                .field("value", value)
                .finish(),
            EventPayload::StringParameterChange { processor_id, parameter_id, value } => f
                .debug_struct("StringParameterChange")
                .field("processor_id", processor_id)
                .field("parameter_id", parameter_id)
                .field("value", value)
                .finish(),
            EventPayload::ParameterNotification { processor_id, parameter_id, value } => f
                .debug_struct("ParameterNotification")
                .field("processor_id", processor_id)
                .field("parameter_id", parameter_id)
                .field("value", value)
                .finish(),
            EventPayload::EngineMutation(m) => f.debug_tuple("EngineMutation").field(m).finish(),
            EventPayload::AsyncWork(_) => f.write_str("AsyncWork(..)"),
            EventPayload::AsyncWorkCompletion { processor_id, work_id, status } => f
                .debug_struct("AsyncWorkCompletion")
                .field("processor_id", processor_id)
                .field("work_id", work_id)
                .field("status", status)
                .finish(),
        }
    }
}

/// One unit of control-plane work
pub struct Event {
    receiver: PosterId,
    time: Time,
    payload: EventPayload,
    completion: Option<CompletionCallback>,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("receiver", &self.receiver)
            .field("time", &self.time)
            .field("payload", &self.payload)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

impl Event {
    fn new(payload: EventPayload, time: Time) -> Self {
        Self {
            receiver: PosterId::Controller,
            time,
            payload,
            completion: None,
        }
    }

    /// A keyboard action for `processor_id`, due at `time`
    pub fn keyboard(
        processor_id: ObjectId,
        kind: KeyboardEventKind,
        note: u8,
        value: f32,
        time: Time,
    ) -> Self {
        Self::new(EventPayload::Keyboard { processor_id, kind, note, value }, time)
    }

    /// A parameter change for `processor_id`, due at `time`
    pub fn parameter_change(
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: f32,
        time: Time,
    ) -> Self {
        Self::new(
            EventPayload::ParameterChange { processor_id, parameter_id, value },
            time,
        )
    }

    /// A string parameter change for `processor_id`, due at `time`
    pub fn string_parameter_change(
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: impl Into<String>,
        time: Time,
    ) -> Self {
        Self::new(
            EventPayload::StringParameterChange {
                processor_id,
                parameter_id,
                value: value.into(),
            },
            time,
        )
    }

    /// A parameter value announcement for broadcast
    pub fn parameter_notification(
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: f32,
        time: Time,
    ) -> Self {
        Self::new(
            EventPayload::ParameterNotification { processor_id, parameter_id, value },
            time,
        )
    }

    /// A graph mutation, executed asynchronously by the worker
    pub fn engine_mutation(mutation: EngineMutation, time: Time) -> Self {
        Self::new(EventPayload::EngineMutation(mutation), time)
    }

    /// A background job, executed asynchronously by the worker
    pub fn async_work(task: AsyncWorkTask, time: Time) -> Self {
        Self::new(EventPayload::AsyncWork(task), time)
    }

    /// A job result headed back to the requesting processor
    ///
    /// The time is stamped when the worker posts it.
    pub fn async_work_completion(processor_id: ObjectId, work_id: u16, status: i32) -> Self {
        Self::new(
            EventPayload::AsyncWorkCompletion { processor_id, work_id, status },
            Time::ZERO,
        )
    }

    /// Attach a completion callback, invoked exactly once at the terminal point
    pub fn with_completion(mut self, callback: CompletionCallback) -> Self {
        self.completion = Some(callback);
        self
    }

    pub fn receiver(&self) -> PosterId {
        self.receiver
    }

    pub fn set_receiver(&mut self, receiver: PosterId) {
        self.receiver = receiver;
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub(crate) fn set_time(&mut self, time: Time) {
        self.time = time;
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Whether this event must run on the worker thread
    pub fn process_asynchronously(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::EngineMutation(_) | EventPayload::AsyncWork(_)
        )
    }

    /// Whether this event converts to an [`RtEvent`] for the engine
    pub fn maps_to_rt_event(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::Keyboard { .. }
                | EventPayload::ParameterChange { .. }
                | EventPayload::StringParameterChange { .. }
                | EventPayload::AsyncWorkCompletion { .. }
        )
    }

    pub fn is_keyboard_event(&self) -> bool {
        matches!(self.payload, EventPayload::Keyboard { .. })
    }

    pub fn is_parameter_notification(&self) -> bool {
        matches!(self.payload, EventPayload::ParameterNotification { .. })
    }

    /// Convert to the realtime record for the given in-block position
    ///
    /// String payloads are allocated into the reclamation arena here, on the
    /// dispatcher thread. Returns `None` for payloads with no RT mapping.
    pub fn to_rt_event(&self, sample_offset: usize, arena: &Handle) -> Option<RtEvent> {
        match &self.payload {
            EventPayload::Keyboard { processor_id, kind, note, value } => Some(RtEvent::keyboard(
                *kind,
                *processor_id,
                sample_offset,
                *note,
                *value,
            )),
            EventPayload::ParameterChange { processor_id, parameter_id, value } => {
                Some(RtEvent::ParameterChange {
                    processor_id: *processor_id,
                    sample_offset,
                    parameter_id: *parameter_id,
                    value: *value,
                })
            }
            EventPayload::StringParameterChange { processor_id, parameter_id, value } => {
                Some(RtEvent::StringParameterChange {
                    processor_id: *processor_id,
                    sample_offset,
                    parameter_id: *parameter_id,
                    value: StringValue::new(arena, value),
                })
            }
            EventPayload::AsyncWorkCompletion { processor_id, work_id, status } => {
                Some(RtEvent::AsyncWorkCompletion {
                    processor_id: *processor_id,
                    sample_offset,
                    work_id: *work_id,
                    status: *status,
                })
            }
            _ => None,
        }
    }

    /// Lift an engine-emitted realtime record into a control-plane event
    ///
    /// `timestamp` is the wall-clock time reconstructed from the record's
    /// sample offset. Records the dispatcher handles structurally (SYNC,
    /// removed containers) return `None`.
    pub fn from_rt_event(event: &RtEvent, timestamp: Time) -> Option<Event> {
        match event {
            RtEvent::NoteOn { processor_id, note, velocity, .. } => Some(Event::keyboard(
                *processor_id,
                KeyboardEventKind::NoteOn,
                *note,
                *velocity,
                timestamp,
            )),
            RtEvent::NoteOff { processor_id, note, velocity, .. } => Some(Event::keyboard(
                *processor_id,
                KeyboardEventKind::NoteOff,
                *note,
                *velocity,
                timestamp,
            )),
            RtEvent::NoteAftertouch { processor_id, note, pressure, .. } => Some(Event::keyboard(
                *processor_id,
                KeyboardEventKind::NoteAftertouch,
                *note,
                *pressure,
                timestamp,
            )),
            RtEvent::PitchBend { processor_id, value, .. } => Some(Event::keyboard(
                *processor_id,
                KeyboardEventKind::PitchBend,
                0,
                *value,
                timestamp,
            )),
            RtEvent::Modulation { processor_id, value, .. } => Some(Event::keyboard(
                *processor_id,
                KeyboardEventKind::Modulation,
                0,
                *value,
                timestamp,
            )),
            RtEvent::ProgramChange { processor_id, program, .. } => Some(Event::keyboard(
                *processor_id,
                KeyboardEventKind::ProgramChange,
                *program,
                0.0,
                timestamp,
            )),
            RtEvent::ParameterChangeNotification { processor_id, parameter_id, value, .. } => {
                Some(Event::parameter_notification(
                    *processor_id,
                    *parameter_id,
                    *value,
                    timestamp,
                ))
            }
            RtEvent::AsyncWorkRequest { processor_id, work_id, work, .. } => {
                let (processor_id, work_id, work) = (*processor_id, *work_id, *work);
                Some(Event::async_work(
                    Box::new(move || {
                        let status = work(work_id);
                        Some(Event::async_work_completion(processor_id, work_id, status))
                    }),
                    timestamp,
                ))
            }
            _ => None,
        }
    }

    /// Invoke the completion callback (if any) and consume the event
    pub(crate) fn complete(mut self, status: EventStatus) {
        if let Some(callback) = self.completion.take() {
            callback(status);
        }
    }

    /// Split the event for execution; the caller owns the callback
    pub(crate) fn into_parts(self) -> (PosterId, Time, EventPayload, Option<CompletionCallback>) {
        (self.receiver, self.time, self.payload, self.completion)
    }
}

/// Outcome of handing an event to a poster
pub enum PosterOutcome {
    /// The poster is done; the dispatcher completes and destroys the event
    Handled(Event, EventStatus),
    /// The poster took ownership; someone else reaches the terminal point
    Consumed,
}

/// An endpoint that receives events routed by id
pub trait EventPoster: Send {
    /// Handle an event addressed to this poster
    fn process(&mut self, event: Event) -> PosterOutcome;

    /// The slot this poster occupies
    fn poster_id(&self) -> PosterId;
}

/// A subscriber to broadcast notifications
///
/// Listeners never own the event; each registered listener observes every
/// notification in subscription order.
pub trait EventListener: Send {
    fn notify(&mut self, event: &Event);
}
