//! Fixed-size event records for the realtime queues
//!
//! [`RtEvent`] is the only thing that crosses the audio/non-audio boundary.
//! Every variant is small (pointer-sized payloads at most) so records stay
//! cache friendly in the ring buffer, and every heap payload is a GC-armed
//! [`basedrop::Owned`] wrapper: dropping an event on the audio thread (an
//! unknown target id, a full outbound queue) never touches the allocator.

use basedrop::{Handle, Owned};

use crate::engine::ProcessorChain;
use crate::processor::Processor;
use crate::types::{ObjectId, Time};

/// Background work callback carried by an RT async-work request
///
/// A plain function pointer: requesting work from the audio thread must not
/// allocate. Stateful background jobs belong on the control plane, where
/// events carry boxed closures instead.
pub type RtWorkFn = fn(work_id: u16) -> i32;

/// Keyboard event kinds shared by RT and control-plane events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardEventKind {
    NoteOn,
    NoteOff,
    NoteAftertouch,
    PitchBend,
    Modulation,
    ProgramChange,
}

/// An immutable string whose ownership transfers through the queue
///
/// Dropping the value anywhere defers deallocation to the reclamation
/// thread, so the audio thread can discard it like any other event.
pub struct StringValue(Owned<String>);

impl StringValue {
    /// Allocate a string payload into the reclamation arena
    pub fn new(arena: &Handle, value: &str) -> Self {
        Self(Owned::new(arena, value.to_string()))
    }

    /// The string contents
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for StringValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StringValue").field(&self.as_str()).finish()
    }
}

/// A processor instance in transit between threads
///
/// Created by the worker when a processor is added, handed to the audio
/// thread by an insertion event, and handed back for disposal when removed.
pub struct ProcessorContainer(Owned<Box<dyn Processor>>);

impl ProcessorContainer {
    /// Wrap a processor for queue transfer
    pub fn new(arena: &Handle, processor: Box<dyn Processor>) -> Self {
        Self(Owned::new(arena, processor))
    }

    /// Borrow the processor
    pub fn get(&self) -> &dyn Processor {
        &**self.0
    }

    /// Borrow the processor mutably
    pub fn get_mut(&mut self) -> &mut dyn Processor {
        &mut **self.0
    }
}

impl std::fmt::Debug for ProcessorContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorContainer")
            .field("id", &self.get().data().id())
            .field("name", &self.get().data().name())
            .finish()
    }
}

/// A processor chain in transit between threads
pub struct ChainContainer(Owned<Box<ProcessorChain>>);

impl ChainContainer {
    /// Wrap a chain for queue transfer
    pub fn new(arena: &Handle, chain: Box<ProcessorChain>) -> Self {
        Self(Owned::new(arena, chain))
    }

    /// Borrow the chain
    pub fn get(&self) -> &ProcessorChain {
        &self.0
    }

    /// Borrow the chain mutably
    pub fn get_mut(&mut self) -> &mut ProcessorChain {
        &mut self.0
    }
}

impl std::fmt::Debug for ChainContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainContainer")
            .field("id", &self.get().id())
            .field("name", &self.get().name())
            .finish()
    }
}

/// One record crossing the audio boundary
///
/// Events targeting a processor carry its id and a `sample_offset` in
/// `[0, block_size)` that places them inside the current block. Graph
/// operations target chains instead and are applied atomically when the
/// audio thread drains its inbound queue.
#[derive(Debug)]
pub enum RtEvent {
    // ── parameter plane ─────────────────────────────────────────────
    /// Set a parameter from a normalized-domain float
    ParameterChange {
        processor_id: ObjectId,
        sample_offset: usize,
        parameter_id: ObjectId,
        value: f32,
    },
    /// Set a string parameter; ownership of the value rides the event
    StringParameterChange {
        processor_id: ObjectId,
        sample_offset: usize,
        parameter_id: ObjectId,
        value: StringValue,
    },
    /// A processor announcing a parameter value to the control plane
    ParameterChangeNotification {
        processor_id: ObjectId,
        sample_offset: usize,
        parameter_id: ObjectId,
        value: f32,
    },

    // ── keyboard plane ──────────────────────────────────────────────
    NoteOn {
        processor_id: ObjectId,
        sample_offset: usize,
        note: u8,
        velocity: f32,
    },
    NoteOff {
        processor_id: ObjectId,
        sample_offset: usize,
        note: u8,
        velocity: f32,
    },
    NoteAftertouch {
        processor_id: ObjectId,
        sample_offset: usize,
        note: u8,
        pressure: f32,
    },
    PitchBend {
        processor_id: ObjectId,
        sample_offset: usize,
        value: f32,
    },
    Modulation {
        processor_id: ObjectId,
        sample_offset: usize,
        value: f32,
    },
    ProgramChange {
        processor_id: ObjectId,
        sample_offset: usize,
        program: u8,
    },
    /// Raw MIDI message, up to 4 bytes, for processors that parse it
    WrappedMidi {
        processor_id: ObjectId,
        sample_offset: usize,
        bytes: [u8; 4],
    },

    // ── asynchronous work ───────────────────────────────────────────
    /// A processor asking the worker to run something off the audio thread
    AsyncWorkRequest {
        processor_id: ObjectId,
        sample_offset: usize,
        work_id: u16,
        work: RtWorkFn,
    },
    /// Result of a previously requested job, delivered back to the processor
    AsyncWorkCompletion {
        processor_id: ObjectId,
        sample_offset: usize,
        work_id: u16,
        status: i32,
    },

    // ── graph operations ────────────────────────────────────────────
    InsertChain {
        sample_offset: usize,
        chain: ChainContainer,
    },
    RemoveChain {
        sample_offset: usize,
        chain_id: ObjectId,
    },
    /// A removed chain travelling out for disposal off the audio thread
    RemovedChain {
        sample_offset: usize,
        chain: ChainContainer,
    },
    InsertProcessor {
        sample_offset: usize,
        chain_id: ObjectId,
        processor: ProcessorContainer,
    },
    RemoveProcessor {
        sample_offset: usize,
        chain_id: ObjectId,
        processor_id: ObjectId,
    },
    ReorderProcessor {
        sample_offset: usize,
        chain_id: ObjectId,
        processor_id: ObjectId,
        position: usize,
    },
    /// A removed processor travelling out for disposal off the audio thread
    RemovedProcessor {
        sample_offset: usize,
        processor: ProcessorContainer,
    },

    // ── synchronisation ─────────────────────────────────────────────
    /// Wall-clock anchor emitted by the engine once per block
    Sync { sample_offset: usize, time: Time },
}

impl RtEvent {
    /// Build a keyboard event of the given kind
    ///
    /// `value` is interpreted per kind: velocity, pressure, bend amount,
    /// modulation amount, or ignored for program changes.
    pub fn keyboard(
        kind: KeyboardEventKind,
        processor_id: ObjectId,
        sample_offset: usize,
        note: u8,
        value: f32,
    ) -> Self {
        match kind {
            KeyboardEventKind::NoteOn => RtEvent::NoteOn { processor_id, sample_offset, note, velocity: value },
            KeyboardEventKind::NoteOff => RtEvent::NoteOff { processor_id, sample_offset, note, velocity: value },
            KeyboardEventKind::NoteAftertouch => {
                RtEvent::NoteAftertouch { processor_id, sample_offset, note, pressure: value }
            }
            KeyboardEventKind::PitchBend => RtEvent::PitchBend { processor_id, sample_offset, value },
            KeyboardEventKind::Modulation => RtEvent::Modulation { processor_id, sample_offset, value },
            KeyboardEventKind::ProgramChange => {
                RtEvent::ProgramChange { processor_id, sample_offset, program: note }
            }
        }
    }

    /// The processor this event is routed to, if it targets one
    pub fn target(&self) -> Option<ObjectId> {
        use RtEvent::*;
        match self {
            ParameterChange { processor_id, .. }
            | StringParameterChange { processor_id, .. }
            | ParameterChangeNotification { processor_id, .. }
            | NoteOn { processor_id, .. }
            | NoteOff { processor_id, .. }
            | NoteAftertouch { processor_id, .. }
            | PitchBend { processor_id, .. }
            | Modulation { processor_id, .. }
            | ProgramChange { processor_id, .. }
            | WrappedMidi { processor_id, .. }
            | AsyncWorkRequest { processor_id, .. }
            | AsyncWorkCompletion { processor_id, .. } => Some(*processor_id),
            _ => None,
        }
    }

    /// Position of this event within its block
    pub fn sample_offset(&self) -> usize {
        use RtEvent::*;
        match self {
            ParameterChange { sample_offset, .. }
            | StringParameterChange { sample_offset, .. }
            | ParameterChangeNotification { sample_offset, .. }
            | NoteOn { sample_offset, .. }
            | NoteOff { sample_offset, .. }
            | NoteAftertouch { sample_offset, .. }
            | PitchBend { sample_offset, .. }
            | Modulation { sample_offset, .. }
            | ProgramChange { sample_offset, .. }
            | WrappedMidi { sample_offset, .. }
            | AsyncWorkRequest { sample_offset, .. }
            | AsyncWorkCompletion { sample_offset, .. }
            | InsertChain { sample_offset, .. }
            | RemoveChain { sample_offset, .. }
            | RemovedChain { sample_offset, .. }
            | InsertProcessor { sample_offset, .. }
            | RemoveProcessor { sample_offset, .. }
            | ReorderProcessor { sample_offset, .. }
            | RemovedProcessor { sample_offset, .. }
            | Sync { sample_offset, .. } => *sample_offset,
        }
    }

    /// Whether this is a note/controller event
    pub fn is_keyboard_event(&self) -> bool {
        matches!(
            self,
            RtEvent::NoteOn { .. }
                | RtEvent::NoteOff { .. }
                | RtEvent::NoteAftertouch { .. }
                | RtEvent::PitchBend { .. }
                | RtEvent::Modulation { .. }
                | RtEvent::ProgramChange { .. }
                | RtEvent::WrappedMidi { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_constructor_maps_kinds() {
        let id = ObjectId::allocate();
        let ev = RtEvent::keyboard(KeyboardEventKind::NoteOn, id, 12, 60, 0.8);
        assert!(matches!(
            ev,
            RtEvent::NoteOn { note: 60, sample_offset: 12, .. }
        ));
        assert_eq!(ev.target(), Some(id));
        assert!(ev.is_keyboard_event());

        let ev = RtEvent::keyboard(KeyboardEventKind::ProgramChange, id, 0, 5, 0.0);
        assert!(matches!(ev, RtEvent::ProgramChange { program: 5, .. }));
    }

    #[test]
    fn test_graph_events_have_no_processor_target() {
        let ev = RtEvent::RemoveChain { sample_offset: 0, chain_id: ObjectId::allocate() };
        assert_eq!(ev.target(), None);
        assert!(!ev.is_keyboard_event());
    }

    #[test]
    fn test_sync_carries_block_time() {
        let ev = RtEvent::Sync { sample_offset: 0, time: Time::from_millis(4) };
        match ev {
            RtEvent::Sync { time, .. } => assert_eq!(time, Time::from_millis(4)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_string_payload_transfers_content() {
        let value = StringValue::new(&crate::gc::arena_handle(), "ir/cathedral.wav");
        assert_eq!(value.as_str(), "ir/cathedral.wav");
    }
}
