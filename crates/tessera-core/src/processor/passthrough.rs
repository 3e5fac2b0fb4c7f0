//! Passthrough processor - copies audio and forwards events
//!
//! Useful as a chain terminator in tests and as the simplest example of a
//! processor that re-emits events: every keyboard or wrapped-MIDI event
//! routed to it is forwarded unchanged to the outbound queue, where the
//! dispatcher broadcasts it to subscribers.

use crate::host::HostControl;
use crate::rt::{EventSink, RtEvent};
use crate::types::{SampleBuffer, MAX_CHANNELS};

use super::{Processor, ProcessorData};

/// Factory uid of the passthrough processor
pub const PASSTHROUGH_UID: &str = "tessera.passthrough";

const DEFAULT_LABEL: &str = "Passthrough";

pub struct Passthrough {
    data: ProcessorData,
}

impl Passthrough {
    pub fn new(host: HostControl) -> Self {
        Self {
            data: ProcessorData::new(host, PASSTHROUGH_UID, DEFAULT_LABEL, MAX_CHANNELS, MAX_CHANNELS),
        }
    }
}

impl Processor for Passthrough {
    fn process_event(&mut self, event: RtEvent, output: &mut EventSink) {
        if event.is_keyboard_event() {
            output.output_event(event);
        } else {
            self.data.handle_event(event);
        }
    }

    fn process_audio(
        &mut self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        _output_events: &mut EventSink,
    ) {
        output.copy_from(input);
    }

    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt::rt_event_channel;
    use crate::types::ObjectId;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_audio_is_copied_unchanged() {
        let mut p = Passthrough::new(HostControl::offline(48_000.0));
        let input = SampleBuffer::from_interleaved(2, &[0.1, 0.2, 0.3, 0.4]);
        let mut output = SampleBuffer::new(2, 2);

        let (mut tx, _rx) = rt_event_channel(8);
        let dropped = AtomicU64::new(0);
        let mut sink = EventSink::new(&mut tx, &dropped);
        p.process_audio(&input, &mut output, &mut sink);

        assert_eq!(output.channel(0), input.channel(0));
        assert_eq!(output.channel(1), input.channel(1));
    }

    #[test]
    fn test_keyboard_events_are_forwarded() {
        let mut p = Passthrough::new(HostControl::offline(48_000.0));
        let id = p.data().id();

        let (mut tx, mut rx) = rt_event_channel(8);
        let dropped = AtomicU64::new(0);
        let mut sink = EventSink::new(&mut tx, &dropped);

        p.process_event(
            RtEvent::NoteOn { processor_id: id, sample_offset: 5, note: 61, velocity: 0.9 },
            &mut sink,
        );

        match rx.pop() {
            Some(RtEvent::NoteOn { note, sample_offset, .. }) => {
                assert_eq!(note, 61);
                assert_eq!(sample_offset, 5);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parameter_events_are_not_forwarded() {
        let mut p = Passthrough::new(HostControl::offline(48_000.0));
        let id = p.data().id();

        let (mut tx, mut rx) = rt_event_channel(8);
        let dropped = AtomicU64::new(0);
        let mut sink = EventSink::new(&mut tx, &dropped);

        p.process_event(
            RtEvent::ParameterChange {
                processor_id: id,
                sample_offset: 0,
                parameter_id: ObjectId::allocate(),
                value: 0.5,
            },
            &mut sink,
        );
        assert!(rx.pop().is_none());
    }
}
