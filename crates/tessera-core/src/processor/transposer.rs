//! Transposer processor - shifts incoming notes by a semitone offset
//!
//! Note on/off events are re-emitted with the transposed note number; the
//! originals are not forwarded. Other events fall through to the default
//! handling, so the `transpose` parameter itself is set the usual way.

use crate::host::HostControl;
use crate::rt::{EventSink, RtEvent};
use crate::types::{ObjectId, SampleBuffer, MAX_CHANNELS};

use super::{PreProcessor, Processor, ProcessorData};

/// Factory uid of the transposer processor
pub const TRANSPOSER_UID: &str = "tessera.transposer";

const DEFAULT_LABEL: &str = "Transposer";

const MIN_NOTE: i32 = 0;
const MAX_NOTE: i32 = 127;

pub struct Transposer {
    data: ProcessorData,
    transpose_id: ObjectId,
}

impl Transposer {
    pub fn new(host: HostControl) -> Self {
        let mut data =
            ProcessorData::new(host, TRANSPOSER_UID, DEFAULT_LABEL, MAX_CHANNELS, MAX_CHANNELS);
        let transpose_id = data.register_float_parameter(
            "transpose",
            "Transpose",
            0.0,
            -24.0,
            24.0,
            PreProcessor::Clamp,
        );
        Self { data, transpose_id }
    }

    fn transpose_note(&self, note: u8) -> u8 {
        let steps = self.data.float_value(self.transpose_id).round() as i32;
        (note as i32 + steps).clamp(MIN_NOTE, MAX_NOTE) as u8
    }
}

impl Processor for Transposer {
    fn process_event(&mut self, event: RtEvent, output: &mut EventSink) {
        match event {
            RtEvent::NoteOn { processor_id, sample_offset, note, velocity } => {
                output.output_event(RtEvent::NoteOn {
                    processor_id,
                    sample_offset,
                    note: self.transpose_note(note),
                    velocity,
                });
            }
            RtEvent::NoteOff { processor_id, sample_offset, note, velocity } => {
                output.output_event(RtEvent::NoteOff {
                    processor_id,
                    sample_offset,
                    note: self.transpose_note(note),
                    velocity,
                });
            }
            other => self.data.handle_event(other),
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
