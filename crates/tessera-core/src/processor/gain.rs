//! Gain processor - simple volume control

use crate::host::HostControl;
use crate::rt::EventSink;
use crate::types::{ObjectId, SampleBuffer, MAX_CHANNELS};

use super::{PreProcessor, Processor, ProcessorData};

/// Factory uid of the gain processor
pub const GAIN_UID: &str = "tessera.gain";

const DEFAULT_LABEL: &str = "Gain";

/// Scales the block by a single `gain` parameter, set in decibels
///
/// The parameter's pre-processor converts to a linear factor on write, so
/// the audio path is one multiply per sample.
pub struct Gain {
    data: ProcessorData,
    gain_id: ObjectId,
}

impl Gain {
    pub fn new(host: HostControl) -> Self {
        let mut data = ProcessorData::new(host, GAIN_UID, DEFAULT_LABEL, MAX_CHANNELS, MAX_CHANNELS);
        let gain_id =
            data.register_float_parameter("gain", "Gain", 0.0, -120.0, 24.0, PreProcessor::DbToLin);
        Self { data, gain_id }
    }
}

impl Processor for Gain {
    fn process_audio(
        &mut self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        _output_events: &mut EventSink,
    ) {
        output.copy_from(input);
        output.scale(self.data.float_value(self.gain_id));
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
    use crate::rt::{rt_event_channel, RtEvent};
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_unity_gain_by_default() {
        let mut gain = Gain::new(HostControl::offline(48_000.0));
        let input = SampleBuffer::from_interleaved(2, &[1.0, 0.5, -1.0, 0.25]);
        let mut output = SampleBuffer::new(2, 2);

        let (mut tx, _rx) = rt_event_channel(8);
        let dropped = AtomicU64::new(0);
        let mut sink = EventSink::new(&mut tx, &dropped);
        gain.process_audio(&input, &mut output, &mut sink);

        assert_eq!(output.channel(0), input.channel(0));
        assert_eq!(output.channel(1), input.channel(1));
    }

    #[test]
    fn test_gain_applies_before_next_block() {
        let mut gain = Gain::new(HostControl::offline(48_000.0));
        let gain_id = gain.data().parameter_id("gain").unwrap();

        let (mut tx, _rx) = rt_event_channel(8);
        let dropped = AtomicU64::new(0);
        let mut sink = EventSink::new(&mut tx, &dropped);

        // -6 dB is very nearly a factor of 0.5
        gain.process_event(
            RtEvent::ParameterChange {
                processor_id: gain.data().id(),
                sample_offset: 0,
                parameter_id: gain_id,
                value: -6.0206,
            },
            &mut sink,
        );

        let input = SampleBuffer::from_interleaved(1, &[1.0, -1.0]);
        let mut output = SampleBuffer::new(1, 2);
        gain.process_audio(&input, &mut output, &mut sink);

        assert!((output.channel(0)[0] - 0.5).abs() < 1e-4);
        assert!((output.channel(0)[1] + 0.5).abs() < 1e-4);
    }
}
