//! Processor chains
//!
//! A chain is one named signal path: an ordered list of processors with a
//! fixed channel count. The slot vector is preallocated so insert, remove
//! and reorder are allocation-free on the audio thread; the order the audio
//! thread observes is always the order committed by the last completed
//! graph operation.

use crate::processor::Processor;
use crate::rt::{EventSink, ProcessorContainer};
use crate::types::{ObjectId, SampleBuffer};

/// Most processors one chain can hold
pub const MAX_CHAIN_PROCESSORS: usize = 32;

pub struct ProcessorChain {
    id: ObjectId,
    name: String,
    channels: usize,
    processors: Vec<ProcessorContainer>,
}

impl ProcessorChain {
    /// Create an empty chain with slot capacity reserved up front
    pub fn new(name: &str, channels: usize) -> Self {
        Self {
            id: ObjectId::allocate(),
            name: name.to_string(),
            channels,
            processors: Vec::with_capacity(MAX_CHAIN_PROCESSORS),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Append a processor; hands the container back when the chain is full
    pub fn insert(&mut self, processor: ProcessorContainer) -> Result<(), ProcessorContainer> {
        if self.processors.len() >= MAX_CHAIN_PROCESSORS {
            return Err(processor);
        }
        self.processors.push(processor);
        Ok(())
    }

    /// Take a processor out of the chain
    pub fn remove(&mut self, processor_id: ObjectId) -> Option<ProcessorContainer> {
        let index = self
            .processors
            .iter()
            .position(|p| p.get().data().id() == processor_id)?;
        Some(self.processors.remove(index))
    }

    /// Move a processor to a new position in the chain
    pub fn reorder(&mut self, processor_id: ObjectId, position: usize) -> bool {
        let Some(index) = self
            .processors
            .iter()
            .position(|p| p.get().data().id() == processor_id)
        else {
            return false;
        };
        let processor = self.processors.remove(index);
        let position = position.min(self.processors.len());
        self.processors.insert(position, processor);
        true
    }

    pub fn has_processor(&self, processor_id: ObjectId) -> bool {
        self.processors
            .iter()
            .any(|p| p.get().data().id() == processor_id)
    }

    pub fn processor_mut(&mut self, processor_id: ObjectId) -> Option<&mut dyn Processor> {
        self.processors
            .iter_mut()
            .find(|p| p.get().data().id() == processor_id)
            .map(|p| p.get_mut())
    }

    pub fn processor(&self, processor_id: ObjectId) -> Option<&dyn Processor> {
        self.processors
            .iter()
            .find(|p| p.get().data().id() == processor_id)
            .map(|p| p.get())
    }

    /// Iterate the processors in chain order
    pub fn processors_mut(&mut self) -> impl Iterator<Item = &mut dyn Processor> + '_ {
        self.processors.iter_mut().map(|p| p.get_mut())
    }

    /// Run one block through the chain and sum the result into `output`
    ///
    /// `scratch_a`/`scratch_b` are engine-owned ping-pong buffers reshaped
    /// to this chain's channel count. An empty chain passes its input
    /// channels straight through.
    pub fn process(
        &mut self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        scratch_a: &mut SampleBuffer,
        scratch_b: &mut SampleBuffer,
        output_events: &mut EventSink,
    ) {
        let frames = input.frames();
        let channels = self.channels.min(output.channel_count());
        scratch_a.reshape(channels, frames);
        scratch_b.reshape(channels, frames);

        scratch_a.fill_silence();
        for ch in 0..channels.min(input.channel_count()) {
            scratch_a.channel_mut(ch).copy_from_slice(input.channel(ch));
        }

        for processor in &mut self.processors {
            processor
                .get_mut()
                .process_audio(scratch_a, scratch_b, output_events);
            std::mem::swap(scratch_a, scratch_b);
        }

        output.add_from(scratch_a);
    }
}
