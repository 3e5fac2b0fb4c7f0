//! The audio-side engine core
//!
//! [`AudioEngine`] is owned by the audio thread (in practice: moved into the
//! I/O collaborator's callback) and executes the per-block protocol. All of
//! its state is mutated either here or through inbound realtime events, so
//! the audio thread never takes a lock and never allocates: containers
//! arriving in or leaving through events carry GC-armed payloads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::processor::Processor;
use crate::rt::{ChainContainer, EventSink, RtEvent, RtEventReceiver, RtEventSender};
use crate::types::{ObjectId, SampleBuffer, Time, MAX_CHANNELS};

use super::chain::ProcessorChain;
use super::timings::ProcessTimings;

/// Most chains one engine can hold
pub const MAX_CHAINS: usize = 16;

pub struct AudioEngine {
    sample_rate: f32,
    block_size: usize,
    block_duration: Time,
    block_budget: Duration,
    chains: Vec<ChainContainer>,
    input_events: RtEventReceiver,
    output_events: RtEventSender,
    scratch_a: SampleBuffer,
    scratch_b: SampleBuffer,
    current_time: Time,
    samples_processed: i64,
    outbound_dropped: Arc<AtomicU64>,
    unroutable_events: Arc<AtomicU64>,
    timings: Arc<ProcessTimings>,
}

impl AudioEngine {
    pub(crate) fn new(
        config: &EngineConfig,
        input_events: RtEventReceiver,
        output_events: RtEventSender,
        outbound_dropped: Arc<AtomicU64>,
        unroutable_events: Arc<AtomicU64>,
        timings: Arc<ProcessTimings>,
    ) -> Self {
        let seconds_per_block = config.block_size as f64 / config.sample_rate as f64;
        Self {
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            block_duration: config.block_duration(),
            block_budget: Duration::from_secs_f64(seconds_per_block),
            chains: Vec::with_capacity(MAX_CHAINS),
            input_events,
            output_events,
            scratch_a: SampleBuffer::new(MAX_CHANNELS, config.block_size),
            scratch_b: SampleBuffer::new(MAX_CHANNELS, config.block_size),
            current_time: Time::ZERO,
            samples_processed: 0,
            outbound_dropped,
            unroutable_events,
            timings,
        }
    }

    /// Set the sample rate; called by the I/O collaborator before the first block
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        let seconds_per_block = self.block_size as f64 / sample_rate as f64;
        self.sample_rate = sample_rate;
        self.block_duration = Time::from_secs_f64(seconds_per_block);
        self.block_budget = Duration::from_secs_f64(seconds_per_block);
        for chain in self.chains.iter_mut() {
            for processor in chain.get_mut().processors_mut() {
                if let Err(e) = processor.init(sample_rate) {
                    log::error!(
                        "Processor {} failed to re-initialise at {} Hz: {}",
                        processor.data().name(),
                        sample_rate,
                        e
                    );
                }
            }
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Update the engine clock from the I/O collaborator
    ///
    /// Called just before [`process_chunk`] each block. Collaborators that
    /// cannot provide timing (offline rendering) may skip it; the engine
    /// then advances its clock by one block duration per chunk.
    ///
    /// [`process_chunk`]: AudioEngine::process_chunk
    pub fn update_time(&mut self, microseconds_since_start: i64, samples_since_start: i64) {
        self.current_time = Time::from_micros(microseconds_since_start);
        self.samples_processed = samples_since_start;
    }

    pub fn current_time(&self) -> Time {
        self.current_time
    }

    pub fn samples_processed(&self) -> i64 {
        self.samples_processed
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Look up a chain by id (audio-thread side)
    pub fn chain(&self, chain_id: ObjectId) -> Option<&ProcessorChain> {
        self.chains
            .iter()
            .map(|c| c.get())
            .find(|c| c.id() == chain_id)
    }

    /// Look up a processor anywhere in the graph (audio-thread side)
    pub fn processor(&self, processor_id: ObjectId) -> Option<&dyn Processor> {
        self.chains
            .iter()
            .find_map(|c| c.get().processor(processor_id))
    }

    /// Process one block of audio
    ///
    /// The totally-ordered per-block sequence: emit the SYNC anchor, drain
    /// and route inbound events, run every chain in configured order, then
    /// advance the block clock. Graph mutations take effect between blocks,
    /// never inside one.
    pub fn process_chunk(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        let started = Instant::now();

        let Self {
            chains,
            input_events,
            output_events,
            scratch_a,
            scratch_b,
            current_time,
            samples_processed,
            block_duration,
            outbound_dropped,
            unroutable_events,
            ..
        } = self;
        let mut events = EventSink::new(output_events, outbound_dropped);

        events.output_event(RtEvent::Sync { sample_offset: 0, time: *current_time });

        while let Some(event) = input_events.pop() {
            Self::apply_rt_event(chains, event, &mut events, unroutable_events);
        }

        output.fill_silence();
        for chain in chains.iter_mut() {
            chain
                .get_mut()
                .process(input, output, scratch_a, scratch_b, &mut events);
        }

        *current_time = *current_time + *block_duration;
        *samples_processed += input.frames() as i64;

        self.timings.record(started.elapsed(), self.block_budget);
    }

    /// Apply one inbound event: graph ops mutate the chain set, everything
    /// else is routed to its target processor
    fn apply_rt_event(
        chains: &mut Vec<ChainContainer>,
        event: RtEvent,
        output_events: &mut EventSink,
        unroutable: &AtomicU64,
    ) {
        match event {
            RtEvent::InsertChain { chain, .. } => {
                if chains.len() < MAX_CHAINS {
                    chains.push(chain);
                } else {
                    unroutable.fetch_add(1, Ordering::Relaxed);
                    output_events
                        .output_event(RtEvent::RemovedChain { sample_offset: 0, chain });
                }
            }
            RtEvent::RemoveChain { chain_id, .. } => {
                match chains.iter().position(|c| c.get().id() == chain_id) {
                    Some(index) => {
                        let chain = chains.remove(index);
                        output_events
                            .output_event(RtEvent::RemovedChain { sample_offset: 0, chain });
                    }
                    None => {
                        unroutable.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            RtEvent::InsertProcessor { chain_id, processor, .. } => {
                match chains.iter_mut().find(|c| c.get().id() == chain_id) {
                    Some(chain) => {
                        if let Err(returned) = chain.get_mut().insert(processor) {
                            unroutable.fetch_add(1, Ordering::Relaxed);
                            output_events.output_event(RtEvent::RemovedProcessor {
                                sample_offset: 0,
                                processor: returned,
                            });
                        }
                    }
                    None => {
                        unroutable.fetch_add(1, Ordering::Relaxed);
                        output_events.output_event(RtEvent::RemovedProcessor {
                            sample_offset: 0,
                            processor,
                        });
                    }
                }
            }
            RtEvent::RemoveProcessor { chain_id, processor_id, .. } => {
                let removed = chains
                    .iter_mut()
                    .find(|c| c.get().id() == chain_id)
                    .and_then(|c| c.get_mut().remove(processor_id));
                match removed {
                    Some(processor) => {
                        output_events.output_event(RtEvent::RemovedProcessor {
                            sample_offset: 0,
                            processor,
                        });
                    }
                    None => {
                        unroutable.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            RtEvent::ReorderProcessor { chain_id, processor_id, position, .. } => {
                let moved = chains
                    .iter_mut()
                    .find(|c| c.get().id() == chain_id)
                    .map(|c| c.get_mut().reorder(processor_id, position))
                    .unwrap_or(false);
                if !moved {
                    unroutable.fetch_add(1, Ordering::Relaxed);
                }
            }
            // Outbound-only records have no business arriving here
            RtEvent::Sync { .. } | RtEvent::RemovedProcessor { .. } | RtEvent::RemovedChain { .. } => {
                unroutable.fetch_add(1, Ordering::Relaxed);
            }
            other => {
                let Some(target) = other.target() else {
                    unroutable.fetch_add(1, Ordering::Relaxed);
                    return;
                };
                match chains.iter_mut().find(|c| c.get().has_processor(target)) {
                    Some(chain) => {
                        if let Some(processor) = chain.get_mut().processor_mut(target) {
                            processor.process_event(other, output_events);
                        }
                    }
                    None => {
                        unroutable.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::arena_handle;
    use crate::host::HostControl;
    use crate::processor::gain::Gain;
    use crate::rt::{rt_event_channel, ProcessorContainer};

    struct Harness {
        engine: AudioEngine,
        to_engine: RtEventSender,
        from_engine: RtEventReceiver,
        unroutable: Arc<AtomicU64>,
    }

    fn harness() -> Harness {
        let config = EngineConfig::default();
        let (to_engine, input_events) = rt_event_channel(config.rt_queue_capacity);
        let (output_events, from_engine) = rt_event_channel(config.rt_queue_capacity);
        let outbound_dropped = Arc::new(AtomicU64::new(0));
        let unroutable = Arc::new(AtomicU64::new(0));
        let engine = AudioEngine::new(
            &config,
            input_events,
            output_events,
            outbound_dropped,
            unroutable.clone(),
            Arc::new(ProcessTimings::new()),
        );
        Harness { engine, to_engine, from_engine, unroutable }
    }

    fn run_block(h: &mut Harness) {
        let input = SampleBuffer::new(2, 64);
        let mut output = SampleBuffer::new(2, 64);
        h.engine.process_chunk(&input, &mut output);
    }

    fn drain_outbound(h: &mut Harness) -> Vec<RtEvent> {
        let mut events = Vec::new();
        while let Some(ev) = h.from_engine.pop() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn test_empty_engine_outputs_silence_and_sync() {
        let mut h = harness();
        let input = SampleBuffer::new(2, 64);
        let mut output = SampleBuffer::from_interleaved(2, &[1.0; 128]);
        h.engine.process_chunk(&input, &mut output);

        assert_eq!(output.peak(), 0.0);
        let events = drain_outbound(&mut h);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RtEvent::Sync { time: Time::ZERO, .. }));

        // The clock advances one block per chunk when update_time is not used
        run_block(&mut h);
        let events = drain_outbound(&mut h);
        match &events[0] {
            RtEvent::Sync { time, .. } => assert_eq!(*time, Time::from_micros(1_333)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_graph_mutation_and_event_routing() {
        let mut h = harness();
        let arena = arena_handle();

        let chain = ProcessorChain::new("main", 2);
        let chain_id = chain.id();
        let gain = Gain::new(HostControl::offline(48_000.0));
        let gain_id = gain.data().id();
        let gain_param = gain.data().parameter_id("gain").unwrap();

        assert!(h.to_engine.push(RtEvent::InsertChain {
            sample_offset: 0,
            chain: ChainContainer::new(&arena, Box::new(chain)),
        }));
        assert!(h.to_engine.push(RtEvent::InsertProcessor {
            sample_offset: 0,
            chain_id,
            processor: ProcessorContainer::new(&arena, Box::new(gain)),
        }));
        // A parameter change queued behind the insertion lands in the same block
        assert!(h.to_engine.push(RtEvent::ParameterChange {
            processor_id: gain_id,
            sample_offset: 0,
            parameter_id: gain_param,
            value: -120.0,
        }));

        run_block(&mut h);
        assert_eq!(h.engine.chain_count(), 1);
        let stored = h.engine.processor(gain_id).unwrap().data().float_domain_value(gain_param);
        assert_eq!(stored, -120.0);
        assert_eq!(h.unroutable.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_removal_hands_processor_back() {
        let mut h = harness();
        let arena = arena_handle();

        let chain = ProcessorChain::new("main", 2);
        let chain_id = chain.id();
        let gain = Gain::new(HostControl::offline(48_000.0));
        let gain_id = gain.data().id();

        h.to_engine.push(RtEvent::InsertChain {
            sample_offset: 0,
            chain: ChainContainer::new(&arena, Box::new(chain)),
        });
        h.to_engine.push(RtEvent::InsertProcessor {
            sample_offset: 0,
            chain_id,
            processor: ProcessorContainer::new(&arena, Box::new(gain)),
        });
        run_block(&mut h);
        drain_outbound(&mut h);

        h.to_engine.push(RtEvent::RemoveProcessor { sample_offset: 0, chain_id, processor_id: gain_id });
        run_block(&mut h);

        assert!(h.engine.processor(gain_id).is_none());
        let events = drain_outbound(&mut h);
        let removed = events.iter().find_map(|e| match e {
            RtEvent::RemovedProcessor { processor, .. } => Some(processor.get().data().id()),
            _ => None,
        });
        assert_eq!(removed, Some(gain_id));
    }

    #[test]
    fn test_unknown_target_is_dropped_and_counted() {
        let mut h = harness();
        h.to_engine.push(RtEvent::NoteOn {
            processor_id: ObjectId::allocate(),
            sample_offset: 0,
            note: 60,
            velocity: 1.0,
        });
        run_block(&mut h);
        assert_eq!(h.unroutable.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_update_time_overrides_block_clock() {
        let mut h = harness();
        h.engine.update_time(5_000, 240);
        run_block(&mut h);
        let events = drain_outbound(&mut h);
        match &events[0] {
            RtEvent::Sync { time, .. } => assert_eq!(*time, Time::from_millis(5)),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(h.engine.samples_processed(), 240 + 64);
    }
}
