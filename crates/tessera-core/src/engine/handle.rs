//! Control-side handle to a running engine
//!
//! The audio thread owns the graph; everything else goes through this
//! handle. It carries the shared inbound event sender, a registry mirroring
//! the graph's names and parameter metadata for lookups, and the counters
//! and telemetry the engine publishes. Graph mutations are executed here,
//! on the worker thread, by allocating and initialising off the audio
//! thread and committing the result with an insertion event.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use basedrop::Handle;
use thiserror::Error;

use crate::host::HostControl;
use crate::processor::{
    create_internal_processor, ParameterDescriptor, PluginType, ProcessorError,
};
use crate::rt::{ChainContainer, ProcessorContainer, RtEvent, SharedRtEventSender};
use crate::types::ObjectId;

use super::chain::ProcessorChain;
use super::timings::{ProcessTimings, TimingReport};

/// Errors from control-side engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Unknown processor: {0}")]
    UnknownProcessor(String),

    #[error("Name already in use: {0}")]
    DuplicateName(String),

    #[error("Unknown internal plugin uid: {0}")]
    UnknownPluginUid(String),

    #[error("Plugin type {0:?} is not supported by this build")]
    UnsupportedPluginType(PluginType),

    #[error(transparent)]
    ProcessorInit(#[from] ProcessorError),

    #[error("Realtime queue full")]
    QueueFull,
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug)]
struct ChainRecord {
    id: ObjectId,
    name: String,
    channels: usize,
}

#[derive(Debug)]
struct ProcessorRecord {
    id: ObjectId,
    name: String,
    label: String,
    chain_id: ObjectId,
    parameters: Vec<ParameterDescriptor>,
}

/// Control-side mirror of the graph structure
#[derive(Debug, Default)]
struct Registry {
    chains: Vec<ChainRecord>,
    processors: Vec<ProcessorRecord>,
}

impl Registry {
    fn chain_by_name(&self, name: &str) -> Option<&ChainRecord> {
        self.chains.iter().find(|c| c.name == name)
    }

    fn processor_by_name(&self, name: &str) -> Option<&ProcessorRecord> {
        self.processors.iter().find(|p| p.name == name)
    }
}

pub struct EngineHandle {
    rt_sender: SharedRtEventSender,
    registry: Mutex<Registry>,
    sample_rate_bits: AtomicU32,
    arena: Handle,
    timings: Arc<ProcessTimings>,
    outbound_dropped: Arc<AtomicU64>,
    unroutable_events: Arc<AtomicU64>,
}

impl EngineHandle {
    pub(crate) fn new(
        rt_sender: SharedRtEventSender,
        sample_rate: f32,
        arena: Handle,
        timings: Arc<ProcessTimings>,
        outbound_dropped: Arc<AtomicU64>,
        unroutable_events: Arc<AtomicU64>,
    ) -> Self {
        Self {
            rt_sender,
            registry: Mutex::new(Registry::default()),
            sample_rate_bits: AtomicU32::new(sample_rate.to_bits()),
            arena,
            timings,
            outbound_dropped,
            unroutable_events,
        }
    }

    /// Push an event onto the inbound realtime queue
    ///
    /// Fire and forget: returns `false` when the queue is full; the drop is
    /// counted.
    pub fn send_rt_event(&self, event: RtEvent) -> bool {
        self.rt_sender.send(event)
    }

    /// Free slots on the inbound realtime queue at this instant
    pub fn rt_slots(&self) -> usize {
        self.rt_sender.slots()
    }

    pub fn sample_rate(&self) -> f32 {
        f32::from_bits(self.sample_rate_bits.load(Ordering::Relaxed))
    }

    /// The reclamation handle used for event payloads headed to this engine
    pub fn arena(&self) -> &Handle {
        &self.arena
    }

    // ── registry queries ────────────────────────────────────────────

    pub fn chain_id(&self, name: &str) -> Option<ObjectId> {
        let registry = self.registry.lock().expect("registry lock poisoned");
        registry.chain_by_name(name).map(|c| c.id)
    }

    pub fn processor_id(&self, name: &str) -> Option<ObjectId> {
        let registry = self.registry.lock().expect("registry lock poisoned");
        registry.processor_by_name(name).map(|p| p.id)
    }

    /// Look up a parameter id on a processor by the pair of names
    pub fn parameter_id(&self, processor_name: &str, parameter_name: &str) -> Option<ObjectId> {
        let registry = self.registry.lock().expect("registry lock poisoned");
        registry
            .processor_by_name(processor_name)?
            .parameters
            .iter()
            .find(|d| d.name == parameter_name)
            .map(|d| d.id)
    }

    /// Parameter metadata for a processor
    pub fn parameter_descriptors(&self, processor_name: &str) -> Option<Vec<ParameterDescriptor>> {
        let registry = self.registry.lock().expect("registry lock poisoned");
        registry
            .processor_by_name(processor_name)
            .map(|p| p.parameters.clone())
    }

    /// Label a processor was created with
    pub fn processor_label(&self, processor_name: &str) -> Option<String> {
        let registry = self.registry.lock().expect("registry lock poisoned");
        registry.processor_by_name(processor_name).map(|p| p.label.clone())
    }

    /// Names of the processors in a chain, in registry order
    pub fn processors_in_chain(&self, chain_name: &str) -> Option<Vec<String>> {
        let registry = self.registry.lock().expect("registry lock poisoned");
        let chain_id = registry.chain_by_name(chain_name)?.id;
        Some(
            registry
                .processors
                .iter()
                .filter(|p| p.chain_id == chain_id)
                .map(|p| p.name.clone())
                .collect(),
        )
    }

    // ── graph mutations (worker thread) ─────────────────────────────

    /// Create an empty chain and commit it to the audio thread
    pub(crate) fn create_chain(&self, name: &str, channels: usize) -> EngineResult<ObjectId> {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        if registry.chain_by_name(name).is_some() {
            return Err(EngineError::DuplicateName(name.to_string()));
        }

        let chain = ProcessorChain::new(name, channels);
        let id = chain.id();
        let container = ChainContainer::new(&self.arena, Box::new(chain));
        if !self.rt_sender.send(RtEvent::InsertChain { sample_offset: 0, chain: container }) {
            return Err(EngineError::QueueFull);
        }

        registry.chains.push(ChainRecord { id, name: name.to_string(), channels });
        log::info!("Created chain {} ({} channels)", name, channels);
        Ok(id)
    }

    /// Remove a chain; the audio thread hands the container back for disposal
    pub(crate) fn delete_chain(&self, name: &str) -> EngineResult<ObjectId> {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let id = registry
            .chain_by_name(name)
            .map(|c| c.id)
            .ok_or_else(|| EngineError::UnknownChain(name.to_string()))?;

        if !self.rt_sender.send(RtEvent::RemoveChain { sample_offset: 0, chain_id: id }) {
            return Err(EngineError::QueueFull);
        }

        registry.chains.retain(|c| c.id != id);
        registry.processors.retain(|p| p.chain_id != id);
        log::info!("Deleted chain {}", name);
        Ok(id)
    }

    /// Create, initialise and commit a processor to a chain
    pub(crate) fn add_processor(
        &self,
        chain_name: &str,
        uid: &str,
        name: &str,
        plugin_type: PluginType,
        host: HostControl,
    ) -> EngineResult<ObjectId> {
        if plugin_type != PluginType::Internal {
            return Err(EngineError::UnsupportedPluginType(plugin_type));
        }

        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let chain_id = registry
            .chain_by_name(chain_name)
            .map(|c| c.id)
            .ok_or_else(|| EngineError::UnknownChain(chain_name.to_string()))?;
        if registry.processor_by_name(name).is_some() {
            return Err(EngineError::DuplicateName(name.to_string()));
        }

        let mut processor = create_internal_processor(uid, host)
            .ok_or_else(|| EngineError::UnknownPluginUid(uid.to_string()))?;
        processor.init(self.sample_rate())?;
        processor.data_mut().set_name(name);

        let id = processor.data().id();
        let label = processor.data().label().to_string();
        let parameters = processor.data().descriptors().to_vec();

        let container = ProcessorContainer::new(&self.arena, processor);
        if !self.rt_sender.send(RtEvent::InsertProcessor {
            sample_offset: 0,
            chain_id,
            processor: container,
        }) {
            return Err(EngineError::QueueFull);
        }

        registry.processors.push(ProcessorRecord {
            id,
            name: name.to_string(),
            label,
            chain_id,
            parameters,
        });
        log::info!("Added processor {} ({}) to chain {}", name, uid, chain_name);
        Ok(id)
    }

    /// Remove a processor; destruction happens after the audio thread
    /// hands the container back
    pub(crate) fn remove_processor(&self, chain_name: &str, name: &str) -> EngineResult<ObjectId> {
        let mut registry = self.registry.lock().expect("registry lock poisoned");
        let chain_id = registry
            .chain_by_name(chain_name)
            .map(|c| c.id)
            .ok_or_else(|| EngineError::UnknownChain(chain_name.to_string()))?;
        let id = registry
            .processor_by_name(name)
            .filter(|p| p.chain_id == chain_id)
            .map(|p| p.id)
            .ok_or_else(|| EngineError::UnknownProcessor(name.to_string()))?;

        if !self.rt_sender.send(RtEvent::RemoveProcessor {
            sample_offset: 0,
            chain_id,
            processor_id: id,
        }) {
            return Err(EngineError::QueueFull);
        }

        registry.processors.retain(|p| p.id != id);
        log::info!("Removed processor {} from chain {}", name, chain_name);
        Ok(id)
    }

    // ── counters and telemetry ──────────────────────────────────────

    /// Events dropped on inbound queue overflow
    pub fn rt_overflow_count(&self) -> u64 {
        self.rt_sender.overflow_count()
    }

    /// Events dropped on outbound queue overflow
    pub fn outbound_dropped_count(&self) -> u64 {
        self.outbound_dropped.load(Ordering::Relaxed)
    }

    /// Events the audio thread could not route to a target
    pub fn unroutable_event_count(&self) -> u64 {
        self.unroutable_events.load(Ordering::Relaxed)
    }

    /// Read and reset the engine's block timing telemetry
    pub fn timing_report(&self) -> TimingReport {
        self.timings.take_report()
    }
}
