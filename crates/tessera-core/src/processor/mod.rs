//! The processor contract and its bundled implementations
//!
//! A [`Processor`] is one audio-processing unit in a chain: it consumes a
//! block of audio and the events routed to it, and may emit events of its
//! own. The trait is the single polymorphic boundary in the engine; shared
//! behaviour (identity, parameter storage, default event handling) lives in
//! [`ProcessorData`] by composition.

pub mod gain;
pub mod parameters;
pub mod passthrough;
pub mod transposer;

use thiserror::Error;

use crate::host::HostControl;
use crate::rt::{EventSink, RtEvent};
use crate::types::{ObjectId, SampleBuffer};

pub use parameters::{ParameterDescriptor, ParameterType, ParameterValue, PreProcessor};

/// How a processor is implemented and loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    /// Built into this crate
    Internal,
    /// Hosted through an external VST2 wrapper
    Vst2,
    /// Hosted through an external LV2 wrapper
    Lv2,
}

/// Errors from processor setup
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Processor initialisation failed: {0}")]
    InitFailed(String),

    #[error("Sample rate {0} Hz is not supported")]
    UnsupportedSampleRate(f32),
}

/// One audio-processing unit
///
/// All three processing methods run on the audio thread and must not
/// allocate, lock or block. Events are delivered before `process_audio`
/// within the same block, so a parameter change at offset 0 is audible in
/// the block it arrives in.
pub trait Processor: Send {
    /// Prepare for processing at the given sample rate
    fn init(&mut self, _sample_rate: f32) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Handle one event routed to this processor
    ///
    /// The default stores parameter changes into the value slots; overriders
    /// fall back to [`ProcessorData::handle_event`] for anything they do not
    /// treat specially.
    fn process_event(&mut self, event: RtEvent, _output: &mut EventSink) {
        self.data_mut().handle_event(event);
    }

    /// Process one block of audio
    fn process_audio(
        &mut self,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
        output_events: &mut EventSink,
    );

    /// Shared identity and parameter storage
    fn data(&self) -> &ProcessorData;

    /// Shared identity and parameter storage, mutable
    fn data_mut(&mut self) -> &mut ProcessorData;
}

/// Identity, channel metadata and parameter storage shared by processors
pub struct ProcessorData {
    id: ObjectId,
    name: String,
    label: String,
    input_channels: usize,
    output_channels: usize,
    descriptors: Vec<ParameterDescriptor>,
    values: Vec<ParameterValue>,
    host: HostControl,
}

impl ProcessorData {
    /// Create processor data with a default (factory) name
    pub fn new(host: HostControl, name: &str, label: &str, input_channels: usize, output_channels: usize) -> Self {
        Self {
            id: ObjectId::allocate(),
            name: name.to_string(),
            label: label.to_string(),
            input_channels,
            output_channels,
            descriptors: Vec::new(),
            values: Vec::new(),
            host,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename to the engine-unique instance name
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// The host facade this processor was constructed with
    pub fn host(&self) -> &HostControl {
        &self.host
    }

    fn register_parameter(&mut self, descriptor: ParameterDescriptor) -> ObjectId {
        let id = descriptor.id;
        self.values.push(ParameterValue::from_descriptor(&descriptor));
        self.descriptors.push(descriptor);
        id
    }

    /// Register a float parameter, returning its id
    pub fn register_float_parameter(
        &mut self,
        name: &str,
        label: &str,
        default: f32,
        min: f32,
        max: f32,
        preprocessor: PreProcessor,
    ) -> ObjectId {
        self.register_parameter(ParameterDescriptor {
            id: ObjectId::allocate(),
            name: name.to_string(),
            label: label.to_string(),
            kind: ParameterType::Float,
            min,
            max,
            default,
            preprocessor,
        })
    }

    /// Register an integer parameter, returning its id
    pub fn register_int_parameter(
        &mut self,
        name: &str,
        label: &str,
        default: i32,
        min: i32,
        max: i32,
    ) -> ObjectId {
        self.register_parameter(ParameterDescriptor {
            id: ObjectId::allocate(),
            name: name.to_string(),
            label: label.to_string(),
            kind: ParameterType::Int,
            min: min as f32,
            max: max as f32,
            default: default as f32,
            preprocessor: PreProcessor::Clamp,
        })
    }

    /// Register a boolean parameter, returning its id
    pub fn register_bool_parameter(&mut self, name: &str, label: &str, default: bool) -> ObjectId {
        self.register_parameter(ParameterDescriptor {
            id: ObjectId::allocate(),
            name: name.to_string(),
            label: label.to_string(),
            kind: ParameterType::Bool,
            min: 0.0,
            max: 1.0,
            default: if default { 1.0 } else { 0.0 },
            preprocessor: PreProcessor::Clamp,
        })
    }

    /// Register a string parameter, returning its id
    pub fn register_string_parameter(&mut self, name: &str, label: &str) -> ObjectId {
        self.register_parameter(ParameterDescriptor {
            id: ObjectId::allocate(),
            name: name.to_string(),
            label: label.to_string(),
            kind: ParameterType::Str,
            min: 0.0,
            max: 0.0,
            default: 0.0,
            preprocessor: PreProcessor::Clamp,
        })
    }

    /// The ordered parameter list
    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        &self.descriptors
    }

    /// Look up a parameter id by name
    pub fn parameter_id(&self, name: &str) -> Option<ObjectId> {
        self.descriptors.iter().find(|d| d.name == name).map(|d| d.id)
    }

    fn slot_index(&self, parameter_id: ObjectId) -> Option<usize> {
        self.descriptors.iter().position(|d| d.id == parameter_id)
    }

    /// Default event handling: store parameter changes, ignore the rest
    pub fn handle_event(&mut self, event: RtEvent) {
        match event {
            RtEvent::ParameterChange { parameter_id, value, .. } => {
                if let Some(index) = self.slot_index(parameter_id) {
                    self.values[index].set_from_float(&self.descriptors[index], value);
                }
            }
            RtEvent::StringParameterChange { parameter_id, value, .. } => {
                if let Some(index) = self.slot_index(parameter_id) {
                    if let ParameterValue::Str(slot) = &mut self.values[index] {
                        // The replaced value defers its drop to the collector
                        *slot = Some(value);
                    }
                }
            }
            _ => {}
        }
    }

    /// Store a self-initiated change and announce it to the control plane
    pub fn set_parameter_and_notify(
        &mut self,
        parameter_id: ObjectId,
        value: f32,
        output: &mut EventSink,
    ) {
        if let Some(index) = self.slot_index(parameter_id) {
            self.values[index].set_from_float(&self.descriptors[index], value);
            output.output_event(RtEvent::ParameterChangeNotification {
                processor_id: self.id,
                sample_offset: 0,
                parameter_id,
                value,
            });
        }
    }

    /// Processed value of a float parameter
    pub fn float_value(&self, parameter_id: ObjectId) -> f32 {
        match self.slot_index(parameter_id).map(|i| &self.values[i]) {
            Some(ParameterValue::Float { processed, .. }) => *processed,
            _ => 0.0,
        }
    }

    /// Control-domain value of a float parameter
    pub fn float_domain_value(&self, parameter_id: ObjectId) -> f32 {
        match self.slot_index(parameter_id).map(|i| &self.values[i]) {
            Some(ParameterValue::Float { domain, .. }) => *domain,
            _ => 0.0,
        }
    }

    /// Value of an integer parameter
    pub fn int_value(&self, parameter_id: ObjectId) -> i32 {
        match self.slot_index(parameter_id).map(|i| &self.values[i]) {
            Some(ParameterValue::Int(value)) => *value,
            _ => 0,
        }
    }

    /// Value of a boolean parameter
    pub fn bool_value(&self, parameter_id: ObjectId) -> bool {
        matches!(
            self.slot_index(parameter_id).map(|i| &self.values[i]),
            Some(ParameterValue::Bool(true))
        )
    }

    /// Value of a string parameter, if one has been set
    pub fn string_value(&self, parameter_id: ObjectId) -> Option<&str> {
        match self.slot_index(parameter_id).map(|i| &self.values[i]) {
            Some(ParameterValue::Str(Some(value))) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// Instantiate a bundled processor by uid
pub fn create_internal_processor(uid: &str, host: HostControl) -> Option<Box<dyn Processor>> {
    match uid {
        gain::GAIN_UID => Some(Box::new(gain::Gain::new(host))),
        passthrough::PASSTHROUGH_UID => Some(Box::new(passthrough::Passthrough::new(host))),
        transposer::TRANSPOSER_UID => Some(Box::new(transposer::Transposer::new(host))),
        _ => None,
    }
}
