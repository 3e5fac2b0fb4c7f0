//! Typed processor parameters
//!
//! A parameter is described once at registration (range, default, optional
//! pre-processor) and stores its current value in the owning processor. All
//! realtime parameter changes arrive as floats; int and bool parameters are
//! derived from the float domain the way hardware controllers expect.
//! Values outside the declared range are clamped silently; that is the
//! documented contract, not an error.

use crate::rt::StringValue;
use crate::types::ObjectId;

/// The value domain of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Float,
    Int,
    Bool,
    Str,
}

/// Transformation applied between the control domain and the stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreProcessor {
    /// Clamp into `[min, max]`
    #[default]
    Clamp,
    /// Clamp into `[min, max]` decibels, then convert to a linear factor
    DbToLin,
}

impl PreProcessor {
    /// Apply the transformation to a control-domain value
    pub fn apply(&self, value: f32, min: f32, max: f32) -> f32 {
        let clamped = value.clamp(min, max);
        match self {
            PreProcessor::Clamp => clamped,
            PreProcessor::DbToLin => db_to_lin(clamped),
        }
    }
}

/// Convert decibels to a linear gain factor
pub fn db_to_lin(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Convert a linear gain factor to decibels
pub fn lin_to_db(lin: f32) -> f32 {
    20.0 * lin.max(f32::MIN_POSITIVE).log10()
}

/// Static description of one parameter
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub kind: ParameterType,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub preprocessor: PreProcessor,
}

/// Current value of one parameter instance
///
/// Float slots keep both the control-domain value and the processed value so
/// processors read the processed one without re-applying the pre-processor
/// per block.
#[derive(Debug)]
pub enum ParameterValue {
    Float { domain: f32, processed: f32 },
    Int(i32),
    Bool(bool),
    Str(Option<StringValue>),
}

impl ParameterValue {
    /// Initial value for a descriptor
    pub fn from_descriptor(descriptor: &ParameterDescriptor) -> Self {
        match descriptor.kind {
            ParameterType::Float => ParameterValue::Float {
                domain: descriptor.default.clamp(descriptor.min, descriptor.max),
                processed: descriptor.preprocessor.apply(
                    descriptor.default,
                    descriptor.min,
                    descriptor.max,
                ),
            },
            ParameterType::Int => {
                ParameterValue::Int(descriptor.default.clamp(descriptor.min, descriptor.max).round()
                    as i32)
            }
            ParameterType::Bool => ParameterValue::Bool(descriptor.default > 0.5),
            ParameterType::Str => ParameterValue::Str(None),
        }
    }

    /// Store a new value arriving from the float control domain
    pub fn set_from_float(&mut self, descriptor: &ParameterDescriptor, value: f32) {
        match self {
            ParameterValue::Float { domain, processed } => {
                *domain = value.clamp(descriptor.min, descriptor.max);
                *processed = descriptor.preprocessor.apply(value, descriptor.min, descriptor.max);
            }
            ParameterValue::Int(stored) => {
                *stored = value.clamp(descriptor.min, descriptor.max).round() as i32;
            }
            ParameterValue::Bool(stored) => {
                *stored = value > 0.5;
            }
            // String slots only change through string parameter events
            ParameterValue::Str(_) => {}
        }
    }
}
