//! Realtime event records and the wait-free queues that carry them

pub mod event;
pub mod queue;

pub use event::{
    ChainContainer, KeyboardEventKind, ProcessorContainer, RtEvent, RtWorkFn, StringValue,
};
pub use queue::{rt_event_channel, EventSink, RtEventReceiver, RtEventSender, SharedRtEventSender};
