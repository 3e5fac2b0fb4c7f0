//! Tessera Core - the event and processing plane of the Tessera plugin host
//!
//! The engine runs named chains of processors, block by block, on an audio
//! thread owned by an I/O collaborator. Everything else (parameter changes,
//! keyboard events, graph mutations, notifications) crosses the boundary
//! through wait-free event queues, scheduled to sample-accurate positions by
//! the event dispatcher.

pub mod config;
pub mod control;
pub mod dispatch;
pub mod engine;
pub mod gc;
pub mod host;
pub mod processor;
pub mod rt;
pub mod session;
pub mod timing;
pub mod types;

pub use config::{EngineConfig, LateEventPolicy};
pub use session::{bootstrap, Runtime, Session};
pub use types::*;
