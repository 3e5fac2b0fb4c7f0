//! Session wiring
//!
//! [`bootstrap`] builds every component of the event and processing plane
//! from one [`EngineConfig`] without starting any threads; the bundle it
//! returns can be driven synchronously, which is what offline rendering and
//! the integration tests do. [`Session::start`] does the same and then puts
//! the dispatcher and worker on their threads for live use.
//!
//! The [`AudioEngine`] in either bundle belongs to the audio I/O
//! collaborator: move it into the callback that owns the audio thread.

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use crate::config::{ConfigError, EngineConfig};
use crate::control::ControlFrontend;
use crate::dispatch::dispatcher::{DispatcherCore, DispatcherHandle, EventDispatcher};
use crate::dispatch::worker::{Worker, WorkerCore};
use crate::engine::{AudioEngine, EngineHandle, ProcessTimings};
use crate::gc::arena_handle;
use crate::host::HostControl;
use crate::rt::{rt_event_channel, SharedRtEventSender};
use crate::timing::EventTimer;
use crate::types::Clock;

/// Every component of a configured engine, not yet running any threads
pub struct Runtime {
    pub engine: AudioEngine,
    pub handle: Arc<EngineHandle>,
    pub frontend: ControlFrontend,
    pub dispatcher: DispatcherCore,
    pub worker: WorkerCore,
    pub dispatcher_handle: DispatcherHandle,
    pub clock: Arc<Clock>,
    running: Arc<AtomicBool>,
}

impl Runtime {
    /// Mark the dispatcher stopped and settle everything still queued
    ///
    /// For synchronously-driven runtimes; threaded sessions go through
    /// [`Session::stop`].
    pub fn shutdown(&mut self) {
        self.running.store(false, std::sync::atomic::Ordering::Release);
        self.dispatcher.shutdown_drain();
        self.worker.shutdown_drain();
    }
}

/// Build all components from a validated configuration
pub fn bootstrap(config: &EngineConfig) -> Result<Runtime, ConfigError> {
    config.validate()?;

    let clock = Arc::new(Clock::new());
    let arena = arena_handle();
    let timings = Arc::new(ProcessTimings::new());
    let outbound_dropped = Arc::new(AtomicU64::new(0));
    let unroutable_events = Arc::new(AtomicU64::new(0));

    // control -> engine
    let (inbound_tx, inbound_rx) = rt_event_channel(config.rt_queue_capacity);
    // engine -> dispatcher
    let (outbound_tx, outbound_rx) = rt_event_channel(config.rt_queue_capacity);

    let handle = Arc::new(EngineHandle::new(
        SharedRtEventSender::new(inbound_tx),
        config.sample_rate,
        arena,
        timings.clone(),
        outbound_dropped.clone(),
        unroutable_events.clone(),
    ));

    let engine = AudioEngine::new(
        config,
        inbound_rx,
        outbound_tx,
        outbound_dropped,
        unroutable_events,
        timings,
    );

    let (event_tx, event_rx) = flume::unbounded();
    let (command_tx, command_rx) = flume::unbounded();
    let (worker_tx, worker_rx) = flume::unbounded();
    let running = Arc::new(AtomicBool::new(true));

    let dispatcher_handle = DispatcherHandle::new(event_tx, command_tx, running.clone());
    let host = HostControl::new(dispatcher_handle.clone(), clock.clone(), config.sample_rate);

    let dispatcher = DispatcherCore::new(
        event_rx,
        command_rx,
        outbound_rx,
        handle.clone(),
        worker_tx,
        EventTimer::new(config.sample_rate, config.block_size),
        config.late_event_policy,
        config.dispatcher_tick(),
    );

    let worker = WorkerCore::new(
        worker_rx,
        handle.clone(),
        dispatcher_handle.clone(),
        host,
        clock.clone(),
        config.timing_report_interval(),
    );

    let frontend = ControlFrontend::new(handle.clone(), dispatcher_handle.clone(), clock.clone());

    Ok(Runtime {
        engine,
        handle,
        frontend,
        dispatcher,
        worker,
        dispatcher_handle,
        clock,
        running,
    })
}

/// A live engine with the dispatcher and worker on their threads
pub struct Session {
    pub engine: Option<AudioEngine>,
    pub handle: Arc<EngineHandle>,
    pub frontend: ControlFrontend,
    pub dispatcher_handle: DispatcherHandle,
    pub clock: Arc<Clock>,
    dispatcher: EventDispatcher,
    worker: Worker,
}

impl Session {
    /// Build and start a session from the configuration
    pub fn start(config: &EngineConfig) -> Result<Session, ConfigError> {
        let runtime = bootstrap(config)?;
        let dispatcher =
            EventDispatcher::start(runtime.dispatcher, config.dispatcher_tick(), runtime.running);
        let worker = Worker::start(runtime.worker, config.worker_tick());
        Ok(Session {
            engine: Some(runtime.engine),
            handle: runtime.handle,
            frontend: runtime.frontend,
            dispatcher_handle: runtime.dispatcher_handle,
            clock: runtime.clock,
            dispatcher,
            worker,
        })
    }

    /// Take the engine to hand to the audio I/O collaborator
    pub fn take_engine(&mut self) -> Option<AudioEngine> {
        self.engine.take()
    }

    /// Stop the control-plane threads
    ///
    /// The dispatcher stops first so nothing new reaches the worker; both
    /// settle their remaining events with `Cancelled`.
    pub fn stop(&mut self) {
        self.dispatcher.stop();
        self.worker.stop();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
