//! The worker
//!
//! A second control-plane loop, slower than the dispatcher, that executes
//! everything which must not run on either the audio thread or the
//! dispatcher's 1 ms tick: graph mutations, background jobs, and disposal of
//! processors and chains the audio thread has handed back. It also reports
//! the engine's timing telemetry on a fixed cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::engine::EngineHandle;
use crate::host::HostControl;
use crate::rt::{ChainContainer, ProcessorContainer};
use crate::types::{Clock, Time};

use super::dispatcher::{DispatcherHandle, PostError};
use super::event::{AsyncWorkTask, EngineMutation, Event, EventPayload, EventStatus};

/// Work delivered to the worker's queue
pub(crate) enum WorkerMessage {
    /// An asynchronous event to execute
    Event(Event),
    /// A processor handed back by the audio thread for disposal
    DisposeProcessor(ProcessorContainer),
    /// A chain handed back by the audio thread for disposal
    DisposeChain(ChainContainer),
}

/// Worker state plus the synchronous drain
pub struct WorkerCore {
    queue: flume::Receiver<WorkerMessage>,
    engine: Arc<EngineHandle>,
    dispatcher: DispatcherHandle,
    host_prototype: HostControl,
    clock: Arc<Clock>,
    timing_report_interval: Duration,
    last_report: Instant,
}

impl WorkerCore {
    pub(crate) fn new(
        queue: flume::Receiver<WorkerMessage>,
        engine: Arc<EngineHandle>,
        dispatcher: DispatcherHandle,
        host_prototype: HostControl,
        clock: Arc<Clock>,
        timing_report_interval: Duration,
    ) -> Self {
        Self {
            queue,
            engine,
            dispatcher,
            host_prototype,
            clock,
            timing_report_interval,
            last_report: Instant::now(),
        }
    }

    /// Execute everything queued, then report telemetry when due
    pub fn drain(&mut self) {
        while let Ok(message) = self.queue.try_recv() {
            match message {
                WorkerMessage::Event(event) => self.process_event(event),
                WorkerMessage::DisposeProcessor(processor) => drop(processor),
                WorkerMessage::DisposeChain(chain) => drop(chain),
            }
        }
        if self.last_report.elapsed() >= self.timing_report_interval {
            self.last_report = Instant::now();
            log::info!("Engine timings: {}", self.engine.timing_report());
        }
    }

    fn process_event(&mut self, event: Event) {
        let (_, _, payload, completion) = event.into_parts();
        let status = match payload {
            EventPayload::EngineMutation(mutation) => self.execute_mutation(mutation),
            EventPayload::AsyncWork(task) => self.execute_task(task),
            other => {
                log::warn!("Worker cannot execute event payload {:?}", other);
                EventStatus::UnrecognizedEvent
            }
        };
        if let Some(callback) = completion {
            callback(status);
        }
    }

    fn execute_mutation(&self, mutation: EngineMutation) -> EventStatus {
        let result = match mutation {
            EngineMutation::AddChain { name, channels } => {
                self.engine.create_chain(&name, channels).map(|_| ())
            }
            EngineMutation::DeleteChain { name } => self.engine.delete_chain(&name).map(|_| ()),
            EngineMutation::AddProcessor { chain, uid, name, plugin_type } => self
                .engine
                .add_processor(&chain, &uid, &name, plugin_type, self.host_prototype.clone())
                .map(|_| ()),
            EngineMutation::DeleteProcessor { chain, name } => {
                self.engine.remove_processor(&chain, &name).map(|_| ())
            }
        };
        match result {
            Ok(()) => EventStatus::HandledOk,
            Err(e) => {
                log::warn!("Engine mutation failed: {}", e);
                EventStatus::Error
            }
        }
    }

    fn execute_task(&self, task: AsyncWorkTask) -> EventStatus {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            Ok(Some(mut follow_up)) => {
                if follow_up.time() == Time::ZERO {
                    follow_up.set_time(self.clock.now());
                }
                if let Err(PostError(event)) = self.dispatcher.post_event(follow_up) {
                    event.complete(EventStatus::Cancelled);
                }
                EventStatus::HandledOk
            }
            Ok(None) => EventStatus::HandledOk,
            Err(_) => {
                log::error!("Asynchronous task panicked; worker continues");
                EventStatus::Error
            }
        }
    }

    /// Settle everything still queued; callbacks fire exactly once
    pub fn shutdown_drain(&mut self) {
        while let Ok(message) = self.queue.try_recv() {
            if let WorkerMessage::Event(event) = message {
                event.complete(EventStatus::Cancelled);
            }
        }
    }
}

/// The worker running on its dedicated thread
pub struct Worker {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn start(mut core: WorkerCore, tick_period: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let loop_running = running.clone();
        let thread = std::thread::Builder::new()
            .name("event-worker".to_string())
            .spawn(move || {
                log::info!("Worker started");
                while loop_running.load(Ordering::Acquire) {
                    let start = Instant::now();
                    core.drain();
                    let elapsed = start.elapsed();
                    if elapsed < tick_period {
                        std::thread::sleep(tick_period - elapsed);
                    }
                }
                core.shutdown_drain();
                log::info!("Worker stopped");
            })
            .expect("Failed to spawn worker thread");
        Self { running, thread: Some(thread) }
    }

    /// Stop the loop, join the thread, and settle everything still queued
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
