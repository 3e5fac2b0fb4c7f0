//! The event dispatcher
//!
//! A periodic control-plane loop that routes posted events to their
//! receivers, schedules timed events into audio blocks through the event
//! timer, and lifts engine-emitted realtime events into broadcasts and
//! worker jobs. [`DispatcherCore`] holds all the state and exposes a
//! synchronous [`tick`](DispatcherCore::tick) so offline embedders and tests
//! can drive it deterministically; [`EventDispatcher`] wraps it in the
//! dedicated thread used by live sessions.
//!
//! Poster and listener tables are mutated only here, between dispatch
//! passes: registration requests arrive over a command channel drained at
//! the top of every tick.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::LateEventPolicy;
use crate::engine::EngineHandle;
use crate::rt::{RtEvent, RtEventReceiver};
use crate::timing::EventTimer;
use crate::types::Time;

use super::event::{
    Event, EventListener, EventPoster, EventStatus, PosterId, PosterOutcome, MAX_POSTERS,
};
use super::worker::WorkerMessage;

/// The event could not be posted; it is handed back to the caller
#[derive(Debug, Error)]
#[error("Event dispatcher is not running")]
pub struct PostError(pub Event);

/// Errors from dispatcher control operations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherError {
    #[error("Event dispatcher is not running")]
    Stopped,
}

/// Registration requests executed on the dispatcher thread between ticks
pub(crate) enum DispatcherCommand {
    RegisterPoster(Box<dyn EventPoster>),
    DeregisterPoster(PosterId),
    SubscribeKeyboard(Box<dyn EventListener>),
    SubscribeParameterChanges(Box<dyn EventListener>),
}

/// Cheap cloneable handle for posting events and registering endpoints
#[derive(Clone)]
pub struct DispatcherHandle {
    events: flume::Sender<Event>,
    commands: flume::Sender<DispatcherCommand>,
    running: Arc<AtomicBool>,
}

impl DispatcherHandle {
    pub(crate) fn new(
        events: flume::Sender<Event>,
        commands: flume::Sender<DispatcherCommand>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self { events, commands, running }
    }

    /// A handle with no dispatcher behind it; every post fails
    pub(crate) fn detached() -> Self {
        let (events, _) = flume::unbounded();
        let (commands, _) = flume::unbounded();
        Self {
            events,
            commands,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Post an event for routing on the next tick
    ///
    /// Fails synchronously once the dispatcher has been stopped; the event
    /// is handed back so the caller can settle its completion callback.
    pub fn post_event(&self, event: Event) -> Result<(), PostError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(PostError(event));
        }
        self.events.send(event).map_err(|e| PostError(e.into_inner()))
    }

    /// Register a poster for its id's slot
    pub fn register_poster(&self, poster: Box<dyn EventPoster>) -> Result<(), DispatcherError> {
        self.send_command(DispatcherCommand::RegisterPoster(poster))
    }

    /// Free a poster slot
    pub fn deregister_poster(&self, id: PosterId) -> Result<(), DispatcherError> {
        self.send_command(DispatcherCommand::DeregisterPoster(id))
    }

    /// Subscribe to keyboard event broadcasts (delivery in subscription order)
    pub fn subscribe_to_keyboard_events(
        &self,
        listener: Box<dyn EventListener>,
    ) -> Result<(), DispatcherError> {
        self.send_command(DispatcherCommand::SubscribeKeyboard(listener))
    }

    /// Subscribe to parameter change notifications
    pub fn subscribe_to_parameter_change_notifications(
        &self,
        listener: Box<dyn EventListener>,
    ) -> Result<(), DispatcherError> {
        self.send_command(DispatcherCommand::SubscribeParameterChanges(listener))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn send_command(&self, command: DispatcherCommand) -> Result<(), DispatcherError> {
        if !self.is_running() {
            return Err(DispatcherError::Stopped);
        }
        self.commands.send(command).map_err(|_| DispatcherError::Stopped)
    }
}

/// Dispatcher state plus the synchronous tick
pub struct DispatcherCore {
    events: flume::Receiver<Event>,
    commands: flume::Receiver<DispatcherCommand>,
    waiting_list: VecDeque<Event>,
    posters: [Option<Box<dyn EventPoster>>; MAX_POSTERS],
    keyboard_listeners: Vec<Box<dyn EventListener>>,
    parameter_listeners: Vec<Box<dyn EventListener>>,
    timer: EventTimer,
    rt_events: RtEventReceiver,
    engine: Arc<EngineHandle>,
    worker_queue: flume::Sender<WorkerMessage>,
    late_event_policy: LateEventPolicy,
    tick_period: Time,
}

impl DispatcherCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        events: flume::Receiver<Event>,
        commands: flume::Receiver<DispatcherCommand>,
        rt_events: RtEventReceiver,
        engine: Arc<EngineHandle>,
        worker_queue: flume::Sender<WorkerMessage>,
        timer: EventTimer,
        late_event_policy: LateEventPolicy,
        tick_period: Duration,
    ) -> Self {
        Self {
            events,
            commands,
            waiting_list: VecDeque::new(),
            posters: std::array::from_fn(|_| None),
            keyboard_listeners: Vec::new(),
            parameter_listeners: Vec::new(),
            timer,
            rt_events,
            engine,
            worker_queue,
            late_event_policy,
            tick_period: Time::from_micros(tick_period.as_micros() as i64),
        }
    }

    /// One dispatcher iteration: registrations, events, then the RT drain
    pub fn tick(&mut self) {
        self.drain_commands();
        self.process_events();
        self.drain_rt_events();
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                DispatcherCommand::RegisterPoster(poster) => {
                    let id = poster.poster_id();
                    if matches!(id, PosterId::Controller | PosterId::Worker) {
                        log::warn!("Poster slot {:?} is reserved", id);
                    } else if self.posters[id.index()].is_some() {
                        log::warn!("Poster slot {:?} is already taken", id);
                    } else {
                        self.posters[id.index()] = Some(poster);
                    }
                }
                DispatcherCommand::DeregisterPoster(id) => {
                    self.posters[id.index()] = None;
                }
                DispatcherCommand::SubscribeKeyboard(listener) => {
                    self.keyboard_listeners.push(listener);
                }
                DispatcherCommand::SubscribeParameterChanges(listener) => {
                    self.parameter_listeners.push(listener);
                }
            }
        }
    }

    /// Route waiting timed events first, then everything newly posted
    ///
    /// The waiting list is taken wholesale so each timed event is retried at
    /// most once per tick; the timer only advances in the RT drain, so
    /// retrying in place would spin. Taking it first also gives older timed
    /// events preference over fresh arrivals.
    fn process_events(&mut self) {
        let waiting = std::mem::take(&mut self.waiting_list);
        for event in waiting {
            self.dispatch(event);
        }
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: Event) {
        let outcome = match event.receiver() {
            PosterId::Controller => self.process_controller_event(event),
            PosterId::Worker => self.send_to_worker(event),
            receiver => match &mut self.posters[receiver.index()] {
                Some(poster) => poster.process(event),
                None => PosterOutcome::Handled(event, EventStatus::UnrecognizedReceiver),
            },
        };
        if let PosterOutcome::Handled(event, status) = outcome {
            event.complete(status);
        }
    }

    /// Events addressed to the dispatcher itself
    fn process_controller_event(&mut self, mut event: Event) -> PosterOutcome {
        if event.process_asynchronously() {
            event.set_receiver(PosterId::Worker);
            return self.send_to_worker(event);
        }
        if event.maps_to_rt_event() {
            if self.late_event_policy == LateEventPolicy::Drop
                && event.time() + self.tick_period < self.timer.incoming_block_time()
            {
                return PosterOutcome::Handled(event, EventStatus::TimedOut);
            }
            if let Some(offset) = self.timer.sample_offset_from_realtime(event.time()) {
                if let Some(rt_event) = event.to_rt_event(offset, self.engine.arena()) {
                    if self.engine.send_rt_event(rt_event) {
                        return PosterOutcome::Handled(event, EventStatus::HandledOk);
                    }
                }
            }
            // Target block not reached yet, or the queue is full: retry next tick
            self.waiting_list.push_back(event);
            return PosterOutcome::Consumed;
        }
        if event.is_parameter_notification() {
            self.publish_parameter_notification(&event);
            return PosterOutcome::Handled(event, EventStatus::HandledOk);
        }
        PosterOutcome::Handled(event, EventStatus::UnrecognizedEvent)
    }

    fn send_to_worker(&mut self, event: Event) -> PosterOutcome {
        match self.worker_queue.send(WorkerMessage::Event(event)) {
            Ok(()) => PosterOutcome::Consumed,
            Err(flume::SendError(message)) => match message {
                WorkerMessage::Event(event) => {
                    PosterOutcome::Handled(event, EventStatus::Error)
                }
                _ => PosterOutcome::Consumed,
            },
        }
    }

    /// Lift engine-emitted realtime events into the control plane
    fn drain_rt_events(&mut self) {
        while let Some(rt_event) = self.rt_events.pop() {
            self.process_rt_event(rt_event);
        }
    }

    fn process_rt_event(&mut self, rt_event: RtEvent) {
        match rt_event {
            RtEvent::Sync { time, .. } => {
                self.timer.set_incoming_time(time);
                self.timer.set_outgoing_time(time);
            }
            RtEvent::RemovedProcessor { processor, .. } => {
                // Disposal happens on the worker, never on the audio thread
                let _ = self.worker_queue.send(WorkerMessage::DisposeProcessor(processor));
            }
            RtEvent::RemovedChain { chain, .. } => {
                let _ = self.worker_queue.send(WorkerMessage::DisposeChain(chain));
            }
            other => {
                let timestamp = self.timer.real_time_from_sample_offset(other.sample_offset());
                let Some(mut event) = Event::from_rt_event(&other, timestamp) else {
                    return;
                };
                if event.is_keyboard_event() {
                    self.publish_keyboard_event(&event);
                } else if event.is_parameter_notification() {
                    self.publish_parameter_notification(&event);
                } else if event.process_asynchronously() {
                    event.set_receiver(PosterId::Worker);
                    if let PosterOutcome::Handled(event, status) = self.send_to_worker(event) {
                        event.complete(status);
                    }
                }
            }
        }
    }

    fn publish_keyboard_event(&mut self, event: &Event) {
        for listener in &mut self.keyboard_listeners {
            listener.notify(event);
        }
    }

    fn publish_parameter_notification(&mut self, event: &Event) {
        for listener in &mut self.parameter_listeners {
            listener.notify(event);
        }
    }

    /// Settle everything still queued; every callback fires exactly once
    pub fn shutdown_drain(&mut self) {
        for event in std::mem::take(&mut self.waiting_list) {
            event.complete(EventStatus::Cancelled);
        }
        while let Ok(event) = self.events.try_recv() {
            event.complete(EventStatus::Cancelled);
        }
        // Containers still in flight are dropped here, off the audio thread
        while self.rt_events.pop().is_some() {}
    }

    /// Number of timed events currently parked
    pub fn waiting_events(&self) -> usize {
        self.waiting_list.len()
    }
}

/// The dispatcher running on its dedicated thread
pub struct EventDispatcher {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    pub(crate) fn start(
        mut core: DispatcherCore,
        tick_period: Duration,
        running: Arc<AtomicBool>,
    ) -> Self {
        let loop_running = running.clone();
        let thread = std::thread::Builder::new()
            .name("event-dispatcher".to_string())
            .spawn(move || {
                log::info!("Event dispatcher started");
                while loop_running.load(Ordering::Acquire) {
                    let start = Instant::now();
                    core.tick();
                    let elapsed = start.elapsed();
                    if elapsed < tick_period {
                        std::thread::sleep(tick_period - elapsed);
                    }
                }
                core.shutdown_drain();
                log::info!("Event dispatcher stopped");
            })
            .expect("Failed to spawn event dispatcher thread");
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

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::event::EventPayload;
    use crate::engine::ProcessTimings;
    use crate::gc::arena_handle;
    use crate::rt::{rt_event_channel, SharedRtEventSender};
    use crate::types::ObjectId;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    struct TestBench {
        core: DispatcherCore,
        handle: DispatcherHandle,
        engine_rx: crate::rt::RtEventReceiver,
        to_dispatcher: crate::rt::RtEventSender,
        worker_rx: flume::Receiver<WorkerMessage>,
    }

    fn bench(policy: LateEventPolicy) -> TestBench {
        let (engine_tx, engine_rx) = rt_event_channel(64);
        let (to_dispatcher, rt_events) = rt_event_channel(64);
        let engine = Arc::new(EngineHandle::new(
            SharedRtEventSender::new(engine_tx),
            48_000.0,
            arena_handle(),
            Arc::new(ProcessTimings::new()),
            Arc::new(AtomicU64::new(0)),
            Arc::new(AtomicU64::new(0)),
        ));
        let (event_tx, event_rx) = flume::unbounded();
        let (command_tx, command_rx) = flume::unbounded();
        let (worker_tx, worker_rx) = flume::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let handle = DispatcherHandle::new(event_tx, command_tx, running);
        let core = DispatcherCore::new(
            event_rx,
            command_rx,
            rt_events,
            engine,
            worker_tx,
            EventTimer::new(48_000.0, 64),
            policy,
            Duration::from_millis(1),
        );
        TestBench { core, handle, engine_rx, to_dispatcher, worker_rx }
    }

    struct NoteLogger {
        order: Arc<Mutex<Vec<usize>>>,
        index: usize,
    }

    impl EventListener for NoteLogger {
        fn notify(&mut self, event: &Event) {
            assert!(event.is_keyboard_event());
            self.order.lock().unwrap().push(self.index);
        }
    }

    #[test]
    fn test_due_event_is_sent_with_offset() {
        let mut b = bench(LateEventPolicy::SendImmediately);
        let id = ObjectId::allocate();
        b.handle
            .post_event(Event::keyboard(
                id,
                crate::rt::KeyboardEventKind::NoteOn,
                60,
                0.8,
                Time::from_millis(1),
            ))
            .unwrap();
        b.core.tick();

        match b.engine_rx.pop() {
            Some(RtEvent::NoteOn { sample_offset, note, .. }) => {
                assert_eq!(sample_offset, 48);
                assert_eq!(note, 60);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(b.core.waiting_events(), 0);
    }

    #[test]
    fn test_future_event_waits_for_sync() {
        let mut b = bench(LateEventPolicy::SendImmediately);
        let id = ObjectId::allocate();
        b.handle
            .post_event(Event::keyboard(
                id,
                crate::rt::KeyboardEventKind::NoteOn,
                60,
                0.8,
                Time::from_millis(10),
            ))
            .unwrap();
        b.core.tick();
        assert_eq!(b.core.waiting_events(), 1);
        assert!(b.engine_rx.pop().is_none());

        // The engine reaches the block containing t=10ms. The sync lands in
        // this tick's RT drain, so the waiting event goes out on the next one.
        b.to_dispatcher.push(RtEvent::Sync { sample_offset: 0, time: Time::from_millis(10) });
        b.core.tick();
        b.core.tick();

        match b.engine_rx.pop() {
            Some(RtEvent::NoteOn { sample_offset, .. }) => assert_eq!(sample_offset, 0),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(b.core.waiting_events(), 0);
    }

    #[test]
    fn test_same_block_events_go_out_with_non_decreasing_offsets() {
        let mut b = bench(LateEventPolicy::SendImmediately);
        let id = ObjectId::allocate();
        for micros in [250, 500, 1_000] {
            b.handle
                .post_event(Event::keyboard(
                    id,
                    crate::rt::KeyboardEventKind::NoteOn,
                    60,
                    1.0,
                    Time::from_micros(micros),
                ))
                .unwrap();
        }
        b.core.tick();

        let mut last_offset = 0;
        for expected in [12, 24, 48] {
            match b.engine_rx.pop() {
                Some(RtEvent::NoteOn { sample_offset, .. }) => {
                    assert_eq!(sample_offset, expected);
                    assert!(sample_offset >= last_offset);
                    last_offset = sample_offset;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn test_late_event_policy_drop_times_out() {
        let mut b = bench(LateEventPolicy::Drop);
        b.to_dispatcher.push(RtEvent::Sync { sample_offset: 0, time: Time::from_millis(100) });
        b.core.tick();

        let completed = Arc::new(Mutex::new(None));
        let completed_in_cb = completed.clone();
        b.handle
            .post_event(
                Event::keyboard(
                    ObjectId::allocate(),
                    crate::rt::KeyboardEventKind::NoteOn,
                    60,
                    0.8,
                    Time::from_millis(50),
                )
                .with_completion(Box::new(move |status| {
                    *completed_in_cb.lock().unwrap() = Some(status);
                })),
            )
            .unwrap();
        b.core.tick();

        assert_eq!(*completed.lock().unwrap(), Some(EventStatus::TimedOut));
        assert!(b.engine_rx.pop().is_none());
    }

    #[test]
    fn test_unrecognized_receiver_completes() {
        let mut b = bench(LateEventPolicy::SendImmediately);
        let completed = Arc::new(Mutex::new(None));
        let completed_in_cb = completed.clone();
        let mut event = Event::parameter_change(
            ObjectId::allocate(),
            ObjectId::allocate(),
            0.5,
            Time::ZERO,
        )
        .with_completion(Box::new(move |status| {
            *completed_in_cb.lock().unwrap() = Some(status);
        }));
        event.set_receiver(PosterId::OscFrontend);
        b.handle.post_event(event).unwrap();
        b.core.tick();

        assert_eq!(*completed.lock().unwrap(), Some(EventStatus::UnrecognizedReceiver));
    }

    #[test]
    fn test_keyboard_fan_out_in_subscription_order() {
        let mut b = bench(LateEventPolicy::SendImmediately);
        let order = Arc::new(Mutex::new(Vec::new()));
        for index in 0..3 {
            b.handle
                .subscribe_to_keyboard_events(Box::new(NoteLogger {
                    order: order.clone(),
                    index,
                }))
                .unwrap();
        }

        b.to_dispatcher.push(RtEvent::NoteOn {
            processor_id: ObjectId::allocate(),
            sample_offset: 0,
            note: 60,
            velocity: 1.0,
        });
        b.core.tick();

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_async_events_are_queued_to_worker() {
        let mut b = bench(LateEventPolicy::SendImmediately);
        b.handle
            .post_event(Event::engine_mutation(
                crate::dispatch::event::EngineMutation::AddChain { name: "main".into(), channels: 2 },
                Time::ZERO,
            ))
            .unwrap();
        b.core.tick();

        match b.worker_rx.try_recv() {
            Ok(WorkerMessage::Event(event)) => {
                assert_eq!(event.receiver(), PosterId::Worker);
                assert!(matches!(event.payload(), EventPayload::EngineMutation(_)));
            }
            _ => panic!("expected a worker event"),
        }
    }

    #[test]
    fn test_shutdown_drain_cancels_everything() {
        let mut b = bench(LateEventPolicy::SendImmediately);
        let count = Arc::new(AtomicU64::new(0));
        for _ in 0..5 {
            let count_in_cb = count.clone();
            b.handle
                .post_event(
                    Event::keyboard(
                        ObjectId::allocate(),
                        crate::rt::KeyboardEventKind::NoteOn,
                        60,
                        0.8,
                        Time::from_millis(500),
                    )
                    .with_completion(Box::new(move |status| {
                        assert_eq!(status, EventStatus::Cancelled);
                        count_in_cb.fetch_add(1, Ordering::SeqCst);
                    })),
                )
                .unwrap();
        }
        // Ticks park them all on the waiting list; none are due yet
        b.core.tick();
        b.core.tick();
        b.core.shutdown_drain();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_post_after_stop_fails_synchronously() {
        let b = bench(LateEventPolicy::SendImmediately);
        b.handle.running.store(false, Ordering::Release);
        let result = b.handle.post_event(Event::parameter_change(
            ObjectId::allocate(),
            ObjectId::allocate(),
            0.0,
            Time::ZERO,
        ));
        assert!(result.is_err());
    }
}
