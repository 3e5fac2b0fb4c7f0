//! Control-plane event routing: events, the dispatcher, and the worker

pub mod dispatcher;
pub mod event;
pub mod worker;

pub use dispatcher::{
    DispatcherCore, DispatcherError, DispatcherHandle, EventDispatcher, PostError,
};
pub use event::{
    AsyncWorkTask, CompletionCallback, EngineMutation, Event, EventListener, EventPayload,
    EventPoster, EventStatus, PosterId, PosterOutcome, MAX_POSTERS,
};
pub use worker::{Worker, WorkerCore};
