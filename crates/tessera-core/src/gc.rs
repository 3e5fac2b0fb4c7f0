//! RT-safe deferred reclamation for event payloads
//!
//! Heap data that crosses into the audio thread (string parameter values,
//! processor and chain containers riding insertion events) must be droppable
//! anywhere without calling the allocator. Everything of that kind is
//! allocated as a `basedrop::Owned<T>`: dropping one only enqueues a pointer,
//! and the actual deallocation happens on a background collector thread.
//!
//! The collector is process-global and started lazily on first use, so an
//! engine embedded in a larger host shares one reclamation thread.

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle, Owned};

/// How often the collector sweeps deferred drops
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

static ARENA_HANDLE: OnceLock<Handle> = OnceLock::new();

/// Start the collector thread and hand back an allocation handle
fn start_collector() -> Handle {
    let (tx, rx) = mpsc::channel();

    // The Collector is !Sync, so it lives on the thread that sweeps it
    thread::Builder::new()
        .name("rt-reclaim".to_string())
        .spawn(move || {
            let mut collector = Collector::new();
            tx.send(collector.handle())
                .expect("Failed to hand back reclamation handle");

            log::info!("RT reclamation thread started");
            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn RT reclamation thread");

    rx.recv().expect("Failed to receive reclamation handle")
}

/// Get a handle for allocating RT-droppable values
///
/// The handle is cheap to clone and can be stored wherever payloads are
/// created (control frontends, the worker, the dispatcher).
pub fn arena_handle() -> Handle {
    ARENA_HANDLE.get_or_init(start_collector).clone()
}

/// Allocate a value whose drop is deferred to the collector thread
pub fn arena<T: Send + 'static>(value: T) -> Owned<T> {
    Owned::new(&arena_handle(), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_owned_value_is_eventually_collected() {
        let dropped = Arc::new(AtomicBool::new(false));
        let value = arena(DropFlag(dropped.clone()));
        drop(value);

        // The destructor runs on the collector thread, not here
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !dropped.load(Ordering::SeqCst) {
            assert!(std::time::Instant::now() < deadline, "value was never collected");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_handle_is_shared() {
        let a = arena_handle();
        let b = arena_handle();
        let one = Owned::new(&a, 1u32);
        let two = Owned::new(&b, 2u32);
        assert_eq!(*one + *two, 3);
    }
}
