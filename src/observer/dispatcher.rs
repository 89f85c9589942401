//! Fan-out Dispatcher

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use super::Observer;
use crate::session::{Direction, SessionId};
use crate::Result;

/// Delivers every event to each registered observer in registration order.
///
/// A failing or panicking observer is logged and skipped for that event only;
/// the remaining observers still receive it and every later event. Nothing
/// an observer does is reported back to the relay.
pub struct Dispatcher {
    // Replaced wholesale on register so delivery only bumps one refcount
    observers: RwLock<Arc<[Arc<dyn Observer>]>>,
    shut_down: AtomicBool,
}

impl Dispatcher {
    /// Create a dispatcher with no observers
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Arc::from(Vec::new())),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Builder-style registration used while wiring at startup
    pub fn with(self, observer: Arc<dyn Observer>) -> Self {
        self.register(observer);
        self
    }

    /// Append an observer to the end of the list
    pub fn register(&self, observer: Arc<dyn Observer>) {
        let mut observers = match self.observers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        info!("Registered observer '{}'", observer.name());
        let mut next = observers.to_vec();
        next.push(observer);
        *observers = Arc::from(next);
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the shutdown broadcast has been sent
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn connected(&self, session: SessionId, peer: &str) {
        self.each("on_connected", |observer| observer.on_connected(session, peer));
    }

    pub fn disconnected(&self, session: SessionId, direction: Direction) {
        self.each("on_disconnected", |observer| observer.on_disconnected(session, direction));
    }

    pub fn data(&self, session: SessionId, direction: Direction, payload: &[u8]) {
        self.each("on_data", |observer| observer.on_data(session, direction, payload));
    }

    /// Broadcast `on_shutting_down` to every observer. Only the first call
    /// has any effect; returns whether this call performed the broadcast.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Shutdown broadcast already sent, ignoring");
            return false;
        }

        info!("Broadcasting shutdown to {} observers", self.len());
        self.each("on_shutting_down", |observer| observer.on_shutting_down());
        true
    }

    // Only the shared list is cloned, so a slow observer never holds the lock.
    fn snapshot(&self) -> Arc<[Arc<dyn Observer>]> {
        match self.observers.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn each<F>(&self, event: &str, mut call: F)
    where
        F: FnMut(&dyn Observer) -> Result<()>,
    {
        for observer in self.snapshot().iter() {
            match panic::catch_unwind(AssertUnwindSafe(|| call(observer.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Observer '{}' failed in {}: {:#}", observer.name(), event, e);
                }
                Err(_) => {
                    error!("Observer '{}' panicked in {}", observer.name(), event);
                }
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer for Dispatcher {
    fn name(&self) -> &str {
        "dispatcher"
    }

    fn on_connected(&self, session: SessionId, peer: &str) -> Result<()> {
        self.connected(session, peer);
        Ok(())
    }

    fn on_disconnected(&self, session: SessionId, direction: Direction) -> Result<()> {
        self.disconnected(session, direction);
        Ok(())
    }

    fn on_data(&self, session: SessionId, direction: Direction, payload: &[u8]) -> Result<()> {
        self.data(session, direction, payload);
        Ok(())
    }

    fn on_shutting_down(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        name: String,
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn named(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl Observer for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_connected(&self, _session: SessionId, peer: &str) -> Result<()> {
            self.push(format!("connected {}", peer));
            Ok(())
        }

        fn on_disconnected(&self, _session: SessionId, direction: Direction) -> Result<()> {
            self.push(format!("disconnected {}", direction.short_code()));
            Ok(())
        }

        fn on_data(&self, _session: SessionId, _direction: Direction, payload: &[u8]) -> Result<()> {
            self.push(format!("data {}", payload.len()));
            Ok(())
        }

        fn on_shutting_down(&self) -> Result<()> {
            self.push("shutdown".to_string());
            Ok(())
        }
    }

    struct Failing {
        panic: bool,
    }

    impl Observer for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_connected(&self, _session: SessionId, _peer: &str) -> Result<()> {
            anyhow::bail!("cannot record connection")
        }

        fn on_disconnected(&self, _session: SessionId, _direction: Direction) -> Result<()> {
            anyhow::bail!("cannot record disconnect")
        }

        fn on_data(&self, _session: SessionId, _direction: Direction, _payload: &[u8]) -> Result<()> {
            if self.panic {
                panic!("observer blew up");
            }
            anyhow::bail!("cannot record data")
        }

        fn on_shutting_down(&self) -> Result<()> {
            anyhow::bail!("cannot shut down")
        }
    }

    #[test]
    fn test_events_reach_every_observer_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Tagged(&'static str, Arc<Mutex<Vec<&'static str>>>);
        impl Observer for Tagged {
            fn name(&self) -> &str {
                self.0
            }
            fn on_connected(&self, _: SessionId, _: &str) -> Result<()> {
                self.1.lock().unwrap().push(self.0);
                Ok(())
            }
            fn on_disconnected(&self, _: SessionId, _: Direction) -> Result<()> {
                Ok(())
            }
            fn on_data(&self, _: SessionId, _: Direction, _: &[u8]) -> Result<()> {
                Ok(())
            }
            fn on_shutting_down(&self) -> Result<()> {
                Ok(())
            }
        }

        let dispatcher = Dispatcher::new()
            .with(Arc::new(Tagged("first", order.clone())))
            .with(Arc::new(Tagged("second", order.clone())))
            .with(Arc::new(Tagged("third", order.clone())));

        dispatcher.connected(SessionId::new(), "127.0.0.1:5000");
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_observer_does_not_block_others() {
        let before = Recorder::named("before");
        let after = Recorder::named("after");
        let dispatcher = Dispatcher::new()
            .with(before.clone())
            .with(Arc::new(Failing { panic: false }))
            .with(after.clone());

        let session = SessionId::new();
        dispatcher.connected(session, "peer");
        dispatcher.data(session, Direction::ClientToRemote, b"abc");
        dispatcher.disconnected(session, Direction::ClientToRemote);

        let expected = vec!["connected peer", "data 3", "disconnected C"];
        assert_eq!(before.events(), expected);
        assert_eq!(after.events(), expected);
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let after = Recorder::named("after");
        let dispatcher = Dispatcher::new()
            .with(Arc::new(Failing { panic: true }))
            .with(after.clone());

        let session = SessionId::new();
        dispatcher.data(session, Direction::RemoteToClient, b"xy");
        dispatcher.data(session, Direction::RemoteToClient, b"z");

        assert_eq!(after.events(), vec!["data 2", "data 1"]);
    }

    #[test]
    fn test_register_during_delivery() {
        struct Registrar {
            dispatcher: std::sync::Weak<Dispatcher>,
            late: Arc<Recorder>,
        }
        impl Observer for Registrar {
            fn name(&self) -> &str {
                "registrar"
            }
            fn on_connected(&self, _: SessionId, _: &str) -> Result<()> {
                if let Some(dispatcher) = self.dispatcher.upgrade() {
                    dispatcher.register(self.late.clone());
                }
                Ok(())
            }
            fn on_disconnected(&self, _: SessionId, _: Direction) -> Result<()> {
                Ok(())
            }
            fn on_data(&self, _: SessionId, _: Direction, _: &[u8]) -> Result<()> {
                Ok(())
            }
            fn on_shutting_down(&self) -> Result<()> {
                Ok(())
            }
        }

        let late = Recorder::named("late");
        let dispatcher = Arc::new_cyclic(|weak| {
            Dispatcher::new().with(Arc::new(Registrar {
                dispatcher: weak.clone(),
                late: late.clone(),
            }))
        });

        let session = SessionId::new();
        dispatcher.connected(session, "peer");
        assert_eq!(dispatcher.len(), 2);
        // The list in use when the event started is unaffected
        assert!(late.events().is_empty());

        dispatcher.data(session, Direction::ClientToRemote, b"abcd");
        assert_eq!(late.events(), vec!["data 4"]);
    }

    #[test]
    fn test_shutdown_broadcast_once() {
        let recorder = Recorder::named("recorder");
        let dispatcher = Dispatcher::new()
            .with(Arc::new(Failing { panic: false }))
            .with(recorder.clone());

        assert!(!dispatcher.is_shut_down());
        assert!(dispatcher.shutdown());
        assert!(!dispatcher.shutdown());
        assert!(dispatcher.is_shut_down());
        assert_eq!(recorder.events(), vec!["shutdown"]);
    }

    #[test]
    fn test_nested_dispatchers() {
        let inner_recorder = Recorder::named("inner");
        let inner = Arc::new(Dispatcher::new().with(inner_recorder.clone()));
        let outer = Dispatcher::new().with(inner);

        assert_eq!(outer.len(), 1);
        outer.data(SessionId::new(), Direction::ClientToRemote, b"hello");
        outer.shutdown();

        assert_eq!(inner_recorder.events(), vec!["data 5", "shutdown"]);
    }
}
