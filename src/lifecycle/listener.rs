use super::hook::panic_message;
use super::{LifecycleError, LifecycleListener, LifecyclePhase, ManagedInstance};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

/// Container events that have already been broadcast.
#[derive(Default)]
struct Milestones {
    started: bool,
    start_failure: Option<Arc<LifecycleError>>,
    stopped: Option<Option<Arc<LifecycleError>>>,
}

#[derive(Default)]
struct Inner {
    listeners: Vec<Arc<dyn LifecycleListener>>,
    milestones: Milestones,
}

/// Fan-out of lifecycle events to registered listeners.
///
/// Each container event is broadcast at most once. Listeners added after an
/// event has fired get it replayed from inside [`ListenerRegistry::add_listener`].
/// Delivery iterates over a snapshot, so listeners may be added from within
/// a callback.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<Inner>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`, replaying any container events it missed.
    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        let (started, start_failure, stopped) = {
            let mut inner = self.lock();
            inner.listeners.push(Arc::clone(&listener));
            let milestones = &inner.milestones;
            (
                milestones.started,
                milestones.start_failure.clone(),
                milestones.stopped.clone(),
            )
        };

        if started {
            deliver(&listener, "on_started", |l| l.on_started());
        }
        if let Some(cause) = start_failure {
            deliver(&listener, "on_start_failed", |l| l.on_start_failed(&cause));
        }
        if let Some(cause) = stopped {
            deliver(&listener, "on_stopped", |l| l.on_stopped(cause.as_deref()));
        }
    }

    /// Remove a previously added listener. Returns `false` if it was not found.
    pub fn remove_listener(&self, listener: &Arc<dyn LifecycleListener>) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner
            .listeners
            .retain(|existing| !Arc::ptr_eq(existing, listener));
        inner.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().listeners.is_empty()
    }

    /// Broadcast an instance phase change.
    pub fn notify_state_changed(&self, instance: &ManagedInstance, phase: LifecyclePhase) {
        for listener in self.snapshot() {
            deliver(&listener, "on_state_changed", |l| {
                l.on_state_changed(instance, phase)
            });
        }
    }

    /// Broadcast `on_started`. Returns `false` if the container already
    /// reported a start or a start failure.
    pub fn notify_started(&self) -> bool {
        let listeners = {
            let mut inner = self.lock();
            let milestones = &mut inner.milestones;
            if milestones.started || milestones.start_failure.is_some() {
                return false;
            }
            milestones.started = true;
            inner.listeners.clone()
        };

        for listener in listeners {
            deliver(&listener, "on_started", |l| l.on_started());
        }
        true
    }

    /// Broadcast `on_start_failed`. Returns `false` if the container already
    /// reported a start or a start failure.
    pub fn notify_start_failed(&self, cause: Arc<LifecycleError>) -> bool {
        let listeners = {
            let mut inner = self.lock();
            let milestones = &mut inner.milestones;
            if milestones.started || milestones.start_failure.is_some() {
                return false;
            }
            milestones.start_failure = Some(Arc::clone(&cause));
            inner.listeners.clone()
        };

        for listener in listeners {
            deliver(&listener, "on_start_failed", |l| l.on_start_failed(&cause));
        }
        true
    }

    /// Broadcast `on_stopped`. Returns `false` if it was already broadcast.
    pub fn notify_shutdown(&self, cause: Option<Arc<LifecycleError>>) -> bool {
        let listeners = {
            let mut inner = self.lock();
            if inner.milestones.stopped.is_some() {
                return false;
            }
            inner.milestones.stopped = Some(cause.clone());
            inner.listeners.clone()
        };

        for listener in listeners {
            deliver(&listener, "on_stopped", |l| l.on_stopped(cause.as_deref()));
        }
        true
    }

    fn snapshot(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.lock().listeners.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver<F>(listener: &Arc<dyn LifecycleListener>, event: &'static str, f: F)
where
    F: FnOnce(&dyn LifecycleListener),
{
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
        tracing::error!(
            event,
            panic = %panic_message(payload.as_ref()),
            "Lifecycle listener panicked"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        failed: AtomicUsize,
        stopped: AtomicUsize,
        changes: AtomicUsize,
    }

    impl LifecycleListener for Counting {
        fn on_state_changed(&self, _instance: &ManagedInstance, _phase: LifecyclePhase) {
            self.changes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_started(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_start_failed(&self, _cause: &LifecycleError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stopped(&self, _cause: Option<&LifecycleError>) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    impl LifecycleListener for Panicking {
        fn on_started(&self) {
            panic!("listener bug");
        }
    }

    #[test]
    fn test_concurrent_notify_started_fires_once() {
        let registry = Arc::new(ListenerRegistry::new());
        let counting = Arc::new(Counting::default());
        registry.add_listener(counting.clone());

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.notify_started()
                })
            })
            .collect();
        let fired: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        assert_eq!(fired, 1);
        assert_eq!(counting.started.load(Ordering::SeqCst), 1);

        assert!(registry.notify_shutdown(None));
        assert!(!registry.notify_shutdown(None));
        assert_eq!(counting.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_notify_shutdown_fires_once() {
        let registry = Arc::new(ListenerRegistry::new());
        let counting = Arc::new(Counting::default());
        registry.add_listener(counting.clone());
        assert!(registry.notify_started());

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let cause = (i % 2 == 0)
                        .then(|| Arc::new(LifecycleError::timeout("close", "took too long")));
                    barrier.wait();
                    registry.notify_shutdown(cause)
                })
            })
            .collect();
        let fired: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        assert_eq!(fired, 1);
        assert_eq!(counting.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(counting.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_listener_is_replayed() {
        let registry = ListenerRegistry::new();
        assert!(registry.notify_started());

        let late = Arc::new(Counting::default());
        registry.add_listener(late.clone());
        assert_eq!(late.started.load(Ordering::SeqCst), 1);
        assert_eq!(late.stopped.load(Ordering::SeqCst), 0);

        registry.notify_shutdown(None);
        let later = Arc::new(Counting::default());
        registry.add_listener(later.clone());
        assert_eq!(later.started.load(Ordering::SeqCst), 1);
        assert_eq!(later.stopped.load(Ordering::SeqCst), 1);
        // No double delivery to the listener that was already registered.
        assert_eq!(late.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_failure_excludes_started() {
        let registry = ListenerRegistry::new();
        let listener = Arc::new(Counting::default());
        registry.add_listener(listener.clone());

        let cause = Arc::new(LifecycleError::timeout("warm-up", "too slow"));
        assert!(registry.notify_start_failed(Arc::clone(&cause)));
        assert!(!registry.notify_started());
        assert!(!registry.notify_start_failed(cause));

        let late = Arc::new(Counting::default());
        registry.add_listener(late.clone());
        assert_eq!(late.failed.load(Ordering::SeqCst), 1);
        assert_eq!(late.started.load(Ordering::SeqCst), 0);
        assert_eq!(listener.started.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let registry = ListenerRegistry::new();
        let counting = Arc::new(Counting::default());
        registry.add_listener(Arc::new(Panicking));
        registry.add_listener(counting.clone());

        assert!(registry.notify_started());
        assert_eq!(counting.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_listener() {
        let registry = ListenerRegistry::new();
        let counting: Arc<dyn LifecycleListener> = Arc::new(Counting::default());
        registry.add_listener(Arc::clone(&counting));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove_listener(&counting));
        assert!(!registry.remove_listener(&counting));
        assert!(registry.is_empty());
    }
}
