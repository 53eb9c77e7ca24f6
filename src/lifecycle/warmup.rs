//! Warm-up scheduling.
//!
//! Warm-up hooks that must keep their relative order run one after another on
//! the caller's task (the foreground queue). Hooks marked parallel are dealt
//! round-robin onto a fixed number of background queues, each drained by its
//! own tokio task.

use super::{
    AggregateError, HookDescriptor, LifecycleError, LifecyclePhase, LifecycleStateMachine,
    ManagedInstance, Result,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// One warm-up hook bound to the instance it runs on.
pub struct WarmUpWorkItem {
    instance: ManagedInstance,
    hook: HookDescriptor,
    parallel: bool,
    // Warm-up items of the same instance that have not finished yet. The item
    // that brings it to zero moves the instance to the end phase.
    remaining: Arc<AtomicUsize>,
}

impl WarmUpWorkItem {
    /// A single work item for an instance with exactly one warm-up hook.
    pub fn new(instance: ManagedInstance, hook: HookDescriptor) -> Self {
        Self {
            instance,
            parallel: hook.is_parallel(),
            hook,
            remaining: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Work items for every warm-up hook of one instance.
    ///
    /// The instance reaches the end phase only after the last of them
    /// completes.
    pub fn batch(
        instance: ManagedInstance,
        hooks: impl IntoIterator<Item = HookDescriptor>,
    ) -> Vec<Self> {
        let hooks: Vec<_> = hooks.into_iter().collect();
        let remaining = Arc::new(AtomicUsize::new(hooks.len()));
        hooks
            .into_iter()
            .map(|hook| Self {
                instance: instance.clone(),
                parallel: hook.is_parallel(),
                hook,
                remaining: Arc::clone(&remaining),
            })
            .collect()
    }

    pub fn instance(&self) -> &ManagedInstance {
        &self.instance
    }

    pub fn hook(&self) -> &HookDescriptor {
        &self.hook
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    async fn run(self, states: &LifecycleStateMachine, end_phase: LifecyclePhase) -> Result<()> {
        match self.hook.invoke(&self.instance).await {
            Ok(()) => {
                if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    states.transition_unless_failed(&self.instance, end_phase)?;
                }
                Ok(())
            }
            Err(err) => {
                // Fail first so a sibling that finishes last cannot mark the
                // instance active.
                states.fail(&self.instance);
                self.remaining.fetch_sub(1, Ordering::AcqRel);
                Err(err)
            }
        }
    }
}

/// Splits warm-up work into a serial foreground queue and `N` background
/// queues, then runs it all.
pub struct WarmUpScheduler {
    foreground: Mutex<Vec<WarmUpWorkItem>>,
    background: Vec<Mutex<Vec<WarmUpWorkItem>>>,
    next_queue: AtomicUsize,
    states: Arc<LifecycleStateMachine>,
    end_phase: LifecyclePhase,
}

impl WarmUpScheduler {
    /// Create a scheduler with `workers` background queues (at least one).
    pub fn new(workers: usize, states: Arc<LifecycleStateMachine>) -> Self {
        let workers = workers.max(1);
        Self {
            foreground: Mutex::new(Vec::new()),
            background: (0..workers).map(|_| Mutex::new(Vec::new())).collect(),
            next_queue: AtomicUsize::new(0),
            states,
            end_phase: LifecyclePhase::Active,
        }
    }

    /// Phase instances move to once all their warm-up hooks succeed.
    pub fn with_end_phase(mut self, end_phase: LifecyclePhase) -> Self {
        self.end_phase = end_phase;
        self
    }

    pub fn workers(&self) -> usize {
        self.background.len()
    }

    /// Queue one item.
    pub fn schedule(&self, item: WarmUpWorkItem) {
        if item.parallel {
            let index = self.next_queue.fetch_add(1, Ordering::Relaxed) % self.background.len();
            lock(&self.background[index]).push(item);
        } else {
            lock(&self.foreground).push(item);
        }
    }

    pub fn schedule_all(&self, items: impl IntoIterator<Item = WarmUpWorkItem>) {
        for item in items {
            self.schedule(item);
        }
    }

    pub fn foreground_len(&self) -> usize {
        lock(&self.foreground).len()
    }

    /// Number of items waiting on each background queue.
    pub fn background_lens(&self) -> Vec<usize> {
        self.background.iter().map(|queue| lock(queue).len()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.foreground_len() == 0 && self.background_lens().iter().all(|len| *len == 0)
    }

    /// Run every queued item.
    ///
    /// Background queues start first and are drained concurrently; their
    /// failures are logged and skipped. The foreground queue is then drained
    /// on the calling task. Foreground failures do not stop the queue; they are
    /// returned together, in invocation order, once it is empty, without
    /// waiting for background work.
    ///
    /// Otherwise waits up to `max_wait` (forever if `None`) for the background
    /// queues and returns whether they finished. Background work that is still
    /// running when the wait expires keeps running.
    pub async fn run_all(self, max_wait: Option<Duration>) -> Result<bool> {
        let WarmUpScheduler {
            foreground,
            background,
            states,
            end_phase,
            ..
        } = self;

        let mut workers = Vec::new();
        for (worker, queue) in background.into_iter().enumerate() {
            let queue = queue.into_inner().unwrap_or_else(PoisonError::into_inner);
            if queue.is_empty() {
                continue;
            }
            let states = Arc::clone(&states);
            workers.push(tokio::spawn(async move {
                for item in queue {
                    let hook = item.hook.name().to_string();
                    if let Err(e) = item.run(&states, end_phase).await {
                        tracing::error!(
                            worker,
                            hook = %hook,
                            error = %e,
                            "Parallel warm-up failed"
                        );
                    }
                }
            }));
        }

        let foreground = foreground
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let mut failures = Vec::new();
        for item in foreground {
            if let Err(e) = item.run(&states, end_phase).await {
                tracing::error!(error = %e, "Warm-up failed");
                failures.push(e);
            }
        }
        if !failures.is_empty() {
            return Err(LifecycleError::WarmUp(AggregateError::new(failures)));
        }

        let outstanding = workers.len();
        let join_all = async move {
            for worker in workers {
                // Each worker already logs its own failures.
                let _ = worker.await;
            }
        };
        let finished = match max_wait {
            Some(max_wait) => tokio::time::timeout(max_wait, join_all).await.is_ok(),
            None => {
                join_all.await;
                true
            }
        };
        if !finished {
            tracing::warn!(
                workers = outstanding,
                ?max_wait,
                "Parallel warm-up still running after wait expired"
            );
        }
        Ok(finished)
    }

    #[cfg(test)]
    fn background_hook_names(&self, index: usize) -> Vec<String> {
        lock(&self.background[index])
            .iter()
            .map(|item| item.hook.name().to_string())
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{
        ContainerStatus, HookPhase, LifecycleListener, ListenerRegistry, TypeActionSet,
    };
    use std::sync::atomic::AtomicBool;

    struct Service {
        name: String,
    }

    fn states() -> Arc<LifecycleStateMachine> {
        Arc::new(LifecycleStateMachine::new(
            Arc::new(ListenerRegistry::new()),
            Arc::new(ContainerStatus::new()),
        ))
    }

    fn service(name: &str) -> ManagedInstance {
        ManagedInstance::new(Arc::new(Service {
            name: name.to_string(),
        }))
    }

    fn recording_hook(
        name: String,
        parallel: bool,
        log: Arc<Mutex<Vec<String>>>,
    ) -> HookDescriptor {
        let label = name.clone();
        HookDescriptor::typed::<Service, _, _>(name, HookPhase::WarmUp, parallel, move |_| {
            let log = Arc::clone(&log);
            let label = label.clone();
            async move {
                log.lock().unwrap().push(label);
                anyhow::Ok(())
            }
        })
    }

    fn failing_hook(name: &str, message: &'static str) -> HookDescriptor {
        HookDescriptor::typed::<Service, _, _>(name, HookPhase::WarmUp, false, move |_| async move {
            Err::<(), _>(anyhow::anyhow!(message))
        })
    }

    #[tokio::test]
    async fn test_round_robin_partition() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let scheduler = WarmUpScheduler::new(3, states());

        for i in 0..10 {
            let hook = recording_hook(format!("p{i}"), true, Arc::clone(&log));
            scheduler.schedule(WarmUpWorkItem::new(service(&format!("p{i}")), hook));
            if i == 2 || i == 7 {
                let hook = recording_hook(format!("f{i}"), false, Arc::clone(&log));
                scheduler.schedule(WarmUpWorkItem::new(service(&format!("f{i}")), hook));
            }
        }

        assert_eq!(scheduler.foreground_len(), 2);
        assert_eq!(scheduler.background_lens(), vec![4, 3, 3]);
        assert_eq!(scheduler.background_hook_names(0), vec!["p0", "p3", "p6", "p9"]);
        assert_eq!(scheduler.background_hook_names(1), vec!["p1", "p4", "p7"]);
        assert_eq!(scheduler.background_hook_names(2), vec!["p2", "p5", "p8"]);

        assert!(scheduler.run_all(None).await.unwrap());

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 12);
        let foreground: Vec<_> = log.iter().filter(|name| name.starts_with('f')).collect();
        assert_eq!(foreground, vec!["f2", "f7"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_foreground_runs_in_enqueue_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let scheduler = WarmUpScheduler::new(2, states());
        for name in ["a", "b", "c"] {
            let hook = recording_hook(name.to_string(), false, Arc::clone(&log));
            scheduler.schedule(WarmUpWorkItem::new(service(name), hook));
        }

        assert!(scheduler.run_all(Some(Duration::from_secs(5))).await.unwrap());
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_foreground_failures_are_aggregated_in_order() {
        let states = states();
        let scheduler = WarmUpScheduler::new(1, Arc::clone(&states));
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = service("first");
        let survivor = service("survivor");
        let second = service("second");
        scheduler.schedule(WarmUpWorkItem::new(first.clone(), failing_hook("first", "disk full")));
        scheduler.schedule(WarmUpWorkItem::new(
            survivor.clone(),
            recording_hook("survivor".into(), false, Arc::clone(&log)),
        ));
        scheduler.schedule(WarmUpWorkItem::new(second.clone(), failing_hook("second", "no route")));

        let err = scheduler.run_all(None).await.unwrap_err();
        let LifecycleError::WarmUp(aggregate) = err else {
            panic!("expected an aggregate warm-up error");
        };
        let hooks: Vec<_> = aggregate
            .errors()
            .iter()
            .map(|e| match e {
                LifecycleError::HookFailed { hook, .. } => hook.clone(),
                other => other.to_string(),
            })
            .collect();
        assert_eq!(hooks, vec!["first", "second"]);

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(states.phase_of(first.id()), Some(LifecyclePhase::Error));
        assert_eq!(states.phase_of(second.id()), Some(LifecyclePhase::Error));
        assert_eq!(states.phase_of(survivor.id()), Some(LifecyclePhase::Active));
    }

    #[tokio::test]
    async fn test_background_failure_does_not_stop_worker() {
        let states = states();
        let scheduler = WarmUpScheduler::new(1, Arc::clone(&states));
        let log = Arc::new(Mutex::new(Vec::new()));

        let broken = service("broken");
        let healthy = service("healthy");
        let failing =
            HookDescriptor::typed::<Service, _, _>("broken", HookPhase::WarmUp, true, |_| async {
                Err::<(), _>(anyhow::anyhow!("timeout talking to upstream"))
            });
        scheduler.schedule(WarmUpWorkItem::new(broken.clone(), failing));
        scheduler.schedule(WarmUpWorkItem::new(
            healthy.clone(),
            recording_hook("healthy".into(), true, Arc::clone(&log)),
        ));

        assert!(scheduler.run_all(None).await.unwrap());
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(states.phase_of(broken.id()), Some(LifecyclePhase::Error));
        assert_eq!(states.phase_of(healthy.id()), Some(LifecyclePhase::Active));
    }

    #[tokio::test]
    async fn test_timeout_leaves_background_running() {
        let states = states();
        let scheduler = WarmUpScheduler::new(1, Arc::clone(&states));
        let done = Arc::new(AtomicBool::new(false));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let slow = service("slow");
        let flag = Arc::clone(&done);
        let hook =
            HookDescriptor::typed::<Service, _, _>("slow", HookPhase::WarmUp, true, move |_| {
                let flag = Arc::clone(&flag);
                let release_rx = Arc::clone(&release_rx);
                async move {
                    if let Some(rx) = release_rx.lock().await.take() {
                        let _ = rx.await;
                    }
                    flag.store(true, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            });
        scheduler.schedule(WarmUpWorkItem::new(slow.clone(), hook));

        let finished = scheduler
            .run_all(Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(!finished);
        assert!(!done.load(Ordering::SeqCst));

        release_tx.send(()).unwrap();
        for _ in 0..100 {
            if states.phase_of(slow.id()) == Some(LifecyclePhase::Active) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(states.phase_of(slow.id()), Some(LifecyclePhase::Active));
    }

    #[tokio::test]
    async fn test_instance_active_after_last_of_its_hooks() {
        let states = states();
        let scheduler = WarmUpScheduler::new(2, Arc::clone(&states));
        let instance = service("multi");
        let log = Arc::new(Mutex::new(Vec::new()));

        let actions = TypeActionSet::builder::<Service>()
            .descriptor(recording_hook("one".into(), true, Arc::clone(&log)))
            .descriptor(recording_hook("two".into(), false, Arc::clone(&log)))
            .descriptor(recording_hook("three".into(), true, Arc::clone(&log)))
            .build();

        states.transition(&instance, LifecyclePhase::WarmingUp).unwrap();
        scheduler.schedule_all(WarmUpWorkItem::batch(
            instance.clone(),
            actions.hooks_for(HookPhase::WarmUp).cloned(),
        ));
        assert!(scheduler.run_all(None).await.unwrap());

        assert_eq!(log.lock().unwrap().len(), 3);
        assert_eq!(states.phase_of(instance.id()), Some(LifecyclePhase::Active));
        assert!(instance.downcast::<Service>().unwrap().name == "multi");
    }

    #[derive(Default)]
    struct ActiveWatch {
        seen: AtomicBool,
    }

    impl LifecycleListener for ActiveWatch {
        fn on_state_changed(&self, _instance: &ManagedInstance, phase: LifecyclePhase) {
            if phase == LifecyclePhase::Active {
                self.seen.store(true, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_sibling_hook_keeps_instance_out_of_active() {
        for round in 0..64 {
            let listeners = Arc::new(ListenerRegistry::new());
            let watch = Arc::new(ActiveWatch::default());
            listeners.add_listener(watch.clone());
            let states = Arc::new(LifecycleStateMachine::new(
                listeners,
                Arc::new(ContainerStatus::new()),
            ));
            let scheduler = WarmUpScheduler::new(2, Arc::clone(&states));
            let instance = service("split");
            let log = Arc::new(Mutex::new(Vec::new()));

            let failing = HookDescriptor::typed::<Service, _, _>(
                "refuse",
                HookPhase::WarmUp,
                true,
                |_| async { Err::<(), _>(anyhow::anyhow!("connection refused")) },
            );
            states.transition(&instance, LifecyclePhase::WarmingUp).unwrap();
            scheduler.schedule_all(WarmUpWorkItem::batch(
                instance.clone(),
                [failing, recording_hook("accept".into(), true, Arc::clone(&log))],
            ));
            assert_eq!(scheduler.background_lens(), vec![1, 1]);

            assert!(scheduler.run_all(None).await.unwrap());
            assert_eq!(
                states.phase_of(instance.id()),
                Some(LifecyclePhase::Error),
                "round {round}"
            );
            assert!(!watch.seen.load(Ordering::SeqCst), "round {round}");
        }
    }
}
