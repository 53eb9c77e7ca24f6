//! Lifecycle Manager
//!
//! Drives every registered instance through its phases and owns the
//! container-level lifecycle.

use super::{
    ActionCache, ContainerState, ContainerStatus, HookDescriptor, HookPhase, InstanceSnapshot,
    Introspect, LifecycleError, LifecycleListener, LifecyclePhase, LifecycleStateMachine,
    ListenerRegistry, ManagedInstance, Result, ShutdownSequencer, TeardownRecord, TeardownReport,
    TypeActionSet, WarmUpScheduler, WarmUpWorkItem,
};
use crate::config::LifecycleConfig;
use std::any::TypeId;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// What [`LifecycleManager::register`] did with an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The instance is now managed
    Managed,
    /// The same instance was registered before; nothing was done
    AlreadyManaged,
    /// The container is closed; nothing was done
    Rejected,
}

/// An instance that finished its pre-warm-up phases before the container
/// started.
struct PendingWarmUp {
    instance: ManagedInstance,
    actions: Arc<TypeActionSet>,
}

/// Orchestrates managed instances from registration to teardown
///
/// The LifecycleManager is responsible for:
/// - Running resource, configuration and post-construct hooks at registration
/// - Warming instances up once the container has started
/// - Tearing instances down in reverse registration order on close
/// - Broadcasting phase changes and container events to listeners
///
/// # Example
///
/// ```rust,ignore
/// use cadence::lifecycle::LifecycleManager;
///
/// let manager = LifecycleManager::new();
///
/// // Register services
/// manager.manage(Arc::new(Database::new())).await?;
/// manager.manage(Arc::new(CacheWarmer::new())).await?;
///
/// // Warm up and serve
/// manager.start().await?;
/// // ... application runs ...
/// manager.close().await;
/// ```
pub struct LifecycleManager {
    id: Uuid,
    config: LifecycleConfig,
    status: Arc<ContainerStatus>,
    listeners: Arc<ListenerRegistry>,
    states: Arc<LifecycleStateMachine>,
    actions: ActionCache,
    teardown: ShutdownSequencer,
    // `Some` until `start` has drained it; later registrations warm up
    // immediately.
    pending: Mutex<Option<Vec<PendingWarmUp>>>,
    start_failure: OnceLock<Arc<LifecycleError>>,
    closing: tokio::sync::Mutex<()>,
    terminated: watch::Sender<bool>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    /// Create a LifecycleManager with default settings
    pub fn new() -> Self {
        Self::with_config(LifecycleConfig::default())
    }

    pub fn with_config(config: LifecycleConfig) -> Self {
        let status = Arc::new(ContainerStatus::new());
        let listeners = Arc::new(ListenerRegistry::new());
        let states = Arc::new(LifecycleStateMachine::new(
            Arc::clone(&listeners),
            Arc::clone(&status),
        ));
        let (terminated, _) = watch::channel(false);

        Self {
            id: Uuid::new_v4(),
            config,
            status,
            listeners,
            states,
            actions: ActionCache::new(),
            teardown: ShutdownSequencer::new(),
            pending: Mutex::new(Some(Vec::new())),
            start_failure: OnceLock::new(),
            closing: tokio::sync::Mutex::new(()),
            terminated,
        }
    }

    /// Identifier attached to this container's log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn state(&self) -> ContainerState {
        self.status.get()
    }

    /// The error that made `start` fail, if it did
    pub fn start_failure(&self) -> Option<Arc<LifecycleError>> {
        self.start_failure.get().cloned()
    }

    pub fn action_cache(&self) -> &ActionCache {
        &self.actions
    }

    pub fn state_machine(&self) -> &LifecycleStateMachine {
        &self.states
    }

    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn LifecycleListener>) -> bool {
        self.listeners.remove_listener(listener)
    }

    /// Current phase of `instance`; see [`LifecycleStateMachine::current_phase`].
    pub fn phase_of(&self, instance: &ManagedInstance) -> LifecyclePhase {
        self.states.current_phase(instance.id())
    }

    pub fn is_managed(&self, instance: &ManagedInstance) -> bool {
        self.states.is_tracked(instance.id())
    }

    pub fn snapshot(&self) -> Vec<InstanceSnapshot> {
        self.states.snapshot()
    }

    /// The cached action set for `T`, describing it on first use
    pub fn actions_for<T: Introspect>(&self) -> Arc<TypeActionSet> {
        self.actions.get_or_compute(TypeId::of::<T>(), T::describe)
    }

    /// Register `instance` using the hooks `T` describes
    pub async fn manage<T: Introspect>(&self, instance: Arc<T>) -> Result<Registration> {
        let actions = self.actions_for::<T>();
        self.register(ManagedInstance::new(instance), actions).await
    }

    /// Take a freshly constructed instance under management
    ///
    /// Runs resource, pre-configuration, configuration and post-construct
    /// hooks in that order. If any fails the instance is marked `Error` and
    /// the error is returned. Instances registered before the container has
    /// started wait for [`start`](Self::start) to warm up; later ones warm up
    /// before this returns.
    ///
    /// If the container closes while the hooks run, the instance is not
    /// warmed up and [`Registration::Rejected`] is returned. Its pre-destroy
    /// hooks still run, either here or as part of the close.
    pub async fn register(
        &self,
        instance: ManagedInstance,
        actions: Arc<TypeActionSet>,
    ) -> Result<Registration> {
        if self.status.is_closed() {
            tracing::warn!(container = %self.id, %instance, "Registration after close ignored");
            return Ok(Registration::Rejected);
        }
        if !self.states.track(&instance) {
            tracing::warn!(container = %self.id, %instance, "Instance already registered");
            return Ok(Registration::AlreadyManaged);
        }
        if actions.type_id() != instance.type_id() {
            tracing::warn!(
                container = %self.id,
                %instance,
                actions = actions.type_name(),
                "Action set was described for a different type"
            );
        }

        for hook_phase in HookPhase::PRE_WARM_UP {
            self.states
                .transition(&instance, hook_phase.lifecycle_phase())?;
            for hook in actions.hooks_for(hook_phase) {
                if let Err(e) = hook.invoke(&instance).await {
                    tracing::error!(
                        container = %self.id,
                        %instance,
                        error = %e,
                        "Registration failed"
                    );
                    self.states.fail(&instance);
                    if self.status.is_closed() {
                        self.states.forget(instance.id());
                    }
                    return Err(e);
                }
            }
        }

        self.states
            .transition(&instance, LifecyclePhase::PreWarmingUp)?;

        // Every constructed instance gets a record, so close releases it even
        // without pre-destroy hooks.
        let teardown: Vec<_> = actions.hooks_for(HookPhase::PreDestroy).cloned().collect();
        let retain = self.config.retain_instances;
        let record = TeardownRecord::new(&instance, teardown.clone(), retain);
        if !self.teardown.register(record) {
            tracing::warn!(
                container = %self.id,
                %instance,
                "Container closed during registration"
            );
            self.discard(&instance, &teardown).await;
            return Ok(Registration::Rejected);
        }

        let pending = PendingWarmUp { instance, actions };
        let ready = {
            let mut queue = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match queue.as_mut() {
                Some(waiting) => {
                    waiting.push(pending);
                    None
                }
                // The pending list only closes once the container is started
                // or closed.
                None if self.status.is_closed() => {
                    tracing::warn!(
                        container = %self.id,
                        instance = %pending.instance,
                        "Container closed before warm-up"
                    );
                    return Ok(Registration::Rejected);
                }
                None => Some(pending),
            }
        };

        if let Some(ready) = ready {
            self.warm_up(vec![ready], self.config.warm_up_wait()).await?;
        }
        Ok(Registration::Managed)
    }

    /// Start the container, waiting for parallel warm-up as configured
    pub async fn start(&self) -> Result<bool> {
        self.start_with_wait(self.config.warm_up_wait()).await
    }

    /// Start the container
    ///
    /// Warms up every instance registered so far. Serial warm-ups run on the
    /// calling task; parallel ones are awaited for up to `max_wait` (`None`
    /// waits until done). Returns `Ok(false)` if parallel work was still
    /// running when the wait expired; the container is started regardless.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidState`] if the container was not `Latent`, or
    /// [`LifecycleError::StartFailed`] if a serial warm-up failed, in which
    /// case the container is closed and listeners get `on_start_failed`.
    pub async fn start_with_wait(&self, max_wait: Option<Duration>) -> Result<bool> {
        if !self
            .status
            .advance(ContainerState::Latent, ContainerState::Starting)
        {
            return Err(LifecycleError::invalid_state(
                ContainerState::Latent,
                self.status.get(),
            ));
        }
        tracing::info!(container = %self.id, "Starting container...");

        let mut completed = true;
        while let Some(batch) = self.next_pending_batch()? {
            tracing::debug!(container = %self.id, instances = batch.len(), "Warming up");
            match self.warm_up(batch, max_wait).await {
                Ok(finished) => completed &= finished,
                Err(e) => return Err(self.fail_start(e)),
            }
        }

        self.listeners.notify_started();
        tracing::info!(container = %self.id, completed, "Container started");
        Ok(completed)
    }

    /// Close the container
    ///
    /// Tears down every instance in reverse registration order, stops
    /// tracking all of them and then broadcasts `on_stopped`. Only the first
    /// call does any work; concurrent callers wait for it to finish. After a
    /// failed start teardown still runs unless
    /// `skip_shutdown_on_start_failure` is set.
    pub async fn close(&self) -> TeardownReport {
        let _closing = self.closing.lock().await;

        if let Some(previous) = self.status.close() {
            tracing::info!(container = %self.id, %previous, "Closing container...");
        }
        // Nothing registers for warm-up once closed.
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let failure = self.start_failure();
        let report = if failure.is_some() && self.config.skip_shutdown_on_start_failure {
            if !self.teardown.is_closed() {
                tracing::warn!(container = %self.id, "Start failed, skipping teardown");
            }
            TeardownReport::default()
        } else {
            self.teardown.run_all(&self.states).await
        };
        // Instances that failed before warm-up, or whose teardown was skipped.
        let released = self.states.release_all();
        if released > 0 {
            tracing::debug!(container = %self.id, released, "Released remaining instances");
        }

        if self.listeners.notify_shutdown(failure) {
            tracing::info!(container = %self.id, "Container closed");
        }
        self.terminated.send_replace(true);
        report
    }

    /// Wait until [`close`](Self::close) has finished
    pub async fn await_termination(&self) {
        let mut terminated = self.terminated.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = terminated.wait_for(|done| *done).await;
    }

    /// Wait until [`close`](Self::close) has finished, or `timeout` elapses
    pub async fn await_termination_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.await_termination())
            .await
            .map_err(|_| {
                LifecycleError::timeout("termination", format!("Timeout after {:?}", timeout))
            })
    }

    /// Take the next batch of instances waiting to warm up.
    ///
    /// Once none are left the pending list is closed and the container moves
    /// to `Started` under the same lock, so a registration that finds the
    /// list closed always finds the container started (or closed).
    fn next_pending_batch(&self) -> Result<Option<Vec<PendingWarmUp>>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(batch) = pending.as_mut().filter(|batch| !batch.is_empty()) {
            return Ok(Some(std::mem::take(batch)));
        }

        *pending = None;
        if !self
            .status
            .advance(ContainerState::Starting, ContainerState::Started)
        {
            return Err(LifecycleError::invalid_state(
                ContainerState::Starting,
                self.status.get(),
            ));
        }
        Ok(None)
    }

    /// Tear down an instance whose registration lost the race with close.
    async fn discard(&self, instance: &ManagedInstance, hooks: &[HookDescriptor]) {
        if let Err(e) = self
            .states
            .transition_unless_failed(instance, LifecyclePhase::PreDestroying)
        {
            tracing::error!(
                container = %self.id,
                %instance,
                error = %e,
                "Could not enter PreDestroying"
            );
        }
        for hook in hooks {
            if let Err(e) = hook.invoke(instance).await {
                tracing::error!(
                    container = %self.id,
                    %instance,
                    hook = hook.name(),
                    error = %e,
                    "Teardown hook failed"
                );
            }
        }
        self.states.forget(instance.id());
    }

    async fn warm_up(
        &self,
        batch: Vec<PendingWarmUp>,
        max_wait: Option<Duration>,
    ) -> Result<bool> {
        let scheduler =
            WarmUpScheduler::new(self.config.warm_up_workers, Arc::clone(&self.states));

        for PendingWarmUp { instance, actions } in batch {
            let hooks: Vec<_> = actions.hooks_for(HookPhase::WarmUp).cloned().collect();
            if hooks.is_empty() {
                self.states.transition(&instance, LifecyclePhase::Active)?;
                continue;
            }
            self.states.transition(&instance, LifecyclePhase::WarmingUp)?;
            scheduler.schedule_all(WarmUpWorkItem::batch(instance, hooks));
        }

        if scheduler.is_empty() {
            return Ok(true);
        }
        scheduler.run_all(max_wait).await
    }

    fn fail_start(&self, error: LifecycleError) -> LifecycleError {
        tracing::error!(container = %self.id, error = %error, "Container failed to start");
        let cause = Arc::new(error);

        self.status
            .advance(ContainerState::Starting, ContainerState::Closed);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = self.start_failure.set(Arc::clone(&cause));
        self.listeners.notify_start_failed(Arc::clone(&cause));

        LifecycleError::StartFailed(cause)
    }
}
