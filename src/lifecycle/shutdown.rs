//! Teardown sequencing and graceful shutdown
//!
//! [`ShutdownSequencer`] runs pre-destroy hooks in reverse registration order
//! when the container closes. [`ShutdownHandler`] and [`shutdown_signal`] tie
//! that to OS signals.

use super::{
    HookDescriptor, InstanceId, InstanceRef, LifecycleManager, LifecyclePhase,
    LifecycleStateMachine, ManagedInstance,
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::signal;

/// Pre-destroy hooks for one registered instance.
#[derive(Debug)]
pub struct TeardownRecord {
    instance: InstanceRef,
    hooks: Vec<HookDescriptor>,
}

impl TeardownRecord {
    /// `retain` keeps the instance alive until teardown; otherwise the record
    /// only holds a weak reference and is skipped if the instance is dropped.
    pub fn new(instance: &ManagedInstance, hooks: Vec<HookDescriptor>, retain: bool) -> Self {
        Self {
            instance: InstanceRef::new(instance, retain),
            hooks,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.instance.id()
    }

    pub fn hooks(&self) -> &[HookDescriptor] {
        &self.hooks
    }
}

/// Outcome of one teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Records whose hooks were invoked
    pub torn_down: usize,
    /// Records whose instance had already been dropped
    pub skipped: usize,
    /// Hooks that returned an error or panicked
    pub failures: usize,
}

#[derive(Default)]
struct Records {
    records: Vec<TeardownRecord>,
    closed: bool,
}

/// Append-only list of [`TeardownRecord`]s, consumed exactly once.
#[derive(Default)]
pub struct ShutdownSequencer {
    inner: Mutex<Records>,
}

impl ShutdownSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Returns `false`, and drops the record, once
    /// [`run_all`](Self::run_all) has started.
    pub fn register(&self, record: TeardownRecord) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            tracing::warn!(
                instance = %record.id(),
                type_name = record.instance.type_name(),
                "Teardown registration after close ignored"
            );
            return false;
        }
        inner.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Run every record's hooks, last registered first.
    ///
    /// Only the first call does anything; later calls return an empty report.
    /// Hook failures are logged and never stop the pass. Each torn-down
    /// instance is forgotten by `states`.
    pub async fn run_all(&self, states: &LifecycleStateMachine) -> TeardownReport {
        let records = {
            let mut inner = self.lock();
            if inner.closed {
                return TeardownReport::default();
            }
            inner.closed = true;
            std::mem::take(&mut inner.records)
        };

        tracing::info!("Running teardown for {} instances...", records.len());
        let mut report = TeardownReport::default();

        for record in records.into_iter().rev() {
            let Some(instance) = record.instance.get() else {
                tracing::debug!(
                    instance = %record.id(),
                    type_name = record.instance.type_name(),
                    "Instance dropped before teardown, skipping"
                );
                report.skipped += 1;
                states.forget(record.id());
                continue;
            };

            if let Err(e) =
                states.transition_unless_failed(&instance, LifecyclePhase::PreDestroying)
            {
                tracing::error!(%instance, error = %e, "Could not enter PreDestroying");
            }

            for hook in &record.hooks {
                if let Err(e) = hook.invoke(&instance).await {
                    // Log error but continue with other hooks
                    tracing::error!(
                        %instance,
                        hook = hook.name(),
                        error = %e,
                        "Teardown hook failed"
                    );
                    report.failures += 1;
                }
            }

            states.forget(instance.id());
            report.torn_down += 1;
            tracing::debug!(%instance, "Torn down");
        }

        tracing::info!(
            torn_down = report.torn_down,
            skipped = report.skipped,
            failures = report.failures,
            "Teardown complete"
        );
        report
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Records> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Closes a [`LifecycleManager`] when the process is asked to stop
///
/// # Example
///
/// ```rust,ignore
/// let handler = ShutdownHandler::new(Arc::clone(&manager));
/// tokio::spawn(async move { handler.wait_for_shutdown().await });
/// manager.await_termination().await;
/// ```
pub struct ShutdownHandler {
    manager: Arc<LifecycleManager>,
}

impl ShutdownHandler {
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self { manager }
    }

    /// Wait for SIGTERM or Ctrl+C, then close the manager.
    pub async fn wait_for_shutdown(&self) {
        shutdown_signal().await;
        tracing::info!("Starting graceful shutdown...");
        self.manager.close().await;
        tracing::info!("Graceful shutdown complete");
    }
}

/// Completes when a shutdown signal (Ctrl+C or SIGTERM) is received
///
/// A signal that cannot be listened for is logged and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
