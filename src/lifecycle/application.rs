//! Application Bootstrap
//!
//! Provides a high-level API that pairs the DI container with a
//! [`LifecycleManager`], so every provided singleton is also managed.

use super::{
    ContainerState, Introspect, LifecycleError, LifecycleListener, LifecycleManager,
    Registration, ShutdownHandler, TeardownReport,
};
use crate::config::LifecycleConfig;
use crate::di::{Container, Injectable};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// Container and lifecycle manager wired together
///
/// # Example
///
/// ```rust,ignore
/// use cadence::lifecycle::Application;
///
/// #[tokio::main]
/// async fn main() -> cadence::Result<()> {
///     let app = Application::builder()
///         .warm_up_timeout(Duration::from_secs(30))
///         .build();
///
///     app.provide(Database::new()).await?;
///     app.construct::<ReportService>().await?;
///
///     app.start().await?;
///     app.spawn_shutdown_handler();
///     app.await_termination().await;
///     Ok(())
/// }
/// ```
pub struct Application {
    container: Arc<Container>,
    lifecycle_manager: Arc<LifecycleManager>,
}

impl Application {
    /// Create a new application builder
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Get a reference to the container
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Get a reference to the lifecycle manager
    pub fn lifecycle_manager(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle_manager
    }

    /// Manage `instance` and store it in the container
    ///
    /// The instance only becomes resolvable once its pre-warm-up hooks have
    /// succeeded.
    pub async fn provide<T: Introspect>(&self, instance: T) -> Result<Arc<T>> {
        self.provide_shared(Arc::new(instance)).await
    }

    /// Like [`provide`](Self::provide) for an instance that is already shared
    pub async fn provide_shared<T: Introspect>(&self, instance: Arc<T>) -> Result<Arc<T>> {
        match self.lifecycle_manager.manage(Arc::clone(&instance)).await? {
            Registration::Rejected => {
                return Err(LifecycleError::invalid_state(
                    ContainerState::Started,
                    self.lifecycle_manager.state(),
                )
                .into());
            }
            Registration::Managed | Registration::AlreadyManaged => {}
        }
        self.container.insert(Arc::clone(&instance));
        Ok(instance)
    }

    /// Build `T` from the container, then [`provide`](Self::provide) it
    pub async fn construct<T: Injectable + Introspect>(&self) -> Result<Arc<T>> {
        let instance = T::inject(&self.container)?;
        self.provide(instance).await
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.container.resolve::<T>()
    }

    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.lifecycle_manager.add_listener(listener);
    }

    /// Start the container; see [`LifecycleManager::start`].
    pub async fn start(&self) -> Result<bool> {
        Ok(self.lifecycle_manager.start().await?)
    }

    /// Perform graceful shutdown
    ///
    /// Runs pre-destroy hooks in reverse registration order.
    pub async fn close(&self) -> TeardownReport {
        tracing::info!("Shutting down application...");
        let report = self.lifecycle_manager.close().await;
        tracing::info!("Application shutdown complete");
        report
    }

    pub async fn await_termination(&self) {
        self.lifecycle_manager.await_termination().await;
    }

    /// Create a shutdown handler for graceful shutdown
    pub fn shutdown_handler(&self) -> ShutdownHandler {
        ShutdownHandler::new(Arc::clone(&self.lifecycle_manager))
    }

    /// Spawn a background task that waits for shutdown signals
    /// and performs graceful shutdown automatically.
    ///
    /// Returns a handle that can be used to wait for the shutdown to complete.
    pub fn spawn_shutdown_handler(&self) -> tokio::task::JoinHandle<()> {
        let shutdown_handler = self.shutdown_handler();
        tokio::spawn(async move {
            shutdown_handler.wait_for_shutdown().await;
        })
    }
}

/// Builder for Application
pub struct ApplicationBuilder {
    container: Option<Container>,
    config: Option<LifecycleConfig>,
    warm_up_timeout: Option<Duration>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    /// Create a new application builder
    pub fn new() -> Self {
        Self {
            container: None,
            config: None,
            warm_up_timeout: None,
            listeners: Vec::new(),
        }
    }

    /// Start from an existing container instead of an empty one
    pub fn container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    /// Use `config` instead of reading `CADENCE_*` environment variables
    pub fn config(mut self, config: LifecycleConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set how long `start` waits for parallel warm-up
    pub fn warm_up_timeout(mut self, timeout: Duration) -> Self {
        self.warm_up_timeout = Some(timeout);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Application {
        let mut config = self.config.unwrap_or_else(LifecycleConfig::from_env);
        if let Some(timeout) = self.warm_up_timeout {
            config = config.warm_up_timeout(timeout);
        }

        let lifecycle_manager = LifecycleManager::with_config(config);
        for listener in self.listeners {
            lifecycle_manager.add_listener(listener);
        }
        tracing::debug!(container = %lifecycle_manager.id(), "Application built");

        Application {
            container: Arc::new(self.container.unwrap_or_default()),
            lifecycle_manager: Arc::new(lifecycle_manager),
        }
    }
}
