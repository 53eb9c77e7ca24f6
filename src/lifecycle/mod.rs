//! Lifecycle Module
//!
//! Drives managed instances through an ordered set of phases, from
//! construction to teardown, and tracks the container's own state.
//!
//! # Lifecycle Phases
//!
//! ```text
//! Latent
//!    ↓
//! SettingResources         ← #[resources]
//!    ↓
//! PreConfiguration         ← #[pre_configuration]
//!    ↓
//! SettingConfiguration     ← #[configuration]
//!    ↓
//! PostConstructing         ← #[post_construct]
//!    ↓
//! PreWarmingUp             (waits for container start)
//!    ↓
//! WarmingUp                ← #[warm_up] / #[warm_up(parallel)]
//!    ↓
//! Active
//!    ↓
//! [Running...]
//!    ↓
//! PreDestroying            ← #[pre_destroy], reverse registration order
//! ```
//!
//! Any failing hook moves its instance to `Error`, which is terminal.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence::lifecycle::LifecycleManager;
//! use std::sync::Arc;
//!
//! pub struct DatabaseService {
//!     pool: Pool,
//! }
//!
//! #[cadence::lifecycle]
//! impl DatabaseService {
//!     #[post_construct]
//!     async fn connect(&self) -> anyhow::Result<()> {
//!         tracing::info!("Initializing database connection");
//!         self.pool.connect().await
//!     }
//!
//!     #[pre_destroy]
//!     async fn close(&self) {
//!         tracing::info!("Closing database connections");
//!         self.pool.close().await;
//!     }
//! }
//!
//! let manager = LifecycleManager::new();
//! manager.manage(Arc::new(DatabaseService::new())).await?;
//! manager.start().await?;
//! ```

mod application;
mod cache;
mod error;
mod hook;
mod instance;
mod listener;
mod manager;
mod phase;
mod shutdown;
mod state;
mod traits;
mod warmup;

pub use application::{Application, ApplicationBuilder};
pub use cache::ActionCache;
pub use error::{AggregateError, LifecycleError, Result};
pub use hook::{ActionSetBuilder, HookDescriptor, HookFn, HookFuture, HookPhase, TypeActionSet};
pub use instance::{InstanceId, InstanceRef, ManagedInstance, WeakInstance};
pub use listener::ListenerRegistry;
pub use manager::{LifecycleManager, Registration};
pub use phase::{ContainerState, ContainerStatus, LifecyclePhase};
pub use shutdown::{
    ShutdownHandler, ShutdownSequencer, TeardownRecord, TeardownReport, shutdown_signal,
};
pub use state::{InstanceSnapshot, LifecycleStateMachine};
pub use traits::{Introspect, LifecycleListener, PostConstruct, PreDestroy, WarmUp};
pub use warmup::{WarmUpScheduler, WarmUpWorkItem};
