//! # Cadence
//!
//! A lifecycle orchestrator for long-lived managed objects.
//!
//! Cadence drives every registered instance through an ordered set of
//! phases: resource and configuration assignment, post-construction, warm-up
//! (serial or spread across background workers) and finally teardown in
//! reverse registration order. Observers follow along through
//! [`LifecycleListener`]s.
//!
//! ## Features
//!
//! - **Declarative hooks**: tag methods with `#[post_construct]`, `#[warm_up]`,
//!   `#[pre_destroy]` and friends inside a `#[cadence::lifecycle]` impl block
//! - **Parallel warm-up**: slow initialization runs on a fixed set of workers
//!   with an optional bounded wait
//! - **Ordered teardown**: pre-destroy hooks run exactly once, last in first out
//! - **Dependency Injection**: a small singleton container and
//!   `#[derive(Injectable)]`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cadence::prelude::*;
//!
//! pub struct Database {
//!     url: String,
//! }
//!
//! #[cadence::lifecycle]
//! impl Database {
//!     #[post_construct]
//!     async fn connect(&self) -> anyhow::Result<()> {
//!         tracing::info!(url = %self.url, "connecting");
//!         Ok(())
//!     }
//!
//!     #[pre_destroy]
//!     async fn disconnect(&self) {
//!         tracing::info!("disconnecting");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> cadence::Result<()> {
//!     let app = Application::builder().build();
//!     app.provide(Database { url: "postgres://localhost".into() }).await?;
//!
//!     app.start().await?;
//!     app.spawn_shutdown_handler();
//!     app.await_termination().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod di;
pub mod error;
pub mod lifecycle;

// Re-export core types
pub use config::{ConfigService, LifecycleConfig};
pub use di::{Container, Injectable};
pub use error::{CadenceError, Result};
pub use lifecycle::{
    Application, Introspect, LifecycleError, LifecycleListener, LifecycleManager,
    LifecyclePhase, ManagedInstance,
};

// Re-export macros
pub use cadence_macro::{Injectable as DeriveInjectable, lifecycle};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;

/// Prelude module for convenient imports
///
/// ```
/// use cadence::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigService, LifecycleConfig};
    pub use crate::di::{Container, Injectable};
    pub use crate::error::{CadenceError, Result};
    pub use crate::lifecycle::{
        Application, ApplicationBuilder, ContainerState, Introspect, LifecycleError,
        LifecycleListener, LifecycleManager, LifecyclePhase, ManagedInstance, PostConstruct,
        PreDestroy, Registration, ShutdownHandler, TypeActionSet, WarmUp, shutdown_signal,
    };
    pub use crate::{DeriveInjectable as Injectable, lifecycle};
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
