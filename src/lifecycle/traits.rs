//! Lifecycle traits
//!
//! [`Introspect`] is how a type describes its hooks to the orchestrator and
//! [`LifecycleListener`] is how observers follow along. The hook traits
//! ([`PostConstruct`], [`WarmUp`], [`PreDestroy`]) are an alternative to the
//! `#[lifecycle]` attribute for types that prefer plain trait impls.

use super::{ActionSetBuilder, LifecycleError, LifecyclePhase, ManagedInstance, TypeActionSet};
use async_trait::async_trait;
use std::any::Any;

/// Produces the ordered hook list for a concrete type.
///
/// Usually generated by `#[cadence::lifecycle]`. When a type overrides a hook
/// it inherited the name for, only one descriptor should be produced for it;
/// the orchestrator runs every descriptor it is given.
pub trait Introspect: Any + Send + Sync {
    fn describe() -> TypeActionSet;
}

/// Observer of instance phase changes and container events.
///
/// Every callback has an empty default. Callbacks run synchronously on the
/// thread that caused the event; a panicking callback is logged and does not
/// stop delivery to other listeners.
///
/// # Example
///
/// ```rust,ignore
/// struct PhaseLogger;
///
/// impl LifecycleListener for PhaseLogger {
///     fn on_state_changed(&self, instance: &ManagedInstance, phase: LifecyclePhase) {
///         tracing::info!(%instance, %phase, "phase change");
///     }
/// }
/// ```
pub trait LifecycleListener: Send + Sync {
    /// An instance moved to `phase`.
    fn on_state_changed(&self, _instance: &ManagedInstance, _phase: LifecyclePhase) {}

    /// The container finished starting.
    fn on_started(&self) {}

    /// The container failed to start. Never fired together with `on_started`.
    fn on_start_failed(&self, _cause: &LifecycleError) {}

    /// The container was closed, carrying the start failure if there was one.
    fn on_stopped(&self, _cause: Option<&LifecycleError>) {}
}

/// Called after resources and configuration have been assigned
///
/// # Example
///
/// ```rust,ignore
/// #[async_trait]
/// impl PostConstruct for DatabaseService {
///     async fn post_construct(&self) -> anyhow::Result<()> {
///         self.pool.connect().await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait PostConstruct: Send + Sync {
    async fn post_construct(&self) -> anyhow::Result<()>;
}

/// Slow initialization that runs once the container has started
///
/// Warm-ups run on the caller's serial queue unless [`WarmUp::parallel`]
/// returns `true`, in which case they are spread over background workers.
#[async_trait]
pub trait WarmUp: Send + Sync {
    async fn warm_up(&self) -> anyhow::Result<()>;

    fn parallel() -> bool
    where
        Self: Sized,
    {
        false
    }
}

/// Called when the container closes
///
/// # Note
///
/// Instances are torn down in **reverse order** of registration.
#[async_trait]
pub trait PreDestroy: Send + Sync {
    async fn pre_destroy(&self) -> anyhow::Result<()>;
}

impl<T: Any + Send + Sync> ActionSetBuilder<T> {
    /// Add `T`'s [`PostConstruct`] impl as a post-construct hook.
    pub fn with_post_construct(self) -> Self
    where
        T: PostConstruct,
    {
        self.post_construct("post_construct", |this| async move {
            this.post_construct().await
        })
    }

    /// Add `T`'s [`WarmUp`] impl as a warm-up hook.
    pub fn with_warm_up(self) -> Self
    where
        T: WarmUp,
    {
        self.hook(
            super::HookPhase::WarmUp,
            "warm_up",
            T::parallel(),
            |this| async move { this.warm_up().await },
        )
    }

    /// Add `T`'s [`PreDestroy`] impl as a teardown hook.
    pub fn with_pre_destroy(self) -> Self
    where
        T: PreDestroy,
    {
        self.pre_destroy("pre_destroy", |this| async move { this.pre_destroy().await })
    }
}
