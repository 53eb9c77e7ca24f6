//! Hook descriptors and per-type action sets.
//!
//! The orchestrator never inspects types. Something implementing
//! [`Introspect`](super::Introspect) (usually the `#[lifecycle]` attribute)
//! hands it a [`TypeActionSet`]: an ordered list of [`HookDescriptor`]s that
//! know how to invoke one lifecycle operation on an instance.

use super::{LifecycleError, LifecyclePhase, ManagedInstance, Result};
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use strum_macros::{Display, EnumIter};

/// Future returned by a hook invoker.
pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Type-erased hook body.
pub type HookFn = Arc<dyn Fn(ManagedInstance) -> HookFuture + Send + Sync>;

/// The kind of lifecycle operation a hook performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
pub enum HookPhase {
    /// Resource assignment, runs while `SettingResources`
    Resources,
    /// Runs while `PreConfiguration`
    PreConfiguration,
    /// Configuration binding, runs while `SettingConfiguration`
    Configuration,
    /// Runs while `PostConstructing`
    PostConstruct,
    /// Runs while `WarmingUp`, possibly in parallel with other instances
    WarmUp,
    /// Runs while `PreDestroying`, at container close
    PreDestroy,
}

impl HookPhase {
    /// The instance phase during which hooks of this kind execute.
    pub fn lifecycle_phase(self) -> LifecyclePhase {
        match self {
            HookPhase::Resources => LifecyclePhase::SettingResources,
            HookPhase::PreConfiguration => LifecyclePhase::PreConfiguration,
            HookPhase::Configuration => LifecyclePhase::SettingConfiguration,
            HookPhase::PostConstruct => LifecyclePhase::PostConstructing,
            HookPhase::WarmUp => LifecyclePhase::WarmingUp,
            HookPhase::PreDestroy => LifecyclePhase::PreDestroying,
        }
    }

    /// Hook kinds run synchronously inside `register`, in order.
    pub(crate) const PRE_WARM_UP: [HookPhase; 4] = [
        HookPhase::Resources,
        HookPhase::PreConfiguration,
        HookPhase::Configuration,
        HookPhase::PostConstruct,
    ];
}

/// One lifecycle operation on a type.
///
/// Descriptors are immutable and stateless: cloning one only clones the
/// pointer to its behavior.
#[derive(Clone)]
pub struct HookDescriptor {
    name: Arc<str>,
    phase: HookPhase,
    parallel: bool,
    invoker: HookFn,
}

impl HookDescriptor {
    /// Build a descriptor from a type-erased invoker.
    pub fn new(
        name: impl Into<Arc<str>>,
        phase: HookPhase,
        parallel: bool,
        invoker: HookFn,
    ) -> Self {
        Self {
            name: name.into(),
            phase,
            parallel,
            invoker,
        }
    }

    /// Build a descriptor whose body receives the concrete `Arc<T>`.
    ///
    /// Invoking it on an instance that is not a `T` fails the hook.
    pub fn typed<T, F, Fut>(
        name: impl Into<Arc<str>>,
        phase: HookPhase,
        parallel: bool,
        f: F,
    ) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name: Arc<str> = name.into();
        let hook_name = Arc::clone(&name);
        let invoker: HookFn = Arc::new(move |instance: ManagedInstance| -> HookFuture {
            match instance.downcast::<T>() {
                Some(this) => Box::pin(f(this)),
                None => {
                    let message = format!(
                        "hook '{}' expects {}, got {}",
                        hook_name,
                        std::any::type_name::<T>(),
                        instance.type_name()
                    );
                    Box::pin(async move { Err::<(), _>(anyhow::anyhow!(message)) })
                }
            }
        });
        Self::new(name, phase, parallel, invoker)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> HookPhase {
        self.phase
    }

    /// Whether this hook may run concurrently with other warm-up work.
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Run the hook against `instance`.
    ///
    /// The hook body runs on its own task so that a panic surfaces as
    /// [`LifecycleError::HookPanicked`] instead of unwinding through the
    /// caller.
    pub async fn invoke(&self, instance: &ManagedInstance) -> Result<()> {
        tracing::debug!(hook = %self.name, phase = %self.phase, %instance, "Invoking hook");
        let future = (self.invoker)(instance.clone());
        match tokio::spawn(future).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(LifecycleError::hook_failed(
                self.name.as_ref(),
                instance,
                self.phase,
                source,
            )),
            Err(join_error) => {
                let message = match join_error.try_into_panic() {
                    Ok(payload) => panic_message(payload.as_ref()),
                    Err(join_error) => join_error.to_string(),
                };
                Err(LifecycleError::hook_panicked(
                    self.name.as_ref(),
                    instance,
                    self.phase,
                    message,
                ))
            }
        }
    }
}

impl fmt::Debug for HookDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDescriptor")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Ordered, complete set of lifecycle hooks for one concrete type.
///
/// Order within a phase is the order the introspector declared the hooks in.
/// The set performs no deduplication of its own.
#[derive(Debug, Clone)]
pub struct TypeActionSet {
    type_id: TypeId,
    type_name: &'static str,
    hooks: Vec<HookDescriptor>,
}

impl TypeActionSet {
    pub fn new(type_id: TypeId, type_name: &'static str, hooks: Vec<HookDescriptor>) -> Self {
        Self {
            type_id,
            type_name,
            hooks,
        }
    }

    /// A set with no hooks for `T`.
    pub fn empty<T: Any>() -> Self {
        Self::new(TypeId::of::<T>(), std::any::type_name::<T>(), Vec::new())
    }

    /// Start building the action set for `T`.
    pub fn builder<T: Any + Send + Sync>() -> ActionSetBuilder<T> {
        ActionSetBuilder::new()
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn hooks(&self) -> &[HookDescriptor] {
        &self.hooks
    }

    /// Hooks of one kind, in declaration order.
    pub fn hooks_for(&self, phase: HookPhase) -> impl Iterator<Item = &HookDescriptor> + '_ {
        self.hooks.iter().filter(move |hook| hook.phase == phase)
    }

    pub fn has_hooks_for(&self, phase: HookPhase) -> bool {
        self.hooks_for(phase).next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Typed builder for a [`TypeActionSet`].
///
/// ```rust,ignore
/// let actions = TypeActionSet::builder::<Cache>()
///     .post_construct("connect", |cache| async move { cache.connect().await })
///     .warm_up_parallel("prefetch", |cache| async move { cache.prefetch().await })
///     .pre_destroy("flush", |cache| async move { cache.flush().await })
///     .build();
/// ```
pub struct ActionSetBuilder<T> {
    hooks: Vec<HookDescriptor>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> Default for ActionSetBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Any + Send + Sync> ActionSetBuilder<T> {
    pub fn new() -> Self {
        Self {
            hooks: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Append a hook of any kind.
    pub fn hook<F, Fut>(mut self, phase: HookPhase, name: &str, parallel: bool, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks
            .push(HookDescriptor::typed::<T, F, Fut>(name, phase, parallel, f));
        self
    }

    /// Append a pre-built descriptor.
    pub fn descriptor(mut self, descriptor: HookDescriptor) -> Self {
        self.hooks.push(descriptor);
        self
    }

    pub fn resources<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookPhase::Resources, name, false, f)
    }

    pub fn pre_configuration<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookPhase::PreConfiguration, name, false, f)
    }

    pub fn configuration<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookPhase::Configuration, name, false, f)
    }

    pub fn post_construct<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookPhase::PostConstruct, name, false, f)
    }

    /// Warm-up hook that runs on the caller's serial queue.
    pub fn warm_up<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookPhase::WarmUp, name, false, f)
    }

    /// Warm-up hook that may run on a background worker.
    pub fn warm_up_parallel<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookPhase::WarmUp, name, true, f)
    }

    pub fn pre_destroy<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hook(HookPhase::PreDestroy, name, false, f)
    }

    pub fn build(self) -> TypeActionSet {
        TypeActionSet::new(TypeId::of::<T>(), std::any::type_name::<T>(), self.hooks)
    }
}
