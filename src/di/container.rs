use crate::error::{CadenceError, Result};
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Thread-safe singleton store, one instance per concrete type.
///
/// Instances are kept as `Arc`s so the same allocation can be handed to the
/// [`LifecycleManager`](crate::lifecycle::LifecycleManager), whose identity
/// checks are pointer-based.
#[derive(Clone, Default)]
pub struct Container {
    services: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `instance`, returning the shared handle.
    pub fn register<T: Send + Sync + 'static>(&self, instance: T) -> Arc<T> {
        let instance = Arc::new(instance);
        self.insert(Arc::clone(&instance));
        instance
    }

    /// Store an already shared instance. Returns the instance it replaced, if any.
    pub fn insert<T: Send + Sync + 'static>(&self, instance: Arc<T>) -> Option<Arc<T>> {
        let previous = self.services.insert(TypeId::of::<T>(), instance)?;
        tracing::debug!(type_name = std::any::type_name::<T>(), "Replaced registered instance");
        previous.downcast::<T>().ok()
    }

    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let type_name = std::any::type_name::<T>();
        let instance = self
            .services
            .get(&TypeId::of::<T>())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CadenceError::DependencyNotFound {
                type_name: type_name.to_string(),
            })?;
        instance
            .downcast::<T>()
            .map_err(|_| CadenceError::DowncastFailed {
                type_name: type_name.to_string(),
            })
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
