//! Identity-tracked handles to managed objects.

use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

/// Identity of a managed instance.
///
/// This is the address of the instance's `Arc` allocation. Two equal-looking
/// values in separate allocations always get distinct ids. Anything that keys
/// state by an `InstanceId` also holds at least a [`Weak`] to the allocation,
/// which keeps the address from being reused while the id is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstanceId(usize);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A type-erased, reference-counted application object.
#[derive(Clone)]
pub struct ManagedInstance {
    object: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl ManagedInstance {
    pub fn new<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Self {
            object,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> InstanceId {
        InstanceId(Arc::as_ptr(&self.object) as *const () as usize)
    }

    /// Concrete type of the wrapped object.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Recover the concrete `Arc<T>`, or `None` if the object is not a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).downcast::<T>().ok()
    }

    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance {
            object: Arc::downgrade(&self.object),
            id: self.id(),
            type_id: self.type_id,
            type_name: self.type_name,
        }
    }

    /// Whether both handles point at the same allocation.
    pub fn same_as(&self, other: &ManagedInstance) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl<T: Any + Send + Sync> From<Arc<T>> for ManagedInstance {
    fn from(object: Arc<T>) -> Self {
        Self::new(object)
    }
}

impl fmt::Debug for ManagedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedInstance")
            .field("id", &self.id())
            .field("type", &self.type_name)
            .finish()
    }
}

impl fmt::Display for ManagedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.type_name, self.id())
    }
}

/// A non-owning handle that remembers the identity of its instance.
#[derive(Clone)]
pub struct WeakInstance {
    object: Weak<dyn Any + Send + Sync>,
    id: InstanceId,
    type_id: TypeId,
    type_name: &'static str,
}

impl WeakInstance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn upgrade(&self) -> Option<ManagedInstance> {
        self.object.upgrade().map(|object| ManagedInstance {
            object,
            type_id: self.type_id,
            type_name: self.type_name,
        })
    }
}

impl fmt::Debug for WeakInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakInstance")
            .field("id", &self.id)
            .field("type", &self.type_name)
            .finish()
    }
}

/// How a long-lived registry holds on to an instance.
#[derive(Debug, Clone)]
pub enum InstanceRef {
    Retained(ManagedInstance),
    Weak(WeakInstance),
}

impl InstanceRef {
    pub fn new(instance: &ManagedInstance, retain: bool) -> Self {
        if retain {
            InstanceRef::Retained(instance.clone())
        } else {
            InstanceRef::Weak(instance.downgrade())
        }
    }

    pub fn id(&self) -> InstanceId {
        match self {
            InstanceRef::Retained(instance) => instance.id(),
            InstanceRef::Weak(weak) => weak.id(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            InstanceRef::Retained(instance) => instance.type_name(),
            InstanceRef::Weak(weak) => weak.type_name(),
        }
    }

    /// Returns `None` once a weakly held instance has been dropped.
    pub fn get(&self) -> Option<ManagedInstance> {
        match self {
            InstanceRef::Retained(instance) => Some(instance.clone()),
            InstanceRef::Weak(weak) => weak.upgrade(),
        }
    }
}
