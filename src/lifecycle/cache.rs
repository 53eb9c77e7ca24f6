use super::TypeActionSet;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;

/// Per-type memo of [`TypeActionSet`]s.
///
/// Describing a type is paid for once. Under a race the supplier may run more
/// than once, but only the first set to be installed is ever handed out.
#[derive(Default)]
pub struct ActionCache {
    actions: DashMap<TypeId, Arc<TypeActionSet>>,
}

impl ActionCache {
    pub fn new() -> Self {
        Self {
            actions: DashMap::new(),
        }
    }

    /// Return the cached set for `type_id`, computing it with `supplier` if
    /// this is the first request.
    pub fn get_or_compute<F>(&self, type_id: TypeId, supplier: F) -> Arc<TypeActionSet>
    where
        F: FnOnce() -> TypeActionSet,
    {
        if let Some(existing) = self.actions.get(&type_id) {
            return Arc::clone(existing.value());
        }

        // The supplier runs outside any shard lock so that describing one
        // type may consult the cache for another.
        let computed = Arc::new(supplier());
        debug_assert_eq!(computed.type_id(), type_id);

        let entry = self.actions.entry(type_id).or_insert(computed);
        Arc::clone(entry.value())
    }

    pub fn get(&self, type_id: TypeId) -> Option<Arc<TypeActionSet>> {
        self.actions
            .get(&type_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.actions.contains_key(&type_id)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    struct Target;

    #[test]
    fn test_computes_once_when_uncontended() {
        let cache = ActionCache::new();
        let calls = AtomicUsize::new(0);
        let supplier = || {
            calls.fetch_add(1, Ordering::SeqCst);
            TypeActionSet::empty::<Target>()
        };

        let first = cache.get_or_compute(TypeId::of::<Target>(), supplier);
        let second = cache.get_or_compute(TypeId::of::<Target>(), supplier);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_callers_see_one_set() {
        const CALLERS: usize = 50;

        let cache = Arc::new(ActionCache::new());
        let barrier = Arc::new(Barrier::new(CALLERS));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_compute(TypeId::of::<Target>(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        TypeActionSet::empty::<Target>()
                    })
                })
            })
            .collect();

        let sets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(sets.iter().all(|set| Arc::ptr_eq(set, &sets[0])));
        assert!(calls.load(Ordering::SeqCst) >= 1);
        assert!(Arc::ptr_eq(
            &cache.get(TypeId::of::<Target>()).unwrap(),
            &sets[0]
        ));
    }
}
