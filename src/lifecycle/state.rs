use super::{
    ContainerStatus, InstanceId, LifecycleError, LifecyclePhase, ListenerRegistry,
    ManagedInstance, Result, WeakInstance,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Point-in-time view of one tracked instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub type_name: &'static str,
    pub phase: LifecyclePhase,
    /// When the instance entered `phase`.
    pub since: DateTime<Utc>,
}

struct Slot {
    instance: WeakInstance,
    phase: AtomicU8,
    entered_at: AtomicI64,
    // Held across the store and the listener broadcast, so listeners see one
    // instance's transitions in the order they happened.
    transition: Mutex<()>,
}

impl Slot {
    fn new(instance: &ManagedInstance) -> Self {
        Self {
            instance: instance.downgrade(),
            phase: AtomicU8::new(LifecyclePhase::Latent as u8),
            entered_at: AtomicI64::new(Utc::now().timestamp_micros()),
            transition: Mutex::new(()),
        }
    }

    fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::from_repr(self.phase.load(Ordering::Acquire))
            .unwrap_or(LifecyclePhase::Error)
    }

    fn since(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.entered_at.load(Ordering::Acquire))
            .unwrap_or_default()
    }
}

/// Tracks which phase every managed instance is in.
///
/// Transitions are validated against phase ordering and broadcast to the
/// [`ListenerRegistry`] before `transition` returns. Listeners must not
/// transition the instance they are being notified about.
pub struct LifecycleStateMachine {
    slots: DashMap<InstanceId, Arc<Slot>>,
    listeners: Arc<ListenerRegistry>,
    status: Arc<ContainerStatus>,
}

impl LifecycleStateMachine {
    pub fn new(listeners: Arc<ListenerRegistry>, status: Arc<ContainerStatus>) -> Self {
        Self {
            slots: DashMap::new(),
            listeners,
            status,
        }
    }

    /// Start tracking `instance` in `Latent`.
    ///
    /// Returns `false` if it is already tracked.
    pub fn track(&self, instance: &ManagedInstance) -> bool {
        match self.slots.entry(instance.id()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Slot::new(instance)));
                true
            }
        }
    }

    pub fn is_tracked(&self, id: InstanceId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Move `instance` to `phase` and notify listeners.
    ///
    /// `phase` must be `Error` or later than the current phase; an untracked
    /// instance counts as `Latent` and becomes tracked.
    pub fn transition(&self, instance: &ManagedInstance, phase: LifecyclePhase) -> Result<()> {
        let slot = self.slot(instance);
        let _guard = slot.transition.lock().unwrap_or_else(PoisonError::into_inner);

        let current = slot.phase();
        if !current.can_advance_to(phase) {
            return Err(LifecycleError::ordering(instance, current, phase));
        }
        self.store(&slot, instance, current, phase);
        Ok(())
    }

    /// Like [`transition`](Self::transition), but leaves an instance that is
    /// already in `Error` alone. Returns whether the transition happened.
    pub fn transition_unless_failed(
        &self,
        instance: &ManagedInstance,
        phase: LifecyclePhase,
    ) -> Result<bool> {
        let slot = self.slot(instance);
        let _guard = slot.transition.lock().unwrap_or_else(PoisonError::into_inner);

        let current = slot.phase();
        if current.is_terminal() {
            return Ok(false);
        }
        if !current.can_advance_to(phase) {
            return Err(LifecycleError::ordering(instance, current, phase));
        }
        self.store(&slot, instance, current, phase);
        Ok(true)
    }

    /// Mark `instance` as failed. Returns `false` if it already was.
    pub fn fail(&self, instance: &ManagedInstance) -> bool {
        let slot = self.slot(instance);
        let _guard = slot.transition.lock().unwrap_or_else(PoisonError::into_inner);

        let current = slot.phase();
        if current.is_terminal() {
            return false;
        }
        self.store(&slot, instance, current, LifecyclePhase::Error);
        true
    }

    /// Phase of `id`.
    ///
    /// An untracked instance is considered `Active` once the container has
    /// started and `Latent` before that.
    pub fn current_phase(&self, id: InstanceId) -> LifecyclePhase {
        match self.phase_of(id) {
            Some(phase) => phase,
            None if self.status.is_started() => LifecyclePhase::Active,
            None => LifecyclePhase::Latent,
        }
    }

    /// Tracked phase of `id`, or `None` if it is not tracked.
    pub fn phase_of(&self, id: InstanceId) -> Option<LifecyclePhase> {
        self.slots.get(&id).map(|slot| slot.phase())
    }

    /// Stop tracking `id`. Returns `false` if it was not tracked.
    pub fn forget(&self, id: InstanceId) -> bool {
        self.slots.remove(&id).is_some()
    }

    /// Stop tracking every instance. Returns how many were still tracked.
    pub fn release_all(&self) -> usize {
        let ids: Vec<_> = self.slots.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.forget(*id)).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current phase of every tracked instance, ordered by id.
    pub fn snapshot(&self) -> Vec<InstanceSnapshot> {
        let mut snapshot: Vec<_> = self
            .slots
            .iter()
            .map(|entry| InstanceSnapshot {
                id: *entry.key(),
                type_name: entry.value().instance.type_name(),
                phase: entry.value().phase(),
                since: entry.value().since(),
            })
            .collect();
        snapshot.sort_by_key(|s| s.id);
        snapshot
    }

    fn slot(&self, instance: &ManagedInstance) -> Arc<Slot> {
        // Clone the Arc out so no shard lock is held while notifying.
        let entry = self
            .slots
            .entry(instance.id())
            .or_insert_with(|| Arc::new(Slot::new(instance)));
        Arc::clone(entry.value())
    }

    fn store(
        &self,
        slot: &Slot,
        instance: &ManagedInstance,
        from: LifecyclePhase,
        to: LifecyclePhase,
    ) {
        slot.phase.store(to as u8, Ordering::Release);
        slot.entered_at
            .store(Utc::now().timestamp_micros(), Ordering::Release);
        tracing::trace!(%instance, %from, %to, "Phase transition");
        self.listeners.notify_state_changed(instance, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ContainerState, LifecycleListener};
    use std::sync::Barrier;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(InstanceId, LifecyclePhase)>>,
    }

    impl LifecycleListener for Recorder {
        fn on_state_changed(&self, instance: &ManagedInstance, phase: LifecyclePhase) {
            self.seen.lock().unwrap().push((instance.id(), phase));
        }
    }

    fn machine() -> (LifecycleStateMachine, Arc<Recorder>, Arc<ContainerStatus>) {
        let listeners = Arc::new(ListenerRegistry::new());
        let recorder = Arc::new(Recorder::default());
        listeners.add_listener(recorder.clone());
        let status = Arc::new(ContainerStatus::new());
        (
            LifecycleStateMachine::new(listeners, Arc::clone(&status)),
            recorder,
            status,
        )
    }

    #[test]
    fn test_forward_transitions_are_broadcast() {
        let (machine, recorder, _) = machine();
        let instance = ManagedInstance::new(Arc::new("svc"));

        assert!(machine.track(&instance));
        assert!(!machine.track(&instance));
        machine
            .transition(&instance, LifecyclePhase::PostConstructing)
            .unwrap();
        machine.transition(&instance, LifecyclePhase::Active).unwrap();

        assert_eq!(machine.phase_of(instance.id()), Some(LifecyclePhase::Active));
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![
                (instance.id(), LifecyclePhase::PostConstructing),
                (instance.id(), LifecyclePhase::Active),
            ]
        );
    }

    #[test]
    fn test_backward_transition_is_rejected() {
        let (machine, recorder, _) = machine();
        let instance = ManagedInstance::new(Arc::new(1_u8));

        machine.transition(&instance, LifecyclePhase::Active).unwrap();
        let err = machine
            .transition(&instance, LifecyclePhase::WarmingUp)
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::OrderingViolation {
                from: LifecyclePhase::Active,
                to: LifecyclePhase::WarmingUp,
                ..
            }
        ));
        assert!(machine.transition(&instance, LifecyclePhase::Active).is_err());
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_error_is_terminal() {
        let (machine, _, _) = machine();
        let instance = ManagedInstance::new(Arc::new(2_u8));

        machine.transition(&instance, LifecyclePhase::WarmingUp).unwrap();
        assert!(machine.fail(&instance));
        assert!(!machine.fail(&instance));
        assert!(machine.transition(&instance, LifecyclePhase::Active).is_err());
        assert_eq!(
            machine
                .transition_unless_failed(&instance, LifecyclePhase::Active)
                .unwrap(),
            false
        );
        assert_eq!(machine.current_phase(instance.id()), LifecyclePhase::Error);
    }

    #[test]
    fn test_untracked_phase_depends_on_container() {
        let (machine, _, status) = machine();
        let stranger = ManagedInstance::new(Arc::new(3_u8));

        assert_eq!(machine.current_phase(stranger.id()), LifecyclePhase::Latent);
        status.advance(ContainerState::Latent, ContainerState::Starting);
        status.advance(ContainerState::Starting, ContainerState::Started);
        assert_eq!(machine.current_phase(stranger.id()), LifecyclePhase::Active);
        assert_eq!(machine.phase_of(stranger.id()), None);
    }

    #[test]
    fn test_forget_and_snapshot() {
        let (machine, _, _) = machine();
        let a = ManagedInstance::new(Arc::new(String::from("a")));
        let b = ManagedInstance::new(Arc::new(String::from("b")));
        machine.transition(&a, LifecyclePhase::Active).unwrap();
        machine.transition(&b, LifecyclePhase::PreWarmingUp).unwrap();

        let snapshot = machine.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(
            snapshot
                .iter()
                .any(|s| s.id == b.id() && s.phase == LifecyclePhase::PreWarmingUp)
        );

        assert!(machine.forget(a.id()));
        assert!(!machine.forget(a.id()));
        assert_eq!(machine.len(), 1);
    }

    #[test]
    fn test_release_all_empties_the_table() {
        let (machine, _, _) = machine();
        let failed = ManagedInstance::new(Arc::new(1_u32));
        let idle = ManagedInstance::new(Arc::new(2_u32));
        machine.fail(&failed);
        machine.transition(&idle, LifecyclePhase::Active).unwrap();

        assert_eq!(machine.release_all(), 2);
        assert!(machine.is_empty());
        assert!(machine.snapshot().is_empty());
        assert_eq!(machine.release_all(), 0);
    }

    #[test]
    fn test_concurrent_transitions_stay_monotonic() {
        let (machine, recorder, _) = machine();
        let machine = Arc::new(machine);
        let instance = ManagedInstance::new(Arc::new(4_u8));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = [
            LifecyclePhase::SettingResources,
            LifecyclePhase::PostConstructing,
            LifecyclePhase::WarmingUp,
            LifecyclePhase::Active,
        ]
        .into_iter()
        .map(|phase| {
            let machine = Arc::clone(&machine);
            let instance = instance.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let _ = machine.transition(&instance, phase);
            })
        })
        .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let seen: Vec<_> = recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, phase)| *phase)
            .collect();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
