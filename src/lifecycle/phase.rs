//! Lifecycle phases and the container-level state cell.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use strum_macros::{AsRefStr, Display, EnumIter, FromRepr};

/// The phase a managed instance currently occupies.
///
/// Phases are totally ordered by declaration. An instance only ever moves
/// forward through them, except that [`LifecyclePhase::Error`] can be entered
/// from anywhere and is terminal for the rest of the container's lifetime.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    AsRefStr,
    EnumIter,
    FromRepr,
    Serialize,
)]
#[repr(u8)]
pub enum LifecyclePhase {
    Latent,
    SettingResources,
    PreConfiguration,
    SettingConfiguration,
    PostConstructing,
    PreWarmingUp,
    WarmingUp,
    Active,
    PreDestroying,
    Error,
}

impl LifecyclePhase {
    /// Whether an instance in `self` may move to `next`.
    pub fn can_advance_to(self, next: LifecyclePhase) -> bool {
        match (self, next) {
            (LifecyclePhase::Error, _) => false,
            (_, LifecyclePhase::Error) => true,
            (current, next) => next > current,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == LifecyclePhase::Error
    }
}

/// Lifecycle of the container as a whole.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, FromRepr, Serialize,
)]
#[repr(u8)]
pub enum ContainerState {
    Latent,
    Starting,
    Started,
    Closed,
}

/// Atomic holder for the [`ContainerState`] of one orchestrator.
///
/// Every transition is a compare-and-swap, so each edge of
/// `Latent -> Starting -> Started -> Closed` fires at most once.
#[derive(Debug)]
pub struct ContainerStatus {
    state: AtomicU8,
}

impl Default for ContainerStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ContainerState::Latent as u8),
        }
    }

    pub fn get(&self) -> ContainerState {
        // Only valid discriminants are ever stored.
        ContainerState::from_repr(self.state.load(Ordering::Acquire))
            .unwrap_or(ContainerState::Closed)
    }

    /// Move from `from` to `to`. Returns `false` if the state was not `from`.
    pub fn advance(&self, from: ContainerState, to: ContainerState) -> bool {
        debug_assert!(to > from, "container state must move forward");
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `Closed` from whatever state the container is in.
    ///
    /// Returns the previous state, or `None` if the container was already
    /// closed.
    pub fn close(&self) -> Option<ContainerState> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ContainerState::Closed as u8).then_some(ContainerState::Closed as u8)
            })
            .ok()
            .and_then(ContainerState::from_repr)
    }

    pub fn is_started(&self) -> bool {
        self.get() == ContainerState::Started
    }

    pub fn is_closed(&self) -> bool {
        self.get() == ContainerState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_phases_are_totally_ordered() {
        let phases: Vec<_> = LifecyclePhase::iter().collect();
        for pair in phases.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].can_advance_to(pair[1]));
            assert!(!pair[1].can_advance_to(pair[0]));
        }
    }

    #[test]
    fn test_error_is_reachable_and_terminal() {
        for phase in LifecyclePhase::iter() {
            if phase != LifecyclePhase::Error {
                assert!(phase.can_advance_to(LifecyclePhase::Error));
            }
            assert!(!LifecyclePhase::Error.can_advance_to(phase));
        }
        assert!(!LifecyclePhase::Active.can_advance_to(LifecyclePhase::Active));
    }

    #[test]
    fn test_container_transitions_fire_once() {
        let status = ContainerStatus::new();
        assert!(status.advance(ContainerState::Latent, ContainerState::Starting));
        assert!(!status.advance(ContainerState::Latent, ContainerState::Starting));
        assert!(status.advance(ContainerState::Starting, ContainerState::Started));
        assert!(status.is_started());

        assert_eq!(status.close(), Some(ContainerState::Started));
        assert_eq!(status.close(), None);
        assert!(status.is_closed());
    }

    #[test]
    fn test_failed_start_closes_from_starting() {
        let status = ContainerStatus::new();
        assert!(status.advance(ContainerState::Latent, ContainerState::Starting));
        assert!(status.advance(ContainerState::Starting, ContainerState::Closed));
        assert!(!status.advance(ContainerState::Starting, ContainerState::Started));
        assert_eq!(status.get(), ContainerState::Closed);
    }
}
