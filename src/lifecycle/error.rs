//! Lifecycle-specific error types

use super::{ContainerState, HookPhase, LifecyclePhase};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The orchestrator asked for a phase change that breaks phase ordering.
    ///
    /// This always indicates a bug in the caller and is never swallowed.
    #[error("Illegal phase transition for {instance}: {from} -> {to}")]
    OrderingViolation {
        /// Display form of the instance
        instance: String,
        /// Phase the instance was in
        from: LifecyclePhase,
        /// Phase that was requested
        to: LifecyclePhase,
    },

    /// A lifecycle hook returned an error
    #[error("{phase} hook '{hook}' failed for {instance}: {source}")]
    HookFailed {
        /// Name of the hook
        hook: String,
        /// Display form of the instance
        instance: String,
        /// Which kind of hook it was
        phase: HookPhase,
        /// Error returned by the hook
        #[source]
        source: anyhow::Error,
    },

    /// A lifecycle hook panicked
    #[error("{phase} hook '{hook}' panicked for {instance}: {message}")]
    HookPanicked {
        /// Name of the hook
        hook: String,
        /// Display form of the instance
        instance: String,
        /// Which kind of hook it was
        phase: HookPhase,
        /// Panic payload, if it was a string
        message: String,
    },

    /// One or more foreground warm-up hooks failed
    #[error(transparent)]
    WarmUp(#[from] AggregateError),

    /// `start` failed; listeners received the same cause
    #[error("Container failed to start: {0}")]
    StartFailed(#[source] Arc<LifecycleError>),

    /// An operation was attempted while the container was in the wrong state
    #[error("Container is {actual}, expected {expected}")]
    InvalidState {
        /// State the operation requires
        expected: ContainerState,
        /// State the container was in
        actual: ContainerState,
    },

    /// Operation timed out
    #[error("Timeout during {phase}: {message}")]
    Timeout {
        /// The lifecycle phase where timeout occurred
        phase: String,
        /// Additional error message
        message: String,
    },
}

impl LifecycleError {
    /// Create an ordering violation error
    pub fn ordering(instance: impl fmt::Display, from: LifecyclePhase, to: LifecyclePhase) -> Self {
        Self::OrderingViolation {
            instance: instance.to_string(),
            from,
            to,
        }
    }

    /// Create a hook failure error
    pub fn hook_failed(
        hook: impl Into<String>,
        instance: impl fmt::Display,
        phase: HookPhase,
        source: anyhow::Error,
    ) -> Self {
        Self::HookFailed {
            hook: hook.into(),
            instance: instance.to_string(),
            phase,
            source,
        }
    }

    /// Create a hook panic error
    pub fn hook_panicked(
        hook: impl Into<String>,
        instance: impl fmt::Display,
        phase: HookPhase,
        message: impl Into<String>,
    ) -> Self {
        Self::HookPanicked {
            hook: hook.into(),
            instance: instance.to_string(),
            phase,
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(expected: ContainerState, actual: ContainerState) -> Self {
        Self::InvalidState { expected, actual }
    }

    /// Create a timeout error
    pub fn timeout(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Whether this error came out of a hook rather than the orchestrator.
    pub fn is_hook_failure(&self) -> bool {
        matches!(
            self,
            Self::HookFailed { .. } | Self::HookPanicked { .. } | Self::WarmUp(_)
        ) || matches!(self, Self::StartFailed(cause) if cause.is_hook_failure())
    }
}

/// Every failure collected from one pass over a foreground queue, in the
/// order the hooks were invoked.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<LifecycleError>,
}

impl AggregateError {
    pub(crate) fn new(errors: Vec<LifecycleError>) -> Self {
        debug_assert!(!errors.is_empty());
        Self { errors }
    }

    pub fn errors(&self) -> &[LifecycleError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<LifecycleError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} warm-up hook(s) failed", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            let sep = if index == 0 { ": " } else { "; " };
            write!(f, "{sep}{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|error| error as &(dyn std::error::Error + 'static))
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
