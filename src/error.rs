use crate::lifecycle::LifecycleError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CadenceError>;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("Dependency not found: {type_name}")]
    DependencyNotFound { type_name: String },

    #[error("Failed to downcast type: {type_name}")]
    DowncastFailed { type_name: String },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl CadenceError {
    /// The lifecycle error underneath, if this is one.
    pub fn as_lifecycle(&self) -> Option<&LifecycleError> {
        match self {
            Self::Lifecycle(err) => Some(err),
            _ => None,
        }
    }
}
