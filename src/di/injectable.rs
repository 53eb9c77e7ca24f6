use crate::di::Container;
use crate::error::Result;

/// Trait for types that can be built from the container
///
/// Usually implemented with `#[derive(Injectable)]`, which resolves every
/// `Arc<T>` field from the container.
///
/// # Example
/// ```rust,ignore
/// use cadence::Injectable;
/// use std::sync::Arc;
///
/// #[derive(Injectable)]
/// pub struct ReportService {
///     // Resolved from the container
///     database: Arc<Database>,
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Create an instance by resolving dependencies from the container
    ///
    /// # Errors
    /// Returns an error if any required dependency is not found in the container.
    fn inject(container: &Container) -> Result<Self>;
}
