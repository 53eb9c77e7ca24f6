use proc_macro::TokenStream;

mod injectable;
mod lifecycle;

/// Derive macro for building a struct from the DI container
///
/// Every field must be an `Arc<T>`; each is resolved from the container.
///
/// # Example
/// ```ignore
/// use cadence::DeriveInjectable as Injectable;
///
/// #[derive(Injectable)]
/// pub struct ReportService {
///     database: Arc<Database>,
/// }
/// ```
#[proc_macro_derive(Injectable)]
pub fn derive_injectable(input: TokenStream) -> TokenStream {
    injectable::derive_injectable(input)
}

/// Attribute macro that turns tagged methods into lifecycle hooks
///
/// Applied to an inherent impl block, it implements `cadence::Introspect`
/// for the type. Tagged methods take `&self`, may be sync or async, and
/// return either `()` or a `Result` whose error converts into
/// `anyhow::Error`. Hooks are registered in declaration order.
///
/// | Attribute               | Runs while             |
/// |-------------------------|------------------------|
/// | `#[resources]`          | `SettingResources`     |
/// | `#[pre_configuration]`  | `PreConfiguration`     |
/// | `#[configuration]`      | `SettingConfiguration` |
/// | `#[post_construct]`     | `PostConstructing`     |
/// | `#[warm_up]`            | `WarmingUp`, serially  |
/// | `#[warm_up(parallel)]`  | `WarmingUp`, on a background worker |
/// | `#[pre_destroy]`        | `PreDestroying`        |
///
/// # Example
/// ```ignore
/// #[cadence::lifecycle]
/// impl CacheWarmer {
///     #[warm_up(parallel)]
///     async fn prime(&self) -> anyhow::Result<()> {
///         self.load_hot_keys().await
///     }
///
///     #[pre_destroy]
///     fn flush(&self) {
///         self.cache.clear();
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn lifecycle(attr: TokenStream, item: TokenStream) -> TokenStream {
    lifecycle::lifecycle_attribute(attr, item)
}
