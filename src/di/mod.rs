mod container;
mod injectable;

pub use container::Container;
pub use injectable::Injectable;
