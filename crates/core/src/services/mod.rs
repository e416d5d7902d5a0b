pub mod status_resolver;

pub use status_resolver::{ResolvedStatus, StatusResolver};
