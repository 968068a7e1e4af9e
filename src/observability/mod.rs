//! Cross-cutting observability concerns.

pub mod logging;

pub use logging::{init_tracing, ServerLog};
