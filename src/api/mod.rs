// =============================================================================
// HTTP API — router, handlers, middleware, and problem+json mapping
// =============================================================================

pub mod data;
pub mod middleware;
pub mod problem;
pub mod rest;

pub use rest::router;
