//! Observability setup for flowdeck services.

pub mod tracing_setup;
