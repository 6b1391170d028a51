//! Event distribution for run and node lifecycle events.

mod bus;

pub use bus::FlowEventBus;
