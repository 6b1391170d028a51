//! Flow execution engine core.
//!
//! This crate contains the "brain" of the engine:
//! - `expr` -- restricted expression language for branch/loop conditions
//! - `registry` -- plugin registry mapping node kinds to handlers
//! - `validate` -- structural validation of flows before registration
//! - `event` -- broadcast bus for run/node lifecycle events
//! - `engine` -- the run kernel: sequential graph walker, scope stack,
//!   pause/breakpoint control, and the run manager
//! - `debugger` -- command/event façade over live runs
//! - `legacy` -- conversion between the step-list and graph formats

pub mod debugger;
pub mod engine;
pub mod event;
pub mod expr;
pub mod legacy;
pub mod registry;
pub mod validate;
