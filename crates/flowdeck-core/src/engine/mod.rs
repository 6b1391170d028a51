//! The execution engine: run manager, kernel, scope stack, and run control.

mod control;
mod executor;
mod kernel;
mod scope;

pub use control::RunHandle;
pub use executor::FlowEngine;
pub use kernel::{KernelError, MAX_SUBFLOW_DEPTH};
pub use scope::ScopeStack;
