//! Command execution
//!
//! One [`ExecutionEngine`] per server. It owns the [`StrategyRegistry`] and
//! speaks the marker protocol in [`protocol`] with whichever strategy the
//! configuration selects.

mod engine;
mod native;
mod pipe;
mod process;
pub mod protocol;
mod registry;
mod remote;

pub use engine::{EngineOptions, ExecutionEngine};
pub use native::NativeExec;
pub use pipe::ShellPipe;
pub use registry::StrategyRegistry;
pub use remote::RemoteInterpreter;
