//! Test Execution Module
//!
//! Runs generated branches: parallel scheduling over execution units,
//! pausing and single-stepping, hooks and screenshots.
//!
//! # Architecture
//!
//! - [`runner`]: Top-level run protocol and debug controls
//! - [`instance`]: Execution units that run one branch at a time
//! - [`queue`]: Hands out branches, honouring non-parallel keys
//! - [`context`]: Run-wide shared state and the per-step context
//! - [`step`]: The step executor seam and the bash executor
//! - [`config`]: Run configuration

pub mod config;
pub mod context;
pub mod instance;
pub(crate) mod queue;
pub mod runner;
pub mod step;

pub use config::RunConfig;
pub use context::{RunContext, RunSettings, StepContext, Variables};
pub use instance::{RunInstance, UnitEvent};
pub use runner::{Runner, StopHandle};
pub use step::{ShellExecutor, StepExecutor, StepOutput};
