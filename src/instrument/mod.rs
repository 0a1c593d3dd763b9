//! Instrumentation of test runners
//!
//! - `events` - channel names and payloads of the run lifecycle
//! - `runner` - the `Runner` capability and the `TracedRunner` adapter the
//!   hook registry swaps in for it

pub mod events;
pub mod runner;

pub use events::{ChannelSet, ErrorInfo, TestStatus};
pub use runner::{register_runner_hook, RunnerEvent, Runner, RunnerModule, TestInfo, TracedRunner};
