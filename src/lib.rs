//! civis - CI test-visibility instrumentation
//!
//! Observes a test runner's lifecycle without changing its behavior, turns
//! it into a Session → Suite → Test span hierarchy, and ships finished spans
//! in MessagePack batches to a test-cycle intake.
//!
//! # Modules
//!
//! - `hooks` - interception registry: version-gated patches for loaded modules
//! - `channel` - named, process-wide, synchronous publish/subscribe
//! - `context` - execution context capture and re-entry across callbacks
//! - `span` - span model, minimal tracer and cross-process propagation
//! - `correlator` - lifecycle state machine, tags, CI metadata, code owners
//! - `instrument` - lifecycle events and the `TracedRunner` adapter
//! - `exporter` - MessagePack encoder, HTTP transport, batching writer
//! - `config` / `logging` / `metrics` - ambient configuration and observability
//!
//! # Quick Start
//!
//! ```ignore
//! use civis::{Config, Instrumentation, TracedRunner};
//!
//! civis::logging::init_logging(None);
//! let instrumentation = Instrumentation::start("mocha", &Config::from_env())?;
//!
//! // Wrap the host runner; every lifecycle event now produces spans
//! let runner = TracedRunner::new(host_runner, "mocha", "yarn test");
//! let failures = runner.run(&mut |_event| {});
//!
//! if let Some(instrumentation) = instrumentation {
//!     instrumentation.shutdown().await;
//! }
//! ```

pub mod channel;
pub mod config;
pub mod context;
pub mod correlator;
pub mod error;
pub mod exporter;
pub mod hooks;
pub mod instrument;
pub mod logging;
pub mod metrics;
pub mod setup;
pub mod span;

// Re-export commonly used types at crate root for convenience
pub use channel::{channel, Channel};
pub use config::Config;
pub use context::{AsyncResource, ExecutionContext};
pub use correlator::{Correlator, CorrelatorState, TestPlugin};
pub use error::{ChannelError, ConfigError, CorrelationAnomaly, ExportError, PatchError};
pub use exporter::{HttpTransport, Writer};
pub use hooks::{HookRegistry, LoadedModule, Matcher};
pub use instrument::{ChannelSet, Runner, RunnerEvent, TracedRunner};
pub use setup::Instrumentation;
pub use span::{FinishedSpan, SerializedContext, SpanContext, Tracer};
