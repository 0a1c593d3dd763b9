//! Span model and the minimal tracer the correlator builds on
//!
//! - `ids` - 64-bit trace/span identifiers with base-10 text form
//! - `record` - open span contexts, tags and immutable finished spans
//! - `propagation` - the `{trace id, parent id}` text-map carrier
//! - `tracer` - open-span table, recursive finish, sink hand-off

pub mod ids;
pub mod propagation;
pub mod record;
pub mod tracer;

pub use ids::{SpanId, TraceId};
pub use propagation::{PropagationFormat, SerializedContext};
pub use record::{FinishedSpan, Role, SpanContext, TagValue, Tags};
pub use tracer::{FlushCallback, MemorySink, MonotonicClock, SpanSink, StartOptions, Tracer};
