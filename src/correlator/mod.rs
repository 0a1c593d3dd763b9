//! Span correlator
//!
//! Turns the flat stream of runner lifecycle events into a
//! Session → Suite → Test span hierarchy.
//!
//! ```text
//! ┌──────────────────────────── TestPlugin ─────────────────────────────┐
//! │  ci:<fw>:session:*  ci:<fw>:suite:*  ci:<fw>:test:*  ci:<fw>:hook:*  │
//! │            │               │               │               │        │
//! │            └───────────────┴───────┬───────┴───────────────┘        │
//! │                                    ▼                                │
//! │                     Correlator (state machine)                      │
//! │           environment tags · code owners · parameters               │
//! │                                    │                                │
//! │                                 Tracer ──► SpanSink (Writer)        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

pub mod codeowners;
pub mod environment;
pub mod plugin;
pub mod state;
pub mod tags;

pub use codeowners::CodeOwners;
pub use environment::{environment_tags, CiMetadata, RuntimeInfo};
pub use plugin::TestPlugin;
pub use state::{record_anomaly, Correlator, CorrelatorState};
