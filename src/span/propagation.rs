//! Cross-process propagation of span parentage
//!
//! A suite may run in a different process than its session. The only thing
//! that crosses the boundary is a flat map of two base-10 strings:
//!
//! ```text
//! parent process                          child process
//! ──────────────                          ─────────────
//! session span ──inject──► {x-datadog-trace-id: "123",
//!                           x-datadog-parent-id: "456"}
//!                                │  (config / environment, before spawn)
//!                                ▼
//!                          extract ──► SpanContext{123, 456} ──► suite span childOf
//! ```
//!
//! The serialized form is a parentage hint, never an ownership handle: the
//! child cannot finish or mutate the parent span through it.

use std::collections::BTreeMap;

use super::ids::{SpanId, TraceId};
use super::record::SpanContext;

/// Carrier key holding the trace id
pub const TRACE_ID_KEY: &str = "x-datadog-trace-id";
/// Carrier key holding the parent span id
pub const PARENT_ID_KEY: &str = "x-datadog-parent-id";

/// Environment variable names used when spawning a child process
pub const ENV_TRACE_ID: &str = "CIVIS_SESSION_TRACE_ID";
pub const ENV_PARENT_ID: &str = "CIVIS_SESSION_SPAN_ID";

/// Carrier formats understood by `Tracer::extract` / `Tracer::inject`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationFormat {
    /// Flat string map with fixed keys
    TextMap,
}

/// `{trace id, parent span id}` as stable base-10 strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedContext {
    pub trace_id: String,
    pub parent_span_id: String,
}

impl SerializedContext {
    pub fn from_context(context: &SpanContext) -> Self {
        Self {
            trace_id: context.trace_id.to_string(),
            parent_span_id: context.span_id.to_string(),
        }
    }

    /// Rebuild the parent context; `None` if either id is missing or zero
    pub fn to_context(&self) -> Option<SpanContext> {
        let trace_id: TraceId = self.trace_id.parse().ok()?;
        let span_id: SpanId = self.parent_span_id.parse().ok()?;
        if trace_id.as_u64() == 0 || span_id.as_u64() == 0 {
            return None;
        }
        Some(SpanContext { trace_id, span_id })
    }

    /// Write the fixed text-map keys into `carrier`
    pub fn inject(&self, carrier: &mut BTreeMap<String, String>) {
        carrier.insert(TRACE_ID_KEY.to_string(), self.trace_id.clone());
        carrier.insert(PARENT_ID_KEY.to_string(), self.parent_span_id.clone());
    }

    /// Read the fixed text-map keys from `carrier`
    pub fn extract(carrier: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            trace_id: carrier.get(TRACE_ID_KEY)?.clone(),
            parent_span_id: carrier.get(PARENT_ID_KEY)?.clone(),
        })
    }

    /// Environment variables to set on a child process before spawn
    pub fn to_env(&self) -> Vec<(String, String)> {
        vec![
            (ENV_TRACE_ID.to_string(), self.trace_id.clone()),
            (ENV_PARENT_ID.to_string(), self.parent_span_id.clone()),
        ]
    }

    /// Read the context injected by a parent process, if any
    pub fn from_env() -> Option<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
        Some(Self {
            trace_id: get(ENV_TRACE_ID)?,
            parent_span_id: get(ENV_PARENT_ID)?,
        })
    }
}
