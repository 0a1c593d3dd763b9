//! Span records: the context handed around while a span is open and the
//! immutable record produced when it finishes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::{SpanId, TraceId};

/// Tag key carrying the test/suite/session status
pub const TEST_STATUS: &str = "test.status";
/// Tag keys for error details
pub const ERROR_TYPE: &str = "error.type";
pub const ERROR_MSG: &str = "error.msg";
pub const ERROR_STACK: &str = "error.stack";

/// Position of a span in the Session → Suite → Test hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Session,
    Suite,
    Test,
    /// Any span created by nested instrumentation inside a test
    Span,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Session => "session",
            Role::Suite => "suite",
            Role::Test => "test",
            Role::Span => "span",
        }
    }
}

/// A tag value: text or number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Str(String),
    Num(f64),
}

impl TagValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Str(s) => Some(s),
            TagValue::Num(_) => None,
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Str(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Str(s)
    }
}

impl From<f64> for TagValue {
    fn from(n: f64) -> Self {
        TagValue::Num(n)
    }
}

impl From<i64> for TagValue {
    fn from(n: i64) -> Self {
        TagValue::Num(n as f64)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Str(b.to_string())
    }
}

/// Tag map; keys are unique by construction
pub type Tags = BTreeMap<String, TagValue>;

/// Identity of an open span, cheap to copy and pass around
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
}

/// A finished span. Never mutated after the tracer hands it to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedSpan {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_id: Option<SpanId>,
    pub name: String,
    pub resource: String,
    pub service: String,
    pub role: Role,
    pub tags: Tags,
    /// Start time, nanoseconds since the Unix epoch
    pub start_ns: u64,
    /// Finish time, nanoseconds since the Unix epoch
    pub finish_ns: u64,
}

impl FinishedSpan {
    pub fn context(&self) -> SpanContext {
        SpanContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
        }
    }

    pub fn duration_ns(&self) -> u64 {
        self.finish_ns.saturating_sub(self.start_ns)
    }

    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.tags.get(key)
    }

    pub fn status(&self) -> Option<&str> {
        self.tag(TEST_STATUS).and_then(TagValue::as_str)
    }

    /// A span is in error if it carries an error message or failed
    pub fn is_error(&self) -> bool {
        self.tags.contains_key(ERROR_MSG) || self.status() == Some("fail")
    }
}
