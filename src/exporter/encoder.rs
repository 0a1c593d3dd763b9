//! MessagePack encoding of span batches for the test-cycle intake
//!
//! ```text
//! {
//!   version: 1,
//!   metadata: { "*": { language, library_version, runtime-id, env, service } },
//!   events: [
//!     { type: "test" | "test_suite_end" | "test_session_end" | "span",
//!       version: 1,
//!       content: { trace_id, span_id, parent_id, name, resource, service,
//!                  type, error, start, duration, meta{str}, metrics{f64} } },
//!     ...
//!   ]
//! }
//! ```
//!
//! Structs are encoded as maps (field names on the wire). `parent_id` 0
//! means "no parent".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::span::{FinishedSpan, Role, SpanId, TagValue, Tags, TraceId};

pub const PAYLOAD_VERSION: u32 = 1;
pub const EVENT_VERSION: u32 = 1;

/// Metadata shared by every event of a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub language: String,
    pub library_version: String,
    #[serde(rename = "runtime-id")]
    pub runtime_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    pub service: String,
}

impl Metadata {
    pub fn new(service: impl Into<String>, env: Option<String>) -> Self {
        Self {
            language: "rust".to_string(),
            library_version: env!("CARGO_PKG_VERSION").to_string(),
            runtime_id: uuid::Uuid::new_v4().to_string(),
            env,
            service: service.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: u64,
    pub name: String,
    pub resource: String,
    pub service: String,
    #[serde(rename = "type")]
    pub span_type: String,
    pub error: u8,
    /// Nanoseconds since the Unix epoch
    pub start: u64,
    /// Nanoseconds
    pub duration: u64,
    pub meta: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u32,
    pub content: Content,
}

fn event_type(role: Role) -> &'static str {
    match role {
        Role::Test => "test",
        Role::Suite => "test_suite_end",
        Role::Session => "test_session_end",
        Role::Span => "span",
    }
}

fn role_of(event_type: &str) -> Option<Role> {
    match event_type {
        "test" => Some(Role::Test),
        "test_suite_end" => Some(Role::Suite),
        "test_session_end" => Some(Role::Session),
        "span" => Some(Role::Span),
        _ => None,
    }
}

impl Event {
    pub fn from_span(span: &FinishedSpan) -> Self {
        let mut meta = BTreeMap::new();
        let mut metrics = BTreeMap::new();
        for (key, value) in &span.tags {
            match value {
                TagValue::Str(s) => {
                    meta.insert(key.clone(), s.clone());
                }
                TagValue::Num(n) => {
                    metrics.insert(key.clone(), *n);
                }
            }
        }
        let kind = event_type(span.role);
        Self {
            kind: kind.to_string(),
            version: EVENT_VERSION,
            content: Content {
                trace_id: span.trace_id.as_u64(),
                span_id: span.span_id.as_u64(),
                parent_id: span.parent_id.map(|p| p.as_u64()).unwrap_or(0),
                name: span.name.clone(),
                resource: span.resource.clone(),
                service: span.service.clone(),
                span_type: kind.to_string(),
                error: u8::from(span.is_error()),
                start: span.start_ns,
                duration: span.duration_ns(),
                meta,
                metrics,
            },
        }
    }

    /// Rebuild the finished span; `None` for an unknown event type
    pub fn to_span(&self) -> Option<FinishedSpan> {
        let role = role_of(&self.kind)?;
        let c = &self.content;
        let mut tags = Tags::new();
        for (key, value) in &c.meta {
            tags.insert(key.clone(), TagValue::Str(value.clone()));
        }
        for (key, value) in &c.metrics {
            tags.insert(key.clone(), TagValue::Num(*value));
        }
        Some(FinishedSpan {
            trace_id: TraceId(c.trace_id),
            span_id: SpanId(c.span_id),
            parent_id: Some(SpanId(c.parent_id)).filter(|p| p.as_u64() != 0),
            name: c.name.clone(),
            resource: c.resource.clone(),
            service: c.service.clone(),
            role,
            tags,
            start_ns: c.start,
            finish_ns: c.start.saturating_add(c.duration),
        })
    }
}

/// One request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub version: u32,
    pub metadata: BTreeMap<String, Metadata>,
    pub events: Vec<Event>,
}

impl Payload {
    pub fn new(metadata: Metadata, spans: &[FinishedSpan]) -> Self {
        let mut all = BTreeMap::new();
        all.insert("*".to_string(), metadata);
        Self {
            version: PAYLOAD_VERSION,
            metadata: all,
            events: spans.iter().map(Event::from_span).collect(),
        }
    }

    /// Finished spans carried by this payload
    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.events.iter().filter_map(Event::to_span).collect()
    }
}

pub fn encode(payload: &Payload) -> Result<Vec<u8>, ExportError> {
    Ok(rmp_serde::to_vec_named(payload)?)
}

pub fn decode(bytes: &[u8]) -> Result<Payload, ExportError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::record::{ERROR_MSG, TEST_STATUS};

    fn span(role: Role, parent: Option<u64>, tags: Tags) -> FinishedSpan {
        FinishedSpan {
            trace_id: TraceId(u64::MAX - 1),
            span_id: SpanId(7),
            parent_id: parent.map(SpanId),
            name: "mocha.test".to_string(),
            resource: "a.test.works".to_string(),
            service: "svc".to_string(),
            role,
            tags,
            start_ns: 1_700_000_000_000_000_000,
            finish_ns: 1_700_000_000_000_500_000,
        }
    }

    #[test]
    fn test_round_trip_preserves_batch() {
        let mut tags = Tags::new();
        tags.insert(TEST_STATUS.to_string(), "fail".into());
        tags.insert(ERROR_MSG.to_string(), "expected 1 to equal 2".into());
        tags.insert("_dd.measured".to_string(), TagValue::Num(1.5));
        let spans = vec![
            span(Role::Test, Some(3), tags),
            span(Role::Session, None, Tags::new()),
        ];

        let payload = Payload::new(Metadata::new("svc", Some("ci".to_string())), &spans);
        let decoded = decode(&encode(&payload).unwrap()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.spans(), spans);
    }

    #[test]
    fn test_event_content() {
        let event = Event::from_span(&span(Role::Suite, None, Tags::new()));
        assert_eq!(event.kind, "test_suite_end");
        assert_eq!(event.content.parent_id, 0);
        assert_eq!(event.content.duration, 500_000);
        assert_eq!(event.content.error, 0);
    }

    #[test]
    fn test_wire_field_names() {
        let payload = Payload::new(Metadata::new("svc", None), &[span(Role::Span, Some(1), Tags::new())]);
        let bytes = encode(&payload).unwrap();

        // Decode generically to inspect the map keys
        let value: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["metadata"]["*"]["runtime-id"].is_string());
        assert!(value["metadata"]["*"].get("env").is_none());
        assert_eq!(value["events"][0]["type"], "span");
        assert_eq!(value["events"][0]["content"]["span_id"], 7);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(decode(&[0xc1, 0x00]), Err(ExportError::Decode(_))));
    }
}
