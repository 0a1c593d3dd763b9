//! Minimal tracer: owns open spans, hands finished ones to a sink
//!
//! Open spans live in a table keyed by `SpanId`, with each span's local
//! children recorded so a parent can finish its whole subtree. Finishing a
//! span removes it from the table, which is what guarantees a span is
//! handed to the sink exactly once and never changes afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use super::ids::{SpanId, TraceId};
use super::propagation::{PropagationFormat, SerializedContext};
use super::record::{FinishedSpan, Role, SpanContext, TagValue, Tags};
use crate::metrics::{SPANS_FINISHED, SPANS_STARTED};

/// Called once a flush has completed (successfully or not)
pub type FlushCallback = Box<dyn FnOnce() + Send + 'static>;

/// Destination of finished spans (the batching writer in production)
pub trait SpanSink: Send + Sync {
    /// Queue a finished span; must not block
    fn export(&self, span: FinishedSpan);

    /// Ask for buffered spans to be delivered; `done` always runs
    fn flush(&self, done: Option<FlushCallback>);
}

/// Wall clock that never hands out the same timestamp twice.
///
/// Spans started back to back would otherwise share a start time on
/// coarse clocks; each reading is at least 1ns after the previous one.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ns(&self) -> u64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(current + 1);
            match self
                .last
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Options for starting a span
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Parent context; `None` starts a new trace
    pub child_of: Option<SpanContext>,
    pub role: Role,
    /// Defaults to the span name
    pub resource: Option<String>,
    pub tags: Tags,
}

impl StartOptions {
    pub fn new(role: Role) -> Self {
        Self {
            child_of: None,
            role,
            resource: None,
            tags: Tags::new(),
        }
    }

    pub fn child_of(mut self, parent: Option<SpanContext>) -> Self {
        self.child_of = parent;
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags.extend(tags);
        self
    }
}

struct OpenSpan {
    context: SpanContext,
    parent_id: Option<SpanId>,
    name: String,
    resource: String,
    role: Role,
    tags: Tags,
    start_ns: u64,
    children: Vec<SpanId>,
}

/// Span factory and open-span table for one process
pub struct Tracer {
    service: String,
    clock: MonotonicClock,
    open: HashMap<SpanId, OpenSpan>,
    sink: Arc<dyn SpanSink>,
}

impl Tracer {
    pub fn new(service: impl Into<String>, sink: Arc<dyn SpanSink>) -> Self {
        Self {
            service: service.into(),
            clock: MonotonicClock::new(),
            open: HashMap::new(),
            sink,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Start a span, as a child of `options.child_of` when given.
    ///
    /// The parent does not need to be open locally: a context extracted
    /// from another process only contributes its ids.
    pub fn start_span(&mut self, name: impl Into<String>, options: StartOptions) -> SpanContext {
        let name = name.into();
        let (trace_id, parent_id) = match options.child_of {
            Some(parent) => (parent.trace_id, Some(parent.span_id)),
            None => (TraceId::random(), None),
        };
        let context = SpanContext {
            trace_id,
            span_id: SpanId::random(),
        };

        if let Some(parent) = parent_id.and_then(|id| self.open.get_mut(&id)) {
            parent.children.push(context.span_id);
        }

        SPANS_STARTED.with_label_values(&[options.role.as_str()]).inc();
        debug!(
            trace_id = %trace_id,
            span_id = %context.span_id,
            parent_id = ?parent_id.map(|p| p.as_u64()),
            name = %name,
            "Span started"
        );

        self.open.insert(
            context.span_id,
            OpenSpan {
                context,
                parent_id,
                resource: options.resource.unwrap_or_else(|| name.clone()),
                name,
                role: options.role,
                tags: options.tags,
                start_ns: self.clock.now_ns(),
                children: Vec::new(),
            },
        );
        context
    }

    pub fn is_open(&self, context: &SpanContext) -> bool {
        self.open.contains_key(&context.span_id)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Set a tag on an open span; returns false if the span is not open
    pub fn set_tag(&mut self, context: &SpanContext, key: impl Into<String>, value: impl Into<TagValue>) -> bool {
        match self.open.get_mut(&context.span_id) {
            Some(span) => {
                span.tags.insert(key.into(), value.into());
                true
            }
            None => false,
        }
    }

    pub fn add_tags(&mut self, context: &SpanContext, tags: Tags) -> bool {
        match self.open.get_mut(&context.span_id) {
            Some(span) => {
                span.tags.extend(tags);
                true
            }
            None => false,
        }
    }

    pub fn tag(&self, context: &SpanContext, key: &str) -> Option<&TagValue> {
        self.open.get(&context.span_id)?.tags.get(key)
    }

    /// Start time of an open span
    pub fn start_ns(&self, context: &SpanContext) -> Option<u64> {
        self.open.get(&context.span_id).map(|s| s.start_ns)
    }

    /// Finish one span; its open children stay open
    pub fn finish(&mut self, context: &SpanContext) -> bool {
        let now = self.clock.now_ns();
        self.finish_at(context.span_id, now)
    }

    /// Finish a span and every descendant still open, children first.
    ///
    /// Returns how many spans were finished.
    pub fn finish_tree(&mut self, context: &SpanContext) -> usize {
        if !self.is_open(context) {
            return 0;
        }
        let now = self.clock.now_ns();

        // Post-order walk over the local subtree
        let mut order = Vec::new();
        let mut stack = vec![(context.span_id, false)];
        while let Some((id, visited)) = stack.pop() {
            if visited {
                order.push(id);
                continue;
            }
            if let Some(span) = self.open.get(&id) {
                stack.push((id, true));
                for child in span.children.iter().rev() {
                    stack.push((*child, false));
                }
            }
        }

        order
            .into_iter()
            .filter(|id| self.finish_at(*id, now))
            .count()
    }

    fn finish_at(&mut self, span_id: SpanId, now: u64) -> bool {
        let span = match self.open.remove(&span_id) {
            Some(span) => span,
            None => return false,
        };

        if let Some(parent) = span.parent_id.and_then(|id| self.open.get_mut(&id)) {
            parent.children.retain(|child| *child != span_id);
        }

        SPANS_FINISHED.with_label_values(&[span.role.as_str()]).inc();
        self.sink.export(FinishedSpan {
            trace_id: span.context.trace_id,
            span_id: span.context.span_id,
            parent_id: span.parent_id,
            name: span.name,
            resource: span.resource,
            service: self.service.clone(),
            role: span.role,
            tags: span.tags,
            start_ns: span.start_ns,
            finish_ns: now.max(span.start_ns),
        });
        true
    }

    /// Rebuild a parent context from a carrier
    pub fn extract(&self, format: PropagationFormat, carrier: &BTreeMap<String, String>) -> Option<SpanContext> {
        match format {
            PropagationFormat::TextMap => SerializedContext::extract(carrier)?.to_context(),
        }
    }

    /// Write `context` into a carrier
    pub fn inject(&self, context: &SpanContext, format: PropagationFormat, carrier: &mut BTreeMap<String, String>) {
        match format {
            PropagationFormat::TextMap => SerializedContext::from_context(context).inject(carrier),
        }
    }

    /// Forward a flush request to the sink
    pub fn flush(&self, done: Option<FlushCallback>) {
        self.sink.flush(done);
    }
}

/// Sink that keeps finished spans in memory
///
/// Used by tests and by hosts that want to inspect spans before export.
#[derive(Default)]
pub struct MemorySink {
    spans: std::sync::Mutex<Vec<FinishedSpan>>,
    flushes: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl SpanSink for MemorySink {
    fn export(&self, span: FinishedSpan) {
        self.spans
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(span);
    }

    fn flush(&self, done: Option<FlushCallback>) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if let Some(done) = done {
            done();
        }
    }
}
