//! Session → Suite → Test state machine
//!
//! ```text
//!            session_start            suite_start             test_start
//!   Idle ─────────────────► Session ─────────────► Suite ─────────────────► Test
//!    │                      Active  ◄───────────── Active ◄───────────────── Active
//!    │ suite_start             │      suite_finish   │  ▲     test_finish
//!    │ (remote session)        │                     │  └── test_skip (start+finish at once)
//!    └─────────────────────────┼───► SuiteActive     │
//!                              │ session_finish      │ session_finish
//!                              ▼                     ▼
//!                        SessionFinished ◄───────────┘   (finishes every open descendant)
//! ```
//!
//! Events that do not fit the current state are correlation anomalies: they
//! are logged, counted and ignored. The host run is never affected.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::codeowners::CodeOwners;
use super::environment::{environment_tags, RuntimeInfo};
use super::tags::{self, ERROR_MSG, ERROR_STACK, ERROR_TYPE, TEST_CODE_OWNERS, TEST_PARAMETERS, TEST_STATUS};
use crate::context;
use crate::error::CorrelationAnomaly;
use crate::instrument::events::{
    AddTags, ErrorInfo, HookError, SessionConfiguration, SessionFinish, SessionStart, SuiteFinish, SuiteStart,
    TestError, TestFinish, TestParameterize, TestSkip, TestStart, TestStatus,
};
use crate::metrics::CORRELATION_ANOMALIES;
use crate::span::{
    FlushCallback, PropagationFormat, Role, SerializedContext, SpanContext, SpanSink, StartOptions, Tags, Tracer,
};

/// Where the correlator is in the lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelatorState {
    Idle,
    SessionActive,
    SuiteActive,
    TestActive,
    SessionFinished,
}

/// Log and count an event the correlator chose to ignore
pub fn record_anomaly(anomaly: &CorrelationAnomaly) {
    CORRELATION_ANOMALIES.with_label_values(&[anomaly.event]).inc();
    warn!(event = anomaly.event, reason = %anomaly.reason, "Correlation anomaly");
}

#[derive(Debug, Clone)]
struct ActiveSuite {
    context: SpanContext,
    name: String,
}

/// Builds the Session → Suite → Test span hierarchy from lifecycle events
pub struct Correlator {
    framework: String,
    framework_version: Option<String>,
    command: Option<String>,
    tracer: Tracer,
    state: CorrelatorState,
    environment: Tags,
    code_owners: Option<CodeOwners>,
    /// Session context handed down by a parent process
    inherited: Option<SerializedContext>,
    /// Session span owned by this process
    session: Option<SpanContext>,
    /// Parent of new suites: the local session or an extracted remote one
    session_parent: Option<SpanContext>,
    suite: Option<ActiveSuite>,
    test: Option<SpanContext>,
    parameters: HashMap<String, serde_json::Value>,
}

impl Correlator {
    /// Bare correlator: no environment tags, no code owners
    pub fn new(framework: impl Into<String>, tracer: Tracer) -> Self {
        Self {
            framework: framework.into(),
            framework_version: None,
            command: None,
            tracer,
            state: CorrelatorState::Idle,
            environment: Tags::new(),
            code_owners: None,
            inherited: None,
            session: None,
            session_parent: None,
            suite: None,
            test: None,
            parameters: HashMap::new(),
        }
    }

    /// Correlator wired to the process environment: CI metadata, the
    /// repository's CODEOWNERS and any session context set by a parent
    pub fn from_env(framework: impl Into<String>, service: impl Into<String>, sink: Arc<dyn SpanSink>) -> Self {
        let get = |key: &str| std::env::var(key).ok();
        let environment = environment_tags(&get, &RuntimeInfo::default());

        let root = std::env::var("CI_PROJECT_DIR")
            .or_else(|_| std::env::var("GITHUB_WORKSPACE"))
            .map(std::path::PathBuf::from)
            .or_else(|_| std::env::current_dir());

        let mut correlator = Self::new(framework, Tracer::new(service, sink)).with_environment(environment);
        if let Some(owners) = root.ok().and_then(|root| CodeOwners::discover(&root)) {
            correlator = correlator.with_code_owners(owners);
        }
        if let Some(inherited) = SerializedContext::from_env() {
            correlator = correlator.with_inherited_session(inherited);
        }
        correlator
    }

    /// Tags copied onto every span
    pub fn with_environment(mut self, environment: Tags) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_code_owners(mut self, code_owners: CodeOwners) -> Self {
        self.code_owners = Some(code_owners);
        self
    }

    /// Use a session owned by another process as the parent of suites
    pub fn with_inherited_session(mut self, serialized: SerializedContext) -> Self {
        self.inherited = Some(serialized);
        self
    }

    pub fn framework(&self) -> &str {
        &self.framework
    }

    pub fn state(&self) -> CorrelatorState {
        self.state
    }

    pub fn session(&self) -> Option<SpanContext> {
        self.session
    }

    pub fn suite(&self) -> Option<SpanContext> {
        self.suite.as_ref().map(|s| s.context)
    }

    pub fn active_test(&self) -> Option<SpanContext> {
        self.test
    }

    /// Innermost open span: test, else suite, else session
    pub fn active_span(&self) -> Option<SpanContext> {
        self.test.or_else(|| self.suite()).or(self.session)
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    fn span_name(&self, entity: &str) -> String {
        format!("{}.{}", self.framework, entity)
    }

    fn with_env_tags(&self, tags: Tags) -> Tags {
        let mut merged = self.environment.clone();
        merged.extend(tags);
        merged
    }

    fn set_error(&mut self, span: &SpanContext, error: &ErrorInfo, message: String) {
        self.tracer.set_tag(span, TEST_STATUS, TestStatus::Fail.as_str());
        self.tracer.set_tag(span, ERROR_TYPE, error.kind.clone());
        self.tracer.set_tag(span, ERROR_MSG, message);
        if let Some(stack) = &error.stack {
            self.tracer.set_tag(span, ERROR_STACK, stack.clone());
        }
    }

    fn after_suite_state(&self) -> CorrelatorState {
        if self.session_parent.is_some() {
            CorrelatorState::SessionActive
        } else {
            CorrelatorState::Idle
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session
    // ─────────────────────────────────────────────────────────────────────────

    pub fn session_start(&mut self, event: &SessionStart) -> Result<SpanContext, CorrelationAnomaly> {
        if self.state != CorrelatorState::Idle || self.session.is_some() {
            return Err(CorrelationAnomaly::new(
                "session:start",
                format!("session already started (state {:?})", self.state),
            ));
        }

        self.command = Some(event.command.clone());
        self.framework_version = event.framework_version.clone();

        let tags = self.with_env_tags(tags::session_tags(
            &self.framework,
            self.framework_version.as_deref(),
            &event.command,
        ));
        // Root unless the host already runs inside a trace
        let parent = context::active_span().or_else(|| self.inherited.as_ref().and_then(SerializedContext::to_context));
        let options = StartOptions::new(Role::Session)
            .child_of(parent)
            .resource(tags::session_resource(&event.command))
            .tags(tags);
        let session = self.tracer.start_span(self.span_name("test_session"), options);

        self.session = Some(session);
        self.session_parent = Some(session);
        self.state = CorrelatorState::SessionActive;
        context::enter_with(context::current().with_span(session));

        info!(
            framework = %self.framework,
            command = %event.command,
            trace_id = %session.trace_id,
            "Test session started"
        );
        Ok(session)
    }

    /// Write the session's context into a child-process carrier
    pub fn session_configuration(&self, event: &SessionConfiguration) -> Result<SerializedContext, CorrelationAnomaly> {
        let session = self
            .session
            .ok_or_else(|| CorrelationAnomaly::new("session:configuration", "no session to propagate"))?;

        let mut carrier = std::collections::BTreeMap::new();
        self.tracer.inject(&session, PropagationFormat::TextMap, &mut carrier);
        for (key, value) in carrier {
            event.insert(key, value);
        }
        Ok(SerializedContext::from_context(&session))
    }

    /// Context a child process should attach its suites to
    pub fn serialized_session(&self) -> Option<SerializedContext> {
        self.session_parent.as_ref().map(SerializedContext::from_context)
    }

    /// Finish the session and everything still open below it, then flush.
    ///
    /// `done` runs once the flush completes, even when the event is ignored.
    pub fn session_finish(
        &mut self,
        event: &SessionFinish,
        done: Option<FlushCallback>,
    ) -> Result<usize, CorrelationAnomaly> {
        let session = match self.session {
            Some(session) if self.state != CorrelatorState::SessionFinished => session,
            _ => {
                self.tracer.flush(done);
                return Err(CorrelationAnomaly::new(
                    "session:finish",
                    format!("no active session (state {:?})", self.state),
                ));
            }
        };

        self.tracer.set_tag(&session, TEST_STATUS, event.status.as_str());
        let finished = self.tracer.finish_tree(&session);

        self.suite = None;
        self.test = None;
        self.session = None;
        self.session_parent = None;
        self.state = CorrelatorState::SessionFinished;

        info!(
            framework = %self.framework,
            status = event.status.as_str(),
            spans = finished,
            "Test session finished"
        );
        self.tracer.flush(done);
        Ok(finished)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Suite
    // ─────────────────────────────────────────────────────────────────────────

    pub fn suite_start(&mut self, event: &SuiteStart) -> Result<SpanContext, CorrelationAnomaly> {
        if self.state == CorrelatorState::SessionFinished {
            return Err(CorrelationAnomaly::new("suite:start", "session already finished"));
        }

        // The session may live in another process
        if self.session_parent.is_none() {
            self.session_parent = event
                .serialized
                .as_ref()
                .or(self.inherited.as_ref())
                .and_then(SerializedContext::to_context);
        }
        let parent = self.session_parent.ok_or_else(|| {
            CorrelationAnomaly::new("suite:start", format!("no session for suite '{}'", event.suite))
        })?;

        if let Some(previous) = self.suite.take() {
            record_anomaly(&CorrelationAnomaly::new(
                "suite:start",
                format!("suite '{}' still open, finishing it", previous.name),
            ));
            self.tracer.finish_tree(&previous.context);
            self.test = None;
        }

        let tags = self.with_env_tags(tags::suite_tags(
            &self.framework,
            self.framework_version.as_deref(),
            self.command.as_deref(),
            &event.suite,
        ));
        let options = StartOptions::new(Role::Suite)
            .child_of(Some(parent))
            .resource(tags::suite_resource(&event.suite))
            .tags(tags);
        let suite = self.tracer.start_span(self.span_name("test_suite"), options);

        self.suite = Some(ActiveSuite {
            context: suite,
            name: event.suite.clone(),
        });
        self.state = CorrelatorState::SuiteActive;
        context::enter_with(context::current().with_span(suite));

        debug!(suite = %event.suite, span_id = %suite.span_id, "Test suite started");
        Ok(suite)
    }

    /// Finish the active suite and any test still open inside it, then flush
    pub fn suite_finish(&mut self, event: &SuiteFinish) -> Result<usize, CorrelationAnomaly> {
        let suite = self
            .suite
            .take()
            .ok_or_else(|| CorrelationAnomaly::new("suite:finish", "no active suite"))?;

        self.tracer.set_tag(&suite.context, TEST_STATUS, event.status.as_str());
        let finished = self.tracer.finish_tree(&suite.context);
        self.test = None;
        self.state = self.after_suite_state();
        if let Some(parent) = self.session {
            context::enter_with(context::current().with_span(parent));
        }

        debug!(suite = %suite.name, status = event.status.as_str(), spans = finished, "Test suite finished");
        self.tracer.flush(None);
        Ok(finished)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Test
    // ─────────────────────────────────────────────────────────────────────────

    /// Remember parameters for the next test of that name
    pub fn test_parameterize(&mut self, event: &TestParameterize) {
        self.parameters.insert(event.name.clone(), event.parameters.clone());
    }

    fn test_span_tags(&mut self, name: &str, suite: &str, file: Option<&str>) -> Tags {
        let mut tags = self.with_env_tags(tags::test_tags(
            &self.framework,
            self.framework_version.as_deref(),
            suite,
            name,
        ));
        if let Some(parameters) = self.parameters.remove(name) {
            if let Ok(json) = serde_json::to_string(&parameters) {
                tags.insert(TEST_PARAMETERS.to_string(), json.into());
            }
        }
        let owners = self
            .code_owners
            .as_ref()
            .and_then(|owners| owners.owners_tag(file.unwrap_or(suite)));
        if let Some(owners) = owners {
            tags.insert(TEST_CODE_OWNERS.to_string(), owners.into());
        }
        tags
    }

    /// Start the span of a test's first attempt.
    ///
    /// Retried attempts (`retry > 0`) return `Ok(None)`: the first attempt's
    /// span stays the only span of the test.
    pub fn test_start(&mut self, event: &TestStart) -> Result<Option<SpanContext>, CorrelationAnomaly> {
        if event.retry > 0 {
            debug!(test = %event.name, retry = event.retry, "Retried attempt, no new span");
            return Ok(None);
        }
        let suite = self.suite().ok_or_else(|| {
            CorrelationAnomaly::new("test:start", format!("no active suite for test '{}'", event.name))
        })?;

        if let Some(previous) = self.test.take() {
            record_anomaly(&CorrelationAnomaly::new("test:start", "previous test still open, finishing it"));
            self.tracer.set_tag(&previous, TEST_STATUS, TestStatus::Fail.as_str());
            self.tracer.finish_tree(&previous);
        }

        let tags = self.test_span_tags(&event.name, &event.suite, event.file.as_deref());
        let options = StartOptions::new(Role::Test)
            .child_of(Some(suite))
            .resource(tags::test_resource(&event.suite, &event.name))
            .tags(tags);
        let test = self.tracer.start_span(self.span_name("test"), options);

        self.test = Some(test);
        self.state = CorrelatorState::TestActive;
        context::enter_with(context::current().with_span(test));

        debug!(test = %event.name, suite = %event.suite, span_id = %test.span_id, "Test started");
        Ok(Some(test))
    }

    /// Finish the active test with its final status
    pub fn test_finish(&mut self, event: &TestFinish) -> Result<usize, CorrelationAnomaly> {
        let test = self
            .test
            .take()
            .ok_or_else(|| CorrelationAnomaly::new("test:finish", "no active test"))?;

        self.tracer.set_tag(&test, TEST_STATUS, event.status.as_str());
        let finished = self.tracer.finish_tree(&test);
        self.state = CorrelatorState::SuiteActive;
        if let Some(suite) = self.suite() {
            context::enter_with(context::current().with_span(suite));
        }

        debug!(span_id = %test.span_id, status = event.status.as_str(), "Test finished");
        Ok(finished)
    }

    /// Attach a failure to the active test
    pub fn test_error(&mut self, event: &TestError) -> Result<SpanContext, CorrelationAnomaly> {
        let test = self
            .test
            .ok_or_else(|| CorrelationAnomaly::new("test:error", "no active test"))?;
        self.set_error(&test, &event.error, event.error.message.clone());
        Ok(test)
    }

    /// Record a test that never ran: its span starts and finishes at once
    pub fn test_skip(&mut self, event: &TestSkip) -> Result<SpanContext, CorrelationAnomaly> {
        let suite = self.suite().ok_or_else(|| {
            CorrelationAnomaly::new("test:skip", format!("no active suite for test '{}'", event.name))
        })?;

        let mut tags = self.test_span_tags(&event.name, &event.suite, event.file.as_deref());
        tags.insert(TEST_STATUS.to_string(), TestStatus::Skip.as_str().into());
        let options = StartOptions::new(Role::Test)
            .child_of(Some(suite))
            .resource(tags::test_resource(&event.suite, &event.name))
            .tags(tags);
        let span = self.tracer.start_span(self.span_name("test"), options);
        self.tracer.finish(&span);

        debug!(test = %event.name, suite = %event.suite, "Test skipped");
        Ok(span)
    }

    /// Attach a setup/teardown failure to the test, else the suite, else
    /// the session
    pub fn hook_error(&mut self, event: &HookError) -> Result<SpanContext, CorrelationAnomaly> {
        let target = self
            .active_span()
            .ok_or_else(|| CorrelationAnomaly::new("hook:error", "no open span to attach the error to"))?;
        let message = format!("{}: {}", event.hook_title, event.error.message);
        self.set_error(&target, &event.error, message);
        Ok(target)
    }

    /// Custom tags on the active test
    pub fn add_tags(&mut self, event: &AddTags) -> Result<SpanContext, CorrelationAnomaly> {
        let test = self
            .test
            .ok_or_else(|| CorrelationAnomaly::new("test:tags", "no active test"))?;
        self.tracer.add_tags(&test, event.tags.clone());
        Ok(test)
    }

    /// Start a span for work done inside the current test (e.g. an HTTP
    /// call made by the code under test)
    pub fn start_nested_span(&mut self, name: &str, tags: Tags) -> Option<SpanContext> {
        let parent = context::active_span()
            .filter(|span| self.tracer.is_open(span))
            .or_else(|| self.active_span())?;
        let options = StartOptions::new(Role::Span).child_of(Some(parent)).tags(tags);
        Some(self.tracer.start_span(name, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{FinishedSpan, MemorySink, SpanId, TagValue, TraceId};

    fn correlator() -> (Correlator, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let tracer = Tracer::new("svc", sink.clone());
        (Correlator::new("mocha", tracer), sink)
    }

    fn start_session(c: &mut Correlator) -> SpanContext {
        c.session_start(&SessionStart {
            command: "yarn test".to_string(),
            framework_version: Some("10.2.0".to_string()),
        })
        .unwrap()
    }

    fn suite(name: &str) -> SuiteStart {
        SuiteStart {
            suite: name.to_string(),
            serialized: None,
        }
    }

    fn test(name: &str, retry: u32) -> TestStart {
        TestStart {
            name: name.to_string(),
            suite: "a.test".to_string(),
            retry,
            file: None,
        }
    }

    fn by_name<'a>(spans: &'a [FinishedSpan], resource: &str) -> &'a FinishedSpan {
        spans.iter().find(|s| s.resource == resource).unwrap()
    }

    #[test]
    fn test_single_passing_test() {
        let (mut c, sink) = correlator();
        let session = start_session(&mut c);
        let suite_ctx = c.suite_start(&suite("a.test")).unwrap();
        let test_ctx = c.test_start(&test("works", 0)).unwrap().unwrap();
        assert_eq!(c.state(), CorrelatorState::TestActive);

        c.test_finish(&TestFinish { status: TestStatus::Pass }).unwrap();
        c.suite_finish(&SuiteFinish { status: TestStatus::Pass }).unwrap();
        c.session_finish(&SessionFinish { status: TestStatus::Pass }, None).unwrap();

        let spans = sink.spans();
        assert_eq!(spans.len(), 3);
        let t = by_name(&spans, "a.test.works");
        assert_eq!(t.name, "mocha.test");
        assert_eq!(t.span_id, test_ctx.span_id);
        assert_eq!(t.parent_id, Some(suite_ctx.span_id));
        assert_eq!(t.status(), Some("pass"));
        let a = by_name(&spans, "test_suite.a.test");
        assert_eq!(a.parent_id, Some(session.span_id));
        let s = by_name(&spans, "test_session.yarn test");
        assert_eq!(s.parent_id, None);
        assert!(spans.iter().all(|span| span.trace_id == session.trace_id));
        assert_eq!(c.state(), CorrelatorState::SessionFinished);
        // Suite finish and session finish both flush
        assert_eq!(sink.flush_count(), 2);
    }

    #[test]
    fn test_skip_yields_one_finished_span() {
        let (mut c, sink) = correlator();
        start_session(&mut c);
        c.suite_start(&suite("a.test")).unwrap();
        c.test_skip(&TestSkip {
            name: "later".to_string(),
            suite: "a.test".to_string(),
            file: None,
        })
        .unwrap();

        assert_eq!(c.state(), CorrelatorState::SuiteActive);
        let spans = sink.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status(), Some("skip"));
        assert_eq!(spans[0].role, Role::Test);
    }

    #[test]
    fn test_retried_attempts_add_no_span() {
        let (mut c, sink) = correlator();
        start_session(&mut c);
        c.suite_start(&suite("a.test")).unwrap();
        let canonical = c.test_start(&test("flaky", 0)).unwrap().unwrap();
        assert_eq!(c.test_start(&test("flaky", 1)).unwrap(), None);
        assert_eq!(c.test_start(&test("flaky", 2)).unwrap(), None);
        assert_eq!(c.active_test(), Some(canonical));

        c.test_finish(&TestFinish { status: TestStatus::Pass }).unwrap();
        let tests: Vec<_> = sink.spans().into_iter().filter(|s| s.role == Role::Test).collect();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].status(), Some("pass"));
    }

    #[test]
    fn test_session_finish_closes_everything() {
        let (mut c, sink) = correlator();
        start_session(&mut c);
        c.suite_start(&suite("a.test")).unwrap();
        c.test_start(&test("hangs", 0)).unwrap();
        c.start_nested_span("http.request", Tags::new()).unwrap();
        assert_eq!(c.tracer().open_count(), 4);

        let finished = c
            .session_finish(&SessionFinish { status: TestStatus::Fail }, None)
            .unwrap();
        assert_eq!(finished, 4);
        assert_eq!(c.tracer().open_count(), 0);
        assert_eq!(sink.spans().len(), 4);
    }

    #[test]
    fn test_anomalies_are_ignored() {
        let (mut c, sink) = correlator();
        assert!(c.test_finish(&TestFinish { status: TestStatus::Pass }).is_err());
        assert!(c.suite_start(&suite("orphan")).is_err());
        assert!(c.test_start(&test("orphan", 0)).is_err());
        assert!(c.hook_error(&HookError {
            hook_title: "before all".to_string(),
            error: ErrorInfo::new("Error", "boom"),
        })
        .is_err());

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        let result = c.session_finish(
            &SessionFinish { status: TestStatus::Pass },
            Some(Box::new(move || flag.store(true, std::sync::atomic::Ordering::SeqCst))),
        );
        assert!(result.is_err());
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
        assert!(sink.spans().is_empty());
        assert_eq!(c.state(), CorrelatorState::Idle);
    }

    #[test]
    fn test_error_and_hook_error_targets() {
        let (mut c, sink) = correlator();
        start_session(&mut c);
        c.suite_start(&suite("a.test")).unwrap();

        // Before any test: lands on the suite
        let target = c
            .hook_error(&HookError {
                hook_title: "\"before all\" hook".to_string(),
                error: ErrorInfo::new("TypeError", "db down"),
            })
            .unwrap();
        assert_eq!(Some(target), c.suite());

        c.test_start(&test("breaks", 0)).unwrap();
        c.test_error(&TestError {
            error: ErrorInfo::new("AssertionError", "expected 1 to equal 2").with_stack("at a.test.js:3"),
        })
        .unwrap();
        c.test_finish(&TestFinish { status: TestStatus::Fail }).unwrap();
        c.suite_finish(&SuiteFinish { status: TestStatus::Fail }).unwrap();

        let spans = sink.spans();
        let t = by_name(&spans, "a.test.breaks");
        assert_eq!(t.tag(ERROR_TYPE), Some(&TagValue::from("AssertionError")));
        assert_eq!(t.tag(ERROR_STACK), Some(&TagValue::from("at a.test.js:3")));
        assert!(t.is_error());
        let a = by_name(&spans, "test_suite.a.test");
        assert_eq!(a.tag(ERROR_MSG), Some(&TagValue::from("\"before all\" hook: db down")));
    }

    #[test]
    fn test_parameters_tags_and_code_owners() {
        let (c, sink) = correlator();
        let mut c = c.with_code_owners(CodeOwners::parse("", "*.test @acme/qa\n"));
        start_session(&mut c);
        c.suite_start(&suite("a.test")).unwrap();
        c.test_parameterize(&TestParameterize {
            name: "adds".to_string(),
            parameters: serde_json::json!({"arguments": [1, 2]}),
        });
        c.test_start(&test("adds", 0)).unwrap();
        let mut custom = Tags::new();
        custom.insert("custom.tag".to_string(), "yes".into());
        c.add_tags(&AddTags { tags: custom }).unwrap();
        c.test_finish(&TestFinish { status: TestStatus::Pass }).unwrap();

        let spans = sink.spans();
        let t = by_name(&spans, "a.test.adds");
        assert_eq!(t.tag(TEST_PARAMETERS), Some(&TagValue::from(r#"{"arguments":[1,2]}"#)));
        assert_eq!(t.tag(TEST_CODE_OWNERS), Some(&TagValue::from(r#"["@acme/qa"]"#)));
        assert_eq!(t.tag("custom.tag"), Some(&TagValue::from("yes")));
        assert_eq!(t.tag(tags::TEST_FRAMEWORK_VERSION), Some(&TagValue::from("10.2.0")));
    }

    #[test]
    fn test_session_configuration_and_remote_suite() {
        let (mut parent, _) = correlator();
        let session = start_session(&mut parent);
        let config = SessionConfiguration::new();
        parent.session_configuration(&config).unwrap();

        let carrier = config.into_carrier();
        let serialized = SerializedContext::extract(&carrier).unwrap();

        let (mut child, sink) = correlator();
        child
            .suite_start(&SuiteStart {
                suite: "b.test".to_string(),
                serialized: Some(serialized),
            })
            .unwrap();
        child.suite_finish(&SuiteFinish { status: TestStatus::Pass }).unwrap();

        let spans = sink.spans();
        assert_eq!(spans[0].trace_id, session.trace_id);
        assert_eq!(spans[0].parent_id, Some(session.span_id));
    }

    #[test]
    fn test_nested_span_uses_ambient_test() {
        let (mut c, _) = correlator();
        context::run(context::ExecutionContext::root(), || {
            start_session(&mut c);
            c.suite_start(&suite("a.test")).unwrap();
            let t = c.test_start(&test("calls out", 0)).unwrap().unwrap();
            assert_eq!(context::active_span(), Some(t));
            let nested = c.start_nested_span("db.query", Tags::new()).unwrap();
            assert_eq!(nested.trace_id, t.trace_id);

            c.test_finish(&TestFinish { status: TestStatus::Pass }).unwrap();
            assert!(!c.tracer().is_open(&nested));
            assert_eq!(context::active_span(), c.suite());
        });
    }

    #[test]
    fn test_session_joins_ambient_trace() {
        let (mut c, sink) = correlator();
        let external = SpanContext {
            trace_id: TraceId(77),
            span_id: SpanId(88),
        };
        let session = context::run(context::ExecutionContext::root().with_span(external), || start_session(&mut c));
        assert_eq!(session.trace_id, TraceId(77));

        c.session_finish(&SessionFinish { status: TestStatus::Pass }, None).unwrap();
        assert_eq!(sink.spans()[0].parent_id, Some(SpanId(88)));
    }

    #[test]
    fn test_session_joins_inherited_trace() {
        let (c, sink) = correlator();
        let mut c = c.with_inherited_session(SerializedContext {
            trace_id: "77".to_string(),
            parent_span_id: "88".to_string(),
        });
        let session = start_session(&mut c);
        assert_eq!(session.trace_id, TraceId(77));

        c.session_finish(&SessionFinish { status: TestStatus::Pass }, None).unwrap();
        assert_eq!(sink.spans()[0].parent_id, Some(SpanId(88)));
    }

    #[test]
    fn test_session_without_parent_is_root() {
        let (mut c, sink) = correlator();
        context::run(context::ExecutionContext::root(), || start_session(&mut c));
        c.session_finish(&SessionFinish { status: TestStatus::Pass }, None).unwrap();
        assert_eq!(sink.spans()[0].parent_id, None);
    }

    #[test]
    fn test_abandoned_test_is_marked_failed() {
        let (mut c, sink) = correlator();
        start_session(&mut c);
        c.suite_start(&suite("a.test")).unwrap();
        c.test_start(&test("hangs", 0)).unwrap();
        c.test_start(&test("next", 0)).unwrap();
        c.test_finish(&TestFinish { status: TestStatus::Pass }).unwrap();

        let spans = sink.spans();
        assert_eq!(by_name(&spans, "a.test.hangs").status(), Some("fail"));
        assert_eq!(by_name(&spans, "a.test.next").status(), Some("pass"));
    }
}
