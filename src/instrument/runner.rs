//! Instrumented test runner adapter
//!
//! The host exposes its test runner through the [`Runner`] capability.
//! [`TracedRunner`] wraps one, forwards every lifecycle event to the host's
//! listener unchanged, and publishes the matching channel events:
//!
//! ```text
//! RunnerEvent            published on ci:<fw>:...         listener runs in
//! ───────────            ───────────────────────          ────────────────
//! RunStart               session:start                    caller context
//! SuiteStart (depth 1)   suite:start                      caller context
//! TestStart (retry 0)    test:start                       test context ◄─┐
//! TestFail               test:error                       test context   │ captured right
//! TestPending            test:skip (or skip status)       test context   │ after test:start
//! TestEnd                test:finish                      test context ──┘
//! HookFail               hook:error                       caller context
//! SuiteEnd (depth 1)     suite:finish                     caller context
//! RunEnd                 session:finish                   caller context
//! ```
//!
//! Nested suites are folded into their top-level suite. Every publish is
//! guarded by `has_subscribers`, so an adapter nobody listens to only
//! forwards events.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error};

use super::events::{
    AddTags, ChannelSet, ErrorInfo, HookError, SessionConfiguration, SessionFinish, SessionStart, SuiteFinish,
    SuiteStart, TestError, TestFinish, TestParameterize, TestSkip, TestStart, TestStatus,
};
use crate::channel::Channel;
use crate::context::AsyncResource;
use crate::error::PatchError;
use crate::hooks::{HookId, HookRegistry, Matcher, ModuleExports};
use crate::span::Tags;

/// A test as the runner reports it
#[derive(Debug, Clone, PartialEq)]
pub struct TestInfo {
    pub title: String,
    /// Title of the enclosing suite
    pub suite: String,
    pub file: Option<String>,
    /// Attempt number, zero for the first run
    pub retry: u32,
}

impl TestInfo {
    pub fn new(title: impl Into<String>, suite: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            suite: suite.into(),
            file: None,
            retry: 0,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }
}

/// Lifecycle notifications of a test runner.
///
/// A test that is retried reports `TestRetry` for every failed attempt but
/// the last, and `TestEnd` exactly once, after its final attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    RunStart,
    SuiteStart {
        title: String,
        file: Option<String>,
        /// The implicit root suite holding every file
        root: bool,
    },
    SuiteEnd {
        title: String,
        root: bool,
    },
    TestParameters {
        title: String,
        parameters: serde_json::Value,
    },
    TestStart(TestInfo),
    TestPass(TestInfo),
    TestFail(TestInfo, ErrorInfo),
    TestRetry(TestInfo, ErrorInfo),
    TestPending(TestInfo),
    TestEnd(TestInfo),
    HookFail {
        title: String,
        error: ErrorInfo,
    },
    RunEnd,
}

/// Capability a host test runner exposes
pub trait Runner: Send + Sync {
    fn framework_version(&self) -> Option<String> {
        None
    }

    /// Run every test, reporting lifecycle events to `listener`.
    ///
    /// Returns the number of failures.
    fn run(&self, listener: &mut dyn FnMut(&RunnerEvent)) -> usize;
}

impl<R: Runner + ?Sized> Runner for Arc<R> {
    fn framework_version(&self) -> Option<String> {
        (**self).framework_version()
    }

    fn run(&self, listener: &mut dyn FnMut(&RunnerEvent)) -> usize {
        (**self).run(listener)
    }
}

/// Exports of a runner module as seen by the hook registry
pub struct RunnerModule {
    pub runner: Arc<dyn Runner>,
}

impl RunnerModule {
    pub fn new<R: Runner + 'static>(runner: R) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }
}

struct ActiveTest {
    resource: AsyncResource,
    status: TestStatus,
}

#[derive(Default)]
struct RunTracker {
    suite_depth: usize,
    suite: Option<String>,
    suite_failed: bool,
    run_failed: bool,
    test: Option<ActiveTest>,
}

/// Publish a payload built lazily, only when somebody listens
fn emit<T: Any>(channel: &Channel, build: impl FnOnce() -> T) {
    if !channel.has_subscribers() {
        return;
    }
    if let Err(e) = channel.publish(&build()) {
        error!(channel = %channel.name(), error = %e, "Lifecycle subscriber failed");
    }
}

fn status_of(failed: bool) -> TestStatus {
    if failed {
        TestStatus::Fail
    } else {
        TestStatus::Pass
    }
}

/// Runner wrapper publishing lifecycle events on a framework's channels
pub struct TracedRunner<R> {
    inner: R,
    channels: ChannelSet,
    command: String,
}

impl<R: Runner> TracedRunner<R> {
    pub fn new(inner: R, framework: &str, command: impl Into<String>) -> Self {
        Self {
            inner,
            channels: ChannelSet::new(framework),
            command: command.into(),
        }
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Carrier to hand to a child process before spawning it, holding the
    /// current session's context
    pub fn child_configuration(&self) -> BTreeMap<String, String> {
        let configuration = SessionConfiguration::new();
        if self.channels.session_configuration.has_subscribers() {
            if let Err(e) = self.channels.session_configuration.publish(&configuration) {
                error!(error = %e, "Session configuration subscriber failed");
            }
        }
        configuration.into_carrier()
    }

    /// Add custom tags to the running test
    pub fn add_tags(&self, tags: Tags) {
        emit(&self.channels.test_tags, || AddTags { tags });
    }

    fn handle(&self, tracker: &mut RunTracker, event: &RunnerEvent, listener: &mut dyn FnMut(&RunnerEvent)) {
        let ch = &self.channels;
        match event {
            RunnerEvent::RunStart => {
                emit(&ch.session_start, || SessionStart {
                    command: self.command.clone(),
                    framework_version: self.inner.framework_version(),
                });
                listener(event);
            }
            RunnerEvent::SuiteStart { title, file, root } => {
                if !*root {
                    tracker.suite_depth += 1;
                    if tracker.suite_depth == 1 {
                        let suite = file.clone().unwrap_or_else(|| title.clone());
                        tracker.suite = Some(suite.clone());
                        tracker.suite_failed = false;
                        emit(&ch.suite_start, || SuiteStart {
                            suite,
                            serialized: None,
                        });
                    }
                }
                listener(event);
            }
            RunnerEvent::SuiteEnd { root, .. } => {
                if !*root && tracker.suite_depth > 0 {
                    if tracker.suite_depth == 1 {
                        // A test left open by the runner ends with its suite
                        tracker.test = None;
                        let status = status_of(tracker.suite_failed);
                        emit(&ch.suite_finish, || SuiteFinish { status });
                        tracker.suite = None;
                    }
                    tracker.suite_depth -= 1;
                }
                listener(event);
            }
            RunnerEvent::TestParameters { title, parameters } => {
                emit(&ch.test_parameterize, || TestParameterize {
                    name: title.clone(),
                    parameters: parameters.clone(),
                });
                listener(event);
            }
            RunnerEvent::TestStart(test) => {
                if test.retry > 0 {
                    debug!(test = %test.title, retry = test.retry, "Retried attempt");
                    self.in_test(tracker, |_| listener(event));
                    return;
                }
                let suite = tracker.suite.clone().unwrap_or_else(|| test.suite.clone());
                let resource = AsyncResource::new().run(|| {
                    emit(&ch.test_start, || TestStart {
                        name: test.title.clone(),
                        suite,
                        retry: test.retry,
                        file: test.file.clone(),
                    });
                    // Captured after the subscriber made the test span active
                    AsyncResource::new()
                });
                tracker.test = Some(ActiveTest {
                    resource,
                    status: TestStatus::Pass,
                });
                self.in_test(tracker, |_| listener(event));
            }
            RunnerEvent::TestPass(_) | RunnerEvent::TestRetry(..) => {
                self.in_test(tracker, |active| {
                    if let Some(active) = active {
                        if matches!(event, RunnerEvent::TestPass(_)) {
                            active.status = TestStatus::Pass;
                        }
                    }
                    listener(event)
                });
            }
            RunnerEvent::TestFail(_, error) => {
                tracker.suite_failed = true;
                tracker.run_failed = true;
                self.in_test(tracker, |active| {
                    if let Some(active) = active {
                        active.status = TestStatus::Fail;
                        emit(&ch.test_error, || TestError { error: error.clone() });
                    }
                    listener(event)
                });
            }
            RunnerEvent::TestPending(test) => {
                if tracker.test.is_some() {
                    // Skipped from inside its own body
                    self.in_test(tracker, |active| {
                        if let Some(active) = active {
                            active.status = TestStatus::Skip;
                        }
                        listener(event)
                    });
                } else {
                    let suite = tracker.suite.clone().unwrap_or_else(|| test.suite.clone());
                    emit(&ch.test_skip, || TestSkip {
                        name: test.title.clone(),
                        suite,
                        file: test.file.clone(),
                    });
                    listener(event);
                }
            }
            RunnerEvent::TestEnd(_) => match tracker.test.take() {
                Some(active) => active.resource.run(|| {
                    // Listener first: the span is still open while it runs
                    listener(event);
                    emit(&ch.test_finish, || TestFinish { status: active.status });
                }),
                None => listener(event),
            },
            RunnerEvent::HookFail { title, error } => {
                tracker.suite_failed = true;
                tracker.run_failed = true;
                self.in_test(tracker, |_| {
                    emit(&ch.hook_error, || HookError {
                        hook_title: title.clone(),
                        error: error.clone(),
                    });
                    listener(event)
                });
            }
            RunnerEvent::RunEnd => {
                let status = status_of(tracker.run_failed);
                emit(&ch.session_finish, || SessionFinish { status });
                listener(event);
            }
        }
    }

    /// Run `f` inside the active test's context, or the caller's if none
    fn in_test(&self, tracker: &mut RunTracker, f: impl FnOnce(Option<&mut ActiveTest>)) {
        match tracker.test.as_mut() {
            Some(active) => {
                let resource = active.resource.clone();
                resource.run(|| f(Some(active)));
            }
            None => f(None),
        }
    }
}

impl<R: Runner> Runner for TracedRunner<R> {
    fn framework_version(&self) -> Option<String> {
        self.inner.framework_version()
    }

    fn run(&self, listener: &mut dyn FnMut(&RunnerEvent)) -> usize {
        let mut tracker = RunTracker::default();
        let mut forward = |event: &RunnerEvent| self.handle(&mut tracker, event, listener);
        self.inner.run(&mut forward)
    }
}

/// Register a hook that wraps the runner exported by modules matching
/// `matcher` in a [`TracedRunner`].
///
/// The module's exports must be a [`RunnerModule`].
pub fn register_runner_hook(
    registry: &HookRegistry,
    matcher: Matcher,
    framework: &str,
    command: &str,
) -> HookId {
    let framework = framework.to_string();
    let command = command.to_string();
    registry.add_hook(matcher, move |exports: ModuleExports| {
        let module = exports
            .downcast_ref::<RunnerModule>()
            .ok_or_else(|| PatchError::new("module does not export a runner"))?;
        let traced = TracedRunner::new(Arc::clone(&module.runner), &framework, command.clone());
        let patched: ModuleExports = Arc::new(RunnerModule::new(traced));
        Ok(patched)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::correlator::{Correlator, TestPlugin};
    use crate::hooks::{HandleId, LoadOutcome, LoadedModule};
    use crate::span::{MemorySink, Role, SpanContext, Tracer};
    use std::sync::Mutex;

    /// Replays a fixed script of events
    struct ScriptedRunner {
        events: Vec<RunnerEvent>,
    }

    impl Runner for ScriptedRunner {
        fn framework_version(&self) -> Option<String> {
            Some("10.2.0".to_string())
        }

        fn run(&self, listener: &mut dyn FnMut(&RunnerEvent)) -> usize {
            let mut failures = 0;
            for event in &self.events {
                if matches!(event, RunnerEvent::TestFail(..)) {
                    failures += 1;
                }
                listener(event);
            }
            failures
        }
    }

    fn suite(title: &str, root: bool) -> (RunnerEvent, RunnerEvent) {
        (
            RunnerEvent::SuiteStart {
                title: title.to_string(),
                file: None,
                root,
            },
            RunnerEvent::SuiteEnd {
                title: title.to_string(),
                root,
            },
        )
    }

    fn script() -> Vec<RunnerEvent> {
        let (root_start, root_end) = suite("", true);
        let (a_start, a_end) = suite("a.test", false);
        let (nested_start, nested_end) = suite("nested", false);
        let works = TestInfo::new("works", "a.test");
        let flaky = TestInfo::new("flaky", "nested");
        vec![
            RunnerEvent::RunStart,
            root_start,
            a_start,
            RunnerEvent::TestStart(works.clone()),
            RunnerEvent::TestPass(works.clone()),
            RunnerEvent::TestEnd(works),
            nested_start,
            RunnerEvent::TestStart(flaky.clone()),
            RunnerEvent::TestRetry(flaky.clone(), ErrorInfo::new("Error", "first")),
            RunnerEvent::TestStart(flaky.clone().with_retry(1)),
            RunnerEvent::TestPass(flaky.clone().with_retry(1)),
            RunnerEvent::TestEnd(flaky.with_retry(1)),
            RunnerEvent::TestPending(TestInfo::new("later", "nested")),
            nested_end,
            a_end,
            root_end,
            RunnerEvent::RunEnd,
        ]
    }

    #[test]
    fn test_forwards_events_without_subscribers() {
        let traced = TracedRunner::new(ScriptedRunner { events: script() }, "runner-quiet", "yarn test");
        let mut seen = Vec::new();
        let failures = traced.run(&mut |event| seen.push(event.clone()));
        assert_eq!(failures, 0);
        assert_eq!(seen, script());
    }

    #[test]
    fn test_publishes_lifecycle() {
        let sink = Arc::new(MemorySink::new());
        let plugin = TestPlugin::configure(Correlator::new("runner-traced", Tracer::new("svc", sink.clone())));
        let traced = TracedRunner::new(ScriptedRunner { events: script() }, "runner-traced", "yarn test");

        // Span visible to the listener while each test ends
        let seen_at_end: Arc<Mutex<Vec<Option<SpanContext>>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen_at_end);
        traced.run(&mut |event| {
            if let RunnerEvent::TestEnd(_) = event {
                recorder.lock().unwrap().push(context::active_span());
            }
        });
        drop(plugin);

        let spans = sink.spans();
        let tests: Vec<_> = spans.iter().filter(|s| s.role == Role::Test).collect();
        let suites: Vec<_> = spans.iter().filter(|s| s.role == Role::Suite).collect();
        let sessions: Vec<_> = spans.iter().filter(|s| s.role == Role::Session).collect();

        // works, flaky (one span for two attempts), later (skipped)
        assert_eq!(tests.len(), 3);
        assert_eq!(suites.len(), 1);
        assert_eq!(sessions.len(), 1);
        assert!(tests.iter().all(|t| t.parent_id == Some(suites[0].span_id)));
        assert_eq!(suites[0].parent_id, Some(sessions[0].span_id));
        assert_eq!(sessions[0].status(), Some("pass"));

        let flaky = tests.iter().find(|t| t.resource == "a.test.flaky").unwrap();
        assert_eq!(flaky.status(), Some("pass"));
        let later = tests.iter().find(|t| t.resource == "a.test.later").unwrap();
        assert_eq!(later.status(), Some("skip"));

        let seen = seen_at_end.lock().unwrap();
        let works = tests.iter().find(|t| t.resource == "a.test.works").unwrap();
        assert_eq!(seen[0], Some(works.context()));
        assert_eq!(seen[1], Some(flaky.context()));
    }

    #[test]
    fn test_failures_mark_suite_and_session() {
        let sink = Arc::new(MemorySink::new());
        let plugin = TestPlugin::configure(Correlator::new("runner-failing", Tracer::new("svc", sink.clone())));
        let (s_start, s_end) = suite("b.test", false);
        let broken = TestInfo::new("broken", "b.test");
        let traced = TracedRunner::new(
            ScriptedRunner {
                events: vec![
                    RunnerEvent::RunStart,
                    s_start,
                    RunnerEvent::TestStart(broken.clone()),
                    RunnerEvent::TestFail(broken.clone(), ErrorInfo::new("AssertionError", "nope")),
                    RunnerEvent::TestEnd(broken),
                    s_end,
                    RunnerEvent::RunEnd,
                ],
            },
            "runner-failing",
            "yarn test",
        );

        assert_eq!(traced.run(&mut |_| {}), 1);
        drop(plugin);

        for span in sink.spans() {
            assert_eq!(span.status(), Some("fail"), "{}", span.name);
        }
    }

    #[test]
    fn test_child_configuration_carries_session() {
        let sink = Arc::new(MemorySink::new());
        let plugin = TestPlugin::configure(Correlator::new("runner-config", Tracer::new("svc", sink)));
        let traced = TracedRunner::new(ScriptedRunner { events: vec![] }, "runner-config", "yarn test");

        assert!(traced.child_configuration().is_empty());
        plugin
            .channels()
            .session_start
            .publish(&SessionStart {
                command: "yarn test".to_string(),
                framework_version: None,
            })
            .unwrap();
        let carrier = traced.child_configuration();
        let session = plugin.correlator().lock().unwrap().session().unwrap();
        assert_eq!(carrier[crate::span::propagation::TRACE_ID_KEY], session.trace_id.to_string());
    }

    #[test]
    fn test_register_runner_hook() {
        let registry = HookRegistry::new();
        let hook = register_runner_hook(&registry, Matcher::new("mocha").with_file("lib/runner.js"), "runner-hook", "yarn test");

        let exports: ModuleExports = Arc::new(RunnerModule::new(ScriptedRunner { events: script() }));
        let report = registry.on_load(&LoadedModule::new("mocha/lib/runner.js", HandleId(1), exports));
        assert_eq!(report.outcome(hook), Some(&LoadOutcome::Patched));

        let module = report.exports.downcast_ref::<RunnerModule>().unwrap();
        assert_eq!(module.runner.framework_version().as_deref(), Some("10.2.0"));
        assert_eq!(module.runner.run(&mut |_| {}), 0);

        // Anything else fails the patch and keeps the original exports
        let other: ModuleExports = Arc::new(5u32);
        let report = registry.on_load(&LoadedModule::new("mocha/lib/runner.js", HandleId(2), other));
        assert!(matches!(report.outcome(hook), Some(LoadOutcome::PatchFailed(_))));
        assert_eq!(report.exports.downcast_ref::<u32>(), Some(&5));
    }
}
