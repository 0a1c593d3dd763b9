//! Integration tests for session propagation between processes
//!
//! Two correlators stand in for a parent runner process and a worker
//! process. They share nothing but the serialized `{trace id, parent id}`
//! carrier or the environment variables derived from it.

use std::collections::BTreeMap;
use std::sync::Arc;

use civis::instrument::events::{
    SessionConfiguration, SessionFinish, SessionStart, SuiteFinish, SuiteStart, TestFinish, TestStart, TestStatus,
};
use civis::span::propagation::{PARENT_ID_KEY, TRACE_ID_KEY};
use civis::span::{MemorySink, Role};
use civis::{Correlator, CorrelatorState, SerializedContext, Tracer};

fn correlator(framework: &str) -> (Correlator, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    (Correlator::new(framework, Tracer::new("svc", sink.clone())), sink)
}

fn run_worker_suite(worker: &mut Correlator, suite: SuiteStart) {
    worker.suite_start(&suite).unwrap();
    worker
        .test_start(&TestStart {
            name: "works".to_string(),
            suite: suite.suite.clone(),
            retry: 0,
            file: None,
        })
        .unwrap();
    worker.test_finish(&TestFinish { status: TestStatus::Pass }).unwrap();
    worker.suite_finish(&SuiteFinish { status: TestStatus::Pass }).unwrap();
}

fn start_parent() -> (Correlator, Arc<MemorySink>) {
    let (mut parent, sink) = correlator("jest");
    parent
        .session_start(&SessionStart {
            command: "jest".to_string(),
            framework_version: Some("29.0.0".to_string()),
        })
        .unwrap();
    (parent, sink)
}

/// The suite payload carries the carrier written at session configuration
#[test]
fn test_carrier_on_suite_start() {
    let (parent, parent_sink) = start_parent();
    let configuration = SessionConfiguration::new();
    parent.session_configuration(&configuration).unwrap();
    let carrier: BTreeMap<String, String> = configuration.into_carrier();
    assert!(carrier.contains_key(TRACE_ID_KEY));
    assert!(carrier.contains_key(PARENT_ID_KEY));

    let (mut worker, worker_sink) = correlator("jest");
    run_worker_suite(
        &mut worker,
        SuiteStart {
            suite: "a.test.js".to_string(),
            serialized: SerializedContext::extract(&carrier),
        },
    );
    assert_eq!(worker.state(), CorrelatorState::SessionActive);

    let session = parent.session().unwrap();
    let spans = worker_sink.spans();
    let suite = spans.iter().find(|s| s.role == Role::Suite).unwrap();
    let test = spans.iter().find(|s| s.role == Role::Test).unwrap();
    assert_eq!(suite.trace_id, session.trace_id);
    assert_eq!(suite.parent_id, Some(session.span_id));
    assert_eq!(test.trace_id, session.trace_id);
    assert_eq!(test.parent_id, Some(suite.span_id));

    // The parent still owns and finishes its session
    assert!(parent_sink.spans().is_empty());
}

/// The worker reads the context from environment variables set at spawn
#[test]
fn test_environment_handoff() {
    let (mut parent, parent_sink) = start_parent();
    let env: BTreeMap<String, String> = parent.serialized_session().unwrap().to_env().into_iter().collect();

    let inherited = SerializedContext::from_vars(|key| env.get(key).cloned()).unwrap();
    let (worker, worker_sink) = correlator("jest");
    let mut worker = worker.with_inherited_session(inherited);
    run_worker_suite(
        &mut worker,
        SuiteStart {
            suite: "b.test.js".to_string(),
            serialized: None,
        },
    );

    // A worker never owns the session
    assert!(worker
        .session_finish(&SessionFinish { status: TestStatus::Pass }, None)
        .is_err());

    let finished = parent
        .session_finish(&SessionFinish { status: TestStatus::Pass }, None)
        .unwrap();
    assert_eq!(finished, 1);

    let session = &parent_sink.spans()[0];
    let suite = worker_sink
        .spans()
        .into_iter()
        .find(|s| s.role == Role::Suite)
        .unwrap();
    assert_eq!(suite.parent_id, Some(session.span_id));
    assert_eq!(suite.trace_id, session.trace_id);
}

/// A worker with neither carrier nor inherited context ignores the suite
#[test]
fn test_missing_context_is_ignored() {
    let (mut worker, sink) = correlator("jest");
    let result = worker.suite_start(&SuiteStart {
        suite: "c.test.js".to_string(),
        serialized: Some(SerializedContext {
            trace_id: "0".to_string(),
            parent_span_id: "0".to_string(),
        }),
    });
    assert!(result.is_err());
    assert_eq!(worker.state(), CorrelatorState::Idle);
    assert!(sink.spans().is_empty());
}
