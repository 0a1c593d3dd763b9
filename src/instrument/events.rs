//! Lifecycle channels and the payloads published on them
//!
//! Channel names follow `ci:<framework>:<entity>:<event>`:
//!
//! ```text
//! ci:mocha:session:start          SessionStart
//! ci:mocha:session:configuration  SessionConfiguration   (carrier filled by subscriber)
//! ci:mocha:session:finish         SessionFinish
//! ci:mocha:suite:start            SuiteStart
//! ci:mocha:suite:finish           SuiteFinish
//! ci:mocha:test:start             TestStart
//! ci:mocha:test:finish            TestFinish
//! ci:mocha:test:error             TestError
//! ci:mocha:test:skip              TestSkip
//! ci:mocha:test:parameterize      TestParameterize
//! ci:mocha:test:tags              AddTags
//! ci:mocha:hook:error             HookError
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::channel::{channel, Channel};
use crate::span::{SerializedContext, Tags};

/// Product prefix of every channel name
pub const PRODUCT: &str = "ci";

/// Outcome of a test, suite or session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "pass",
            TestStatus::Fail => "fail",
            TestStatus::Skip => "skip",
        }
    }
}

/// Error details attached to a span
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    /// Error type name (e.g. "AssertionError")
    pub kind: String,
    pub message: String,
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// A run is starting
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStart {
    /// Command that launched the run (e.g. "yarn test")
    pub command: String,
    pub framework_version: Option<String>,
}

/// Asks the subscriber to write the session's serialized context into a
/// child-process configuration carrier before the child is spawned
#[derive(Debug, Default)]
pub struct SessionConfiguration {
    carrier: Mutex<BTreeMap<String, String>>,
}

impl SessionConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.carrier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn carrier(&self) -> BTreeMap<String, String> {
        self.carrier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn into_carrier(self) -> BTreeMap<String, String> {
        self.carrier.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionFinish {
    pub status: TestStatus,
}

/// A suite is starting; `serialized` is set when the session lives in
/// another process
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteStart {
    pub suite: String,
    pub serialized: Option<SerializedContext>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuiteFinish {
    pub status: TestStatus,
}

/// A test attempt is starting
#[derive(Debug, Clone, PartialEq)]
pub struct TestStart {
    pub name: String,
    pub suite: String,
    /// Zero for the first attempt
    pub retry: u32,
    /// Source file, used for code ownership
    pub file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestFinish {
    pub status: TestStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestError {
    pub error: ErrorInfo,
}

/// A test that never ran
#[derive(Debug, Clone, PartialEq)]
pub struct TestSkip {
    pub name: String,
    pub suite: String,
    pub file: Option<String>,
}

/// Parameters of a parameterized test, published before it starts
#[derive(Debug, Clone, PartialEq)]
pub struct TestParameterize {
    pub name: String,
    pub parameters: serde_json::Value,
}

/// A setup/teardown hook failed
#[derive(Debug, Clone, PartialEq)]
pub struct HookError {
    pub hook_title: String,
    pub error: ErrorInfo,
}

/// Custom tags for the active test
#[derive(Debug, Clone, PartialEq)]
pub struct AddTags {
    pub tags: Tags,
}

/// Every lifecycle channel of one framework
#[derive(Debug, Clone)]
pub struct ChannelSet {
    framework: String,
    pub session_start: Arc<Channel>,
    pub session_configuration: Arc<Channel>,
    pub session_finish: Arc<Channel>,
    pub suite_start: Arc<Channel>,
    pub suite_finish: Arc<Channel>,
    pub test_start: Arc<Channel>,
    pub test_finish: Arc<Channel>,
    pub test_error: Arc<Channel>,
    pub test_skip: Arc<Channel>,
    pub test_parameterize: Arc<Channel>,
    pub test_tags: Arc<Channel>,
    pub hook_error: Arc<Channel>,
}

impl ChannelSet {
    /// Resolve (creating on first use) every channel for `framework`
    pub fn new(framework: &str) -> Self {
        let ch = |entity: &str, event: &str| channel(&Self::channel_name(framework, entity, event));
        Self {
            framework: framework.to_string(),
            session_start: ch("session", "start"),
            session_configuration: ch("session", "configuration"),
            session_finish: ch("session", "finish"),
            suite_start: ch("suite", "start"),
            suite_finish: ch("suite", "finish"),
            test_start: ch("test", "start"),
            test_finish: ch("test", "finish"),
            test_error: ch("test", "error"),
            test_skip: ch("test", "skip"),
            test_parameterize: ch("test", "parameterize"),
            test_tags: ch("test", "tags"),
            hook_error: ch("hook", "error"),
        }
    }

    pub fn channel_name(framework: &str, entity: &str, event: &str) -> String {
        format!("{}:{}:{}:{}", PRODUCT, framework, entity, event)
    }

    pub fn framework(&self) -> &str {
        &self.framework
    }
}
