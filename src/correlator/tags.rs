//! Tag keys and the common tag sets of session, suite and test spans

use crate::span::{TagValue, Tags};

pub use crate::span::record::{ERROR_MSG, ERROR_STACK, ERROR_TYPE, TEST_STATUS};

pub const TEST_NAME: &str = "test.name";
pub const TEST_SUITE: &str = "test.suite";
pub const TEST_FRAMEWORK: &str = "test.framework";
pub const TEST_FRAMEWORK_VERSION: &str = "test.framework_version";
pub const TEST_TYPE: &str = "test.type";
pub const TEST_COMMAND: &str = "test.command";
pub const TEST_PARAMETERS: &str = "test.parameters";
pub const TEST_CODE_OWNERS: &str = "test.code_owners";
pub const SPAN_KIND: &str = "span.kind";
pub const ORIGIN: &str = "_dd.origin";
pub const LIBRARY_VERSION: &str = "library_version";

/// Origin marking spans produced by test instrumentation
pub const CI_APP_ORIGIN: &str = "ciapp-test";
/// `test.type` of every span this crate produces
pub const TEST_TYPE_TEST: &str = "test";

/// Version of this library, reported on every span
pub fn library_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn insert(tags: &mut Tags, key: &str, value: impl Into<TagValue>) {
    tags.insert(key.to_string(), value.into());
}

fn base_tags(framework: &str, framework_version: Option<&str>, span_kind: &str) -> Tags {
    let mut tags = Tags::new();
    insert(&mut tags, TEST_FRAMEWORK, framework);
    if let Some(version) = framework_version {
        insert(&mut tags, TEST_FRAMEWORK_VERSION, version);
    }
    insert(&mut tags, TEST_TYPE, TEST_TYPE_TEST);
    insert(&mut tags, SPAN_KIND, span_kind);
    insert(&mut tags, ORIGIN, CI_APP_ORIGIN);
    insert(&mut tags, LIBRARY_VERSION, library_version());
    tags
}

pub fn session_tags(framework: &str, framework_version: Option<&str>, command: &str) -> Tags {
    let mut tags = base_tags(framework, framework_version, "test_session_end");
    insert(&mut tags, TEST_COMMAND, command);
    tags
}

pub fn suite_tags(framework: &str, framework_version: Option<&str>, command: Option<&str>, suite: &str) -> Tags {
    let mut tags = base_tags(framework, framework_version, "test_suite_end");
    insert(&mut tags, TEST_SUITE, suite);
    if let Some(command) = command {
        insert(&mut tags, TEST_COMMAND, command);
    }
    tags
}

pub fn test_tags(framework: &str, framework_version: Option<&str>, suite: &str, name: &str) -> Tags {
    let mut tags = base_tags(framework, framework_version, "test");
    insert(&mut tags, TEST_SUITE, suite);
    insert(&mut tags, TEST_NAME, name);
    tags
}

/// Resource names, as shown in the test list
pub fn session_resource(command: &str) -> String {
    format!("test_session.{}", command)
}

pub fn suite_resource(suite: &str) -> String {
    format!("test_suite.{}", suite)
}

pub fn test_resource(suite: &str, name: &str) -> String {
    format!("{}.{}", suite, name)
}
