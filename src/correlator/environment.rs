//! CI provider, git and host metadata shared by every span of a run
//!
//! Collected once when the correlator is built. Variables are read through
//! an injectable lookup so tests never depend on the real environment.
//!
//! ```text
//! GITHUB_ACTIONS / GITLAB_CI / CIRCLECI / JENKINS_URL / BUILDKITE
//!         │ detect
//!         ▼
//!   CiMetadata { provider, pipeline, job, git } ──► DD_GIT_* overrides ──► Tags
//! ```

use crate::span::Tags;

pub const CI_PROVIDER_NAME: &str = "ci.provider.name";
pub const CI_PIPELINE_ID: &str = "ci.pipeline.id";
pub const CI_PIPELINE_NAME: &str = "ci.pipeline.name";
pub const CI_PIPELINE_NUMBER: &str = "ci.pipeline.number";
pub const CI_PIPELINE_URL: &str = "ci.pipeline.url";
pub const CI_JOB_URL: &str = "ci.job.url";
pub const CI_WORKSPACE_PATH: &str = "ci.workspace_path";
pub const GIT_REPOSITORY_URL: &str = "git.repository_url";
pub const GIT_BRANCH: &str = "git.branch";
pub const GIT_TAG: &str = "git.tag";
pub const GIT_COMMIT_SHA: &str = "git.commit.sha";
pub const OS_PLATFORM: &str = "os.platform";
pub const OS_ARCHITECTURE: &str = "os.architecture";
pub const RUNTIME_NAME: &str = "runtime.name";
pub const RUNTIME_VERSION: &str = "runtime.version";

/// Runtime executing the tests, reported as `runtime.*` tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub name: String,
    pub version: Option<String>,
}

impl Default for RuntimeInfo {
    fn default() -> Self {
        Self {
            name: "rust".to_string(),
            version: None,
        }
    }
}

/// What the CI provider tells us about the current build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CiMetadata {
    pub provider: Option<&'static str>,
    pub pipeline_id: Option<String>,
    pub pipeline_name: Option<String>,
    pub pipeline_number: Option<String>,
    pub pipeline_url: Option<String>,
    pub job_url: Option<String>,
    pub workspace_path: Option<String>,
    pub repository_url: Option<String>,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub commit_sha: Option<String>,
}

impl CiMetadata {
    /// Detect the provider from its marker variable and read its fields
    pub fn detect(get: &dyn Fn(&str) -> Option<String>) -> Self {
        let mut meta = if get("GITHUB_ACTIONS").is_some() {
            github(get)
        } else if get("GITLAB_CI").is_some() {
            gitlab(get)
        } else if get("CIRCLECI").is_some() {
            circleci(get)
        } else if get("JENKINS_URL").is_some() {
            jenkins(get)
        } else if get("BUILDKITE").is_some() {
            buildkite(get)
        } else {
            CiMetadata::default()
        };

        // A branch given as a tag ref is really a tag
        if let Some(branch) = meta.branch.take() {
            if branch.contains("tags/") {
                if meta.tag.is_none() {
                    meta.tag = Some(branch);
                }
            } else {
                meta.branch = Some(branch);
            }
        }
        meta.branch = meta.branch.map(|b| normalize_ref(&b));
        meta.tag = meta.tag.map(|t| normalize_ref(&t));

        // User-supplied git metadata wins over the provider's
        let overrides = [
            ("DD_GIT_REPOSITORY_URL", &mut meta.repository_url),
            ("DD_GIT_COMMIT_SHA", &mut meta.commit_sha),
        ];
        for (key, slot) in overrides {
            if let Some(value) = get(key) {
                *slot = Some(value);
            }
        }
        if let Some(tag) = get("DD_GIT_TAG") {
            meta.tag = Some(normalize_ref(&tag));
        }
        if let Some(branch) = get("DD_GIT_BRANCH") {
            meta.branch = Some(normalize_ref(&branch));
        }
        meta
    }

    fn into_tags(self, tags: &mut Tags) {
        let fields = [
            (CI_PIPELINE_ID, self.pipeline_id),
            (CI_PIPELINE_NAME, self.pipeline_name),
            (CI_PIPELINE_NUMBER, self.pipeline_number),
            (CI_PIPELINE_URL, self.pipeline_url),
            (CI_JOB_URL, self.job_url),
            (CI_WORKSPACE_PATH, self.workspace_path),
            (GIT_REPOSITORY_URL, self.repository_url),
            (GIT_BRANCH, self.branch),
            (GIT_TAG, self.tag),
            (GIT_COMMIT_SHA, self.commit_sha),
        ];
        if let Some(provider) = self.provider {
            tags.insert(CI_PROVIDER_NAME.to_string(), provider.into());
        }
        for (key, value) in fields {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                tags.insert(key.to_string(), value.into());
            }
        }
    }
}

/// Strip `refs/heads/`, `refs/tags/`, `origin/` style prefixes
fn normalize_ref(name: &str) -> String {
    let mut name = name.trim();
    for prefix in ["refs/heads/", "refs/tags/", "refs/", "origin/tags/", "origin/", "tags/"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest;
        }
    }
    name.to_string()
}

fn github(get: &dyn Fn(&str) -> Option<String>) -> CiMetadata {
    let server = get("GITHUB_SERVER_URL").unwrap_or_else(|| "https://github.com".to_string());
    let repository = get("GITHUB_REPOSITORY");
    let run_id = get("GITHUB_RUN_ID");
    let run_url = match (&repository, &run_id) {
        (Some(repo), Some(id)) => Some(format!("{}/{}/actions/runs/{}", server, repo, id)),
        _ => None,
    };
    CiMetadata {
        provider: Some("github"),
        pipeline_id: run_id,
        pipeline_name: get("GITHUB_WORKFLOW"),
        pipeline_number: get("GITHUB_RUN_NUMBER"),
        job_url: run_url.clone(),
        pipeline_url: run_url,
        workspace_path: get("GITHUB_WORKSPACE"),
        repository_url: repository.map(|repo| format!("{}/{}.git", server, repo)),
        branch: get("GITHUB_HEAD_REF")
            .filter(|r| !r.is_empty())
            .or_else(|| get("GITHUB_REF")),
        tag: None,
        commit_sha: get("GITHUB_SHA"),
    }
}

fn gitlab(get: &dyn Fn(&str) -> Option<String>) -> CiMetadata {
    CiMetadata {
        provider: Some("gitlab"),
        pipeline_id: get("CI_PIPELINE_ID"),
        pipeline_name: get("CI_PROJECT_PATH"),
        pipeline_number: get("CI_PIPELINE_IID"),
        pipeline_url: get("CI_PIPELINE_URL"),
        job_url: get("CI_JOB_URL"),
        workspace_path: get("CI_PROJECT_DIR"),
        repository_url: get("CI_REPOSITORY_URL"),
        branch: get("CI_COMMIT_BRANCH").or_else(|| get("CI_COMMIT_REF_NAME")),
        tag: get("CI_COMMIT_TAG"),
        commit_sha: get("CI_COMMIT_SHA"),
    }
}

fn circleci(get: &dyn Fn(&str) -> Option<String>) -> CiMetadata {
    let workflow = get("CIRCLE_WORKFLOW_ID");
    CiMetadata {
        provider: Some("circleci"),
        pipeline_url: workflow
            .as_ref()
            .map(|id| format!("https://app.circleci.com/pipelines/workflows/{}", id)),
        pipeline_id: workflow,
        pipeline_name: get("CIRCLE_PROJECT_REPONAME"),
        pipeline_number: get("CIRCLE_BUILD_NUM"),
        job_url: get("CIRCLE_BUILD_URL"),
        workspace_path: get("CIRCLE_WORKING_DIRECTORY"),
        repository_url: get("CIRCLE_REPOSITORY_URL"),
        branch: get("CIRCLE_BRANCH"),
        tag: get("CIRCLE_TAG"),
        commit_sha: get("CIRCLE_SHA1"),
    }
}

fn jenkins(get: &dyn Fn(&str) -> Option<String>) -> CiMetadata {
    CiMetadata {
        provider: Some("jenkins"),
        pipeline_id: get("BUILD_TAG"),
        pipeline_name: get("JOB_NAME"),
        pipeline_number: get("BUILD_NUMBER"),
        pipeline_url: get("BUILD_URL"),
        job_url: get("JOB_URL"),
        workspace_path: get("WORKSPACE"),
        repository_url: get("GIT_URL").or_else(|| get("GIT_URL_1")),
        branch: get("GIT_BRANCH"),
        tag: None,
        commit_sha: get("GIT_COMMIT"),
    }
}

fn buildkite(get: &dyn Fn(&str) -> Option<String>) -> CiMetadata {
    let build_url = get("BUILDKITE_BUILD_URL");
    let job_url = match (&build_url, get("BUILDKITE_JOB_ID")) {
        (Some(url), Some(job)) => Some(format!("{}#{}", url, job)),
        _ => None,
    };
    CiMetadata {
        provider: Some("buildkite"),
        pipeline_id: get("BUILDKITE_BUILD_ID"),
        pipeline_name: get("BUILDKITE_PIPELINE_SLUG"),
        pipeline_number: get("BUILDKITE_BUILD_NUMBER"),
        pipeline_url: build_url,
        job_url,
        workspace_path: get("BUILDKITE_BUILD_CHECKOUT_PATH"),
        repository_url: get("BUILDKITE_REPO"),
        branch: get("BUILDKITE_BRANCH"),
        tag: get("BUILDKITE_TAG"),
        commit_sha: get("BUILDKITE_COMMIT"),
    }
}

/// Tags describing the CI build, the host and the runtime
pub fn environment_tags(get: &dyn Fn(&str) -> Option<String>, runtime: &RuntimeInfo) -> Tags {
    let mut tags = Tags::new();
    CiMetadata::detect(get).into_tags(&mut tags);
    tags.insert(OS_PLATFORM.to_string(), std::env::consts::OS.into());
    tags.insert(OS_ARCHITECTURE.to_string(), std::env::consts::ARCH.into());
    tags.insert(RUNTIME_NAME.to_string(), runtime.name.clone().into());
    if let Some(version) = &runtime.version {
        tags.insert(RUNTIME_VERSION.to_string(), version.clone().into());
    }
    tags
}
