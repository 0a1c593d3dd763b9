//! Hook registry - conditional, idempotent, fail-open module patching
//!
//! The host's module loader calls [`HookRegistry::on_load`] every time it
//! resolves a module. Each registered hook whose matcher accepts the module
//! gets one chance to replace the module's exports with an instrumented
//! adapter.
//!
//! # Decision flow per hook
//!
//! ```text
//! on_load(module)
//!     │
//!     ├─ target != "name[/file]" ───────────► Unmatched        (pass-through)
//!     ├─ (hook, handle) already patched ────► AlreadyPatched   (cached patched exports)
//!     ├─ version outside every range ───────► VersionMismatch  (pass-through, silent)
//!     ├─ patch() returns Err / panics ──────► PatchFailed      (original exports, logged)
//!     └─ patch() returns Ok(new) ───────────► Patched          (new exports recorded)
//! ```
//!
//! Patched targets are tracked in an ownership table keyed by
//! `(HookId, HandleId)`. Entries are removed explicitly with
//! [`HookRegistry::release`] or [`HookRegistry::teardown`] at run end.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, error, info};

use super::version;
use crate::error::PatchError;
use crate::metrics::{HOOKS_APPLIED, HOOK_FAILURES};

/// Manifest file read from a module's base directory to learn its version
pub const MANIFEST_FILE: &str = "package.json";

/// Type-erased exports of a loaded module
pub type ModuleExports = Arc<dyn Any + Send + Sync>;

/// A patch strategy: receives the original exports, returns the replacement
pub type PatchFn = Arc<dyn Fn(ModuleExports) -> Result<ModuleExports, PatchError> + Send + Sync>;

/// Stable identity of an exports object, assigned by the host loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

/// Identity of a registered hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(usize);

/// Which modules a hook applies to
#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    /// Package name (e.g. "mocha")
    pub name: String,
    /// Optional file inside the package (e.g. "lib/runner.js")
    pub file: Option<String>,
    /// Optional version ranges; any one must be satisfied
    pub versions: Option<Vec<String>>,
}

impl Matcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: None,
            versions: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions = Some(versions.into_iter().map(Into::into).collect());
        self
    }

    /// Full target identity compared against the loaded module name
    pub fn target(&self) -> String {
        match &self.file {
            Some(file) => format!("{}/{}", self.name, file.trim_start_matches('/')),
            None => self.name.clone(),
        }
    }
}

/// A module resolution reported by the host loader
#[derive(Clone)]
pub struct LoadedModule {
    /// Module name with path separators normalized to `/`
    pub module_name: String,
    /// Stable identity of `exports`
    pub handle: HandleId,
    pub exports: ModuleExports,
    /// Version declared by the host, if it already knows it
    pub version: Option<String>,
    /// Package root; its manifest is read when `version` is absent
    pub base_dir: Option<PathBuf>,
}

impl LoadedModule {
    pub fn new(module_name: impl Into<String>, handle: HandleId, exports: ModuleExports) -> Self {
        Self {
            module_name: module_name.into().replace('\\', "/"),
            handle,
            exports,
            version: None,
            base_dir: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Declared version, falling back to the package manifest
    pub fn resolve_version(&self) -> Option<String> {
        self.version
            .clone()
            .or_else(|| self.base_dir.as_deref().and_then(read_manifest_version))
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("module_name", &self.module_name)
            .field("handle", &self.handle)
            .field("version", &self.version)
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

/// What a single hook did with a load event
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Unmatched,
    VersionMismatch,
    Patched,
    AlreadyPatched,
    PatchFailed(PatchError),
}

/// Result of dispatching one load event to every hook
pub struct LoadReport {
    /// Exports to hand back to the host (patched or original)
    pub exports: ModuleExports,
    /// One outcome per registered hook, in registration order
    pub outcomes: Vec<(HookId, LoadOutcome)>,
}

impl LoadReport {
    /// Whether any hook replaced the exports during this event
    pub fn patched(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, outcome)| matches!(outcome, LoadOutcome::Patched | LoadOutcome::AlreadyPatched))
    }

    pub fn outcome(&self, hook: HookId) -> Option<&LoadOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == hook)
            .map(|(_, outcome)| outcome)
    }
}

struct Hook {
    id: HookId,
    matcher: Matcher,
    target: String,
    patch: PatchFn,
}

/// Registry of interception hooks
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<Hook>>>,
    /// Ownership table: patched exports per (hook, target identity)
    patched: Mutex<HashMap<(HookId, HandleId), ModuleExports>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a patch strategy for every module matching `matcher`
    pub fn add_hook<F>(&self, matcher: Matcher, patch: F) -> HookId
    where
        F: Fn(ModuleExports) -> Result<ModuleExports, PatchError> + Send + Sync + 'static,
    {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let id = HookId(hooks.len());
        let target = matcher.target();
        debug!(hook = %target, versions = ?matcher.versions, "Hook registered");
        hooks.push(Arc::new(Hook {
            id,
            matcher,
            target,
            patch: Arc::new(patch),
        }));
        id
    }

    /// Number of registered hooks
    pub fn len(&self) -> usize {
        self.hooks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch a module load event to every hook.
    ///
    /// Hooks run in registration order; the exports returned by one hook
    /// are the input of the next matching hook. This never fails: any
    /// instrumentation fault leaves the exports as they were.
    pub fn on_load(&self, module: &LoadedModule) -> LoadReport {
        // Snapshot so patch strategies may register further hooks
        let hooks: Vec<Arc<Hook>> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut exports = Arc::clone(&module.exports);
        let mut resolved_version: Option<Option<String>> = None;
        let mut outcomes = Vec::with_capacity(hooks.len());

        for hook in hooks {
            if module.module_name != hook.target {
                outcomes.push((hook.id, LoadOutcome::Unmatched));
                continue;
            }

            let key = (hook.id, module.handle);
            if let Some(existing) = self.lookup(&key) {
                exports = existing;
                outcomes.push((hook.id, LoadOutcome::AlreadyPatched));
                continue;
            }

            let version = resolved_version.get_or_insert_with(|| module.resolve_version());
            if !version::matches_any(version.as_deref(), hook.matcher.versions.as_deref()) {
                debug!(
                    hook = %hook.target,
                    version = ?version,
                    "Module version outside supported ranges, not patching"
                );
                outcomes.push((hook.id, LoadOutcome::VersionMismatch));
                continue;
            }

            let outcome = match apply_patch(&hook, Arc::clone(&exports)) {
                Ok(patched) => {
                    self.patched
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(key, Arc::clone(&patched));
                    exports = patched;
                    HOOKS_APPLIED.with_label_values(&[&hook.target]).inc();
                    info!(hook = %hook.target, handle = module.handle.0, "Module instrumented");
                    LoadOutcome::Patched
                }
                Err(e) => {
                    HOOK_FAILURES.with_label_values(&[&hook.target]).inc();
                    error!(hook = %hook.target, error = %e, "Instrumentation failed, keeping original module");
                    LoadOutcome::PatchFailed(e)
                }
            };
            outcomes.push((hook.id, outcome));
        }

        LoadReport { exports, outcomes }
    }

    /// Whether `hook` has already patched the target `handle`
    pub fn is_patched(&self, hook: HookId, handle: HandleId) -> bool {
        self.lookup(&(hook, handle)).is_some()
    }

    /// Forget every patch recorded for `handle` (the host unloaded it)
    pub fn release(&self, handle: HandleId) -> usize {
        let mut patched = self.patched.lock().unwrap_or_else(PoisonError::into_inner);
        let before = patched.len();
        patched.retain(|(_, h), _| *h != handle);
        before - patched.len()
    }

    /// Drop the whole ownership table at run end
    pub fn teardown(&self) {
        let mut patched = self.patched.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(entries = patched.len(), "Hook registry teardown");
        patched.clear();
    }

    fn lookup(&self, key: &(HookId, HandleId)) -> Option<ModuleExports> {
        self.patched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

/// Run a patch strategy, turning panics into `PatchError`
fn apply_patch(hook: &Hook, exports: ModuleExports) -> Result<ModuleExports, PatchError> {
    match catch_unwind(AssertUnwindSafe(|| (hook.patch)(exports))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "patch panicked".to_string());
            Err(PatchError::new(message))
        }
    }
}

/// Read the `version` field of the manifest in `base_dir`
fn read_manifest_version(base_dir: &Path) -> Option<String> {
    let json = std::fs::read_to_string(base_dir.join(MANIFEST_FILE)).ok()?;
    let manifest: serde_json::Value = serde_json::from_str(&json).ok()?;
    manifest["version"].as_str().map(str::to_string)
}
