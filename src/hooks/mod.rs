//! Interception registry
//!
//! Instead of mutating third-party code in place, instrumentation is an
//! explicit table of hooks: `(name, optional file, version ranges) → patch`.
//! The host environment reports module resolutions through one narrow
//! callback and gets back either the original exports or an instrumented
//! adapter exposing the same capability.
//!
//! # Example
//!
//! ```ignore
//! use civis::hooks::{HookRegistry, Matcher, LoadedModule, HandleId};
//!
//! let registry = HookRegistry::new();
//! registry.add_hook(
//!     Matcher::new("mocha").with_file("lib/runner.js").with_versions([">=5.2.0"]),
//!     |exports| Ok(exports),
//! );
//!
//! // Called by the host loader
//! let report = registry.on_load(&LoadedModule::new("mocha/lib/runner.js", HandleId(1), exports));
//! let exports = report.exports;
//! ```

pub mod registry;
pub mod version;

pub use registry::{
    HandleId, HookId, HookRegistry, LoadOutcome, LoadReport, LoadedModule, Matcher, ModuleExports,
    PatchFn,
};
