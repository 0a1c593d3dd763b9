//! Execution context propagation across callbacks and tasks
//!
//! Runner listeners fire later and interleaved with unrelated work. A span
//! created inside such a listener must still attach to the test that
//! registered it, so the context is captured when the listener is bound and
//! re-entered whenever it runs.
//!
//! ```text
//! test start ──► AsyncResource::new()   (captures ctx{span = T})
//!                     │
//!                     └─► bind(on_test_end) ─ ─ ─ later, from anywhere ─ ─ ─►
//!                                                  on_test_end runs inside ctx{span = T},
//!                                                  then the caller's ctx is restored
//! ```
//!
//! The ambient slot is a tokio task-local. Each `run`/`scope` installs a
//! fresh cell, so leaving a scope always restores the enclosing context and
//! nothing done inside can leak out. Contexts themselves are immutable;
//! [`enter_with`] swaps the current scope's value wholesale.
//!
//! The ambient slot is an internal convenience. Correlator transitions take
//! explicit [`SpanContext`] values.

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::span::SpanContext;

tokio::task_local! {
    static AMBIENT: RefCell<ExecutionContext>;
}

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct Frame {
    id: u64,
    span: Option<SpanContext>,
}

/// Immutable handle on a causal chain at one point in time
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    frame: Arc<Frame>,
}

impl ExecutionContext {
    /// The empty context seen outside any scope
    pub fn root() -> Self {
        Self {
            frame: Arc::new(Frame { id: 0, span: None }),
        }
    }

    /// Identity of this context; derived contexts get a new id
    pub fn id(&self) -> u64 {
        self.frame.id
    }

    /// Span active in this context, if any
    pub fn span(&self) -> Option<SpanContext> {
        self.frame.span
    }

    /// A new context with `span` active
    pub fn with_span(&self, span: SpanContext) -> Self {
        Self {
            frame: Arc::new(Frame {
                id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
                span: Some(span),
            }),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::root()
    }
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.frame.id == other.frame.id && self.frame.span == other.frame.span
    }
}

/// Context ambient at the call site (root outside any scope)
pub fn current() -> ExecutionContext {
    AMBIENT
        .try_with(|cell| cell.borrow().clone())
        .unwrap_or_else(|_| ExecutionContext::root())
}

/// Span active in the ambient context
pub fn active_span() -> Option<SpanContext> {
    current().span()
}

/// Replace the ambient context for the rest of the current scope.
///
/// Returns false outside any scope, where there is nothing to replace.
pub fn enter_with(context: ExecutionContext) -> bool {
    AMBIENT
        .try_with(|cell| {
            *cell.borrow_mut() = context;
        })
        .is_ok()
}

/// Run `f` with `context` ambient, restoring the previous context afterwards
pub fn run<R>(context: ExecutionContext, f: impl FnOnce() -> R) -> R {
    AMBIENT.sync_scope(RefCell::new(context), f)
}

/// Drive `future` with `context` ambient across every await point
pub async fn scope<F: Future>(context: ExecutionContext, future: F) -> F::Output {
    AMBIENT.scope(RefCell::new(context), future).await
}

/// Captures the ambient context at creation and re-enters it on demand
#[derive(Debug, Clone)]
pub struct AsyncResource {
    context: ExecutionContext,
}

impl AsyncResource {
    /// Capture the context ambient right now
    pub fn new() -> Self {
        Self { context: current() }
    }

    /// Capture an explicit context instead of the ambient one
    pub fn from_context(context: ExecutionContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Run `f` inside the captured context
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        run(self.context.clone(), f)
    }

    /// Drive `future` inside the captured context
    pub async fn scope<F: Future>(&self, future: F) -> F::Output {
        scope(self.context.clone(), future).await
    }

    /// Wrap `f` so every call re-enters the captured context.
    ///
    /// `f` keeps its own argument type: `Bound::call` requires exactly the
    /// argument `f` was declared with.
    pub fn bind<F>(&self, f: F) -> Bound<F> {
        Bound {
            context: self.context.clone(),
            f,
        }
    }

    /// Like [`bind`](Self::bind), with an explicit receiver passed to `f`
    /// on every call.
    pub fn bind_with<T, A, R, F>(&self, receiver: T, f: F) -> Bound<impl Fn(A) -> R>
    where
        F: Fn(&T, A) -> R,
    {
        self.bind(move |args: A| f(&receiver, args))
    }
}

impl Default for AsyncResource {
    fn default() -> Self {
        Self::new()
    }
}

/// Capture the ambient context and bind `f` to it in one step
pub fn bind<F>(f: F) -> Bound<F> {
    AsyncResource::new().bind(f)
}

/// A function bound to a captured execution context
#[derive(Clone)]
pub struct Bound<F> {
    context: ExecutionContext,
    f: F,
}

impl<F> Bound<F> {
    /// The context this function re-enters
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        run(self.context.clone(), || (self.f)(args))
    }

    pub fn call_mut<A, R>(&mut self, args: A) -> R
    where
        F: FnMut(A) -> R,
    {
        let f = &mut self.f;
        run(self.context.clone(), || f(args))
    }

    pub fn call_once<A, R>(self, args: A) -> R
    where
        F: FnOnce(A) -> R,
    {
        let Bound { context, f } = self;
        run(context, || f(args))
    }

    /// Turn the bound function into a plain closure
    pub fn into_fn<A, R>(self) -> impl Fn(A) -> R
    where
        F: Fn(A) -> R,
    {
        move |args: A| self.call(args)
    }
}

impl<F> std::fmt::Debug for Bound<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bound").field("context", &self.context).finish()
    }
}
