//! Ambient audit context.
//!
//! Audit context (acting user, transaction, tenant, and any extension keys)
//! is bound to the current execution context rather than passed through
//! every call. Each execution context owns a separate frame of bindings:
//!
//! - Inside a future run by [`scope`], the frame belongs to that tokio task
//!   and follows it across `.await` points and worker threads.
//! - Everywhere else the frame belongs to the current OS thread.
//!
//! Concurrent execution contexts never see each other's bindings.
//!
//! Scoped activation ([`with_context`], [`as_actor`], [`as_transaction`])
//! swaps values in for the duration of a closure and restores the previous
//! values when the closure returns, fails, or unwinds. Scoped activation is
//! safe anywhere because a closure cannot yield to another task. Raw writes
//! with [`set`] and [`clear`] outlive the call, so on a tokio runtime they
//! are only accepted inside a [`scope`] future; elsewhere on a runtime they
//! fail with [`ContextError::Unscoped`] instead of leaking into the thread
//! frame shared by every task on that worker.
//!
//! ```
//! use chronicle_audit::context;
//! use chronicle_core::Actor;
//!
//! let result = context::as_actor("alice", || {
//!     assert_eq!(context::actor(), Some(Actor::name("alice")));
//!     42
//! });
//!
//! assert_eq!(result, 42);
//! assert_eq!(context::actor(), None);
//! ```

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chronicle_core::{Actor, EntityRef};
use serde_json::Value;
use thiserror::Error;

use crate::interceptor::RequestScope;

thread_local! {
    static THREAD_FRAME: RefCell<ContextFrame> = RefCell::new(ContextFrame::default());
}

tokio::task_local! {
    static TASK_FRAME: RefCell<ContextFrame>;
}

/// Errors from writing ambient context.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// A raw write on a runtime thread outside any task scope.
    #[error("ambient context can only be set inside a context scope while a tokio runtime is active")]
    Unscoped,
}

/// Key of an ambient context binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    /// Acting user or process
    Actor,
    /// Logical transaction identifier
    TransactionId,
    /// Organization (tenant) identifier
    OrganizationId,
    /// Request identifier
    RequestId,
    /// Application-defined extension key
    Custom(String),
}

impl ContextKey {
    /// Creates an extension key.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actor => f.write_str("actor"),
            Self::TransactionId => f.write_str("transaction_id"),
            Self::OrganizationId => f.write_str("organization_id"),
            Self::RequestId => f.write_str("request_id"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Value of an ambient context binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    /// An actor
    Actor(Actor),
    /// A plain string, such as an identifier or a username
    Text(String),
    /// Any other JSON value
    Json(Value),
}

impl ContextValue {
    /// Interprets the value as an actor.
    ///
    /// Strings name a free-form actor; other JSON values are not actors.
    #[must_use]
    pub fn to_actor(&self) -> Option<Actor> {
        match self {
            Self::Actor(actor) => Some(actor.clone()),
            Self::Text(name) => Some(Actor::Name(name.clone())),
            Self::Json(Value::String(name)) => Some(Actor::Name(name.clone())),
            Self::Json(_) => None,
        }
    }

    /// Interprets the value as an opaque identifier.
    ///
    /// Strings are used as-is and numbers in their decimal form.
    #[must_use]
    pub fn to_identifier(&self) -> Option<String> {
        match self {
            Self::Text(id) | Self::Json(Value::String(id)) => Some(id.clone()),
            Self::Json(Value::Number(n)) => Some(n.to_string()),
            Self::Actor(_) | Self::Json(_) => None,
        }
    }
}

impl From<Actor> for ContextValue {
    fn from(actor: Actor) -> Self {
        Self::Actor(actor)
    }
}

impl From<EntityRef> for ContextValue {
    fn from(entity: EntityRef) -> Self {
        Self::Actor(Actor::Principal(entity))
    }
}

impl From<&str> for ContextValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<i64> for ContextValue {
    fn from(n: i64) -> Self {
        Self::Json(Value::from(n))
    }
}

/// The bindings visible to one execution context.
#[derive(Debug, Clone, Default)]
struct ContextFrame {
    values: HashMap<ContextKey, ContextValue>,
    suppressed: BTreeSet<String>,
    request: Option<Arc<dyn RequestScope>>,
}

impl ContextFrame {
    fn is_suppressed(&self, entity_type: &str) -> bool {
        self.suppressed.contains(entity_type)
    }

    fn apply(&mut self, change: Binding) -> Binding {
        match change {
            Binding::Value(key, Some(value)) => {
                let previous = self.values.insert(key.clone(), value);
                Binding::Value(key, previous)
            }
            Binding::Value(key, None) => {
                let previous = self.values.remove(&key);
                Binding::Value(key, previous)
            }
            Binding::Suppressed(entity_type, true) => {
                let inserted = self.suppressed.insert(entity_type.clone());
                Binding::Suppressed(entity_type, !inserted)
            }
            Binding::Suppressed(entity_type, false) => {
                let removed = self.suppressed.remove(&entity_type);
                Binding::Suppressed(entity_type, removed)
            }
            Binding::Request(scope) => Binding::Request(std::mem::replace(&mut self.request, scope)),
        }
    }
}

/// One reversible change to a frame. Applying a binding yields the binding
/// that undoes it.
enum Binding {
    Value(ContextKey, Option<ContextValue>),
    Suppressed(String, bool),
    Request(Option<Arc<dyn RequestScope>>),
}

/// Restores the previous bindings when dropped, on every exit path.
struct Restore {
    undo: Vec<Binding>,
}

impl Restore {
    fn activate(bindings: impl IntoIterator<Item = Binding>) -> Self {
        let undo: Vec<Binding> =
            with_frame(|frame| bindings.into_iter().map(|b| frame.apply(b)).collect());
        Self { undo }
    }
}

impl Drop for Restore {
    fn drop(&mut self) {
        let undo = std::mem::take(&mut self.undo);
        with_frame(|frame| {
            for binding in undo.into_iter().rev() {
                frame.apply(binding);
            }
        });
    }
}

fn in_task_scope() -> bool {
    TASK_FRAME.try_with(|_| ()).is_ok()
}

fn with_frame<R>(f: impl FnOnce(&mut ContextFrame) -> R) -> R {
    if in_task_scope() {
        TASK_FRAME.with(|frame| f(&mut frame.borrow_mut()))
    } else {
        THREAD_FRAME.with(|frame| f(&mut frame.borrow_mut()))
    }
}

/// Like [`with_frame`], but refuses the thread frame of a runtime worker,
/// where a write would stay visible to every task polled on that thread.
fn with_owned_frame<R>(f: impl FnOnce(&mut ContextFrame) -> R) -> Result<R, ContextError> {
    if !in_task_scope() && tokio::runtime::Handle::try_current().is_ok() {
        return Err(ContextError::Unscoped);
    }
    Ok(with_frame(f))
}

/// Binds a value in the current execution context, returning the previous one.
///
/// # Errors
///
/// Returns [`ContextError::Unscoped`] when called on a tokio runtime outside
/// a [`scope`] future.
pub fn set(
    key: ContextKey,
    value: impl Into<ContextValue>,
) -> Result<Option<ContextValue>, ContextError> {
    with_owned_frame(|frame| frame.values.insert(key, value.into()))
}

/// Returns the value bound to a key in the current execution context.
#[must_use]
pub fn get(key: &ContextKey) -> Option<ContextValue> {
    with_frame(|frame| frame.values.get(key).cloned())
}

/// Removes a binding from the current execution context, returning it.
///
/// # Errors
///
/// Returns [`ContextError::Unscoped`] when called on a tokio runtime outside
/// a [`scope`] future.
pub fn clear(key: &ContextKey) -> Result<Option<ContextValue>, ContextError> {
    with_owned_frame(|frame| frame.values.remove(key))
}

fn snapshot() -> ContextFrame {
    with_frame(|frame| frame.clone())
}

/// Returns the bound actor.
#[must_use]
pub fn actor() -> Option<Actor> {
    get(&ContextKey::Actor).and_then(|value| value.to_actor())
}

/// Returns the bound transaction ID.
#[must_use]
pub fn transaction_id() -> Option<String> {
    get(&ContextKey::TransactionId).and_then(|value| value.to_identifier())
}

/// Returns the bound organization ID.
#[must_use]
pub fn organization_id() -> Option<String> {
    get(&ContextKey::OrganizationId).and_then(|value| value.to_identifier())
}

/// Returns the bound request ID.
#[must_use]
pub fn request_id() -> Option<String> {
    get(&ContextKey::RequestId).and_then(|value| value.to_identifier())
}

/// Runs `body` with the given bindings active, then restores the previous
/// values, including when `body` fails or panics.
///
/// Nested activations compose: the innermost binding wins while it is
/// active and the outer value is back once it exits.
pub fn with_context<T, I, V>(bindings: I, body: impl FnOnce() -> T) -> T
where
    I: IntoIterator<Item = (ContextKey, V)>,
    V: Into<ContextValue>,
{
    let _restore = Restore::activate(
        bindings
            .into_iter()
            .map(|(key, value)| Binding::Value(key, Some(value.into()))),
    );
    body()
}

/// Runs `body` with `actor` as the acting user.
pub fn as_actor<T>(actor: impl Into<Actor>, body: impl FnOnce() -> T) -> T {
    with_context([(ContextKey::Actor, ContextValue::Actor(actor.into()))], body)
}

/// Runs `body` with `id` as the transaction ID.
pub fn as_transaction<T>(id: impl Into<String>, body: impl FnOnce() -> T) -> T {
    with_context([(ContextKey::TransactionId, ContextValue::Text(id.into()))], body)
}

/// Runs `body` with `id` as the organization ID.
pub fn with_organization<T>(id: impl Into<String>, body: impl FnOnce() -> T) -> T {
    with_context([(ContextKey::OrganizationId, ContextValue::Text(id.into()))], body)
}

/// Runs `body` as its own task-level execution context.
///
/// The new context starts as a copy of the caller's bindings with
/// `bindings` applied on top. Whatever `body` binds stays inside it; the
/// caller's context is untouched when the returned future completes or is
/// dropped.
pub fn scope<F, I, V>(bindings: I, body: F) -> impl Future<Output = F::Output>
where
    F: Future,
    I: IntoIterator<Item = (ContextKey, V)>,
    V: Into<ContextValue>,
{
    let mut frame = snapshot();
    for (key, value) in bindings {
        frame.values.insert(key, value.into());
    }
    TASK_FRAME.scope(RefCell::new(frame), body)
}

/// Runs the future `body` with `actor` as the acting user.
pub fn as_actor_async<F: Future>(
    actor: impl Into<Actor>,
    body: F,
) -> impl Future<Output = F::Output> {
    scope([(ContextKey::Actor, ContextValue::Actor(actor.into()))], body)
}

/// Runs the future `body` with `id` as the transaction ID.
pub fn as_transaction_async<F: Future>(
    id: impl Into<String>,
    body: F,
) -> impl Future<Output = F::Output> {
    scope([(ContextKey::TransactionId, ContextValue::Text(id.into()))], body)
}

pub(crate) fn suppress<T>(entity_type: &str, body: impl FnOnce() -> T) -> T {
    let _restore = Restore::activate([Binding::Suppressed(entity_type.to_string(), true)]);
    body()
}

pub(crate) fn suppress_async<F: Future>(
    entity_type: &str,
    body: F,
) -> impl Future<Output = F::Output> {
    let mut frame = snapshot();
    frame.suppressed.insert(entity_type.to_string());
    TASK_FRAME.scope(RefCell::new(frame), body)
}

pub(crate) fn is_suppressed(entity_type: &str) -> bool {
    with_frame(|frame| frame.is_suppressed(entity_type))
}

pub(crate) fn with_request_scope<T>(
    request: Arc<dyn RequestScope>,
    body: impl FnOnce() -> T,
) -> T {
    let _restore = Restore::activate([Binding::Request(Some(request))]);
    body()
}

pub(crate) fn request_scope_async<F: Future>(
    request: Arc<dyn RequestScope>,
    body: F,
) -> impl Future<Output = F::Output> {
    let mut frame = snapshot();
    frame.request = Some(request);
    TASK_FRAME.scope(RefCell::new(frame), body)
}

pub(crate) fn current_request_scope() -> Option<Arc<dyn RequestScope>> {
    with_frame(|frame| frame.request.clone())
}
