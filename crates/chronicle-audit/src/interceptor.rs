//! Request-scope interception.
//!
//! The request-handling layer brackets each request with
//! [`RequestInterceptor::around`] (or [`RequestInterceptor::around_async`]).
//! While the request runs, its [`RequestScope`] is bound to the current
//! execution context; every record captured inside it passes through
//! [`RequestInterceptor::before_capture`], which fills identity fields the
//! caller and the ambient context left unset and stamps request metadata.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use chronicle_core::{AuditRecord, SharedConfig};
use tracing::trace;

use crate::context::{self, ContextValue};

/// Read access to the request being served.
pub trait RequestScope: Send + Sync + Debug {
    /// Invokes the named accessor.
    ///
    /// Returns `None` if no accessor of that name exists or it yields nothing.
    fn accessor(&self, name: &str) -> Option<ContextValue>;

    /// Returns the network origin of the request.
    fn remote_address(&self) -> Option<String>;

    /// Returns the request's identifier.
    fn request_id(&self) -> Option<String> {
        None
    }
}

/// A [`RequestScope`] backed by a fixed set of accessor values.
///
/// # Examples
///
/// ```
/// use chronicle_audit::{RequestScope, StaticRequestScope};
/// use chronicle_core::Actor;
///
/// let scope = StaticRequestScope::new()
///     .with_accessor("current_user", Actor::name("alice"))
///     .with_remote_address("1.2.3.4");
///
/// assert!(scope.accessor("current_user").is_some());
/// assert!(scope.accessor("custom_user").is_none());
/// assert_eq!(scope.remote_address().as_deref(), Some("1.2.3.4"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticRequestScope {
    accessors: HashMap<String, ContextValue>,
    remote_address: Option<String>,
    request_id: Option<String>,
}

impl StaticRequestScope {
    /// Creates a scope with no accessors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines an accessor.
    #[must_use]
    pub fn with_accessor(mut self, name: &str, value: impl Into<ContextValue>) -> Self {
        self.accessors.insert(name.to_string(), value.into());
        self
    }

    /// Sets the network origin.
    #[must_use]
    pub fn with_remote_address(mut self, address: &str) -> Self {
        self.remote_address = Some(address.to_string());
        self
    }

    /// Sets the request identifier.
    #[must_use]
    pub fn with_request_id(mut self, id: &str) -> Self {
        self.request_id = Some(id.to_string());
        self
    }
}

impl RequestScope for StaticRequestScope {
    fn accessor(&self, name: &str) -> Option<ContextValue> {
        self.accessors.get(name).cloned()
    }

    fn remote_address(&self) -> Option<String> {
        self.remote_address.clone()
    }

    fn request_id(&self) -> Option<String> {
        self.request_id.clone()
    }
}

/// Seeds audit records with identity and metadata from the current request.
///
/// Accessor names come from the shared [`AuditConfig`](chronicle_core::AuditConfig)
/// and are read on every call, so changing them takes effect immediately.
#[derive(Debug, Clone)]
pub struct RequestInterceptor {
    config: SharedConfig,
}

impl RequestInterceptor {
    /// Creates an interceptor reading accessor names from `config`.
    #[must_use]
    pub const fn new(config: SharedConfig) -> Self {
        Self { config }
    }

    /// Runs `body` as the handling of one request.
    ///
    /// The scope is visible to captures in the current execution context
    /// only, and is released when `body` exits by any path.
    pub fn around<T>(&self, scope: Arc<dyn RequestScope>, body: impl FnOnce() -> T) -> T {
        trace!(remote_address = ?scope.remote_address(), "Entering request scope");
        context::with_request_scope(scope, body)
    }

    /// Runs the future `body` as the handling of one request.
    pub fn around_async<F: Future>(
        &self,
        scope: Arc<dyn RequestScope>,
        body: F,
    ) -> impl Future<Output = F::Output> {
        context::request_scope_async(scope, body)
    }

    /// Returns the request scope active in the current execution context.
    #[must_use]
    pub fn current_scope() -> Option<Arc<dyn RequestScope>> {
        context::current_request_scope()
    }

    /// Fills the record's unset identity fields from the request scope.
    ///
    /// `organization_id`, the actor and `transaction_id` are only filled
    /// when still unset and the configured accessor yields a value; missing
    /// accessors are skipped. `remote_address` is always taken from the
    /// scope, and `request_id` is filled when unset.
    #[must_use]
    pub fn before_capture(&self, mut record: AuditRecord, scope: &dyn RequestScope) -> AuditRecord {
        let config = self.config.read();

        if record.organization_id.is_none() {
            record.organization_id = scope
                .accessor(&config.organization_id_method)
                .and_then(|value| value.to_identifier());
        }

        if record.actor().is_none() {
            record.set_actor(
                scope
                    .accessor(&config.current_user_method)
                    .and_then(|value| value.to_actor()),
            );
        }

        if record.transaction_id.is_none() {
            record.transaction_id = scope
                .accessor(&config.transaction_id_method)
                .and_then(|value| value.to_identifier());
        }

        record.remote_address = scope.remote_address();

        if record.request_id.is_none() {
            record.request_id = scope.request_id();
        }

        record
    }
}
