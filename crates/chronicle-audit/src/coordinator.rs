//! Capture coordination.
//!
//! The [`Auditor`] is invoked once per lifecycle event. It decides whether
//! the event is worth recording, builds the change set, resolves who and
//! what the change belongs to, and hands the finished record to the store.
//!
//! Identity fields resolve with this precedence, highest first:
//!
//! 1. values set explicitly on the [`LifecycleEvent`],
//! 2. the ambient context of the current execution context,
//! 3. the active request scope, via the [`RequestInterceptor`].
//!
//! Capture is expected to run inside the same unit of work as the business
//! change it records: a storage failure is returned to the caller so that
//! unit can be rolled back.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chronicle_core::{
    Action, Actor, AuditConfig, AuditRecord, Auditable, Changes, EntityRef, Result, SharedConfig,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::context;
use crate::interceptor::RequestInterceptor;
use crate::registry::{AuditOptions, TypeRegistry};
use crate::store::{AuditQuery, AuditStore, InMemoryStore};

/// One lifecycle event of an audited entity, as reported by the entity
/// framework.
pub struct LifecycleEvent<'a> {
    entity: &'a dyn Auditable,
    action: Action,
    raw_changes: Map<String, Value>,
    comment: Option<String>,
    actor: Option<Actor>,
    transaction_id: Option<String>,
    organization_id: Option<String>,
    request_id: Option<String>,
}

impl<'a> LifecycleEvent<'a> {
    fn new(entity: &'a dyn Auditable, action: Action, raw_changes: Map<String, Value>) -> Self {
        Self {
            entity,
            action,
            raw_changes,
            comment: None,
            actor: None,
            transaction_id: None,
            organization_id: None,
            request_id: None,
        }
    }

    /// The entity was created; its full attribute set is recorded.
    #[must_use]
    pub fn create(entity: &'a dyn Auditable) -> Self {
        Self::new(entity, Action::Create, Map::new())
    }

    /// The entity was modified; `raw_changes` maps each dirty attribute to
    /// an `[old, new]` pair.
    #[must_use]
    pub fn update(entity: &'a dyn Auditable, raw_changes: Map<String, Value>) -> Self {
        Self::new(entity, Action::Update, raw_changes)
    }

    /// The entity was deleted; its last known attribute set is recorded.
    #[must_use]
    pub fn destroy(entity: &'a dyn Auditable) -> Self {
        Self::new(entity, Action::Destroy, Map::new())
    }

    /// Attaches a comment. A blank comment counts as none.
    #[must_use]
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string()).filter(|c| !c.trim().is_empty());
        self
    }

    /// Sets the actor explicitly, overriding ambient context.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<Actor>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Sets the transaction ID explicitly, overriding ambient context.
    #[must_use]
    pub fn with_transaction_id(mut self, id: &str) -> Self {
        self.transaction_id = Some(id.to_string());
        self
    }

    /// Sets the organization ID explicitly, overriding ambient context.
    #[must_use]
    pub fn with_organization_id(mut self, id: &str) -> Self {
        self.organization_id = Some(id.to_string());
        self
    }

    /// Sets the request ID explicitly, overriding ambient context.
    #[must_use]
    pub fn with_request_id(mut self, id: &str) -> Self {
        self.request_id = Some(id.to_string());
        self
    }

    /// Returns the event's action.
    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }
}

/// Captures audit records for lifecycle events of registered entity types.
#[derive(Debug)]
pub struct Auditor {
    store: Arc<dyn AuditStore>,
    registry: TypeRegistry,
    config: SharedConfig,
    interceptor: Option<RequestInterceptor>,
    enabled: AtomicBool,
}

impl Default for Auditor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Auditor {
    /// Creates a builder for configuring an auditor.
    #[must_use]
    pub fn builder() -> AuditorBuilder {
        AuditorBuilder::new()
    }

    /// Returns the store records are handed to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Returns the registry of audited types.
    #[must_use]
    pub const fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Returns the request interceptor, if request interception is enabled.
    #[must_use]
    pub const fn interceptor(&self) -> Option<&RequestInterceptor> {
        self.interceptor.as_ref()
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> AuditConfig {
        self.config.read().clone()
    }

    /// Changes the configuration for every subsequent capture.
    pub fn configure(&self, update: impl FnOnce(&mut AuditConfig)) {
        update(&mut self.config.write());
    }

    /// Enables or disables all capture.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Returns true unless all capture is disabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Opts an entity type and its subtypes into auditing.
    pub fn register(&self, entity_type: &str, options: AuditOptions) {
        debug!(entity_type, "Registering audited type");
        self.registry.register(entity_type, options);
    }

    /// Records that `child` is a subtype of `parent`.
    pub fn declare_type(&self, child: &str, parent: &str) {
        self.registry.declare_type(child, parent);
    }

    /// Returns every audited type, including known subtypes.
    #[must_use]
    pub fn audited_types(&self) -> std::collections::BTreeSet<String> {
        self.registry.audited_types()
    }

    /// Turns capture off for a type until [`enable_auditing`](Self::enable_auditing).
    ///
    /// This switch is process-wide; prefer [`without_auditing`](Self::without_auditing)
    /// for temporary suppression.
    pub fn disable_auditing(&self, entity_type: &str) {
        self.registry.disable(entity_type);
    }

    /// Turns capture back on for a type.
    pub fn enable_auditing(&self, entity_type: &str) {
        self.registry.enable(entity_type);
    }

    /// Returns true if an event of this type and action would be captured,
    /// provided it carries something worth recording.
    #[must_use]
    pub fn should_capture(&self, entity_type: &str, action: Action) -> bool {
        self.skip_reason(entity_type, action).is_none()
    }

    fn skip_reason(&self, entity_type: &str, action: Action) -> Option<&'static str> {
        if !self.is_enabled() {
            return Some("auditing disabled");
        }

        let Some(options) = self.registry.options_for(entity_type) else {
            return Some("type not audited");
        };

        if !options.audits(action) {
            return Some("action not audited for type");
        }

        if !self.registry.is_enabled(entity_type) {
            return Some("auditing disabled for type");
        }

        if self
            .registry
            .lineage(entity_type)
            .iter()
            .any(|t| context::is_suppressed(t))
        {
            return Some("auditing suppressed in current context");
        }

        None
    }

    /// Runs `body` with capture suppressed for `entity_type` and its
    /// subtypes in the current execution context.
    ///
    /// Other types, and other execution contexts, are unaffected. The prior
    /// state is restored when `body` exits by any path.
    pub fn without_auditing<T>(&self, entity_type: &str, body: impl FnOnce() -> T) -> T {
        context::suppress(entity_type, body)
    }

    /// Runs the future `body` with capture suppressed for `entity_type`.
    pub fn without_auditing_async<F: Future>(
        &self,
        entity_type: &str,
        body: F,
    ) -> impl Future<Output = F::Output> {
        context::suppress_async(entity_type, body)
    }

    /// Captures one lifecycle event.
    ///
    /// Once the store accepts the record, the entity's
    /// [`after_audit`](Auditable::after_audit) hook runs with it.
    ///
    /// Returns `Ok(None)` when the event is not recorded: the type or
    /// action is not audited, capture is disabled or suppressed, or an
    /// update changed nothing and carries no comment. Otherwise returns the
    /// persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedChangeSet`](chronicle_core::Error::MalformedChangeSet)
    /// if an update's raw snapshot is malformed, and
    /// [`Error::Storage`](chronicle_core::Error::Storage) if the store fails.
    pub fn capture(&self, event: LifecycleEvent<'_>) -> Result<Option<AuditRecord>> {
        let entity = event.entity;
        let entity_type = entity.entity_type();

        if let Some(reason) = self.skip_reason(entity_type, event.action) {
            debug!(entity_type, action = %event.action, reason, "Skipping audit");
            return Ok(None);
        }

        let options = self.registry.options_for(entity_type).unwrap_or_default();
        let config = self.config();

        let mut ignored = config.ignored_attributes.clone();
        ignored.extend(options.excepted().iter().cloned());
        ignored.push(entity.primary_key().to_string());

        let changes = match event.action {
            Action::Update => Changes::diff(&event.raw_changes, ignored.as_slice())?,
            Action::Create | Action::Destroy | Action::Restore => {
                Changes::snapshot(&entity.attributes(), ignored.as_slice())
            }
        };

        if event.action == Action::Update && changes.is_empty() && event.comment.is_none() {
            debug!(entity_type, "Skipping audit: update without changes or comment");
            return Ok(None);
        }

        let action = if config.restoring && event.action == Action::Create {
            Action::Restore
        } else {
            event.action
        };

        let mut record = AuditRecord::new(entity.entity_ref(), action, changes);
        record.associated = entity.associated();
        record.comment = event.comment;

        record.set_actor(event.actor.or_else(context::actor));
        record.transaction_id = event.transaction_id.or_else(context::transaction_id);
        record.organization_id = event.organization_id.or_else(context::organization_id);
        record.request_id = event.request_id.or_else(context::request_id);

        if let (Some(interceptor), Some(scope)) =
            (&self.interceptor, RequestInterceptor::current_scope())
        {
            record = interceptor.before_capture(record, scope.as_ref());
        }

        if record.request_id.is_none() {
            record.request_id = Some(chronicle_core::record::new_v7().to_string());
        }

        let record = self.persist(record)?;
        entity.after_audit(&record);
        Ok(Some(record))
    }

    fn persist(&self, mut record: AuditRecord) -> Result<AuditRecord> {
        debug!(
            store = self.store.name(),
            subject = %record.subject(),
            action = %record.action(),
            "Storing audit record"
        );

        let id = self.store.create(&record).inspect_err(|e| {
            warn!(
                store = self.store.name(),
                subject = %record.subject(),
                error = %e,
                "Failed to store audit record"
            );
        })?;
        record.id = Some(id);

        info!(
            subject_type = %record.subject().entity_type,
            subject_id = %record.subject().id,
            action = %record.action(),
            audit_id = %id,
            "Captured audit record"
        );

        Ok(record)
    }

    /// Returns every record of `subject`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub fn audits_for(&self, subject: &EntityRef) -> Result<Vec<AuditRecord>> {
        Ok(self
            .store
            .find(&AuditQuery::new().for_subject(subject.clone()))?)
    }

    /// Returns every record attributed under `owner`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    pub fn associated_audits(&self, owner: &EntityRef) -> Result<Vec<AuditRecord>> {
        Ok(self
            .store
            .find(&AuditQuery::new().for_associated(owner.clone()))?)
    }
}

/// Builder for configuring an auditor.
#[derive(Debug)]
pub struct AuditorBuilder {
    store: Option<Arc<dyn AuditStore>>,
    config: AuditConfig,
    intercept_requests: bool,
    enabled: bool,
}

impl Default for AuditorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditorBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: None,
            config: AuditConfig::default(),
            intercept_requests: true,
            enabled: true,
        }
    }

    /// Sets the store records are handed to. Defaults to an [`InMemoryStore`].
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: AuditConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables or disables request interception.
    #[must_use]
    pub const fn intercept_requests(mut self, intercept: bool) -> Self {
        self.intercept_requests = intercept;
        self
    }

    /// Enables or disables all capture.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builds the auditor.
    #[must_use]
    pub fn build(self) -> Auditor {
        let config = self.config.shared();
        let interceptor = self
            .intercept_requests
            .then(|| RequestInterceptor::new(config.clone()));

        Auditor {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryStore::new())),
            registry: TypeRegistry::new(),
            config,
            interceptor,
            enabled: AtomicBool::new(self.enabled),
        }
    }
}
