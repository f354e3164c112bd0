//! Audit record persistence.
//!
//! The engine hands finished records to an [`AuditStore`] and never updates
//! or deletes them afterwards. Stores decide durability; the engine does not
//! retry a failed `create`.

use std::fmt::Debug;

use chronicle_core::{Action, AuditId, AuditRecord, EntityRef, StorageError};
use parking_lot::Mutex;
use tracing::info;

/// Backend trait for audit record storage.
pub trait AuditStore: Send + Sync + Debug {
    /// Durably stores a record and returns its identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be stored.
    fn create(&self, record: &AuditRecord) -> Result<AuditId, StorageError>;

    /// Returns the records matching `query`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn find(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StorageError>;

    /// Returns the store name for identification.
    fn name(&self) -> &'static str;
}

/// Filter over stored audit records. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditQuery {
    /// Entity that changed
    pub subject: Option<EntityRef>,

    /// Type of the entity that changed
    pub subject_type: Option<String>,

    /// Captured action
    pub action: Option<Action>,

    /// Entity the change was attributed under
    pub associated: Option<EntityRef>,

    /// Transaction the change belongs to
    pub transaction_id: Option<String>,
}

impl AuditQuery {
    /// Creates a query matching every record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches creations.
    #[must_use]
    pub fn creates() -> Self {
        Self::new().with_action(Action::Create)
    }

    /// Matches updates.
    #[must_use]
    pub fn updates() -> Self {
        Self::new().with_action(Action::Update)
    }

    /// Matches destructions.
    #[must_use]
    pub fn destroys() -> Self {
        Self::new().with_action(Action::Destroy)
    }

    /// Restricts to one subject entity.
    #[must_use]
    pub fn for_subject(mut self, subject: EntityRef) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Restricts to one subject type.
    #[must_use]
    pub fn for_subject_type(mut self, entity_type: &str) -> Self {
        self.subject_type = Some(entity_type.to_string());
        self
    }

    /// Restricts to one action.
    #[must_use]
    pub const fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Restricts to records attributed under `associated`.
    #[must_use]
    pub fn for_associated(mut self, associated: EntityRef) -> Self {
        self.associated = Some(associated);
        self
    }

    /// Restricts to one transaction.
    #[must_use]
    pub fn in_transaction(mut self, transaction_id: &str) -> Self {
        self.transaction_id = Some(transaction_id.to_string());
        self
    }

    /// Returns true if the record satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.subject.as_ref().is_none_or(|s| record.subject() == s)
            && self
                .subject_type
                .as_deref()
                .is_none_or(|t| record.subject().entity_type == t)
            && self.action.is_none_or(|a| record.action() == a)
            && self
                .associated
                .as_ref()
                .is_none_or(|a| record.associated.as_ref() == Some(a))
            && self
                .transaction_id
                .as_deref()
                .is_none_or(|t| record.transaction_id.as_deref() == Some(t))
    }
}

/// In-memory append-only store, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored record in insertion order.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditStore for InMemoryStore {
    fn create(&self, record: &AuditRecord) -> Result<AuditId, StorageError> {
        let id = AuditId::generate();
        let mut stored = record.clone();
        stored.id = Some(id);
        self.records.lock().push(stored);
        Ok(id)
    }

    fn find(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StorageError> {
        let mut found: Vec<AuditRecord> = self
            .records
            .lock()
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        // Stable: insertion order breaks timestamp ties.
        found.sort_by_key(AuditRecord::created_at);
        Ok(found)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Store decorator that emits every created record via tracing.
#[derive(Debug, Default)]
pub struct TracingStore<S> {
    inner: S,
}

impl<S: AuditStore> TracingStore<S> {
    /// Wraps a store.
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: AuditStore> AuditStore for TracingStore<S> {
    fn create(&self, record: &AuditRecord) -> Result<AuditId, StorageError> {
        let json = serde_json::to_string(record)?;
        let id = self.inner.create(record)?;
        info!(audit_id = %id, audit_record = %json, "Audit record");
        Ok(id)
    }

    fn find(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StorageError> {
        self.inner.find(query)
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}
