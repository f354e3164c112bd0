//! Audit record model.
//!
//! An [`AuditRecord`] is a write-once fact: one lifecycle event of one
//! entity, the attributes it changed, and who or what caused it. The
//! subject, action and capture timestamp are fixed at construction and
//! have no setters.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::{Timestamp, Uuid};

use crate::changes::Changes;
use crate::entity::EntityRef;

/// Identity of a persisted audit record, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditId(Uuid);

impl AuditId {
    /// Generates a new time-ordered identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(new_v7())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AuditId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Generates a new v7 UUID.
#[must_use]
pub fn new_v7() -> Uuid {
    let ts = Timestamp::now(uuid::NoContext);
    Uuid::new_v7(ts)
}

/// Kind of lifecycle event an audit record captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Entity was created
    Create,
    /// Entity was modified
    Update,
    /// Entity was deleted
    Destroy,
    /// Entity was re-created while restore mode was active
    Restore,
}

impl Action {
    /// Returns the lowercase action name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who performed a change.
///
/// Either an identified principal entity or a free-form name; never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// A principal entity, such as a user record
    Principal(EntityRef),
    /// A free-form name, such as a username or a job name
    Name(String),
}

impl Actor {
    /// Creates an actor referring to a principal entity.
    #[must_use]
    pub fn principal(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Principal(EntityRef::new(entity_type, id))
    }

    /// Creates a named actor.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Returns the principal reference, if this actor is one.
    #[must_use]
    pub const fn as_principal(&self) -> Option<&EntityRef> {
        match self {
            Self::Principal(entity) => Some(entity),
            Self::Name(_) => None,
        }
    }

    /// Returns the free-form name, if this actor is one.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Principal(_) => None,
            Self::Name(name) => Some(name),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal(entity) => fmt::Display::fmt(entity, f),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<EntityRef> for Actor {
    fn from(entity: EntityRef) -> Self {
        Self::Principal(entity)
    }
}

impl From<&str> for Actor {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Actor {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// One captured change of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Store-assigned identity; `None` until persisted.
    pub id: Option<AuditId>,

    subject: EntityRef,

    /// Entity the change is attributed under (e.g. a parent aggregate).
    pub associated: Option<EntityRef>,

    action: Action,

    /// Attribute changes
    pub changes: Changes,

    actor: Option<Actor>,

    /// Logical transaction the change belongs to
    pub transaction_id: Option<String>,

    /// Tenant the change was made for
    pub organization_id: Option<String>,

    /// Request the change was made in
    pub request_id: Option<String>,

    /// Network origin of the request
    pub remote_address: Option<String>,

    /// Free-text annotation from the caller
    pub comment: Option<String>,

    created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Creates an unpersisted record, timestamped now.
    #[must_use]
    pub fn new(subject: EntityRef, action: Action, changes: Changes) -> Self {
        Self {
            id: None,
            subject,
            associated: None,
            action,
            changes,
            actor: None,
            transaction_id: None,
            organization_id: None,
            request_id: None,
            remote_address: None,
            comment: None,
            created_at: Utc::now(),
        }
    }

    /// Returns the entity that changed.
    #[must_use]
    pub const fn subject(&self) -> &EntityRef {
        &self.subject
    }

    /// Returns the captured action.
    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }

    /// Returns the capture timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the actor, if known.
    #[must_use]
    pub const fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    /// Sets or clears the actor.
    ///
    /// Assigning one representation replaces the other.
    pub fn set_actor(&mut self, actor: Option<Actor>) {
        self.actor = actor;
    }

    /// Returns the principal actor, if the actor is an entity.
    #[must_use]
    pub fn principal(&self) -> Option<&EntityRef> {
        self.actor.as_ref().and_then(Actor::as_principal)
    }

    /// Returns the actor's name, if the actor is free-form.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.actor.as_ref().and_then(Actor::as_name)
    }

    /// Returns the new side of every recorded change.
    #[must_use]
    pub fn new_attributes(&self) -> Map<String, Value> {
        self.changes.new_attributes()
    }

    /// Returns the old side of every recorded change.
    #[must_use]
    pub fn old_attributes(&self) -> Map<String, Value> {
        self.changes.old_attributes()
    }

    /// Sets the associated entity.
    #[must_use]
    pub fn with_associated(mut self, associated: EntityRef) -> Self {
        self.associated = Some(associated);
        self
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<Actor>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Sets the transaction ID.
    #[must_use]
    pub fn with_transaction_id(mut self, id: &str) -> Self {
        self.transaction_id = Some(id.to_string());
        self
    }

    /// Sets the organization ID.
    #[must_use]
    pub fn with_organization_id(mut self, id: &str) -> Self {
        self.organization_id = Some(id.to_string());
        self
    }

    /// Sets the request ID.
    #[must_use]
    pub fn with_request_id(mut self, id: &str) -> Self {
        self.request_id = Some(id.to_string());
        self
    }

    /// Sets the comment.
    #[must_use]
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }
}
