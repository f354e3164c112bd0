//! Polymorphic entity references and the auditable-entity capability.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::record::AuditRecord;

/// A `(type tag, identity)` pair pointing at an entity of any audited type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type tag (e.g. `"Company"`).
    pub entity_type: String,

    /// Identity of the entity within its type.
    pub id: String,
}

impl EntityRef {
    /// Creates a new entity reference.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// Capability implemented by every entity type that participates in auditing.
///
/// This is the seam to the entity framework: it identifies the entity and
/// exposes its full current attribute set, which is what a creation or a
/// destruction records.
pub trait Auditable {
    /// Returns the entity's type tag.
    fn entity_type(&self) -> &str;

    /// Returns the entity's identity.
    fn entity_id(&self) -> String;

    /// Returns every attribute with its current value, in declaration order.
    fn attributes(&self) -> Map<String, Value>;

    /// Returns the entity changes should be attributed under, if any.
    fn associated(&self) -> Option<EntityRef> {
        None
    }

    /// Returns the name of the primary-key attribute, which is never recorded.
    fn primary_key(&self) -> &str {
        "id"
    }

    /// Returns a polymorphic reference to this entity.
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.entity_type(), self.entity_id())
    }

    /// Called once a record of this entity has been durably stored.
    ///
    /// Not called when the store rejects the record.
    fn after_audit(&self, _record: &AuditRecord) {}
}
