//! Audit capture engine for Chronicle.
//!
//! This crate records who changed what, when, and in which logical
//! transaction, for every registered entity type:
//! - Capture coordination for create, update and destroy events
//! - Ambient context bound to the current thread or task
//! - Request-scope interception for web-facing processes
//! - Pluggable, append-only record storage
//!
//! # Features
//!
//! - Change sets filtered by a configurable ignore list
//! - Scoped context activation that restores on every exit path
//! - Per-context suppression with [`Auditor::without_auditing`]
//! - Subtype-aware registration
//!
//! # Example
//!
//! ```rust
//! use chronicle_audit::{context, AuditOptions, Auditor, InMemoryStore, LifecycleEvent};
//! use chronicle_core::{Auditable, EntityRef};
//! use serde_json::{json, Map, Value};
//! use std::sync::Arc;
//!
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! impl Auditable for User {
//!     fn entity_type(&self) -> &str {
//!         "User"
//!     }
//!
//!     fn entity_id(&self) -> String {
//!         self.id.to_string()
//!     }
//!
//!     fn attributes(&self) -> Map<String, Value> {
//!         let mut attributes = Map::new();
//!         attributes.insert("id".to_string(), json!(self.id));
//!         attributes.insert("name".to_string(), json!(self.name));
//!         attributes
//!     }
//! }
//!
//! let store = Arc::new(InMemoryStore::new());
//! let auditor = Auditor::builder().with_store(store.clone()).build();
//! auditor.register("User", AuditOptions::new());
//!
//! let user = User { id: 1, name: "Bart".to_string() };
//! let raw = json!({"name": ["Brandon", "Bart"]});
//!
//! let record = context::as_actor("alice", || {
//!     context::as_transaction("tx-1", || {
//!         auditor.capture(LifecycleEvent::update(&user, raw.as_object().unwrap().clone()))
//!     })
//! })
//! .unwrap()
//! .unwrap();
//!
//! assert_eq!(record.username(), Some("alice"));
//! assert_eq!(record.transaction_id.as_deref(), Some("tx-1"));
//! assert_eq!(auditor.audits_for(&EntityRef::new("User", "1")).unwrap().len(), 1);
//! ```

pub mod context;
mod coordinator;
mod interceptor;
mod registry;
mod store;

pub use context::{ContextError, ContextKey, ContextValue};
pub use coordinator::{Auditor, AuditorBuilder, LifecycleEvent};
pub use interceptor::{RequestInterceptor, RequestScope, StaticRequestScope};
pub use registry::{AuditOptions, TypeRegistry};
pub use store::{AuditQuery, AuditStore, InMemoryStore, TracingStore};
