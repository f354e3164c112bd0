//! # Chronicle Core
//!
//! Core types for the Chronicle audit trail.
//!
//! This crate provides the data structures the capture engine works with:
//!
//! - [`Changes`] - Ordered attribute change set, built from a raw snapshot
//! - [`AuditRecord`] - One captured change of one entity
//! - [`Actor`] - Who made a change: a principal entity or a free-form name
//! - [`EntityRef`] / [`Auditable`] - Polymorphic entity references
//! - [`AuditConfig`] - Process-wide audit settings
//!
//! ## Example
//!
//! ```rust
//! use chronicle_core::{Action, AuditRecord, Changes, EntityRef};
//! use serde_json::json;
//!
//! let raw = json!({"name": ["Brandon", "Bart"], "updated_at": ["t0", "t1"]});
//! let changes = Changes::diff(raw.as_object().unwrap(), &["updated_at"]).unwrap();
//!
//! let record = AuditRecord::new(EntityRef::new("User", "1"), Action::Update, changes)
//!     .with_actor("alice");
//!
//! assert_eq!(record.new_attributes()["name"], json!("Bart"));
//! assert_eq!(record.old_attributes()["name"], json!("Brandon"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod changes;
pub mod config;
pub mod entity;
pub mod error;
pub mod record;


// Re-export main types at crate root
pub use changes::{Change, Changes};
pub use config::{AuditConfig, SharedConfig, DEFAULT_IGNORED_ATTRIBUTES};
pub use entity::{Auditable, EntityRef};
pub use error::{Error, Result, StorageError};
pub use record::{Action, Actor, AuditId, AuditRecord};
