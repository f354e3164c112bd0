//! Process-wide audit settings.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Attributes never recorded unless configured otherwise.
pub const DEFAULT_IGNORED_ATTRIBUTES: &[&str] = &[
    "lock_version",
    "created_at",
    "updated_at",
    "created_on",
    "updated_on",
];

/// Settings shared by the capture coordinator and the request interceptor.
///
/// # Examples
///
/// ```
/// use chronicle_core::AuditConfig;
///
/// let config = AuditConfig::default()
///     .with_ignored_attributes(["delta", "top_secret", "created_at"])
///     .with_current_user_method("custom_user");
///
/// assert!(config.is_ignored("top_secret"));
/// assert!(!config.is_ignored("updated_at"));
/// assert_eq!(config.current_user_method, "custom_user");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Attribute names excluded from every change set, in order, without
    /// duplicates.
    pub ignored_attributes: Vec<String>,

    /// Request-scope accessor that yields the acting user.
    pub current_user_method: String,

    /// Request-scope accessor that yields the transaction ID.
    pub transaction_id_method: String,

    /// Request-scope accessor that yields the organization (tenant) ID.
    pub organization_id_method: String,

    /// When set, creations are recorded as restorations.
    pub restoring: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            ignored_attributes: DEFAULT_IGNORED_ATTRIBUTES
                .iter()
                .map(ToString::to_string)
                .collect(),
            current_user_method: "current_user".to_string(),
            transaction_id_method: "transaction_id".to_string(),
            organization_id_method: "organization_id".to_string(),
            restoring: false,
        }
    }
}

impl AuditConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from YAML; omitted fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is not valid YAML or names
    /// an unknown setting.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| Error::Config {
            reason: e.to_string(),
        })?;
        Ok(config.normalized())
    }

    /// Replaces the ignored attribute list, dropping repeated names.
    #[must_use]
    pub fn with_ignored_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_attributes = attributes.into_iter().map(Into::into).collect();
        self.normalized()
    }

    /// Sets the accessor name used to find the acting user.
    #[must_use]
    pub fn with_current_user_method(mut self, method: impl Into<String>) -> Self {
        self.current_user_method = method.into();
        self
    }

    /// Sets the accessor name used to find the transaction ID.
    #[must_use]
    pub fn with_transaction_id_method(mut self, method: impl Into<String>) -> Self {
        self.transaction_id_method = method.into();
        self
    }

    /// Sets the accessor name used to find the organization ID.
    #[must_use]
    pub fn with_organization_id_method(mut self, method: impl Into<String>) -> Self {
        self.organization_id_method = method.into();
        self
    }

    /// Enables or disables restore mode.
    #[must_use]
    pub const fn with_restoring(mut self, restoring: bool) -> Self {
        self.restoring = restoring;
        self
    }

    /// Returns true if the attribute is globally ignored.
    #[must_use]
    pub fn is_ignored(&self, attribute: &str) -> bool {
        self.ignored_attributes.iter().any(|name| name == attribute)
    }

    /// Wraps the configuration for sharing between components.
    #[must_use]
    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    fn normalized(mut self) -> Self {
        let mut seen = Vec::with_capacity(self.ignored_attributes.len());
        self.ignored_attributes.retain(|name| {
            if seen.contains(name) {
                false
            } else {
                seen.push(name.clone());
                true
            }
        });
        self
    }
}

/// Configuration handle shared by the components of one auditor.
pub type SharedConfig = Arc<RwLock<AuditConfig>>;
