//! Audited type registry.
//!
//! Entity types opt into auditing by registering, usually once at startup.
//! Subtypes are tied to their parent through an explicit hierarchy table;
//! a type is audited when it or any ancestor is registered, and the set of
//! audited types is recomputed from the table on every call, so subtypes
//! declared after their parent was registered are included.
//!
//! Writers publish a new immutable snapshot; readers never block and never
//! observe a half-applied change.

use std::collections::{BTreeSet, HashMap};

use arc_swap::ArcSwap;
use chronicle_core::Action;

/// Per-type audit settings.
///
/// # Examples
///
/// ```
/// use chronicle_audit::AuditOptions;
/// use chronicle_core::Action;
///
/// let options = AuditOptions::new()
///     .only([Action::Create, Action::Destroy])
///     .except(["name"]);
///
/// assert!(options.audits(Action::Create));
/// assert!(!options.audits(Action::Update));
/// assert_eq!(options.excepted(), ["name"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditOptions {
    on: BTreeSet<Action>,
    except: Vec<String>,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            on: [Action::Create, Action::Update, Action::Destroy]
                .into_iter()
                .collect(),
            except: Vec::new(),
        }
    }
}

impl AuditOptions {
    /// Audits every action and every attribute.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts auditing to the given actions.
    #[must_use]
    pub fn only(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.on = actions.into_iter().collect();
        self
    }

    /// Excludes attributes from this type's change sets.
    #[must_use]
    pub fn except<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except.extend(attributes.into_iter().map(Into::into));
        self
    }

    /// Returns true if the action is audited. Restorations count as creations.
    #[must_use]
    pub fn audits(&self, action: Action) -> bool {
        let action = match action {
            Action::Restore => Action::Create,
            other => other,
        };
        self.on.contains(&action)
    }

    /// Returns the excluded attributes.
    #[must_use]
    pub fn excepted(&self) -> &[String] {
        &self.except
    }
}

#[derive(Debug, Clone, Default)]
struct RegistryState {
    parents: HashMap<String, String>,
    registered: HashMap<String, AuditOptions>,
    disabled: BTreeSet<String>,
}

impl RegistryState {
    /// The type followed by its ancestors, nearest first.
    fn lineage<'a>(&'a self, entity_type: &'a str) -> Vec<&'a str> {
        let mut lineage = vec![entity_type];
        let mut current = entity_type;
        while let Some(parent) = self.parents.get(current) {
            if lineage.contains(&parent.as_str()) {
                break;
            }
            lineage.push(parent);
            current = parent;
        }
        lineage
    }

    fn options_for(&self, entity_type: &str) -> Option<&AuditOptions> {
        self.lineage(entity_type)
            .into_iter()
            .find_map(|t| self.registered.get(t))
    }
}

/// Registry of audited entity types and their settings.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    state: ArcSwap<RegistryState>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `child` is a subtype of `parent`.
    pub fn declare_type(&self, child: &str, parent: &str) {
        self.state.rcu(|current| {
            let mut next = RegistryState::clone(current);
            next.parents.insert(child.to_string(), parent.to_string());
            next
        });
    }

    /// Opts an entity type, and every subtype of it, into auditing.
    ///
    /// Registering a type again replaces its options.
    pub fn register(&self, entity_type: &str, options: AuditOptions) {
        self.state.rcu(|current| {
            let mut next = RegistryState::clone(current);
            next.registered
                .insert(entity_type.to_string(), options.clone());
            next
        });
    }

    /// Returns true if the type or one of its ancestors is registered.
    #[must_use]
    pub fn is_audited(&self, entity_type: &str) -> bool {
        self.state.load().options_for(entity_type).is_some()
    }

    /// Returns the options of the nearest registered type in the lineage.
    #[must_use]
    pub fn options_for(&self, entity_type: &str) -> Option<AuditOptions> {
        self.state.load().options_for(entity_type).cloned()
    }

    /// Returns the type followed by its ancestors, nearest first.
    #[must_use]
    pub fn lineage(&self, entity_type: &str) -> Vec<String> {
        self.state
            .load()
            .lineage(entity_type)
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Returns every registered type plus every known subtype of one.
    #[must_use]
    pub fn audited_types(&self) -> BTreeSet<String> {
        let state = self.state.load();
        state
            .registered
            .keys()
            .chain(state.parents.keys())
            .filter(|t| state.options_for(t).is_some())
            .cloned()
            .collect()
    }

    /// Turns capture off for a type and its subtypes until re-enabled.
    pub fn disable(&self, entity_type: &str) {
        self.state.rcu(|current| {
            let mut next = RegistryState::clone(current);
            next.disabled.insert(entity_type.to_string());
            next
        });
    }

    /// Turns capture back on for a type.
    pub fn enable(&self, entity_type: &str) {
        self.state.rcu(|current| {
            let mut next = RegistryState::clone(current);
            next.disabled.remove(entity_type);
            next
        });
    }

    /// Returns false if the type or one of its ancestors is disabled.
    #[must_use]
    pub fn is_enabled(&self, entity_type: &str) -> bool {
        let state = self.state.load();
        !state
            .lineage(entity_type)
            .into_iter()
            .any(|t| state.disabled.contains(t))
    }
}
