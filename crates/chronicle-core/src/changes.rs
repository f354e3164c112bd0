//! Attribute change sets.
//!
//! The entity framework hands over a raw snapshot mapping each attribute to
//! an `[old, new]` pair. [`Changes::diff`] turns that snapshot into the
//! durable payload of an audit record by dropping ignored attributes and
//! attributes whose value did not actually change. Creations and
//! destructions record a single value per attribute instead, built with
//! [`Changes::snapshot`].
//!
//! Attribute order is preserved exactly as the upstream snapshot provides it.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// The recorded change of a single attribute.
///
/// Serialized as `[old, new]` for a pair and as the bare value otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Change {
    /// Value before and after an update.
    Pair(Value, Value),
    /// Sole captured value: the initial value on create, the last known
    /// value on destroy.
    Single(Value),
}

impl Change {
    /// Returns the value before the change.
    ///
    /// A single value is its own old side.
    #[must_use]
    pub const fn old_value(&self) -> &Value {
        match self {
            Self::Pair(old, _) | Self::Single(old) => old,
        }
    }

    /// Returns the value after the change.
    ///
    /// A single value is its own new side.
    #[must_use]
    pub const fn new_value(&self) -> &Value {
        match self {
            Self::Pair(_, new) | Self::Single(new) => new,
        }
    }
}

/// Ordered mapping from attribute name to its recorded [`Change`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    entries: Vec<(String, Change)>,
}

impl Changes {
    /// Creates an empty change set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Filters a raw `[old, new]` snapshot into an update change set.
    ///
    /// Attributes named in `ignored` and attributes whose old and new values
    /// are equal are dropped. Values are compared as given: coercion is the
    /// entity framework's job and has already happened upstream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedChangeSet`] if an entry is not a two-element
    /// array.
    pub fn diff<S: AsRef<str>>(raw: &Map<String, Value>, ignored: &[S]) -> Result<Self> {
        let mut changes = Self::new();

        for (attribute, entry) in raw {
            let (old, new) = match entry {
                Value::Array(pair) if pair.len() == 2 => (&pair[0], &pair[1]),
                Value::Array(values) => {
                    return Err(Error::MalformedChangeSet {
                        attribute: attribute.clone(),
                        reason: format!("expected [old, new] pair, got {} values", values.len()),
                    })
                }
                other => {
                    return Err(Error::MalformedChangeSet {
                        attribute: attribute.clone(),
                        reason: format!("expected [old, new] pair, got {other}"),
                    })
                }
            };

            if is_ignored(attribute, ignored) || old == new {
                continue;
            }

            changes
                .entries
                .push((attribute.clone(), Change::Pair(old.clone(), new.clone())));
        }

        Ok(changes)
    }

    /// Captures a full attribute snapshot as single values, minus ignored
    /// attributes.
    #[must_use]
    pub fn snapshot<S: AsRef<str>>(attributes: &Map<String, Value>, ignored: &[S]) -> Self {
        let entries = attributes
            .iter()
            .filter(|(name, _)| !is_ignored(name, ignored))
            .map(|(name, value)| (name.clone(), Change::Single(value.clone())))
            .collect();

        Self { entries }
    }

    /// Inserts or replaces the change for an attribute.
    ///
    /// A replaced attribute keeps its original position.
    pub fn insert(&mut self, attribute: impl Into<String>, change: Change) {
        let attribute = attribute.into();
        if let Some(slot) = self.entries.iter_mut().find(|(name, _)| *name == attribute) {
            slot.1 = change;
        } else {
            self.entries.push((attribute, change));
        }
    }

    /// Returns the change recorded for an attribute.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&Change> {
        self.entries
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, change)| change)
    }

    /// Returns true if a change is recorded for the attribute.
    #[must_use]
    pub fn contains(&self, attribute: &str) -> bool {
        self.get(attribute).is_some()
    }

    /// Returns the number of changed attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the changes in recorded order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Change)> {
        self.entries
            .iter()
            .map(|(name, change)| (name.as_str(), change))
    }

    /// Iterates over the changed attribute names in recorded order.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Returns the new side of every change as a flat mapping.
    #[must_use]
    pub fn new_attributes(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(name, change)| (name.clone(), change.new_value().clone()))
            .collect()
    }

    /// Returns the old side of every change as a flat mapping.
    #[must_use]
    pub fn old_attributes(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(name, change)| (name.clone(), change.old_value().clone()))
            .collect()
    }
}

fn is_ignored<S: AsRef<str>>(attribute: &str, ignored: &[S]) -> bool {
    ignored.iter().any(|name| name.as_ref() == attribute)
}

impl FromIterator<(String, Change)> for Changes {
    fn from_iter<I: IntoIterator<Item = (String, Change)>>(iter: I) -> Self {
        let mut changes = Self::new();
        for (attribute, change) in iter {
            changes.insert(attribute, change);
        }
        changes
    }
}

impl Serialize for Changes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, change) in &self.entries {
            map.serialize_entry(name, change)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Changes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ChangesVisitor;

        impl<'de> Visitor<'de> for ChangesVisitor {
            type Value = Changes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of attribute changes")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Changes, A::Error> {
                let mut changes = Changes::new();
                while let Some((name, change)) = access.next_entry::<String, Change>()? {
                    changes.insert(name, change);
                }
                Ok(changes)
            }
        }

        deserializer.deserialize_map(ChangesVisitor)
    }
}
