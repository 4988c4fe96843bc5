//! Field-level state and timer declarations.

use serde::Serialize;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Name of a Rust type, as reported by `std::any::type_name`.
///
/// Only compared for equality; never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TypeDescriptor(String);

impl TypeDescriptor {
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of a declaring field. Opaque to the execution core; state/timer backends resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FieldHandle(String);

impl FieldHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateDeclaration {
    pub id: String,
    pub field: FieldHandle,
    pub value_type: TypeDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerDeclaration {
    pub id: String,
    pub field: FieldHandle,
}

pub trait Declaration {
    fn id(&self) -> &str;
}

impl Declaration for StateDeclaration {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Declaration for TimerDeclaration {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Id-keyed declarations of one kind. Ids are unique; iteration is ordered by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeclarationRegistry<D> {
    entries: BTreeMap<String, Arc<D>>,
}

impl<D> Default for DeclarationRegistry<D> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<D: Declaration> DeclarationRegistry<D> {
    /// Registers `decl`, handing it back if its id is already taken.
    pub fn insert(&mut self, decl: D) -> Result<Arc<D>, D> {
        if self.entries.contains_key(decl.id()) {
            return Err(decl);
        }
        let decl = Arc::new(decl);
        self.entries.insert(decl.id().to_string(), decl.clone());
        Ok(decl)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<D>> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<D>> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(id: &str, field: &str) -> TimerDeclaration {
        TimerDeclaration {
            id: id.to_string(),
            field: FieldHandle::new(field),
        }
    }

    #[test]
    fn insert_rejects_duplicate_ids() {
        let mut registry = DeclarationRegistry::default();
        registry.insert(timer("flush", "flush_field")).unwrap();
        let rejected = registry.insert(timer("flush", "other_field")).unwrap_err();
        assert_eq!(rejected.field.name(), "other_field");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("flush").unwrap().field.name(), "flush_field");
    }

    #[test]
    fn type_descriptor_uses_type_name() {
        assert_eq!(TypeDescriptor::of::<u64>().name(), "u64");
        assert_ne!(TypeDescriptor::of::<u64>(), TypeDescriptor::of::<i64>());
    }
}
