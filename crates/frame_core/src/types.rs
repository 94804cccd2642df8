//! Runtime type descriptors for host objects
//!
//! Rust has no class inheritance, so host types describe themselves with a
//! [`TypeKey`] and the [`TypeHierarchy`] records which key derives from which
//! and which category tags each one carries. Hook resolution and service
//! dispatch walk this hierarchy instead of a language-level type graph.

use crate::error::RegistryError;
use compact_str::CompactString;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Upper bound on ancestor walks; deeper chains are treated as malformed.
const MAX_HIERARCHY_DEPTH: usize = 64;

/// Name of a host type or category tag
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeKey(CompactString);

impl TypeKey {
    pub fn new(name: &str) -> Self {
        Self(CompactString::new(name))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TypeKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TypeKey {
    fn from(name: String) -> Self {
        Self(CompactString::from(name))
    }
}

/// An object whose operations can be woven and dispatched.
///
/// Implement with the [`host_object!`](crate::host_object) macro.
pub trait HostObject: Any + Send + Sync {
    /// Runtime type of this object
    fn type_key(&self) -> TypeKey;

    /// Upcast for downcasting in hooks
    fn as_any(&self) -> &dyn Any;
}

impl dyn HostObject {
    /// Downcast to the concrete host type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for dyn HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({})", self.type_key())
    }
}

#[derive(Debug, Clone, Default)]
struct TypeNode {
    parent: Option<TypeKey>,
    categories: SmallVec<[TypeKey; 2]>,
    is_category: bool,
}

/// Parent links and category membership for every declared type.
///
/// Every structural change bumps [`generation`](TypeHierarchy::generation) so
/// caches derived from the hierarchy can tell they are stale.
#[derive(Debug, Default)]
pub struct TypeHierarchy {
    nodes: DashMap<TypeKey, TypeNode>,
    generation: AtomicU64,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a concrete type with an optional parent.
    ///
    /// Re-declaring a type replaces its parent and keeps its categories.
    pub fn declare(&self, ty: TypeKey, parent: Option<TypeKey>) -> Result<(), RegistryError> {
        if let Some(ref parent) = parent {
            if *parent == ty || self.ancestors(parent).contains(&ty) {
                warn!("⚠️ Rejected declaration of {} with parent {}: inheritance cycle", ty, parent);
                return Err(RegistryError::CyclicHierarchy {
                    ty: ty.to_string(),
                    parent: parent.to_string(),
                });
            }
        }

        debug!("📝 Declared type {} (parent: {:?})", ty, parent.as_ref().map(TypeKey::as_str));
        self.nodes.entry(ty).or_default().parent = parent;
        self.bump();
        Ok(())
    }

    /// Declare a category tag. Categories match by membership, not subtyping.
    pub fn declare_category(&self, category: TypeKey) {
        self.nodes.entry(category).or_default().is_category = true;
        self.bump();
    }

    /// Tag `ty` as a member of `category`; members' descendants inherit the tag.
    pub fn add_category(&self, ty: TypeKey, category: TypeKey) {
        self.nodes.entry(category.clone()).or_default().is_category = true;
        let mut node = self.nodes.entry(ty).or_default();
        if !node.categories.contains(&category) {
            node.categories.push(category);
        }
        drop(node);
        self.bump();
    }

    pub fn contains(&self, ty: &TypeKey) -> bool {
        self.nodes.contains_key(ty)
    }

    pub fn is_category(&self, ty: &TypeKey) -> bool {
        self.nodes.get(ty).map(|node| node.is_category).unwrap_or(false)
    }

    pub fn parent_of(&self, ty: &TypeKey) -> Option<TypeKey> {
        self.nodes.get(ty).and_then(|node| node.parent.clone())
    }

    /// `ty` followed by its parent chain, nearest first.
    ///
    /// Undeclared types have no parents, so the chain is just the type itself.
    pub fn ancestors(&self, ty: &TypeKey) -> Vec<TypeKey> {
        let mut chain = vec![ty.clone()];
        let mut current = self.parent_of(ty);

        while let Some(parent) = current {
            if chain.len() >= MAX_HIERARCHY_DEPTH || chain.contains(&parent) {
                warn!("⚠️ Ancestor walk for {} truncated at {}", ty, parent);
                break;
            }
            current = self.parent_of(&parent);
            chain.push(parent);
        }

        chain
    }

    /// Every key a handler may be declared against for `ty`: each ancestor
    /// level followed by the categories declared at that level.
    pub fn lookup_chain(&self, ty: &TypeKey) -> Vec<TypeKey> {
        let mut chain: Vec<TypeKey> = Vec::new();

        for level in self.ancestors(ty) {
            let categories: SmallVec<[TypeKey; 2]> = self
                .nodes
                .get(&level)
                .map(|node| node.categories.clone())
                .unwrap_or_default();

            if !chain.contains(&level) {
                chain.push(level);
            }
            for category in categories {
                if !chain.contains(&category) {
                    chain.push(category);
                }
            }
        }

        chain
    }

    /// Whether `ty` or any of its ancestors carries `category`
    pub fn in_category(&self, ty: &TypeKey, category: &TypeKey) -> bool {
        self.ancestors(ty).iter().any(|level| {
            self.nodes
                .get(level)
                .map(|node| node.categories.contains(category))
                .unwrap_or(false)
        })
    }

    /// Whether a value of type `derived` can be used where `base` is expected.
    ///
    /// Category tags are checked by membership; everything else falls back to
    /// the ancestor walk.
    pub fn is_assignable(&self, base: &TypeKey, derived: &TypeKey) -> bool {
        if base == derived {
            return true;
        }
        if self.is_category(base) {
            return self.in_category(derived, base);
        }
        self.ancestors(derived).contains(base)
    }

    /// Structural version; changes whenever a declaration changes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&self) {
        self.nodes.clear();
        self.bump();
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> TypeKey {
        TypeKey::new(name)
    }

    fn sample() -> TypeHierarchy {
        let hierarchy = TypeHierarchy::new();
        hierarchy.declare(key("Actor"), None).unwrap();
        hierarchy.declare(key("Pawn"), Some(key("Actor"))).unwrap();
        hierarchy.declare(key("Player"), Some(key("Pawn"))).unwrap();
        hierarchy.add_category(key("Pawn"), key("Controllable"));
        hierarchy
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let hierarchy = sample();
        assert_eq!(
            hierarchy.ancestors(&key("Player")),
            vec![key("Player"), key("Pawn"), key("Actor")]
        );
        assert_eq!(hierarchy.ancestors(&key("Unknown")), vec![key("Unknown")]);
    }

    #[test]
    fn test_lookup_chain_includes_categories() {
        let hierarchy = sample();
        assert_eq!(
            hierarchy.lookup_chain(&key("Player")),
            vec![key("Player"), key("Pawn"), key("Controllable"), key("Actor")]
        );
    }

    #[test]
    fn test_assignability() {
        let hierarchy = sample();
        assert!(hierarchy.is_assignable(&key("Actor"), &key("Player")));
        assert!(!hierarchy.is_assignable(&key("Player"), &key("Actor")));
        assert!(hierarchy.is_assignable(&key("Controllable"), &key("Player")));
        assert!(!hierarchy.is_assignable(&key("Controllable"), &key("Actor")));
        assert!(hierarchy.is_category(&key("Controllable")));
    }

    #[test]
    fn test_cycle_rejected() {
        let hierarchy = sample();
        let before = hierarchy.generation();

        let result = hierarchy.declare(key("Actor"), Some(key("Player")));
        assert!(matches!(result, Err(RegistryError::CyclicHierarchy { .. })));
        assert_eq!(hierarchy.parent_of(&key("Actor")), None);
        assert_eq!(hierarchy.generation(), before);

        assert!(hierarchy.declare(key("Loop"), Some(key("Loop"))).is_err());
    }

    #[test]
    fn test_generation_changes() {
        let hierarchy = TypeHierarchy::new();
        let g0 = hierarchy.generation();
        hierarchy.declare(key("A"), None).unwrap();
        let g1 = hierarchy.generation();
        hierarchy.add_category(key("A"), key("Tag"));
        assert!(g1 > g0);
        assert!(hierarchy.generation() > g1);
    }
}
