//! Load-time type classification
//!
//! A classification source describes host types (parent, categories, module
//! priority) and the hook bindings that should exist before any host code
//! runs. Bindings refer to callbacks by name; a [`HookLibrary`] supplies the
//! actual closures.

use crate::error::RegistryError;
use crate::registry::{AccessKind, HookCallback, TypeHandlerRegistry};
use crate::types::{TypeHierarchy, TypeKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// One host type or category tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDeclaration {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Category tags carried by this type and its descendants
    #[serde(default)]
    pub categories: Vec<String>,
    /// Declares a category tag rather than a concrete type
    #[serde(default)]
    pub category: bool,
    /// Update priority if this type is a scheduler module
    #[serde(default)]
    pub module_priority: Option<i32>,
}

impl TypeDeclaration {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            categories: Vec::new(),
            category: false,
            module_priority: None,
        }
    }

    pub fn category(name: &str) -> Self {
        Self {
            category: true,
            ..Self::new(name)
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.categories.push(category.to_string());
        self
    }

    pub fn with_module_priority(mut self, priority: i32) -> Self {
        self.module_priority = Some(priority);
        self
    }
}

/// A hook to register at load time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookBinding {
    pub identity: String,
    pub target: String,
    pub operation: String,
    pub access: AccessKind,
    /// Name of the callback in the [`HookLibrary`]
    pub callback: String,
}

/// Supplies type declarations and hook bindings
pub trait ClassificationSource {
    fn types(&self) -> Vec<TypeDeclaration>;
    fn bindings(&self) -> Vec<HookBinding>;
}

/// Classification held in memory, usually deserialized from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticClassification {
    #[serde(default)]
    pub types: Vec<TypeDeclaration>,
    #[serde(default)]
    pub bindings: Vec<HookBinding>,
}

impl StaticClassification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(mut self, declaration: TypeDeclaration) -> Self {
        self.types.push(declaration);
        self
    }

    pub fn bind(
        mut self,
        identity: &str,
        target: &str,
        operation: &str,
        access: AccessKind,
        callback: &str,
    ) -> Self {
        self.bindings.push(HookBinding {
            identity: identity.to_string(),
            target: target.to_string(),
            operation: operation.to_string(),
            access,
            callback: callback.to_string(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.bindings.is_empty()
    }
}

impl ClassificationSource for StaticClassification {
    fn types(&self) -> Vec<TypeDeclaration> {
        self.types.clone()
    }

    fn bindings(&self) -> Vec<HookBinding> {
        self.bindings.clone()
    }
}

/// Named hook callbacks that bindings can refer to
#[derive(Default, Clone)]
pub struct HookLibrary {
    callbacks: HashMap<String, HookCallback>,
}

impl HookLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named callback
    pub fn insert(&mut self, name: &str, callback: HookCallback) -> &mut Self {
        self.callbacks.insert(name.to_string(), callback);
        self
    }

    pub fn get(&self, name: &str) -> Option<&HookCallback> {
        self.callbacks.get(name)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for HookLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.callbacks.keys().collect();
        names.sort();
        f.debug_struct("HookLibrary").field("callbacks", &names).finish()
    }
}

/// Outcome of applying a classification source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub types_declared: usize,
    pub bindings_registered: usize,
    /// Module priorities found on declared types
    pub priorities: Vec<(TypeKey, i32)>,
    /// One message per rejected declaration or binding
    pub rejected: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Declare every type from `source` and register its hook bindings.
///
/// Rejected entries are logged and skipped; the rest still load.
pub fn load_classification(
    source: &dyn ClassificationSource,
    library: &HookLibrary,
    hierarchy: &TypeHierarchy,
    registry: &TypeHandlerRegistry,
) -> LoadReport {
    let mut report = LoadReport::default();

    for declaration in source.types() {
        let key = TypeKey::new(&declaration.name);

        if declaration.category {
            hierarchy.declare_category(key.clone());
        } else {
            let parent = declaration.parent.as_deref().map(TypeKey::new);
            if let Err(e) = hierarchy.declare(key.clone(), parent) {
                report.rejected.push(e.to_string());
                continue;
            }
        }

        for category in &declaration.categories {
            hierarchy.add_category(key.clone(), TypeKey::new(category));
        }
        if let Some(priority) = declaration.module_priority {
            report.priorities.push((key, priority));
        }
        report.types_declared += 1;
    }

    for binding in source.bindings() {
        let callback = match library.get(&binding.callback) {
            Some(callback) => callback.clone(),
            None => {
                let e = RegistryError::UnknownCallback(binding.callback.clone());
                warn!("⚠️ Skipping hook binding {}: {}", binding.identity, e);
                report.rejected.push(e.to_string());
                continue;
            }
        };

        match registry.register(
            &binding.identity,
            TypeKey::new(&binding.target),
            &binding.operation,
            binding.access,
            callback,
        ) {
            Ok(()) => report.bindings_registered += 1,
            Err(e) => report.rejected.push(e.to_string()),
        }
    }

    info!(
        "📋 Classification loaded: {} type(s), {} binding(s), {} rejected",
        report.types_declared,
        report.bindings_registered,
        report.rejected.len()
    );
    report
}
