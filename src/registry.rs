//! Mapping of store type names to their constructors.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};

use log::trace;

use crate::error::{AnyError, UnknownStoreType};
use crate::options::StoreOptions;
use crate::store::{Argv, Env, File, Literal, Memory, Store};

/// A constructor of a store.
pub type Factory = Box<dyn Fn(&StoreOptions) -> Result<Box<dyn Store>, AnyError> + Send + Sync>;

/// The known store types.
///
/// Type names are case insensitive.
///
/// ```rust
/// use strata::{Registry, StoreOptions};
/// use strata::store::Memory;
///
/// let mut registry = Registry::builtin();
/// registry.register("scratch", |opts| Ok(Box::new(Memory::new(opts)?)));
/// assert!(registry.contains("Scratch"));
/// let store = registry.create("scratch", &StoreOptions::new()).unwrap();
/// assert_eq!("memory", store.kind());
/// assert!(registry.create("nonexistent", &StoreOptions::new()).is_err());
/// ```
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    /// A registry without any store types.
    pub fn empty() -> Self {
        Registry {
            factories: HashMap::new(),
        }
    }

    /// A registry with the built-in store types.
    ///
    /// These are `memory`, `literal`, `argv`, `env` and `file`.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry
            .register("memory", |opts| Ok(Box::new(Memory::new(opts)?)))
            .register("literal", |opts| Ok(Box::new(Literal::from_options(opts)?)))
            .register("argv", |opts| Ok(Box::new(Argv::new(opts)?)))
            .register("env", |opts| Ok(Box::new(Env::new(opts)?)))
            .register("file", |opts| Ok(Box::new(File::new(opts)?)));
        registry
    }

    /// Adds (or replaces) a store type.
    pub fn register<F>(&mut self, kind: &str, factory: F) -> &mut Self
    where
        F: Fn(&StoreOptions) -> Result<Box<dyn Store>, AnyError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_lowercase(), Box::new(factory));
        self
    }

    /// Is the store type known?
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_lowercase())
    }

    /// Names of the known store types, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds = self.factories.keys().map(String::as_str).collect::<Vec<_>>();
        kinds.sort_unstable();
        kinds
    }

    /// Creates a store of the given type.
    pub fn create(&self, kind: &str, options: &StoreOptions) -> Result<Box<dyn Store>, AnyError> {
        let factory = self
            .factories
            .get(&kind.to_lowercase())
            .ok_or_else(|| UnknownStoreType(kind.to_owned()))?;
        trace!("Creating store of type {}", kind);
        factory(options)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Debug for Registry {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("Registry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builtin_kinds() {
        let registry = Registry::builtin();
        assert_eq!(
            vec!["argv", "env", "file", "literal", "memory"],
            registry.kinds()
        );
        assert!(Registry::empty().kinds().is_empty());
    }

    #[test]
    fn unknown_type() {
        let err = Registry::builtin()
            .create("nope", &StoreOptions::new())
            .err()
            .expect("Created unknown store");
        let err = err
            .downcast_ref::<UnknownStoreType>()
            .expect("Different error returned");
        assert_eq!("nope", err.0);
        assert_eq!("Cannot add store with unknown type: nope", err.to_string());
    }

    #[test]
    fn case_insensitive() {
        let registry = Registry::builtin();
        let opts = StoreOptions::new().set("store", json!({"a": 1}));
        let store = registry.create("Literal", &opts).unwrap();
        assert_eq!(Some(json!(1)), store.get("a").unwrap());
    }
}
