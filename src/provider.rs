//! The layering engine.
//!
//! A [`Provider`] holds an ordered list of named stores. Reads consult them in order, the first
//! one to have a plain value wins, objects from several stores are merged together. Writes go to
//! every store willing to take them.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::Path;

use err_context::prelude::*;
use log::{debug, trace};
use serde_json::Value;

use crate::error::{AnyError, MissingKeys, NoLoad, NoLoadSync, NonObjectMerge, UnknownStoreType};
use crate::keypath::{self, is_truthy};
use crate::options::{ProviderOptions, StoreOptions};
use crate::registry::Registry;
use crate::store::{Capabilities, Literal, Mode, Store};

/// Name of the store the sources are merged into when loading.
pub const SOURCES: &str = "sources";

struct Entry {
    name: String,
    store: Box<dyn Store>,
    caps: Capabilities,
}

#[derive(Copy, Clone)]
enum Action<'a> {
    Set(&'a str, &'a Value),
    Merge(&'a str, &'a Value),
    Clear(&'a str),
    Reset,
}

impl Action<'_> {
    fn name(&self) -> &'static str {
        match self {
            Action::Set(..) => "set",
            Action::Merge(..) => "merge",
            Action::Clear(_) => "clear",
            Action::Reset => "reset",
        }
    }

    fn mode(&self, caps: &Capabilities) -> Mode {
        match self {
            Action::Set(..) => caps.set,
            Action::Merge(..) => caps.merge,
            Action::Clear(_) => caps.clear,
            Action::Reset => caps.reset,
        }
    }
}

// Accumulates the answers of stores to a read.
#[derive(Default)]
struct Resolution {
    objects: Vec<Value>,
    plain: Option<Value>,
}

impl Resolution {
    // Returns true once no further store needs to be asked.
    fn feed(&mut self, value: Option<Value>) -> bool {
        match value {
            None => false,
            Some(value @ Value::Object(_)) => {
                self.objects.push(value);
                false
            }
            Some(value) => {
                // Objects found in the more important stores shadow the plain value
                if self.objects.is_empty() {
                    self.plain = Some(value);
                }
                true
            }
        }
    }

    fn finish(mut self) -> Option<Value> {
        if self.plain.is_some() {
            return self.plain;
        }
        match self.objects.len() {
            0 => None,
            1 => self.objects.pop(),
            _ => Some(keypath::merge_all(self.objects)),
        }
    }
}

/// The layered configuration.
///
/// Stores are kept in the order they were added, the earlier ones taking precedence. Every
/// operation visits the stores one by one, in this order; the first error stops it and is
/// returned (what was already done in the previous stores stays done).
///
/// Each operation comes in two flavours. The plain ones work synchronously and skip the stores
/// that can do the operation only asynchronously. The `_async` ones go through all the stores,
/// awaiting each in turn.
///
/// ```rust
/// use serde_json::json;
/// use strata::Provider;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
/// let mut provider = Provider::new();
/// provider
///     .overrides(json!({"db": {"host": "db.example.com"}}))?
///     .memory("runtime")?
///     .defaults(json!({"db": {"host": "localhost", "port": 5432}}))?;
///
/// provider.set("db:user", json!("app"))?;
/// assert_eq!(
///     Some(json!({"host": "db.example.com", "user": "app", "port": 5432})),
///     provider.get("db")?,
/// );
/// provider.required(&["db:host", "db:port"])?;
/// assert!(provider.required(&["db:password"]).is_err());
/// # Ok(())
/// # }
/// ```
pub struct Provider {
    registry: Registry,
    stores: Vec<Entry>,
    sources: Vec<StoreOptions>,
}

impl Provider {
    /// Creates an empty provider knowing the built-in store types.
    pub fn new() -> Self {
        Self::with_registry(Registry::builtin())
    }

    /// Creates an empty provider with a custom set of store types.
    pub fn with_registry(registry: Registry) -> Self {
        Provider {
            registry,
            stores: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Creates a provider with the stores and sources described by the options.
    pub fn with_options(options: ProviderOptions) -> Result<Self, AnyError> {
        let mut provider = Self::new();
        provider.configure(options)?;
        Ok(provider)
    }

    /// Adds the stores and sources described by the options.
    pub fn configure(&mut self, options: ProviderOptions) -> Result<&mut Self, AnyError> {
        for (name, store) in options.stores {
            self.add(&name, store)?;
        }
        self.sources.extend(options.sources);
        Ok(self)
    }

    /// Access to the known store types, to register more.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Creates a store of the given type, without adding it.
    pub fn create(&self, kind: &str, options: &StoreOptions) -> Result<Box<dyn Store>, AnyError> {
        self.registry.create(kind, options)
    }

    /// Creates a store and adds it under the name.
    ///
    /// The type of the store is taken from the options or, if not present there, the name is
    /// used. See [`add_store`][Provider::add_store].
    pub fn add(&mut self, name: &str, options: StoreOptions) -> Result<&mut Self, AnyError> {
        let kind = options.kind.clone().unwrap_or_else(|| name.to_owned());
        self.add_kind(name, &kind, options)
    }

    fn add_kind(
        &mut self,
        name: &str,
        kind: &str,
        options: StoreOptions,
    ) -> Result<&mut Self, AnyError> {
        if !self.registry.contains(kind) {
            return Err(UnknownStoreType(kind.to_owned()).into());
        }
        let store = self
            .create(kind, &options)
            .with_context(|_| format!("Failed to create store {}", name))?;
        self.add_store(name, store)
    }

    /// Adds an already created store under the name.
    ///
    /// If the store can be loaded synchronously, it is loaded right away. A store already
    /// present under the name is replaced, keeping its position.
    pub fn add_store(&mut self, name: &str, mut store: Box<dyn Store>) -> Result<&mut Self, AnyError> {
        let caps = store.capabilities();
        if caps.load.is_sync() {
            trace!("Loading store {} on addition", name);
            store
                .load_sync()
                .with_context(|_| format!("Failed to load store {}", name))?;
        }
        let entry = Entry {
            name: name.to_owned(),
            store,
            caps,
        };
        if let Some(pos) = self.position(name) {
            debug!("Replacing store {}", name);
            self.stores[pos] = entry;
        } else {
            // The sources always stay at the bottom
            let pos = self.position(SOURCES).unwrap_or_else(|| self.stores.len());
            debug!("Adding store {} of type {}", name, entry.store.kind());
            self.stores.insert(pos, entry);
        }
        Ok(self)
    }

    /// Makes sure a store with these options is present under the name.
    ///
    /// If there's a store with equal options already, nothing happens. Otherwise the old store
    /// (if any) is removed and a new one is added at the end.
    pub fn use_store(&mut self, name: &str, options: StoreOptions) -> Result<&mut Self, AnyError> {
        if let Some(existing) = self.store(name) {
            if existing.options() == &options {
                trace!("Store {} already in use with the same options", name);
                return Ok(self);
            }
            self.remove(name);
        }
        self.add(name, options)
    }

    /// Removes the store, returning it.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Store>> {
        let pos = self.position(name)?;
        debug!("Removing store {}", name);
        Some(self.stores.remove(pos).store)
    }

    /// The store under the name.
    pub fn store(&self, name: &str) -> Option<&dyn Store> {
        self.position(name).map(|pos| &*self.stores[pos].store)
    }

    /// Mutable access to the store under the name.
    pub fn store_mut(&mut self, name: &str) -> Option<&mut dyn Store> {
        match self.position(name) {
            Some(pos) => Some(&mut *self.stores[pos].store),
            None => None,
        }
    }

    /// Names of the stores, in the order of precedence.
    pub fn names(&self) -> Vec<&str> {
        self.stores.iter().map(|e| e.name.as_str()).collect()
    }

    /// Registers a source, merged into the [`SOURCES`] store on the next load.
    pub fn add_source(&mut self, options: StoreOptions) -> &mut Self {
        self.sources.push(options);
        self
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.stores.iter().position(|e| e.name == name)
    }

    /// Adds the command line store under the name `argv`.
    pub fn argv(&mut self, options: StoreOptions) -> Result<&mut Self, AnyError> {
        self.add_kind("argv", "argv", options)
    }

    /// Adds the environment store under the name `env`.
    pub fn env(&mut self, options: StoreOptions) -> Result<&mut Self, AnyError> {
        self.add_kind("env", "env", options)
    }

    /// Adds a file store under the name.
    pub fn file<P: AsRef<Path>>(&mut self, name: &str, path: P) -> Result<&mut Self, AnyError> {
        let options =
            StoreOptions::of_type("file").set("file", path.as_ref().to_string_lossy().into_owned());
        self.add_kind(name, "file", options)
    }

    /// Adds a literal store named `defaults`.
    ///
    /// Note that the precedence is given by the order of adding, so defaults are usually added
    /// last.
    pub fn defaults(&mut self, value: Value) -> Result<&mut Self, AnyError> {
        self.literal("defaults", value)
    }

    /// Adds a literal store named `overrides`.
    pub fn overrides(&mut self, value: Value) -> Result<&mut Self, AnyError> {
        self.literal("overrides", value)
    }

    /// Adds a read-only store holding the value.
    pub fn literal(&mut self, name: &str, value: Value) -> Result<&mut Self, AnyError> {
        let store = Literal::new(value)?;
        self.add_store(name, Box::new(store))
    }

    /// Adds an empty writable in-memory store.
    pub fn memory(&mut self, name: &str) -> Result<&mut Self, AnyError> {
        self.add_kind(name, "memory", StoreOptions::new())
    }

    /// Reads the value under the key.
    ///
    /// The first store with a value decides, unless it is an object. Objects are collected from
    /// all the stores and merged, the earlier stores winning on conflicts. The empty key returns
    /// everything.
    pub fn get(&self, key: &str) -> Result<Option<Value>, AnyError> {
        let mut resolution = Resolution::default();
        for entry in &self.stores {
            if !entry.caps.get.is_sync() {
                debug!("Skipping store {} in synchronous get", entry.name);
                continue;
            }
            let value = entry
                .store
                .get(key)
                .with_context(|_| format!("Failed to get {} from store {}", key, entry.name))?;
            if resolution.feed(value) {
                break;
            }
        }
        Ok(resolution.finish())
    }

    /// Asynchronous version of [`get`][Provider::get].
    pub async fn get_async(&mut self, key: &str) -> Result<Option<Value>, AnyError> {
        let mut resolution = Resolution::default();
        for entry in &mut self.stores {
            if !entry.caps.get.is_supported() {
                continue;
            }
            let value = entry
                .store
                .get_async(key)
                .await
                .with_context(|_| format!("Failed to get {} from store {}", key, entry.name))?;
            if resolution.feed(value) {
                break;
            }
        }
        Ok(resolution.finish())
    }

    /// Returns the value of the first key having a truthy value.
    ///
    /// ```rust
    /// use serde_json::json;
    /// use strata::Provider;
    ///
    /// let mut provider = Provider::new();
    /// provider.defaults(json!({"port": 0, "fallback_port": 8080})).unwrap();
    /// assert_eq!(Some(json!(8080)), provider.any(&["missing", "port", "fallback_port"]).unwrap());
    /// ```
    pub fn any<I, S>(&self, keys: I) -> Result<Option<Value>, AnyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            if let Some(value) = self.get(key.as_ref())? {
                if is_truthy(&value) {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// Asynchronous version of [`any`][Provider::any].
    pub async fn any_async<I, S>(&mut self, keys: I) -> Result<Option<Value>, AnyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            if let Some(value) = self.get_async(key.as_ref()).await? {
                if is_truthy(&value) {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    fn execute(&mut self, action: Action) -> Result<bool, AnyError> {
        let mut accepted = false;
        for entry in &mut self.stores {
            if entry.store.read_only() {
                trace!("Store {} is read only, skipping {}", entry.name, action.name());
                continue;
            }
            match action.mode(&entry.caps) {
                Mode::Sync => (),
                Mode::Async => {
                    debug!(
                        "Skipping store {} in synchronous {}",
                        entry.name,
                        action.name()
                    );
                    continue;
                }
                Mode::Unsupported => continue,
            }
            let store = &mut entry.store;
            let done = match action {
                Action::Set(key, value) => store.set(key, value.clone()),
                Action::Merge(key, value) => store.merge(key, value.clone()),
                Action::Clear(key) => store.clear(key),
                Action::Reset => store.reset(),
            };
            let name = &entry.name;
            accepted |= done
                .with_context(|_| format!("Failed to {} in store {}", action.name(), name))?;
        }
        Ok(accepted)
    }

    async fn execute_async(&mut self, action: Action<'_>) -> Result<bool, AnyError> {
        let mut accepted = false;
        for entry in &mut self.stores {
            if entry.store.read_only() || !action.mode(&entry.caps).is_supported() {
                continue;
            }
            let store = &mut entry.store;
            let done = match action {
                Action::Set(key, value) => store.set_async(key, value.clone()).await,
                Action::Merge(key, value) => store.merge_async(key, value.clone()).await,
                Action::Clear(key) => store.clear_async(key).await,
                Action::Reset => store.reset_async().await,
            };
            let name = &entry.name;
            accepted |= done
                .with_context(|_| format!("Failed to {} in store {}", action.name(), name))?;
        }
        Ok(accepted)
    }

    /// Writes the value into every writable store.
    ///
    /// Returns if any store took it.
    pub fn set(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        self.execute(Action::Set(key, &value))
    }

    /// Asynchronous version of [`set`][Provider::set].
    pub async fn set_async(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        self.execute_async(Action::Set(key, &value)).await
    }

    /// Merges the value into every writable store.
    ///
    /// With an empty key, the value is merged into the top level and must be an object.
    pub fn merge(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        if key.is_empty() && !value.is_object() {
            return Err(NonObjectMerge.into());
        }
        self.execute(Action::Merge(key, &value))
    }

    /// Asynchronous version of [`merge`][Provider::merge].
    pub async fn merge_async(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        if key.is_empty() && !value.is_object() {
            return Err(NonObjectMerge.into());
        }
        self.execute_async(Action::Merge(key, &value)).await
    }

    /// Removes the key from every writable store.
    pub fn clear(&mut self, key: &str) -> Result<bool, AnyError> {
        self.execute(Action::Clear(key))
    }

    /// Asynchronous version of [`clear`][Provider::clear].
    pub async fn clear_async(&mut self, key: &str) -> Result<bool, AnyError> {
        self.execute_async(Action::Clear(key)).await
    }

    /// Empties every writable store.
    pub fn reset(&mut self) -> Result<bool, AnyError> {
        self.execute(Action::Reset)
    }

    /// Asynchronous version of [`reset`][Provider::reset].
    pub async fn reset_async(&mut self) -> Result<bool, AnyError> {
        self.execute_async(Action::Reset).await
    }

    /// Checks all the keys have a value.
    ///
    /// The error lists all the missing ones.
    pub fn required<I, S>(&self, keys: I) -> Result<(), AnyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut missing = Vec::new();
        for key in keys {
            let key = key.as_ref();
            if self.get(key)?.is_none() {
                missing.push(key.to_owned());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingKeys(missing).into())
        }
    }

    fn source_kind(options: &StoreOptions) -> Result<String, AnyError> {
        options
            .kind
            .clone()
            .or_else(|| options.name.clone())
            .ok_or_else(|| UnknownStoreType(String::new()).into())
    }

    fn store_sources(&mut self, snapshots: Vec<Value>) -> Result<(), AnyError> {
        let merged = keypath::merge_all(snapshots);
        self.remove(SOURCES);
        self.literal(SOURCES, merged)?;
        Ok(())
    }

    fn load_sources(&mut self) -> Result<(), AnyError> {
        if self.sources.is_empty() {
            return Ok(());
        }
        let mut snapshots = Vec::with_capacity(self.sources.len());
        // The last registered is loaded first
        for options in self.sources.iter().rev() {
            let kind = Self::source_kind(options)?;
            let mut store = self.create(&kind, options)?;
            if !store.capabilities().load.is_sync() {
                return Err(NoLoadSync(kind).into());
            }
            let snapshot = store
                .load_sync()
                .with_context(|_| format!("Failed to load source of type {}", kind))?;
            snapshots.push(snapshot);
        }
        snapshots.reverse();
        // Kept for the next load unless all of them loaded
        self.sources.clear();
        self.store_sources(snapshots)
    }

    async fn load_sources_async(&mut self) -> Result<(), AnyError> {
        if self.sources.is_empty() {
            return Ok(());
        }
        let mut snapshots = Vec::with_capacity(self.sources.len());
        for options in self.sources.iter().rev() {
            let kind = Self::source_kind(options)?;
            let mut store = self.create(&kind, options)?;
            if !store.capabilities().load.is_supported() {
                return Err(NoLoad(kind).into());
            }
            let snapshot = store
                .load_async()
                .await
                .with_context(|_| format!("Failed to load source of type {}", kind))?;
            snapshots.push(snapshot);
        }
        snapshots.reverse();
        // Kept for the next load unless all of them loaded
        self.sources.clear();
        self.store_sources(snapshots)
    }

    /// Loads all the stores and returns the merged content.
    ///
    /// Pending sources are loaded first and merged into the [`SOURCES`] store, which stays the
    /// least important one. Then all the stores are loaded, from the last one, and the results
    /// merged with the usual precedence.
    ///
    /// Fails with [`NoLoadSync`] if any store can't be loaded synchronously.
    pub fn load(&mut self) -> Result<Value, AnyError> {
        self.load_sources()?;
        let mut snapshots = Vec::with_capacity(self.stores.len());
        for entry in self.stores.iter_mut().rev() {
            if !entry.caps.load.is_sync() {
                return Err(NoLoadSync(entry.name.clone()).into());
            }
            let name = &entry.name;
            let snapshot = entry
                .store
                .load_sync()
                .with_context(|_| format!("Failed to load store {}", name))?;
            snapshots.push(snapshot);
        }
        snapshots.reverse();
        Ok(keypath::merge_all(snapshots))
    }

    /// Asynchronous version of [`load`][Provider::load].
    ///
    /// Fails with [`NoLoad`] if any store can't be loaded at all.
    pub async fn load_async(&mut self) -> Result<Value, AnyError> {
        self.load_sources_async().await?;
        let mut snapshots = Vec::with_capacity(self.stores.len());
        for entry in self.stores.iter_mut().rev() {
            if !entry.caps.load.is_supported() {
                return Err(NoLoad(entry.name.clone()).into());
            }
            let name = &entry.name;
            let snapshot = entry
                .store
                .load_async()
                .await
                .with_context(|_| format!("Failed to load store {}", name))?;
            snapshots.push(snapshot);
        }
        snapshots.reverse();
        Ok(keypath::merge_all(snapshots))
    }

    /// Persists every store that can be persisted.
    ///
    /// The value is passed to the stores, most of them ignore it. What the stores report as
    /// persisted is merged and returned.
    pub fn save(&mut self, value: Option<&Value>) -> Result<Value, AnyError> {
        let mut saved = Vec::new();
        for entry in &mut self.stores {
            match entry.caps.save {
                Mode::Sync => (),
                Mode::Async => {
                    debug!("Skipping store {} in synchronous save", entry.name);
                    continue;
                }
                Mode::Unsupported => continue,
            }
            let name = &entry.name;
            let persisted = entry
                .store
                .save_sync(value)
                .with_context(|_| format!("Failed to save store {}", name))?;
            saved.extend(persisted);
        }
        Ok(keypath::merge_all(saved))
    }

    /// Asynchronous version of [`save`][Provider::save].
    pub async fn save_async(&mut self, value: Option<&Value>) -> Result<Value, AnyError> {
        let mut saved = Vec::new();
        for entry in &mut self.stores {
            if !entry.caps.save.is_supported() {
                continue;
            }
            let name = &entry.name;
            let persisted = entry
                .store
                .save_async(value)
                .await
                .with_context(|_| format!("Failed to save store {}", name))?;
            saved.extend(persisted);
        }
        Ok(keypath::merge_all(saved))
    }
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Provider {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("Provider")
            .field("stores", &self.names())
            .field("pending_sources", &self.sources)
            .field("registry", &self.registry)
            .finish()
    }
}
