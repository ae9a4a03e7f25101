//! The in-memory store.
//!
//! This is the canonical store, keeping a nested object tree. The other built-in stores (argv,
//! env, literal, file) are thin layers that fill a [`Memory`] from somewhere.
//!
//! Keys are split into path segments by the access separator, so `my:nested:key` addresses
//! `{"my": {"nested": {"key": …}}}`. Arrays can be addressed by numeric segments.

use std::collections::HashMap;
use std::mem;
use std::time::Instant;

use log::trace;
use serde_json::{Map, Value};

use crate::error::AnyError;
use crate::formats;
use crate::keypath::{self, DEFAULT_ACCESS_SEPARATOR, DEFAULT_INPUT_SEPARATOR};
use crate::options::StoreOptions;
use crate::store::{Capabilities, Mode, Store};
use crate::utils;

fn empty() -> Value {
    Value::Object(Map::new())
}

// Makes sure `value` can hold a child under `segment`, overwriting it if it can't.
fn ensure_container(value: &mut Value, segment: &str) {
    let fits = match value {
        Value::Object(_) => true,
        Value::Array(_) => segment.parse::<usize>().is_ok(),
        _ => false,
    };
    if !fits {
        *value = empty();
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => Some(map.entry(segment.to_owned()).or_insert(Value::Null)),
        Value::Array(items) => {
            // Only existing items or one right past the end, arrays don't grow holes.
            let idx = segment.parse::<usize>().ok()?;
            if idx == items.len() {
                items.push(Value::Null);
            }
            items.get_mut(idx)
        }
        _ => None,
    }
}

// Walks to the slot for the path, creating containers on the way.
fn slot<'a>(tree: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut target = tree;
    for segment in path {
        ensure_container(target, segment);
        target = child_mut(target, segment)?;
    }
    Some(target)
}

fn existing_child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
        // Strings (and other scalars) are never containers.
        _ => None,
    }
}

fn existing_child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

/// The in-memory store.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use strata::store::{Memory, Store};
///
/// let mut memory = Memory::default();
/// memory.set("database:host", json!("localhost")).unwrap();
/// memory.set("database__port", json!(5432)).unwrap();
/// assert_eq!(
///     Some(json!({"host": "localhost", "port": 5432})),
///     memory.get("database").unwrap(),
/// );
/// ```
#[derive(Clone, Debug)]
pub struct Memory {
    kind: String,
    options: StoreOptions,
    tree: Value,
    mtimes: HashMap<String, Instant>,
    read_only: bool,
    access_separator: String,
    input_separator: String,
    parse_values: bool,
    disable_default_access_separator: bool,
}

impl Default for Memory {
    fn default() -> Self {
        Self::build("memory", &StoreOptions::default(), false)
    }
}

impl Memory {
    fn build(kind: &str, options: &StoreOptions, read_only: bool) -> Self {
        Memory {
            kind: kind.to_owned(),
            options: options.clone(),
            tree: empty(),
            mtimes: HashMap::new(),
            read_only: options.read_only.unwrap_or(read_only),
            access_separator: options
                .access_separator
                .clone()
                .unwrap_or_else(|| DEFAULT_ACCESS_SEPARATOR.to_owned()),
            input_separator: options
                .input_separator
                .clone()
                .unwrap_or_else(|| DEFAULT_INPUT_SEPARATOR.to_owned()),
            parse_values: options.parse_values,
            disable_default_access_separator: options.disable_default_access_separator,
        }
    }

    /// Creates a writable memory store.
    ///
    /// Fails if any of the `loadFrom` files can't be read.
    pub fn new(options: &StoreOptions) -> Result<Self, AnyError> {
        Self::with_kind("memory", options, false)
    }

    /// Creates a memory store presenting itself as a different type.
    ///
    /// This is for the stores built on top of memory. The `read_only` is the default in case the
    /// options don't say.
    pub fn with_kind(kind: &str, options: &StoreOptions, read_only: bool) -> Result<Self, AnyError> {
        let mut memory = Self::build(kind, options, read_only);
        if !options.load_from.is_empty() {
            trace!("Seeding {} store from {:?}", kind, options.load_from);
            memory.tree = formats::load_files(&options.load_from)?;
        }
        Ok(memory)
    }

    /// Creates a writable memory store with the given content.
    ///
    /// Anything else than an object is replaced by an empty object.
    pub fn with_tree(tree: Value) -> Self {
        let mut memory = Self::default();
        if tree.is_object() {
            memory.tree = tree;
        }
        memory
    }

    /// The whole content.
    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// Changes the read-only flag.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// The separator of nested keys.
    pub fn access_separator(&self) -> &str {
        &self.access_separator
    }

    /// Is value parsing enabled?
    pub fn parses_values(&self) -> bool {
        self.parse_values
    }

    /// When was the key last modified?
    pub fn mtime(&self, key: &str) -> Option<Instant> {
        self.mtimes.get(&self.normalize_key(key)).copied()
    }

    /// Translates all the recognized separators in the key into the access separator.
    pub fn normalize_key(&self, key: &str) -> String {
        let mut key = if self.input_separator.is_empty() {
            key.to_owned()
        } else {
            key.replace(&self.input_separator, &self.access_separator)
        };
        if !self.disable_default_access_separator
            && self.access_separator != DEFAULT_ACCESS_SEPARATOR
        {
            key = key.replace(DEFAULT_ACCESS_SEPARATOR, &self.access_separator);
        }
        key
    }

    fn path(&self, key: &str) -> (String, Vec<String>) {
        let key = self.normalize_key(key);
        let path = keypath::path(&key, &self.access_separator);
        (key, path)
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        let (_, path) = self.path(key);
        path.iter()
            .try_fold(&self.tree, |target, segment| existing_child(target, segment))
    }

    fn touch(&mut self, key: String) {
        self.mtimes.insert(key, Instant::now());
    }

    fn forget(&mut self, key: &str) {
        let prefix = format!("{}{}", key, self.access_separator);
        self.mtimes
            .retain(|k, _| k != key && !(key.is_empty() || k.starts_with(&prefix)));
    }

    /// Sets the value, even if the store is read only.
    ///
    /// This is what the stores built on top of memory use to fill themselves.
    pub fn force_set(&mut self, key: &str, value: Value) -> bool {
        let (key, path) = self.path(key);

        if path.is_empty() {
            // The root must be an object
            if !value.is_object() {
                return false;
            }
            self.mtimes.clear();
            self.tree = value;
            return true;
        }

        let value = match self.parsed(value) {
            Some(value) => value,
            None => return self.force_clear(&key),
        };

        self.touch(key);
        match slot(&mut self.tree, &path) {
            Some(place) => {
                *place = value;
                true
            }
            None => false,
        }
    }

    fn force_clear(&mut self, key: &str) -> bool {
        let (key, path) = self.path(key);
        self.forget(&key);

        let (last, parents) = match path.split_last() {
            Some(split) => split,
            None => {
                self.tree = empty();
                return true;
            }
        };

        let mut target = &mut self.tree;
        for segment in parents {
            target = match existing_child_mut(target, segment) {
                Some(child) => child,
                // Nothing to clear
                None => return false,
            };
        }
        match target {
            Value::Object(map) => {
                map.remove(last);
                true
            }
            Value::Array(items) => {
                if let Ok(idx) = last.parse::<usize>() {
                    if idx < items.len() {
                        items.remove(idx);
                    }
                }
                true
            }
            _ => false,
        }
    }

    fn parsed(&self, value: Value) -> Option<Value> {
        if self.parse_values {
            utils::parse_value(value)
        } else {
            Some(value)
        }
    }

    fn merge_into(&self, target: &mut Value, value: Value) {
        match value {
            Value::Object(incoming) => {
                if !target.is_object() {
                    *target = empty();
                }
                if let Value::Object(existing) = target {
                    for (key, value) in incoming {
                        if value.is_object() {
                            let child = existing.entry(key).or_insert(Value::Null);
                            self.merge_into(child, value);
                        } else {
                            match self.parsed(value) {
                                Some(value) => {
                                    existing.insert(key, value);
                                }
                                None => {
                                    existing.remove(&key);
                                }
                            }
                        }
                    }
                }
            }
            value => *target = value,
        }
    }
}

impl Store for Memory {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::sync_memory().with_load(Mode::Sync)
    }

    fn get(&self, key: &str) -> Result<Option<Value>, AnyError> {
        Ok(self.lookup(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        if self.read_only {
            return Ok(false);
        }
        Ok(self.force_set(key, value))
    }

    fn clear(&mut self, key: &str) -> Result<bool, AnyError> {
        if self.read_only {
            return Ok(false);
        }
        Ok(self.force_clear(key))
    }

    fn merge(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        if self.read_only {
            return Ok(false);
        }
        if !value.is_object() {
            return self.set(key, value);
        }

        let (key, path) = self.path(key);
        self.touch(key);
        // Take the tree out so the merge can look at the options while modifying it.
        let mut tree = mem::replace(&mut self.tree, empty());
        let merged = match slot(&mut tree, &path) {
            Some(target) => {
                self.merge_into(target, value);
                true
            }
            None => false,
        };
        self.tree = tree;
        Ok(merged)
    }

    fn reset(&mut self) -> Result<bool, AnyError> {
        if self.read_only {
            return Ok(false);
        }
        self.mtimes.clear();
        self.tree = empty();
        Ok(true)
    }

    fn load_sync(&mut self) -> Result<Value, AnyError> {
        Ok(self.tree.clone())
    }
}
