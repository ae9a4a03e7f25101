//! Options for stores and providers.
//!
//! Stores are configured by [`StoreOptions`]. The common part (separators, read-only flag, …) is
//! understood by every Memory-backed store, the rest is specific to the backend and is extracted
//! by the backend itself with [`backend_options`].
//!
//! The options can be built in code or deserialized from any serde format, which allows a
//! provider to be described by configuration itself (see [`ProviderOptions::from_value`]).

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::sync::Arc;

use err_context::prelude::*;
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AnyError;

/// A function reshaping `(key, value)` pairs as they are loaded into a store.
///
/// Returning `None` drops the pair.
pub type Transform = Arc<dyn Fn(String, Value) -> Option<(String, Value)> + Send + Sync>;

/// Options of a single store.
///
/// Stores never modify the options they are created from, they keep their own copy.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
/// use strata::StoreOptions;
///
/// let opts: StoreOptions = serde_json::from_value(json!({
///     "type": "file",
///     "file": "/etc/app.json",
///     "readOnly": true,
/// })).unwrap();
/// assert_eq!(Some("file"), opts.kind.as_deref());
/// assert_eq!(Some(true), opts.read_only);
/// assert_eq!(Some(&json!("/etc/app.json")), opts.extra.get("file"));
/// ```
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct StoreOptions {
    /// The type of the store (the registry key of the backend).
    ///
    /// If not set, the name the store is added under is used.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the store, used when the options come in a list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Forces the store to be (or not to be) read only.
    ///
    /// Every backend has its own default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,

    /// Separator of nested keys, `:` by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_separator: Option<String>,

    /// Alternative separator translated into the access separator, `__` by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_separator: Option<String>,

    /// Turn string values into typed ones when they are set.
    #[serde(default)]
    pub parse_values: bool,

    /// Don't treat `:` as a separator when a custom access separator is used.
    #[serde(default)]
    pub disable_default_access_separator: bool,

    /// Files (or directories of files) to seed the store with at creation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_from: Vec<PathBuf>,

    /// Backend specific options.
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    /// Reshaping of loaded key-value pairs.
    #[serde(skip)]
    pub transform: Option<Transform>,
}

impl StoreOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a store of the given type.
    pub fn of_type<K: Into<String>>(kind: K) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    /// Sets the read-only flag.
    pub fn read_only(self, read_only: bool) -> Self {
        Self {
            read_only: Some(read_only),
            ..self
        }
    }

    /// Sets the access separator.
    pub fn access_separator<S: Into<String>>(self, separator: S) -> Self {
        Self {
            access_separator: Some(separator.into()),
            ..self
        }
    }

    /// Sets the input separator.
    pub fn input_separator<S: Into<String>>(self, separator: S) -> Self {
        Self {
            input_separator: Some(separator.into()),
            ..self
        }
    }

    /// Enables parsing of string values.
    pub fn parse_values(self, parse: bool) -> Self {
        Self {
            parse_values: parse,
            ..self
        }
    }

    /// Disables the default `:` separator.
    pub fn disable_default_access_separator(self, disable: bool) -> Self {
        Self {
            disable_default_access_separator: disable,
            ..self
        }
    }

    /// Adds a file or directory to seed the store from.
    pub fn load_from<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.load_from.push(path.into());
        self
    }

    /// Sets a backend specific option.
    pub fn set<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Sets the transformation of loaded pairs.
    pub fn transform<F>(self, transform: F) -> Self
    where
        F: Fn(String, Value) -> Option<(String, Value)> + Send + Sync + 'static,
    {
        Self {
            transform: Some(Arc::new(transform)),
            ..self
        }
    }
}

impl Debug for StoreOptions {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.debug_struct("StoreOptions")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .field("access_separator", &self.access_separator)
            .field("input_separator", &self.input_separator)
            .field("parse_values", &self.parse_values)
            .field(
                "disable_default_access_separator",
                &self.disable_default_access_separator,
            )
            .field("load_from", &self.load_from)
            .field("extra", &self.extra)
            .field("transform", &self.transform.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl PartialEq for StoreOptions {
    fn eq(&self, other: &Self) -> bool {
        let same_transform = match (&self.transform, &other.transform) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_transform
            && self.kind == other.kind
            && self.name == other.name
            && self.read_only == other.read_only
            && self.access_separator == other.access_separator
            && self.input_separator == other.input_separator
            && self.parse_values == other.parse_values
            && self.disable_default_access_separator == other.disable_default_access_separator
            && self.load_from == other.load_from
            && self.extra == other.extra
    }
}

/// Extracts the backend specific part of the options.
///
/// Errors point to the offending option. Options the backend doesn't know are only logged, so
/// options shared between several store types don't break anything.
///
/// # Examples
///
/// ```rust
/// use serde::Deserialize;
/// use strata::StoreOptions;
/// use strata::options::backend_options;
///
/// #[derive(Deserialize)]
/// # #[allow(dead_code)]
/// struct Remote {
///     host: String,
///     #[serde(default)]
///     port: u16,
/// }
///
/// let opts = StoreOptions::of_type("remote").set("host", "example.com").set("color", "blue");
/// let remote: Remote = backend_options("remote", &opts).unwrap();
/// assert_eq!("example.com", remote.host);
///
/// let broken = StoreOptions::of_type("remote").set("host", 42);
/// assert!(backend_options::<Remote>("remote", &broken).is_err());
/// ```
pub fn backend_options<T: DeserializeOwned>(
    kind: &str,
    options: &StoreOptions,
) -> Result<T, AnyError> {
    let mut ignored = Vec::new();
    let result = {
        let raw = Value::Object(options.extra.clone());
        serde_path_to_error::deserialize(serde_ignored::Deserializer::new(raw, &mut |path| {
            ignored.push(path.to_string())
        }))
        .with_context(|_| format!("Invalid options for store of type {}", kind))?
    };
    for path in ignored {
        debug!("Option {} not used by store of type {}", path, kind);
    }
    Ok(result)
}

/// Description of a whole [`Provider`][crate::Provider].
///
/// Lists the stores (in the order of precedence) and the read-only sources layered beneath them.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct ProviderOptions {
    /// The named stores, highest precedence first.
    pub stores: Vec<(String, StoreOptions)>,
    /// The sources, highest precedence first.
    pub sources: Vec<StoreOptions>,
}

impl ProviderOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named store.
    pub fn store<N: Into<String>>(mut self, name: N, options: StoreOptions) -> Self {
        self.stores.push((name.into(), options));
        self
    }

    /// Adds a read-only source.
    pub fn source(mut self, options: StoreOptions) -> Self {
        self.sources.push(options);
        self
    }

    /// Reads the options from a loosely typed description.
    ///
    /// The recognized keys are:
    ///
    /// * `type`: the whole value describes a single store of that type.
    /// * `store`: a single store (named by its `name` or `type`).
    /// * `stores`: an object of stores, keyed by their names.
    /// * `source`: a single source.
    /// * `sources`: an object of sources.
    ///
    /// The passed value is not modified.
    ///
    /// ```rust
    /// use serde_json::json;
    /// use strata::options::ProviderOptions;
    ///
    /// let opts = ProviderOptions::from_value(&json!({
    ///     "stores": {
    ///         "overrides": {"type": "literal", "store": {"a": 1}},
    ///         "env": {"type": "env"},
    ///     },
    ///     "source": {"type": "file", "file": "defaults.json"},
    /// })).unwrap();
    /// assert_eq!(2, opts.stores.len());
    /// assert_eq!("overrides", opts.stores[0].0);
    /// assert_eq!(1, opts.sources.len());
    /// ```
    pub fn from_value(value: &Value) -> Result<Self, AnyError> {
        let mut result = Self::default();
        let parse = |what: &str, value: &Value| -> Result<StoreOptions, AnyError> {
            let opts = serde_path_to_error::deserialize(value.clone())
                .with_context(|_| format!("Invalid options of {}", what))?;
            Ok(opts)
        };
        let named = |opts: &StoreOptions, fallback: &str| -> String {
            opts.name
                .clone()
                .or_else(|| opts.kind.clone())
                .unwrap_or_else(|| fallback.to_owned())
        };

        if value.get("type").is_some() {
            let opts = parse("store", value)?;
            let name = opts.kind.clone().unwrap_or_default();
            result.stores.push((name, opts));
        } else if let Some(store) = value.get("store") {
            let opts = parse("store", store)?;
            let name = named(&opts, "store");
            result.stores.push((name, opts));
        } else if let Some(Value::Object(stores)) = value.get("stores") {
            for (name, store) in stores {
                let opts = parse(name, store)?;
                let name = opts.name.clone().unwrap_or_else(|| name.clone());
                result.stores.push((name, opts));
            }
        }

        if let Some(source) = value.get("source") {
            result.sources.push(parse("source", source)?);
        } else if let Some(Value::Object(sources)) = value.get("sources") {
            for (name, source) in sources {
                let mut opts = parse(name, source)?;
                if opts.kind.is_none() {
                    opts.kind = Some(named(&opts, name));
                }
                result.sources.push(opts);
            }
        }

        Ok(result)
    }
}
