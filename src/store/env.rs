//! A store filled from environment variables.

use std::env;

use log::{debug, trace};
use serde::Deserialize;
use serde_json::Value;

use crate::error::AnyError;
use crate::keypath;
use crate::options::{self, StoreOptions};
use crate::store::{Capabilities, Memory, Mode, Store};

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct EnvOptions {
    #[serde(default)]
    separator: Option<String>,
    #[serde(default)]
    whitelist: Vec<String>,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    lower_case: bool,
}

/// The environment variables store.
///
/// Read only. The variables are snapshotted when the store is created and applied on each load.
///
/// Backend options:
///
/// * `separator`: split variable names by this into nested keys (in addition to the input
///   separator, `__` by default).
/// * `whitelist`: take only these variables.
/// * `prefix`: take only variables starting with this, the prefix is stripped.
/// * `lowerCase`: lowercase the names.
///
/// The common `parseValues` and `transform` options apply too.
///
/// ```rust
/// use serde_json::json;
/// use strata::StoreOptions;
/// use strata::store::{Env, Store};
///
/// let opts = StoreOptions::of_type("env").set("prefix", "APP_").set("lowerCase", true);
/// let vars = vec![("APP_DB__PORT", "5432"), ("HOME", "/root")];
/// let mut env = Env::from_vars(&opts, vars).unwrap();
/// env.load_sync().unwrap();
/// assert_eq!(Some(json!({"db": {"port": "5432"}})), env.get("").unwrap());
/// ```
#[derive(Clone, Debug)]
pub struct Env {
    memory: Memory,
    settings: EnvOptions,
    vars: Vec<(String, String)>,
}

impl Env {
    /// Creates the store from the environment of the current process.
    pub fn new(options: &StoreOptions) -> Result<Self, AnyError> {
        Self::from_vars(options, env::vars())
    }

    /// Creates the store from an explicit list of variables.
    pub fn from_vars<I, K, V>(options: &StoreOptions, vars: I) -> Result<Self, AnyError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let settings = options::backend_options("env", options)?;
        let memory = Memory::with_kind("env", options, true)?;
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Ok(Env {
            memory,
            settings,
            vars,
        })
    }

    fn accepts(&self, name: &str) -> bool {
        self.settings.whitelist.is_empty()
            || self
                .settings
                .whitelist
                .iter()
                .any(|allowed| allowed == name || allowed.eq_ignore_ascii_case(name))
    }

    fn populate(&mut self) {
        let transform = self.memory.options().transform.clone();
        let separator = self.memory.access_separator().to_owned();
        let mut count = 0;
        for (name, value) in self.vars.clone() {
            if !self.accepts(&name) {
                continue;
            }
            let name = match &self.settings.prefix {
                Some(prefix) => match name.strip_prefix(prefix.as_str()) {
                    Some(stripped) => stripped.to_owned(),
                    None => continue,
                },
                None => name,
            };
            let name = if self.settings.lower_case {
                name.to_lowercase()
            } else {
                name
            };
            let (name, value) = match &transform {
                Some(transform) => match transform(name, Value::String(value)) {
                    Some(pair) => pair,
                    None => continue,
                },
                None => (name, Value::String(value)),
            };
            let key = match &self.settings.separator {
                Some(sep) if !sep.is_empty() => keypath::keyed(&separator, name.split(sep.as_str())),
                _ => name,
            };
            if key.is_empty() {
                continue;
            }
            trace!("Setting {} from the environment", key);
            self.memory.force_set(&key, value);
            count += 1;
        }
        debug!("Loaded {} environment variables", count);
    }
}

impl Store for Env {
    delegate_to_memory!(memory);

    fn capabilities(&self) -> Capabilities {
        Capabilities::sync_memory().with_load(Mode::Sync)
    }

    fn load_sync(&mut self) -> Result<Value, AnyError> {
        self.populate();
        self.memory.load_sync()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn loaded(options: &StoreOptions, vars: &[(&str, &str)]) -> Env {
        let mut env = Env::from_vars(options, vars.iter().copied()).unwrap();
        env.load_sync().unwrap();
        env
    }

    #[test]
    fn foo_from_env() {
        let env = loaded(&StoreOptions::new(), &[("foo", "1")]);
        assert_eq!(Some(json!("1")), env.get("foo").unwrap());

        let env = loaded(&StoreOptions::new().parse_values(true), &[("foo", "1")]);
        assert_eq!(Some(json!(1)), env.get("foo").unwrap());
    }

    #[test]
    fn input_separator_nests() {
        let env = loaded(&StoreOptions::new(), &[("DB__HOST", "db"), ("DB__PORT", "1")]);
        assert_eq!(
            Some(json!({"HOST": "db", "PORT": "1"})),
            env.get("DB").unwrap()
        );
    }

    #[test]
    fn custom_separator() {
        let opts = StoreOptions::new().set("separator", "_");
        let env = loaded(&opts, &[("DB_HOST", "db")]);
        assert_eq!(Some(json!("db")), env.get("DB:HOST").unwrap());
    }

    #[test]
    fn whitelist_filters() {
        let opts = StoreOptions::new().set("whitelist", json!(["keep"]));
        let env = loaded(&opts, &[("KEEP", "1"), ("drop", "2")]);
        assert_eq!(Some(json!("1")), env.get("KEEP").unwrap());
        assert_eq!(None, env.get("drop").unwrap());
    }

    #[test]
    fn prefix_stripped_and_lowercased() {
        let opts = StoreOptions::new()
            .set("prefix", "APP_")
            .set("lowerCase", true);
        let env = loaded(&opts, &[("APP_NAME", "x"), ("OTHER", "y")]);
        assert_eq!(Some(json!({"name": "x"})), env.get("").unwrap());
    }

    #[test]
    fn transform_applies() {
        let opts = StoreOptions::new().transform(|key, value| match key.as_str() {
            "SKIP" => None,
            _ => Some((format!("t_{}", key), value)),
        });
        let env = loaded(&opts, &[("SKIP", "1"), ("KEEP", "2")]);
        assert_eq!(Some(json!({"t_KEEP": "2"})), env.get("").unwrap());
    }

    #[test]
    fn read_only() {
        let mut env = loaded(&StoreOptions::new(), &[("A", "1")]);
        assert!(!env.set("A", json!(2)).unwrap());
        assert!(!env.reset().unwrap());
        assert_eq!(Some(json!("1")), env.get("A").unwrap());
    }

    #[test]
    fn bad_options() {
        let opts = StoreOptions::new().set("whitelist", "not a list");
        assert!(Env::from_vars(&opts, Vec::<(String, String)>::new()).is_err());
    }
}
