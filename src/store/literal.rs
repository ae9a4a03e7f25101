//! A store holding a fixed value.
//!
//! Used for defaults and overrides passed directly from code.

use log::trace;
use serde_json::{Map, Value};

use crate::error::{AnyError, RootNotObject};
use crate::options::StoreOptions;
use crate::store::{Capabilities, Memory, Mode, Store};

/// A read-only store with content given up front.
///
/// The content is taken either from the `store` option or, if there's no such option, from all
/// the backend-specific options.
///
/// ```rust
/// use serde_json::json;
/// use strata::store::{Literal, Store};
///
/// let literal = Literal::new(json!({"db": {"port": 5432}})).unwrap();
/// assert_eq!(Some(json!(5432)), literal.get("db:port").unwrap());
/// assert!(literal.read_only());
/// ```
#[derive(Clone, Debug)]
pub struct Literal {
    memory: Memory,
}

impl Literal {
    /// Creates the store from the options.
    pub fn from_options(options: &StoreOptions) -> Result<Self, AnyError> {
        let mut memory = Memory::with_kind("literal", options, true)?;
        let content = match options.extra.get("store") {
            Some(store) => store.clone(),
            None => Value::Object(options.extra.clone()),
        };
        match content {
            Value::Object(map) => {
                trace!("Literal store with {} top-level keys", map.len());
                // Merge over whatever came from loadFrom
                for (key, value) in map {
                    memory.force_set(&key, value);
                }
            }
            Value::Null => (),
            _ => return Err(RootNotObject.into()),
        }
        Ok(Literal { memory })
    }

    /// Creates the store holding the given object.
    ///
    /// Fails if the value is not an object.
    pub fn new(value: Value) -> Result<Self, AnyError> {
        let mut extra = Map::new();
        extra.insert("store".to_owned(), value);
        let options = StoreOptions {
            kind: Some("literal".to_owned()),
            extra,
            ..StoreOptions::default()
        };
        Self::from_options(&options)
    }
}

impl Store for Literal {
    delegate_to_memory!(memory);

    fn capabilities(&self) -> Capabilities {
        Capabilities::sync_memory().with_load(Mode::Sync)
    }

    fn load_sync(&mut self) -> Result<Value, AnyError> {
        self.memory.load_sync()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn from_store_option() {
        let opts = StoreOptions::of_type("literal").set("store", json!({"foo": 1}));
        let mut literal = Literal::from_options(&opts).unwrap();
        assert_eq!(Some(json!(1)), literal.get("foo").unwrap());
        assert_eq!(json!({"foo": 1}), literal.load_sync().unwrap());
        assert_eq!("literal", literal.kind());
    }

    #[test]
    fn from_remaining_options() {
        let opts = StoreOptions::of_type("literal").set("foo", 1).set("bar", "x");
        let literal = Literal::from_options(&opts).unwrap();
        assert_eq!(Some(json!({"foo": 1, "bar": "x"})), literal.get("").unwrap());
    }

    #[test]
    fn read_only_by_default() {
        let mut literal = Literal::new(json!({"foo": 1})).unwrap();
        assert!(!literal.set("foo", json!(2)).unwrap());
        assert!(!literal.clear("foo").unwrap());
        assert_eq!(Some(json!(1)), literal.get("foo").unwrap());

        let opts = StoreOptions::of_type("literal")
            .read_only(false)
            .set("store", json!({"foo": 1}));
        let mut literal = Literal::from_options(&opts).unwrap();
        assert!(literal.set("foo", json!(2)).unwrap());
        assert_eq!(Some(json!(2)), literal.get("foo").unwrap());
    }

    #[test]
    fn scalar_rejected() {
        let err = Literal::new(json!(42)).unwrap_err();
        err.downcast_ref::<RootNotObject>()
            .expect("Different error returned");
    }
}
