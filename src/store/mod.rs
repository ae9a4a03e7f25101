//! The store contract and the built-in stores.
//!
//! A store is a single source of configuration ‒ command line, environment, a file, a remote
//! database. The [`Provider`][crate::Provider] layers several of them into one view.
//!
//! Stores don't need to implement everything. Each one declares, per operation, whether it
//! supports it at all and if so, whether synchronously or asynchronously (see [`Capabilities`]).
//! The provider checks the declaration once, when the store is registered, and calls only the
//! methods the store claims to have.
//!
//! # Read-only stores
//!
//! Refusing to modify a read-only store is a policy, not a failure. Destructive operations on
//! such store return `Ok(false)`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AnyError, Unsupported};
use crate::options::StoreOptions;

// Implements the in-memory part of `Store` by forwarding to a `Memory` in the given field.
macro_rules! delegate_to_memory {
    ($field: ident) => {
        fn kind(&self) -> &str {
            $crate::store::Store::kind(&self.$field)
        }

        fn options(&self) -> &$crate::options::StoreOptions {
            $crate::store::Store::options(&self.$field)
        }

        fn read_only(&self) -> bool {
            $crate::store::Store::read_only(&self.$field)
        }

        fn get(&self, key: &str) -> Result<Option<serde_json::Value>, $crate::error::AnyError> {
            $crate::store::Store::get(&self.$field, key)
        }

        fn set(
            &mut self,
            key: &str,
            value: serde_json::Value,
        ) -> Result<bool, $crate::error::AnyError> {
            $crate::store::Store::set(&mut self.$field, key, value)
        }

        fn clear(&mut self, key: &str) -> Result<bool, $crate::error::AnyError> {
            $crate::store::Store::clear(&mut self.$field, key)
        }

        fn merge(
            &mut self,
            key: &str,
            value: serde_json::Value,
        ) -> Result<bool, $crate::error::AnyError> {
            $crate::store::Store::merge(&mut self.$field, key, value)
        }

        fn reset(&mut self) -> Result<bool, $crate::error::AnyError> {
            $crate::store::Store::reset(&mut self.$field)
        }
    };
}

pub mod argv;
pub mod env;
pub mod file;
pub mod literal;
pub mod memory;

pub use self::argv::Argv;
pub use self::env::Env;
pub use self::file::File;
pub use self::literal::Literal;
pub use self::memory::Memory;

/// How a store supports a single operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Mode {
    /// The operation is not available.
    Unsupported,
    /// The operation is available through the synchronous method.
    Sync,
    /// The operation is available only through the asynchronous method.
    Async,
}

impl Mode {
    /// Is the operation available in the synchronous pass?
    pub fn is_sync(self) -> bool {
        self == Mode::Sync
    }

    /// Is the operation available at all?
    pub fn is_supported(self) -> bool {
        self != Mode::Unsupported
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Unsupported
    }
}

/// Declaration of what a store can do.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Capabilities {
    /// Reading of a key.
    pub get: Mode,
    /// Writing of a key.
    pub set: Mode,
    /// Removal of a key.
    pub clear: Mode,
    /// Merging of an object into a key.
    pub merge: Mode,
    /// Removal of everything.
    pub reset: Mode,
    /// Populating the store from its backing source.
    pub load: Mode,
    /// Persisting the store.
    pub save: Mode,
}

impl Capabilities {
    /// A store supporting the in-memory operations synchronously, without load or save.
    pub fn sync_memory() -> Self {
        Capabilities {
            get: Mode::Sync,
            set: Mode::Sync,
            clear: Mode::Sync,
            merge: Mode::Sync,
            reset: Mode::Sync,
            load: Mode::Unsupported,
            save: Mode::Unsupported,
        }
    }

    /// A store supporting everything only asynchronously.
    pub fn all_async() -> Self {
        Capabilities {
            get: Mode::Async,
            set: Mode::Async,
            clear: Mode::Async,
            merge: Mode::Async,
            reset: Mode::Async,
            load: Mode::Async,
            save: Mode::Async,
        }
    }

    /// Sets the load mode.
    pub fn with_load(self, load: Mode) -> Self {
        Capabilities { load, ..self }
    }

    /// Sets the save mode.
    pub fn with_save(self, save: Mode) -> Self {
        Capabilities { save, ..self }
    }
}

fn unsupported<S: Store + ?Sized>(store: &S, operation: &'static str) -> AnyError {
    Unsupported {
        kind: store.kind().to_owned(),
        operation,
    }
    .into()
}

/// A pluggable configuration backend.
///
/// The synchronous methods fail with [`Unsupported`] unless implemented. The asynchronous ones
/// delegate to their synchronous counterparts, so a store that does everything synchronously
/// works in the asynchronous chain without further effort. A store that is asynchronous only
/// overrides the `_async` methods and declares [`Mode::Async`] in its [`Capabilities`].
///
/// A missing value is `None`. The root of a store (the empty key) is always an object.
#[async_trait]
pub trait Store: Send {
    /// The type of the store (`memory`, `file`, …).
    fn kind(&self) -> &str;

    /// The options the store was created with.
    fn options(&self) -> &StoreOptions;

    /// Is the store refusing modifications?
    fn read_only(&self) -> bool {
        false
    }

    /// What the store can do.
    fn capabilities(&self) -> Capabilities;

    /// Reads the value under a key.
    fn get(&self, key: &str) -> Result<Option<Value>, AnyError> {
        let _ = key;
        Err(unsupported(self, "get"))
    }

    /// Writes a value under a key.
    fn set(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        let _ = (key, value);
        Err(unsupported(self, "set"))
    }

    /// Removes a key.
    fn clear(&mut self, key: &str) -> Result<bool, AnyError> {
        let _ = key;
        Err(unsupported(self, "clear"))
    }

    /// Merges a value into the one under a key.
    ///
    /// Non-object values are simply set. Objects are merged property by property, replacing the
    /// existing value if it isn't an object.
    fn merge(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        let _ = (key, value);
        Err(unsupported(self, "merge"))
    }

    /// Removes everything.
    fn reset(&mut self) -> Result<bool, AnyError> {
        Err(unsupported(self, "reset"))
    }

    /// Populates the store from its backing source and returns the whole content.
    fn load_sync(&mut self) -> Result<Value, AnyError> {
        Err(unsupported(self, "load"))
    }

    /// Persists the store.
    ///
    /// The value passed to [`Provider::save`][crate::Provider::save] is handed over for the store
    /// to interpret; most stores ignore it and persist their current state. Returns what was
    /// persisted, if there's anything to report.
    fn save_sync(&mut self, value: Option<&Value>) -> Result<Option<Value>, AnyError> {
        let _ = value;
        Err(unsupported(self, "save"))
    }

    /// Asynchronous version of [`get`][Store::get].
    async fn get_async(&mut self, key: &str) -> Result<Option<Value>, AnyError> {
        self.get(key)
    }

    /// Asynchronous version of [`set`][Store::set].
    async fn set_async(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        self.set(key, value)
    }

    /// Asynchronous version of [`clear`][Store::clear].
    async fn clear_async(&mut self, key: &str) -> Result<bool, AnyError> {
        self.clear(key)
    }

    /// Asynchronous version of [`merge`][Store::merge].
    async fn merge_async(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        self.merge(key, value)
    }

    /// Asynchronous version of [`reset`][Store::reset].
    async fn reset_async(&mut self) -> Result<bool, AnyError> {
        self.reset()
    }

    /// Asynchronous version of [`load_sync`][Store::load_sync].
    async fn load_async(&mut self) -> Result<Value, AnyError> {
        self.load_sync()
    }

    /// Asynchronous version of [`save_sync`][Store::save_sync].
    async fn save_async(&mut self, value: Option<&Value>) -> Result<Option<Value>, AnyError> {
        self.save_sync(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Bare(StoreOptions);

    impl Store for Bare {
        fn kind(&self) -> &str {
            "bare"
        }
        fn options(&self) -> &StoreOptions {
            &self.0
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
    }

    #[test]
    fn defaults_are_unsupported() {
        let mut bare = Bare(StoreOptions::new());
        let err = bare.set("a", json!(1)).unwrap_err();
        let err = err.downcast_ref::<Unsupported>().expect("Different error returned");
        assert_eq!("bare", err.kind);
        assert_eq!("set", err.operation);
        assert!(bare.get("a").is_err());
        assert!(bare.load_sync().is_err());
        assert!(!bare.read_only());
    }

    #[test]
    fn capability_helpers() {
        let caps = Capabilities::sync_memory().with_load(Mode::Sync);
        assert!(caps.get.is_sync());
        assert!(caps.load.is_sync());
        assert!(!caps.save.is_supported());
        assert_eq!(Mode::Async, Capabilities::all_async().save);
        assert_eq!(Mode::Unsupported, Capabilities::default().get);
    }

    #[tokio::test]
    async fn async_delegates_to_sync() {
        let mut bare = Bare(StoreOptions::new());
        assert!(bare.get_async("a").await.is_err());
        assert!(bare.save_async(None).await.is_err());
    }
}
