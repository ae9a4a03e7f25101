#![doc(test(attr(deny(warnings))))]
#![allow(clippy::type_complexity)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Hierarchical configuration, layered from multiple stores.
//!
//! An application usually takes its configuration from several places ‒ command line arguments,
//! environment variables, a configuration file or two, built-in defaults, sometimes a remote
//! database. This crate puts them all into one key-value namespace.
//!
//! The central piece is the [`Provider`]. It holds an ordered list of named [stores][Store].
//! When reading a key, the stores are consulted in order and the first one having a value wins.
//! Objects are the exception ‒ if several stores have an object under the key, they are deep
//! merged, so the environment may supply `db:host` and a file `db:port`.
//!
//! ```rust
//! use serde_json::json;
//! use strata::{Provider, StoreOptions};
//!
//! # fn main() -> Result<(), strata::AnyError> {
//! let mut provider = Provider::new();
//! provider
//!     .argv(StoreOptions::new().set("args", json!(["--db.host=db.example.com"])))?
//!     .env(StoreOptions::new().set("prefix", "MYAPP_").set("lowerCase", true))?
//!     .defaults(json!({"db": {"host": "localhost", "port": 5432}}))?;
//!
//! assert_eq!(Some(json!("db.example.com")), provider.get("db:host")?);
//! assert_eq!(Some(json!(5432)), provider.get("db:port")?);
//! # Ok(())
//! # }
//! ```
//!
//! # Keys
//!
//! Nested values are addressed by keys with segments separated by `:` (the access separator,
//! configurable per store). The `__` input separator is understood as well, which is handy for
//! environment variables. See the [`keypath`] module.
//!
//! # Stores
//!
//! The built-in stores live in the [`store`] module:
//!
//! * [`Memory`][store::Memory]: a writable in-memory tree.
//! * [`Literal`][store::Literal]: a fixed read-only value (defaults, overrides).
//! * [`Argv`][store::Argv]: the command line.
//! * [`Env`][store::Env]: the environment variables.
//! * [`File`][store::File]: a JSON, TOML or INI file (see [`formats`]).
//!
//! Others can be plugged in by implementing the [`Store`] trait and registering a constructor in
//! the [`Registry`]. A store declares which operations it supports and whether synchronously or
//! asynchronously. The `strata-redis` crate provides a remote, asynchronous store.
//!
//! # Synchronous and asynchronous operation
//!
//! Each operation of the provider has a plain and an `_async` variant. The plain ones skip
//! stores that can work only asynchronously, the `_async` ones await every store in turn. The
//! stores are always visited one at a time, so the precedence is deterministic.
//!
//! # Features
//!
//! * `ini` (on by default): support for INI files.

pub mod error;
pub mod formats;
pub mod keypath;
pub mod options;
pub mod provider;
pub mod registry;
pub mod store;
pub mod utils;

pub use crate::error::AnyError;
pub use crate::options::{ProviderOptions, StoreOptions};
pub use crate::provider::Provider;
pub use crate::registry::Registry;
pub use crate::store::{Capabilities, Mode, Store};
