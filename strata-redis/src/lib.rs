#![doc(test(attr(deny(warnings))))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! A redis-backed store for [`strata`].
//!
//! The store keeps the configuration tree on a redis server, one key per value, with sets
//! listing the children of each object. It works only asynchronously, therefore it is reached
//! only by the `_async` methods of the [`Provider`][strata::Provider].
//!
//! To use it, register the store type and add a store of type `redis`:
//!
//! ```rust
//! use serde_json::json;
//! use strata::{Provider, Registry, StoreOptions};
//! use strata_redis::InMemoryClient;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), strata::AnyError> {
//! let server = InMemoryClient::new();
//! let mut registry = Registry::builtin();
//! let client = server.clone();
//! strata_redis::register_with(&mut registry, move |_| Ok(client.clone()));
//!
//! let mut provider = Provider::with_registry(registry);
//! provider.add("shared", StoreOptions::of_type("redis").set("namespace", "myapp"))?;
//! provider.set_async("db:host", json!("db.example.com")).await?;
//! assert_eq!(Some(json!("db.example.com")), provider.get_async("db:host").await?);
//! assert!(server.keys().contains(&"myapp:db:host".to_owned()));
//! # Ok(())
//! # }
//! ```
//!
//! With the `redis` feature, [`register`] registers a store talking to a real server (see
//! [`RedisOptions`] for the connection options).
//!
//! # Layout
//!
//! A value at `db:host` in the namespace `myapp` is stored JSON-encoded under `myapp:db:host`.
//! The set `myapp:keys` holds the top-level names (`db`), `myapp:db:keys` the names inside `db`
//! and so on. Empty objects are stored as `{}`.

use strata::options::{backend_options, StoreOptions};
use strata::{AnyError, Registry, Store};

pub mod client;
pub mod options;
pub mod store;

pub use crate::client::{InMemoryClient, RemoteClient};
#[cfg(feature = "redis")]
pub use crate::client::RedisClient;
pub use crate::options::RedisOptions;
pub use crate::store::RedisStore;

/// The type name of the store in the registry.
pub const KIND: &str = "redis";

/// Registers the `redis` store type, with clients made by the factory.
pub fn register_with<F, C>(registry: &mut Registry, client_factory: F) -> &mut Registry
where
    F: Fn(&RedisOptions) -> Result<C, AnyError> + Send + Sync + 'static,
    C: RemoteClient + 'static,
{
    registry.register(KIND, move |opts: &StoreOptions| -> Result<Box<dyn Store>, AnyError> {
        let settings: RedisOptions = backend_options(KIND, opts)?;
        let client = client_factory(&settings)?;
        Ok(Box::new(RedisStore::with_settings(opts, &settings, client)?))
    })
}

/// Registers the `redis` store type, connecting to a real server.
#[cfg(feature = "redis")]
pub fn register(registry: &mut Registry) -> &mut Registry {
    register_with(registry, RedisClient::new)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strata::error::NoLoadSync;
    use strata::Provider;

    use super::*;

    fn provider(server: &InMemoryClient) -> Provider {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut registry = Registry::builtin();
        let client = server.clone();
        register_with(&mut registry, move |_| Ok(client.clone()));
        let mut provider = Provider::with_registry(registry);
        provider
            .memory("local")
            .unwrap()
            .add("remote", StoreOptions::of_type("redis"))
            .unwrap()
            .defaults(json!({"db": {"port": 5432}}))
            .unwrap();
        provider
    }

    #[test]
    fn registered() {
        let mut registry = Registry::empty();
        register_with(&mut registry, |_| Ok(InMemoryClient::new()));
        assert_eq!(vec![KIND], registry.kinds());
    }

    #[test]
    fn sync_operations_skip_remote() {
        let server = InMemoryClient::new();
        let mut provider = provider(&server);
        assert!(provider.set("a", json!(1)).unwrap());
        assert!(server.keys().is_empty());
        let err = provider.load().unwrap_err();
        assert_eq!(
            "remote",
            err.downcast_ref::<NoLoadSync>()
                .expect("Different error returned")
                .0
        );
    }

    #[tokio::test]
    async fn async_chain_reaches_remote() {
        let server = InMemoryClient::new();
        let mut provider = provider(&server);
        provider
            .set_async("db:host", json!("remote-host"))
            .await
            .unwrap();
        // The local store was cleared, the value comes from the server
        provider.reset().unwrap();
        assert_eq!(
            Some(json!({"host": "remote-host", "port": 5432})),
            provider.get_async("db").await.unwrap()
        );

        let loaded = provider.load_async().await.unwrap();
        assert_eq!(json!({"db": {"host": "remote-host", "port": 5432}}), loaded);

        let mut fresh = provider_on(&server);
        assert_eq!(
            Some(json!("remote-host")),
            fresh.get_async("db:host").await.unwrap()
        );
    }

    fn provider_on(server: &InMemoryClient) -> Provider {
        let mut registry = Registry::empty();
        let client = server.clone();
        register_with(&mut registry, move |_| Ok(client.clone()));
        let mut provider = Provider::with_registry(registry);
        provider
            .add("remote", StoreOptions::of_type("redis"))
            .unwrap();
        provider
    }

    #[tokio::test]
    async fn save_persists_value() {
        let server = InMemoryClient::new();
        let mut provider = provider_on(&server);
        let value = json!({"name": "app", "limits": {"conn": 10}});
        let saved = provider.save_async(Some(&value)).await.unwrap();
        assert_eq!(value, saved);
        assert_eq!(value, provider_on(&server).load_async().await.unwrap());
    }
}
