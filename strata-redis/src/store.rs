//! The redis store itself.

use std::iter;
use std::time::Duration;

use async_trait::async_trait;
use err_context::prelude::*;
use futures_util::future::{BoxFuture, FutureExt};
use log::{debug, trace};
use serde_json::{Map, Value};
use strata::error::RootNotObject;
use strata::options::{self, StoreOptions};
use strata::store::{Capabilities, Memory, Store};
use strata::{keypath, AnyError};

use crate::client::RemoteClient;
use crate::options::RedisOptions;

/// Names of the keys on the server.
///
/// A value at `a:b` is stored as JSON under `<namespace>:a:b`. An object keeps the names of its
/// children in the set `<namespace>:a:b:keys`, the top level in `<namespace>:keys`.
struct Layout {
    namespace: String,
}

impl Layout {
    fn leaf(&self, path: &[String]) -> String {
        // Empty segments are kept, `a::b` and `a:b` are different paths
        iter::once(self.namespace.as_str())
            .chain(path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(":")
    }

    fn children(&self, path: &[String]) -> String {
        format!("{}:keys", self.leaf(path))
    }
}

fn child(path: &[String], name: &str) -> Vec<String> {
    let mut child = path.to_vec();
    child.push(name.to_owned());
    child
}

const EMPTY_OBJECT: &str = "{}";

fn fetch<'a>(
    client: &'a dyn RemoteClient,
    layout: &'a Layout,
    path: Vec<String>,
) -> BoxFuture<'a, Result<Option<Value>, AnyError>> {
    async move {
        let mut names = client.smembers(&layout.children(&path)).await?;
        if !names.is_empty() {
            names.sort();
            let mut map = Map::new();
            for name in names {
                if let Some(value) = fetch(client, layout, child(&path, &name)).await? {
                    map.insert(name, value);
                }
            }
            return Ok(Some(Value::Object(map)));
        }
        if path.is_empty() {
            return Ok(Some(Value::Object(Map::new())));
        }
        let key = layout.leaf(&path);
        match client.get(&key).await? {
            Some(text) => {
                let value = serde_json::from_str(&text)
                    .with_context(|_| format!("Invalid value stored under {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
    .boxed()
}

fn write<'a>(
    client: &'a dyn RemoteClient,
    layout: &'a Layout,
    path: Vec<String>,
    value: &'a Value,
) -> BoxFuture<'a, Result<(), AnyError>> {
    async move {
        match value {
            Value::Object(map) if !map.is_empty() => {
                let children = layout.children(&path);
                for (name, value) in map {
                    client.sadd(&children, name).await?;
                    write(client, layout, child(&path, name), value).await?;
                }
            }
            _ if path.is_empty() => (),
            value => {
                let text = serde_json::to_string(value)?;
                client.set(&layout.leaf(&path), &text).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

fn remove<'a>(
    client: &'a dyn RemoteClient,
    layout: &'a Layout,
    path: Vec<String>,
) -> BoxFuture<'a, Result<(), AnyError>> {
    async move {
        let children = layout.children(&path);
        for name in client.smembers(&children).await? {
            remove(client, layout, child(&path, &name)).await?;
        }
        client.del(&children).await?;
        if !path.is_empty() {
            client.del(&layout.leaf(&path)).await?;
        }
        Ok(())
    }
    .boxed()
}

fn merge<'a>(
    client: &'a dyn RemoteClient,
    layout: &'a Layout,
    path: Vec<String>,
    map: &'a Map<String, Value>,
) -> BoxFuture<'a, Result<(), AnyError>> {
    async move {
        let children = layout.children(&path);
        if !path.is_empty() {
            // Whatever plain value was here is replaced by the object
            client.del(&layout.leaf(&path)).await?;
        }
        if map.is_empty() {
            if !path.is_empty() && client.smembers(&children).await?.is_empty() {
                client.set(&layout.leaf(&path), EMPTY_OBJECT).await?;
            }
            return Ok(());
        }
        for (name, value) in map {
            client.sadd(&children, name).await?;
            let sub = child(&path, name);
            match value {
                Value::Object(inner) => merge(client, layout, sub, inner).await?,
                value => {
                    remove(client, layout, sub.clone()).await?;
                    write(client, layout, sub, value).await?;
                }
            }
        }
        Ok(())
    }
    .boxed()
}

/// A store keeping the configuration in redis.
///
/// Everything is done asynchronously, so only the `_async` methods of the
/// [`Provider`][strata::Provider] reach it. Nested objects are kept as separate keys on the
/// server, so parts of the tree can be read without fetching all of it.
///
/// Values read from the server are cached locally. Within the time to live, reads of the same
/// key (or anything below a cached key) are answered from the cache. Changes made by other
/// writers may therefore show up late.
pub struct RedisStore {
    options: StoreOptions,
    client: Box<dyn RemoteClient>,
    layout: Layout,
    cache: Memory,
    ttl: Duration,
    read_only: bool,
}

impl RedisStore {
    /// Creates the store, reading the backend options from the store options.
    pub fn new<C>(options: &StoreOptions, client: C) -> Result<Self, AnyError>
    where
        C: RemoteClient + 'static,
    {
        let settings = options::backend_options("redis", options)?;
        Self::with_settings(options, &settings, client)
    }

    /// Creates the store with already parsed backend options.
    pub fn with_settings<C>(
        options: &StoreOptions,
        settings: &RedisOptions,
        client: C,
    ) -> Result<Self, AnyError>
    where
        C: RemoteClient + 'static,
    {
        let mut cache_options = options.clone();
        cache_options.load_from.clear();
        cache_options.read_only = Some(false);
        cache_options.parse_values = false;
        let cache = Memory::with_kind("redis", &cache_options, false)?;
        debug!(
            "Redis store in namespace {} with cache ttl {:?}",
            settings.namespace,
            settings.ttl()
        );
        Ok(RedisStore {
            options: options.clone(),
            client: Box::new(client),
            layout: Layout {
                namespace: settings.namespace.clone(),
            },
            cache,
            ttl: settings.ttl(),
            read_only: options.read_only.unwrap_or(false),
        })
    }

    fn path(&self, key: &str) -> Vec<String> {
        let key = self.cache.normalize_key(key);
        keypath::path(&key, self.cache.access_separator())
    }

    fn cache_key(&self, path: &[String]) -> String {
        path.join(self.cache.access_separator())
    }

    // Is the value at the path (or above it) fresh enough in the cache?
    fn cached(&self, path: &[String]) -> bool {
        (1..=path.len()).any(|len| {
            self.cache
                .mtime(&self.cache_key(&path[..len]))
                .map(|at| at.elapsed() < self.ttl)
                .unwrap_or(false)
        })
    }

    async fn add_keys(&self, path: &[String]) -> Result<(), AnyError> {
        let client = self.client.as_ref();
        for (idx, name) in path.iter().enumerate() {
            let parent = &path[..idx];
            client.sadd(&self.layout.children(parent), name).await?;
            if !parent.is_empty() {
                client.del(&self.layout.leaf(parent)).await?;
            }
        }
        Ok(())
    }

    async fn set_remote(&self, path: &[String], value: &Value) -> Result<(), AnyError> {
        let client = self.client.as_ref();
        remove(client, &self.layout, path.to_vec()).await?;
        self.add_keys(path).await?;
        write(client, &self.layout, path.to_vec(), value).await
    }

    async fn reset_remote(&mut self) -> Result<(), AnyError> {
        remove(self.client.as_ref(), &self.layout, Vec::new()).await?;
        self.cache.reset()?;
        Ok(())
    }
}

#[async_trait]
impl Store for RedisStore {
    fn kind(&self) -> &str {
        "redis"
    }

    fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all_async()
    }

    async fn get_async(&mut self, key: &str) -> Result<Option<Value>, AnyError> {
        let path = self.path(key);
        if self.cached(&path) {
            trace!("Serving {} from cache", key);
            return self.cache.get(key);
        }
        let value = fetch(self.client.as_ref(), &self.layout, path.clone()).await?;
        if let Some(value) = &value {
            if !path.is_empty() {
                self.cache.set(&self.cache_key(&path), value.clone())?;
            }
        }
        Ok(value)
    }

    async fn set_async(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        if self.read_only {
            return Ok(false);
        }
        let path = self.path(key);
        if path.is_empty() && !value.is_object() {
            return Ok(false);
        }
        self.set_remote(&path, &value).await?;
        self.cache.set(key, value)?;
        Ok(true)
    }

    async fn clear_async(&mut self, key: &str) -> Result<bool, AnyError> {
        if self.read_only {
            return Ok(false);
        }
        let path = self.path(key);
        let (last, parent) = match path.split_last() {
            Some(split) => split,
            None => {
                self.reset_remote().await?;
                return Ok(true);
            }
        };
        let client = self.client.as_ref();
        let siblings = self.layout.children(parent);
        let members = client.smembers(&siblings).await?;
        if !members.contains(last) {
            trace!("Nothing to clear under {}", key);
            return Ok(false);
        }
        client.srem(&siblings, last).await?;
        remove(client, &self.layout, path.clone()).await?;
        if members.len() == 1 && !parent.is_empty() {
            // The parent stays as an empty object
            client.set(&self.layout.leaf(parent), EMPTY_OBJECT).await?;
        }
        self.cache.clear(key)?;
        Ok(true)
    }

    async fn merge_async(&mut self, key: &str, value: Value) -> Result<bool, AnyError> {
        if self.read_only {
            return Ok(false);
        }
        if !value.is_object() {
            return self.set_async(key, value).await;
        }
        let path = self.path(key);
        self.add_keys(&path).await?;
        if let Value::Object(map) = &value {
            merge(self.client.as_ref(), &self.layout, path.clone(), map).await?;
        }
        if self.cached(&path) {
            self.cache.merge(key, value)?;
        } else {
            // Only part of the object is known locally
            self.cache.clear(key)?;
        }
        Ok(true)
    }

    async fn reset_async(&mut self) -> Result<bool, AnyError> {
        if self.read_only {
            return Ok(false);
        }
        self.reset_remote().await?;
        Ok(true)
    }

    async fn load_async(&mut self) -> Result<Value, AnyError> {
        let tree = fetch(self.client.as_ref(), &self.layout, Vec::new())
            .await?
            .unwrap_or_else(|| Value::Object(Map::new()));
        self.cache.reset()?;
        if let Value::Object(map) = &tree {
            for (name, value) in map {
                self.cache.set(&self.cache_key(&[name.clone()]), value.clone())?;
            }
        }
        debug!("Loaded redis namespace {}", self.layout.namespace);
        Ok(tree)
    }

    async fn save_async(&mut self, value: Option<&Value>) -> Result<Option<Value>, AnyError> {
        let map = match value {
            None => return Ok(None),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(RootNotObject.into()),
        };
        self.reset_remote().await?;
        for (name, value) in map {
            let path = vec![name.clone()];
            self.set_remote(&path, value).await?;
            self.cache.set(&self.cache_key(&path), value.clone())?;
        }
        Ok(Some(Value::Object(map.clone())))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::client::InMemoryClient;

    fn cached(client: &InMemoryClient) -> RedisStore {
        RedisStore::new(&StoreOptions::of_type("redis"), client.clone()).unwrap()
    }

    /// A store not caching anything.
    fn uncached(client: &InMemoryClient) -> RedisStore {
        let opts = StoreOptions::of_type("redis").set("ttl", 0);
        RedisStore::new(&opts, client.clone()).unwrap()
    }

    #[tokio::test]
    async fn empty_segments_kept() {
        let client = InMemoryClient::new();
        let mut store = cached(&client);
        assert!(store.set_async("a::b", json!(1)).await.unwrap());
        assert!(store.set_async("a:b", json!(2)).await.unwrap());
        assert!(client.keys().contains(&"strata:a::b".to_owned()));
        assert!(client.keys().contains(&"strata:a:b".to_owned()));

        let mut other = cached(&client);
        assert_eq!(Some(json!(1)), other.get_async("a::b").await.unwrap());
        assert_eq!(Some(json!(2)), other.get_async("a:b").await.unwrap());
        assert_eq!(Some(json!(1)), store.get_async("a::b").await.unwrap());
    }

    #[tokio::test]
    async fn nested_layout() {
        let client = InMemoryClient::new();
        let mut store = cached(&client);
        assert!(store
            .set_async("db", json!({"host": "h", "port": 1}))
            .await
            .unwrap());
        assert_eq!(
            vec![
                "strata:db:host",
                "strata:db:keys",
                "strata:db:port",
                "strata:keys",
            ],
            client.keys()
        );
        assert_eq!(
            Some("\"h\"".to_owned()),
            client.get("strata:db:host").await.unwrap()
        );

        let mut other = cached(&client);
        assert_eq!(Some(json!(1)), other.get_async("db:port").await.unwrap());
        assert_eq!(
            Some(json!({"host": "h", "port": 1})),
            other.get_async("db").await.unwrap()
        );
        assert_eq!(None, other.get_async("db:user").await.unwrap());
    }

    #[tokio::test]
    async fn set_replaces_subtree() {
        let client = InMemoryClient::new();
        let mut store = uncached(&client);
        store.set_async("db", json!({"host": "h"})).await.unwrap();
        store.set_async("db", json!({"port": 2})).await.unwrap();
        assert_eq!(Some(json!({"port": 2})), store.get_async("db").await.unwrap());
        store.set_async("db:port:deep", json!(true)).await.unwrap();
        assert_eq!(
            Some(json!({"port": {"deep": true}})),
            store.get_async("db").await.unwrap()
        );
        assert!(!store.set_async("", json!(1)).await.unwrap());
    }

    #[tokio::test]
    async fn merge_recurses() {
        let client = InMemoryClient::new();
        let mut store = cached(&client);
        store
            .set_async("db", json!({"host": "h", "opts": {"a": 1}, "old": "x"}))
            .await
            .unwrap();
        store
            .merge_async("db", json!({"opts": {"b": 2}, "old": {"now": "object"}}))
            .await
            .unwrap();
        let expected = json!({"host": "h", "opts": {"a": 1, "b": 2}, "old": {"now": "object"}});
        assert_eq!(Some(expected.clone()), store.get_async("db").await.unwrap());
        assert_eq!(Some(expected), uncached(&client).get_async("db").await.unwrap());

        store.merge_async("top", json!(5)).await.unwrap();
        assert_eq!(Some(json!(5)), uncached(&client).get_async("top").await.unwrap());
    }

    #[tokio::test]
    async fn merge_without_cache_refetches() {
        let client = InMemoryClient::new();
        let mut writer = uncached(&client);
        writer.set_async("db", json!({"host": "h"})).await.unwrap();

        let mut store = cached(&client);
        store.merge_async("db", json!({"port": 1})).await.unwrap();
        assert_eq!(
            Some(json!({"host": "h", "port": 1})),
            store.get_async("db").await.unwrap()
        );
    }

    #[tokio::test]
    async fn clear_keeps_parent() {
        let client = InMemoryClient::new();
        let mut store = uncached(&client);
        store.set_async("a:b:c", json!(5)).await.unwrap();
        assert!(store.clear_async("a:b").await.unwrap());
        assert_eq!(None, store.get_async("a:b:c").await.unwrap());
        assert_eq!(Some(json!({})), store.get_async("a").await.unwrap());
        assert!(!store.clear_async("nothing:here").await.unwrap());
        assert_eq!(vec!["strata:a", "strata:keys"], client.keys());

        store.set_async("a:x", json!(1)).await.unwrap();
        assert_eq!(Some(json!({"x": 1})), store.get_async("a").await.unwrap());
    }

    #[tokio::test]
    async fn reset_and_load() {
        let client = InMemoryClient::new();
        let mut store = cached(&client);
        store.set_async("a", json!(1)).await.unwrap();
        store.set_async("b:c", json!([1, 2])).await.unwrap();
        let loaded = uncached(&client).load_async().await.unwrap();
        assert_eq!(json!({"a": 1, "b": {"c": [1, 2]}}), loaded);

        assert!(store.reset_async().await.unwrap());
        assert!(client.keys().is_empty());
        assert_eq!(json!({}), store.load_async().await.unwrap());
        assert_eq!(Some(json!({})), store.get_async("").await.unwrap());
    }

    #[tokio::test]
    async fn save_round_trip() {
        let client = InMemoryClient::new();
        let mut store = cached(&client);
        store.set_async("stale", json!(1)).await.unwrap();
        let value = json!({"db": {"host": "h", "ports": [1, 2]}, "name": "app"});
        let saved = store.save_async(Some(&value)).await.unwrap();
        assert_eq!(Some(value.clone()), saved);
        assert_eq!(value, uncached(&client).load_async().await.unwrap());

        assert_eq!(None, store.save_async(None).await.unwrap());
        assert!(store.save_async(Some(&json!(3))).await.is_err());
        assert_eq!(value, store.load_async().await.unwrap());
    }

    #[tokio::test]
    async fn cache_within_ttl() {
        let client = InMemoryClient::new();
        let mut store = cached(&client);
        store.set_async("k", json!("cached")).await.unwrap();
        // Out of band change
        client.set("strata:k", "\"remote\"").await.unwrap();
        assert_eq!(Some(json!("cached")), store.get_async("k").await.unwrap());
        assert_eq!(
            Some(json!("remote")),
            uncached(&client).get_async("k").await.unwrap()
        );
    }

    #[tokio::test]
    async fn namespaces_separate() {
        let client = InMemoryClient::new();
        let opts = StoreOptions::of_type("redis").set("namespace", "other");
        let mut other = RedisStore::new(&opts, client.clone()).unwrap();
        other.set_async("a", json!(1)).await.unwrap();
        assert_eq!(None, cached(&client).get_async("a").await.unwrap());
        assert_eq!(vec!["other:a", "other:keys"], client.keys());
    }

    #[tokio::test]
    async fn read_only_refuses() {
        let client = InMemoryClient::new();
        let opts = StoreOptions::of_type("redis").read_only(true);
        let mut store = RedisStore::new(&opts, client.clone()).unwrap();
        assert!(!store.set_async("a", json!(1)).await.unwrap());
        assert!(!store.merge_async("a", json!({})).await.unwrap());
        assert!(!store.clear_async("a").await.unwrap());
        assert!(!store.reset_async().await.unwrap());
        assert!(client.keys().is_empty());
    }

    #[test]
    fn sync_unsupported() {
        let client = InMemoryClient::new();
        let store = cached(&client);
        assert!(store.get("a").is_err());
        assert!(!store.capabilities().get.is_sync());
    }

    #[test]
    fn bad_options() {
        let opts = StoreOptions::of_type("redis").set("port", "not a port");
        assert!(RedisStore::new(&opts, InMemoryClient::new()).is_err());
    }
}
