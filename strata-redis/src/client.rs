//! Access to the server.
//!
//! The store needs only a handful of commands, described by the [`RemoteClient`] trait. The real
//! server is reached through [`RedisClient`] (with the `redis` feature), [`InMemoryClient`] keeps
//! everything inside the process.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use strata::AnyError;

/// The commands the store uses.
///
/// Missing keys behave like in redis ‒ reading them returns nothing or an empty set, deleting
/// them is not an error.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Members of a set.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, AnyError>;

    /// Adds a member to a set.
    async fn sadd(&self, key: &str, member: &str) -> Result<(), AnyError>;

    /// Removes a member from a set.
    async fn srem(&self, key: &str, member: &str) -> Result<(), AnyError>;

    /// Reads a string.
    async fn get(&self, key: &str) -> Result<Option<String>, AnyError>;

    /// Writes a string.
    async fn set(&self, key: &str, value: &str) -> Result<(), AnyError>;

    /// Deletes a key of any type.
    async fn del(&self, key: &str) -> Result<(), AnyError>;
}

#[derive(Debug, Default)]
struct Data {
    strings: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// A client keeping the data in memory.
///
/// Clones share the same data, so several stores (or a store and a test) can look at the same
/// "server". Like the real server, sets disappear when their last member is removed.
#[derive(Clone, Debug, Default)]
pub struct InMemoryClient {
    data: Arc<Mutex<Data>>,
}

impl InMemoryClient {
    /// Creates an empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// All the keys present, sorted.
    pub fn keys(&self) -> Vec<String> {
        let data = self.data.lock();
        let mut keys = data
            .strings
            .keys()
            .chain(data.sets.keys())
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }
}

#[async_trait]
impl RemoteClient for InMemoryClient {
    async fn smembers(&self, key: &str) -> Result<Vec<String>, AnyError> {
        let data = self.data.lock();
        Ok(data
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), AnyError> {
        let mut data = self.data.lock();
        if data.strings.contains_key(key) {
            return Err(format!("WRONGTYPE {} holds a string", key).into());
        }
        data.sets
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), AnyError> {
        let mut data = self.data.lock();
        if let Some(set) = data.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                data.sets.remove(key);
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AnyError> {
        Ok(self.data.lock().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AnyError> {
        let mut data = self.data.lock();
        data.sets.remove(key);
        data.strings.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), AnyError> {
        let mut data = self.data.lock();
        data.strings.remove(key);
        data.sets.remove(key);
        Ok(())
    }
}

#[cfg(feature = "redis")]
mod real {
    use futures_util::lock::Mutex as AsyncMutex;
    use log::debug;
    use redis_rs::aio::MultiplexedConnection;
    use redis_rs::{AsyncCommands, Client};

    use super::*;
    use crate::options::RedisOptions;

    /// A client talking to a redis server.
    ///
    /// The connection is opened on the first command and then shared.
    pub struct RedisClient {
        client: Client,
        connection: AsyncMutex<Option<MultiplexedConnection>>,
    }

    impl RedisClient {
        /// Creates the client.
        ///
        /// This only checks the connection parameters, no connection is made yet.
        pub fn new(settings: &RedisOptions) -> Result<Self, AnyError> {
            let client = Client::open(settings.url())?;
            Ok(RedisClient {
                client,
                connection: AsyncMutex::new(None),
            })
        }

        async fn connection(&self) -> Result<MultiplexedConnection, AnyError> {
            let mut guard = self.connection.lock().await;
            if let Some(conn) = guard.as_ref() {
                return Ok(conn.clone());
            }
            debug!("Connecting to redis");
            let conn = self.client.get_multiplexed_tokio_connection().await?;
            *guard = Some(conn.clone());
            Ok(conn)
        }
    }

    #[async_trait]
    impl RemoteClient for RedisClient {
        async fn smembers(&self, key: &str) -> Result<Vec<String>, AnyError> {
            let mut conn = self.connection().await?;
            Ok(conn.smembers(key).await?)
        }

        async fn sadd(&self, key: &str, member: &str) -> Result<(), AnyError> {
            let mut conn = self.connection().await?;
            conn.sadd::<_, _, ()>(key, member).await?;
            Ok(())
        }

        async fn srem(&self, key: &str, member: &str) -> Result<(), AnyError> {
            let mut conn = self.connection().await?;
            conn.srem::<_, _, ()>(key, member).await?;
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>, AnyError> {
            let mut conn = self.connection().await?;
            Ok(conn.get(key).await?)
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), AnyError> {
            let mut conn = self.connection().await?;
            conn.set::<_, _, ()>(key, value).await?;
            Ok(())
        }

        async fn del(&self, key: &str) -> Result<(), AnyError> {
            let mut conn = self.connection().await?;
            conn.del::<_, ()>(key).await?;
            Ok(())
        }
    }
}

#[cfg(feature = "redis")]
pub use self::real::RedisClient;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sets_vanish_when_empty() {
        let client = InMemoryClient::new();
        client.sadd("s", "a").await.unwrap();
        client.sadd("s", "b").await.unwrap();
        client.sadd("s", "a").await.unwrap();
        assert_eq!(vec!["a", "b"], client.smembers("s").await.unwrap());
        client.srem("s", "a").await.unwrap();
        client.srem("s", "b").await.unwrap();
        assert!(client.keys().is_empty());
        assert!(client.smembers("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn strings_and_sets() {
        let client = InMemoryClient::new();
        let shared = client.clone();
        client.set("k", "v").await.unwrap();
        assert_eq!(Some("v".to_owned()), shared.get("k").await.unwrap());
        assert!(shared.sadd("k", "x").await.is_err());
        shared.del("k").await.unwrap();
        shared.del("missing").await.unwrap();
        assert_eq!(None, client.get("k").await.unwrap());
    }
}
