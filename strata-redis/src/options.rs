//! Configuration of the redis store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata::utils::{deserialize_opt_duration, serialize_opt_duration, Hidden};

/// How long values read from the server are served from the local cache, unless configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

fn default_namespace() -> String {
    "strata".to_owned()
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_port() -> u16 {
    6379
}

/// Credentials for the server.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    /// The user name, if the server uses ACLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// The password.
    pub password: Hidden<String>,
}

/// The backend specific options of the redis store.
///
/// ```rust
/// use std::time::Duration;
///
/// use serde_json::json;
/// use strata_redis::RedisOptions;
///
/// let opts: RedisOptions = serde_json::from_value(json!({
///     "namespace": "myapp",
///     "ttl": "5m",
///     "auth": {"password": "secret"},
/// })).unwrap();
/// assert_eq!("localhost", opts.host);
/// assert_eq!(Duration::from_secs(300), opts.ttl());
/// assert!(!format!("{:?}", opts).contains("secret"));
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisOptions {
    /// Prefix of all the keys the store uses on the server.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// The server host.
    #[serde(default = "default_host")]
    pub host: String,

    /// The server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The database number.
    #[serde(default)]
    pub db: u32,

    /// For how long values are served from the local cache.
    ///
    /// Either a human readable duration (`30s`) or a number of milliseconds. See [`DEFAULT_TTL`].
    #[serde(
        deserialize_with = "deserialize_opt_duration",
        serialize_with = "serialize_opt_duration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ttl: Option<Duration>,

    /// Credentials, if the server needs them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl RedisOptions {
    /// The cache time to live, with the default applied.
    pub fn ttl(&self) -> Duration {
        self.ttl.unwrap_or(DEFAULT_TTL)
    }

    /// The connection URL of the server.
    ///
    /// Note that the URL contains the password, if any.
    pub fn url(&self) -> String {
        let auth = match &self.auth {
            Some(auth) => format!(
                "{}:{}@",
                auth.username.as_deref().unwrap_or_default(),
                auth.password.as_str()
            ),
            None => String::new(),
        };
        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.db)
    }
}

impl Default for RedisOptions {
    fn default() -> Self {
        RedisOptions {
            namespace: default_namespace(),
            host: default_host(),
            port: default_port(),
            db: 0,
            ttl: None,
            auth: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults() {
        let opts: RedisOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(RedisOptions::default(), opts);
        assert_eq!("strata", opts.namespace);
        assert_eq!(6379, opts.port);
        assert_eq!(DEFAULT_TTL, opts.ttl());
        assert_eq!("redis://localhost:6379/0", opts.url());
    }

    #[test]
    fn ttl_in_millis() {
        let opts: RedisOptions = serde_json::from_value(json!({"ttl": 250})).unwrap();
        assert_eq!(Duration::from_millis(250), opts.ttl());
    }

    #[test]
    fn url_with_auth() {
        let opts: RedisOptions = serde_json::from_value(json!({
            "host": "cache.example.com",
            "port": 6380,
            "db": 2,
            "auth": {"username": "app", "password": "pw"},
        }))
        .unwrap();
        assert_eq!("redis://app:pw@cache.example.com:6380/2", opts.url());
        let serialized = serde_json::to_value(&opts).unwrap();
        assert_eq!(json!("******"), serialized["auth"]["password"]);
    }
}
