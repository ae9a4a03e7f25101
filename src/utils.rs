//! Various utilities.
//!
//! All the little things that are useful through the strata's or user's code, and don't really
//! fit anywhere else.

use std::env;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::de::{Deserializer, Error as DeError, Unexpected};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;


/// Tries to turn a path into an absolute one.
///
/// Relative paths are resolved against `base` (or the current directory if no base is given).
/// Then the result is canonicalized if possible.
///
/// The function never fails. However, the substeps (finding current directory to make it absolute
/// and canonization) might fail. In such case, the failing step is skipped.
///
/// # Examples
///
/// ```rust
/// use std::path::Path;
///
/// let path = strata::utils::absolute_path(Path::new("config.json"), None);
/// assert!(path.is_absolute());
/// ```
pub fn absolute_path(path: &Path, base: Option<&Path>) -> PathBuf {
    let mut current = match base {
        Some(base) if base.is_absolute() => base.to_owned(),
        _ => {
            let mut cwd = env::current_dir().unwrap_or_else(|e| {
                warn!(
                    "Some paths may not be turned to absolute. Couldn't read current dir: {}",
                    e,
                );
                PathBuf::new()
            });
            if let Some(base) = base {
                cwd.push(base);
            }
            cwd
        }
    };
    current.push(path);
    if let Ok(canonicized) = current.canonicalize() {
        canonicized
    } else {
        current
    }
}

/// Opportunistically turns a string into a typed value.
///
/// Strings holding a JSON literal (numbers, `true`, `false`, `null`, arrays, objects) are parsed.
/// The string `undefined` turns into no value at all. Everything else, including non-string
/// values, is returned as is.
///
/// ```rust
/// use serde_json::json;
/// use strata::utils::parse_value;
///
/// assert_eq!(Some(json!(42)), parse_value(json!("42")));
/// assert_eq!(Some(json!(false)), parse_value(json!("false")));
/// assert_eq!(Some(json!("hello")), parse_value(json!("hello")));
/// assert_eq!(None, parse_value(json!("undefined")));
/// ```
pub fn parse_value(value: Value) -> Option<Value> {
    match value {
        Value::String(s) if s == "undefined" => None,
        Value::String(s) => Some(serde_json::from_str(&s).unwrap_or(Value::String(s))),
        other => Some(other),
    }
}

/// A wrapper to hide a configuration field from logs.
///
/// This acts in as much transparent way as possible towards the field inside. It only replaces the
/// [`Debug`] and [`Serialize`] implementations with returning `"******"`.
///
/// The idea is if the configuration contains passwords, they shouldn't leak into the logs.
/// Therefore, wrap them in this, eg:
///
/// ```rust
/// use std::io::Write;
/// use std::str;
///
/// use strata::utils::Hidden;
///
/// #[derive(Debug)]
/// # #[allow(dead_code)]
/// struct Auth {
///     username: String,
///     password: Hidden<String>,
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let auth = Auth {
///     username: "me".to_owned(),
///     password: "secret".to_owned().into(),
/// };
///
/// let mut buffer: Vec<u8> = Vec::new();
/// write!(&mut buffer, "{:?}", auth)?;
/// assert_eq!(r#"Auth { username: "me", password: "******" }"#, str::from_utf8(&buffer)?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Hidden<T>(pub T);

impl<T> From<T> for Hidden<T> {
    fn from(val: T) -> Self {
        Hidden(val)
    }
}

impl<T> Deref for Hidden<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Hidden<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T> Debug for Hidden<T> {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "\"******\"")
    }
}

impl<T> Serialize for Hidden<T> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str("******")
    }
}

/// Serialize a duration in a human friendly form.
pub fn serialize_duration<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*dur).to_string())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Human(String),
}

/// Deserialize an `Option<Duration>`.
///
/// Both human-friendly representations handled by the [`humantime`] crate (`30s`, `1h 30m`)
/// and plain integers, taken as milliseconds, are accepted. It should be paired with
/// [`serialize_opt_duration`]. To act like [`Option`] does when deserializing by default, the
/// `#[serde(default)]` is recommended.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
/// struct Cfg {
///     #[serde(
///         serialize_with = "strata::utils::serialize_opt_duration",
///         deserialize_with = "strata::utils::deserialize_opt_duration",
///         default,
///     )]
///     ttl: Option<Duration>,
/// }
///
/// let cfg: Cfg = serde_json::from_str(r#"{"ttl": "2m"}"#).unwrap();
/// assert_eq!(Some(Duration::from_secs(120)), cfg.ttl);
/// let cfg: Cfg = serde_json::from_str(r#"{"ttl": 1500}"#).unwrap();
/// assert_eq!(Some(Duration::from_millis(1500)), cfg.ttl);
/// ```
pub fn deserialize_opt_duration<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<Duration>, D::Error> {
    match Option::<RawDuration>::deserialize(d)? {
        Some(RawDuration::Millis(ms)) => Ok(Some(Duration::from_millis(ms))),
        Some(RawDuration::Human(dur)) => humantime::parse_duration(&dur)
            .map_err(|_| DeError::invalid_value(Unexpected::Str(&dur), &"Human readable duration"))
            .map(Some),
        None => Ok(None),
    }
}

/// Serialize an `Option<Duration>` in a human friendly form.
///
/// See the [`deserialize_opt_duration`] for more details and an example.
pub fn serialize_opt_duration<S: Serializer>(
    dur: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match dur {
        Some(d) => serialize_duration(d, s),
        None => s.serialize_none(),
    }
}
