//! Addressing of nested values.
//!
//! A key like `database:host` addresses the `host` property of the `database` object. This
//! module turns such keys into paths of segments and back and provides the deep merge used to
//! combine objects coming from multiple stores.

use serde_json::{Map, Value};

/// The separator used to address nested keys unless configured otherwise.
pub const DEFAULT_ACCESS_SEPARATOR: &str = ":";

/// The alternate separator translated to the access separator on input.
///
/// This allows environment variables like `DATABASE__HOST` to address `DATABASE:HOST`.
pub const DEFAULT_INPUT_SEPARATOR: &str = "__";

/// Splits a key into its path segments.
///
/// An empty key addresses the root and produces an empty path.
///
/// ```rust
/// assert_eq!(vec!["a", "b"], strata::keypath::path("a:b", ":"));
/// assert!(strata::keypath::path("", ":").is_empty());
/// ```
pub fn path(key: &str, separator: &str) -> Vec<String> {
    if key.is_empty() {
        return Vec::new();
    }
    if separator.is_empty() {
        return vec![key.to_owned()];
    }
    key.split(separator).map(str::to_owned).collect()
}

/// Joins segments into a key with the default separator, skipping empty ones.
pub fn key<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keyed(DEFAULT_ACCESS_SEPARATOR, segments)
}

/// Joins segments into a key with the given separator, skipping empty ones.
///
/// ```rust
/// assert_eq!("ns:a:b", strata::keypath::keyed(":", &["ns", "", "a", "b"]));
/// ```
pub fn keyed<I, S>(separator: &str, segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .filter(|s| !s.as_ref().is_empty())
        .fold(String::new(), |mut acc, s| {
            if !acc.is_empty() {
                acc.push_str(separator);
            }
            acc.push_str(s.as_ref());
            acc
        })
}

/// Is the value an object (a node that can hold named children)?
pub fn is_object(value: &Value) -> bool {
    value.is_object()
}

/// Truthiness of a value, as used by [`Provider::any`][crate::Provider::any].
///
/// `null`, `false`, zero, `NaN` and the empty string are falsy, everything else (including empty
/// objects and arrays) is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Deep-merges objects, earlier ones taking precedence.
///
/// Keys are united. When two objects both have an object under the same key, these are merged
/// recursively. Any other collision (scalars, arrays, an object against a scalar) is won by the
/// earlier object. Arrays are not merged element-wise.
///
/// Values that are not objects are ignored. The result is always an object.
///
/// ```rust
/// use serde_json::json;
///
/// let merged = strata::keypath::merge_all(vec![
///     json!({"db": {"host": "a"}}),
///     json!({"db": {"host": "b", "port": 1}}),
/// ]);
/// assert_eq!(json!({"db": {"host": "a", "port": 1}}), merged);
/// ```
pub fn merge_all<I>(objects: I) -> Value
where
    I: IntoIterator<Item = Value>,
{
    let mut result = Map::new();
    for object in objects {
        if let Value::Object(map) = object {
            merge_under(&mut result, map);
        }
    }
    Value::Object(result)
}

// Merges `lower` under `upper` ‒ whatever is already in `upper` stays.
fn merge_under(upper: &mut Map<String, Value>, lower: Map<String, Value>) {
    for (key, lower_val) in lower {
        match upper.get_mut(&key) {
            None => {
                upper.insert(key, lower_val);
            }
            Some(Value::Object(upper_obj)) => {
                if let Value::Object(lower_obj) = lower_val {
                    merge_under(upper_obj, lower_obj);
                }
            }
            Some(_) => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn split_paths() {
        assert_eq!(vec!["a"], path("a", ":"));
        assert_eq!(vec!["a", "b", "c"], path("a:b:c", ":"));
        assert_eq!(vec!["a", "b"], path("a__b", "__"));
        assert!(path("", ":").is_empty());
        // Empty segments are kept, the path is never reordered or compacted
        assert_eq!(vec!["a", "", "b"], path("a::b", ":"));
    }

    #[test]
    fn join_keys() {
        assert_eq!("a:b:c", key(&["a", "b", "c"]));
        assert_eq!("a:c", key(vec!["a".to_owned(), String::new(), "c".to_owned()]));
        assert_eq!("a.b", keyed(".", &["a", "b"]));
        assert_eq!("", key(Vec::<String>::new()));
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!(-1)));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn merge_earlier_wins() {
        let merged = merge_all(vec![
            json!({"a": 1, "nested": {"x": "first", "list": [1, 2]}}),
            json!({"a": 2, "b": 3, "nested": {"x": "second", "y": true, "list": [3]}}),
            json!({"c": {"deep": {"z": 0}}, "nested": "scalar loses"}),
        ]);
        assert_eq!(
            json!({
                "a": 1,
                "nested": {"x": "first", "list": [1, 2], "y": true},
                "b": 3,
                "c": {"deep": {"z": 0}},
            }),
            merged
        );
    }

    #[test]
    fn merge_scalar_over_object() {
        let merged = merge_all(vec![json!({"a": "scalar"}), json!({"a": {"b": 1}})]);
        assert_eq!(json!({"a": "scalar"}), merged);
    }

    #[test]
    fn merge_ignores_non_objects() {
        assert_eq!(json!({}), merge_all(vec![json!(1), json!([1]), json!(null)]));
        assert_eq!(json!({"a": 1}), merge_all(vec![json!("x"), json!({"a": 1})]));
    }
}
