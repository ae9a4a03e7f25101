//! Error handling utilities.
//!
//! Most of the errors flowing through the crate are just boxed standard errors ([`AnyError`]),
//! enriched with context by the [`err_context`] crate. The few failures the layering engine
//! itself produces have their own types, so the caller can tell them apart by downcasting.

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// A wrapper type for any error.
///
/// This is just a type alias for boxed standard error. Any errors go and this is guaranteed to be
/// fully compatible.
pub type AnyError = Box<dyn Error + Send + Sync>;

/// No store backend is registered under the requested type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnknownStoreType(pub String);

impl Display for UnknownStoreType {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Cannot add store with unknown type: {}", self.0)
    }
}

impl Error for UnknownStoreType {}

/// Something else than an object was merged into the top level, without a key.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NonObjectMerge;

impl Display for NonObjectMerge {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Cannot merge non-Object into top-level")
    }
}

impl Error for NonObjectMerge {}

/// Some of the keys passed to [`Provider::required`][crate::Provider::required] have no value.
///
/// All the missing keys are listed, not only the first one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MissingKeys(pub Vec<String>);

impl Display for MissingKeys {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Missing required keys: {}", self.0.join(", "))
    }
}

impl Error for MissingKeys {}

/// The store can't be loaded at all.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NoLoad(pub String);

impl Display for NoLoad {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Store {} has no load method", self.0)
    }
}

impl Error for NoLoad {}

/// The store can be loaded only asynchronously, but a synchronous load was requested.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NoLoadSync(pub String);

impl Display for NoLoadSync {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Store {} has no synchronous load method", self.0)
    }
}

impl Error for NoLoadSync {}

/// An operation was invoked on a store that doesn't implement it in that mode.
///
/// The [`Provider`][crate::Provider] consults the capabilities of each store first, so seeing
/// this one usually means a store declares a capability it doesn't really have.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Unsupported {
    /// The type of the store.
    pub kind: String,
    /// The operation that was attempted.
    pub operation: &'static str,
}

impl Display for Unsupported {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(
            fmt,
            "Store {} doesn't support the {} operation",
            self.kind, self.operation
        )
    }
}

impl Error for Unsupported {}

/// The whole content of a store can be replaced only by an object.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RootNotObject;

impl Display for RootNotObject {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        write!(fmt, "Value to be stored at the root must be an object")
    }
}

impl Error for RootNotObject {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_lists_all() {
        let err = MissingKeys(vec!["a".to_owned(), "b:c".to_owned()]);
        assert_eq!("Missing required keys: a, b:c", err.to_string());
    }

    #[test]
    fn unknown_type_message() {
        let err: AnyError = UnknownStoreType("Mongo".to_owned()).into();
        assert_eq!("Cannot add store with unknown type: Mongo", err.to_string());
        assert!(err.downcast_ref::<UnknownStoreType>().is_some());
    }
}
