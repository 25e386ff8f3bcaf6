//! The three-state field value: `Unset`, `Null`, or `Value(T)`.
//!
//! This is the core representation described by spec §4.1: every declared
//! field on an entity stores one of these three states rather than a plain
//! `Option<T>`, so that "never observed" and "explicitly cleared" carry
//! distinct, bit-exact meaning across the network.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-wide marker for "never observed or assigned".
///
/// `Unset` is a unit type, not a value any user-supplied `T` could equal, so
/// identity comparison (`FieldValue::is_unset`) can never be fooled by a
/// type's own `PartialEq` impl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Unset;

impl fmt::Display for Unset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unset")
    }
}

/// A field's in-memory value: unobserved, explicitly null, or a concrete value.
///
/// Transitions between any two states are always legal (spec §3): assigning
/// `Null` over a `Value` clears it, assigning `Unset` (via [`FieldValue::reset`])
/// explicitly forgets it. `Null` and `Unset` are never silently interchanged by
/// this type itself — only by explicit caller action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<T> {
    /// Never observed from a server response and never assigned locally.
    Unset,
    /// Explicitly observed as, or assigned to, the absent value.
    Null,
    /// A concrete typed value.
    Value(T),
}

impl<T> Default for FieldValue<T> {
    fn default() -> Self {
        FieldValue::Unset
    }
}

impl<T> FieldValue<T> {
    /// O(1) identity check, analogous to spec §4.1's `is-unset`.
    #[inline]
    pub fn is_unset(&self) -> bool {
        matches!(self, FieldValue::Unset)
    }

    /// Type-narrowing predicate: true iff not `Unset`. When true, callers may
    /// treat the field as its declared (possibly nullable) type.
    #[inline]
    pub fn is_set(&self) -> bool {
        !self.is_unset()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    #[inline]
    pub fn is_value(&self) -> bool {
        matches!(self, FieldValue::Value(_))
    }

    /// Explicit reset back to `Unset` (Null → Unset is never implicit).
    #[inline]
    pub fn reset(&mut self) {
        *self = FieldValue::Unset;
    }

    /// View as `Option<&T>`, collapsing `Unset` and `Null` to `None`.
    pub fn as_option(&self) -> Option<&T> {
        match self {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> FieldValue<U> {
        match self {
            FieldValue::Unset => FieldValue::Unset,
            FieldValue::Null => FieldValue::Null,
            FieldValue::Value(v) => FieldValue::Value(f(v)),
        }
    }

    pub fn as_ref(&self) -> FieldValue<&T> {
        match self {
            FieldValue::Unset => FieldValue::Unset,
            FieldValue::Null => FieldValue::Null,
            FieldValue::Value(v) => FieldValue::Value(v),
        }
    }
}

impl<T: for<'de> Deserialize<'de>> FieldValue<T> {
    /// Builds a `FieldValue` from a JSON value already known to be present
    /// in a payload (used by derive-generated `apply_payload` impls, where
    /// `payload.get(name)` has already distinguished "present" from
    /// "absent"). `serde_json::Value::Null` becomes `Null`; anything else
    /// is deserialized as `T`.
    pub fn deserialize_from_value(raw: serde_json::Value) -> crate::error::GraphResult<Self> {
        if raw.is_null() {
            return Ok(FieldValue::Null);
        }
        serde_json::from_value(raw)
            .map(FieldValue::Value)
            .map_err(|err| crate::error::GraphError::Validation(crate::error::ValidationError::single(
                "<field>",
                err.to_string(),
            )))
    }
}

impl<T> From<Option<T>> for FieldValue<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => FieldValue::Value(v),
            None => FieldValue::Null,
        }
    }
}

/// Serializes the way the wire contract requires: `Unset` is never reached
/// because `to_input` never emits an `Unset` field at all (see `entity::to_input`);
/// this impl exists for completeness and for any field nested inside a value
/// that itself gets serialized directly.
impl<T: Serialize> Serialize for FieldValue<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            FieldValue::Unset => serializer.serialize_none(),
            FieldValue::Null => serializer.serialize_none(),
            FieldValue::Value(v) => v.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldValue<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // A field present in a server payload is always either a value or an
        // explicit JSON null; "missing" is handled by callers via
        // `#[serde(default)]` before this impl ever runs.
        let opt = Option::<T>::deserialize(deserializer)?;
        Ok(match opt {
            Some(v) => FieldValue::Value(v),
            None => FieldValue::Null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_is_unset_and_not_set() {
        let v: FieldValue<i32> = FieldValue::Unset;
        assert!(v.is_unset());
        assert!(!v.is_set());
    }

    #[test]
    fn value_is_set_and_not_unset() {
        let v = FieldValue::Value(5);
        assert!(v.is_set());
        assert!(!v.is_unset());
        assert!(!v.is_null());
    }

    #[test]
    fn null_is_distinct_from_unset() {
        let n: FieldValue<i32> = FieldValue::Null;
        let u: FieldValue<i32> = FieldValue::Unset;
        assert_ne!(n, u);
        assert!(n.is_set());
        assert!(n.is_null());
    }

    #[test]
    fn reset_goes_back_to_unset_explicitly() {
        let mut v = FieldValue::Value(5);
        v.reset();
        assert!(v.is_unset());
    }
}
