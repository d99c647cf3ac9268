//! Positional call arguments.

use crate::error::ErrorPayload;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered positional arguments of a call.
///
/// A JSON array converts into one argument per element, any other value becomes a single
/// argument. Use [`Args::single`] to pass an array as one argument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Args(Vec<Value>);

impl Args {
    /// Empty argument list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Wraps `value` as the only argument, even when it is an array.
    #[must_use]
    pub fn single(value: Value) -> Self {
        Self(vec![value])
    }

    /// Number of positional arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the argument at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Deserialize the argument at `index`.
    ///
    /// A missing argument is read as `null`, so `Option<T>` parameters may be omitted.
    ///
    /// # Errors
    ///
    /// Returns an `invalidArguments` payload when the value does not fit `T`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, ErrorPayload> {
        let value = self.0.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            ErrorPayload::invalid_arguments(format!("argument {index}: {e}"))
        })
    }

    /// Iterate over the arguments in order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }

    /// Consume into the underlying list.
    #[must_use]
    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

impl From<Value> for Args {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(values) => Self(values),
            other => Self(vec![other]),
        }
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl From<()> for Args {
    fn from((): ()) -> Self {
        Self::new()
    }
}

impl IntoIterator for Args {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_scalar_is_one_argument() {
        let args = Args::from(json!(5));
        assert_eq!(args.len(), 1);
        assert_eq!(args.arg::<i64>(0).unwrap(), 5);
    }

    #[test]
    fn test_array_is_positional() {
        assert!(Args::from(json!([])).is_empty());

        let args = Args::from(json!(["foo", "bar"]));
        assert_eq!(args.len(), 2);
        assert_eq!(args.get(1), Some(&json!("bar")));
    }

    #[test]
    fn test_single_keeps_array_whole() {
        let args = Args::single(json!([1, 2, 3]));
        assert_eq!(args.len(), 1);
        assert_eq!(args.arg::<Vec<u8>>(0).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_bad_argument_type() {
        let args = Args::from(json!(["not a number"]));
        let err = args.arg::<u32>(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);

        // Missing arguments read as null.
        assert_eq!(args.arg::<Option<u32>>(3).unwrap(), None);
    }
}
