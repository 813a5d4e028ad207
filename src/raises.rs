//! Assert that a block fails with a particular error type.
//!
//! ```rust
//! use zest::raises::{raises, Raisable};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("bad value {0}")]
//! struct BadValue(String);
//!
//! impl Raisable for BadValue {
//!     fn args(&self) -> Vec<serde_json::Value> {
//!         vec![self.0.clone().into()]
//!     }
//! }
//!
//! let trapped = raises::<BadValue>()
//!     .in_args("bar")
//!     .run(|| Err::<(), _>(BadValue("foobar".into())))
//!     .unwrap();
//! assert_eq!(trapped.0, "foobar");
//! ```

use crate::error::short_type_name;
use crate::unwind;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

/// Error attributes that keyword assertions can inspect.
pub trait Raisable: fmt::Display + fmt::Debug + Send + Sync + 'static {
    /// Positional arguments. Defaults to the display message.
    fn args(&self) -> Vec<Value> {
        vec![Value::String(self.to_string())]
    }

    /// Named attribute, if the error has one.
    fn attr(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// Read attribute `name` from the serialized form of `value`.
pub fn serde_attr<T: Serialize>(value: &T, name: &str) -> Option<Value> {
    serde_json::to_value(value).ok()?.get(name).cloned()
}

/// Positional arguments from the serialized form of `value`: the elements of
/// a sequence, the field values of a struct, or the value itself.
pub fn serde_args<T: Serialize>(value: &T) -> Vec<Value> {
    match serde_json::to_value(value) {
        Ok(Value::Array(items)) => items,
        Ok(Value::Object(fields)) => fields.into_iter().map(|(_, v)| v).collect(),
        Ok(Value::Null) | Err(_) => Vec::new(),
        Ok(other) => vec![other],
    }
}

/// A panic, trappable with `raises::<Panicked>()`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct Panicked {
    pub message: String,
    pub location: Option<String>,
}

impl Raisable for Panicked {
    fn attr(&self, name: &str) -> Option<Value> {
        match name {
            "message" => Some(Value::String(self.message.clone())),
            "location" => self.location.clone().map(Value::String),
            _ => None,
        }
    }
}

impl Raisable for crate::ZestError {}

#[derive(Debug, thiserror::Error)]
pub enum RaisesError {
    #[error("expected {0} but nothing was raised.")]
    NothingRaised(String),

    #[error("{0}")]
    Mismatch(String),

    /// Some other error escaped the block. `kind` is its type name, kept
    /// so a test failing through `?` reports the original error type.
    #[error("{error}")]
    Unexpected { kind: String, error: anyhow::Error },
}

impl RaisesError {
    /// The escaped error when it was not the expected type.
    pub fn into_unexpected(self) -> Option<anyhow::Error> {
        match self {
            Self::Unexpected { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// The trapped error.
#[derive(Debug)]
pub struct Trapped<E> {
    pub error: E,
}

impl<E> Deref for Trapped<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.error
    }
}

/// Builder returned by [`raises`].
pub struct Raises<E> {
    checks: Vec<(String, Value)>,
    _marker: PhantomData<fn() -> E>,
}

/// Expect the block passed to [`Raises::run`] to fail with `E`.
pub fn raises<E: Raisable>() -> Raises<E> {
    Raises {
        checks: Vec::new(),
        _marker: PhantomData,
    }
}

impl<E: Raisable> Raises<E> {
    /// Add a keyword assertion.
    ///
    /// Keys starting with `in_args` look in the positional arguments, keys
    /// `in_X` look inside attribute `X`, any other key compares attribute
    /// `key` for equality.
    pub fn expect(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.checks.push((key.into(), value));
        self
    }

    pub fn in_args(self, value: impl Serialize) -> Self {
        self.expect("in_args", value)
    }

    pub fn in_attr(self, attr: &str, value: impl Serialize) -> Self {
        self.expect(format!("in_{}", attr), value)
    }

    pub fn attr_eq(self, attr: &str, value: impl Serialize) -> Self {
        self.expect(attr, value)
    }

    /// Run `f` and trap an `E`; any other error is handed back untouched.
    pub fn run<T, X>(self, f: impl FnOnce() -> Result<T, X>) -> Result<Trapped<E>, RaisesError>
    where
        X: Into<anyhow::Error>,
    {
        let (kind, err): (String, anyhow::Error) = match unwind::catch(f) {
            Ok(Ok(_)) => return Err(RaisesError::NothingRaised(short_type_name::<E>())),
            Ok(Err(x)) => (short_type_name::<X>(), x.into()),
            Err(panic) => {
                let as_error = anyhow::Error::new(Panicked {
                    message: panic.message.clone(),
                    location: panic.location.clone(),
                });
                if !as_error.is::<E>() {
                    panic.resume();
                }
                (short_type_name::<Panicked>(), as_error)
            }
        };

        let error = err
            .downcast::<E>()
            .map_err(|error| RaisesError::Unexpected { kind, error })?;
        self.check(&error)?;
        Ok(Trapped { error })
    }

    fn check(&self, error: &E) -> Result<(), RaisesError> {
        for (key, expected) in &self.checks {
            if key.starts_with("in_args") {
                let args = error.args();
                if !args.iter().any(|a| contains(a, expected)) {
                    return Err(RaisesError::Mismatch(format!(
                        "expected exception to have '{}' in some arg but not found in {}",
                        display(expected),
                        Value::Array(args)
                    )));
                }
            } else if let Some(attr) = key.strip_prefix("in_") {
                let found = error.attr(attr).unwrap_or(Value::Null);
                if !contains(&found, expected) {
                    return Err(RaisesError::Mismatch(format!(
                        "expected exception to have '{}' in key '{}'. Found '{}'",
                        display(expected),
                        attr,
                        display(&found)
                    )));
                }
            } else {
                let found = error.attr(key).unwrap_or(Value::Null);
                if &found != expected {
                    return Err(RaisesError::Mismatch(format!(
                        "expected exception to have '{}' == '{}'. Found '{}'",
                        key,
                        display(expected),
                        display(&found)
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Substring for strings, membership for arrays, equality otherwise.
fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
        (Value::Array(items), n) => items.iter().any(|i| i == n),
        (h, n) => h == n,
    }
}

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
