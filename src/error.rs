//! Error and outcome types.
//!
//! Test bodies return [`TestResult`]. A [`Failure`] is either the skip signal
//! or an ordinary error; the engine turns it into a [`TestOutcome`].

use crate::raises::RaisesError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Errors raised by the runner itself rather than by a test body.
#[derive(Debug, thiserror::Error)]
pub enum ZestError {
    /// A hook named `_begin` was registered.
    #[error("A _begin function was declared. Maybe you meant _before?")]
    BeginHook,

    #[error("failed to access '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid result record: {0}")]
    Record(#[from] serde_json::Error),
}

impl ZestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A per-test error with enough detail to display and serialize it.
#[derive(Debug, Clone, PartialEq)]
pub struct TestError {
    /// Short type name of the underlying error, e.g. `ParseIntError`.
    pub kind: String,
    pub message: String,
    /// Multi-line rendering including causes and, for panics, the location.
    pub formatted: Vec<String>,
}

impl TestError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let kind = kind.into();
        let message = message.into();
        let formatted = vec![format!("{}: {}", kind, message)];
        Self {
            kind,
            message,
            formatted,
        }
    }

    /// Build from an `anyhow::Error`, keeping its cause chain.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let mut formatted: Vec<String> = format!("{:?}", err)
            .lines()
            .map(str::to_string)
            .collect();
        if formatted.is_empty() {
            formatted.push(err.to_string());
        }
        Self {
            kind: "Error".to_string(),
            message: err.to_string(),
            formatted,
        }
    }

    pub fn to_recorded(&self) -> RecordedError {
        RecordedError {
            kind: self.kind.clone(),
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Why a test body did not pass.
///
/// Deliberately not a `std::error::Error` so that any error type converts
/// into it with `?`.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// The skip signal, carrying a human readable reason.
    Skip(String),
    Error(TestError),
}

impl Failure {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }

    /// An ordinary failure with a free-form message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Error(TestError::new("Failure", message))
    }

    pub fn from_anyhow(err: anyhow::Error) -> Self {
        Self::Error(TestError::from_anyhow(&err))
    }
}

impl<E> From<E> for Failure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let any: &dyn std::any::Any = &err;
        if let Some(RaisesError::Unexpected { kind, error }) = any.downcast_ref::<RaisesError>() {
            return Self::Error(TestError {
                kind: kind.clone(),
                ..TestError::from_anyhow(error)
            });
        }
        let mut formatted = vec![format!("{}: {}", short_type_name::<E>(), err)];
        let mut source = err.source();
        while let Some(cause) = source {
            formatted.push(format!("Caused by: {}", cause));
            source = cause.source();
        }
        Self::Error(TestError {
            kind: short_type_name::<E>(),
            message: err.to_string(),
            formatted,
        })
    }
}

/// Result type returned by test bodies and hooks.
pub type TestResult = Result<(), Failure>;

/// What became of one test body call.
#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    Passed,
    Failed(TestError),
    Skipped(String),
}

impl From<TestResult> for TestOutcome {
    fn from(result: TestResult) -> Self {
        match result {
            Ok(()) => Self::Passed,
            Err(Failure::Skip(reason)) => Self::Skipped(reason),
            Err(Failure::Error(err)) => Self::Failed(err),
        }
    }
}

/// Return types accepted from test bodies.
pub trait IntoTestResult {
    fn into_test_result(self) -> TestResult;
}

impl IntoTestResult for () {
    fn into_test_result(self) -> TestResult {
        Ok(())
    }
}

impl IntoTestResult for TestResult {
    fn into_test_result(self) -> TestResult {
        self
    }
}

impl IntoTestResult for anyhow::Result<()> {
    fn into_test_result(self) -> TestResult {
        self.map_err(Failure::from_anyhow)
    }
}

/// Serializable form of a test error, written as `Kind("message")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    pub kind: String,
    pub message: String,
}

impl fmt::Display for RecordedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // serde_json escapes the message the same way a string literal would
        let quoted = serde_json::to_string(&self.message).map_err(|_| fmt::Error)?;
        write!(f, "{}({})", self.kind, quoted)
    }
}

impl RecordedError {
    /// Parse the `Kind("message")` form. Anything else is kept as the kind.
    pub fn parse(text: &str) -> Self {
        if let Some(open) = text.find('(') {
            if let Some(inner) = text[open + 1..].strip_suffix(')') {
                if let Ok(message) = serde_json::from_str::<String>(inner) {
                    return Self {
                        kind: text[..open].to_string(),
                        message,
                    };
                }
            }
        }
        Self {
            kind: text.to_string(),
            message: String::new(),
        }
    }
}

impl Serialize for RecordedError {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordedError {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        Ok(Self::parse(&text))
    }
}

pub(crate) fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_std_error_with_short_kind() {
        let err = "x".parse::<i32>().unwrap_err();
        match Failure::from(err) {
            Failure::Error(e) => {
                assert_eq!(e.kind, "ParseIntError");
                assert!(e.message.contains("invalid digit"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn should_render_recorded_error_as_call_syntax() {
        let e = RecordedError {
            kind: "ValueError".into(),
            message: "bad \"quote\"".into(),
        };
        let text = e.to_string();
        assert_eq!(text, r#"ValueError("bad \"quote\"")"#);
        assert_eq!(RecordedError::parse(&text), e);
    }

    #[test]
    fn should_map_test_result_to_outcome() {
        assert_eq!(TestOutcome::from(Ok(())), TestOutcome::Passed);
        assert_eq!(
            TestOutcome::from(Err(Failure::skip("later"))),
            TestOutcome::Skipped("later".into())
        );
    }

    #[test]
    fn should_keep_anyhow_context_in_formatted_lines() {
        let err = anyhow::anyhow!("inner").context("outer");
        let e = TestError::from_anyhow(&err);
        assert_eq!(e.message, "outer");
        assert!(e.formatted.iter().any(|l| l.contains("inner")));
    }
}
