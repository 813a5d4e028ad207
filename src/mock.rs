//! Mock functions and the seams they are installed into.
//!
//! Code under test reaches a replaceable dependency through a [`Seam`]. A
//! test swaps the seam's implementation for a [`MockFunction`] with
//! [`mock`] (restored when the guard drops) or with
//! [`Zest::stack_mock`](crate::Zest::stack_mock) (restored when the
//! enclosing test finishes).

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Deref;
use std::rc::Rc;

#[derive(Debug, thiserror::Error)]
pub enum MockError {
    #[error("mock was called more times than the list_of_{0}_to_{1} had elements")]
    Exhausted(&'static str, &'static str),

    #[error("mock '{0}' was called but has no return value, exception or hook")]
    Unconfigured(String),

    #[error("'{name}' accepts {expected} positional arguments but was called with {given}")]
    TooManyArgs {
        name: String,
        expected: usize,
        given: usize,
    },

    #[error("argument '{0}' is missing")]
    MissingArgument(String),

    #[error("argument '{name}' has an unexpected type: {source}")]
    BadArgument {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("expected exactly one call but found {0}")]
    NotCalledOnce(usize),
}

/// Arguments of one call: positional values and keyword values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Call {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl Call {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.args.push(to_value(value));
        self
    }

    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Self {
        self.kwargs.insert(name.to_string(), to_value(value));
        self
    }

    /// Fetch an argument passed either at `index` or by `name`.
    pub fn get<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T, MockError> {
        let raw = self
            .args
            .get(index)
            .or_else(|| self.kwargs.get(name))
            .ok_or_else(|| MockError::MissingArgument(name.to_string()))?;
        serde_json::from_value(raw.clone()).map_err(|source| MockError::BadArgument {
            name: name.to_string(),
            source,
        })
    }

    /// Like [`get`](Self::get) but `None` when the argument was not passed.
    pub fn get_opt<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
    ) -> Result<Option<T>, MockError> {
        match self.get(index, name) {
            Ok(v) => Ok(Some(v)),
            Err(MockError::MissingArgument(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn normalize(&self, name: &str, params: &[String]) -> Result<BTreeMap<String, Value>, MockError> {
        if self.args.len() > params.len() {
            return Err(MockError::TooManyArgs {
                name: name.to_string(),
                expected: params.len(),
                given: self.args.len(),
            });
        }
        let mut normalized: BTreeMap<String, Value> = params
            .iter()
            .cloned()
            .zip(self.args.iter().cloned())
            .collect();
        normalized.extend(self.kwargs.clone());
        Ok(normalized)
    }
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| Value::String(format!("<unserializable: {}>", e)))
}

/// Build a [`Call`]: `call!(1, "x"; flag = true)`.
#[macro_export]
macro_rules! call {
    ($($arg:expr),* $(,)? $(; $($key:ident = $val:expr),* $(,)?)?) => {{
        #[allow(unused_mut)]
        let mut call = $crate::mock::Call::new();
        $( call = call.arg(&$arg); )*
        $($( call = call.kwarg(stringify!($key), &$val); )*)?
        call
    }};
}

type Hook<R> = Box<dyn FnMut(&Call) -> anyhow::Result<R>>;
type ErrorFactory = Box<dyn Fn() -> anyhow::Error>;

struct MockState<R> {
    name: String,
    params: Vec<String>,
    calls: Vec<Call>,
    hook: Option<Hook<R>>,
    exception_series: Option<VecDeque<anyhow::Error>>,
    exception: Option<ErrorFactory>,
    value_series: Option<VecDeque<R>>,
    value: Option<R>,
}

/// A substitute function that records its calls.
///
/// Cloning yields another handle to the same mock.
pub struct MockFunction<R> {
    inner: Rc<RefCell<MockState<R>>>,
}

impl<R> Clone for MockFunction<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: Clone + 'static> MockFunction<R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MockState {
                name: name.into(),
                params: Vec::new(),
                calls: Vec::new(),
                hook: None,
                exception_series: None,
                exception: None,
                value_series: None,
                value: None,
            })),
        }
    }

    /// Positional parameter names used by [`normalized_calls`](Self::normalized_calls).
    pub fn with_params<P: AsRef<str>>(self, params: impl IntoIterator<Item = P>) -> Self {
        self.inner.borrow_mut().params = params.into_iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn returns(&self, value: R) {
        self.inner.borrow_mut().value = Some(value);
    }

    pub fn returns_serially(&self, values: impl IntoIterator<Item = R>) {
        self.inner.borrow_mut().value_series = Some(values.into_iter().collect());
    }

    /// Fail every call with a fresh copy of `err`.
    pub fn exceptions<E>(&self, err: E)
    where
        E: std::error::Error + Clone + Send + Sync + 'static,
    {
        self.inner.borrow_mut().exception = Some(Box::new(move || anyhow::Error::new(err.clone())));
    }

    pub fn exceptions_serially<E: Into<anyhow::Error>>(&self, errors: impl IntoIterator<Item = E>) {
        self.inner.borrow_mut().exception_series = Some(errors.into_iter().map(Into::into).collect());
    }

    /// Delegate every call to `f`. Takes priority over all other behaviours.
    pub fn hook(&self, f: impl FnMut(&Call) -> anyhow::Result<R> + 'static) {
        self.inner.borrow_mut().hook = Some(Box::new(f));
    }

    /// Record the call and apply the configured behaviour.
    pub fn call(&self, call: Call) -> anyhow::Result<R> {
        let mut state = self.inner.borrow_mut();
        state.calls.push(call.clone());

        if let Some(mut hook) = state.hook.take() {
            // released so the hook may inspect this mock
            drop(state);
            let result = hook(&call);
            let mut state = self.inner.borrow_mut();
            if state.hook.is_none() {
                state.hook = Some(hook);
            }
            return result;
        }

        if let Some(series) = state.exception_series.as_mut() {
            return Err(series
                .pop_front()
                .unwrap_or_else(|| MockError::Exhausted("exceptions", "raise").into()));
        }
        if let Some(make) = &state.exception {
            return Err(make());
        }
        if let Some(series) = state.value_series.as_mut() {
            return series
                .pop_front()
                .ok_or_else(|| MockError::Exhausted("values", "return").into());
        }
        match &state.value {
            Some(v) => Ok(v.clone()),
            None => Err(MockError::Unconfigured(state.name.clone()).into()),
        }
    }

    pub fn n_calls(&self) -> usize {
        self.inner.borrow().calls.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.borrow().calls.clone()
    }

    /// Forget recorded calls. Behaviours are kept.
    pub fn reset(&self) {
        self.inner.borrow_mut().calls.clear();
    }

    pub fn called(&self) -> bool {
        self.n_calls() > 0
    }

    pub fn called_once(&self) -> bool {
        self.n_calls() == 1
    }

    pub fn not_called(&self) -> bool {
        self.n_calls() == 0
    }

    pub fn called_once_with(&self, expected: &Call) -> bool {
        let state = self.inner.borrow();
        state.calls.len() == 1 && &state.calls[0] == expected
    }

    /// Each call as a single map, positional arguments keyed by parameter name.
    pub fn normalized_calls(&self) -> Result<Vec<BTreeMap<String, Value>>, MockError> {
        let state = self.inner.borrow();
        state
            .calls
            .iter()
            .map(|c| c.normalize(&state.name, &state.params))
            .collect()
    }

    pub fn normalized_call(&self) -> Result<BTreeMap<String, Value>, MockError> {
        let n = self.n_calls();
        if n != 1 {
            return Err(MockError::NotCalledOnce(n));
        }
        let mut calls = self.normalized_calls()?;
        calls.pop().ok_or(MockError::NotCalledOnce(0))
    }

    pub fn called_once_with_kws(&self, expected: &Call) -> bool {
        if self.n_calls() != 1 {
            return false;
        }
        match self.normalized_call() {
            Ok(actual) => actual == expected.kwargs,
            Err(_) => false,
        }
    }
}

impl<R> std::fmt::Debug for MockFunction<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("MockFunction")
            .field("name", &state.name)
            .field("n_calls", &state.calls.len())
            .finish()
    }
}

type RealFn<R> = Box<dyn Fn(&Call) -> anyhow::Result<R>>;

struct SeamInner<R> {
    name: String,
    params: Vec<String>,
    real: RealFn<R>,
    current: RefCell<Option<MockFunction<R>>>,
}

/// A named, replaceable dependency.
///
/// ```rust
/// use zest::{call, mock::{mock, Seam}};
///
/// let fetch = Seam::new("fetch", ["url"], |c| Ok(format!("GET {}", c.get::<String>(0, "url")?)));
/// {
///     let m = mock(&fetch);
///     m.returns("canned".to_string());
///     assert_eq!(fetch.call(call!("http://x")).unwrap(), "canned");
///     assert!(m.called_once());
/// }
/// assert_eq!(fetch.call(call!("http://x")).unwrap(), "GET http://x");
/// ```
pub struct Seam<R> {
    inner: Rc<SeamInner<R>>,
}

impl<R> Clone for Seam<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: Clone + 'static> Seam<R> {
    pub fn new<P: AsRef<str>>(
        name: impl Into<String>,
        params: impl IntoIterator<Item = P>,
        real: impl Fn(&Call) -> anyhow::Result<R> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(SeamInner {
                name: name.into(),
                params: params.into_iter().map(|p| p.as_ref().to_string()).collect(),
                real: Box::new(real),
                current: RefCell::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn params(&self) -> &[String] {
        &self.inner.params
    }

    pub fn is_mocked(&self) -> bool {
        self.inner.current.borrow().is_some()
    }

    /// Invoke the current implementation.
    pub fn call(&self, call: Call) -> anyhow::Result<R> {
        let mocked = self.inner.current.borrow().clone();
        match mocked {
            Some(m) => m.call(call),
            None => (self.inner.real)(&call),
        }
    }

    /// Install a fresh mock, returning it and whatever was installed before.
    fn install(&self) -> (MockFunction<R>, Option<MockFunction<R>>) {
        let mock = MockFunction::new(self.inner.name.clone()).with_params(&self.inner.params);
        let previous = self.inner.current.replace(Some(mock.clone()));
        (mock, previous)
    }

    fn restore(&self, previous: Option<MockFunction<R>>) {
        *self.inner.current.borrow_mut() = previous;
    }
}

/// Scoped mock: restores the seam's previous implementation on drop.
pub struct MockGuard<R: Clone + 'static> {
    seam: Seam<R>,
    mock: MockFunction<R>,
    previous: Option<Option<MockFunction<R>>>,
}

impl<R: Clone + 'static> Deref for MockGuard<R> {
    type Target = MockFunction<R>;

    fn deref(&self) -> &Self::Target {
        &self.mock
    }
}

impl<R: Clone + 'static> Drop for MockGuard<R> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.seam.restore(previous);
        }
    }
}

/// Replace the seam's implementation until the returned guard is dropped.
pub fn mock<R: Clone + 'static>(seam: &Seam<R>) -> MockGuard<R> {
    let (mock, previous) = seam.install();
    MockGuard {
        seam: seam.clone(),
        mock,
        previous: Some(previous),
    }
}

/// Closure form of [`mock`].
pub fn with_mock<R: Clone + 'static, T>(seam: &Seam<R>, f: impl FnOnce(&MockFunction<R>) -> T) -> T {
    let guard = mock(seam);
    f(&guard)
}

/// A mock registered at some test depth, restored when that test ends.
pub(crate) trait StackedMock {
    fn reset_before_each(&self) -> bool;
    fn reset(&self);
    fn restore(self: Box<Self>);
}

struct StackEntry<R: Clone + 'static> {
    seam: Seam<R>,
    mock: MockFunction<R>,
    previous: Option<MockFunction<R>>,
    reset_before_each: bool,
}

impl<R: Clone + 'static> StackedMock for StackEntry<R> {
    fn reset_before_each(&self) -> bool {
        self.reset_before_each
    }

    fn reset(&self) {
        self.mock.reset();
    }

    fn restore(self: Box<Self>) {
        self.seam.restore(self.previous);
    }
}

/// One frame of mocks per call-stack depth.
#[derive(Default)]
pub(crate) struct MockStack {
    frames: Vec<Vec<Box<dyn StackedMock>>>,
}

impl MockStack {
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Vec::new());
    }

    /// Restore every mock in the top frame, leaving the frame empty.
    pub fn restore_top(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            while let Some(entry) = frame.pop() {
                entry.restore();
            }
        }
    }

    pub fn pop_frame(&mut self) {
        self.restore_top();
        self.frames.pop();
    }

    pub fn truncate(&mut self, depth: usize) {
        while self.frames.len() > depth {
            self.pop_frame();
        }
    }

    /// Reset flagged mocks of the top frame before a sibling test runs.
    pub fn reset_flagged(&self) {
        if let Some(frame) = self.frames.last() {
            for entry in frame.iter().filter(|e| e.reset_before_each()) {
                entry.reset();
            }
        }
    }

    /// Install a mock whose restoration belongs to the top frame.
    ///
    /// Outside of any running test the mock is returned but nothing restores
    /// it, matching a plain scoped mock that is never dropped.
    pub fn stack<R: Clone + 'static>(&mut self, seam: &Seam<R>, reset_before_each: bool) -> MockFunction<R> {
        let (mock, previous) = seam.install();
        let entry = StackEntry {
            seam: seam.clone(),
            mock: mock.clone(),
            previous,
            reset_before_each,
        };
        match self.frames.last_mut() {
            Some(frame) => frame.push(Box::new(entry)),
            None => tracing::warn!(seam = seam.name(), "stack_mock used outside a running test"),
        }
        mock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call;

    fn foo_seam() -> Seam<i32> {
        Seam::new("foo", ["a", "b"], |_| Ok(-1))
    }

    #[test]
    fn should_normalize_positional_and_keyword_calls() {
        let foo = foo_seam();
        let m = mock(&foo);
        m.returns(0);
        foo.call(call!(1; b = 2)).unwrap();
        foo.call(call!(3)).unwrap();

        assert_eq!(m.n_calls(), 2);
        let calls = m.normalized_calls().unwrap();
        assert_eq!(serde_json::to_value(&calls).unwrap(), serde_json::json!([{"a": 1, "b": 2}, {"a": 3}]));
    }

    #[test]
    fn should_restore_real_implementation_when_guard_drops() {
        let foo = foo_seam();
        with_mock(&foo, |m| {
            m.returns(10);
            assert_eq!(foo.call(call!()).unwrap(), 10);
        });
        assert!(!foo.is_mocked());
        assert_eq!(foo.call(call!()).unwrap(), -1);
    }

    #[test]
    fn should_restore_when_scope_unwinds() {
        let foo = foo_seam();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let m = mock(&foo);
            m.returns(5);
            panic!("inside mock scope");
        }));
        assert!(caught.is_err());
        assert_eq!(foo.call(call!()).unwrap(), -1);
    }

    #[test]
    fn should_apply_hook_before_other_behaviours() {
        let m: MockFunction<i32> = MockFunction::new("f");
        m.returns(1);
        m.returns_serially([2, 3]);
        m.hook(|c| Ok(c.get::<i32>(0, "x")? * 100));
        assert_eq!(m.call(call!(4)).unwrap(), 400);
    }

    #[test]
    fn should_prefer_exception_series_over_values() {
        let m: MockFunction<i32> = MockFunction::new("f");
        m.returns(1);
        m.exceptions_serially([anyhow::anyhow!("first")]);
        assert_eq!(m.call(call!()).unwrap_err().to_string(), "first");
        let exhausted = m.call(call!()).unwrap_err().to_string();
        assert!(exhausted.contains("list_of_exceptions_to_raise"));
    }

    #[test]
    fn should_fail_when_value_series_exhausted() {
        let m: MockFunction<&'static str> = MockFunction::new("f");
        m.returns_serially(["a"]);
        assert_eq!(m.call(call!()).unwrap(), "a");
        let err = m.call(call!()).unwrap_err().to_string();
        assert_eq!(err, "mock was called more times than the list_of_values_to_return had elements");
    }

    #[test]
    fn should_check_single_call_with_args() {
        let m: MockFunction<()> = MockFunction::new("f").with_params(["a", "b"]);
        m.returns(());
        m.call(call!(1; b = "x")).unwrap();
        assert!(m.called_once_with(&call!(1; b = "x")));
        assert!(!m.called_once_with(&call!(1)));
        assert!(m.called_once_with_kws(&call!(; a = 1, b = "x")));
        m.reset();
        assert!(m.not_called());
    }

    #[test]
    fn should_restore_stacked_mocks_per_frame() {
        let foo = foo_seam();
        let mut stack = MockStack::default();
        stack.push_frame();
        let m = stack.stack(&foo, true);
        m.returns(3);
        foo.call(call!()).unwrap();
        stack.reset_flagged();
        assert!(m.not_called());
        stack.pop_frame();
        assert_eq!(foo.call(call!()).unwrap(), -1);
    }
}
