//! The handle passed to every test body.

use crate::capture::CapturedWriter;
use crate::engine::{AllowList, EngineState, Scope};
use crate::error::TestError;
use crate::mock::{MockFunction, Seam};
use crate::report::Reporter;
use std::path::{Path, PathBuf};

/// Per-invocation view of the engine.
///
/// A test body receives `&mut Zest` and uses it to declare nested tests
/// (through [`scope`](Self::scope)), write captured output, stack mocks and
/// ask about the test that is currently running.
///
/// ```rust
/// use zest::{Engine, Test, Zest, ZestConfig, report::Silent, AllowList};
///
/// fn zest_basics(z: &mut Zest<'_>) -> zest::TestResult {
///     let mut s = z.scope();
///     s.test("it_adds", |_z: &mut Zest<'_>| assert_eq!(1 + 1, 2));
///     s.run()?;
///     Ok(())
/// }
///
/// let mut engine = Engine::new(&ZestConfig::new().disable_shuffle(true));
/// engine.run(vec![Test::new("zest_basics", zest_basics)], &Silent, &AllowList::All).unwrap();
/// assert_eq!(engine.call_log(), ["zest_basics", "zest_basics.it_adds"]);
/// ```
pub struct Zest<'a> {
    pub(crate) state: &'a mut EngineState,
    pub(crate) reporter: &'a dyn Reporter,
    pub(crate) allow: &'a AllowList,
    work_dir: PathBuf,
    pub(crate) scopes_run: usize,
}

impl<'a> Zest<'a> {
    pub(crate) fn new(
        state: &'a mut EngineState,
        reporter: &'a dyn Reporter,
        allow: &'a AllowList,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            state,
            reporter,
            allow,
            work_dir,
            scopes_run: 0,
        }
    }

    /// Start declaring the nested tests of the current test.
    ///
    /// Finish with [`Scope::run`]. A body may only run one scope, after
    /// every nested test has been registered.
    pub fn scope(&mut self) -> Scope<'_, 'a> {
        let premature = self.scopes_run > 0;
        if premature {
            self.state.structural_error("called run() before all tests were registered");
        }
        Scope::new(self, premature)
    }

    pub fn current_test_name(&self) -> Option<&str> {
        self.state.call_stack.last().map(String::as_str)
    }

    pub fn current_test_full_name(&self) -> String {
        self.state.call_stack.join(".")
    }

    pub fn call_stack(&self) -> &[String] {
        &self.state.call_stack
    }

    pub fn call_depth(&self) -> usize {
        self.state.call_stack.len()
    }

    pub fn mock_depth(&self) -> usize {
        self.state.mocks.depth()
    }

    /// The error of the test that just finished, visible to its `_after` hook.
    pub fn current_test_error(&self) -> Option<&TestError> {
        self.state.current_error.as_ref()
    }

    /// Captured standard output of the running test.
    pub fn stdout(&self) -> CapturedWriter {
        self.state.capture.stdout()
    }

    /// Captured standard error of the running test.
    pub fn stderr(&self) -> CapturedWriter {
        self.state.capture.stderr()
    }

    /// Run `f` with capture suspended so its output reaches the real streams.
    pub fn paused<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.state.capture.pause();
        let r = f(self);
        self.state.capture.resume();
        r
    }

    /// Working directory assigned to the running test.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Mock `seam` until the running test finishes.
    ///
    /// Use this in a group body to mock for all of its nested tests; with
    /// `reset_before_each` the recorded calls are cleared before every one.
    pub fn stack_mock<R: Clone + 'static>(
        &mut self,
        seam: &Seam<R>,
        reset_before_each: bool,
    ) -> MockFunction<R> {
        self.state.mocks.stack(seam, reset_before_each)
    }

    /// Whether a skip with this reason should be ignored for the running test.
    pub fn is_bypassed(&self, reason: &str) -> bool {
        let full_name = self.current_test_full_name();
        self.state
            .bypass_skip
            .iter()
            .any(|b| b == reason || *b == full_name)
    }
}
