//! The nested test execution engine.
//!
//! A test group is a body that opens a [`Scope`], registers nested tests and
//! hooks on it, and finishes with [`Scope::run`]. Running a scope executes
//! each registered test once, in shuffled order, recursing into any scope the
//! test opens itself. All recursion levels share one [`EngineState`]; every
//! stack it holds is pushed and popped in step with the call stack, and is
//! unwound to its recorded depth when a body panics.

use crate::capture::CaptureStack;
use crate::config::{ZestConfig, ALLOW_ALL};
use crate::context::Zest;
use crate::error::{IntoTestResult, TestError, TestOutcome, TestResult, ZestError};
use crate::mock::MockStack;
use crate::report::Reporter;
use crate::result::{StructuralError, ZestResult};
use crate::unwind;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;

type Body<'s> = Box<dyn FnMut(&mut Zest<'_>) -> TestResult + 's>;
type Callback<'s> = Box<dyn FnMut(&ZestResult) + 's>;

/// Which full names may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowList {
    All,
    /// Dotted full names; an entry ending in `.` allows that whole subtree.
    Only(Vec<String>),
}

impl AllowList {
    /// `__all__` anywhere in `names` allows everything.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.iter().any(|n| n == ALLOW_ALL) {
            Self::All
        } else {
            Self::Only(names)
        }
    }

    pub fn allows(&self, call_stack: &[String]) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => check_allow_to_run(names, call_stack),
        }
    }
}

/// First matching rule wins: the `__all__` sentinel, a trailing-dot subtree
/// whose parts prefix the call stack, or an exact full name.
pub fn check_allow_to_run(allow: &[String], call_stack: &[String]) -> bool {
    let full_name = call_stack.join(".");
    for entry in allow {
        if entry == ALLOW_ALL {
            return true;
        }
        if let Some(prefix) = entry.strip_suffix('.') {
            let parts: Vec<&str> = prefix.split('.').collect();
            if parts.len() <= call_stack.len() && parts.iter().zip(call_stack).all(|(p, c)| *p == c) {
                return true;
            }
        } else if *entry == full_name {
            return true;
        }
    }
    false
}

/// Depths of every engine stack at some point in time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Mark {
    calls: usize,
    mocks: usize,
    captures: usize,
    paused: usize,
}

/// State shared by every level of a recursive run.
pub struct EngineState {
    pub(crate) call_stack: Vec<String>,
    pub(crate) mocks: MockStack,
    pub(crate) capture: CaptureStack,
    pub(crate) current_error: Option<TestError>,
    pub(crate) bypass_skip: Vec<String>,
    call_log: Vec<String>,
    warnings: Vec<String>,
    structural: Vec<StructuralError>,
    rng: StdRng,
    shuffle: bool,
    common_tmp: Option<PathBuf>,
    tmp_root: Option<PathBuf>,
    chdir: bool,
    worker_i: usize,
}

impl EngineState {
    fn new(config: &ZestConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            call_stack: Vec::new(),
            mocks: MockStack::default(),
            capture: CaptureStack::new(config.capture),
            current_error: None,
            bypass_skip: config.bypass_skip.clone(),
            call_log: Vec::new(),
            warnings: Vec::new(),
            structural: Vec::new(),
            rng,
            shuffle: !config.disable_shuffle,
            common_tmp: config.common_tmp.clone(),
            tmp_root: config.tmp_root.clone(),
            chdir: config.chdir,
            worker_i: config.worker_i,
        }
    }

    pub(crate) fn mark(&self) -> Mark {
        Mark {
            calls: self.call_stack.len(),
            mocks: self.mocks.depth(),
            captures: self.capture.depth(),
            paused: self.capture.pause_depth(),
        }
    }

    /// Unwind every stack back to `mark`, restoring mocks on the way.
    pub(crate) fn restore(&mut self, mark: Mark) {
        self.mocks.truncate(mark.mocks);
        self.call_stack.truncate(mark.calls);
        self.capture.truncate(mark.captures, mark.paused);
    }

    pub(crate) fn structural_error(&mut self, message: &str) {
        let full_name = self.call_stack.join(".");
        tracing::warn!(test = %full_name, "{}", message);
        self.structural.push(StructuralError {
            full_name,
            message: message.to_string(),
        });
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Runs test functions and their nested groups.
pub struct Engine {
    state: EngineState,
}

impl Engine {
    pub fn new(config: &ZestConfig) -> Self {
        Self {
            state: EngineState::new(config),
        }
    }

    /// Run explicit test functions as one group.
    ///
    /// Names starting with `_` are not tests and are dropped. Per-test
    /// failures are recorded, never returned; an `Err` means the group
    /// itself is misconfigured.
    pub fn run(
        &mut self,
        tests: Vec<Test<'_>>,
        reporter: &dyn Reporter,
        allow: &AllowList,
    ) -> Result<(), ZestError> {
        let cwd = std::env::current_dir().unwrap_or_default();
        let mut root = Zest::new(&mut self.state, reporter, allow, cwd);
        let mut scope = root.scope();
        scope.explicit = true;
        for test in tests {
            if test.name.starts_with('_') {
                tracing::debug!(name = %test.name, "ignoring underscored function");
                continue;
            }
            scope.tests.push(test);
        }
        scope.run()
    }

    /// Full names of every test that started, in order.
    pub fn call_log(&self) -> &[String] {
        &self.state.call_log
    }

    pub fn warnings(&self) -> &[String] {
        &self.state.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.state.warnings)
    }

    pub fn structural_errors(&self) -> &[StructuralError] {
        &self.state.structural
    }

    pub fn take_structural_errors(&mut self) -> Vec<StructuralError> {
        std::mem::take(&mut self.state.structural)
    }

    pub fn call_depth(&self) -> usize {
        self.state.call_stack.len()
    }

    pub fn mock_depth(&self) -> usize {
        self.state.mocks.depth()
    }
}

/// A named test body.
pub struct Test<'s> {
    pub(crate) name: String,
    body: Body<'s>,
    source: Option<String>,
}

impl<'s> Test<'s> {
    #[track_caller]
    pub fn new<R: IntoTestResult>(
        name: impl Into<String>,
        mut body: impl FnMut(&mut Zest<'_>) -> R + 's,
    ) -> Self {
        let caller = std::panic::Location::caller();
        Self {
            name: name.into(),
            body: Box::new(move |z: &mut Zest<'_>| body(z).into_test_result()),
            source: Some(format!("{}:{}", caller.file(), caller.line())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }
}

/// Registrar for the nested tests of one group.
///
/// Dropping a scope that has registered tests without calling
/// [`run`](Self::run) records a structural error.
pub struct Scope<'s, 'a> {
    zest: &'s mut Zest<'a>,
    tests: Vec<Test<'s>>,
    before: Option<Body<'s>>,
    after: Option<Body<'s>>,
    hooks: Vec<String>,
    begin_declared: bool,
    on_start: Option<Callback<'s>>,
    on_stop: Option<Callback<'s>>,
    reporter: Option<&'s dyn Reporter>,
    allow: Option<AllowList>,
    premature: bool,
    explicit: bool,
    ran: bool,
}

impl<'s, 'a> Scope<'s, 'a> {
    pub(crate) fn new(zest: &'s mut Zest<'a>, premature: bool) -> Self {
        Self {
            zest,
            tests: Vec::new(),
            before: None,
            after: None,
            hooks: Vec::new(),
            begin_declared: false,
            on_start: None,
            on_stop: None,
            reporter: None,
            allow: None,
            premature,
            explicit: false,
            ran: false,
        }
    }

    /// Register a nested test. Names starting with `_` are hooks, not tests.
    #[track_caller]
    pub fn test<R: IntoTestResult>(
        &mut self,
        name: &str,
        body: impl FnMut(&mut Zest<'_>) -> R + 's,
    ) -> &mut Self {
        match name {
            "_before" => self.before(body),
            "_after" => self.after(body),
            _ if name.starts_with('_') => self.hook(name, body),
            _ => {
                self.tests.push(Test::new(name, body));
                self
            }
        }
    }

    /// Run before every test of this scope.
    pub fn before<R: IntoTestResult>(&mut self, mut body: impl FnMut(&mut Zest<'_>) -> R + 's) -> &mut Self {
        self.before = Some(Box::new(move |z: &mut Zest<'_>| body(z).into_test_result()));
        self
    }

    /// Run after every test of this scope, whether it failed or not.
    pub fn after<R: IntoTestResult>(&mut self, mut body: impl FnMut(&mut Zest<'_>) -> R + 's) -> &mut Self {
        self.after = Some(Box::new(move |z: &mut Zest<'_>| body(z).into_test_result()));
        self
    }

    /// Declare a helper that is not a test. It is never called.
    pub fn hook<R: IntoTestResult>(&mut self, name: &str, _body: impl FnMut(&mut Zest<'_>) -> R + 's) -> &mut Self {
        match name {
            "_before" | "_after" => tracing::warn!(hook = name, "use Scope::before / Scope::after"),
            "_begin" => self.begin_declared = true,
            _ => {}
        }
        self.hooks.push(name.to_string());
        self
    }

    /// Replace the start callback for the tests of this scope and below.
    pub fn on_test_start(&mut self, f: impl FnMut(&ZestResult) + 's) -> &mut Self {
        self.on_start = Some(Box::new(f));
        self
    }

    /// Replace the stop callback for the tests of this scope and below.
    pub fn on_test_stop(&mut self, f: impl FnMut(&ZestResult) + 's) -> &mut Self {
        self.on_stop = Some(Box::new(f));
        self
    }

    /// Report the tests of this scope and below to `reporter`.
    pub fn reporter(&mut self, reporter: &'s dyn Reporter) -> &mut Self {
        self.reporter = Some(reporter);
        self
    }

    /// Replace the allow-list for this scope and below.
    pub fn allow_to_run(&mut self, allow: AllowList) -> &mut Self {
        self.allow = Some(allow);
        self
    }

    pub fn test_names(&self) -> Vec<&str> {
        self.tests.iter().map(|t| t.name.as_str()).collect()
    }

    /// Run every registered test.
    pub fn run(mut self) -> Result<(), ZestError> {
        self.ran = true;
        self.zest.scopes_run += 1;

        if self.begin_declared {
            return Err(ZestError::BeginHook);
        }
        if self.premature {
            return Ok(());
        }

        let mut tests = std::mem::take(&mut self.tests);
        tests.sort_by(|a, b| a.name.cmp(&b.name));
        if self.zest.state.shuffle {
            tests.shuffle(&mut self.zest.state.rng);
        }

        let reporter = ScopedReporter {
            parent: self.reporter.unwrap_or(self.zest.reporter),
            start: RefCell::new(self.on_start.take()),
            stop: RefCell::new(self.on_stop.take()),
        };
        let scoped_allow = self.allow.take();
        let allow = scoped_allow.as_ref().unwrap_or(self.zest.allow);
        let mut hooks = Hooks {
            before: self.before.take(),
            after: self.after.take(),
        };

        for mut test in tests {
            run_one(&mut *self.zest.state, &reporter, allow, &mut hooks, &mut test)?;
        }
        Ok(())
    }
}

impl Drop for Scope<'_, '_> {
    fn drop(&mut self) {
        if self.ran || self.explicit || self.tests.is_empty() || std::thread::panicking() {
            return;
        }
        self.zest
            .state
            .structural_error("did not terminate with a call to run()");
    }
}

struct Hooks<'s> {
    before: Option<Body<'s>>,
    after: Option<Body<'s>>,
}

/// Start and stop callbacks overridden for one scope.
struct ScopedReporter<'r> {
    parent: &'r dyn Reporter,
    start: RefCell<Option<Callback<'r>>>,
    stop: RefCell<Option<Callback<'r>>>,
}

impl Reporter for ScopedReporter<'_> {
    fn test_start(&self, record: &ZestResult) {
        match self.start.borrow_mut().as_mut() {
            Some(f) => f(record),
            None => self.parent.test_start(record),
        }
    }

    fn test_stop(&self, record: &ZestResult) {
        match self.stop.borrow_mut().as_mut() {
            Some(f) => f(record),
            None => self.parent.test_stop(record),
        }
    }
}

enum WorkDir {
    Shared(PathBuf),
    Temp(TempDir),
}

impl WorkDir {
    fn create(state: &EngineState) -> Result<Self, ZestError> {
        if let Some(shared) = &state.common_tmp {
            std::fs::create_dir_all(shared).map_err(|e| ZestError::io(shared, e))?;
            return Ok(Self::Shared(shared.clone()));
        }
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("zest_");
            b
        };
        let dir = match &state.tmp_root {
            Some(root) => builder.tempdir_in(root).map_err(|e| ZestError::io(root, e))?,
            None => builder
                .tempdir()
                .map_err(|e| ZestError::io(std::env::temp_dir(), e))?,
        };
        Ok(Self::Temp(dir))
    }

    fn path(&self) -> &Path {
        match self {
            Self::Shared(p) => p,
            Self::Temp(t) => t.path(),
        }
    }

    fn finish(self, keep: bool) {
        if let Self::Temp(dir) = self {
            if keep {
                let path = dir.keep();
                tracing::info!(path = %path.display(), "kept working directory of failed test");
            }
        }
    }
}

/// Call a body with a fresh handle, turning a panic into a failure.
fn call_body(
    state: &mut EngineState,
    reporter: &dyn Reporter,
    allow: &AllowList,
    work_dir: &Path,
    body: &mut Body<'_>,
) -> TestOutcome {
    let mark = state.mark();
    let result = unwind::catch(|| {
        let mut z = Zest::new(&mut *state, reporter, allow, work_dir.to_path_buf());
        body(&mut z)
    });
    match result {
        Ok(r) => TestOutcome::from(r),
        Err(panic) => {
            state.restore(mark);
            TestOutcome::Failed(panic.to_test_error())
        }
    }
}

/// Invoke a reporter callback with capture paused.
fn notify(state: &mut EngineState, f: impl FnOnce()) {
    let mark = state.mark();
    state.capture.pause();
    let result = unwind::catch(f);
    state.capture.resume();
    if let Err(panic) = result {
        state.restore(mark);
        state.warn(format!("A test callback panicked: {}", panic.message));
    }
}

fn run_one(
    state: &mut EngineState,
    reporter: &dyn Reporter,
    allow: &AllowList,
    hooks: &mut Hooks<'_>,
    test: &mut Test<'_>,
) -> Result<(), ZestError> {
    state.mocks.reset_flagged();
    let mark = state.mark();

    state.capture.push();
    state.call_stack.push(test.name.clone());
    state.mocks.push_frame();
    let call_stack = state.call_stack.clone();
    let full_name = call_stack.join(".");

    if !allow.allows(&call_stack) {
        state.restore(mark);
        return Ok(());
    }

    let work = match WorkDir::create(state) {
        Ok(w) => w,
        Err(e) => {
            state.restore(mark);
            return Err(e);
        }
    };
    let previous_cwd = if state.chdir { enter_dir(work.path()) } else { None };

    tracing::debug!(test = %full_name, "starting");
    state.call_log.push(full_name.clone());

    if let Some(before) = hooks.before.as_mut() {
        match call_body(state, reporter, allow, work.path(), before) {
            TestOutcome::Passed => {}
            TestOutcome::Failed(err) => state.warn(format!(
                "There was an exception while running '_before()' in test '{}'. \
                 This may mean that the sub-tests are not enumerated and therefore can not be run. ({})",
                full_name, err
            )),
            // a hook cannot skip the test it prepares
            TestOutcome::Skipped(reason) => state.warn(format!(
                "'_before()' in test '{}' asked to skip ({}); the skip was ignored and the test still runs.",
                full_name, reason
            )),
        }
    }

    let mut record = ZestResult::new(call_stack, test.source.clone(), state.worker_i);
    record.is_running = true;
    record.is_starting = true;
    notify(state, || reporter.test_start(&record));

    let started = Instant::now();
    let outcome = call_body(state, reporter, allow, work.path(), &mut test.body);
    let elapsed = started.elapsed();
    state.mocks.restore_top();

    let captured = state.capture.pop();

    record.is_running = false;
    record.is_starting = false;
    record.elapsed = Some(elapsed.as_secs_f64());
    if let Some(c) = captured {
        record.stdout = Some(c.stdout);
        record.stderr = Some(c.stderr);
        record.logs = Some(c.logs);
    }
    let failed = match &outcome {
        TestOutcome::Passed => None,
        TestOutcome::Skipped(reason) => {
            record.skip = Some(reason.clone());
            None
        }
        TestOutcome::Failed(err) => {
            record.error = Some(err.to_recorded());
            record.error_formatted = Some(err.formatted.clone());
            Some(err.clone())
        }
    };
    tracing::debug!(test = %full_name, elapsed_ms = elapsed.as_millis() as u64, ?outcome, "stopped");
    notify(state, || reporter.test_stop(&record));

    if let Some(after) = hooks.after.as_mut() {
        state.current_error = failed.clone();
        if let TestOutcome::Failed(err) = call_body(state, reporter, allow, work.path(), after) {
            state.warn(format!(
                "There was an exception while running '_after()' in test '{}'. ({})",
                full_name, err
            ));
        }
        state.current_error = None;
    }

    state.restore(mark);
    if let Some(cwd) = previous_cwd {
        if let Err(e) = std::env::set_current_dir(&cwd) {
            tracing::warn!(path = %cwd.display(), "failed to restore working directory: {}", e);
        }
    }
    work.finish(failed.is_some());
    Ok(())
}

fn enter_dir(dir: &Path) -> Option<PathBuf> {
    let previous = std::env::current_dir().ok()?;
    match std::env::set_current_dir(dir) {
        Ok(()) => Some(previous),
        Err(e) => {
            tracing::warn!(path = %dir.display(), "failed to enter working directory: {}", e);
            None
        }
    }
}
