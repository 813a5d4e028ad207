//! The root-level runner.

use crate::config::{ZestConfig, ALLOW_ALL, ALLOW_FAILED};
use crate::context::Zest;
use crate::decorators;
use crate::engine::{AllowList, Engine, Test};
use crate::error::{IntoTestResult, TestResult};
use crate::harness::matches_glob;
use crate::report::{ConsoleReporter, EventStreamReporter, Reporter};
use crate::result::{load_previous_failures, RunSummary, ZestResult};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

/// A top-level test function, usually registered with `#[zest]`.
#[derive(Clone, Copy)]
pub struct RootTest {
    pub name: &'static str,
    pub func: fn(&mut Zest<'_>) -> TestResult,
    /// Skip reason, if the root is skipped.
    pub skip: Option<&'static str>,
    pub group: Option<&'static str>,
    pub module_path: &'static str,
    /// Registration site, `file:line`.
    pub source: &'static str,
}

impl std::fmt::Debug for RootTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootTest")
            .field("name", &self.name)
            .field("skip", &self.skip)
            .field("group", &self.group)
            .field("source", &self.source)
            .finish()
    }
}

impl RootTest {
    fn to_test(self) -> Test<'static> {
        let test = match self.skip {
            Some(reason) => Test::new(self.name, decorators::skip(reason, self.func)),
            None => Test::new(self.name, self.func),
        };
        test.with_source(Some(self.source.to_string()))
    }
}

/// Forwards engine events to the runner's reporters and keeps stop records.
struct Collector<'r> {
    reporters: &'r [Box<dyn Reporter>],
    results: RefCell<Vec<ZestResult>>,
}

impl Reporter for Collector<'_> {
    fn test_start(&self, record: &ZestResult) {
        for r in self.reporters {
            r.test_start(record);
        }
    }

    fn test_stop(&self, record: &ZestResult) {
        for r in self.reporters {
            r.test_stop(record);
        }
        self.results.borrow_mut().push(record.clone());
    }
}

/// Runs root tests through one engine and summarizes them.
///
/// # Example
///
/// ```rust,no_run
/// use zest::{ZestRunner, Zest};
///
/// let mut runner = ZestRunner::new("my_suite");
///
/// runner.run_fn("zest_parser", |z: &mut Zest<'_>| -> zest::TestResult {
///     let mut s = z.scope();
///     s.test("it_parses_numbers", |_z: &mut Zest<'_>| assert_eq!("42".parse::<u32>().ok(), Some(42)));
///     s.run()?;
///     Ok(())
/// });
///
/// let summary = runner.finish();
/// std::process::exit(summary.retcode());
/// ```
pub struct ZestRunner {
    suite: String,
    config: ZestConfig,
    engine: Engine,
    allow: AllowList,
    results: Vec<ZestResult>,
    harness_errors: Vec<String>,
    run_start: Instant,
    started_at: String,
    started: bool,
    reporters: Vec<Box<dyn Reporter>>,
    metadata: HashMap<String, String>,
}

impl ZestRunner {
    /// Create a new runner with default config from environment.
    pub fn new(suite: &str) -> Self {
        Self::with_config(suite, ZestConfig::from_env())
    }

    /// Create a new runner with explicit config.
    pub fn with_config(suite: &str, config: ZestConfig) -> Self {
        // Default reporters: console + event stream
        let reporters: Vec<Box<dyn Reporter>> = vec![
            Box::new(ConsoleReporter::new(config.verbose).add_markers(config.add_markers)),
            Box::new(EventStreamReporter::new(config.output_dir.clone())),
        ];

        Self {
            suite: suite.to_string(),
            engine: Engine::new(&config),
            allow: expand_allow_list(&config),
            config,
            results: Vec::new(),
            harness_errors: Vec::new(),
            run_start: Instant::now(),
            started_at: timestamp(),
            started: false,
            reporters,
            metadata: HashMap::new(),
        }
    }

    /// Add custom metadata to the run summary.
    pub fn metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace reporters with a custom set.
    pub fn reporters(&mut self, reporters: Vec<Box<dyn Reporter>>) -> &mut Self {
        self.reporters = reporters;
        self
    }

    /// Add an additional reporter.
    pub fn add_reporter(&mut self, reporter: Box<dyn Reporter>) -> &mut Self {
        self.reporters.push(reporter);
        self
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow
    }

    /// Whether the root passes the match, exclude, group and allow filters.
    pub fn should_run(&self, root: &RootTest) -> bool {
        if let Some(pattern) = &self.config.match_string {
            if !matches_glob(root.name, pattern) && !matches_glob(root.module_path, pattern) {
                return false;
            }
        }
        if let Some(pattern) = &self.config.exclude_string {
            if matches_glob(root.name, pattern) {
                return false;
            }
        }
        if !self.config.groups.is_empty() {
            match root.group {
                Some(g) if self.config.groups.iter().any(|x| x == g) => {}
                _ => return false,
            }
        }
        if let Some(g) = root.group {
            if self.config.exclude_groups.iter().any(|x| x == g) {
                return false;
            }
        }
        self.allow.allows(&[root.name.to_string()])
    }

    fn ensure_started(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.run_start = Instant::now();
        self.started_at = timestamp();
        for r in &self.reporters {
            r.run_start(&self.suite, &self.config);
        }
    }

    /// Run a single root test.
    pub fn run(&mut self, root: &RootTest) {
        self.run_all(std::slice::from_ref(root));
    }

    /// Run every selected root as one shuffled group.
    #[tracing::instrument(level = "debug", skip_all, fields(suite = %self.suite))]
    pub fn run_all(&mut self, roots: &[RootTest]) {
        let tests: Vec<Test<'static>> = roots
            .iter()
            .filter(|r| self.should_run(r))
            .map(|r| r.to_test())
            .collect();
        self.run_tests(tests);
    }

    /// Run a closure as a root test, bypassing registration.
    #[track_caller]
    pub fn run_fn<R: IntoTestResult>(&mut self, name: &str, f: impl FnMut(&mut Zest<'_>) -> R) {
        if let Some(pattern) = &self.config.match_string {
            if !matches_glob(name, pattern) {
                return;
            }
        }
        self.run_tests(vec![Test::new(name, f)]);
    }

    fn run_tests(&mut self, tests: Vec<Test<'_>>) {
        if tests.is_empty() {
            return;
        }
        self.ensure_started();
        let names: Vec<String> = tests.iter().map(|t| t.name().to_string()).collect();

        let collector = Collector {
            reporters: &self.reporters,
            results: RefCell::new(Vec::new()),
        };
        if let Err(e) = self.engine.run(tests, &collector, &self.allow) {
            tracing::error!("run of {:?} aborted: {}", names, e);
            self.harness_errors.push(format!("{}: {}", names.join(", "), e));
        }
        self.results.extend(collector.results.into_inner());
    }

    /// Finish the run and return its summary.
    pub fn finish(mut self) -> RunSummary {
        self.ensure_started();

        let summary = RunSummary {
            suite: self.suite.clone(),
            results: self.results,
            total_duration: self.run_start.elapsed(),
            started_at: self.started_at,
            warnings: self.engine.take_warnings(),
            structural_errors: self.engine.take_structural_errors(),
            harness_errors: self.harness_errors,
            metadata: self.metadata,
        };

        for r in &self.reporters {
            r.run_end(&summary);
        }

        summary
    }
}

/// Resolve the configured allow-list into the names the engine checks.
///
/// `__failed__` becomes the failures of the previous run. Every name also
/// admits its ancestors, so the groups that lead to it are entered, and its
/// whole subtree.
pub fn expand_allow_list(config: &ZestConfig) -> AllowList {
    if config.allow_to_run.iter().any(|n| n == ALLOW_ALL) {
        return AllowList::All;
    }

    let mut requested = Vec::new();
    for name in &config.allow_to_run {
        if name == ALLOW_FAILED {
            match load_previous_failures(&config.output_dir) {
                Ok(failed) => requested.extend(failed),
                Err(e) => tracing::warn!("could not load previous failures: {}", e),
            }
        } else {
            requested.push(name.clone());
        }
    }

    let mut expanded = BTreeSet::new();
    for name in requested {
        let exact = name.trim_end_matches('.');
        if exact.is_empty() {
            continue;
        }
        let parts: Vec<&str> = exact.split('.').collect();
        for i in 1..=parts.len() {
            expanded.insert(parts[..i].join("."));
        }
        expanded.insert(format!("{}.", exact));
    }
    AllowList::Only(expanded.into_iter().collect())
}

fn timestamp() -> String {
    // Unix milliseconds: unique enough for quick successive runs
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", duration.as_millis())
}
