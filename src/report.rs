//! Pluggable reporters for test results.
//!
//! All reporters implement the `Reporter` trait and are designed to be:
//! - Non-panicking: errors are logged but never propagate
//! - Line-oriented: console output never ends up in a test's capture buffer
//!
//! The engine calls `test_start` and `test_stop` synchronously with capture
//! paused, from the thread running the tests.

use crate::config::ZestConfig;
use crate::result::{RunSummary, ZestResult};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Trait for test result reporters.
pub trait Reporter {
    /// Called once before any root test runs.
    fn run_start(&self, _suite: &str, _config: &ZestConfig) {}

    /// Called when a test begins, before its body runs.
    fn test_start(&self, _record: &ZestResult) {}

    /// Called with the fully populated record when a test completes.
    fn test_stop(&self, _record: &ZestResult) {}

    /// Called once after every root test has run.
    fn run_end(&self, _summary: &RunSummary) {}
}

/// A reporter that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Reporter for Silent {}

/// Fixed width for the header rule in console output.
const RULE_WIDTH: usize = 63;

#[derive(Default)]
struct ConsoleState {
    last_depth: usize,
    /// An abbreviated-progress line is open and needs a newline.
    open_line: bool,
}

/// Console reporter that prints progress and a final summary to stdout.
///
/// Verbosity 1 prints one character per finished test, verbosity 2 prints
/// an indented tree of test names with their outcome and timing.
pub struct ConsoleReporter {
    verbose: u8,
    add_markers: bool,
    /// Mutex ensures atomic writes across threads.
    output_lock: Mutex<ConsoleState>,
}

impl ConsoleReporter {
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            add_markers: false,
            output_lock: Mutex::new(ConsoleState::default()),
        }
    }

    /// Prefix test names with `+` at verbosity 2.
    pub fn add_markers(mut self, v: bool) -> Self {
        self.add_markers = v;
        self
    }

    /// Write `text` to stdout as is. Never panics.
    fn write_stdout(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
            let _ = writeln!(std::io::stderr(), "Warning: failed to write to stdout: {}", e);
        }
    }

    fn depth(record: &ZestResult) -> usize {
        record.call_stack.len().saturating_sub(1)
    }

    fn status(record: &ZestResult) -> String {
        let ms = (record.elapsed.unwrap_or_default() * 1000.0) as u64;
        if let Some(reason) = &record.skip {
            format!("SKIPPED (reason: {})", reason)
        } else if record.error.is_some() {
            format!("ERROR (in {} ms)", ms)
        } else {
            format!("SUCCESS (in {} ms)", ms)
        }
    }

    fn abbreviated(record: &ZestResult) -> &'static str {
        if record.error.is_some() {
            "F"
        } else if record.skip.is_some() {
            "s"
        } else {
            "."
        }
    }

    fn format_error(record: &ZestResult) -> String {
        let title = format!(" {} ", record.call_stack.join(" . "));
        let fill = RULE_WIDTH.saturating_sub(title.len() + 5);
        let mut out = format!("\n{}{}{}\n", "=".repeat(5), title, "=".repeat(fill));
        for line in record.error_formatted.iter().flatten() {
            out.push_str(line);
            out.push('\n');
        }
        if let Some(err) = &record.error {
            out.push_str(&format!("raised: {}\n", err.kind));
            if !err.message.trim().is_empty() {
                out.push_str(err.message.trim());
                out.push('\n');
            }
        }
        for (label, text) in [("stdout", &record.stdout), ("stderr", &record.stderr), ("logs", &record.logs)] {
            if let Some(text) = text.as_deref().filter(|t| !t.is_empty()) {
                out.push_str(&format!("----- captured {} -----\n{}", label, text));
                if !text.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        out
    }

    fn format_summary(&self, summary: &RunSummary) -> String {
        let mut out = String::new();

        for err in summary.errors() {
            out.push_str(&Self::format_error(err));
        }

        for warning in &summary.warnings {
            out.push_str(&format!("\n{}\n", warning));
        }

        for s in &summary.structural_errors {
            out.push_str(&format!(
                "\nERROR: Zest function {} {}\n\
                 If you are using local functions that are not tests, register them as hooks.\n",
                s.full_name, s.message
            ));
        }

        for e in &summary.harness_errors {
            out.push_str(&format!("\nERROR: {}\n", e));
        }

        if self.verbose >= 2 {
            let slowest = summary.slowest();
            if !slowest.is_empty() {
                out.push_str("\nSlowest 5%\n");
                for r in slowest {
                    out.push_str(&format!(
                        "  {:>12} {}\n",
                        format_duration(r.elapsed_duration()),
                        r.full_name
                    ));
                }
            }
        }

        let n_errors = summary.n_errors();
        out.push_str(&format!("\nRan {} tests", summary.results.len()));
        if summary.n_skips() > 0 {
            out.push_str(&format!(" ({} skipped)", summary.n_skips()));
        }
        out.push_str(&format!(" in {}. ", format_duration(summary.total_duration)));
        if n_errors == 0 && summary.retcode() == 0 {
            out.push_str("SUCCESS\n");
        } else if n_errors == 0 {
            out.push_str("FAILED\n");
        } else {
            out.push_str(&format!("{} ERROR(s)\n", n_errors));
        }
        out
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Reporter for ConsoleReporter {
    fn test_start(&self, record: &ZestResult) {
        if self.verbose < 2 {
            return;
        }
        // ignore poison (another thread panicked)
        let mut state = self.output_lock.lock().unwrap_or_else(|e| e.into_inner());
        let depth = Self::depth(record);
        let mut line = String::new();
        if state.last_depth < depth {
            line.push('\n');
        }
        let marker = if self.add_markers { "+" } else { "" };
        line.push_str(&format!("{}{}{}: ", "  ".repeat(depth), marker, record.short_name));
        state.last_depth = depth;
        self.write_stdout(&line);
    }

    fn test_stop(&self, record: &ZestResult) {
        let mut state = self.output_lock.lock().unwrap_or_else(|e| e.into_inner());
        match self.verbose {
            0 => {}
            1 => {
                state.open_line = true;
                self.write_stdout(Self::abbreviated(record));
            }
            _ => {
                let depth = Self::depth(record);
                let mut line = String::new();
                if depth < state.last_depth {
                    line.push_str(&"  ".repeat(depth));
                }
                line.push_str(&Self::status(record));
                line.push('\n');
                state.last_depth = depth;
                self.write_stdout(&line);
            }
        }
    }

    fn run_end(&self, summary: &RunSummary) {
        if self.verbose == 0 {
            return;
        }
        let mut state = self.output_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut text = String::new();
        if state.open_line {
            text.push('\n');
            state.open_line = false;
        }
        text.push_str(&self.format_summary(summary));
        self.write_stdout(&text);
    }
}

/// Reporter that persists records for other processes and later runs.
///
/// Writes into `output_dir`:
/// - `{root}.evt` - one JSON record per line for each root test, truncated
///   when that root starts again
/// - `latest.json` - the `RunSummary` of the most recent run
/// - `latest.txt` - a human-readable summary
pub struct EventStreamReporter {
    output_dir: PathBuf,
}

impl EventStreamReporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Path of the event file for a root test.
    pub fn event_path(&self, root: &str) -> PathBuf {
        let sanitized = root.replace(['/', '\\'], "_");
        self.output_dir.join(format!("{}.evt", sanitized))
    }

    /// Never panics; logs a warning on failure.
    fn append(&self, record: &ZestResult) {
        if let Err(e) = self.append_inner(record) {
            tracing::warn!("failed to write event for '{}': {}", record.full_name, e);
        }
    }

    fn append_inner(&self, record: &ZestResult) -> std::io::Result<()> {
        let Some(root) = record.call_stack.first() else {
            return Ok(());
        };
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.event_path(root);
        let starting_root = record.call_stack.len() == 1 && record.is_starting;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!starting_root)
            .truncate(starting_root)
            .open(&path)?;
        writeln!(file, "{}", record.dumps())
    }

    fn write_results(&self, summary: &RunSummary) {
        if let Err(e) = self.write_results_inner(summary) {
            tracing::warn!("failed to write results: {}", e);
        }
    }

    fn write_results_inner(&self, summary: &RunSummary) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        let json = serde_json::to_string_pretty(summary).map_err(std::io::Error::other)?;
        std::fs::write(self.output_dir.join("latest.json"), &json)?;
        std::fs::write(self.output_dir.join("latest.txt"), format_summary(summary))?;
        tracing::info!(path = %self.output_dir.display(), "results written");
        Ok(())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

fn format_summary(summary: &RunSummary) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut output = format!("{rule}\nZest Suite: {}\n{rule}\n\n", summary.suite);
    output.push_str(&format!("Started: {}\n\n", summary.started_at));
    output.push_str("Results:\n");
    output.push_str(&format!("{}\n", "-".repeat(RULE_WIDTH)));
    for r in &summary.results {
        let status = if r.error.is_some() {
            "ERROR".to_string()
        } else if let Some(reason) = &r.skip {
            format!("SKIPPED ({})", reason)
        } else {
            "SUCCESS".to_string()
        };
        output.push_str(&format!(
            "  {:<40} {:>12}  {}\n",
            r.full_name,
            format_duration(r.elapsed_duration()),
            status
        ));
    }
    output.push_str(&format!("{}\n", "-".repeat(RULE_WIDTH)));
    output.push_str(&format!("Total time: {}\n", format_duration(summary.total_duration)));
    output.push_str(&format!(
        "Tests: {} ({} errors, {} skipped)\n",
        summary.results.len(),
        summary.n_errors(),
        summary.n_skips()
    ));
    output.push_str(&format!("{rule}\n"));
    output
}

/// Format a duration with consistent units: ns, us, ms, or s.
/// Always uses 2 decimal places, no scientific notation.
pub fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.2}s", secs)
    } else if secs >= 0.001 {
        format!("{:.2}ms", secs * 1_000.0)
    } else if secs >= 0.000_001 {
        format!("{:.2}us", secs * 1_000_000.0)
    } else {
        format!("{:.2}ns", secs * 1_000_000_000.0)
    }
}

impl Reporter for EventStreamReporter {
    fn test_start(&self, record: &ZestResult) {
        self.append(record);
    }

    fn test_stop(&self, record: &ZestResult) {
        self.append(record);
    }

    fn run_end(&self, summary: &RunSummary) {
        self.write_results(summary);
    }
}

/// Fans every call out to several reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        Self { reporters }
    }
}

impl Reporter for MultiReporter {
    fn run_start(&self, suite: &str, config: &ZestConfig) {
        for r in &self.reporters {
            // Catch panics to ensure one reporter failure doesn't affect others
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                r.run_start(suite, config);
            }));
        }
    }

    fn test_start(&self, record: &ZestResult) {
        for r in &self.reporters {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                r.test_start(record);
            }));
        }
    }

    fn test_stop(&self, record: &ZestResult) {
        for r in &self.reporters {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                r.test_stop(record);
            }));
        }
    }

    fn run_end(&self, summary: &RunSummary) {
        for r in &self.reporters {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                r.run_end(summary);
            }));
        }
    }
}
