//! Result records and run summaries.

use crate::error::{RecordedError, ZestError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// The record of one test invocation.
///
/// The same `full_name` is reported twice: once when the test starts
/// (`is_running`) and once, fully populated, when it stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZestResult {
    pub call_stack: Vec<String>,
    pub full_name: String,
    pub short_name: String,
    #[serde(default)]
    pub error: Option<RecordedError>,
    #[serde(default)]
    pub error_formatted: Option<Vec<String>>,
    /// Seconds spent in the test body.
    #[serde(default)]
    pub elapsed: Option<f64>,
    #[serde(default)]
    pub skip: Option<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub logs: Option<String>,
    /// Where the test was registered, `file:line`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub is_starting: bool,
    #[serde(default)]
    pub worker_i: usize,
}

impl ZestResult {
    pub fn new(call_stack: Vec<String>, source: Option<String>, worker_i: usize) -> Self {
        let full_name = call_stack.join(".");
        let short_name = call_stack.last().cloned().unwrap_or_default();
        Self {
            call_stack,
            full_name,
            short_name,
            source,
            pid: std::process::id(),
            worker_i,
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_skip(&self) -> bool {
        self.skip.is_some()
    }

    pub fn elapsed_duration(&self) -> Duration {
        self.elapsed
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default()
    }

    /// Serialize to a single JSON line.
    ///
    /// Each field is serialized on its own; a field that fails is written as
    /// a placeholder string so the rest of the record still lands.
    pub fn dumps(&self) -> String {
        let mut map = Map::new();
        put(&mut map, "call_stack", &self.call_stack);
        put(&mut map, "full_name", &self.full_name);
        put(&mut map, "short_name", &self.short_name);
        put(&mut map, "error", &self.error);
        put(&mut map, "error_formatted", &self.error_formatted);
        put(&mut map, "elapsed", &self.elapsed);
        put(&mut map, "skip", &self.skip);
        put(&mut map, "stdout", &self.stdout);
        put(&mut map, "stderr", &self.stderr);
        put(&mut map, "logs", &self.logs);
        put(&mut map, "source", &self.source);
        put(&mut map, "pid", &self.pid);
        put(&mut map, "is_running", &self.is_running);
        put(&mut map, "is_starting", &self.is_starting);
        put(&mut map, "worker_i", &self.worker_i);
        Value::Object(map).to_string()
    }

    pub fn loads(line: &str) -> Result<Self, ZestError> {
        Ok(serde_json::from_str(line)?)
    }
}

fn put<T: Serialize>(map: &mut Map<String, Value>, key: &str, value: &T) {
    let v = serde_json::to_value(value)
        .unwrap_or_else(|e| Value::String(format!("<unable to serialize {}: {}>", key, e)));
    map.insert(key.to_string(), v);
}

/// A test group that did not close its scope properly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralError {
    pub full_name: String,
    pub message: String,
}

/// Results for an entire run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub suite: String,
    /// Stop records, in completion order.
    pub results: Vec<ZestResult>,
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    pub started_at: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub structural_errors: Vec<StructuralError>,
    /// Failures of the runner itself, e.g. an unwritable temp root.
    #[serde(default)]
    pub harness_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl RunSummary {
    /// Load a summary from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn n_errors(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }

    pub fn n_skips(&self) -> usize {
        self.results.iter().filter(|r| r.is_skip()).count()
    }

    pub fn n_success(&self) -> usize {
        self.results.len() - self.n_errors() - self.n_skips()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ZestResult> {
        self.results.iter().filter(|r| r.is_error())
    }

    /// Process exit code: 0 only for a clean run.
    pub fn retcode(&self) -> i32 {
        if self.n_errors() == 0 && self.structural_errors.is_empty() && self.harness_errors.is_empty() {
            0
        } else {
            1
        }
    }

    /// The slowest 5% of tests (at least one when any ran), slowest first.
    pub fn slowest(&self) -> Vec<&ZestResult> {
        let mut by_time: Vec<&ZestResult> = self.results.iter().filter(|r| r.elapsed.is_some()).collect();
        by_time.sort_by(|a, b| b.elapsed_duration().cmp(&a.elapsed_duration()));
        let n = (by_time.len() as f64 * 0.05).ceil() as usize;
        by_time.truncate(n);
        by_time
    }
}

/// Full names whose most recent recorded state, across every `.evt` file in
/// `dir`, is an error.
pub fn load_previous_failures(dir: impl AsRef<Path>) -> Result<Vec<String>, ZestError> {
    let dir = dir.as_ref();
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ZestError::io(dir, e)),
    };

    let mut last_state: BTreeMap<String, ZestResult> = BTreeMap::new();
    for entry in entries {
        let path = entry.map_err(|e| ZestError::io(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("evt") {
            continue;
        }
        let content = std::fs::read_to_string(&path).map_err(|e| ZestError::io(&path, e))?;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match ZestResult::loads(line) {
                Ok(r) => {
                    last_state.insert(r.full_name.clone(), r);
                }
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable event: {}", e),
            }
        }
    }

    Ok(last_state
        .into_values()
        .filter(|r| r.is_error())
        .map(|r| r.full_name)
        .collect())
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_nanos().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let nanos = u128::deserialize(d)?;
        Ok(Duration::from_nanos(nanos as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopped(name: &str, error: bool) -> ZestResult {
        let mut r = ZestResult::new(name.split('.').map(String::from).collect(), None, 0);
        r.elapsed = Some(0.01);
        if error {
            r.error = Some(RecordedError {
                kind: "ValueError".into(),
                message: "bad".into(),
            });
        }
        r
    }

    #[test]
    fn should_write_error_as_kind_and_message() {
        let line = stopped("a.b", true).dumps();
        assert!(line.contains(r#""error":"ValueError(\"bad\")""#));
        let back = ZestResult::loads(&line).unwrap();
        assert_eq!(back.full_name, "a.b");
        assert_eq!(back.short_name, "b");
        assert_eq!(back.error.unwrap().message, "bad");
    }

    #[test]
    fn should_compute_retcode_from_errors_and_structure() {
        let mut summary = RunSummary {
            results: vec![stopped("a", false)],
            ..Default::default()
        };
        assert_eq!(summary.retcode(), 0);

        summary.structural_errors.push(StructuralError {
            full_name: "a".into(),
            message: "did not terminate with a call to run()".into(),
        });
        assert_eq!(summary.retcode(), 1);
    }

    #[test]
    fn should_load_last_state_of_failures() {
        let dir = tempfile::tempdir().unwrap();
        let lines = [
            stopped("root.flaky", true).dumps(),
            stopped("root.flaky", false).dumps(),
            stopped("root.broken", true).dumps(),
            stopped("root.fine", false).dumps(),
        ];
        std::fs::write(dir.path().join("root.evt"), lines.join("\n")).unwrap();
        std::fs::write(dir.path().join("ignored.json"), "{}").unwrap();

        let failed = load_previous_failures(dir.path()).unwrap();
        assert_eq!(failed, vec!["root.broken".to_string()]);
    }

    #[test]
    fn should_return_nothing_when_dir_missing() {
        let failed = load_previous_failures("/definitely/not/here").unwrap();
        assert!(failed.is_empty());
    }
}
