//! Configuration for a zest run.

use std::path::PathBuf;

/// Allow-list entry meaning "run everything".
pub const ALLOW_ALL: &str = "__all__";
/// Allow-list entry replaced by the tests that failed in the previous run.
pub const ALLOW_FAILED: &str = "__failed__";

/// Configuration for a zest run.
#[derive(Debug, Clone)]
pub struct ZestConfig {
    /// Directory for event files and the run summary.
    pub output_dir: PathBuf,
    /// Dotted full names allowed to run. A trailing `.` allows a subtree.
    pub allow_to_run: Vec<String>,
    /// Only run root tests whose name matches this glob.
    pub match_string: Option<String>,
    /// Skip root tests whose name matches this glob.
    pub exclude_string: Option<String>,
    /// Skip reasons or full names whose skip is ignored.
    pub bypass_skip: Vec<String>,
    /// Capture test output instead of passing it through.
    pub capture: bool,
    /// 0: silent, 1: dots, 2: names, 3: names plus debug tracing.
    pub verbose: u8,
    pub disable_shuffle: bool,
    /// Fixed shuffle seed for reproducing an order.
    pub seed: Option<u64>,
    /// Prefix test names with `+` in verbose output.
    pub add_markers: bool,
    /// Only run root tests in these groups (empty: all).
    pub groups: Vec<String>,
    pub exclude_groups: Vec<String>,
    /// Share one working directory between all tests.
    pub common_tmp: Option<PathBuf>,
    /// Parent of per-test temporary directories (default: system temp).
    pub tmp_root: Option<PathBuf>,
    /// Change the process working directory into each test's directory.
    pub chdir: bool,
    /// List the root tests that would run, then stop.
    pub preview: bool,
    /// Index reported in every record.
    pub worker_i: usize,
}

impl Default for ZestConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(".zest_results"),
            allow_to_run: vec![ALLOW_ALL.to_string()],
            match_string: None,
            exclude_string: None,
            bypass_skip: Vec::new(),
            capture: false,
            verbose: 1,
            disable_shuffle: false,
            seed: None,
            add_markers: false,
            groups: Vec::new(),
            exclude_groups: Vec::new(),
            common_tmp: None,
            tmp_root: None,
            chdir: false,
            preview: false,
            worker_i: 0,
        }
    }
}

fn colon_list(v: &str) -> Vec<String> {
    v.split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn flag(v: &str) -> bool {
    v != "0" && !v.eq_ignore_ascii_case("false")
}

impl ZestConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse config from environment variables.
    ///
    /// Supported variables:
    /// - `ZEST_OUTPUT_DIR`: output directory (default: `.zest_results`)
    /// - `ZEST_ALLOW_TO_RUN`: colon-delimited full names
    /// - `ZEST_MATCH` / `ZEST_EXCLUDE`: root name globs
    /// - `ZEST_BYPASS_SKIP`: colon-delimited skip reasons or full names
    /// - `ZEST_CAPTURE`, `ZEST_DISABLE_SHUFFLE`, `ZEST_CHDIR`: flags
    /// - `ZEST_VERBOSE`: 0 to 3
    /// - `ZEST_SEED`: shuffle seed
    /// - `ZEST_GROUPS` / `ZEST_EXCLUDE_GROUPS`: colon-delimited group labels
    /// - `ZEST_COMMON_TMP` / `ZEST_TMP_ROOT`: working directory policy
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ZEST_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ZEST_ALLOW_TO_RUN") {
            let list = colon_list(&v);
            if !list.is_empty() {
                cfg.allow_to_run = list;
            }
        }
        if let Ok(v) = std::env::var("ZEST_MATCH") {
            cfg.match_string = Some(v);
        }
        if let Ok(v) = std::env::var("ZEST_EXCLUDE") {
            cfg.exclude_string = Some(v);
        }
        if let Ok(v) = std::env::var("ZEST_BYPASS_SKIP") {
            cfg.bypass_skip = colon_list(&v);
        }
        if let Ok(v) = std::env::var("ZEST_CAPTURE") {
            cfg.capture = flag(&v);
        }
        if let Ok(v) = std::env::var("ZEST_VERBOSE") {
            if let Ok(n) = v.parse() {
                cfg.verbose = n;
            }
        }
        if let Ok(v) = std::env::var("ZEST_DISABLE_SHUFFLE") {
            cfg.disable_shuffle = flag(&v);
        }
        if let Ok(v) = std::env::var("ZEST_SEED") {
            if let Ok(n) = v.parse() {
                cfg.seed = Some(n);
            }
        }
        if let Ok(v) = std::env::var("ZEST_GROUPS") {
            cfg.groups = colon_list(&v);
        }
        if let Ok(v) = std::env::var("ZEST_EXCLUDE_GROUPS") {
            cfg.exclude_groups = colon_list(&v);
        }
        if let Ok(v) = std::env::var("ZEST_COMMON_TMP") {
            cfg.common_tmp = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ZEST_TMP_ROOT") {
            cfg.tmp_root = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ZEST_CHDIR") {
            cfg.chdir = flag(&v);
        }

        cfg
    }

    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    /// Set the allow-list from a colon-delimited string.
    pub fn allow_to_run(mut self, list: &str) -> Self {
        self.allow_to_run = colon_list(list);
        self
    }

    pub fn match_string(mut self, pattern: impl Into<String>) -> Self {
        self.match_string = Some(pattern.into());
        self
    }

    pub fn exclude_string(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_string = Some(pattern.into());
        self
    }

    pub fn bypass_skip(mut self, list: &str) -> Self {
        self.bypass_skip = colon_list(list);
        self
    }

    pub fn capture(mut self, v: bool) -> Self {
        self.capture = v;
        self
    }

    pub fn verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    pub fn disable_shuffle(mut self, v: bool) -> Self {
        self.disable_shuffle = v;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn add_markers(mut self, v: bool) -> Self {
        self.add_markers = v;
        self
    }

    pub fn groups(mut self, list: &str) -> Self {
        self.groups = colon_list(list);
        self
    }

    pub fn exclude_groups(mut self, list: &str) -> Self {
        self.exclude_groups = colon_list(list);
        self
    }

    pub fn common_tmp(mut self, path: impl Into<PathBuf>) -> Self {
        self.common_tmp = Some(path.into());
        self
    }

    pub fn tmp_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmp_root = Some(path.into());
        self
    }

    pub fn chdir(mut self, v: bool) -> Self {
        self.chdir = v;
        self
    }

    pub fn preview(mut self, v: bool) -> Self {
        self.preview = v;
        self
    }

    pub fn worker_i(mut self, i: usize) -> Self {
        self.worker_i = i;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_use_defaults_when_env_not_set() {
        let cfg = ZestConfig::default();
        assert_eq!(cfg.allow_to_run, vec![ALLOW_ALL.to_string()]);
        assert_eq!(cfg.verbose, 1);
        assert!(!cfg.capture);
        assert!(!cfg.disable_shuffle);
    }

    #[test]
    fn should_build_config_with_builder() {
        let cfg = ZestConfig::new()
            .allow_to_run("a.b:c.")
            .bypass_skip("flaky network")
            .verbose(2)
            .seed(7)
            .groups("slow:db");

        assert_eq!(cfg.allow_to_run, vec!["a.b".to_string(), "c.".to_string()]);
        assert_eq!(cfg.bypass_skip, vec!["flaky network".to_string()]);
        assert_eq!(cfg.verbose, 2);
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.groups.len(), 2);
    }
}
