//! Harness for auto-discovered zests.
//!
//! ## Architecture
//!
//! When you use `#[zest]` and `zest_main!()`, this is what happens:
//!
//! 1. `#[zest]` registers each root function in a distributed slice via linkme
//! 2. `zest_main!()` generates a main() that calls [`zest_binary_main`]
//! 3. `zest_binary_main()` parses CLI args, installs logging and calls [`run_with_config`]
//! 4. `run_with_config()` runs every matching root through one [`ZestRunner`]
//!
//! Each zest binary is self-contained and handles its own argument parsing.
//! With `harness = false` in the `[[test]]` target, `cargo test` runs it like
//! any other test binary.

use crate::capture::LogSink;
use crate::config::ZestConfig;
use crate::result::RunSummary;
use crate::runner::{RootTest, ZestRunner};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// Re-export linkme for the proc macro
#[doc(hidden)]
pub use linkme;

/// Distributed slice collecting all registered root zests.
#[doc(hidden)]
#[linkme::distributed_slice]
pub static ZEST_ROOTS: [RootTest];

/// Command line of a zest binary.
///
/// Every flag overrides the matching `ZEST_*` environment variable.
#[derive(Debug, Default, Parser)]
#[command(name = "zest", about = "Run the zests registered in this binary")]
pub struct HarnessArgs {
    /// Run only roots whose name or module path matches this glob
    pub match_string: Option<String>,

    /// Skip roots whose name matches this glob
    #[arg(long, short = 'x')]
    pub exclude: Option<String>,

    /// Colon-delimited full names to run; `__all__` or `__failed__`
    #[arg(long)]
    pub allow: Option<String>,

    /// Colon-delimited skip reasons or full names to run anyway
    #[arg(long)]
    pub bypass_skip: Option<String>,

    /// Colon-delimited groups to run
    #[arg(long)]
    pub groups: Option<String>,

    /// Colon-delimited groups to leave out
    #[arg(long)]
    pub exclude_groups: Option<String>,

    /// Increase verbosity (-v tree, -vv debug logs)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print the summary line
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Capture stdout, stderr and logs of each test
    #[arg(long)]
    pub capture: bool,

    /// Run tests in declaration order
    #[arg(long)]
    pub disable_shuffle: bool,

    /// Seed for the shuffle
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory for event files and the run summary
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Share this directory between tests instead of a temp dir per test
    #[arg(long)]
    pub common_tmp: Option<PathBuf>,

    /// Parent directory for per-test temp dirs
    #[arg(long)]
    pub tmp_root: Option<PathBuf>,

    /// Change into each test's working directory while it runs
    #[arg(long)]
    pub chdir: bool,

    /// Print machine-readable start and stop markers
    #[arg(long)]
    pub add_markers: bool,

    /// Print the roots that would run and exit
    #[arg(long)]
    pub preview: bool,

    /// List registered roots and exit
    #[arg(long)]
    pub list: bool,
}

impl HarnessArgs {
    /// Layer the command line on top of `config`.
    pub fn apply(self, mut config: ZestConfig) -> ZestConfig {
        if let Some(m) = self.match_string {
            config = config.match_string(m);
        }
        if let Some(x) = self.exclude {
            config = config.exclude_string(x);
        }
        if let Some(a) = self.allow {
            config = config.allow_to_run(&a);
        }
        if let Some(b) = self.bypass_skip {
            config = config.bypass_skip(&b);
        }
        if let Some(g) = self.groups {
            config = config.groups(&g);
        }
        if let Some(g) = self.exclude_groups {
            config = config.exclude_groups(&g);
        }
        if self.quiet {
            config = config.verbose(0);
        } else if self.verbose > 0 {
            config = config.verbose((1 + self.verbose).min(3));
        }
        if self.capture {
            config = config.capture(true);
        }
        if self.disable_shuffle {
            config = config.disable_shuffle(true);
        }
        if let Some(seed) = self.seed {
            config = config.seed(seed);
        }
        if let Some(dir) = self.output_dir {
            config = config.output_dir(dir);
        }
        if let Some(dir) = self.common_tmp {
            config = config.common_tmp(dir);
        }
        if let Some(dir) = self.tmp_root {
            config = config.tmp_root(dir);
        }
        if self.chdir {
            config = config.chdir(true);
        }
        if self.add_markers {
            config = config.add_markers(true);
        }
        if self.preview {
            config = config.preview(true);
        }
        config
    }
}

/// Entry point for zest binaries, called by `zest_main!()`.
///
/// Exits with status 0 when everything passed and 1 otherwise.
pub fn zest_binary_main() {
    let args = HarnessArgs::parse();

    if args.list {
        let roots = list_roots();
        if roots.is_empty() {
            println!("No zests registered.");
            println!("Add #[zest] to your root test functions.");
        } else {
            println!("Registered zests ({}):", roots.len());
            for name in roots {
                println!("  {}", name);
            }
        }
        return;
    }

    let config = args.apply(ZestConfig::from_env());
    init_tracing(config.verbose);

    let summary = run_with_config(config);
    std::process::exit(summary.retcode());
}

/// Route `tracing` events through the capture log sink.
///
/// `RUST_LOG` wins; otherwise warnings, or debug at the highest verbosity.
pub fn init_tracing(verbose: u8) {
    let default = if verbose >= 3 { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed by the embedding program
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(LogSink)
        .try_init();
}

/// Run all registered zests with config from the environment.
pub fn run_registered_zests() -> RunSummary {
    run_with_config(ZestConfig::from_env())
}

/// Run all registered zests with explicit config.
pub fn run_with_config(config: ZestConfig) -> RunSummary {
    let mut roots: Vec<RootTest> = ZEST_ROOTS.iter().copied().collect();
    // linkme gives no ordering guarantee; shuffling starts from name order
    roots.sort_by(|a, b| a.name.cmp(b.name));

    let preview = config.preview;
    let mut runner = ZestRunner::with_config(&get_suite_name(), config);

    if preview {
        let selected: Vec<&RootTest> = roots.iter().filter(|r| runner.should_run(r)).collect();
        println!("Would run {} zest(s):", selected.len());
        for root in selected {
            println!("  {} ({})", root.name, root.source);
        }
        runner.reporters(vec![]);
        return runner.finish();
    }

    if roots.is_empty() {
        eprintln!("No zests registered. Add #[zest] to your root test functions.");
    }

    runner.run_all(&roots);
    runner.finish()
}

/// The suite name from the executable name.
fn get_suite_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .map(|name| {
            // cargo appends a 16 hex digit hash to test binaries
            match name.rsplit_once('-') {
                Some((stem, hash))
                    if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) =>
                {
                    stem.replace('_', "-")
                }
                _ => name.replace('_', "-"),
            }
        })
        .unwrap_or_else(|| "zest".to_string())
}

/// Case-insensitive glob supporting `*`; without one it is a substring match.
pub(crate) fn matches_glob(text: &str, pattern: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let text = text.to_lowercase();

    if !pattern.contains('*') {
        return text.contains(&pattern);
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let last = parts.len() - 1;
    let mut remaining = text.as_str();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match remaining.strip_prefix(part) {
                Some(rest) => remaining = rest,
                None => return false,
            }
        } else if i == last {
            return remaining.ends_with(part);
        } else {
            match remaining.find(part) {
                Some(pos) => remaining = &remaining[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Names of all registered roots.
pub fn list_roots() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = ZEST_ROOTS.iter().map(|r| r.name).collect();
    names.sort_unstable();
    names
}

/// Number of registered roots.
pub fn root_count() -> usize {
    ZEST_ROOTS.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_substring() {
        assert!(matches_glob("zest_parser", "pars"));
        assert!(!matches_glob("zest_parser", "lexer"));
    }

    #[test]
    fn glob_matches_wildcard() {
        assert!(matches_glob("zest_parser_numbers", "zest*numbers"));
        assert!(matches_glob("zest_parser_numbers", "*parser*"));
        assert!(matches_glob("zest_parser_numbers", "zest*"));
        assert!(matches_glob("zest_parser_numbers", "*numbers"));
        assert!(!matches_glob("zest_parser_numbers", "lexer*"));
        assert!(!matches_glob("zest_parser_numbers", "*parser"));
    }

    #[test]
    fn glob_is_case_insensitive() {
        assert!(matches_glob("ZestParser", "zestparser"));
        assert!(matches_glob("zestparser", "ZEST*"));
    }

    #[test]
    fn should_layer_args_over_config() {
        let args = HarnessArgs::parse_from([
            "zest",
            "parser",
            "--allow",
            "zest_a.it_b",
            "-vv",
            "--disable-shuffle",
            "--seed",
            "7",
            "--groups",
            "db:net",
        ]);
        let config = args.apply(ZestConfig::new());
        assert_eq!(config.match_string.as_deref(), Some("parser"));
        assert_eq!(config.allow_to_run, vec!["zest_a.it_b".to_string()]);
        assert_eq!(config.verbose, 3);
        assert!(config.disable_shuffle);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.groups, vec!["db".to_string(), "net".to_string()]);
    }

    #[test]
    fn should_quiet_output() {
        let args = HarnessArgs::parse_from(["zest", "-q"]);
        assert_eq!(args.apply(ZestConfig::new()).verbose, 0);
    }

    #[test]
    fn should_leave_config_alone_without_flags() {
        let args = HarnessArgs::parse_from(["zest"]);
        let config = args.apply(ZestConfig::new());
        assert_eq!(config.verbose, 1);
        assert!(!config.capture);
        assert!(config.match_string.is_none());
    }
}
