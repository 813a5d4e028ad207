//! # zest
//!
//! A nested test runner where test groups are plain functions.
//!
//! A root test opens a scope, registers its nested tests and hooks, and runs
//! them. Each nested test may do the same, to any depth. Tests within a group
//! run in shuffled order, `_before`/`_after` hooks wrap every test of their
//! group, and every start and stop is streamed to reporters and event files.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zest::{zest, zest_main, Zest, TestResult};
//!
//! #[zest]
//! fn zest_parse(z: &mut Zest<'_>) -> TestResult {
//!     let mut s = z.scope();
//!     s.test("it_parses_numbers", |_z: &mut Zest<'_>| {
//!         assert_eq!("42".parse::<u32>().ok(), Some(42));
//!     });
//!     s.test("zest_errors", |z: &mut Zest<'_>| -> TestResult {
//!         let mut s = z.scope();
//!         s.test("it_rejects_words", |_z: &mut Zest<'_>| assert!("abc".parse::<u32>().is_err()));
//!         s.run()?;
//!         Ok(())
//!     });
//!     s.run()?;
//!     Ok(())
//! }
//!
//! zest_main!();
//! ```
//!
//! Put the file under `tests/` (or any `[[test]]` target) with
//! `harness = false`, then run it with `cargo test`.
//!
//! ## Modules
//!
//! - [`engine`]: scopes, hooks, shuffling and the per-test lifecycle
//! - [`mock`]: call-recording mocks and swappable [`Seam`](mock::Seam)s
//! - [`raises`]: asserting on the error a block returns
//! - [`capture`]: per-test stdout, stderr and log buffers
//! - [`report`]: console and event-stream reporters

// lets the proc macros name `::zest` from inside this crate too
extern crate self as zest;

pub mod capture;
pub mod config;
mod context;
pub mod decorators;
pub mod engine;
pub mod error;
pub mod harness;
pub mod mock;
pub mod raises;
pub mod report;
pub mod result;
pub mod runner;
pub mod unwind;

pub use config::ZestConfig;
pub use context::Zest;
pub use engine::{check_allow_to_run, AllowList, Engine, Scope, Test};
pub use error::{Failure, IntoTestResult, TestError, TestOutcome, TestResult, ZestError};
pub use report::{ConsoleReporter, EventStreamReporter, MultiReporter, Reporter};
pub use result::{load_previous_failures, RunSummary, ZestResult};
pub use runner::{RootTest, ZestRunner};

// Re-export the proc macros
pub use zest_macros::{zest, zest_main};

// Re-export for the proc macros
#[doc(hidden)]
pub mod __private {
    pub use crate::harness::linkme;
    pub use crate::harness::ZEST_ROOTS;
    pub use crate::runner::RootTest;
}
