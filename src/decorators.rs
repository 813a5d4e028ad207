//! Wrappers that change how a test body is run.
//!
//! ```rust
//! use zest::{decorators, Zest};
//!
//! fn group(z: &mut Zest<'_>) -> zest::TestResult {
//!     let mut s = z.scope();
//!     s.test("it_needs_a_database", decorators::skip("no database in CI", |_z: &mut Zest<'_>| {}));
//!     s.test("it_is_flaky", decorators::retry(3, |_z: &mut Zest<'_>| {}));
//!     s.run()?;
//!     Ok(())
//! }
//! ```

use crate::context::Zest;
use crate::error::{Failure, IntoTestResult, TestResult};
use crate::unwind;

/// Skip `body` with `reason`, unless the reason or the test's full name is
/// in the bypass list.
pub fn skip<'s, R: IntoTestResult>(
    reason: &str,
    mut body: impl FnMut(&mut Zest<'_>) -> R + 's,
) -> impl FnMut(&mut Zest<'_>) -> TestResult + 's {
    let reason = reason.to_string();
    move |z: &mut Zest<'_>| {
        if z.is_bypassed(&reason) {
            tracing::debug!(test = %z.current_test_full_name(), reason = %reason, "skip bypassed");
            return body(z).into_test_result();
        }
        Err(Failure::Skip(reason.clone()))
    }
}

/// Run `body` up to `n` times until it passes.
///
/// Errors and panics are retried; the last failure is reported. A skip is
/// never retried. `n == 0` behaves like `1`.
pub fn retry<'s, R: IntoTestResult>(
    n: usize,
    mut body: impl FnMut(&mut Zest<'_>) -> R + 's,
) -> impl FnMut(&mut Zest<'_>) -> TestResult + 's {
    move |z: &mut Zest<'_>| {
        let attempts = n.max(1);
        let mut last = Ok(());
        for attempt in 1..=attempts {
            // each attempt may open the group's scope afresh
            z.scopes_run = 0;
            let mark = z.state.mark();
            let result = match unwind::catch(|| body(z).into_test_result()) {
                Ok(r) => r,
                Err(panic) => {
                    z.state.restore(mark);
                    Err(Failure::Error(panic.to_test_error()))
                }
            };
            match result {
                Ok(()) => return Ok(()),
                Err(Failure::Skip(reason)) => return Err(Failure::Skip(reason)),
                Err(failure) => {
                    tracing::debug!(
                        test = %z.current_test_full_name(),
                        attempt,
                        attempts,
                        "attempt failed"
                    );
                    last = Err(failure);
                }
            }
        }
        last
    }
}
