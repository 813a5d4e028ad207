//! Panic trapping for test bodies.
//!
//! A failed `assert!` inside a test is an ordinary per-test error, so every
//! body runs under `catch_unwind`. The default panic hook would print the
//! message straight to the process stderr; while a catch is active on this
//! thread the hook records the panic instead.

use crate::error::TestError;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::sync::Once;

thread_local! {
    static CATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<PanicDetail>> = const { RefCell::new(None) };
}

static INSTALL: Once = Once::new();

#[derive(Debug, Clone)]
struct PanicDetail {
    message: String,
    location: Option<String>,
    backtrace: String,
}

/// A panic caught by [`catch`].
pub struct PanicRecord {
    pub message: String,
    pub location: Option<String>,
    pub backtrace: String,
    payload: Box<dyn Any + Send>,
}

impl PanicRecord {
    /// Convert into a per-test error.
    pub fn to_test_error(&self) -> TestError {
        let mut formatted = Vec::new();
        if let Some(location) = &self.location {
            formatted.push(format!("panicked at {}", location));
        }
        formatted.push(self.message.clone());
        formatted.extend(
            self.backtrace
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string),
        );
        TestError {
            kind: "Panic".to_string(),
            message: self.message.clone(),
            formatted,
        }
    }

    /// Continue unwinding with the original payload.
    pub fn resume(self) -> ! {
        panic::resume_unwind(self.payload)
    }
}

impl std::fmt::Debug for PanicRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanicRecord")
            .field("message", &self.message)
            .field("location", &self.location)
            .finish()
    }
}

fn install_hook() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            if CATCH_DEPTH.with(|d| d.get()) == 0 {
                previous(info);
                return;
            }
            let detail = PanicDetail {
                message: payload_message(info.payload()),
                location: info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
                backtrace: Backtrace::capture().to_string(),
            };
            LAST_PANIC.with(|p| *p.borrow_mut() = Some(detail));
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Run `f`, turning a panic into a [`PanicRecord`].
pub fn catch<R>(f: impl FnOnce() -> R) -> Result<R, PanicRecord> {
    install_hook();
    CATCH_DEPTH.with(|d| d.set(d.get() + 1));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CATCH_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));

    result.map_err(|payload| {
        let detail = LAST_PANIC.with(|p| p.borrow_mut().take());
        match detail {
            Some(d) => PanicRecord {
                message: d.message,
                location: d.location,
                backtrace: d.backtrace,
                payload,
            },
            None => PanicRecord {
                message: payload_message(payload.as_ref()),
                location: None,
                backtrace: String::new(),
                payload,
            },
        }
    })
}
