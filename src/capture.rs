//! Output capture through injected writers.
//!
//! Test code writes through [`Zest::stdout`](crate::Zest::stdout) and
//! [`Zest::stderr`](crate::Zest::stderr) instead of the process streams. Each
//! running test owns a frame on the [`CaptureStack`]; nested tests push more
//! frames, and popping a frame hands control back to the next-outer buffer.
//!
//! `tracing` output is routed through [`LogSink`], a single thread-local sink
//! that the stack swaps to the top frame's log buffer.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use tracing_subscriber::fmt::MakeWriter;

type Buffer = Rc<RefCell<Vec<u8>>>;

thread_local! {
    static LOG_SINK: RefCell<Option<Buffer>> = const { RefCell::new(None) };
}

struct CaptureFrame {
    stdout: Buffer,
    stderr: Buffer,
    logs: Buffer,
}

impl CaptureFrame {
    fn new() -> Self {
        Self {
            stdout: Rc::default(),
            stderr: Rc::default(),
            logs: Rc::default(),
        }
    }
}

/// Text read back from a popped capture frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub logs: String,
}

/// Re-entrant stack of capture buffers with a nesting pause counter.
pub struct CaptureStack {
    enabled: bool,
    frames: Vec<CaptureFrame>,
    paused: usize,
}

impl CaptureStack {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            frames: Vec::new(),
            paused: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused > 0
    }

    pub(crate) fn pause_depth(&self) -> usize {
        self.paused
    }

    /// Start a new capture scope on top of the current one.
    pub fn push(&mut self) {
        self.frames.push(CaptureFrame::new());
        self.sync_log_sink();
    }

    /// End the innermost scope. Returns `None` when capture is disabled.
    pub fn pop(&mut self) -> Option<Captured> {
        let frame = self.frames.pop()?;
        self.sync_log_sink();
        if !self.enabled {
            return None;
        }
        Some(Captured {
            stdout: drain(&frame.stdout),
            stderr: drain(&frame.stderr),
            logs: drain(&frame.logs),
        })
    }

    /// Route output to the real process streams until [`resume`](Self::resume).
    pub fn pause(&mut self) {
        self.paused += 1;
        self.sync_log_sink();
    }

    pub fn resume(&mut self) {
        self.paused = self.paused.saturating_sub(1);
        self.sync_log_sink();
    }

    /// Drop frames and pauses above the given marks.
    pub(crate) fn truncate(&mut self, depth: usize, paused: usize) {
        self.frames.truncate(depth);
        self.paused = paused.min(self.paused);
        self.sync_log_sink();
    }

    pub fn stdout(&self) -> CapturedWriter {
        match self.active() {
            Some(frame) => CapturedWriter::Buffer(frame.stdout.clone()),
            None => CapturedWriter::Stdout(io::stdout()),
        }
    }

    pub fn stderr(&self) -> CapturedWriter {
        match self.active() {
            Some(frame) => CapturedWriter::Buffer(frame.stderr.clone()),
            None => CapturedWriter::Stderr(io::stderr()),
        }
    }

    fn active(&self) -> Option<&CaptureFrame> {
        if !self.enabled || self.paused > 0 {
            return None;
        }
        self.frames.last()
    }

    fn sync_log_sink(&self) {
        let target = self.active().map(|f| f.logs.clone());
        LOG_SINK.with(|sink| *sink.borrow_mut() = target);
    }
}

impl Drop for CaptureStack {
    fn drop(&mut self) {
        if !self.frames.is_empty() {
            LOG_SINK.with(|sink| *sink.borrow_mut() = None);
        }
    }
}

fn drain(buf: &Buffer) -> String {
    let bytes = std::mem::take(&mut *buf.borrow_mut());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// A writer bound to the capture frame that was active when it was created.
pub enum CapturedWriter {
    Buffer(Buffer),
    Stdout(io::Stdout),
    Stderr(io::Stderr),
}

impl Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Buffer(b) => {
                b.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            Self::Stdout(s) => s.write(buf),
            Self::Stderr(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Buffer(_) => Ok(()),
            Self::Stdout(s) => s.flush(),
            Self::Stderr(s) => s.flush(),
        }
    }
}

/// `MakeWriter` for `tracing_subscriber::fmt` that writes into the active
/// capture frame, or to stderr when nothing is capturing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter
    }
}

pub struct LogWriter;

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let captured = LOG_SINK.with(|sink| match sink.borrow().as_ref() {
            Some(b) => {
                b.borrow_mut().extend_from_slice(buf);
                true
            }
            None => false,
        });
        if captured {
            Ok(buf.len())
        } else {
            io::stderr().write(buf)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_to_outer_buffer_when_inner_pops() {
        let mut stack = CaptureStack::new(true);
        stack.push();
        write!(stack.stdout(), "outer1 ").unwrap();
        stack.push();
        write!(stack.stdout(), "inner").unwrap();
        let inner = stack.pop().unwrap();
        write!(stack.stdout(), "outer2").unwrap();
        let outer = stack.pop().unwrap();

        assert_eq!(inner.stdout, "inner");
        assert_eq!(outer.stdout, "outer1 outer2");
    }

    #[test]
    fn should_bypass_buffer_while_paused() {
        let mut stack = CaptureStack::new(true);
        stack.push();
        stack.pause();
        assert!(matches!(stack.stdout(), CapturedWriter::Stdout(_)));
        stack.pause();
        stack.resume();
        assert!(stack.is_paused());
        stack.resume();
        write!(stack.stderr(), "kept").unwrap();
        assert_eq!(stack.pop().unwrap().stderr, "kept");
    }

    #[test]
    fn should_yield_live_streams_when_disabled() {
        let mut stack = CaptureStack::new(false);
        stack.push();
        assert!(matches!(stack.stdout(), CapturedWriter::Stdout(_)));
        assert_eq!(stack.depth(), 1);
        assert!(stack.pop().is_none());
    }

    #[test]
    fn should_route_log_writer_to_top_frame() {
        let mut stack = CaptureStack::new(true);
        stack.push();
        LogSink.make_writer().write_all(b"log line\n").unwrap();
        let captured = stack.pop().unwrap();
        assert_eq!(captured.logs, "log line\n");
    }
}
