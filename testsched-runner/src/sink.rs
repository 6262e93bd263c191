// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output sinks for rendered test results.
//!
//! The scheduler only ever writes UTF-8 text, so sinks accept `&str` rather than arbitrary bytes.
//! This is similar to [`std::fmt::Write`], but returns [`std::io::Error`] so that failures to
//! write to a terminal or file can be propagated.

use std::{
    fmt,
    io::{self, BufWriter, Stdout, Write},
    sync::{Arc, Mutex, PoisonError},
};

/// A destination for rendered test output.
pub trait OutputSink {
    /// Writes a string to the sink.
    fn write_str(&mut self, s: &str) -> io::Result<()>;

    /// Flushes the sink, ensuring that buffered text reaches its destination.
    fn flush_sink(&mut self) -> io::Result<()>;

    /// Writes formatted text to the sink.
    fn write_fmt(&mut self, fmt: fmt::Arguments<'_>) -> io::Result<()> {
        // Fast path for literal-only format strings.
        match fmt.as_str() {
            Some(s) => self.write_str(s),
            None => self.write_str(&fmt::format(fmt)),
        }
    }
}

impl OutputSink for String {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.push_str(s);
        Ok(())
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> OutputSink for BufWriter<W> {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.write_all(s.as_bytes())
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl OutputSink for Stdout {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        let mut lock = self.lock();
        lock.write_all(s.as_bytes())?;
        // Output is line-oriented: make every completed line visible immediately.
        if s.ends_with('\n') {
            lock.flush()?;
        }
        Ok(())
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

impl<T: OutputSink + ?Sized> OutputSink for &mut T {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        (**self).write_str(s)
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        (**self).flush_sink()
    }
}

impl<T: OutputSink + ?Sized> OutputSink for Box<T> {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        (**self).write_str(s)
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        (**self).flush_sink()
    }
}

/// A cloneable in-memory sink.
///
/// Useful when the sink has to be handed to a runner by value while the caller still wants to
/// inspect what was written.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<String>>,
}

impl SharedBuffer {
    /// Creates a new, empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    pub fn contents(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OutputSink for SharedBuffer {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(s);
        Ok(())
    }

    fn flush_sink(&mut self) -> io::Result<()> {
        Ok(())
    }
}
