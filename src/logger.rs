//! `log` sink for a target with no allocator and no console
//!
//! Records are formatted into a fixed buffer and held until someone drains
//! them. A record either goes in whole or is dropped and counted, so a
//! drained log never contains half a line.

// Copyright (c) 2024 The H-RTK bridge firmware authors
//
// This file is part of the H-RTK bridge firmware.
//
// The H-RTK bridge firmware is free software: you can redistribute it and/or modify it under
// the terms only of version 3 of the GNU General Public License as published
// by the Free Software Foundation
//
// The H-RTK bridge firmware is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along with
// the H-RTK bridge firmware(in a file named COPYING).
// If not, see <https://www.gnu.org/licenses/>.

use arrayvec::ArrayString;
use core::cell::RefCell;
use core::fmt::{Arguments, Write as FmtWrite};
use critical_section::Mutex;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Total buffered text
pub const LOG_CAPACITY: usize = 1024;
/// Longest single record, anything longer is dropped
pub const RECORD_CAPACITY: usize = 128;

/// Text made of whole log lines, plus a count of lines that didn't fit
pub struct LogBuffer<const N: usize> {
    text: ArrayString<N>,
    dropped: u32,
}

impl<const N: usize> LogBuffer<N> {
    pub const fn new() -> Self {
        Self {
            text: ArrayString::new_const(),
            dropped: 0,
        }
    }

    /// Format and append one record. Returns `false` and counts it if the
    /// line is too long or the buffer too full.
    pub fn push_record(&mut self, level: Level, args: &Arguments) -> bool {
        let mut line = ArrayString::<RECORD_CAPACITY>::new();
        let stored = write!(&mut line, "[{}] {}\r\n", level, args).is_ok()
            && self.text.try_push_str(&line).is_ok();
        if !stored {
            self.dropped = self.dropped.saturating_add(1);
        }
        stored
    }

    /// Hand the buffered text to `sink` and clear it
    pub fn take<F: FnMut(&str)>(&mut self, mut sink: F) {
        if !self.text.is_empty() {
            sink(&self.text);
            self.text.clear();
        }
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl<const N: usize> Default for LogBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

static LOG_BUFFER: Mutex<RefCell<LogBuffer<LOG_CAPACITY>>> =
    Mutex::new(RefCell::new(LogBuffer::new()));

static LOGGER: BufferLogger = BufferLogger;

pub struct BufferLogger;

impl Log for BufferLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        critical_section::with(|cs| {
            LOG_BUFFER
                .borrow_ref_mut(cs)
                .push_record(record.level(), record.args());
        });
    }

    fn flush(&self) {}
}

/// Install the buffer logger and set the max level.
///
/// Only the first call installs anything, later calls just change the level.
pub fn init(level: LevelFilter) {
    critical_section::with(|_| {
        // SAFETY: runs with interrupts masked, so nothing can race the
        // logger installation
        unsafe {
            let _ = log::set_logger_racy(&LOGGER);
            log::set_max_level_racy(level);
        }
    });
}

/// Change the level filter after [`init`]
pub fn set_level(level: LevelFilter) {
    critical_section::with(|_| {
        // SAFETY: same as in `init`
        unsafe { log::set_max_level_racy(level) }
    });
}

/// Hand everything buffered so far to `sink`, then empty the buffer.
///
/// `sink` runs inside a critical section, keep it short.
pub fn drain<F: FnMut(&str)>(sink: F) {
    critical_section::with(|cs| LOG_BUFFER.borrow_ref_mut(cs).take(sink));
}

/// Records lost to a full buffer or an oversized line
pub fn dropped() -> u32 {
    critical_section::with(|cs| LOG_BUFFER.borrow_ref(cs).dropped())
}
