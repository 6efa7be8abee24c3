//! The cooperative bridge loop
//!
//! One call to [`Bridge::poll`] is one pass of the loop. A pass always runs
//! the same four steps in the same order: receiver to host, host to
//! receiver, magnetometer, beeper. None of them wait on anything.
//!
//! Everything that goes to the host passes through a [`HostQueue`] first.
//! Records are queued whole or not at all, and the queue is drained in
//! order, so a sensor sentence can never end up spliced into the middle of
//! receiver traffic even when the host link only takes part of a write.
//! The price is that when the host stops reading and the queue fills up,
//! whole records are thrown away: receiver chunks as well as sentences.
//! Dropped bytes are counted in [`BridgeStatistics::bytes_dropped`].

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

use arrayvec::ArrayVec;
use embedded_hal::blocking::i2c::{Write as I2cWrite, WriteRead};
use embedded_hal::digital::v2::OutputPin;
use embedded_io::blocking::Write;
use fugit::MillisDurationU32;
use log::trace;

use crate::config::{BridgeConfig, HOST_QUEUE_SIZE, UART_BUFFER_SIZE, USB_BUFFER_SIZE};
use crate::feedback::{LedRing, NoiseFeedback, Tone};
use crate::ist8310::{format_sentence, Ist8310};
use crate::{elapsed, Instant};

/// A byte channel that can be polled without blocking
pub trait ByteLink: Write {
    /// Copy whatever has already arrived into `buf`. `Ok(0)` means nothing
    /// is waiting; this never waits for more.
    fn poll_read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// FIFO of bytes waiting for the host link.
///
/// Holds [`HOST_QUEUE_SIZE`] bytes. A record that doesn't fit is refused
/// whole, whether it is a receiver chunk or a sensor sentence.
#[derive(Debug, Default)]
pub struct HostQueue {
    bytes: ArrayVec<u8, HOST_QUEUE_SIZE>,
}

impl HostQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a whole record. Returns `false`, leaving the queue untouched,
    /// if it doesn't fit.
    pub fn push(&mut self, record: &[u8]) -> bool {
        if record.len() > self.bytes.remaining_capacity() {
            return false;
        }
        self.bytes.try_extend_from_slice(record).is_ok()
    }

    /// Write out as much as `link` takes right now, oldest bytes first.
    /// Stops at the first write that accepts nothing.
    pub fn flush_into<W: Write>(&mut self, link: &mut W) -> Result<usize, W::Error> {
        let mut written = 0;
        while !self.bytes.is_empty() {
            let n = link.write(&self.bytes)?;
            if n == 0 {
                break;
            }
            self.bytes.drain(..n);
            written += n;
        }
        Ok(written)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

/// Diagnostic counters, they only ever go up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStatistics {
    /// Receiver bytes read off the link
    pub bytes_received: u64,
    /// Host bytes handed to the receiver
    pub bytes_sent: u64,
    pub loop_count: u64,
    /// Tick the bridge was created at
    pub start: Instant,
    /// `$PIMAG` sentences queued for the host
    pub sentences_sent: u32,
    /// Host-bound bytes thrown away because the queue was full
    pub bytes_dropped: u64,
    pub bus_faults: u32,
    pub link_errors: u32,
}

impl BridgeStatistics {
    fn new(start: Instant) -> Self {
        Self {
            bytes_received: 0,
            bytes_sent: 0,
            loop_count: 0,
            start,
            sentences_sent: 0,
            bytes_dropped: 0,
            bus_faults: 0,
            link_errors: 0,
        }
    }

    pub fn uptime(&self, now: Instant) -> MillisDurationU32 {
        elapsed(now, self.start)
    }
}

/// Owns both links, the magnetometer, the heartbeat LED and the feedback
/// controller, and runs the loop over them
pub struct Bridge<R, H, I2C, P, L, T> {
    receiver: R,
    host: H,
    magnetometer: Ist8310<I2C>,
    heartbeat: P,
    feedback: NoiseFeedback<L, T>,
    config: BridgeConfig,

    queue: HostQueue,
    heartbeat_on: bool,
    last_heartbeat: Instant,
    last_mag_read: Instant,
    stats: BridgeStatistics,
}

impl<R, H, I2C, E, P, L, T> Bridge<R, H, I2C, P, L, T>
where
    R: ByteLink,
    H: ByteLink,
    I2C: WriteRead<Error = E> + I2cWrite<Error = E>,
    P: OutputPin,
    L: LedRing,
    T: Tone,
{
    /// Takes the magnetometer as is; an uninitialized one just never
    /// produces samples.
    pub fn new(
        receiver: R,
        host: H,
        magnetometer: Ist8310<I2C>,
        heartbeat: P,
        mut feedback: NoiseFeedback<L, T>,
        config: BridgeConfig,
        now: Instant,
    ) -> Self {
        feedback.set_enabled(config.led_enabled, config.buzzer_enabled);

        Self {
            receiver,
            host,
            magnetometer,
            heartbeat,
            feedback,
            config,
            queue: HostQueue::new(),
            heartbeat_on: false,
            last_heartbeat: now,
            last_mag_read: now,
            stats: BridgeStatistics::new(now),
        }
    }

    /// One pass of the loop.
    ///
    /// If the host has not drained the queue, a receiver chunk or sentence
    /// that doesn't fit is dropped whole and counted, never split.
    pub fn poll(&mut self, now: Instant) {
        self.stats.loop_count += 1;

        self.forward_receiver(now);
        self.forward_host();
        self.sample_magnetometer(now);
        self.feedback.step_beep(now);
    }

    /// Queue an out of band record for the host, all or nothing
    pub fn push_host_record(&mut self, record: &[u8]) -> bool {
        let queued = self.enqueue(record);
        self.flush_host();
        queued
    }

    fn forward_receiver(&mut self, now: Instant) {
        let mut buf = [0u8; UART_BUFFER_SIZE];
        match self.receiver.poll_read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                self.stats.bytes_received += n as u64;
                self.enqueue(&buf[..n]);
                self.toggle_heartbeat(now);
            }
            Err(_) => self.stats.link_errors = self.stats.link_errors.saturating_add(1),
        }

        // Also retries whatever the host refused last pass
        self.flush_host();
    }

    fn forward_host(&mut self) {
        let mut buf = [0u8; USB_BUFFER_SIZE];
        let n = match self.host.poll_read(&mut buf) {
            Ok(n) => n,
            Err(_) => {
                self.stats.link_errors = self.stats.link_errors.saturating_add(1);
                return;
            }
        };

        let mut pending = &buf[..n];
        while !pending.is_empty() {
            match self.receiver.write(pending) {
                Ok(0) => break,
                Ok(written) => {
                    self.stats.bytes_sent += written as u64;
                    pending = &pending[written..];
                }
                Err(_) => {
                    self.stats.link_errors = self.stats.link_errors.saturating_add(1);
                    break;
                }
            }
        }
    }

    fn sample_magnetometer(&mut self, now: Instant) {
        if elapsed(now, self.last_mag_read) < self.config.mag_read_interval {
            return;
        }
        self.last_mag_read = now;

        match self.magnetometer.read_sample() {
            Ok(Some(sample)) => {
                self.feedback
                    .update(sample.noise(self.config.reference_field_ut));

                let sentence = format_sentence(&sample);
                if self.enqueue(sentence.as_bytes()) {
                    self.stats.sentences_sent = self.stats.sentences_sent.saturating_add(1);
                }
                self.flush_host();
            }
            Ok(None) => {}
            Err(e) => {
                trace!("magnetometer read skipped: {}", e);
                self.stats.bus_faults = self.stats.bus_faults.saturating_add(1);
            }
        }
    }

    fn enqueue(&mut self, record: &[u8]) -> bool {
        let queued = self.queue.push(record);
        if !queued {
            self.stats.bytes_dropped += record.len() as u64;
        }
        queued
    }

    fn flush_host(&mut self) {
        if self.queue.flush_into(&mut self.host).is_err() {
            self.stats.link_errors = self.stats.link_errors.saturating_add(1);
        }
    }

    fn toggle_heartbeat(&mut self, now: Instant) {
        if elapsed(now, self.last_heartbeat) <= self.config.heartbeat_interval {
            return;
        }

        self.heartbeat_on = !self.heartbeat_on;
        // The pin is write-only status, a failed write is not worth reporting
        let _ = if self.heartbeat_on {
            self.heartbeat.set_high()
        } else {
            self.heartbeat.set_low()
        };
        self.last_heartbeat = now;
    }

    pub fn statistics(&self) -> &BridgeStatistics {
        &self.stats
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn feedback(&self) -> &NoiseFeedback<L, T> {
        &self.feedback
    }

    pub fn magnetometer(&self) -> &Ist8310<I2C> {
        &self.magnetometer
    }

    pub fn host_queue(&self) -> &HostQueue {
        &self.queue
    }

    pub fn heartbeat_on(&self) -> bool {
        self.heartbeat_on
    }

    pub fn receiver(&self) -> &R {
        &self.receiver
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn receiver_mut(&mut self) -> &mut R {
        &mut self.receiver
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}
