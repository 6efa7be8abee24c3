//! Driver for the IST8310 3-axis magnetometer inside the H-RTK module
//!
//! The sensor runs in single measurement mode: every read re-arms the next
//! conversion, so the driver clocks itself as long as the caller polls no
//! faster than the conversion time. Readings come out in µT along with a
//! `$PIMAG` sentence that can share the host channel with the receiver's
//! own NMEA output.

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
use core::fmt::Write as FmtWrite;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::i2c::{Write, WriteRead};
use log::{debug, info, trace, warn};
use nalgebra::Vector3;

use crate::errors::{BridgeError, BusFaultSnafu, DeviceNotFoundSnafu, InitializationFailedSnafu};

/// Default 7-bit bus address
pub const IST8310_ADDR: u8 = 0x0E;

/// Register map, only what the driver touches
#[allow(dead_code)]
pub mod regs {
    pub const WAI: u8 = 0x00;
    pub const STAT1: u8 = 0x02;
    pub const DATAX_L: u8 = 0x03;
    pub const CNTL1: u8 = 0x0A;
    pub const CNTL2: u8 = 0x0B;
}

/// STAT1 bit 0, set when a conversion is waiting to be read
const STAT1_DRDY: u8 = 0b0000_0001;
/// CNTL1 value that starts one conversion
const CNTL1_SINGLE: u8 = 0b0000_0001;
/// CNTL2 bit 0 triggers a soft reset
const CNTL2_SRST: u8 = 0b0000_0001;

/// Settle time after a soft reset
const RESET_SETTLE_MS: u32 = 50;
/// Settle time after the first conversion is triggered
const TRIGGER_SETTLE_MS: u32 = 10;

/// Sensitivity, 0.3µT/LSB
pub const SENSITIVITY_UT_PER_LSB: f32 = 0.3;

/// Longest `$PIMAG` sentence is 47 bytes (3 axes at -9830.40, magnitude at
/// 17026.75), leave some slack
pub const SENTENCE_CAPACITY: usize = 64;

pub type Sentence = ArrayString<SENTENCE_CAPACITY>;

/// One reading of the field, in µT
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagneticSample(pub Vector3<f32>);

impl MagneticSample {
    pub fn new(x_ut: f32, y_ut: f32, z_ut: f32) -> Self {
        Self(Vector3::new(x_ut, y_ut, z_ut))
    }

    /// Scale three raw register words into a sample
    pub fn from_raw(raw: [u16; 3]) -> Self {
        Self::new(
            raw_to_signed(raw[0]) as f32 * SENSITIVITY_UT_PER_LSB,
            raw_to_signed(raw[1]) as f32 * SENSITIVITY_UT_PER_LSB,
            raw_to_signed(raw[2]) as f32 * SENSITIVITY_UT_PER_LSB,
        )
    }

    pub fn x(&self) -> f32 {
        self.0.x
    }

    pub fn y(&self) -> f32 {
        self.0.y
    }

    pub fn z(&self) -> f32 {
        self.0.z
    }

    /// Total field strength
    pub fn magnitude(&self) -> f32 {
        self.0.norm()
    }

    /// How far the total field strays from `reference_ut`
    pub fn noise(&self, reference_ut: f32) -> f32 {
        libm::fabsf(self.magnitude() - reference_ut)
    }
}

/// Reinterpret a register word as two's complement.
///
/// Anything above 32767 wraps to negative, so 65535 is -1 and 32768 is
/// -32768.
pub fn raw_to_signed(raw: u16) -> i16 {
    raw as i16
}

/// XOR of every byte, as used by NMEA style sentences
pub fn sentence_checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, byte| acc ^ byte)
}

/// Render `sample` as `$PIMAG,<x>,<y>,<z>,<magnitude>*<CK>\r\n`.
///
/// Every field has two decimals, CK is the XOR of everything between `$`
/// and `*` in two uppercase hex digits.
pub fn format_sentence(sample: &MagneticSample) -> Sentence {
    let mut sentence = Sentence::new();

    // Can't overflow, see SENTENCE_CAPACITY
    let _ = write!(
        &mut sentence,
        "$PIMAG,{:.2},{:.2},{:.2},{:.2}",
        sample.x(),
        sample.y(),
        sample.z(),
        sample.magnitude()
    );
    let checksum = sentence_checksum(&sentence[1..]);
    let _ = write!(&mut sentence, "*{:02X}\r\n", checksum);

    sentence
}

/// Where the driver is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Uninitialized,
    Initialized,
}

/// IST8310 on a blocking I2C bus
pub struct Ist8310<I2C> {
    i2c: I2C,
    address: u8,
    state: SensorState,
    /// The write that starts the next conversion failed, retry it before
    /// looking at DRDY again
    rearm_pending: bool,
}

impl<I2C, E> Ist8310<I2C>
where
    I2C: WriteRead<Error = E> + Write<Error = E>,
{
    pub fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, IST8310_ADDR)
    }

    pub fn with_address(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            state: SensorState::Uninitialized,
            rearm_pending: false,
        }
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == SensorState::Initialized
    }

    /// Give the bus back
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Check the device answers, reset it and arm the first conversion.
    ///
    /// Blocks for the settle times, only meant for startup. On any failure
    /// the driver stays uninitialized and every read reports no data.
    pub fn initialize<D: DelayMs<u32>>(&mut self, delay: &mut D) -> Result<(), BridgeError> {
        self.state = SensorState::Uninitialized;
        self.rearm_pending = false;

        // Presence check, a NACK on the address ends up here
        let mut wai = [0u8; 1];
        self.i2c
            .write_read(self.address, &[regs::WAI], &mut wai)
            .map_err(|_| {
                warn!("IST8310 not found at {:#04x}", self.address);
                DeviceNotFoundSnafu { address: self.address }.build()
            })?;
        debug!("IST8310 answered, WAI={:#04x}", wai[0]);

        self.i2c
            .write(self.address, &[regs::CNTL2, CNTL2_SRST])
            .map_err(|_| InitializationFailedSnafu { stage: "soft reset" }.build())?;
        delay.delay_ms(RESET_SETTLE_MS);

        self.i2c
            .write(self.address, &[regs::CNTL1, CNTL1_SINGLE])
            .map_err(|_| InitializationFailedSnafu { stage: "first trigger" }.build())?;
        delay.delay_ms(TRIGGER_SETTLE_MS);

        self.state = SensorState::Initialized;
        info!("IST8310 initialized");
        Ok(())
    }

    /// Fetch a sample if one is ready.
    ///
    /// `Ok(None)` when uninitialized or when the current conversion hasn't
    /// finished yet. A bus fault leaves the driver initialized, the next poll
    /// simply tries again.
    ///
    /// Reading the data clears DRDY, so a sample that was read is returned
    /// even if starting the next conversion fails. That write is retried
    /// first thing on the next call.
    pub fn read_sample(&mut self) -> Result<Option<MagneticSample>, BridgeError> {
        if !self.is_initialized() {
            return Ok(None);
        }

        if self.rearm_pending {
            self.trigger_measurement()?;
        }

        let mut stat = [0u8; 1];
        self.read_registers(regs::STAT1, &mut stat)?;
        if stat[0] & STAT1_DRDY == 0 {
            return Ok(None);
        }

        // X_L, X_H, Y_L, Y_H, Z_L, Z_H
        let mut data = [0u8; 6];
        self.read_registers(regs::DATAX_L, &mut data)?;

        let raw = [
            u16::from_le_bytes([data[0], data[1]]),
            u16::from_le_bytes([data[2], data[3]]),
            u16::from_le_bytes([data[4], data[5]]),
        ];

        // A failure leaves `rearm_pending` set
        let _ = self.trigger_measurement();

        Ok(Some(MagneticSample::from_raw(raw)))
    }

    /// Start the next single conversion
    pub fn trigger_measurement(&mut self) -> Result<(), BridgeError> {
        let result = self
            .i2c
            .write(self.address, &[regs::CNTL1, CNTL1_SINGLE])
            .map_err(|_| {
                trace!("IST8310 trigger failed");
                BusFaultSnafu { register: regs::CNTL1 }.build()
            });
        self.rearm_pending = result.is_err();
        result
    }

    fn read_registers(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), BridgeError> {
        self.i2c
            .write_read(self.address, &[register], buffer)
            .map_err(|_| {
                trace!("IST8310 read of {:#04x} failed", register);
                BusFaultSnafu { register }.build()
            })
    }
}
