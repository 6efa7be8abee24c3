//! Hardware independent half of the H-RTK bridge firmware
//!
//! Passes the GPS/INS receiver's serial stream through to a USB host, adds a
//! `$PIMAG` sentence from the IST8310 magnetometer and shows how disturbed
//! the local field is on an LED ring and a buzzer. Everything here talks to
//! the board through traits so it can be exercised on a desktop; the RP2040
//! bring-up lives in the firmware binary.

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

#![cfg_attr(not(test), no_std)]

pub mod bridge;
pub mod config;
pub mod errors;
pub mod feedback;
pub mod ist8310;
pub mod logger;
pub mod ubx;

pub use bridge::{Bridge, BridgeStatistics, ByteLink};
pub use config::BridgeConfig;
pub use errors::BridgeError;
pub use feedback::{LedRing, NoiseFeedback, Tone};
pub use ist8310::{Ist8310, MagneticSample};

use fugit::{MillisDurationU32, TimerInstantU32};

/// Millisecond tick. Wraps after about 49 days.
pub type Instant = TimerInstantU32<1_000>;

/// Time from `since` to `now`, correct across a wrap of the tick counter as
/// long as less than one full period has passed.
pub fn elapsed(now: Instant, since: Instant) -> MillisDurationU32 {
    MillisDurationU32::from_ticks(now.ticks().wrapping_sub(since.ticks()))
}
