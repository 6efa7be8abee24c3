//! Errors in the bridge firmware

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

use snafu::prelude::*;

#[derive(Debug, Snafu, PartialEq, Eq, Clone, Copy)]
#[snafu(visibility(pub(crate)))]
pub enum BridgeError {
    #[snafu(display("(MAG) No device answered at address! address={address:#04x}"))]
    DeviceNotFound { address: u8 },
    #[snafu(display("(MAG) Bus fault during initialization! stage={stage}"))]
    InitializationFailed { stage: &'static str },
    #[snafu(display("(MAG) Bus fault while reading! register={register:#04x}"))]
    BusFault { register: u8 },
    #[snafu(display("(UBX) Payload does not fit in a frame! len={len}"))]
    InvalidPayload { len: usize },
}
