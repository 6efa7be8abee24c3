//! Board wiring and the tunables read by the bridge loop
//!
//! There is no configuration storage, everything here is compiled in.

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

use fugit::MillisDurationU32;

// Receiver link, UART0
pub const UART_BAUDRATE: u32 = 115_200;
pub const UART_TX_PIN: u8 = 0; // GP0 -> receiver RX
pub const UART_RX_PIN: u8 = 1; // GP1 <- receiver TX

// Sensor bus, I2C0
pub const I2C_SDA_PIN: u8 = 4;
pub const I2C_SCL_PIN: u8 = 5;
pub const I2C_FREQ_HZ: u32 = 400_000;

// Indicators
pub const STATUS_LED_PIN: u8 = 25;
pub const LED_RING_PIN: u8 = 15;
pub const LED_RING_COUNT: usize = 16;
pub const BUZZER_PIN: u8 = 16;

/// Largest chunk pulled off the receiver link per iteration
pub const UART_BUFFER_SIZE: usize = 512;
/// Largest chunk pulled off the host channel per iteration
pub const USB_BUFFER_SIZE: usize = 64;
/// Bytes the host-bound queue can hold before whole records get dropped
pub const HOST_QUEUE_SIZE: usize = 2048;

/// Time the receiver needs after power up before it accepts commands
pub const RECEIVER_BOOT_MS: u32 = 1_000;
/// Gap left between startup configuration frames
pub const COMMAND_GAP_MS: u32 = 100;

/// Local total field in µT, tuned for central Japan.
///
/// Used as a disturbance baseline, not as a field model.
pub const DEFAULT_REFERENCE_FIELD_UT: f32 = 46.0;

/// Tunables the core reads every iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeConfig {
    /// Minimum spacing between magnetometer reads (20Hz)
    pub mag_read_interval: MillisDurationU32,
    /// Minimum spacing between heartbeat LED toggles
    pub heartbeat_interval: MillisDurationU32,
    /// Field strength the noise level is measured against, in µT
    pub reference_field_ut: f32,
    /// Brightness applied to the LED ring, in percent
    pub led_brightness_pct: u8,
    /// Number of LEDs on the ring
    pub led_count: usize,
    pub led_enabled: bool,
    pub buzzer_enabled: bool,
    /// Turn on GGA/RMC/VTG on the receiver's UART1 during startup
    pub enable_nmea_on_boot: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mag_read_interval: MillisDurationU32::millis(50),
            heartbeat_interval: MillisDurationU32::millis(100),
            reference_field_ut: DEFAULT_REFERENCE_FIELD_UT,
            led_brightness_pct: 25,
            led_count: LED_RING_COUNT,
            led_enabled: true,
            buzzer_enabled: true,
            enable_nmea_on_boot: true,
        }
    }
}

impl BridgeConfig {
    /// Plain bridge: pass-through and the magnetometer sentence, no feedback
    pub fn minimal() -> Self {
        Self {
            led_enabled: false,
            buzzer_enabled: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_only_turns_off_feedback() {
        let full = BridgeConfig::default();
        let minimal = BridgeConfig::minimal();

        assert!(!minimal.led_enabled);
        assert!(!minimal.buzzer_enabled);
        assert_eq!(minimal.mag_read_interval, full.mag_read_interval);
        assert_eq!(minimal.reference_field_ut, full.reference_field_ut);
    }
}
