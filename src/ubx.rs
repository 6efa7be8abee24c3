//! Builders for the receiver's binary configuration frames
//!
//! Every frame on the wire looks like
//!
//! ```text
//!  B5 62 | class | id | len_lo len_hi | payload... | ck_a ck_b
//! ```
//!
//! The checksum covers class through the end of the payload, never the sync
//! bytes.

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
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::errors::{BridgeError, InvalidPayloadSnafu};

pub const SYNC_CHAR_1: u8 = 0xB5;
pub const SYNC_CHAR_2: u8 = 0x62;

/// Sync, class, id and two length bytes in front, two checksum bytes behind
pub const FRAME_OVERHEAD: usize = 8;

/// Largest payload a [`ConfigFrame`] can carry. Every command the firmware
/// sends is far smaller.
pub const MAX_PAYLOAD_LEN: usize = 64;

type FrameBuffer = ArrayVec<u8, { MAX_PAYLOAD_LEN + FRAME_OVERHEAD }>;

/// Message classes the firmware talks about
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageClass {
    Nav = 0x01,
    Ack = 0x05,
    Cfg = 0x06,
    /// External sensor fusion
    Esf = 0x10,
    /// Standard ASCII sentences
    Nmea = 0xF0,
}

/// Message ids, grouped by the class they belong to
pub mod id {
    pub const CFG_MSG: u8 = 0x01;

    pub const ESF_MEAS: u8 = 0x02;
    pub const ESF_RAW: u8 = 0x03;

    pub const NMEA_GGA: u8 = 0x00;
    pub const NMEA_GSA: u8 = 0x02;
    pub const NMEA_GSV: u8 = 0x03;
    pub const NMEA_RMC: u8 = 0x04;
    pub const NMEA_VTG: u8 = 0x05;
}

/// Physical interfaces of the receiver, in the order CFG-MSG lists their rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Port {
    I2c = 0,
    /// Primary serial, wired to the bridge
    Uart1 = 1,
    Uart2 = 2,
    /// The receiver's own USB port
    Usb = 3,
    Spi = 4,
    Reserved = 5,
}

/// Output rate per interface. 0 disables the message on that interface,
/// n outputs it once every n navigation solutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortRates(pub [u8; 6]);

impl PortRates {
    /// Rate on a single port, everything else off
    pub fn only(port: Port, rate: u8) -> Self {
        Self::default().with(port, rate)
    }

    pub fn with(mut self, port: Port, rate: u8) -> Self {
        self.0[u8::from(port) as usize] = rate;
        self
    }

    pub fn rate(&self, port: Port) -> u8 {
        self.0[u8::from(port) as usize]
    }
}

/// A complete frame, ready to be written to the receiver link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFrame {
    bytes: FrameBuffer,
}

impl ConfigFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn class(&self) -> u8 {
        self.bytes[2]
    }

    pub fn id(&self) -> u8 {
        self.bytes[3]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[6..self.bytes.len() - 2]
    }

    /// The trailing (ck_a, ck_b) pair
    pub fn checksum(&self) -> (u8, u8) {
        let len = self.bytes.len();
        (self.bytes[len - 2], self.bytes[len - 1])
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl AsRef<[u8]> for ConfigFrame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// 8-bit Fletcher checksum over `bytes`, returned as (ck_a, ck_b)
pub fn checksum(bytes: &[u8]) -> (u8, u8) {
    let mut ck_a: u8 = 0;
    let mut ck_b: u8 = 0;

    for byte in bytes {
        ck_a = ck_a.wrapping_add(*byte);
        ck_b = ck_b.wrapping_add(ck_a);
    }

    (ck_a, ck_b)
}

/// Wrap `payload` into a frame of the given class and id.
///
/// Fails with [`BridgeError::InvalidPayload`] when the payload does not fit
/// in the length field or in the frame buffer.
pub fn build_frame(class: u8, id: u8, payload: &[u8]) -> Result<ConfigFrame, BridgeError> {
    let len = payload.len();
    if len > u16::MAX as usize || len > MAX_PAYLOAD_LEN {
        return InvalidPayloadSnafu { len }.fail();
    }

    let mut bytes = FrameBuffer::new();
    bytes.push(SYNC_CHAR_1);
    bytes.push(SYNC_CHAR_2);
    bytes.push(class);
    bytes.push(id);
    bytes.extend((len as u16).to_le_bytes());
    // Can't fail, the length was checked against the capacity above
    bytes
        .try_extend_from_slice(payload)
        .map_err(|_| InvalidPayloadSnafu { len }.build())?;

    let (ck_a, ck_b) = checksum(&bytes[2..]);
    bytes.push(ck_a);
    bytes.push(ck_b);

    Ok(ConfigFrame { bytes })
}

/// CFG-MSG, long form: set the output rate of a message on every interface
pub fn build_enable_message_command(
    msg_class: u8,
    msg_id: u8,
    rates: PortRates,
) -> Result<ConfigFrame, BridgeError> {
    let mut payload = [0u8; 8];
    payload[0] = msg_class;
    payload[1] = msg_id;
    payload[2..].copy_from_slice(&rates.0);

    build_frame(MessageClass::Cfg.into(), id::CFG_MSG, &payload)
}

/// CFG-MSG, short form: set the output rate on whichever interface the
/// command arrives on
pub fn build_set_current_port_rate(
    msg_class: u8,
    msg_id: u8,
    rate: u8,
) -> Result<ConfigFrame, BridgeError> {
    build_frame(MessageClass::Cfg.into(), id::CFG_MSG, &[msg_class, msg_id, rate])
}

/// Turn on ESF-RAW once per solution on the bridge link
pub fn enable_esf_raw() -> Result<ConfigFrame, BridgeError> {
    build_set_current_port_rate(MessageClass::Esf.into(), id::ESF_RAW, 1)
}

/// Turn on ESF-MEAS once per solution on the bridge link
pub fn enable_esf_meas() -> Result<ConfigFrame, BridgeError> {
    build_set_current_port_rate(MessageClass::Esf.into(), id::ESF_MEAS, 1)
}

/// Turn on one NMEA sentence on UART1, keeping it on USB as well
pub fn enable_nmea_on_uart1(sentence_id: u8) -> Result<ConfigFrame, BridgeError> {
    let rates = PortRates::only(Port::Uart1, 1).with(Port::Usb, 1);
    build_enable_message_command(MessageClass::Nmea.into(), sentence_id, rates)
}

/// Check a complete frame: sync bytes, declared length and checksum
pub fn is_valid_frame(bytes: &[u8]) -> bool {
    if bytes.len() < FRAME_OVERHEAD || bytes[0] != SYNC_CHAR_1 || bytes[1] != SYNC_CHAR_2 {
        return false;
    }

    let len = u16::from_le_bytes([bytes[4], bytes[5]]) as usize;
    if bytes.len() != len + FRAME_OVERHEAD {
        return false;
    }

    let body_end = bytes.len() - 2;
    checksum(&bytes[2..body_end]) == (bytes[body_end], bytes[body_end + 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn checksum_of_empty_cfg_msg() {
        assert_eq!(checksum(&[0x06, 0x01, 0x00, 0x00]), (0x07, 0x1B));
    }

    #[test]
    fn esf_raw_enable_matches_known_bytes() {
        let frame = enable_esf_raw().unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0xB5, 0x62, 0x06, 0x01, 0x03, 0x00, 0x10, 0x03, 0x01, 0x1E, 0x76]
        );
    }

    #[test]
    fn nmea_enable_sets_uart1_and_usb_only() {
        let frame = enable_nmea_on_uart1(id::NMEA_GGA).unwrap();

        assert_eq!(frame.class(), 0x06);
        assert_eq!(frame.id(), 0x01);
        assert_eq!(frame.payload(), &[0xF0, 0x00, 0, 1, 0, 1, 0, 0]);
        assert_eq!(frame.checksum(), (0x01, 0x2B));
        assert_eq!(frame.len(), 16);
    }

    #[test]
    fn long_form_carries_all_six_rates() {
        let rates = PortRates::only(Port::Uart1, 1);
        assert_eq!(rates.rate(Port::Uart1), 1);
        assert_eq!(rates.rate(Port::Usb), 0);

        let frame = build_enable_message_command(0x10, id::ESF_MEAS, rates).unwrap();
        assert_eq!(frame.payload(), &[0x10, 0x02, 0, 1, 0, 0, 0, 0]);
        assert!(is_valid_frame(frame.as_bytes()));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = [0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            build_frame(0x06, 0x01, &payload),
            Err(BridgeError::InvalidPayload { len: MAX_PAYLOAD_LEN + 1 })
        );
    }

    #[test]
    fn corrupted_frames_fail_validation() {
        let frame = enable_esf_meas().unwrap();
        let mut bytes = frame.as_bytes().to_vec();
        assert!(is_valid_frame(&bytes));

        bytes[6] ^= 0x01;
        assert!(!is_valid_frame(&bytes));

        assert!(!is_valid_frame(&frame.as_bytes()[..frame.len() - 1]));
        assert!(!is_valid_frame(&[0xB5, 0x62]));
    }

    #[test]
    fn message_class_round_trips_through_u8() {
        assert_eq!(MessageClass::try_from(0xF0).ok(), Some(MessageClass::Nmea));
        assert!(MessageClass::try_from(0x42).is_err());
    }

    proptest! {
        #[test]
        fn frame_checksum_covers_body(
            class in any::<u8>(),
            id in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_LEN),
        ) {
            let frame = build_frame(class, id, &payload).unwrap();
            let bytes = frame.as_bytes();

            prop_assert_eq!(bytes.len(), FRAME_OVERHEAD + payload.len());
            prop_assert_eq!(checksum(&bytes[2..bytes.len() - 2]), frame.checksum());
            prop_assert_eq!(frame.payload(), &payload[..]);
            prop_assert!(is_valid_frame(bytes));
        }

        #[test]
        fn swapping_neighbours_changes_checksum(
            mut payload in proptest::collection::vec(any::<u8>(), 2..32),
            i in 0usize..31,
        ) {
            let i = i % (payload.len() - 1);
            prop_assume!(payload[i] != payload[i + 1]);

            let before = checksum(&payload);
            payload.swap(i, i + 1);
            prop_assert_ne!(before, checksum(&payload));
        }
    }
}
