// src/rvc/mod.rs
//
// RV-C protocol layer: 29-bit identifier helpers, inbound/outbound frame types,
// schema registry and the field codec.
//
// Identifier layout: priority (3 bits) | DGN (17 bits) | source address (8 bits).

pub mod codec;
pub mod schema;
pub mod value;

pub use codec::{decode, decode_frame, encode, encode_by_name};
pub use schema::{DgnSchema, FieldDescriptor, FieldKind, OverrideKind, SchemaRegistry};
pub use value::{field_map, DecodedMessage, FieldMap, FieldValue, NOT_AVAILABLE};

use serde::Serialize;

use crate::error::DecodeError;

/// SocketCAN flag marking a 29-bit identifier.
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Mask for the 29-bit identifier.
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
/// RV-C payloads are always a full classic CAN frame.
pub const PAYLOAD_LEN: usize = 8;
pub const MAX_DGN: u32 = 0x1FFFF;
pub const DEFAULT_PRIORITY: u8 = 6;

pub fn priority_of(arbitration_id: u32) -> u8 {
    ((arbitration_id >> 26) & 0x7) as u8
}

pub fn dgn_of(arbitration_id: u32) -> u32 {
    (arbitration_id >> 8) & MAX_DGN
}

pub fn source_of(arbitration_id: u32) -> u8 {
    (arbitration_id & 0xFF) as u8
}

pub fn arbitration_id(priority: u8, dgn: u32, source: u8) -> u32 {
    ((priority as u32 & 0x7) << 26) | ((dgn & MAX_DGN) << 8) | source as u32
}

/// Five hex digits, uppercase (`1FEDA`, `0EA00`).
pub fn format_dgn(dgn: u32) -> String {
    format!("{:05X}", dgn)
}

/// Parse 1-5 hex digits, with or without a `0x` prefix.
pub fn parse_dgn(text: &str) -> Option<u32> {
    let t = text.trim();
    let t = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    if t.is_empty() || t.len() > 5 {
        return None;
    }
    u32::from_str_radix(t, 16).ok()
}

/// A received RV-C frame, validated to 8 bytes and a 29-bit identifier.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RvcFrame {
    pub arbitration_id: u32,
    pub data: [u8; PAYLOAD_LEN],
    /// Host UNIX timestamp in microseconds.
    pub timestamp_us: u64,
}

impl RvcFrame {
    pub fn new(arbitration_id: u32, data: [u8; PAYLOAD_LEN]) -> Self {
        Self {
            arbitration_id: arbitration_id & CAN_EFF_MASK,
            data,
            timestamp_us: 0,
        }
    }

    /// Build from transport bytes. Anything that is not exactly 8 bytes is rejected
    /// here so the decoder only ever sees a full payload.
    pub fn from_parts(
        arbitration_id: u32,
        is_extended: bool,
        bytes: &[u8],
    ) -> Result<Self, DecodeError> {
        if !is_extended {
            return Err(DecodeError::NotExtended(arbitration_id));
        }
        let data: [u8; PAYLOAD_LEN] = bytes
            .try_into()
            .map_err(|_| DecodeError::MalformedPayload(bytes.len()))?;
        Ok(Self::new(arbitration_id, data))
    }

    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    pub fn dgn(&self) -> u32 {
        dgn_of(self.arbitration_id)
    }

    pub fn source(&self) -> u8 {
        source_of(self.arbitration_id)
    }

    pub fn priority(&self) -> u8 {
        priority_of(self.arbitration_id)
    }
}

/// Frame queued for transmission. The egress side fills in source address and,
/// unless set here, priority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundFrame {
    pub dgn: u32,
    pub data: [u8; PAYLOAD_LEN],
    pub priority: Option<u8>,
}

impl OutboundFrame {
    pub fn new(dgn: u32, data: [u8; PAYLOAD_LEN]) -> Self {
        Self {
            dgn,
            data,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// ISO request (DGN 0EAxx) asking `destination` to send `requested`.
    /// Byte 3 carries the instance; 0xFF asks for all instances. The unused
    /// tail is 0xFF like every other payload this crate builds.
    pub fn iso_request(requested: u32, destination: u8, instance: u8) -> Self {
        let [b0, b1, b2, _] = requested.to_le_bytes();
        Self::new(
            0x0EA00 | destination as u32,
            [b0, b1, b2, instance, 0xFF, 0xFF, 0xFF, 0xFF],
        )
    }

    pub fn arbitration_id(&self, default_priority: u8, source: u8) -> u32 {
        arbitration_id(self.priority.unwrap_or(default_priority), self.dgn, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_split() {
        let id = 0x19FEDA80;
        assert_eq!(priority_of(id), 6);
        assert_eq!(dgn_of(id), 0x1FEDA);
        assert_eq!(source_of(id), 0x80);
        assert_eq!(arbitration_id(6, 0x1FEDA, 0x80), id);
    }

    #[test]
    fn test_dgn_text_forms() {
        assert_eq!(format_dgn(0x0EA00), "0EA00");
        assert_eq!(parse_dgn("1feda"), Some(0x1FEDA));
        assert_eq!(parse_dgn("0x1FEDB"), Some(0x1FEDB));
        assert_eq!(parse_dgn("123456"), None);
        assert_eq!(parse_dgn("zz"), None);
        assert_eq!(parse_dgn(""), None);
    }

    #[test]
    fn test_frame_rejects_bad_lengths() {
        assert_eq!(
            RvcFrame::from_parts(0x19FEDA80, true, &[0u8; 7]),
            Err(DecodeError::MalformedPayload(7))
        );
        assert_eq!(
            RvcFrame::from_parts(0x123, false, &[0u8; 8]),
            Err(DecodeError::NotExtended(0x123))
        );
        let frame = RvcFrame::from_parts(0x19FEDA80, true, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(frame.dgn(), 0x1FEDA);
        assert_eq!(frame.data[7], 8);
    }

    #[test]
    fn test_iso_request_layout() {
        let frame = OutboundFrame::iso_request(0x1FEDA, 0xFF, 0x20);
        assert_eq!(frame.dgn, 0x0EAFF);
        assert_eq!(frame.data, [0xDA, 0xFE, 0x01, 0x20, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(frame.arbitration_id(6, 0x82), 0x18EAFF82);
    }
}
