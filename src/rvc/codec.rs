// src/rvc/codec.rs
//
// Field codec. Bits are addressed LSB0 over the little-endian u64 view of the
// 8-byte payload, for both decoding and encoding.

use super::schema::{mask, DgnSchema, FieldDescriptor, FieldKind, OverrideKind, SchemaRegistry};
use super::value::{DecodedMessage, FieldMap, FieldValue};
use super::{format_dgn, RvcFrame, PAYLOAD_LEN};
use crate::error::{DecodeError, EncodeError};

// ============================================================================
// Bit helpers
// ============================================================================

pub fn payload_word(data: &[u8; PAYLOAD_LEN]) -> u64 {
    u64::from_le_bytes(*data)
}

pub fn extract_bits(word: u64, start_bit: u8, bit_length: u8) -> u64 {
    if start_bit >= 64 {
        return 0;
    }
    (word >> start_bit) & mask(bit_length)
}

pub fn insert_bits(word: u64, start_bit: u8, bit_length: u8, raw: u64) -> u64 {
    let m = mask(bit_length) << start_bit;
    (word & !m) | ((raw << start_bit) & m)
}

fn sign_extend(raw: u64, bits: u8) -> i64 {
    if bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - bits as u32;
    ((raw << shift) as i64) >> shift
}

// ============================================================================
// Decoder
// ============================================================================

/// Decode a payload for `dgn`. Adds the `name` and `dgn` keys, and `destination`
/// when the PDU1 fallback resolved the schema.
pub fn decode(
    registry: &SchemaRegistry,
    dgn: u32,
    payload: &[u8],
) -> Result<DecodedMessage, DecodeError> {
    let data: &[u8; PAYLOAD_LEN] = payload
        .try_into()
        .map_err(|_| DecodeError::MalformedPayload(payload.len()))?;
    let (schema, destination) = registry.lookup(dgn).ok_or(DecodeError::UnknownDgn(dgn))?;

    let mut msg = DecodedMessage::new();
    msg.insert("name", FieldValue::Text(schema.name.clone()));
    msg.insert("dgn", FieldValue::Text(format_dgn(dgn)));
    if let Some(dest) = destination {
        msg.insert("destination", FieldValue::Text(format!("{:02X}", dest)));
    }
    decode_fields(schema, data, &mut msg);
    Ok(msg)
}

/// Decode a received frame and attach the transport metadata keys.
pub fn decode_frame(
    registry: &SchemaRegistry,
    frame: &RvcFrame,
) -> Result<DecodedMessage, DecodeError> {
    let mut msg = decode(registry, frame.dgn(), &frame.data)?;
    msg.insert("source_id", FieldValue::Text(format!("{:02X}", frame.source())));
    msg.insert("priority", FieldValue::Unsigned(frame.priority() as u64));
    msg.insert("data", FieldValue::Text(hex::encode_upper(frame.data)));
    msg.insert(
        "arbitration_id",
        FieldValue::Unsigned(frame.arbitration_id as u64),
    );
    Ok(msg)
}

pub fn decode_fields(schema: &DgnSchema, data: &[u8; PAYLOAD_LEN], msg: &mut DecodedMessage) {
    let word = payload_word(data);
    for field in schema.fields() {
        decode_field(field, word, data, msg);
    }
    for ov in schema.overrides() {
        let value = decode_override(schema, &ov.kind, word, data);
        // A replaced generic field must not leave a stale label behind.
        msg.remove(&format!("{}_definition", ov.name));
        msg.insert(ov.name.clone(), value);
    }
}

fn decode_field(field: &FieldDescriptor, word: u64, data: &[u8; PAYLOAD_LEN], msg: &mut DecodedMessage) {
    if field.kind == FieldKind::Ascii {
        let first = (field.start_bit / 8) as usize;
        let len = (field.bit_length / 8) as usize;
        let bytes = &data[first..first + len];
        let end = bytes
            .iter()
            .rposition(|b| *b != 0xFF && *b != 0x00)
            .map_or(0, |i| i + 1);
        let text = String::from_utf8_lossy(&bytes[..end]).into_owned();
        msg.insert(field.name.clone(), FieldValue::Text(text));
        return;
    }

    let raw = extract_bits(word, field.start_bit, field.bit_length);
    if field.has_sentinel() && raw == field.all_ones() {
        msg.insert(field.name.clone(), FieldValue::NotAvailable);
        return;
    }

    let (value, enum_key) = match field.kind {
        FieldKind::UnsignedInt => (FieldValue::Unsigned(raw), raw as i64),
        FieldKind::SignedInt => {
            let v = sign_extend(raw, field.bit_length);
            (FieldValue::Signed(v), v)
        }
        FieldKind::FixedPoint => (
            FieldValue::Float(raw as f64 * field.scale + field.offset),
            raw as i64,
        ),
        FieldKind::Bitfield => (
            FieldValue::Bits(format!(
                "{:0width$b}",
                raw,
                width = field.bit_length as usize
            )),
            raw as i64,
        ),
        FieldKind::Ascii => unreachable!("ascii handled above"),
    };
    msg.insert(field.name.clone(), value);
    if let Some(label) = field.label(enum_key) {
        msg.insert(
            format!("{}_definition", field.name),
            FieldValue::Text(label.to_string()),
        );
    }
}

fn decode_override(
    schema: &DgnSchema,
    kind: &OverrideKind,
    word: u64,
    data: &[u8; PAYLOAD_LEN],
) -> FieldValue {
    match kind {
        OverrideKind::LeBytes {
            byte_offset,
            byte_length,
            signed,
            scale,
            offset,
        } => {
            let start = *byte_offset as usize;
            let len = *byte_length as usize;
            let raw = data[start..start + len]
                .iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | *b as u64);
            let bits = (len * 8) as u8;
            if raw == mask(bits) {
                return FieldValue::NotAvailable;
            }
            let v = if *signed {
                sign_extend(raw, bits) as f64
            } else {
                raw as f64
            };
            if *scale == 1.0 && *offset == 0.0 {
                if *signed {
                    FieldValue::Signed(v as i64)
                } else {
                    FieldValue::Unsigned(raw)
                }
            } else {
                FieldValue::Float(v * scale + offset)
            }
        }
        OverrideKind::ConcatBits { fields, subtract } => {
            let combined = fields
                .iter()
                .filter_map(|name| schema.field(name))
                .fold(0u64, |acc, f| {
                    let part = extract_bits(word, f.start_bit, f.bit_length);
                    if f.bit_length >= 64 {
                        part
                    } else {
                        (acc << f.bit_length) | part
                    }
                });
            FieldValue::Signed(combined as i64 - subtract)
        }
        OverrideKind::Custom(decoder) => decoder(data),
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Encode `fields` into a payload for `dgn`. Unspecified bits stay all ones.
pub fn encode(
    registry: &SchemaRegistry,
    dgn: u32,
    fields: &FieldMap,
) -> Result<[u8; PAYLOAD_LEN], EncodeError> {
    let schema = registry
        .get(dgn)
        .ok_or_else(|| EncodeError::UnknownDgn(format_dgn(dgn)))?;
    encode_schema(schema, fields)
}

/// Encode by schema name, returning the DGN alongside the payload.
pub fn encode_by_name(
    registry: &SchemaRegistry,
    name: &str,
    fields: &FieldMap,
) -> Result<(u32, [u8; PAYLOAD_LEN]), EncodeError> {
    let schema = registry
        .by_name(name)
        .ok_or_else(|| EncodeError::UnknownDgn(name.to_string()))?;
    Ok((schema.dgn, encode_schema(schema, fields)?))
}

pub fn encode_schema(
    schema: &DgnSchema,
    fields: &FieldMap,
) -> Result<[u8; PAYLOAD_LEN], EncodeError> {
    let mut word = u64::MAX;
    // Sorted so the first reported error does not depend on hash order.
    let mut names: Vec<&String> = fields.keys().collect();
    names.sort();
    for name in names {
        let field = schema.field(name).ok_or_else(|| EncodeError::UnknownField {
            dgn: schema.name.clone(),
            field: name.clone(),
        })?;
        let raw = raw_for(field, &fields[name])?;
        word = insert_bits(word, field.start_bit, field.bit_length, raw);
    }
    Ok(word.to_le_bytes())
}

fn overflow(field: &FieldDescriptor, value: &FieldValue) -> EncodeError {
    EncodeError::FieldOverflow {
        field: field.name.clone(),
        value: value.canonical(),
        bits: field.bit_length,
    }
}

fn mismatch(field: &FieldDescriptor, value: &FieldValue) -> EncodeError {
    EncodeError::TypeMismatch {
        field: field.name.clone(),
        value: format!("{:?}", value),
    }
}

fn raw_for(field: &FieldDescriptor, value: &FieldValue) -> Result<u64, EncodeError> {
    if let FieldValue::NotAvailable = value {
        return Ok(field.all_ones());
    }
    let max = field.all_ones();
    match field.kind {
        FieldKind::Ascii => {
            let FieldValue::Text(text) = value else {
                return Err(mismatch(field, value));
            };
            let len = (field.bit_length / 8) as usize;
            if text.len() > len {
                return Err(overflow(field, value));
            }
            let mut bytes = vec![0xFFu8; len];
            bytes[..text.len()].copy_from_slice(text.as_bytes());
            Ok(bytes
                .iter()
                .rev()
                .fold(0u64, |acc, b| (acc << 8) | *b as u64))
        }
        FieldKind::UnsignedInt | FieldKind::Bitfield => {
            let raw = match value {
                FieldValue::Unsigned(v) => *v,
                FieldValue::Signed(v) => u64::try_from(*v).map_err(|_| overflow(field, value))?,
                FieldValue::Float(v) => {
                    if v.fract() != 0.0 || !v.is_finite() {
                        return Err(mismatch(field, value));
                    }
                    if *v < 0.0 || *v > u64::MAX as f64 {
                        return Err(overflow(field, value));
                    }
                    *v as u64
                }
                FieldValue::Bits(s) | FieldValue::Text(s) => parse_label_or_bits(field, s)
                    .ok_or_else(|| mismatch(field, value))?,
                FieldValue::NotAvailable => max,
            };
            if raw > max {
                return Err(overflow(field, value));
            }
            Ok(raw)
        }
        FieldKind::SignedInt => {
            let v: i64 = match value {
                FieldValue::Unsigned(v) => i64::try_from(*v).map_err(|_| overflow(field, value))?,
                FieldValue::Signed(v) => *v,
                FieldValue::Float(v) if v.fract() == 0.0 && v.is_finite() => *v as i64,
                FieldValue::Text(s) => field.key_for_label(s).ok_or_else(|| mismatch(field, value))?,
                _ => return Err(mismatch(field, value)),
            };
            let bits = field.bit_length as u32;
            let (lo, hi) = if bits >= 64 {
                (i64::MIN, i64::MAX)
            } else {
                (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
            };
            if v < lo || v > hi {
                return Err(overflow(field, value));
            }
            Ok(v as u64 & max)
        }
        FieldKind::FixedPoint => {
            let v = match value {
                FieldValue::Unsigned(_) | FieldValue::Signed(_) | FieldValue::Float(_) => {
                    value.as_f64().ok_or_else(|| mismatch(field, value))?
                }
                _ => return Err(mismatch(field, value)),
            };
            let raw = ((v - field.offset) / field.scale).round();
            if !raw.is_finite() || raw < 0.0 || raw > max as f64 {
                return Err(overflow(field, value));
            }
            Ok(raw as u64)
        }
    }
}

/// Bitfields take a binary string; any integer kind may take an enum label.
fn parse_label_or_bits(field: &FieldDescriptor, text: &str) -> Option<u64> {
    let is_binary = !text.is_empty() && text.chars().all(|c| c == '0' || c == '1');
    if field.kind == FieldKind::Bitfield && is_binary {
        return u64::from_str_radix(text, 2).ok();
    }
    field
        .key_for_label(text)
        .and_then(|k| u64::try_from(k).ok())
}
