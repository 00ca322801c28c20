// src/error.rs
//
// Error taxonomy for the RV-C codec, dispatch engine and transports.
//
// Only schema load failures are fatal (startup). Everything else is logged by the
// caller and the frame or command is dropped.

use thiserror::Error;

/// Catalog loading and validation failures.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("catalog parse error: {0}")]
    Parse(String),

    #[error("failed to read catalog {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("{field}: {message}")]
    Invalid { field: String, message: String },

    /// Collected validation problems, reported together like catalog validation does.
    #[error("catalog has {} error(s): {}", .0.len(), join_errors(.0))]
    Multiple(Vec<SchemaError>),
}

impl SchemaError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn join_errors(errors: &[SchemaError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Inbound frame failures. Never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unknown DGN {0:05X}")]
    UnknownDgn(u32),

    #[error("malformed payload: expected 8 bytes, got {0}")]
    MalformedPayload(usize),

    #[error("frame id 0x{0:X} is not a 29-bit extended id")]
    NotExtended(u32),
}

/// Outbound frame failures. Returned to the caller; the frame must not be queued.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("unknown DGN {0}")]
    UnknownDgn(String),

    #[error("DGN {dgn} has no field '{field}'")]
    UnknownField { dgn: String, field: String },

    #[error("value {value} does not fit field '{field}' ({bits} bits)")]
    FieldOverflow {
        field: String,
        value: String,
        bits: u8,
    },

    #[error("field '{field}' cannot be written from {value}")]
    TypeMismatch { field: String, value: String },
}

/// External transport rejected a publish or a send.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("CAN send failed: {0}")]
    CanSend(String),

    #[error("egress queue full, dropped frame for DGN {0:05X}")]
    EgressFull(u32),

    #[error("egress queue closed")]
    EgressClosed,

    #[error("{device}: {reason}")]
    Connection { device: String, reason: String },
}

impl TransportError {
    pub fn connection(device: &str, reason: impl Into<String>) -> Self {
        Self::Connection {
            device: device.to_string(),
            reason: reason.into(),
        }
    }
}

/// Configuration file failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("entity {index}: {message}")]
    Entity { index: usize, message: String },
}
