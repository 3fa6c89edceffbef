use thiserror::Error;

use crate::event_type::EventTypeId;

/// Framing and envelope errors. Fatal to the connection or log they occur on.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("corrupt frame length prefix")]
    CorruptLengthPrefix,
    #[error("frame too large: {0}")]
    FrameTooLarge(usize),
    #[error("malformed wire event")]
    MalformedWireEvent,
    #[error("invalid handshake reply")]
    InvalidHandshake,
    #[error("{0} trailing bytes after log record")]
    TrailingBytes(usize),
    #[error("log ends inside a frame ({pending} bytes pending)")]
    TruncatedLog { pending: usize },
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payload bytes did not match the schema of the event type they claim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot decode event type {type_id} ({len} bytes): {reason}")]
pub struct DecodeError {
    pub type_id: EventTypeId,
    pub len: usize,
    pub reason: String,
}

/// A payload value could not be serialized.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot encode event type {type_id}: {reason}")]
pub struct EncodeError {
    pub type_id: EventTypeId,
    pub reason: String,
}

/// Rejected registry construction or lookup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("event type id {type_id} registered twice ({existing} and {duplicate})")]
    DuplicateTypeId {
        type_id: EventTypeId,
        existing: &'static str,
        duplicate: &'static str,
    },
    #[error("event type {name} ({type_id}) has an untyped payload")]
    UntypedPayload {
        type_id: EventTypeId,
        name: &'static str,
    },
    #[error("event type {type_id} carries {registered}, not {requested}")]
    TypeMismatch {
        type_id: EventTypeId,
        registered: &'static str,
        requested: &'static str,
    },
}
