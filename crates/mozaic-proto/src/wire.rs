use bytes::{Bytes, BytesMut};

use crate::{
    error::ProtoError,
    event_type::EventTypeId,
    varint::{decode_varint, encode_varint, varint_len},
};

/// An undecoded event: type id plus raw payload bytes.
///
/// Body layout inside a connected-state frame: `<varint type_id><payload...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEvent {
    pub type_id: EventTypeId,
    pub payload: Bytes,
}

impl WireEvent {
    pub fn new(type_id: EventTypeId, payload: impl Into<Bytes>) -> Self {
        Self {
            type_id,
            payload: payload.into(),
        }
    }

    /// Encode into a frame body.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(varint_len(self.type_id) + self.payload.len());
        encode_varint(self.type_id, &mut out);
        out.extend_from_slice(&self.payload);
        out.freeze()
    }

    /// Decode a frame body. The payload shares `body`'s allocation.
    pub fn decode(body: Bytes) -> Result<Self, ProtoError> {
        match decode_varint(&body) {
            Ok(Some((type_id, read))) => Ok(Self {
                type_id,
                payload: body.slice(read..),
            }),
            Ok(None) | Err(_) => Err(ProtoError::MalformedWireEvent),
        }
    }
}
