//! Bodies of the two handshake frames.
//!
//! The client's opening frame is an opaque blob chosen by the caller;
//! [`ConnectRequest`] is the blob mozaic servers expect. The server answers
//! with exactly one [`HandshakeReply`] frame.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Identity presented by a match client when it connects.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub client_id: u32,
    pub token: Vec<u8>,
}

impl ConnectRequest {
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(postcard::to_stdvec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        match postcard::take_from_bytes(body)? {
            (request, []) => Ok(request),
            _ => Err(ProtoError::InvalidHandshake),
        }
    }
}

/// Server acknowledgement of a handshake.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReply {
    Accepted,
    Refused { reason: String },
}

impl HandshakeReply {
    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(postcard::to_stdvec(self)?)
    }

    /// Anything that is not exactly one well-formed reply is invalid.
    pub fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        match postcard::take_from_bytes(body) {
            Ok((reply, [])) => Ok(reply),
            _ => Err(ProtoError::InvalidHandshake),
        }
    }
}
