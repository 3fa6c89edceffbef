use std::fmt;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{DecodeError, EncodeError},
    wire::WireEvent,
};

/// Stable numeric identifier of an event type on the wire.
///
/// Ids are assigned once and never reused for a different payload shape.
pub type EventTypeId = u32;

/// Correlation id carried inside request and response payloads.
pub type RequestId = u32;

/// Bound shared by every event payload type.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + 'static {}

/// Payloads that take part in request/response correlation.
///
/// The requester stamps a fresh id with `set_request_id`; the responder
/// copies it into the response.
pub trait Correlated {
    fn request_id(&self) -> RequestId;
    fn set_request_id(&mut self, id: RequestId);
}

/// Payload encoding of an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum Format {
    /// UTF-8 JSON text.
    Json,
    /// postcard binary.
    Binary,
}

/// Descriptor of one payload shape: id, name and encoding.
///
/// Descriptors are plain `const` values, e.g.
/// `pub const GAME_STEP: EventType<GameStep> = EventType::json(32, "game_step");`
pub struct EventType<T> {
    id: EventTypeId,
    name: &'static str,
    format: Format,
    _payload: PhantomData<fn() -> T>,
}

impl<T> EventType<T> {
    /// Event type whose payload is JSON.
    pub const fn json(id: EventTypeId, name: &'static str) -> Self {
        Self {
            id,
            name,
            format: Format::Json,
            _payload: PhantomData,
        }
    }

    /// Event type whose payload is postcard binary.
    pub const fn binary(id: EventTypeId, name: &'static str) -> Self {
        Self {
            id,
            name,
            format: Format::Binary,
            _payload: PhantomData,
        }
    }

    pub const fn id(&self) -> EventTypeId {
        self.id
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub const fn format(&self) -> Format {
        self.format
    }

    /// Pair `data` with this type.
    pub fn create(&self, data: T) -> TypedEvent<T> {
        TypedEvent {
            event_type: *self,
            data,
        }
    }
}

impl<T: Serialize + DeserializeOwned> EventType<T> {
    pub fn encode(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        let encoded = match self.format {
            Format::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
            Format::Binary => postcard::to_stdvec(value).map_err(|e| e.to_string()),
        };
        encoded.map_err(|reason| EncodeError {
            type_id: self.id,
            reason,
        })
    }

    /// Decode a payload. Trailing bytes after a complete value are rejected.
    pub fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        let decoded = match self.format {
            Format::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            Format::Binary => match postcard::take_from_bytes(bytes) {
                Ok((value, [])) => Ok(value),
                Ok((_, rest)) => Err(format!("{} trailing bytes", rest.len())),
                Err(e) => Err(e.to_string()),
            },
        };
        decoded.map_err(|reason| DecodeError {
            type_id: self.id,
            len: bytes.len(),
            reason,
        })
    }
}

impl<T> Clone for EventType<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for EventType<T> {}

impl<T> PartialEq for EventType<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for EventType<T> {}

impl<T> fmt::Debug for EventType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("format", &self.format)
            .finish()
    }
}

/// A decoded payload together with its event type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedEvent<T> {
    event_type: EventType<T>,
    data: T,
}

impl<T> TypedEvent<T> {
    pub fn event_type(&self) -> EventType<T> {
        self.event_type
    }

    pub fn type_id(&self) -> EventTypeId {
        self.event_type.id()
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

impl<T: Serialize + DeserializeOwned> TypedEvent<T> {
    /// Encode into the undecoded form that crosses the wire.
    pub fn to_wire(&self) -> Result<WireEvent, EncodeError> {
        let payload = self.event_type.encode(&self.data)?;
        Ok(WireEvent::new(self.type_id(), payload))
    }
}
