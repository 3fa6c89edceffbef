//! Wire-level building blocks for mozaic event messaging.
//!
//! - [`event_type`]: typed event descriptors and their payload encodings
//! - [`registry`]: immutable id -> decoder table shared by every event bus
//! - [`codec`] / [`varint`]: length-delimited framing over byte streams
//! - [`wire`], [`handshake`], [`log_event`]: frame body layouts
//! - [`events`]: the event catalogue spoken by match clients

pub mod codec;
pub mod constants;
pub mod error;
pub mod event_type;
pub mod events;
pub mod handshake;
pub mod log_event;
pub mod registry;
pub mod varint;
pub mod wire;

pub use error::{DecodeError, EncodeError, ProtoError, RegistryError};
pub use event_type::{Correlated, EventType, EventTypeId, Format, Payload, RequestId, TypedEvent};
pub use registry::{DecodedEvent, EventRegistry, RegistryBuilder};
pub use wire::WireEvent;
