//! Immutable table from event type id to decode logic.
//!
//! Built once at startup and shared (behind an `Arc`) by every event bus,
//! client and replayer in the process.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;

use crate::{
    error::{DecodeError, RegistryError},
    event_type::{EventType, EventTypeId, Format, Payload},
    wire::WireEvent,
};

/// A decoded payload whose concrete type is known only to the registry entry.
pub struct DecodedEvent {
    pub type_id: EventTypeId,
    pub value: Box<dyn Any + Send>,
}

trait ErasedEventType: Send + Sync {
    fn name(&self) -> &'static str;
    fn format(&self) -> Format;
    fn payload_type(&self) -> TypeId;
    fn payload_type_name(&self) -> &'static str;
    fn decode_erased(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send>, DecodeError>;
}

impl<T: Payload> ErasedEventType for EventType<T> {
    fn name(&self) -> &'static str {
        EventType::name(self)
    }

    fn format(&self) -> Format {
        EventType::format(self)
    }

    fn payload_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn payload_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn decode_erased(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send>, DecodeError> {
        let value = self.decode(bytes)?;
        Ok(Box::new(value))
    }
}

/// Accumulates event types before freezing them into an [`EventRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    types: HashMap<EventTypeId, Box<dyn ErasedEventType>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event type.
    ///
    /// Fails if the id is already taken, or if the payload is a
    /// schema-less `serde_json::Value`.
    pub fn register<T: Payload>(
        &mut self,
        event_type: EventType<T>,
    ) -> Result<&mut Self, RegistryError> {
        let type_id = event_type.id();
        if TypeId::of::<T>() == TypeId::of::<serde_json::Value>() {
            return Err(RegistryError::UntypedPayload {
                type_id,
                name: event_type.name(),
            });
        }
        if let Some(existing) = self.types.get(&type_id) {
            return Err(RegistryError::DuplicateTypeId {
                type_id,
                existing: existing.name(),
                duplicate: event_type.name(),
            });
        }
        self.types.insert(type_id, Box::new(event_type));
        Ok(self)
    }

    pub fn build(self) -> EventRegistry {
        EventRegistry { types: self.types }
    }
}

/// Frozen id -> event type table.
pub struct EventRegistry {
    types: HashMap<EventTypeId, Box<dyn ErasedEventType>>,
}

impl EventRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// A registry that knows no event types.
    pub fn empty() -> Self {
        RegistryBuilder::new().build()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn contains(&self, type_id: EventTypeId) -> bool {
        self.types.contains_key(&type_id)
    }

    pub fn name(&self, type_id: EventTypeId) -> Option<&'static str> {
        self.types.get(&type_id).map(|t| t.name())
    }

    pub fn format(&self, type_id: EventTypeId) -> Option<Format> {
        self.types.get(&type_id).map(|t| t.format())
    }

    /// Registered ids in ascending order.
    pub fn type_ids(&self) -> Vec<EventTypeId> {
        let mut ids: Vec<_> = self.types.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Check that `event_type` agrees with the registered payload type.
    ///
    /// Unregistered ids are accepted: they can still be dispatched locally.
    pub fn check<T: 'static>(&self, event_type: &EventType<T>) -> Result<(), RegistryError> {
        match self.types.get(&event_type.id()) {
            Some(entry) if entry.payload_type() != TypeId::of::<T>() => {
                Err(RegistryError::TypeMismatch {
                    type_id: event_type.id(),
                    registered: entry.payload_type_name(),
                    requested: type_name::<T>(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Decode a wire event. `Ok(None)` means the id is not registered.
    pub fn decode(&self, event: &WireEvent) -> Result<Option<DecodedEvent>, DecodeError> {
        let Some(entry) = self.types.get(&event.type_id) else {
            return Ok(None);
        };
        let value = entry.decode_erased(&event.payload)?;
        Ok(Some(DecodedEvent {
            type_id: event.type_id,
            value,
        }))
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for id in self.type_ids() {
            map.entry(&id, &self.name(id).unwrap_or_default());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Step {
        turn_num: u64,
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Other {
        label: String,
    }

    const STEP: EventType<Step> = EventType::json(32, "step");
    const OTHER: EventType<Other> = EventType::binary(40, "other");

    fn registry() -> EventRegistry {
        let mut builder = EventRegistry::builder();
        builder.register(STEP).unwrap().register(OTHER).unwrap();
        builder.build()
    }

    #[test]
    fn decodes_registered_types() {
        let registry = registry();
        let wire = STEP.create(Step { turn_num: 5 }).to_wire().unwrap();

        let decoded = registry.decode(&wire).unwrap().unwrap();
        assert_eq!(decoded.type_id, 32);
        assert_eq!(
            decoded.value.downcast_ref::<Step>(),
            Some(&Step { turn_num: 5 })
        );
    }

    #[test]
    fn unknown_id_is_not_an_error() {
        let wire = WireEvent::new(999, &b"{}"[..]);
        assert!(registry().decode(&wire).unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let wire = WireEvent::new(32, &b"not json"[..]);
        let err = registry().decode(&wire).err().unwrap();
        assert_eq!(err.type_id, 32);
        assert_eq!(err.len, 8);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        const CLASH: EventType<Other> = EventType::json(32, "clash");
        let mut builder = EventRegistry::builder();
        builder.register(STEP).unwrap();
        let err = builder.register(CLASH).err().unwrap();
        assert_eq!(
            err,
            RegistryError::DuplicateTypeId {
                type_id: 32,
                existing: "step",
                duplicate: "clash",
            }
        );
    }

    #[test]
    fn untyped_payload_is_rejected() {
        const ANY: EventType<serde_json::Value> = EventType::json(50, "any");
        let mut builder = EventRegistry::builder();
        assert!(matches!(
            builder.register(ANY),
            Err(RegistryError::UntypedPayload { type_id: 50, .. })
        ));
    }

    #[test]
    fn check_detects_payload_mismatch() {
        let registry = registry();
        const WRONG: EventType<Other> = EventType::json(32, "wrong");
        const LOCAL: EventType<Other> = EventType::json(77, "local");

        assert!(registry.check(&STEP).is_ok());
        assert!(registry.check(&LOCAL).is_ok());
        assert!(matches!(
            registry.check(&WRONG),
            Err(RegistryError::TypeMismatch { type_id: 32, .. })
        ));
    }

    #[test]
    fn lists_ids_in_order() {
        let registry = registry();
        assert_eq!(registry.type_ids(), vec![32, 40]);
        assert_eq!(registry.name(40), Some("other"));
        assert_eq!(registry.format(32), Some(Format::Json));
        assert!(!registry.contains(1));
    }
}
