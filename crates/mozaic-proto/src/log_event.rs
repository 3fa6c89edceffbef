use serde::{Deserialize, Serialize};

use crate::{error::ProtoError, event_type::EventTypeId, wire::WireEvent};

/// One recorded event of a match log.
///
/// A log is a flat sequence of frames, each holding one postcard-encoded
/// `LogEvent`; file order is replay order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Client the event was observed on; 0 for global events.
    pub client_id: u32,
    pub event_type: EventTypeId,
    pub data: Vec<u8>,
}

impl LogEvent {
    pub fn from_wire(client_id: u32, event: &WireEvent) -> Self {
        Self {
            client_id,
            event_type: event.type_id,
            data: event.payload.to_vec(),
        }
    }

    pub fn to_wire(&self) -> WireEvent {
        WireEvent::new(self.event_type, self.data.clone())
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(postcard::to_stdvec(self)?)
    }

    /// Decode one record. The record must fill the whole body.
    pub fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        match postcard::take_from_bytes(body)? {
            (record, []) => Ok(record),
            (_, rest) => Err(ProtoError::TrailingBytes(rest.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_wire_event_unchanged() {
        let wire = WireEvent::new(32, &b"{\"turn_num\":1}"[..]);
        let record = LogEvent::from_wire(2, &wire);

        let decoded = LogEvent::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded.client_id, 2);
        assert_eq!(decoded.to_wire(), wire);
    }

    #[test]
    fn truncated_record_fails() {
        let record = LogEvent {
            client_id: 1,
            event_type: 3,
            data: vec![1, 2, 3, 4],
        };
        let body = record.encode().unwrap();
        assert!(LogEvent::decode(&body[..body.len() - 1]).is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let record = LogEvent {
            client_id: 1,
            event_type: 3,
            data: vec![1, 2],
        };
        let mut body = record.encode().unwrap();
        body.extend_from_slice(&[0xAA, 0xBB]);
        assert!(matches!(
            LogEvent::decode(&body),
            Err(ProtoError::TrailingBytes(2))
        ));
    }
}
