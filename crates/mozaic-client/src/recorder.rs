//! Writer for the log format read by [`Replayer`](crate::replay::Replayer).

use std::io::Write;

use mozaic_proto::{Payload, ProtoError, TypedEvent, WireEvent, codec::encode_frame, log_event::LogEvent};
use tracing::trace;

use crate::error::ClientError;

/// Appends framed [`LogEvent`] records to `W` in call order.
#[derive(Debug)]
pub struct LogWriter<W: Write> {
    out: W,
    frames: usize,
}

impl<W: Write> LogWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, frames: 0 }
    }

    /// Append one event observed on `client_id`.
    pub fn record(&mut self, client_id: u32, event: &WireEvent) -> Result<(), ProtoError> {
        let body = LogEvent::from_wire(client_id, event).encode()?;
        self.out.write_all(&encode_frame(&body)?)?;
        self.frames += 1;
        trace!(client_id, type_id = event.type_id, len = body.len(), "log record written");
        Ok(())
    }

    pub fn record_event<T: Payload>(
        &mut self,
        client_id: u32,
        event: &TypedEvent<T>,
    ) -> Result<(), ClientError> {
        self.record(client_id, &event.to_wire()?)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ProtoError> {
        Ok(self.out.flush()?)
    }

    /// Records written so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
