//! Offline re-dispatch of recorded match logs.
//!
//! A log is read in a single forward pass. Each record is routed to the
//! event bus of the client it was observed on; buses are created lazily and
//! client 0 holds global events. Only handlers subscribed when a record is
//! dispatched observe it.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use mozaic_proto::{
    EventRegistry, EventType, ProtoError,
    codec::{FrameCodec, FrameDecoder},
    constants::{GLOBAL_CLIENT_ID, RX_BUFFER_CAPACITY, RX_READ_RESERVE},
    log_event::LogEvent,
};
use parking_lot::Mutex;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::{
    bus::{EventBus, Subscription, WireOutcome},
    error::ClientError,
};

/// Counters of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Log records read.
    pub frames: usize,
    /// Records decoded and dispatched.
    pub delivered: usize,
    /// Records with an unregistered event type.
    pub unknown: usize,
    /// Records whose envelope or payload did not decode.
    pub malformed: usize,
}

pub struct Replayer {
    registry: Arc<EventRegistry>,
    streams: Mutex<BTreeMap<u32, EventBus>>,
}

impl Replayer {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self {
            registry,
            streams: Mutex::new(BTreeMap::new()),
        }
    }

    /// Event bus of `client_id`, created on first use.
    pub fn client_stream(&self, client_id: u32) -> EventBus {
        self.streams
            .lock()
            .entry(client_id)
            .or_insert_with(|| EventBus::new(self.registry.clone()))
            .clone()
    }

    /// Subscribe to global events.
    pub fn on<T, F>(&self, event_type: &EventType<T>, handler: F) -> Result<Subscription, ClientError>
    where
        T: Send + 'static,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.client_stream(GLOBAL_CLIENT_ID).subscribe(event_type, handler)
    }

    /// Clients seen so far, ascending.
    pub fn client_ids(&self) -> Vec<u32> {
        self.streams.lock().keys().copied().collect()
    }

    /// Replay an in-memory log.
    pub fn replay_bytes(&self, bytes: &[u8]) -> Result<ReplaySummary, ProtoError> {
        let mut decoder = FrameDecoder::new(bytes.len());
        decoder.push(bytes);
        let mut summary = ReplaySummary::default();
        self.drain(&mut decoder, &mut summary)?;
        self.finish(&decoder, summary)
    }

    /// Replay a log from a blocking reader.
    pub fn replay_reader<R: Read>(&self, mut reader: R) -> Result<ReplaySummary, ProtoError> {
        let mut decoder = FrameDecoder::new(RX_BUFFER_CAPACITY);
        let mut chunk = vec![0u8; RX_READ_RESERVE];
        let mut summary = ReplaySummary::default();

        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            decoder.push(&chunk[..n]);
            self.drain(&mut decoder, &mut summary)?;
        }
        self.finish(&decoder, summary)
    }

    /// Replay a log file.
    pub async fn replay_file(&self, path: impl AsRef<Path>) -> Result<ReplaySummary, ProtoError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        debug!(path = %path.display(), "replaying log file");

        let mut frames = FramedRead::new(file, FrameCodec);
        let mut summary = ReplaySummary::default();
        while let Some(frame) = frames.next().await {
            self.replay_record(&frame?, &mut summary);
        }
        info!(
            path = %path.display(),
            frames = summary.frames,
            delivered = summary.delivered,
            unknown = summary.unknown,
            malformed = summary.malformed,
            "replay finished"
        );
        Ok(summary)
    }

    fn drain(
        &self,
        decoder: &mut FrameDecoder,
        summary: &mut ReplaySummary,
    ) -> Result<(), ProtoError> {
        while let Some(frame) = decoder.next_frame()? {
            self.replay_record(&frame, summary);
        }
        Ok(())
    }

    fn finish(
        &self,
        decoder: &FrameDecoder,
        summary: ReplaySummary,
    ) -> Result<ReplaySummary, ProtoError> {
        if decoder.pending() > 0 {
            return Err(ProtoError::TruncatedLog {
                pending: decoder.pending(),
            });
        }
        info!(
            frames = summary.frames,
            delivered = summary.delivered,
            unknown = summary.unknown,
            malformed = summary.malformed,
            "replay finished"
        );
        Ok(summary)
    }

    fn replay_record(&self, body: &[u8], summary: &mut ReplaySummary) {
        summary.frames += 1;
        let record = match LogEvent::decode(body) {
            Ok(record) => record,
            Err(e) => {
                warn!(record = summary.frames, error = %e, "Malformed log record (skipped)");
                summary.malformed += 1;
                return;
            }
        };

        let bus = self.client_stream(record.client_id);
        match bus.dispatch_wire(&record.to_wire()) {
            WireOutcome::Delivered(_) => summary.delivered += 1,
            WireOutcome::UnknownType(_) => summary.unknown += 1,
            WireOutcome::Malformed(_) => summary.malformed += 1,
        }
    }
}

impl std::fmt::Debug for Replayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayer")
            .field("clients", &self.client_ids())
            .finish()
    }
}
