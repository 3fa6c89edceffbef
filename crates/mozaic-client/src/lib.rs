//! Mozaic match client library.
//!
//! Exchanges typed events with a match server over one framed stream, and
//! replays recorded match logs through the same event machinery.
//!
//! # Architecture
//!
//! - [`connection`]: stream ownership, handshake and connection state machine
//! - [`bus`]: in-process typed publish/subscribe
//! - [`client`]: connection + bus + request/response correlation
//! - [`replay`]: offline re-dispatch of recorded logs, per client
//! - [`recorder`]: writing logs the replayer reads
//! - [`bot`]: wiring a bot process to a client
//! - [`config`]: command-line configuration
//! - [`error`]: Error types

pub mod bot;
pub mod bus;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod recorder;
pub mod replay;

// Re-export commonly used types
pub use bot::{BotRunner, BotSession};
pub use bus::{Delivery, EventBus, Subscription, SubscriptionId, WireOutcome};
pub use client::{Client, ClientDriver, ResponseFuture, WeakClient};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use error::ClientError;
pub use recorder::LogWriter;
pub use replay::{ReplaySummary, Replayer};
