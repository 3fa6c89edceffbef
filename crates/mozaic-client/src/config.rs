use std::net::SocketAddr;
use std::time::Duration;

use clap::Args;
use mozaic_proto::handshake::ConnectRequest;

use crate::error::ClientError;

#[derive(Args, Debug, Clone)]
pub struct ClientConfig {
    /// Match server address, e.g. 127.0.0.1:9142
    #[arg(long, default_value = "127.0.0.1:9142")]
    pub server: SocketAddr,

    /// Client id assigned by the match server
    #[arg(long, default_value_t = 1)]
    pub client_id: u32,

    /// Session token, hex encoded
    #[arg(long, default_value = "")]
    pub token: String,

    /// Give up connecting after N seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
}

impl ClientConfig {
    /// Handshake frame body for this client.
    pub fn handshake(&self) -> Result<Vec<u8>, ClientError> {
        let token = hex::decode(self.token.trim())
            .map_err(|e| ClientError::Config(format!("invalid token: {e}")))?;
        let request = ConnectRequest {
            client_id: self.client_id,
            token,
        };
        Ok(request.encode()?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
