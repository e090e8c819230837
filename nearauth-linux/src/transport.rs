//! Channel factories: direct TCP to the service, or through a rendezvous relay.

use std::sync::Arc;

use async_trait::async_trait;
use nearauth_core::wire::{read_frame, write_frame};
use nearauth_core::{BoxedConnection, ChannelError, ChannelFactory, Pairing};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::config::ChannelConfig;

/// Relay replies are tiny; anything larger is a protocol error.
const MAX_RELAY_REPLY: usize = 1024;

pub fn factory_from_config(config: &ChannelConfig) -> Arc<dyn ChannelFactory> {
    match config {
        ChannelConfig::Direct => Arc::new(DirectTcpFactory),
        ChannelConfig::Rendezvous { relay } => Arc::new(RendezvousFactory::new(relay.clone())),
    }
}

/// Connects to the address carried by the offer (or stored with the pairing).
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectTcpFactory;

#[async_trait]
impl ChannelFactory for DirectTcpFactory {
    async fn open(&self, pairing: &Pairing) -> Result<BoxedConnection, ChannelError> {
        let address = pairing
            .address
            .as_ref()
            .ok_or_else(|| ChannelError::Open(format!("no address for {}", pairing.commitment)))?;
        let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(service = %pairing.commitment, host = %address.host, port = address.port, "direct channel open");
        Ok(Box::new(stream))
    }

    fn kind(&self) -> &'static str {
        "direct"
    }
}

/// First frame on a relay connection: which service to be joined with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub commitment: Vec<u8>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinReply {
    /// The relay spliced us to the service; everything after this is end to end.
    Joined,
    Refused { reason: String },
}

/// Reaches services through a relay both sides connect to.
#[derive(Debug, Clone)]
pub struct RendezvousFactory {
    relay: String,
}

impl RendezvousFactory {
    pub fn new(relay: String) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl ChannelFactory for RendezvousFactory {
    async fn open(&self, pairing: &Pairing) -> Result<BoxedConnection, ChannelError> {
        let mut stream = TcpStream::connect(self.relay.as_str()).await?;
        stream.set_nodelay(true)?;
        let join = JoinRequest {
            commitment: pairing.commitment.as_bytes().to_vec(),
            action: pairing.address.as_ref().and_then(|a| a.action.clone()),
        };
        let request = bincode::serialize(&join).map_err(|e| ChannelError::Open(e.to_string()))?;
        write_frame(&mut stream, &request).await?;
        let reply = read_frame(&mut stream, MAX_RELAY_REPLY).await?;
        match bincode::deserialize::<JoinReply>(&reply) {
            Ok(JoinReply::Joined) => {
                tracing::debug!(service = %pairing.commitment, relay = %self.relay, "rendezvous channel open");
                Ok(Box::new(stream))
            }
            Ok(JoinReply::Refused { reason }) => Err(ChannelError::Open(format!("relay refused: {reason}"))),
            Err(e) => Err(ChannelError::Open(format!("bad relay reply: {e}"))),
        }
    }

    fn kind(&self) -> &'static str {
        "rendezvous"
    }
}
