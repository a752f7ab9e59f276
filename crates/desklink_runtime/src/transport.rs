use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::errors::RuntimeError;

mod memory;
mod stdio;
mod websocket;

pub use memory::{memory_pair, MemoryAcceptor, MemoryConnector, MemoryPeer};
pub use stdio::{StdioConnector, StdioProcessSpec};
pub use websocket::WebSocketConnector;

/// One established duplex channel of framed bytes.
///
/// `read_rx` yields whole inbound frames in arrival order and ends when the
/// remote side goes away. Dropping `write_tx` closes the outbound direction.
#[derive(Debug)]
pub struct TransportLink {
    pub write_tx: mpsc::Sender<Vec<u8>>,
    pub read_rx: mpsc::Receiver<Vec<u8>>,
}

pub type ConnectFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransportLink, RuntimeError>> + Send + 'a>>;

/// Factory for transport links. Called once per connection generation, so a
/// reconnect gets a brand new link from the same connector.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self) -> ConnectFuture<'a>;

    /// Human readable endpoint, used in logs.
    fn endpoint(&self) -> String;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    pub read_channel_capacity: usize,
    pub write_channel_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_channel_capacity: 1024,
            write_channel_capacity: 1024,
        }
    }
}

impl TransportConfig {
    pub(crate) fn validate(&self) -> Result<(), RuntimeError> {
        if self.read_channel_capacity == 0 {
            return Err(RuntimeError::InvalidConfig(
                "read_channel_capacity must be > 0".to_owned(),
            ));
        }
        if self.write_channel_capacity == 0 {
            return Err(RuntimeError::InvalidConfig(
                "write_channel_capacity must be > 0".to_owned(),
            ));
        }
        Ok(())
    }
}
