use tokio::sync::mpsc;

use crate::errors::RuntimeError;

use super::{ConnectFuture, Connector, TransportConfig, TransportLink};

/// In-process bridge. Each `connect` hands a fresh `MemoryPeer` to the
/// paired `MemoryAcceptor`; dropping the acceptor makes later connects fail.
#[derive(Debug)]
pub struct MemoryConnector {
    config: TransportConfig,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
}

#[derive(Debug)]
pub struct MemoryAcceptor {
    peers_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Runtime side of one in-process link.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Vec<u8>>,
}

pub fn memory_pair(config: TransportConfig) -> (MemoryConnector, MemoryAcceptor) {
    let (peers_tx, peers_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector { config, peers_tx },
        MemoryAcceptor { peers_rx },
    )
}

impl Connector for MemoryConnector {
    fn connect<'a>(&'a self) -> ConnectFuture<'a> {
        Box::pin(async move {
            self.config.validate()?;
            let (write_tx, inbound) = mpsc::channel(self.config.write_channel_capacity);
            let (outbound, read_rx) = mpsc::channel(self.config.read_channel_capacity);
            self.peers_tx
                .send(MemoryPeer { inbound, outbound })
                .map_err(|_| RuntimeError::ConnectFailed("memory acceptor is gone".to_owned()))?;
            Ok(TransportLink { write_tx, read_rx })
        })
    }

    fn endpoint(&self) -> String {
        "memory".to_owned()
    }
}

impl MemoryAcceptor {
    /// Wait for the next client link. `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers_rx.recv().await
    }
}

impl MemoryPeer {
    /// Next frame written by the client. `None` once the client closed its side.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await
    }

    pub async fn send(&self, frame: Vec<u8>) -> Result<(), RuntimeError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| RuntimeError::Transport("memory link closed by client".to_owned()))
    }
}
