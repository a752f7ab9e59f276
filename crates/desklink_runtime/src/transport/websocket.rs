use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::errors::RuntimeError;

use super::{ConnectFuture, Connector, TransportConfig, TransportLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket link to a runtime listening on `ws://host:port/`.
/// Outbound frames are sent as text; inbound text and binary frames are both accepted.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    url: String,
    config: TransportConfig,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            config: TransportConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    async fn open(&self) -> Result<TransportLink, RuntimeError> {
        self.config.validate()?;
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|err| RuntimeError::ConnectFailed(format!("{}: {err}", self.url)))?;
        let (sink, stream) = ws.split();

        let (write_tx, write_rx) = mpsc::channel(self.config.write_channel_capacity);
        let (read_tx, read_rx) = mpsc::channel(self.config.read_channel_capacity);
        tokio::spawn(reader_loop(stream, read_tx));
        tokio::spawn(writer_loop(sink, write_rx));

        Ok(TransportLink { write_tx, read_rx })
    }
}

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self) -> ConnectFuture<'a> {
        Box::pin(self.open())
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

async fn reader_loop(mut stream: SplitStream<WsStream>, inbound_tx: mpsc::Sender<Vec<u8>>) {
    while let Some(message) = stream.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "websocket read failed");
                break;
            }
        };
        if inbound_tx.send(frame).await.is_err() {
            break;
        }
    }
}

async fn writer_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let message = match String::from_utf8(frame) {
            Ok(text) => Message::Text(text),
            Err(err) => Message::Binary(err.into_bytes()),
        };
        if let Err(err) = sink.send(message).await {
            tracing::warn!(error = %err, "websocket write failed");
            return;
        }
    }
    let _ = sink.close().await;
}
