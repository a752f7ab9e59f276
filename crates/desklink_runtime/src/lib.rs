pub mod codec;
pub mod correlation;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod router;
pub mod session;
pub mod state;
pub mod transport;

pub use codec::{decode_frame, encode_event, encode_request, encode_response};
pub use correlation::{CallResult, CorrelationTable};
pub use errors::{CallError, DecodeError, DisconnectReason, ListenerError, RuntimeError};
pub use events::{EventFrame, Frame, ResponseFrame, ResponseOutcome};
pub use metrics::SessionMetricsSnapshot;
pub use router::{
    DispatchReport, EventListener, EventRouter, Subscribed, SubscriptionToken, Unsubscribed,
};
pub use session::{PendingReply, ReconnectPolicy, Session, SessionConfig};
pub use state::ConnectionState;
pub use transport::{
    memory_pair, ConnectFuture, Connector, MemoryAcceptor, MemoryConnector, MemoryPeer,
    StdioConnector, StdioProcessSpec, TransportConfig, TransportLink, WebSocketConnector,
};
