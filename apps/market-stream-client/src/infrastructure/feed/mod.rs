//! Feed Connection
//!
//! Everything that talks to the remote feed:
//!
//! - **client**: Connection manager and public [`StreamClient`] handle
//! - **session**: Per-session reader loop
//! - **codec**: JSON and fixed-layout binary tick decoding
//! - **heartbeat**: Ping cadence and pong deadlines
//! - **reconnect**: Exponential backoff schedule
//! - **websocket**: tokio-tungstenite transport
//! - **memory**: Scriptable in-process transport for tests and demos

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod heartbeat;
pub mod memory;
pub mod messages;
pub mod reconnect;
mod session;
pub mod websocket;

pub use client::{ConnectError, NORMAL_CLOSE, SendOutcome, StreamClient};
pub use codec::{BinaryTickCodec, CodecError, FrameDecoder, JsonCodec};
pub use endpoint::{EndpointError, SUPPORTED_PROTOCOL_VERSIONS, build_connection_url};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use memory::{ConnectBehavior, InMemoryPeer, InMemoryTransport};
pub use messages::{ControlFrame, InboundMessage, PingFrame};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use websocket::WebSocketTransport;
