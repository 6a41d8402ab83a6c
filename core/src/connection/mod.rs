//! Reconnecting streaming connection to the pose backend.

pub mod client;
pub mod transport;
pub mod websocket;

pub use client::ConnectionClient;
pub use transport::{
    CloseInfo, ConnectError, Connector, Link, LinkCommand, LinkEvent, NORMAL_CLOSURE,
};
pub use websocket::WebSocketConnector;
