use futures::future::BoxFuture;
use tokio::sync::mpsc;

/// WebSocket close code for an intentional, clean shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// `None` when the peer vanished without a close frame.
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseInfo {
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: Some(NORMAL_CLOSURE),
            reason: reason.into(),
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }

    pub fn with_code(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.code == Some(NORMAL_CLOSURE)
    }
}

/// Written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Text(String),
    Close(CloseInfo),
}

/// Read from the transport. `Closed` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    Closed(CloseInfo),
    Error(String),
}

/// An established connection, split into its two directions.
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<LinkCommand>,
    pub incoming: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Link {
    /// Builds a link plus the far-side handles, for in-process transports.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<LinkCommand>,
        mpsc::UnboundedSender<LinkEvent>,
    ) {
        let (outgoing, written) = mpsc::unbounded_channel();
        let (events, incoming) = mpsc::unbounded_channel();
        (Self { outgoing, incoming }, written, events)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),
    #[error("handshake with {endpoint} failed: {reason}")]
    Handshake { endpoint: String, reason: String },
}

/// Opens links to one backend endpoint.
pub trait Connector: Send + Sync + 'static {
    fn endpoint(&self) -> &str;
    fn connect(&self) -> BoxFuture<'static, Result<Link, ConnectError>>;
}
