use crate::protocol::{ClientMessage, ControlCommand, LandmarkFrame};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of the single logical backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Published connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Reconnect attempts since the last successful handshake.
    pub retry_count: u32,
    /// Set once the connection will not be retried again.
    pub terminated: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            retry_count: 0,
            terminated: false,
        }
    }
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        self.status == ConnectionStatus::Open
    }
}

/// Common error type for outbound messages.
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    #[error("connection is {0}; message not sent")]
    NotOpen(ConnectionStatus),
    #[error("connection writer has shut down")]
    WriterGone,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type SendResult = Result<(), SendError>;

/// Capability set every view depends on, independent of the transport.
pub trait PoseChannel: Send + Sync {
    fn state(&self) -> ConnectionState;
    fn subscribe_state(&self) -> watch::Receiver<ConnectionState>;
    fn last_frame(&self) -> Option<Arc<LandmarkFrame>>;
    /// Never queues: fails immediately unless the connection is open.
    fn send(&self, message: &ClientMessage) -> SendResult;

    fn status(&self) -> ConnectionStatus {
        self.state().status
    }

    fn send_command(&self, command: ControlCommand) -> SendResult {
        self.send(&ClientMessage::Control(command))
    }

    fn calibrate(&self, pose: &str) -> SendResult {
        self.send_command(ControlCommand::Calibrate {
            pose: pose.to_owned(),
        })
    }

    fn start_session(&self, pose: &str) -> SendResult {
        self.send_command(ControlCommand::StartSession {
            pose: pose.to_owned(),
        })
    }

    fn end_session(&self) -> SendResult {
        self.send_command(ControlCommand::EndSession)
    }

    fn change_pose(&self, pose: &str) -> SendResult {
        self.send_command(ControlCommand::ChangePose {
            pose: pose.to_owned(),
        })
    }

    fn send_frame(&self, image: String) -> SendResult {
        self.send(&ClientMessage::Frame { image })
    }
}
