//! Core of the Alignify pose-overlay client.
//!
//! Landmarks streamed from a pose backend are projected onto the displayed
//! video with cover fitting, while a session actor sequences calibration
//! sweeps and timed holds over a reconnecting connection.

pub mod capture;
pub mod config;
pub mod connection;
pub mod geometry;
pub mod overlay;
pub mod prelude;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod workout;

pub use config::WorkoutConfig;
pub use prelude::{ConnectionState, ConnectionStatus, PoseChannel, SendError};
pub use workout::Workout;
