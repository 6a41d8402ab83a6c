//! Workout phases, calibration sweeps and the actor that hosts them.

pub mod catalog;
pub mod machine;
pub mod runtime;

pub use catalog::{PoseCatalog, PoseEntry};
pub use machine::{
    Control, Controls, Effect, Phase, Rejected, SessionMachine, SessionSnapshot, TimerToken,
};
pub use runtime::{SessionHandle, SessionRuntime};
