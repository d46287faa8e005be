//! agora-runtime - per-room controllers and their registry
//!
//! A [`controller::ContinuousController`] owns one room's discussion loop
//! (snapshot -> SVR -> decide -> think -> append -> emit) as a single task;
//! the [`manager::FrameworkManager`] guarantees at most one live controller
//! per room and fans control commands in.

pub mod controller;
pub mod manager;
pub mod persist;
pub mod prompt;

pub use controller::{ControllerHandle, ControllerStatus};
pub use manager::{ControlAction, FrameworkManager, StartedSession};
