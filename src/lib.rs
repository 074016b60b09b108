//! Action sequencing for a robotic arm.
//!
//! This crate turns the controller's event-based action API into blocking,
//! bounded-time steps and chains them into pick-and-place routines:
//! - [`notifier`]: waits for the END/ABORT of one issued action.
//! - [`primitive::Arm`]: named, relative and Cartesian reaches plus gripper commands.
//! - [`catalog`]: resolves registered action names to controller handles.
//! - [`vision`]: colour check at a candidate position.
//! - [`routine`]: AND-accumulated routines and the vision-gated pick loop.
//! - [`dispatcher`]: free-text command loop driving the routines.
//! - [`sim`]: simulated controller and camera.

pub mod catalog;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod notifier;
pub mod pose;
pub mod primitive;
pub mod routine;
pub mod sim;
pub mod vision;
pub mod voice;

pub use config::EngineConfig;
pub use controller::Controller;
pub use dispatcher::{Command, Dispatcher};
pub use error::{ControllerError, SequenceError};
pub use pose::{Axis, Pose};
pub use primitive::{Action, Arm, MotionTiming};
pub use routine::{pick_by_color, run_routine, Candidate, PickOutcome, Routine, Tally};
pub use vision::{Color, ColorGate, VisionGate};

// Re-export so callers can hand the simulator a database without depending on `sled`.
pub use sled;
