//! The arm controller's action API as seen by the sequencing engine.
//!
//! Session management and the wire transport live behind [`Controller`]; this crate
//! ships a simulated implementation in [`crate::sim`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;
use crate::pose::Pose;

/// Category filter for the controller's registered action list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    ReachJointAngles,
    ReachPose,
    SendGripperCommand,
}

/// Controller-native reference to a registered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionHandle {
    pub identifier: u32,
    pub action_type: ActionType,
}

/// One entry of the registered action list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub name: String,
    pub handle: ActionHandle,
}

/// Lifecycle notification for an issued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionEvent {
    Start,
    End,
    Abort,
    Pause,
    Feedback,
}

impl ActionEvent {
    /// END and ABORT close an action; everything else is progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionEvent::End | ActionEvent::Abort)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionNotification {
    pub event: ActionEvent,
    pub handle: Option<ActionHandle>,
}

/// Token returned by [`Controller::subscribe_action_events`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Callback invoked on the controller's event-delivery thread.
pub type ActionCallback = Arc<dyn Fn(ActionNotification) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServoingMode {
    SingleLevel,
    LowLevel,
    Bypass,
}

/// Position-mode gripper command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GripperCommand {
    /// 0.0 is fully open, 1.0 fully closed.
    pub finger: f64,
}

impl GripperCommand {
    pub fn position(finger: f64) -> Self {
        Self {
            finger: finger.clamp(0.0, 1.0),
        }
    }
}

/// An ad-hoc Cartesian reach request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerAction {
    pub name: String,
    pub target: Pose,
}

/// The action/feedback surface of an arm controller session.
///
/// Subscription management is synchronous so it can be released from a `Drop`
/// guard; everything that talks to the hardware is async.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn actuator_count(&self) -> Result<u32, ControllerError>;

    async fn execute_action(&self, action: ControllerAction) -> Result<(), ControllerError>;

    async fn execute_action_by_reference(
        &self,
        handle: ActionHandle,
    ) -> Result<(), ControllerError>;

    /// Registers `callback` on the action-event topic.
    fn subscribe_action_events(
        &self,
        callback: ActionCallback,
    ) -> Result<SubscriptionHandle, ControllerError>;

    /// Removes a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);

    async fn read_all_actions(
        &self,
        filter: ActionType,
    ) -> Result<Vec<ActionEntry>, ControllerError>;

    async fn set_servoing_mode(&self, mode: ServoingMode) -> Result<(), ControllerError>;

    async fn send_gripper_command(&self, command: GripperCommand)
        -> Result<(), ControllerError>;

    /// Samples the current tool pose.
    async fn refresh_feedback(&self) -> Result<Pose, ControllerError>;

    /// Halts whatever motion is running.
    async fn stop(&self) -> Result<(), ControllerError>;
}
