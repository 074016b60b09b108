//! Blocking, bounded-time action primitives on top of the controller API.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::catalog;
use crate::controller::{ActionType, Controller, ControllerAction, GripperCommand, ServoingMode};
use crate::error::{ControllerError, SequenceError};
use crate::notifier::{await_completion, DEFAULT_ACTION_TIMEOUT};
use crate::pose::Pose;

/// Settle time after a raw gripper command.
pub const GRIPPER_SETTLE: Duration = Duration::from_secs(2);

/// One step of a routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Action {
    /// Move to a pose registered on the controller by name.
    ReachNamedPose(String),
    /// Move by an offset from the current tool pose.
    ReachRelativePose(Pose),
    /// Move to an absolute tool pose.
    ReachCartesianPose(Pose),
    /// Run a gripper preset registered on the controller by name.
    GripperPreset(String),
    /// Drive the fingers to a position in [0, 1] and wait a fixed settle time.
    SendGripperPosition(f64),
}

/// Timing knobs for the primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionTiming {
    pub action_timeout: Duration,
    pub gripper_settle: Duration,
    /// Send a stop to the controller when a wait times out.
    pub abort_on_timeout: bool,
}

impl Default for MotionTiming {
    fn default() -> Self {
        Self {
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            gripper_settle: GRIPPER_SETTLE,
            abort_on_timeout: false,
        }
    }
}

/// Handle to the arm used by routines. Only one action is in flight at a time.
#[derive(Clone)]
pub struct Arm {
    controller: Arc<dyn Controller>,
    timing: MotionTiming,
}

impl std::fmt::Debug for Arm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arm").field("timing", &self.timing).finish()
    }
}

impl Arm {
    pub fn new(controller: Arc<dyn Controller>, timing: MotionTiming) -> Self {
        Self { controller, timing }
    }

    pub fn controller(&self) -> &dyn Controller {
        self.controller.as_ref()
    }

    /// Runs one routine step. Only a catalog miss is an error.
    pub async fn run(&self, action: &Action) -> Result<bool, SequenceError> {
        match action {
            Action::ReachNamedPose(name) => self.reach_named_pose(name).await,
            Action::GripperPreset(name) => self.gripper_preset(name).await,
            Action::ReachRelativePose(delta) => Ok(self.reach_relative_pose(delta).await),
            Action::ReachCartesianPose(target) => Ok(self.reach_cartesian_pose(target).await),
            Action::SendGripperPosition(finger) => {
                Ok(self.send_gripper_command(*finger).await)
            }
        }
    }

    /// Moves to a named joint-space pose and waits for the controller to finish.
    #[instrument(skip(self))]
    pub async fn reach_named_pose(&self, name: &str) -> Result<bool, SequenceError> {
        self.run_registered(ActionType::ReachJointAngles, name).await
    }

    /// Runs a named gripper preset and waits for the controller to finish.
    #[instrument(skip(self))]
    pub async fn gripper_preset(&self, name: &str) -> Result<bool, SequenceError> {
        self.run_registered(ActionType::SendGripperCommand, name).await
    }

    async fn run_registered(
        &self,
        filter: ActionType,
        name: &str,
    ) -> Result<bool, SequenceError> {
        let controller = self.controller();
        if let Err(err) = controller.set_servoing_mode(ServoingMode::SingleLevel).await {
            warn!(%err, "could not switch to single-level servoing");
            return Ok(false);
        }

        let Some(handle) = catalog::require(controller, filter, name).await? else {
            return Ok(false);
        };

        let finished = self
            .settle(
                await_completion(controller, Some(handle), self.timing.action_timeout, async {
                    controller.execute_action_by_reference(handle).await
                })
                .await,
            )
            .await;
        if finished {
            info!(name, "action completed");
        }
        Ok(finished)
    }

    /// Moves the tool by `delta` from a freshly sampled pose.
    #[instrument(skip(self))]
    pub async fn reach_relative_pose(&self, delta: &Pose) -> bool {
        let current = match self.controller.refresh_feedback().await {
            Ok(pose) => pose,
            Err(err) => {
                warn!(%err, "could not read tool pose");
                return false;
            }
        };
        self.reach("relative cartesian move", current.offset(delta)).await
    }

    /// Moves the tool to an absolute pose.
    #[instrument(skip(self))]
    pub async fn reach_cartesian_pose(&self, target: &Pose) -> bool {
        self.reach("cartesian move", *target).await
    }

    async fn reach(&self, label: &str, target: Pose) -> bool {
        let controller = self.controller();
        let action = ControllerAction {
            name: label.to_string(),
            target,
        };

        let finished = self
            .settle(
                await_completion(controller, None, self.timing.action_timeout, async {
                    controller.execute_action(action).await
                })
                .await,
            )
            .await;
        if finished {
            info!(
                x = target.x(),
                y = target.y(),
                z = target.z(),
                "cartesian movement completed"
            );
        }
        finished
    }

    /// Commands the fingers and waits a fixed settle time; completion is not confirmed.
    #[instrument(skip(self))]
    pub async fn send_gripper_command(&self, finger: f64) -> bool {
        let command = GripperCommand::position(finger);
        if let Err(err) = self.controller.send_gripper_command(command).await {
            warn!(%err, "gripper command failed");
            return false;
        }
        tokio::time::sleep(self.timing.gripper_settle).await;
        true
    }

    /// Maps a wait result to a step outcome, stopping the arm on timeout if configured.
    async fn settle(&self, waited: Result<bool, ControllerError>) -> bool {
        match waited {
            Ok(true) => true,
            Ok(false) => {
                if self.timing.abort_on_timeout {
                    warn!("stopping arm after timed-out action");
                    if let Err(err) = self.controller.stop().await {
                        warn!(%err, "stop request failed");
                    }
                } else {
                    warn!("action wait timed out; the arm may still be moving");
                }
                false
            }
            Err(err) => {
                warn!(%err, "action request failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Axis;
    use crate::sim::{Behavior, SimController};

    fn fast_timing() -> MotionTiming {
        MotionTiming {
            action_timeout: Duration::from_millis(500),
            gripper_settle: Duration::ZERO,
            abort_on_timeout: false,
        }
    }

    fn arm_on(sim: &Arc<SimController>, timing: MotionTiming) -> Arm {
        Arm::new(Arc::clone(sim) as Arc<dyn Controller>, timing)
    }

    #[tokio::test]
    async fn named_pose_sets_servoing_and_waits() {
        let sim = Arc::new(SimController::seeded(Duration::from_millis(2)));
        let arm = arm_on(&sim, fast_timing());

        assert_eq!(arm.reach_named_pose("Home").await, Ok(true));
        assert_eq!(sim.current_named_pose().as_deref(), Some("Home"));
        assert_eq!(sim.servoing_mode(), Some(ServoingMode::SingleLevel));
        assert_eq!(sim.subscription_count(), 0);
    }

    #[tokio::test]
    async fn catalog_miss_is_fatal_and_commands_nothing() {
        let sim = Arc::new(SimController::seeded(Duration::from_millis(2)));
        let arm = arm_on(&sim, fast_timing());

        let err = arm.reach_named_pose("Bottle9_Top").await.unwrap_err();
        assert!(matches!(
            err,
            SequenceError::UnknownAction { ref name, .. } if name == "Bottle9_Top"
        ));

        assert_eq!(sim.calls(), ["set_servoing_mode", "read_all_actions"]);
        assert!(sim.executed().is_empty());
    }

    #[tokio::test]
    async fn gripper_preset_resolves_in_gripper_catalog() {
        let sim = Arc::new(SimController::seeded(Duration::from_millis(2)));
        let arm = arm_on(&sim, fast_timing());

        assert_eq!(arm.gripper_preset("water_gripper_hold").await, Ok(true));
        assert_eq!(sim.gripper(), 0.62);
        // Joint poses are not gripper presets.
        assert!(arm.gripper_preset("Home").await.is_err());
    }

    #[tokio::test]
    async fn go_up_targets_sampled_feedback_plus_five_centimetres() {
        let sim = Arc::new(SimController::seeded(Duration::from_millis(2)));
        let start = Pose::new(0.41, -0.07, 0.22, 88.0, 1.5, 93.0);
        sim.set_pose(start);
        let arm = arm_on(&sim, fast_timing());

        assert!(arm.reach_relative_pose(&Pose::along(Axis::Z, 0.05)).await);

        let reached = sim.pose();
        assert!((reached.z() - 0.27).abs() < 1e-9);
        assert_eq!(reached.x(), start.x());
        assert_eq!(reached.y(), start.y());
        assert_eq!(reached.rotation, start.rotation);

        let calls = sim.calls();
        let sample = calls.iter().position(|c| c == "refresh_feedback").unwrap();
        let execute = calls.iter().position(|c| c == "execute_action").unwrap();
        assert!(sample < execute);
    }

    #[tokio::test]
    async fn rejected_request_is_a_plain_failure() {
        let sim = Arc::new(SimController::seeded(Duration::from_millis(2)));
        sim.script([Behavior::Reject]);
        let arm = arm_on(&sim, fast_timing());

        assert_eq!(arm.reach_named_pose("Rest").await, Ok(false));
        assert_eq!(sim.subscription_count(), 0);
    }

    #[tokio::test]
    async fn timeout_optionally_stops_the_arm() {
        let sim = Arc::new(SimController::seeded(Duration::from_millis(2)));
        sim.script([Behavior::Silent, Behavior::Silent]);
        let timing = MotionTiming {
            action_timeout: Duration::from_millis(40),
            ..fast_timing()
        };

        assert!(!arm_on(&sim, timing).reach_cartesian_pose(&Pose::zero()).await);
        assert_eq!(sim.stop_count(), 0);

        let stopping = MotionTiming {
            abort_on_timeout: true,
            ..timing
        };
        assert!(!arm_on(&sim, stopping).reach_cartesian_pose(&Pose::zero()).await);
        assert_eq!(sim.stop_count(), 1);
        assert_eq!(sim.subscription_count(), 0);
    }

    #[tokio::test]
    async fn next_step_is_not_finished_by_a_stale_end() {
        let sim = Arc::new(SimController::seeded(Duration::from_millis(120)));
        sim.script([Behavior::Complete, Behavior::Silent]);
        let arm = arm_on(
            &sim,
            MotionTiming {
                action_timeout: Duration::from_millis(80),
                ..fast_timing()
            },
        );

        assert_eq!(arm.reach_named_pose("Home").await, Ok(false));
        assert_eq!(arm.reach_named_pose("Rest").await, Ok(false));
        assert_eq!(sim.current_named_pose().as_deref(), Some("Home"));
    }

    #[tokio::test]
    async fn raw_gripper_command_is_not_event_confirmed() {
        let sim = Arc::new(SimController::seeded(Duration::from_millis(2)));
        let arm = arm_on(&sim, fast_timing());

        assert!(arm.send_gripper_command(1.0).await);
        assert_eq!(sim.gripper(), 1.0);
        assert_eq!(sim.calls(), ["send_gripper_command"]);
    }

    #[test]
    fn actions_serialize_with_kind_tag() {
        let json = serde_json::to_value(Action::ReachNamedPose("Home".to_string())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "kind": "reach_named_pose", "target": "Home" })
        );
    }
}
