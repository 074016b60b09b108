//! Composes action primitives into multi-step routines.
//!
//! Step results are AND-accumulated into a [`Tally`]. A failed step does not skip
//! the remaining ones; only a fatal [`SequenceError`] stops a routine early.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::{CandidateConfig, GripperPresets, PoseNames};
use crate::error::SequenceError;
use crate::pose::Pose;
use crate::primitive::{Action, Arm};
use crate::vision::ColorGate;

/// Running AND of step results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally(bool);

impl Default for Tally {
    fn default() -> Self {
        Self(true)
    }
}

impl Tally {
    /// Folds one step result in and returns it unchanged.
    pub fn record(&mut self, ok: bool) -> bool {
        self.0 &= ok;
        ok
    }

    pub fn passed(self) -> bool {
        self.0
    }
}

/// An ordered list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    pub name: String,
    pub steps: Vec<Action>,
}

impl Routine {
    pub fn new(name: impl Into<String>, steps: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

/// Runs every step in order and returns whether all of them succeeded.
#[instrument(skip(arm, routine), fields(routine = %routine.name))]
pub async fn run_routine(arm: &Arm, routine: &Routine) -> Result<bool, SequenceError> {
    let mut tally = Tally::default();
    for (index, step) in routine.steps.iter().enumerate() {
        if !tally.record(arm.run(step).await?) {
            warn!(index, ?step, "routine step failed");
        }
    }
    info!(success = tally.passed(), "routine finished");
    Ok(tally.passed())
}

/// Absolute-pose pick and place with raw gripper commands.
///
/// Both moves use `orientation` (degrees) for the tool.
pub fn move_pick_and_place(start: [f64; 3], target: [f64; 3], orientation: [f64; 3]) -> Routine {
    let [tx, ty, tz] = orientation;
    let at = |[x, y, z]: [f64; 3]| Pose::new(x, y, z, tx, ty, tz);
    Routine::new(
        "move pick and place",
        vec![
            Action::ReachCartesianPose(at(start)),
            Action::SendGripperPosition(1.0),
            Action::ReachCartesianPose(at(target)),
            Action::SendGripperPosition(0.0),
        ],
    )
}

/// A watch position and the routine that picks the object seen there.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub watch_pose: String,
    pub pick: Routine,
}

impl CandidateConfig {
    /// Approach, descend, grip, lift, then carry home and release at rest.
    pub fn candidate(&self, poses: &PoseNames, gripper: &GripperPresets) -> Candidate {
        let named = |name: &str| Action::ReachNamedPose(name.to_string());
        Candidate {
            watch_pose: self.watch_pose.clone(),
            pick: Routine::new(
                format!("pick at {}", self.watch_pose),
                vec![
                    named(&self.approach_pose),
                    named(&self.hold_pose),
                    Action::GripperPreset(gripper.grip_preset.clone()),
                    named(&self.approach_pose),
                    named(&poses.home),
                    named(&poses.rest),
                    Action::GripperPreset(gripper.open_preset.clone()),
                ],
            ),
        }
    }
}

/// Result of the vision-gated pick loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickOutcome {
    /// Candidate `candidate` matched and its pick routine ran.
    Picked { candidate: usize, success: bool },
    /// No candidate matched. `success` covers the watch moves.
    NotFound { success: bool },
}

impl PickOutcome {
    /// Whether every step that ran succeeded.
    pub fn success(self) -> bool {
        match self {
            PickOutcome::Picked { success, .. } | PickOutcome::NotFound { success } => success,
        }
    }
}

/// Visits each candidate's watch pose in order and picks at the first one whose
/// colour matches `color`. Candidates after a match are not visited.
#[instrument(skip(arm, gate, candidates))]
pub async fn pick_by_color(
    arm: &Arm,
    gate: &dyn ColorGate,
    candidates: &[Candidate],
    color: &str,
) -> Result<PickOutcome, SequenceError> {
    let mut tally = Tally::default();
    for (index, candidate) in candidates.iter().enumerate() {
        tally.record(arm.reach_named_pose(&candidate.watch_pose).await?);
        if gate.matches(color).await {
            info!(watch_pose = %candidate.watch_pose, "requested color found");
            tally.record(run_routine(arm, &candidate.pick).await?);
            return Ok(PickOutcome::Picked {
                candidate: index,
                success: tally.passed(),
            });
        }
    }

    info!("requested color not found at any candidate");
    Ok(PickOutcome::NotFound {
        success: tally.passed(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::EngineConfig;
    use crate::controller::Controller;
    use crate::primitive::MotionTiming;
    use crate::sim::{Behavior, SimCamera, SimController};
    use crate::vision::{Color, VisionConfig, VisionGate};

    fn timing() -> MotionTiming {
        MotionTiming {
            action_timeout: Duration::from_millis(500),
            gripper_settle: Duration::ZERO,
            abort_on_timeout: false,
        }
    }

    fn setup() -> (Arc<SimController>, Arm) {
        let sim = Arc::new(SimController::seeded(Duration::from_millis(2)));
        let arm = Arm::new(Arc::clone(&sim) as Arc<dyn Controller>, timing());
        (sim, arm)
    }

    fn stations(n: usize) -> Vec<Candidate> {
        let config = EngineConfig::stock();
        (1..=n)
            .map(|i| CandidateConfig::bottle(i).candidate(&config.poses, &config.gripper))
            .collect()
    }

    struct ScriptedGate(Mutex<VecDeque<bool>>);

    #[async_trait]
    impl ColorGate for ScriptedGate {
        async fn matches(&self, _expected: &str) -> bool {
            self.0.lock().unwrap().pop_front().unwrap_or(false)
        }
    }

    #[test]
    fn tally_stays_false_after_a_failure() {
        let mut tally = Tally::default();
        assert!(tally.passed());
        tally.record(true);
        tally.record(false);
        tally.record(true);
        assert!(!tally.passed());
    }

    #[tokio::test]
    async fn failed_middle_step_does_not_skip_the_rest() {
        let (sim, arm) = setup();
        sim.script([Behavior::Complete, Behavior::Reject, Behavior::Complete]);
        let routine = Routine::new(
            "three steps",
            vec![
                Action::ReachNamedPose("Home".to_string()),
                Action::ReachNamedPose("Bottle1_Top".to_string()),
                Action::ReachNamedPose("Rest".to_string()),
            ],
        );

        assert_eq!(run_routine(&arm, &routine).await, Ok(false));
        assert_eq!(sim.executed(), ["Home", "Rest"]);
        assert_eq!(sim.current_named_pose().as_deref(), Some("Rest"));
    }

    #[tokio::test]
    async fn catalog_miss_stops_the_routine_immediately() {
        let (sim, arm) = setup();
        let routine = Routine::new(
            "broken",
            vec![
                Action::ReachNamedPose("Home".to_string()),
                Action::ReachNamedPose("Bottle7_Top".to_string()),
                Action::ReachNamedPose("Rest".to_string()),
            ],
        );

        let err = run_routine(&arm, &routine).await.unwrap_err();
        assert!(matches!(err, SequenceError::UnknownAction { .. }));
        assert_eq!(sim.executed(), ["Home"]);
        assert_eq!(sim.calls().last().map(String::as_str), Some("read_all_actions"));
    }

    #[tokio::test]
    async fn move_pick_and_place_closes_then_opens() {
        let (sim, arm) = setup();
        let routine = move_pick_and_place([0.4, 0.0, 0.2], [0.6, 0.2, 0.3], [90.0, 0.0, 90.0]);

        assert_eq!(run_routine(&arm, &routine).await, Ok(true));
        assert_eq!(sim.pose(), Pose::new(0.6, 0.2, 0.3, 90.0, 0.0, 90.0));
        assert_eq!(sim.gripper(), 0.0);
        let grips = sim
            .calls()
            .into_iter()
            .filter(|c| c == "send_gripper_command")
            .count();
        assert_eq!(grips, 2);
    }

    #[tokio::test]
    async fn scripted_gate_picks_first_match() {
        let (sim, arm) = setup();
        let gate = ScriptedGate(Mutex::new(VecDeque::from([false, true, true])));

        let outcome = pick_by_color(&arm, &gate, &stations(3), "Blue").await;
        assert_eq!(
            outcome,
            Ok(PickOutcome::Picked {
                candidate: 1,
                success: true
            })
        );
        let executed = sim.executed();
        assert!(executed.contains(&"Bottle2_Hold_Pos".to_string()));
        assert!(!executed.contains(&"Bottle3_Watch_Pos".to_string()));
    }

    #[tokio::test]
    async fn blue_at_second_station_is_picked_there() {
        let (sim, arm) = setup();
        let camera = Arc::new(SimCamera::new(Arc::clone(&sim)));
        camera.place("Bottle1_Watch_Pos", Color::Red);
        camera.place("Bottle2_Watch_Pos", Color::Blue);
        let gate = VisionGate::new(camera.clone(), VisionConfig::default());

        let outcome = pick_by_color(&arm, &gate, &stations(3), "Blue").await;

        assert_eq!(
            outcome,
            Ok(PickOutcome::Picked {
                candidate: 1,
                success: true
            })
        );
        assert_eq!(
            sim.executed(),
            [
                "Bottle1_Watch_Pos",
                "Bottle2_Watch_Pos",
                "Bottle2_Top",
                "Bottle2_Hold_Pos",
                "water_gripper_hold",
                "Bottle2_Top",
                "Home",
                "Rest",
                "open_gripper",
            ]
        );
        assert_eq!(camera.times_opened(), 2);
        assert_eq!(camera.open_sessions(), 0);
    }

    #[tokio::test]
    async fn missing_color_visits_every_station_and_reports_not_found() {
        let (sim, arm) = setup();
        let camera = Arc::new(SimCamera::new(Arc::clone(&sim)));
        camera.place("Bottle1_Watch_Pos", Color::Red);
        camera.place("Bottle2_Watch_Pos", Color::Blue);
        let gate = VisionGate::new(camera, VisionConfig::default());

        let outcome = pick_by_color(&arm, &gate, &stations(2), "Green").await;

        assert_eq!(outcome, Ok(PickOutcome::NotFound { success: true }));
        assert_eq!(sim.executed(), ["Bottle1_Watch_Pos", "Bottle2_Watch_Pos"]);
    }

    #[tokio::test]
    async fn blind_camera_falls_through_to_not_found() {
        let (sim, arm) = setup();
        let camera = Arc::new(SimCamera::new(Arc::clone(&sim)));
        camera.place("Bottle1_Watch_Pos", Color::Red);
        camera.set_available(false);
        let gate = VisionGate::new(camera, VisionConfig::default());

        let outcome = pick_by_color(&arm, &gate, &stations(3), "Red").await;
        assert_eq!(outcome, Ok(PickOutcome::NotFound { success: true }));
        assert_eq!(sim.executed().len(), 3);
    }

    #[tokio::test]
    async fn failed_watch_move_is_distinct_from_not_found() {
        let (sim, arm) = setup();
        sim.script([Behavior::Reject]);
        let gate = ScriptedGate(Mutex::new(VecDeque::new()));

        let outcome = pick_by_color(&arm, &gate, &stations(2), "Red").await.unwrap();
        assert_eq!(outcome, PickOutcome::NotFound { success: false });
        assert!(!outcome.success());
    }
}
