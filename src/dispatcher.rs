//! Maps free-text commands onto routines until told to stop.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::{EngineConfig, GripperPresets, PoseNames};
use crate::error::SequenceError;
use crate::pose::{Axis, Pose};
use crate::primitive::Arm;
use crate::routine::{pick_by_color, Candidate, PickOutcome, Tally};
use crate::vision::ColorGate;
use crate::voice::{CommandSource, Heard, Narrator};

pub const COMMAND_PROMPT: &str = "What do you want me to do now?";
pub const COLOR_PROMPT: &str = "Which color code would you like to pick up?";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Relative move along one axis (meters or degrees).
    Nudge { axis: Axis, amount: f64 },
    GoHome,
    TakeRest,
    HoldObject,
    OpenGripper,
    PickUp,
    CaptureImage,
    Stop,
}

/// Recognised command tokens, after normalisation.
pub const VOCABULARY: &[(&str, Command)] = &[
    ("go left", Command::Nudge { axis: Axis::Y, amount: -0.05 }),
    ("go right", Command::Nudge { axis: Axis::Y, amount: 0.05 }),
    ("go up", Command::Nudge { axis: Axis::Z, amount: 0.05 }),
    ("go down", Command::Nudge { axis: Axis::Z, amount: -0.05 }),
    ("go forward", Command::Nudge { axis: Axis::X, amount: 0.05 }),
    ("go back", Command::Nudge { axis: Axis::X, amount: -0.05 }),
    ("turn left", Command::Nudge { axis: Axis::ThetaZ, amount: -90.0 }),
    ("turn right", Command::Nudge { axis: Axis::ThetaZ, amount: 90.0 }),
    ("turn around", Command::Nudge { axis: Axis::ThetaZ, amount: -180.0 }),
    ("go home", Command::GoHome),
    ("take rest", Command::TakeRest),
    ("hold object", Command::HoldObject),
    ("open gripper", Command::OpenGripper),
    ("drop", Command::OpenGripper),
    ("capture image", Command::CaptureImage),
    ("pick up", Command::PickUp),
    ("stop", Command::Stop),
];

impl Command {
    /// Case-insensitive; underscores and repeated whitespace count as single spaces.
    pub fn parse(input: &str) -> Option<Command> {
        let normalized = input
            .to_lowercase()
            .replace('_', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        VOCABULARY
            .iter()
            .find(|(token, _)| *token == normalized)
            .map(|(_, command)| *command)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Owns the arm for a session and drives it from a [`CommandSource`].
pub struct Dispatcher {
    arm: Arm,
    gate: Arc<dyn ColorGate>,
    narrator: Arc<dyn Narrator>,
    poses: PoseNames,
    gripper: GripperPresets,
    candidates: Vec<Candidate>,
}

impl Dispatcher {
    pub fn new(
        arm: Arm,
        gate: Arc<dyn ColorGate>,
        narrator: Arc<dyn Narrator>,
        config: &EngineConfig,
    ) -> Self {
        let candidates = config
            .candidates
            .iter()
            .map(|station| station.candidate(&config.poses, &config.gripper))
            .collect();

        Self {
            arm,
            gate,
            narrator,
            poses: config.poses.clone(),
            gripper: config.gripper.clone(),
            candidates,
        }
    }

    /// Runs commands until "stop" or until the source closes.
    ///
    /// Returns `Ok(true)` iff every step attempted during the session succeeded.
    pub async fn run(&self, source: &mut dyn CommandSource) -> Result<bool, SequenceError> {
        let mut tally = Tally::default();
        loop {
            let command = match source.listen(COMMAND_PROMPT).await {
                Heard::Phrase(phrase) => match Command::parse(&phrase) {
                    Some(command) => command,
                    None => {
                        debug!(%phrase, "ignoring unrecognised command");
                        continue;
                    }
                },
                Heard::Silence => continue,
                Heard::Closed => {
                    warn!("command source closed; stopping");
                    Command::Stop
                }
            };

            if let Flow::Stop = self.execute(command, source, &mut tally).await? {
                break;
            }
        }

        info!(success = tally.passed(), "session finished");
        Ok(tally.passed())
    }

    #[instrument(skip(self, source, tally))]
    async fn execute(
        &self,
        command: Command,
        source: &mut dyn CommandSource,
        tally: &mut Tally,
    ) -> Result<Flow, SequenceError> {
        match command {
            Command::Nudge { axis, amount } => {
                tally.record(self.arm.reach_relative_pose(&Pose::along(axis, amount)).await);
            }
            Command::GoHome => {
                self.narrator.speak("Going Home");
                tally.record(self.arm.reach_named_pose(&self.poses.home).await?);
            }
            Command::TakeRest => {
                self.narrator.speak("Going to rest position");
                tally.record(self.arm.reach_named_pose(&self.poses.rest).await?);
            }
            Command::HoldObject => {
                tally.record(self.arm.gripper_preset(&self.gripper.hold_preset).await?);
            }
            Command::OpenGripper => {
                tally.record(self.arm.gripper_preset(&self.gripper.open_preset).await?);
            }
            Command::CaptureImage => {
                self.narrator.speak("Please hold the image for 5 seconds");
            }
            Command::PickUp => self.pick_up(source, tally).await?,
            Command::Stop => {
                self.narrator.speak("Thank you very much!");
                tally.record(self.arm.reach_named_pose(&self.poses.rest).await?);
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn pick_up(
        &self,
        source: &mut dyn CommandSource,
        tally: &mut Tally,
    ) -> Result<(), SequenceError> {
        self.narrator.speak("Sure, starting pickup routine");
        tally.record(self.arm.reach_named_pose(&self.poses.home).await?);
        tally.record(self.arm.gripper_preset(&self.gripper.open_preset).await?);

        let color = match source.listen(COLOR_PROMPT).await {
            Heard::Phrase(color) => color,
            Heard::Silence | Heard::Closed => {
                self.narrator.speak("I did not catch a color code");
                return Ok(());
            }
        };

        let gate = self.gate.as_ref();
        let outcome = pick_by_color(&self.arm, gate, &self.candidates, color.trim()).await?;
        if let PickOutcome::NotFound { .. } = outcome {
            self.narrator
                .speak("Please check if you have that color or it's my camera's fault!");
        }
        tally.record(outcome.success());
        Ok(())
    }
}
