//! Engine configuration.
//!
//! Loaded from the JSON file named by [`CONFIG_ENV`]; every section falls back to the
//! stock values when omitted.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::primitive::MotionTiming;
use crate::vision::VisionConfig;

/// Environment variable holding the config file path.
pub const CONFIG_ENV: &str = "ARM_SEQUENCER_CONFIG";

/// Default on-disk location of the simulator's action catalog (Sled).
pub const SIM_CATALOG_PATH: &str = "arm_action_catalog";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timing: TimingConfig,
    pub vision: VisionConfig,
    pub poses: PoseNames,
    pub gripper: GripperPresets,
    pub candidates: Vec<CandidateConfig>,
    /// Local-socket name of the narration sink; narration is only logged when unset.
    pub narrator_ipc: Option<String>,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub action_timeout_ms: u64,
    pub gripper_settle_ms: u64,
    pub abort_on_timeout: bool,
    /// Bound on each command listen. Unset means wait for typed input indefinitely.
    pub listen_timeout_ms: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: 30_000,
            gripper_settle_ms: 2_000,
            abort_on_timeout: false,
            listen_timeout_ms: None,
        }
    }
}

impl TimingConfig {
    pub fn motion(&self) -> MotionTiming {
        MotionTiming {
            action_timeout: Duration::from_millis(self.action_timeout_ms),
            gripper_settle: Duration::from_millis(self.gripper_settle_ms),
            abort_on_timeout: self.abort_on_timeout,
        }
    }

    pub fn listen_timeout(&self) -> Option<Duration> {
        self.listen_timeout_ms.map(Duration::from_millis)
    }
}

/// Registered names of the parking poses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseNames {
    pub home: String,
    pub rest: String,
}

impl Default for PoseNames {
    fn default() -> Self {
        Self {
            home: "Home".to_string(),
            rest: "Rest".to_string(),
        }
    }
}

/// Registered names of the gripper presets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GripperPresets {
    pub open_preset: String,
    /// Used by the pick routine.
    pub grip_preset: String,
    /// Used by the "hold object" command.
    pub hold_preset: String,
}

impl Default for GripperPresets {
    fn default() -> Self {
        Self {
            open_preset: "open_gripper".to_string(),
            grip_preset: "water_gripper_hold".to_string(),
            hold_preset: "newobject".to_string(),
        }
    }
}

/// One station of the vision-gated pick loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub watch_pose: String,
    pub approach_pose: String,
    pub hold_pose: String,
}

impl CandidateConfig {
    /// The `BottleN_*` station names.
    pub fn bottle(n: usize) -> Self {
        Self {
            watch_pose: format!("Bottle{n}_Watch_Pos"),
            approach_pose: format!("Bottle{n}_Top"),
            hold_pose: format!("Bottle{n}_Hold_Pos"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub catalog_path: String,
    pub motion_delay_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            catalog_path: SIM_CATALOG_PATH.to_string(),
            motion_delay_ms: 250,
        }
    }
}

impl EngineConfig {
    /// Stock configuration with the three bottle stations.
    pub fn stock() -> Self {
        Self {
            candidates: (1..=3).map(CandidateConfig::bottle).collect(),
            ..Self::default()
        }
    }

    /// Reads a JSON config file. An empty `candidates` list gets the stock stations.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        if config.candidates.is_empty() {
            config.candidates = Self::stock().candidates;
        }
        Ok(config)
    }

    /// Loads from [`CONFIG_ENV`] if set, otherwise returns [`EngineConfig::stock`].
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::stock()),
        }
    }
}
