//! Simulated arm controller and gripper camera.
//!
//! The simulator keeps its registered action list in an embedded `sled` database so
//! named poses survive restarts the way they do on a real controller. Motions complete
//! on a separate event-delivery thread after a fixed delay, and every API call is
//! logged so tests can assert exactly what was commanded.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::controller::{
    ActionCallback, ActionEntry, ActionEvent, ActionHandle, ActionNotification, ActionType,
    Controller, ControllerAction, GripperCommand, ServoingMode, SubscriptionHandle,
};
use crate::error::{CatalogStoreError, ControllerError};
use crate::pose::Pose;
use crate::vision::{Camera, Color, Frame, FrameSource};

const ACTIONS_TREE: &str = "actions";

/// What a registered action does when executed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ActionTarget {
    /// A joint-space pose, stored as the tool pose it ends in.
    Joint(Pose),
    /// A gripper preset (finger position).
    Gripper(f64),
}

impl ActionTarget {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionTarget::Joint(_) => ActionType::ReachJointAngles,
            ActionTarget::Gripper(_) => ActionType::SendGripperCommand,
        }
    }
}

/// A registered action as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAction {
    pub name: String,
    pub identifier: u32,
    pub target: ActionTarget,
}

impl StoredAction {
    pub fn handle(&self) -> ActionHandle {
        ActionHandle {
            identifier: self.identifier,
            action_type: self.target.action_type(),
        }
    }
}

/// Persistent registered-action list.
#[derive(Clone)]
pub struct ActionStore {
    db: sled::Db,
}

impl std::fmt::Debug for ActionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionStore")
            .field("entries", &self.list(None).len())
            .finish()
    }
}

impl ActionStore {
    /// Opens or creates the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogStoreError> {
        Ok(Self::from_db(sled::open(path)?))
    }

    /// A store that is deleted when dropped.
    pub fn temporary() -> Result<Self, CatalogStoreError> {
        Ok(Self::from_db(sled::Config::new().temporary(true).open()?))
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }

    /// Registers an action. Names are not unique; a later registration with the same
    /// name is listed after the earlier one.
    pub fn register(
        &self,
        name: &str,
        target: ActionTarget,
    ) -> Result<ActionHandle, CatalogStoreError> {
        let tree = self.db.open_tree(ACTIONS_TREE)?;
        let id = self.db.generate_id()?;

        let action = StoredAction {
            name: name.to_string(),
            identifier: id as u32 + 1,
            target,
        };

        // Zero-padded id keeps iteration in registration order.
        let key = format!("{id:020}");
        tree.insert(key.as_bytes(), serde_json::to_vec(&action)?)?;
        tree.flush()?;
        Ok(action.handle())
    }

    /// All registered actions in registration order, optionally filtered by type.
    pub fn list(&self, filter: Option<ActionType>) -> Vec<StoredAction> {
        let Ok(tree) = self.db.open_tree(ACTIONS_TREE) else {
            return Vec::new();
        };

        tree.iter()
            .filter_map(|res| res.ok())
            .filter_map(|(_, v)| serde_json::from_slice::<StoredAction>(&v).ok())
            .filter(|action| filter.map_or(true, |f| action.target.action_type() == f))
            .collect()
    }

    pub fn get(&self, identifier: u32) -> Option<StoredAction> {
        self.list(None)
            .into_iter()
            .find(|action| action.identifier == identifier)
    }

    pub fn is_empty(&self) -> bool {
        self.list(None).is_empty()
    }

    /// Registers the stock poses and gripper presets if the store is empty.
    pub fn seed_defaults(&self) -> Result<(), CatalogStoreError> {
        if !self.is_empty() {
            return Ok(());
        }

        self.register(
            "Home",
            ActionTarget::Joint(Pose::new(0.45, 0.0, 0.43, 90.0, 0.0, 90.0)),
        )?;
        self.register(
            "Rest",
            ActionTarget::Joint(Pose::new(0.12, 0.0, 0.20, 10.0, 180.0, 90.0)),
        )?;
        for (n, y) in [(1, -0.25), (2, 0.0), (3, 0.25)] {
            self.register(
                &format!("Bottle{n}_Watch_Pos"),
                ActionTarget::Joint(Pose::new(0.50, y, 0.30, 90.0, 0.0, 90.0)),
            )?;
            self.register(
                &format!("Bottle{n}_Top"),
                ActionTarget::Joint(Pose::new(0.62, y, 0.30, 90.0, 0.0, 90.0)),
            )?;
            self.register(
                &format!("Bottle{n}_Hold_Pos"),
                ActionTarget::Joint(Pose::new(0.62, y, 0.12, 90.0, 0.0, 90.0)),
            )?;
        }
        self.register("open_gripper", ActionTarget::Gripper(0.0))?;
        self.register("water_gripper_hold", ActionTarget::Gripper(0.62))?;
        self.register("newobject", ActionTarget::Gripper(0.8))?;

        info!(entries = self.list(None).len(), "seeded simulator action catalog");
        Ok(())
    }
}

/// How the simulator answers the next executed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// START, then END after the motion delay.
    Complete,
    /// START, then ABORT after the motion delay; the arm does not move.
    Abort,
    /// START only; the action never reports an end.
    Silent,
    /// The request itself fails.
    Reject,
}

#[derive(Default)]
struct SimState {
    pose: Pose,
    at_named: Option<String>,
    servoing: Option<ServoingMode>,
    gripper: f64,
    subscribers: BTreeMap<u64, ActionCallback>,
    next_subscription: u64,
    script: VecDeque<Behavior>,
    calls: Vec<String>,
    executed: Vec<String>,
    cartesian_targets: Vec<Pose>,
    stops: usize,
}

enum Effect {
    Reach { pose: Pose, named: Option<String> },
    Grip(f64),
}

/// In-process stand-in for an arm controller session.
pub struct SimController {
    store: ActionStore,
    motion_delay: Duration,
    state: Arc<Mutex<SimState>>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimController {
    pub fn new(store: ActionStore, motion_delay: Duration) -> Self {
        Self {
            store,
            motion_delay,
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// Opens the store at `path`, seeding the stock catalog on first use.
    pub fn open(
        path: impl AsRef<Path>,
        motion_delay: Duration,
    ) -> Result<Self, CatalogStoreError> {
        let store = ActionStore::open(path)?;
        store.seed_defaults()?;
        Ok(Self::new(store, motion_delay))
    }

    /// Empty temporary catalog.
    #[cfg(test)]
    pub(crate) fn in_memory(motion_delay: Duration) -> Self {
        Self::new(
            ActionStore::temporary().expect("failed to open temporary sled db"),
            motion_delay,
        )
    }

    /// Temporary catalog with the stock poses and presets.
    #[cfg(test)]
    pub(crate) fn seeded(motion_delay: Duration) -> Self {
        let sim = Self::in_memory(motion_delay);
        sim.store.seed_defaults().expect("failed to seed catalog");
        sim
    }

    pub fn store(&self) -> &ActionStore {
        &self.store
    }

    /// Queues behaviours for the next executed actions; unscripted actions complete.
    pub fn script(&self, behaviors: impl IntoIterator<Item = Behavior>) {
        lock(&self.state).script.extend(behaviors);
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }

    /// Every API call in order, by method name.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Names of executed actions in order (registered name or request name).
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state).executed.clone()
    }

    /// Targets of every accepted Cartesian reach, in order.
    pub fn cartesian_targets(&self) -> Vec<Pose> {
        lock(&self.state).cartesian_targets.clone()
    }

    pub fn pose(&self) -> Pose {
        lock(&self.state).pose
    }

    pub fn set_pose(&self, pose: Pose) {
        let mut state = lock(&self.state);
        state.pose = pose;
        state.at_named = None;
    }

    /// The named pose the arm last reached, if it has not moved since.
    pub fn current_named_pose(&self) -> Option<String> {
        lock(&self.state).at_named.clone()
    }

    pub fn gripper(&self) -> f64 {
        lock(&self.state).gripper
    }

    pub fn servoing_mode(&self) -> Option<ServoingMode> {
        lock(&self.state).servoing
    }

    pub fn stop_count(&self) -> usize {
        lock(&self.state).stops
    }

    fn record(&self, call: &str) {
        lock(&self.state).calls.push(call.to_string());
    }

    /// Starts a motion and reports its lifecycle from a delivery thread.
    fn begin(
        &self,
        label: &str,
        handle: Option<ActionHandle>,
        effect: Effect,
    ) -> Result<(), ControllerError> {
        let behavior = {
            let mut state = lock(&self.state);
            let behavior = state.script.pop_front().unwrap_or(Behavior::Complete);
            if behavior == Behavior::Reject {
                return Err(ControllerError::Rejected(format!("{label}: rejected")));
            }
            state.executed.push(label.to_string());
            behavior
        };

        let state = Arc::clone(&self.state);
        let delay = self.motion_delay;
        let label = label.to_string();
        thread::spawn(move || {
            notify(&state, ActionEvent::Start, handle);
            thread::sleep(delay);

            match behavior {
                Behavior::Complete => {
                    {
                        let mut state = lock(&state);
                        match effect {
                            Effect::Reach { pose, named } => {
                                state.pose = pose;
                                state.at_named = named;
                            }
                            Effect::Grip(finger) => state.gripper = finger,
                        }
                    }
                    debug!(action = %label, "simulated action finished");
                    notify(&state, ActionEvent::End, handle);
                }
                Behavior::Abort => notify(&state, ActionEvent::Abort, handle),
                Behavior::Silent | Behavior::Reject => {}
            }
        });

        Ok(())
    }
}

fn notify(state: &Mutex<SimState>, event: ActionEvent, handle: Option<ActionHandle>) {
    let subscribers: Vec<ActionCallback> = lock(state).subscribers.values().cloned().collect();
    for callback in subscribers {
        callback(ActionNotification { event, handle });
    }
}

#[async_trait]
impl Controller for SimController {
    async fn actuator_count(&self) -> Result<u32, ControllerError> {
        self.record("actuator_count");
        Ok(7)
    }

    async fn execute_action(&self, action: ControllerAction) -> Result<(), ControllerError> {
        self.record("execute_action");
        self.begin(
            &action.name,
            None,
            Effect::Reach {
                pose: action.target,
                named: None,
            },
        )?;
        lock(&self.state).cartesian_targets.push(action.target);
        Ok(())
    }

    async fn execute_action_by_reference(
        &self,
        handle: ActionHandle,
    ) -> Result<(), ControllerError> {
        self.record("execute_action_by_reference");
        let action = self.store.get(handle.identifier).ok_or_else(|| {
            ControllerError::Rejected(format!("unknown handle {}", handle.identifier))
        })?;

        let effect = match action.target {
            ActionTarget::Joint(pose) => Effect::Reach {
                pose,
                named: Some(action.name.clone()),
            },
            ActionTarget::Gripper(finger) => Effect::Grip(finger),
        };
        self.begin(&action.name, Some(handle), effect)
    }

    fn subscribe_action_events(
        &self,
        callback: ActionCallback,
    ) -> Result<SubscriptionHandle, ControllerError> {
        let mut state = lock(&self.state);
        state.calls.push("subscribe_action_events".to_string());
        state.next_subscription += 1;
        let id = state.next_subscription;
        state.subscribers.insert(id, callback);
        Ok(SubscriptionHandle(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut state = lock(&self.state);
        state.calls.push("unsubscribe".to_string());
        state.subscribers.remove(&handle.0);
    }

    async fn read_all_actions(
        &self,
        filter: ActionType,
    ) -> Result<Vec<ActionEntry>, ControllerError> {
        self.record("read_all_actions");
        Ok(self
            .store
            .list(Some(filter))
            .into_iter()
            .map(|action| ActionEntry {
                handle: action.handle(),
                name: action.name,
            })
            .collect())
    }

    async fn set_servoing_mode(&self, mode: ServoingMode) -> Result<(), ControllerError> {
        let mut state = lock(&self.state);
        state.calls.push("set_servoing_mode".to_string());
        state.servoing = Some(mode);
        Ok(())
    }

    async fn send_gripper_command(
        &self,
        command: GripperCommand,
    ) -> Result<(), ControllerError> {
        let mut state = lock(&self.state);
        state.calls.push("send_gripper_command".to_string());
        state.gripper = command.finger;
        Ok(())
    }

    async fn refresh_feedback(&self) -> Result<Pose, ControllerError> {
        let mut state = lock(&self.state);
        state.calls.push("refresh_feedback".to_string());
        Ok(state.pose)
    }

    async fn stop(&self) -> Result<(), ControllerError> {
        let mut state = lock(&self.state);
        state.calls.push("stop".to_string());
        state.stops += 1;
        Ok(())
    }
}

/// Representative BGR for rendering a colour.
fn swatch(color: Color) -> [u8; 3] {
    match color {
        Color::Red => [0, 0, 255],
        Color::Yellow => [0, 255, 255],
        Color::Green => [0, 255, 0],
        Color::Blue => [255, 0, 0],
        Color::Purple => [255, 0, 128],
        Color::Unknown | Color::LowSignal => [128, 128, 128],
    }
}

/// Camera that sees whatever colour was placed at the arm's current named pose.
pub struct SimCamera {
    controller: Arc<SimController>,
    scene: Mutex<HashMap<String, Color>>,
    available: AtomicBool,
    open_sessions: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

struct SimCapture {
    frame: Frame,
    open_sessions: Arc<AtomicUsize>,
}

impl FrameSource for SimCapture {
    fn read_frame(&mut self) -> Option<Frame> {
        Some(self.frame.clone())
    }
}

impl Drop for SimCapture {
    fn drop(&mut self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimCamera {
    pub fn new(controller: Arc<SimController>) -> Self {
        Self {
            controller,
            scene: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            open_sessions: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
        }
    }

    /// Puts an object of `color` in view of the camera at `pose_name`.
    pub fn place(&self, pose_name: &str, color: Color) {
        if let Ok(mut scene) = self.scene.lock() {
            scene.insert(pose_name.to_string(), color);
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Capture sessions currently held open.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// How many times the camera has been opened.
    pub fn times_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Camera for SimCamera {
    fn open(&self) -> Option<Box<dyn FrameSource>> {
        if !self.available.load(Ordering::SeqCst) {
            return None;
        }

        let color = self
            .controller
            .current_named_pose()
            .and_then(|name| self.scene.lock().ok()?.get(&name).copied())
            .unwrap_or(Color::LowSignal);

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(SimCapture {
            frame: Frame::solid(160, 120, swatch(color)),
            open_sessions: Arc::clone(&self.open_sessions),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{dominant_color, VisionConfig};

    #[test]
    fn store_lists_in_registration_order_and_filters() {
        let store = ActionStore::temporary().unwrap();
        store.register("b", ActionTarget::Joint(Pose::zero())).unwrap();
        store.register("a", ActionTarget::Gripper(0.5)).unwrap();
        store.register("c", ActionTarget::Joint(Pose::zero())).unwrap();

        let names: Vec<_> = store.list(None).into_iter().map(|a| a.name).collect();
        assert_eq!(names, ["b", "a", "c"]);

        let joints: Vec<_> = store
            .list(Some(ActionType::ReachJointAngles))
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(joints, ["b", "c"]);
    }

    #[test]
    fn seeding_only_happens_once() {
        let store = ActionStore::temporary().unwrap();
        store.seed_defaults().unwrap();
        let seeded = store.list(None).len();
        store.seed_defaults().unwrap();

        assert_eq!(store.list(None).len(), seeded);
        assert!(store
            .list(Some(ActionType::SendGripperCommand))
            .iter()
            .any(|a| a.name == "open_gripper"));
    }

    #[tokio::test]
    async fn named_reach_moves_the_arm_and_reports_end() {
        let sim = SimController::seeded(Duration::from_millis(1));
        let entries = sim
            .read_all_actions(ActionType::ReachJointAngles)
            .await
            .unwrap();
        let home = entries.iter().find(|e| e.name == "Home").unwrap().handle;

        let (tx, rx) = std::sync::mpsc::channel();
        let tx = Mutex::new(tx);
        sim.subscribe_action_events(Arc::new(move |n: ActionNotification| {
            let _ = tx.lock().unwrap().send(n.event);
        }))
        .unwrap();
        sim.execute_action_by_reference(home).await.unwrap();

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!((first, second), (ActionEvent::Start, ActionEvent::End));
        assert_eq!(sim.current_named_pose().as_deref(), Some("Home"));
    }

    #[tokio::test]
    async fn camera_sees_colour_at_current_pose_and_releases() {
        let sim = Arc::new(SimController::seeded(Duration::from_millis(1)));
        let camera = SimCamera::new(Arc::clone(&sim));
        camera.place("Bottle2_Watch_Pos", Color::Blue);

        assert_eq!(
            dominant_color(&camera, &VisionConfig::default()),
            Some(Color::LowSignal)
        );

        let entries = sim.read_all_actions(ActionType::ReachJointAngles).await.unwrap();
        let watch = entries
            .iter()
            .find(|e| e.name == "Bottle2_Watch_Pos")
            .unwrap()
            .handle;
        sim.execute_action_by_reference(watch).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            dominant_color(&camera, &VisionConfig::default()),
            Some(Color::Blue)
        );
        assert_eq!(camera.times_opened(), 2);
        assert_eq!(camera.open_sessions(), 0);
    }
}
