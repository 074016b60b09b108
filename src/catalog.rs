//! Name → handle lookup against the controller's registered action list.

use tracing::{error, warn};

use crate::controller::{ActionHandle, ActionType, Controller};
use crate::error::{ControllerError, SequenceError};

/// Looks `name` up among the registered actions of type `filter`.
///
/// The list is re-read on every call. Matching is exact and case-sensitive; the first
/// entry in list order wins when a name is registered twice.
pub async fn resolve(
    controller: &dyn Controller,
    filter: ActionType,
    name: &str,
) -> Result<Option<ActionHandle>, ControllerError> {
    let actions = controller.read_all_actions(filter).await?;
    Ok(actions
        .into_iter()
        .find(|entry| entry.name == name)
        .map(|entry| entry.handle))
}

/// Like [`resolve`], but a missing name is fatal for the caller.
///
/// `Ok(None)` means the list could not be read; the failure is logged and the caller
/// treats the step as unfinished.
pub async fn require(
    controller: &dyn Controller,
    filter: ActionType,
    name: &str,
) -> Result<Option<ActionHandle>, SequenceError> {
    match resolve(controller, filter, name).await {
        Ok(Some(handle)) => Ok(Some(handle)),
        Ok(None) => {
            error!(name, action_type = ?filter, "action is not registered on the controller");
            Err(SequenceError::UnknownAction {
                name: name.to_string(),
                action_type: filter,
            })
        }
        Err(err) => {
            warn!(%err, name, "could not read the controller action list");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pose::Pose;
    use crate::sim::{ActionTarget, SimController};

    #[tokio::test]
    async fn resolves_exact_name_within_filter() {
        let sim = SimController::in_memory(Duration::from_millis(1));
        sim.store()
            .register("Home", ActionTarget::Joint(Pose::zero()))
            .unwrap();
        let grip = sim
            .store()
            .register("open_gripper", ActionTarget::Gripper(0.0))
            .unwrap();

        let found = resolve(&sim, ActionType::SendGripperCommand, "open_gripper")
            .await
            .unwrap();
        assert_eq!(found, Some(grip));

        let wrong_filter = resolve(&sim, ActionType::ReachJointAngles, "open_gripper")
            .await
            .unwrap();
        assert_eq!(wrong_filter, None);
    }

    #[tokio::test]
    async fn lookup_is_case_sensitive_with_no_partial_match() {
        let sim = SimController::in_memory(Duration::from_millis(1));
        sim.store()
            .register("Bottle1_Top", ActionTarget::Joint(Pose::zero()))
            .unwrap();

        for name in ["bottle1_top", "Bottle1", "Bottle1_Top "] {
            let found = resolve(&sim, ActionType::ReachJointAngles, name)
                .await
                .unwrap();
            assert_eq!(found, None, "{name:?} should not resolve");
        }
    }

    #[tokio::test]
    async fn duplicate_names_resolve_to_first_registered() {
        let sim = SimController::in_memory(Duration::from_millis(1));
        let first = sim
            .store()
            .register("Rest", ActionTarget::Joint(Pose::zero()))
            .unwrap();
        sim.store()
            .register("Rest", ActionTarget::Joint(Pose::along(crate::pose::Axis::Z, 0.1)))
            .unwrap();

        let found = resolve(&sim, ActionType::ReachJointAngles, "Rest")
            .await
            .unwrap();
        assert_eq!(found, Some(first));
    }

    #[tokio::test]
    async fn require_turns_a_miss_into_a_fatal_error() {
        let sim = SimController::in_memory(Duration::from_millis(1));
        let err = require(&sim, ActionType::ReachJointAngles, "Nowhere")
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SequenceError::UnknownAction {
                name: "Nowhere".to_string(),
                action_type: ActionType::ReachJointAngles,
            }
        );
    }

    #[tokio::test]
    async fn require_returns_the_registered_handle() {
        let sim = SimController::in_memory(Duration::from_millis(1));
        let home = sim
            .store()
            .register("Home", ActionTarget::Joint(Pose::zero()))
            .unwrap();

        let found = require(&sim, ActionType::ReachJointAngles, "Home").await;
        assert_eq!(found, Ok(Some(home)));
    }
}
