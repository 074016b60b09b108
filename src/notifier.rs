//! Turns the controller's asynchronous action-event stream into a bounded wait.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::controller::{
    ActionCallback, ActionEvent, ActionHandle, ActionNotification, Controller,
    SubscriptionHandle,
};
use crate::error::ControllerError;

/// How long an issued action may run before the wait gives up.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Active event subscription; unsubscribes when dropped.
struct Subscription<'a> {
    controller: &'a dyn Controller,
    handle: SubscriptionHandle,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.controller.unsubscribe(self.handle);
        debug!(subscription = self.handle.0, "released action subscription");
    }
}

/// Builds the callback side of a one-shot completion gate.
///
/// The first terminal event fires the gate; anything after that is dropped. With
/// `expected` set, terminal events tagged with a different handle are ignored;
/// untagged events always count.
fn completion_gate(
    expected: Option<ActionHandle>,
) -> (ActionCallback, oneshot::Receiver<ActionEvent>) {
    let (tx, rx) = oneshot::channel();
    let slot = Mutex::new(Some(tx));

    let callback: ActionCallback = Arc::new(move |notification: ActionNotification| {
        debug!(event = ?notification.event, handle = ?notification.handle, "action event");
        if !notification.event.is_terminal() {
            return;
        }
        if let (Some(expected), Some(actual)) = (expected, notification.handle) {
            if expected != actual {
                debug!(?expected, ?actual, "ignoring terminal event of another action");
                return;
            }
        }
        let sender = slot.lock().ok().and_then(|mut pending| pending.take());
        if let Some(sender) = sender {
            let _ = sender.send(notification.event);
        }
    });

    (callback, rx)
}

/// Subscribes to action events, runs `issue`, then waits for END or ABORT.
///
/// `expected` binds the wait to one registered action, so a late END from an earlier
/// timed-out action cannot release it. Returns `Ok(true)` if a terminal event arrived
/// before `timeout`, `Ok(false)` on timeout. Errors from subscribing or from `issue`
/// are returned as-is. The subscription is released on every path.
pub async fn await_completion<F>(
    controller: &dyn Controller,
    expected: Option<ActionHandle>,
    timeout: Duration,
    issue: F,
) -> Result<bool, ControllerError>
where
    F: Future<Output = Result<(), ControllerError>>,
{
    let (callback, gate) = completion_gate(expected);
    let subscription = Subscription {
        controller,
        handle: controller.subscribe_action_events(callback)?,
    };

    issue.await?;

    let finished = match tokio::time::timeout(timeout, gate).await {
        Ok(Ok(ActionEvent::Abort)) => {
            warn!("action aborted by controller");
            true
        }
        Ok(Ok(_)) => true,
        Ok(Err(_)) => {
            warn!("action event stream closed before completion");
            false
        }
        Err(_) => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "timeout on action notification wait"
            );
            false
        }
    };

    drop(subscription);
    Ok(finished)
}
