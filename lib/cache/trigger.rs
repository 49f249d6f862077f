//! The single-shot latch gating a preload.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::events::FireReason;

/// Observable state of a [`PreloadTrigger`].
///
/// Transitions are monotonic: `Armed` resolves to exactly one of
/// `Fired` or `Cancelled`, and the terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    /// Waiting for the timer, a read-volume fire, or a cancel.
    Armed,
    /// Resolved: the preload should run.
    Fired(FireReason),
    /// Resolved: the file closed before anything fired.
    Cancelled,
}

/// A single-firing, cancellable latch.
///
/// Created armed with a pending timer; firing or cancelling clears the
/// timer. Observers that subscribe after resolution still see the
/// recorded value.
pub struct PreloadTrigger {
    state: watch::Sender<TriggerState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PreloadTrigger {
    /// Arm a trigger that fires with `reason` after `timeout` unless
    /// fired or cancelled first. A zero timeout fires on the next timer
    /// poll, i.e. effectively immediately.
    #[must_use]
    pub fn arm(timeout: Duration, reason: FireReason) -> Arc<Self> {
        let (tx, _) = watch::channel(TriggerState::Armed);
        let trigger = Arc::new(Self {
            state: tx,
            timer: Mutex::new(None),
        });

        // The timer holds a weak reference: dropping the last strong
        // handle silently disarms instead of keeping the trigger alive.
        let weak = Arc::downgrade(&trigger);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(trigger) = weak.upgrade() {
                trigger.fire(reason);
            }
        });
        *trigger.timer_slot() = Some(timer);
        trigger
    }

    fn timer_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve to `Fired(reason)` if still armed; a no-op otherwise.
    pub fn fire(&self, reason: FireReason) {
        self.transition(TriggerState::Fired(reason));
    }

    /// Resolve to `Cancelled` if still armed; a no-op otherwise.
    pub fn cancel(&self) {
        self.transition(TriggerState::Cancelled);
    }

    fn transition(&self, next: TriggerState) {
        let resolved = self.state.send_if_modified(|state| {
            if *state == TriggerState::Armed {
                *state = next;
                true
            } else {
                false
            }
        });
        if resolved && let Some(timer) = self.timer_slot().take() {
            timer.abort();
        }
    }

    /// Current state, without waiting.
    #[must_use]
    pub fn state(&self) -> TriggerState {
        *self.state.borrow()
    }

    /// Wait for the resolution. Returns immediately if the trigger has
    /// already resolved.
    pub async fn resolved(&self) -> TriggerState {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state != TriggerState::Armed {
                return state;
            }
            if rx.changed().await.is_err() {
                // The sender lives inside self, so this only happens if
                // the trigger is being torn down mid-wait.
                return TriggerState::Cancelled;
            }
        }
    }
}

impl Drop for PreloadTrigger {
    fn drop(&mut self) {
        if let Some(timer) = self.timer_slot().take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for PreloadTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadTrigger")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
