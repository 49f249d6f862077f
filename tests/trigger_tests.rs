#![allow(clippy::unwrap_used, missing_docs)]

use std::time::Duration;

use aheadfs::{FireReason, PreloadTrigger, TriggerState};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn the_timer_fires_with_its_default_reason() {
    let trigger = PreloadTrigger::arm(Duration::from_millis(10), FireReason::Time);
    assert_eq!(trigger.state(), TriggerState::Armed);

    let resolution = trigger.resolved().await;
    assert_eq!(resolution, TriggerState::Fired(FireReason::Time));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn an_explicit_fire_beats_the_timer() {
    let trigger = PreloadTrigger::arm(Duration::from_secs(60), FireReason::Time);
    trigger.fire(FireReason::Read);

    assert_eq!(
        trigger.resolved().await,
        TriggerState::Fired(FireReason::Read)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_disarms_the_timer() {
    let trigger = PreloadTrigger::arm(Duration::from_millis(10), FireReason::Time);
    trigger.cancel();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        trigger.state(),
        TriggerState::Cancelled,
        "the timer must not fire a cancelled trigger"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn the_first_resolution_wins() {
    let trigger = PreloadTrigger::arm(Duration::from_secs(60), FireReason::Time);
    trigger.fire(FireReason::Read);
    trigger.cancel();
    trigger.fire(FireReason::Time);

    assert_eq!(trigger.state(), TriggerState::Fired(FireReason::Read));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_late_subscriber_sees_the_recorded_resolution() {
    let trigger = PreloadTrigger::arm(Duration::from_secs(60), FireReason::Time);
    trigger.cancel();

    // Subscribing after the fact must resolve immediately.
    let resolution = tokio::time::timeout(Duration::from_millis(100), trigger.resolved())
        .await
        .unwrap();
    assert_eq!(resolution, TriggerState::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_zero_timeout_fires_immediately() {
    let trigger = PreloadTrigger::arm(Duration::ZERO, FireReason::Time);
    let resolution = tokio::time::timeout(Duration::from_secs(1), trigger.resolved())
        .await
        .unwrap();
    assert_eq!(resolution, TriggerState::Fired(FireReason::Time));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_waiters_both_observe_the_resolution() {
    let trigger = PreloadTrigger::arm(Duration::from_secs(60), FireReason::Time);

    let a = trigger.resolved();
    let b = trigger.resolved();
    trigger.fire(FireReason::Read);

    let (ra, rb) = tokio::join!(a, b);
    assert_eq!(ra, TriggerState::Fired(FireReason::Read));
    assert_eq!(rb, TriggerState::Fired(FireReason::Read));
}
