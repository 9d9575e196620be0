//! Integration tests for StateManager with state change events
//!
//! These tests verify that the StateManager correctly:
//! - Emits state change events on mutations
//! - Supports multiple subscribers
//! - Handles concurrent access from multiple threads
//! - Returns to idle after operations finish or fail

use packrun::models::Operation;
use packrun::{StateChange, StateManager};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

async fn next_event(rx: &mut broadcast::Receiver<StateChange>) -> StateChange {
    timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed")
}

#[tokio::test]
async fn test_state_change_events_emitted() {
    let state = Arc::new(StateManager::new());
    let mut rx = state.subscribe();

    state.begin_operation(Operation::Installing {
        tag: "nightly".to_string(),
    });

    let event = next_event(&mut rx).await;
    assert_eq!(
        event,
        StateChange::OperationChanged {
            operation: Some(Operation::Installing {
                tag: "nightly".to_string()
            })
        }
    );
}

#[tokio::test]
async fn test_multiple_subscribers_receive_events() {
    let state = Arc::new(StateManager::new());
    let mut receivers = [state.subscribe(), state.subscribe(), state.subscribe()];

    state.set_launcher_running(true);

    for rx in receivers.iter_mut() {
        let event = next_event(rx).await;
        assert_eq!(event, StateChange::LauncherRunningChanged { running: true });
    }
}

#[tokio::test]
async fn test_no_event_without_change() {
    let state = StateManager::new();
    state.select_version(Some("stable".to_string()));
    let mut rx = state.subscribe();

    let changes = state.select_version(Some("stable".to_string()));
    assert!(changes.is_empty());
    assert!(
        timeout(Duration::from_millis(20), rx.recv()).await.is_err(),
        "unchanged state must not broadcast"
    );
}

#[tokio::test]
async fn test_download_progress_events() {
    let state = StateManager::new();
    let mut rx = state.subscribe();

    state.update_download("v2", 0, Some(4096));
    state.update_download("v2", 2048, Some(4096));

    assert_eq!(
        next_event(&mut rx).await,
        StateChange::DownloadProgressUpdated {
            tag: "v2".to_string(),
            downloaded: 0
        }
    );
    assert_eq!(
        next_event(&mut rx).await,
        StateChange::DownloadProgressUpdated {
            tag: "v2".to_string(),
            downloaded: 2048
        }
    );
    assert_eq!(state.snapshot().status_line(), "Downloading v2 (50%)");
}

#[tokio::test]
async fn test_install_workflow_events() {
    let state = StateManager::new();
    state.finish_operation();
    assert!(state.snapshot().play_enabled);
    let mut rx = state.subscribe();

    state.begin_operation(Operation::Installing {
        tag: "stable".to_string(),
    });
    state.update_download("stable", 100, None);
    state.set_versions(
        vec!["stable".to_string(), "nightly".to_string()],
        BTreeSet::from(["stable".to_string()]),
    );
    state.finish_operation();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert!(events.contains(&StateChange::PlayAvailabilityChanged { enabled: false }));
    assert!(events.contains(&StateChange::VersionsChanged {
        choices: vec!["stable".to_string(), "nightly".to_string()],
        installed: 1,
    }));
    assert_eq!(
        events.last(),
        Some(&StateChange::OperationChanged { operation: None })
    );
    assert!(state.snapshot().play_enabled);
    assert!(state.snapshot().download.is_none());
}

#[tokio::test]
async fn test_report_error_returns_to_idle() {
    let state = StateManager::new();
    state.begin_operation(Operation::RefreshingReleases);
    let mut rx = state.subscribe();

    state.report_error("refresh-releases failed: connection refused");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&StateChange::ErrorReported {
        message: "refresh-releases failed: connection refused".to_string()
    }));

    let snapshot = state.snapshot();
    assert!(snapshot.busy.is_none());
    assert!(snapshot.play_enabled);

    // Starting the next operation clears the error
    state.begin_operation(Operation::RefreshingReleases);
    assert!(state.snapshot().last_error.is_none());
}

#[tokio::test]
async fn test_running_launcher_keeps_play_disabled() {
    let state = StateManager::new();
    state.begin_operation(Operation::Launching {
        tag: "stable".to_string(),
    });
    state.set_launcher_running(true);
    state.finish_operation();
    assert!(!state.snapshot().play_enabled);

    state.set_launcher_running(false);
    assert!(state.snapshot().play_enabled);
}

#[tokio::test]
async fn test_concurrent_state_access() {
    let state = Arc::new(StateManager::new());

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                state.update(|s| s.known_packs += 1);
                state.read(|s| s.known_packs >= 1)
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(state.snapshot().known_packs, 10);
}

#[tokio::test]
async fn test_load_order_change_detection() {
    let state = StateManager::new();
    let mut rx = state.subscribe();

    state.set_load_order(vec!["b".to_string(), "a".to_string()], 3);
    assert_eq!(
        next_event(&mut rx).await,
        StateChange::LoadOrderChanged {
            enabled: vec!["b".to_string(), "a".to_string()]
        }
    );

    // Only the known count changed
    let changes = state.set_load_order(vec!["b".to_string(), "a".to_string()], 4);
    assert!(changes.is_empty());
    assert_eq!(state.snapshot().known_packs, 4);
}
