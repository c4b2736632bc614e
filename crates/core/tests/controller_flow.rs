//! Integration tests for the controller state machine.
//!
//! These tests verify that the controller:
//! - Walks the full setup -> run -> reset lifecycle
//! - Rejects operations from disallowed states without changing state
//! - Rejects concurrent mutating operations with Busy
//! - Escalates timeouts to the error state while preserving partial results
//! - Detects a crashed analyzer process from status queries

#![cfg(unix)]

mod common;

use bc_core::automation::adapters::mock_client::Behavior;
use bc_core::automation::MockClient;
use bc_core::controller::RunAllParams;
use bc_core::error::ControllerError;
use bc_protocol::ControllerState;
use common::{demo_setup, harness};
use std::time::Duration;

const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

fn run_all_defaults() -> RunAllParams {
    RunAllParams {
        timeout_seconds: None,
        export_csv: true,
        export_pdf: false,
        report_directory: None,
    }
}

#[tokio::test]
async fn test_end_to_end_demo_flow() {
    let h = harness(MockClient::demo(), "412.1");

    // setup: project "demo" with bytes b"abc"
    let outcome = h.controller.setup(demo_setup(b"abc")).await.unwrap();
    assert_eq!(outcome.identity.name, "demo");
    assert_eq!(outcome.identity.sha256, ABC_SHA256);
    assert!(outcome.pid > 0);
    assert_eq!(h.controller.state(), ControllerState::Idle);

    let status = h.controller.status().await;
    assert_eq!(status.pid, Some(outcome.pid));
    assert_eq!(
        status.project.as_ref().map(|p| p.sha256.as_str()),
        Some(ABC_SHA256)
    );

    // structure is served while idle
    let structure = h.controller.sequence_structure().await.unwrap();
    assert_eq!(structure.signal_paths.len(), 2);

    // one signal path: all 3 checked measurements pass
    let summary = h
        .controller
        .run_signal_path("Analog Output", Some(120.0))
        .await
        .unwrap();
    assert_eq!(summary.measurements_run, 3);
    assert_eq!(summary.measurements_passed, 3);
    assert_eq!(h.controller.state(), ControllerState::Idle);

    // reset: back to nothing
    h.controller.reset().await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::NotRunning);
    let status = h.controller.status().await;
    assert!(status.project.is_none());
    assert!(status.pid.is_none());
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_setup_twice_yields_identical_digest() {
    let h = harness(MockClient::demo(), "412.2");

    let first = h.controller.setup(demo_setup(b"abc")).await.unwrap();
    let second = h.controller.setup(demo_setup(b"abc")).await.unwrap();
    assert_eq!(first.identity.sha256, second.identity.sha256);
    assert_eq!(h.controller.state(), ControllerState::Idle);

    h.controller.reset().await.unwrap();
}

#[tokio::test]
async fn test_run_all_counts_checked_measurements_and_exports() {
    let h = harness(MockClient::demo(), "412.3");
    h.controller.setup(demo_setup(b"abc")).await.unwrap();

    let outcome = h.controller.run_all(run_all_defaults()).await.unwrap();
    // 3 checked in "Analog Output" + 1 of 2 checked in "Digital Input".
    assert_eq!(outcome.summary.measurements_run, 4);
    assert_eq!(outcome.summary.measurements_passed, 4);
    assert_eq!(outcome.summary.signal_paths_run, 2);
    assert!(outcome.export_warnings.is_empty());

    let csv = outcome.summary.csv_report_path.as_ref().unwrap();
    assert!(csv.to_string_lossy().ends_with(".csv"));
    assert!(outcome.summary.pdf_report_path.is_none());
    assert_eq!(h.controller.state(), ControllerState::Idle);

    h.controller.reset().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_mutating_operation_is_rejected_busy() {
    let h = harness(
        MockClient::demo().with_latency(Duration::from_millis(200)),
        "412.4",
    );
    h.controller.setup(demo_setup(b"abc")).await.unwrap();

    let controller = h.controller.clone();
    let in_flight = tokio::spawn(async move { controller.run_all(run_all_defaults()).await });

    tokio::time::sleep(Duration::from_millis(100)).await;

    // A mutating call while run_all holds the slot is rejected, not queued.
    let err = h
        .controller
        .run_signal_path("Analog Output", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Busy));
    let err = h.controller.reset().await.unwrap_err();
    assert!(matches!(err, ControllerError::Busy));

    // Snapshot reads still answer mid-operation.
    let status = h.controller.status().await;
    assert_eq!(status.state, ControllerState::RunningStep);

    // The in-flight operation is unaffected by the rejections.
    let outcome = in_flight.await.unwrap().unwrap();
    assert_eq!(outcome.summary.measurements_run, 4);
    assert_eq!(h.controller.state(), ControllerState::Idle);

    h.controller.reset().await.unwrap();
}

#[tokio::test]
async fn test_execution_failure_continues_and_stays_out_of_error_state() {
    let h = harness(
        MockClient::demo().with_behavior("THD+N", Behavior::Fault("relay stuck".to_string())),
        "412.5",
    );
    h.controller.setup(demo_setup(b"abc")).await.unwrap();

    let summary = h
        .controller
        .run_signal_path("Analog Output", None)
        .await
        .unwrap();
    assert_eq!(summary.measurements_run, 3);
    assert_eq!(summary.measurements_passed, 2);
    assert!(!summary.results[1].success);

    // A per-measurement fault is not a controller-level error.
    assert_eq!(h.controller.state(), ControllerState::Idle);

    h.controller.reset().await.unwrap();
}

#[tokio::test]
async fn test_timeout_aborts_run_and_enters_error_state() {
    let h = harness(
        MockClient::demo().with_behavior("THD+N", Behavior::TimeOut),
        "412.6",
    );
    h.controller.setup(demo_setup(b"abc")).await.unwrap();

    let err = h.controller.run_all(run_all_defaults()).await.unwrap_err();
    let ControllerError::RunAborted { summary, source } = err else {
        panic!("expected RunAborted");
    };
    assert!(source.is_timeout());
    // Partial results up to the abort are preserved.
    assert_eq!(summary.measurements_run, 1);
    assert_eq!(h.controller.state(), ControllerState::Error);

    let status = h.controller.status().await;
    assert!(status.last_error.is_some());
    // Error retains what was in flight for inspection.
    assert!(status.project.is_some());

    // Nothing but reset/setup is allowed from Error.
    let err = h
        .controller
        .run_signal_path("Analog Output", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidState { .. }));
    let err = h.controller.sequence_structure().await.unwrap_err();
    assert!(matches!(err, ControllerError::InvalidState { .. }));

    // reset recovers
    h.controller.reset().await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::NotRunning);

    // and a fresh setup works again
    h.controller.setup(demo_setup(b"abc")).await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::Idle);
    h.controller.reset().await.unwrap();
}

#[tokio::test]
async fn test_setup_is_allowed_directly_from_error_state() {
    let h = harness(
        MockClient::demo().with_behavior("Bit Depth", Behavior::TimeOut),
        "412.7",
    );
    h.controller.setup(demo_setup(b"abc")).await.unwrap();

    let _ = h.controller.run_all(run_all_defaults()).await.unwrap_err();
    assert_eq!(h.controller.state(), ControllerState::Error);

    h.controller.setup(demo_setup(b"abc")).await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::Idle);
    h.controller.reset().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_without_force_fails_when_close_is_refused() {
    let h = harness(MockClient::demo().refusing_close(), "412.8");
    h.controller.setup(demo_setup(b"abc")).await.unwrap();

    let err = h.controller.shutdown(false).await.unwrap_err();
    assert!(matches!(err, ControllerError::Automation(_)));

    // The failed shutdown stays in the current state with the error
    // recorded.
    assert_eq!(h.controller.state(), ControllerState::Idle);
    let status = h.controller.status().await;
    assert!(status.last_error.is_some());
    assert!(status.pid.is_some());

    h.controller.reset().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_with_force_always_reaches_not_running() {
    let h = harness(MockClient::demo().refusing_close(), "412.9");
    h.controller.setup(demo_setup(b"abc")).await.unwrap();

    h.controller.shutdown(true).await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::NotRunning);

    let status = h.controller.status().await;
    assert!(status.pid.is_none());
    assert!(status.project.is_none());
}

#[tokio::test]
async fn test_graceful_shutdown_of_cooperative_analyzer() {
    // The stand-in analyzer exits on its own shortly after launch, playing
    // the part of an application honoring the close request.
    let h = harness(MockClient::demo(), "0.4");
    h.controller.setup(demo_setup(b"abc")).await.unwrap();

    h.controller.shutdown(false).await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::NotRunning);
}

#[tokio::test]
async fn test_crash_detection_from_status() {
    // The stand-in analyzer dies 200ms after launch.
    let h = harness(MockClient::demo(), "0.2");
    h.controller.setup(demo_setup(b"abc")).await.unwrap();
    assert_eq!(h.controller.state(), ControllerState::Idle);

    tokio::time::sleep(Duration::from_millis(600)).await;

    let status = h.controller.status().await;
    assert_eq!(status.state, ControllerState::Error);
    assert!(status.pid.is_none());
    let message = status.last_error.unwrap().message;
    assert!(message.contains("died"));

    h.controller.reset().await.unwrap();
}

#[tokio::test]
async fn test_structure_query_failure_surfaces_but_leaves_idle() {
    let h = harness(
        MockClient::demo().failing_query("automation session lost"),
        "413.4",
    );
    h.controller.setup(demo_setup(b"abc")).await.unwrap();

    let err = h.controller.sequence_structure().await.unwrap_err();
    assert!(matches!(err, ControllerError::Automation(_)));
    // The read-only query does not poison the session.
    assert_eq!(h.controller.state(), ControllerState::Idle);

    h.controller.reset().await.unwrap();
}

#[tokio::test]
async fn test_unknown_signal_path_is_rejected_without_error_state() {
    let h = harness(MockClient::demo(), "413.1");
    h.controller.setup(demo_setup(b"abc")).await.unwrap();

    let err = h
        .controller
        .run_signal_path("Headphone Output", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::Validation(_)));
    assert_eq!(h.controller.state(), ControllerState::Idle);

    h.controller.reset().await.unwrap();
}

#[tokio::test]
async fn test_setup_load_failure_enters_error_but_retains_session() {
    let h = harness(
        MockClient::demo().failing_load("project schema too new"),
        "413.2",
    );

    let err = h.controller.setup(demo_setup(b"abc")).await.unwrap_err();
    assert!(matches!(err, ControllerError::Automation(_)));
    assert_eq!(h.controller.state(), ControllerState::Error);

    // Identity and handle from the failed setup stay inspectable.
    let status = h.controller.status().await;
    assert!(status.project.is_some());
    assert!(status.pid.is_some());
    assert!(status
        .last_error
        .unwrap()
        .message
        .contains("project schema too new"));

    h.controller.reset().await.unwrap();
    let status = h.controller.status().await;
    assert_eq!(status.state, ControllerState::NotRunning);
    assert!(status.project.is_none());
}

#[tokio::test]
async fn test_setup_launch_failure_enters_error() {
    use bc_core::config::ControllerConfig;
    use bc_core::controller::Controller;
    use bc_core::store::ProjectStore;
    use std::sync::Arc;

    let work_dir = tempfile::tempdir().unwrap();
    let mut config = ControllerConfig::for_executable("no-such-analyzer");
    config.kill_existing_on_setup = false;
    let controller = Controller::new(
        config,
        ProjectStore::new(work_dir.path()),
        Arc::new(MockClient::demo()),
    );

    let err = controller.setup(demo_setup(b"abc")).await.unwrap_err();
    assert!(matches!(err, ControllerError::Supervisor(_)));
    assert_eq!(controller.state(), ControllerState::Error);

    let status = controller.status().await;
    assert!(status.pid.is_none());
}
