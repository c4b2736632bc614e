//! Shared fixtures for controller integration tests.
//!
//! The analyzer is stood in for by `sleep`: each test launches it with a
//! distinct, unlikely duration so the reclaim scans of concurrently running
//! tests cannot see each other's children.

use bc_core::automation::MockClient;
use bc_core::config::ControllerConfig;
use bc_core::controller::{Controller, SetupParams};
use bc_core::store::ProjectStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestHarness {
    pub controller: Arc<Controller>,
    pub client: Arc<MockClient>,
    /// Keeps the working directory alive for the test's duration.
    #[allow(dead_code)]
    pub work_dir: TempDir,
}

/// Controller wired to `client`, supervising a `sleep <marker>` child.
#[allow(dead_code)]
pub fn harness(client: MockClient, marker: &str) -> TestHarness {
    let work_dir = tempfile::tempdir().unwrap();

    let mut config = ControllerConfig::for_executable("sleep");
    config.process_match = format!("sleep {marker}");
    config.default_mode = String::new();
    config.default_launch_args = marker.to_string();
    config.close_timeout = Duration::from_secs(2);
    config.kill_existing_on_setup = false;

    let client = Arc::new(client);
    let controller = Arc::new(Controller::new(
        config,
        ProjectStore::new(work_dir.path()),
        client.clone(),
    ));

    TestHarness {
        controller,
        client,
        work_dir,
    }
}

#[allow(dead_code)]
pub fn demo_setup(bytes: &[u8]) -> SetupParams {
    SetupParams {
        file_name: "demo.bproj".to_string(),
        bytes: bytes.to_vec(),
        project_name: Some("demo".to_string()),
        mode: None,
        launch_args: None,
    }
}
