use bc_core::automation::{AutomationClient, BridgeClient, MockClient};
use bc_core::config::ControllerConfig;
use bc_core::controller::Controller;
use bc_core::store::ProjectStore;
use bc_server::routes::{self, AppState};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "benchctld", version, about = "Remote control server for the bench analyzer")]
struct Cli {
    /// Where the HTTP API will listen, e.g. 127.0.0.1:8181
    #[arg(long, default_value = "127.0.0.1:8181")]
    listen: String,

    /// Working directory for uploaded projects and exported reports.
    /// Defaults to `benchctl` under the system temp directory.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Analyzer executable; a bare name is resolved through PATH.
    #[arg(long, default_value = "analyzer500")]
    analyzer_exe: PathBuf,

    /// Command-line pattern identifying analyzer processes for the reclaim
    /// scan. Defaults to the executable's file name.
    #[arg(long)]
    process_match: Option<String>,

    /// Analyzer operating mode passed at launch.
    #[arg(long, default_value = "sequence")]
    mode: String,

    /// Extra analyzer launch arguments, whitespace-separated.
    #[arg(long, default_value = "")]
    launch_args: String,

    /// Automation-bridge executable used to drive the analyzer.
    #[arg(long, default_value = "analyzer-bridge")]
    bridge_exe: PathBuf,

    /// Timeout in seconds for automation calls without an explicit one
    /// (project load, structure query, export).
    #[arg(long, default_value_t = 120)]
    bridge_timeout_seconds: u64,

    /// Default per-measurement timeout in seconds.
    #[arg(long, default_value_t = 120)]
    measurement_timeout_seconds: u64,

    /// Seconds a graceful close may take before it counts as failed.
    #[arg(long, default_value_t = 10)]
    close_timeout_seconds: u64,

    /// Kill any analyzer processes left over from earlier sessions on
    /// startup.
    #[arg(long, default_value_t = false)]
    kill_existing: bool,

    /// Skip launching setup's stray-process reclaim before each launch.
    #[arg(long, default_value_t = false)]
    no_kill_on_setup: bool,

    /// Serve a scripted mock automation session instead of the bridge, for
    /// protocol-level smoke testing without an analyzer installed.
    #[arg(long, default_value_t = false)]
    mock_automation: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let work_dir = cli
        .work_dir
        .unwrap_or_else(|| std::env::temp_dir().join("benchctl"));

    let mut config = ControllerConfig::for_executable(cli.analyzer_exe);
    if let Some(pattern) = cli.process_match {
        config.process_match = pattern;
    }
    config.default_mode = cli.mode;
    config.default_launch_args = cli.launch_args;
    config.default_measurement_timeout = Duration::from_secs(cli.measurement_timeout_seconds);
    config.close_timeout = Duration::from_secs(cli.close_timeout_seconds);
    config.kill_existing_on_setup = !cli.no_kill_on_setup;

    let client: Arc<dyn AutomationClient> = if cli.mock_automation {
        info!("serving the mock automation session (--mock-automation)");
        Arc::new(MockClient::demo())
    } else {
        Arc::new(BridgeClient::new(
            cli.bridge_exe,
            Duration::from_secs(cli.bridge_timeout_seconds),
        ))
    };

    info!("benchctl starting: work_dir={}", work_dir.display());
    let controller = Arc::new(Controller::new(
        config,
        ProjectStore::new(&work_dir),
        client,
    ));

    if cli.kill_existing {
        let killed = controller.reset().await?;
        info!("--kill-existing: killed {killed} analyzer process(es)");
    }

    let app = routes::router(AppState { controller })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = cli.listen.parse()?;
    info!("listening on http://{addr}");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
