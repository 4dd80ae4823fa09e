use dynamic_pool::harness::{HarnessConfig, RotationHarness};
use dynamic_pool::memory::MemoryServer;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Runs the credential rotation harness against the in-memory server.
///
/// `ROTATION_TEST_DURATION_MS` sets the run length (default three minutes),
/// `RUST_LOG` the log filter (default `info`).
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match HarnessConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let server = MemoryServer::new().with_latency(Duration::from_millis(2));
    let mut harness = RotationHarness::new(server.clone(), config);
    let result = harness.run(|credentials| server.connector(credentials)).await;
    match result {
        Ok(report) => {
            println!(
                "writes = {}, stored rows = {}, rotations = {}",
                report.writes, report.stored_rows, report.rotations
            );
            println!("pool = {}", report.pool);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, phase = %harness.phase(), "rotation run failed");
            ExitCode::FAILURE
        }
    }
}
