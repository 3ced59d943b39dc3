// Integration tests for starting and stopping service processes

use stagehand::error::StagehandError;
use stagehand::health::RetryPolicy;
use stagehand::process::{LaunchConfig, Launcher, ServiceSpec, ServiceState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;

fn quick_launcher() -> Launcher {
    Launcher::new(LaunchConfig {
        settle_window: Duration::from_millis(200),
        start_interval: Duration::from_millis(50),
        stop_timeout: Duration::from_secs(2),
        readiness: RetryPolicy::new(2, Duration::from_millis(50), Duration::from_millis(200)),
    })
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_port_conflict_after_retries() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let spec = Arc::new(
        ServiceSpec::new("squatted", "/bin/sleep", port)
            .with_args(["30"])
            .with_retries(2, Duration::from_millis(100))
            .without_readiness(),
    );

    let started = Instant::now();
    let result = quick_launcher().start(spec).await;

    match result {
        Err(StagehandError::PortConflict {
            service,
            port: conflict_port,
            attempts,
        }) => {
            assert_eq!(service, "squatted");
            assert_eq!(conflict_port, port);
            assert_eq!(attempts, 3);
        }
        other => panic!("Expected PortConflict, got {:?}", other.map(|h| h.state)),
    }

    // Two pauses between three checks
    assert!(started.elapsed() >= Duration::from_millis(200));
    drop(listener);
}

#[tokio::test]
async fn test_port_freed_during_retries() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let spec = Arc::new(
        ServiceSpec::new("patient", "/bin/sleep", port)
            .with_args(["30"])
            .with_retries(5, Duration::from_millis(200))
            .without_readiness(),
    );

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(listener);
    });

    let launcher = quick_launcher();
    let mut handle = launcher.start(spec).await.unwrap();
    assert_eq!(handle.state, ServiceState::Running);

    launcher.stop(&mut handle).await.unwrap();
}

#[tokio::test]
async fn test_immediate_exit_reports_failure() {
    let port = free_port().await;
    let spec = Arc::new(
        ServiceSpec::new("crasher", "/bin/sh", port)
            .with_args(["-c", "echo boom >&2; exit 2"])
            .without_readiness(),
    );

    match quick_launcher().start(spec).await {
        Err(StagehandError::ImmediateExit { service, status }) => {
            assert_eq!(service, "crasher");
            assert!(status.contains('2'));
        }
        other => panic!("Expected ImmediateExit, got {:?}", other.map(|h| h.state)),
    }
}

#[tokio::test]
async fn test_missing_executable_reports_spawn_error() {
    let port = free_port().await;
    let spec = Arc::new(ServiceSpec::new("ghost", "/nonexistent/stage", port).without_readiness());

    assert!(matches!(
        quick_launcher().start(spec).await,
        Err(StagehandError::SpawnError(_))
    ));
}

#[tokio::test]
async fn test_unready_service_still_handed_over() {
    // Never answers HTTP, but stays alive
    let port = free_port().await;
    let spec = Arc::new(ServiceSpec::new("silent", "/bin/sleep", port).with_args(["30"]));

    let launcher = quick_launcher();
    let mut handle = launcher.start(spec).await.unwrap();
    assert_eq!(handle.state, ServiceState::Running);

    launcher.stop(&mut handle).await.unwrap();
}

#[tokio::test]
async fn test_stop_twice_sends_one_signal() {
    let port = free_port().await;
    let spec = Arc::new(
        ServiceSpec::new("sleeper", "/bin/sleep", port)
            .with_args(["30"])
            .without_readiness(),
    );

    let launcher = quick_launcher();
    let mut handle = launcher.start(spec).await.unwrap();

    launcher.stop(&mut handle).await.unwrap();
    launcher.stop(&mut handle).await.unwrap();

    assert_eq!(handle.signals_sent(), 1);
    assert_eq!(handle.state, ServiceState::Exited);
    assert!(handle.exit_status().is_some());
}

#[tokio::test]
async fn test_stop_escalates_to_kill() {
    let port = free_port().await;
    let spec = Arc::new(
        ServiceSpec::new("stubborn", "/bin/sh", port)
            .with_args(["-c", "trap '' TERM; exec sleep 30"])
            .without_readiness(),
    );

    let launcher = Launcher::new(LaunchConfig {
        settle_window: Duration::from_millis(200),
        start_interval: Duration::from_millis(50),
        stop_timeout: Duration::from_millis(300),
        readiness: RetryPolicy::new(1, Duration::from_millis(50), Duration::from_millis(200)),
    });
    let mut handle = launcher.start(spec).await.unwrap();

    let started = Instant::now();
    launcher.stop(&mut handle).await.unwrap();

    assert_eq!(handle.state, ServiceState::Exited);
    assert_eq!(handle.signals_sent(), 2);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_output_captured_to_log_dir() {
    let temp_dir = TempDir::new().unwrap();
    let port = free_port().await;
    let spec = Arc::new(
        ServiceSpec::new("Chatty Stage", "/bin/sh", port)
            .with_args(["-c", "echo hello from stage; exec sleep 30"])
            .without_readiness(),
    );

    let launcher = quick_launcher().with_log_dir(temp_dir.path());
    let mut handle = launcher.start(spec).await.unwrap();
    launcher.stop(&mut handle).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let path = stagehand::logs::log_path(
        temp_dir.path(),
        "Chatty Stage",
        stagehand::logs::LogStream::Stdout,
    );
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.contains("hello from stage"));
}

#[tokio::test]
async fn test_launch_all_then_stop_all() {
    let first = free_port().await;
    let second = free_port().await;
    let specs: Vec<_> = [("first", first), ("second", second)]
        .into_iter()
        .map(|(name, port)| {
            Arc::new(
                ServiceSpec::new(name, "/bin/sleep", port)
                    .with_args(["30"])
                    .without_readiness(),
            )
        })
        .collect();

    let launcher = quick_launcher();
    let (_tx, mut shutdown) = watch::channel(false);
    let mut handles = launcher.launch_all(&specs, &mut shutdown).await.unwrap();
    assert_eq!(handles.len(), 2);
    assert!(handles.iter().all(|h| h.state == ServiceState::Running));

    launcher.stop_all(&mut handles).await;
    assert!(handles.iter().all(|h| h.state == ServiceState::Exited));
    assert!(handles.iter().all(|h| h.signals_sent() == 1));
}

/// Shell service that records its name in `record` when it receives SIGTERM
fn recording_service(name: &str, port: u16, record: &std::path::Path) -> Arc<ServiceSpec> {
    Arc::new(
        ServiceSpec::new(name, "/bin/sh", port)
            .with_args([
                "-c",
                "trap 'echo \"$NAME\" >> \"$RECORD\"; exit 0' TERM; while :; do sleep 0.1; done",
            ])
            .with_env("NAME", name)
            .with_env("RECORD", record.to_string_lossy())
            .without_readiness(),
    )
}

fn recorded_names(record: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(record)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_stop_all_stops_in_reverse_start_order() {
    let temp_dir = TempDir::new().unwrap();
    let record = temp_dir.path().join("stopped.txt");

    let mut specs = Vec::new();
    for name in ["generator", "normalizer", "trainer"] {
        specs.push(recording_service(name, free_port().await, &record));
    }

    let launcher = quick_launcher();
    let (_tx, mut shutdown) = watch::channel(false);
    let mut handles = launcher.launch_all(&specs, &mut shutdown).await.unwrap();
    assert_eq!(handles.len(), 3);

    launcher.stop_all(&mut handles).await;

    assert_eq!(
        recorded_names(&record),
        vec!["trainer", "normalizer", "generator"]
    );
    assert!(handles.iter().all(|h| h.signals_sent() == 1));
}

#[tokio::test]
async fn test_shutdown_during_launch_returns_started_services() {
    let temp_dir = TempDir::new().unwrap();
    let record = temp_dir.path().join("stopped.txt");
    let specs = vec![
        recording_service("first", free_port().await, &record),
        recording_service("second", free_port().await, &record),
    ];

    let launcher = Launcher::new(LaunchConfig {
        settle_window: Duration::from_millis(200),
        start_interval: Duration::from_secs(5),
        stop_timeout: Duration::from_secs(2),
        readiness: RetryPolicy::new(1, Duration::from_millis(50), Duration::from_millis(200)),
    });
    let (tx, mut shutdown) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(800)).await;
        let _ = tx.send(true);
    });

    let started = Instant::now();
    let mut handles = launcher.launch_all(&specs, &mut shutdown).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].name(), "first");

    // Graceful: the child handled SIGTERM instead of being killed on drop
    launcher.stop_all(&mut handles).await;
    assert_eq!(handles[0].signals_sent(), 1);
    assert_eq!(recorded_names(&record), vec!["first"]);
}

#[tokio::test]
async fn test_shutdown_during_readiness_hands_back_live_process() {
    let temp_dir = TempDir::new().unwrap();
    let record = temp_dir.path().join("stopped.txt");
    let port = free_port().await;
    let mut spec = (*recording_service("silent", port, &record)).clone();
    spec.wait_ready = true;
    let specs = vec![Arc::new(spec)];

    let launcher = Launcher::new(LaunchConfig {
        settle_window: Duration::from_millis(100),
        start_interval: Duration::from_millis(50),
        stop_timeout: Duration::from_secs(2),
        readiness: RetryPolicy::new(100, Duration::from_millis(200), Duration::from_millis(200)),
    });
    let (tx, mut shutdown) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(600)).await;
        let _ = tx.send(true);
    });

    let started = Instant::now();
    let mut handles = launcher.launch_all(&specs, &mut shutdown).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(handles.len(), 1);
    assert!(!handles[0].has_exited());

    launcher.stop_all(&mut handles).await;
    assert_eq!(recorded_names(&record), vec!["silent"]);
}
