// Integration test for pipeline configuration files

use stagehand::config::{BackoffKind, PipelineConfig};
use stagehand::health::Backoff;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_load_toml_pipeline() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pipeline.toml");

    let toml_content = r#"
        log_dir = "/tmp/stagehand-logs"

        [launcher]
        settle_ms = 250
        start_interval_secs = 2
        stop_timeout_secs = 8

        [health]
        attempts = 4
        retry_delay_secs = 1
        timeout_secs = 2

        [supervisor]
        poll_interval_secs = 3
        max_consecutive_restarts = 5

        [[services]]
        name = "Gerador de Dados"
        command = "/usr/local/bin/stagehand-stage"
        args = ["generate", "--port", "8001"]
        port = 8001

        [[services]]
        name = "Normalizador"
        command = "/usr/local/bin/stagehand-stage"
        args = ["normalize", "--port", "8002", "--upstream", "http://127.0.0.1:8001"]
        port = 8002
        max_retries = 1
        retry_delay_secs = 2
        wait_ready = false
    "#;

    fs::write(&config_path, toml_content).unwrap();

    let config = PipelineConfig::from_file(&config_path).unwrap();
    assert_eq!(config.log_dir, PathBuf::from("/tmp/stagehand-logs"));
    assert_eq!(config.services.len(), 2);

    assert_eq!(config.services[0].name, "Gerador de Dados");
    assert_eq!(config.services[0].port, 8001);
    // Per-service defaults
    assert_eq!(config.services[0].max_retries, 3);
    assert_eq!(config.services[0].retry_delay_secs, 10);
    assert_eq!(config.services[0].health_path, "/status");
    assert!(config.services[0].wait_ready);

    assert_eq!(config.services[1].max_retries, 1);
    assert_eq!(config.services[1].retry_delay_secs, 2);
    assert!(!config.services[1].wait_ready);

    let launch = config.launch_config();
    assert_eq!(launch.settle_window, Duration::from_millis(250));
    assert_eq!(launch.start_interval, Duration::from_secs(2));
    assert_eq!(launch.stop_timeout, Duration::from_secs(8));
    assert_eq!(launch.readiness.max_attempts, 4);

    let supervisor = config.supervisor_config();
    assert_eq!(supervisor.poll_interval, Duration::from_secs(3));
    assert_eq!(supervisor.restart.max_consecutive, Some(5));

    // Sections left out keep their defaults
    assert_eq!(config.dashboard.refresh_ms, 1000);
    assert_eq!(config.dashboard.max_metrics, 22);
}

#[test]
fn test_load_json_pipeline() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pipeline.json");

    let json_content = r#"{
        "health": { "attempts": 2, "backoff": "exponential", "max_delay_secs": 30 },
        "services": [
            {
                "name": "api",
                "command": "/bin/sleep",
                "args": ["60"],
                "port": 9100,
                "health_path": "/health",
                "env": { "MODE": "test" }
            }
        ]
    }"#;

    fs::write(&config_path, json_content).unwrap();

    let config = PipelineConfig::from_file(&config_path).unwrap();
    assert_eq!(config.health.backoff, BackoffKind::Exponential);

    let policy = config.retry_policy();
    assert_eq!(policy.max_attempts, 2);
    assert_eq!(
        policy.backoff,
        Backoff::Exponential {
            max_delay: Duration::from_secs(30)
        }
    );

    let specs = config.specs();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].status_url(), "http://127.0.0.1:9100/health");
    assert_eq!(specs[0].env.get("MODE"), Some(&"test".to_string()));
}

#[test]
fn test_env_vars_expanded_in_service_fields() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pipeline.toml");
    std::env::set_var("STAGEHAND_TEST_STAGE_BIN", "/opt/stages/bin");

    let toml_content = r#"
        [[services]]
        name = "gen"
        command = "${STAGEHAND_TEST_STAGE_BIN}/stagehand-stage"
        args = ["generate", "--model-dir", "$STAGEHAND_TEST_STAGE_BIN/models", "$STAGEHAND_TEST_UNSET_VAR"]
        port = 9200
    "#;
    fs::write(&config_path, toml_content).unwrap();

    let config = PipelineConfig::from_file(&config_path).unwrap();
    let service = &config.services[0];
    assert_eq!(
        service.command,
        PathBuf::from("/opt/stages/bin/stagehand-stage")
    );
    assert_eq!(service.args[2], "/opt/stages/bin/models");
    // Unknown variables are left as written
    assert_eq!(service.args[3], "$STAGEHAND_TEST_UNSET_VAR");
}

#[test]
fn test_unsupported_format() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pipeline.yaml");
    fs::write(&config_path, "services: []").unwrap();

    let err = PipelineConfig::from_file(&config_path).unwrap_err();
    assert!(err.to_string().contains("Unsupported file format"));
}

#[test]
fn test_missing_file() {
    let err = PipelineConfig::from_file(&PathBuf::from("/nonexistent/pipeline.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_duplicate_ports_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pipeline.toml");

    let toml_content = r#"
        [[services]]
        name = "a"
        command = "/bin/sleep"
        port = 9300

        [[services]]
        name = "b"
        command = "/bin/sleep"
        port = 9300
    "#;
    fs::write(&config_path, toml_content).unwrap();

    let err = PipelineConfig::from_file(&config_path).unwrap_err();
    assert!(err.to_string().contains("Port 9300"));
}

#[test]
fn test_empty_service_list_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pipeline.json");
    fs::write(&config_path, r#"{ "services": [] }"#).unwrap();

    assert!(PipelineConfig::from_file(&config_path).is_err());
}

#[test]
fn test_load_with_explicit_path() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pipeline.toml");
    fs::write(
        &config_path,
        r#"
        [[services]]
        name = "only"
        command = "/bin/sleep"
        port = 9400
        "#,
    )
    .unwrap();

    let config = PipelineConfig::load(Some(&config_path)).unwrap();
    assert_eq!(config.services.len(), 1);
    assert_eq!(config.services[0].name, "only");
}

#[test]
fn test_default_pipeline_written_and_reloaded() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pipeline.toml");

    let config = PipelineConfig::default();
    fs::write(&config_path, config.to_toml().unwrap()).unwrap();

    let reloaded = PipelineConfig::from_file(&config_path).unwrap();
    assert_eq!(reloaded, config);

    let names: Vec<_> = reloaded.services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        ["Gerador de Dados", "Normalizador", "Treinador", "Consumidor"]
    );
}
