//! The shipped scenario files must load and validate.

use load_engine::{LoadTestConfig, StressTestConfig, TestConfiguration};
use std::path::PathBuf;

fn scenario_path(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(file)
}

#[test]
fn test_ramp_scenario() {
    let config = TestConfiguration::from_file(scenario_path("ramp.yaml")).unwrap();
    config.validate().unwrap();
    assert_eq!(config.target_rate, 50.0);
    assert_eq!(config.resolve_url("/health"), "http://localhost:8080/health");
}

#[test]
fn test_load_scenario() {
    let config = LoadTestConfig::from_file(scenario_path("load.yaml")).unwrap();
    config.validate().unwrap();
    let total: f64 = config.base.scenarios.iter().map(|s| s.weight).sum();
    assert_eq!(total, 100.0);
    assert_eq!(config.concurrent_users, 50);
}

#[test]
fn test_stress_scenario() {
    let config = StressTestConfig::from_file(scenario_path("stress.yaml")).unwrap();
    config.validate().unwrap();
    assert_eq!(config.base.max_in_flight, Some(2000));
    assert_eq!(config.step_config(3, 50.0).name, "api_stress step 3");
}

#[test]
fn test_missing_file_is_a_configuration_error() {
    let err = TestConfiguration::from_file(scenario_path("missing.yaml")).unwrap_err();
    assert!(err.is_configuration());
}
