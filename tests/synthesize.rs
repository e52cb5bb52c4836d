use std::fs;

use fnstack::config::Config;
use fnstack::orchestration::{plan, synthesize};
use fnstack::synth::{Manifest, OutputFormat};

const SAMPLE: &str = include_str!("../conf/fnstack.yaml");

fn load_sample() -> Config {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fnstack.yaml");
    fs::write(&path, SAMPLE).unwrap();
    Config::load_from_yaml(&path).unwrap()
}

#[test]
fn sample_config_loads() {
    let config = load_sample();
    assert_eq!(config.functions.len(), 11);
    assert_eq!(config.settings.num_partitions, 4);
    assert_eq!(config.settings.estimated_function_count, Some(55));
}

#[test]
fn capacity_hint_keeps_everything_in_first_unit() {
    let config = load_sample();
    let units = plan(&config).unwrap();

    let sizes: Vec<_> = units.iter().map(|u| u.functions.len()).collect();
    assert_eq!(sizes, vec![11, 0, 0, 0]);
    assert_eq!(units[0].unit_name, "AWSTkt-backend-dev-Functions-0");
}

#[test]
fn synthesize_sample_and_write_manifest() {
    let config = load_sample();
    let mut manifest = Manifest::new(&config.settings);
    let output = synthesize(&config, &mut manifest).unwrap();

    assert_eq!(output.registry.len(), 11);
    assert_eq!(output.routes.len(), 8);
    assert_eq!(manifest.units.len(), 1);
    assert_eq!(manifest.queue_sources.len(), 1);
    assert_eq!(manifest.notifications.len(), 1);
    assert_eq!(manifest.notifications[0].prefix, "curated_trigger_folder/*");
    assert!(output
        .registry
        .by_name("get_starred_trials")
        .is_some_and(|h| h.function_name == "AWSTkt-backend-dev-trials_starred"));

    let etl = manifest.function("AWSTkt-backend-dev-api_etl").unwrap();
    assert_eq!(etl.memory_mb, 2048);
    assert_eq!(etl.timeout_seconds, 900);
    assert_eq!(etl.code_entry_root, "backend/etl/runtime");
    assert_eq!(
        etl.role_arn.as_deref(),
        Some("arn:aws:iam::123456789012:role/AWSTkt-backend-dev-etl")
    );

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out").join("manifest.json");
    manifest.write_to(&out, OutputFormat::Json).unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(written["prefix"], "AWSTkt-backend-dev");
    assert_eq!(written["functions"].as_array().unwrap().len(), 11);
    assert_eq!(written["gateway"]["methods"].as_array().unwrap().len(), 8);
}

#[test]
fn overrides_change_names_and_layout() {
    let mut config = load_sample();
    config.settings.estimated_function_count = None;
    config.merge_with_overrides(Some("prod"), Some(4));

    let units = plan(&config).unwrap();
    let sizes: Vec<_> = units.iter().map(|u| u.functions.len()).collect();
    assert_eq!(sizes, vec![3, 3, 3, 2]);
    assert_eq!(
        units[0].functions[0].function_name,
        "AWSTkt-backend-prod-prior_therapy"
    );
}
