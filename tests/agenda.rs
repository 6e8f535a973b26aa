// Copyright 2025 Chisomo Makombo Sakala
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde_json::Value;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use sweeplab::error::ConfigError;
use sweeplab::jobspec::JobSpec;
use sweeplab::manager::ConfigManager;
use sweeplab::plugins::DescribedTarget;
use sweeplab::plugins::PluginRegistry;
use sweeplab::settings::Settings;
use tempfile::TempDir;
use tempfile::tempdir;

const MANIFEST: &str = "tests/fixtures/plugins.toml";

fn registry() -> Arc<PluginRegistry> {
  let mut registry = PluginRegistry::new();
  registry.load(Path::new(MANIFEST)).unwrap();
  Arc::new(registry)
}

fn manager(registry: &Arc<PluginRegistry>) -> ConfigManager {
  ConfigManager::new(Settings::default(), registry.clone())
}

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
  let path = dir.path().join(name);
  fs::write(&path, content).unwrap();
  path
}

/// Loads `agenda` (YAML text) and resolves its job specs.
fn specs_for(agenda: &str) -> Result<Vec<JobSpec>, ConfigError> {
  let dir = tempdir().unwrap();
  let path = write(&dir, "agenda.yaml", agenda);
  let registry = registry();
  let mut state = manager(&registry);
  state.load_agenda_file(&path)?;
  state.finalize()?;
  let target = DescribedTarget::from_registry(&registry, state.run_config.device())?;
  state.job_specs(&target)
}

fn ids(specs: &[JobSpec]) -> Vec<&str> {
  specs.iter().map(|s| s.id.as_str()).collect()
}

#[test]
fn test_duplicate_workload_ids() {
  let err = specs_for(
    r#"
workloads:
  - id: 1
    name: dhrystone
  - id: "1"
    name: idle
"#,
  )
  .unwrap_err();
  assert!(matches!(err.root(), ConfigError::DuplicateId { kind: "workload", .. }));
  assert!(err.to_string().contains("Duplicate workload ID \"1\"."));
}

#[test]
fn test_duplicate_section_ids() {
  let err = specs_for(
    r#"
sections:
  - id: s1
    workloads: [idle]
  - id: s1
    workloads: [idle]
"#,
  )
  .unwrap_err();
  assert!(matches!(err.root(), ConfigError::DuplicateId { kind: "section", .. }));
}

#[test]
fn test_missing_workload_name() {
  let err = specs_for(
    r#"
workloads:
  - id: wk1
    iterations: 2
"#,
  )
  .unwrap_err();
  assert!(err.to_string().contains("No workload name specified in entry wk1"));
}

#[test]
fn test_bad_syntax_names_file() {
  let err = specs_for("workloads: [idle\n").unwrap_err();
  assert!(matches!(err, ConfigError::Syntax { what: "Agenda", .. }));
}

#[test]
fn test_no_workloads() {
  let err = specs_for("config:\n  iterations: 2\n").unwrap_err();
  assert!(err.to_string().contains("No jobs available"));
}

#[test]
fn test_invalid_top_level_entry() {
  let err = specs_for("workloads: [idle]\nworkload: [idle]\n").unwrap_err();
  assert!(err.to_string().contains("Invalid top level agenda entry(ies): \"workload\""));
}

#[test]
fn test_shorthand_and_default_ids() {
  let specs = specs_for(
    r#"
workloads:
  - id: wk1
    name: dhrystone
  - antutu
  - vellamo
"#,
  )
  .unwrap();
  assert_eq!(ids(&specs), vec!["wk1", "wk2", "wk3"]);
  assert_eq!(specs[1].workload_name, "antutu");
  assert_eq!(specs[1].label, "antutu");
  assert_eq!(specs[1].workload_parameters["markers_enabled"], json!(false));
  assert_eq!(specs[2].workload_name, "vellamo");
}

#[test]
fn test_section_groups_become_classifiers() {
  let specs = specs_for(
    r#"
workloads: [idle]
sections:
  - id: little
    group: cluster
    runtime_params:
      freq: 500
  - id: big
    group: cluster
    params:
      freq: 1500
  - id: cold
    group: thermal
  - id: hot
    group: thermal
"#,
  )
  .unwrap();
  assert_eq!(
    ids(&specs),
    vec!["little-cold-wk1", "little-hot-wk1", "big-cold-wk1", "big-hot-wk1"]
  );
  assert_eq!(
    Value::Object(specs[3].classifiers.clone()),
    json!({"cluster": "big", "thermal": "hot"})
  );
  assert_eq!(specs[0].runtime_parameters["freq"], json!(500));
  assert_eq!(specs[3].runtime_parameters["freq"], json!(1500));
  assert_eq!(specs[3].section_id(), "big-hot");
  assert_eq!(specs[3].workload_id(), "wk1");
}

#[test]
fn test_section_params_and_runtime_params_clash() {
  let err = specs_for(
    r#"
workloads: [idle]
sections:
  - id: s1
    params: {freq: 1}
    runtime_params: {freq: 2}
"#,
  )
  .unwrap_err();
  assert!(err.to_string().contains("both \"params\" and \"runtime_params\""));
}

#[test]
fn test_unknown_runtime_parameter_rejected_by_target() {
  let err = specs_for(
    r#"
workloads:
  - name: idle
    runtime_params: {governor: performance}
"#,
  )
  .unwrap_err();
  assert!(err.to_string().contains("'governor' is not a valid parameter for 'generic'"));
}

#[test]
fn test_yaml_anchors_and_merge_keys() {
  let specs = specs_for(
    r#"
workloads:
  - &base
    id: wk1
    name: dhrystone
    params:
      threads: 2
      mloops: 10
  - <<: *base
    id: wk2
    label: other
"#,
  )
  .unwrap();
  assert_eq!(ids(&specs), vec!["wk1", "wk2"]);
  assert_eq!(specs[1].workload_name, "dhrystone");
  assert_eq!(specs[1].label, "other");
  assert_eq!(specs[1].workload_parameters["mloops"], json!(10));
}

#[test]
fn test_includes_are_merged_and_reported() {
  let registry = registry();
  let mut state = manager(&registry);
  let includes = state
    .load_agenda_file(Path::new("tests/fixtures/includes/agenda.yaml"))
    .unwrap();
  let names: Vec<String> = includes
    .iter()
    .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
    .collect();
  assert_eq!(names.len(), 5);
  for expected in ["test.yaml", "section1.yaml", "section2.yaml", "section-include.yaml", "workloads.yaml"] {
    assert!(names.iter().any(|n| n == expected), "missing {}", expected);
  }

  state.finalize().unwrap();
  let target = DescribedTarget::from_registry(&registry, "generic").unwrap();
  let specs = state.job_specs(&target).unwrap();
  assert_eq!(ids(&specs), vec!["s1-wk1", "s1-wk2", "s2-wk1", "s2-wk2"]);

  let classifiers: Vec<Value> = specs.iter().map(|s| Value::Object(s.classifiers.clone())).collect();
  assert_eq!(classifiers[0], json!({"section": "one"}));
  assert_eq!(classifiers[1], json!({"section": "one", "memcpy": true}));
  assert_eq!(classifiers[2], json!({"section": "two", "included": true}));
  assert_eq!(classifiers[3], json!({"section": "two", "included": true, "memcpy": true}));
  assert!(specs.iter().all(|s| s.iterations == 2));
  assert!(specs.iter().all(|s| s.augmentations.values() == vec!["trace"]));
}

#[test]
fn test_config_file_layers() {
  let dir = tempdir().unwrap();
  let base = write(
    &dir,
    "base.yaml",
    r#"
dhrystone_threads: 8
device_config:
  timeout: 60
dhrystone:
  delay: 3
"#,
  );
  let agenda = write(
    &dir,
    "agenda.yaml",
    r#"
config:
  dhrystone:
    delay: 5
workloads: [dhrystone]
"#,
  );
  let registry = registry();
  let mut state = manager(&registry);
  state.load_config_file(&base).unwrap();
  state.load_agenda_file(&agenda).unwrap();
  state.finalize().unwrap();
  assert_eq!(state.run_config.device_config["timeout"], json!(60));

  let target = DescribedTarget::from_registry(&registry, "generic").unwrap();
  let specs = state.job_specs(&target).unwrap();
  assert_eq!(specs[0].workload_parameters["threads"], json!(8));
  assert_eq!(specs[0].workload_parameters["delay"], json!(5));
}

#[test]
fn test_generic_after_specific_is_a_conflict() {
  let dir = tempdir().unwrap();
  let first = write(&dir, "first.yaml", "generic:\n  timeout: 10\n");
  let second = write(&dir, "second.yaml", "device_config:\n  timeout: 20\n");
  let registry = registry();
  let mut state = manager(&registry);
  state.load_config_file(&first).unwrap();
  state.load_config_file(&second).unwrap();
  let err = state.finalize().unwrap_err();
  assert!(matches!(err.root(), ConfigError::SpecificityConflict { .. }));
  assert!(err.to_string().contains("second.yaml"));
}

#[test]
fn test_run_name_only_in_agenda() {
  let dir = tempdir().unwrap();
  let config = write(&dir, "config.yaml", "run_name: nope\n");
  let registry = registry();
  let mut state = manager(&registry);
  let err = state.load_config_file(&config).unwrap_err();
  assert!(err.to_string().contains("\"run_name\" can only be specified in the config section of an agenda"));
}
