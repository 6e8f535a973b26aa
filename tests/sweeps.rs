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
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use sweeplab::error::ConfigError;
use sweeplab::jobspec::JobSpec;
use sweeplab::manager::ConfigManager;
use sweeplab::plugins::DescribedTarget;
use sweeplab::plugins::PassthroughTarget;
use sweeplab::plugins::PluginRegistry;
use sweeplab::plugins::TargetManager;
use sweeplab::settings::Settings;
use tempfile::tempdir;

fn registry() -> Arc<PluginRegistry> {
  let mut registry = PluginRegistry::new();
  registry.load(Path::new("tests/fixtures/plugins.toml")).unwrap();
  Arc::new(registry)
}

fn try_specs_with(agenda: &str, target: &dyn TargetManager) -> Result<Vec<JobSpec>, ConfigError> {
  let dir = tempdir().unwrap();
  let path = dir.path().join("agenda.yaml");
  fs::write(&path, agenda).unwrap();
  let mut state = ConfigManager::new(Settings::default(), registry());
  state.load_agenda_file(&path)?;
  state.job_specs(target)
}

fn specs(agenda: &str) -> Vec<JobSpec> {
  try_specs_with(agenda, &PassthroughTarget::new()).unwrap()
}

fn workload_values(specs: &[JobSpec], param: &str) -> Vec<Value> {
  specs.iter().map(|s| s.workload_parameters[param].clone()).collect()
}

fn sorted_durations(specs: &[JobSpec]) -> Vec<i64> {
  let mut durations: Vec<i64> = specs
    .iter()
    .map(|s| s.workload_parameters["duration"].as_i64().unwrap())
    .collect();
  durations.sort();
  durations
}

#[test]
fn test_global_workload_sweep() {
  let specs = specs(
    r#"
workloads:
  - name: dhrystone
    workload_params:
      sweep(range):
        threads: [1, 2, 3]
"#,
  );
  assert_eq!(workload_values(&specs, "threads"), vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn test_section_sweep() {
  let specs = specs(
    r#"
sections:
  - id: my_section
    workload_params:
      sweep(range):
        threads: [1, 2, 3]
workloads:
  - name: dhrystone
"#,
  );
  assert_eq!(workload_values(&specs, "threads"), vec![json!(1), json!(2), json!(3)]);
  let ids: Vec<&str> = specs.iter().map(|s| s.id.as_str()).collect();
  assert_eq!(ids, vec!["my_section_1-wk1", "my_section_2-wk1", "my_section_3-wk1"]);
}

#[test]
fn test_section_group_sweep() {
  let specs = specs(
    r#"
sections:
  - id: my_section1
    group: mygroup
    workload_params:
      sweep(range):
        threads: [1, 2, 3]
  - id: my_section2
    group: mygroup
    workload_params:
      threads: 8
  - id: my_section3
    group: othergroup
    runtime_parameters:
      freq: 10
workloads:
  - name: dhrystone
"#,
  );
  assert_eq!(
    workload_values(&specs, "threads"),
    vec![json!(1), json!(2), json!(3), json!(8)]
  );
  assert!(specs.iter().all(|s| s.runtime_parameters["freq"] == json!(10)));
  assert!(specs.iter().all(|s| s.classifiers["othergroup"] == json!("my_section3")));
}

#[test]
fn test_global_config_sweep() {
  let specs = specs(
    r#"
config:
  workload_parameters:
    sweep(range):
      duration: [1, 2, 3, 4, 5]
workloads:
  - name: idle
"#,
  );
  assert_eq!(
    workload_values(&specs, "duration"),
    vec![json!(1), json!(2), json!(3), json!(4), json!(5)]
  );
  let ids: Vec<&str> = specs.iter().map(|s| s.id.as_str()).collect();
  assert_eq!(ids, vec!["wk1_1", "wk1_2", "wk1_3", "wk1_4", "wk1_5"]);
}

#[test]
fn test_global_config_sweep_numbers_sections() {
  let specs = specs(
    r#"
config:
  workload_parameters:
    sweep(range):
      duration: [1, 2]
sections:
  - id: s1
  - id: s2
workloads:
  - name: idle
"#,
  );
  let ids: Vec<&str> = specs.iter().map(|s| s.id.as_str()).collect();
  assert_eq!(ids, vec!["s1_1-wk1", "s1_2-wk1", "s2_1-wk1", "s2_2-wk1"]);
  assert_eq!(
    workload_values(&specs, "duration"),
    vec![json!(1), json!(2), json!(1), json!(2)]
  );
}

#[test]
fn test_workload_overrides_section_sweep() {
  let specs = specs(
    r#"
sections:
  - id: mysection
    group: a
    workload_parameters:
      sweep(range):
        duration: [1, 2, 3]
workloads:
  - name: idle
    workload_parameters:
      sweep(range):
        duration: [4, 5, 6]
  - name: idle
    workload_parameters:
      duration: 7
  - name: idle
"#,
  );
  assert_eq!(sorted_durations(&specs), vec![1, 2, 3, 4, 5, 6, 7]);
  let ids: Vec<&str> = specs.iter().map(|s| s.id.as_str()).collect();
  assert_eq!(
    ids,
    vec![
      "mysection-wk1_1",
      "mysection-wk1_2",
      "mysection-wk1_3",
      "mysection-wk2",
      "mysection_1-wk3",
      "mysection_2-wk3",
      "mysection_3-wk3",
    ]
  );
}

#[test]
fn test_section_sweep_overrides_config_sweep() {
  let specs = specs(
    r#"
config:
  workload_parameters:
    sweep(range):
      duration: [1, 2, 3]
sections:
  - id: mysection
    workload_parameters:
      sweep(range):
        duration: [4, 5, 6, 7]
workloads:
  - name: idle
"#,
  );
  assert_eq!(sorted_durations(&specs), vec![4, 5, 6, 7]);
}

#[test]
fn test_nested_workload_sweep_in_section() {
  let specs = specs(
    r#"
sections:
  - id: mysection
    workloads:
      - name: idle
        params:
          sweep(range):
            duration: [1, 2, 3]
workloads:
  - name: idle
    params:
      duration: 4
"#,
  );
  assert_eq!(sorted_durations(&specs), vec![1, 2, 3, 4]);
}

#[test]
fn test_nested_workload_sweep_overrides_section_value() {
  let specs = specs(
    r#"
sections:
  - id: mysection
    workload_parameters:
      duration: 100
    workloads:
      - name: idle
        params:
          sweep(range):
            duration: [1, 2, 3]
workloads:
  - name: idle
    params:
      duration: 20
"#,
  );
  assert_eq!(sorted_durations(&specs), vec![1, 2, 3, 20]);
}

#[test]
fn test_range_string_sweep() {
  let specs = specs(
    r#"
workloads:
  - name: idle
    params:
      sweep(range):
        duration: 1-10,2
"#,
  );
  assert_eq!(sorted_durations(&specs), vec![1, 3, 5, 7, 9]);
}

#[test]
fn test_swept_ids_share_prefixes_and_labels() {
  let specs = specs(
    r#"
sections:
  - id: mysection
    runtime_params:
      sweep(range):
        threads: 1-4
workloads:
  - name: idle
    params:
      sweep(range):
        duration: 1-5
"#,
  );
  assert_eq!(specs.len(), 12);
  for spec in &specs {
    let (section, workload) = spec.id.split_once('-').unwrap();
    assert!(section.starts_with("mysection_"), "{}", spec.id);
    assert!(workload.starts_with("wk1_"), "{}", spec.id);
    assert_eq!(spec.label, "idle");
  }
  assert_eq!(specs[0].id, "mysection_1-wk1_1");
  assert_eq!(specs[11].id, "mysection_3-wk1_4");
  let unique: BTreeSet<&str> = specs.iter().map(|s| s.id.as_str()).collect();
  assert_eq!(unique.len(), 12);
}

#[test]
fn test_labels_formatted_per_variant() {
  let specs = specs(
    r#"
workloads:
  - name: idle
    label: testlabel{duration}
    params:
      sweep(range):
        duration: 1-5
"#,
  );
  let labels: Vec<&str> = specs.iter().map(|s| s.label.as_str()).collect();
  assert_eq!(labels, vec!["testlabel1", "testlabel2", "testlabel3", "testlabel4"]);
  let ids: Vec<&str> = specs.iter().map(|s| s.id.as_str()).collect();
  assert_eq!(ids, vec!["wk1_1", "wk1_2", "wk1_3", "wk1_4"]);
}

#[test]
fn test_autoparam_sweep() {
  let specs = specs(
    r#"
workloads:
  - name: youtube
    params:
      sweep(autoparam):
        param: video_source
        plugin: youtube
"#,
  );
  let sources: BTreeSet<String> = specs
    .iter()
    .map(|s| s.workload_parameters["video_source"].as_str().unwrap().to_string())
    .collect();
  let expected: BTreeSet<String> = ["home", "popular", "search", "trending"]
    .into_iter()
    .map(String::from)
    .collect();
  assert_eq!(specs.len(), 4);
  assert_eq!(sources, expected);
}

#[test]
fn test_autofreq_sweep_against_described_target() {
  let target = DescribedTarget::from_registry(&registry(), "generic").unwrap();
  let specs = try_specs_with(
    r#"
workloads:
  - name: idle
    runtime_params:
      sweep(autofreq):
        param: cpu0_frequency
        cpu: cpu0
        max: 1500000
"#,
    &target,
  )
  .unwrap();
  let freqs: Vec<Value> = specs.iter().map(|s| s.runtime_parameters["cpu0_frequency"].clone()).collect();
  assert_eq!(freqs, vec![json!(500000), json!(1000000)]);
}

#[test]
fn test_autoparam_on_unknown_plugin() {
  let err = try_specs_with(
    r#"
workloads:
  - name: idle
    params:
      sweep(autoparam):
        param: duration
        plugin: nosuchplugin
"#,
    &PassthroughTarget::new(),
  )
  .unwrap_err();
  assert!(matches!(err.root(), ConfigError::UnknownPlugin { .. }));
}

#[test]
fn test_two_sweeps_over_one_parameter() {
  let err = try_specs_with(
    r#"
workloads:
  - name: idle
    params:
      sweep(range):
        duration: [1, 2]
    workload_params:
      sweep(range):
        duration: [3, 4]
"#,
    &PassthroughTarget::new(),
  )
  .unwrap_err();
  assert!(matches!(err.root(), ConfigError::ConflictingSweeps { .. }));
}
