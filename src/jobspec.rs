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

//! Fully resolved job specifications and the builder that produces them from
//! a chain of fragments.

use crate::configuration::Configuration;
use crate::configuration::JOB_SPEC_POINTS;
use crate::error::ConfigError;
use crate::error::SourceContext;
use crate::error::SweeplabError;
use crate::plugin_cache::PluginCache;
use crate::plugins::TargetManager;
use crate::tree::Fragment;
use crate::tree::FragmentKind;
use crate::tree::GLOBAL_ID;
use crate::value::ToggleSet;
use crate::value::display_value;
use crate::value::overlay;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Joins section and workload ids into a job id.
pub const ID_SEPARATOR: char = '-';

/// One executable unit of work. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
  pub id: String,
  pub iterations: u32,
  pub workload_name: String,
  pub workload_parameters: Map<String, Value>,
  pub runtime_parameters: Map<String, Value>,
  pub boot_parameters: Map<String, Value>,
  pub label: String,
  pub augmentations: ToggleSet,
  pub flash: Map<String, Value>,
  pub classifiers: Map<String, Value>,
}

impl JobSpec {
  /// Everything before the last separator, or `global` for jobs declared
  /// outside any section.
  pub fn section_id(&self) -> &str {
    self
      .id
      .rsplit_once(ID_SEPARATOR)
      .map(|(section, _)| section)
      .unwrap_or(GLOBAL_ID)
  }

  pub fn workload_id(&self) -> &str {
    self
      .id
      .rsplit_once(ID_SEPARATOR)
      .map(|(_, workload)| workload)
      .unwrap_or(&self.id)
  }

  pub fn to_pod(&self) -> Result<Map<String, Value>, SweeplabError> {
    match serde_json::to_value(self)? {
      Value::Object(pod) => Ok(pod),
      other => Err(
        ConfigError::Invalid(format!(
          "Job spec \"{}\" did not serialize to a mapping: {}",
          self.id, other
        ))
        .into(),
      ),
    }
  }

  /// Restores a spec from [`JobSpec::to_pod`] output, re-validating every
  /// field. Unknown keys are rejected.
  pub fn from_pod(pod: &Map<String, Value>) -> Result<Self, ConfigError> {
    let mut fields = pod.clone();
    if fields.shift_remove("id").is_none() {
      return Err(ConfigError::Invalid("Job spec pod has no \"id\"".to_string()));
    }
    Configuration::from_pod("job spec", &JOB_SPEC_POINTS, &fields)?;
    serde_json::from_value(Value::Object(pod.clone()))
      .map_err(|e| ConfigError::Invalid(format!("Malformed job spec pod: {}", e)))
  }
}

/// Accumulates fragments into one job spec.
///
/// Plain points are set as fragments arrive; `*_parameters` values are held
/// back per fragment and merged once the workload (and hence its parameter
/// table) is known.
pub struct JobSpecBuilder {
  config: Configuration<'static>,
  sources: Vec<Fragment>,
  workload_parameters: Vec<(String, Map<String, Value>)>,
  runtime_parameters: Vec<(String, Map<String, Value>)>,
  boot_parameters: Vec<(String, Map<String, Value>)>,
}

impl Default for JobSpecBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl JobSpecBuilder {
  pub fn new() -> Self {
    Self {
      config: Configuration::new("job spec", &JOB_SPEC_POINTS),
      sources: Vec::new(),
      workload_parameters: Vec::new(),
      runtime_parameters: Vec::new(),
      boot_parameters: Vec::new(),
    }
  }

  pub fn update_config(&mut self, fragment: &Fragment) -> Result<(), ConfigError> {
    let source = fragment.name();
    for (key, value) in &fragment.config {
      if key == "id" || value.is_null() {
        continue;
      }
      if key.ends_with("_parameters") {
        let Some(values) = value.as_object().filter(|m| !m.is_empty()) else {
          continue;
        };
        let pending = match key.as_str() {
          "workload_parameters" => &mut self.workload_parameters,
          "runtime_parameters" => &mut self.runtime_parameters,
          "boot_parameters" => &mut self.boot_parameters,
          _ => {
            return Err(
              ConfigError::UnknownConfiguration {
                owner: "job spec".to_string(),
                name: key.clone(),
              }
              .in_source(source),
            );
          }
        };
        pending.push((source.clone(), values.clone()));
      } else {
        self.config.set(key, value, false).in_source(&source)?;
      }
    }
    self.sources.push(fragment.clone());
    Ok(())
  }

  /// Tags the job with the section it took from `group`.
  pub fn add_classifier(&mut self, group: &str, section_id: &str) -> Result<(), ConfigError> {
    let mut classifier = Map::new();
    classifier.insert(group.to_string(), Value::String(section_id.to_string()));
    self.config.set("classifiers", &Value::Object(classifier), false)
  }

  fn workload_name(&self) -> Result<String, ConfigError> {
    self
      .config
      .get("workload_name")
      .map(display_value)
      .ok_or_else(|| ConfigError::MissingMandatory {
        param: "workload_name".to_string(),
        owner: "job spec".to_string(),
      })
  }

  /// Cache values (generic then specific) first, then each fragment's own
  /// parameters in chain order. Mandatory parameters are checked last.
  pub fn merge_workload_parameters(&self, cache: &PluginCache) -> Result<Map<String, Value>, ConfigError> {
    let name = self.workload_name()?;
    let mut params = cache.get_plugin_config(&name, Some("workload_parameters"), false)?;
    let points = cache.resolver().plugin_parameters(&name)?;
    for (source, values) in &self.workload_parameters {
      let mut leftover = Map::new();
      for (param, value) in values {
        match points.get(param) {
          Some(point) => point.set_value(&mut params, &name, Some(value), false).in_source(source)?,
          None => {
            leftover.insert(param.clone(), value.clone());
          }
        }
      }
      if !leftover.is_empty() {
        return Err(
          ConfigError::Invalid(format!(
            "Unexpected config \"{}\" for \"{}\"",
            Value::Object(leftover),
            name
          ))
          .in_source(source),
        );
      }
    }
    for point in points.iter() {
      point.validate(&params, &name, true)?;
    }
    Ok(params)
  }

  /// Globally cached runtime parameters first, then each fragment's, merged
  /// and validated by the target.
  pub fn merge_runtime_parameters(&self, cache: &PluginCache, target: &dyn TargetManager) -> Result<Map<String, Value>, ConfigError> {
    let mut sources = cache.raw_configs("runtime_parameters");
    sources.extend(self.runtime_parameters.iter().cloned());
    let merged = target.merge_runtime_parameters(&sources)?;
    target.validate_runtime_parameters(&merged)?;
    Ok(merged)
  }

  pub fn merge_boot_parameters(&self, cache: &PluginCache) -> Map<String, Value> {
    let mut merged = Map::new();
    for (_, values) in cache.raw_configs("boot_parameters").iter().chain(&self.boot_parameters) {
      overlay(&mut merged, values);
    }
    merged
  }

  pub fn build(
    mut self,
    cache: &PluginCache,
    target: &dyn TargetManager,
    disabled_augmentations: &ToggleSet,
  ) -> Result<JobSpec, ConfigError> {
    let workload_parameters = self.merge_workload_parameters(cache)?;
    let runtime_parameters = self.merge_runtime_parameters(cache, target)?;
    let boot_parameters = self.merge_boot_parameters(cache);
    self
      .config
      .set("augmentations", &disabled_augmentations.to_value(), false)?;

    let id = self
      .sources
      .iter()
      .skip(1)
      .map(|s| s.id.as_str())
      .collect::<Vec<_>>()
      .join(&ID_SEPARATOR.to_string());
    let workload_name = self.workload_name()?;
    let iterations = self
      .config
      .get("iterations")
      .and_then(Value::as_i64)
      .unwrap_or(1);
    let iterations = u32::try_from(iterations).map_err(|_| ConfigError::BadValue {
      value: iterations.to_string(),
      param: "iterations".to_string(),
      expected: "a non-negative integer".to_string(),
    })?;
    let object = |name: &str| -> Map<String, Value> {
      self
        .config
        .get(name)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
    };

    let spec = JobSpec {
      label: self
        .config
        .get("label")
        .map(display_value)
        .unwrap_or_else(|| workload_name.clone()),
      augmentations: self
        .config
        .get("augmentations")
        .and_then(ToggleSet::from_value)
        .unwrap_or_default(),
      flash: object("flash"),
      classifiers: object("classifiers"),
      id,
      iterations,
      workload_name,
      workload_parameters,
      runtime_parameters,
      boot_parameters,
    };
    tracing::debug!(id = %spec.id, workload = %spec.workload_name, "Created job spec");
    Ok(spec)
  }
}

/// Applies `fragments` (sections root first, then the workload entry) and
/// resolves the resulting job spec.
pub fn create_job_spec(
  fragments: &[Fragment],
  cache: &PluginCache,
  target: &dyn TargetManager,
  disabled_augmentations: &ToggleSet,
) -> Result<JobSpec, ConfigError> {
  let mut builder = JobSpecBuilder::new();
  for fragment in fragments {
    builder.update_config(fragment)?;
    if fragment.kind != FragmentKind::Section {
      continue;
    }
    if let Some(group) = &fragment.group {
      builder.add_classifier(group, &fragment.id)?;
    }
  }
  builder.build(cache, target, disabled_augmentations)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::plugins::PassthroughTarget;
  use crate::plugins::PluginRegistry;
  use serde_json::json;
  use std::sync::Arc;

  const MANIFEST: &str = r#"
[[plugin]]
name = "dhrystone"
kind = "workload"

[[plugin.parameter]]
name = "threads"
kind = "integer"
default = 1

[[plugin.parameter]]
name = "mloops"
kind = "integer"

[[plugin]]
name = "trace"
kind = "instrument"
"#;

  fn cache() -> PluginCache {
    PluginCache::new(Arc::new(PluginRegistry::from_toml_str(MANIFEST).unwrap()))
  }

  fn fragment(id: &str, kind: FragmentKind, group: Option<&str>, config: Value) -> Fragment {
    Fragment {
      id: id.to_string(),
      kind,
      group: group.map(str::to_string),
      config: config.as_object().cloned().unwrap(),
      sweeps: Vec::new(),
    }
  }

  fn chain() -> Vec<Fragment> {
    vec![
      fragment("global", FragmentKind::Global, None, json!({"iterations": 2})),
      fragment(
        "s1",
        FragmentKind::Section,
        Some("speed"),
        json!({"workload_parameters": {"threads": 2}, "runtime_parameters": {"governor": "performance"}, "augmentations": ["trace"]}),
      ),
      fragment(
        "wk1",
        FragmentKind::Workload,
        None,
        json!({"workload_name": "dhrystone", "workload_parameters": {"mloops": 10}, "boot_parameters": {"quiet": true}}),
      ),
    ]
  }

  #[test]
  fn test_job_spec_from_chain() {
    let spec = create_job_spec(&chain(), &cache(), &PassthroughTarget::new(), &ToggleSet::new()).unwrap();
    assert_eq!(spec.id, "s1-wk1");
    assert_eq!(spec.section_id(), "s1");
    assert_eq!(spec.workload_id(), "wk1");
    assert_eq!(spec.iterations, 2);
    assert_eq!(spec.label, "dhrystone");
    assert_eq!(Value::Object(spec.workload_parameters.clone()), json!({"threads": 2, "mloops": 10}));
    assert_eq!(spec.runtime_parameters["governor"], json!("performance"));
    assert_eq!(spec.boot_parameters["quiet"], json!(true));
    assert_eq!(spec.classifiers["speed"], json!("s1"));
    assert_eq!(spec.augmentations.values(), vec!["trace"]);
  }

  #[test]
  fn test_disabled_augmentations_applied_last() {
    let disabled = ToggleSet::from_entries(["~trace"]);
    let spec = create_job_spec(&chain(), &cache(), &PassthroughTarget::new(), &disabled).unwrap();
    assert!(spec.augmentations.values().is_empty());
  }

  #[test]
  fn test_unknown_workload_parameter_names_source() {
    let mut fragments = chain();
    fragments[2].config.insert("workload_parameters".into(), json!({"speed": 11}));
    let err = create_job_spec(&fragments, &cache(), &PassthroughTarget::new(), &ToggleSet::new()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.starts_with("Error in \"workload wk1\""));
    assert!(msg.contains("Unexpected config"));
  }

  #[test]
  fn test_unsectioned_ids() {
    let fragments = vec![
      fragment("global", FragmentKind::Global, None, json!({})),
      fragment("wk3", FragmentKind::Workload, None, json!({"workload_name": "dhrystone", "label": "fast"})),
    ];
    let spec = create_job_spec(&fragments, &cache(), &PassthroughTarget::new(), &ToggleSet::new()).unwrap();
    assert_eq!(spec.id, "wk3");
    assert_eq!(spec.section_id(), "global");
    assert_eq!(spec.workload_id(), "wk3");
    assert_eq!(spec.label, "fast");
    assert_eq!(spec.iterations, 1);
  }

  #[test]
  fn test_pod_round_trip() {
    let spec = create_job_spec(&chain(), &cache(), &PassthroughTarget::new(), &ToggleSet::new()).unwrap();
    let pod = spec.to_pod().unwrap();
    assert_eq!(pod["augmentations"], json!(["trace"]));
    assert_eq!(JobSpec::from_pod(&pod).unwrap(), spec);

    let mut extra = pod.clone();
    extra.insert("colour".to_string(), json!("red"));
    assert!(JobSpec::from_pod(&extra).is_err());
  }
}
