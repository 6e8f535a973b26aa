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

//! Bags of configuration points and the two fixed point tables: the run
//! configuration and the per-job-spec configuration.

use crate::error::ConfigError;
use crate::permute::ExecutionOrder;
use crate::plugin_cache::PluginCache;
use crate::point::ConfigurationPoint;
use crate::point::PointMap;
use crate::value::Kind;
use crate::value::ToggleSet;
use crate::value::display_value;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use std::sync::LazyLock;

/// Values for a fixed table of points, keyed by canonical point name.
#[derive(Debug, Clone)]
pub struct Configuration<'p> {
  name: String,
  points: &'p PointMap,
  values: Map<String, Value>,
}

impl<'p> Configuration<'p> {
  /// A configuration holding every point's default.
  pub fn new(name: impl Into<String>, points: &'p PointMap) -> Self {
    let mut config = Self {
      name: name.into(),
      points,
      values: Map::new(),
    };
    for point in points.iter() {
      // Every table's defaults pass `ConfigurationPoint::checked`.
      let _ = point.set_value(&mut config.values, &config.name, None, false);
    }
    config
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn points(&self) -> &'p PointMap {
    self.points
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    let canonical = self.points.canonical(name).unwrap_or(name);
    self.values.get(canonical).filter(|v| !v.is_null())
  }

  pub fn values(&self) -> &Map<String, Value> {
    &self.values
  }

  pub fn set(&mut self, name: &str, value: &Value, check_mandatory: bool) -> Result<(), ConfigError> {
    let point = self.points.get(name).ok_or_else(|| ConfigError::UnknownConfiguration {
      owner: self.name.clone(),
      name: name.to_string(),
    })?;
    point
      .set_value(&mut self.values, &self.name, Some(value), check_mandatory)
      .map_err(|e| ConfigError::InvalidSetting {
        value: display_value(value),
        name: name.to_string(),
        inner: Box::new(e),
      })
  }

  pub fn update_config(&mut self, values: &Map<String, Value>, check_mandatory: bool) -> Result<(), ConfigError> {
    for (name, value) in values {
      self.set(name, value, check_mandatory)?;
    }
    Ok(())
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    for point in self.points.iter() {
      point.validate(&self.values, &self.name, true)?;
    }
    Ok(())
  }

  /// Every point, including unset ones as `null`, in table order.
  pub fn to_pod(&self) -> Map<String, Value> {
    self
      .points
      .iter()
      .map(|p| (p.name.clone(), self.values.get(&p.name).cloned().unwrap_or(Value::Null)))
      .collect()
  }

  pub fn from_pod(name: impl Into<String>, points: &'p PointMap, pod: &Map<String, Value>) -> Result<Self, ConfigError> {
    let mut config = Self::new(name, points);
    for (key, value) in pod {
      if !points.contains(key) {
        return Err(ConfigError::UnknownConfiguration {
          owner: config.name.clone(),
          name: key.clone(),
        });
      }
      if !value.is_null() {
        config.set(key, value, false)?;
      }
    }
    config.validate()?;
    Ok(config)
  }
}

pub const EXECUTION_ORDERS: [&str; 4] = ["by_iteration", "by_section", "by_workload", "random"];

pub const REBOOT_POLICIES: [&str; 6] = ["never", "as_needed", "initial", "each_spec", "each_job", "run_completion"];

/// Points settable per job spec at any tree level.
pub static JOB_SPEC_POINTS: LazyLock<PointMap> = LazyLock::new(|| {
  PointMap::new(vec![
    ConfigurationPoint::new("iterations")
      .kind(Kind::Integer)
      .default(json!(1))
      .description("How many times to repeat this workload spec"),
    ConfigurationPoint::new("workload_name")
      .mandatory()
      .aliases(["name"])
      .description("The name of the workload to run"),
    ConfigurationPoint::new("workload_parameters")
      .kind(Kind::Dict)
      .merge()
      .aliases(["params", "workload_params", "parameters"])
      .description("Parameter to be passed to the workload"),
    ConfigurationPoint::new("runtime_parameters")
      .kind(Kind::Dict)
      .merge()
      .aliases(["runtime_params"])
      .description("Runtime parameters to be set prior to running the workload"),
    ConfigurationPoint::new("boot_parameters")
      .kind(Kind::Dict)
      .aliases(["boot_params"])
      .description("Parameters to be used when rebooting the target prior to running the workload"),
    ConfigurationPoint::new("label").description("Similar to IDs but do not have the uniqueness restriction"),
    ConfigurationPoint::new("augmentations")
      .kind(Kind::ToggleSet)
      .merge()
      .aliases([
        "instruments",
        "processors",
        "instrumentation",
        "output_processors",
        "augment",
        "result_processors",
      ])
      .description("Instruments and output processors to enable, or (prefixed with ~) disable"),
    ConfigurationPoint::new("flash")
      .kind(Kind::Dict)
      .merge()
      .description("Images to be flashed onto the device prior to the job"),
    ConfigurationPoint::new("classifiers")
      .kind(Kind::Dict)
      .merge()
      .description("Classifiers attached to every result of this job"),
  ])
});

/// Points of the run-wide configuration.
pub static RUN_CONFIG_POINTS: LazyLock<PointMap> = LazyLock::new(|| {
  PointMap::new(vec![
    ConfigurationPoint::new("run_name").description("A string that labels the run"),
    ConfigurationPoint::new("project").description("A string naming the project the run belongs to"),
    ConfigurationPoint::new("project_stage")
      .kind(Kind::Dict)
      .description("Which stage of the project this run represents"),
    ConfigurationPoint::new("execution_order")
      .allowed_values(EXECUTION_ORDERS)
      .default(json!("by_iteration"))
      .description("The order in which workload specs are executed"),
    ConfigurationPoint::new("reboot_policy")
      .allowed_values(REBOOT_POLICIES)
      .default(json!("as_needed"))
      .description("When the device is rebooted during the run"),
    ConfigurationPoint::new("device")
      .default(json!("generic"))
      .description("The target device the run executes on"),
    ConfigurationPoint::new("retry_on_status")
      .kind(Kind::ListOfStrings)
      .allowed_values(["OK", "PARTIAL", "FAILED", "ABORTED", "SKIPPED"])
      .default(json!(["FAILED", "PARTIAL"]))
      .description("Job statuses that trigger a retry"),
    ConfigurationPoint::new("max_retries")
      .kind(Kind::Integer)
      .default(json!(2))
      .description("Maximum number of retries per failing job"),
    ConfigurationPoint::new("bail_on_init_failure")
      .kind(Kind::Boolean)
      .default(json!(true))
      .description("Abort the run when initialisation fails"),
    ConfigurationPoint::new("bail_on_job_failure")
      .kind(Kind::Boolean)
      .default(json!(false))
      .description("Abort the run when a job fails"),
    ConfigurationPoint::new("allow_phone_home")
      .kind(Kind::Boolean)
      .default(json!(true))
      .description("Permit workloads that contact external services"),
  ])
});

/// Run-wide settings plus the device configuration and the augmentations
/// enabled by the generated jobs.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
  config: Configuration<'static>,
  pub device_config: Map<String, Value>,
  pub augmentations: ToggleSet,
}

impl Default for RunConfiguration {
  fn default() -> Self {
    Self::new()
  }
}

impl RunConfiguration {
  pub fn new() -> Self {
    Self {
      config: Configuration::new("run", &RUN_CONFIG_POINTS),
      device_config: Map::new(),
      augmentations: ToggleSet::new(),
    }
  }

  pub fn points() -> &'static PointMap {
    &RUN_CONFIG_POINTS
  }

  pub fn set(&mut self, name: &str, value: &Value) -> Result<(), ConfigError> {
    self.config.set(name, value, false)
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.config.get(name)
  }

  pub fn device(&self) -> &str {
    self.get("device").and_then(Value::as_str).unwrap_or("generic")
  }

  pub fn execution_order(&self) -> Result<ExecutionOrder, ConfigError> {
    self
      .get("execution_order")
      .and_then(Value::as_str)
      .unwrap_or("by_iteration")
      .parse()
  }

  /// Resolves `device_config` for the configured device, generic values
  /// first and device-specific values winning per source.
  pub fn merge_device_config(&mut self, cache: &PluginCache) -> Result<(), ConfigError> {
    let device = self.device().to_string();
    if !cache.resolver().has_plugin(&device) {
      return Err(ConfigError::Invalid(format!("Device \"{}\" does not exist", device)));
    }
    self.device_config = cache.get_plugin_config(&device, Some("device_config"), true)?;
    Ok(())
  }

  pub fn to_pod(&self) -> Map<String, Value> {
    let mut pod = self.config.to_pod();
    pod.insert("device_config".to_string(), Value::Object(self.device_config.clone()));
    pod.insert("augmentations".to_string(), self.augmentations.to_value());
    pod
  }
}
