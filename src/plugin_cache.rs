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

//! Per-source plugin configuration and the two ways of merging it.
//!
//! Every config file (and every fragment of an agenda's `config` block) is
//! registered as a source. Plugin blocks found in them are recorded under the
//! plugin name, or under a generic name such as `device_config` that applies
//! to whichever plugin fills that role. Sources registered later win.

use crate::error::ConfigError;
use crate::error::SourceContext;
use crate::plugins::PluginResolver;
use crate::point::PointMap;
use crate::value::display_value;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Config names that address a role rather than a specific plugin.
pub const GENERIC_CONFIGS: [&str; 4] = [
  "device_config",
  "workload_parameters",
  "boot_parameters",
  "runtime_parameters",
];

pub fn is_generic(name: &str) -> bool {
  GENERIC_CONFIGS.contains(&name)
}

#[derive(Clone)]
pub struct PluginCache {
  resolver: Arc<dyn PluginResolver>,
  sources: Vec<String>,
  plugin_configs: HashMap<String, HashMap<String, Map<String, Value>>>,
  global_alias_values: HashMap<String, HashMap<String, Value>>,
}

impl std::fmt::Debug for PluginCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PluginCache")
      .field("sources", &self.sources)
      .field("plugin_configs", &self.plugin_configs)
      .finish_non_exhaustive()
  }
}

impl PluginCache {
  pub fn new(resolver: Arc<dyn PluginResolver>) -> Self {
    Self {
      resolver,
      sources: Vec::new(),
      plugin_configs: HashMap::new(),
      global_alias_values: HashMap::new(),
    }
  }

  pub fn resolver(&self) -> &dyn PluginResolver {
    self.resolver.as_ref()
  }

  pub fn sources(&self) -> &[String] {
    &self.sources
  }

  pub fn add_source(&mut self, source: &str) -> Result<(), ConfigError> {
    if self.sources.iter().any(|s| s == source) {
      return Err(ConfigError::Invalid(format!("Source \"{}\" has already been added.", source)));
    }
    tracing::debug!(%source, "Registering config source");
    self.sources.push(source.to_string());
    Ok(())
  }

  /// Records `values` for `plugin_name` as supplied by `source`.
  pub fn add_configs(&mut self, plugin_name: &str, values: &Value, source: &str) -> Result<(), ConfigError> {
    if self.resolver.is_global_alias(plugin_name) {
      self
        .global_alias_values
        .entry(plugin_name.to_string())
        .or_default()
        .insert(source.to_string(), values.clone());
      return Ok(());
    }
    if plugin_name == "global" || plugin_name == "config" {
      return Err(ConfigError::Invalid(format!(
        "\"{}\" entry must not be nested inside a plugin configuration block",
        plugin_name
      )));
    }
    let generic = is_generic(plugin_name);
    if !generic && !self.resolver.has_plugin(plugin_name) {
      return Err(ConfigError::UnknownPlugin {
        name: plugin_name.to_string(),
      });
    }
    let Value::Object(values) = values else {
      return Err(ConfigError::Invalid(format!(
        "Plugin configuration for \"{}\" must be a mapping, got: {}",
        plugin_name,
        display_value(values)
      )));
    };
    if !generic {
      let points = self.resolver.plugin_parameters(plugin_name)?;
      if let Some(unknown) = values.keys().find(|k| !points.contains(k)) {
        return Err(ConfigError::UnknownParameter {
          param: unknown.clone(),
          plugin: plugin_name.to_string(),
        });
      }
    }
    let slot = self
      .plugin_configs
      .entry(plugin_name.to_string())
      .or_default()
      .entry(source.to_string())
      .or_default();
    for (name, value) in values {
      slot.insert(name.clone(), value.clone());
    }
    Ok(())
  }

  /// Raw fragments recorded for `name`, in source priority order.
  pub fn raw_configs(&self, name: &str) -> Vec<(String, Map<String, Value>)> {
    let Some(per_source) = self.plugin_configs.get(name) else {
      return Vec::new();
    };
    self
      .sources
      .iter()
      .filter_map(|s| per_source.get(s).map(|cfg| (s.clone(), cfg.clone())))
      .collect()
  }

  /// Resolves the configuration of `name`.
  ///
  /// Defaults, alias presets and global-alias values are applied first. With
  /// `generic` set, each source's generic values are applied before its
  /// specific ones; a generic value arriving after the parameter was already
  /// set specifically is an error. `is_final` enforces mandatory parameters.
  pub fn get_plugin_config(&self, name: &str, generic: Option<&str>, is_final: bool) -> Result<Map<String, Value>, ConfigError> {
    let points = self.resolver.plugin_parameters(name)?;
    let mut config = Map::new();

    for point in points.iter() {
      point.set_value(&mut config, name, None, false)?;
    }
    if let Some((real, presets)) = self.resolver.resolve_alias(name).filter(|(real, _)| real != name) {
      tracing::debug!(alias = %name, plugin = %real, "Applying alias presets");
      for (param, value) in &presets {
        if let Some(point) = points.get(param) {
          point.set_value(&mut config, name, Some(value), false)?;
        }
      }
    }
    for point in points.iter() {
      let Some(alias) = &point.global_alias else {
        continue;
      };
      let Some(values) = self.global_alias_values.get(alias) else {
        continue;
      };
      for source in &self.sources {
        if let Some(value) = values.get(source) {
          point.set_value(&mut config, name, Some(value), false).in_source(source)?;
        }
      }
    }

    match generic {
      None => self.merge_in_priority_order(name, points, &mut config)?,
      Some(generic) => self.merge_using_priority_specificity(name, generic, points, &mut config)?,
    }

    for point in points.iter() {
      point.validate(&config, name, is_final)?;
    }
    Ok(config)
  }

  fn merge_in_priority_order(&self, name: &str, points: &PointMap, config: &mut Map<String, Value>) -> Result<(), ConfigError> {
    let Some(per_source) = self.plugin_configs.get(name) else {
      return Ok(());
    };
    for source in &self.sources {
      let Some(values) = per_source.get(source) else {
        continue;
      };
      for (param, value) in values {
        let point = points
          .get(param)
          .ok_or_else(|| ConfigError::UnknownParameter {
            param: param.clone(),
            plugin: name.to_string(),
          })
          .in_source(source)?;
        point.set_value(config, name, Some(value), false).in_source(source)?;
      }
    }
    Ok(())
  }

  fn merge_using_priority_specificity(
    &self,
    specific: &str,
    generic: &str,
    points: &PointMap,
    config: &mut Map<String, Value>,
  ) -> Result<(), ConfigError> {
    let empty = HashMap::new();
    let generic_configs = self.plugin_configs.get(generic).unwrap_or(&empty);
    let specific_configs = self.plugin_configs.get(specific).unwrap_or(&empty);
    let mut seen_specific: HashMap<String, Vec<String>> = HashMap::new();

    for source in &self.sources {
      if let Some(values) = generic_configs.get(source) {
        apply_generic(values, generic, specific, points, &seen_specific, config).in_source(source)?;
      }

      if let Some(values) = specific_configs.get(source) {
        let mut leftover = Map::new();
        for (param, value) in values {
          let Some(point) = points.get(param) else {
            leftover.insert(param.clone(), value.clone());
            continue;
          };
          seen_specific.entry(point.name.clone()).or_default().push(source.clone());
          point.set_value(config, specific, Some(value), false).in_source(source)?;
        }
        if !leftover.is_empty() {
          return Err(
            ConfigError::UnexpectedValues {
              owner: specific.to_string(),
              values: Value::Object(leftover).to_string(),
            }
            .in_source(source),
          );
        }
      }
      tracing::debug!(%source, plugin = %specific, %generic, "Merged source");
    }
    Ok(())
  }
}

fn apply_generic(
  values: &Map<String, Value>,
  generic: &str,
  specific: &str,
  points: &PointMap,
  seen_specific: &HashMap<String, Vec<String>>,
  config: &mut Map<String, Value>,
) -> Result<(), ConfigError> {
  let mut leftover = Map::new();
  for (param, value) in values {
    let Some(point) = points.get(param) else {
      leftover.insert(param.clone(), value.clone());
      continue;
    };
    if let Some(seen) = seen_specific.get(&point.name) {
      return Err(ConfigError::SpecificityConflict {
        generic: generic.to_string(),
        param: point.name.clone(),
        specific: specific.to_string(),
        sources: seen.join(", "),
      });
    }
    point.set_value(config, generic, Some(value), false)?;
  }
  if !leftover.is_empty() {
    return Err(ConfigError::UnexpectedValues {
      owner: generic.to_string(),
      values: Value::Object(leftover).to_string(),
    });
  }
  Ok(())
}
