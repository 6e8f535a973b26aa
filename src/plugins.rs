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

//! Collaborators the resolution pipeline consults: what plugins exist and
//! which parameters they take ([`PluginResolver`]), and what the target device
//! accepts at runtime ([`TargetManager`]).
//!
//! [`PluginRegistry`] implements the former from a `plugins.toml` manifest,
//! [`DescribedTarget`] the latter from a `[[target]]` table of that manifest.

use crate::error::ConfigError;
use crate::error::SourceContext;
use crate::point::Constraint;
use crate::point::ConfigurationPoint;
use crate::point::PointMap;
use crate::value::Kind;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
  Workload,
  Instrument,
  OutputProcessor,
  Target,
}

/// Read access to the installed plugins.
pub trait PluginResolver: Send + Sync {
  fn plugin_names(&self) -> Vec<&str>;

  /// True for plugin names and plugin aliases.
  fn has_plugin(&self, name: &str) -> bool;

  fn plugin_kind(&self, name: &str) -> Option<PluginKind>;

  /// Parameters of a plugin, resolving aliases to the plugin they name.
  fn plugin_parameters(&self, name: &str) -> Result<&PointMap, ConfigError>;

  /// The plugin an alias stands for and the parameter presets it carries.
  /// Plain plugin names resolve to themselves with no presets.
  fn resolve_alias(&self, name: &str) -> Option<(String, Map<String, Value>)>;

  fn is_global_alias(&self, name: &str) -> bool {
    self.plugin_names().into_iter().any(|plugin| {
      self
        .plugin_parameters(plugin)
        .is_ok_and(|points| points.iter().any(|p| p.global_alias.as_deref() == Some(name)))
    })
  }

  /// Enumerable values for a plugin parameter, if it declares any.
  fn allowed_values(&self, plugin: &str, param: &str) -> Option<Vec<Value>> {
    self
      .plugin_parameters(plugin)
      .ok()?
      .get(param)?
      .allowed_values
      .clone()
      .filter(|values| !values.is_empty())
  }
}

/// Runtime-parameter handling for the device jobs execute on.
pub trait TargetManager: Send + Sync {
  /// Merges runtime parameters from ordered `(source, values)` pairs.
  fn merge_runtime_parameters(&self, sources: &[(String, Map<String, Value>)]) -> Result<Map<String, Value>, ConfigError>;

  fn validate_runtime_parameters(&self, params: &Map<String, Value>) -> Result<(), ConfigError>;

  /// Frequencies `cpu` can be clocked at, when known.
  fn available_frequencies(&self, cpu: &str) -> Option<Vec<Value>>;
}

// --- Manifest format ---

#[derive(Debug, Deserialize)]
struct Manifest {
  #[serde(default, rename = "plugin")]
  plugins: Vec<PluginDef>,
  #[serde(default, rename = "target")]
  targets: Vec<TargetDef>,
}

#[derive(Debug, Deserialize)]
struct PluginDef {
  name: String,
  kind: PluginKind,
  description: Option<String>,
  /// Inherits every parameter of an already-loaded plugin.
  extends: Option<String>,
  #[serde(default, rename = "parameter")]
  parameters: Vec<ParameterDef>,
  #[serde(default, rename = "alias")]
  aliases: Vec<AliasDef>,
}

#[derive(Debug, Deserialize)]
struct ParameterDef {
  name: String,
  #[serde(default)]
  kind: Kind,
  default: Option<Value>,
  #[serde(default)]
  mandatory: bool,
  allowed_values: Option<Vec<Value>>,
  min: Option<f64>,
  max: Option<f64>,
  #[serde(default)]
  merge: bool,
  #[serde(default)]
  aliases: Vec<String>,
  global_alias: Option<String>,
  #[serde(default)]
  deprecated: bool,
  #[serde(default, rename = "override")]
  override_: bool,
  description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AliasDef {
  name: String,
  #[serde(default)]
  params: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TargetDef {
  name: String,
  description: Option<String>,
  #[serde(default, rename = "parameter")]
  parameters: Vec<ParameterDef>,
  #[serde(default, rename = "runtime_parameter")]
  runtime_parameters: Vec<ParameterDef>,
  #[serde(default)]
  frequencies: BTreeMap<String, Vec<u64>>,
}

impl ParameterDef {
  fn into_point(self) -> Result<ConfigurationPoint, ConfigError> {
    let mut point = ConfigurationPoint::new(&self.name).kind(self.kind).aliases(self.aliases);
    point.mandatory = self.mandatory;
    point.merge = self.merge;
    point.deprecated = self.deprecated;
    point.override_ = self.override_;
    point.global_alias = self.global_alias;
    point.description = self.description;
    point.allowed_values = self.allowed_values;
    point.default = self.default;
    if self.min.is_some() || self.max.is_some() {
      point.constraint = Some(Constraint::range(self.min, self.max));
    }
    point.checked()
  }
}

fn build_points(defs: Vec<ParameterDef>, owner: &str) -> Result<PointMap, ConfigError> {
  let points = defs
    .into_iter()
    .map(ParameterDef::into_point)
    .collect::<Result<Vec<_>, _>>()
    .in_source(owner)?;
  Ok(PointMap::new(points))
}

/// Layers `own` over the parameters inherited from `base`. Redefining an
/// inherited parameter requires `override`, and `override` requires something
/// to redefine.
fn inherit(base: Option<&PointMap>, own: PointMap, owner: &str) -> Result<PointMap, ConfigError> {
  let mut points: Vec<ConfigurationPoint> = base.map(|b| b.iter().cloned().collect()).unwrap_or_default();
  for point in own.iter() {
    match points.iter().position(|p| p.name == point.name) {
      Some(i) if point.override_ => points[i] = point.clone(),
      Some(_) => {
        return Err(ConfigError::Invalid(format!(
          "Duplicate parameter \"{}\" in {}; set \"override\" to redefine it",
          point.name, owner
        )));
      }
      None if point.override_ => {
        return Err(ConfigError::Invalid(format!(
          "Cannot override parameter \"{}\" in {}; it is not inherited",
          point.name, owner
        )));
      }
      None => points.push(point.clone()),
    }
  }
  Ok(PointMap::new(points))
}

#[derive(Debug, Clone)]
pub struct PluginInfo {
  pub name: String,
  pub kind: PluginKind,
  pub description: Option<String>,
  pub parameters: PointMap,
}

/// What a `[[target]]` table declares beyond its device parameters.
#[derive(Debug, Clone)]
pub struct TargetInfo {
  pub name: String,
  pub runtime_parameters: PointMap,
  pub frequencies: BTreeMap<String, Vec<Value>>,
}

/// Installed plugins and targets, loaded from one or more manifests.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
  plugins: Vec<PluginInfo>,
  index: HashMap<String, usize>,
  aliases: HashMap<String, (String, Map<String, Value>)>,
  targets: HashMap<String, TargetInfo>,
}

impl PluginRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Loads a manifest file. Later manifests may add plugins but not redefine them.
  pub fn load(&mut self, path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
      return Err(ConfigError::MissingFile {
        what: "Plugin manifest",
        path: path.to_path_buf(),
      });
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
      what: "plugin manifest",
      path: path.to_path_buf(),
      source,
    })?;
    tracing::debug!("Loading plugin manifest {}", path.display());
    self
      .add_manifest(&content)
      .map_err(|e| match e {
        ConfigError::Syntax { message, .. } => ConfigError::Syntax {
          what: "plugin manifest",
          path: path.to_path_buf(),
          message,
        },
        other => other.in_source(path.display().to_string()),
      })
  }

  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let mut registry = Self::new();
    registry.add_manifest(content)?;
    Ok(registry)
  }

  pub fn add_manifest(&mut self, content: &str) -> Result<(), ConfigError> {
    let manifest: Manifest = toml::from_str(content).map_err(|e| ConfigError::Syntax {
      what: "plugin manifest",
      path: Default::default(),
      message: e.to_string(),
    })?;

    for def in manifest.plugins {
      let owner = format!("plugin \"{}\"", def.name);
      let base = match &def.extends {
        Some(base) => Some(
          &self
            .plugin(base)
            .ok_or_else(|| ConfigError::UnknownPlugin { name: base.clone() })
            .in_source(owner.clone())?
            .parameters,
        ),
        None => None,
      };
      let parameters = inherit(base, build_points(def.parameters, &owner)?, &owner)?;
      for alias in def.aliases {
        for key in alias.params.keys() {
          if !parameters.contains(key) {
            return Err(
              ConfigError::UnknownParameter {
                param: key.clone(),
                plugin: def.name.clone(),
              }
              .in_source(format!("alias \"{}\"", alias.name)),
            );
          }
        }
        self.aliases.insert(alias.name, (def.name.clone(), alias.params));
      }
      self.insert(PluginInfo {
        name: def.name,
        kind: def.kind,
        description: def.description,
        parameters,
      })?;
    }

    for def in manifest.targets {
      let owner = format!("target \"{}\"", def.name);
      let parameters = build_points(def.parameters, &owner)?;
      let mut runtime: Vec<ConfigurationPoint> = build_points(def.runtime_parameters, &owner)?.iter().cloned().collect();
      let frequencies: BTreeMap<String, Vec<Value>> = def
        .frequencies
        .into_iter()
        .map(|(cpu, freqs)| (cpu, freqs.into_iter().map(Value::from).collect()))
        .collect();
      for (cpu, freqs) in &frequencies {
        let name = format!("{}_frequency", cpu);
        if !runtime.iter().any(|p| p.name == name) {
          runtime.push(
            ConfigurationPoint::new(&name)
              .kind(Kind::Integer)
              .allowed_values(freqs.clone())
              .description(format!("Frequency of {}", cpu)),
          );
        }
      }
      self.targets.insert(
        def.name.clone(),
        TargetInfo {
          name: def.name.clone(),
          runtime_parameters: PointMap::new(runtime),
          frequencies,
        },
      );
      self.insert(PluginInfo {
        name: def.name,
        kind: PluginKind::Target,
        description: def.description,
        parameters,
      })?;
    }
    Ok(())
  }

  fn insert(&mut self, info: PluginInfo) -> Result<(), ConfigError> {
    if self.index.contains_key(&info.name) {
      return Err(ConfigError::DuplicateId {
        kind: "plugin",
        id: info.name,
      });
    }
    self.index.insert(info.name.clone(), self.plugins.len());
    self.plugins.push(info);
    Ok(())
  }

  pub fn plugin(&self, name: &str) -> Option<&PluginInfo> {
    let name = self.aliases.get(name).map(|(real, _)| real.as_str()).unwrap_or(name);
    self.index.get(name).map(|&i| &self.plugins[i])
  }

  pub fn plugins(&self) -> impl Iterator<Item = &PluginInfo> {
    self.plugins.iter()
  }

  pub fn target(&self, name: &str) -> Option<&TargetInfo> {
    self.targets.get(name)
  }
}

impl PluginResolver for PluginRegistry {
  fn plugin_names(&self) -> Vec<&str> {
    self.plugins.iter().map(|p| p.name.as_str()).collect()
  }

  fn has_plugin(&self, name: &str) -> bool {
    self.plugin(name).is_some()
  }

  fn plugin_kind(&self, name: &str) -> Option<PluginKind> {
    self.plugin(name).map(|p| p.kind)
  }

  fn plugin_parameters(&self, name: &str) -> Result<&PointMap, ConfigError> {
    self
      .plugin(name)
      .map(|p| &p.parameters)
      .ok_or_else(|| ConfigError::UnknownPlugin { name: name.to_string() })
  }

  fn resolve_alias(&self, name: &str) -> Option<(String, Map<String, Value>)> {
    if let Some((real, params)) = self.aliases.get(name) {
      return Some((real.clone(), params.clone()));
    }
    self.index.contains_key(name).then(|| (name.to_string(), Map::new()))
  }
}

/// A target described by a manifest: unknown runtime parameters are rejected
/// and `<cpu>_frequency` values must be ones the CPU supports.
#[derive(Debug, Clone)]
pub struct DescribedTarget {
  info: TargetInfo,
}

impl DescribedTarget {
  pub fn new(info: TargetInfo) -> Self {
    Self { info }
  }

  pub fn from_registry(registry: &PluginRegistry, device: &str) -> Result<Self, ConfigError> {
    registry
      .target(device)
      .cloned()
      .map(Self::new)
      .ok_or_else(|| ConfigError::Invalid(format!("Device \"{}\" does not exist", device)))
  }

  pub fn name(&self) -> &str {
    &self.info.name
  }
}

impl TargetManager for DescribedTarget {
  fn merge_runtime_parameters(&self, sources: &[(String, Map<String, Value>)]) -> Result<Map<String, Value>, ConfigError> {
    let owner = format!("{} runtime parameters", self.info.name);
    let mut merged = Map::new();
    for (source, values) in sources {
      for (name, value) in values {
        let point = self
          .info
          .runtime_parameters
          .get(name)
          .ok_or_else(|| ConfigError::UnknownParameter {
            param: name.clone(),
            plugin: self.info.name.clone(),
          })
          .in_source(source)?;
        point
          .set_value(&mut merged, &owner, Some(value), false)
          .in_source(source)?;
      }
    }
    Ok(merged)
  }

  fn validate_runtime_parameters(&self, params: &Map<String, Value>) -> Result<(), ConfigError> {
    let owner = format!("{} runtime parameters", self.info.name);
    for (name, value) in params {
      let point = self
        .info
        .runtime_parameters
        .get(name)
        .ok_or_else(|| ConfigError::UnknownParameter {
          param: name.clone(),
          plugin: self.info.name.clone(),
        })?;
      if !value.is_null() {
        point.validate_value(&owner, value)?;
      }
    }
    Ok(())
  }

  fn available_frequencies(&self, cpu: &str) -> Option<Vec<Value>> {
    self.info.frequencies.get(cpu).cloned()
  }
}

/// Accepts any runtime parameter; later sources overwrite earlier ones.
#[derive(Debug, Clone, Default)]
pub struct PassthroughTarget {
  frequencies: HashMap<String, Vec<Value>>,
}

impl PassthroughTarget {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_frequencies<I, V>(mut self, cpu: &str, values: I) -> Self
  where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
  {
    self
      .frequencies
      .insert(cpu.to_string(), values.into_iter().map(Into::into).collect());
    self
  }
}

impl TargetManager for PassthroughTarget {
  fn merge_runtime_parameters(&self, sources: &[(String, Map<String, Value>)]) -> Result<Map<String, Value>, ConfigError> {
    let mut merged = Map::new();
    for (_, values) in sources {
      crate::value::overlay(&mut merged, values);
    }
    Ok(merged)
  }

  fn validate_runtime_parameters(&self, _params: &Map<String, Value>) -> Result<(), ConfigError> {
    Ok(())
  }

  fn available_frequencies(&self, cpu: &str) -> Option<Vec<Value>> {
    self.frequencies.get(cpu).cloned()
  }
}
