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

//! Parameter sweeps.
//!
//! A mapping key of the form `sweep(<handler>)` declares that the parameter it
//! names should take several values, one job per value. Markers are pulled out
//! of fragments at load time ([`extract_sweeps`]) and recorded as
//! [`SweepSite`]s; when jobs are generated, [`expand`] turns one chain of
//! fragments into the Cartesian product of every active sweep.
//!
//! Supported handlers:
//!
//! * `range`: `{param: [v1, v2, ...]}` or `{param: "start-stop[,step]"}`
//!   (stop exclusive).
//! * `autofreq`: `{param, cpu, min?, max?}`, every frequency the target
//!   reports for `cpu`.
//! * `autoparam`: `{param, plugin, min?, max?}`, every allowed value of the
//!   plugin parameter.

use crate::error::ConfigError;
use crate::error::SourceContext;
use crate::plugins::PluginResolver;
use crate::plugins::TargetManager;
use crate::point::PointMap;
use crate::tree::Fragment;
use crate::tree::FragmentKind;
use crate::value::as_number;
use crate::value::display_value;
use serde_json::Map;
use serde_json::Value;

const MARKER_PREFIX: &str = "sweep(";
const MARKER_SUFFIX: &str = ")";

/// The handler named by a `sweep(<handler>)` key, if `key` is a marker.
pub fn parse_marker(key: &str) -> Option<&str> {
  key.strip_prefix(MARKER_PREFIX)?.strip_suffix(MARKER_SUFFIX)
}

/// Where a sweep should be resolved from.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepValues {
  Explicit(Vec<Value>),
  AutoFreq {
    cpu: String,
    min: Option<f64>,
    max: Option<f64>,
  },
  AutoParam {
    plugin: String,
    min: Option<f64>,
    max: Option<f64>,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sweep {
  pub param: String,
  pub values: SweepValues,
}

/// A sweep anchored at the mapping that contained its marker.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSite {
  /// Keys leading from the fragment root to the mapping holding `param`.
  pub keychain: Vec<String>,
  pub sweep: Sweep,
}

impl Sweep {
  /// Builds a sweep from a marker's handler name and body.
  pub fn from_marker(handler: &str, body: &Value) -> Result<Self, ConfigError> {
    match handler {
      "range" => Self::range(body),
      "autofreq" => {
        let fields = AutoFields::read("autofreq", body, "cpu")?;
        Ok(Self {
          param: fields.param,
          values: SweepValues::AutoFreq {
            cpu: fields.source,
            min: fields.min,
            max: fields.max,
          },
        })
      }
      "autoparam" => {
        let fields = AutoFields::read("autoparam", body, "plugin")?;
        Ok(Self {
          param: fields.param,
          values: SweepValues::AutoParam {
            plugin: fields.source,
            min: fields.min,
            max: fields.max,
          },
        })
      }
      other => Err(ConfigError::UnknownSweepHandler {
        handler: other.to_string(),
      }),
    }
  }

  fn range(body: &Value) -> Result<Self, ConfigError> {
    let keys = |b: &Value| -> Vec<String> { b.as_object().map(|m| m.keys().cloned().collect()).unwrap_or_default() };
    let Some((param, spec)) = body.as_object().filter(|m| m.len() == 1).and_then(|m| m.iter().next()) else {
      return Err(ConfigError::SweepKeys {
        handler: "range",
        keys: keys(body),
      });
    };
    let values = match spec {
      Value::Array(items) => items.clone(),
      Value::String(text) => parse_range(param, text)?,
      other => {
        return Err(ConfigError::SweepRange {
          param: param.clone(),
          value: display_value(other),
        });
      }
    };
    Ok(Self {
      param: param.clone(),
      values: SweepValues::Explicit(values),
    })
  }

  /// Concrete values for this sweep, in declaration order.
  pub fn resolve(&self, resolver: &dyn PluginResolver, target: &dyn TargetManager) -> Result<Vec<Value>, ConfigError> {
    let values = match &self.values {
      SweepValues::Explicit(values) => values.clone(),
      SweepValues::AutoFreq { cpu, min, max } => {
        let available = target
          .available_frequencies(cpu)
          .ok_or_else(|| ConfigError::NotSweepable {
            param: self.param.clone(),
            owner: format!("cpu \"{}\"", cpu),
            reason: "the target reports no available frequencies".to_string(),
          })?;
        within_bounds(&self.param, available, *min, *max)?
      }
      SweepValues::AutoParam { plugin, min, max } => {
        if !resolver.has_plugin(plugin) {
          return Err(ConfigError::UnknownPlugin { name: plugin.clone() });
        }
        let allowed = resolver
          .allowed_values(plugin, &self.param)
          .ok_or_else(|| ConfigError::NotSweepable {
            param: self.param.clone(),
            owner: plugin.clone(),
            reason: "it declares no allowed values".to_string(),
          })?;
        within_bounds(&self.param, allowed, *min, *max)?
      }
    };
    if values.is_empty() {
      return Err(ConfigError::EmptySweep {
        param: self.param.clone(),
      });
    }
    Ok(values)
  }
}

struct AutoFields {
  param: String,
  source: String,
  min: Option<f64>,
  max: Option<f64>,
}

impl AutoFields {
  fn read(handler: &'static str, body: &Value, source_field: &'static str) -> Result<Self, ConfigError> {
    let Some(map) = body.as_object() else {
      return Err(ConfigError::SweepIncomplete { handler, field: "param" });
    };
    let unexpected: Vec<String> = map
      .keys()
      .filter(|k| !["param", source_field, "min", "max"].contains(&k.as_str()))
      .cloned()
      .collect();
    if !unexpected.is_empty() {
      return Err(ConfigError::Invalid(format!(
        "Unexpected fields in sweep({}): {:?}",
        handler, unexpected
      )));
    }
    let text = |field: &'static str| -> Result<String, ConfigError> {
      map
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or(ConfigError::SweepIncomplete { handler, field })
    };
    let param = text("param")?;
    let bound = |field: &str| -> Result<Option<f64>, ConfigError> {
      match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_number(v).map(Some).ok_or_else(|| ConfigError::SweepBound {
          param: param.clone(),
          value: display_value(v),
        }),
      }
    };
    Ok(Self {
      source: text(source_field)?,
      min: bound("min")?,
      max: bound("max")?,
      param,
    })
  }
}

/// Parses `start-stop[,step]` into the half-open range `[start, stop)`.
pub fn parse_range(param: &str, text: &str) -> Result<Vec<Value>, ConfigError> {
  let invalid = || ConfigError::SweepRange {
    param: param.to_string(),
    value: text.to_string(),
  };
  let (bounds, step) = match text.split_once(',') {
    Some((bounds, step)) => (bounds, step.trim().parse::<i64>().map_err(|_| invalid())?),
    None => (text, 1),
  };
  let (start, stop) = bounds.split_once('-').ok_or_else(invalid)?;
  let start = start.trim().parse::<i64>().map_err(|_| invalid())?;
  let stop = stop.trim().parse::<i64>().map_err(|_| invalid())?;
  if step <= 0 {
    return Err(invalid());
  }
  let step = usize::try_from(step).map_err(|_| invalid())?;
  Ok((start..stop).step_by(step).map(Value::from).collect())
}

/// Keeps values strictly inside `(min, max)`.
fn within_bounds(param: &str, values: Vec<Value>, min: Option<f64>, max: Option<f64>) -> Result<Vec<Value>, ConfigError> {
  if min.is_none() && max.is_none() {
    return Ok(values);
  }
  let mut kept = Vec::with_capacity(values.len());
  for value in values {
    let n = as_number(&value).ok_or_else(|| ConfigError::SweepBound {
      param: param.to_string(),
      value: display_value(&value),
    })?;
    if min.is_none_or(|lo| n > lo) && max.is_none_or(|hi| n < hi) {
      kept.push(value);
    }
  }
  Ok(kept)
}

/// Keychains (including the marker key itself) of every sweep marker in `value`.
/// Sequence positions appear as their decimal index.
pub fn find_sweep_markers(value: &Value) -> Vec<Vec<String>> {
  let mut found = Vec::new();
  walk_markers(value, &mut Vec::new(), &mut found);
  found
}

fn walk_markers(value: &Value, chain: &mut Vec<String>, found: &mut Vec<Vec<String>>) {
  match value {
    Value::Object(map) => {
      for (key, inner) in map {
        chain.push(key.clone());
        if parse_marker(key).is_some() {
          found.push(chain.clone());
        }
        walk_markers(inner, chain, found);
        chain.pop();
      }
    }
    Value::Array(items) => {
      for (i, inner) in items.iter().enumerate() {
        chain.push(i.to_string());
        walk_markers(inner, chain, found);
        chain.pop();
      }
    }
    _ => {}
  }
}

/// Removes every sweep marker from `config`, returning the sweeps they declared.
///
/// Keychains are prefixed with `prefix`, and the first key of each keychain
/// (or the parameter itself for top-level sweeps) is canonicalized through
/// `points`. Two sweeps over the same parameter at the same place are an error,
/// as is a marker nested in a sequence.
pub fn extract_sweeps(
  config: &mut Map<String, Value>,
  prefix: &[String],
  points: &PointMap,
  origin: &str,
) -> Result<Vec<SweepSite>, ConfigError> {
  let mut sites = Vec::new();
  let mut chain = prefix.to_vec();
  extract_into(config, &mut chain, &mut sites)?;

  let leftover = find_sweep_markers(&Value::Object(config.clone()));
  if let Some(keychain) = leftover.first() {
    return Err(ConfigError::Invalid(format!(
      "Sweep declared inside a sequence at \"{}\" in {}; sweeps must be nested in mappings",
      keychain.join("."),
      origin
    )));
  }

  for site in &mut sites {
    match site.keychain.first_mut() {
      Some(first) => {
        if let Some(canonical) = points.canonical(first) {
          *first = canonical.to_string();
        }
      }
      None => {
        if let Some(canonical) = points.canonical(&site.sweep.param) {
          site.sweep.param = canonical.to_string();
        }
      }
    }
  }
  for (i, site) in sites.iter().enumerate() {
    if sites[..i]
      .iter()
      .any(|s| s.keychain == site.keychain && s.sweep.param == site.sweep.param)
    {
      return Err(ConfigError::ConflictingSweeps {
        param: site.sweep.param.clone(),
        origin: origin.to_string(),
      });
    }
  }
  Ok(sites)
}

fn extract_into(map: &mut Map<String, Value>, chain: &mut Vec<String>, sites: &mut Vec<SweepSite>) -> Result<(), ConfigError> {
  let markers: Vec<String> = map.keys().filter(|k| parse_marker(k).is_some()).cloned().collect();
  for key in markers {
    let Some(body) = map.shift_remove(&key) else {
      continue;
    };
    let handler = parse_marker(&key).unwrap_or_default();
    let sweep = Sweep::from_marker(handler, &body)?;
    tracing::debug!(param = %sweep.param, keychain = ?chain, "Found sweep({})", handler);
    sites.push(SweepSite {
      keychain: chain.clone(),
      sweep,
    });
  }
  for (key, value) in map.iter_mut() {
    if let Value::Object(inner) = value {
      chain.push(key.clone());
      extract_into(inner, chain, sites)?;
      chain.pop();
    }
  }
  Ok(())
}

fn lookup<'a>(config: &'a Map<String, Value>, keychain: &[String]) -> Option<&'a Map<String, Value>> {
  keychain
    .iter()
    .try_fold(config, |map, key| map.get(key).and_then(Value::as_object))
}

fn substitute(config: &mut Map<String, Value>, keychain: &[String], param: &str, value: Value) {
  let mut map = config;
  for key in keychain {
    let slot = map
      .entry(key.clone())
      .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
      *slot = Value::Object(Map::new());
    }
    let Value::Object(inner) = slot else {
      return;
    };
    map = inner;
  }
  map.insert(param.to_string(), value);
}

/// True when a more specific fragment sweeps or sets the same parameter.
fn overridden(later: &[Fragment], site: &SweepSite) -> bool {
  later.iter().any(|fragment| {
    fragment
      .sweeps
      .iter()
      .any(|s| s.keychain == site.keychain && s.sweep.param == site.sweep.param)
      || lookup(&fragment.config, &site.keychain)
        .and_then(|m| m.get(&site.sweep.param))
        .is_some_and(|v| !v.is_null())
  })
}

struct Dimension {
  source: usize,
  keychain: Vec<String>,
  param: String,
  values: Vec<Value>,
}

/// Expands one chain of fragments into every combination of its active sweeps.
///
/// Dimensions are taken in chain order with the first one outermost. Each
/// fragment contributing a dimension gets its id suffixed with `_<n>`, the
/// 1-based index of the combination of its own dimensions, and every `label`
/// has `{param}` placeholders filled in with the swept values.
pub fn expand(
  fragments: Vec<Fragment>,
  resolver: &dyn PluginResolver,
  target: &dyn TargetManager,
) -> Result<Vec<Vec<Fragment>>, ConfigError> {
  let mut dims = Vec::new();
  for (i, fragment) in fragments.iter().enumerate() {
    for site in &fragment.sweeps {
      if overridden(&fragments[i + 1..], site) {
        tracing::debug!(param = %site.sweep.param, source = %fragment.name(), "Sweep overridden by a more specific source");
        continue;
      }
      let values = site.sweep.resolve(resolver, target).in_source(fragment.name())?;
      dims.push(Dimension {
        source: i,
        keychain: site.keychain.clone(),
        param: site.sweep.param.clone(),
        values,
      });
    }
  }
  if dims.is_empty() {
    return Ok(vec![fragments]);
  }

  // The root never appears in a job id, so its dimensions are numbered on
  // the first fragment that does.
  let first_named = fragments
    .iter()
    .position(|f| f.kind != FragmentKind::Global)
    .unwrap_or(0);
  let owners: Vec<usize> = dims
    .iter()
    .map(|d| match fragments[d.source].kind {
      FragmentKind::Global => first_named,
      _ => d.source,
    })
    .collect();

  let total: usize = dims.iter().map(|d| d.values.len()).product();
  let mut variants = Vec::with_capacity(total);
  for n in 0..total {
    let mut index = vec![0; dims.len()];
    let mut rest = n;
    for (d, dim) in dims.iter().enumerate().rev() {
      index[d] = rest % dim.values.len();
      rest /= dim.values.len();
    }

    let mut variant = fragments.clone();
    let mut swept: Vec<(&str, &Value)> = Vec::with_capacity(dims.len());
    for (d, dim) in dims.iter().enumerate() {
      let value = &dim.values[index[d]];
      substitute(&mut variant[dim.source].config, &dim.keychain, &dim.param, value.clone());
      swept.push((dim.param.as_str(), value));
    }

    for (i, fragment) in variant.iter_mut().enumerate() {
      let own: Vec<usize> = (0..dims.len()).filter(|&d| owners[d] == i).collect();
      if !own.is_empty() {
        let combination = own
          .iter()
          .fold(0, |acc, &d| acc * dims[d].values.len() + index[d]);
        fragment.id = format!("{}_{}", fragment.id, combination + 1);
      }
      fragment.sweeps.clear();
      if let Some(Value::String(label)) = fragment.config.get_mut("label") {
        *label = format_label(label, &swept);
      }
    }
    variants.push(variant);
  }
  tracing::debug!(variants = variants.len(), dimensions = dims.len(), "Expanded sweeps");
  Ok(variants)
}

fn format_label(label: &str, swept: &[(&str, &Value)]) -> String {
  swept.iter().fold(label.to_string(), |acc, (param, value)| {
    acc.replace(&format!("{{{}}}", param), &display_value(value))
  })
}
