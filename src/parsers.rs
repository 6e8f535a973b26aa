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

//! Config file and agenda parsing.
//!
//! Both document kinds are YAML (JSON is accepted as a subset). Any mapping
//! may contain an `include#` key naming one file or a list of files, relative
//! to the including file; their contents are merged into that mapping, with
//! values already present in the mapping taking precedence.

use crate::configuration::JOB_SPEC_POINTS;
use crate::configuration::RunConfiguration;
use crate::error::ConfigError;
use crate::error::SourceContext;
use crate::generator::JobGenerator;
use crate::jobspec::ID_SEPARATOR;
use crate::manager::ConfigManager;
use crate::point::pop_aliased_param;
use crate::sweep::SweepSite;
use crate::sweep::extract_sweeps;
use crate::sweep::parse_marker;
use crate::tree::GLOBAL_ID;
use crate::tree::WorkloadEntry;
use crate::value::TOGGLE_RESET;
use crate::value::ToggleSet;
use crate::value::display_value;
use crate::value::expand_home;
use crate::value::identifier;
use crate::value::merge_config_values;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

const INCLUDE_KEY: &str = "include#";

/// Reads a YAML document, resolves its includes and checks that the top level
/// is a mapping. Returns the document and every file it pulled in.
pub fn load_file(path: &Path, what: &'static str) -> Result<(Map<String, Value>, Vec<PathBuf>), ConfigError> {
  if !path.is_file() {
    return Err(ConfigError::MissingFile {
      what,
      path: path.to_path_buf(),
    });
  }
  let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
    what,
    path: path.to_path_buf(),
    source,
  })?;
  let syntax = |e: serde_yaml::Error| ConfigError::Syntax {
    what,
    path: path.to_path_buf(),
    message: e.to_string(),
  };
  let mut yaml: serde_yaml::Value = serde_yaml::from_str(&content).map_err(syntax)?;
  yaml.apply_merge().map_err(syntax)?;
  let mut value: Value = serde_yaml::from_value(yaml).map_err(syntax)?;

  let includes = process_includes(&mut value, path, what)?;
  match value {
    Value::Object(map) => Ok((map, includes)),
    _ => Err(ConfigError::Invalid(format!(
      "{} does not contain a valid {} structure; top level must be a mapping.",
      path.display(),
      what
    ))),
  }
}

/// Replaces every `include#` in `value` with the contents of the named files.
pub fn process_includes(value: &mut Value, path: &Path, what: &'static str) -> Result<Vec<PathBuf>, ConfigError> {
  let mut included = Vec::new();
  match value {
    Value::Object(map) => {
      let replacement = match map.shift_remove(INCLUDE_KEY) {
        Some(spec) => Some(values_from_includes(path, &spec, what)?),
        None => None,
      };
      for inner in map.values_mut() {
        included.extend(process_includes(inner, path, what)?);
      }
      if let Some((values, files)) = replacement {
        for (key, value) in values {
          let merged = merge_config_values(&value, map.get(&key).unwrap_or(&Value::Null))?;
          map.insert(key, merged);
        }
        included.extend(files);
      }
    }
    Value::Array(items) => {
      for inner in items {
        included.extend(process_includes(inner, path, what)?);
      }
    }
    _ => {}
  }
  Ok(included)
}

fn values_from_includes(
  path: &Path,
  spec: &Value,
  what: &'static str,
) -> Result<(Map<String, Value>, Vec<PathBuf>), ConfigError> {
  let source_dir = path.parent().unwrap_or_else(|| Path::new(""));
  let resolve = |name: &str| source_dir.join(expand_home(name));
  let mut files = Vec::new();

  let values = match spec {
    Value::String(name) => {
      let include = resolve(name);
      let (values, nested) = load_file(&include, what)?;
      files.push(include);
      files.extend(nested);
      values
    }
    Value::Array(names) => {
      let mut values = Map::new();
      for name in names {
        let Some(name) = name.as_str() else {
          return Err(bad_include(path, what));
        };
        let include = resolve(name);
        let (loaded, nested) = load_file(&include, what)?;
        for (key, value) in loaded {
          let merged = merge_config_values(&value, values.get(&key).unwrap_or(&Value::Null))?;
          values.insert(key, merged);
        }
        files.push(include);
        files.extend(nested);
      }
      values
    }
    _ => return Err(bad_include(path, what)),
  };
  tracing::debug!(from = %path.display(), files = files.len(), "Resolved includes");
  Ok((values, files))
}

fn bad_include(path: &Path, what: &str) -> ConfigError {
  ConfigError::Invalid(format!(
    "{} does not contain a valid {} structure; value for '{}' must be a string or a list",
    path.display(),
    what,
    INCLUDE_KEY
  ))
}

/// Folds `augmentations` and its aliases into one `augmentations` entry,
/// rejecting aliases that enable what another disables.
pub fn merge_augmentations(raw: &mut Map<String, Value>) -> Result<(), ConfigError> {
  let Some(point) = JOB_SPEC_POINTS.get("augmentations") else {
    return Ok(());
  };
  let mut entries = Vec::new();
  for name in point.names() {
    let Some(value) = raw.shift_remove(name) else {
      continue;
    };
    let toggles = ToggleSet::from_value(&value).ok_or_else(|| ConfigError::InvalidSetting {
      value: display_value(&value),
      name: name.to_string(),
      inner: Box::new(ConfigError::BadValue {
        value: display_value(&value),
        param: name.to_string(),
        expected: point.kind.expected(),
      }),
    })?;
    entries.push(toggles);
  }

  for (i, first) in entries.iter().enumerate() {
    for second in &entries[i + 1..] {
      let conflicts = first.conflicts_with(second);
      if !conflicts.is_empty() {
        return Err(ConfigError::AugmentationConflict {
          first: first.to_string(),
          second: second.to_string(),
          conflicts: conflicts
            .iter()
            .map(|c| format!("\"{}\"", c.trim_start_matches('~')))
            .collect::<Vec<_>>()
            .join(", "),
        });
      }
    }
  }

  if let Some(merged) = entries.into_iter().reduce(|a, b| a.union(&b)) {
    raw.insert(point.name.clone(), merged.to_value());
  }
  Ok(())
}

/// Loads config files (and the `config` block of an agenda).
pub struct ConfigParser;

impl ConfigParser {
  pub fn load_from_path(state: &mut ConfigManager, path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let (raw, includes) = load_file(path, "Config")?;
    Self::load(state, raw, &path.display().to_string())?;
    Ok(includes)
  }

  /// Routes every key of `raw` to settings, the run configuration, the
  /// global job-spec template or the plugin cache, in that order.
  pub fn load(state: &mut ConfigManager, mut raw: Map<String, Value>, source: &str) -> Result<(), ConfigError> {
    tracing::debug!(%source, "Parsing config");
    Self::populate(state, &mut raw, source).in_source(source)
  }

  fn populate(state: &mut ConfigManager, raw: &mut Map<String, Value>, source: &str) -> Result<(), ConfigError> {
    state.plugin_cache.add_source(source)?;
    if raw.contains_key("run_name") {
      return Err(ConfigError::Invalid(
        "\"run_name\" can only be specified in the config section of an agenda".to_string(),
      ));
    }
    if raw.contains_key("id") {
      return Err(ConfigError::Invalid("\"id\" cannot be set globally".to_string()));
    }

    merge_augmentations(raw)?;
    state.settings.apply(raw)?;

    for point in RunConfiguration::points().iter() {
      if let Some(value) = pop_aliased_param(point, raw)? {
        tracing::debug!(name = %point.name, value = %display_value(&value), "Setting run configuration");
        state.run_config.set(&point.name, &value)?;
      }
    }

    let markers: Vec<String> = raw.keys().filter(|k| parse_marker(k).is_some()).cloned().collect();
    if !markers.is_empty() {
      let mut swept: Map<String, Value> = markers
        .iter()
        .filter_map(|k| raw.shift_remove(k).map(|v| (k.clone(), v)))
        .collect();
      let sites = extract_sweeps(&mut swept, &[], &JOB_SPEC_POINTS, source)?;
      state.jobs_config.add_global_sweeps(sites);
    }

    for point in JOB_SPEC_POINTS.iter() {
      let Some(mut value) = pop_aliased_param(point, raw)? else {
        continue;
      };
      if let Value::Object(inner) = &mut value {
        let sites = extract_sweeps(inner, std::slice::from_ref(&point.name), &JOB_SPEC_POINTS, source)?;
        state.jobs_config.add_global_sweeps(sites);
      }
      tracing::debug!(name = %point.name, value = %display_value(&value), "Setting global job spec value");
      state.jobs_config.set_global_value(&point.name, &value)?;
    }

    for (name, values) in std::mem::take(raw) {
      let name = identifier(&name);
      tracing::debug!(plugin = %name, "Caching plugin configuration");
      state.plugin_cache.add_configs(&name, &values, source)?;
    }
    Ok(())
  }
}

/// Hands out `<prefix><n>` ids that do not collide with explicit ones.
#[derive(Debug, Default)]
pub struct IdAllocator {
  counters: HashMap<String, usize>,
}

impl IdAllocator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn next(&mut self, prefix: &str, seen: &mut HashSet<String>) -> String {
    let counter = self.counters.entry(prefix.to_string()).or_default();
    loop {
      *counter += 1;
      let id = format!("{}{}", prefix, counter);
      if seen.insert(id.clone()) {
        return id;
      }
    }
  }
}

/// Loads agendas: `config`/`global` blocks, `sections` and `workloads`.
pub struct AgendaParser;

impl AgendaParser {
  pub fn load_from_path(state: &mut ConfigManager, path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let (raw, includes) = load_file(path, "Agenda")?;
    Self::load(state, Value::Object(raw), &path.display().to_string())?;
    Ok(includes)
  }

  pub fn load(state: &mut ConfigManager, raw: Value, source: &str) -> Result<(), ConfigError> {
    tracing::debug!(%source, "Parsing agenda");
    Self::populate(state, raw, source).in_source(source)?;
    state.agenda = Some(source.to_string());
    Ok(())
  }

  fn populate(state: &mut ConfigManager, raw: Value, source: &str) -> Result<(), ConfigError> {
    let Value::Object(mut raw) = raw else {
      return Err(ConfigError::Invalid(
        "Invalid agenda, top level entry must be a mapping".to_string(),
      ));
    };

    for name in ["config", "global"] {
      let Some(entry) = raw.shift_remove(name).filter(|v| !v.is_null()) else {
        continue;
      };
      let Value::Object(mut entry) = entry else {
        return Err(ConfigError::Invalid(format!("Invalid entry \"{}\" - must be a mapping", name)));
      };
      if let Some(run_name) = entry.shift_remove("run_name") {
        tracing::debug!(run_name = %display_value(&run_name), "Setting run name");
        state.run_config.set("run_name", &run_name)?;
      }
      state.load_config(entry, &format!("{}/{}", source, name))?;
    }

    let sections = pop_sections(&mut raw)?;
    let global_workloads = pop_workloads(&mut raw)?;
    if global_workloads.is_empty() && sections.iter().all(|(_, workloads)| workloads.is_empty()) {
      return Err(ConfigError::Invalid(
        "No jobs available. Please ensure you have specified at least one workload to run.".to_string(),
      ));
    }
    if !raw.is_empty() {
      let keys: Vec<&str> = raw.keys().map(String::as_str).collect();
      return Err(ConfigError::Invalid(format!(
        "Invalid top level agenda entry(ies): \"{}\"",
        keys.join("\", \"")
      )));
    }

    let (mut section_ids, mut workload_ids) = collect_ids(&sections, &global_workloads)?;
    let mut allocator = IdAllocator::new();

    for workload in global_workloads {
      let entry = process_workload_entry(workload, &mut workload_ids, &mut allocator, &mut state.jobs_config)?;
      state.jobs_config.add_workload(entry);
    }

    for (mut section, workloads) in sections {
      let mut entries = Vec::with_capacity(workloads.len());
      for workload in workloads {
        entries.push(process_workload_entry(
          workload,
          &mut workload_ids,
          &mut allocator,
          &mut state.jobs_config,
        )?);
      }

      if let Some(params) = section.shift_remove("params") {
        if section.contains_key("runtime_params") {
          return Err(ConfigError::Invalid(format!(
            "both \"params\" and \"runtime_params\" specified in a section: \"{}\"",
            Value::Object(section)
          )));
        }
        section.insert("runtime_params".to_string(), params);
      }
      let group = section
        .shift_remove("group")
        .filter(|g| !g.is_null())
        .map(|g| display_value(&g));

      let (id, config, sweeps) = construct_valid_entry(section, &mut section_ids, "s", &mut allocator, &mut state.jobs_config)?;
      state.jobs_config.add_section(&id, config, group, sweeps, entries);
    }
    Ok(())
  }
}

type Section = (Map<String, Value>, Vec<Map<String, Value>>);

fn pop_sections(raw: &mut Map<String, Value>) -> Result<Vec<Section>, ConfigError> {
  let sections = match raw.shift_remove("sections") {
    None | Some(Value::Null) => return Ok(Vec::new()),
    Some(Value::Array(items)) => items,
    Some(_) => return Err(ConfigError::Invalid("Invalid entry \"sections\" - must be a list".to_string())),
  };
  sections
    .into_iter()
    .map(|section| {
      let Value::Object(mut section) = section else {
        return Err(ConfigError::Invalid(format!(
          "Invalid section \"{}\" - must be a mapping",
          display_value(&section)
        )));
      };
      let workloads = pop_workloads(&mut section)?;
      Ok((section, workloads))
    })
    .collect()
}

fn pop_workloads(raw: &mut Map<String, Value>) -> Result<Vec<Map<String, Value>>, ConfigError> {
  match raw.shift_remove("workloads") {
    None | Some(Value::Null) => Ok(Vec::new()),
    Some(Value::Array(items)) => items.into_iter().map(workload_entry).collect(),
    Some(_) => Err(ConfigError::Invalid("Invalid entry \"workloads\" - must be a list".to_string())),
  }
}

/// A bare string is shorthand for `{name: <string>}`.
fn workload_entry(raw: Value) -> Result<Map<String, Value>, ConfigError> {
  match raw {
    Value::String(name) => {
      let mut entry = Map::new();
      entry.insert("name".to_string(), Value::String(name));
      Ok(entry)
    }
    Value::Object(entry) => Ok(entry),
    other => Err(ConfigError::Invalid(format!(
      "Invalid workload entry: \"{}\"",
      display_value(&other)
    ))),
  }
}

fn collect_ids(
  sections: &[Section],
  global_workloads: &[Map<String, Value>],
) -> Result<(HashSet<String>, HashSet<String>), ConfigError> {
  let mut section_ids = HashSet::new();
  let mut workload_ids = HashSet::new();
  for workload in global_workloads {
    collect_valid_id(workload.get("id"), &mut workload_ids, "workload")?;
  }
  for (section, workloads) in sections {
    collect_valid_id(section.get("id"), &mut section_ids, "section")?;
    for workload in workloads {
      collect_valid_id(workload.get("id"), &mut workload_ids, "workload")?;
    }
  }
  Ok((section_ids, workload_ids))
}

fn collect_valid_id(id: Option<&Value>, seen: &mut HashSet<String>, kind: &'static str) -> Result<(), ConfigError> {
  let Some(id) = id.filter(|v| !v.is_null()) else {
    return Ok(());
  };
  let id = display_value(id);
  if seen.contains(&id) {
    return Err(ConfigError::DuplicateId { kind, id });
  }
  if id.contains(ID_SEPARATOR) {
    return Err(ConfigError::IdSeparator {
      kind,
      id,
      separator: ID_SEPARATOR,
    });
  }
  if id == GLOBAL_ID {
    return Err(ConfigError::ReservedId { kind });
  }
  seen.insert(id);
  Ok(())
}

fn process_workload_entry(
  raw: Map<String, Value>,
  seen: &mut HashSet<String>,
  allocator: &mut IdAllocator,
  jobs_config: &mut JobGenerator,
) -> Result<WorkloadEntry, ConfigError> {
  let (id, config, sweeps) = construct_valid_entry(raw, seen, "wk", allocator, jobs_config)?;
  let named = config.contains_key("workload_name") || sweeps.iter().any(|s| s.keychain.is_empty() && s.sweep.param == "workload_name");
  if !named {
    return Err(ConfigError::Invalid(format!("No workload name specified in entry {}", id)));
  }
  Ok(WorkloadEntry { id, config, sweeps })
}

/// Validates one section or workload entry against the job-spec points,
/// assigning an id when it has none.
pub fn construct_valid_entry(
  mut raw: Map<String, Value>,
  seen: &mut HashSet<String>,
  prefix: &str,
  allocator: &mut IdAllocator,
  jobs_config: &mut JobGenerator,
) -> Result<(String, Map<String, Value>, Vec<SweepSite>), ConfigError> {
  let id = match raw.shift_remove("id").filter(|v| !v.is_null()) {
    Some(id) => display_value(&id),
    None => allocator.next(prefix, seen),
  };
  let sweeps = extract_sweeps(&mut raw, &[], &JOB_SPEC_POINTS, &id)?;
  merge_augmentations(&mut raw)?;

  let mut entry = Map::new();
  entry.insert("id".to_string(), Value::String(id.clone()));
  for point in JOB_SPEC_POINTS.iter() {
    let Some(value) = pop_aliased_param(point, &mut raw)?.filter(|v| !v.is_null()) else {
      continue;
    };
    let value = point.kind.coerce(&value).ok_or_else(|| ConfigError::BadValue {
      value: display_value(&value),
      param: point.name.clone(),
      expected: point.kind.expected(),
    })?;
    point.validate_value(&id, &value)?;
    entry.insert(point.name.clone(), value);
  }

  if let Some(value) = entry.get("augmentations") {
    let toggles = ToggleSet::from_value(value).unwrap_or_default();
    if toggles.contains(TOGGLE_RESET) {
      return Err(ConfigError::Invalid(format!(
        "\"{}\" can only be specified in top-level config, and not for individual workloads/sections",
        TOGGLE_RESET
      )));
    }
    jobs_config.update_augmentations(&toggles);
  }

  if !raw.is_empty() {
    let keys: Vec<&str> = raw.keys().map(String::as_str).collect();
    return Err(ConfigError::Invalid(format!(
      "Invalid entry(ies) in \"{}\": \"{}\"",
      id,
      keys.join(", ")
    )));
  }
  Ok((id, entry, sweeps))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::plugins::PluginRegistry;
  use crate::plugins::PluginResolver;
  use serde_json::json;
  use std::sync::Arc;

  fn generator() -> JobGenerator {
    let registry: Arc<dyn PluginResolver> = Arc::new(PluginRegistry::new());
    JobGenerator::new(registry)
  }

  fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
  }

  #[test]
  fn test_id_allocator_skips_taken_ids() {
    let mut seen: HashSet<String> = ["wk1".to_string(), "wk3".to_string()].into();
    let mut allocator = IdAllocator::new();
    assert_eq!(allocator.next("wk", &mut seen), "wk2");
    assert_eq!(allocator.next("wk", &mut seen), "wk4");
    assert_eq!(allocator.next("s", &mut seen), "s1");
  }

  #[test]
  fn test_merge_augmentations_unions_aliases() {
    let mut raw = object(json!({"instruments": ["trace"], "output_processors": ["csv"]}));
    merge_augmentations(&mut raw).unwrap();
    assert_eq!(Value::Object(raw), json!({"augmentations": ["trace", "csv"]}));

    let mut conflicting = object(json!({"instruments": ["trace"], "augmentations": ["~trace"]}));
    let err = merge_augmentations(&mut conflicting).unwrap_err();
    assert!(err.to_string().contains("conflicting entries: \"trace\""));
  }

  #[test]
  fn test_construct_valid_entry() {
    let mut seen = HashSet::new();
    let mut allocator = IdAllocator::new();
    let mut jobs = generator();
    let raw = object(json!({"name": "dhrystone", "params": {"sweep(range)": {"threads": [1, 2]}}, "iterations": "2"}));
    let (id, config, sweeps) = construct_valid_entry(raw, &mut seen, "wk", &mut allocator, &mut jobs).unwrap();
    assert_eq!(id, "wk1");
    assert_eq!(config["workload_name"], json!("dhrystone"));
    assert_eq!(config["iterations"], json!(2));
    assert_eq!(config["workload_parameters"], json!({}));
    assert_eq!(sweeps[0].keychain, vec!["workload_parameters"]);

    let reset = object(json!({"name": "idle", "augmentations": ["~~"]}));
    assert!(construct_valid_entry(reset, &mut seen, "wk", &mut allocator, &mut jobs).is_err());

    let unknown = object(json!({"name": "idle", "colour": "red"}));
    let err = construct_valid_entry(unknown, &mut seen, "wk", &mut allocator, &mut jobs).unwrap_err();
    assert!(err.to_string().contains("Invalid entry(ies) in \"wk3\": \"colour\""));
  }

  #[test]
  fn test_collect_ids_rejections() {
    let dup = vec![object(json!({"id": 1})), object(json!({"id": "1"}))];
    assert!(matches!(
      collect_ids(&[], &dup),
      Err(ConfigError::DuplicateId { kind: "workload", .. })
    ));
    let dashed = vec![object(json!({"id": "a-b"}))];
    assert!(matches!(collect_ids(&[], &dashed), Err(ConfigError::IdSeparator { .. })));
    let reserved = vec![(object(json!({"id": "global"})), Vec::new())];
    assert!(matches!(
      collect_ids(&reserved, &[]),
      Err(ConfigError::ReservedId { kind: "section" })
    ));
  }

  #[test]
  fn test_includes_merge_with_siblings() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("base.yaml"), "iterations: 5\nclassifiers:\n  a: 1\n").unwrap();
    std::fs::write(dir.path().join("extra.yaml"), "classifiers:\n  b: 2\n").unwrap();
    let main = dir.path().join("main.yaml");
    std::fs::write(&main, "include#: [base.yaml, extra.yaml]\niterations: 2\n").unwrap();

    let (raw, includes) = load_file(&main, "Config").unwrap();
    assert_eq!(raw["iterations"], json!(2));
    assert_eq!(raw["classifiers"], json!({"a": 1, "b": 2}));
    assert_eq!(includes.len(), 2);
    assert!(includes[0].ends_with("base.yaml"));
  }

  #[test]
  fn test_load_file_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      load_file(&dir.path().join("missing.yaml"), "Agenda"),
      Err(ConfigError::MissingFile { .. })
    ));

    let list = dir.path().join("list.yaml");
    std::fs::write(&list, "- a\n- b\n").unwrap();
    let err = load_file(&list, "Agenda").unwrap_err();
    assert!(err.to_string().contains("top level must be a mapping"));

    let broken = dir.path().join("broken.yaml");
    std::fs::write(&broken, "workloads: [a, b\n").unwrap();
    assert!(matches!(load_file(&broken, "Agenda"), Err(ConfigError::Syntax { .. })));
  }
}
