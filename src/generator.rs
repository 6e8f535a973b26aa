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

//! Holds the job tree built from an agenda and turns it into job specs.

use crate::configuration::JOB_SPEC_POINTS;
use crate::error::ConfigError;
use crate::jobspec::JobSpec;
use crate::jobspec::create_job_spec;
use crate::plugin_cache::PluginCache;
use crate::plugins::PluginKind;
use crate::plugins::PluginResolver;
use crate::plugins::TargetManager;
use crate::sweep::SweepSite;
use crate::sweep::expand;
use crate::tree::GLOBAL_ID;
use crate::tree::JobTree;
use crate::tree::NodeId;
use crate::tree::WorkloadEntry;
use crate::value::TOGGLE_RESET;
use crate::value::ToggleSet;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub struct JobGenerator {
  tree: JobTree,
  ids_to_run: Vec<String>,
  enabled_augmentations: ToggleSet,
  disabled_augmentations: ToggleSet,
  resolver: Arc<dyn PluginResolver>,
}

impl JobGenerator {
  pub fn new(resolver: Arc<dyn PluginResolver>) -> Self {
    let mut template = Map::new();
    for point in JOB_SPEC_POINTS.iter() {
      // Table defaults pass `ConfigurationPoint::checked`.
      let _ = point.set_value(&mut template, GLOBAL_ID, None, false);
    }
    template.retain(|_, v| !v.is_null());
    Self {
      tree: JobTree::new(template),
      ids_to_run: Vec::new(),
      enabled_augmentations: ToggleSet::new(),
      disabled_augmentations: ToggleSet::new(),
      resolver,
    }
  }

  pub fn tree(&self) -> &JobTree {
    &self.tree
  }

  /// Sets a job-spec value for every job.
  pub fn set_global_value(&mut self, name: &str, value: &Value) -> Result<(), ConfigError> {
    let point = JOB_SPEC_POINTS.get(name).ok_or_else(|| ConfigError::UnknownConfiguration {
      owner: "job spec".to_string(),
      name: name.to_string(),
    })?;
    let root = self.tree.root();
    point.set_value(&mut self.tree.node_mut(root).config, GLOBAL_ID, Some(value), false)?;
    if point.name == "augmentations" {
      let toggles = ToggleSet::from_value(value).ok_or_else(|| ConfigError::BadValue {
        value: value.to_string(),
        param: point.name.clone(),
        expected: point.kind.expected(),
      })?;
      self.update_augmentations(&toggles);
    }
    Ok(())
  }

  pub fn add_global_sweeps(&mut self, sweeps: Vec<SweepSite>) {
    let root = self.tree.root();
    self.tree.node_mut(root).sweeps.extend(sweeps);
  }

  /// Adds a section and its own workload entries to every place it lands.
  pub fn add_section(
    &mut self,
    id: &str,
    config: Map<String, Value>,
    group: Option<String>,
    sweeps: Vec<SweepSite>,
    workloads: Vec<WorkloadEntry>,
  ) -> Vec<NodeId> {
    let nodes = self.tree.add_section(id, config, group, sweeps);
    for &node in &nodes {
      for workload in &workloads {
        self.tree.add_workload(node, workload.clone());
      }
    }
    tracing::debug!(section = %id, copies = nodes.len(), workloads = workloads.len(), "Added section");
    nodes
  }

  pub fn add_workload(&mut self, workload: WorkloadEntry) {
    let root = self.tree.root();
    self.tree.add_workload(root, workload);
  }

  pub fn update_augmentations(&mut self, value: &ToggleSet) {
    self.enabled_augmentations = self.enabled_augmentations.merge_with(value);
  }

  /// Disables augmentations for every job. Names must be known plugins.
  pub fn disable_augmentations(&mut self, augmentations: &ToggleSet) -> Result<(), ConfigError> {
    for entry in augmentations.entries() {
      if entry == TOGGLE_RESET {
        continue;
      }
      let name = entry.strip_prefix('~').unwrap_or(entry);
      if !self.resolver.has_plugin(name) {
        return Err(ConfigError::Invalid(format!(
          "Error disabling unknown augmentation: \"{}\"",
          name
        )));
      }
    }
    self.disabled_augmentations = self.disabled_augmentations.union(augmentations);
    Ok(())
  }

  pub fn disabled_augmentations(&self) -> &ToggleSet {
    &self.disabled_augmentations
  }

  /// Only generate jobs whose id contains one of `ids`.
  pub fn only_run_ids<I, S>(&mut self, ids: I)
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.ids_to_run = ids.into_iter().map(Into::into).collect();
  }

  /// Enabled augmentations with global disables applied.
  pub fn enabled_augmentations(&self) -> ToggleSet {
    self.enabled_augmentations.merge_with(&self.disabled_augmentations)
  }

  pub fn enabled_instruments(&self) -> Vec<String> {
    self.enabled_of_kind(PluginKind::Instrument)
  }

  pub fn enabled_processors(&self) -> Vec<String> {
    self.enabled_of_kind(PluginKind::OutputProcessor)
  }

  fn enabled_of_kind(&self, kind: PluginKind) -> Vec<String> {
    self
      .enabled_augmentations()
      .values()
      .into_iter()
      .filter(|name| self.resolver.plugin_kind(name) == Some(kind))
      .map(str::to_string)
      .collect()
  }

  /// One job spec per leaf, workload entry and sweep combination, in tree
  /// order.
  pub fn generate_job_specs(&mut self, cache: &PluginCache, target: &dyn TargetManager) -> Result<Vec<JobSpec>, ConfigError> {
    let mut specs = Vec::new();
    let mut seen = HashSet::new();
    for leaf in self.tree.leaves() {
      let (sections, entries) = self.tree.job_sources(leaf);
      for entry in entries {
        let mut chain = sections.clone();
        chain.push(entry);
        for variant in expand(chain, cache.resolver(), target)? {
          let spec = create_job_spec(&variant, cache, target, &self.disabled_augmentations)?;
          if !seen.insert(spec.id.clone()) {
            return Err(ConfigError::DuplicateJobId { id: spec.id });
          }
          if !self.ids_to_run.is_empty() && !self.ids_to_run.iter().any(|id| spec.id.contains(id.as_str())) {
            tracing::debug!(id = %spec.id, "Skipping job not selected to run");
            continue;
          }
          self.update_augmentations(&spec.augmentations);
          specs.push(spec);
        }
      }
    }
    tracing::info!(count = specs.len(), "Generated job specs");
    Ok(specs)
  }
}
