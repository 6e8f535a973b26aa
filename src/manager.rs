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

//! Everything loaded for one run, and the steps that turn it into jobs.

use crate::configuration::RunConfiguration;
use crate::error::ConfigError;
use crate::generator::JobGenerator;
use crate::jobspec::JobSpec;
use crate::parsers::AgendaParser;
use crate::parsers::ConfigParser;
use crate::permute::Job;
use crate::permute::permute;
use crate::plugin_cache::PluginCache;
use crate::plugins::PluginResolver;
use crate::plugins::TargetManager;
use crate::settings::Settings;
use serde_json::Map;
use serde_json::Value;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

/// Sources must be loaded lowest priority first: user config, `--config`
/// files, then the agenda.
pub struct ConfigManager {
  pub settings: Settings,
  pub run_config: RunConfiguration,
  pub plugin_cache: PluginCache,
  pub jobs_config: JobGenerator,
  pub loaded_config_sources: Vec<String>,
  pub agenda: Option<String>,
}

impl ConfigManager {
  pub fn new(settings: Settings, resolver: Arc<dyn PluginResolver>) -> Self {
    Self {
      settings,
      run_config: RunConfiguration::new(),
      plugin_cache: PluginCache::new(Arc::clone(&resolver)),
      jobs_config: JobGenerator::new(resolver),
      loaded_config_sources: Vec::new(),
      agenda: None,
    }
  }

  /// Loads a config file, returning the files it included.
  pub fn load_config_file(&mut self, path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let includes = ConfigParser::load_from_path(self, path)?;
    self.loaded_config_sources.push(path.display().to_string());
    Ok(includes)
  }

  pub fn load_config(&mut self, values: Map<String, Value>, source: &str) -> Result<(), ConfigError> {
    ConfigParser::load(self, values, source)?;
    self.loaded_config_sources.push(source.to_string());
    Ok(())
  }

  /// Loads an agenda file, returning the files it included.
  pub fn load_agenda_file(&mut self, path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    AgendaParser::load_from_path(self, path)
  }

  pub fn load_agenda(&mut self, raw: Value, source: &str) -> Result<(), ConfigError> {
    AgendaParser::load(self, raw, source)
  }

  /// Resolves the device configuration once every source is loaded.
  pub fn finalize(&mut self) -> Result<(), ConfigError> {
    self.run_config.merge_device_config(&self.plugin_cache)?;
    tracing::debug!(device = %self.run_config.device(), "Finalized run configuration");
    Ok(())
  }

  pub fn job_specs(&mut self, target: &dyn TargetManager) -> Result<Vec<JobSpec>, ConfigError> {
    self.jobs_config.generate_job_specs(&self.plugin_cache, target)
  }

  /// Generates job specs and orders them into jobs. The execution order is
  /// validated before any spec is built.
  pub fn generate_jobs(&mut self, target: &dyn TargetManager, seed: Option<u64>) -> Result<Vec<Job>, ConfigError> {
    let order = self.run_config.execution_order()?;
    let specs = self.job_specs(target)?;
    self.run_config.augmentations = self.jobs_config.enabled_augmentations();
    let jobs = permute(order, specs, seed);
    tracing::info!(jobs = jobs.len(), order = %order, "Generated jobs");
    Ok(jobs)
  }
}
