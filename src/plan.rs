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

//! The `plan` and `specs` commands: load everything, resolve, print.

use crate::cli::PlanArgs;
use crate::jobspec::JobSpec;
use crate::manager::ConfigManager;
use crate::plugins::DescribedTarget;
use crate::plugins::PluginRegistry;
use crate::settings::Settings;
use crate::value::ToggleSet;
use anyhow::Context;
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// One line of `plan` output.
#[derive(Debug, Serialize)]
struct PlannedJob<'a> {
  id: &'a str,
  iteration: u32,
  spec: &'a JobSpec,
}

/// Everything needed to generate jobs, loaded in priority order.
pub struct LoadedRun {
  pub state: ConfigManager,
  pub target: DescribedTarget,
}

fn load_registry(args: &PlanArgs, settings: &Settings) -> Result<PluginRegistry> {
  let mut registry = PluginRegistry::new();
  let primary = match &args.plugins {
    Some(path) => Some(path.clone()),
    None => Some(settings.user_plugins_file()).filter(|p| p.is_file()),
  };
  for path in primary.iter().chain(&settings.extra_plugin_paths) {
    tracing::info!(manifest = %path.display(), "Loading plugin manifest");
    registry.load(path)?;
  }
  Ok(registry)
}

fn echo_includes(kind: &str, includes: &[PathBuf]) {
  let cwd = std::env::current_dir().unwrap_or_default();
  for path in includes {
    let shown = pathdiff::diff_paths(path, &cwd).unwrap_or_else(|| path.clone());
    tracing::info!("Included {} file: {}", kind, shown.display());
  }
}

/// Loads settings, plugins, config files and the agenda.
pub fn load_run(args: &PlanArgs) -> Result<LoadedRun> {
  let span = tracing::info_span!("load", agenda = %args.agenda.display());
  let _enter = span.enter();

  let settings = Settings::load(args.settings.as_deref()).context("Failed to load settings")?;
  let registry = Arc::new(load_registry(args, &settings)?);
  let mut state = ConfigManager::new(settings, registry.clone());

  let user_config = state.settings.user_config_file();
  if !args.no_user_config && user_config.is_file() {
    tracing::info!(path = %user_config.display(), "Loading user config");
    let includes = state.load_config_file(&user_config)?;
    echo_includes("config", &includes);
  }
  for path in &args.configs {
    tracing::info!(path = %path.display(), "Loading config file");
    let includes = state.load_config_file(path)?;
    echo_includes("config", &includes);
  }
  if let Some(order) = &args.execution_order {
    let mut overrides = serde_json::Map::new();
    overrides.insert("execution_order".to_string(), Value::String(order.clone()));
    state.load_config(overrides, "command line")?;
  }

  tracing::info!("Loading agenda");
  let includes = state.load_agenda_file(&args.agenda)?;
  echo_includes("agenda", &includes);

  if !args.ids.is_empty() {
    state.jobs_config.only_run_ids(args.ids.iter().cloned());
  }
  if !args.disable.is_empty() {
    let disabled = ToggleSet::from_entries(args.disable.iter().map(|name| format!("~{}", name.trim_start_matches('~'))));
    state.jobs_config.disable_augmentations(&disabled)?;
  }
  state.finalize()?;

  let target = DescribedTarget::from_registry(&registry, state.run_config.device())?;
  Ok(LoadedRun { state, target })
}

/// Prints every job as a JSON line, in execution order.
pub fn run_plan(args: &PlanArgs) -> Result<()> {
  let LoadedRun { mut state, target } = load_run(args)?;
  tracing::info!("--- Generating jobs ---");
  let jobs = state.generate_jobs(&target, args.seed)?;
  for job in &jobs {
    let line = PlannedJob {
      id: job.id(),
      iteration: job.iteration,
      spec: &job.spec,
    };
    println!("{}", serde_json::to_string(&line)?);
  }
  tracing::info!(
    jobs = jobs.len(),
    augmentations = %state.run_config.augmentations,
    "--- Plan complete ---"
  );
  Ok(())
}

/// Prints the resolved job specs, before ordering, as a JSON array.
pub fn run_specs(args: &PlanArgs) -> Result<()> {
  let LoadedRun { mut state, target } = load_run(args)?;
  let specs = state.job_specs(&target)?;
  println!("{}", serde_json::to_string_pretty(&specs)?);
  tracing::info!(specs = specs.len(), "--- Specs resolved ---");
  Ok(())
}

