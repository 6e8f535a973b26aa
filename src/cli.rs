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

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about = "Resolves benchmark agendas into ordered job sequences")]
pub struct Cli {
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Prints every job, in execution order, as one JSON object per line.
  Plan(PlanArgs),
  /// Prints the resolved job specs as a JSON array.
  Specs(PlanArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
  /// Agenda file (YAML or JSON) describing the workloads to run.
  pub agenda: PathBuf,

  /// Extra config file. May be given several times; later files win.
  #[arg(short, long = "config", value_name = "FILE")]
  pub configs: Vec<PathBuf>,

  /// Plugin manifest. Defaults to `plugins.toml` in the user directory.
  #[arg(long, env = "SWEEPLAB_PLUGINS", value_name = "FILE")]
  pub plugins: Option<PathBuf>,

  /// JSON settings file layered under `SWEEPLAB_*` environment variables.
  #[arg(long, env = "SWEEPLAB_SETTINGS", value_name = "FILE")]
  pub settings: Option<PathBuf>,

  /// Overrides the agenda's execution order
  /// (by_iteration, by_section, by_workload or random).
  #[arg(long)]
  pub execution_order: Option<String>,

  /// Only keep jobs whose id contains this. May be given several times.
  #[arg(long = "id", value_name = "ID")]
  pub ids: Vec<String>,

  /// Disables an augmentation for every job. May be given several times.
  #[arg(long = "disable", value_name = "NAME")]
  pub disable: Vec<String>,

  /// Seed for the random execution order.
  #[arg(long)]
  pub seed: Option<u64>,

  /// Skip `config.yaml` in the user directory.
  #[arg(long)]
  pub no_user_config: bool,
}
