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

use Commands::Plan;
use Commands::Specs;
use anyhow::Result;
use clap::Parser;
use sweeplab::cli::Cli;
use sweeplab::cli::Commands;
use sweeplab::logging::setup_tracing;
use sweeplab::plan::run_plan;
use sweeplab::plan::run_specs;

fn main() -> Result<()> {
  let _guard = setup_tracing()?;

  let Cli { command } = Cli::parse();
  let main_span = tracing::info_span!("sweeplab");
  let _enter = main_span.enter();

  match command {
    Plan(args) => {
      tracing::info!("Planning run for {}", args.agenda.display());
      run_plan(&args)?;
    }
    Specs(args) => {
      tracing::info!("Resolving job specs for {}", args.agenda.display());
      run_specs(&args)?;
    }
  }

  Ok(())
}
