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

//! # Sweeplab
//!
//! `sweeplab` resolves declarative benchmark agendas into ordered,
//! fully-specified job sequences. An agenda names workloads, groups them into
//! sections, and may sweep parameters across several values; config files
//! layer defaults and plugin settings underneath it. The result is a list of
//! `(job spec, iteration)` pairs ready for an executor.
//!
//! This crate contains the library behind the `swp` CLI, but its core modules
//! can be driven directly through [`manager::ConfigManager`].
//!
//! ## Core Modules
//!
//! * [`manager`]: The `ConfigManager` façade. Loads config files and agendas
//!   in priority order, then finalizes and generates jobs.
//! * [`parsers`]: YAML loading, `include#` resolution, and the config/agenda
//!   parsers that route every key to its destination.
//! * [`point`] and [`configuration`]: Typed configuration points, the
//!   run-wide and per-job tables built from them.
//! * [`plugin_cache`]: Per-source plugin configuration with simple and
//!   generic/specific merging.
//! * [`tree`]: The section/workload tree, where section groups form a cross
//!   product.
//! * [`sweep`]: `sweep(<handler>)` markers and their Cartesian expansion.
//! * [`jobspec`] and [`generator`]: Building one job spec per tree leaf,
//!   workload entry and sweep combination.
//! * [`permute`]: Execution orders for the generated specs.
//! * [`plugins`]: The plugin manifest, plus the resolver and target traits the
//!   pipeline queries.
//! * [`settings`]: Layered user settings.
//! * [`cli`] and [`plan`]: The `clap`-based command-line interface and its
//!   commands.
//! * [`error`]: Defines the custom error types for the library.
//! * [`logging`]: Provides the `setup_tracing` utility.

pub mod cli;
pub mod configuration;
pub mod error;
pub mod generator;
pub mod jobspec;
pub mod logging;
pub mod manager;
pub mod parsers;
pub mod permute;
pub mod plan;
pub mod plugin_cache;
pub mod plugins;
pub mod point;
pub mod settings;
pub mod sweep;
pub mod tree;
pub mod value;
