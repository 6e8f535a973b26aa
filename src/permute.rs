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

//! Orders job specs and their iterations into the final job list.

use crate::configuration::EXECUTION_ORDERS;
use crate::error::ConfigError;
use crate::jobspec::JobSpec;
use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOrder {
  /// One iteration of every spec, grouped by workload id, then the next.
  ByIteration,
  /// Like `ByIteration`, grouped by section id.
  BySection,
  /// Every iteration of a spec before moving on.
  ByWorkload,
  Random,
}

impl ExecutionOrder {
  pub fn name(self) -> &'static str {
    match self {
      Self::ByIteration => "by_iteration",
      Self::BySection => "by_section",
      Self::ByWorkload => "by_workload",
      Self::Random => "random",
    }
  }
}

impl fmt::Display for ExecutionOrder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for ExecutionOrder {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "by_iteration" => Ok(Self::ByIteration),
      "by_section" => Ok(Self::BySection),
      "by_workload" => Ok(Self::ByWorkload),
      "random" => Ok(Self::Random),
      other => Err(ConfigError::UnknownExecutionOrder {
        name: other.to_string(),
        allowed: EXECUTION_ORDERS.to_vec(),
      }),
    }
  }
}

/// One iteration of a spec. Iterations are numbered from 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
  pub spec: Arc<JobSpec>,
  pub iteration: u32,
}

impl Job {
  pub fn id(&self) -> &str {
    &self.spec.id
  }
}

fn generate_seed() -> u64 {
  let mut rng = rand::rng();
  rng.next_u64()
}

/// Expands `specs` into jobs in the requested order. `seed` only affects
/// [`ExecutionOrder::Random`]; a fresh one is drawn when absent.
pub fn permute(order: ExecutionOrder, specs: Vec<JobSpec>, seed: Option<u64>) -> Vec<Job> {
  let specs: Vec<Arc<JobSpec>> = specs.into_iter().map(Arc::new).collect();
  match order {
    ExecutionOrder::ByWorkload => sequential(&specs),
    ExecutionOrder::ByIteration => interleave(bucket(&specs, JobSpec::workload_id)),
    ExecutionOrder::BySection => interleave(bucket(&specs, JobSpec::section_id)),
    ExecutionOrder::Random => {
      let seed = seed.unwrap_or_else(generate_seed);
      tracing::info!(seed, "Shuffling jobs");
      let mut jobs = sequential(&specs);
      let mut rng = StdRng::seed_from_u64(seed);
      jobs.shuffle(&mut rng);
      jobs
    }
  }
}

fn sequential(specs: &[Arc<JobSpec>]) -> Vec<Job> {
  specs
    .iter()
    .flat_map(|spec| {
      (1..=spec.iterations).map(|iteration| Job {
        spec: Arc::clone(spec),
        iteration,
      })
    })
    .collect()
}

/// Groups specs by `key`, groups ordered by first appearance.
fn bucket(specs: &[Arc<JobSpec>], key: fn(&JobSpec) -> &str) -> Vec<Arc<JobSpec>> {
  let mut groups: Vec<(String, Vec<Arc<JobSpec>>)> = Vec::new();
  for spec in specs {
    let k = key(spec);
    match groups.iter_mut().find(|(name, _)| name == k) {
      Some((_, members)) => members.push(Arc::clone(spec)),
      None => groups.push((k.to_string(), vec![Arc::clone(spec)])),
    }
  }
  groups.into_iter().flat_map(|(_, members)| members).collect()
}

/// Iteration `i` of every spec that has one, for `i` in `1..=max`.
fn interleave(specs: Vec<Arc<JobSpec>>) -> Vec<Job> {
  let max = specs.iter().map(|s| s.iterations).max().unwrap_or(0);
  let mut jobs = Vec::new();
  for iteration in 1..=max {
    for spec in specs.iter().filter(|s| s.iterations >= iteration) {
      jobs.push(Job {
        spec: Arc::clone(spec),
        iteration,
      });
    }
  }
  jobs
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::ToggleSet;
  use serde_json::Map;

  fn spec(id: &str, iterations: u32) -> JobSpec {
    JobSpec {
      id: id.to_string(),
      iterations,
      workload_name: "idle".to_string(),
      workload_parameters: Map::new(),
      runtime_parameters: Map::new(),
      boot_parameters: Map::new(),
      label: "idle".to_string(),
      augmentations: ToggleSet::new(),
      flash: Map::new(),
      classifiers: Map::new(),
    }
  }

  fn specs() -> Vec<JobSpec> {
    vec![spec("s1-wk1", 2), spec("s1-wk2", 1), spec("s2-wk1", 2)]
  }

  fn order(jobs: &[Job]) -> Vec<String> {
    jobs.iter().map(|j| format!("{}#{}", j.id(), j.iteration)).collect()
  }

  #[test]
  fn test_by_workload() {
    let jobs = permute(ExecutionOrder::ByWorkload, specs(), None);
    assert_eq!(order(&jobs), vec!["s1-wk1#1", "s1-wk1#2", "s1-wk2#1", "s2-wk1#1", "s2-wk1#2"]);
  }

  #[test]
  fn test_by_iteration_groups_workloads() {
    let jobs = permute(ExecutionOrder::ByIteration, specs(), None);
    assert_eq!(order(&jobs), vec!["s1-wk1#1", "s2-wk1#1", "s1-wk2#1", "s1-wk1#2", "s2-wk1#2"]);
  }

  #[test]
  fn test_by_section() {
    let jobs = permute(ExecutionOrder::BySection, specs(), None);
    assert_eq!(order(&jobs), vec!["s1-wk1#1", "s1-wk2#1", "s2-wk1#1", "s1-wk1#2", "s2-wk1#2"]);
  }

  #[test]
  fn test_random_is_seeded() {
    let first = permute(ExecutionOrder::Random, specs(), Some(7));
    let second = permute(ExecutionOrder::Random, specs(), Some(7));
    assert_eq!(order(&first), order(&second));
    let mut sorted = order(&first);
    sorted.sort();
    assert_eq!(sorted, vec!["s1-wk1#1", "s1-wk1#2", "s1-wk2#1", "s2-wk1#1", "s2-wk1#2"]);
  }

  #[test]
  fn test_parse_order() {
    assert_eq!("by_section".parse::<ExecutionOrder>().unwrap(), ExecutionOrder::BySection);
    let err = "sideways".parse::<ExecutionOrder>().unwrap_err();
    assert!(err.to_string().contains("sideways"));
  }

  #[test]
  fn test_zero_iterations_yield_no_jobs() {
    assert!(permute(ExecutionOrder::ByIteration, vec![spec("wk1", 0)], None).is_empty());
  }
}
