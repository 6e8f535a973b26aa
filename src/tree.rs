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

//! The section/workload tree.
//!
//! Sections form levels: sections sharing a group label are siblings, and a
//! section with a different group nests under every existing leaf. Each leaf
//! is therefore one full combination of section overrides. Nodes live in an
//! arena addressed by [`NodeId`].

use crate::sweep::SweepSite;
use serde_json::Map;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

pub const GLOBAL_ID: &str = "global";

/// One workload's raw fragment, owned by the section it was declared in.
#[derive(Debug, Clone)]
pub struct WorkloadEntry {
  pub id: String,
  pub config: Map<String, Value>,
  pub sweeps: Vec<SweepSite>,
}

#[derive(Debug, Clone)]
pub struct SectionNode {
  pub id: String,
  pub config: Map<String, Value>,
  pub group: Option<String>,
  pub parent: Option<NodeId>,
  pub children: Vec<NodeId>,
  /// Group shared by every child of this node.
  pub child_group: Option<String>,
  pub workloads: Vec<WorkloadEntry>,
  pub sweeps: Vec<SweepSite>,
}

impl SectionNode {
  pub fn is_global(&self) -> bool {
    self.parent.is_none()
  }
}

/// Whether a fragment came from a section or a workload entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
  Global,
  Section,
  Workload,
}

/// An owned copy of one contributing source, in the order a job applies them.
#[derive(Debug, Clone)]
pub struct Fragment {
  pub id: String,
  pub kind: FragmentKind,
  pub group: Option<String>,
  pub config: Map<String, Value>,
  pub sweeps: Vec<SweepSite>,
}

impl Fragment {
  /// Label used when attributing errors to this fragment.
  pub fn name(&self) -> String {
    match self.kind {
      FragmentKind::Global => GLOBAL_ID.to_string(),
      FragmentKind::Section => format!("section {}", self.id),
      FragmentKind::Workload => format!("workload {}", self.id),
    }
  }
}

#[derive(Debug, Clone)]
pub struct JobTree {
  nodes: Vec<SectionNode>,
}

impl Default for JobTree {
  fn default() -> Self {
    Self::new(Map::new())
  }
}

impl JobTree {
  pub fn new(root_config: Map<String, Value>) -> Self {
    Self {
      nodes: vec![SectionNode {
        id: GLOBAL_ID.to_string(),
        config: root_config,
        group: None,
        parent: None,
        children: Vec::new(),
        child_group: None,
        workloads: Vec::new(),
        sweeps: Vec::new(),
      }],
    }
  }

  pub fn root(&self) -> NodeId {
    NodeId(0)
  }

  pub fn node(&self, id: NodeId) -> &SectionNode {
    &self.nodes[id.0]
  }

  pub fn node_mut(&mut self, id: NodeId) -> &mut SectionNode {
    &mut self.nodes[id.0]
  }

  /// Attaches a section under the first level whose group matches, copying
  /// it under every path when the group is new. Returns every created node.
  pub fn add_section(
    &mut self,
    id: &str,
    config: Map<String, Value>,
    group: Option<String>,
    sweeps: Vec<SweepSite>,
  ) -> Vec<NodeId> {
    self.attach(self.root(), id, &config, &group, &sweeps)
  }

  fn attach(
    &mut self,
    at: NodeId,
    id: &str,
    config: &Map<String, Value>,
    group: &Option<String>,
    sweeps: &[SweepSite],
  ) -> Vec<NodeId> {
    let node = &self.nodes[at.0];
    if node.children.is_empty() || node.child_group == *group {
      let new_id = NodeId(self.nodes.len());
      self.nodes.push(SectionNode {
        id: id.to_string(),
        config: config.clone(),
        group: group.clone(),
        parent: Some(at),
        children: Vec::new(),
        child_group: None,
        workloads: Vec::new(),
        sweeps: sweeps.to_vec(),
      });
      let parent = &mut self.nodes[at.0];
      parent.child_group = group.clone();
      parent.children.push(new_id);
      return vec![new_id];
    }
    let children = node.children.clone();
    children
      .into_iter()
      .flat_map(|child| self.attach(child, id, config, group, sweeps))
      .collect()
  }

  pub fn add_workload(&mut self, at: NodeId, entry: WorkloadEntry) {
    self.nodes[at.0].workloads.push(entry);
  }

  /// Childless nodes, left to right. The root is a leaf when it has no sections.
  pub fn leaves(&self) -> Vec<NodeId> {
    let mut leaves = Vec::new();
    self.collect_leaves(self.root(), &mut leaves);
    leaves
  }

  fn collect_leaves(&self, at: NodeId, out: &mut Vec<NodeId>) {
    let node = &self.nodes[at.0];
    if node.children.is_empty() {
      out.push(at);
    }
    for &child in &node.children {
      self.collect_leaves(child, out);
    }
  }

  /// Parents of `id`, nearest first.
  pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut current = self.nodes[id.0].parent;
    while let Some(parent) = current {
      out.push(parent);
      current = self.nodes[parent.0].parent;
    }
    out
  }

  pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    for &child in &self.nodes[id.0].children {
      out.push(child);
      out.extend(self.descendants(child));
    }
    out
  }

  /// Root to `leaf`, inclusive.
  pub fn chain(&self, leaf: NodeId) -> Vec<NodeId> {
    let mut chain = self.ancestors(leaf);
    chain.reverse();
    chain.push(leaf);
    chain
  }

  /// Section fragments of the chain ending at `leaf`, and the workload entries
  /// of every node on it (root's first).
  pub fn job_sources(&self, leaf: NodeId) -> (Vec<Fragment>, Vec<Fragment>) {
    let chain = self.chain(leaf);
    let sections = chain
      .iter()
      .map(|&id| {
        let node = &self.nodes[id.0];
        Fragment {
          id: node.id.clone(),
          kind: if node.is_global() {
            FragmentKind::Global
          } else {
            FragmentKind::Section
          },
          group: node.group.clone(),
          config: node.config.clone(),
          sweeps: node.sweeps.clone(),
        }
      })
      .collect();
    let entries = chain
      .iter()
      .flat_map(|&id| self.nodes[id.0].workloads.iter())
      .map(WorkloadEntry::to_fragment)
      .collect();
    (sections, entries)
  }
}

impl WorkloadEntry {
  pub fn to_fragment(&self) -> Fragment {
    Fragment {
      id: self.id.clone(),
      kind: FragmentKind::Workload,
      group: None,
      config: self.config.clone(),
      sweeps: self.sweeps.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ids(tree: &JobTree, nodes: &[NodeId]) -> Vec<String> {
    nodes.iter().map(|&n| tree.node(n).id.clone()).collect()
  }

  #[test]
  fn test_root_is_leaf_without_sections() {
    let tree = JobTree::default();
    assert_eq!(ids(&tree, &tree.leaves()), vec!["global"]);
  }

  #[test]
  fn test_ungrouped_sections_are_siblings() {
    let mut tree = JobTree::default();
    tree.add_section("s1", Map::new(), None, Vec::new());
    tree.add_section("s2", Map::new(), None, Vec::new());
    assert_eq!(ids(&tree, &tree.leaves()), vec!["s1", "s2"]);
  }

  #[test]
  fn test_groups_form_a_cross_product() {
    let mut tree = JobTree::default();
    tree.add_section("a1", Map::new(), Some("a".into()), Vec::new());
    tree.add_section("a2", Map::new(), Some("a".into()), Vec::new());
    let copies = tree.add_section("b1", Map::new(), Some("b".into()), Vec::new());
    assert_eq!(copies.len(), 2);
    tree.add_section("b2", Map::new(), Some("b".into()), Vec::new());

    let leaves = tree.leaves();
    assert_eq!(ids(&tree, &leaves), vec!["b1", "b2", "b1", "b2"]);
    let paths: Vec<Vec<String>> = leaves
      .iter()
      .map(|&leaf| ids(&tree, &tree.chain(leaf)))
      .collect();
    assert_eq!(paths[0], vec!["global", "a1", "b1"]);
    assert_eq!(paths[3], vec!["global", "a2", "b2"]);
    assert_eq!(tree.descendants(tree.root()).len(), 6);
  }

  #[test]
  fn test_workload_entries_collected_root_first() {
    let mut tree = JobTree::default();
    let root = tree.root();
    tree.add_workload(
      root,
      WorkloadEntry {
        id: "wk1".into(),
        config: Map::new(),
        sweeps: Vec::new(),
      },
    );
    let nodes = tree.add_section("s1", Map::new(), None, Vec::new());
    tree.add_workload(
      nodes[0],
      WorkloadEntry {
        id: "wk2".into(),
        config: Map::new(),
        sweeps: Vec::new(),
      },
    );
    let (sections, entries) = tree.job_sources(nodes[0]);
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].kind, FragmentKind::Global);
    let entry_ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(entry_ids, vec!["wk1", "wk2"]);
    assert_eq!(entries[1].name(), "workload wk2");
    assert_eq!(tree.ancestors(nodes[0]), vec![root]);
  }
}
