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

//! Value kinds, coercion and merge rules shared by every configuration layer.

use crate::error::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::fmt;

/// The closed set of coercers a [`ConfigurationPoint`](crate::point::ConfigurationPoint)
/// may use to turn raw document data into a typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
  #[default]
  Str,
  Integer,
  Float,
  Boolean,
  Identifier,
  ListOfStrings,
  List,
  Dict,
  ToggleSet,
  Path,
  Any,
}

impl Kind {
  /// Human readable name, used in "must be an integer" style messages.
  pub fn type_name(self) -> &'static str {
    match self {
      Kind::Str => "str",
      Kind::Integer => "integer",
      Kind::Float => "float",
      Kind::Boolean => "boolean",
      Kind::Identifier => "identifier",
      Kind::ListOfStrings => "list_of_strings",
      Kind::List => "list",
      Kind::Dict => "dict",
      Kind::ToggleSet => "toggle_set",
      Kind::Path => "path",
      Kind::Any => "value",
    }
  }

  pub fn is_list(self) -> bool {
    matches!(self, Kind::ListOfStrings | Kind::List | Kind::ToggleSet)
  }

  /// "an integer", "a boolean", ...
  pub fn expected(self) -> String {
    let name = self.type_name();
    let article = match name.chars().next() {
      Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
      _ => "a",
    };
    format!("{} {}", article, name)
  }

  /// Coerces `raw` into this kind. `None` means the value is not representable.
  pub fn coerce(self, raw: &Value) -> Option<Value> {
    match self {
      Kind::Any => Some(raw.clone()),
      Kind::Str => scalar_to_string(raw).map(Value::String),
      Kind::Path => scalar_to_string(raw).map(|s| Value::String(expand_home(&s))),
      Kind::Identifier => scalar_to_string(raw).map(|s| Value::String(identifier(&s))),
      Kind::Integer => coerce_integer(raw).map(Value::from),
      Kind::Float => match raw {
        Value::Number(n) => n.as_f64().map(Value::from),
        Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
        _ => None,
      },
      Kind::Boolean => coerce_boolean(raw).map(Value::Bool),
      Kind::ListOfStrings => match raw {
        Value::Array(items) => items
          .iter()
          .map(|v| scalar_to_string(v).map(Value::String))
          .collect::<Option<Vec<_>>>()
          .map(Value::Array),
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
          scalar_to_string(raw).map(|s| Value::Array(vec![Value::String(s)]))
        }
        _ => None,
      },
      Kind::List => match raw {
        Value::Array(_) => Some(raw.clone()),
        Value::Null | Value::Object(_) => None,
        other => Some(Value::Array(vec![other.clone()])),
      },
      Kind::Dict => match raw {
        Value::Object(_) => Some(raw.clone()),
        _ => None,
      },
      Kind::ToggleSet => match raw {
        Value::Array(items) => items
          .iter()
          .map(|v| v.as_str().map(str::to_string))
          .collect::<Option<Vec<_>>>()
          .map(|entries| ToggleSet::from_entries(entries).to_value()),
        _ => None,
      },
    }
  }
}

impl fmt::Display for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.type_name())
  }
}

fn scalar_to_string(raw: &Value) -> Option<String> {
  match raw {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn coerce_integer(raw: &Value) -> Option<i64> {
  match raw {
    Value::Number(n) => n.as_i64().or_else(|| {
      n.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
    }),
    Value::String(s) => {
      let s = s.trim();
      s.parse::<i64>()
        .ok()
        .or_else(|| s.strip_prefix("0x").and_then(|h| i64::from_str_radix(h, 16).ok()))
    }
    Value::Bool(b) => Some(i64::from(*b)),
    _ => None,
  }
}

fn coerce_boolean(raw: &Value) -> Option<bool> {
  match raw {
    Value::Bool(b) => Some(*b),
    Value::Number(n) => n.as_f64().map(|f| f != 0.0),
    Value::String(s) => match s.trim().to_lowercase().as_str() {
      "true" | "yes" | "y" | "on" | "1" => Some(true),
      "false" | "no" | "n" | "off" | "0" | "" => Some(false),
      _ => None,
    },
    _ => None,
  }
}

/// Replaces anything that is not alphanumeric with an underscore.
pub fn identifier(text: &str) -> String {
  text
    .chars()
    .map(|c| if c.is_alphanumeric() { c } else { '_' })
    .collect()
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> String {
  match (path.strip_prefix('~'), std::env::var("HOME")) {
    (Some(rest), Ok(home)) if rest.is_empty() || rest.starts_with('/') => format!("{}{}", home, rest),
    _ => path.to_string(),
  }
}

/// Compact rendering used in error messages: strings unquoted, the rest as JSON.
pub fn display_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Numeric view of a value, accepting numeric strings.
pub fn as_number(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse::<f64>().ok(),
    _ => None,
  }
}

/// Merges two configuration values, `other` taking precedence.
///
/// Scalars overwrite, sequences concatenate, mappings overlay, a scalar or
/// mapping combined with a sequence joins the sequence, and `null` on either
/// side yields the other side. A mapping never merges with a scalar.
pub fn merge_config_values(base: &Value, other: &Value) -> Result<Value, ConfigError> {
  match (base, other) {
    (_, Value::Null) => Ok(base.clone()),
    (Value::Null, _) => Ok(other.clone()),
    (Value::Array(a), Value::Array(b)) => Ok(Value::Array(a.iter().chain(b).cloned().collect())),
    (Value::Object(a), Value::Object(b)) => {
      let mut merged = a.clone();
      for (k, v) in b {
        merged.insert(k.clone(), v.clone());
      }
      Ok(Value::Object(merged))
    }
    (Value::Array(a), single) => {
      let mut merged = a.clone();
      merged.push(single.clone());
      Ok(Value::Array(merged))
    }
    (single, Value::Array(b)) => {
      let mut merged = vec![single.clone()];
      merged.extend(b.iter().cloned());
      Ok(Value::Array(merged))
    }
    (Value::Object(_), _) | (_, Value::Object(_)) => Err(ConfigError::Unmergeable {
      base: base.to_string(),
      other: other.to_string(),
    }),
    (_, scalar) => Ok(scalar.clone()),
  }
}

/// Overlays every key of `other` onto `base` (shallow).
pub fn overlay(base: &mut Map<String, Value>, other: &Map<String, Value>) {
  for (k, v) in other {
    base.insert(k.clone(), v.clone());
  }
}

/// A set of names to enable, or (prefixed with `~`) to disable.
///
/// Adding `x` removes a previous `~x` and vice versa. Merging a set containing
/// `~~` replaces the destination entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ToggleSet {
  entries: Vec<String>,
}

pub const TOGGLE_RESET: &str = "~~";

impl ToggleSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_entries<I, S>(entries: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut set = Self::new();
    for entry in entries {
      set.add(entry.into());
    }
    set
  }

  /// Reads a toggle set out of a JSON array of strings.
  pub fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Null => Some(Self::new()),
      Value::Array(items) => items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .map(Self::from_entries),
      _ => None,
    }
  }

  pub fn to_value(&self) -> Value {
    Value::Array(self.entries.iter().cloned().map(Value::String).collect())
  }

  pub fn add(&mut self, item: String) {
    if self.entries.contains(&item) {
      return;
    }
    let opposite = match item.strip_prefix('~') {
      Some(name) if item != TOGGLE_RESET => name.to_string(),
      Some(_) => String::new(),
      None => format!("~{}", item),
    };
    self.entries.retain(|e| *e != opposite);
    self.entries.push(item);
  }

  pub fn contains(&self, item: &str) -> bool {
    self.entries.iter().any(|e| e == item)
  }

  pub fn merge_with(&self, other: &ToggleSet) -> ToggleSet {
    if other.contains(TOGGLE_RESET) {
      return other.clone();
    }
    let mut merged = self.clone();
    for item in &other.entries {
      merged.add(item.clone());
    }
    merged
  }

  pub fn union(&self, other: &ToggleSet) -> ToggleSet {
    let mut merged = self.clone();
    for item in &other.entries {
      if !merged.entries.contains(item) {
        merged.entries.push(item.clone());
      }
    }
    merged
  }

  /// Enabled names, in insertion order.
  pub fn values(&self) -> Vec<&str> {
    self
      .entries
      .iter()
      .filter(|e| !e.starts_with('~'))
      .map(String::as_str)
      .collect()
  }

  pub fn entries(&self) -> &[String] {
    &self.entries
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Items of `other` that enable what this set disables, or the reverse.
  pub fn conflicts_with(&self, other: &ToggleSet) -> Vec<String> {
    other
      .entries
      .iter()
      .filter(|item| match item.strip_prefix('~') {
        Some(name) => self.contains(name),
        None => self.contains(&format!("~{}", item)),
      })
      .cloned()
      .collect()
  }
}

impl From<Vec<String>> for ToggleSet {
  fn from(entries: Vec<String>) -> Self {
    Self::from_entries(entries)
  }
}

impl From<ToggleSet> for Vec<String> {
  fn from(set: ToggleSet) -> Self {
    set.entries
  }
}

impl fmt::Display for ToggleSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}]", self.entries.join(", "))
  }
}
