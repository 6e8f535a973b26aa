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

//! Typed configuration points.
//!
//! A [`ConfigurationPoint`] describes one named setting: how raw values are
//! coerced ([`Kind`]), what it defaults to, which values are acceptable and
//! whether repeated assignments overwrite or merge. Points never own the value
//! they describe; they write into a caller supplied `Map`.

use crate::error::ConfigError;
use crate::value::Kind;
use crate::value::ToggleSet;
use crate::value::display_value;
use crate::value::identifier;
use crate::value::merge_config_values;
use serde_json::Map;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Predicate = dyn Fn(&Value) -> bool + Send + Sync;

/// A validation predicate plus an optional message template.
///
/// The template may reference `{value}`, `{param}` and `{plugin}`.
#[derive(Clone)]
pub struct Constraint {
  check: Arc<Predicate>,
  message: Option<String>,
}

impl Constraint {
  pub fn new(check: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
    Self {
      check: Arc::new(check),
      message: None,
    }
  }

  pub fn with_message(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }

  /// Inclusive numeric bounds, as declared in plugin manifests.
  pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
    let message = match (min, max) {
      (Some(lo), Some(hi)) => format!("\"{{value}}\" for \"{{param}}\" in \"{{plugin}}\" must be between {} and {}", lo, hi),
      (Some(lo), None) => format!("\"{{value}}\" for \"{{param}}\" in \"{{plugin}}\" must be at least {}", lo),
      (None, Some(hi)) => format!("\"{{value}}\" for \"{{param}}\" in \"{{plugin}}\" must be at most {}", hi),
      (None, None) => String::from("\"{value}\" failed constraint validation for \"{param}\" in \"{plugin}\"."),
    };
    Self::new(move |v| match crate::value::as_number(v) {
      Some(n) => min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi),
      None => false,
    })
    .with_message(message)
  }

  fn check(&self, param: &str, owner: &str, value: &Value) -> Result<(), ConfigError> {
    if (self.check)(value) {
      return Ok(());
    }
    let template = self
      .message
      .as_deref()
      .unwrap_or("\"{value}\" failed constraint validation for \"{param}\" in \"{plugin}\".");
    Err(ConfigError::ConstraintFailed {
      message: template
        .replace("{value}", &display_value(value))
        .replace("{param}", param)
        .replace("{plugin}", owner),
    })
  }
}

impl fmt::Debug for Constraint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Constraint")
      .field("message", &self.message)
      .finish_non_exhaustive()
  }
}

/// A named, typed and validated configuration slot.
#[derive(Debug, Clone)]
pub struct ConfigurationPoint {
  pub name: String,
  pub kind: Kind,
  pub mandatory: bool,
  pub default: Option<Value>,
  pub override_: bool,
  pub allowed_values: Option<Vec<Value>>,
  pub description: Option<String>,
  pub constraint: Option<Constraint>,
  pub merge: bool,
  pub aliases: Vec<String>,
  pub global_alias: Option<String>,
  pub deprecated: bool,
}

impl ConfigurationPoint {
  pub fn new(name: &str) -> Self {
    Self {
      name: identifier(name),
      kind: Kind::Str,
      mandatory: false,
      default: None,
      override_: false,
      allowed_values: None,
      description: None,
      constraint: None,
      merge: false,
      aliases: Vec::new(),
      global_alias: None,
      deprecated: false,
    }
  }

  pub fn kind(mut self, kind: Kind) -> Self {
    self.kind = kind;
    self
  }

  pub fn mandatory(mut self) -> Self {
    self.mandatory = true;
    self
  }

  pub fn default(mut self, value: Value) -> Self {
    self.default = Some(value);
    self
  }

  pub fn allowed_values<I, V>(mut self, values: I) -> Self
  where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
  {
    self.allowed_values = Some(values.into_iter().map(Into::into).collect());
    self
  }

  pub fn constraint(mut self, constraint: Constraint) -> Self {
    self.constraint = Some(constraint);
    self
  }

  pub fn merge(mut self) -> Self {
    self.merge = true;
    self
  }

  pub fn aliases<I, S>(mut self, aliases: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.aliases = aliases.into_iter().map(Into::into).collect();
    self
  }

  pub fn global_alias(mut self, alias: impl Into<String>) -> Self {
    self.global_alias = Some(alias.into());
    self
  }

  pub fn deprecated(mut self) -> Self {
    self.deprecated = true;
    self
  }

  pub fn description(mut self, text: impl Into<String>) -> Self {
    self.description = Some(text.into());
    self
  }

  /// Checks the definition itself: a supplied default must be plain data
  /// that passes the point's own validation.
  pub fn checked(self) -> Result<Self, ConfigError> {
    if let Some(default) = &self.default {
      let coerced = self.kind.coerce(default).ok_or_else(|| ConfigError::BadValue {
        value: display_value(default),
        param: self.name.clone(),
        expected: self.kind.expected(),
      })?;
      self
        .validate_value("init", &coerced)
        .map_err(|e| ConfigError::Invalid(format!("Default value \"{}\" is not valid: {}", display_value(default), e)))?;
    }
    Ok(self)
  }

  pub fn matches(&self, name: &str) -> bool {
    self.name == name || self.aliases.iter().any(|a| a == name) || self.global_alias.as_deref() == Some(name)
  }

  /// Every name this point answers to within a fragment (global alias excluded).
  pub fn names(&self) -> impl Iterator<Item = &str> {
    std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
  }

  /// Coerces and validates `value` (or the default when `None`/null), then
  /// stores it under the point's name, merging with a present value when the
  /// point is flagged `merge`.
  pub fn set_value(
    &self,
    target: &mut Map<String, Value>,
    owner: &str,
    value: Option<&Value>,
    check_mandatory: bool,
  ) -> Result<(), ConfigError> {
    let value = value.filter(|v| !v.is_null());

    if self.deprecated {
      if let Some(v) = value {
        tracing::warn!(
          param = %self.name,
          %owner,
          value = %display_value(v),
          "Deprecated parameter supplied; the value will be ignored"
        );
      }
      return Ok(());
    }

    let coerced = match value {
      None => match &self.default {
        Some(default) => self.coerce(default)?,
        None if check_mandatory && self.mandatory => {
          return Err(ConfigError::MissingMandatory {
            param: self.name.clone(),
            owner: owner.to_string(),
          });
        }
        None => Value::Null,
      },
      Some(v) => self.coerce(v)?,
    };

    if !coerced.is_null() {
      self.validate_value(owner, &coerced)?;
    }

    let stored = match target.get(&self.name) {
      Some(existing) if self.merge => self.merge_values(existing, &coerced)?,
      _ => coerced,
    };
    target.insert(self.name.clone(), stored);
    Ok(())
  }

  fn coerce(&self, raw: &Value) -> Result<Value, ConfigError> {
    self.kind.coerce(raw).ok_or_else(|| ConfigError::BadValue {
      value: display_value(raw),
      param: self.name.clone(),
      expected: self.kind.expected(),
    })
  }

  fn merge_values(&self, existing: &Value, new: &Value) -> Result<Value, ConfigError> {
    if self.kind == Kind::ToggleSet {
      if let (Some(a), Some(b)) = (ToggleSet::from_value(existing), ToggleSet::from_value(new)) {
        return Ok(a.merge_with(&b).to_value());
      }
    }
    merge_config_values(existing, new)
  }

  /// Re-validates the value currently held in `target`.
  pub fn validate(&self, target: &Map<String, Value>, owner: &str, check_mandatory: bool) -> Result<(), ConfigError> {
    if self.deprecated {
      return Ok(());
    }
    match target.get(&self.name).filter(|v| !v.is_null()) {
      Some(value) => self.validate_value(owner, value),
      None if check_mandatory && self.mandatory => Err(ConfigError::MissingMandatory {
        param: self.name.clone(),
        owner: owner.to_string(),
      }),
      None => Ok(()),
    }
  }

  /// Allowed-values and constraint checks, each applied independently.
  pub fn validate_value(&self, owner: &str, value: &Value) -> Result<(), ConfigError> {
    if let Some(allowed) = self.allowed_values.as_ref().filter(|a| !a.is_empty()) {
      let candidates: Vec<&Value> = match value {
        Value::Array(items) if self.kind.is_list() => items.iter().collect(),
        other => vec![other],
      };
      for candidate in candidates {
        if !allowed.iter().any(|a| loosely_equal(a, candidate)) {
          return Err(ConfigError::NotAllowed {
            value: display_value(candidate),
            param: self.name.clone(),
            owner: owner.to_string(),
            allowed: Value::Array(allowed.clone()).to_string(),
          });
        }
      }
    }
    if let Some(constraint) = &self.constraint {
      constraint.check(&self.name, owner, value)?;
    }
    Ok(())
  }
}

/// Numbers compare by value so `1` from YAML equals `1.0` from a manifest.
fn loosely_equal(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
    _ => a == b,
  }
}

/// An ordered name→point table with alias lookup.
#[derive(Debug, Clone, Default)]
pub struct PointMap {
  points: Vec<ConfigurationPoint>,
  index: HashMap<String, usize>,
}

impl PointMap {
  pub fn new(points: Vec<ConfigurationPoint>) -> Self {
    let mut index = HashMap::new();
    for (i, point) in points.iter().enumerate() {
      for name in point.names() {
        index.entry(name.to_string()).or_insert(i);
      }
    }
    Self { points, index }
  }

  /// Looks a point up by its name or one of its aliases.
  pub fn get(&self, name: &str) -> Option<&ConfigurationPoint> {
    self.index.get(name).map(|&i| &self.points[i])
  }

  pub fn contains(&self, name: &str) -> bool {
    self.index.contains_key(name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &ConfigurationPoint> {
    self.points.iter()
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  /// Canonical name for `name` if it is a known name or alias.
  pub fn canonical(&self, name: &str) -> Option<&str> {
    self.get(name).map(|p| p.name.as_str())
  }
}

/// Pops the value for `point` out of `raw`, accepting its name or any alias.
/// Supplying the same point under two names in one fragment is an error.
pub fn pop_aliased_param(point: &ConfigurationPoint, raw: &mut Map<String, Value>) -> Result<Option<Value>, ConfigError> {
  let present: Vec<String> = point
    .names()
    .filter(|n| raw.contains_key(*n))
    .map(str::to_string)
    .collect();
  match present.as_slice() {
    [] => Ok(None),
    [single] => Ok(raw.shift_remove(single)),
    _ => Err(ConfigError::AmbiguousAlias {
      names: point.names().map(str::to_string).collect(),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_default_applied_and_coerced() {
    let point = ConfigurationPoint::new("iterations").kind(Kind::Integer).default(json!("3"));
    let mut target = Map::new();
    point.set_value(&mut target, "test", None, true).unwrap();
    assert_eq!(target["iterations"], json!(3));
  }

  #[test]
  fn test_mandatory_missing() {
    let point = ConfigurationPoint::new("workload_name").mandatory();
    let mut target = Map::new();
    let err = point.set_value(&mut target, "job", None, true).unwrap_err();
    assert!(err.to_string().contains("mandatory parameter \"workload_name\""));
    // Without the mandatory check the slot is simply cleared.
    point.set_value(&mut target, "job", None, false).unwrap();
    assert_eq!(target["workload_name"], Value::Null);
  }

  #[test]
  fn test_bad_kind_names_expected_type() {
    let point = ConfigurationPoint::new("threads").kind(Kind::Integer);
    let mut target = Map::new();
    let err = point
      .set_value(&mut target, "dhrystone", Some(&json!("many")), true)
      .unwrap_err();
    assert_eq!(err.to_string(), "Bad value \"many\" for threads; must be an integer");
  }

  #[test]
  fn test_allowed_values_and_constraint_are_independent() {
    let point = ConfigurationPoint::new("threads")
      .kind(Kind::Integer)
      .allowed_values([1, 2, 4, 8])
      .constraint(Constraint::new(|v| v.as_i64().is_some_and(|n| n < 8)).with_message("{value} too big for {param}"));
    let mut target = Map::new();
    point.set_value(&mut target, "w", Some(&json!(4)), true).unwrap();
    assert!(matches!(
      point.set_value(&mut target, "w", Some(&json!(3)), true),
      Err(ConfigError::NotAllowed { .. })
    ));
    let err = point.set_value(&mut target, "w", Some(&json!(8)), true).unwrap_err();
    assert_eq!(err.to_string(), "8 too big for threads");
  }

  #[test]
  fn test_list_allowed_values_checked_per_element() {
    let point = ConfigurationPoint::new("retry_on_status")
      .kind(Kind::ListOfStrings)
      .allowed_values(["OK", "FAILED", "PARTIAL"]);
    let mut target = Map::new();
    point
      .set_value(&mut target, "run", Some(&json!(["FAILED", "PARTIAL"])), true)
      .unwrap();
    assert!(
      point
        .set_value(&mut target, "run", Some(&json!(["FAILED", "BROKEN"])), true)
        .is_err()
    );
  }

  #[test]
  fn test_merge_flag_combines_values() {
    let point = ConfigurationPoint::new("classifiers").kind(Kind::Dict).merge();
    let mut target = Map::new();
    point.set_value(&mut target, "job", Some(&json!({"a": 1})), true).unwrap();
    point.set_value(&mut target, "job", Some(&json!({"b": 2})), true).unwrap();
    assert_eq!(target["classifiers"], json!({"a": 1, "b": 2}));

    let toggles = ConfigurationPoint::new("augmentations").kind(Kind::ToggleSet).merge();
    toggles.set_value(&mut target, "job", Some(&json!(["trace"])), true).unwrap();
    toggles.set_value(&mut target, "job", Some(&json!(["~trace", "csv"])), true).unwrap();
    assert_eq!(target["augmentations"], json!(["~trace", "csv"]));
  }

  #[test]
  fn test_deprecated_discards_silently() {
    let point = ConfigurationPoint::new("old").kind(Kind::Integer).deprecated();
    let mut target = Map::new();
    point.set_value(&mut target, "w", Some(&json!("not a number")), true).unwrap();
    assert!(!target.contains_key("old"));
  }

  #[test]
  fn test_invalid_default_rejected() {
    let point = ConfigurationPoint::new("mode").allowed_values(["fast", "slow"]).default(json!("medium"));
    assert!(point.checked().is_err());
    let ok = ConfigurationPoint::new("mode").allowed_values(["fast", "slow"]).default(json!("fast"));
    assert!(ok.checked().is_ok());
  }

  #[test]
  fn test_pop_aliased_param() {
    let point = ConfigurationPoint::new("workload_parameters").aliases(["params", "workload_params"]);
    let mut raw = json!({"params": {"a": 1}, "other": 2}).as_object().cloned().unwrap();
    assert_eq!(pop_aliased_param(&point, &mut raw).unwrap(), Some(json!({"a": 1})));
    assert!(!raw.contains_key("params"));

    let mut ambiguous = json!({"params": {}, "workload_params": {}}).as_object().cloned().unwrap();
    assert!(matches!(
      pop_aliased_param(&point, &mut ambiguous),
      Err(ConfigError::AmbiguousAlias { .. })
    ));
  }
}
