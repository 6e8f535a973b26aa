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
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error enum for the sweeplab library.
#[derive(Error, Debug)]
pub enum SweeplabError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("Failed to load settings")]
  Settings(#[from] Box<figment::Error>),

  #[error("JSON serialization/deserialization error: {0}")]
  Json(#[from] serde_json::Error),
}

/// Every user-facing resolution failure.
///
/// Variants group failures by category, but callers are expected to tell them
/// apart by message; each one is attributable to a source through
/// [`ConfigError::InSource`] wrapping.
#[derive(Error, Debug)]
pub enum ConfigError {
  // --- Structural ---
  #[error("{0}")]
  Invalid(String),

  #[error("Failed to read {what} file: {path}")]
  ReadFile {
    what: &'static str,
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{what} file does not exist: {path}")]
  MissingFile { what: &'static str, path: PathBuf },

  #[error("Error parsing {what} {path}: {message}")]
  Syntax {
    what: &'static str,
    path: PathBuf,
    message: String,
  },

  // --- Identity ---
  #[error("Duplicate {kind} ID \"{id}\".")]
  DuplicateId { kind: &'static str, id: String },

  #[error("Invalid {kind} ID \"global\"; is a reserved ID")]
  ReservedId { kind: &'static str },

  #[error("Invalid {kind} ID \"{id}\"; IDs cannot contain a \"{separator}\"")]
  IdSeparator {
    kind: &'static str,
    id: String,
    separator: char,
  },

  #[error("Duplicate entry: {names:?}")]
  AmbiguousAlias { names: Vec<String> },

  #[error("Duplicate job ID \"{id}\" generated; job IDs must be unique within a run")]
  DuplicateJobId { id: String },

  // --- Missing or invalid values ---
  #[error("No value specified for mandatory parameter \"{param}\" in {owner}")]
  MissingMandatory { param: String, owner: String },

  #[error("Bad value \"{value}\" for {param}; must be {expected}")]
  BadValue {
    value: String,
    param: String,
    expected: String,
  },

  #[error("Invalid value {value} for {param} in {owner}; must be in {allowed}")]
  NotAllowed {
    value: String,
    param: String,
    owner: String,
    allowed: String,
  },

  #[error("{message}")]
  ConstraintFailed { message: String },

  #[error("Unknown {owner} configuration \"{name}\"")]
  UnknownConfiguration { owner: String, name: String },

  #[error("Invalid value \"{value}\" for \"{name}\": {inner}")]
  InvalidSetting {
    value: String,
    name: String,
    inner: Box<ConfigError>,
  },

  #[error("'{param}' is not a valid parameter for '{plugin}'")]
  UnknownParameter { param: String, plugin: String },

  #[error("configuration provided for unknown plugin \"{name}\"")]
  UnknownPlugin { name: String },

  #[error("Unexpected values for {owner}: {values}")]
  UnexpectedValues { owner: String, values: String },

  #[error("Unknown execution order \"{name}\"; must be in: {allowed:?}")]
  UnknownExecutionOrder {
    name: String,
    allowed: Vec<&'static str>,
  },

  // --- Merge conflicts ---
  #[error(
    "\"{generic}\" configuration \"{param}\" has already been specified more specifically for {specific} in:\n\t\t{sources}"
  )]
  SpecificityConflict {
    generic: String,
    param: String,
    specific: String,
    sources: String,
  },

  #[error("\"{first}\" and \"{second}\" have conflicting entries: {conflicts}")]
  AugmentationConflict {
    first: String,
    second: String,
    conflicts: String,
  },

  #[error("Cannot merge {base} with {other}: mappings only merge with mappings or sequences")]
  Unmergeable { base: String, other: String },

  // --- Sweeps ---
  #[error("Unknown sweep handler \"{handler}\"; must be one of: range, autofreq, autoparam")]
  UnknownSweepHandler { handler: String },

  #[error("sweep({handler}) must contain exactly one parameter, found: {keys:?}")]
  SweepKeys {
    handler: &'static str,
    keys: Vec<String>,
  },

  #[error("Invalid range \"{value}\" for sweep over \"{param}\"; expected \"start-stop[,step]\"")]
  SweepRange { param: String, value: String },

  #[error("Non-numeric bound \"{value}\" in sweep over \"{param}\"")]
  SweepBound { param: String, value: String },

  #[error("sweep({handler}) is missing required field \"{field}\"")]
  SweepIncomplete {
    handler: &'static str,
    field: &'static str,
  },

  #[error("Parameter \"{param}\" of {owner} cannot be swept: {reason}")]
  NotSweepable {
    param: String,
    owner: String,
    reason: String,
  },

  #[error("Sweep over \"{param}\" produced no values")]
  EmptySweep { param: String },

  #[error("Conflicting sweeps declared for \"{param}\" in {origin}")]
  ConflictingSweeps { param: String, origin: String },

  // --- Attribution ---
  #[error("Error in \"{origin}\":\n\t{inner}")]
  InSource {
    origin: String,
    inner: Box<ConfigError>,
  },
}

impl ConfigError {
  /// Wraps `self` with the name of the source it originated from.
  pub fn in_source(self, origin: impl Into<String>) -> Self {
    ConfigError::InSource {
      origin: origin.into(),
      inner: Box::new(self),
    }
  }

  /// The innermost error, with all source attribution peeled off.
  pub fn root(&self) -> &ConfigError {
    match self {
      ConfigError::InSource { inner, .. } => inner.root(),
      other => other,
    }
  }
}

/// Attribution helper for results, in the spirit of `anyhow::Context`.
pub trait SourceContext<T> {
  fn in_source(self, origin: impl Into<String>) -> Result<T, ConfigError>;
}

impl<T> SourceContext<T> for Result<T, ConfigError> {
  fn in_source(self, origin: impl Into<String>) -> Result<T, ConfigError> {
    self.map_err(|e| e.in_source(origin))
  }
}

impl From<figment::Error> for SweeplabError {
  fn from(e: figment::Error) -> Self {
    SweeplabError::Settings(Box::new(e))
  }
}
