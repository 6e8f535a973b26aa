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
use crate::error::ConfigError;
use crate::error::SweeplabError;
use figment::Figment;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Json;
use figment::providers::Serialized;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::path::Path;
use std::path::PathBuf;

/// Names of the keys a config file may set on [`Settings`].
pub const SETTINGS_KEYS: [&str; 4] = ["user_directory", "extra_plugin_paths", "output_directory", "verbosity"];

fn default_user_directory() -> PathBuf {
  match std::env::var_os("HOME") {
    Some(home) => PathBuf::from(home).join(".sweeplab"),
    None => PathBuf::from(".sweeplab"),
  }
}

/// Framework-level settings, as opposed to run or job configuration.
///
/// Layered in order: built-in defaults, an optional JSON settings file, then
/// `SWEEPLAB_*` environment variables. Config files may override them further
/// through [`Settings::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
  /// Holds `config.yaml` and `plugins.toml` for the current user.
  pub user_directory: PathBuf,
  /// Additional plugin manifests loaded after the user's own.
  pub extra_plugin_paths: Vec<PathBuf>,
  pub output_directory: PathBuf,
  pub verbosity: u8,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      user_directory: default_user_directory(),
      extra_plugin_paths: Vec::new(),
      output_directory: PathBuf::from("sweeplab_output"),
      verbosity: 0,
    }
  }
}

impl Settings {
  pub fn load(settings_file: Option<&Path>) -> Result<Self, SweeplabError> {
    let mut figment = Figment::from(Serialized::defaults(Settings::default()));
    if let Some(path) = settings_file {
      figment = figment.merge(Json::file(path));
    }
    let settings = figment.merge(Env::prefixed("SWEEPLAB_")).extract()?;
    Ok(settings)
  }

  pub fn user_config_file(&self) -> PathBuf {
    self.user_directory.join("config.yaml")
  }

  pub fn user_plugins_file(&self) -> PathBuf {
    self.user_directory.join("plugins.toml")
  }

  /// Pops every settings key out of `raw` and applies it.
  pub fn apply(&mut self, raw: &mut Map<String, Value>) -> Result<(), ConfigError> {
    let mut current = match serde_json::to_value(&*self) {
      Ok(Value::Object(map)) => map,
      _ => return Err(ConfigError::Invalid("Settings are not representable as a mapping".to_string())),
    };
    let mut touched = false;
    for key in SETTINGS_KEYS {
      if let Some(value) = raw.shift_remove(key) {
        tracing::debug!(%key, "Applying setting from config");
        current.insert(key.to_string(), value);
        touched = true;
      }
    }
    if touched {
      *self = serde_json::from_value(Value::Object(current))
        .map_err(|e| ConfigError::Invalid(format!("Invalid settings: {}", e)))?;
    }
    Ok(())
  }
}
