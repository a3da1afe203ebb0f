// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
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

//! Graphics core configuration
//!
//! Settings are read from a TOML file (`liverpool.toml` by default) and can be
//! overridden through environment variables, which are themselves loaded
//! from a `.env` file when one is present:
//!
//! | Variable | Field |
//! |---|---|
//! | `LIVERPOOL_FLIP_RATE_HZ` | [`GpuConfig::flip_rate_hz`] |
//! | `LIVERPOOL_PACE_FLIPS` | [`GpuConfig::pace_flips`] |
//! | `LIVERPOOL_PAGE_SIZE` | [`GpuConfig::page_size`] |
//! | `LIVERPOOL_POLL_INTERVAL_US` | [`GpuConfig::poll_interval_us`] |
//! | `LIVERPOOL_TRACKING` | [`GpuConfig::tracking`] (`fault` or `hash`) |
//! | `LIVERPOOL_SHADER_DUMP_DIR` | [`GpuConfig::shader_dump_dir`] |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{GpuError, Result};

/// Default configuration file name
pub const DEFAULT_CONFIG_PATH: &str = "liverpool.toml";

/// Dirty-tracking backend used by the buffer and texture caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingBackend {
    /// Write-protect tracked pages and mark regions dirty from the fault handler
    #[default]
    Fault,
    /// Re-hash region contents to detect modification (portable fallback)
    Hash,
}

impl FromStr for TrackingBackend {
    type Err = GpuError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fault" => Ok(TrackingBackend::Fault),
            "hash" => Ok(TrackingBackend::Hash),
            other => Err(GpuError::Config(format!("unknown tracking backend '{}'", other))),
        }
    }
}

/// Graphics core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Flip cadence the GPU thread holds after each present
    pub flip_rate_hz: u32,
    /// Sleep after flips to hold `flip_rate_hz`
    pub pace_flips: bool,
    /// Host page size used for buffer tracking granularity
    pub page_size: u64,
    /// Poll interval for memory waits whose packet specifies none
    pub poll_interval_us: u64,
    /// Dirty-tracking backend
    pub tracking: TrackingBackend,
    /// Directory receiving partial translations of shaders that failed to translate
    pub shader_dump_dir: Option<PathBuf>,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            flip_rate_hz: 60,
            pace_flips: true,
            page_size: 4096,
            poll_interval_us: 10,
            tracking: TrackingBackend::default(),
            shader_dump_dir: None,
        }
    }
}

impl GpuConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Io`] if the file cannot be read and
    /// [`GpuError::Config`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| GpuError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| GpuError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Resolve the effective configuration
    ///
    /// Loads `path` (or [`DEFAULT_CONFIG_PATH`]) when it exists, falls back to
    /// defaults otherwise, then applies environment overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            log::info!("No config at {}, using defaults", path.display());
            Self::default()
        };

        // A missing .env file is the normal case
        dotenvy::dotenv().ok();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `LIVERPOOL_*` overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LIVERPOOL_FLIP_RATE_HZ") {
            self.flip_rate_hz = parse_var("LIVERPOOL_FLIP_RATE_HZ", &v)?;
        }
        if let Some(v) = lookup("LIVERPOOL_PACE_FLIPS") {
            self.pace_flips = parse_var("LIVERPOOL_PACE_FLIPS", &v)?;
        }
        if let Some(v) = lookup("LIVERPOOL_PAGE_SIZE") {
            self.page_size = parse_var("LIVERPOOL_PAGE_SIZE", &v)?;
        }
        if let Some(v) = lookup("LIVERPOOL_POLL_INTERVAL_US") {
            self.poll_interval_us = parse_var("LIVERPOOL_POLL_INTERVAL_US", &v)?;
        }
        if let Some(v) = lookup("LIVERPOOL_TRACKING") {
            self.tracking = v.parse()?;
        }
        if let Some(v) = lookup("LIVERPOOL_SHADER_DUMP_DIR") {
            self.shader_dump_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Check invariants the rest of the core relies on
    pub fn validate(&self) -> Result<()> {
        if self.flip_rate_hz == 0 {
            return Err(GpuError::Config("flip_rate_hz must be greater than 0".into()));
        }
        if !self.page_size.is_power_of_two() {
            return Err(GpuError::Config(format!(
                "page_size must be a power of two, got {}",
                self.page_size
            )));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GpuError::Config(format!("invalid value '{}' for {}", value, key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = GpuConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flip_rate_hz, 60);
        assert_eq!(config.tracking, TrackingBackend::Fault);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: GpuConfig = toml::from_str("tracking = \"hash\"\npage_size = 16384\n").unwrap();
        assert_eq!(config.tracking, TrackingBackend::Hash);
        assert_eq!(config.page_size, 16384);
        assert_eq!(config.flip_rate_hz, 60);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LIVERPOOL_FLIP_RATE_HZ", "30"),
            ("LIVERPOOL_TRACKING", "HASH"),
            ("LIVERPOOL_PACE_FLIPS", "false"),
        ]
        .into_iter()
        .collect();

        let mut config = GpuConfig::default();
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.flip_rate_hz, 30);
        assert_eq!(config.tracking, TrackingBackend::Hash);
        assert!(!config.pace_flips);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = GpuConfig::default();
        let result = config.apply_env(|k| (k == "LIVERPOOL_PAGE_SIZE").then(|| "lots".to_string()));
        assert!(matches!(result, Err(GpuError::Config(_))));
    }

    #[test]
    fn test_non_power_of_two_page_size_rejected() {
        let config = GpuConfig {
            page_size: 3000,
            ..GpuConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liverpool.toml");

        let config = GpuConfig {
            flip_rate_hz: 50,
            shader_dump_dir: Some(PathBuf::from("dumps")),
            ..GpuConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = GpuConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
