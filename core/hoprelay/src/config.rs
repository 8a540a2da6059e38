// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0
//
// ConfigLoader reads the configuration file once and exposes lazy, cached
// accessors for the tracing, runtime and relay sections. A missing section
// decodes to its defaults.

use lazy_static::lazy_static;
use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value, from_str};
use tracing::debug;

use crate::runtime::RuntimeConfiguration;
use hoprelay_config::ConfigError;
use hoprelay_datapath::RelayConfig;
use hoprelay_tracing::TracingConfiguration;

lazy_static! {
    static ref CONFIG_KEYS: HashSet<&'static str> = {
        let mut s = HashSet::new();
        s.insert("tracing");
        s.insert("runtime");
        s.insert("relay");
        s
    };
}

pub struct ConfigLoader {
    root: Value,
    tracing: Option<TracingConfiguration>,
    runtime: Option<RuntimeConfiguration>,
    relay: Option<RelayConfig>,
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let root_keys = self
            .root
            .as_mapping()
            .map(|m| {
                m.keys()
                    .filter_map(|k| k.as_str())
                    .map(|s| s.to_string())
                    .collect::<Vec<String>>()
            })
            .unwrap_or_default();

        f.debug_struct("ConfigLoader")
            .field("root_keys", &root_keys)
            .field("tracing_loaded", &self.tracing.is_some())
            .field("runtime_loaded", &self.runtime.is_some())
            .field("relay_loaded", &self.relay.is_some())
            .finish()
    }
}

impl Default for ConfigLoader {
    /// A loader with no file behind it: every section takes its defaults.
    fn default() -> Self {
        ConfigLoader {
            root: Value::Mapping(Mapping::new()),
            tracing: None,
            runtime: None,
            relay: None,
        }
    }
}

impl ConfigLoader {
    pub fn new(file_path: &str) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(file_path)
            .map_err(|e| ConfigError::NotFound(format!("{}: {}", file_path, e)))?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let root: Value = from_str(config_str).map_err(|_| ConfigError::InvalidYaml)?;

        // an empty document has no sections
        let root = match root {
            Value::Null => Value::Mapping(Mapping::new()),
            root => root,
        };

        let mapping = root.as_mapping().ok_or(ConfigError::InvalidYaml)?;
        for key in mapping.keys() {
            let k = key.as_str().ok_or(ConfigError::InvalidYaml)?;
            if !CONFIG_KEYS.contains(k) {
                return Err(ConfigError::InvalidKey(k.to_string()));
            }
        }

        Ok(Self {
            root,
            ..Default::default()
        })
    }

    pub fn tracing(&mut self) -> Result<&TracingConfiguration, ConfigError> {
        let cfg = match self.tracing.take() {
            Some(cfg) => cfg,
            None => {
                let cfg: TracingConfiguration = self.section("tracing")?;
                debug!(?cfg, "tracing configuration loaded");
                cfg
            }
        };
        Ok(&*self.tracing.insert(cfg))
    }

    pub fn runtime(&mut self) -> Result<&RuntimeConfiguration, ConfigError> {
        let cfg = match self.runtime.take() {
            Some(cfg) => cfg,
            None => {
                let cfg: RuntimeConfiguration = self.section("runtime")?;
                debug!(?cfg, "runtime configuration loaded");
                cfg
            }
        };
        Ok(&*self.runtime.insert(cfg))
    }

    /// The relay section as written in the file. Validation happens when the
    /// relay starts, after command line overrides are applied.
    pub fn relay(&mut self) -> Result<&RelayConfig, ConfigError> {
        let cfg = match self.relay.take() {
            Some(cfg) => cfg,
            None => {
                let cfg: RelayConfig = self.section("relay")?;
                debug!(?cfg, "relay configuration loaded");
                cfg
            }
        };
        Ok(&*self.relay.insert(cfg))
    }

    fn section<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, ConfigError> {
        match self.root.get(key) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => Ok(serde_yaml::from_value(value.clone())?),
        }
    }
}
