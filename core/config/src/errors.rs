// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors raised while loading or validating the relay configuration.
/// All of them are detected before the forwarding loop starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    // File / I/O
    #[error("not found: {0}")]
    NotFound(String),

    // Parsing / structural validity
    #[error("invalid configuration - impossible to parse yaml")]
    InvalidYaml,
    #[error("invalid configuration - key {0} not valid")]
    InvalidKey(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),

    // YAML decoding (typed propagation)
    #[error("yaml parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    // Addresses
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("invalid port {0}")]
    InvalidPort(String),
}
