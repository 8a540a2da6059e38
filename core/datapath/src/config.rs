// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use hoprelay_config::address::ANY_HOST;
use hoprelay_config::configuration::Configuration;
use hoprelay_config::{ConfigError, EndpointAddress};

use crate::codec::{DEFAULT_MAX_FRAME_SIZE, EnvelopeCodec};
use crate::errors::{EndpointKind, TransportError};

/// What the forwarding loop does when a reply cannot be routed back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any transport error stops the relay.
    #[default]
    Shutdown,
    /// A reply addressed to a peer that is gone, or whose outbound queue is
    /// full, is dropped and the relay keeps serving the other peers. Every
    /// other error still stops the relay.
    IsolatePeer,
}

impl FailurePolicy {
    pub fn tolerates(&self, error: &TransportError) -> bool {
        match self {
            FailurePolicy::Shutdown => false,
            FailurePolicy::IsolatePeer => {
                error.endpoint == EndpointKind::Upstream && error.is_peer_fault()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelayConfig {
    /// interface the upstream endpoint binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub bind_port: u16,

    /// address of the next hop
    #[serde(default = "default_next_hop_address")]
    pub next_hop_address: String,

    #[serde(default = "default_port")]
    pub next_hop_port: u16,

    /// largest frame accepted or sent, in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// bound of the per-connection and inbound queues
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            bind_address: default_bind_address(),
            bind_port: default_port(),
            next_hop_address: default_next_hop_address(),
            next_hop_port: default_port(),
            max_frame_size: default_max_frame_size(),
            channel_capacity: default_channel_capacity(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_bind_address() -> String {
    ANY_HOST.to_string()
}

fn default_next_hop_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4444
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_channel_capacity() -> usize {
    128
}

impl RelayConfig {
    pub fn new() -> Self {
        RelayConfig::default()
    }

    pub fn with_bind(self, address: &str, port: u16) -> Self {
        RelayConfig {
            bind_address: address.to_string(),
            bind_port: port,
            ..self
        }
    }

    pub fn with_next_hop(self, address: &str, port: u16) -> Self {
        RelayConfig {
            next_hop_address: address.to_string(),
            next_hop_port: port,
            ..self
        }
    }

    pub fn with_max_frame_size(self, max_frame_size: usize) -> Self {
        RelayConfig {
            max_frame_size,
            ..self
        }
    }

    pub fn with_channel_capacity(self, channel_capacity: usize) -> Self {
        RelayConfig {
            channel_capacity,
            ..self
        }
    }

    pub fn with_failure_policy(self, failure_policy: FailurePolicy) -> Self {
        RelayConfig {
            failure_policy,
            ..self
        }
    }

    pub fn bind_endpoint(&self) -> EndpointAddress {
        EndpointAddress::new(self.bind_address.as_str(), self.bind_port)
    }

    pub fn next_hop_endpoint(&self) -> EndpointAddress {
        EndpointAddress::new(self.next_hop_address.as_str(), self.next_hop_port)
    }

    pub fn codec(&self) -> EnvelopeCodec {
        EnvelopeCodec::new(self.max_frame_size)
    }
}

impl Configuration for RelayConfig {
    type Error = ConfigError;

    fn validate(&self) -> Result<(), Self::Error> {
        self.bind_endpoint().validate_bind()?;
        self.next_hop_endpoint().validate_connect()?;

        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid(
                "max_frame_size must be greater than 0".to_string(),
            ));
        }

        if self.max_frame_size > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_frame_size must not exceed {}",
                u32::MAX
            )));
        }

        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::PeerIdentity;
    use crate::errors::TransportCause;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_endpoint().to_string(), "tcp://*:4444");
        assert_eq!(config.next_hop_endpoint().to_string(), "tcp://127.0.0.1:4444");
        assert_eq!(config.failure_policy, FailurePolicy::Shutdown);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
bind_address: 127.0.0.1
bind_port: 4455
next_hop_port: 5555
failure_policy: isolate_peer
"#;
        let config: RelayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bind_endpoint().to_string(), "tcp://127.0.0.1:4455");
        assert_eq!(config.next_hop_endpoint().to_string(), "tcp://127.0.0.1:5555");
        assert_eq!(config.failure_policy, FailurePolicy::IsolatePeer);
        assert_eq!(config.channel_capacity, 128);
    }

    #[test]
    fn test_invalid_config() {
        let config = RelayConfig::default().with_next_hop("*", 5555);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress { .. })
        ));

        let config = RelayConfig::default().with_next_hop("127.0.0.1", 0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPort(_))));

        let config = RelayConfig::default().with_max_frame_size(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = RelayConfig::default().with_channel_capacity(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_failure_policy() {
        let gone = TransportError::send(
            EndpointKind::Upstream,
            TransportCause::PeerNotConnected(PeerIdentity::generate(1)),
        );
        let stalled = TransportError::send(
            EndpointKind::Upstream,
            TransportCause::PeerQueueFull(PeerIdentity::generate(2)),
        );
        let closed = TransportError::receive(EndpointKind::Downstream, TransportCause::PeerClosed);

        assert!(!FailurePolicy::Shutdown.tolerates(&gone));
        assert!(!FailurePolicy::Shutdown.tolerates(&stalled));
        assert!(FailurePolicy::IsolatePeer.tolerates(&gone));
        assert!(FailurePolicy::IsolatePeer.tolerates(&stalled));
        assert!(!FailurePolicy::IsolatePeer.tolerates(&closed));
    }
}
