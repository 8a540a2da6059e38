// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Transport addresses in the `tcp://<host>:<port>` form.
//!
//! The bind side accepts the `*` wildcard host and port 0, which lets the
//! operating system pick an ephemeral port. The connect side needs a concrete
//! host and port.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const TCP_SCHEME: &str = "tcp";
pub const ANY_HOST: &str = "*";

const SCHEME_SEPARATOR: &str = "://";
const UNSPECIFIED_HOST: &str = "0.0.0.0";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddress {
    host: String,
    port: u16,
}

impl EndpointAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        EndpointAddress {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parse a `tcp://host:port` string.
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidAddress {
            address: uri.to_string(),
            reason: reason.to_string(),
        };

        let rest = match uri.split_once(SCHEME_SEPARATOR) {
            Some((TCP_SCHEME, rest)) => rest,
            Some((scheme, _)) => {
                return Err(invalid(&format!("unsupported scheme {scheme}")));
            }
            None => return Err(invalid("missing tcp:// scheme")),
        };

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;

        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;

        Ok(EndpointAddress::new(host, port))
    }

    /// Check that the address can be used to bind a listener.
    pub fn validate_bind(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidAddress {
                address: self.to_string(),
                reason: "empty host".to_string(),
            });
        }

        Ok(())
    }

    /// Check that the address can be used as a connect target.
    pub fn validate_connect(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() || self.host == ANY_HOST {
            return Err(ConfigError::InvalidAddress {
                address: self.to_string(),
                reason: "connect requires a concrete host".to_string(),
            });
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port.to_string()));
        }

        Ok(())
    }

    /// The `host:port` string handed to the socket layer. The wildcard host
    /// maps to the unspecified IPv4 address.
    pub fn socket_address(&self) -> String {
        let host = if self.host == ANY_HOST {
            UNSPECIFIED_HOST
        } else {
            self.host.as_str()
        };

        // bare IPv6 literals need brackets
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", TCP_SCHEME, self.host, self.port)
    }
}

impl FromStr for EndpointAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EndpointAddress::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_address() {
        let addr = EndpointAddress::parse("tcp://127.0.0.1:4444").unwrap();
        assert_eq!(addr.host(), "127.0.0.1");
        assert_eq!(addr.port(), 4444);
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:4444");

        let addr: EndpointAddress = "tcp://*:5555".parse().unwrap();
        assert_eq!(addr.host(), ANY_HOST);
        assert_eq!(addr.socket_address(), "0.0.0.0:5555");
    }

    #[test]
    fn test_parse_invalid_address() {
        assert!(matches!(
            EndpointAddress::parse("udp://127.0.0.1:4444"),
            Err(ConfigError::InvalidAddress { .. })
        ));
        assert!(matches!(
            EndpointAddress::parse("127.0.0.1:4444"),
            Err(ConfigError::InvalidAddress { .. })
        ));
        assert!(matches!(
            EndpointAddress::parse("tcp://127.0.0.1"),
            Err(ConfigError::InvalidAddress { .. })
        ));
        assert!(matches!(
            EndpointAddress::parse("tcp://:4444"),
            Err(ConfigError::InvalidAddress { .. })
        ));
        assert!(matches!(
            EndpointAddress::parse("tcp://localhost:http"),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            EndpointAddress::parse("tcp://localhost:70000"),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_ipv6_socket_address() {
        let addr = EndpointAddress::parse("tcp://[::1]:4444").unwrap();
        assert_eq!(addr.host(), "[::1]");
        assert_eq!(addr.socket_address(), "[::1]:4444");

        let addr = EndpointAddress::new("::1", 4444);
        assert_eq!(addr.socket_address(), "[::1]:4444");
    }

    #[test]
    fn test_bind_and_connect_validation() {
        let wildcard = EndpointAddress::new(ANY_HOST, 0);
        assert!(wildcard.validate_bind().is_ok());
        assert!(wildcard.validate_connect().is_err());

        let zero_port = EndpointAddress::new("127.0.0.1", 0);
        assert!(matches!(
            zero_port.validate_connect(),
            Err(ConfigError::InvalidPort(_))
        ));

        let empty = EndpointAddress::new("", 4444);
        assert!(empty.validate_bind().is_err());

        let next_hop = EndpointAddress::new("127.0.0.1", 5555);
        assert!(next_hop.validate_connect().is_ok());
    }

    #[test]
    fn test_deserialize_address() {
        let addr: EndpointAddress = serde_yaml::from_str("host: localhost\nport: 4444").unwrap();
        assert_eq!(addr, EndpointAddress::new("localhost", 4444));
    }
}
