// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use hoprelay_config::ConfigError;
use thiserror::Error;

use crate::envelope::PeerIdentity;

/// Exit code for a relay that stopped on request.
pub const EXIT_CLEAN: u8 = 0;
/// Exit code for failures detected before the forwarding loop starts.
pub const EXIT_SETUP_FAILURE: u8 = 1;
/// Exit code for failures of the running forwarding loop.
pub const EXIT_FORWARDING_FAILURE: u8 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope without frames")]
    Empty,
    #[error("envelope has no identity frame in front of its payload")]
    MissingIdentity,
}

/// Wire-level framing errors.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    #[error("frame of {size} bytes exceeds the {max} bytes limit")]
    FrameTooLarge { size: usize, max: usize },
    #[error("too many frames in one envelope (limit {0})")]
    TooManyFrames(usize),
    #[error("invalid frame flags {0:#04x}")]
    InvalidFlags(u8),
    #[error("stream ended in the middle of an envelope")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Upstream,
    Downstream,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Upstream => write!(f, "upstream"),
            EndpointKind::Downstream => write!(f, "downstream"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Receive,
    Send,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Receive => write!(f, "receive"),
            Operation::Send => write!(f, "send"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportCause {
    #[error("codec error")]
    Codec(#[from] CodecError),
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("peer {0} is not connected")]
    PeerNotConnected(PeerIdentity),
    #[error("outbound queue of peer {0} is full")]
    PeerQueueFull(PeerIdentity),
    #[error("invalid envelope")]
    Envelope(#[from] EnvelopeError),
    #[error("endpoint is closed")]
    Closed,
}

/// A send or receive failure, tagged with the endpoint it happened on.
#[derive(Error, Debug)]
#[error("{operation} on {endpoint} endpoint failed")]
pub struct TransportError {
    pub endpoint: EndpointKind,
    pub operation: Operation,
    #[source]
    pub cause: TransportCause,
}

impl TransportError {
    pub fn new(endpoint: EndpointKind, operation: Operation, cause: impl Into<TransportCause>) -> Self {
        TransportError {
            endpoint,
            operation,
            cause: cause.into(),
        }
    }

    pub fn receive(endpoint: EndpointKind, cause: impl Into<TransportCause>) -> Self {
        TransportError::new(endpoint, Operation::Receive, cause)
    }

    pub fn send(endpoint: EndpointKind, cause: impl Into<TransportCause>) -> Self {
        TransportError::new(endpoint, Operation::Send, cause)
    }

    pub fn is_peer_not_connected(&self) -> bool {
        matches!(self.cause, TransportCause::PeerNotConnected(_))
    }

    /// The failure is confined to a single upstream peer: it is gone or it
    /// does not read its replies.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self.cause,
            TransportCause::PeerNotConnected(_) | TransportCause::PeerQueueFull(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("configuration error")]
    Config(#[from] ConfigError),
    #[error("failed to bind upstream endpoint {address}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect downstream endpoint {address}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("forwarding failed")]
    Transport(#[from] TransportError),
}

impl RelayError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RelayError::Config(_) | RelayError::Bind { .. } | RelayError::Connect { .. } => {
                EXIT_SETUP_FAILURE
            }
            RelayError::Transport(_) => EXIT_FORWARDING_FAILURE,
        }
    }
}
