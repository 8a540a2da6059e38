// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::task::{Context, Poll};

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::errors::{EndpointKind, TransportError};

/// Lifecycle of an endpoint. Endpoints are only handed out once bound or
/// connected, so there is no state for an unattached channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Bound,
    Connected,
    Registered,
    Closed,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointState::Bound => write!(f, "bound"),
            EndpointState::Connected => write!(f, "connected"),
            EndpointState::Registered => write!(f, "registered"),
            EndpointState::Closed => write!(f, "closed"),
        }
    }
}

/// One side of the relay, as seen by the forwarding loop.
///
/// `poll_receive` hands out whole envelopes only. An `Err` is terminal for the
/// endpoint. `close` is idempotent.
#[async_trait]
pub trait Endpoint: Send {
    fn kind(&self) -> EndpointKind;

    fn state(&self) -> EndpointState;

    /// Mark the endpoint as polled by a forwarding loop.
    fn register(&mut self);

    fn poll_receive(&mut self, cx: &mut Context<'_>) -> Poll<Result<Envelope, TransportError>>;

    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError>;

    async fn close(&mut self);
}
