// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use display_error_chain::ErrorChainExt;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use hoprelay_config::EndpointAddress;

use crate::codec::EnvelopeCodec;
use crate::endpoint::{Endpoint, EndpointState};
use crate::envelope::Envelope;
use crate::errors::{EndpointKind, RelayError, TransportCause, TransportError};
use crate::upstream::DEFAULT_DRAIN_TIMEOUT;

/// Connect side of the relay: a single connection to the next hop.
/// Envelopes go out exactly as they came in, identity frames included.
pub struct DownstreamEndpoint {
    address: EndpointAddress,
    peer_addr: SocketAddr,
    framed: Framed<TcpStream, EnvelopeCodec>,
    state: EndpointState,
    drain_timeout: Duration,
}

impl std::fmt::Debug for DownstreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownstreamEndpoint")
            .field("address", &self.address)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state)
            .finish()
    }
}

impl DownstreamEndpoint {
    /// Connect to the next hop. There is no retry: a failure here is final.
    pub async fn connect(
        address: &EndpointAddress,
        codec: EnvelopeCodec,
    ) -> Result<Self, RelayError> {
        let connect_error = |source| RelayError::Connect {
            address: address.to_string(),
            source,
        };

        let stream = TcpStream::connect(address.socket_address())
            .await
            .map_err(connect_error)?;
        let peer_addr = stream.peer_addr().map_err(connect_error)?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, %peer_addr, "unable to set TCP_NODELAY");
        }

        info!(%address, %peer_addr, "downstream endpoint connected");

        Ok(DownstreamEndpoint {
            address: address.clone(),
            peer_addr,
            framed: Framed::new(stream, codec),
            state: EndpointState::Connected,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

#[async_trait]
impl Endpoint for DownstreamEndpoint {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Downstream
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    fn register(&mut self) {
        if self.state == EndpointState::Connected {
            self.state = EndpointState::Registered;
        }
    }

    fn poll_receive(&mut self, cx: &mut Context<'_>) -> Poll<Result<Envelope, TransportError>> {
        if self.state == EndpointState::Closed {
            return Poll::Ready(Err(TransportError::receive(
                EndpointKind::Downstream,
                TransportCause::Closed,
            )));
        }

        match self.framed.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(envelope))) => Poll::Ready(Ok(envelope)),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Err(TransportError::receive(
                EndpointKind::Downstream,
                e,
            ))),
            Poll::Ready(None) => Poll::Ready(Err(TransportError::receive(
                EndpointKind::Downstream,
                TransportCause::PeerClosed,
            ))),
            Poll::Pending => Poll::Pending,
        }
    }

    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        if self.state == EndpointState::Closed {
            return Err(TransportError::send(
                EndpointKind::Downstream,
                TransportCause::Closed,
            ));
        }

        self.framed
            .send(envelope)
            .await
            .map_err(|e| TransportError::send(EndpointKind::Downstream, e))
    }

    async fn close(&mut self) {
        if self.state == EndpointState::Closed {
            return;
        }
        self.state = EndpointState::Closed;

        match tokio::time::timeout(self.drain_timeout, SinkExt::<Envelope>::close(&mut self.framed)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e.chain(), "error closing downstream connection"),
            Err(_) => warn!(timeout = ?self.drain_timeout, "downstream connection did not drain in time"),
        }

        info!(peer_addr = %self.peer_addr, "downstream endpoint closed");
    }
}
