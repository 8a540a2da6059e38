// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Bind side of the relay.
//!
//! Every accepted connection gets a generated [`PeerIdentity`]. Inbound
//! envelopes are tagged with it as frame 0; outbound envelopes are routed by
//! their frame 0 and have it stripped before they hit the wire.
//!
//! Socket I/O runs in per-connection tasks. The endpoint itself owns the peer
//! table and only learns about peers through the event queue it drains in
//! `poll_receive`, so no lock is shared with the connection tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use display_error_chain::ErrorChainExt;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use hoprelay_config::EndpointAddress;

use crate::codec::EnvelopeCodec;
use crate::endpoint::{Endpoint, EndpointState};
use crate::envelope::{Envelope, PeerIdentity};
use crate::errors::{EndpointKind, RelayError, TransportCause, TransportError};

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

// pause after a failed accept, e.g. when running out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

enum PeerEvent {
    Connected {
        identity: PeerIdentity,
        tx: mpsc::Sender<Envelope>,
    },
    Envelope(Envelope),
    Disconnected(PeerIdentity),
}

pub struct UpstreamEndpoint {
    /// configured address
    address: EndpointAddress,

    /// address the listener is actually bound to
    local_addr: SocketAddr,

    state: EndpointState,

    /// connection events and inbound envelopes
    events: mpsc::Receiver<PeerEvent>,

    /// outbound queues of the connected peers
    peers: HashMap<PeerIdentity, mpsc::Sender<Envelope>>,

    /// stops the accept loop and the readers
    cancellation_token: CancellationToken,

    /// stops the writers once the drain timeout expires
    abort_token: CancellationToken,

    tracker: TaskTracker,

    drain_timeout: Duration,
}

impl std::fmt::Debug for UpstreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamEndpoint")
            .field("address", &self.address)
            .field("local_addr", &self.local_addr)
            .field("state", &self.state)
            .field("peers", &self.peers.len())
            .finish()
    }
}

impl Drop for UpstreamEndpoint {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        self.abort_token.cancel();
    }
}

impl UpstreamEndpoint {
    /// Bind the listener and start accepting peers.
    pub async fn bind(
        address: &EndpointAddress,
        codec: EnvelopeCodec,
        channel_capacity: usize,
    ) -> Result<Self, RelayError> {
        let bind_error = |source| RelayError::Bind {
            address: address.to_string(),
            source,
        };

        let listener = TcpListener::bind(address.socket_address())
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let (events_tx, events) = mpsc::channel(channel_capacity);
        let cancellation_token = CancellationToken::new();
        let abort_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        // one frame is taken by the identity pushed in front of every request
        let reader_codec = codec.clone().with_max_frames(codec.max_frames().saturating_sub(1));

        let acceptor = Acceptor {
            listener,
            reader_codec,
            writer_codec: codec,
            channel_capacity,
            events: events_tx,
            cancellation_token: cancellation_token.clone(),
            abort_token: abort_token.clone(),
            tracker: tracker.clone(),
        };
        tracker.spawn(acceptor.run());

        info!(%address, %local_addr, "upstream endpoint bound");

        Ok(UpstreamEndpoint {
            address: address.clone(),
            local_addr,
            state: EndpointState::Bound,
            events,
            peers: HashMap::new(),
            cancellation_token,
            abort_token,
            tracker,
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

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peers known to the endpoint. Connections are picked up while
    /// receiving, so a peer that has not sent anything yet may be missing.
    pub fn connected_peers(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait]
impl Endpoint for UpstreamEndpoint {
    fn kind(&self) -> EndpointKind {
        EndpointKind::Upstream
    }

    fn state(&self) -> EndpointState {
        self.state
    }

    fn register(&mut self) {
        if self.state == EndpointState::Bound {
            self.state = EndpointState::Registered;
        }
    }

    fn poll_receive(&mut self, cx: &mut Context<'_>) -> Poll<Result<Envelope, TransportError>> {
        if self.state == EndpointState::Closed {
            return Poll::Ready(Err(TransportError::receive(
                EndpointKind::Upstream,
                TransportCause::Closed,
            )));
        }

        loop {
            match self.events.poll_recv(cx) {
                Poll::Ready(Some(PeerEvent::Connected { identity, tx })) => {
                    self.peers.insert(identity, tx);
                }
                Poll::Ready(Some(PeerEvent::Disconnected(identity))) => {
                    self.peers.remove(&identity);
                }
                Poll::Ready(Some(PeerEvent::Envelope(envelope))) => {
                    return Poll::Ready(Ok(envelope));
                }
                Poll::Ready(None) => {
                    return Poll::Ready(Err(TransportError::receive(
                        EndpointKind::Upstream,
                        TransportCause::Closed,
                    )));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        if self.state == EndpointState::Closed {
            return Err(TransportError::send(
                EndpointKind::Upstream,
                TransportCause::Closed,
            ));
        }

        let (identity, envelope) = envelope
            .pop_identity()
            .map_err(|e| TransportError::send(EndpointKind::Upstream, e))?;

        let Some(tx) = self.peers.get(&identity) else {
            return Err(TransportError::send(
                EndpointKind::Upstream,
                TransportCause::PeerNotConnected(identity),
            ));
        };

        // never wait on a single peer, the loop serves all of them
        match tx.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(TransportError::send(
                EndpointKind::Upstream,
                TransportCause::PeerQueueFull(identity),
            )),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // the writer is gone, the disconnect event may still be queued
                self.peers.remove(&identity);
                Err(TransportError::send(
                    EndpointKind::Upstream,
                    TransportCause::PeerNotConnected(identity),
                ))
            }
        }
    }

    async fn close(&mut self) {
        if self.state == EndpointState::Closed {
            return;
        }
        self.state = EndpointState::Closed;

        self.cancellation_token.cancel();

        // drop queued events, they may hold senders of peers we never saw
        self.events.close();
        while self.events.try_recv().is_ok() {}

        // writers flush what is queued and stop once their sender is gone
        self.peers.clear();
        self.tracker.close();

        if tokio::time::timeout(self.drain_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(timeout = ?self.drain_timeout, "upstream connections did not drain in time");
            self.abort_token.cancel();
            self.tracker.wait().await;
        }

        info!(local_addr = %self.local_addr, "upstream endpoint closed");
    }
}

struct Acceptor {
    listener: TcpListener,
    reader_codec: EnvelopeCodec,
    writer_codec: EnvelopeCodec,
    channel_capacity: usize,
    events: mpsc::Sender<PeerEvent>,
    cancellation_token: CancellationToken,
    abort_token: CancellationToken,
    tracker: TaskTracker,
}

impl Acceptor {
    async fn run(self) {
        let mut counter: u32 = 0;

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    debug!("upstream accept loop cancelled");
                    break;
                }
                res = self.listener.accept() => match res {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e.chain(), "failed to accept upstream connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, %remote_addr, "unable to set TCP_NODELAY");
            }

            counter = counter.wrapping_add(1);
            let identity = PeerIdentity::generate(counter);
            let (read_half, write_half) = stream.into_split();
            let (tx, rx) = mpsc::channel(self.channel_capacity);

            // the peer must be known before any of its envelopes is queued
            let connected = PeerEvent::Connected {
                identity: identity.clone(),
                tx,
            };
            if self.events.send(connected).await.is_err() {
                break;
            }

            debug!(%identity, %remote_addr, "upstream peer connected");

            self.tracker.spawn(read_peer(
                identity.clone(),
                FramedRead::new(read_half, self.reader_codec.clone()),
                self.events.clone(),
                self.cancellation_token.clone(),
            ));
            self.tracker.spawn(write_peer(
                identity,
                FramedWrite::new(write_half, self.writer_codec.clone()),
                rx,
                self.abort_token.clone(),
            ));
        }
    }
}

async fn read_peer(
    identity: PeerIdentity,
    mut reader: FramedRead<OwnedReadHalf, EnvelopeCodec>,
    events: mpsc::Sender<PeerEvent>,
    cancellation_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            next = reader.next() => match next {
                Some(Ok(mut envelope)) => {
                    envelope.push_identity(identity.clone());
                    if events.send(PeerEvent::Envelope(envelope)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(%identity, error = %e.chain(), "dropping upstream peer after read error");
                    break;
                }
                None => {
                    debug!(%identity, "upstream peer disconnected");
                    break;
                }
            }
        }
    }

    let _ = events.send(PeerEvent::Disconnected(identity)).await;
}

async fn write_peer(
    identity: PeerIdentity,
    mut writer: FramedWrite<OwnedWriteHalf, EnvelopeCodec>,
    mut rx: mpsc::Receiver<Envelope>,
    abort_token: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = abort_token.cancelled() => return,
            next = rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            }
        };

        tokio::select! {
            _ = abort_token.cancelled() => return,
            res = writer.send(envelope) => {
                if let Err(e) = res {
                    warn!(%identity, error = %e.chain(), "failed to deliver envelope to upstream peer");
                    return;
                }
            }
        }
    }

    if let Err(e) = SinkExt::<Envelope>::close(&mut writer).await {
        debug!(%identity, error = %e.chain(), "error closing upstream connection");
    }
}
