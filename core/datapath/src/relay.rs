// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The forwarding loop.
//!
//! A [`Relay`] owns one upstream and one downstream endpoint for its whole
//! lifetime. Each wakeup it takes at most one envelope from every ready
//! endpoint and hands it, untouched, to the opposite side: requests go
//! downstream first, then replies go upstream.

use std::fmt;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

use display_error_chain::ErrorChainExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hoprelay_config::configuration::Configuration;

use crate::config::{FailurePolicy, RelayConfig};
use crate::downstream::DownstreamEndpoint;
use crate::endpoint::Endpoint;
use crate::envelope::Envelope;
use crate::errors::{EndpointKind, RelayError, TransportError};
use crate::upstream::UpstreamEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    Terminated,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Initializing => write!(f, "initializing"),
            LoopState::Running => write!(f, "running"),
            LoopState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Counters kept by the loop, logged when it terminates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// wakeups with at least one ready endpoint
    pub cycles: u64,
    /// envelopes forwarded downstream
    pub requests: u64,
    /// envelopes forwarded upstream
    pub replies: u64,
    /// replies dropped because their peer was gone
    pub dropped: u64,
}

/// Outcome of one readiness wait. An endpoint that was ready has already
/// handed over its envelope (or its error); an endpoint that was not ready
/// is `None`.
#[derive(Debug, Default)]
pub struct Readiness {
    pub upstream: Option<Result<Envelope, TransportError>>,
    pub downstream: Option<Result<Envelope, TransportError>>,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        self.upstream.is_none() && self.downstream.is_none()
    }
}

pub struct Relay<U = UpstreamEndpoint, D = DownstreamEndpoint> {
    upstream: U,
    downstream: D,
    state: LoopState,
    policy: FailurePolicy,
    stats: RelayStats,
}

impl<U, D> fmt::Debug for Relay<U, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Relay {
    /// Validate the configuration, bind the upstream endpoint and connect the
    /// downstream one. On failure nothing is left open and the loop never
    /// runs.
    pub async fn start(config: &RelayConfig, drain_timeout: Duration) -> Result<Self, RelayError> {
        config.validate()?;

        let mut upstream = UpstreamEndpoint::bind(
            &config.bind_endpoint(),
            config.codec(),
            config.channel_capacity,
        )
        .await?
        .with_drain_timeout(drain_timeout);

        let downstream =
            match DownstreamEndpoint::connect(&config.next_hop_endpoint(), config.codec()).await {
                Ok(downstream) => downstream.with_drain_timeout(drain_timeout),
                Err(e) => {
                    upstream.close().await;
                    return Err(e);
                }
            };

        Ok(Relay::new(upstream, downstream, config.failure_policy))
    }

    /// Address the upstream listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.upstream.local_addr()
    }
}

impl<U: Endpoint, D: Endpoint> Relay<U, D> {
    pub fn new(mut upstream: U, mut downstream: D, policy: FailurePolicy) -> Self {
        upstream.register();
        downstream.register();

        Relay {
            upstream,
            downstream,
            state: LoopState::Initializing,
            policy,
            stats: RelayStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    pub fn downstream(&self) -> &D {
        &self.downstream
    }

    /// Poll both endpoints once. Ready if at least one of them produced an
    /// envelope or an error.
    pub fn poll_readiness(&mut self, cx: &mut Context<'_>) -> Poll<Readiness> {
        let readiness = Readiness {
            upstream: ready(self.upstream.poll_receive(cx)),
            downstream: ready(self.downstream.poll_receive(cx)),
        };

        if readiness.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(readiness)
        }
    }

    /// Wait, without timeout, until at least one endpoint is ready.
    pub async fn wait_readiness(&mut self) -> Readiness {
        std::future::poll_fn(|cx| self.poll_readiness(cx)).await
    }

    /// Forward envelopes until the token is cancelled or a transport error
    /// stops the loop. Both endpoints are closed when this returns.
    pub async fn run(&mut self, cancellation_token: CancellationToken) -> Result<(), RelayError> {
        if self.state == LoopState::Terminated {
            debug!("relay already terminated");
            return Ok(());
        }

        self.state = LoopState::Running;
        info!(policy = ?self.policy, "relay running");

        let result = loop {
            let readiness = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    info!("relay cancelled");
                    break Ok(());
                }
                readiness = std::future::poll_fn(|cx| self.poll_readiness(cx)) => readiness,
            };

            self.stats.cycles += 1;

            // a send stuck on a slow endpoint must not hold back shutdown
            let dispatched = tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    info!("relay cancelled while forwarding");
                    break Ok(());
                }
                dispatched = self.dispatch(readiness) => dispatched,
            };

            if let Err(e) = dispatched {
                error!(
                    endpoint = %e.endpoint,
                    operation = %e.operation,
                    error = %e.chain(),
                    "forwarding failed"
                );
                self.close_endpoint(e.endpoint).await;
                break Err(RelayError::Transport(e));
            }
        };

        self.terminate().await;
        result
    }

    async fn dispatch(&mut self, readiness: Readiness) -> Result<(), TransportError> {
        if let Some(received) = readiness.upstream {
            self.forward_request(received?).await?;
        }

        if let Some(received) = readiness.downstream {
            self.forward_reply(received?).await?;
        }

        Ok(())
    }

    async fn forward_request(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let frames = envelope.frame_count();
        self.downstream.send(envelope).await?;
        self.stats.requests += 1;
        debug!(frames, "request forwarded downstream");
        Ok(())
    }

    async fn forward_reply(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let frames = envelope.frame_count();
        match self.upstream.send(envelope).await {
            Ok(()) => {
                self.stats.replies += 1;
                debug!(frames, "reply forwarded upstream");
                Ok(())
            }
            Err(e) if self.policy.tolerates(&e) => {
                self.stats.dropped += 1;
                warn!(error = %e.chain(), "dropping unroutable reply");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn close_endpoint(&mut self, kind: EndpointKind) {
        match kind {
            EndpointKind::Upstream => self.upstream.close().await,
            EndpointKind::Downstream => self.downstream.close().await,
        }
    }

    /// Close whatever is still open. Safe to call more than once.
    pub async fn terminate(&mut self) {
        self.upstream.close().await;
        self.downstream.close().await;

        if self.state != LoopState::Terminated {
            self.state = LoopState::Terminated;
            info!(
                cycles = self.stats.cycles,
                requests = self.stats.requests,
                replies = self.stats.replies,
                dropped = self.stats.dropped,
                "relay terminated"
            );
        }
    }
}

fn ready<T>(poll: Poll<T>) -> Option<T> {
    match poll {
        Poll::Ready(value) => Some(value),
        Poll::Pending => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::FutureExt;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    use crate::endpoint::EndpointState;
    use crate::envelope::PeerIdentity;
    use crate::errors::TransportCause;

    type Inbox = mpsc::UnboundedSender<Result<Envelope, TransportError>>;
    type Outbox = mpsc::UnboundedReceiver<Envelope>;

    struct MockEndpoint {
        kind: EndpointKind,
        state: EndpointState,
        inbox: mpsc::UnboundedReceiver<Result<Envelope, TransportError>>,
        outbox: mpsc::UnboundedSender<Envelope>,
        closes: Arc<AtomicUsize>,
        // every send fails as if the addressed peer were gone
        unroutable: bool,
        // every send waits forever, like a peer that stopped reading
        stalled: bool,
    }

    fn mock(kind: EndpointKind) -> (MockEndpoint, Inbox, Outbox, Arc<AtomicUsize>) {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));
        let endpoint = MockEndpoint {
            kind,
            state: EndpointState::Connected,
            inbox,
            outbox,
            closes: closes.clone(),
            unroutable: false,
            stalled: false,
        };
        (endpoint, inbox_tx, outbox_rx, closes)
    }

    #[async_trait]
    impl Endpoint for MockEndpoint {
        fn kind(&self) -> EndpointKind {
            self.kind
        }

        fn state(&self) -> EndpointState {
            self.state
        }

        fn register(&mut self) {
            self.state = EndpointState::Registered;
        }

        fn poll_receive(&mut self, cx: &mut Context<'_>) -> Poll<Result<Envelope, TransportError>> {
            match self.inbox.poll_recv(cx) {
                Poll::Ready(Some(received)) => Poll::Ready(received),
                // no more input: stay idle
                Poll::Ready(None) | Poll::Pending => Poll::Pending,
            }
        }

        async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
            if self.stalled {
                std::future::pending::<()>().await;
            }
            if self.unroutable {
                let (identity, _) = envelope
                    .pop_identity()
                    .map_err(|e| TransportError::send(self.kind, e))?;
                return Err(TransportError::send(
                    self.kind,
                    TransportCause::PeerNotConnected(identity),
                ));
            }
            self.outbox
                .send(envelope)
                .map_err(|_| TransportError::send(self.kind, TransportCause::Closed))
        }

        async fn close(&mut self) {
            if self.state != EndpointState::Closed {
                self.state = EndpointState::Closed;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn request(peer: u32, payload: &str) -> Envelope {
        let mut envelope = Envelope::from_frames([String::new(), payload.to_owned()]).unwrap();
        envelope.push_identity(PeerIdentity::generate(peer));
        envelope
    }

    fn payload(envelope: &Envelope) -> Bytes {
        envelope.payload().clone()
    }

    #[tokio::test]
    async fn test_one_envelope_per_endpoint_per_cycle() {
        let (upstream, up_in, mut up_out, _) = mock(EndpointKind::Upstream);
        let (downstream, down_in, mut down_out, _) = mock(EndpointKind::Downstream);

        for i in 0..3 {
            up_in.send(Ok(request(1, &format!("req-{}", i)))).unwrap();
            down_in.send(Ok(request(1, &format!("rep-{}", i)))).unwrap();
        }

        let mut relay = Relay::new(upstream, downstream, FailurePolicy::Shutdown);
        assert_eq!(relay.state(), LoopState::Initializing);
        assert_eq!(relay.upstream().state(), EndpointState::Registered);

        let token = CancellationToken::new();
        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                let result = relay.run(token).await;
                (relay, result)
            }
        });

        // per-source order is kept and frames are untouched
        for i in 0..3 {
            let forwarded = down_out.recv().await.unwrap();
            assert_eq!(forwarded, request(1, &format!("req-{}", i)));
            let replied = up_out.recv().await.unwrap();
            assert_eq!(payload(&replied), format!("rep-{}", i));
            assert_eq!(replied.frame_count(), 3);
        }

        token.cancel();
        let (relay, result) = handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(relay.state(), LoopState::Terminated);
        assert_eq!(
            relay.stats(),
            RelayStats {
                cycles: 3,
                requests: 3,
                replies: 3,
                dropped: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_readiness() {
        let (upstream, up_in, _up_out, _) = mock(EndpointKind::Upstream);
        let (downstream, _down_in, _down_out, _) = mock(EndpointKind::Downstream);
        let mut relay = Relay::new(upstream, downstream, FailurePolicy::Shutdown);

        // nothing buffered: the wait does not complete
        assert!(relay.wait_readiness().now_or_never().is_none());

        up_in.send(Ok(Envelope::single("x"))).unwrap();
        let readiness = relay.wait_readiness().now_or_never().unwrap();
        assert!(!readiness.is_empty());
        assert_eq!(readiness.upstream.unwrap().unwrap(), Envelope::single("x"));
        assert!(readiness.downstream.is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_downstream_error_is_fatal() {
        let (upstream, _up_in, _up_out, up_closes) = mock(EndpointKind::Upstream);
        let (downstream, down_in, _down_out, down_closes) = mock(EndpointKind::Downstream);

        down_in
            .send(Err(TransportError::receive(
                EndpointKind::Downstream,
                TransportCause::PeerClosed,
            )))
            .unwrap();

        let mut relay = Relay::new(upstream, downstream, FailurePolicy::IsolatePeer);
        let err = relay.run(CancellationToken::new()).await.unwrap_err();

        assert_eq!(err.exit_code(), 2);
        match err {
            RelayError::Transport(e) => assert_eq!(e.endpoint, EndpointKind::Downstream),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(relay.state(), LoopState::Terminated);
        assert_eq!(up_closes.load(Ordering::SeqCst), 1);
        assert_eq!(down_closes.load(Ordering::SeqCst), 1);
        assert!(logs_contain("forwarding failed"));
    }

    #[tokio::test]
    async fn test_unroutable_reply_stops_relay() {
        let (mut upstream, _up_in, _up_out, _) = mock(EndpointKind::Upstream);
        upstream.unroutable = true;
        let (downstream, down_in, _down_out, _) = mock(EndpointKind::Downstream);

        down_in.send(Ok(request(7, "PONG"))).unwrap();

        let mut relay = Relay::new(upstream, downstream, FailurePolicy::Shutdown);
        let err = relay.run(CancellationToken::new()).await.unwrap_err();
        match err {
            RelayError::Transport(e) => {
                assert_eq!(e.endpoint, EndpointKind::Upstream);
                assert!(e.is_peer_not_connected());
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unroutable_reply_is_dropped_when_isolating() {
        let (mut upstream, up_in, _up_out, _) = mock(EndpointKind::Upstream);
        upstream.unroutable = true;
        let (downstream, down_in, mut down_out, _) = mock(EndpointKind::Downstream);

        down_in.send(Ok(request(7, "PONG"))).unwrap();

        let mut relay = Relay::new(upstream, downstream, FailurePolicy::IsolatePeer);
        let token = CancellationToken::new();

        // the relay keeps serving after the drop
        let driver = async {
            up_in.send(Ok(request(8, "PING"))).unwrap();
            assert_eq!(payload(&down_out.recv().await.unwrap()), "PING");
            token.cancel();
        };
        let (result, _) = tokio::join!(relay.run(token.clone()), driver);

        assert!(result.is_ok());
        assert_eq!(relay.stats().dropped, 1);
        assert_eq!(relay.stats().requests, 1);
        assert!(logs_contain("dropping unroutable reply"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_cancel_while_send_is_stuck() {
        let (upstream, up_in, _up_out, up_closes) = mock(EndpointKind::Upstream);
        let (mut downstream, _down_in, _down_out, down_closes) = mock(EndpointKind::Downstream);
        downstream.stalled = true;

        up_in.send(Ok(request(1, "PING"))).unwrap();

        let mut relay = Relay::new(upstream, downstream, FailurePolicy::Shutdown);
        let token = CancellationToken::new();
        let cancel = token.clone();
        let driver = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };

        let (result, _) = tokio::time::timeout(
            Duration::from_secs(2),
            async { tokio::join!(relay.run(token), driver) },
        )
        .await
        .expect("cancellation must interrupt a stuck send");

        assert!(result.is_ok());
        assert_eq!(relay.state(), LoopState::Terminated);
        assert_eq!(relay.stats().cycles, 1);
        assert_eq!(relay.stats().requests, 0);
        assert_eq!(up_closes.load(Ordering::SeqCst), 1);
        assert_eq!(down_closes.load(Ordering::SeqCst), 1);
        assert!(logs_contain("relay cancelled while forwarding"));
    }

    #[tokio::test]
    async fn test_cancel_before_traffic() {
        let (upstream, _up_in, _up_out, up_closes) = mock(EndpointKind::Upstream);
        let (downstream, _down_in, _down_out, down_closes) = mock(EndpointKind::Downstream);
        let mut relay = Relay::new(upstream, downstream, FailurePolicy::Shutdown);

        let token = CancellationToken::new();
        token.cancel();
        relay.run(token).await.unwrap();

        assert_eq!(relay.state(), LoopState::Terminated);
        assert_eq!(relay.stats(), RelayStats::default());
        assert_eq!(up_closes.load(Ordering::SeqCst), 1);
        assert_eq!(down_closes.load(Ordering::SeqCst), 1);

        // running a terminated relay is a no-op
        relay.run(CancellationToken::new()).await.unwrap();
        assert_eq!(up_closes.load(Ordering::SeqCst), 1);
    }
}
