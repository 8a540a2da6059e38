// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Peers used to exercise a relay hop: an [`EchoResponder`] acting as the
//! terminal server behind the relay and a [`Requester`] acting as a one-shot
//! request/reply client in front of it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use display_error_chain::ErrorChainExt;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use hoprelay_config::EndpointAddress;
use hoprelay_datapath::errors::{CodecError, EnvelopeError};
use hoprelay_datapath::{Envelope, EnvelopeCodec};

#[derive(Error, Debug)]
pub enum TestingError {
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("codec error")]
    Codec(#[from] CodecError),
    #[error("envelope error")]
    Envelope(#[from] EnvelopeError),
    #[error("connection closed by peer")]
    Closed,
}

/// Default reply function: `PING` becomes `PONG`, anything else is echoed.
pub fn echo(payload: &Bytes) -> Bytes {
    if payload.as_ref() == b"PING" {
        Bytes::from_static(b"PONG")
    } else {
        payload.clone()
    }
}

/// Build the reply to `request`: every leading frame is kept, the payload is
/// replaced by `reply(payload)`.
pub fn reply_to<F>(request: Envelope, reply: F) -> Result<Envelope, EnvelopeError>
where
    F: Fn(&Bytes) -> Bytes,
{
    let mut frames = request.into_frames();
    let payload = frames.pop().ok_or(EnvelopeError::Empty)?;
    frames.push(reply(&payload));
    Envelope::new(frames)
}

type ReplyFn = Arc<dyn Fn(&Bytes) -> Bytes + Send + Sync>;

/// Terminal responder: answers every envelope it receives on every accepted
/// connection.
pub struct EchoResponder {
    local_addr: SocketAddr,
    handled: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tracker: TaskTracker,
}

impl EchoResponder {
    pub async fn bind(address: &EndpointAddress) -> Result<Self, TestingError> {
        Self::bind_with(address, echo).await
    }

    pub async fn bind_with<F>(address: &EndpointAddress, reply: F) -> Result<Self, TestingError>
    where
        F: Fn(&Bytes) -> Bytes + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(address.socket_address()).await?;
        let local_addr = listener.local_addr()?;
        let handled = Arc::new(AtomicUsize::new(0));
        let cancellation_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(accept_loop(
            listener,
            Arc::new(reply),
            handled.clone(),
            cancellation_token.clone(),
            tracker.clone(),
        ));

        info!(%local_addr, "responder listening");

        Ok(EchoResponder {
            local_addr,
            handled,
            cancellation_token,
            tracker,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address to give a relay as its next hop.
    pub fn address(&self) -> EndpointAddress {
        EndpointAddress::new(self.local_addr.ip().to_string(), self.local_addr.port())
    }

    /// Number of envelopes answered so far.
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    /// Stop accepting and drop every open connection.
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(local_addr = %self.local_addr, "responder stopped");
    }
}

impl Drop for EchoResponder {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    reply: ReplyFn,
    handled: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    debug!(%remote, "responder accepted connection");
                    tracker.spawn(serve(
                        stream,
                        reply.clone(),
                        handled.clone(),
                        cancellation_token.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e.chain(), "responder accept failed");
                    break;
                }
            }
        }
    }
}

async fn serve(
    stream: TcpStream,
    reply: ReplyFn,
    handled: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
) {
    let mut framed = Framed::new(stream, EnvelopeCodec::default());

    loop {
        let request = tokio::select! {
            _ = cancellation_token.cancelled() => break,
            next = framed.next() => match next {
                Some(Ok(request)) => request,
                Some(Err(e)) => {
                    warn!(error = %e.chain(), "responder read failed");
                    break;
                }
                None => break,
            }
        };

        let response = match reply_to(request, reply.as_ref()) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e.chain(), "unable to build reply");
                break;
            }
        };

        if let Err(e) = framed.send(response).await {
            warn!(error = %e.chain(), "responder write failed");
            break;
        }
        handled.fetch_add(1, Ordering::SeqCst);
    }
}

/// One-shot request/reply client.
pub struct Requester {
    framed: Framed<TcpStream, EnvelopeCodec>,
    peer_addr: SocketAddr,
}

impl Requester {
    pub async fn connect(address: &EndpointAddress) -> Result<Self, TestingError> {
        let stream = TcpStream::connect(address.socket_address()).await?;
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        Ok(Requester {
            framed: Framed::new(stream, EnvelopeCodec::default()),
            peer_addr,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&mut self, envelope: Envelope) -> Result<(), TestingError> {
        self.framed.send(envelope).await?;
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<Envelope, TestingError> {
        match self.framed.next().await {
            Some(received) => Ok(received?),
            None => Err(TestingError::Closed),
        }
    }

    /// Send one envelope made of `frames` and wait for its reply.
    pub async fn request<I, F>(&mut self, frames: I) -> Result<Envelope, TestingError>
    where
        I: IntoIterator<Item = F>,
        F: Into<Bytes>,
    {
        self.send(Envelope::from_frames(frames)?).await?;
        self.receive().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_port() -> EndpointAddress {
        EndpointAddress::new("127.0.0.1", 0)
    }

    #[test]
    fn test_echo() {
        assert_eq!(echo(&Bytes::from_static(b"PING")), "PONG");
        assert_eq!(echo(&Bytes::from_static(b"hello")), "hello");
    }

    #[test]
    fn test_reply_keeps_leading_frames() {
        let request = Envelope::from_frames(["\x00id", "5556", "PING"]).unwrap();
        let reply = reply_to(request, echo).unwrap();
        assert_eq!(
            reply,
            Envelope::from_frames(["\x00id", "5556", "PONG"]).unwrap()
        );
    }

    #[tokio::test]
    async fn test_direct_request() {
        let responder = EchoResponder::bind(&any_port()).await.unwrap();
        let mut requester = Requester::connect(&responder.address()).await.unwrap();

        let reply = requester.request(["PING"]).await.unwrap();
        assert_eq!(reply, Envelope::single("PONG"));

        let reply = requester.request(["hint", "hello"]).await.unwrap();
        assert_eq!(reply, Envelope::from_frames(["hint", "hello"]).unwrap());
        assert_eq!(responder.handled(), 2);
    }

    #[tokio::test]
    async fn test_custom_reply() {
        let responder = EchoResponder::bind_with(&any_port(), |payload| {
            Bytes::from(payload.to_ascii_uppercase())
        })
        .await
        .unwrap();
        let mut requester = Requester::connect(&responder.address()).await.unwrap();

        let reply = requester.request(["abc"]).await.unwrap();
        assert_eq!(reply.payload(), "ABC");
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let responder = EchoResponder::bind(&any_port()).await.unwrap();
        let mut requester = Requester::connect(&responder.address()).await.unwrap();
        requester.request(["PING"]).await.unwrap();

        responder.shutdown().await;
        assert!(matches!(
            requester.receive().await,
            Err(TestingError::Closed) | Err(TestingError::Codec(_))
        ));
    }
}
