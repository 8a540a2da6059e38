// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod codec;
pub mod config;
pub mod downstream;
pub mod endpoint;
pub mod envelope;
pub mod errors;
pub mod relay;
pub mod upstream;

pub use codec::EnvelopeCodec;
pub use config::{FailurePolicy, RelayConfig};
pub use downstream::DownstreamEndpoint;
pub use endpoint::{Endpoint, EndpointState};
pub use envelope::{Envelope, PeerIdentity};
pub use errors::{RelayError, TransportError};
pub use relay::{LoopState, Readiness, Relay, RelayStats};
pub use upstream::UpstreamEndpoint;
