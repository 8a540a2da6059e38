// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Multi-frame envelopes and the peer identities that address them.
//!
//! An [`Envelope`] is never empty. On the upstream side frame 0 is the
//! identity of the sending peer, the last frame is the payload, and anything
//! in between is routing metadata that is relayed untouched.

use std::fmt;

use bytes::Bytes;

use crate::errors::EnvelopeError;

/// Opaque address token assigned by the upstream transport to a connection.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity(Bytes);

impl PeerIdentity {
    pub fn new(id: impl Into<Bytes>) -> Self {
        PeerIdentity(id.into())
    }

    /// Generated identities are a zero byte followed by a big-endian
    /// connection counter, so they never collide with each other.
    pub fn generate(counter: u32) -> Self {
        let mut id = Vec::with_capacity(5);
        id.push(0u8);
        id.extend_from_slice(&counter.to_be_bytes());
        PeerIdentity(Bytes::from(id))
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerIdentity({})", self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    frames: Vec<Bytes>,
}

impl Envelope {
    /// Build an envelope out of its frames. Fails if there are none.
    pub fn new(frames: Vec<Bytes>) -> Result<Self, EnvelopeError> {
        if frames.is_empty() {
            return Err(EnvelopeError::Empty);
        }

        Ok(Envelope { frames })
    }

    pub fn from_frames<I, F>(frames: I) -> Result<Self, EnvelopeError>
    where
        I: IntoIterator<Item = F>,
        F: Into<Bytes>,
    {
        Envelope::new(frames.into_iter().map(Into::into).collect())
    }

    /// Envelope made of a single payload frame.
    pub fn single(payload: impl Into<Bytes>) -> Self {
        Envelope {
            frames: vec![payload.into()],
        }
    }

    // the caller guarantees that frames is not empty
    pub(crate) fn from_decoded(frames: Vec<Bytes>) -> Self {
        debug_assert!(!frames.is_empty());
        Envelope { frames }
    }

    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn payload(&self) -> &Bytes {
        // non-empty by construction
        &self.frames[self.frames.len() - 1]
    }

    /// Total number of payload bytes over all frames.
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }

    /// Prepend the identity of the peer the envelope was received from.
    pub fn push_identity(&mut self, identity: PeerIdentity) {
        self.frames.insert(0, identity.into_bytes());
    }

    /// Split off the leading identity frame. The remaining envelope must
    /// still hold at least one frame.
    pub fn pop_identity(mut self) -> Result<(PeerIdentity, Envelope), EnvelopeError> {
        if self.frames.len() < 2 {
            return Err(EnvelopeError::MissingIdentity);
        }

        let identity = PeerIdentity(self.frames.remove(0));
        Ok((identity, self))
    }

    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }
}

impl From<Envelope> for Vec<Bytes> {
    fn from(envelope: Envelope) -> Self {
        envelope.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_envelope_is_rejected() {
        assert_eq!(Envelope::new(vec![]), Err(EnvelopeError::Empty));
        assert!(Envelope::from_frames(Vec::<Bytes>::new()).is_err());
    }

    #[test]
    fn test_identity_push_and_pop() {
        let mut envelope = Envelope::from_frames(["meta", "", "PING"]).unwrap();
        let identity = PeerIdentity::generate(7);
        envelope.push_identity(identity.clone());

        assert_eq!(envelope.frame_count(), 4);
        assert_eq!(envelope.frames()[0], identity.as_bytes());
        assert_eq!(envelope.payload(), "PING");

        let (popped, rest) = envelope.pop_identity().unwrap();
        assert_eq!(popped, identity);
        assert_eq!(
            rest.frames().to_vec(),
            vec![Bytes::from("meta"), Bytes::new(), Bytes::from("PING")]
        );
    }

    #[test]
    fn test_pop_identity_needs_a_payload() {
        let envelope = Envelope::single("only-identity");
        assert_eq!(
            envelope.pop_identity().unwrap_err(),
            EnvelopeError::MissingIdentity
        );
    }

    #[test]
    fn test_generated_identities() {
        let a = PeerIdentity::generate(1);
        let b = PeerIdentity::generate(2);
        assert_ne!(a, b);
        assert_eq!(a.as_bytes().len(), 5);
        assert_eq!(a.to_string(), "0000000001");
        assert_eq!(format!("{:?}", b), "PeerIdentity(0000000002)");
    }

    #[test]
    fn test_byte_len() {
        let envelope = Envelope::from_frames(["ab", "cde"]).unwrap();
        assert_eq!(envelope.byte_len(), 5);
        assert_eq!(envelope.payload(), "cde");
    }
}
