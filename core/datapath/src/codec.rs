// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Framing of envelopes on a byte stream.
//!
//! Every frame is written as a flags byte, a big-endian `u32` length and the
//! frame bytes. Bit 0 of the flags (MORE) is set on every frame except the
//! last one of an envelope. The decoder only yields an envelope once its last
//! frame is complete, so callers never observe a partial envelope.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;
use crate::errors::CodecError;

pub const FLAG_MORE: u8 = 0x01;
pub const HEADER_LEN: usize = 5;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_FRAMES: usize = 1024;

#[derive(Debug)]
pub struct EnvelopeCodec {
    max_frame_size: usize,
    max_frames: usize,

    // frames of the envelope currently being decoded
    partial: Vec<Bytes>,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        EnvelopeCodec::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

// frame lengths travel as u32
const MAX_ENCODABLE_FRAME_SIZE: usize = u32::MAX as usize;

impl EnvelopeCodec {
    /// `max_frame_size` is capped at `u32::MAX`, the largest length the
    /// header can carry.
    pub fn new(max_frame_size: usize) -> Self {
        EnvelopeCodec {
            max_frame_size: max_frame_size.min(MAX_ENCODABLE_FRAME_SIZE),
            max_frames: DEFAULT_MAX_FRAMES,
            partial: Vec::new(),
        }
    }

    pub fn with_max_frames(self, max_frames: usize) -> Self {
        EnvelopeCodec { max_frames, ..self }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }
}

impl Clone for EnvelopeCodec {
    // a clone starts with an empty decode state
    fn clone(&self) -> Self {
        EnvelopeCodec::new(self.max_frame_size).with_max_frames(self.max_frames)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
        loop {
            if src.len() < HEADER_LEN {
                src.reserve(HEADER_LEN - src.len());
                return Ok(None);
            }

            let flags = src[0];
            if flags & !FLAG_MORE != 0 {
                return Err(CodecError::InvalidFlags(flags));
            }

            let size = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
            if size > self.max_frame_size {
                return Err(CodecError::FrameTooLarge {
                    size,
                    max: self.max_frame_size,
                });
            }

            if src.len() < HEADER_LEN + size {
                src.reserve(HEADER_LEN + size - src.len());
                return Ok(None);
            }

            src.advance(HEADER_LEN);
            self.partial.push(src.split_to(size).freeze());

            if self.partial.len() > self.max_frames {
                self.partial.clear();
                return Err(CodecError::TooManyFrames(self.max_frames));
            }

            if flags & FLAG_MORE == 0 {
                let frames = std::mem::take(&mut self.partial);
                return Ok(Some(Envelope::from_decoded(frames)));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
        match self.decode(src)? {
            Some(envelope) => Ok(Some(envelope)),
            None if src.is_empty() && self.partial.is_empty() => Ok(None),
            None => {
                self.partial.clear();
                Err(CodecError::Truncated)
            }
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
        if envelope.frame_count() > self.max_frames {
            return Err(CodecError::TooManyFrames(self.max_frames));
        }

        // check every frame before writing anything
        if let Some(frame) = envelope
            .frames()
            .iter()
            .find(|f| f.len() > self.max_frame_size)
        {
            return Err(CodecError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(envelope.frame_count() * HEADER_LEN + envelope.byte_len());

        let last = envelope.frame_count() - 1;
        for (i, frame) in envelope.into_frames().into_iter().enumerate() {
            let flags = if i < last { FLAG_MORE } else { 0 };
            dst.put_u8(flags);
            dst.put_u32(frame.len() as u32);
            dst.extend_from_slice(&frame);
        }

        Ok(())
    }
}
