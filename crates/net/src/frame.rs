//! Length-prefixed frame assembly over a byte stream.
//!
//! Wire format: `u32 length (little-endian) | length bytes of payload`. The
//! prefix never counts itself, and a frame only exists once every payload
//! byte has arrived.

use thiserror::Error;

/// Size of the little-endian frame length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Hard cap on a single frame's payload length.
///
/// A declared length above this is a protocol violation that fails the
/// connection instead of growing the accumulator without bound.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Framing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Peer declared a frame larger than [`MAX_FRAME_LEN`].
    #[error("declared frame length {0} exceeds the {MAX_FRAME_LEN}-byte maximum")]
    Oversized(usize),
    /// Outgoing payload larger than [`MAX_FRAME_LEN`].
    #[error("payload of {0} bytes exceeds the {MAX_FRAME_LEN}-byte frame maximum")]
    PayloadTooLarge(usize),
}

/// Prefix `payload` with its u32 little-endian length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Buffers raw stream bytes and carves complete frames off the front.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    /// An empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received stream bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet assembled into a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Carve the next complete frame, if one has fully arrived.
    ///
    /// `Ok(None)` means the prefix or payload is still partial; call again
    /// after feeding more bytes. Consumed bytes are removed from the front,
    /// leaving any trailing partial frame in place.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let declared =
            u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if declared > MAX_FRAME_LEN {
            return Err(FrameError::Oversized(declared));
        }
        let total = FRAME_HEADER_LEN + declared;
        if self.buf.len() < total {
            return Ok(None);
        }
        let payload = self.buf[FRAME_HEADER_LEN..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_reassembles() {
        let mut acc = FrameAccumulator::new();
        acc.extend(&encode_frame(b"hello").unwrap());
        assert_eq!(acc.next_frame().unwrap(), Some(b"hello".to_vec()));
        assert_eq!(acc.next_frame().unwrap(), None);
        assert_eq!(acc.pending(), 0);
    }

    #[test]
    fn one_byte_chunks_yield_exactly_one_frame() {
        let frame = encode_frame(b"trickle").unwrap();
        let mut acc = FrameAccumulator::new();
        let mut decoded = Vec::new();
        for byte in &frame {
            acc.extend(&[*byte]);
            while let Some(payload) = acc.next_frame().unwrap() {
                decoded.push(payload);
            }
        }
        assert_eq!(decoded, vec![b"trickle".to_vec()]);
    }

    #[test]
    fn partial_payload_waits_for_the_rest() {
        let mut acc = FrameAccumulator::new();
        acc.extend(&100u32.to_le_bytes());
        acc.extend(&[0u8; 50]);
        assert_eq!(acc.next_frame().unwrap(), None);

        acc.extend(&[0u8; 50]);
        assert_eq!(acc.next_frame().unwrap(), Some(vec![0u8; 100]));
    }

    #[test]
    fn back_to_back_frames_carve_in_order() {
        let mut acc = FrameAccumulator::new();
        let mut bytes = encode_frame(b"first").unwrap();
        bytes.extend_from_slice(&encode_frame(b"").unwrap());
        bytes.extend_from_slice(&encode_frame(b"third").unwrap());
        acc.extend(&bytes);

        assert_eq!(acc.next_frame().unwrap(), Some(b"first".to_vec()));
        assert_eq!(acc.next_frame().unwrap(), Some(Vec::new()));
        assert_eq!(acc.next_frame().unwrap(), Some(b"third".to_vec()));
        assert_eq!(acc.next_frame().unwrap(), None);
    }

    #[test]
    fn oversized_declared_length_is_a_protocol_violation() {
        let mut acc = FrameAccumulator::new();
        acc.extend(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes());
        assert_eq!(
            acc.next_frame(),
            Err(FrameError::Oversized(MAX_FRAME_LEN + 1))
        );
    }

    #[test]
    fn oversized_outgoing_payload_is_rejected() {
        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        assert_eq!(
            encode_frame(&payload),
            Err(FrameError::PayloadTooLarge(MAX_FRAME_LEN + 1))
        );
    }
}
