//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management and a two-state
//! machine for fragmented frames:
//! - `NeedHeader`: waiting for the 24 header bytes
//! - `NeedBody`: header parsed, waiting for `body_length` more bytes
//!
//! Validation happens as soon as the header is complete: the magic must be
//! one of the five recognized values, client responses must carry a known
//! client opcode and server requests a known server opcode. A violation is
//! a hard failure; the session closes the socket on it. The decoder is
//! restartable after every yielded frame and never allocates beyond the
//! current frame.

use bytes::{Bytes, BytesMut};

use super::frame::Message;
use super::opcode::{ClientOpcode, ServerOpcode};
use super::wire_format::{Header, Magic, HEADER_SIZE};
use crate::error::ErrorKind;

/// Upper bound on a single frame body. The data service caps values at
/// 20 MiB; anything past this is a corrupt length field.
pub const MAX_BODY_SIZE: u32 = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
enum State {
    NeedHeader,
    NeedBody { header: Header, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(16 * 1024),
            state: State::NeedHeader,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns every frame that became complete with this chunk; partial
    /// data is kept for the next push. A malformed header yields
    /// `ErrorKind::ProtocolError` and the decoder must not be reused.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Message>, ErrorKind> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Message>, ErrorKind> {
        match &self.state {
            State::NeedHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let header =
                    Header::decode(&self.buffer[..HEADER_SIZE]).expect("buffer has enough bytes");
                validate_header(&header)?;

                let _ = self.buffer.split_to(HEADER_SIZE);

                if header.body_length == 0 {
                    return Ok(Some(Message::new(header, Bytes::new())));
                }

                self.state = State::NeedBody {
                    header,
                    remaining: header.body_length,
                };
                self.try_extract_one()
            }

            State::NeedBody { header, remaining } => {
                let remaining = *remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let body = self.buffer.split_to(remaining).freeze();
                let header = *header;
                self.state = State::NeedHeader;

                Ok(Some(Message::new(header, body)))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::NeedHeader => "NeedHeader",
            State::NeedBody { .. } => "NeedBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_header(header: &Header) -> Result<(), ErrorKind> {
    let magic = match Magic::try_from(header.magic) {
        Ok(magic) => magic,
        Err(byte) => {
            tracing::error!("invalid magic byte: {:#04x}", byte);
            return Err(ErrorKind::ProtocolError);
        }
    };

    if magic.is_client_response() && ClientOpcode::try_from(header.opcode).is_err() {
        tracing::error!("invalid client opcode in response: {:#04x}", header.opcode);
        return Err(ErrorKind::ProtocolError);
    }
    if magic == Magic::ServerRequest && ServerOpcode::try_from(header.opcode).is_err() {
        tracing::error!("invalid server request opcode: {:#04x}", header.opcode);
        return Err(ErrorKind::ProtocolError);
    }

    if !header.sections_consistent() {
        tracing::error!(
            "inconsistent body sections: extras={} key={} body={}",
            header.extras_length,
            header.key_length,
            header.body_length
        );
        return Err(ErrorKind::ProtocolError);
    }

    if header.body_length > MAX_BODY_SIZE {
        tracing::error!("body length {} exceeds maximum", header.body_length);
        return Err(ErrorKind::ProtocolError);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame_bytes(magic: u8, opcode: u8, opaque: u32, body: &[u8]) -> Vec<u8> {
        let header = Header {
            magic,
            opcode,
            body_length: body.len() as u32,
            opaque,
            ..Header::default()
        };
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = make_frame_bytes(0x81, 0x00, 42, b"hello");

        let frames = buffer.push(&frame_bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opaque(), 42);
        assert_eq!(&frames[0].body[..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn decode_then_encode_is_identity() {
        let mut buffer = FrameBuffer::new();
        let original = make_frame_bytes(0x81, 0xd1, 0xDEADBEEF, b"\x00\x00\x00abc");

        let frames = buffer.push(&original).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].encode(), original);
    }

    #[test]
    fn multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Vec::new();
        combined.extend_from_slice(&make_frame_bytes(0x81, 0x00, 1, b"first"));
        combined.extend_from_slice(&make_frame_bytes(0x81, 0x01, 2, b"second"));
        combined.extend_from_slice(&make_frame_bytes(0x81, 0x04, 3, b"third"));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opaque(), 1);
        assert_eq!(frames[1].opaque(), 2);
        assert_eq!(frames[2].opaque(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn fragmented_header() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = make_frame_bytes(0x81, 0x00, 42, b"test");

        let frames = buffer.push(&frame_bytes[..10]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "NeedHeader");

        let frames = buffer.push(&frame_bytes[10..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn fragmented_body() {
        let mut buffer = FrameBuffer::new();
        let body = b"a body that arrives in two reads";
        let frame_bytes = make_frame_bytes(0x81, 0x00, 42, body);

        let partial = HEADER_SIZE + 10;
        let frames = buffer.push(&frame_bytes[..partial]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "NeedBody");

        let frames = buffer.push(&frame_bytes[partial..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].body[..], body);
    }

    #[test]
    fn byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = make_frame_bytes(0x81, 0x00, 42, b"hi");

        let mut all_frames = Vec::new();
        for byte in &frame_bytes {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(&all_frames[0].body[..], b"hi");
    }

    #[test]
    fn empty_body() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = make_frame_bytes(0x81, 0x00, 42, b"");

        let frames = buffer.push(&frame_bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].body.is_empty());
    }

    #[test]
    fn unknown_magic_fails() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = make_frame_bytes(0x55, 0x00, 42, b"");
        assert_eq!(buffer.push(&frame_bytes), Err(ErrorKind::ProtocolError));
    }

    #[test]
    fn unknown_client_opcode_in_response_fails() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = make_frame_bytes(0x81, 0x7b, 42, b"");
        assert_eq!(buffer.push(&frame_bytes), Err(ErrorKind::ProtocolError));
    }

    #[test]
    fn unknown_server_opcode_fails() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = make_frame_bytes(0x82, 0x42, 42, b"");
        assert_eq!(buffer.push(&frame_bytes), Err(ErrorKind::ProtocolError));
    }

    #[test]
    fn client_request_opcode_not_validated() {
        // Requests flow the other way; the decoder only validates what a
        // client can legitimately receive.
        let mut buffer = FrameBuffer::new();
        let frame_bytes = make_frame_bytes(0x80, 0x7b, 42, b"");
        assert!(buffer.push(&frame_bytes).is_ok());
    }

    #[test]
    fn inconsistent_sections_fail() {
        let header = Header {
            magic: 0x81,
            opcode: 0x00,
            key_length: 10,
            extras_length: 4,
            body_length: 7,
            ..Header::default()
        };
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&[0u8; 7]);

        let mut buffer = FrameBuffer::new();
        assert_eq!(buffer.push(&bytes), Err(ErrorKind::ProtocolError));
    }

    #[test]
    fn oversized_body_fails() {
        let header = Header {
            magic: 0x81,
            opcode: 0x00,
            body_length: MAX_BODY_SIZE + 1,
            ..Header::default()
        };
        let mut buffer = FrameBuffer::new();
        assert_eq!(buffer.push(&header.encode()), Err(ErrorKind::ProtocolError));
    }

    #[test]
    fn mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();
        let frame1 = make_frame_bytes(0x81, 0x00, 1, b"first");
        let frame2 = make_frame_bytes(0x81, 0x00, 2, b"second");

        let mut data = frame1.clone();
        data.extend_from_slice(&frame2[..5]);

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opaque(), 1);

        let frames = buffer.push(&frame2[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].opaque(), 2);
    }
}
