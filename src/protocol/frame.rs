//! Frame struct with typed accessors and request encoding.
//!
//! A [`Message`] is one complete MCBP frame: the decoded header plus the
//! body held as `bytes::Bytes` for zero-copy sharing. Body sections are
//! derived from the header: extras first, then key, then value.

use bytes::Bytes;

use super::opcode::ClientOpcode;
use super::wire_format::{Header, Magic, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Decoded header.
    pub header: Header,
    /// Body bytes: extras, key, value (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Message {
    /// Create a new frame from header and body.
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Get the opaque correlation token.
    #[inline]
    pub fn opaque(&self) -> u32 {
        self.header.opaque
    }

    /// Get the status field (responses only).
    #[inline]
    pub fn status(&self) -> u16 {
        self.header.specific
    }

    /// Get the CAS value.
    #[inline]
    pub fn cas(&self) -> u64 {
        self.header.cas
    }

    /// Extras section of the body.
    #[inline]
    pub fn extras(&self) -> &[u8] {
        &self.body[..usize::from(self.header.extras_length)]
    }

    /// Key section of the body.
    #[inline]
    pub fn key(&self) -> &[u8] {
        let start = usize::from(self.header.extras_length);
        &self.body[start..start + usize::from(self.header.key_length)]
    }

    /// Value section of the body.
    #[inline]
    pub fn value(&self) -> &[u8] {
        let start =
            usize::from(self.header.extras_length) + usize::from(self.header.key_length);
        &self.body[start..]
    }

    /// Encode the frame back to its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.body.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// Builder for encoded client requests.
///
/// Produces a contiguous byte vector with the opaque at offset 12, the
/// precondition `write_and_subscribe` relies on.
#[derive(Debug, Default)]
pub struct RequestBuilder {
    opcode: u8,
    partition: u16,
    opaque: u32,
    cas: u64,
    data_type: u8,
    extras: Vec<u8>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl RequestBuilder {
    /// Start a request for the given opcode and opaque.
    pub fn new(opcode: ClientOpcode, opaque: u32) -> Self {
        Self {
            opcode: opcode as u8,
            opaque,
            ..Self::default()
        }
    }

    /// Set the target vbucket.
    pub fn partition(mut self, id: u16) -> Self {
        self.partition = id;
        self
    }

    /// Set the CAS field.
    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    /// Set the datatype byte.
    pub fn data_type(mut self, data_type: u8) -> Self {
        self.data_type = data_type;
        self
    }

    /// Set the extras section.
    pub fn extras(mut self, extras: Vec<u8>) -> Self {
        self.extras = extras;
        self
    }

    /// Set the key section.
    pub fn key(mut self, key: Vec<u8>) -> Self {
        self.key = key;
        self
    }

    /// Set the value section.
    pub fn value(mut self, value: Vec<u8>) -> Self {
        self.value = value;
        self
    }

    /// Encode the request as header + extras + key + value.
    pub fn build(self) -> Vec<u8> {
        let body_length = self.extras.len() + self.key.len() + self.value.len();
        let header = Header {
            magic: Magic::ClientRequest as u8,
            opcode: self.opcode,
            key_length: self.key.len() as u16,
            extras_length: self.extras.len() as u8,
            data_type: self.data_type,
            specific: self.partition,
            body_length: body_length as u32,
            opaque: self.opaque,
            cas: self.cas,
        };
        let mut buf = Vec::with_capacity(HEADER_SIZE + body_length);
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&self.extras);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_message(extras: &[u8], key: &[u8], value: &[u8]) -> Message {
        let mut body = Vec::new();
        body.extend_from_slice(extras);
        body.extend_from_slice(key);
        body.extend_from_slice(value);
        let header = Header {
            magic: Magic::ClientResponse as u8,
            opcode: ClientOpcode::Get as u8,
            key_length: key.len() as u16,
            extras_length: extras.len() as u8,
            data_type: 0,
            specific: 0,
            body_length: body.len() as u32,
            opaque: 7,
            cas: 0,
        };
        Message::new(header, Bytes::from(body))
    }

    #[test]
    fn body_section_accessors() {
        let msg = response_message(&[0xDE, 0xAD], b"key", b"value");
        assert_eq!(msg.extras(), &[0xDE, 0xAD]);
        assert_eq!(msg.key(), b"key");
        assert_eq!(msg.value(), b"value");
    }

    #[test]
    fn empty_sections() {
        let msg = response_message(&[], b"", b"value-only");
        assert!(msg.extras().is_empty());
        assert!(msg.key().is_empty());
        assert_eq!(msg.value(), b"value-only");
    }

    #[test]
    fn request_opaque_lands_at_offset_12() {
        let encoded = RequestBuilder::new(ClientOpcode::Get, 0xCAFEBABE)
            .key(b"doc".to_vec())
            .build();
        let opaque = u32::from_ne_bytes([encoded[12], encoded[13], encoded[14], encoded[15]]);
        assert_eq!(opaque, 0xCAFEBABE);
    }

    #[test]
    fn request_layout() {
        let encoded = RequestBuilder::new(ClientOpcode::Upsert, 9)
            .partition(0x0102)
            .extras(vec![1, 2, 3, 4])
            .key(b"k".to_vec())
            .value(b"vv".to_vec())
            .build();

        let header = Header::decode(&encoded).unwrap();
        assert_eq!(header.magic, Magic::ClientRequest as u8);
        assert_eq!(header.opcode, ClientOpcode::Upsert as u8);
        assert_eq!(header.extras_length, 4);
        assert_eq!(header.key_length, 1);
        assert_eq!(header.specific, 0x0102);
        assert_eq!(header.body_length, 7);
        assert_eq!(&encoded[HEADER_SIZE..HEADER_SIZE + 4], &[1, 2, 3, 4]);
        assert_eq!(&encoded[HEADER_SIZE + 4..HEADER_SIZE + 5], b"k");
        assert_eq!(&encoded[HEADER_SIZE + 5..], b"vv");
    }

    #[test]
    fn message_encode_matches_sections() {
        let msg = response_message(&[9], b"ab", b"cde");
        let encoded = msg.encode();
        assert_eq!(encoded.len(), HEADER_SIZE + 6);
        let reparsed = Header::decode(&encoded).unwrap();
        assert_eq!(reparsed, msg.header);
        assert_eq!(&encoded[HEADER_SIZE..], &msg.body[..]);
    }
}
