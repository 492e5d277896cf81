//! Key-value command bodies built directly by this crate.
//!
//! The full operations layer lives above the session; insert is carried
//! here because its response demonstrates the mutation-token extras shared
//! by every mutation opcode.

use super::frame::{Message, RequestBuilder};
use super::opcode::ClientOpcode;
use super::status::Status;

/// Token identifying one mutation in a vbucket's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutationToken {
    pub partition_uuid: u64,
    pub sequence_number: u64,
    pub partition_id: u16,
}

/// Prefix a key with the unsigned-LEB128 encoding of its collection id.
/// Required once the collections feature has been negotiated.
pub fn encode_collection_key(collection_id: u32, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 5);
    let mut value = collection_id;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
    out.extend_from_slice(key);
    out
}

/// Insert (add) request: fails with `document_exists` when the key is
/// already present.
#[derive(Debug, Clone, Default)]
pub struct InsertRequest {
    pub key: Vec<u8>,
    pub collection_id: Option<u32>,
    pub content: Vec<u8>,
    pub flags: u32,
    pub expiry: u32,
}

impl InsertRequest {
    /// Encode the request frame. Extras carry flags and expiry, both
    /// Big Endian.
    pub fn build(&self, opaque: u32, partition: u16) -> Vec<u8> {
        let mut extras = Vec::with_capacity(8);
        extras.extend_from_slice(&self.flags.to_be_bytes());
        extras.extend_from_slice(&self.expiry.to_be_bytes());

        let key = match self.collection_id {
            Some(cid) => encode_collection_key(cid, &self.key),
            None => self.key.clone(),
        };

        RequestBuilder::new(ClientOpcode::Insert, opaque)
            .partition(partition)
            .extras(extras)
            .key(key)
            .value(self.content.clone())
            .build()
    }
}

/// Extract the mutation token from a successful mutation response.
///
/// Present only when the mutation_seqno feature was negotiated; the token
/// then occupies the 16 extras bytes. `partition` is the vbucket the
/// request was sent to: the response's `specific` field carries the
/// status, so the caller supplies the partition from its own request.
pub fn parse_mutation_token(msg: &Message, partition: u16) -> Option<MutationToken> {
    if Status::try_from(msg.status()) != Ok(Status::Success) {
        return None;
    }
    let extras = msg.extras();
    if extras.len() != 16 {
        return None;
    }
    Some(MutationToken {
        partition_uuid: u64::from_be_bytes(extras[0..8].try_into().expect("checked length")),
        sequence_number: u64::from_be_bytes(extras[8..16].try_into().expect("checked length")),
        partition_id: partition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::Header;
    use bytes::Bytes;

    #[test]
    fn insert_extras_layout() {
        let req = InsertRequest {
            key: b"doc".to_vec(),
            content: b"{}".to_vec(),
            flags: 0x01020304,
            expiry: 300,
            ..InsertRequest::default()
        };
        let encoded = req.build(7, 0x0c);
        let header = Header::decode(&encoded).unwrap();
        assert_eq!(header.opcode, ClientOpcode::Insert as u8);
        assert_eq!(header.extras_length, 8);
        assert_eq!(header.key_length, 3);
        assert_eq!(header.specific, 0x0c);
        assert_eq!(&encoded[24..28], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&encoded[28..32], &300u32.to_be_bytes());
        assert_eq!(&encoded[32..35], b"doc");
        assert_eq!(&encoded[35..], b"{}");
    }

    #[test]
    fn leb128_collection_prefix() {
        assert_eq!(encode_collection_key(0, b"k"), b"\x00k".to_vec());
        assert_eq!(encode_collection_key(0x7f, b"k"), b"\x7fk".to_vec());
        assert_eq!(encode_collection_key(0x80, b"k"), b"\x80\x01k".to_vec());
        assert_eq!(
            encode_collection_key(0x1234, b""),
            vec![0xb4, 0x24]
        );
    }

    #[test]
    fn mutation_token_from_extras() {
        let mut body = Vec::new();
        body.extend_from_slice(&0x1111222233334444u64.to_be_bytes());
        body.extend_from_slice(&7u64.to_be_bytes());
        let header = Header {
            magic: 0x81,
            opcode: ClientOpcode::Insert as u8,
            extras_length: 16,
            specific: 0,
            body_length: 16,
            ..Header::default()
        };
        let msg = Message::new(header, Bytes::from(body));
        // The partition comes from the request that was sent, not from
        // the response header.
        let token = parse_mutation_token(&msg, 0x0c).unwrap();
        assert_eq!(token.partition_uuid, 0x1111222233334444);
        assert_eq!(token.sequence_number, 7);
        assert_eq!(token.partition_id, 0x0c);
    }

    #[test]
    fn no_token_without_extras() {
        let header = Header {
            magic: 0x81,
            opcode: ClientOpcode::Insert as u8,
            ..Header::default()
        };
        let msg = Message::new(header, Bytes::new());
        assert!(parse_mutation_token(&msg, 0).is_none());
    }

    #[test]
    fn no_token_on_error_status() {
        let header = Header {
            magic: 0x81,
            opcode: ClientOpcode::Insert as u8,
            specific: Status::Exists as u16,
            extras_length: 16,
            body_length: 16,
            ..Header::default()
        };
        let msg = Message::new(header, Bytes::from(vec![0u8; 16]));
        assert!(parse_mutation_token(&msg, 0).is_none());
    }
}
