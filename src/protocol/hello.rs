//! HELLO feature negotiation.
//!
//! The HELLO request carries a user-agent string in the key and the
//! requested feature codes (2 bytes each, Big Endian) in the value. The
//! response echoes back the subset the server enabled for the connection.

use super::frame::{Message, RequestBuilder};
use super::opcode::ClientOpcode;

/// Features negotiable through HELLO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum HelloFeature {
    Tls = 0x02,
    TcpNodelay = 0x03,
    MutationSeqno = 0x04,
    TcpDelay = 0x05,
    Xattr = 0x06,
    Xerror = 0x07,
    SelectBucket = 0x08,
    Snappy = 0x0a,
    Json = 0x0b,
    Duplex = 0x0c,
    ClustermapChangeNotification = 0x0d,
    UnorderedExecution = 0x0e,
    Tracing = 0x0f,
    AltRequestSupport = 0x10,
    SyncReplication = 0x11,
    Collections = 0x12,
    OpenTracing = 0x13,
    CreateAsDeleted = 0x17,
}

impl TryFrom<u16> for HelloFeature {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        let feature = match value {
            0x02 => HelloFeature::Tls,
            0x03 => HelloFeature::TcpNodelay,
            0x04 => HelloFeature::MutationSeqno,
            0x05 => HelloFeature::TcpDelay,
            0x06 => HelloFeature::Xattr,
            0x07 => HelloFeature::Xerror,
            0x08 => HelloFeature::SelectBucket,
            0x0a => HelloFeature::Snappy,
            0x0b => HelloFeature::Json,
            0x0c => HelloFeature::Duplex,
            0x0d => HelloFeature::ClustermapChangeNotification,
            0x0e => HelloFeature::UnorderedExecution,
            0x0f => HelloFeature::Tracing,
            0x10 => HelloFeature::AltRequestSupport,
            0x11 => HelloFeature::SyncReplication,
            0x12 => HelloFeature::Collections,
            0x13 => HelloFeature::OpenTracing,
            0x17 => HelloFeature::CreateAsDeleted,
            other => return Err(other),
        };
        Ok(feature)
    }
}

impl std::fmt::Display for HelloFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HelloFeature::Tls => "tls",
            HelloFeature::TcpNodelay => "tcp_nodelay",
            HelloFeature::MutationSeqno => "mutation_seqno",
            HelloFeature::TcpDelay => "tcp_delay",
            HelloFeature::Xattr => "xattr",
            HelloFeature::Xerror => "xerror",
            HelloFeature::SelectBucket => "select_bucket",
            HelloFeature::Snappy => "snappy",
            HelloFeature::Json => "json",
            HelloFeature::Duplex => "duplex",
            HelloFeature::ClustermapChangeNotification => "clustermap_change_notification",
            HelloFeature::UnorderedExecution => "unordered_execution",
            HelloFeature::Tracing => "tracing",
            HelloFeature::AltRequestSupport => "alt_request_support",
            HelloFeature::SyncReplication => "sync_replication",
            HelloFeature::Collections => "collections",
            HelloFeature::OpenTracing => "open_tracing",
            HelloFeature::CreateAsDeleted => "create_as_deleted",
        };
        f.write_str(name)
    }
}

/// The feature vector this client asks for.
///
/// Snappy is deliberately absent: negotiating it would oblige the client to
/// inflate compressed values.
pub fn requested_features() -> Vec<HelloFeature> {
    vec![
        HelloFeature::TcpNodelay,
        HelloFeature::MutationSeqno,
        HelloFeature::Xattr,
        HelloFeature::Xerror,
        HelloFeature::SelectBucket,
        HelloFeature::Json,
        HelloFeature::Duplex,
        HelloFeature::ClustermapChangeNotification,
        HelloFeature::UnorderedExecution,
        HelloFeature::Tracing,
        HelloFeature::AltRequestSupport,
        HelloFeature::SyncReplication,
        HelloFeature::Collections,
        HelloFeature::CreateAsDeleted,
    ]
}

/// Build a HELLO request.
pub fn request(opaque: u32, user_agent: &str, features: &[HelloFeature]) -> Vec<u8> {
    let mut value = Vec::with_capacity(features.len() * 2);
    for feature in features {
        value.extend_from_slice(&(*feature as u16).to_be_bytes());
    }
    RequestBuilder::new(ClientOpcode::Hello, opaque)
        .key(user_agent.as_bytes().to_vec())
        .value(value)
        .build()
}

/// Parse the feature list from a HELLO response value. Codes this client
/// does not know are skipped.
pub fn parse_features(msg: &Message) -> Vec<HelloFeature> {
    msg.value()
        .chunks_exact(2)
        .filter_map(|pair| HelloFeature::try_from(u16::from_be_bytes([pair[0], pair[1]])).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::Header;
    use bytes::Bytes;

    #[test]
    fn request_layout() {
        let encoded = request(5, "{\"a\":\"x\"}", &[HelloFeature::Xerror, HelloFeature::Json]);
        let header = Header::decode(&encoded).unwrap();
        assert_eq!(header.opcode, ClientOpcode::Hello as u8);
        assert_eq!(header.key_length, 9);
        assert_eq!(header.body_length, 9 + 4);
        // Feature codes in BE after the key.
        assert_eq!(&encoded[24 + 9..], &[0x00, 0x07, 0x00, 0x0b]);
    }

    #[test]
    fn parse_skips_unknown_codes() {
        let value = [0x00u8, 0x07, 0x7f, 0x00, 0x00, 0x12];
        let header = Header {
            magic: 0x81,
            opcode: ClientOpcode::Hello as u8,
            body_length: value.len() as u32,
            ..Header::default()
        };
        let msg = Message::new(header, Bytes::copy_from_slice(&value));
        assert_eq!(
            parse_features(&msg),
            vec![HelloFeature::Xerror, HelloFeature::Collections]
        );
    }

    #[test]
    fn parse_ignores_trailing_odd_byte() {
        let value = [0x00u8, 0x08, 0x01];
        let header = Header {
            magic: 0x81,
            opcode: ClientOpcode::Hello as u8,
            body_length: value.len() as u32,
            ..Header::default()
        };
        let msg = Message::new(header, Bytes::copy_from_slice(&value));
        assert_eq!(parse_features(&msg), vec![HelloFeature::SelectBucket]);
    }

    #[test]
    fn requested_features_exclude_snappy() {
        assert!(!requested_features().contains(&HelloFeature::Snappy));
        assert!(requested_features().contains(&HelloFeature::Xerror));
        assert!(requested_features().contains(&HelloFeature::SelectBucket));
    }
}
