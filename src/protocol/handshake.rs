//! Handshake command bodies: SASL, bucket selection, error map and
//! cluster configuration fetch.

use super::frame::{Message, RequestBuilder};
use super::opcode::ClientOpcode;
use crate::config::{ClusterConfig, ErrorMap};
use crate::error::ErrorKind;

/// Error map format version this client understands.
const ERROR_MAP_VERSION: u16 = 1;

/// Build a SASL-LIST-MECHS request.
pub fn sasl_list_mechs_request(opaque: u32) -> Vec<u8> {
    RequestBuilder::new(ClientOpcode::SaslListMechs, opaque).build()
}

/// Mechanism names offered by the server, whitespace-separated in the
/// response value.
pub fn parse_sasl_mechs(msg: &Message) -> Vec<String> {
    String::from_utf8_lossy(msg.value())
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// Build a SASL-AUTH request: mechanism name in the key, initial payload in
/// the value.
pub fn sasl_auth_request(opaque: u32, mechanism: &str, payload: &[u8]) -> Vec<u8> {
    RequestBuilder::new(ClientOpcode::SaslAuth, opaque)
        .key(mechanism.as_bytes().to_vec())
        .value(payload.to_vec())
        .build()
}

/// Build a SASL-STEP request, same layout as SASL-AUTH.
pub fn sasl_step_request(opaque: u32, mechanism: &str, payload: &[u8]) -> Vec<u8> {
    RequestBuilder::new(ClientOpcode::SaslStep, opaque)
        .key(mechanism.as_bytes().to_vec())
        .value(payload.to_vec())
        .build()
}

/// Build a SELECT-BUCKET request.
pub fn select_bucket_request(opaque: u32, bucket: &str) -> Vec<u8> {
    RequestBuilder::new(ClientOpcode::SelectBucket, opaque)
        .key(bucket.as_bytes().to_vec())
        .build()
}

/// Build a GET-ERROR-MAP request. The value carries the highest format
/// version the client accepts.
pub fn get_error_map_request(opaque: u32) -> Vec<u8> {
    RequestBuilder::new(ClientOpcode::GetErrorMap, opaque)
        .value(ERROR_MAP_VERSION.to_be_bytes().to_vec())
        .build()
}

/// Parse an error map response body.
pub fn parse_error_map(msg: &Message) -> Result<ErrorMap, ErrorKind> {
    serde_json::from_slice(msg.value()).map_err(|err| {
        tracing::warn!("unable to parse error map: {}", err);
        ErrorKind::ProtocolError
    })
}

/// Build a GET-CLUSTER-CONFIG request.
pub fn get_cluster_config_request(opaque: u32) -> Vec<u8> {
    RequestBuilder::new(ClientOpcode::GetClusterConfig, opaque).build()
}

/// Parse a cluster configuration from a response or notification value.
pub fn parse_cluster_config(value: &[u8]) -> Result<ClusterConfig, ErrorKind> {
    serde_json::from_slice(value).map_err(|err| {
        tracing::warn!("unable to parse cluster configuration: {}", err);
        ErrorKind::ProtocolError
    })
}
