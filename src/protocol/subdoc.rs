//! Subdocument multi-lookup and multi-mutation wire codecs.
//!
//! A multi-operation request packs path-level specs back to back in the
//! value section. Mutation entries carry a parameter, lookup entries do
//! not:
//! ```text
//! mutation: opcode(1) flags(1) path_len(2 BE) param_len(4 BE) path param
//! lookup:   opcode(1) flags(1) path_len(2 BE) path
//! ```
//! The response value is a sequence of per-field records; see
//! [`MutateInField`] and [`LookupInField`].

use bytes::Bytes;

use super::frame::{Message, RequestBuilder};
use super::opcode::{ClientOpcode, SubdocOpcode};
use super::status::Status;
use crate::error::ErrorKind;

/// Per-path flags.
pub mod path_flag {
    pub const CREATE_PARENTS: u8 = 0x01;
    pub const XATTR: u8 = 0x04;
    pub const EXPAND_MACROS: u8 = 0x10;
}

/// Whole-document flags, sent as a single extras byte when non-zero.
pub mod doc_flag {
    pub const ACCESS_DELETED: u8 = 0x04;
}

/// Upper bound on a single field value in a response record.
const MAX_FIELD_VALUE: u32 = 20 * 1024 * 1024;

/// Combine the boolean path options into the wire flag byte.
pub fn build_path_flags(xattr: bool, create_parents: bool, expand_macros: bool) -> u8 {
    let mut flags = 0;
    if xattr {
        flags |= path_flag::XATTR;
    }
    if create_parents {
        flags |= path_flag::CREATE_PARENTS;
    }
    if expand_macros {
        flags |= path_flag::EXPAND_MACROS;
    }
    flags
}

/// One mutation spec inside a multi-mutation request.
#[derive(Debug, Clone)]
pub struct MutateInSpec {
    pub opcode: SubdocOpcode,
    pub flags: u8,
    pub path: String,
    pub param: Vec<u8>,
}

/// Multi-mutation request: applies all specs atomically to one document.
#[derive(Debug, Clone, Default)]
pub struct MutateInRequest {
    specs: Vec<MutateInSpec>,
    access_deleted: bool,
}

impl MutateInRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutation spec.
    pub fn add_spec(
        &mut self,
        opcode: SubdocOpcode,
        xattr: bool,
        create_parents: bool,
        expand_macros: bool,
        path: &str,
        param: impl Into<Vec<u8>>,
    ) {
        self.specs.push(MutateInSpec {
            opcode,
            flags: build_path_flags(xattr, create_parents, expand_macros),
            path: path.to_owned(),
            param: param.into(),
        });
    }

    /// Allow the mutation to target a deleted (tombstoned) document.
    pub fn access_deleted(&mut self, value: bool) {
        self.access_deleted = value;
    }

    /// Encode the full request frame.
    pub fn build(&self, opaque: u32, partition: u16, key: &[u8], cas: u64) -> Vec<u8> {
        let mut builder = RequestBuilder::new(ClientOpcode::SubdocMultiMutation, opaque)
            .partition(partition)
            .cas(cas)
            .key(key.to_vec())
            .value(self.encode_value());
        if self.access_deleted {
            builder = builder.extras(vec![doc_flag::ACCESS_DELETED]);
        }
        builder.build()
    }

    fn encode_value(&self) -> Vec<u8> {
        let size: usize = self
            .specs
            .iter()
            .map(|spec| 1 + 1 + 2 + 4 + spec.path.len() + spec.param.len())
            .sum();
        let mut value = Vec::with_capacity(size);
        for spec in &self.specs {
            value.push(spec.opcode as u8);
            value.push(spec.flags);
            value.extend_from_slice(&(spec.path.len() as u16).to_be_bytes());
            value.extend_from_slice(&(spec.param.len() as u32).to_be_bytes());
            value.extend_from_slice(spec.path.as_bytes());
            value.extend_from_slice(&spec.param);
        }
        value
    }
}

/// One lookup spec inside a multi-lookup request.
#[derive(Debug, Clone)]
pub struct LookupInSpec {
    pub opcode: SubdocOpcode,
    pub flags: u8,
    pub path: String,
}

/// Multi-lookup request: reads several paths from one document.
#[derive(Debug, Clone, Default)]
pub struct LookupInRequest {
    specs: Vec<LookupInSpec>,
    access_deleted: bool,
}

impl LookupInRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lookup spec.
    pub fn add_spec(&mut self, opcode: SubdocOpcode, xattr: bool, path: &str) {
        self.specs.push(LookupInSpec {
            opcode,
            flags: build_path_flags(xattr, false, false),
            path: path.to_owned(),
        });
    }

    /// Allow the lookup to target a deleted (tombstoned) document.
    pub fn access_deleted(&mut self, value: bool) {
        self.access_deleted = value;
    }

    /// Encode the full request frame.
    pub fn build(&self, opaque: u32, partition: u16, key: &[u8]) -> Vec<u8> {
        let mut builder = RequestBuilder::new(ClientOpcode::SubdocMultiLookup, opaque)
            .partition(partition)
            .key(key.to_vec())
            .value(self.encode_value());
        if self.access_deleted {
            builder = builder.extras(vec![doc_flag::ACCESS_DELETED]);
        }
        builder.build()
    }

    fn encode_value(&self) -> Vec<u8> {
        let size: usize = self
            .specs
            .iter()
            .map(|spec| 1 + 1 + 2 + spec.path.len())
            .sum();
        let mut value = Vec::with_capacity(size);
        for spec in &self.specs {
            value.push(spec.opcode as u8);
            value.push(spec.flags);
            value.extend_from_slice(&(spec.path.len() as u16).to_be_bytes());
            value.extend_from_slice(spec.path.as_bytes());
        }
        value
    }
}

/// One per-path record in a multi-mutation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutateInField {
    /// Index of the spec this record answers (always < 16).
    pub index: u8,
    /// Path-level status.
    pub status: u16,
    /// Result value, present only on path-level success.
    pub value: Bytes,
}

/// One per-path record in a multi-lookup response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupInField {
    /// Path-level status.
    pub status: u16,
    /// Result value.
    pub value: Bytes,
}

fn has_field_records(status: u16) -> bool {
    matches!(
        Status::try_from(status),
        Ok(Status::Success) | Ok(Status::SubdocMultiPathFailure)
    )
}

/// Parse a multi-mutation response body.
///
/// Returns `Ok(None)` when the overall status does not carry per-field
/// records, `Err(protocol_error)` when the body is malformed.
pub fn parse_mutate_in(msg: &Message) -> Result<Option<Vec<MutateInField>>, ErrorKind> {
    if !has_field_records(msg.status()) {
        return Ok(None);
    }
    let value = msg.value();
    let mut fields = Vec::with_capacity(16);
    let mut offset = 0usize;
    while offset < value.len() {
        if offset + 3 > value.len() {
            return Err(ErrorKind::ProtocolError);
        }
        let index = value[offset];
        if index >= 16 {
            return Err(ErrorKind::ProtocolError);
        }
        let status = u16::from_be_bytes([value[offset + 1], value[offset + 2]]);
        offset += 3;

        let mut field_value = Bytes::new();
        if Status::try_from(status) == Ok(Status::Success) {
            if offset + 4 > value.len() {
                return Err(ErrorKind::ProtocolError);
            }
            let size = u32::from_be_bytes([
                value[offset],
                value[offset + 1],
                value[offset + 2],
                value[offset + 3],
            ]);
            offset += 4;
            if size >= MAX_FIELD_VALUE || offset + size as usize > value.len() {
                return Err(ErrorKind::ProtocolError);
            }
            field_value = Bytes::copy_from_slice(&value[offset..offset + size as usize]);
            offset += size as usize;
        }
        fields.push(MutateInField {
            index,
            status,
            value: field_value,
        });
    }
    Ok(Some(fields))
}

/// Parse a multi-lookup response body.
///
/// Lookup records carry a value for every field, error statuses included
/// (the value then holds the error context).
pub fn parse_lookup_in(msg: &Message) -> Result<Option<Vec<LookupInField>>, ErrorKind> {
    if !has_field_records(msg.status()) {
        return Ok(None);
    }
    let value = msg.value();
    let mut fields = Vec::with_capacity(16);
    let mut offset = 0usize;
    while offset < value.len() {
        if offset + 6 > value.len() {
            return Err(ErrorKind::ProtocolError);
        }
        let status = u16::from_be_bytes([value[offset], value[offset + 1]]);
        let size = u32::from_be_bytes([
            value[offset + 2],
            value[offset + 3],
            value[offset + 4],
            value[offset + 5],
        ]);
        offset += 6;
        if size >= MAX_FIELD_VALUE || offset + size as usize > value.len() {
            return Err(ErrorKind::ProtocolError);
        }
        let field_value = Bytes::copy_from_slice(&value[offset..offset + size as usize]);
        offset += size as usize;
        fields.push(LookupInField {
            status,
            value: field_value,
        });
    }
    Ok(Some(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::Header;

    fn response(opcode: ClientOpcode, status: Status, value: &[u8]) -> Message {
        let header = Header {
            magic: 0x81,
            opcode: opcode as u8,
            specific: status as u16,
            body_length: value.len() as u32,
            ..Header::default()
        };
        Message::new(header, Bytes::copy_from_slice(value))
    }

    #[test]
    fn mutate_entry_layout() {
        let mut req = MutateInRequest::new();
        req.add_spec(SubdocOpcode::DictUpsert, true, true, false, "a.b", b"1".as_slice());

        let encoded = req.build(9, 0, b"doc", 0);
        let header = Header::decode(&encoded).unwrap();
        assert_eq!(header.opcode, ClientOpcode::SubdocMultiMutation as u8);
        assert_eq!(header.extras_length, 0);

        let value = &encoded[24 + 3..];
        assert_eq!(value[0], SubdocOpcode::DictUpsert as u8);
        assert_eq!(value[1], path_flag::XATTR | path_flag::CREATE_PARENTS);
        assert_eq!(&value[2..4], &3u16.to_be_bytes());
        assert_eq!(&value[4..8], &1u32.to_be_bytes());
        assert_eq!(&value[8..11], b"a.b");
        assert_eq!(&value[11..], b"1");
    }

    #[test]
    fn access_deleted_sets_doc_flag_extras() {
        let mut req = MutateInRequest::new();
        req.add_spec(SubdocOpcode::Remove, false, false, false, "a", b"".as_slice());
        req.access_deleted(true);

        let encoded = req.build(1, 0, b"k", 0);
        let header = Header::decode(&encoded).unwrap();
        assert_eq!(header.extras_length, 1);
        assert_eq!(encoded[24], doc_flag::ACCESS_DELETED);
    }

    #[test]
    fn lookup_entry_layout() {
        let mut req = LookupInRequest::new();
        req.add_spec(SubdocOpcode::Get, false, "airline");
        req.add_spec(SubdocOpcode::Exists, true, "$document.exptime");

        let encoded = req.build(2, 0x11, b"k");
        let value = &encoded[24 + 1..];
        assert_eq!(value[0], SubdocOpcode::Get as u8);
        assert_eq!(value[1], 0);
        assert_eq!(&value[2..4], &7u16.to_be_bytes());
        assert_eq!(&value[4..11], b"airline");
        assert_eq!(value[11], SubdocOpcode::Exists as u8);
        assert_eq!(value[12], path_flag::XATTR);
    }

    #[test]
    fn parse_multi_path_failure_fields() {
        // Two fields: index 0 path_not_found, index 1 success with "42 ".
        let mut value = Vec::new();
        value.push(0u8);
        value.extend_from_slice(&(Status::SubdocPathNotFound as u16).to_be_bytes());
        value.push(1u8);
        value.extend_from_slice(&(Status::Success as u16).to_be_bytes());
        value.extend_from_slice(&3u32.to_be_bytes());
        value.extend_from_slice(b"42 ");

        let msg = response(
            ClientOpcode::SubdocMultiMutation,
            Status::SubdocMultiPathFailure,
            &value,
        );
        let fields = parse_mutate_in(&msg).unwrap().unwrap();
        assert_eq!(
            fields,
            vec![
                MutateInField {
                    index: 0,
                    status: Status::SubdocPathNotFound as u16,
                    value: Bytes::new(),
                },
                MutateInField {
                    index: 1,
                    status: Status::Success as u16,
                    value: Bytes::from_static(b"42 "),
                },
            ]
        );
    }

    #[test]
    fn parse_rejects_field_index_out_of_range() {
        let mut value = Vec::new();
        value.push(16u8);
        value.extend_from_slice(&(Status::Success as u16).to_be_bytes());
        value.extend_from_slice(&0u32.to_be_bytes());

        let msg = response(
            ClientOpcode::SubdocMultiMutation,
            Status::Success,
            &value,
        );
        assert_eq!(parse_mutate_in(&msg), Err(ErrorKind::ProtocolError));
    }

    #[test]
    fn parse_rejects_truncated_value() {
        let mut value = Vec::new();
        value.push(0u8);
        value.extend_from_slice(&(Status::Success as u16).to_be_bytes());
        value.extend_from_slice(&10u32.to_be_bytes());
        value.extend_from_slice(b"short");

        let msg = response(
            ClientOpcode::SubdocMultiMutation,
            Status::Success,
            &value,
        );
        assert_eq!(parse_mutate_in(&msg), Err(ErrorKind::ProtocolError));
    }

    #[test]
    fn parse_other_statuses_yield_no_fields() {
        let msg = response(
            ClientOpcode::SubdocMultiMutation,
            Status::SubdocPathMismatch,
            b"",
        );
        assert_eq!(parse_mutate_in(&msg), Ok(None));
    }

    #[test]
    fn parse_lookup_fields() {
        let mut value = Vec::new();
        value.extend_from_slice(&(Status::Success as u16).to_be_bytes());
        value.extend_from_slice(&2u32.to_be_bytes());
        value.extend_from_slice(b"{}");
        value.extend_from_slice(&(Status::SubdocPathNotFound as u16).to_be_bytes());
        value.extend_from_slice(&0u32.to_be_bytes());

        let msg = response(
            ClientOpcode::SubdocMultiLookup,
            Status::SubdocMultiPathFailure,
            &value,
        );
        let fields = parse_lookup_in(&msg).unwrap().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].status, Status::Success as u16);
        assert_eq!(&fields[0].value[..], b"{}");
        assert_eq!(fields[1].status, Status::SubdocPathNotFound as u16);
        assert!(fields[1].value.is_empty());
    }
}
