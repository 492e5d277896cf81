//! Response status registry and the total status-to-error mapping.

use crate::error::ErrorKind;
use crate::protocol::opcode::ClientOpcode;

/// Status codes the data service may return in the `specific` header field
/// of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Success = 0x00,
    NotFound = 0x01,
    Exists = 0x02,
    TooBig = 0x03,
    Invalid = 0x04,
    NotStored = 0x05,
    DeltaBadValue = 0x06,
    NotMyVbucket = 0x07,
    NoBucket = 0x08,
    Locked = 0x09,
    AuthStale = 0x1f,
    AuthError = 0x20,
    AuthContinue = 0x21,
    RangeError = 0x22,
    Rollback = 0x23,
    NoAccess = 0x24,
    NotInitialized = 0x25,
    UnknownFrameInfo = 0x28,
    UnknownCommand = 0x81,
    NoMemory = 0x82,
    NotSupported = 0x83,
    Internal = 0x84,
    Busy = 0x85,
    TempFailure = 0x86,
    XattrInvalid = 0x87,
    UnknownCollection = 0x88,
    NoCollectionsManifest = 0x89,
    CannotApplyCollectionsManifest = 0x8a,
    CollectionsManifestIsAhead = 0x8b,
    UnknownScope = 0x8c,
    DcpStreamIdInvalid = 0x8d,
    DurabilityInvalidLevel = 0xa0,
    DurabilityImpossible = 0xa1,
    SyncWriteInProgress = 0xa2,
    SyncWriteAmbiguous = 0xa3,
    SyncWriteReCommitInProgress = 0xa4,
    SubdocPathNotFound = 0xc0,
    SubdocPathMismatch = 0xc1,
    SubdocPathInvalid = 0xc2,
    SubdocPathTooBig = 0xc3,
    SubdocDocTooDeep = 0xc4,
    SubdocValueCannotInsert = 0xc5,
    SubdocDocNotJson = 0xc6,
    SubdocNumRangeError = 0xc7,
    SubdocDeltaInvalid = 0xc8,
    SubdocPathExists = 0xc9,
    SubdocValueTooDeep = 0xca,
    SubdocInvalidCombo = 0xcb,
    SubdocMultiPathFailure = 0xcc,
    SubdocSuccessDeleted = 0xcd,
    SubdocXattrInvalidFlagCombo = 0xce,
    SubdocXattrInvalidKeyCombo = 0xcf,
    SubdocXattrUnknownMacro = 0xd0,
    SubdocXattrUnknownVattr = 0xd1,
    SubdocXattrCannotModifyVattr = 0xd2,
    SubdocMultiPathFailureDeleted = 0xd3,
    SubdocInvalidXattrOrder = 0xd4,
}

impl TryFrom<u16> for Status {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        let status = match value {
            0x00 => Status::Success,
            0x01 => Status::NotFound,
            0x02 => Status::Exists,
            0x03 => Status::TooBig,
            0x04 => Status::Invalid,
            0x05 => Status::NotStored,
            0x06 => Status::DeltaBadValue,
            0x07 => Status::NotMyVbucket,
            0x08 => Status::NoBucket,
            0x09 => Status::Locked,
            0x1f => Status::AuthStale,
            0x20 => Status::AuthError,
            0x21 => Status::AuthContinue,
            0x22 => Status::RangeError,
            0x23 => Status::Rollback,
            0x24 => Status::NoAccess,
            0x25 => Status::NotInitialized,
            0x28 => Status::UnknownFrameInfo,
            0x81 => Status::UnknownCommand,
            0x82 => Status::NoMemory,
            0x83 => Status::NotSupported,
            0x84 => Status::Internal,
            0x85 => Status::Busy,
            0x86 => Status::TempFailure,
            0x87 => Status::XattrInvalid,
            0x88 => Status::UnknownCollection,
            0x89 => Status::NoCollectionsManifest,
            0x8a => Status::CannotApplyCollectionsManifest,
            0x8b => Status::CollectionsManifestIsAhead,
            0x8c => Status::UnknownScope,
            0x8d => Status::DcpStreamIdInvalid,
            0xa0 => Status::DurabilityInvalidLevel,
            0xa1 => Status::DurabilityImpossible,
            0xa2 => Status::SyncWriteInProgress,
            0xa3 => Status::SyncWriteAmbiguous,
            0xa4 => Status::SyncWriteReCommitInProgress,
            0xc0 => Status::SubdocPathNotFound,
            0xc1 => Status::SubdocPathMismatch,
            0xc2 => Status::SubdocPathInvalid,
            0xc3 => Status::SubdocPathTooBig,
            0xc4 => Status::SubdocDocTooDeep,
            0xc5 => Status::SubdocValueCannotInsert,
            0xc6 => Status::SubdocDocNotJson,
            0xc7 => Status::SubdocNumRangeError,
            0xc8 => Status::SubdocDeltaInvalid,
            0xc9 => Status::SubdocPathExists,
            0xca => Status::SubdocValueTooDeep,
            0xcb => Status::SubdocInvalidCombo,
            0xcc => Status::SubdocMultiPathFailure,
            0xcd => Status::SubdocSuccessDeleted,
            0xce => Status::SubdocXattrInvalidFlagCombo,
            0xcf => Status::SubdocXattrInvalidKeyCombo,
            0xd0 => Status::SubdocXattrUnknownMacro,
            0xd1 => Status::SubdocXattrUnknownVattr,
            0xd2 => Status::SubdocXattrCannotModifyVattr,
            0xd3 => Status::SubdocMultiPathFailureDeleted,
            0xd4 => Status::SubdocInvalidXattrOrder,
            other => return Err(other),
        };
        Ok(status)
    }
}

/// Map a response status to the error delivered to the request's
/// continuation. `Ok(())` means the frame itself is the result.
///
/// `exists` depends on the opcode: insert reports `document_exists`, every
/// other mutation reports `cas_mismatch`. Reserved statuses (not_my_vbucket,
/// rollback, DCP bookkeeping) surface as `protocol_error` at this layer.
pub fn map_status(opcode: ClientOpcode, status: u16) -> Result<(), ErrorKind> {
    let status = match Status::try_from(status) {
        Ok(status) => status,
        Err(code) => {
            tracing::warn!("unknown status code: {} (opcode={})", code, opcode);
            return Err(ErrorKind::ProtocolError);
        }
    };
    match status {
        Status::Success
        | Status::SubdocMultiPathFailure
        | Status::SubdocSuccessDeleted
        | Status::SubdocMultiPathFailureDeleted => Ok(()),

        Status::NotFound | Status::NotStored => Err(ErrorKind::DocumentNotFound),

        Status::Exists => {
            if opcode == ClientOpcode::Insert {
                Err(ErrorKind::DocumentExists)
            } else {
                Err(ErrorKind::CasMismatch)
            }
        }

        Status::TooBig => Err(ErrorKind::ValueTooLarge),

        Status::Invalid | Status::XattrInvalid | Status::SubdocInvalidCombo => {
            Err(ErrorKind::InvalidArgument)
        }

        Status::DeltaBadValue | Status::SubdocDeltaInvalid => Err(ErrorKind::DeltaInvalid),

        Status::NoBucket => Err(ErrorKind::BucketNotFound),

        Status::Locked => Err(ErrorKind::DocumentLocked),

        Status::AuthStale | Status::AuthError | Status::NoAccess => {
            Err(ErrorKind::AuthenticationFailure)
        }

        Status::NotSupported | Status::UnknownCommand => Err(ErrorKind::UnsupportedOperation),

        Status::Internal => Err(ErrorKind::InternalServerFailure),

        Status::Busy | Status::TempFailure | Status::NoMemory | Status::NotInitialized => {
            Err(ErrorKind::TemporaryFailure)
        }

        Status::UnknownCollection => Err(ErrorKind::CollectionNotFound),
        Status::UnknownScope => Err(ErrorKind::ScopeNotFound),

        Status::DurabilityInvalidLevel => Err(ErrorKind::DurabilityLevelNotAvailable),
        Status::DurabilityImpossible => Err(ErrorKind::DurabilityImpossible),
        Status::SyncWriteInProgress => Err(ErrorKind::DurableWriteInProgress),
        Status::SyncWriteAmbiguous => Err(ErrorKind::DurabilityAmbiguous),
        Status::SyncWriteReCommitInProgress => Err(ErrorKind::DurableWriteReCommitInProgress),

        Status::SubdocPathNotFound => Err(ErrorKind::PathNotFound),
        Status::SubdocPathMismatch => Err(ErrorKind::PathMismatch),
        Status::SubdocPathInvalid => Err(ErrorKind::PathInvalid),
        Status::SubdocPathTooBig => Err(ErrorKind::PathTooBig),
        Status::SubdocDocTooDeep | Status::SubdocValueTooDeep => Err(ErrorKind::ValueTooDeep),
        Status::SubdocValueCannotInsert => Err(ErrorKind::ValueInvalid),
        Status::SubdocDocNotJson => Err(ErrorKind::DocumentNotJson),
        Status::SubdocNumRangeError => Err(ErrorKind::NumberTooBig),
        Status::SubdocPathExists => Err(ErrorKind::PathExists),
        Status::SubdocXattrInvalidFlagCombo | Status::SubdocXattrInvalidKeyCombo => {
            Err(ErrorKind::XattrInvalidKeyCombo)
        }
        Status::SubdocXattrUnknownMacro => Err(ErrorKind::XattrUnknownMacro),
        Status::SubdocXattrUnknownVattr => Err(ErrorKind::XattrUnknownVirtualAttribute),
        Status::SubdocXattrCannotModifyVattr => {
            Err(ErrorKind::XattrCannotModifyVirtualAttribute)
        }

        // Reserved at this layer.
        Status::SubdocInvalidXattrOrder
        | Status::NotMyVbucket
        | Status::AuthContinue
        | Status::RangeError
        | Status::Rollback
        | Status::UnknownFrameInfo
        | Status::NoCollectionsManifest
        | Status::CannotApplyCollectionsManifest
        | Status::CollectionsManifestIsAhead
        | Status::DcpStreamIdInvalid => {
            tracing::warn!("unmapped status code: {:?} (opcode={})", status, opcode);
            Err(ErrorKind::ProtocolError)
        }
    }
}
