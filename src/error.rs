//! Error taxonomy surfaced to bootstrap callbacks and request
//! continuations.

use thiserror::Error;

/// The closed set of errors this crate reports.
///
/// Per-request statuses map into this taxonomy through
/// [`crate::protocol::status::map_status`]; transport failures and local
/// cancellation use the operational variants directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    // Transport.
    #[error("protocol error")]
    ProtocolError,
    #[error("handshake failure")]
    HandshakeFailure,

    // Auth.
    #[error("authentication failure")]
    AuthenticationFailure,

    // Bucket.
    #[error("bucket not found")]
    BucketNotFound,

    // Key-value.
    #[error("document not found")]
    DocumentNotFound,
    #[error("document exists")]
    DocumentExists,
    #[error("CAS mismatch")]
    CasMismatch,
    #[error("value too large")]
    ValueTooLarge,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("delta invalid")]
    DeltaInvalid,
    #[error("document locked")]
    DocumentLocked,
    #[error("durability impossible")]
    DurabilityImpossible,
    #[error("durability ambiguous")]
    DurabilityAmbiguous,
    #[error("durability level not available")]
    DurabilityLevelNotAvailable,
    #[error("durable write in progress")]
    DurableWriteInProgress,
    #[error("durable write re-commit in progress")]
    DurableWriteReCommitInProgress,

    // Subdocument.
    #[error("path not found")]
    PathNotFound,
    #[error("path mismatch")]
    PathMismatch,
    #[error("path invalid")]
    PathInvalid,
    #[error("path too big")]
    PathTooBig,
    #[error("value too deep")]
    ValueTooDeep,
    #[error("value invalid")]
    ValueInvalid,
    #[error("document is not JSON")]
    DocumentNotJson,
    #[error("number too big")]
    NumberTooBig,
    #[error("path exists")]
    PathExists,
    #[error("invalid xattr key combination")]
    XattrInvalidKeyCombo,
    #[error("unknown xattr macro")]
    XattrUnknownMacro,
    #[error("unknown virtual xattr")]
    XattrUnknownVirtualAttribute,
    #[error("virtual xattr cannot be modified")]
    XattrCannotModifyVirtualAttribute,

    // Collections.
    #[error("collection not found")]
    CollectionNotFound,
    #[error("scope not found")]
    ScopeNotFound,

    // Temporary.
    #[error("temporary failure")]
    TemporaryFailure,

    // Operational.
    #[error("unsupported operation")]
    UnsupportedOperation,
    #[error("internal server failure")]
    InternalServerFailure,
    #[error("request canceled")]
    RequestCanceled,
    #[error("unambiguous timeout")]
    UnambiguousTimeout,
}

/// Result type alias using [`ErrorKind`].
pub type Result<T> = std::result::Result<T, ErrorKind>;
