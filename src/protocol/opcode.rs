//! Closed opcode registries for client commands, server push commands and
//! subdocument operations.

/// Commands a client may send and receive responses for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientOpcode {
    Get = 0x00,
    Upsert = 0x01,
    Insert = 0x02,
    Replace = 0x03,
    Remove = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Touch = 0x1c,
    GetAndTouch = 0x1d,
    Hello = 0x1f,
    SaslListMechs = 0x20,
    SaslAuth = 0x21,
    SaslStep = 0x22,
    SelectBucket = 0x89,
    Observe = 0x92,
    GetAndLock = 0x94,
    Unlock = 0x95,
    GetClusterConfig = 0xb5,
    GetCollectionsManifest = 0xba,
    GetCollectionId = 0xbb,
    SubdocMultiLookup = 0xd0,
    SubdocMultiMutation = 0xd1,
    GetErrorMap = 0xfe,
    Invalid = 0xff,
}

impl ClientOpcode {
    /// Opcodes the multiplexer correlates with registered continuations.
    ///
    /// Handshake commands and `get_cluster_config` are excluded: they are
    /// owned by the session itself and never subscribed.
    pub fn is_request_reply(self) -> bool {
        matches!(
            self,
            ClientOpcode::Get
                | ClientOpcode::Upsert
                | ClientOpcode::Insert
                | ClientOpcode::Replace
                | ClientOpcode::Remove
                | ClientOpcode::Increment
                | ClientOpcode::Decrement
                | ClientOpcode::Touch
                | ClientOpcode::GetAndTouch
                | ClientOpcode::Observe
                | ClientOpcode::GetAndLock
                | ClientOpcode::Unlock
                | ClientOpcode::GetCollectionId
                | ClientOpcode::SubdocMultiLookup
                | ClientOpcode::SubdocMultiMutation
        )
    }
}

impl TryFrom<u8> for ClientOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        let opcode = match value {
            0x00 => ClientOpcode::Get,
            0x01 => ClientOpcode::Upsert,
            0x02 => ClientOpcode::Insert,
            0x03 => ClientOpcode::Replace,
            0x04 => ClientOpcode::Remove,
            0x05 => ClientOpcode::Increment,
            0x06 => ClientOpcode::Decrement,
            0x1c => ClientOpcode::Touch,
            0x1d => ClientOpcode::GetAndTouch,
            0x1f => ClientOpcode::Hello,
            0x20 => ClientOpcode::SaslListMechs,
            0x21 => ClientOpcode::SaslAuth,
            0x22 => ClientOpcode::SaslStep,
            0x89 => ClientOpcode::SelectBucket,
            0x92 => ClientOpcode::Observe,
            0x94 => ClientOpcode::GetAndLock,
            0x95 => ClientOpcode::Unlock,
            0xb5 => ClientOpcode::GetClusterConfig,
            0xba => ClientOpcode::GetCollectionsManifest,
            0xbb => ClientOpcode::GetCollectionId,
            0xd0 => ClientOpcode::SubdocMultiLookup,
            0xd1 => ClientOpcode::SubdocMultiMutation,
            0xfe => ClientOpcode::GetErrorMap,
            0xff => ClientOpcode::Invalid,
            other => return Err(other),
        };
        Ok(opcode)
    }
}

impl std::fmt::Display for ClientOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientOpcode::Get => "get",
            ClientOpcode::Upsert => "upsert",
            ClientOpcode::Insert => "insert",
            ClientOpcode::Replace => "replace",
            ClientOpcode::Remove => "remove",
            ClientOpcode::Increment => "increment",
            ClientOpcode::Decrement => "decrement",
            ClientOpcode::Touch => "touch",
            ClientOpcode::GetAndTouch => "get_and_touch",
            ClientOpcode::Hello => "hello",
            ClientOpcode::SaslListMechs => "sasl_list_mechs",
            ClientOpcode::SaslAuth => "sasl_auth",
            ClientOpcode::SaslStep => "sasl_step",
            ClientOpcode::SelectBucket => "select_bucket",
            ClientOpcode::Observe => "observe",
            ClientOpcode::GetAndLock => "get_and_lock",
            ClientOpcode::Unlock => "unlock",
            ClientOpcode::GetClusterConfig => "get_cluster_config",
            ClientOpcode::GetCollectionsManifest => "get_collections_manifest",
            ClientOpcode::GetCollectionId => "get_collection_id",
            ClientOpcode::SubdocMultiLookup => "subdoc_multi_lookup",
            ClientOpcode::SubdocMultiMutation => "subdoc_multi_mutation",
            ClientOpcode::GetErrorMap => "get_error_map",
            ClientOpcode::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Commands the server may push without a preceding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerOpcode {
    ClustermapChangeNotification = 0x01,
    Authenticate = 0x02,
    ActiveExternalUsers = 0x03,
}

impl TryFrom<u8> for ServerOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x01 => Ok(ServerOpcode::ClustermapChangeNotification),
            0x02 => Ok(ServerOpcode::Authenticate),
            0x03 => Ok(ServerOpcode::ActiveExternalUsers),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for ServerOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerOpcode::ClustermapChangeNotification => "cluster_map_change_notification",
            ServerOpcode::Authenticate => "authenticate",
            ServerOpcode::ActiveExternalUsers => "active_external_users",
        };
        f.write_str(name)
    }
}

/// Path-level operations carried inside multi-lookup and multi-mutation
/// frames. Single-operation subdocument messages are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubdocOpcode {
    Get = 0xc5,
    Exists = 0xc6,
    DictAdd = 0xc7,
    DictUpsert = 0xc8,
    Remove = 0xc9,
    Replace = 0xca,
    ArrayPushLast = 0xcb,
    ArrayPushFirst = 0xcc,
    ArrayInsert = 0xcd,
    ArrayAddUnique = 0xce,
    Counter = 0xcf,
    GetCount = 0xd2,
}

impl TryFrom<u8> for SubdocOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        let opcode = match value {
            0xc5 => SubdocOpcode::Get,
            0xc6 => SubdocOpcode::Exists,
            0xc7 => SubdocOpcode::DictAdd,
            0xc8 => SubdocOpcode::DictUpsert,
            0xc9 => SubdocOpcode::Remove,
            0xca => SubdocOpcode::Replace,
            0xcb => SubdocOpcode::ArrayPushLast,
            0xcc => SubdocOpcode::ArrayPushFirst,
            0xcd => SubdocOpcode::ArrayInsert,
            0xce => SubdocOpcode::ArrayAddUnique,
            0xcf => SubdocOpcode::Counter,
            0xd2 => SubdocOpcode::GetCount,
            other => return Err(other),
        };
        Ok(opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_opcode_roundtrip() {
        for code in [0x00u8, 0x1f, 0x21, 0x89, 0xb5, 0xd1, 0xfe, 0xff] {
            let opcode = ClientOpcode::try_from(code).unwrap();
            assert_eq!(opcode as u8, code);
        }
        assert!(ClientOpcode::try_from(0x7f).is_err());
    }

    #[test]
    fn request_reply_set_excludes_session_owned_opcodes() {
        assert!(ClientOpcode::Get.is_request_reply());
        assert!(ClientOpcode::SubdocMultiMutation.is_request_reply());
        assert!(ClientOpcode::GetCollectionId.is_request_reply());

        assert!(!ClientOpcode::Hello.is_request_reply());
        assert!(!ClientOpcode::SaslAuth.is_request_reply());
        assert!(!ClientOpcode::SelectBucket.is_request_reply());
        assert!(!ClientOpcode::GetClusterConfig.is_request_reply());
    }

    #[test]
    fn server_opcode_roundtrip() {
        assert_eq!(
            ServerOpcode::try_from(0x01),
            Ok(ServerOpcode::ClustermapChangeNotification)
        );
        assert_eq!(ServerOpcode::try_from(0x02), Ok(ServerOpcode::Authenticate));
        assert!(ServerOpcode::try_from(0x42).is_err());
    }

    #[test]
    fn subdoc_opcode_roundtrip() {
        for code in [0xc5u8, 0xc8, 0xcf, 0xd2] {
            let opcode = SubdocOpcode::try_from(code).unwrap();
            assert_eq!(opcode as u8, code);
        }
        assert!(SubdocOpcode::try_from(0xd1).is_err());
    }
}
