//! Wire format encoding and decoding.
//!
//! Implements the fixed 24-byte MCBP header:
//! ```text
//! ┌───────┬────────┬─────────┬─────────┬──────────┬──────────┬──────────┬────────┬───────┐
//! │ Magic │ Opcode │ Key len │ Ext len │ Datatype │ Specific │ Body len │ Opaque │ CAS   │
//! │ 1 B   │ 1 B    │ 2 B BE  │ 1 B     │ 1 B      │ 2 B BE   │ 4 B BE   │ 4 B    │ 8 B   │
//! └───────┴────────┴─────────┴─────────┴──────────┴──────────┴──────────┴────────┴───────┘
//! ```
//!
//! `specific` carries the status on responses and the vbucket id on
//! requests. All multi-byte fields are Big Endian on the wire except
//! `opaque` and `cas`, which the server echoes back without byte-swapping.

/// Header size in bytes (fixed, exactly 24).
pub const HEADER_SIZE: usize = 24;

/// Frame kind discriminator, the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Magic {
    ClientRequest = 0x80,
    ClientResponse = 0x81,
    AltClientResponse = 0x18,
    ServerRequest = 0x82,
    ServerResponse = 0x83,
}

impl Magic {
    /// Check whether this frame carries a response to a client request.
    #[inline]
    pub fn is_client_response(self) -> bool {
        matches!(self, Magic::ClientResponse | Magic::AltClientResponse)
    }
}

impl TryFrom<u8> for Magic {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x80 => Ok(Magic::ClientRequest),
            0x81 => Ok(Magic::ClientResponse),
            0x18 => Ok(Magic::AltClientResponse),
            0x82 => Ok(Magic::ServerRequest),
            0x83 => Ok(Magic::ServerResponse),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for Magic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Magic::ClientRequest => "client_request",
            Magic::ClientResponse => "client_response",
            Magic::AltClientResponse => "alt_client_response",
            Magic::ServerRequest => "server_request",
            Magic::ServerResponse => "server_response",
        };
        f.write_str(name)
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Frame kind byte (see [`Magic`]).
    pub magic: u8,
    /// Command byte.
    pub opcode: u8,
    /// Length of the key section of the body.
    pub key_length: u16,
    /// Length of the extras section of the body.
    pub extras_length: u8,
    /// Value datatype (raw/JSON/compressed bits).
    pub data_type: u8,
    /// Status on responses, vbucket id on requests.
    pub specific: u16,
    /// Total body length (extras + key + value).
    pub body_length: u32,
    /// Correlation token, echoed verbatim by the server.
    pub opaque: u32,
    /// Compare-and-swap value.
    pub cas: u64,
}

impl Header {
    /// Encode header to bytes.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (24 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.magic;
        buf[1] = self.opcode;
        buf[2..4].copy_from_slice(&self.key_length.to_be_bytes());
        buf[4] = self.extras_length;
        buf[5] = self.data_type;
        buf[6..8].copy_from_slice(&self.specific.to_be_bytes());
        buf[8..12].copy_from_slice(&self.body_length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.opaque.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.cas.to_ne_bytes());
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short. Field-level validation is
    /// left to the stream decoder.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: buf[0],
            opcode: buf[1],
            key_length: u16::from_be_bytes([buf[2], buf[3]]),
            extras_length: buf[4],
            data_type: buf[5],
            specific: u16::from_be_bytes([buf[6], buf[7]]),
            body_length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            opaque: u32::from_ne_bytes([buf[12], buf[13], buf[14], buf[15]]),
            cas: u64::from_ne_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
        })
    }

    /// Body section lengths must be consistent: extras + key never exceed
    /// the total body length.
    pub fn sections_consistent(&self) -> bool {
        u32::from(self.extras_length) + u32::from(self.key_length) <= self.body_length
    }
}
