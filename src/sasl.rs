//! SASL client used during the handshake.
//!
//! Supports PLAIN and the SCRAM family (RFC 5802) over SHA-1, SHA-256 and
//! SHA-512. The context picks the first mechanism from the preference list
//! it was constructed with and stays on it; a server that rejects the
//! chosen mechanism fails the handshake rather than triggering a retry
//! with a weaker one.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Mac, SimpleHmac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::ErrorKind;

/// Supported mechanisms, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    ScramSha512,
    ScramSha256,
    ScramSha1,
    Plain,
}

impl Mechanism {
    /// Wire name of the mechanism.
    pub fn as_str(self) -> &'static str {
        match self {
            Mechanism::ScramSha512 => "SCRAM-SHA512",
            Mechanism::ScramSha256 => "SCRAM-SHA256",
            Mechanism::ScramSha1 => "SCRAM-SHA1",
            Mechanism::Plain => "PLAIN",
        }
    }
}

/// Default preference order.
pub const DEFAULT_MECHANISMS: &[Mechanism] = &[
    Mechanism::ScramSha512,
    Mechanism::ScramSha256,
    Mechanism::ScramSha1,
    Mechanism::Plain,
];

/// Outcome of one exchange step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Send this payload in a SASL-STEP request.
    Continue(Vec<u8>),
    /// The exchange is finished on the client side.
    Done,
}

/// Per-handshake SASL state.
pub struct ClientContext {
    mechanism: Mechanism,
    username: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ClientContext {
    /// Create a context using the first mechanism of `mechanisms`.
    ///
    /// # Panics
    ///
    /// Panics when `mechanisms` is empty.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        mechanisms: &[Mechanism],
    ) -> Self {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self {
            mechanism: mechanisms[0],
            username: username.into(),
            password: password.into(),
            client_nonce: nonce,
            client_first_bare: String::new(),
            server_signature: None,
        }
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    /// Produce the initial SASL payload.
    pub fn start(&mut self) -> Vec<u8> {
        match self.mechanism {
            Mechanism::Plain => {
                let mut payload = Vec::with_capacity(self.username.len() + self.password.len() + 2);
                payload.push(0);
                payload.extend_from_slice(self.username.as_bytes());
                payload.push(0);
                payload.extend_from_slice(self.password.as_bytes());
                payload
            }
            _ => {
                self.client_first_bare =
                    format!("n={},r={}", saslname(&self.username), self.client_nonce);
                format!("n,,{}", self.client_first_bare).into_bytes()
            }
        }
    }

    /// Consume a server challenge and produce the next payload.
    ///
    /// A `server-first-message` yields `Continue` with the client-final
    /// payload; a `server-final-message` (`v=...`) verifies the server
    /// signature and yields `Done`.
    pub fn step(&mut self, input: &[u8]) -> Result<StepOutcome, ErrorKind> {
        if self.mechanism == Mechanism::Plain {
            // PLAIN is single-shot; any challenge is unexpected.
            return Err(ErrorKind::AuthenticationFailure);
        }

        let message = std::str::from_utf8(input).map_err(|_| ErrorKind::AuthenticationFailure)?;

        if let Some(signature) = attribute(message, 'v') {
            let expected = self
                .server_signature
                .as_deref()
                .ok_or(ErrorKind::AuthenticationFailure)?;
            let received = BASE64
                .decode(signature)
                .map_err(|_| ErrorKind::AuthenticationFailure)?;
            if received == expected {
                return Ok(StepOutcome::Done);
            }
            return Err(ErrorKind::AuthenticationFailure);
        }

        let server_nonce =
            attribute(message, 'r').ok_or(ErrorKind::AuthenticationFailure)?;
        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(ErrorKind::AuthenticationFailure);
        }
        let salt = BASE64
            .decode(attribute(message, 's').ok_or(ErrorKind::AuthenticationFailure)?)
            .map_err(|_| ErrorKind::AuthenticationFailure)?;
        let iterations: u32 = attribute(message, 'i')
            .and_then(|i| i.parse().ok())
            .filter(|i| *i > 0)
            .ok_or(ErrorKind::AuthenticationFailure)?;

        let prim = primitives(self.mechanism);
        let salted_password = (prim.hi)(self.password.as_bytes(), &salt, iterations);
        let client_key = (prim.hmac)(&salted_password, &[b"Client Key"]);
        let stored_key = (prim.digest)(&client_key);

        let without_proof = format!("c=biws,r={}", server_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, message, without_proof
        );
        let client_signature = (prim.hmac)(&stored_key, &[auth_message.as_bytes()]);

        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(key, sig)| key ^ sig)
            .collect();

        let server_key = (prim.hmac)(&salted_password, &[b"Server Key"]);
        self.server_signature = Some((prim.hmac)(&server_key, &[auth_message.as_bytes()]));

        let client_final = format!("{},p={}", without_proof, BASE64.encode(proof));
        Ok(StepOutcome::Continue(client_final.into_bytes()))
    }

    #[cfg(test)]
    fn force_nonce(&mut self, nonce: &str) {
        self.client_nonce = nonce.to_owned();
    }
}

/// Escape '=' and ',' in a username per RFC 5802 saslname rules.
fn saslname(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '=' => escaped.push_str("=3D"),
            ',' => escaped.push_str("=2C"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Extract the value of a single-letter SCRAM attribute from a message.
fn attribute<'a>(message: &'a str, name: char) -> Option<&'a str> {
    message.split(',').find_map(|part| {
        let mut chars = part.chars();
        if chars.next() == Some(name) && chars.next() == Some('=') {
            Some(&part[2..])
        } else {
            None
        }
    })
}

struct Primitives {
    hmac: fn(&[u8], &[&[u8]]) -> Vec<u8>,
    digest: fn(&[u8]) -> Vec<u8>,
    hi: fn(&[u8], &[u8], u32) -> Vec<u8>,
}

macro_rules! digest_primitives {
    ($module:ident, $digest:ty) => {
        mod $module {
            use super::*;

            pub fn hmac(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
                let mut mac = SimpleHmac::<$digest>::new_from_slice(key)
                    .expect("HMAC accepts keys of any length");
                for part in parts {
                    Mac::update(&mut mac, part);
                }
                mac.finalize().into_bytes().to_vec()
            }

            pub fn digest(data: &[u8]) -> Vec<u8> {
                <$digest>::digest(data).to_vec()
            }

            // RFC 5802 Hi(): iterated HMAC with a running XOR.
            pub fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
                let mut block = salt.to_vec();
                block.extend_from_slice(&1u32.to_be_bytes());
                let mut round = hmac(password, &[&block]);
                let mut output = round.clone();
                for _ in 1..iterations {
                    round = hmac(password, &[&round]);
                    for (acc, byte) in output.iter_mut().zip(round.iter()) {
                        *acc ^= byte;
                    }
                }
                output
            }
        }
    };
}

digest_primitives!(prim_sha1, Sha1);
digest_primitives!(prim_sha256, Sha256);
digest_primitives!(prim_sha512, Sha512);

fn primitives(mechanism: Mechanism) -> Primitives {
    match mechanism {
        Mechanism::ScramSha1 => Primitives {
            hmac: prim_sha1::hmac,
            digest: prim_sha1::digest,
            hi: prim_sha1::hi,
        },
        Mechanism::ScramSha256 => Primitives {
            hmac: prim_sha256::hmac,
            digest: prim_sha256::digest,
            hi: prim_sha256::hi,
        },
        Mechanism::ScramSha512 | Mechanism::Plain => Primitives {
            hmac: prim_sha512::hmac,
            digest: prim_sha512::digest,
            hi: prim_sha512::hi,
        },
    }
}
