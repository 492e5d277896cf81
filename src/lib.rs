//! # mcbp-client
//!
//! Client driver for the Couchbase Memcached Binary Protocol (MCBP).
//!
//! Each [`Session`] speaks to one data-service node over a long-lived,
//! authenticated, optionally bucket-scoped TCP connection. It owns the
//! framed wire codec, the handshake state machine (HELLO → SASL →
//! error map → bucket selection → configuration fetch) and the opaque-keyed
//! request multiplexer, and it reacts to unsolicited cluster-map pushes
//! from the server.
//!
//! ## Example
//!
//! ```ignore
//! use mcbp_client::{Origin, SessionBuilder};
//!
//! #[tokio::main]
//! async fn main() {
//!     let origin = Origin::single("Administrator", "password", "127.0.0.1", 11210);
//!     let session = SessionBuilder::new("my-app", origin)
//!         .bucket("travel-sample")
//!         .build();
//!
//!     session.bootstrap(|result| match result {
//!         Ok(config) => println!("ready, config rev={}", config.rev),
//!         Err(err) => eprintln!("bootstrap failed: {}", err),
//!     });
//! }
//! ```

pub mod config;
pub mod error;
pub mod origin;
pub mod protocol;
pub mod sasl;
pub mod session;

mod writer;

pub use config::{ClusterConfig, ClusterNode, CollectionCache, ErrorMap};
pub use error::ErrorKind;
pub use origin::Origin;
pub use session::{Session, SessionBuilder};
