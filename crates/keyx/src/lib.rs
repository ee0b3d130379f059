//! Key exchange and encrypted messaging service
//!
//! Clients register an RSA public key, prove possession of the matching
//! private key by decrypting a challenge, and then exchange RSA-OAEP
//! messages with the server over HTTP.

pub mod api;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod key_store;
pub mod registry;
pub mod server;
pub mod storage;

pub use engine::{HelloOutcome, ProtocolEngine, ProtocolError};
pub use key_store::KeyStore;
pub use registry::IdentityRegistry;
