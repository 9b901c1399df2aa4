//! Utility functions and helpers
//!
//! Hashing, ECDSA primitives, timestamps, and the bincode layer used for
//! storage bytes and hash preimages.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    current_timestamp, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    new_key_pair, sha256_digest, sha256_hex,
};

pub use serialization::{deserialize, serialize};
