use crate::error::{BlockchainError, Result};
use crate::utils::{ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, new_key_pair};
use data_encoding::HEXLOWER;
use log::info;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use std::fs;
use std::path::Path;

// SEC1 tag for an uncompressed point
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;
const COORDINATES_LEN: usize = 64;
const SIGNATURE_LEN: usize = 64;

/// Signing capability consumed by the transaction engine
pub trait Wallet: Send + Sync {
    /// hex(x ‖ y) of the public key
    fn address(&self) -> String;

    /// hex(r ‖ s) over the given digest string
    fn sign(&self, digest: &str) -> Result<String>;
}

/// Checks `signature` over `digest` against the public key encoded in `address`.
/// Malformed addresses or signatures simply fail verification.
pub fn verify(address: &str, digest: &str, signature: &str) -> bool {
    let coordinates = match HEXLOWER.decode(address.as_bytes()) {
        Ok(bytes) if bytes.len() == COORDINATES_LEN => bytes,
        _ => return false,
    };
    let signature = match HEXLOWER.decode(signature.as_bytes()) {
        Ok(bytes) if bytes.len() == SIGNATURE_LEN => bytes,
        _ => return false,
    };

    let mut public_key = Vec::with_capacity(COORDINATES_LEN + 1);
    public_key.push(UNCOMPRESSED_POINT_TAG);
    public_key.extend(coordinates);
    ecdsa_p256_sha256_sign_verify(&public_key, &signature, digest.as_bytes())
}

/// ECDSA P-256 key held as PKCS#8
#[derive(Clone)]
pub struct KeyWallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl KeyWallet {
    /// Fresh key that lives only in memory
    pub fn generate() -> Result<KeyWallet> {
        Self::from_pkcs8(new_key_pair()?)
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<KeyWallet> {
        let rng = SystemRandom::new();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|e| {
                    BlockchainError::Wallet(format!("Failed to create key pair from PKCS8: {e}"))
                })?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        Ok(KeyWallet { pkcs8, public_key })
    }

    /// Restores the key stored at `path`, or creates and persists a new one
    pub fn load_or_create(path: &Path) -> Result<KeyWallet> {
        if path.exists() {
            let pkcs8 = fs::read(path)?;
            return Self::from_pkcs8(pkcs8);
        }

        let wallet = Self::generate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, &wallet.pkcs8)?;
        info!("Created new wallet at {}", path.display());
        Ok(wallet)
    }
}

impl Wallet for KeyWallet {
    fn address(&self) -> String {
        HEXLOWER.encode(&self.public_key[1..])
    }

    fn sign(&self, digest: &str) -> Result<String> {
        let signature = ecdsa_p256_sha256_sign_digest(&self.pkcs8, digest.as_bytes())?;
        Ok(HEXLOWER.encode(&signature))
    }
}
