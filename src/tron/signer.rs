//! secp256k1 signing of node-built transactions.

use k256::ecdsa::SigningKey;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

pub const SIGNATURE_BYTES: usize = 65;

/// Offset added to the recovery id in the trailing signature byte.
const RECOVERY_OFFSET: u8 = 27;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignerError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("invalid hex in {field}: {message}")]
    Hex { field: &'static str, message: String },
    #[error("transaction id does not match its raw data")]
    DigestMismatch,
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Holds the sender's private key. The key never leaves this type and
/// `Debug` does not print it.
#[derive(Clone)]
pub struct TransactionSigner {
    key: SigningKey,
}

impl TransactionSigner {
    pub fn from_hex(private_key: &str) -> Result<Self, SignerError> {
        let trimmed = private_key.trim().trim_start_matches("0x");
        let bytes = hex::decode(trimmed).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(SignerError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let key = SigningKey::from_slice(&bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Signs a 32-byte digest, returning `r || s || v` with `v = recovery_id + 27`.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_BYTES], SignerError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        let mut out = [0u8; SIGNATURE_BYTES];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte() + RECOVERY_OFFSET;
        Ok(out)
    }

    /// Signs a node-built transaction. The id must be the SHA-256 of the raw
    /// data, otherwise the node handed back something we did not ask for.
    pub fn sign_transaction(&self, raw_data_hex: &str, tx_id: &str) -> Result<String, SignerError> {
        let raw = hex::decode(raw_data_hex).map_err(|e| SignerError::Hex {
            field: "raw_data_hex",
            message: e.to_string(),
        })?;
        let claimed = hex::decode(tx_id).map_err(|e| SignerError::Hex {
            field: "txID",
            message: e.to_string(),
        })?;

        let digest: [u8; 32] = Sha256::digest(&raw).into();
        if claimed.as_slice() != digest.as_slice() {
            return Err(SignerError::DigestMismatch);
        }

        Ok(hex::encode(self.sign_digest(&digest)?))
    }

    pub fn verifying_key_bytes(&self) -> Vec<u8> {
        self.key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }
}

impl fmt::Debug for TransactionSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransactionSigner(<redacted>)")
    }
}
