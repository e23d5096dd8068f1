//! TRON account addresses: base58check text form <-> 21-byte binary form.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version byte of mainnet account addresses.
pub const ADDRESS_PREFIX: u8 = 0x41;
pub const ADDRESS_BYTES: usize = 21;
pub const ADDRESS_TEXT_LEN: usize = 34;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be {ADDRESS_TEXT_LEN} characters, got {0}")]
    Length(usize),
    #[error("address must start with 'T'")]
    Prefix,
    #[error("invalid base58check encoding: {0}")]
    Encoding(String),
    #[error("decoded payload must be {ADDRESS_BYTES} bytes, got {0}")]
    Payload(usize),
    #[error("unexpected address version byte 0x{0:02x}")]
    Version(u8),
    #[error("invalid hex address: {0}")]
    Hex(String),
}

/// A decoded account address. Display yields the base58check text form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TronAddress([u8; ADDRESS_BYTES]);

impl TronAddress {
    /// Builds an address from the 20-byte account id (the EVM-style part).
    pub fn from_account_id(account_id: [u8; 20]) -> Self {
        let mut bytes = [0u8; ADDRESS_BYTES];
        bytes[0] = ADDRESS_PREFIX;
        bytes[1..].copy_from_slice(&account_id);
        Self(bytes)
    }

    /// Parses the `41`-prefixed hex form used by node APIs.
    pub fn from_hex(value: &str) -> Result<Self, AddressError> {
        let value = value.trim_start_matches("0x");
        let bytes = hex::decode(value).map_err(|e| AddressError::Hex(e.to_string()))?;
        Self::from_payload(&bytes)
    }

    fn from_payload(payload: &[u8]) -> Result<Self, AddressError> {
        if payload.len() != ADDRESS_BYTES {
            return Err(AddressError::Payload(payload.len()));
        }
        if payload[0] != ADDRESS_PREFIX {
            return Err(AddressError::Version(payload[0]));
        }

        let mut bytes = [0u8; ADDRESS_BYTES];
        bytes.copy_from_slice(payload);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }

    /// The 20-byte account id without the version byte, as used in contract ABI words.
    pub fn account_id(&self) -> &[u8] {
        &self.0[1..]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First four bytes of the double SHA-256 of the payload.
    pub fn checksum(&self) -> [u8; 4] {
        let first = Sha256::digest(self.0);
        let second = Sha256::digest(first);
        let mut out = [0u8; 4];
        out.copy_from_slice(&second[..4]);
        out
    }
}

impl FromStr for TronAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ADDRESS_TEXT_LEN {
            return Err(AddressError::Length(s.len()));
        }
        if !s.starts_with('T') {
            return Err(AddressError::Prefix);
        }

        let payload = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| AddressError::Encoding(e.to_string()))?;

        Self::from_payload(&payload)
    }
}

impl fmt::Display for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).with_check().into_string())
    }
}

impl fmt::Debug for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TronAddress({})", self)
    }
}
