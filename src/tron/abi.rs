//! Contract ABI parameter encoding for the TRC-20 `transfer(address,uint256)` call.

use thiserror::Error;

use super::address::TronAddress;

pub const TRANSFER_SELECTOR: &str = "transfer(address,uint256)";
pub const WORD_BYTES: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AbiError {
    #[error("parameter must be {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("invalid hex parameter: {0}")]
    Hex(String),
    #[error("address word has non-zero padding")]
    AddressPadding,
    #[error("amount does not fit in 128 bits")]
    AmountOverflow,
}

/// Left-pads the 20-byte account id into a 32-byte word.
pub fn encode_address_word(address: &TronAddress) -> [u8; WORD_BYTES] {
    let mut word = [0u8; WORD_BYTES];
    let id = address.account_id();
    word[WORD_BYTES - id.len()..].copy_from_slice(id);
    word
}

/// Big-endian unsigned integer word.
pub fn encode_uint_word(value: u128) -> [u8; WORD_BYTES] {
    let mut word = [0u8; WORD_BYTES];
    word[WORD_BYTES - 16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Hex `parameter` field for a token transfer of `amount` minor units to `to`.
pub fn encode_transfer_parameter(to: &TronAddress, amount: u128) -> String {
    let mut params = Vec::with_capacity(WORD_BYTES * 2);
    params.extend_from_slice(&encode_address_word(to));
    params.extend_from_slice(&encode_uint_word(amount));
    hex::encode(params)
}

/// Inverse of [`encode_transfer_parameter`].
pub fn decode_transfer_parameter(parameter: &str) -> Result<(TronAddress, u128), AbiError> {
    let expected = WORD_BYTES * 2 * 2;
    if parameter.len() != expected {
        return Err(AbiError::Length {
            expected,
            actual: parameter.len(),
        });
    }

    let bytes = hex::decode(parameter).map_err(|e| AbiError::Hex(e.to_string()))?;
    let (address_word, amount_word) = bytes.split_at(WORD_BYTES);

    if address_word[..WORD_BYTES - 20].iter().any(|b| *b != 0) {
        return Err(AbiError::AddressPadding);
    }
    let mut account_id = [0u8; 20];
    account_id.copy_from_slice(&address_word[WORD_BYTES - 20..]);

    if amount_word[..WORD_BYTES - 16].iter().any(|b| *b != 0) {
        return Err(AbiError::AmountOverflow);
    }
    let mut amount = [0u8; 16];
    amount.copy_from_slice(&amount_word[WORD_BYTES - 16..]);

    Ok((
        TronAddress::from_account_id(account_id),
        u128::from_be_bytes(amount),
    ))
}
