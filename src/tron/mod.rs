pub mod abi;
pub mod address;
pub mod client;
pub mod signer;

pub use address::TronAddress;
pub use client::{ChainError, TronClient, TronClientConfig};
pub use signer::TransactionSigner;
