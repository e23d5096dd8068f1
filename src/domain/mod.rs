//! Domain layer: entities and amount arithmetic, free of I/O.

pub mod money;
pub mod transaction;

pub use transaction::{ExchangeRate, Transaction, TransactionStatus, TransactionType, TransitionFields};
