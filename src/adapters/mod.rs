pub mod in_memory;
pub mod postgres_rate_provider;
pub mod postgres_transaction_repository;

pub use in_memory::{InMemoryRateProvider, InMemoryTransactionLedger};
pub use postgres_rate_provider::PostgresRateProvider;
pub use postgres_transaction_repository::PostgresTransactionRepository;
