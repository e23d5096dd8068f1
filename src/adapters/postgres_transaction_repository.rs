//! Postgres implementation of TransactionLedger.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus, TransitionFields};
use crate::ports::{RepositoryError, RepositoryResult, TransactionLedger};

const RETURNING_COLUMNS: &str = "id, kind, status, owner_id, source_amount, target_amount, \
     exchange_rate, mobile_number, chain_wallet_address, gateway_checkout_id, \
     gateway_receipt_id, chain_tx_hash, transfer_started_at, created_at, updated_at, completed_at";

/// Postgres-backed transaction ledger.
#[derive(Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

impl PostgresTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionLedger for PostgresTransactionRepository {
    async fn create(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let query = format!(
            r#"
            INSERT INTO transactions (
                id, kind, status, owner_id, source_amount, target_amount, exchange_rate,
                mobile_number, chain_wallet_address, gateway_checkout_id, gateway_receipt_id,
                chain_tx_hash, transfer_started_at, created_at, updated_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {}
            "#,
            RETURNING_COLUMNS
        );

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(tx.id)
            .bind(tx.kind.as_str())
            .bind(tx.status.as_str())
            .bind(tx.owner_id)
            .bind(&tx.source_amount)
            .bind(&tx.target_amount)
            .bind(&tx.exchange_rate)
            .bind(&tx.mobile_number)
            .bind(&tx.chain_wallet_address)
            .bind(&tx.gateway_checkout_id)
            .bind(&tx.gateway_receipt_id)
            .bind(&tx.chain_tx_hash)
            .bind(tx.transfer_started_at)
            .bind(tx.created_at)
            .bind(tx.updated_at)
            .bind(tx.completed_at)
            .fetch_one(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.into_domain()
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Transaction> {
        let query = format!("SELECT {} FROM transactions WHERE id = $1", RETURNING_COLUMNS);
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
            .into_domain()
    }

    async fn get_by_checkout_id(&self, checkout_id: &str) -> RepositoryResult<Option<Transaction>> {
        // Cancelled rows release their checkout id, so prefer the live one.
        let query = format!(
            "SELECT {} FROM transactions WHERE gateway_checkout_id = $1 \
             ORDER BY (status = 'cancelled'), created_at DESC LIMIT 1",
            RETURNING_COLUMNS
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(checkout_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        new: TransactionStatus,
        fields: TransitionFields,
    ) -> RepositoryResult<Option<Transaction>> {
        if !expected.can_transition_to(new) {
            return Ok(None);
        }

        let query = format!(
            r#"
            UPDATE transactions SET
                status = $3,
                gateway_checkout_id = COALESCE(gateway_checkout_id, $4),
                gateway_receipt_id = COALESCE($5, gateway_receipt_id),
                chain_tx_hash = COALESCE($6, chain_tx_hash),
                completed_at = CASE WHEN $7 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {}
            "#,
            RETURNING_COLUMNS
        );

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(id)
            .bind(expected.as_str())
            .bind(new.as_str())
            .bind(fields.gateway_checkout_id)
            .bind(fields.gateway_receipt_id)
            .bind(fields.chain_tx_hash)
            .bind(new.is_terminal())
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn claim_transfer(
        &self,
        id: Uuid,
        receipt: Option<String>,
    ) -> RepositoryResult<Option<Transaction>> {
        let query = format!(
            r#"
            UPDATE transactions SET
                gateway_receipt_id = COALESCE($2, gateway_receipt_id),
                transfer_started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND transfer_started_at IS NULL
            RETURNING {}
            "#,
            RETURNING_COLUMNS
        );

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(id)
            .bind(receipt)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn fail_unclaimed(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let query = format!(
            r#"
            UPDATE transactions SET
                status = 'failed',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing' AND transfer_started_at IS NULL
            RETURNING {}
            "#,
            RETURNING_COLUMNS
        );

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn health_check(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    kind: String,
    status: String,
    owner_id: Uuid,
    source_amount: BigDecimal,
    target_amount: BigDecimal,
    exchange_rate: BigDecimal,
    mobile_number: String,
    chain_wallet_address: String,
    gateway_checkout_id: Option<String>,
    gateway_receipt_id: Option<String>,
    chain_tx_hash: Option<String>,
    transfer_started_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            kind: self.kind.parse().map_err(RepositoryError::Database)?,
            status: self.status.parse().map_err(RepositoryError::Database)?,
            owner_id: self.owner_id,
            source_amount: self.source_amount,
            target_amount: self.target_amount,
            exchange_rate: self.exchange_rate,
            mobile_number: self.mobile_number,
            chain_wallet_address: self.chain_wallet_address,
            gateway_checkout_id: self.gateway_checkout_id,
            gateway_receipt_id: self.gateway_receipt_id,
            chain_tx_hash: self.chain_tx_hash,
            transfer_started_at: self.transfer_started_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}
