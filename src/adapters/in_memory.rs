use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{ExchangeRate, Transaction, TransactionStatus, TransitionFields};
use crate::ports::{RateProvider, RepositoryError, RepositoryResult, TransactionLedger};

/// A thread-safe in-memory ledger.
///
/// Every conditional write happens under the write lock, which gives the
/// same compare-and-swap behaviour as the Postgres ledger.
#[derive(Default, Clone)]
pub struct InMemoryTransactionLedger {
    transactions: Arc<RwLock<HashMap<Uuid, Transaction>>>,
}

impl InMemoryTransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transactions.read().await.is_empty()
    }
}

fn checkout_in_use(
    rows: &HashMap<Uuid, Transaction>,
    checkout_id: &str,
    except: Uuid,
) -> bool {
    rows.values().any(|tx| {
        tx.id != except
            && tx.status != TransactionStatus::Cancelled
            && tx.gateway_checkout_id.as_deref() == Some(checkout_id)
    })
}

#[async_trait]
impl TransactionLedger for InMemoryTransactionLedger {
    async fn create(&self, tx: &Transaction) -> RepositoryResult<Transaction> {
        let mut rows = self.transactions.write().await;
        if rows.contains_key(&tx.id) {
            return Err(RepositoryError::Conflict(format!("transaction {} exists", tx.id)));
        }
        if let Some(checkout_id) = tx.gateway_checkout_id.as_deref() {
            if checkout_in_use(&rows, checkout_id, tx.id) {
                return Err(RepositoryError::Conflict(format!(
                    "checkout id {} already in use",
                    checkout_id
                )));
            }
        }

        rows.insert(tx.id, tx.clone());
        Ok(tx.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Transaction> {
        let rows = self.transactions.read().await;
        rows.get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn get_by_checkout_id(&self, checkout_id: &str) -> RepositoryResult<Option<Transaction>> {
        let rows = self.transactions.read().await;
        let mut matches: Vec<&Transaction> = rows
            .values()
            .filter(|tx| tx.gateway_checkout_id.as_deref() == Some(checkout_id))
            .collect();
        matches.sort_by_key(|tx| (tx.status == TransactionStatus::Cancelled, std::cmp::Reverse(tx.created_at)));
        Ok(matches.first().map(|tx| (*tx).clone()))
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

        let mut rows = self.transactions.write().await;
        if let Some(checkout_id) = fields.gateway_checkout_id.as_deref() {
            if new != TransactionStatus::Cancelled && checkout_in_use(&rows, checkout_id, id) {
                return Err(RepositoryError::Conflict(format!(
                    "checkout id {} already in use",
                    checkout_id
                )));
            }
        }

        let Some(tx) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if tx.status != expected {
            return Ok(None);
        }

        let now = Utc::now();
        tx.status = new;
        if tx.gateway_checkout_id.is_none() {
            tx.gateway_checkout_id = fields.gateway_checkout_id;
        }
        if fields.gateway_receipt_id.is_some() {
            tx.gateway_receipt_id = fields.gateway_receipt_id;
        }
        if fields.chain_tx_hash.is_some() {
            tx.chain_tx_hash = fields.chain_tx_hash;
        }
        if new.is_terminal() {
            tx.completed_at = Some(now);
        }
        tx.updated_at = now;

        Ok(Some(tx.clone()))
    }

    async fn claim_transfer(
        &self,
        id: Uuid,
        receipt: Option<String>,
    ) -> RepositoryResult<Option<Transaction>> {
        let mut rows = self.transactions.write().await;
        let Some(tx) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if tx.status != TransactionStatus::Processing || tx.transfer_started_at.is_some() {
            return Ok(None);
        }

        let now = Utc::now();
        if receipt.is_some() {
            tx.gateway_receipt_id = receipt;
        }
        tx.transfer_started_at = Some(now);
        tx.updated_at = now;

        Ok(Some(tx.clone()))
    }

    async fn fail_unclaimed(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let mut rows = self.transactions.write().await;
        let Some(tx) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if tx.status != TransactionStatus::Processing || tx.transfer_started_at.is_some() {
            return Ok(None);
        }

        let now = Utc::now();
        tx.status = TransactionStatus::Failed;
        tx.completed_at = Some(now);
        tx.updated_at = now;

        Ok(Some(tx.clone()))
    }

    async fn health_check(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

/// Append-only in-memory rate log.
#[derive(Default, Clone)]
pub struct InMemoryRateProvider {
    rates: Arc<RwLock<Vec<ExchangeRate>>>,
}

impl InMemoryRateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(rate: BigDecimal) -> Self {
        Self {
            rates: Arc::new(RwLock::new(vec![ExchangeRate::new(rate)])),
        }
    }
}

#[async_trait]
impl RateProvider for InMemoryRateProvider {
    async fn latest_rate(&self) -> RepositoryResult<Option<ExchangeRate>> {
        Ok(self.rates.read().await.last().cloned())
    }

    async fn record_rate(&self, rate: &BigDecimal) -> RepositoryResult<ExchangeRate> {
        let entry = ExchangeRate::new(rate.clone());
        self.rates.write().await.push(entry.clone());
        Ok(entry)
    }
}
