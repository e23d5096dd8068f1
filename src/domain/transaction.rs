//! Transaction domain entity.
//! Framework-agnostic representation of a mobile-money <-> token exchange.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a [`Transaction`].
///
/// `pending -> processing -> {completed, failed}`; `pending -> failed` when the
/// push request is refused; `pending -> cancelled` on abandonment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }

    /// Forward-only transition table.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "processing" => Ok(TransactionStatus::Processing),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// Direction of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    MobileToToken,
    TokenToMobile,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::MobileToToken => "mobile_to_token",
            TransactionType::TokenToMobile => "token_to_mobile",
        }
    }
}

impl Default for TransactionType {
    fn default() -> Self {
        TransactionType::MobileToToken
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile_to_token" => Ok(TransactionType::MobileToToken),
            "token_to_mobile" => Ok(TransactionType::TokenToMobile),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

/// Domain entity representing an exchange transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub owner_id: Uuid,
    pub source_amount: BigDecimal,
    pub target_amount: BigDecimal,
    pub exchange_rate: BigDecimal,
    pub mobile_number: String,
    pub chain_wallet_address: String,
    pub gateway_checkout_id: Option<String>,
    pub gateway_receipt_id: Option<String>,
    pub chain_tx_hash: Option<String>,
    pub transfer_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(
        owner_id: Uuid,
        kind: TransactionType,
        source_amount: BigDecimal,
        target_amount: BigDecimal,
        exchange_rate: BigDecimal,
        mobile_number: String,
        chain_wallet_address: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            status: TransactionStatus::Pending,
            owner_id,
            source_amount,
            target_amount,
            exchange_rate,
            mobile_number,
            chain_wallet_address,
            gateway_checkout_id: None,
            gateway_receipt_id: None,
            chain_tx_hash: None,
            transfer_started_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Optional columns written together with a status transition.
///
/// `None` leaves the stored value untouched. A checkout id is only ever
/// written when the stored one is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFields {
    pub gateway_checkout_id: Option<String>,
    pub gateway_receipt_id: Option<String>,
    pub chain_tx_hash: Option<String>,
}

impl TransitionFields {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn checkout(checkout_id: impl Into<String>) -> Self {
        Self {
            gateway_checkout_id: Some(checkout_id.into()),
            ..Self::default()
        }
    }

    pub fn chain_hash(tx_hash: impl Into<String>) -> Self {
        Self {
            chain_tx_hash: Some(tx_hash.into()),
            ..Self::default()
        }
    }
}

/// Entry of the append-only exchange-rate log. `rate` is mobile-currency units per token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub id: Uuid,
    pub rate: BigDecimal,
    pub recorded_at: DateTime<Utc>,
}

impl ExchangeRate {
    pub fn new(rate: BigDecimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            rate,
            recorded_at: Utc::now(),
        }
    }
}
