use async_trait::async_trait;
use bigdecimal::BigDecimal;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use super::abi::{encode_transfer_parameter, TRANSFER_SELECTOR};
use super::address::{AddressError, TronAddress};
use super::signer::{SignerError, TransactionSigner};
use crate::domain::money::{to_minor_units, TOKEN_DECIMALS};
use crate::ports::{TokenTransfer, TransferReceipt};

pub const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";
pub const DEFAULT_FEE_LIMIT: u64 = 100_000_000;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("invalid destination address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("invalid transfer amount: {0}")]
    InvalidAmount(String),
    #[error("insufficient token balance: {0}")]
    InsufficientBalance(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("node unavailable: {0}")]
    NodeUnavailable(String),
    #[error("node could not build transaction: {0}")]
    TransactionBuildFailed(String),
    #[error("signing failed: {0}")]
    Signing(#[from] SignerError),
    #[error("broadcast rejected: {0}")]
    BroadcastFailed(String),
    #[error("invalid response from node: {0}")]
    InvalidResponse(String),
    #[error("chain client misconfigured: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::NodeUnavailable(err.to_string())
    }
}

impl ChainError {
    /// Only transport-level failures count against the circuit breaker.
    fn trips_breaker(&self) -> bool {
        matches!(self, ChainError::NodeUnavailable(_))
    }
}

/// Response from the `/v1/accounts/{address}` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountsResponse {
    #[serde(default)]
    pub data: Vec<AccountData>,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountData {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub balance: Option<u64>,
    /// One single-entry map per token: contract address -> minor-unit balance.
    #[serde(default)]
    pub trc20: Vec<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
struct TriggerSmartContractRequest<'a> {
    owner_address: String,
    contract_address: String,
    function_selector: &'a str,
    parameter: String,
    fee_limit: u64,
    call_value: u64,
    visible: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TriggerSmartContractResponse {
    result: TriggerResult,
    #[serde(default)]
    transaction: Option<UnsignedTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
struct TriggerResult {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Transaction skeleton as returned by the node, before signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    #[serde(rename = "txID")]
    pub tx_id: String,
    pub raw_data: Value,
    pub raw_data_hex: String,
    #[serde(default)]
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedTransaction {
    #[serde(flatten)]
    pub transaction: UnsignedTransaction,
    pub signature: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Node error messages arrive hex-encoded; fall back to the raw text otherwise.
pub fn decode_node_message(message: &str) -> String {
    hex::decode(message)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| message.to_string())
}

#[derive(Debug, Clone)]
pub struct TronClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub sender: TronAddress,
    pub contract: TronAddress,
    pub fee_limit: u64,
    pub timeout: Duration,
}

/// HTTP client for a TronGrid-compatible node, sending TRC-20 transfers
/// from a single configured sender account.
#[derive(Clone)]
pub struct TronClient {
    client: Client,
    config: TronClientConfig,
    signer: TransactionSigner,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl TronClient {
    pub fn new(config: TronClientConfig, signer: TransactionSigner) -> Self {
        Self::with_circuit_breaker(config, signer, 3, 60)
    }

    /// Creates a client with custom circuit breaker settings
    pub fn with_circuit_breaker(
        config: TronClientConfig,
        signer: TransactionSigner,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        TronClient {
            client,
            config,
            signer,
            circuit_breaker,
        }
    }

    pub fn sender(&self) -> &TronAddress {
        &self.config.sender
    }

    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.with_api_key(self.client.get(url))
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.with_api_key(self.client.post(url))
    }

    fn with_api_key(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn guarded<T, F>(&self, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ChainError>>,
    {
        match self
            .circuit_breaker
            .call_with(|e: &ChainError| e.trips_breaker(), fut)
            .await
        {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(ChainError::NodeUnavailable(
                "node circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    /// Token balance of `owner` in minor units. Missing token entry means zero.
    pub async fn token_balance(&self, owner: &TronAddress) -> Result<u128, ChainError> {
        let url = self.url(&format!("/v1/accounts/{}", owner));
        let request = self.get(&url);
        let owner_text = owner.to_string();

        let account = self
            .guarded(async move {
                let response = request.send().await?;
                if response.status().is_server_error() {
                    return Err(ChainError::NodeUnavailable(format!(
                        "account lookup returned {}",
                        response.status()
                    )));
                }
                let body = response
                    .json::<AccountsResponse>()
                    .await
                    .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
                body.data
                    .into_iter()
                    .next()
                    .ok_or(ChainError::AccountNotFound(owner_text))
            })
            .await?;

        let contract = self.config.contract.to_string();
        let balance = account
            .trc20
            .iter()
            .find_map(|entry| entry.get(&contract))
            .map(|raw| {
                raw.parse::<u128>()
                    .map_err(|e| ChainError::InvalidResponse(format!("trc20 balance: {}", e)))
            })
            .transpose()?
            .unwrap_or(0);

        Ok(balance)
    }

    /// Asks the node to build an unsigned `transfer` invocation.
    pub async fn build_transfer(
        &self,
        to: &TronAddress,
        amount: u128,
    ) -> Result<UnsignedTransaction, ChainError> {
        let payload = TriggerSmartContractRequest {
            owner_address: self.config.sender.to_string(),
            contract_address: self.config.contract.to_string(),
            function_selector: TRANSFER_SELECTOR,
            parameter: encode_transfer_parameter(to, amount),
            fee_limit: self.config.fee_limit,
            call_value: 0,
            visible: true,
        };
        let request = self
            .post(&self.url("/wallet/triggersmartcontract"))
            .json(&payload);

        let body = self
            .guarded(async move {
                let response = request.send().await?;
                if response.status().is_server_error() {
                    return Err(ChainError::NodeUnavailable(format!(
                        "triggersmartcontract returned {}",
                        response.status()
                    )));
                }
                response
                    .json::<TriggerSmartContractResponse>()
                    .await
                    .map_err(|e| ChainError::InvalidResponse(e.to_string()))
            })
            .await?;

        if !body.result.result {
            let message = body
                .result
                .message
                .as_deref()
                .map(decode_node_message)
                .or(body.result.code)
                .unwrap_or_else(|| "unknown error".to_string());
            if message.to_lowercase().contains("balance is not sufficient") {
                return Err(ChainError::InsufficientBalance(message));
            }
            return Err(ChainError::TransactionBuildFailed(message));
        }

        body.transaction.ok_or_else(|| {
            ChainError::InvalidResponse("trigger result carries no transaction".to_string())
        })
    }

    pub fn sign(&self, transaction: UnsignedTransaction) -> Result<SignedTransaction, ChainError> {
        let signature = self
            .signer
            .sign_transaction(&transaction.raw_data_hex, &transaction.tx_id)?;
        Ok(SignedTransaction {
            transaction,
            signature: vec![signature],
        })
    }

    /// Submits a signed transaction. Exactly one request is made; a
    /// rejection is final.
    pub async fn broadcast(&self, signed: &SignedTransaction) -> Result<String, ChainError> {
        let request = self
            .post(&self.url("/wallet/broadcasttransaction"))
            .json(signed);

        let body = self
            .guarded(async move {
                let response = request.send().await?;
                if response.status().is_server_error() {
                    return Err(ChainError::NodeUnavailable(format!(
                        "broadcasttransaction returned {}",
                        response.status()
                    )));
                }
                response
                    .json::<BroadcastResponse>()
                    .await
                    .map_err(|e| ChainError::InvalidResponse(e.to_string()))
            })
            .await?;

        if !body.result {
            let reason = body
                .message
                .as_deref()
                .map(decode_node_message)
                .unwrap_or_default();
            let code = body.code.unwrap_or_else(|| "UNKNOWN".to_string());
            return Err(ChainError::BroadcastFailed(format!("{}: {}", code, reason)));
        }

        Ok(body
            .txid
            .unwrap_or_else(|| signed.transaction.tx_id.clone()))
    }
}

#[async_trait]
impl TokenTransfer for TronClient {
    #[tracing::instrument(skip(self), fields(sender = %self.config.sender))]
    async fn transfer(&self, to: &str, amount: &BigDecimal) -> Result<TransferReceipt, ChainError> {
        let destination: TronAddress = to.parse()?;

        let minor = to_minor_units(amount, TOKEN_DECIMALS)
            .filter(|units| *units > 0)
            .ok_or_else(|| ChainError::InvalidAmount(amount.to_string()))?;

        let balance = self.token_balance(&self.config.sender).await?;
        if balance < minor as u128 {
            return Err(ChainError::InsufficientBalance(format!(
                "sender holds {} minor units, transfer needs {}",
                balance, minor
            )));
        }

        let unsigned = self.build_transfer(&destination, minor as u128).await?;
        let signed = self.sign(unsigned)?;
        let tx_hash = self.broadcast(&signed).await?;

        tracing::info!(tx_hash = %tx_hash, amount_minor_units = minor, "token transfer broadcast");
        Ok(TransferReceipt {
            tx_hash,
            amount_minor_units: minor,
        })
    }
}
