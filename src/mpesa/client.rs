use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::MpesaConfig;
use crate::ports::{PaymentGateway, PaymentRequest, PushAccepted};

pub const TRANSACTION_TYPE_PAYBILL: &str = "CustomerPayBillOnline";
pub const RESPONSE_CODE_ACCEPTED: &str = "0";
/// Tokens are refreshed this long before the gateway says they expire.
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_TTL_SECS: u64 = 3599;
/// East Africa Time, the gateway's wall clock.
const EAT_OFFSET_HOURS: i64 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway misconfigured: {0}")]
    Configuration(String),
    #[error("gateway authentication failed: {0}")]
    Auth(String),
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    #[error("gateway transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

/// `YYYYMMDDHHMMSS` in East Africa Time.
pub fn timestamp(now: DateTime<Utc>) -> String {
    (now + ChronoDuration::hours(EAT_OFFSET_HOURS))
        .format("%Y%m%d%H%M%S")
        .to_string()
}

/// `base64(short_code + passkey + timestamp)`.
pub fn password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", short_code, passkey, timestamp))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    pub business_short_code: String,
    pub password: String,
    pub timestamp: String,
    pub transaction_type: String,
    pub amount: u64,
    pub party_a: String,
    pub party_b: String,
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub call_back_url: String,
    pub account_reference: String,
    pub transaction_desc: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID", default)]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode", default)]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: Option<String>,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: Option<String>,
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<String>,
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
}

impl StkPushResponse {
    fn reason(&self) -> String {
        self.error_message
            .clone()
            .or_else(|| self.response_description.clone())
            .or_else(|| self.error_code.clone())
            .unwrap_or_else(|| "no reason given".to_string())
    }
}

/// Client for the M-Pesa Express (STK push) API.
///
/// The access token is cached per instance and refreshed under the lock, so
/// concurrent pushes share one credential exchange.
#[derive(Clone)]
pub struct DarajaClient {
    client: Client,
    config: MpesaConfig,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl DarajaClient {
    pub fn new(config: MpesaConfig, timeout: Duration) -> Result<Self, GatewayError> {
        for (name, empty) in [
            ("MPESA_CONSUMER_KEY", config.consumer_key.trim().is_empty()),
            ("MPESA_CONSUMER_SECRET", config.consumer_secret.is_empty()),
            ("MPESA_SHORT_CODE", config.short_code.trim().is_empty()),
            ("MPESA_PASSKEY", config.passkey.is_empty()),
        ] {
            if empty {
                return Err(GatewayError::Configuration(format!("{} is not set", name)));
            }
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            config,
            token: Arc::new(Mutex::new(None)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Returns a cached token, exchanging credentials when it is missing or
    /// about to expire.
    pub async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .get(self.url("/oauth/v1/generate"))
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(
                &self.config.consumer_key,
                Some(self.config.consumer_secret.expose()),
            )
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Transport(format!(
                "token endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            tracing::error!(status = %status, "M-Pesa credential exchange refused");
            return Err(GatewayError::Auth(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| GatewayError::Auth(format!("unreadable token response: {}", e)))?;
        if body.access_token.is_empty() {
            return Err(GatewayError::Auth("empty access token".to_string()));
        }

        let ttl = body
            .expires_in
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

        tracing::debug!(ttl_secs = ttl, "M-Pesa access token refreshed");
        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });

        Ok(body.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    pub fn build_push_request(&self, request: &PaymentRequest, now: DateTime<Utc>) -> StkPushRequest {
        let timestamp = timestamp(now);
        StkPushRequest {
            business_short_code: self.config.short_code.clone(),
            password: password(
                &self.config.short_code,
                self.config.passkey.expose(),
                &timestamp,
            ),
            timestamp,
            transaction_type: TRANSACTION_TYPE_PAYBILL.to_string(),
            amount: request.amount,
            party_a: request.phone_number.clone(),
            party_b: self.config.short_code.clone(),
            phone_number: request.phone_number.clone(),
            call_back_url: request.callback_url.clone(),
            account_reference: request.account_reference.clone(),
            transaction_desc: request.description.clone(),
        }
    }

    /// Sends one STK push. Never retried here: a retry after an ambiguous
    /// failure could prompt the customer twice.
    pub async fn stk_push(&self, request: &PaymentRequest) -> Result<PushAccepted, GatewayError> {
        let token = self.access_token().await?;
        let payload = self.build_push_request(request, Utc::now());

        let response = self
            .client
            .post(self.url("/mpesa/stkpush/v1/processrequest"))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
            return Err(GatewayError::Auth("push request was not authorized".to_string()));
        }

        let body: StkPushResponse = response.json().await.unwrap_or_default();

        if status.is_server_error() && body.error_message.is_none() {
            return Err(GatewayError::Transport(format!(
                "push endpoint returned {}",
                status
            )));
        }

        match (
            status.is_success(),
            body.response_code.as_deref(),
            body.checkout_request_id.clone(),
        ) {
            (true, Some(RESPONSE_CODE_ACCEPTED), Some(checkout_id)) => Ok(PushAccepted {
                checkout_id,
                merchant_request_id: body.merchant_request_id.clone().unwrap_or_default(),
                response_description: body.response_description.clone().unwrap_or_default(),
                customer_message: body.customer_message.clone().unwrap_or_default(),
            }),
            _ => Err(GatewayError::Rejected(body.reason())),
        }
    }
}

#[async_trait]
impl PaymentGateway for DarajaClient {
    #[tracing::instrument(skip(self, request), fields(reference = %request.account_reference))]
    async fn request_payment(&self, request: &PaymentRequest) -> Result<PushAccepted, GatewayError> {
        self.stk_push(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MpesaEnvironment;
    use crate::secrets::Secret;
    use chrono::TimeZone;

    fn config() -> MpesaConfig {
        MpesaConfig {
            environment: MpesaEnvironment::Sandbox,
            base_url: "http://localhost:1".to_string(),
            consumer_key: "key".to_string(),
            consumer_secret: Secret::new("secret"),
            short_code: "174379".to_string(),
            passkey: Secret::new("passkey"),
        }
    }

    #[test]
    fn timestamp_is_east_africa_time() {
        let now = Utc.with_ymd_and_hms(2024, 1, 31, 22, 5, 9).unwrap();
        assert_eq!(timestamp(now), "20240201010509");
    }

    #[test]
    fn password_is_base64_of_concatenation() {
        let encoded = password("174379", "passkey", "20240201010509");
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, b"174379passkey20240201010509");
    }

    #[test]
    fn push_request_uses_pascal_case_fields() {
        let client = DarajaClient::new(config(), Duration::from_secs(5)).unwrap();
        let request = PaymentRequest {
            amount: 1000,
            phone_number: "254712345678".to_string(),
            callback_url: "https://example.com/callbacks/mpesa".to_string(),
            account_reference: "ref-1".to_string(),
            description: "Token purchase".to_string(),
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let value = serde_json::to_value(client.build_push_request(&request, now)).unwrap();
        assert_eq!(value["BusinessShortCode"], "174379");
        assert_eq!(value["Timestamp"], "20240101030000");
        assert_eq!(value["Amount"], 1000);
        assert_eq!(value["PartyA"], "254712345678");
        assert_eq!(value["PartyB"], "174379");
        assert_eq!(value["CallBackURL"], "https://example.com/callbacks/mpesa");
        assert_eq!(value["AccountReference"], "ref-1");
        assert_eq!(value["TransactionType"], TRANSACTION_TYPE_PAYBILL);
    }

    #[test]
    fn missing_credentials_are_configuration_errors() {
        let mut incomplete = config();
        incomplete.passkey = Secret::new("");
        assert!(matches!(
            DarajaClient::new(incomplete, Duration::from_secs(5)),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn token_freshness_respects_margin() {
        let now = Instant::now();
        let fresh = CachedToken {
            value: "t".to_string(),
            expires_at: now + Duration::from_secs(3600),
        };
        let stale = CachedToken {
            value: "t".to_string(),
            expires_at: now + Duration::from_secs(30),
        };
        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now));
    }
}
