//! Parsing of STK push confirmation callbacks.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

pub const RESULT_CODE_SUCCESS: i64 = 0;

pub const ITEM_RECEIPT: &str = "MpesaReceiptNumber";
pub const ITEM_AMOUNT: &str = "Amount";
pub const ITEM_PHONE: &str = "PhoneNumber";
pub const ITEM_TRANSACTION_DATE: &str = "TransactionDate";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallbackError {
    #[error("malformed callback: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Body")]
    body: EnvelopeBody,
}

#[derive(Debug, Deserialize)]
struct EnvelopeBody {
    #[serde(rename = "stkCallback")]
    stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    result_code: ResultCode,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    callback_metadata: Option<CallbackMetadata>,
}

/// The vendor sends the result code as a number, but some relays stringify it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResultCode {
    Number(i64),
    Text(String),
}

impl ResultCode {
    fn value(&self) -> Result<i64, CallbackError> {
        match self {
            ResultCode::Number(code) => Ok(*code),
            ResultCode::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| CallbackError::Malformed(format!("non-numeric ResultCode '{}'", raw))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    item: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
struct CallbackItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value", default)]
    value: Option<Value>,
}

/// Normalized confirmation event.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationEvent {
    pub checkout_id: String,
    pub merchant_request_id: Option<String>,
    pub result_code: i64,
    pub result_desc: String,
    pub receipt: Option<String>,
    pub amount: Option<BigDecimal>,
    pub phone_number: Option<String>,
    pub transaction_date: Option<String>,
}

impl ConfirmationEvent {
    pub fn is_success(&self) -> bool {
        self.result_code == RESULT_CODE_SUCCESS
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses the raw callback body. Metadata items are matched by name since
/// their order varies between deliveries.
pub fn parse_callback(raw: &[u8]) -> Result<ConfirmationEvent, CallbackError> {
    let envelope: Envelope =
        serde_json::from_slice(raw).map_err(|e| CallbackError::Malformed(e.to_string()))?;
    let callback = envelope.body.stk_callback;

    let checkout_id = callback.checkout_request_id.trim().to_string();
    if checkout_id.is_empty() {
        return Err(CallbackError::Malformed("empty CheckoutRequestID".to_string()));
    }
    let result_code = callback.result_code.value()?;

    let items = callback
        .callback_metadata
        .map(|metadata| metadata.item)
        .unwrap_or_default();
    let lookup = |name: &str| {
        items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
            .and_then(scalar_text)
    };

    // Amount is informational; the row already holds what was requested.
    let amount = lookup(ITEM_AMOUNT).and_then(|raw| match BigDecimal::from_str(&raw) {
        Ok(amount) => Some(amount),
        Err(_) => {
            tracing::warn!(checkout_id = %checkout_id, amount = %raw, "ignoring unparseable callback Amount");
            None
        }
    });

    Ok(ConfirmationEvent {
        checkout_id,
        merchant_request_id: callback.merchant_request_id,
        result_code,
        result_desc: callback.result_desc.unwrap_or_default(),
        receipt: lookup(ITEM_RECEIPT),
        amount,
        phone_number: lookup(ITEM_PHONE),
        transaction_date: lookup(ITEM_TRANSACTION_DATE),
    })
}

/// Body returned to the gateway once a callback has been processed.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: RESULT_CODE_SUCCESS,
            result_desc: "Accepted".to_string(),
        }
    }
}
