#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use ramp_core::adapters::{InMemoryRateProvider, InMemoryTransactionLedger};
use ramp_core::domain::TransactionType;
use ramp_core::mpesa::GatewayError;
use ramp_core::ports::{
    PaymentGateway, PaymentRequest, PushAccepted, TokenTransfer, TransferReceipt,
};
use ramp_core::services::{InitiateRequest, OrchestratorSettings, TransactionOrchestrator};
use ramp_core::tron::ChainError;
use uuid::Uuid;

pub const WALLET: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
pub const DEPOSIT_ADDRESS: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
pub const CALLBACK_URL: &str = "https://ramp.example.com/callbacks/mpesa";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

/// Gateway double that accepts every push with a fresh checkout id unless
/// told to fail.
pub struct FakeGateway {
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<PaymentRequest>>,
    failure: Mutex<Option<GatewayError>>,
}

impl FakeGateway {
    pub fn accepting() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn failing(err: GatewayError) -> Self {
        let gateway = Self::accepting();
        *gateway.failure.lock().unwrap() = Some(err);
        gateway
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<PaymentRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn request_payment(&self, request: &PaymentRequest) -> Result<PushAccepted, GatewayError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());

        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }

        Ok(PushAccepted {
            checkout_id: format!("ws_CO_{:04}", n),
            merchant_request_id: format!("29115-{}", n),
            response_description: "Success. Request accepted for processing".to_string(),
            customer_message: "Success. Request accepted for processing".to_string(),
        })
    }
}

/// Chain double. Can be told to fail, and can hold transfers until released
/// so concurrent callbacks overlap.
pub struct FakeChain {
    pub calls: AtomicUsize,
    fail_with: Mutex<Option<String>>,
    gate: Option<Arc<Notify>>,
    delay: Duration,
}

impl FakeChain {
    pub fn succeeding() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: Mutex::new(None),
            gate: None,
            delay: Duration::ZERO,
        }
    }

    pub fn broadcast_failing(message: &str) -> Self {
        let chain = Self::succeeding();
        *chain.fail_with.lock().unwrap() = Some(message.to_string());
        chain
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::succeeding()
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::succeeding()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenTransfer for FakeChain {
    async fn transfer(&self, _to: &str, amount: &BigDecimal) -> Result<TransferReceipt, ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(ChainError::BroadcastFailed(message));
        }

        let minor = ramp_core::domain::money::to_minor_units(amount, 6).unwrap_or_default();
        Ok(TransferReceipt {
            tx_hash: "0xHASH".to_string(),
            amount_minor_units: minor,
        })
    }
}

pub struct Harness {
    pub orchestrator: TransactionOrchestrator,
    pub ledger: Arc<InMemoryTransactionLedger>,
    pub gateway: Arc<FakeGateway>,
    pub chain: Arc<FakeChain>,
}

pub fn harness(gateway: FakeGateway, chain: FakeChain, rate: Option<&str>) -> Harness {
    let ledger = Arc::new(InMemoryTransactionLedger::new());
    let rates = Arc::new(match rate {
        Some(rate) => InMemoryRateProvider::with_rate(dec(rate)),
        None => InMemoryRateProvider::new(),
    });
    let gateway = Arc::new(gateway);
    let chain = Arc::new(chain);

    let orchestrator = TransactionOrchestrator::new(
        ledger.clone(),
        rates,
        gateway.clone(),
        chain.clone(),
        OrchestratorSettings {
            callback_url: CALLBACK_URL.to_string(),
            default_rate: dec("132"),
            deposit_address: Some(DEPOSIT_ADDRESS.to_string()),
        },
    );

    Harness {
        orchestrator,
        ledger,
        gateway,
        chain,
    }
}

pub fn default_harness() -> Harness {
    harness(FakeGateway::accepting(), FakeChain::succeeding(), Some("132"))
}

pub fn buy_request(amount: &str) -> InitiateRequest {
    InitiateRequest {
        owner_id: Uuid::new_v4(),
        source_amount: dec(amount),
        mobile_number: "0712345678".to_string(),
        wallet_address: WALLET.to_string(),
        direction: TransactionType::MobileToToken,
    }
}

pub fn success_callback(checkout_id: &str, receipt: &str, amount: u64) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-1",
                "CheckoutRequestID": checkout_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": amount },
                        { "Name": "MpesaReceiptNumber", "Value": receipt },
                        { "Name": "TransactionDate", "Value": 20240101120000u64 },
                        { "Name": "PhoneNumber", "Value": 254712345678u64 }
                    ]
                }
            }
        }
    })
}

pub fn failure_callback(checkout_id: &str, code: i64, desc: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-1",
                "CheckoutRequestID": checkout_id,
                "ResultCode": code,
                "ResultDesc": desc
            }
        }
    })
}

pub fn body(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap()
}
