mod common;

use common::*;
use ramp_core::domain::{TransactionStatus, TransactionType};
use ramp_core::mpesa::GatewayError;
use ramp_core::ports::TransactionLedger;
use ramp_core::services::{CallbackOutcome, InitiateRequest, OrchestratorError};
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_purchase_completes_after_successful_callback() {
    let h = default_harness();

    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();
    let checkout_id = outcome.checkout_id.clone().unwrap();
    assert_eq!(outcome.transaction.status, TransactionStatus::Processing);
    assert_eq!(outcome.transaction.target_amount, dec("7.575758"));

    let pushed = h.gateway.last_request().unwrap();
    assert_eq!(pushed.amount, 1000);
    assert_eq!(pushed.phone_number, "254712345678");
    assert_eq!(pushed.callback_url, CALLBACK_URL);
    assert_eq!(pushed.account_reference, outcome.transaction.id.to_string());

    let result = h
        .orchestrator
        .handle_callback(&body(&success_callback(&checkout_id, "ABC123", 1000)))
        .await
        .unwrap();

    let tx = match result {
        CallbackOutcome::Completed(tx) => tx,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.gateway_receipt_id.as_deref(), Some("ABC123"));
    assert_eq!(tx.chain_tx_hash.as_deref(), Some("0xHASH"));
    assert!(tx.completed_at.is_some());
    assert_eq!(h.chain.call_count(), 1);
}

#[tokio::test]
async fn test_failed_payment_marks_transaction_failed_without_transfer() {
    let h = default_harness();
    let outcome = h.orchestrator.initiate(buy_request("500")).await.unwrap();
    let checkout_id = outcome.checkout_id.unwrap();

    let result = h
        .orchestrator
        .handle_callback(&body(&failure_callback(&checkout_id, 1032, "Request cancelled by user")))
        .await
        .unwrap();

    assert!(matches!(result, CallbackOutcome::PaymentFailed(_)));
    let tx = h.orchestrator.poll_status(outcome.transaction.id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert!(tx.chain_tx_hash.is_none());
    assert_eq!(h.chain.call_count(), 0);
}

#[tokio::test]
async fn test_duplicate_callback_transfers_once() {
    let h = default_harness();
    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();
    let checkout_id = outcome.checkout_id.unwrap();
    let payload = body(&success_callback(&checkout_id, "ABC123", 1000));

    let first = h.orchestrator.handle_callback(&payload).await.unwrap();
    let second = h.orchestrator.handle_callback(&payload).await.unwrap();

    assert!(matches!(first, CallbackOutcome::Completed(_)));
    match second {
        CallbackOutcome::Duplicate(tx) => assert_eq!(tx.status, TransactionStatus::Completed),
        other => panic!("expected duplicate, got {:?}", other),
    }
    assert_eq!(h.chain.call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_callbacks_transfer_once() {
    let h = harness(
        FakeGateway::accepting(),
        FakeChain::slow(Duration::from_millis(50)),
        Some("132"),
    );
    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();
    let payload = body(&success_callback(&outcome.checkout_id.unwrap(), "ABC123", 1000));

    let (a, b, c) = tokio::join!(
        h.orchestrator.handle_callback(&payload),
        h.orchestrator.handle_callback(&payload),
        h.orchestrator.handle_callback(&payload),
    );

    let outcomes = [a.unwrap(), b.unwrap(), c.unwrap()];
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, CallbackOutcome::Completed(_)))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(h.chain.call_count(), 1);

    let tx = h.orchestrator.poll_status(outcome.transaction.id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_failure_callback_after_completion_is_ignored() {
    let h = default_harness();
    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();
    let checkout_id = outcome.checkout_id.unwrap();

    h.orchestrator
        .handle_callback(&body(&success_callback(&checkout_id, "ABC123", 1000)))
        .await
        .unwrap();
    let late = h
        .orchestrator
        .handle_callback(&body(&failure_callback(&checkout_id, 1, "Insufficient balance")))
        .await
        .unwrap();

    assert!(matches!(late, CallbackOutcome::Duplicate(_)));
    let tx = h.orchestrator.poll_status(outcome.transaction.id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_failure_callback_cannot_fail_claimed_transfer() {
    let h = default_harness();
    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();
    let checkout_id = outcome.checkout_id.unwrap();
    // A success delivery has claimed the transfer and is broadcasting.
    h.ledger
        .claim_transfer(outcome.transaction.id, Some("ABC123".to_string()))
        .await
        .unwrap()
        .unwrap();

    let late = h
        .orchestrator
        .handle_callback(&body(&failure_callback(&checkout_id, 1, "Insufficient balance")))
        .await
        .unwrap();

    match late {
        CallbackOutcome::Duplicate(tx) => {
            assert_eq!(tx.status, TransactionStatus::Processing);
            assert!(tx.transfer_started_at.is_some());
        }
        other => panic!("expected duplicate, got {:?}", other),
    }
    let tx = h.orchestrator.poll_status(outcome.transaction.id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Processing);
    assert!(tx.completed_at.is_none());
}

#[tokio::test]
async fn test_unparseable_amount_does_not_block_completion() {
    let h = default_harness();
    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();
    let mut callback = success_callback(&outcome.checkout_id.unwrap(), "ABC123", 1000);
    callback["Body"]["stkCallback"]["CallbackMetadata"]["Item"][0]["Value"] = "1,000.00 KES".into();

    let result = h.orchestrator.handle_callback(&body(&callback)).await.unwrap();

    match result {
        CallbackOutcome::Completed(tx) => {
            assert_eq!(tx.gateway_receipt_id.as_deref(), Some("ABC123"));
            assert_eq!(tx.chain_tx_hash.as_deref(), Some("0xHASH"));
        }
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(h.chain.call_count(), 1);
}

#[tokio::test]
async fn test_unknown_checkout_id_is_not_found_and_mutates_nothing() {
    let h = default_harness();
    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();

    let err = h
        .orchestrator
        .handle_callback(&body(&success_callback("ws_CO_UNKNOWN", "ZZZ999", 1000)))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::NotFound(_)));
    let tx = h.orchestrator.poll_status(outcome.transaction.id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Processing);
    assert_eq!(h.chain.call_count(), 0);
}

#[tokio::test]
async fn test_success_callback_without_receipt_is_malformed() {
    let h = default_harness();
    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();
    let mut payload = success_callback(&outcome.checkout_id.unwrap(), "ABC123", 1000);
    payload["Body"]["stkCallback"]["CallbackMetadata"]["Item"] = serde_json::json!([
        { "Name": "Amount", "Value": 1000 }
    ]);

    let err = h.orchestrator.handle_callback(&body(&payload)).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::MalformedCallback(_)));
    assert_eq!(h.chain.call_count(), 0);
}

#[tokio::test]
async fn test_garbage_callback_is_malformed() {
    let h = default_harness();
    let err = h.orchestrator.handle_callback(b"not json").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::MalformedCallback(_)));
}

#[tokio::test]
async fn test_chain_failure_after_payment_marks_failed_and_keeps_receipt() {
    let h = harness(
        FakeGateway::accepting(),
        FakeChain::broadcast_failing("CONTRACT_VALIDATE_ERROR"),
        Some("132"),
    );
    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();

    let result = h
        .orchestrator
        .handle_callback(&body(&success_callback(&outcome.checkout_id.unwrap(), "ABC123", 1000)))
        .await
        .unwrap();

    let tx = match result {
        CallbackOutcome::TransferFailed(tx) => tx,
        other => panic!("expected transfer failure, got {:?}", other),
    };
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.gateway_receipt_id.as_deref(), Some("ABC123"));
    assert!(tx.chain_tx_hash.is_none());
    assert!(tx.transfer_started_at.is_some());
}

#[tokio::test]
async fn test_gateway_rejection_records_failed_transaction() {
    let h = harness(
        FakeGateway::failing(GatewayError::Rejected("Invalid Access Token".to_string())),
        FakeChain::succeeding(),
        Some("132"),
    );

    let err = h.orchestrator.initiate(buy_request("1000")).await.unwrap_err();

    let id = match err {
        OrchestratorError::GatewayRejected { transaction_id, reason } => {
            assert_eq!(reason, "Invalid Access Token");
            transaction_id
        }
        other => panic!("expected rejection, got {:?}", other),
    };
    let tx = h.ledger.get_by_id(id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert!(tx.gateway_checkout_id.is_none());
}

#[tokio::test]
async fn test_transport_failure_records_failed_transaction() {
    let h = harness(
        FakeGateway::failing(GatewayError::Transport("operation timed out".to_string())),
        FakeChain::succeeding(),
        Some("132"),
    );

    let err = h.orchestrator.initiate(buy_request("1000")).await.unwrap_err();

    let OrchestratorError::Transport { transaction_id, .. } = err else {
        panic!("expected transport error");
    };
    let tx = h.ledger.get_by_id(transaction_id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn test_validation_errors_have_no_side_effects() {
    let h = default_harness();

    let mut bad_phone = buy_request("1000");
    bad_phone.mobile_number = "12345".to_string();
    let mut bad_wallet = buy_request("1000");
    bad_wallet.wallet_address = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e".to_string();
    let fractional = buy_request("100.50");
    let zero = buy_request("0");

    for request in [bad_phone, bad_wallet, fractional, zero] {
        let err = h.orchestrator.initiate(request).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)), "{:?}", err);
    }

    assert!(h.ledger.is_empty().await);
    assert_eq!(h.gateway.call_count(), 0);
}

#[tokio::test]
async fn test_default_rate_used_when_none_recorded() {
    let h = harness(FakeGateway::accepting(), FakeChain::succeeding(), None);

    let quote = h.orchestrator.current_rate().await.unwrap();
    assert!(quote.is_default);

    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();
    assert_eq!(outcome.transaction.exchange_rate, dec("132"));
    assert_eq!(outcome.transaction.target_amount, dec("7.575758"));
}

#[tokio::test]
async fn test_recorded_rate_applies_to_new_transactions() {
    let h = default_harness();

    h.orchestrator.record_rate(&dec("125")).await.unwrap();
    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();

    assert_eq!(outcome.transaction.exchange_rate, dec("125"));
    assert_eq!(outcome.transaction.target_amount, dec("8.000000"));
    assert!(h.orchestrator.record_rate(&dec("-1")).await.is_err());
}

#[tokio::test]
async fn test_token_to_mobile_stays_pending_and_can_be_cancelled() {
    let h = default_harness();

    let outcome = h
        .orchestrator
        .initiate(InitiateRequest {
            owner_id: Uuid::new_v4(),
            source_amount: dec("10"),
            mobile_number: "+254 712 345 678".to_string(),
            wallet_address: WALLET.to_string(),
            direction: TransactionType::TokenToMobile,
        })
        .await
        .unwrap();

    assert_eq!(outcome.transaction.status, TransactionStatus::Pending);
    assert_eq!(outcome.transaction.target_amount, dec("1320.00"));
    assert_eq!(outcome.deposit_address.as_deref(), Some(DEPOSIT_ADDRESS));
    assert!(outcome.checkout_id.is_none());
    assert_eq!(h.gateway.call_count(), 0);

    let cancelled = h.orchestrator.cancel(outcome.transaction.id).await.unwrap();
    assert_eq!(cancelled.status, TransactionStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
}

#[tokio::test]
async fn test_cancel_rejects_in_flight_transaction() {
    let h = default_harness();
    let outcome = h.orchestrator.initiate(buy_request("1000")).await.unwrap();

    let err = h.orchestrator.cancel(outcome.transaction.id).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::InvalidState {
            status: TransactionStatus::Processing,
            ..
        }
    ));
    let tx = h.orchestrator.poll_status(outcome.transaction.id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Processing);
}

#[tokio::test]
async fn test_poll_status_unknown_id_is_not_found() {
    let h = default_harness();
    let err = h.orchestrator.poll_status(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}
