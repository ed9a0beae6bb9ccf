//! Event notification tests
//!
//! Covers subscription lifecycle, colored-transaction routing, secure and
//! unsecure delivery, skipped malformed events and transport disconnects.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use colored_asset_wallet::chain::ChainSource;
use colored_asset_wallet::events::{
    EventCategory, NotifierError, NotifierState, RawTransactionEvent,
};
use colored_asset_wallet::manager::ErrorKind;
use tokio::sync::mpsc;

use crate::common::{event_channel, next_event, send_from_utxo, TestEnv};

const WAIT: Duration = Duration::from_secs(2);
const SHORT_WAIT: Duration = Duration::from_millis(200);

/// Transaction that pays `sats` to `script` and never reaches the chain
fn off_chain_payment(spending: OutPoint, script: ScriptBuf, sats: u64) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: spending.txid,
                vout: 99,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: script,
        }],
    }
}

#[tokio::test]
async fn test_funding_is_delivered_to_subscriber() {
    let env = TestEnv::new();
    assert_eq!(env.client.notifier_state(), Some(NotifierState::Unsubscribed));

    let (callback, mut rx) = event_channel();
    env.client
        .on_new_transaction(callback)
        .await
        .expect("Failed to subscribe");
    assert_eq!(env.client.notifier_state(), Some(NotifierState::Active));

    let funding = env.fund(0, 50_000);
    let event = next_event(&mut rx, WAIT)
        .await
        .expect("Funding event should be delivered");

    assert_eq!(event.txid, funding.txid);
    assert_eq!(event.addresses, vec![env.address(0).to_string()]);
    assert!(!event.colored);
    assert!(event.secure, "Default delivery mode is secure");

    println!("✓ Received {} for {}", event.txid, event.addresses[0]);
}

#[tokio::test]
async fn test_colored_subscription_only_sees_colored_transactions() {
    let env = TestEnv::new();
    let (all_callback, mut all_rx) = event_channel();
    let (cc_callback, mut cc_rx) = event_channel();
    env.client
        .on_new_transaction(all_callback)
        .await
        .expect("Failed to subscribe");
    env.client
        .on_new_cc_transaction(cc_callback)
        .await
        .expect("Failed to subscribe");

    let funding = env.fund(0, 100_000);
    let result = env.issue(1_000).await;

    let first = next_event(&mut all_rx, WAIT).await.expect("funding event");
    let second = next_event(&mut all_rx, WAIT).await.expect("issuance event");
    assert_eq!(first.txid, funding.txid);
    assert_eq!(second.txid.to_string(), result.transaction.txid);

    let colored = next_event(&mut cc_rx, WAIT)
        .await
        .expect("Issuance should reach the colored subscription");
    assert_eq!(colored.txid.to_string(), result.transaction.txid);
    assert!(colored.colored);
    assert!(
        next_event(&mut cc_rx, SHORT_WAIT).await.is_none(),
        "Funding must not reach the colored subscription"
    );

    let awaited = env
        .client
        .await_transaction(
            &result.transaction.txid,
            EventCategory::NewColoredTransaction,
            WAIT,
        )
        .await
        .expect("Delivered events should be found after the fact");
    assert_eq!(awaited.txid, colored.txid);
}

#[tokio::test]
async fn test_transfer_is_delivered_to_recipient() {
    let env = TestEnv::funded(100_000);
    let issued = env.issue(100).await;

    let peer = env.peer_client();
    let (callback, mut rx) = event_channel();
    peer.on_new_cc_transaction(callback)
        .await
        .expect("Failed to subscribe");

    let sent = env
        .client
        .send_asset(&send_from_utxo(
            &issued.issuance_utxo,
            issued.asset_id.as_str(),
            40,
            &env.peer_address(0),
        ))
        .await
        .expect("Transfer should succeed");

    let event = next_event(&mut rx, WAIT)
        .await
        .expect("Recipient should be notified");
    assert_eq!(event.txid.to_string(), sent.txid);
    assert_eq!(event.addresses, vec![env.peer_address(0).to_string()]);
}

#[tokio::test]
async fn test_foreign_transactions_are_not_delivered() {
    let env = TestEnv::new();
    let (callback, mut rx) = event_channel();
    env.client
        .on_new_transaction(callback)
        .await
        .expect("Failed to subscribe");

    let foreign = env.chain.fund(&env.peer_address(0), 10_000);

    let err = env
        .client
        .await_transaction(
            &foreign.txid.to_string(),
            EventCategory::NewTransaction,
            SHORT_WAIT,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout, "{}", err);
    assert!(next_event(&mut rx, SHORT_WAIT).await.is_none());
    assert_eq!(
        env.client.notifier_state(),
        Some(NotifierState::Active),
        "A timeout leaves the notifier running"
    );
}

#[tokio::test]
async fn test_malformed_events_are_skipped() {
    let env = TestEnv::new();
    let (callback, mut rx) = event_channel();
    env.client
        .on_new_transaction(callback)
        .await
        .expect("Failed to subscribe");

    let feed = env.chain.feed();
    feed.publish(RawTransactionEvent {
        txid: "not-a-txid".to_string(),
        hex: None,
        addresses: vec![env.address(0).to_string()],
    });
    feed.publish(RawTransactionEvent {
        txid: "00".repeat(32),
        hex: Some("deadbeef".to_string()),
        addresses: vec![env.address(0).to_string()],
    });

    let funding = env.fund(0, 20_000);
    let event = next_event(&mut rx, WAIT)
        .await
        .expect("Events after malformed ones should still arrive");

    assert_eq!(event.txid, funding.txid);
    assert_eq!(env.client.notifier_state(), Some(NotifierState::Active));
}

#[tokio::test]
async fn test_unsecure_mode_trusts_the_transport() {
    let env = TestEnv::new();
    let (callback, mut rx) = event_channel();
    env.client
        .on_new_transaction(callback)
        .await
        .expect("Failed to subscribe");
    env.client
        .set_events_secure(false)
        .await
        .expect("Failed to switch mode");
    assert!(!env.client.events_secure());

    let anchor = env.chain.fund(&env.peer_address(0), 1_000);
    let forged = off_chain_payment(anchor, env.address(0).script_pubkey(), 5_000);
    env.chain.feed().publish(RawTransactionEvent {
        txid: forged.compute_txid().to_string(),
        hex: Some(serialize_hex(&forged)),
        addresses: vec![env.address(0).to_string()],
    });

    let event = next_event(&mut rx, WAIT)
        .await
        .expect("Unsecure mode delivers what the transport reports");
    assert_eq!(event.txid, forged.compute_txid());
    assert!(!event.secure);
}

#[tokio::test]
async fn test_secure_mode_rejects_unconfirmable_events() {
    let env = TestEnv::new();
    let (callback, mut rx) = event_channel();
    env.client
        .on_new_transaction(callback)
        .await
        .expect("Failed to subscribe");

    let anchor = env.chain.fund(&env.peer_address(0), 1_000);
    let forged = off_chain_payment(anchor, env.address(0).script_pubkey(), 5_000);
    let feed = env.chain.feed();
    feed.publish(RawTransactionEvent {
        txid: forged.compute_txid().to_string(),
        hex: Some(serialize_hex(&forged)),
        addresses: vec![env.address(0).to_string()],
    });

    // Real foreign transaction falsely claimed to touch the wallet
    let foreign_tx = env
        .chain
        .get_transaction(&anchor.txid)
        .await
        .expect("Anchor should be on chain");
    feed.publish(RawTransactionEvent {
        txid: anchor.txid.to_string(),
        hex: Some(serialize_hex(&foreign_tx)),
        addresses: vec![env.address(0).to_string()],
    });

    let funding = env.fund(0, 20_000);
    let event = next_event(&mut rx, WAIT)
        .await
        .expect("Genuine wallet event should be delivered");

    assert_eq!(
        event.txid, funding.txid,
        "Forged and misattributed events must be skipped in secure mode"
    );
    assert!(event.secure);
}

#[tokio::test]
async fn test_mode_switch_applies_to_later_events() {
    let env = TestEnv::new();
    let (callback, mut rx) = event_channel();
    env.client
        .on_new_transaction(callback)
        .await
        .expect("Failed to subscribe");

    env.fund(0, 10_000);
    let secure = next_event(&mut rx, WAIT).await.expect("first event");
    assert!(secure.secure);

    env.client
        .set_events_secure(false)
        .await
        .expect("Failed to switch mode");
    env.fund(1, 10_000);
    let unsecure = next_event(&mut rx, WAIT).await.expect("second event");
    assert!(!unsecure.secure);
    assert_eq!(unsecure.addresses, vec![env.address(1).to_string()]);
}

#[tokio::test]
async fn test_unsubscribed_callback_is_not_called() {
    let env = TestEnv::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let id = env
        .client
        .on_new_transaction(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("Failed to subscribe");

    assert!(env.client.unsubscribe(id).expect("events enabled"));
    assert!(
        !env.client.unsubscribe(id).expect("events enabled"),
        "Second unsubscribe finds nothing"
    );

    let funding = env.fund(0, 10_000);
    env.client
        .await_transaction(
            &funding.txid.to_string(),
            EventCategory::NewTransaction,
            WAIT,
        )
        .await
        .expect("Event should still be processed");

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_transport_disconnect_reports_error() {
    let env = TestEnv::new();
    let (callback, _rx) = event_channel();
    env.client
        .on_new_transaction(callback)
        .await
        .expect("Failed to subscribe");

    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    env.client
        .on_notifier_error(move |e: &NotifierError| {
            let _ = err_tx.send(e.clone());
        })
        .expect("events enabled");

    env.chain.feed().disconnect();

    let error = tokio::time::timeout(WAIT, err_rx.recv())
        .await
        .expect("Error callback should run")
        .expect("Error channel open");
    assert_eq!(error, NotifierError::TransportDisconnected);
    assert_eq!(
        env.client.notifier_state(),
        Some(NotifierState::Error(NotifierError::TransportDisconnected))
    );

    let (callback, _rx) = event_channel();
    let err = env.client.on_new_transaction(callback).await.unwrap_err();
    assert_eq!(
        err.kind(),
        ErrorKind::TransportDisconnected,
        "The notifier does not resubscribe on its own"
    );
}

#[tokio::test]
async fn test_shutdown_stops_delivery() {
    let env = TestEnv::new();
    let (callback, mut rx) = event_channel();
    env.client
        .on_new_transaction(callback)
        .await
        .expect("Failed to subscribe");

    env.client.shutdown().await;
    assert_eq!(env.client.notifier_state(), Some(NotifierState::Unsubscribed));

    env.fund(0, 10_000);
    assert!(next_event(&mut rx, SHORT_WAIT).await.is_none());
}

#[tokio::test]
async fn test_issuance_is_delivered_in_unsecure_mode() {
    let env = TestEnv::funded(100_000);
    let (all_callback, mut all_rx) = event_channel();
    let (cc_callback, mut cc_rx) = event_channel();
    env.client
        .on_new_transaction(all_callback)
        .await
        .expect("Failed to subscribe");
    env.client
        .on_new_cc_transaction(cc_callback)
        .await
        .expect("Failed to subscribe");
    env.client
        .set_events_secure(false)
        .await
        .expect("Failed to switch mode");

    let result = env.issue(500).await;

    for category in [
        EventCategory::NewTransaction,
        EventCategory::NewColoredTransaction,
    ] {
        let event = env
            .client
            .await_transaction(&result.transaction.txid, category, WAIT)
            .await
            .expect("Issuance should be delivered within the wait");
        assert_eq!(event.txid.to_string(), result.transaction.txid);
        assert!(event.colored);
        assert!(!event.secure, "Delivered without chain validation");
    }

    let all = next_event(&mut all_rx, WAIT).await.expect("issuance event");
    let colored = next_event(&mut cc_rx, WAIT).await.expect("colored issuance event");
    assert_eq!(all.txid, colored.txid);
    assert_eq!(colored.txid.to_string(), result.transaction.txid);
    assert_eq!(colored.addresses, vec![env.address(0).to_string()]);
}
