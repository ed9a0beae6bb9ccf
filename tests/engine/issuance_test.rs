//! Asset issuance tests
//!
//! Covers issue_asset(), derived asset identity, remainder handling,
//! request validation and the read-only listings that follow an issuance.

use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::Transaction;
use colored_asset_wallet::coloring::{AssetId, LockStatus, Payload};
use colored_asset_wallet::engine::{IssuanceTransfer, COLORED_OUTPUT_VALUE};
use colored_asset_wallet::manager::ErrorKind;
use colored_asset_wallet::types::ReceivingAddress;

use crate::common::{issuance_request, issuance_transfer, TestEnv};

#[tokio::test]
async fn test_issue_asset_returns_transaction_and_identity() {
    let env = TestEnv::funded(100_000);

    let result = env.issue(1_000).await;

    assert!(!result.transaction.tx_hex.is_empty(), "txHex should be set");
    assert_eq!(result.transaction.txid.len(), 64, "txid should be 32 bytes hex");
    assert_eq!(
        result.transaction.colored_output_indexes,
        vec![0],
        "Whole supply should land on a single colored output"
    );
    assert_eq!(
        result.issuance_utxo,
        format!("{}:0", result.transaction.txid),
        "Issuance UTXO should be the first colored output"
    );
    assert_eq!(
        result.issue_address,
        env.address(0).to_string(),
        "Issue address should be the funding address"
    );
    assert_eq!(
        result.receiving_addresses,
        vec![ReceivingAddress {
            address: env.address(0).to_string(),
            amount: 1_000,
        }]
    );

    let tx: Transaction =
        deserialize_hex(&result.transaction.tx_hex).expect("txHex should decode");
    assert_eq!(tx.compute_txid().to_string(), result.transaction.txid);
    assert_eq!(tx.output[0].value.to_sat(), COLORED_OUTPUT_VALUE);

    match Payload::find_in(&tx) {
        Some(Ok((_, Payload::Issuance { amount, divisibility, reissueable, .. }))) => {
            assert_eq!(amount, 1_000);
            assert_eq!(divisibility, 2);
            assert!(!reissueable);
        }
        other => panic!("Expected an issuance payload, got {:?}", other),
    }

    println!("✓ Issued {} in {}", result.asset_id, result.transaction.txid);
}

#[tokio::test]
async fn test_asset_id_is_derived_from_issuance_utxo() {
    let env = TestEnv::funded(100_000);

    let result = env.issue(500).await;
    let txid = result.transaction.txid.parse().expect("valid txid");

    assert_eq!(
        result.asset_id,
        AssetId::derive(&txid, 0, 2, false),
        "Asset id should be reproducible from the issuance UTXO"
    );
    assert!(result.asset_id.as_str().starts_with('L'));
    assert_eq!(result.asset_id.lock_status(), LockStatus::Locked);
}

#[tokio::test]
async fn test_reissueable_asset_is_unlocked() {
    let env = TestEnv::funded(100_000);

    let mut request = issuance_request(10);
    request.reissueable = true;
    let result = env
        .client
        .issue_asset(&request)
        .await
        .expect("Issuance should succeed");

    assert!(result.asset_id.as_str().starts_with('U'));
    assert_eq!(result.asset_id.lock_status(), LockStatus::Unlocked);
}

#[tokio::test]
async fn test_issuance_splits_supply_and_returns_remainder_to_issuer() {
    let env = TestEnv::funded(100_000);
    let peer = env.peer_address(0);

    let mut request = issuance_request(1_000);
    request.transfer = vec![issuance_transfer(300, Some(&peer))];

    let result = env
        .client
        .issue_asset(&request)
        .await
        .expect("Issuance should succeed");

    assert_eq!(result.transaction.colored_output_indexes, vec![0, 1]);
    assert_eq!(
        result.receiving_addresses,
        vec![
            ReceivingAddress {
                address: peer.to_string(),
                amount: 300,
            },
            ReceivingAddress {
                address: env.address(0).to_string(),
                amount: 700,
            },
        ],
        "Remainder should return to the issue address"
    );

    let mine = env.client.get_assets().await.expect("Failed to list assets");
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].amount, 700);

    let theirs = env
        .peer_client()
        .get_assets()
        .await
        .expect("Failed to list peer assets");
    assert_eq!(theirs.len(), 1);
    assert_eq!(theirs[0].asset_id, result.asset_id);
    assert_eq!(theirs[0].amount, 300);
}

#[tokio::test]
async fn test_exact_split_has_no_remainder_output() {
    let env = TestEnv::funded(100_000);
    let peer = env.peer_address(1);

    let mut request = issuance_request(400);
    request.transfer = vec![
        issuance_transfer(100, Some(&peer)),
        issuance_transfer(300, None),
    ];

    let result = env
        .client
        .issue_asset(&request)
        .await
        .expect("Issuance should succeed");

    assert_eq!(result.receiving_addresses.len(), 2);
    assert_eq!(
        result.receiving_addresses[1].address,
        env.address(0).to_string(),
        "Transfers without a destination default to the issue address"
    );
    let total: u64 = result.receiving_addresses.iter().map(|r| r.amount).sum();
    assert_eq!(total, 400);
}

#[tokio::test]
async fn test_holdings_report_divisibility_and_lock_status() {
    let env = TestEnv::funded(100_000);
    let result = env.issue(2_500).await;

    let holdings = env.client.get_assets().await.expect("Failed to list assets");

    assert_eq!(holdings.len(), 1, "Exactly one asset should be held");
    let holding = &holdings[0];
    assert_eq!(holding.asset_id, result.asset_id);
    assert_eq!(holding.amount, 2_500);
    assert_eq!(holding.divisibility, 2);
    assert_eq!(holding.lock_status, LockStatus::Locked);
    assert_eq!(holding.utxos.len(), 1);
    assert_eq!(holding.utxos[0].utxo, result.issuance_utxo);
}

#[tokio::test]
async fn test_issued_assets_and_transactions_are_listed() {
    let env = TestEnv::funded(100_000);
    let result = env.issue(42).await;

    let issued = env
        .client
        .get_issued_assets()
        .await
        .expect("Failed to list issued assets");
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].asset_id, result.asset_id);
    assert_eq!(issued[0].amount, 42);
    assert_eq!(issued[0].issuance_utxo, result.issuance_utxo);
    assert_eq!(issued[0].issue_address, env.address(0).to_string());

    let transactions = env
        .client
        .get_transactions()
        .await
        .expect("Failed to list transactions");
    assert_eq!(transactions.len(), 2, "Funding plus issuance");
    assert!(!transactions[0].colored, "Funding is a plain transaction");
    assert!(transactions[0].confirmed);
    assert_eq!(transactions[1].txid, result.transaction.txid);
    assert!(transactions[1].colored);
    assert!(!transactions[1].confirmed, "Issuance is not mined yet");

    env.chain.mine();
    let transactions = env.client.get_transactions().await.expect("Failed to list");
    assert!(transactions.iter().all(|t| t.confirmed));
}

#[tokio::test]
async fn test_invalid_issuance_requests_are_rejected() {
    let env = TestEnv::funded(100_000);

    let zero = issuance_request(0);
    let err = env.client.issue_asset(&zero).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation, "Zero amount: {}", err);

    let mut too_divisible = issuance_request(10);
    too_divisible.divisibility = 8;
    let err = env.client.issue_asset(&too_divisible).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation, "Divisibility 8: {}", err);

    let mut overcommitted = issuance_request(10);
    overcommitted.transfer = vec![issuance_transfer(6, None), issuance_transfer(5, None)];
    let err = env.client.issue_asset(&overcommitted).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation, "Overcommitted: {}", err);

    let mut foreign = issuance_request(10);
    foreign.transfer = vec![IssuanceTransfer {
        amount: 1,
        to: Some("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".to_string()),
    }];
    let err = env.client.issue_asset(&foreign).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation, "Mainnet address: {}", err);

    assert_eq!(env.chain.broadcast_attempts(), 0, "Nothing should be broadcast");
}

#[tokio::test]
async fn test_issuance_without_funds_fails() {
    let env = TestEnv::new();

    let err = env
        .client
        .issue_asset(&issuance_request(10))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientFunds, "{}", err);
}

#[tokio::test]
async fn test_dust_funding_is_insufficient() {
    let env = TestEnv::funded(700);

    let err = env
        .client
        .issue_asset(&issuance_request(10))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientFunds, "{}", err);
}

#[tokio::test]
async fn test_metadata_is_published_with_the_issuance() {
    let env = TestEnv::funded(100_000);
    let result = env.issue(1_000).await;

    let metadata = env
        .client
        .get_asset_metadata(result.asset_id.as_str(), &result.issuance_utxo, false)
        .await
        .expect("Metadata should resolve");

    assert_eq!(metadata.asset_name, "Test Gold");
    assert_eq!(metadata.issuer, "Test Issuer Ltd");
    assert_eq!(metadata.description, "One unit redeems one gram of gold");
    assert_eq!(metadata.icon.as_deref(), Some("https://example.com/gold.png"));
    assert!(metadata.verified, "Default settings verify metadata");
}
