//! Signing and broadcast tests
//!
//! Covers the single retry on transient broadcast failures, propagation of
//! rejections and signing failures for inputs the wallet does not control.

use std::sync::Arc;

use colored_asset_wallet::chain::{BroadcastError, ChainSource};
use colored_asset_wallet::engine::{
    FeeRateConfig, Gateway, GatewayError, Resolver, TransactionBuilder,
};
use colored_asset_wallet::manager::ErrorKind;
use colored_asset_wallet::wallet::{HdWallet, SigningError};

use crate::common::{issuance_request, send_from_utxo, TestEnv};

#[tokio::test]
async fn test_transient_broadcast_failure_is_retried_once() {
    let env = TestEnv::funded(100_000);
    env.chain
        .inject_broadcast_failure(BroadcastError::Transient("connection reset".to_string()));

    let before = env.chain.broadcast_attempts();
    let result = env.issue(10).await;

    assert_eq!(
        env.chain.broadcast_attempts() - before,
        2,
        "One failed attempt plus one retry"
    );
    let holdings = env.client.get_assets().await.expect("Failed to list");
    assert_eq!(holdings[0].asset_id, result.asset_id);
}

#[tokio::test]
async fn test_second_transient_failure_surfaces_as_rejection() {
    let env = TestEnv::funded(100_000);
    for _ in 0..2 {
        env.chain
            .inject_broadcast_failure(BroadcastError::Transient("timeout".to_string()));
    }

    let err = env
        .client
        .issue_asset(&issuance_request(10))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BroadcastRejected, "{}", err);
    assert_eq!(env.chain.broadcast_attempts(), 2, "Exactly one retry");
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let env = TestEnv::funded(100_000);
    env.chain
        .inject_broadcast_failure(BroadcastError::Rejected("min relay fee not met".to_string()));

    let err = env
        .client
        .issue_asset(&issuance_request(10))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BroadcastRejected, "{}", err);
    assert_eq!(env.chain.broadcast_attempts(), 1);
    assert!(
        env.client.get_assets().await.expect("Failed to list").is_empty(),
        "Nothing should be colored after a rejected issuance"
    );
}

#[tokio::test]
async fn test_double_spend_is_rejected_by_the_chain() {
    let env = TestEnv::funded(100_000);
    let issued = env.issue(10).await;

    let resolver = Resolver::new(
        env.wallet.clone(),
        env.chain.clone(),
        env.directory.clone(),
    );
    let builder = TransactionBuilder::new(FeeRateConfig::low_priority());
    let gateway = Gateway::new(env.wallet.clone(), env.chain.clone());

    let request = send_from_utxo(
        &issued.issuance_utxo,
        issued.asset_id.as_str(),
        1,
        &env.peer_address(0),
    );
    let first = builder
        .build_transfer(&resolver.resolve_transfer(&request).await.expect("resolve"))
        .expect("build");
    let mut second_request = request.clone();
    second_request.to[0].address = Some(env.peer_address(1).to_string());
    let second = builder
        .build_transfer(
            &resolver
                .resolve_transfer(&second_request)
                .await
                .expect("resolve"),
        )
        .expect("build");

    gateway
        .sign_and_broadcast(&first)
        .await
        .expect("First spend should be accepted");
    let err = gateway.sign_and_broadcast(&second).await.unwrap_err();

    assert!(
        matches!(err, GatewayError::Broadcast(BroadcastError::Rejected(_))),
        "Conflicting spend should be rejected, got {:?}",
        err
    );
}

#[tokio::test]
async fn test_foreign_inputs_cannot_be_signed() {
    let env = TestEnv::funded(100_000);

    let resolver = Resolver::new(
        env.wallet.clone(),
        env.chain.clone(),
        env.directory.clone(),
    );
    let builder = TransactionBuilder::new(FeeRateConfig::low_priority());
    let plan = resolver
        .resolve_issuance(&issuance_request(10))
        .await
        .expect("resolve");
    let issuance = builder.build_issuance(&plan).expect("build");

    let peer_gateway = Gateway::new(env.peer_wallet.clone(), env.chain.clone());
    let err = peer_gateway.sign(&issuance.skeleton).unwrap_err();

    assert!(
        matches!(err, GatewayError::Signing(SigningError::ForeignInput(0))),
        "Peer wallet should not sign the test wallet's input, got {:?}",
        err
    );
    assert_eq!(env.chain.broadcast_attempts(), 0);
}

#[tokio::test]
async fn test_signed_transaction_spends_every_input_with_a_witness() {
    let env = TestEnv::funded(100_000);

    let resolver = Resolver::new(
        env.wallet.clone(),
        env.chain.clone(),
        env.directory.clone(),
    );
    let plan = resolver
        .resolve_issuance(&issuance_request(10))
        .await
        .expect("resolve");
    let issuance = TransactionBuilder::new(FeeRateConfig::medium_priority())
        .build_issuance(&plan)
        .expect("build");

    let signed = env.wallet.sign(&issuance.skeleton).expect("sign");

    assert_eq!(
        signed.txid,
        issuance.issuance_utxo.txid,
        "Witnesses must not change the txid the asset id was derived from"
    );
    assert!(signed.tx.input.iter().all(|i| i.witness.len() == 2));

    let chain: Arc<dyn ChainSource> = env.chain.clone();
    chain
        .broadcast(&signed.tx)
        .await
        .expect("Signed issuance should be accepted");
}
