//! Metadata resolution tests
//!
//! Covers the per-session cache, single-flight fetches, refresh and the
//! integrity check against the issuance transaction.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::OutPoint;
use colored_asset_wallet::coloring::AssetId;
use colored_asset_wallet::manager::{ClientSettings, ErrorKind};
use colored_asset_wallet::metadata::{MemoryMetadataSource, MetadataError, MetadataResolver};

use crate::common::{sample_metadata, TestEnv};

/// Issue an asset and return its id and issuance outpoint
async fn issued(env: &TestEnv) -> (AssetId, OutPoint) {
    let result = env.issue(1_000).await;
    let utxo = result
        .issuance_utxo
        .parse()
        .expect("Issuance UTXO should parse as an outpoint");
    (result.asset_id, utxo)
}

#[tokio::test]
async fn test_second_resolve_is_served_from_cache() {
    let env = TestEnv::funded(100_000);
    let (asset_id, utxo) = issued(&env).await;
    let resolver = MetadataResolver::new(env.metadata.clone(), env.chain.clone());

    let first = resolver
        .resolve(&asset_id, &utxo, true, false)
        .await
        .expect("Failed to resolve metadata");
    let second = resolver
        .resolve(&asset_id, &utxo, true, false)
        .await
        .expect("Failed to resolve metadata");

    assert_eq!(env.metadata.fetch_count(), 1, "Second call should hit the cache");
    assert_eq!(first, second);
    assert_eq!(resolver.len(), 1);
}

#[tokio::test]
async fn test_refresh_bypasses_cache() {
    let env = TestEnv::funded(100_000);
    let (asset_id, utxo) = issued(&env).await;
    let resolver = MetadataResolver::new(env.metadata.clone(), env.chain.clone());

    resolver
        .resolve(&asset_id, &utxo, false, false)
        .await
        .expect("Failed to resolve metadata");
    resolver
        .resolve(&asset_id, &utxo, false, true)
        .await
        .expect("Failed to refresh metadata");

    assert_eq!(env.metadata.fetch_count(), 2, "Refresh should fetch again");
    assert_eq!(resolver.len(), 1, "Refresh replaces the entry");
}

#[tokio::test]
async fn test_concurrent_resolves_share_one_fetch() {
    let env = TestEnv::funded(100_000);
    let (asset_id, utxo) = issued(&env).await;

    let slow = Arc::new(MemoryMetadataSource::with_fetch_delay(Duration::from_millis(100)));
    slow.insert(&asset_id, &utxo, sample_metadata());
    let resolver = MetadataResolver::new(slow.clone(), env.chain.clone());

    let (a, b, c, d, e) = tokio::join!(
        resolver.resolve(&asset_id, &utxo, true, false),
        resolver.resolve(&asset_id, &utxo, true, false),
        resolver.resolve(&asset_id, &utxo, false, false),
        resolver.resolve(&asset_id, &utxo, true, false),
        resolver.resolve(&asset_id, &utxo, true, false),
    );

    for result in [a, b, c, d, e] {
        let metadata = result.expect("Every caller should get the metadata");
        assert_eq!(metadata.asset_name, "Test Gold");
    }
    assert_eq!(slow.fetch_count(), 1, "Only the first caller should fetch");

    println!("✓ Five concurrent resolves served by {} fetch", slow.fetch_count());
}

#[tokio::test]
async fn test_tampered_metadata_fails_verification() {
    let env = TestEnv::funded(100_000);
    let (asset_id, utxo) = issued(&env).await;

    let mut tampered = sample_metadata();
    tampered.issuer = "Somebody Else".to_string();
    env.metadata.insert(&asset_id, &utxo, tampered);

    let resolver = MetadataResolver::new(env.metadata.clone(), env.chain.clone());
    let err = resolver
        .resolve(&asset_id, &utxo, true, false)
        .await
        .unwrap_err();

    assert!(
        matches!(err, MetadataError::Integrity(_)),
        "Expected an integrity failure, got {:?}",
        err
    );
    assert!(
        resolver.cached(&asset_id, &utxo).is_none(),
        "Unverifiable metadata must not be cached"
    );

    let unverified = resolver
        .resolve(&asset_id, &utxo, false, false)
        .await
        .expect("Without verification the entry is returned as stored");
    assert_eq!(unverified.issuer, "Somebody Else");
    assert!(!unverified.verified);
}

#[tokio::test]
async fn test_unverified_entry_is_verified_in_place() {
    let env = TestEnv::funded(100_000);
    let (asset_id, utxo) = issued(&env).await;
    let resolver = MetadataResolver::new(env.metadata.clone(), env.chain.clone());

    let plain = resolver
        .resolve(&asset_id, &utxo, false, false)
        .await
        .expect("Failed to resolve metadata");
    assert!(!plain.verified);

    let checked = resolver
        .resolve(&asset_id, &utxo, true, false)
        .await
        .expect("Failed to verify metadata");

    assert!(checked.verified);
    assert_eq!(env.metadata.fetch_count(), 1, "Verification should not refetch");
    assert!(
        resolver
            .cached(&asset_id, &utxo)
            .map(|m| m.verified)
            .unwrap_or(false),
        "Cached entry should now be marked verified"
    );
}

#[tokio::test]
async fn test_metadata_for_wrong_output_fails_verification() {
    let env = TestEnv::funded(100_000);
    let (asset_id, utxo) = issued(&env).await;
    let change = OutPoint {
        txid: utxo.txid,
        vout: 1,
    };
    env.metadata.insert(&asset_id, &change, sample_metadata());

    let resolver = MetadataResolver::new(env.metadata.clone(), env.chain.clone());
    let err = resolver
        .resolve(&asset_id, &change, true, false)
        .await
        .unwrap_err();

    assert!(
        matches!(err, MetadataError::Integrity(_)),
        "Only the issuance output carries the metadata, got {:?}",
        err
    );
}

#[tokio::test]
async fn test_missing_metadata_is_not_found() {
    let env = TestEnv::funded(100_000);
    let (asset_id, utxo) = issued(&env).await;
    let resolver = MetadataResolver::new(Arc::new(MemoryMetadataSource::new()), env.chain.clone());

    let err = resolver
        .resolve(&asset_id, &utxo, false, false)
        .await
        .unwrap_err();

    assert!(matches!(err, MetadataError::NotFound { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_client_reports_integrity_failures() {
    let env = TestEnv::funded(100_000);
    let (asset_id, utxo) = issued(&env).await;

    let mut tampered = sample_metadata();
    tampered.asset_name = "Fool's Gold".to_string();
    env.metadata.insert(&asset_id, &utxo, tampered);

    let err = env
        .client
        .get_asset_metadata(asset_id.as_str(), &utxo.to_string(), true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MetadataIntegrity, "{}", err);

    let err = env
        .client
        .get_asset_metadata(asset_id.as_str(), "not-a-utxo", false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation, "{}", err);
}

#[tokio::test]
async fn test_client_without_verification_trusts_the_store() {
    let mut settings = ClientSettings::regtest();
    settings.verify_metadata = false;
    let env = TestEnv::with_settings(settings);
    env.fund(0, 100_000);
    let (asset_id, utxo) = issued(&env).await;

    let metadata = env
        .client
        .get_asset_metadata(asset_id.as_str(), &utxo.to_string(), false)
        .await
        .expect("Failed to resolve metadata");

    assert!(!metadata.verified);
    assert_eq!(metadata.asset_name, "Test Gold");
}
