//! In-memory metadata store

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::OutPoint;

use super::{IssuanceMetadata, MetadataError, MetadataSource};
use crate::coloring::AssetId;

/// Metadata store kept in process memory
///
/// Counts fetches and can delay them, which makes cache behavior observable.
#[derive(Debug, Default)]
pub struct MemoryMetadataSource {
    entries: RwLock<HashMap<(AssetId, OutPoint), IssuanceMetadata>>,
    fetches: AtomicUsize,
    fetch_delay: Option<Duration>,
}

impl MemoryMetadataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `delay`
    pub fn with_fetch_delay(delay: Duration) -> Self {
        Self {
            fetch_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Number of `fetch` calls served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Store `metadata` directly, bypassing any publishing rules
    pub fn insert(&self, asset_id: &AssetId, utxo: &OutPoint, metadata: IssuanceMetadata) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert((asset_id.clone(), *utxo), metadata);
        }
    }
}

#[async_trait]
impl MetadataSource for MemoryMetadataSource {
    async fn fetch(
        &self,
        asset_id: &AssetId,
        utxo: &OutPoint,
    ) -> Result<IssuanceMetadata, MetadataError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }

        self.entries
            .read()
            .map_err(|_| MetadataError::Source("store unavailable".to_string()))?
            .get(&(asset_id.clone(), *utxo))
            .cloned()
            .ok_or_else(|| MetadataError::NotFound {
                asset_id: asset_id.to_string(),
                utxo: utxo.to_string(),
            })
    }

    async fn publish(
        &self,
        asset_id: &AssetId,
        utxo: &OutPoint,
        metadata: &IssuanceMetadata,
    ) -> Result<(), MetadataError> {
        self.insert(asset_id, utxo, metadata.clone());
        log::debug!("Stored metadata for {} at {}", asset_id, utxo);
        Ok(())
    }
}
