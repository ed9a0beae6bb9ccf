//! Metadata resolver and cache
//!
//! Entries are keyed by (asset id, issuance UTXO) and live for the lifetime
//! of the resolver. Concurrent resolutions of one key share a single fetch:
//! the first caller leads and publishes its result on a watch channel that
//! later callers wait on. A leader that is dropped mid-fetch closes the
//! channel and its followers start over.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bitcoin::OutPoint;
use tokio::sync::watch;

use super::{AssetMetadata, IssuanceMetadata, MetadataError, MetadataSource};
use crate::chain::ChainSource;
use crate::coloring::{ledger, AssetId, MetadataRef, Payload};

type CacheKey = (AssetId, OutPoint);
type FetchResult = Result<AssetMetadata, MetadataError>;
type InFlight = watch::Receiver<Option<FetchResult>>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, AssetMetadata>,
    in_flight: HashMap<CacheKey, InFlight>,
}

enum Role {
    Hit(AssetMetadata),
    Follow(InFlight),
    Lead(watch::Sender<Option<FetchResult>>),
}

/// Read-through metadata cache with optional verification
pub struct MetadataResolver {
    source: Arc<dyn MetadataSource>,
    chain: Arc<dyn ChainSource>,
    state: Mutex<CacheState>,
}

/// Clears the in-flight marker if the leading fetch never completes
struct LeaderGuard<'a> {
    resolver: &'a MetadataResolver,
    key: CacheKey,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.resolver.state().in_flight.remove(&self.key);
        }
    }
}

impl MetadataResolver {
    pub fn new(source: Arc<dyn MetadataSource>, chain: Arc<dyn ChainSource>) -> Self {
        Self {
            source,
            chain,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached entry for a key, if any
    pub fn cached(&self, asset_id: &AssetId, utxo: &OutPoint) -> Option<AssetMetadata> {
        self.state()
            .entries
            .get(&(asset_id.clone(), *utxo))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve metadata for an asset's issuance UTXO
    ///
    /// With `refresh` the cache is bypassed and repopulated; a fetch already
    /// in flight for the key is joined rather than duplicated. With `verify`
    /// the metadata must match the issuance transaction, and a cached entry
    /// that was never verified is verified in place without refetching.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let metadata = resolver.resolve(&asset_id, &utxo, true, false).await?;
    /// println!("{} by {}", metadata.asset_name, metadata.issuer);
    /// ```
    pub async fn resolve(
        &self,
        asset_id: &AssetId,
        utxo: &OutPoint,
        verify: bool,
        refresh: bool,
    ) -> FetchResult {
        let key: CacheKey = (asset_id.clone(), *utxo);

        loop {
            let role = {
                let mut state = self.state();
                match state.entries.get(&key) {
                    Some(entry) if !refresh => Role::Hit(entry.clone()),
                    _ => match state.in_flight.get(&key) {
                        Some(rx) => Role::Follow(rx.clone()),
                        None => {
                            let (tx, rx) = watch::channel(None);
                            state.in_flight.insert(key.clone(), rx);
                            Role::Lead(tx)
                        }
                    },
                }
            };

            match role {
                Role::Hit(entry) => {
                    if !verify || entry.verified {
                        log::debug!("Metadata cache hit for {} at {}", asset_id, utxo);
                        return Ok(entry);
                    }
                    return self.verify_cached(&key, entry).await;
                }
                Role::Follow(mut rx) => {
                    let outcome = match rx.wait_for(|value| value.is_some()).await {
                        Ok(value) => value.clone(),
                        // Leader dropped before finishing
                        Err(_) => None,
                    };
                    match outcome {
                        Some(Ok(entry)) if verify && !entry.verified => {
                            return self.verify_cached(&key, entry).await
                        }
                        Some(result) => return result,
                        None => continue,
                    }
                }
                Role::Lead(tx) => {
                    let mut guard = LeaderGuard {
                        resolver: self,
                        key: key.clone(),
                        armed: true,
                    };
                    let result = self.fetch(asset_id, utxo, verify).await;
                    {
                        let mut state = self.state();
                        if let Ok(entry) = &result {
                            state.entries.insert(key.clone(), entry.clone());
                        }
                        state.in_flight.remove(&key);
                        guard.armed = false;
                    }
                    tx.send_replace(Some(result.clone()));
                    return result;
                }
            }
        }
    }

    async fn fetch(&self, asset_id: &AssetId, utxo: &OutPoint, verify: bool) -> FetchResult {
        log::debug!("Fetching metadata for {} at {}", asset_id, utxo);
        let metadata = self.source.fetch(asset_id, utxo).await?;
        if verify {
            self.check_against_chain(asset_id, utxo, &metadata).await?;
        }
        Ok(AssetMetadata::from_issuance(
            asset_id.clone(),
            utxo,
            metadata,
            verify,
        ))
    }

    async fn verify_cached(&self, key: &CacheKey, entry: AssetMetadata) -> FetchResult {
        let (asset_id, utxo) = key;
        match self
            .check_against_chain(asset_id, utxo, &entry.to_issuance())
            .await
        {
            Ok(()) => {
                let verified = AssetMetadata {
                    verified: true,
                    ..entry
                };
                self.state().entries.insert(key.clone(), verified.clone());
                Ok(verified)
            }
            Err(e) => {
                self.state().entries.remove(key);
                Err(e)
            }
        }
    }

    /// Check the metadata against the issuance transaction's payload and
    /// the asset id against the issuance UTXO
    async fn check_against_chain(
        &self,
        asset_id: &AssetId,
        utxo: &OutPoint,
        metadata: &IssuanceMetadata,
    ) -> Result<(), MetadataError> {
        let tx = self
            .chain
            .get_transaction(&utxo.txid)
            .await
            .map_err(|e| MetadataError::Chain(e.to_string()))?;

        let (payload_index, payload) = match Payload::find_in(&tx) {
            Some(Ok(found)) => found,
            Some(Err(e)) => {
                return Err(MetadataError::Integrity(format!(
                    "issuance payload unreadable: {}",
                    e
                )))
            }
            None => {
                return Err(MetadataError::Integrity(format!(
                    "{} carries no colored payload",
                    utxo.txid
                )))
            }
        };

        let Payload::Issuance {
            divisibility,
            reissueable,
            metadata: reference,
            instructions,
            ..
        } = &payload
        else {
            return Err(MetadataError::Integrity(format!(
                "{} is not an issuance",
                utxo.txid
            )));
        };

        let genesis = ledger::issuance_output(&tx, payload_index, instructions);
        if genesis != Some(utxo.vout as usize) {
            return Err(MetadataError::Integrity(format!(
                "{} is not the issuance output",
                utxo
            )));
        }
        let derived = AssetId::derive(&utxo.txid, utxo.vout, *divisibility, *reissueable);
        if &derived != asset_id {
            return Err(MetadataError::Integrity(format!(
                "asset id {} does not derive from {}",
                asset_id, utxo
            )));
        }

        let bytes = metadata.canonical_bytes()?;
        let matches = match reference {
            MetadataRef::Commitment(hash) => {
                use sha2::{Digest, Sha256};
                Sha256::digest(&bytes).as_slice() == hash.as_slice()
            }
            MetadataRef::Inline(inline) => inline == &bytes,
            MetadataRef::None => {
                return Err(MetadataError::Integrity(
                    "issuance commits to no metadata".to_string(),
                ))
            }
        };
        if !matches {
            return Err(MetadataError::Integrity(format!(
                "metadata does not match the commitment in {}",
                utxo.txid
            )));
        }

        log::debug!("Verified metadata for {}", asset_id);
        Ok(())
    }
}
