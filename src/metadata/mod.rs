//! Asset metadata
//!
//! Issuance metadata is bound to its issuance transaction either inline or
//! through a sha256 commitment in the payload, and stored out of band in a
//! [`MetadataSource`]. [`MetadataResolver`] reads it through a per-session
//! cache and can verify it against the chain.

pub mod cache;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use bitcoin::OutPoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::coloring::AssetId;

pub use cache::MetadataResolver;
pub use http::HttpMetadataSource;
pub use memory::MemoryMetadataSource;

/// Name of the `urls` entry that holds the asset icon
pub const ICON_URL_NAME: &str = "icon";

#[derive(Debug, Clone, thiserror::Error)]
pub enum MetadataError {
    #[error("No metadata for {asset_id} at {utxo}")]
    NotFound { asset_id: String, utxo: String },

    #[error("Metadata source error: {0}")]
    Source(String),

    #[error("Metadata integrity check failed: {0}")]
    Integrity(String),

    #[error("Chain error while verifying metadata: {0}")]
    Chain(String),

    #[error("Metadata serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUrl {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub mime_type: String,
}

/// Metadata supplied at issuance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceMetadata {
    pub asset_name: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub urls: Vec<MetadataUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
}

impl IssuanceMetadata {
    /// Deterministic byte encoding committed to by the issuance payload
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, MetadataError> {
        serde_json::to_vec(self).map_err(|e| MetadataError::Serialization(e.to_string()))
    }

    /// sha256 of [`Self::canonical_bytes`]
    pub fn commitment(&self) -> Result<[u8; 32], MetadataError> {
        Ok(Sha256::digest(self.canonical_bytes()?).into())
    }

    pub fn icon(&self) -> Option<&str> {
        self.urls
            .iter()
            .find(|u| u.name == ICON_URL_NAME)
            .map(|u| u.url.as_str())
    }
}

/// Resolved metadata for one (asset, issuance UTXO) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    pub asset_id: AssetId,
    pub issuance_utxo: String,
    pub asset_name: String,
    pub issuer: String,
    pub description: String,
    pub icon: Option<String>,
    pub urls: Vec<MetadataUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
    /// Checked against the issuance transaction
    pub verified: bool,
    pub fetched_at: DateTime<Utc>,
}

impl AssetMetadata {
    pub fn from_issuance(
        asset_id: AssetId,
        utxo: &OutPoint,
        metadata: IssuanceMetadata,
        verified: bool,
    ) -> Self {
        Self {
            asset_id,
            issuance_utxo: utxo.to_string(),
            icon: metadata.icon().map(str::to_string),
            asset_name: metadata.asset_name,
            issuer: metadata.issuer,
            description: metadata.description,
            urls: metadata.urls,
            user_data: metadata.user_data,
            verified,
            fetched_at: Utc::now(),
        }
    }

    /// The issuance metadata this entry was built from
    pub fn to_issuance(&self) -> IssuanceMetadata {
        IssuanceMetadata {
            asset_name: self.asset_name.clone(),
            issuer: self.issuer.clone(),
            description: self.description.clone(),
            urls: self.urls.clone(),
            user_data: self.user_data.clone(),
        }
    }
}

/// Out-of-band metadata store
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(
        &self,
        asset_id: &AssetId,
        utxo: &OutPoint,
    ) -> Result<IssuanceMetadata, MetadataError>;

    async fn publish(
        &self,
        asset_id: &AssetId,
        utxo: &OutPoint,
        metadata: &IssuanceMetadata,
    ) -> Result<(), MetadataError>;
}
