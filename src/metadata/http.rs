//! Metadata server client
//!
//! `GET {base}/metadata/{assetId}/{txid}:{vout}` returns the issuance
//! metadata as JSON; `POST {base}/metadata` stores it.

use async_trait::async_trait;
use bitcoin::OutPoint;
use serde::Serialize;

use super::{IssuanceMetadata, MetadataError, MetadataSource};
use crate::coloring::AssetId;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishBody<'a> {
    asset_id: &'a AssetId,
    utxo: String,
    metadata: &'a IssuanceMetadata,
}

#[derive(Debug, Clone)]
pub struct HttpMetadataSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetadataSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

fn source_error(e: reqwest::Error) -> MetadataError {
    MetadataError::Source(e.to_string())
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(
        &self,
        asset_id: &AssetId,
        utxo: &OutPoint,
    ) -> Result<IssuanceMetadata, MetadataError> {
        let url = format!("{}/metadata/{}/{}", self.base_url, asset_id, utxo);
        log::debug!("Fetching metadata from {}", url);

        let response = self.client.get(&url).send().await.map_err(source_error)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MetadataError::NotFound {
                asset_id: asset_id.to_string(),
                utxo: utxo.to_string(),
            });
        }

        response
            .error_for_status()
            .map_err(source_error)?
            .json::<IssuanceMetadata>()
            .await
            .map_err(source_error)
    }

    async fn publish(
        &self,
        asset_id: &AssetId,
        utxo: &OutPoint,
        metadata: &IssuanceMetadata,
    ) -> Result<(), MetadataError> {
        let body = PublishBody {
            asset_id,
            utxo: utxo.to_string(),
            metadata,
        };
        self.client
            .post(format!("{}/metadata", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(source_error)?
            .error_for_status()
            .map_err(source_error)?;
        Ok(())
    }
}
