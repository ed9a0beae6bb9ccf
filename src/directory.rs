//! Phone-number directory
//!
//! Maps phone numbers to receiving addresses for phone-addressed transfers.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("Phone number {0} is not registered")]
    NotFound(String),

    #[error("Directory request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait PhoneDirectory: Send + Sync {
    /// Address registered for `phone`
    async fn resolve(&self, phone: &str) -> Result<String, DirectoryError>;
}

/// Directory backed by an in-memory map
#[derive(Debug, Default)]
pub struct MemoryPhoneDirectory {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryPhoneDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, phone: &str, address: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(phone.to_string(), address.to_string());
        }
    }
}

#[async_trait]
impl PhoneDirectory for MemoryPhoneDirectory {
    async fn resolve(&self, phone: &str) -> Result<String, DirectoryError> {
        self.entries
            .read()
            .map_err(|_| DirectoryError::Request("directory unavailable".to_string()))?
            .get(phone)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(phone.to_string()))
    }
}

#[derive(Deserialize)]
struct AddressResponse {
    address: String,
}

/// Directory served over HTTP
///
/// `GET {base}/addresses?phoneNumber=...` answers `{"address": "..."}`;
/// 404 means the number is not registered.
#[derive(Debug, Clone)]
pub struct HttpPhoneDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPhoneDirectory {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PhoneDirectory for HttpPhoneDirectory {
    async fn resolve(&self, phone: &str) -> Result<String, DirectoryError> {
        let response = self
            .client
            .get(format!("{}/addresses", self.base_url))
            .query(&[("phoneNumber", phone)])
            .send()
            .await
            .map_err(|e| DirectoryError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DirectoryError::NotFound(phone.to_string()));
        }
        let body: AddressResponse = response
            .error_for_status()
            .map_err(|e| DirectoryError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| DirectoryError::Request(e.to_string()))?;

        Ok(body.address)
    }
}
