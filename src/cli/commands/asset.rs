//! Asset CLI commands
//!
//! Issuance, transfers and the read-only listings. Requests come either from
//! a JSON file in the caller-facing request shape or from flags.

use super::{open_client, print_json, CommandError};
use crate::config::ConfigOverrides;
use crate::engine::{IssuanceRequest, TransferRequest, TransferTarget};
use crate::metadata::{IssuanceMetadata, MetadataUrl, ICON_URL_NAME};

/// Flag form of an issuance
#[derive(Debug, Clone, Default)]
pub struct IssueArgs {
    pub amount: Option<u64>,
    pub divisibility: u8,
    pub reissueable: bool,
    pub name: Option<String>,
    pub issuer: Option<String>,
    pub description: String,
    pub icon: Option<String>,
}

/// Flag form of a transfer
#[derive(Debug, Clone, Default)]
pub struct SendArgs {
    pub asset_id: Option<String>,
    pub amount: Option<u64>,
    pub to: Option<String>,
    pub phone: Option<String>,
    pub from: Vec<String>,
    pub utxo: Vec<String>,
}

fn read_request<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, CommandError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

impl IssueArgs {
    fn into_request(self) -> Result<IssuanceRequest, CommandError> {
        let amount = self
            .amount
            .ok_or_else(|| CommandError::Arguments("--amount is required".to_string()))?;

        let metadata = match (self.name, self.issuer) {
            (Some(asset_name), Some(issuer)) => Some(IssuanceMetadata {
                asset_name,
                issuer,
                description: self.description,
                urls: self
                    .icon
                    .map(|url| {
                        vec![MetadataUrl {
                            name: ICON_URL_NAME.to_string(),
                            url,
                            mime_type: "image/png".to_string(),
                        }]
                    })
                    .unwrap_or_default(),
                user_data: None,
            }),
            (None, None) => None,
            _ => {
                return Err(CommandError::Arguments(
                    "--name and --issuer must be given together".to_string(),
                ))
            }
        };

        Ok(IssuanceRequest {
            amount,
            divisibility: self.divisibility,
            reissueable: self.reissueable,
            transfer: Vec::new(),
            metadata,
        })
    }
}

impl SendArgs {
    fn into_request(self) -> Result<TransferRequest, CommandError> {
        let missing = |flag: &str| CommandError::Arguments(format!("{} is required", flag));
        let target = TransferTarget {
            address: self.to,
            phone_number: self.phone,
            asset_id: self.asset_id.ok_or_else(|| missing("--asset-id"))?,
            amount: self.amount.ok_or_else(|| missing("--amount"))?,
        };

        Ok(TransferRequest {
            from: (!self.from.is_empty()).then_some(self.from),
            sendutxo: (!self.utxo.is_empty()).then_some(self.utxo),
            to: vec![target],
        })
    }
}

/// Issue a new asset
pub async fn issue(
    overrides: &ConfigOverrides,
    mnemonic: Option<&str>,
    request_file: Option<&str>,
    args: IssueArgs,
) -> Result<(), CommandError> {
    let request = match request_file {
        Some(path) => read_request(path)?,
        None => args.into_request()?,
    };
    let (_, client) = open_client(overrides, mnemonic)?;

    let result = client.issue_asset(&request).await?;
    println!("✓ Asset issued");
    println!("  Asset ID:       {}", result.asset_id);
    println!("  Issuance UTXO:  {}", result.issuance_utxo);
    println!("  Transaction:    {}", result.transaction.txid);
    print_json(&result)
}

/// Send asset units
pub async fn send(
    overrides: &ConfigOverrides,
    mnemonic: Option<&str>,
    request_file: Option<&str>,
    args: SendArgs,
) -> Result<(), CommandError> {
    let request = match request_file {
        Some(path) => read_request(path)?,
        None => args.into_request()?,
    };
    let (_, client) = open_client(overrides, mnemonic)?;

    let result = client.send_asset(&request).await?;
    println!("✓ Transfer broadcast: {}", result.txid);
    print_json(&result)
}

pub async fn assets(overrides: &ConfigOverrides, mnemonic: Option<&str>) -> Result<(), CommandError> {
    let (_, client) = open_client(overrides, mnemonic)?;
    let holdings = client.get_assets().await?;
    if holdings.is_empty() {
        println!("No assets found");
        return Ok(());
    }
    print_json(&holdings)
}

pub async fn transactions(
    overrides: &ConfigOverrides,
    mnemonic: Option<&str>,
) -> Result<(), CommandError> {
    let (_, client) = open_client(overrides, mnemonic)?;
    print_json(&client.get_transactions().await?)
}

pub async fn issued_assets(
    overrides: &ConfigOverrides,
    mnemonic: Option<&str>,
) -> Result<(), CommandError> {
    let (_, client) = open_client(overrides, mnemonic)?;
    print_json(&client.get_issued_assets().await?)
}

/// Show an asset's metadata
pub async fn metadata(
    overrides: &ConfigOverrides,
    mnemonic: Option<&str>,
    asset_id: &str,
    utxo: &str,
    refresh: bool,
) -> Result<(), CommandError> {
    let (_, client) = open_client(overrides, mnemonic)?;
    let metadata = client.get_asset_metadata(asset_id, utxo, refresh).await?;
    print_json(&metadata)
}
