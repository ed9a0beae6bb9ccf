//! Colored Asset Wallet
//!
//! Client-side engine for a colored-coins asset layer on Bitcoin: asset
//! issuance and transfers, cached and verifiable asset metadata, and
//! transaction notifications scoped to the wallet's addresses.

pub mod chain;
pub mod cli;
pub mod coloring;
pub mod config;
pub mod directory;
pub mod engine;
pub mod events;
pub mod manager;
pub mod metadata;
pub mod types;
pub mod wallet;
