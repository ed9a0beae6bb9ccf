//! Asset engine integration tests
//!
//! Issuance, transfers, signing and broadcast, metadata resolution and
//! event notifications through the caller-facing client.

pub mod color_index_test;
pub mod gateway_test;
pub mod issuance_test;
pub mod metadata_test;
pub mod notifier_test;
