//! Signing and broadcast
//!
//! Signing failures surface unchanged. Broadcast is retried exactly once when
//! the chain source reports a transient failure.

use std::sync::Arc;

use super::builder::UnsignedSkeleton;
use crate::chain::{BroadcastError, ChainSource};
use crate::wallet::{HdWallet, SignedTx, SigningError};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

pub struct Gateway {
    wallet: Arc<dyn HdWallet>,
    chain: Arc<dyn ChainSource>,
}

impl Gateway {
    pub fn new(wallet: Arc<dyn HdWallet>, chain: Arc<dyn ChainSource>) -> Self {
        Self { wallet, chain }
    }

    pub fn sign(&self, skeleton: &UnsignedSkeleton) -> Result<SignedTx, GatewayError> {
        Ok(self.wallet.sign(skeleton)?)
    }

    pub async fn broadcast(&self, signed: &SignedTx) -> Result<(), GatewayError> {
        match self.chain.broadcast(&signed.tx).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => {
                log::warn!("Broadcast of {} failed ({}), retrying once", signed.txid, e);
                self.chain.broadcast(&signed.tx).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sign `skeleton` and submit it to the network
    pub async fn sign_and_broadcast(
        &self,
        skeleton: &UnsignedSkeleton,
    ) -> Result<SignedTx, GatewayError> {
        let signed = self.sign(skeleton)?;
        self.broadcast(&signed).await?;
        log::info!("Broadcast {}", signed.txid);
        Ok(signed)
    }
}
