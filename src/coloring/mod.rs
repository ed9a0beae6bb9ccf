//! Colored-coins protocol
//!
//! Asset identifiers, the `OP_RETURN` payload codec, the color transfer rules
//! and an ancestry-walking color index.

pub mod asset_id;
pub mod index;
pub mod ledger;
pub mod payload;

use serde::{Deserialize, Serialize};

pub use asset_id::{AssetId, AssetIdError, LockStatus, MAX_DIVISIBILITY};
pub use index::{ColorIndex, RawTransactionSource};
pub use ledger::{apply_payload, color_runs, transfer_colors, LedgerError, OutputColors};
pub use payload::{Instruction, MetadataRef, Payload, PayloadError, MAX_PAYLOAD_SIZE};

/// One asset entry carried by a UTXO
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAmount {
    pub asset_id: AssetId,
    /// Amount in indivisible units
    pub amount: u64,
    pub divisibility: u8,
    pub lock_status: LockStatus,
}
