//! Mnemonic-backed HD wallet

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{bip32::Xpriv, Address, CompressedPublicKey, Network, ScriptBuf, Witness};

use super::keys::{self, KeyError};
use super::{HdWallet, SignedTx, SigningError, WalletError};
use crate::engine::UnsignedSkeleton;

struct DerivedKey {
    address: Address,
    secret_key: SecretKey,
    public_key: CompressedPublicKey,
}

#[derive(Default)]
struct Revealed {
    keys: Vec<DerivedKey>,
    by_script: HashMap<ScriptBuf, usize>,
}

/// BIP39/BIP84 wallet producing P2WPKH addresses
pub struct MnemonicWallet {
    seed: [u8; 64],
    account: Xpriv,
    network: Network,
    secp: Secp256k1<All>,
    revealed: Mutex<Revealed>,
}

impl MnemonicWallet {
    /// Open a wallet and reveal the first `lookahead` receiving addresses
    ///
    /// # Arguments
    ///
    /// * `mnemonic` - BIP39 mnemonic phrase
    /// * `network` - Target network
    /// * `lookahead` - Number of addresses revealed up front
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mnemonic = keys::generate_mnemonic()?;
    /// let wallet = MnemonicWallet::new(&mnemonic, Network::Regtest, 5)?;
    /// ```
    pub fn new(
        mnemonic: &bip39::Mnemonic,
        network: Network,
        lookahead: u32,
    ) -> Result<Self, WalletError> {
        let seed = mnemonic.to_seed("");
        let secp = Secp256k1::new();
        let account = keys::derive_account_key(&seed, network, &secp)?;

        let wallet = Self {
            seed,
            account,
            network,
            secp,
            revealed: Mutex::new(Revealed::default()),
        };
        for _ in 0..lookahead {
            wallet.reveal_next()?;
        }

        log::debug!(
            "Opened wallet on {} with {} receiving addresses",
            network,
            lookahead
        );
        Ok(wallet)
    }

    /// Open a wallet from a phrase
    pub fn from_phrase(phrase: &str, network: Network, lookahead: u32) -> Result<Self, WalletError> {
        let mnemonic = keys::parse_mnemonic(phrase)?;
        Self::new(&mnemonic, network, lookahead)
    }

    fn revealed(&self) -> Result<MutexGuard<'_, Revealed>, WalletError> {
        self.revealed.lock().map_err(|_| WalletError::StateUnavailable)
    }

    fn derive(&self, index: u32) -> Result<DerivedKey, KeyError> {
        let xpriv = keys::derive_receiving_key(&self.account, index, &self.secp)?;
        let secret_key = xpriv.private_key;
        let public_key = CompressedPublicKey(secret_key.public_key(&self.secp));
        Ok(DerivedKey {
            address: Address::p2wpkh(&public_key, self.network),
            secret_key,
            public_key,
        })
    }

    fn reveal_next(&self) -> Result<Address, WalletError> {
        let mut revealed = self.revealed()?;
        let index = revealed.keys.len() as u32;
        let key = self.derive(index)?;
        let address = key.address.clone();

        revealed.by_script.insert(address.script_pubkey(), index as usize);
        revealed.keys.push(key);
        Ok(address)
    }
}

impl HdWallet for MnemonicWallet {
    fn derive_private_seed(&self) -> Vec<u8> {
        self.seed.to_vec()
    }

    fn next_receiving_address(&self) -> Result<Address, WalletError> {
        let address = self.reveal_next()?;
        log::debug!("Revealed receiving address {}", address);
        Ok(address)
    }

    fn addresses(&self) -> Vec<Address> {
        match self.revealed() {
            Ok(revealed) => revealed.keys.iter().map(|k| k.address.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn network(&self) -> Network {
        self.network
    }

    fn sign(&self, skeleton: &UnsignedSkeleton) -> Result<SignedTx, SigningError> {
        let mut tx = skeleton.tx.clone();
        if tx.input.len() != skeleton.prevouts.len() {
            return Err(SigningError::PrevoutMismatch {
                inputs: tx.input.len(),
                prevouts: skeleton.prevouts.len(),
            });
        }

        let revealed = self
            .revealed
            .lock()
            .map_err(|_| SigningError::Key("wallet state unavailable".to_string()))?;

        let witnesses = {
            let mut cache = SighashCache::new(&tx);
            let mut witnesses = Vec::with_capacity(skeleton.prevouts.len());

            for (index, prevout) in skeleton.prevouts.iter().enumerate() {
                let key = revealed
                    .by_script
                    .get(&prevout.script_pubkey)
                    .and_then(|i| revealed.keys.get(*i))
                    .ok_or(SigningError::ForeignInput(index))?;

                let sighash = cache
                    .p2wpkh_signature_hash(
                        index,
                        &prevout.script_pubkey,
                        prevout.value,
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| SigningError::Sighash {
                        index,
                        reason: e.to_string(),
                    })?;

                let message = Message::from_digest(sighash.to_byte_array());
                let signature = bitcoin::ecdsa::Signature {
                    signature: self.secp.sign_ecdsa(&message, &key.secret_key),
                    sighash_type: EcdsaSighashType::All,
                };
                witnesses.push(Witness::p2wpkh(&signature, &key.public_key.0));
            }
            witnesses
        };

        for (input, witness) in tx.input.iter_mut().zip(witnesses) {
            input.witness = witness;
        }

        let txid = tx.compute_txid();
        log::debug!("Signed {} inputs of {}", tx.input.len(), txid);
        Ok(SignedTx {
            tx_hex: serialize_hex(&tx),
            txid,
            tx,
        })
    }
}
