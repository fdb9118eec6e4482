//! Core types for JSON (de)serialization of escrow parameters and metadata.

use std::fs::File;
use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::identity::Address;
use crate::instruction::EscrowKeys;
use crate::pda::EscrowAddresses;
use crate::state::{EscrowRecord, EscrowState};
use crate::{EscrowError, Result};

/// Reads a JSON-encoded file from the given `path` and deserializes into type `T`.
///
/// # Errors
///
/// Returns an `anyhow::Error` if the file cannot be opened, read, or parsed.
///
/// # Examples
///
/// ```ignore
/// # use nft_escrow_core::interface::{load_escrow_data, EscrowParams};
///
/// let params: EscrowParams = load_escrow_data("./escrow_params.json").unwrap();
/// ```
pub fn load_escrow_data<P, T>(path: P) -> anyhow::Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("loading escrow data: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parsing JSON from {:?}", path))
}

/// Writes `data` (serializable) as pretty-printed JSON to the given `path`.
///
/// # Errors
///
/// Returns an `anyhow::Error` if the file cannot be created or data cannot be serialized.
pub fn save_escrow_data<P, T>(path: P, data: &T) -> anyhow::Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating file {:?}", path))?;
    serde_json::to_writer_pretty(file, data)
        .with_context(|| format!("serializing to JSON to {:?}", path))
}

/// Parameters required to **create** an escrow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowParams {
    /// Escrow program ID (base58).
    pub program_id: Address,

    /// Who locks the NFT.
    pub maker: Address,

    /// Who pays for it and receives it.
    pub taker: Address,

    /// Mint of the escrowed NFT.
    pub nft_mint: Address,

    /// Mint of the fungible token accepted as payment.
    pub token_mint: Address,

    /// Base units of `token_mint` the maker asks for.
    pub requested_amount: u64,
}

impl EscrowParams {
    /// Checks the terms and derives every escrow address.
    ///
    /// # Errors
    ///
    /// [`EscrowError::InvalidAmount`] for a zero amount,
    /// [`EscrowError::WrongAssetKind`] if both mints are the same.
    pub fn keys(&self) -> Result<EscrowKeys> {
        if self.requested_amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        if self.nft_mint == self.token_mint {
            return Err(EscrowError::WrongAssetKind);
        }
        EscrowKeys::new(
            self.program_id,
            self.maker,
            self.taker,
            self.nft_mint,
            self.token_mint,
        )
    }
}

/// Snapshot of an escrow record, as handed back to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowMetadata {
    pub program_id: Address,

    /// Address of the escrow record.
    pub escrow: Address,
    pub bump: u8,

    pub maker: Address,
    pub taker: Address,
    pub nft_mint: Address,
    pub token_mint: Address,
    pub requested_amount: u64,

    pub vault_nft: Address,
    pub vault_nft_bump: u8,
    pub vault_token: Address,
    pub vault_token_bump: u8,
    pub authority: Address,
    pub authority_bump: u8,

    /// Where in the lifecycle the escrow currently is.
    pub state: EscrowState,
}

impl EscrowMetadata {
    pub fn new(program_id: Address, escrow: Address, record: &EscrowRecord) -> Self {
        Self {
            program_id,
            escrow,
            bump: record.bump,
            maker: record.maker,
            taker: record.taker,
            nft_mint: record.nft_mint,
            token_mint: record.token_mint,
            requested_amount: record.requested_amount,
            vault_nft: record.vault_nft,
            vault_nft_bump: record.vault_nft_bump,
            vault_token: record.vault_token,
            vault_token_bump: record.vault_token_bump,
            authority: record.authority,
            authority_bump: record.authority_bump,
            state: record.state,
        }
    }

    pub fn addresses(&self) -> EscrowAddresses {
        EscrowAddresses {
            escrow: self.escrow,
            bump: self.bump,
            vault_nft: self.vault_nft,
            vault_nft_bump: self.vault_nft_bump,
            vault_token: self.vault_token,
            vault_token_bump: self.vault_token_bump,
            authority: self.authority,
            authority_bump: self.authority_bump,
        }
    }

    /// Re-derive the stored addresses, so a tampered metadata file is
    /// caught before it is used to build instructions.
    pub fn verify(&self) -> Result<()> {
        let record = EscrowRecord {
            maker: self.maker,
            taker: self.taker,
            nft_mint: self.nft_mint,
            token_mint: self.token_mint,
            requested_amount: self.requested_amount,
            state: self.state,
            vault_nft: self.vault_nft,
            vault_token: self.vault_token,
            authority: self.authority,
            bump: self.bump,
            vault_nft_bump: self.vault_nft_bump,
            vault_token_bump: self.vault_token_bump,
            authority_bump: self.authority_bump,
        };
        self.addresses().verify(&self.program_id, &record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;
    use crate::ID;

    fn params() -> EscrowParams {
        EscrowParams {
            program_id: ID,
            maker: Keypair::from_label("alice").address(),
            taker: Keypair::from_label("bob").address(),
            nft_mint: Keypair::from_label("nft-mint").address(),
            token_mint: Keypair::from_label("token-mint").address(),
            requested_amount: 1_000_000_000,
        }
    }

    #[test]
    fn params_json_uses_base58() {
        let p = params();
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["maker"], p.maker.to_string());
        assert_eq!(json["requested_amount"], 1_000_000_000u64);

        let back: EscrowParams = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn params_validation() {
        let mut p = params();
        assert!(p.keys().is_ok());

        p.requested_amount = 0;
        assert_eq!(p.keys(), Err(EscrowError::InvalidAmount));

        p.requested_amount = 1;
        p.token_mint = p.nft_mint;
        assert_eq!(p.keys(), Err(EscrowError::WrongAssetKind));
    }

    #[test]
    fn metadata_detects_tampering() {
        let p = params();
        let keys = p.keys().unwrap();
        let record = EscrowRecord::new(
            p.maker,
            p.taker,
            p.nft_mint,
            p.token_mint,
            p.requested_amount,
            &keys.addresses,
        );
        let mut meta = EscrowMetadata::new(ID, *keys.escrow(), &record);
        assert!(meta.verify().is_ok());
        assert_eq!(meta.addresses(), keys.addresses);

        meta.vault_token = meta.vault_nft;
        assert_eq!(
            meta.verify(),
            Err(EscrowError::AddressMismatch(meta.vault_nft))
        );
    }

    #[test]
    fn bad_address_in_json_is_rejected() {
        let json = r#"{"program_id":"0xdead","maker":"","taker":"","nft_mint":"","token_mint":"","requested_amount":1}"#;
        assert!(serde_json::from_str::<EscrowParams>(json).is_err());
    }
}
