//! Persistent escrow record and its lifecycle.

use bincode::{Decode, Encode};
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

use crate::account::{self, Account};
use crate::identity::Address;
use crate::pda::EscrowAddresses;
use crate::runtime::AccountStore;
use crate::{EscrowError, Result};

/// Lifecycle of an escrow.
///
/// ```text
/// AwaitingFunding --deposit--> Funded --confirm--> Completed
///        \                        \
///         `------cancel------------`--cancel--> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub enum EscrowState {
    /// NFT locked; waiting for the taker's payment.
    AwaitingFunding,
    /// Both assets locked; the maker may confirm or cancel.
    Funded,
    /// Assets swapped; vaults closed.
    Completed,
    /// Deposits refunded; vaults closed.
    Cancelled,
}

impl EscrowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Gate an operation on the current state.
    ///
    /// # Errors
    ///
    /// [`EscrowError::AlreadyFinalized`] for terminal states, otherwise
    /// [`EscrowError::InvalidState`] if `self` is not `expected`.
    pub fn ensure(&self, expected: EscrowState) -> Result<()> {
        if self.is_terminal() {
            return Err(EscrowError::AlreadyFinalized);
        }
        if *self != expected {
            return Err(EscrowError::InvalidState);
        }
        Ok(())
    }
}

/// Terms and custody addresses of one agreement, stored at the escrow
/// address and owned by the escrow program.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct EscrowRecord {
    pub maker: Address,
    pub taker: Address,
    pub nft_mint: Address,
    pub token_mint: Address,
    pub requested_amount: u64,
    pub state: EscrowState,
    pub vault_nft: Address,
    pub vault_token: Address,
    pub authority: Address,
    pub bump: u8,
    pub vault_nft_bump: u8,
    pub vault_token_bump: u8,
    pub authority_bump: u8,
}

impl EscrowRecord {
    /// First 8 bytes of `SHA-256("account:EscrowRecord")`.
    pub const DISCRIMINATOR: [u8; 8] = [174, 124, 167, 70, 91, 85, 212, 227];

    /// Size of the account data: discriminator plus the fixed-width record.
    pub const LEN: usize = 8 + 4 * 32 + 8 + 4 + 3 * 32 + 4;

    pub fn new(
        maker: Address,
        taker: Address,
        nft_mint: Address,
        token_mint: Address,
        requested_amount: u64,
        addresses: &EscrowAddresses,
    ) -> Self {
        Self {
            maker,
            taker,
            nft_mint,
            token_mint,
            requested_amount,
            state: EscrowState::AwaitingFunding,
            vault_nft: addresses.vault_nft,
            vault_token: addresses.vault_token,
            authority: addresses.authority,
            bump: addresses.bump,
            vault_nft_bump: addresses.vault_nft_bump,
            vault_token_bump: addresses.vault_token_bump,
            authority_bump: addresses.authority_bump,
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(Self::LEN);
        data.extend_from_slice(&Self::DISCRIMINATOR);
        data.extend(account::encode(self)?);
        Ok(data)
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        match data.split_first_chunk::<8>() {
            Some((disc, body)) if *disc == Self::DISCRIMINATOR => account::decode(body),
            _ => Err(EscrowError::InvalidAccountData),
        }
    }
}

/// Read the record stored at `address`.
///
/// # Errors
///
/// - [`EscrowError::AccountNotFound`] if nothing lives there.
/// - [`EscrowError::IllegalOwner`] if the account is not owned by
///   `program_id`.
/// - [`EscrowError::InvalidAccountData`] if the data is not a record.
pub fn load_escrow(
    store: &dyn AccountStore,
    address: &Address,
    program_id: &Address,
) -> Result<EscrowRecord> {
    let account = store
        .get(address)
        .ok_or(EscrowError::AccountNotFound(*address))?;
    if account.owner != *program_id {
        return Err(EscrowError::IllegalOwner(*address));
    }
    EscrowRecord::unpack(&account.data)
}

/// Overwrite the data of an existing record account.
pub fn store_escrow(
    store: &mut dyn AccountStore,
    address: &Address,
    record: &EscrowRecord,
) -> Result<()> {
    let mut account: Account = store
        .get(address)
        .cloned()
        .ok_or(EscrowError::AccountNotFound(*address))?;
    account.data = record.pack()?;
    store.put(*address, account);
    Ok(())
}

#[cfg(test)]
mod tests {
    use sha2::{Digest as _, Sha256};

    use super::*;
    use crate::identity::Keypair;
    use crate::runtime::Ledger;
    use crate::ID;

    fn record() -> EscrowRecord {
        let maker = Keypair::from_label("alice").address();
        let taker = Keypair::from_label("bob").address();
        let nft = Keypair::from_label("nft-mint").address();
        let token = Keypair::from_label("token-mint").address();
        let addrs = EscrowAddresses::find(&ID, &maker, &taker, &nft, &token).unwrap();
        EscrowRecord::new(maker, taker, nft, token, 50, &addrs)
    }

    #[test]
    fn discriminator_is_hash_prefix() {
        let digest = Sha256::digest(b"account:EscrowRecord");
        assert_eq!(EscrowRecord::DISCRIMINATOR, digest[..8]);
    }

    #[test]
    fn packed_record_has_fixed_len() {
        let mut rec = record();
        assert_eq!(rec.pack().unwrap().len(), EscrowRecord::LEN);
        rec.state = EscrowState::Cancelled;
        assert_eq!(rec.pack().unwrap().len(), EscrowRecord::LEN);
        assert_eq!(EscrowRecord::unpack(&rec.pack().unwrap()).unwrap(), rec);
    }

    #[test]
    fn unpack_rejects_foreign_data() {
        let mut data = record().pack().unwrap();
        data[0] ^= 1;
        assert_eq!(
            EscrowRecord::unpack(&data),
            Err(EscrowError::InvalidAccountData)
        );
        assert_eq!(
            EscrowRecord::unpack(&[1, 2, 3]),
            Err(EscrowError::InvalidAccountData)
        );
    }

    #[test]
    fn state_gate() {
        use EscrowState::*;

        assert!(AwaitingFunding.ensure(AwaitingFunding).is_ok());
        assert_eq!(Funded.ensure(AwaitingFunding), Err(EscrowError::InvalidState));
        assert_eq!(AwaitingFunding.ensure(Funded), Err(EscrowError::InvalidState));
        for terminal in [Completed, Cancelled] {
            assert!(terminal.is_terminal());
            assert_eq!(
                terminal.ensure(AwaitingFunding),
                Err(EscrowError::AlreadyFinalized)
            );
            assert_eq!(terminal.ensure(Funded), Err(EscrowError::AlreadyFinalized));
        }
    }

    #[test]
    fn load_checks_owner() {
        let rec = record();
        let at = Address([9u8; 32]);
        let mut ledger = Ledger::new();
        assert_eq!(
            load_escrow(&ledger, &at, &ID),
            Err(EscrowError::AccountNotFound(at))
        );

        ledger.put(at, Account::new(1, Address([3u8; 32]), rec.pack().unwrap()));
        assert_eq!(
            load_escrow(&ledger, &at, &ID),
            Err(EscrowError::IllegalOwner(at))
        );

        ledger.put(at, Account::new(1, ID, rec.pack().unwrap()));
        assert_eq!(load_escrow(&ledger, &at, &ID).unwrap(), rec);
    }
}
