//! Wire format of the escrow operations and builders for the account lists
//! each of them expects.

use bincode::{Decode, Encode};

use crate::identity::Address;
use crate::pda::EscrowAddresses;
use crate::{EscrowError, Result};

/// One account referenced by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct AccountMeta {
    pub address: Address,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    /// A writable account.
    pub fn new(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: true,
        }
    }

    pub fn new_readonly(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: false,
        }
    }
}

/// A call into a program: its id, the accounts it touches and opaque data.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Instruction {
    pub program_id: Address,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// Operations understood by the escrow program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum EscrowInstruction {
    /// Lock the maker's NFT and open an escrow for `taker`.
    ///
    /// Accounts:
    /// 0. `[signer, writable]` maker
    /// 1. `[writable]` escrow record
    /// 2. `[writable]` NFT vault
    /// 3. `[writable]` token vault
    /// 4. `[]` vault authority
    /// 5. `[]` NFT mint
    /// 6. `[writable]` maker's NFT account
    /// 7. `[]` token mint
    CreateEscrow {
        taker: Address,
        requested_amount: u64,
    },

    /// Pay the requested amount into the token vault.
    ///
    /// Accounts:
    /// 0. `[signer]` taker
    /// 1. `[writable]` escrow record
    /// 2. `[writable]` token vault
    /// 3. `[writable]` taker's token account
    /// 4. `[]` token mint
    /// 5. `[]` vault authority
    DepositTakerToken,

    /// Swap both vaults to their counterparties and close them.
    ///
    /// Accounts:
    /// 0. `[signer, writable]` maker
    /// 1. `[writable]` escrow record
    /// 2. `[writable]` NFT vault
    /// 3. `[writable]` token vault
    /// 4. `[]` vault authority
    /// 5. `[writable]` taker's NFT account
    /// 6. `[writable]` maker's token account
    ConfirmDelivery,

    /// Refund every deposit and close the vaults.
    ///
    /// Accounts:
    /// 0. `[signer, writable]` maker
    /// 1. `[writable]` escrow record
    /// 2. `[writable]` NFT vault
    /// 3. `[writable]` token vault
    /// 4. `[]` vault authority
    /// 5. `[writable]` maker's NFT account
    /// 6. `[writable]` taker's token account, required whenever the token
    ///    vault holds anything
    CancelEscrow,
}

impl EscrowInstruction {
    pub fn pack(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|_| EscrowError::InvalidInstruction)
    }

    /// Decode instruction data; trailing bytes are rejected.
    pub fn unpack(data: &[u8]) -> Result<Self> {
        let (ix, read) = bincode::decode_from_slice(data, bincode::config::standard())
            .map_err(|_| EscrowError::InvalidInstruction)?;
        if read != data.len() {
            return Err(EscrowError::InvalidInstruction);
        }
        Ok(ix)
    }
}

/// Identities of one agreement and every address derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowKeys {
    pub program_id: Address,
    pub maker: Address,
    pub taker: Address,
    pub nft_mint: Address,
    pub token_mint: Address,
    pub addresses: EscrowAddresses,
}

impl EscrowKeys {
    pub fn new(
        program_id: Address,
        maker: Address,
        taker: Address,
        nft_mint: Address,
        token_mint: Address,
    ) -> Result<Self> {
        let addresses = EscrowAddresses::find(&program_id, &maker, &taker, &nft_mint, &token_mint)?;
        Ok(Self {
            program_id,
            maker,
            taker,
            nft_mint,
            token_mint,
            addresses,
        })
    }

    pub fn escrow(&self) -> &Address {
        &self.addresses.escrow
    }

    fn instruction(&self, ix: EscrowInstruction, accounts: Vec<AccountMeta>) -> Result<Instruction> {
        Ok(Instruction {
            program_id: self.program_id,
            accounts,
            data: ix.pack()?,
        })
    }
}

pub fn create_escrow(
    keys: &EscrowKeys,
    maker_nft_account: &Address,
    requested_amount: u64,
) -> Result<Instruction> {
    let a = &keys.addresses;
    keys.instruction(
        EscrowInstruction::CreateEscrow {
            taker: keys.taker,
            requested_amount,
        },
        vec![
            AccountMeta::new(keys.maker, true),
            AccountMeta::new(a.escrow, false),
            AccountMeta::new(a.vault_nft, false),
            AccountMeta::new(a.vault_token, false),
            AccountMeta::new_readonly(a.authority, false),
            AccountMeta::new_readonly(keys.nft_mint, false),
            AccountMeta::new(*maker_nft_account, false),
            AccountMeta::new_readonly(keys.token_mint, false),
        ],
    )
}

pub fn deposit_taker_token(keys: &EscrowKeys, taker_token_account: &Address) -> Result<Instruction> {
    let a = &keys.addresses;
    keys.instruction(
        EscrowInstruction::DepositTakerToken,
        vec![
            AccountMeta::new_readonly(keys.taker, true),
            AccountMeta::new(a.escrow, false),
            AccountMeta::new(a.vault_token, false),
            AccountMeta::new(*taker_token_account, false),
            AccountMeta::new_readonly(keys.token_mint, false),
            AccountMeta::new_readonly(a.authority, false),
        ],
    )
}

pub fn confirm_delivery(
    keys: &EscrowKeys,
    taker_nft_account: &Address,
    maker_token_account: &Address,
) -> Result<Instruction> {
    let a = &keys.addresses;
    keys.instruction(
        EscrowInstruction::ConfirmDelivery,
        vec![
            AccountMeta::new(keys.maker, true),
            AccountMeta::new(a.escrow, false),
            AccountMeta::new(a.vault_nft, false),
            AccountMeta::new(a.vault_token, false),
            AccountMeta::new_readonly(a.authority, false),
            AccountMeta::new(*taker_nft_account, false),
            AccountMeta::new(*maker_token_account, false),
        ],
    )
}

pub fn cancel_escrow(
    keys: &EscrowKeys,
    maker_nft_account: &Address,
    taker_token_account: Option<&Address>,
) -> Result<Instruction> {
    let a = &keys.addresses;
    let mut accounts = vec![
        AccountMeta::new(keys.maker, true),
        AccountMeta::new(a.escrow, false),
        AccountMeta::new(a.vault_nft, false),
        AccountMeta::new(a.vault_token, false),
        AccountMeta::new_readonly(a.authority, false),
        AccountMeta::new(*maker_nft_account, false),
    ];
    if let Some(refund) = taker_token_account {
        accounts.push(AccountMeta::new(*refund, false));
    }
    keys.instruction(EscrowInstruction::CancelEscrow, accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;
    use crate::ID;

    fn keys() -> EscrowKeys {
        EscrowKeys::new(
            ID,
            Keypair::from_label("alice").address(),
            Keypair::from_label("bob").address(),
            Keypair::from_label("nft-mint").address(),
            Keypair::from_label("token-mint").address(),
        )
        .unwrap()
    }

    #[test]
    fn unpack_rejects_garbage() {
        assert_eq!(
            EscrowInstruction::unpack(&[]),
            Err(EscrowError::InvalidInstruction)
        );
        assert_eq!(
            EscrowInstruction::unpack(&[42]),
            Err(EscrowError::InvalidInstruction)
        );

        let mut data = EscrowInstruction::ConfirmDelivery.pack().unwrap();
        data.push(0);
        assert_eq!(
            EscrowInstruction::unpack(&data),
            Err(EscrowError::InvalidInstruction)
        );
    }

    #[test]
    fn create_carries_terms() {
        let k = keys();
        let ix = create_escrow(&k, &Address([5u8; 32]), 1_000).unwrap();

        assert_eq!(ix.program_id, ID);
        assert_eq!(ix.accounts.len(), 8);
        assert!(ix.accounts[0].is_signer && ix.accounts[0].is_writable);
        assert_eq!(ix.accounts[1].address, *k.escrow());
        assert!(!ix.accounts[4].is_writable);
        assert_eq!(
            EscrowInstruction::unpack(&ix.data).unwrap(),
            EscrowInstruction::CreateEscrow {
                taker: k.taker,
                requested_amount: 1_000
            }
        );
    }

    #[test]
    fn cancel_refund_account_is_optional() {
        let k = keys();
        let nft_account = Address([5u8; 32]);
        let refund = Address([6u8; 32]);

        assert_eq!(cancel_escrow(&k, &nft_account, None).unwrap().accounts.len(), 6);
        let ix = cancel_escrow(&k, &nft_account, Some(&refund)).unwrap();
        assert_eq!(ix.accounts.len(), 7);
        assert_eq!(ix.accounts[6].address, refund);
    }
}
