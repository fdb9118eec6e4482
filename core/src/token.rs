//! Token primitives: mints, token accounts and authority-checked
//! movements between them.
//!
//! This is the asset-transfer collaborator the escrow relies on. Every
//! function runs against a [`UnitOfWork`], so a failing escrow operation
//! rolls back the token movements it already made.

use bincode::{Decode, Encode};
use tracing::debug;

use crate::account;
use crate::authority::TransferAuthority;
use crate::error::TokenError;
use crate::identity::Address;
use crate::runtime::{AccountStore, UnitOfWork};
use crate::{EscrowError, Result};

/// Owner of every mint and token account.
pub const TOKEN_PROGRAM_ID: Address = Address::new_from_array([
    6, 221, 246, 225, 215, 101, 161, 147, 217, 203, 225, 70, 206, 235, 121, 172, 28, 180, 133,
    237, 95, 91, 55, 145, 58, 140, 245, 133, 126, 255, 0, 169,
]);

/// Definition of an asset kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Mint {
    pub mint_authority: Address,
    pub supply: u64,
    pub decimals: u8,
}

impl Mint {
    pub const LEN: usize = 32 + 8 + 1;

    pub fn new(mint_authority: Address, decimals: u8) -> Self {
        Self {
            mint_authority,
            supply: 0,
            decimals,
        }
    }

    /// A single, indivisible unit: the shape of an NFT.
    pub fn is_non_fungible(&self) -> bool {
        self.decimals == 0 && self.supply == 1
    }
}

/// Balance of one asset kind held on behalf of `owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct TokenAccount {
    pub mint: Address,
    pub owner: Address,
    pub amount: u64,
}

impl TokenAccount {
    pub const LEN: usize = 32 + 32 + 8;

    pub fn new(mint: Address, owner: Address) -> Self {
        Self {
            mint,
            owner,
            amount: 0,
        }
    }
}

fn load<T: Decode<()>>(store: &dyn AccountStore, address: &Address) -> Result<T> {
    let account = store
        .get(address)
        .ok_or(EscrowError::AccountNotFound(*address))?;
    if account.owner != TOKEN_PROGRAM_ID {
        return Err(EscrowError::IllegalOwner(*address));
    }
    account::decode(&account.data)
}

fn save<T: Encode>(store: &mut dyn AccountStore, address: &Address, value: &T) -> Result<()> {
    let mut account = store
        .get(address)
        .cloned()
        .ok_or(EscrowError::AccountNotFound(*address))?;
    account.data = account::encode(value)?;
    store.put(*address, account);
    Ok(())
}

pub fn load_mint(store: &dyn AccountStore, address: &Address) -> Result<Mint> {
    load(store, address)
}

pub fn load_account(store: &dyn AccountStore, address: &Address) -> Result<TokenAccount> {
    load(store, address)
}

/// Allocate an empty token account for `mint`, held by `owner` and paid for
/// by `payer`.
pub fn initialize_account(
    uow: &mut UnitOfWork<'_>,
    payer: &Address,
    address: &Address,
    mint: &Address,
    owner: &Address,
) -> Result<()> {
    load_mint(uow, mint)?;
    let data = account::encode(&TokenAccount::new(*mint, *owner))?;
    account::allocate(uow, payer, address, &TOKEN_PROGRAM_ID, data)?;
    debug!(%address, %mint, %owner, "initialized token account");
    Ok(())
}

/// Move `amount` units from `from` to `to`.
///
/// # Errors
///
/// - [`EscrowError::WrongSigner`] if `authority` does not own `from`.
/// - [`EscrowError::WrongAssetKind`] if the accounts hold different mints.
/// - [`EscrowError::InsufficientBalance`] if `from` holds less than `amount`.
pub fn transfer(
    uow: &mut UnitOfWork<'_>,
    from: &Address,
    to: &Address,
    authority: &impl TransferAuthority,
    amount: u64,
) -> Result<()> {
    let mut source = load_account(uow, from)?;
    let mut destination = load_account(uow, to)?;

    if source.owner != authority.authority() {
        return Err(TokenError::OwnerMismatch.into());
    }
    if source.mint != destination.mint {
        return Err(TokenError::MintMismatch.into());
    }
    if source.amount < amount {
        return Err(TokenError::InsufficientFunds {
            available: source.amount,
            required: amount,
        }
        .into());
    }
    if from == to {
        return Ok(());
    }

    source.amount -= amount;
    destination.amount = destination
        .amount
        .checked_add(amount)
        .ok_or(TokenError::Overflow)?;
    save(uow, from, &source)?;
    save(uow, to, &destination)?;

    debug!(%from, %to, amount, "token transfer");
    Ok(())
}

/// Close an empty token account, releasing its rent deposit to
/// `destination`.
pub fn close_account(
    uow: &mut UnitOfWork<'_>,
    address: &Address,
    destination: &Address,
    authority: &impl TransferAuthority,
) -> Result<()> {
    let token = load_account(uow, address)?;
    if token.owner != authority.authority() {
        return Err(TokenError::OwnerMismatch.into());
    }
    if token.amount != 0 {
        return Err(TokenError::NonZeroBalance.into());
    }
    account::close(uow, address, destination)
}

/// Create `amount` new units of `mint` in `destination`.
pub fn mint_to(
    uow: &mut UnitOfWork<'_>,
    mint: &Address,
    destination: &Address,
    authority: &impl TransferAuthority,
    amount: u64,
) -> Result<()> {
    let mut definition = load_mint(uow, mint)?;
    let mut target = load_account(uow, destination)?;

    if definition.mint_authority != authority.authority() {
        return Err(TokenError::OwnerMismatch.into());
    }
    if target.mint != *mint {
        return Err(TokenError::MintMismatch.into());
    }
    definition.supply = definition
        .supply
        .checked_add(amount)
        .ok_or(TokenError::Overflow)?;
    target.amount = target
        .amount
        .checked_add(amount)
        .ok_or(TokenError::Overflow)?;
    save(uow, mint, &definition)?;
    save(uow, destination, &target)?;

    debug!(%mint, %destination, amount, "minted");
    Ok(())
}
