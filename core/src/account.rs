//! Raw ledger accounts, rent-exempt deposits and the system-level
//! primitives for allocating and closing them.

use bincode::config::{self, Config};
use bincode::{Decode, Encode};
use tracing::debug;

use crate::identity::Address;
use crate::runtime::{AccountStore, UnitOfWork};
use crate::{EscrowError, Result};

/// Owner of plain wallet accounts (the all-zero address).
pub const SYSTEM_PROGRAM_ID: Address = Address::new_from_array([0u8; 32]);

/// Bytes charged on top of the data length of every account.
pub const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

/// Lamports charged per byte for one year of storage.
pub const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;

/// Years of rent an account must hold up front to be rent-exempt.
pub const EXEMPTION_THRESHOLD: u64 = 2;

/// Minimum lamports an account of `data_len` bytes must hold.
pub fn minimum_balance(data_len: usize) -> u64 {
    (ACCOUNT_STORAGE_OVERHEAD + data_len as u64) * LAMPORTS_PER_BYTE_YEAR * EXEMPTION_THRESHOLD
}

/// A ledger account: a lamport balance, the program allowed to mutate its
/// data, and the data itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Account {
    pub lamports: u64,
    pub owner: Address,
    pub data: Vec<u8>,
}

impl Account {
    pub fn new(lamports: u64, owner: Address, data: Vec<u8>) -> Self {
        Self {
            lamports,
            owner,
            data,
        }
    }

    /// A wallet with no data, owned by the system program.
    pub fn wallet(lamports: u64) -> Self {
        Self::new(lamports, SYSTEM_PROGRAM_ID, Vec::new())
    }
}

/// Fixed-width little-endian encoding, so every account type has a
/// constant size.
pub(crate) fn codec() -> impl Config {
    config::standard().with_fixed_int_encoding()
}

pub(crate) fn encode<T: Encode>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::encode_to_vec(value, codec())?)
}

pub(crate) fn decode<T: Decode<()>>(data: &[u8]) -> Result<T> {
    let (value, _) = bincode::decode_from_slice(data, codec())?;
    Ok(value)
}

/// Create `address` owned by `owner`, funding its rent-exempt deposit from
/// `payer`.
///
/// # Errors
///
/// - [`EscrowError::AddressInUse`] if the account already exists.
/// - [`EscrowError::AccountNotFound`] if the payer has no account.
/// - [`EscrowError::InsufficientLamports`] if the payer cannot cover rent.
pub fn allocate(
    uow: &mut UnitOfWork<'_>,
    payer: &Address,
    address: &Address,
    owner: &Address,
    data: Vec<u8>,
) -> Result<()> {
    if uow.get(address).is_some() {
        return Err(EscrowError::AddressInUse(*address));
    }

    let rent = minimum_balance(data.len());
    let mut funder = uow
        .get(payer)
        .cloned()
        .ok_or(EscrowError::AccountNotFound(*payer))?;
    funder.lamports = funder
        .lamports
        .checked_sub(rent)
        .ok_or(EscrowError::InsufficientLamports {
            available: funder.lamports,
            required: rent,
        })?;
    uow.put(*payer, funder);
    uow.put(*address, Account::new(rent, *owner, data));

    debug!(%address, %owner, rent, "allocated account");
    Ok(())
}

/// Remove `address` from the ledger and credit its lamports to
/// `destination`.
pub fn close(uow: &mut UnitOfWork<'_>, address: &Address, destination: &Address) -> Result<()> {
    if address == destination {
        return Err(EscrowError::InvalidAccountData);
    }
    let closed = uow
        .remove(address)
        .ok_or(EscrowError::AccountNotFound(*address))?;
    let mut receiver = uow
        .get(destination)
        .cloned()
        .ok_or(EscrowError::AccountNotFound(*destination))?;
    receiver.lamports = receiver
        .lamports
        .checked_add(closed.lamports)
        .ok_or(EscrowError::Overflow)?;
    uow.put(*destination, receiver);

    debug!(%address, %destination, lamports = closed.lamports, "closed account");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Ledger;

    #[test]
    fn rent_grows_with_size() {
        assert_eq!(minimum_balance(0), 128 * 3_480 * 2);
        assert!(minimum_balance(72) < minimum_balance(248));
    }

    #[test]
    fn allocate_charges_payer() {
        let payer = Address([1u8; 32]);
        let target = Address([2u8; 32]);
        let mut ledger = Ledger::new();
        ledger.airdrop(&payer, 10_000_000);

        let mut uow = UnitOfWork::new(&mut ledger);
        allocate(&mut uow, &payer, &target, &SYSTEM_PROGRAM_ID, vec![0u8; 10]).unwrap();
        assert_eq!(
            allocate(&mut uow, &payer, &target, &SYSTEM_PROGRAM_ID, vec![]),
            Err(EscrowError::AddressInUse(target))
        );
        uow.commit();

        assert_eq!(ledger.lamports(&target), minimum_balance(10));
        assert_eq!(ledger.lamports(&payer), 10_000_000 - minimum_balance(10));
    }

    #[test]
    fn allocate_requires_rent() {
        let payer = Address([1u8; 32]);
        let target = Address([2u8; 32]);
        let mut ledger = Ledger::new();
        ledger.airdrop(&payer, 5);

        let mut uow = UnitOfWork::new(&mut ledger);
        assert_eq!(
            allocate(&mut uow, &payer, &target, &SYSTEM_PROGRAM_ID, vec![]),
            Err(EscrowError::InsufficientLamports {
                available: 5,
                required: minimum_balance(0),
            })
        );
    }

    #[test]
    fn close_refunds_destination() {
        let payer = Address([1u8; 32]);
        let target = Address([2u8; 32]);
        let mut ledger = Ledger::new();
        ledger.airdrop(&payer, 10_000_000);

        let mut uow = UnitOfWork::new(&mut ledger);
        allocate(&mut uow, &payer, &target, &SYSTEM_PROGRAM_ID, vec![]).unwrap();
        close(&mut uow, &target, &payer).unwrap();
        assert!(uow.get(&target).is_none());
        uow.commit();

        assert_eq!(ledger.lamports(&payer), 10_000_000);
    }
}
