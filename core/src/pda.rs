//! Program-derived addresses.
//!
//! An escrow never relies on a registry to find its accounts: the record,
//! both vaults and the vault authority are all pure functions of the
//! agreement's identities, so any party can recompute them.
//!
//! ```text
//! escrow      = derive("escrow",      maker,  nft_mint, taker)
//! vault_nft   = derive("vault-nft",   escrow, nft_mint)
//! vault_token = derive("vault-token", escrow, token_mint)
//! authority   = derive("authority",   escrow)
//! ```

use sha2::{Digest, Sha256};

use crate::identity::Address;
use crate::state::EscrowRecord;
use crate::{EscrowError, Result};

/// Maximum number of seeds, bump included.
pub const MAX_SEEDS: usize = 16;

/// Maximum length of a single seed in bytes.
pub const MAX_SEED_LEN: usize = 32;

/// Domain separator appended to every derivation.
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

pub const ESCROW_SEED: &[u8] = b"escrow";
pub const VAULT_NFT_SEED: &[u8] = b"vault-nft";
pub const VAULT_TOKEN_SEED: &[u8] = b"vault-token";
pub const AUTHORITY_SEED: &[u8] = b"authority";

/// Hash `seeds` with `program_id` into an address that must lie off the
/// Ed25519 curve.
///
/// # Errors
///
/// Returns [`EscrowError::InvalidSeeds`] when the seeds exceed the length
/// limits or when the hash happens to be a valid curve point.
pub fn create_program_address(seeds: &[&[u8]], program_id: &Address) -> Result<Address> {
    if seeds.len() > MAX_SEEDS {
        return Err(EscrowError::InvalidSeeds);
    }
    if seeds.iter().any(|seed| seed.len() > MAX_SEED_LEN) {
        return Err(EscrowError::InvalidSeeds);
    }

    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(program_id);
    hasher.update(PDA_MARKER);
    let address = Address(hasher.finalize().into());

    if address.is_on_curve() {
        return Err(EscrowError::InvalidSeeds);
    }
    Ok(address)
}

/// Search bumps from 255 downwards and return the first off-curve address
/// together with its bump (the canonical bump).
///
/// # Errors
///
/// [`EscrowError::NoViableBump`] if no bump works, which is astronomically
/// unlikely; callers must treat it as fatal.
pub fn find_program_address(seeds: &[&[u8]], program_id: &Address) -> Result<(Address, u8)> {
    if seeds.len() >= MAX_SEEDS {
        return Err(EscrowError::InvalidSeeds);
    }
    for bump in (0..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump = seeds.to_vec();
        with_bump.push(&bump_seed);
        match create_program_address(&with_bump, program_id) {
            Ok(address) => return Ok((address, bump)),
            Err(EscrowError::InvalidSeeds) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(EscrowError::NoViableBump)
}

/// Re-derive an address with a known bump and compare it to `expected`.
///
/// # Errors
///
/// [`EscrowError::AddressMismatch`] carrying `expected` if the derivation
/// fails or yields a different address.
pub fn verify_program_address(
    seeds: &[&[u8]],
    bump: u8,
    program_id: &Address,
    expected: &Address,
) -> Result<()> {
    let bump_seed = [bump];
    let mut with_bump: Vec<&[u8]> = Vec::with_capacity(seeds.len() + 1);
    with_bump.extend_from_slice(seeds);
    with_bump.push(&bump_seed);

    match create_program_address(&with_bump, program_id) {
        Ok(derived) if derived.ct_eq(expected) => Ok(()),
        _ => Err(EscrowError::AddressMismatch(*expected)),
    }
}

pub fn find_escrow_address(
    maker: &Address,
    nft_mint: &Address,
    taker: &Address,
    program_id: &Address,
) -> Result<(Address, u8)> {
    find_program_address(
        &[ESCROW_SEED, maker.as_ref(), nft_mint.as_ref(), taker.as_ref()],
        program_id,
    )
}

pub fn find_vault_nft_address(
    escrow: &Address,
    nft_mint: &Address,
    program_id: &Address,
) -> Result<(Address, u8)> {
    find_program_address(
        &[VAULT_NFT_SEED, escrow.as_ref(), nft_mint.as_ref()],
        program_id,
    )
}

pub fn find_vault_token_address(
    escrow: &Address,
    token_mint: &Address,
    program_id: &Address,
) -> Result<(Address, u8)> {
    find_program_address(
        &[VAULT_TOKEN_SEED, escrow.as_ref(), token_mint.as_ref()],
        program_id,
    )
}

pub fn find_authority_address(escrow: &Address, program_id: &Address) -> Result<(Address, u8)> {
    find_program_address(&[AUTHORITY_SEED, escrow.as_ref()], program_id)
}

/// Every address an escrow touches, with the bumps that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowAddresses {
    pub escrow: Address,
    pub bump: u8,
    pub vault_nft: Address,
    pub vault_nft_bump: u8,
    pub vault_token: Address,
    pub vault_token_bump: u8,
    pub authority: Address,
    pub authority_bump: u8,
}

impl EscrowAddresses {
    /// Derive all four addresses from the agreement's identities.
    pub fn find(
        program_id: &Address,
        maker: &Address,
        taker: &Address,
        nft_mint: &Address,
        token_mint: &Address,
    ) -> Result<Self> {
        let (escrow, bump) = find_escrow_address(maker, nft_mint, taker, program_id)?;
        let (vault_nft, vault_nft_bump) = find_vault_nft_address(&escrow, nft_mint, program_id)?;
        let (vault_token, vault_token_bump) =
            find_vault_token_address(&escrow, token_mint, program_id)?;
        let (authority, authority_bump) = find_authority_address(&escrow, program_id)?;

        Ok(Self {
            escrow,
            bump,
            vault_nft,
            vault_nft_bump,
            vault_token,
            vault_token_bump,
            authority,
            authority_bump,
        })
    }

    /// Addresses as persisted in a record.
    pub fn from_record(escrow: Address, record: &EscrowRecord) -> Self {
        Self {
            escrow,
            bump: record.bump,
            vault_nft: record.vault_nft,
            vault_nft_bump: record.vault_nft_bump,
            vault_token: record.vault_token,
            vault_token_bump: record.vault_token_bump,
            authority: record.authority,
            authority_bump: record.authority_bump,
        }
    }

    /// Re-derive every stored address from the record's own identities and
    /// bumps, without a bump search.
    pub fn verify(&self, program_id: &Address, record: &EscrowRecord) -> Result<()> {
        verify_program_address(
            &[
                ESCROW_SEED,
                record.maker.as_ref(),
                record.nft_mint.as_ref(),
                record.taker.as_ref(),
            ],
            self.bump,
            program_id,
            &self.escrow,
        )?;
        verify_program_address(
            &[VAULT_NFT_SEED, self.escrow.as_ref(), record.nft_mint.as_ref()],
            self.vault_nft_bump,
            program_id,
            &self.vault_nft,
        )?;
        verify_program_address(
            &[
                VAULT_TOKEN_SEED,
                self.escrow.as_ref(),
                record.token_mint.as_ref(),
            ],
            self.vault_token_bump,
            program_id,
            &self.vault_token,
        )?;
        verify_program_address(
            &[AUTHORITY_SEED, self.escrow.as_ref()],
            self.authority_bump,
            program_id,
            &self.authority,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;
    use crate::ID;

    fn parties() -> (Address, Address, Address, Address) {
        (
            Keypair::from_label("alice").address(),
            Keypair::from_label("bob").address(),
            Keypair::from_label("nft-mint").address(),
            Keypair::from_label("token-mint").address(),
        )
    }

    #[test]
    fn derivation_is_deterministic() {
        let (maker, taker, nft, token) = parties();
        let a = EscrowAddresses::find(&ID, &maker, &taker, &nft, &token).unwrap();
        let b = EscrowAddresses::find(&ID, &maker, &taker, &nft, &token).unwrap();
        assert_eq!(a, b);
        assert!(!a.escrow.is_on_curve());
        assert!(!a.authority.is_on_curve());
    }

    #[test]
    fn distinct_inputs_give_distinct_addresses() {
        let (maker, taker, nft, token) = parties();
        let carol = Keypair::from_label("carol").address();
        let other_nft = Keypair::from_label("other-nft").address();

        let base = EscrowAddresses::find(&ID, &maker, &taker, &nft, &token).unwrap();
        let other_taker = EscrowAddresses::find(&ID, &maker, &carol, &nft, &token).unwrap();
        let other_asset = EscrowAddresses::find(&ID, &maker, &taker, &other_nft, &token).unwrap();
        let other_program = EscrowAddresses::find(&token, &maker, &taker, &nft, &token).unwrap();

        assert_ne!(base.escrow, other_taker.escrow);
        assert_ne!(base.escrow, other_asset.escrow);
        assert_ne!(base.escrow, other_program.escrow);
        assert_ne!(base.authority, other_taker.authority);

        // vaults and authority never collide with each other
        let all = [base.escrow, base.vault_nft, base.vault_token, base.authority];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn known_bump_matches_search() {
        let (maker, taker, nft, _) = parties();
        let (escrow, bump) = find_escrow_address(&maker, &nft, &taker, &ID).unwrap();
        let seeds: &[&[u8]] = &[ESCROW_SEED, maker.as_ref(), nft.as_ref(), taker.as_ref()];

        assert!(verify_program_address(seeds, bump, &ID, &escrow).is_ok());
        assert_eq!(
            verify_program_address(seeds, bump, &ID, &maker),
            Err(EscrowError::AddressMismatch(maker))
        );
    }

    #[test]
    fn seed_limits() {
        let long = [7u8; MAX_SEED_LEN + 1];
        assert_eq!(
            create_program_address(&[&long], &ID),
            Err(EscrowError::InvalidSeeds)
        );
        let many: Vec<&[u8]> = vec![b"s".as_slice(); MAX_SEEDS];
        assert_eq!(
            find_program_address(&many, &ID),
            Err(EscrowError::InvalidSeeds)
        );
    }

    #[test]
    fn verify_rejects_tampered_record() {
        let (maker, taker, nft, token) = parties();
        let addrs = EscrowAddresses::find(&ID, &maker, &taker, &nft, &token).unwrap();
        let mut record = EscrowRecord::new(maker, taker, nft, token, 10, &addrs);
        assert!(addrs.verify(&ID, &record).is_ok());

        record.taker = Keypair::from_label("mallory").address();
        assert_eq!(
            addrs.verify(&ID, &record),
            Err(EscrowError::AddressMismatch(addrs.escrow))
        );
    }
}
