//! Who may move tokens out of an account.
//!
//! Token primitives accept anything implementing [`TransferAuthority`], but
//! the escrow processor only ever hands them two kinds of values: a
//! [`Signer`], built from an account meta the runtime verified, and a
//! [`VaultAuthority`], the keyless capability bound to one escrow. Neither
//! can be constructed outside this crate, and the trait is sealed so no
//! other type can stand in for them.

use crate::identity::{Address, Keypair};
use crate::pda::{verify_program_address, AUTHORITY_SEED};
use crate::state::EscrowRecord;
use crate::Result;

mod private {
    pub trait Sealed {}

    impl Sealed for super::Signer {}
    impl Sealed for super::VaultAuthority {}
    impl Sealed for crate::identity::Keypair {}
}

/// Identity checked against the owner of a token account (or the
/// authority of a mint).
///
/// Sealed: only the capabilities above (and key holders) implement it.
///
/// ```compile_fail
/// use nft_escrow_core::authority::TransferAuthority;
/// use nft_escrow_core::Address;
///
/// struct Impostor;
///
/// impl TransferAuthority for Impostor {
///     fn authority(&self) -> Address {
///         Address::default()
///     }
/// }
/// ```
pub trait TransferAuthority: private::Sealed {
    fn authority(&self) -> Address;
}

/// A party whose signature the runtime verified for this transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signer {
    address: Address,
}

impl Signer {
    pub(crate) fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl TransferAuthority for Signer {
    fn authority(&self) -> Address {
        self.address
    }
}

/// Signing capability of an escrow's vault authority.
///
/// The authority address has no private key. Holding a `VaultAuthority`
/// is the only way to move assets out of the escrow's vaults, and one is
/// only issued after re-deriving the address from the escrow and its
/// stored bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultAuthority {
    address: Address,
}

impl VaultAuthority {
    pub(crate) fn bind(
        program_id: &Address,
        escrow: &Address,
        record: &EscrowRecord,
    ) -> Result<Self> {
        verify_program_address(
            &[AUTHORITY_SEED, escrow.as_ref()],
            record.authority_bump,
            program_id,
            &record.authority,
        )?;
        Ok(Self {
            address: record.authority,
        })
    }
}

impl TransferAuthority for VaultAuthority {
    fn authority(&self) -> Address {
        self.address
    }
}

/// Direct key holders, used by the ledger's genesis helpers.
impl TransferAuthority for Keypair {
    fn authority(&self) -> Address {
        self.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pda::EscrowAddresses;
    use crate::{EscrowError, ID};

    #[test]
    fn bind_rederives_authority() {
        let maker = Keypair::from_label("alice").address();
        let taker = Keypair::from_label("bob").address();
        let nft = Keypair::from_label("nft-mint").address();
        let token = Keypair::from_label("token-mint").address();
        let addrs = EscrowAddresses::find(&ID, &maker, &taker, &nft, &token).unwrap();
        let mut record = EscrowRecord::new(maker, taker, nft, token, 1, &addrs);

        let authority = VaultAuthority::bind(&ID, &addrs.escrow, &record).unwrap();
        assert_eq!(authority.authority(), addrs.authority);

        // bound to one escrow only
        assert_eq!(
            VaultAuthority::bind(&ID, &addrs.vault_nft, &record),
            Err(EscrowError::AddressMismatch(addrs.authority))
        );

        // a key-holding address can never pass as the authority
        record.authority = maker;
        assert_eq!(
            VaultAuthority::bind(&ID, &addrs.escrow, &record),
            Err(EscrowError::AddressMismatch(maker))
        );
    }
}
