/// Ledger accounts, rent and system-level allocation
pub mod account;
/// Capabilities allowed to move tokens
pub mod authority;
pub mod error;
/// Events emitted by committed escrow operations
pub mod event;
/// Addresses, signatures and keypairs of parties
pub mod identity;
/// Instruction wire format and builders
pub mod instruction;
/// JSON (de)serialization of escrow parameters and metadata
#[cfg(feature = "json")]
pub mod interface;
/// Program-derived addresses of the escrow, its vaults
/// and its vault authority
pub mod pda;
/// Escrow operations: create, deposit, confirm, cancel
pub mod processor;
/// Account store, units of work and the in-memory ledger
pub mod runtime;
/// Escrow record and lifecycle states
pub mod state;
/// Mints, token accounts and transfers
pub mod token;

pub use error::EscrowError;
pub use identity::{Address, Keypair, Signature};
pub use instruction::{EscrowInstruction, EscrowKeys, Instruction};
pub use pda::EscrowAddresses;
pub use runtime::{Hash, Ledger, Transaction};
pub use state::{EscrowRecord, EscrowState};

pub type Result<T> = std::result::Result<T, EscrowError>;

/// Program ID of the escrow
/// (`2ecirqhaPAcPrSJCpP2r32djQiQejLdhEtfL4K1gtj7d`).
pub const ID: Address = Address::new_from_array([
    24, 126, 145, 73, 179, 22, 220, 56, 147, 214, 90, 241, 198, 85, 235, 71, 206, 248, 238, 224,
    98, 201, 133, 93, 223, 241, 251, 4, 217, 27, 143, 208,
]);

#[cfg(test)]
mod tests {
    use core::str::FromStr as _;

    use super::*;

    #[test]
    fn program_id_matches_base58() {
        assert_eq!(
            Address::from_str("2ecirqhaPAcPrSJCpP2r32djQiQejLdhEtfL4K1gtj7d").unwrap(),
            ID
        );
    }
}
