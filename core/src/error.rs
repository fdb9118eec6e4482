use thiserror::Error;

use crate::identity::Address;

/// Escrow-related errors.
///
/// Every variant aborts the whole transaction; the runtime discards all
/// staged writes before the error reaches the caller.
#[derive(Debug, Error, PartialEq)]
pub enum EscrowError {
    /// Requested amount is zero.
    #[error("requested amount must be non-zero")]
    InvalidAmount,

    /// Caller identity does not match the role required by the operation.
    #[error("signer does not match the required escrow role")]
    WrongSigner,

    /// Asset presented does not match the escrowed mint.
    #[error("asset kind does not match the escrow terms")]
    WrongAssetKind,

    /// Source account holds fewer units than the operation moves.
    #[error("insufficient token balance: have {available}, need {required}")]
    InsufficientBalance { available: u64, required: u64 },

    /// Operation attempted against a record not in the required state.
    #[error("invalid state transition")]
    InvalidState,

    /// A provided account does not match its re-derived address.
    #[error("account {0} does not match the derived address")]
    AddressMismatch(Address),

    /// Operation attempted on a completed or cancelled escrow.
    #[error("escrow already finalized")]
    AlreadyFinalized,

    /// A live escrow (or an allocated vault) already occupies the address.
    #[error("address {0} already in use")]
    AddressInUse(Address),

    #[error("account {0} not found")]
    AccountNotFound(Address),

    /// Account is owned by a different program than expected.
    #[error("account {0} has an unexpected owner")]
    IllegalOwner(Address),

    #[error("account {0} must be writable")]
    AccountNotWritable(Address),

    #[error("not enough account keys for instruction")]
    NotEnoughAccountKeys,

    /// Payer cannot cover the rent-exempt deposit of a new account.
    #[error("insufficient lamports: have {available}, need {required}")]
    InsufficientLamports { available: u64, required: u64 },

    #[error("invalid instruction data")]
    InvalidInstruction,

    #[error("invalid account data")]
    InvalidAccountData,

    /// No bump in `0..=255` yields an off-curve address.
    #[error("unable to find a viable program address bump seed")]
    NoViableBump,

    /// Seeds exceed length limits, or the derived address lies on the curve.
    #[error("invalid seeds for program address")]
    InvalidSeeds,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("signature verification failed for {0}")]
    SignatureVerification(Address),

    /// Transaction was signed over a hash the ledger no longer (or never)
    /// issued.
    #[error("unknown or expired recent hash")]
    UnknownRecentHash,

    /// The same signed message was already committed.
    #[error("transaction already processed")]
    AlreadyProcessed,

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}

/// Errors that might occur while parsing into an [`Address`].
#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid base58: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("cannot parse identity from empty string")]
    EmptyIdentity,

    #[error("expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Errors raised by the token primitives before they are mapped
/// into [`EscrowError`].
#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("account mint does not match")]
    MintMismatch,

    #[error("authority does not own the token account")]
    OwnerMismatch,

    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("cannot close a non-empty token account")]
    NonZeroBalance,

    #[error("token amount overflow")]
    Overflow,
}

impl From<TokenError> for EscrowError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::MintMismatch => Self::WrongAssetKind,
            TokenError::OwnerMismatch => Self::WrongSigner,
            TokenError::InsufficientFunds {
                available,
                required,
            } => Self::InsufficientBalance {
                available,
                required,
            },
            // Vaults only close after every unit has been moved out.
            TokenError::NonZeroBalance => Self::InvalidState,
            TokenError::Overflow => Self::Overflow,
        }
    }
}

impl From<bincode::error::DecodeError> for EscrowError {
    fn from(_: bincode::error::DecodeError) -> Self {
        Self::InvalidAccountData
    }
}

impl From<bincode::error::EncodeError> for EscrowError {
    fn from(_: bincode::error::EncodeError) -> Self {
        Self::InvalidAccountData
    }
}
