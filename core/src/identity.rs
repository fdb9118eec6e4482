//! Addresses and signing keys of the parties taking part in an escrow.

use bincode::{Decode, Encode};
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
#[cfg(feature = "json")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::IdentityError;
use crate::{EscrowError, Result};

/// Length of an address in bytes.
pub const ADDRESS_BYTES: usize = 32;

/// A 32-byte ledger address.
///
/// Either an Ed25519 public key (a party with a signing key) or a
/// program-derived address that lies off the curve and therefore has
/// no private key at all.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct Address(pub [u8; ADDRESS_BYTES]);

impl Address {
    pub const fn new_from_array(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; ADDRESS_BYTES] {
        self.0
    }

    /// Returns `true` if the bytes decode to a point on the Ed25519 curve,
    /// i.e. a private key for this address could exist.
    pub fn is_on_curve(&self) -> bool {
        VerifyingKey::from_bytes(&self.0).is_ok()
    }

    /// Constant-time equality, used wherever a provided account is
    /// checked against a re-derived one.
    pub fn ct_eq(&self, other: &Address) -> bool {
        self.0.ct_eq(&other.0).unwrap_u8() == 1
    }

    /// Verify that `signature` over `message` was produced by the key
    /// behind this address.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|_| EscrowError::SignatureVerification(*self))?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig)
            .map_err(|_| EscrowError::SignatureVerification(*self))
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; ADDRESS_BYTES]> for Address {
    fn from(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl std::str::FromStr for Address {
    type Err = EscrowError;

    /// Parses either a `0x`-prefixed hex string or a base58 string.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdentityError::EmptyIdentity.into());
        }
        let bytes = match s.strip_prefix("0x") {
            Some(h) => hex::decode(h).map_err(IdentityError::from)?,
            None => bs58::decode(s).into_vec().map_err(IdentityError::from)?,
        };
        let len = bytes.len();
        let bytes: [u8; ADDRESS_BYTES] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidLength(len))?;
        Ok(Self(bytes))
    }
}

#[cfg(feature = "json")]
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "json")]
impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ed25519 signature over a transaction message.
#[derive(Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Signature(pub [u8; 64]);

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", bs58::encode(self.0).into_string())
    }
}

/// Signing key of a party (maker, taker, fee payer, mint authority).
pub struct Keypair(SigningKey);

impl Keypair {
    /// Build a keypair from a 32-byte secret seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(SigningKey::from_bytes(&seed))
    }

    /// Deterministic keypair from a label; `SHA-256(label)` is the seed.
    pub fn from_label(label: &str) -> Self {
        Self::from_seed(Sha256::digest(label.as_bytes()).into())
    }

    pub fn address(&self) -> Address {
        Address(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.0.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Keypair").field(&self.address()).finish()
    }
}

#[cfg(test)]
mod tests {
    use core::str::FromStr as _;

    use super::*;

    #[test]
    fn parse_base58_and_hex() {
        let alice = Keypair::from_label("alice").address();

        let b58 = alice.to_string();
        assert_eq!(Address::from_str(&b58).unwrap(), alice);

        let hexed = format!("0x{}", hex::encode(alice.0));
        assert_eq!(Address::from_str(&hexed).unwrap(), alice);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            Address::from_str("  "),
            Err(EscrowError::Identity(IdentityError::EmptyIdentity))
        );
        assert_eq!(
            Address::from_str("0xdeadbeef"),
            Err(EscrowError::Identity(IdentityError::InvalidLength(4)))
        );
        assert!(matches!(
            Address::from_str("0OIl"),
            Err(EscrowError::Identity(IdentityError::Base58(_)))
        ));
    }

    #[test]
    fn sign_and_verify() {
        let bob = Keypair::from_label("bob");
        let sig = bob.sign(b"deposit");
        assert!(bob.address().verify(b"deposit", &sig).is_ok());

        // tampered message
        assert_eq!(
            bob.address().verify(b"withdraw", &sig),
            Err(EscrowError::SignatureVerification(bob.address()))
        );

        // signature by someone else
        let mallory = Keypair::from_label("mallory");
        assert!(bob
            .address()
            .verify(b"deposit", &mallory.sign(b"deposit"))
            .is_err());
    }

    #[test]
    fn keypair_addresses_are_on_curve() {
        assert!(Keypair::from_label("alice").address().is_on_curve());
        assert!(Address::default().ct_eq(&Address([0u8; 32])));
    }
}
