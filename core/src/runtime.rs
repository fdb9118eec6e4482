//! Hosting runtime: account storage, atomic units of work and an in-memory
//! ledger that verifies and executes signed transactions.
//!
//! The escrow operations never write to storage directly. They run against
//! a [`UnitOfWork`], which stages every write (and every event) in an
//! overlay. Only [`UnitOfWork::commit`] makes them visible; dropping the unit
//! discards them, so a failed operation has no effect at all.
//!
//! Every transaction signs over a recent hash issued by the [`Ledger`]. The
//! ledger keeps the last [`MAX_RECENT_HASHES`] of them and remembers which
//! messages it committed under each, so a signed transaction executes at
//! most once and expires once its hash leaves the window.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use bincode::{Decode, Encode};
use sha2::{Digest, Sha256};
use tracing::{debug, info_span, warn};

use crate::account::{self, Account};
use crate::authority::TransferAuthority;
use crate::event::EscrowEvent;
use crate::identity::{Address, Keypair, Signature};
use crate::instruction::Instruction;
use crate::state::{self, EscrowRecord};
use crate::token::{self, Mint, TokenAccount, TOKEN_PROGRAM_ID};
use crate::{processor, EscrowError, Result, ID};

/// Read/write access to ledger accounts.
pub trait AccountStore {
    fn get(&self, address: &Address) -> Option<&Account>;

    fn put(&mut self, address: Address, account: Account);

    fn remove(&mut self, address: &Address) -> Option<Account>;
}

/// Staged writes and events on top of an [`AccountStore`].
pub struct UnitOfWork<'a> {
    base: &'a mut dyn AccountStore,
    // `None` marks an account removed in this unit.
    overlay: BTreeMap<Address, Option<Account>>,
    events: Vec<EscrowEvent>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(base: &'a mut dyn AccountStore) -> Self {
        Self {
            base,
            overlay: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Record an event; it becomes observable only if the unit commits.
    pub fn emit(&mut self, event: EscrowEvent) {
        self.events.push(event);
    }

    /// Apply every staged write to the underlying store and hand back the
    /// events emitted inside this unit.
    pub fn commit(self) -> Vec<EscrowEvent> {
        let writes = self.overlay.len();
        for (address, account) in self.overlay {
            match account {
                Some(account) => self.base.put(address, account),
                None => {
                    self.base.remove(&address);
                }
            }
        }
        debug!(writes, events = self.events.len(), "committed unit of work");
        self.events
    }
}

impl AccountStore for UnitOfWork<'_> {
    fn get(&self, address: &Address) -> Option<&Account> {
        match self.overlay.get(address) {
            Some(staged) => staged.as_ref(),
            None => self.base.get(address),
        }
    }

    fn put(&mut self, address: Address, account: Account) {
        self.overlay.insert(address, Some(account));
    }

    fn remove(&mut self, address: &Address) -> Option<Account> {
        let current = self.get(address).cloned();
        if current.is_some() {
            self.overlay.insert(*address, None);
        }
        current
    }
}

/// Number of recent hashes a transaction may be signed over.
pub const MAX_RECENT_HASHES: usize = 150;

/// A SHA-256 digest: ledger recent hashes and message digests.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Encode, Decode)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn hashv(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

/// A batch of instructions with the signatures of every required signer.
///
/// The signed message is the bincode encoding of the recent hash followed
/// by the instruction list.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Transaction {
    pub recent_hash: Hash,
    pub instructions: Vec<Instruction>,
    pub signatures: Vec<(Address, Signature)>,
}

impl Transaction {
    /// Sign `instructions` over `recent_hash`, normally
    /// [`Ledger::latest_hash`].
    pub fn new_signed(
        instructions: Vec<Instruction>,
        signers: &[&Keypair],
        recent_hash: Hash,
    ) -> Result<Self> {
        let message = Self::message_bytes(&recent_hash, &instructions)?;
        let signatures = signers
            .iter()
            .map(|kp| (kp.address(), kp.sign(&message)))
            .collect();
        Ok(Self {
            recent_hash,
            instructions,
            signatures,
        })
    }

    pub fn message(&self) -> Result<Vec<u8>> {
        Self::message_bytes(&self.recent_hash, &self.instructions)
    }

    fn message_bytes(recent_hash: &Hash, instructions: &[Instruction]) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(
            (recent_hash, instructions),
            bincode::config::standard(),
        )?)
    }

    /// Every account flagged as signer must carry a valid signature, and
    /// every attached signature must verify.
    pub fn verify(&self) -> Result<()> {
        let message = self.message()?;
        for (address, signature) in &self.signatures {
            address.verify(&message, signature)?;
        }
        for meta in self.instructions.iter().flat_map(|ix| ix.accounts.iter()) {
            if meta.is_signer && !self.signatures.iter().any(|(a, _)| *a == meta.address) {
                return Err(EscrowError::SignatureVerification(meta.address));
            }
        }
        Ok(())
    }
}

/// In-memory ledger hosting a single escrow program.
///
/// Transactions are processed one at a time (`&mut self`), which is the
/// per-account serialization the escrow relies on.
#[derive(Debug)]
pub struct Ledger {
    program_id: Address,
    accounts: BTreeMap<Address, Account>,
    events: Vec<EscrowEvent>,
    // oldest first; the back is the latest hash
    recent_hashes: VecDeque<Hash>,
    // message digests committed under each recent hash
    processed: BTreeMap<Hash, BTreeSet<Hash>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for Ledger {
    fn get(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    fn put(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, account);
    }

    fn remove(&mut self, address: &Address) -> Option<Account> {
        self.accounts.remove(address)
    }
}

impl Ledger {
    /// A ledger hosting the escrow program at [`ID`].
    pub fn new() -> Self {
        Self::with_program_id(ID)
    }

    pub fn with_program_id(program_id: Address) -> Self {
        let genesis = Hash::hashv(&[b"genesis", program_id.as_ref()]);
        Self {
            program_id,
            accounts: BTreeMap::new(),
            events: Vec::new(),
            recent_hashes: VecDeque::from([genesis]),
            processed: BTreeMap::new(),
        }
    }

    pub fn program_id(&self) -> &Address {
        &self.program_id
    }

    /// Hash to sign new transactions over. It advances with every
    /// committed transaction.
    pub fn latest_hash(&self) -> Hash {
        self.recent_hashes.back().copied().unwrap_or_default()
    }

    /// Verify, then execute every instruction of `tx` inside one unit of
    /// work. Either all of them commit or none does.
    ///
    /// # Errors
    ///
    /// Besides the operation errors, [`EscrowError::UnknownRecentHash`] when
    /// `tx` was signed over an expired or foreign hash, and
    /// [`EscrowError::AlreadyProcessed`] when the same signed message has
    /// already been committed.
    pub fn process_transaction(&mut self, tx: &Transaction) -> Result<()> {
        let _span = info_span!("transaction", instructions = tx.instructions.len()).entered();

        tx.verify()?;

        if !self.recent_hashes.contains(&tx.recent_hash) {
            warn!(recent_hash = %tx.recent_hash, "unknown or expired recent hash");
            return Err(EscrowError::UnknownRecentHash);
        }
        let digest = Hash::hashv(&[&tx.message()?]);
        if self
            .processed
            .get(&tx.recent_hash)
            .is_some_and(|seen| seen.contains(&digest))
        {
            warn!(%digest, "transaction already processed");
            return Err(EscrowError::AlreadyProcessed);
        }

        let program_id = self.program_id;
        let mut uow = UnitOfWork::new(self);
        for (index, ix) in tx.instructions.iter().enumerate() {
            if ix.program_id != program_id {
                warn!(index, program = %ix.program_id, "unknown program, rolling back");
                return Err(EscrowError::InvalidInstruction);
            }
            if let Err(e) =
                processor::process_instruction(&program_id, &ix.accounts, &ix.data, &mut uow)
            {
                warn!(index, error = %e, "instruction failed, rolling back");
                return Err(e);
            }
        }
        let events = uow.commit();
        self.events.extend(events);
        self.record_processed(tx.recent_hash, digest);
        Ok(())
    }

    fn record_processed(&mut self, recent_hash: Hash, digest: Hash) {
        self.processed.entry(recent_hash).or_default().insert(digest);

        let next = Hash::hashv(&[&self.latest_hash().0, &digest.0]);
        self.recent_hashes.push_back(next);
        while self.recent_hashes.len() > MAX_RECENT_HASHES {
            if let Some(expired) = self.recent_hashes.pop_front() {
                self.processed.remove(&expired);
            }
        }
    }

    /// Escrow events from committed transactions, oldest first.
    pub fn events(&self) -> &[EscrowEvent] {
        &self.events
    }

    /// Read an escrow record. Reads are unrestricted.
    pub fn escrow(&self, address: &Address) -> Result<EscrowRecord> {
        state::load_escrow(self, address, &self.program_id)
    }

    pub fn lamports(&self, address: &Address) -> u64 {
        self.get(address).map(|a| a.lamports).unwrap_or(0)
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    pub fn token_account(&self, address: &Address) -> Result<TokenAccount> {
        token::load_account(self, address)
    }

    /// Token balance, or `None` once the account has been closed.
    pub fn token_balance(&self, address: &Address) -> Option<u64> {
        self.token_account(address).ok().map(|a| a.amount)
    }

    // Genesis helpers. They stand in for the wallet, minting and
    // account-provisioning collaborators and bypass signatures.

    /// Credit lamports to a wallet, creating it if needed.
    pub fn airdrop(&mut self, address: &Address, lamports: u64) {
        let account = self
            .accounts
            .entry(*address)
            .or_insert_with(|| Account::wallet(0));
        account.lamports = account.lamports.saturating_add(lamports);
    }

    pub fn create_mint(&mut self, mint: &Address, authority: &Address, decimals: u8) -> Result<()> {
        if self.exists(mint) {
            return Err(EscrowError::AddressInUse(*mint));
        }
        let data = account::encode(&Mint::new(*authority, decimals))?;
        let rent = account::minimum_balance(data.len());
        self.put(*mint, Account::new(rent, TOKEN_PROGRAM_ID, data));
        Ok(())
    }

    pub fn create_token_account(
        &mut self,
        address: &Address,
        mint: &Address,
        owner: &Address,
    ) -> Result<()> {
        if self.exists(address) {
            return Err(EscrowError::AddressInUse(*address));
        }
        token::load_mint(self, mint)?;
        let data = account::encode(&TokenAccount::new(*mint, *owner))?;
        let rent = account::minimum_balance(data.len());
        self.put(*address, Account::new(rent, TOKEN_PROGRAM_ID, data));
        Ok(())
    }

    pub fn mint_to(
        &mut self,
        mint: &Address,
        destination: &Address,
        authority: &impl TransferAuthority,
        amount: u64,
    ) -> Result<()> {
        let mut uow = UnitOfWork::new(self);
        token::mint_to(&mut uow, mint, destination, authority, amount)?;
        uow.commit();
        Ok(())
    }
}
