//! Escrow program entry point and the four state transitions.
//!
//! Each handler follows the same order: parse and check the account list,
//! load the record and re-derive its addresses, check the caller's role,
//! gate on state, check the remaining accounts, then move assets and write
//! the new state. Every write goes to the unit of work, so any error past
//! the first transfer still leaves the ledger untouched.

use tracing::{info, info_span};

use crate::account;
use crate::authority::{Signer, VaultAuthority};
use crate::event::{EscrowEvent, EventKind};
use crate::identity::Address;
use crate::instruction::{AccountMeta, EscrowInstruction};
use crate::pda::EscrowAddresses;
use crate::runtime::UnitOfWork;
use crate::state::{self, EscrowRecord, EscrowState};
use crate::token;
use crate::{EscrowError, Result};

/// Decode `data` and run the matching operation against `uow`.
pub fn process_instruction(
    program_id: &Address,
    accounts: &[AccountMeta],
    data: &[u8],
    uow: &mut UnitOfWork<'_>,
) -> Result<()> {
    match EscrowInstruction::unpack(data)? {
        EscrowInstruction::CreateEscrow {
            taker,
            requested_amount,
        } => process_create_escrow(program_id, accounts, taker, requested_amount, uow),
        EscrowInstruction::DepositTakerToken => process_deposit_taker_token(program_id, accounts, uow),
        EscrowInstruction::ConfirmDelivery => process_confirm_delivery(program_id, accounts, uow),
        EscrowInstruction::CancelEscrow => process_cancel_escrow(program_id, accounts, uow),
    }
}

/// Positional reader over an instruction's account metas.
struct AccountList<'a> {
    iter: std::slice::Iter<'a, AccountMeta>,
}

impl<'a> AccountList<'a> {
    fn new(accounts: &'a [AccountMeta]) -> Self {
        Self {
            iter: accounts.iter(),
        }
    }

    fn next_account(&mut self) -> Result<&'a AccountMeta> {
        self.iter.next().ok_or(EscrowError::NotEnoughAccountKeys)
    }

    fn next_writable(&mut self) -> Result<Address> {
        let meta = self.next_account()?;
        writable(meta)
    }

    fn next_readonly(&mut self) -> Result<Address> {
        Ok(self.next_account()?.address)
    }

    fn next_signer(&mut self) -> Result<Signer> {
        let meta = self.next_account()?;
        if !meta.is_signer {
            return Err(EscrowError::WrongSigner);
        }
        Ok(Signer::new(meta.address))
    }

    fn next_writable_signer(&mut self) -> Result<Signer> {
        let meta = self.next_account()?;
        if !meta.is_signer {
            return Err(EscrowError::WrongSigner);
        }
        writable(meta).map(Signer::new)
    }

    fn next_optional_writable(&mut self) -> Result<Option<Address>> {
        self.iter.next().map(writable).transpose()
    }
}

fn writable(meta: &AccountMeta) -> Result<Address> {
    if !meta.is_writable {
        return Err(EscrowError::AccountNotWritable(meta.address));
    }
    Ok(meta.address)
}

fn check_address(provided: &Address, expected: &Address) -> Result<()> {
    if !provided.ct_eq(expected) {
        return Err(EscrowError::AddressMismatch(*provided));
    }
    Ok(())
}

/// Load the record and re-derive every address it stores from its own
/// identities and bumps.
fn load_verified(
    program_id: &Address,
    escrow: &Address,
    uow: &UnitOfWork<'_>,
) -> Result<EscrowRecord> {
    let record = state::load_escrow(uow, escrow, program_id)?;
    EscrowAddresses::from_record(*escrow, &record).verify(program_id, &record)?;
    Ok(record)
}

/// A payout target must exist, hold `mint` and belong to `party`.
fn check_destination(
    uow: &UnitOfWork<'_>,
    address: &Address,
    mint: &Address,
    party: &Address,
) -> Result<()> {
    let target = token::load_account(uow, address)?;
    if target.mint != *mint {
        return Err(EscrowError::WrongAssetKind);
    }
    if target.owner != *party {
        return Err(EscrowError::AddressMismatch(*address));
    }
    Ok(())
}

/// Move the whole balance of `vault` to `to`, including units sent to the
/// vault address outside the escrow flow.
fn drain(
    uow: &mut UnitOfWork<'_>,
    vault: &Address,
    to: &Address,
    authority: &VaultAuthority,
) -> Result<()> {
    let held = token::load_account(uow, vault)?.amount;
    token::transfer(uow, vault, to, authority, held)
}

fn finish(
    uow: &mut UnitOfWork<'_>,
    escrow: &Address,
    record: &EscrowRecord,
    kind: EventKind,
) -> Result<()> {
    state::store_escrow(uow, escrow, record)?;
    uow.emit(EscrowEvent::new(*escrow, kind, record.state));
    info!(%escrow, ?kind, state = ?record.state, "escrow event");
    Ok(())
}

fn process_create_escrow(
    program_id: &Address,
    accounts: &[AccountMeta],
    taker: Address,
    requested_amount: u64,
    uow: &mut UnitOfWork<'_>,
) -> Result<()> {
    let _span = info_span!("create_escrow", %taker, requested_amount).entered();

    let mut accounts = AccountList::new(accounts);
    let maker = accounts.next_writable_signer()?;
    let escrow = accounts.next_writable()?;
    let vault_nft = accounts.next_writable()?;
    let vault_token = accounts.next_writable()?;
    let authority = accounts.next_readonly()?;
    let nft_mint = accounts.next_readonly()?;
    let maker_nft_account = accounts.next_writable()?;
    let token_mint = accounts.next_readonly()?;

    if requested_amount == 0 {
        return Err(EscrowError::InvalidAmount);
    }

    let addrs = EscrowAddresses::find(program_id, maker.address(), &taker, &nft_mint, &token_mint)?;
    check_address(&escrow, &addrs.escrow)?;
    check_address(&vault_nft, &addrs.vault_nft)?;
    check_address(&vault_token, &addrs.vault_token)?;
    check_address(&authority, &addrs.authority)?;

    // a finished escrow for the same triple may be opened again
    let reinit = match state::load_escrow(uow, &escrow, program_id) {
        Err(EscrowError::AccountNotFound(_)) => false,
        Ok(previous) if previous.state.is_terminal() => true,
        _ => return Err(EscrowError::AddressInUse(escrow)),
    };

    if nft_mint == token_mint {
        return Err(EscrowError::WrongAssetKind);
    }
    if !token::load_mint(uow, &nft_mint)?.is_non_fungible() {
        return Err(EscrowError::WrongAssetKind);
    }
    token::load_mint(uow, &token_mint)?;

    let source = token::load_account(uow, &maker_nft_account)?;
    if source.mint != nft_mint {
        return Err(EscrowError::WrongAssetKind);
    }
    if source.owner != *maker.address() {
        return Err(EscrowError::WrongSigner);
    }
    if source.amount == 0 {
        return Err(EscrowError::InsufficientBalance {
            available: 0,
            required: 1,
        });
    }

    let record = EscrowRecord::new(
        *maker.address(),
        taker,
        nft_mint,
        token_mint,
        requested_amount,
        &addrs,
    );
    if !reinit {
        account::allocate(uow, maker.address(), &escrow, program_id, vec![0; EscrowRecord::LEN])?;
    }
    token::initialize_account(uow, maker.address(), &vault_nft, &nft_mint, &addrs.authority)?;
    token::initialize_account(uow, maker.address(), &vault_token, &token_mint, &addrs.authority)?;
    token::transfer(uow, &maker_nft_account, &vault_nft, &maker, 1)?;

    finish(uow, &escrow, &record, EventKind::Created)
}

fn process_deposit_taker_token(
    program_id: &Address,
    accounts: &[AccountMeta],
    uow: &mut UnitOfWork<'_>,
) -> Result<()> {
    let mut accounts = AccountList::new(accounts);
    let taker = accounts.next_signer()?;
    let escrow = accounts.next_writable()?;
    let vault_token = accounts.next_writable()?;
    let taker_token_account = accounts.next_writable()?;
    let token_mint = accounts.next_readonly()?;
    let authority = accounts.next_readonly()?;

    let _span = info_span!("deposit_taker_token", %escrow).entered();

    let mut record = load_verified(program_id, &escrow, uow)?;
    if !taker.address().ct_eq(&record.taker) {
        return Err(EscrowError::WrongSigner);
    }
    record.state.ensure(EscrowState::AwaitingFunding)?;
    check_address(&vault_token, &record.vault_token)?;
    check_address(&authority, &record.authority)?;
    if token_mint != record.token_mint {
        return Err(EscrowError::WrongAssetKind);
    }

    if token::load_account(uow, &taker_token_account)?.mint != record.token_mint {
        return Err(EscrowError::WrongAssetKind);
    }
    token::transfer(
        uow,
        &taker_token_account,
        &vault_token,
        &taker,
        record.requested_amount,
    )?;

    record.state = EscrowState::Funded;
    finish(uow, &escrow, &record, EventKind::Funded)
}

fn process_confirm_delivery(
    program_id: &Address,
    accounts: &[AccountMeta],
    uow: &mut UnitOfWork<'_>,
) -> Result<()> {
    let mut accounts = AccountList::new(accounts);
    let maker = accounts.next_writable_signer()?;
    let escrow = accounts.next_writable()?;
    let vault_nft = accounts.next_writable()?;
    let vault_token = accounts.next_writable()?;
    let authority = accounts.next_readonly()?;
    let taker_nft_account = accounts.next_writable()?;
    let maker_token_account = accounts.next_writable()?;

    let _span = info_span!("confirm_delivery", %escrow).entered();

    let mut record = load_verified(program_id, &escrow, uow)?;
    if !maker.address().ct_eq(&record.maker) {
        return Err(EscrowError::WrongSigner);
    }
    record.state.ensure(EscrowState::Funded)?;
    check_address(&vault_nft, &record.vault_nft)?;
    check_address(&vault_token, &record.vault_token)?;
    check_address(&authority, &record.authority)?;
    let vault_authority = VaultAuthority::bind(program_id, &escrow, &record)?;

    check_destination(uow, &taker_nft_account, &record.nft_mint, &record.taker)?;
    check_destination(uow, &maker_token_account, &record.token_mint, &record.maker)?;

    drain(uow, &vault_nft, &taker_nft_account, &vault_authority)?;
    drain(uow, &vault_token, &maker_token_account, &vault_authority)?;
    token::close_account(uow, &vault_nft, maker.address(), &vault_authority)?;
    token::close_account(uow, &vault_token, maker.address(), &vault_authority)?;

    record.state = EscrowState::Completed;
    finish(uow, &escrow, &record, EventKind::Delivered)
}

fn process_cancel_escrow(
    program_id: &Address,
    accounts: &[AccountMeta],
    uow: &mut UnitOfWork<'_>,
) -> Result<()> {
    let mut accounts = AccountList::new(accounts);
    let maker = accounts.next_writable_signer()?;
    let escrow = accounts.next_writable()?;
    let vault_nft = accounts.next_writable()?;
    let vault_token = accounts.next_writable()?;
    let authority = accounts.next_readonly()?;
    let maker_nft_account = accounts.next_writable()?;
    let taker_token_account = accounts.next_optional_writable()?;

    let _span = info_span!("cancel_escrow", %escrow).entered();

    let mut record = load_verified(program_id, &escrow, uow)?;
    if !maker.address().ct_eq(&record.maker) {
        return Err(EscrowError::WrongSigner);
    }
    if record.state.is_terminal() {
        return Err(EscrowError::AlreadyFinalized);
    }
    check_address(&vault_nft, &record.vault_nft)?;
    check_address(&vault_token, &record.vault_token)?;
    check_address(&authority, &record.authority)?;
    let vault_authority = VaultAuthority::bind(program_id, &escrow, &record)?;

    check_destination(uow, &maker_nft_account, &record.nft_mint, &record.maker)?;
    // any token vault balance is refunded to the taker
    let refund = if token::load_account(uow, &vault_token)?.amount > 0 {
        let refund = taker_token_account.ok_or(EscrowError::NotEnoughAccountKeys)?;
        check_destination(uow, &refund, &record.token_mint, &record.taker)?;
        Some(refund)
    } else {
        None
    };

    drain(uow, &vault_nft, &maker_nft_account, &vault_authority)?;
    if let Some(refund) = refund {
        drain(uow, &vault_token, &refund, &vault_authority)?;
    }
    token::close_account(uow, &vault_nft, maker.address(), &vault_authority)?;
    token::close_account(uow, &vault_token, maker.address(), &vault_authority)?;

    record.state = EscrowState::Cancelled;
    finish(uow, &escrow, &record, EventKind::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Keypair;
    use crate::instruction::{self, EscrowKeys};
    use crate::runtime::Ledger;
    use crate::ID;

    fn run(ledger: &mut Ledger, accounts: &[AccountMeta], data: &[u8]) -> Result<()> {
        let mut uow = UnitOfWork::new(ledger);
        process_instruction(&ID, accounts, data, &mut uow)?;
        uow.commit();
        Ok(())
    }

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
    fn rejects_unknown_data() {
        let mut ledger = Ledger::new();
        assert_eq!(
            run(&mut ledger, &[], &[0xff, 0xff]),
            Err(EscrowError::InvalidInstruction)
        );
    }

    #[test]
    fn account_list_checks() {
        let mut ledger = Ledger::new();
        let k = keys();
        let ix = instruction::create_escrow(&k, &Address([5u8; 32]), 10).unwrap();

        assert_eq!(
            run(&mut ledger, &ix.accounts[..3], &ix.data),
            Err(EscrowError::NotEnoughAccountKeys)
        );

        let mut unsigned = ix.accounts.clone();
        unsigned[0].is_signer = false;
        assert_eq!(
            run(&mut ledger, &unsigned, &ix.data),
            Err(EscrowError::WrongSigner)
        );

        let mut readonly = ix.accounts.clone();
        readonly[1].is_writable = false;
        assert_eq!(
            run(&mut ledger, &readonly, &ix.data),
            Err(EscrowError::AccountNotWritable(*k.escrow()))
        );
    }

    #[test]
    fn create_rejects_zero_amount_before_touching_accounts() {
        let mut ledger = Ledger::new();
        let k = keys();
        let ix = instruction::create_escrow(&k, &Address([5u8; 32]), 0).unwrap();
        assert_eq!(
            run(&mut ledger, &ix.accounts, &ix.data),
            Err(EscrowError::InvalidAmount)
        );
    }

    #[test]
    fn operations_on_missing_escrow() {
        let mut ledger = Ledger::new();
        let k = keys();
        let ix = instruction::deposit_taker_token(&k, &Address([5u8; 32])).unwrap();
        assert_eq!(
            run(&mut ledger, &ix.accounts, &ix.data),
            Err(EscrowError::AccountNotFound(*k.escrow()))
        );
    }

    #[test]
    fn substituted_vault_is_caught_at_create() {
        let mut ledger = Ledger::new();
        let k = keys();
        let mut ix = instruction::create_escrow(&k, &Address([5u8; 32]), 10).unwrap();
        let forged = Address([7u8; 32]);
        ix.accounts[2].address = forged;
        assert_eq!(
            run(&mut ledger, &ix.accounts, &ix.data),
            Err(EscrowError::AddressMismatch(forged))
        );
    }
}
