//! Asset ledger view and the in-process ledger runtime.
//!
//! [`LocalLedger`] applies one [`Submission`] at a time, all or nothing: the
//! operation runs against a scratch copy of the account map which replaces the
//! live map only on success. Applied operation ids are remembered so the same
//! signed message never lands twice.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::address::{
    extra_account_metas_address, fee_config_address, fee_escrow_address, programs,
    token_account_address, treasury_address, treasury_vault_address, wrapper_mint_address,
    Address,
};
use crate::error::{Result, TollError};
use crate::fee_config::{FeeCategory, FeeConfig, FeeRates, FeeRecipients, FeeSplit};
use crate::hook::{self, ExtraAccountMetaList, HookTransfer};
use crate::identity::{self, serde_hex};
use crate::operation::{Confirmation, Operation, OperationId, OrderingToken, Submission};
use crate::records::Record;
use crate::token::{MintRecord, TokenAccountRecord, TransferFee};
use crate::treasury::Treasury;

/// Ordering tokens older than this many heights are rejected.
pub const MAX_ORDERING_TOKEN_AGE: usize = 150;

/// Read-only view over mint and token account state.
pub trait AssetLedger {
    fn mint(&self, mint: &Address) -> Result<MintRecord>;
    fn token_account(&self, account: &Address) -> Result<TokenAccountRecord>;
    fn token_accounts_by_mint(&self, mint: &Address) -> Vec<(Address, TokenAccountRecord)>;

    /// Fee the ledger would withhold from a transfer of `amount`.
    fn withheld_for(&self, mint: &Address, amount: u64) -> Result<u64> {
        self.mint(mint)?.transfer_fee.withheld_for(amount)
    }

    fn supply(&self, mint: &Address) -> Result<u64> {
        Ok(self.mint(mint)?.supply)
    }

    fn balance(&self, account: &Address) -> Result<u64> {
        Ok(self.token_account(account)?.amount)
    }
}

/// Typed content of one ledger key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccountData {
    Mint(MintRecord),
    TokenAccount(TokenAccountRecord),
    FeeConfig(FeeConfig),
    ExtraAccountMetas(ExtraAccountMetaList),
    Treasury(Treasury),
}

impl AccountData {
    pub fn kind(&self) -> &'static str {
        match self {
            AccountData::Mint(_) => MintRecord::NAME,
            AccountData::TokenAccount(_) => TokenAccountRecord::NAME,
            AccountData::FeeConfig(_) => FeeConfig::NAME,
            AccountData::ExtraAccountMetas(_) => ExtraAccountMetaList::NAME,
            AccountData::Treasury(_) => Treasury::NAME,
        }
    }

    /// Fixed-layout bytes as returned by `read_account`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            AccountData::Mint(r) => r.to_account_bytes(),
            AccountData::TokenAccount(r) => r.to_account_bytes(),
            AccountData::FeeConfig(r) => r.to_account_bytes(),
            AccountData::ExtraAccountMetas(r) => r.to_account_bytes(),
            AccountData::Treasury(r) => r.to_account_bytes(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    MintCreated {
        mint: Address,
        decimals: u8,
        transfer_fee: TransferFee,
    },
    TokenAccountCreated {
        account: Address,
        owner: Address,
        mint: Address,
    },
    Minted {
        mint: Address,
        destination: Address,
        amount: u64,
    },
    Burned {
        mint: Address,
        source: Address,
        amount: u64,
    },
    Transferred {
        source: Address,
        destination: Address,
        mint: Address,
        amount: u64,
        withheld: u64,
    },
    FeeConfigInitialized {
        mint: Address,
        fee_config: Address,
        escrow: Address,
        rates: FeeRates,
    },
    FeeRecipientsUpdated {
        mint: Address,
        recipients: FeeRecipients,
    },
    ExtraAccountMetasSynced {
        mint: Address,
        accounts: usize,
    },
    FeesSwept {
        mint: Address,
        accounts: usize,
        swept_total: u64,
        split: FeeSplit,
    },
    FeeClaimed {
        mint: Address,
        category: FeeCategory,
        destination: Address,
        amount: u64,
    },
    TreasuryCreated {
        treasury: Address,
        base_mint: Address,
        wrapper_mint: Address,
        authority: Address,
    },
    Staked {
        treasury: Address,
        user: Address,
        deposited: u64,
        minted: u64,
    },
    Redeemed {
        treasury: Address,
        user: Address,
        burned: u64,
        returned: u64,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerMeta {
    pub height: u64,
    #[serde(with = "serde_hex")]
    pub state_root: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalLedger {
    pub meta: LedgerMeta,
    accounts: BTreeMap<Address, AccountData>,
    events: Vec<LedgerEvent>,
    recent_tokens: VecDeque<OrderingToken>,
    applied: BTreeMap<OperationId, Confirmation>,
}

impl Default for LocalLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLedger {
    pub fn new() -> Self {
        let state_root = build_merkle(Vec::new());
        let mut recent_tokens = VecDeque::with_capacity(MAX_ORDERING_TOKEN_AGE);
        recent_tokens.push_back(ordering_token_at(0, &state_root));
        Self {
            meta: LedgerMeta {
                height: 0,
                state_root,
            },
            accounts: BTreeMap::new(),
            events: Vec::new(),
            recent_tokens,
            applied: BTreeMap::new(),
        }
    }

    pub fn ordering_token(&self) -> OrderingToken {
        ordering_token_at(self.meta.height, &self.meta.state_root)
    }

    pub fn is_ordering_token_recent(&self, token: &OrderingToken) -> bool {
        self.recent_tokens.contains(token)
    }

    pub fn account(&self, address: &Address) -> Option<&AccountData> {
        self.accounts.get(address)
    }

    pub fn read_account(&self, address: &Address) -> Result<Option<Vec<u8>>> {
        self.accounts.get(address).map(AccountData::to_bytes).transpose()
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &AccountData)> {
        self.accounts.iter()
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn operation_status(&self, id: &OperationId) -> Option<&Confirmation> {
        self.applied.get(id)
    }

    pub fn apply(&mut self, submission: &Submission) -> Result<Confirmation> {
        let id = submission.id()?;
        if self.applied.contains_key(&id) {
            return Err(TollError::DuplicateOperation { id: id.to_string() });
        }
        if !self.is_ordering_token_recent(&submission.ordering_token) {
            return Err(TollError::TransientSubmissionFailure {
                reason: format!(
                    "ordering token {:?} is older than {MAX_ORDERING_TOKEN_AGE} heights",
                    submission.ordering_token
                ),
            });
        }

        let message = Submission::message(&submission.operation, &submission.ordering_token)?;
        let mut signed = BTreeSet::new();
        for (signer, signature) in &submission.signatures {
            identity::verify(signer, &message, signature)?;
            signed.insert(*signer);
        }

        let mut execution = Execution {
            accounts: self.accounts.clone(),
            signed: &signed,
            events: Vec::new(),
        };
        execution.run(&submission.operation)?;
        let Execution {
            accounts, events, ..
        } = execution;

        self.accounts = accounts;
        self.meta.height += 1;
        self.meta.state_root = compute_state_root(&self.accounts)?;
        if self.recent_tokens.len() == MAX_ORDERING_TOKEN_AGE {
            self.recent_tokens.pop_front();
        }
        self.recent_tokens
            .push_back(ordering_token_at(self.meta.height, &self.meta.state_root));
        self.events.extend(events.iter().cloned());

        let confirmation = Confirmation {
            id,
            height: self.meta.height,
            events,
        };
        self.applied.insert(id, confirmation.clone());
        info!(
            operation = submission.operation.name(),
            %id,
            height = self.meta.height,
            "operation committed"
        );
        Ok(confirmation)
    }

    /// Fee config and escrow account of `mint`, when initialized.
    pub fn fee_state(&self, mint: &Address) -> Result<Option<(FeeConfig, TokenAccountRecord)>> {
        let at = fee_config_address(mint)?;
        match self.accounts.get(&at) {
            Some(AccountData::FeeConfig(config)) => {
                let escrow = self.token_account(&config.escrow)?;
                Ok(Some((config.clone(), escrow)))
            }
            Some(other) => Err(TollError::mismatch(
                at,
                format!("expected FeeConfig, found {}", other.kind()),
            )),
            None => Ok(None),
        }
    }

    /// Overwrite or drop an account without going through an operation.
    #[cfg(test)]
    pub(crate) fn replace_account(&mut self, address: Address, data: Option<AccountData>) {
        match data {
            Some(data) => {
                self.accounts.insert(address, data);
            }
            None => {
                self.accounts.remove(&address);
            }
        }
    }
}

impl AssetLedger for LocalLedger {
    fn mint(&self, mint: &Address) -> Result<MintRecord> {
        lookup_mint(&self.accounts, mint)
    }

    fn token_account(&self, account: &Address) -> Result<TokenAccountRecord> {
        lookup_token_account(&self.accounts, account)
    }

    fn token_accounts_by_mint(&self, mint: &Address) -> Vec<(Address, TokenAccountRecord)> {
        self.accounts
            .iter()
            .filter_map(|(address, data)| match data {
                AccountData::TokenAccount(record) if record.mint == *mint => {
                    Some((*address, record.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

fn lookup_mint(accounts: &BTreeMap<Address, AccountData>, mint: &Address) -> Result<MintRecord> {
    match accounts.get(mint) {
        Some(AccountData::Mint(record)) => Ok(record.clone()),
        Some(other) => Err(TollError::mismatch(
            *mint,
            format!("expected Mint, found {}", other.kind()),
        )),
        None => Err(TollError::UnknownAccount { account: *mint }),
    }
}

fn lookup_token_account(
    accounts: &BTreeMap<Address, AccountData>,
    account: &Address,
) -> Result<TokenAccountRecord> {
    match accounts.get(account) {
        Some(AccountData::TokenAccount(record)) => Ok(record.clone()),
        Some(other) => Err(TollError::mismatch(
            *account,
            format!("expected TokenAccount, found {}", other.kind()),
        )),
        None => Err(TollError::UnknownAccount { account: *account }),
    }
}

/// How the transfer hook gets its extra accounts.
enum ExtraAccounts<'a> {
    Supplied(&'a [Address]),
    Registered,
}

/// One operation against a scratch copy of the accounts.
struct Execution<'a> {
    accounts: BTreeMap<Address, AccountData>,
    signed: &'a BTreeSet<Address>,
    events: Vec<LedgerEvent>,
}

impl Execution<'_> {
    fn run(&mut self, operation: &Operation) -> Result<()> {
        match operation {
            Operation::CreateMint {
                mint,
                decimals,
                mint_authority,
                transfer_fee,
                withdraw_withheld_authority,
                transfer_hook_program,
            } => {
                self.require_signer(mint, mint)?;
                self.require_signer(mint, mint_authority)?;
                if !transfer_fee.is_valid() {
                    return Err(TollError::InvalidFeeConfig(format!(
                        "transfer fee of {} basis points exceeds 100%",
                        transfer_fee.basis_points
                    )));
                }
                self.create(
                    *mint,
                    AccountData::Mint(MintRecord {
                        decimals: *decimals,
                        supply: 0,
                        mint_authority: Some(*mint_authority),
                        transfer_fee: *transfer_fee,
                        withdraw_withheld_authority: *withdraw_withheld_authority,
                        transfer_hook_program: *transfer_hook_program,
                    }),
                )?;
                self.events.push(LedgerEvent::MintCreated {
                    mint: *mint,
                    decimals: *decimals,
                    transfer_fee: *transfer_fee,
                });
            }
            Operation::CreateTokenAccount { owner, mint, payer } => {
                self.require_signer(mint, payer)?;
                self.create_token_account(owner, mint)?;
            }
            Operation::MintTo {
                mint,
                destination,
                amount,
            } => {
                let record = self.mint(mint)?;
                let authority = record
                    .mint_authority
                    .ok_or_else(|| TollError::mismatch(*mint, "supply is fixed"))?;
                self.require_signer(mint, &authority)?;
                self.reject_program_owned(destination)?;
                self.mint_to(mint, destination, *amount)?;
            }
            Operation::Transfer {
                source,
                destination,
                mint,
                amount,
                decimals,
                extra_accounts,
            } => {
                let owner = self.token_account(source)?.owner;
                self.require_signer(source, &owner)?;
                if self.mint(mint)?.decimals != *decimals {
                    return Err(TollError::mismatch(*mint, "decimals do not match the mint"));
                }
                self.reject_program_owned(destination)?;
                self.transfer(
                    source,
                    destination,
                    mint,
                    *amount,
                    ExtraAccounts::Supplied(extra_accounts),
                )?;
            }
            Operation::InitializeFeeConfig {
                mint,
                authority,
                rates,
                recipients,
            } => self.initialize_fee_config(mint, authority, rates, recipients)?,
            Operation::SetFeeRecipients {
                mint,
                authority,
                recipients,
            } => {
                let (at, config) = self.fee_config_for(mint, authority)?;
                self.check_recipients(mint, recipients)?;
                self.accounts
                    .insert(at, AccountData::FeeConfig(config.with_recipients(*recipients)));
                self.events.push(LedgerEvent::FeeRecipientsUpdated {
                    mint: *mint,
                    recipients: *recipients,
                });
            }
            Operation::SyncExtraAccountMetas { mint, authority } => {
                let (at, config) = self.fee_config_for(mint, authority)?;
                let metas = ExtraAccountMetaList::for_fee_config(at, &config);
                let accounts = metas.accounts.len();
                self.accounts.insert(
                    extra_account_metas_address(mint)?,
                    AccountData::ExtraAccountMetas(metas),
                );
                self.events
                    .push(LedgerEvent::ExtraAccountMetasSynced { mint: *mint, accounts });
            }
            Operation::SweepWithheld {
                mint,
                authority,
                sources,
            } => self.sweep_withheld(mint, authority, sources)?,
            Operation::ClaimFee {
                mint,
                authority,
                category,
                destination,
                amount,
            } => self.claim_fee(mint, authority, *category, destination, *amount)?,
            Operation::CreateTreasury {
                base_mint,
                authority,
            } => self.create_treasury(base_mint, authority)?,
            Operation::Stake {
                treasury,
                user,
                amount,
            } => self.stake(treasury, user, *amount)?,
            Operation::Redeem {
                treasury,
                user,
                amount,
            } => self.redeem(treasury, user, *amount)?,
        }
        Ok(())
    }

    fn require_signer(&self, account: &Address, required: &Address) -> Result<()> {
        if self.signed.contains(required) {
            Ok(())
        } else {
            Err(TollError::Unauthorized {
                account: *account,
                required: *required,
            })
        }
    }

    fn create(&mut self, address: Address, data: AccountData) -> Result<()> {
        if self.accounts.contains_key(&address) {
            return Err(TollError::AlreadyInitialized { account: address });
        }
        self.accounts.insert(address, data);
        Ok(())
    }

    fn mint(&self, mint: &Address) -> Result<MintRecord> {
        lookup_mint(&self.accounts, mint)
    }

    fn token_account(&self, account: &Address) -> Result<TokenAccountRecord> {
        lookup_token_account(&self.accounts, account)
    }

    fn token_account_of(&self, account: &Address, mint: &Address) -> Result<TokenAccountRecord> {
        let record = self.token_account(account)?;
        if record.mint != *mint {
            return Err(TollError::mismatch(
                *account,
                format!("token account belongs to mint {}", record.mint),
            ));
        }
        Ok(record)
    }

    fn put_token_account(&mut self, address: Address, record: TokenAccountRecord) {
        self.accounts.insert(address, AccountData::TokenAccount(record));
    }

    fn put_mint(&mut self, address: Address, record: MintRecord) {
        self.accounts.insert(address, AccountData::Mint(record));
    }

    /// Escrows and vaults belong to a FeeConfig or Treasury; only their program moves value into them.
    fn reject_program_owned(&self, destination: &Address) -> Result<()> {
        let owner = self.token_account(destination)?.owner;
        match self.accounts.get(&owner) {
            Some(AccountData::FeeConfig(_)) | Some(AccountData::Treasury(_)) => Err(
                TollError::mismatch(*destination, "account is controlled by a program"),
            ),
            _ => Ok(()),
        }
    }

    fn create_token_account(&mut self, owner: &Address, mint: &Address) -> Result<Address> {
        self.mint(mint)?;
        let account = token_account_address(owner, mint)?;
        self.create(
            account,
            AccountData::TokenAccount(TokenAccountRecord::new(*mint, *owner)),
        )?;
        self.events.push(LedgerEvent::TokenAccountCreated {
            account,
            owner: *owner,
            mint: *mint,
        });
        Ok(account)
    }

    fn ensure_token_account(&mut self, owner: &Address, mint: &Address) -> Result<Address> {
        let account = token_account_address(owner, mint)?;
        if self.accounts.contains_key(&account) {
            self.token_account_of(&account, mint)?;
            Ok(account)
        } else {
            self.create_token_account(owner, mint)
        }
    }

    fn mint_to(&mut self, mint: &Address, destination: &Address, amount: u64) -> Result<()> {
        if amount == 0 {
            return Err(TollError::InvalidAmount {
                amount,
                reason: "mint amount must be positive",
            });
        }
        let mut record = self.mint(mint)?;
        let mut account = self.token_account_of(destination, mint)?;
        record.supply = crate::math::add(record.supply, amount, "mint supply")?;
        account.amount = crate::math::add(account.amount, amount, "token account balance")?;
        self.put_mint(*mint, record);
        self.put_token_account(*destination, account);
        self.events.push(LedgerEvent::Minted {
            mint: *mint,
            destination: *destination,
            amount,
        });
        Ok(())
    }

    fn burn(&mut self, mint: &Address, source: &Address, amount: u64) -> Result<()> {
        let mut record = self.mint(mint)?;
        let mut account = self.token_account_of(source, mint)?;
        if account.amount < amount {
            return Err(TollError::InsufficientFunds {
                account: *source,
                requested: amount,
                available: account.amount,
            });
        }
        account.amount -= amount;
        record.supply = crate::math::sub(record.supply, amount, "mint supply")?;
        self.put_mint(*mint, record);
        self.put_token_account(*source, account);
        self.events.push(LedgerEvent::Burned {
            mint: *mint,
            source: *source,
            amount,
        });
        Ok(())
    }

    /// Move `amount` and retain the mint's transfer fee on the destination.
    /// Returns the withheld portion.
    fn transfer(
        &mut self,
        source: &Address,
        destination: &Address,
        mint: &Address,
        amount: u64,
        extra: ExtraAccounts<'_>,
    ) -> Result<u64> {
        if amount == 0 {
            return Err(TollError::InvalidAmount {
                amount,
                reason: "transfer amount must be positive",
            });
        }
        let record = self.mint(mint)?;
        let mut from = self.token_account_of(source, mint)?;
        self.token_account_of(destination, mint)?;

        if let Some(program) = record.transfer_hook_program {
            if program != programs::fee_program() {
                return Err(TollError::mismatch(*mint, "unknown transfer hook program"));
            }
            self.run_hook(source, destination, mint, amount, extra)?;
        }

        if from.amount < amount {
            return Err(TollError::InsufficientFunds {
                account: *source,
                requested: amount,
                available: from.amount,
            });
        }
        from.amount -= amount;
        self.put_token_account(*source, from);

        let withheld = record.transfer_fee.withheld_for(amount)?;
        let mut to = self.token_account(destination)?;
        to.amount = crate::math::add(to.amount, amount - withheld, "token account balance")?;
        to.withheld_amount = crate::math::add(to.withheld_amount, withheld, "withheld amount")?;
        self.put_token_account(*destination, to);

        debug!(%source, %destination, amount, withheld, "transfer applied");
        self.events.push(LedgerEvent::Transferred {
            source: *source,
            destination: *destination,
            mint: *mint,
            amount,
            withheld,
        });
        Ok(withheld)
    }

    fn run_hook(
        &self,
        source: &Address,
        destination: &Address,
        mint: &Address,
        amount: u64,
        extra: ExtraAccounts<'_>,
    ) -> Result<()> {
        let metas_at = extra_account_metas_address(mint)?;
        let registered = match self.accounts.get(&metas_at) {
            Some(AccountData::ExtraAccountMetas(list)) => list,
            _ => {
                return Err(TollError::mismatch(
                    metas_at,
                    "no extra account metas registered for the mint",
                ))
            }
        };
        let config_at = fee_config_address(mint)?;
        let config = self.fee_config_at(&config_at)?;
        let registered_addresses;
        let supplied = match extra {
            ExtraAccounts::Supplied(list) => list,
            ExtraAccounts::Registered => {
                registered_addresses = registered.addresses();
                registered_addresses.as_slice()
            }
        };
        hook::execute(
            &HookTransfer {
                source: *source,
                destination: *destination,
                mint: *mint,
                amount,
            },
            registered,
            config_at,
            &config,
            supplied,
        )
    }

    fn fee_config_at(&self, at: &Address) -> Result<FeeConfig> {
        match self.accounts.get(at) {
            Some(AccountData::FeeConfig(config)) => Ok(config.clone()),
            Some(other) => Err(TollError::mismatch(
                *at,
                format!("expected FeeConfig, found {}", other.kind()),
            )),
            None => Err(TollError::mismatch(*at, "fee config is not initialized")),
        }
    }

    /// Load the fee config of `mint` and check `authority` administers it and signed.
    fn fee_config_for(&self, mint: &Address, authority: &Address) -> Result<(Address, FeeConfig)> {
        let at = fee_config_address(mint)?;
        let config = self.fee_config_at(&at)?;
        if config.authority != *authority {
            return Err(TollError::Unauthorized {
                account: at,
                required: config.authority,
            });
        }
        self.require_signer(&at, authority)?;
        Ok((at, config))
    }

    fn check_recipients(&self, mint: &Address, recipients: &FeeRecipients) -> Result<()> {
        for category in FeeCategory::ALL {
            let recipient = recipients.get(category);
            self.token_account_of(&recipient, mint).map_err(|err| match err {
                TollError::UnknownAccount { account } => TollError::mismatch(
                    account,
                    format!("{category} recipient token account does not exist"),
                ),
                other => other,
            })?;
        }
        Ok(())
    }

    fn escrow_of(&self, config_at: &Address, config: &FeeConfig) -> Result<TokenAccountRecord> {
        let escrow = self
            .token_account_of(&config.escrow, &config.mint)
            .map_err(|err| match err {
                TollError::UnknownAccount { account } => {
                    TollError::mismatch(account, "fee escrow account does not exist")
                }
                other => other,
            })?;
        if escrow.owner != *config_at {
            return Err(TollError::mismatch(
                config.escrow,
                "fee escrow is not controlled by the fee config",
            ));
        }
        Ok(escrow)
    }

    fn check_escrow_balance(&self, config_at: &Address, config: &FeeConfig) -> Result<()> {
        let escrow = self.escrow_of(config_at, config)?;
        if escrow.amount != config.fee_not_collected {
            return Err(TollError::mismatch(
                config.escrow,
                format!(
                    "escrow holds {} but fee_not_collected is {}",
                    escrow.amount, config.fee_not_collected
                ),
            ));
        }
        config.check_conservation()
    }

    fn initialize_fee_config(
        &mut self,
        mint: &Address,
        authority: &Address,
        rates: &FeeRates,
        recipients: &FeeRecipients,
    ) -> Result<()> {
        let record = self.mint(mint)?;
        match record.mint_authority {
            Some(owner) if owner == *authority => {}
            Some(owner) => {
                return Err(TollError::Unauthorized {
                    account: *mint,
                    required: owner,
                })
            }
            None => return Err(TollError::mismatch(*mint, "mint has no authority")),
        }
        self.require_signer(mint, authority)?;

        let config_at = fee_config_address(mint)?;
        if record.withdraw_withheld_authority != Some(config_at) {
            return Err(TollError::mismatch(
                *mint,
                "withdraw withheld authority is not the fee config",
            ));
        }
        if record.transfer_hook_program != Some(programs::fee_program()) {
            return Err(TollError::mismatch(
                *mint,
                "transfer hook program is not the fee program",
            ));
        }
        rates.validate()?;
        if rates.total() != u32::from(record.transfer_fee.basis_points) {
            return Err(TollError::InvalidFeeConfig(format!(
                "category rates sum to {} but the mint withholds {} basis points",
                rates.total(),
                record.transfer_fee.basis_points
            )));
        }
        self.check_recipients(mint, recipients)?;

        let escrow = fee_escrow_address(mint)?;
        let config = FeeConfig::new(*authority, *mint, escrow, *rates, *recipients)?;
        let metas = ExtraAccountMetaList::for_fee_config(config_at, &config);
        self.create(config_at, AccountData::FeeConfig(config))?;
        self.create(
            escrow,
            AccountData::TokenAccount(TokenAccountRecord::new(*mint, config_at)),
        )?;
        self.create(
            extra_account_metas_address(mint)?,
            AccountData::ExtraAccountMetas(metas),
        )?;
        self.events.push(LedgerEvent::FeeConfigInitialized {
            mint: *mint,
            fee_config: config_at,
            escrow,
            rates: *rates,
        });
        Ok(())
    }

    fn sweep_withheld(
        &mut self,
        mint: &Address,
        authority: &Address,
        sources: &[Address],
    ) -> Result<()> {
        let (config_at, config) = self.fee_config_for(mint, authority)?;
        if self.mint(mint)?.withdraw_withheld_authority != Some(config_at) {
            return Err(TollError::mismatch(
                *mint,
                "withdraw withheld authority is not the fee config",
            ));
        }
        let before = self.escrow_of(&config_at, &config)?.amount;

        let mut swept_accounts = 0;
        for source in sources {
            let mut account = self.token_account_of(source, mint)?;
            let withheld = account.withheld_amount;
            if withheld == 0 {
                continue;
            }
            swept_accounts += 1;
            account.withheld_amount = 0;
            self.put_token_account(*source, account);
            let mut escrow = self.token_account(&config.escrow)?;
            escrow.amount = crate::math::add(escrow.amount, withheld, "escrow balance")?;
            self.put_token_account(config.escrow, escrow);
            debug!(%source, withheld, "withheld fee swept");
        }

        let after = self.escrow_of(&config_at, &config)?.amount;
        let swept_total = crate::math::sub(after, before, "swept total")?;
        let (next, split) = config.credit_collection(swept_total)?;
        self.check_escrow_balance(&config_at, &next)?;
        self.accounts.insert(config_at, AccountData::FeeConfig(next));
        self.events.push(LedgerEvent::FeesSwept {
            mint: *mint,
            accounts: swept_accounts,
            swept_total,
            split,
        });
        Ok(())
    }

    fn claim_fee(
        &mut self,
        mint: &Address,
        authority: &Address,
        category: FeeCategory,
        destination: &Address,
        amount: u64,
    ) -> Result<()> {
        let (config_at, config) = self.fee_config_for(mint, authority)?;
        if amount == 0 {
            return Err(TollError::InvalidAmount {
                amount,
                reason: "claim amount must be positive",
            });
        }
        let next = config.debit_claim(category, amount)?;

        match self.token_account_of(destination, mint) {
            Err(TollError::UnknownAccount { account }) => {
                return Err(TollError::mismatch(
                    account,
                    "recipient token account does not exist",
                ))
            }
            Err(other) => return Err(other),
            Ok(_) => {}
        }
        if category != FeeCategory::Holders && *destination != config.recipient(category) {
            return Err(TollError::mismatch(
                *destination,
                format!("not the registered {category} recipient"),
            ));
        }
        if *destination == config.escrow {
            return Err(TollError::mismatch(*destination, "cannot claim into the escrow"));
        }

        self.transfer(
            &config.escrow,
            destination,
            mint,
            amount,
            ExtraAccounts::Registered,
        )?;
        self.check_escrow_balance(&config_at, &next)?;
        self.accounts.insert(config_at, AccountData::FeeConfig(next));
        self.events.push(LedgerEvent::FeeClaimed {
            mint: *mint,
            category,
            destination: *destination,
            amount,
        });
        Ok(())
    }

    fn treasury(&self, at: &Address) -> Result<Treasury> {
        match self.accounts.get(at) {
            Some(AccountData::Treasury(treasury)) => Ok(treasury.clone()),
            Some(other) => Err(TollError::mismatch(
                *at,
                format!("expected Treasury, found {}", other.kind()),
            )),
            None => Err(TollError::UnknownAccount { account: *at }),
        }
    }

    fn check_peg(&self, at: &Address, treasury: &Treasury) -> Result<()> {
        let vault = self.token_account(&treasury.base_vault)?.amount;
        let supply = self.mint(&treasury.wrapper_mint)?.supply;
        if vault != supply {
            return Err(TollError::mismatch(
                *at,
                format!("peg broken: vault holds {vault}, wrapper supply is {supply}"),
            ));
        }
        Ok(())
    }

    fn create_treasury(&mut self, base_mint: &Address, authority: &Address) -> Result<()> {
        self.require_signer(base_mint, authority)?;
        let base = self.mint(base_mint)?;
        let at = treasury_address(base_mint, authority)?;
        let wrapper_mint = wrapper_mint_address(&at)?;
        let base_vault = treasury_vault_address(&at)?;

        self.create(
            at,
            AccountData::Treasury(Treasury {
                authority: *authority,
                base_mint: *base_mint,
                base_vault,
                wrapper_mint,
            }),
        )?;
        self.create(
            base_vault,
            AccountData::TokenAccount(TokenAccountRecord::new(*base_mint, at)),
        )?;
        self.create(
            wrapper_mint,
            AccountData::Mint(MintRecord {
                decimals: base.decimals,
                supply: 0,
                mint_authority: Some(at),
                transfer_fee: TransferFee::NONE,
                withdraw_withheld_authority: None,
                transfer_hook_program: None,
            }),
        )?;
        self.events.push(LedgerEvent::TreasuryCreated {
            treasury: at,
            base_mint: *base_mint,
            wrapper_mint,
            authority: *authority,
        });
        Ok(())
    }

    fn stake(&mut self, at: &Address, user: &Address, amount: u64) -> Result<()> {
        self.require_signer(at, user)?;
        if amount == 0 {
            return Err(TollError::InvalidAmount {
                amount,
                reason: "stake amount must be positive",
            });
        }
        let treasury = self.treasury(at)?;
        let user_base = token_account_address(user, &treasury.base_mint)?;
        let user_wrapper = self.ensure_token_account(user, &treasury.wrapper_mint)?;

        let before = self.token_account(&treasury.base_vault)?.amount;
        self.transfer(
            &user_base,
            &treasury.base_vault,
            &treasury.base_mint,
            amount,
            ExtraAccounts::Registered,
        )?;
        let received = self.token_account(&treasury.base_vault)?.amount - before;
        if received == 0 {
            return Err(TollError::InvalidAmount {
                amount,
                reason: "stake delivers nothing to the vault after the transfer fee",
            });
        }
        self.mint_to(&treasury.wrapper_mint, &user_wrapper, received)?;
        self.check_peg(at, &treasury)?;
        self.events.push(LedgerEvent::Staked {
            treasury: *at,
            user: *user,
            deposited: amount,
            minted: received,
        });
        Ok(())
    }

    fn redeem(&mut self, at: &Address, user: &Address, amount: u64) -> Result<()> {
        self.require_signer(at, user)?;
        if amount == 0 {
            return Err(TollError::InvalidAmount {
                amount,
                reason: "redeem amount must be positive",
            });
        }
        let treasury = self.treasury(at)?;
        let user_wrapper = token_account_address(user, &treasury.wrapper_mint)?;
        self.burn(&treasury.wrapper_mint, &user_wrapper, amount)?;

        let user_base = self.ensure_token_account(user, &treasury.base_mint)?;
        let before = self.token_account(&user_base)?.amount;
        self.transfer(
            &treasury.base_vault,
            &user_base,
            &treasury.base_mint,
            amount,
            ExtraAccounts::Registered,
        )?;
        let returned = self.token_account(&user_base)?.amount - before;
        self.check_peg(at, &treasury)?;
        self.events.push(LedgerEvent::Redeemed {
            treasury: *at,
            user: *user,
            burned: amount,
            returned,
        });
        Ok(())
    }
}

/// Binds the root to its height; the same account map can recur at a later height.
fn ordering_token_at(height: u64, state_root: &[u8; 32]) -> OrderingToken {
    let mut hasher = Sha256::new();
    hasher.update(height.to_le_bytes());
    hasher.update(state_root);
    OrderingToken(hasher.finalize().into())
}

fn compute_state_root(accounts: &BTreeMap<Address, AccountData>) -> Result<[u8; 32]> {
    let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(accounts.len());
    for (address, data) in accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(address.as_ref());
        hasher.update(data.to_bytes()?);
        leaves.push(hasher.finalize().into());
    }
    Ok(build_merkle(leaves))
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"tollgate-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
