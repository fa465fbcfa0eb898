use tollgate_core::address::{
    extra_account_metas_address, fee_config_address, fee_escrow_address, programs,
    token_account_address, Address,
};
use tollgate_core::claim::{claim, claim_holders, PendingClaims};
use tollgate_core::client::{read_record, require_record, LedgerClient, LocalClient, RetryPolicy};
use tollgate_core::collect::{collect, CollectOptions};
use tollgate_core::fee_config::{FeeCategory, FeeConfig, FeeRates, FeeRecipients};
use tollgate_core::hook::ExtraAccountMetaList;
use tollgate_core::holders::{default_exceptions, HolderSnapshot};
use tollgate_core::identity::{Keypair, Signer};
use tollgate_core::operation::Operation;
use tollgate_core::token::{MintRecord, TokenAccountRecord, TransferFee};
use tollgate_core::treasury::{create_treasury, peg_status, redeem, stake};
use tollgate_core::TollError;

const DECIMALS: u8 = 9;

struct World {
    client: LocalClient,
    admin: Keypair,
    mint: Address,
    recipients: FeeRecipients,
}

fn create_mint(client: &mut LocalClient, admin: &Keypair, bps: u16, hooked: bool) -> Address {
    let mint = Keypair::generate();
    let address = mint.address();
    client
        .submit(
            Operation::CreateMint {
                mint: address,
                decimals: DECIMALS,
                mint_authority: admin.address(),
                transfer_fee: TransferFee {
                    basis_points: bps,
                    maximum_fee: u64::MAX,
                },
                withdraw_withheld_authority: hooked.then(|| fee_config_address(&address).unwrap()),
                transfer_hook_program: hooked.then(programs::fee_program),
            },
            &[&mint, admin],
        )
        .unwrap();
    address
}

fn open_account(client: &mut LocalClient, owner: &Keypair, mint: &Address) -> Address {
    client
        .submit(
            Operation::CreateTokenAccount {
                owner: owner.address(),
                mint: *mint,
                payer: owner.address(),
            },
            &[owner],
        )
        .unwrap();
    token_account_address(&owner.address(), mint).unwrap()
}

fn fund(client: &mut LocalClient, admin: &Keypair, mint: &Address, account: &Address, amount: u64) {
    client
        .submit(
            Operation::MintTo {
                mint: *mint,
                destination: *account,
                amount,
            },
            &[admin],
        )
        .unwrap();
}

fn fee_world() -> World {
    let mut client = LocalClient::default();
    let admin = Keypair::generate();
    let mint = create_mint(&mut client, &admin, 1_000, true);
    let recipients = FeeRecipients {
        holders: open_account(&mut client, &Keypair::generate(), &mint),
        marketing: open_account(&mut client, &Keypair::generate(), &mint),
        liquidity: open_account(&mut client, &Keypair::generate(), &mint),
    };
    client
        .submit(
            Operation::InitializeFeeConfig {
                mint,
                authority: admin.address(),
                rates: FeeRates {
                    holders: 500,
                    marketing: 400,
                    liquidity: 100,
                },
                recipients,
            },
            &[&admin],
        )
        .unwrap();
    World {
        client,
        admin,
        mint,
        recipients,
    }
}

impl World {
    fn holder(&mut self, amount: u64) -> (Keypair, Address) {
        let owner = Keypair::generate();
        let account = open_account(&mut self.client, &owner, &self.mint);
        if amount > 0 {
            fund(&mut self.client, &self.admin, &self.mint, &account, amount);
        }
        (owner, account)
    }

    fn extra_accounts(&self) -> Vec<Address> {
        let metas: ExtraAccountMetaList =
            require_record(&self.client, &extra_account_metas_address(&self.mint).unwrap()).unwrap();
        metas.addresses()
    }

    fn transfer(
        &mut self,
        from: &(Keypair, Address),
        to: &Address,
        amount: u64,
    ) -> tollgate_core::Result<()> {
        let extra_accounts = self.extra_accounts();
        self.client
            .submit(
                Operation::Transfer {
                    source: from.1,
                    destination: *to,
                    mint: self.mint,
                    amount,
                    decimals: DECIMALS,
                    extra_accounts,
                },
                &[&from.0],
            )
            .map(|_| ())
    }

    fn fee_config(&self) -> FeeConfig {
        require_record(&self.client, &fee_config_address(&self.mint).unwrap()).unwrap()
    }

    fn account(&self, address: &Address) -> TokenAccountRecord {
        require_record(&self.client, address).unwrap()
    }
}

#[test]
fn stake_and_redeem_scenario_keeps_the_peg() {
    let mut client = LocalClient::default();
    let admin = Keypair::generate();
    let user = Keypair::generate();
    let base = create_mint(&mut client, &admin, 0, false);
    let account = open_account(&mut client, &user, &base);
    fund(&mut client, &admin, &base, &account, 1_000_000_000_000);

    let (treasury, _) = create_treasury(&mut client, &base, &admin, RetryPolicy::default()).unwrap();
    let empty = peg_status(&client, &treasury).unwrap();
    assert_eq!((empty.vault_amount, empty.wrapper_supply), (0, 0));

    stake(&mut client, &treasury, &user, 100_000_000_000, RetryPolicy::default()).unwrap();
    let status = peg_status(&client, &treasury).unwrap();
    assert_eq!(status.vault_amount, 100_000_000_000);
    assert_eq!(status.wrapper_supply, 100_000_000_000);

    redeem(&mut client, &treasury, &user, 10_000_000_000, RetryPolicy::default()).unwrap();
    let status = peg_status(&client, &treasury).unwrap();
    assert_eq!(status.vault_amount, 90_000_000_000);
    assert_eq!(status.wrapper_supply, 90_000_000_000);
    let base_left: TokenAccountRecord = require_record(&client, &account).unwrap();
    assert_eq!(base_left.amount, 910_000_000_000);
}

#[test]
fn staking_the_fee_bearing_asset_mints_what_the_vault_received() {
    let mut world = fee_world();
    let user = world.holder(1_000_000);
    let (treasury, record) =
        create_treasury(&mut world.client, &world.mint, &world.admin, RetryPolicy::default())
            .unwrap();
    stake(&mut world.client, &treasury, &user.0, 1_000_000, RetryPolicy::default()).unwrap();

    let status = peg_status(&world.client, &treasury).unwrap();
    assert_eq!(status.vault_amount, 900_000);
    assert!(status.holds());
    let vault = world.account(&record.base_vault);
    assert_eq!(vault.withheld_amount, 100_000);

    redeem(&mut world.client, &treasury, &user.0, 900_000, RetryPolicy::default()).unwrap();
    assert!(peg_status(&world.client, &treasury).unwrap().holds());
    assert_eq!(peg_status(&world.client, &treasury).unwrap().wrapper_supply, 0);
}

#[test]
fn fee_split_scenario_and_conservation() {
    let mut world = fee_world();
    let alice = world.holder(1_000_000);
    let bob = world.holder(0);
    world.transfer(&alice, &bob.1, 1_000_000).unwrap();
    assert_eq!(world.account(&bob.1).withheld_amount, 100_000);

    let before = world.fee_config();
    let report = collect(
        &mut world.client,
        &world.mint,
        &world.admin,
        CollectOptions::default(),
    )
    .unwrap();
    let after = world.fee_config();

    assert_eq!(report.swept_total, 100_000);
    assert_eq!(after.unclaimed_fee_holders - before.unclaimed_fee_holders, 50_000);
    assert_eq!(after.unclaimed_fee_marketing - before.unclaimed_fee_marketing, 40_000);
    assert_eq!(after.unclaimed_fee_liquidity - before.unclaimed_fee_liquidity, 10_000);
    assert_eq!(after.fee_not_collected - before.fee_not_collected, report.swept_total);
    assert_eq!(world.account(&bob.1).withheld_amount, 0);
    assert_eq!(
        world.account(&fee_escrow_address(&world.mint).unwrap()).amount,
        after.fee_not_collected
    );
}

#[test]
fn over_claim_scenario() {
    let mut world = fee_world();
    let alice = world.holder(1_000_000);
    let bob = world.holder(0);
    world.transfer(&alice, &bob.1, 1_000_000).unwrap();
    collect(&mut world.client, &world.mint, &world.admin, CollectOptions::default()).unwrap();
    assert_eq!(world.fee_config().unclaimed_fee_marketing, 40_000);

    let err = claim(
        &mut world.client,
        &mut PendingClaims::default(),
        &world.admin,
        &world.mint,
        FeeCategory::Marketing,
        40_001,
        RetryPolicy::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), "InsufficientUnclaimedBalance");
    assert_eq!(world.fee_config().unclaimed_fee_marketing, 40_000);

    // the ledger enforces the bound on its own as well
    let err = world
        .client
        .submit(
            Operation::ClaimFee {
                mint: world.mint,
                authority: world.admin.address(),
                category: FeeCategory::Marketing,
                destination: world.recipients.marketing,
                amount: 40_001,
            },
            &[&world.admin],
        )
        .unwrap_err();
    assert!(matches!(err, TollError::InsufficientUnclaimedBalance { .. }));
}

#[test]
fn recipient_rotation_makes_transfers_fail_until_metas_are_synced() {
    let mut world = fee_world();
    let alice = world.holder(1_000);
    let bob = world.holder(0);
    let new_marketing = world.holder(0).1;
    let recipients = FeeRecipients {
        marketing: new_marketing,
        ..world.recipients
    };
    world
        .client
        .submit(
            Operation::SetFeeRecipients {
                mint: world.mint,
                authority: world.admin.address(),
                recipients,
            },
            &[&world.admin],
        )
        .unwrap();

    let err = world.transfer(&alice, &bob.1, 100).unwrap_err();
    assert!(matches!(err, TollError::ConfigMismatch { .. }));
    assert!(!err.is_retryable());
    assert_eq!(world.account(&alice.1).amount, 1_000);

    world
        .client
        .submit(
            Operation::SyncExtraAccountMetas {
                mint: world.mint,
                authority: world.admin.address(),
            },
            &[&world.admin],
        )
        .unwrap();
    assert!(world.extra_accounts().contains(&new_marketing));
    world.transfer(&alice, &bob.1, 100).unwrap();
    assert_eq!(world.account(&bob.1).amount, 90);
}

#[test]
fn transfer_with_wrong_extra_accounts_is_rejected() {
    let mut world = fee_world();
    let alice = world.holder(1_000);
    let bob = world.holder(0);
    let mut extra_accounts = world.extra_accounts();
    extra_accounts.truncate(2);
    let err = world
        .client
        .submit(
            Operation::Transfer {
                source: alice.1,
                destination: bob.1,
                mint: world.mint,
                amount: 10,
                decimals: DECIMALS,
                extra_accounts,
            },
            &[&alice.0],
        )
        .unwrap_err();
    assert!(matches!(err, TollError::ConfigMismatch { .. }));
}

#[test]
fn fee_config_is_created_once() {
    let mut world = fee_world();
    let err = world
        .client
        .submit(
            Operation::InitializeFeeConfig {
                mint: world.mint,
                authority: world.admin.address(),
                rates: FeeRates {
                    holders: 500,
                    marketing: 400,
                    liquidity: 100,
                },
                recipients: world.recipients,
            },
            &[&world.admin],
        )
        .unwrap_err();
    assert!(matches!(err, TollError::AlreadyInitialized { .. }));
}

#[test]
fn fee_rates_must_match_the_mint_fee() {
    let mut client = LocalClient::default();
    let admin = Keypair::generate();
    let mint = create_mint(&mut client, &admin, 1_000, true);
    let recipient = open_account(&mut client, &Keypair::generate(), &mint);
    let err = client
        .submit(
            Operation::InitializeFeeConfig {
                mint,
                authority: admin.address(),
                rates: FeeRates {
                    holders: 500,
                    marketing: 400,
                    liquidity: 200,
                },
                recipients: FeeRecipients {
                    holders: recipient,
                    marketing: recipient,
                    liquidity: recipient,
                },
            },
            &[&admin],
        )
        .unwrap_err();
    assert!(matches!(err, TollError::InvalidFeeConfig(_)));
}

#[test]
fn holder_payouts_drain_the_holders_pool_pro_rata() {
    let mut world = fee_world();
    let a = world.holder(3_000_000);
    let b = world.holder(1_000_000);
    let sink = world.holder(0);
    world.transfer(&a, &sink.1, 1_000_000).unwrap();
    world.transfer(&b, &sink.1, 1_000_000).unwrap();
    collect(&mut world.client, &world.mint, &world.admin, CollectOptions::default()).unwrap();
    let config = world.fee_config();
    assert_eq!(config.unclaimed_fee_holders, 100_000);

    let mut exceptions = default_exceptions(&fee_config_address(&world.mint).unwrap(), &config);
    exceptions.insert(sink.0.address());
    let snapshot = HolderSnapshot::capture(&world.client, &world.mint, &exceptions).unwrap();
    // a: 2_000_000, b: 0
    assert_eq!(snapshot.total_eligible_supply, 2_000_000);

    let report = claim_holders(
        &mut world.client,
        &mut PendingClaims::default(),
        &world.admin,
        &snapshot,
        RetryPolicy::default(),
    )
    .unwrap();
    assert_eq!(report.paid.len(), 1);
    assert_eq!(report.paid[0].token_account, a.1);
    assert_eq!(report.total_paid(), 100_000);
    assert_eq!(report.skipped, vec![b.1]);
    assert_eq!(world.fee_config().unclaimed_fee_holders, 0);
    world.fee_config().check_conservation().unwrap();
}

#[test]
fn read_account_returns_fixed_layout_records() {
    let world = fee_world();
    let bytes = world.client.read_account(&world.mint).unwrap().unwrap();
    assert_eq!(&bytes[..8], &<MintRecord as tollgate_core::records::Record>::discriminator()[..]);
    let mint: MintRecord = read_record(&world.client, &world.mint).unwrap().unwrap();
    assert_eq!(mint.decimals, DECIMALS);
    assert!(read_record::<FeeConfig>(&world.client, &world.mint).is_err());
    assert!(world
        .client
        .read_account(&Address::from_label("nobody"))
        .unwrap()
        .is_none());
}

#[test]
fn malformed_addresses_fail_fast() {
    for input in ["", "0OIl", "not base58!", "1111"] {
        let err = input.parse::<Address>().unwrap_err();
        assert_eq!(err.kind(), "MalformedAddress", "{input}");
    }
}
