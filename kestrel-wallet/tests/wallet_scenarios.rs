//! End-to-end wallet scenarios: receive and spend, double-spends, reorgs,
//! fee categories, and persistence.

use std::convert::TryFrom;

use kestrel_chain::amount::{Amount, NonNegative, COIN};
use kestrel_chain::block::{self, Header, StoredBlock};
use kestrel_chain::parameters::{genesis_block_header, Network};
use kestrel_chain::transaction::{LockTime, Transaction};
use kestrel_chain::transparent::{Input, OutPoint, Output, Script};
use kestrel_state::ChainEvent;
use kestrel_wallet::{
    BalanceType, BlockMode, Config, ConfidenceKind, Pool, SendRequest, Wallet, WalletError,
    WalletEvent,
};

fn sat(value: i64) -> Amount<NonNegative> {
    Amount::try_from(value).unwrap()
}

fn test_wallet() -> Wallet {
    kestrel_test::init();
    Wallet::new(Network::Regtest, Config::default(), 1_000).unwrap()
}

/// A block header chained on `parent` (the wallet never checks work).
fn block_on(parent: &StoredBlock, salt: u32) -> StoredBlock {
    let header = Header::new(
        1,
        parent.hash(),
        parent.header.merkle_root,
        parent.header.time + chrono::Duration::seconds(600 + salt as i64),
        parent.header.difficulty_threshold,
        salt,
    );
    StoredBlock::child_of(parent, header).unwrap()
}

fn genesis() -> StoredBlock {
    StoredBlock::genesis(genesis_block_header(Network::Regtest)).unwrap()
}

/// A transaction paying `value` to a fresh wallet address, funded by a
/// dummy external outpoint.
fn payment_to(wallet: &mut Wallet, value: i64, salt: u8) -> Transaction {
    let address = wallet.fresh_receive_address().unwrap();
    Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                hash: kestrel_chain::transaction::Hash([salt; 32]),
                index: 0,
            },
            unlock_script: Script(vec![0x51]),
            sequence: u32::MAX,
        }],
        vec![Output {
            value: sat(value),
            lock_script: address.lock_script(),
        }],
        LockTime::unlocked(),
    )
}

/// Connect `block` as the new tip and deliver `txs` from it.
fn connect_block(wallet: &mut Wallet, block: &StoredBlock, txs: &[Transaction]) {
    wallet.notify_new_best_block(block.hash(), block.height);
    for tx in txs {
        wallet
            .receive_from_block(tx.clone(), block.hash(), block.height, BlockMode::BestChain)
            .unwrap();
    }
}

#[test]
fn receive_then_spend_half() {
    let mut wallet = test_wallet();
    let genesis = genesis();
    let b1 = block_on(&genesis, 1);

    // Block B1 pays us 1 BTC.
    let funding = payment_to(&mut wallet, COIN, 0x11);
    connect_block(&mut wallet, &b1, &[funding.clone()]);

    assert_eq!(wallet.balance(BalanceType::Available), sat(COIN));
    assert_eq!(wallet.pool_of(&funding.hash()), Some(Pool::Unspent));
    assert!(wallet.is_consistent());

    // Spend 0.5 BTC at a zero fee rate: 1 input, 2 outputs, no fee.
    let destination = kestrel_chain::transparent::Address::PayToPublicKeyHash {
        network: Network::Regtest,
        pub_key_hash: [0xd0; 20],
    };
    let mut request = SendRequest::to(&destination, sat(COIN / 2));
    request.fee_per_kb = Some(sat(0));
    let spend = wallet.complete_tx(request).unwrap();

    assert_eq!(spend.inputs.len(), 1);
    assert_eq!(spend.outputs.len(), 2);
    let total_out: i64 = spend.outputs.iter().map(|o| o.value.as_sat()).sum();
    assert_eq!(total_out, COIN, "zero fee rate means no fee");

    wallet.commit_tx(spend.clone()).unwrap();
    assert_eq!(wallet.pool_of(&spend.hash()), Some(Pool::Pending));
    // The funding output is claimed now; only pending change remains.
    assert_eq!(wallet.balance(BalanceType::Available), sat(0));
    assert_eq!(wallet.balance(BalanceType::Estimated), sat(COIN / 2));

    // Confirm the spend in B2.
    let b2 = block_on(&b1, 2);
    connect_block(&mut wallet, &b2, &[spend.clone()]);

    assert_eq!(wallet.balance(BalanceType::Available), sat(COIN / 2));
    assert_eq!(wallet.pool_of(&funding.hash()), Some(Pool::Spent));
    assert_eq!(wallet.pool_of(&spend.hash()), Some(Pool::Unspent));
    assert!(wallet.is_consistent());
}

#[test]
fn double_spend_by_block_kills_pending() {
    let mut wallet = test_wallet();
    let genesis = genesis();
    let b1 = block_on(&genesis, 1);

    let funding = payment_to(&mut wallet, COIN, 0x22);
    connect_block(&mut wallet, &b1, &[funding.clone()]);

    // Our pending spend A of the funded output.
    let destination = kestrel_chain::transparent::Address::PayToPublicKeyHash {
        network: Network::Regtest,
        pub_key_hash: [0xd0; 20],
    };
    let mut request = SendRequest::to(&destination, sat(COIN / 4));
    request.fee_per_kb = Some(sat(0));
    let tx_a = wallet.complete_tx(request).unwrap();
    wallet.commit_tx(tx_a.clone()).unwrap();

    // A conflicting transaction B spending the same outpoint, confirmed.
    let spent_outpoint = match &tx_a.inputs[0] {
        Input::PrevOut { outpoint, .. } => *outpoint,
        _ => unreachable!(),
    };
    let tx_b = Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: spent_outpoint,
            unlock_script: Script(vec![0x52]),
            sequence: u32::MAX,
        }],
        vec![Output {
            value: sat(COIN - 1000),
            lock_script: Script(vec![0x53, 0x54]), // not ours
        }],
        LockTime::unlocked(),
    );

    let b2 = block_on(&b1, 2);
    connect_block(&mut wallet, &b2, &[tx_b.clone()]);

    // A is dead, B is the recorded replacement, and the coins are gone.
    assert_eq!(wallet.pool_of(&tx_a.hash()), Some(Pool::Dead));
    match &wallet.confidence(&tx_a.hash()).unwrap().kind {
        ConfidenceKind::Dead { replacement } => {
            assert_eq!(*replacement, Some(tx_b.hash()));
        }
        other => panic!("expected dead confidence, got {:?}", other),
    }
    assert_eq!(wallet.balance(BalanceType::Available), sat(0));
    assert_eq!(wallet.balance(BalanceType::Estimated), sat(0));
    assert!(wallet.is_consistent());
}

#[test]
fn pending_double_spend_is_in_conflict() {
    let mut wallet = test_wallet();
    let genesis = genesis();
    let b1 = block_on(&genesis, 1);

    let funding = payment_to(&mut wallet, COIN, 0x33);
    connect_block(&mut wallet, &b1, &[funding.clone()]);

    let outpoint = OutPoint {
        hash: funding.hash(),
        index: 0,
    };
    let spend = |tag: u8| {
        Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint,
                unlock_script: Script(vec![tag]),
                sequence: u32::MAX,
            }],
            vec![Output {
                value: sat(COIN - 500),
                lock_script: Script(vec![tag, tag]),
            }],
            LockTime::unlocked(),
        )
    };

    assert!(wallet.receive_pending(spend(0x01), None).unwrap());
    assert!(wallet.receive_pending(spend(0x02), None).unwrap());

    let first = spend(0x01).hash();
    let second = spend(0x02).hash();
    assert_eq!(
        wallet.confidence(&first).unwrap().kind,
        ConfidenceKind::Pending
    );
    assert_eq!(
        wallet.confidence(&second).unwrap().kind,
        ConfidenceKind::InConflict
    );
    assert!(wallet.is_consistent());
}

#[test]
fn irrelevant_transactions_are_rejected() {
    let mut wallet = test_wallet();

    let stranger = Transaction::new(
        1,
        vec![Input::PrevOut {
            outpoint: OutPoint {
                hash: kestrel_chain::transaction::Hash([0x77; 32]),
                index: 3,
            },
            unlock_script: Script(vec![0x51]),
            sequence: u32::MAX,
        }],
        vec![Output {
            value: sat(1000),
            lock_script: Script(vec![0x99]),
        }],
        LockTime::unlocked(),
    );

    assert!(!wallet.receive_pending(stranger.clone(), None).unwrap());
    assert_eq!(wallet.transaction_count(), 0);
    assert!(matches!(
        wallet.receive_from_block(
            stranger,
            block::Hash([1; 32]),
            block::Height(1),
            BlockMode::BestChain,
        ),
        Err(WalletError::NotRelevant)
    ));
}

#[test]
fn reorg_moves_transactions_back_to_pending_then_confirms() {
    let mut wallet = test_wallet();
    let genesis = genesis();
    let b1 = block_on(&genesis, 1);
    let b2a = block_on(&b1, 2);

    let tx1 = payment_to(&mut wallet, COIN, 0x44);
    let tx2 = payment_to(&mut wallet, COIN / 2, 0x45);

    connect_block(&mut wallet, &b1, &[tx1.clone()]);
    connect_block(&mut wallet, &b2a, &[tx2.clone()]);
    assert_eq!(
        wallet.balance(BalanceType::Available),
        sat(COIN + COIN / 2)
    );

    // A heavier branch replaces B2a.
    let b2b = block_on(&b1, 20);
    let b3b = block_on(&b2b, 21);
    let event = ChainEvent {
        disconnected: vec![b2a],
        connected: vec![b2b, b3b],
    };
    wallet.reorganize(&event).unwrap();

    // tx2 fell out of the chain.
    assert_eq!(wallet.pool_of(&tx2.hash()), Some(Pool::Pending));
    assert_eq!(
        wallet.confidence(&tx2.hash()).unwrap().kind,
        ConfidenceKind::Pending
    );
    // tx1 stayed confirmed, its depth updated against the new tip.
    assert_eq!(
        wallet.confidence(&tx1.hash()).unwrap().kind,
        ConfidenceKind::Building {
            height: block::Height(1),
            depth: 3
        }
    );
    // Available balance excludes the now-pending tx2...
    assert_eq!(wallet.balance(BalanceType::Available), sat(COIN));
    // ...but estimated still counts it.
    assert_eq!(
        wallet.balance(BalanceType::Estimated),
        sat(COIN + COIN / 2)
    );

    // The new chain confirms tx2 in b2b.
    wallet
        .receive_from_block(tx2.clone(), b2b.hash(), b2b.height, BlockMode::BestChain)
        .unwrap();
    assert_eq!(wallet.pool_of(&tx2.hash()), Some(Pool::Unspent));
    assert_eq!(
        wallet.balance(BalanceType::Available),
        sat(COIN + COIN / 2)
    );
    assert!(wallet.is_consistent());
}

#[test]
fn reorg_is_reversible() {
    let mut wallet = test_wallet();
    let genesis = genesis();
    let b1 = block_on(&genesis, 1);
    let b2a = block_on(&b1, 2);
    let b2b = block_on(&b1, 20);
    let b3b = block_on(&b2b, 21);

    let tx1 = payment_to(&mut wallet, COIN, 0x55);
    let tx2 = payment_to(&mut wallet, COIN / 2, 0x56);
    connect_block(&mut wallet, &b1, &[tx1.clone()]);
    connect_block(&mut wallet, &b2a, &[tx2.clone()]);

    let snapshot = |wallet: &Wallet| {
        (
            wallet.pool_of(&tx1.hash()),
            wallet.pool_of(&tx2.hash()),
            wallet.confidence(&tx1.hash()).unwrap().kind.clone(),
            wallet.confidence(&tx2.hash()).unwrap().kind.clone(),
            wallet.balance(BalanceType::Available),
            wallet.balance(BalanceType::Estimated),
        )
    };
    let before = snapshot(&wallet);

    // Forward: B2a out, B2b+B3b in, tx2 confirmed in B2b.
    wallet
        .reorganize(&ChainEvent {
            disconnected: vec![b2a],
            connected: vec![b2b, b3b],
        })
        .unwrap();
    wallet
        .receive_from_block(tx2.clone(), b2b.hash(), b2b.height, BlockMode::BestChain)
        .unwrap();

    // Inverse: B3b+B2b out, B2a back in; tx2's side-chain record in B2a
    // re-confirms it during the replay.
    wallet
        .reorganize(&ChainEvent {
            disconnected: vec![b3b, b2b],
            connected: vec![b2a],
        })
        .unwrap();

    assert_eq!(snapshot(&wallet), before);
    assert!(wallet.is_consistent());
}

#[test]
fn fee_category_three_with_min_fee() {
    let mut wallet = test_wallet();
    let genesis = genesis();
    let b1 = block_on(&genesis, 1);

    // 100 outputs of 0.001 BTC and one of 1 BTC, all confirmed.
    let mut txs = Vec::new();
    for salt in 0..100u8 {
        txs.push(payment_to(&mut wallet, COIN / 1000, salt));
    }
    txs.push(payment_to(&mut wallet, COIN, 0xFF));
    connect_block(&mut wallet, &b1, &txs);

    // Send 0.99999 BTC: the change would be tiny, so the reference
    // minimum fee kicks in and the solver widens the selection.
    let destination = kestrel_chain::transparent::Address::PayToPublicKeyHash {
        network: Network::Regtest,
        pub_key_hash: [0xd0; 20],
    };
    let request = SendRequest::to(&destination, sat(99_999_000));
    let spend = wallet.complete_tx(request).unwrap();

    assert_eq!(spend.outputs.len(), 2, "payment plus change");
    let in_total: i64 = spend
        .inputs
        .iter()
        .map(|input| match input {
            Input::PrevOut { outpoint, .. } => wallet
                .transaction(&outpoint.hash)
                .unwrap()
                .outputs[outpoint.index as usize]
                .value
                .as_sat(),
            _ => 0,
        })
        .sum();
    let out_total: i64 = spend.outputs.iter().map(|o| o.value.as_sat()).sum();
    let fee = in_total - out_total;
    assert!(
        fee >= kestrel_wallet::fee::REFERENCE_DEFAULT_MIN_TX_FEE,
        "fee {} must include the reference minimum",
        fee
    );
}

#[test]
fn listener_receives_balance_events_in_order() {
    let mut wallet = test_wallet();
    let log = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = log.clone();
    wallet.add_listener(Box::new(move |event| {
        sink.lock().unwrap().push(event.clone());
    }));

    let genesis = genesis();
    let b1 = block_on(&genesis, 1);
    let funding = payment_to(&mut wallet, COIN, 0x66);
    connect_block(&mut wallet, &b1, &[funding.clone()]);

    let events = log.lock().unwrap();
    let received = events.iter().find_map(|event| match event {
        WalletEvent::CoinsReceived {
            txid, new_balance, ..
        } => Some((*txid, *new_balance)),
        _ => None,
    });
    let (txid, new_balance) = received.expect("a coins-received event fired");
    assert_eq!(txid, funding.hash());
    assert_eq!(new_balance.as_sat(), COIN);
}

#[test]
fn balance_future_resolves_on_funding() {
    let mut wallet = test_wallet();
    let genesis = genesis();
    let b1 = block_on(&genesis, 1);

    let future = wallet.balance_future(sat(COIN), BalanceType::Available);
    let funding = payment_to(&mut wallet, COIN, 0x67);
    connect_block(&mut wallet, &b1, &[funding]);

    // The watcher fired during the mutation; the future is ready.
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    rt.block_on(future);
}

#[test]
fn wallet_roundtrips_through_envelope() {
    let mut wallet = test_wallet();
    let genesis = genesis();
    let b1 = block_on(&genesis, 1);
    let funding = payment_to(&mut wallet, COIN, 0x68);
    connect_block(&mut wallet, &b1, &[funding.clone()]);

    let bytes = kestrel_wallet::store::serialize_wallet(&wallet).unwrap();
    let restored =
        kestrel_wallet::store::deserialize_wallet(&bytes, Network::Regtest, Config::default())
            .unwrap();

    assert_eq!(restored.transaction_count(), wallet.transaction_count());
    assert_eq!(
        restored.balance(BalanceType::Available),
        wallet.balance(BalanceType::Available)
    );
    assert_eq!(restored.pool_of(&funding.hash()), Some(Pool::Unspent));
    assert_eq!(restored.last_block_seen(), wallet.last_block_seen());
    assert!(restored.is_consistent());
}

#[test]
fn corrupted_envelope_is_rejected() {
    let wallet = test_wallet();
    let mut bytes = kestrel_wallet::store::serialize_wallet(&wallet).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;

    assert!(matches!(
        kestrel_wallet::store::deserialize_wallet(&bytes, Network::Regtest, Config::default()),
        Err(WalletError::Corrupt(_))
    ));
}

#[test]
fn key_rotation_sweeps_old_coins() {
    kestrel_test::init();

    let mut wallet = Wallet::new(Network::Regtest, Config::default(), 1_000).unwrap();
    let genesis = genesis();
    let b1 = block_on(&genesis, 1);

    // Coins on a key issued before rotation was configured.
    let funding = payment_to(&mut wallet, COIN, 0x69);
    connect_block(&mut wallet, &b1, &[funding.clone()]);

    // Rotate everything created before t=2000 (our keys stamp t=1000).
    wallet.keychain_mut().set_rotation_time(Some(2_000));
    let sweeps = wallet.maybe_rotate_keys().unwrap();

    assert_eq!(sweeps.len(), 1);
    let sweep = &sweeps[0];
    assert_eq!(sweep.inputs.len(), 1);
    assert_eq!(sweep.outputs.len(), 1);
    assert!(sweep.outputs[0].value.as_sat() < COIN, "fee was deducted");
    assert_eq!(
        wallet.pool_of(&sweep.hash()),
        Some(kestrel_wallet::Pool::Pending)
    );

    // Running again sweeps nothing: the coins now sit on a post-rotation
    // key.
    let again = wallet.maybe_rotate_keys().unwrap();
    assert!(again.is_empty());
    assert!(wallet.is_consistent());
}
