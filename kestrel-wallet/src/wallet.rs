//! The wallet core: keys, relevant transactions, and the state machine
//! that moves them between pools as blocks arrive, reorganize, and
//! conflict.
//!
//! Every wallet-known transaction sits in exactly one of four pools:
//!
//! - `Unspent`: confirmed, and at least one of its wallet outputs is
//!   unspent;
//! - `Spent`: confirmed, all wallet outputs consumed by other confirmed
//!   transactions;
//! - `Pending`: unconfirmed but relevant;
//! - `Dead`: overridden by a double-spend on the best chain.
//!
//! The wallet is the canonical owner of its transactions; everything else
//! (peers, the store) holds ids. All mutation is synchronous and
//! single-threaded per the node's executor model; listeners run after the
//! mutation commits.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::net::SocketAddr;

use indexmap::IndexMap;
use tracing::{debug, info, trace, warn};

use kestrel_chain::amount::{Amount, NonNegative};
use kestrel_chain::parameters::Network;
use kestrel_chain::transaction::{self, LockTime, SighashType, Transaction};
use kestrel_chain::transparent::{Address, Input, OutPoint, Output, Script};
use kestrel_chain::block;
use kestrel_state::ChainEvent;

use crate::coin_selection::{self, Candidate, SendRequest, Solution};
use crate::confidence::{ConfidenceKind, Source, TxConfidence};
use crate::events::{EventQueue, Listener, WalletEvent};
use crate::fee;
use crate::keychain::{KeyChain, KeyPurpose};
use crate::WalletError;

/// Wallet behavior configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Default fee rate for payments that don't specify one.
    pub fee_per_kb: Amount<NonNegative>,
    /// Whether coin selection may spend unconfirmed outputs by default.
    pub allow_unconfirmed: bool,
    /// Keys created before this time are rotated out.
    pub key_rotation_time: Option<u32>,
    /// Maximum inputs per rotation sweep transaction.
    pub rotation_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fee_per_kb: Amount::try_from(fee::DEFAULT_FEE_PER_KB).expect("constant in range"),
            allow_unconfirmed: false,
            key_rotation_time: None,
            rotation_batch_size: 200,
        }
    }
}

/// The four disjoint transaction pools.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pool {
    /// Confirmed with spendable wallet outputs.
    Unspent,
    /// Confirmed, fully consumed.
    Spent,
    /// Unconfirmed.
    Pending,
    /// Overridden by a double-spend.
    Dead,
}

impl Pool {
    /// The on-disk tag.
    pub fn tag(self) -> u8 {
        match self {
            Pool::Unspent => 1,
            Pool::Spent => 2,
            Pool::Pending => 4,
            Pool::Dead => 8,
        }
    }

    /// Parse an on-disk tag.
    pub fn from_tag(tag: u8) -> Option<Pool> {
        match tag {
            1 => Some(Pool::Unspent),
            2 => Some(Pool::Spent),
            4 => Some(Pool::Pending),
            8 => Some(Pool::Dead),
            _ => None,
        }
    }
}

/// Why a transaction exists in the wallet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxPurpose {
    /// A normal payment, ours or someone else's.
    UserPayment,
    /// A key-rotation sweep built by this wallet.
    KeyRotation,
    /// Loaded from disk without purpose metadata.
    Unknown,
}

/// How a block delivers a transaction to the wallet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockMode {
    /// The block is on the best chain.
    BestChain,
    /// The block is on a side chain; remember but do not apply.
    SideChain,
}

/// Which balance to compute.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BalanceType {
    /// Confirmed, spendable now.
    Available,
    /// Including pending incoming coins.
    Estimated,
}

/// A wallet-known transaction and its bookkeeping.
#[derive(Clone, Debug)]
pub(crate) struct WalletTx {
    pub transaction: Transaction,
    pub pool: Pool,
    pub confidence: TxConfidence,
    /// The best-chain block containing this transaction, if confirmed.
    pub appeared_in: Option<(block::Hash, block::Height)>,
    /// Side-chain blocks this transaction has been seen in; a reorg can
    /// promote one of these.
    pub side_chain_blocks: Vec<block::Hash>,
    pub purpose: TxPurpose,
}

/// The wallet.
pub struct Wallet {
    keychain: KeyChain,
    config: Config,
    /// The canonical transaction arena, keyed by txid. Insertion order is
    /// preserved, which keeps saves deterministic.
    txs: IndexMap<transaction::Hash, WalletTx>,
    /// Which transaction spends each claimed outpoint. Only transactions
    /// in Pending ∪ Unspent ∪ Spent hold claims; Dead ones do not.
    spent_by: HashMap<OutPoint, transaction::Hash>,
    /// The best-chain block the wallet has processed up to.
    last_block: Option<(block::Hash, block::Height)>,
    events: EventQueue,
    balance_watchers: Vec<BalanceWatcher>,
    read_only: bool,
}

struct BalanceWatcher {
    amount: Amount<NonNegative>,
    balance_type: BalanceType,
    sender: tokio::sync::oneshot::Sender<()>,
}

impl Wallet {
    /// Create a wallet with a freshly generated key chain.
    pub fn new(network: Network, config: Config, creation_time: u32) -> Result<Wallet, WalletError> {
        let keychain = KeyChain::generate(network, creation_time)?;
        Ok(Wallet::from_keychain(keychain, config))
    }

    /// Create a wallet around an existing key chain.
    pub fn from_keychain(mut keychain: KeyChain, config: Config) -> Wallet {
        keychain.set_rotation_time(config.key_rotation_time);
        Wallet {
            keychain,
            config,
            txs: IndexMap::new(),
            spent_by: HashMap::new(),
            last_block: None,
            events: EventQueue::default(),
            balance_watchers: Vec::new(),
            read_only: false,
        }
    }

    /// The wallet's network.
    pub fn network(&self) -> Network {
        self.keychain.network()
    }

    /// The key chain.
    pub fn keychain(&self) -> &KeyChain {
        &self.keychain
    }

    /// Mutable key chain access (encryption, rotation configuration).
    pub fn keychain_mut(&mut self) -> &mut KeyChain {
        &mut self.keychain
    }

    /// The wallet configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The last best-chain block the wallet processed.
    pub fn last_block_seen(&self) -> Option<(block::Hash, block::Height)> {
        self.last_block
    }

    /// Set the sync position (load path and block processing).
    pub fn set_last_block_seen(&mut self, block: Option<(block::Hash, block::Height)>) {
        self.last_block = block;
    }

    /// Whether repeated save failures froze the wallet.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn set_read_only(&mut self) {
        self.read_only = true;
        self.events.fire(WalletEvent::WalletChanged);
        self.events.dispatch();
    }

    /// Register a listener for wallet events.
    pub fn add_listener(&mut self, listener: Listener) {
        self.events.add_listener(listener);
    }

    /// A fresh receive address.
    pub fn fresh_receive_address(&mut self) -> Result<Address, WalletError> {
        let address = self.keychain.fresh_receive_address()?;
        self.events.fire(WalletEvent::WalletChanged);
        self.events.dispatch();
        Ok(address)
    }

    // ---- queries ------------------------------------------------------

    /// The number of transactions in `pool`.
    pub fn pool_size(&self, pool: Pool) -> usize {
        self.txs.values().filter(|tx| tx.pool == pool).count()
    }

    /// Total number of wallet-known transactions.
    pub fn transaction_count(&self) -> usize {
        self.txs.len()
    }

    /// The pool a transaction currently sits in.
    pub fn pool_of(&self, txid: &transaction::Hash) -> Option<Pool> {
        self.txs.get(txid).map(|tx| tx.pool)
    }

    /// A transaction's confidence.
    pub fn confidence(&self, txid: &transaction::Hash) -> Option<&TxConfidence> {
        self.txs.get(txid).map(|tx| &tx.confidence)
    }

    /// A transaction's stored copy.
    pub fn transaction(&self, txid: &transaction::Hash) -> Option<&Transaction> {
        self.txs.get(txid).map(|tx| &tx.transaction)
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&transaction::Hash, &WalletTx)> {
        self.txs.iter()
    }

    /// The wallet-paying outputs of `tx`, as (index, value) pairs.
    fn my_outputs<'t>(&self, tx: &'t Transaction) -> Vec<(u32, &'t Output)> {
        tx.outputs
            .iter()
            .enumerate()
            .filter(|(_, output)| self.keychain.is_mine(&output.lock_script))
            .map(|(index, output)| (index as u32, output))
            .collect()
    }

    /// Whether `tx` pays us, spends us, or connects to something we know.
    pub fn is_relevant(&self, tx: &Transaction) -> bool {
        if !self.my_outputs(tx).is_empty() {
            return true;
        }
        for outpoint in tx.spent_outpoints() {
            // Spends one of our outputs, or double-spends something a known
            // transaction also claims.
            if self.output_is_mine(&outpoint) || self.spent_by.contains_key(&outpoint) {
                return true;
            }
            if self.txs.contains_key(&outpoint.hash) {
                return true;
            }
        }
        false
    }

    fn output_is_mine(&self, outpoint: &OutPoint) -> bool {
        self.txs
            .get(&outpoint.hash)
            .and_then(|entry| entry.transaction.outputs.get(outpoint.index as usize))
            .map(|output| self.keychain.is_mine(&output.lock_script))
            .unwrap_or(false)
    }

    /// The balance of `balance_type`.
    pub fn balance(&self, balance_type: BalanceType) -> Amount<NonNegative> {
        let mut total: i64 = 0;
        for (txid, entry) in self.txs.iter() {
            let counted = match (balance_type, entry.pool) {
                (_, Pool::Unspent) | (_, Pool::Spent) => true,
                (BalanceType::Estimated, Pool::Pending) => {
                    !matches!(entry.confidence.kind, ConfidenceKind::InConflict)
                }
                _ => false,
            };
            if !counted {
                continue;
            }
            for (index, output) in self.my_outputs(&entry.transaction) {
                let outpoint = OutPoint {
                    hash: *txid,
                    index,
                };
                if !self.spent_by.contains_key(&outpoint) {
                    total += output.value.as_sat();
                }
            }
        }
        Amount::try_from(total).expect("sum of valid outputs is in range")
    }

    /// A future resolving once `balance_type` reaches `amount`.
    pub fn balance_future(
        &mut self,
        amount: Amount<NonNegative>,
        balance_type: BalanceType,
    ) -> impl std::future::Future<Output = ()> {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        if self.balance(balance_type) >= amount {
            let _ = sender.send(());
        } else {
            self.balance_watchers.push(BalanceWatcher {
                amount,
                balance_type,
                sender,
            });
        }
        async move {
            // A dropped wallet cancels the watch; either way the wait ends.
            let _ = receiver.await;
        }
    }

    fn check_balance_watchers(&mut self) {
        let available = self.balance(BalanceType::Available);
        let estimated = self.balance(BalanceType::Estimated);
        let mut index = 0;
        while index < self.balance_watchers.len() {
            let satisfied = match self.balance_watchers[index].balance_type {
                BalanceType::Available => available >= self.balance_watchers[index].amount,
                BalanceType::Estimated => estimated >= self.balance_watchers[index].amount,
            };
            if satisfied {
                let watcher = self.balance_watchers.swap_remove(index);
                let _ = watcher.sender.send(());
            } else {
                index += 1;
            }
        }
    }

    /// Everything the bloom filter must match for this wallet.
    pub fn filter_elements(&self) -> Vec<Vec<u8>> {
        let mut elements = self.keychain.filter_elements();
        // Watch our unspent outpoints too, so spends of them match even
        // when the spender pays a foreign script.
        for (txid, entry) in self.txs.iter() {
            if entry.pool != Pool::Unspent {
                continue;
            }
            for (index, _) in self.my_outputs(&entry.transaction) {
                let outpoint = OutPoint {
                    hash: *txid,
                    index,
                };
                let mut bytes = Vec::with_capacity(36);
                kestrel_chain::BitcoinSerialize::bitcoin_serialize(&outpoint, &mut bytes)
                    .expect("serializing to a vec never fails");
                elements.push(bytes);
            }
        }
        elements
    }

    // ---- incoming transactions ---------------------------------------

    /// Handle an unconfirmed transaction from the network.
    ///
    /// Returns `false` (without storing anything) when the transaction is
    /// irrelevant to this wallet.
    pub fn receive_pending(
        &mut self,
        tx: Transaction,
        seen_from: Option<SocketAddr>,
    ) -> Result<bool, WalletError> {
        let txid = tx.hash();

        if let Some(entry) = self.txs.get_mut(&txid) {
            if let Some(peer) = seen_from {
                entry.confidence.mark_seen_by(peer);
            }
            return Ok(true);
        }
        if !self.is_relevant(&tx) {
            return Ok(false);
        }

        let prev_available = self.balance(BalanceType::Available);
        let prev_estimated = self.balance(BalanceType::Estimated);

        // Does it double-spend anything we know?
        let mut conflict_winner: Option<transaction::Hash> = None;
        let mut conflicts_with_pending = false;
        for outpoint in tx.spent_outpoints() {
            if let Some(existing) = self.spent_by.get(&outpoint).copied() {
                if existing == txid {
                    continue;
                }
                match self.txs.get(&existing).map(|entry| entry.pool) {
                    Some(Pool::Unspent) | Some(Pool::Spent) => {
                        conflict_winner = Some(existing);
                    }
                    _ => conflicts_with_pending = true,
                }
            }
        }

        let mut confidence = TxConfidence::new(Source::NetworkBroadcast);
        if let Some(peer) = seen_from {
            confidence.mark_seen_by(peer);
        }

        let (pool, kind) = if let Some(winner) = conflict_winner {
            // Already outspent by a confirmed transaction: dead on arrival.
            (
                Pool::Dead,
                ConfidenceKind::Dead {
                    replacement: Some(winner),
                },
            )
        } else if conflicts_with_pending {
            // First-seen stays pending; later arrivals are in conflict.
            (Pool::Pending, ConfidenceKind::InConflict)
        } else {
            (Pool::Pending, ConfidenceKind::Pending)
        };
        confidence.kind = kind;

        debug!(%txid, ?pool, "received pending transaction");
        self.txs.insert(
            txid,
            WalletTx {
                transaction: tx,
                pool,
                confidence,
                appeared_in: None,
                side_chain_blocks: Vec::new(),
                purpose: TxPurpose::UserPayment,
            },
        );
        if pool == Pool::Pending && !conflicts_with_pending {
            self.insert_claims(&txid);
        }

        self.fire_balance_events(&txid, prev_available, prev_estimated);
        self.events.fire(WalletEvent::ConfidenceChanged { txid });
        self.finish_mutation();
        Ok(true)
    }

    /// Handle a transaction found in a block.
    pub fn receive_from_block(
        &mut self,
        tx: Transaction,
        block_hash: block::Hash,
        height: block::Height,
        mode: BlockMode,
    ) -> Result<(), WalletError> {
        let txid = tx.hash();
        if !self.txs.contains_key(&txid) && !self.is_relevant(&tx) {
            return Err(WalletError::NotRelevant);
        }

        match mode {
            BlockMode::SideChain => {
                // Remember the appearance; a reorg may promote it later.
                let entry = self.txs.entry(txid).or_insert_with(|| WalletTx {
                    transaction: tx,
                    pool: Pool::Pending,
                    confidence: TxConfidence::new(Source::NetworkBroadcast),
                    appeared_in: None,
                    side_chain_blocks: Vec::new(),
                    purpose: TxPurpose::UserPayment,
                });
                if !entry.side_chain_blocks.contains(&block_hash) {
                    entry.side_chain_blocks.push(block_hash);
                }
                trace!(%txid, %block_hash, "recorded side-chain appearance");
                Ok(())
            }
            BlockMode::BestChain => {
                let prev_available = self.balance(BalanceType::Available);
                let prev_estimated = self.balance(BalanceType::Estimated);

                self.apply_confirmed(tx, txid, block_hash, height);

                self.fire_balance_events(&txid, prev_available, prev_estimated);
                self.events.fire(WalletEvent::ConfidenceChanged { txid });
                self.finish_mutation();
                Ok(())
            }
        }
    }

    /// Core of best-chain application, shared with reorg replay.
    fn apply_confirmed(
        &mut self,
        tx: Transaction,
        txid: transaction::Hash,
        block_hash: block::Hash,
        height: block::Height,
    ) {
        // A confirmed transaction wins every double-spend it participates
        // in.
        let losers: Vec<transaction::Hash> = tx
            .spent_outpoints()
            .filter_map(|outpoint| self.spent_by.get(&outpoint).copied())
            .filter(|other| *other != txid)
            .collect();
        for loser in losers {
            self.mark_dead(loser, Some(txid));
        }

        let depth = self
            .last_block
            .map(|(_, tip)| tip.0.saturating_sub(height.0) + 1)
            .unwrap_or(1)
            .max(1);

        let entry = self.txs.entry(txid).or_insert_with(|| WalletTx {
            transaction: tx,
            pool: Pool::Pending,
            confidence: TxConfidence::new(Source::NetworkBroadcast),
            appeared_in: None,
            side_chain_blocks: Vec::new(),
            purpose: TxPurpose::UserPayment,
        });
        entry.appeared_in = Some((block_hash, height));
        entry.side_chain_blocks.retain(|hash| *hash != block_hash);
        entry.confidence.kind = ConfidenceKind::Building { height, depth };
        // Pool placement settled below, after claims update.
        entry.pool = Pool::Unspent;

        self.insert_claims(&txid);

        // Placement: the new transaction itself, then every confirmed
        // ancestor whose outputs it just consumed.
        self.reconsider_confirmed_pool(&txid);
        let parents: Vec<transaction::Hash> = self
            .txs
            .get(&txid)
            .expect("just inserted")
            .transaction
            .spent_outpoints()
            .map(|outpoint| outpoint.hash)
            .collect();
        for parent in parents {
            self.reconsider_confirmed_pool(&parent);
        }

        info!(%txid, height = height.0, "transaction confirmed");
    }

    /// Place a confirmed transaction in Unspent or Spent by its outputs.
    fn reconsider_confirmed_pool(&mut self, txid: &transaction::Hash) {
        let entry = match self.txs.get(txid) {
            Some(entry) => entry,
            None => return,
        };
        if !matches!(entry.pool, Pool::Unspent | Pool::Spent) {
            return;
        }
        let has_unspent = self
            .my_outputs(&entry.transaction)
            .into_iter()
            .any(|(index, _)| {
                !self.spent_by.contains_key(&OutPoint {
                    hash: *txid,
                    index,
                })
            });
        let target = if has_unspent { Pool::Unspent } else { Pool::Spent };
        let entry = self.txs.get_mut(txid).expect("checked above");
        if entry.pool != target {
            trace!(%txid, from = ?entry.pool, to = ?target, "pool move");
            entry.pool = target;
        }
    }

    /// Claim the inputs of `txid` in the spent-by index.
    fn insert_claims(&mut self, txid: &transaction::Hash) {
        let outpoints: Vec<OutPoint> = self
            .txs
            .get(txid)
            .expect("claims for known tx")
            .transaction
            .spent_outpoints()
            .collect();
        for outpoint in outpoints {
            self.spent_by.insert(outpoint, *txid);
        }
    }

    /// Release the input claims of `txid`.
    fn release_claims(&mut self, txid: &transaction::Hash) {
        self.spent_by.retain(|_, claimant| claimant != txid);
    }

    /// Move `txid` and every descendant to the Dead pool.
    fn mark_dead(&mut self, txid: transaction::Hash, replacement: Option<transaction::Hash>) {
        let entry = match self.txs.get_mut(&txid) {
            Some(entry) => entry,
            None => return,
        };
        if entry.pool == Pool::Dead {
            return;
        }
        warn!(%txid, ?replacement, "transaction overridden by double-spend");
        entry.pool = Pool::Dead;
        entry.confidence.kind = ConfidenceKind::Dead { replacement };
        entry.appeared_in = None;
        self.release_claims(&txid);
        self.events.fire(WalletEvent::ConfidenceChanged { txid });

        // Anything spending a dead transaction's outputs is dead too.
        let descendants: Vec<transaction::Hash> = self
            .txs
            .iter()
            .filter(|(_, candidate)| {
                candidate.pool != Pool::Dead
                    && candidate
                        .transaction
                        .spent_outpoints()
                        .any(|outpoint| outpoint.hash == txid)
            })
            .map(|(descendant, _)| *descendant)
            .collect();
        for descendant in descendants {
            self.mark_dead(descendant, replacement);
        }
    }

    /// Record a peer announcing `txid` (broadcast confirmation signal).
    pub fn mark_seen_by(&mut self, txid: &transaction::Hash, peer: SocketAddr) {
        if let Some(entry) = self.txs.get_mut(txid) {
            if entry.confidence.mark_seen_by(peer) {
                self.events.fire(WalletEvent::ConfidenceChanged { txid: *txid });
                self.finish_mutation();
            }
        }
    }

    /// Process a new best-chain tip that contains none of our
    /// transactions: bump depths.
    pub fn notify_new_best_block(&mut self, hash: block::Hash, height: block::Height) {
        self.last_block = Some((hash, height));
        let mut changed = Vec::new();
        for (txid, entry) in self.txs.iter_mut() {
            if let ConfidenceKind::Building {
                height: tx_height,
                depth,
            } = &mut entry.confidence.kind
            {
                let new_depth = height.0.saturating_sub(tx_height.0) + 1;
                if *depth != new_depth {
                    *depth = new_depth;
                    changed.push(*txid);
                }
            }
        }
        for txid in changed {
            self.events.fire(WalletEvent::ConfidenceChanged { txid });
        }
        self.finish_mutation();
    }

    // ---- reorganization ----------------------------------------------

    /// Apply a best-chain change from the chain store.
    ///
    /// Disconnected blocks are processed newest-first, returning their
    /// transactions to Pending; connected blocks oldest-first, re-applying
    /// any of their transactions we know (from side-chain records or the
    /// pending pool). Pending transactions left double-spent by the new
    /// chain die.
    pub fn reorganize(&mut self, event: &ChainEvent) -> Result<(), WalletError> {
        if event.disconnected.is_empty() {
            // Plain extension: handled by the per-block path.
            if let Some(tip) = event.connected.last() {
                self.notify_new_best_block(tip.hash(), tip.height);
            }
            return Ok(());
        }

        info!(
            disconnected = event.disconnected.len(),
            connected = event.connected.len(),
            "applying reorganization to wallet"
        );

        // 1. Disconnect, newest first.
        for stored in event.disconnected.iter() {
            let block_hash = stored.hash();
            let affected: Vec<transaction::Hash> = self
                .txs
                .iter()
                .filter(|(_, entry)| {
                    entry
                        .appeared_in
                        .map(|(hash, _)| hash == block_hash)
                        .unwrap_or(false)
                })
                .map(|(txid, _)| *txid)
                .collect();

            for txid in affected {
                let entry = self.txs.get_mut(&txid).expect("listed above");
                entry.pool = Pool::Pending;
                entry.confidence.kind = ConfidenceKind::Pending;
                entry.appeared_in = None;
                // The old block is a side chain now.
                if !entry.side_chain_blocks.contains(&block_hash) {
                    entry.side_chain_blocks.push(block_hash);
                }
                // Its claims stay: a pending transaction still spends its
                // inputs until something else wins them.
                self.events.fire(WalletEvent::ConfidenceChanged { txid });
            }
        }

        // 2. Connect, oldest first.
        for stored in event.connected.iter() {
            let block_hash = stored.hash();
            let height = stored.height;
            self.last_block = Some((block_hash, height));

            let known_in_block: Vec<transaction::Hash> = self
                .txs
                .iter()
                .filter(|(_, entry)| entry.side_chain_blocks.contains(&block_hash))
                .map(|(txid, _)| *txid)
                .collect();

            for txid in known_in_block {
                let tx = self.txs.get(&txid).expect("listed above").transaction.clone();
                self.apply_confirmed(tx, txid, block_hash, height);
            }
        }

        // 3. Depths against the new tip, and death for pending
        // transactions the new chain outspent.
        if let Some(tip) = event.connected.last() {
            self.notify_new_best_block(tip.hash(), tip.height);
        }
        let doomed: Vec<(transaction::Hash, Option<transaction::Hash>)> = self
            .txs
            .iter()
            .filter(|(_, entry)| entry.pool == Pool::Pending)
            .filter_map(|(txid, entry)| {
                for outpoint in entry.transaction.spent_outpoints() {
                    if let Some(winner) = self.spent_by.get(&outpoint) {
                        if winner != txid {
                            let winner_confirmed = self
                                .txs
                                .get(winner)
                                .map(|w| matches!(w.pool, Pool::Unspent | Pool::Spent))
                                .unwrap_or(false);
                            if winner_confirmed {
                                return Some((*txid, Some(*winner)));
                            }
                        }
                    }
                }
                None
            })
            .collect();
        for (txid, winner) in doomed {
            self.mark_dead(txid, winner);
        }

        self.events.fire(WalletEvent::Reorganized);
        self.finish_mutation();
        Ok(())
    }

    // ---- payments -----------------------------------------------------

    /// The outputs coin selection may spend.
    pub fn spendable_candidates(&self, allow_unconfirmed: bool) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (txid, entry) in self.txs.iter() {
            let eligible = match entry.pool {
                Pool::Unspent => true,
                Pool::Pending => {
                    allow_unconfirmed
                        && matches!(entry.confidence.kind, ConfidenceKind::Pending)
                }
                _ => false,
            };
            if !eligible {
                continue;
            }
            for (index, output) in self.my_outputs(&entry.transaction) {
                let outpoint = OutPoint {
                    hash: *txid,
                    index,
                };
                if self.spent_by.contains_key(&outpoint) {
                    continue;
                }
                candidates.push(Candidate {
                    outpoint,
                    value: output.value,
                    depth: entry.confidence.depth(),
                    lock_script: output.lock_script.clone(),
                });
            }
        }
        candidates
    }

    /// Fund, build, and sign a payment.
    ///
    /// The returned transaction is not yet committed to the wallet: call
    /// [`Wallet::commit_tx`] once it has been handed to the broadcaster.
    pub fn complete_tx(&mut self, mut request: SendRequest) -> Result<Transaction, WalletError> {
        if self.read_only {
            return Err(WalletError::ReadOnly);
        }
        if request.fee_per_kb.is_none() {
            request.fee_per_kb = Some(self.config.fee_per_kb);
        }
        let allow_unconfirmed = request.allow_unconfirmed || self.config.allow_unconfirmed;
        request.allow_unconfirmed = allow_unconfirmed;

        let candidates = self.spendable_candidates(allow_unconfirmed);
        let solution = coin_selection::solve(candidates, &request)?;

        let change_script = match solution.change {
            Some(_) => Some(match &request.change_address {
                Some(address) => address.lock_script(),
                None => self.keychain.fresh_change_address()?.lock_script(),
            }),
            None => None,
        };

        let tx = self.build_and_sign(&request, &solution, change_script)?;

        if !transaction::is_standard_size(&tx) {
            return Err(WalletError::ExceedsMaxSize);
        }
        Ok(tx)
    }

    fn build_and_sign(
        &self,
        request: &SendRequest,
        solution: &Solution,
        change_script: Option<Script>,
    ) -> Result<Transaction, WalletError> {
        let mut outputs = request.outputs.clone();
        if let (Some(change), Some(script)) = (solution.change, change_script) {
            outputs.push(Output {
                value: change,
                lock_script: script,
            });
        }

        let inputs: Vec<Input> = solution
            .selected
            .iter()
            .map(|candidate| Input::PrevOut {
                outpoint: candidate.outpoint,
                unlock_script: Script(Vec::new()),
                sequence: u32::MAX,
            })
            .collect();

        let mut tx = Transaction::new(1, inputs, outputs, LockTime::unlocked());

        // Sign every input with its key, then check our own work with the
        // script engine before letting the transaction out.
        for (index, candidate) in solution.selected.iter().enumerate() {
            let issued = self
                .keychain
                .find_key_for_script(&candidate.lock_script)
                .ok_or(WalletError::NotRelevant)?;
            let key = issued.key.key();

            let sighash = tx.sighash(index, &candidate.lock_script, SighashType::ALL);
            let mut signature = key.sign(&sighash)?;
            signature.push(SighashType::ALL.0 as u8);

            let unlock_script = kestrel_script::template::unlock_pay_to_pub_key_hash(
                &signature,
                &key.serialize_public(),
            );
            match &mut tx.inputs[index] {
                Input::PrevOut { unlock_script: slot, .. } => *slot = unlock_script,
                Input::Coinbase { .. } => unreachable!("wallet never spends coinbase markers"),
            }
        }

        for (index, candidate) in solution.selected.iter().enumerate() {
            let unlock_script = match &tx.inputs[index] {
                Input::PrevOut { unlock_script, .. } => unlock_script.clone(),
                Input::Coinbase { .. } => unreachable!(),
            };
            kestrel_script::verify(&unlock_script, &candidate.lock_script, &tx, index)?;
        }

        Ok(tx)
    }

    /// Commit our own transaction: mark its inputs spent and track it as
    /// pending with `Own` source.
    pub fn commit_tx(&mut self, tx: Transaction) -> Result<(), WalletError> {
        self.commit_with_purpose(tx, TxPurpose::UserPayment)
    }

    fn commit_with_purpose(
        &mut self,
        tx: Transaction,
        purpose: TxPurpose,
    ) -> Result<(), WalletError> {
        let txid = tx.hash();
        let prev_available = self.balance(BalanceType::Available);
        let prev_estimated = self.balance(BalanceType::Estimated);

        let mut confidence = TxConfidence::new(Source::Own);
        confidence.kind = ConfidenceKind::Pending;
        self.txs.insert(
            txid,
            WalletTx {
                transaction: tx,
                pool: Pool::Pending,
                confidence,
                appeared_in: None,
                side_chain_blocks: Vec::new(),
                purpose,
            },
        );
        self.insert_claims(&txid);

        self.fire_balance_events(&txid, prev_available, prev_estimated);
        self.finish_mutation();
        Ok(())
    }

    // ---- key rotation -------------------------------------------------

    /// Build sweep transactions retiring every spendable output locked by
    /// a pre-rotation key.
    ///
    /// Sweeps are batched so signatures keep each transaction under the
    /// standard size limit; each batch pays one fresh post-rotation
    /// address. The sweeps are committed as our own `KeyRotation`
    /// transactions and returned for broadcast.
    pub fn maybe_rotate_keys(&mut self) -> Result<Vec<Transaction>, WalletError> {
        let rotation_time = match self.keychain.rotation_time() {
            Some(time) => time,
            None => return Ok(Vec::new()),
        };

        let old_hashes: std::collections::HashSet<[u8; 20]> = self
            .keychain
            .keys_created_before(rotation_time)
            .into_iter()
            .map(|issued| issued.key.key().pub_key_hash())
            .collect();
        if old_hashes.is_empty() {
            return Ok(Vec::new());
        }

        let eligible: Vec<Candidate> = self
            .spendable_candidates(false)
            .into_iter()
            .filter(|candidate| {
                self.keychain
                    .find_key_for_script(&candidate.lock_script)
                    .map(|issued| old_hashes.contains(&issued.key.key().pub_key_hash()))
                    .unwrap_or(false)
            })
            .collect();
        if eligible.is_empty() {
            return Ok(Vec::new());
        }

        info!(outputs = eligible.len(), "sweeping pre-rotation keys");

        let mut sweeps = Vec::new();
        for batch in eligible.chunks(self.config.rotation_batch_size) {
            let total: i64 = batch.iter().map(|c| c.value.as_sat()).sum();
            let size = fee::estimate_size(batch.len(), 1);
            let fee = fee::fee_for_size(size, self.config.fee_per_kb);
            let paid = total - fee.as_sat();
            if paid < fee::MIN_NONDUST_OUTPUT {
                // Not worth sweeping at current fees.
                continue;
            }

            let destination = self.keychain.issue_key(KeyPurpose::External)?.key.key().pub_key_hash();
            let solution = Solution {
                category: coin_selection::FeeCategory::WithChange,
                selected: batch.to_vec(),
                fee,
                change: None,
            };
            let request = SendRequest {
                outputs: vec![Output {
                    value: Amount::try_from(paid)?,
                    lock_script: kestrel_script::template::pay_to_pub_key_hash(&destination),
                }],
                change_address: None,
                fee: Some(fee),
                fee_per_kb: Some(self.config.fee_per_kb),
                ensure_min_required_fee: false,
                allow_unconfirmed: false,
            };

            let tx = self.build_and_sign(&request, &solution, None)?;
            self.commit_with_purpose(tx.clone(), TxPurpose::KeyRotation)?;
            sweeps.push(tx);
        }
        Ok(sweeps)
    }

    // ---- consistency --------------------------------------------------

    /// Check the pool membership invariants.
    ///
    /// Every transaction is in exactly one pool (structural); the spent-by
    /// index holds exactly the inputs of live transactions; confirmed pool
    /// placement matches output state.
    pub fn is_consistent(&self) -> bool {
        // Spent-by entries all come from live (non-dead) transactions...
        for (outpoint, claimant) in self.spent_by.iter() {
            match self.txs.get(claimant) {
                Some(entry) if entry.pool != Pool::Dead => {
                    if !entry
                        .transaction
                        .spent_outpoints()
                        .any(|candidate| candidate == *outpoint)
                    {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        // ...and every live transaction's inputs are claimed by itself.
        for (txid, entry) in self.txs.iter() {
            if entry.pool == Pool::Dead {
                continue;
            }
            if matches!(entry.confidence.kind, ConfidenceKind::InConflict) {
                continue;
            }
            for outpoint in entry.transaction.spent_outpoints() {
                if self.spent_by.get(&outpoint) != Some(txid) {
                    // A competing claim is fine only if the competitor is
                    // also live; the loser should have died.
                    let competitor = self.spent_by.get(&outpoint);
                    if competitor.is_none() {
                        return false;
                    }
                }
            }
            // Confirmed placement matches output spend state.
            if matches!(entry.pool, Pool::Unspent | Pool::Spent) {
                let has_unspent = self.my_outputs(&entry.transaction).into_iter().any(
                    |(index, _)| {
                        !self.spent_by.contains_key(&OutPoint {
                            hash: *txid,
                            index,
                        })
                    },
                );
                let expected = if has_unspent { Pool::Unspent } else { Pool::Spent };
                // Transactions with no wallet outputs at all sit in Spent.
                let no_outputs = self.my_outputs(&entry.transaction).is_empty();
                if !no_outputs && entry.pool != expected {
                    return false;
                }
            }
        }
        true
    }

    // ---- internals ----------------------------------------------------

    fn fire_balance_events(
        &mut self,
        txid: &transaction::Hash,
        prev_available: Amount<NonNegative>,
        prev_estimated: Amount<NonNegative>,
    ) {
        let new_available = self.balance(BalanceType::Available);
        let new_estimated = self.balance(BalanceType::Estimated);

        // Estimated captures pending flows; available captures confirmed
        // ones. Report whichever moved.
        let (prev, new) = if new_estimated != prev_estimated {
            (prev_estimated, new_estimated)
        } else {
            (prev_available, new_available)
        };

        if new > prev {
            self.events.fire(WalletEvent::CoinsReceived {
                txid: *txid,
                prev_balance: to_signed(prev),
                new_balance: to_signed(new),
            });
        } else if new < prev {
            self.events.fire(WalletEvent::CoinsSent {
                txid: *txid,
                prev_balance: to_signed(prev),
                new_balance: to_signed(new),
            });
        }
    }

    /// Post-mutation bookkeeping: watchers, then listener dispatch.
    fn finish_mutation(&mut self) {
        self.check_balance_watchers();
        self.events.dispatch();
    }

    // ---- persistence plumbing ----------------------------------------

    pub(crate) fn insert_loaded(&mut self, entry: WalletTx) {
        let txid = entry.transaction.hash();
        let live = entry.pool != Pool::Dead
            && !matches!(entry.confidence.kind, ConfidenceKind::InConflict);
        self.txs.insert(txid, entry);
        if live {
            self.insert_claims(&txid);
        }
    }
}

fn to_signed(amount: Amount<NonNegative>) -> Amount {
    Amount::try_from(amount.as_sat()).expect("non-negative amounts are valid signed amounts")
}
