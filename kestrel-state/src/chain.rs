//! Fork-aware chain state over the header database.

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace};

use kestrel_chain::{
    block::{self, StoredBlock},
    parameters::{genesis_block_header, Network},
};

use crate::store::HeaderDb;
use crate::{check, locator, ChainError, Config};

/// A change to the best chain.
///
/// `disconnected` lists blocks leaving the best chain newest-first;
/// `connected` lists blocks joining it oldest-first. A plain extension has
/// an empty `disconnected`. Consumers replay the lists in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    /// Blocks no longer on the best chain, newest first.
    pub disconnected: Vec<StoredBlock>,
    /// Blocks newly on the best chain, oldest first.
    pub connected: Vec<StoredBlock>,
}

impl ChainEvent {
    /// Whether this event reorganized the chain rather than extending it.
    pub fn is_reorg(&self) -> bool {
        !self.disconnected.is_empty()
    }
}

/// The verified header chain.
///
/// All mutation goes through [`ChainStore::add_header`], which verifies the
/// header, attaches it to the block tree, and switches the best chain when
/// the new branch carries more cumulative work. Ties and lighter branches
/// are stored as side-chain heads and produce no event.
pub struct ChainStore {
    db: HeaderDb,
    network: Network,
    undo_depth: u32,
}

impl ChainStore {
    /// Open (or create) the store, seeding the genesis block if empty.
    pub fn open(config: &Config, network: Network) -> Result<ChainStore, ChainError> {
        let db = HeaderDb::open(config)?;
        let store = ChainStore {
            db,
            network,
            undo_depth: config.undo_depth,
        };

        if store.db.tip()?.is_none() {
            let genesis = StoredBlock::genesis(genesis_block_header(network))
                .ok_or(ChainError::Corrupt("genesis difficulty is invalid"))?;
            store.db.put(&genesis)?;
            store.db.index_main_chain(&genesis)?;
            store.db.set_tip(&genesis)?;
            info!(network = %network, genesis = %genesis.hash(), "seeded new header store");
        }

        Ok(store)
    }

    /// The network this store verifies against.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Fetch any stored block by hash, main chain or side chain.
    pub fn get(&self, hash: &block::Hash) -> Result<Option<StoredBlock>, ChainError> {
        self.db.get(hash)
    }

    /// Store a block record directly, without verification.
    ///
    /// Used when restoring from a trusted snapshot; normal ingestion goes
    /// through [`ChainStore::add_header`].
    pub fn put(&self, block: &StoredBlock) -> Result<(), ChainError> {
        self.db.put(block)
    }

    /// The current best-chain tip.
    pub fn chain_head(&self) -> Result<StoredBlock, ChainError> {
        self.db
            .tip()?
            .ok_or(ChainError::Corrupt("store has no chain head"))
    }

    /// Force the best-chain tip marker.
    pub fn set_chain_head(&self, block: &StoredBlock) -> Result<(), ChainError> {
        self.db.set_tip(block)
    }

    /// The best-chain block at `height`, if it is still undoable.
    ///
    /// Blocks deeper than the undo horizon are final: they can no longer be
    /// disconnected, so their records are not offered for rollback.
    pub fn get_undoable(&self, height: block::Height) -> Result<Option<StoredBlock>, ChainError> {
        let head = self.chain_head()?;
        if head.height.0.saturating_sub(height.0) > self.undo_depth {
            return Ok(None);
        }
        match self.db.main_chain_hash_at(height)? {
            Some(hash) => self.db.get(&hash),
            None => Ok(None),
        }
    }

    /// Walk `steps` parents back from `from`.
    pub fn iterate_back(
        &self,
        from: &block::Hash,
        steps: u32,
    ) -> Result<Option<StoredBlock>, ChainError> {
        match self.db.get(from)? {
            Some(start) => self.db.ancestor(&start, steps),
            None => Ok(None),
        }
    }

    /// Whether `hash` is on the current best chain.
    pub fn is_main_chain(&self, block: &StoredBlock) -> Result<bool, ChainError> {
        Ok(self.db.main_chain_hash_at(block.height)? == Some(block.hash()))
    }

    /// Build a `getheaders` locator for the current best chain.
    pub fn block_locator(&self) -> Result<Vec<block::Hash>, ChainError> {
        let head = self.chain_head()?;
        let mut hashes = Vec::new();
        for height in locator::block_locator_heights(head.height) {
            if let Some(hash) = self.db.main_chain_hash_at(height)? {
                hashes.push(hash);
            }
        }
        Ok(hashes)
    }

    /// Verify and attach one header.
    ///
    /// Returns `Ok(Some(event))` when the best chain changed, `Ok(None)`
    /// when the header was a duplicate or landed on a side chain.
    pub fn add_header(
        &self,
        header: block::Header,
        now: DateTime<Utc>,
    ) -> Result<Option<ChainEvent>, ChainError> {
        let hash = header.hash();

        if self.db.contains(&hash)? {
            trace!(%hash, "ignoring duplicate header");
            return Ok(None);
        }

        let parent = self
            .db
            .get(&header.previous_block_hash)?
            .ok_or(ChainError::Orphan(hash))?;

        check::proof_of_work_is_valid(&header, self.network)?;
        check::difficulty_schedule_is_valid(&self.db, &parent, &header, self.network)?;
        check::time_is_valid(&self.db, &parent, &header, now)?;

        let stored = StoredBlock::child_of(&parent, header)
            .ok_or(ChainError::InvalidDifficulty(hash))?;
        self.db.put(&stored)?;

        let head = self.chain_head()?;

        if parent.hash() == head.hash() {
            // The common case: extending the best chain.
            self.db.index_main_chain(&stored)?;
            self.db.set_tip(&stored)?;
            trace!(%hash, height = stored.height.0, "extended best chain");
            return Ok(Some(ChainEvent {
                disconnected: Vec::new(),
                connected: vec![stored],
            }));
        }

        if stored.chain_work > head.chain_work {
            let event = self.reorganize(&head, stored)?;
            return Ok(Some(event));
        }

        // Equal or less work: remember the side-chain head, change nothing.
        debug!(%hash, height = stored.height.0, "stored side-chain header");
        Ok(None)
    }

    /// Switch the best chain to the branch ending at `new_head`.
    fn reorganize(
        &self,
        old_head: &StoredBlock,
        new_head: StoredBlock,
    ) -> Result<ChainEvent, ChainError> {
        // Walk the new branch back to the first block already on the best
        // chain; that block is the fork point.
        let mut connected = Vec::new();
        let mut cursor = new_head;
        let fork = loop {
            if self.is_main_chain(&cursor)? {
                break cursor;
            }
            connected.push(cursor);
            cursor = self
                .db
                .get(&cursor.header.previous_block_hash)?
                .ok_or(ChainError::Corrupt("side chain detached from stored tree"))?;
        };
        connected.reverse();

        if old_head.height.0.saturating_sub(fork.height.0) > self.undo_depth {
            return Err(ChainError::ReorgTooDeep(fork.height));
        }

        // Collect the main-chain blocks above the fork, newest first.
        let mut disconnected = Vec::new();
        let mut cursor = *old_head;
        while cursor.height > fork.height {
            disconnected.push(cursor);
            cursor = self
                .db
                .get(&cursor.header.previous_block_hash)?
                .ok_or(ChainError::Corrupt("main chain detached from stored tree"))?;
        }

        for block in disconnected.iter() {
            self.db.unindex_main_chain(block.height)?;
        }
        for block in connected.iter() {
            self.db.index_main_chain(block)?;
        }
        self.db.set_tip(connected.last().expect("reorg connects at least one block"))?;

        info!(
            fork_height = fork.height.0,
            disconnected = disconnected.len(),
            connected = connected.len(),
            new_head = %connected.last().expect("nonempty").hash(),
            "chain reorganized"
        );

        Ok(ChainEvent {
            disconnected,
            connected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use kestrel_chain::block::Header;

    fn open_store() -> ChainStore {
        ChainStore::open(&Config::ephemeral(), Network::Regtest).unwrap()
    }

    fn far_future() -> DateTime<Utc> {
        Utc.timestamp(2_000_000_000, 0)
    }

    /// Build a header on `parent`, grinding the nonce until regtest
    /// proof-of-work passes.
    fn mine_on(parent: &StoredBlock, time_offset: i64, salt: u32) -> Header {
        let time = parent.header.time + Duration::seconds(600 + time_offset);
        for nonce in 0..u32::MAX {
            let header = Header::new(
                1,
                parent.hash(),
                parent.header.merkle_root,
                time,
                parent.header.difficulty_threshold,
                nonce.wrapping_add(salt.wrapping_mul(7919)),
            );
            if check::proof_of_work_is_valid(&header, Network::Regtest).is_ok() {
                return header;
            }
        }
        unreachable!("regtest difficulty is trivially satisfiable")
    }

    fn extend(store: &ChainStore, parent: &StoredBlock, salt: u32) -> StoredBlock {
        let header = mine_on(parent, salt as i64, salt);
        let event = store
            .add_header(header, far_future())
            .unwrap()
            .expect("extension produces an event");
        assert!(!event.is_reorg());
        *event.connected.last().unwrap()
    }

    #[test]
    fn open_seeds_genesis() {
        kestrel_test::init();

        let store = open_store();
        let head = store.chain_head().unwrap();
        assert_eq!(head.height, block::Height(0));
        assert_eq!(
            head.hash(),
            kestrel_chain::parameters::genesis_hash(Network::Regtest)
        );
    }

    #[test]
    fn linear_growth() {
        kestrel_test::init();

        let store = open_store();
        let genesis = store.chain_head().unwrap();
        let b1 = extend(&store, &genesis, 1);
        let b2 = extend(&store, &b1, 2);

        assert_eq!(store.chain_head().unwrap(), b2);
        assert_eq!(b2.height, block::Height(2));
        assert!(b2.chain_work > b1.chain_work);
        assert!(store.is_main_chain(&b1).unwrap());
    }

    #[test]
    fn orphans_are_rejected() {
        kestrel_test::init();

        let store = open_store();
        let genesis = store.chain_head().unwrap();
        let mut header = mine_on(&genesis, 0, 1);
        header = Header::new(
            header.version,
            block::Hash([0xee; 32]),
            header.merkle_root,
            header.time,
            header.difficulty_threshold,
            header.nonce,
        );
        assert!(matches!(
            store.add_header(header, far_future()),
            Err(ChainError::Orphan(_))
        ));
    }

    #[test]
    fn duplicates_are_ignored() {
        kestrel_test::init();

        let store = open_store();
        let genesis = store.chain_head().unwrap();
        let header = mine_on(&genesis, 0, 1);
        assert!(store.add_header(header, far_future()).unwrap().is_some());
        assert!(store.add_header(header, far_future()).unwrap().is_none());
    }

    #[test]
    fn side_chain_does_not_emit() {
        kestrel_test::init();

        let store = open_store();
        let genesis = store.chain_head().unwrap();
        let b1 = extend(&store, &genesis, 1);
        let _b2 = extend(&store, &b1, 2);

        // A competing block at height 1: less total work than the head.
        let competing = mine_on(&genesis, 50, 99);
        assert!(store.add_header(competing, far_future()).unwrap().is_none());
        assert_eq!(store.chain_head().unwrap().height, block::Height(2));
    }

    #[test]
    fn reorg_disconnects_then_connects() {
        kestrel_test::init();

        let store = open_store();
        let genesis = store.chain_head().unwrap();
        let b1 = extend(&store, &genesis, 1);
        let b2a = extend(&store, &b1, 2);

        // Competing branch from b1: b2b then b3b, overtaking b2a.
        let b2b_header = mine_on(&b1, 30, 40);
        assert!(store.add_header(b2b_header, far_future()).unwrap().is_none());
        let b2b = store.get(&b2b_header.hash()).unwrap().unwrap();

        let b3b_header = mine_on(&b2b, 31, 41);
        let event = store
            .add_header(b3b_header, far_future())
            .unwrap()
            .expect("overtaking branch reorganizes");

        assert!(event.is_reorg());
        assert_eq!(event.disconnected, vec![b2a]);
        assert_eq!(event.connected.len(), 2);
        assert_eq!(event.connected[0].hash(), b2b_header.hash());
        assert_eq!(event.connected[1].hash(), b3b_header.hash());

        let head = store.chain_head().unwrap();
        assert_eq!(head.hash(), b3b_header.hash());
        assert_eq!(head.height, block::Height(3));
        assert!(!store.is_main_chain(&b2a).unwrap());
    }

    #[test]
    fn locator_covers_tip_and_genesis() {
        kestrel_test::init();

        let store = open_store();
        let mut tip = store.chain_head().unwrap();
        for salt in 0..15 {
            tip = extend(&store, &tip, salt + 1);
        }

        let locator = store.block_locator().unwrap();
        assert_eq!(locator.first(), Some(&tip.hash()));
        assert_eq!(
            locator.last(),
            Some(&kestrel_chain::parameters::genesis_hash(Network::Regtest))
        );
    }

    #[test]
    fn undo_horizon_is_enforced() {
        kestrel_test::init();

        let config = Config {
            undo_depth: 2,
            ..Config::ephemeral()
        };
        let store = ChainStore::open(&config, Network::Regtest).unwrap();
        let genesis = store.chain_head().unwrap();
        let b1 = extend(&store, &genesis, 1);
        let b2 = extend(&store, &b1, 2);
        let b3 = extend(&store, &b2, 3);
        let _b4 = extend(&store, &b3, 4);

        // Undoable: within 2 of the tip.
        assert!(store.get_undoable(block::Height(4)).unwrap().is_some());
        assert!(store.get_undoable(block::Height(2)).unwrap().is_some());
        // Final: deeper than the horizon.
        assert!(store.get_undoable(block::Height(1)).unwrap().is_none());

        // A competing branch from genesis long enough to overtake must be
        // refused: its fork point is below the horizon.
        let mut side_parent = genesis;
        let mut last_result = None;
        for salt in 0..6 {
            let header = mine_on(&side_parent, 200 + salt as i64, 70 + salt);
            last_result = Some(store.add_header(header, far_future()));
            match last_result.as_ref().unwrap() {
                Ok(_) => {
                    side_parent = store.get(&header.hash()).unwrap().unwrap();
                }
                Err(_) => break,
            }
        }
        assert!(matches!(
            last_result,
            Some(Err(ChainError::ReorgTooDeep(_)))
        ));
    }

    #[test]
    fn stale_timestamp_rejected() {
        kestrel_test::init();

        let store = open_store();
        let genesis = store.chain_head().unwrap();
        let mut tip = genesis;
        for salt in 0..11 {
            tip = extend(&store, &tip, salt + 1);
        }

        // A header at or before the median of the previous 11 must fail.
        let mut header = mine_on(&tip, 0, 50);
        header = Header::new(
            header.version,
            header.previous_block_hash,
            header.merkle_root,
            genesis.header.time,
            header.difficulty_threshold,
            header.nonce,
        );
        // Re-grind since the time change altered the hash.
        let header = {
            let mut candidate = header;
            let mut nonce = 0u32;
            loop {
                candidate = Header::new(
                    header.version,
                    header.previous_block_hash,
                    header.merkle_root,
                    genesis.header.time,
                    header.difficulty_threshold,
                    nonce,
                );
                if check::proof_of_work_is_valid(&candidate, Network::Regtest).is_ok() {
                    break candidate;
                }
                nonce += 1;
            }
        };
        assert!(matches!(
            store.add_header(header, far_future()),
            Err(ChainError::Time(_, _))
        ));
    }
}
