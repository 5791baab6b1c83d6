//! The peer group: maintains a target number of peer sessions and runs
//! three services over them — headers-first chain download, transaction
//! broadcast, and bloom-filter multiplexing.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant};
use tracing::{debug, info, trace, warn};

use kestrel_chain::{block, transaction};
use kestrel_state::{ChainEvent, ChainStore};

use crate::bloom::BloomFilter;
use crate::meta_addr::MetaAddr;
use crate::peer::{self, Peer, PeerEvent, PeerEventKind};
use crate::protocol::external::{GetHeaders, InventoryHash, MerkleBlockMessage, Message};
use crate::{constants, Config};

/// Where fresh peer addresses come from.
///
/// DNS seeding, static lists, and test harnesses all implement this.
pub trait PeerDiscovery: Send + Sync + 'static {
    /// Some candidate addresses. May be empty; called repeatedly.
    fn discover(&self) -> Vec<SocketAddr>;
}

/// A fixed peer list.
pub struct StaticDiscovery(pub Vec<SocketAddr>);

impl PeerDiscovery for StaticDiscovery {
    fn discover(&self) -> Vec<SocketAddr> {
        self.0.clone()
    }
}

/// Network happenings the embedding node cares about.
#[derive(Debug)]
pub enum NetworkEvent {
    /// The best chain changed (extension or reorg).
    ChainAdvanced(ChainEvent),
    /// A filtered block arrived with a verified merkle proof.
    FilteredBlock {
        /// The block's hash.
        hash: block::Hash,
        /// The block header.
        header: block::Header,
        /// The matched transaction ids, in block order.
        matched: Vec<transaction::Hash>,
    },
    /// A peer relayed a transaction (solicited via `getdata` after an
    /// `inv`, or pushed after a filter match).
    TransactionRelayed {
        /// The transaction.
        transaction: Arc<transaction::Transaction>,
        /// Who sent it.
        from: SocketAddr,
    },
}

/// Why a broadcast did not confirm.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    /// The group shut down before enough peers echoed the transaction.
    #[error("broadcast cancelled")]
    Cancelled,
}

/// A pending broadcast; resolves once a majority of the peers connected at
/// send time have announced the transaction back to us.
pub struct BroadcastHandle {
    /// The transaction id being broadcast.
    pub txid: transaction::Hash,
    receiver: oneshot::Receiver<Result<(), BroadcastError>>,
}

impl BroadcastHandle {
    /// Wait for the confirmation threshold.
    pub async fn wait(self) -> Result<(), BroadcastError> {
        self.receiver
            .await
            .unwrap_or(Err(BroadcastError::Cancelled))
    }
}

struct BroadcastState {
    transaction: Arc<transaction::Transaction>,
    seen_by: HashSet<SocketAddr>,
    threshold: usize,
    completion: Option<oneshot::Sender<Result<(), BroadcastError>>>,
}

struct GroupInner {
    config: Config,
    store: Arc<ChainStore>,
    discovery: Box<dyn PeerDiscovery>,
    /// Ready peer sessions.
    peers: Mutex<HashMap<SocketAddr, Peer>>,
    /// Known addresses, most recently confirmed first.
    address_book: Mutex<IndexMap<SocketAddr, MetaAddr>>,
    /// In-progress broadcasts by txid.
    broadcasts: Mutex<HashMap<transaction::Hash, BroadcastState>>,
    /// The currently loaded union filter.
    filter: Mutex<Option<BloomFilter>>,
    /// The peer currently driving chain download.
    download_peer: Mutex<Option<SocketAddr>>,
    /// When the chain tip last advanced.
    last_progress: Mutex<Instant>,
    /// Version nonces we recently sent, for self-connection detection.
    recent_nonces: Arc<Mutex<Vec<u64>>>,
    /// Set once `shutdown` is called.
    closed: AtomicBool,
    /// Where peer workers deliver events.
    peer_events: mpsc::Sender<PeerEvent>,
    /// Where we deliver node-level events.
    network_events: mpsc::Sender<NetworkEvent>,
}

/// The peer pool and its services.
///
/// Cloneable handle; all clones drive the same pool.
#[derive(Clone)]
pub struct PeerGroup {
    inner: Arc<GroupInner>,
}

impl PeerGroup {
    /// Create a group. Returns the handle and the stream of network
    /// events; call [`PeerGroup::run`] to start connecting.
    pub fn new(
        config: Config,
        store: Arc<ChainStore>,
        discovery: Box<dyn PeerDiscovery>,
    ) -> (PeerGroup, mpsc::Receiver<NetworkEvent>, mpsc::Receiver<PeerEvent>) {
        let (peer_events_tx, peer_events_rx) = mpsc::channel(256);
        let (network_events_tx, network_events_rx) = mpsc::channel(256);

        let mut address_book = IndexMap::new();
        for addr in config.initial_peers.iter() {
            address_book.insert(
                *addr,
                MetaAddr::new_local(*addr, Default::default()),
            );
        }

        let group = PeerGroup {
            inner: Arc::new(GroupInner {
                config,
                store,
                discovery,
                peers: Mutex::new(HashMap::new()),
                address_book: Mutex::new(address_book),
                broadcasts: Mutex::new(HashMap::new()),
                filter: Mutex::new(None),
                download_peer: Mutex::new(None),
                last_progress: Mutex::new(Instant::now()),
                recent_nonces: Arc::new(Mutex::new(Vec::new())),
                closed: AtomicBool::new(false),
                peer_events: peer_events_tx,
                network_events: network_events_tx,
            }),
        };

        (group, network_events_rx, peer_events_rx)
    }

    /// Drive the group: connection maintenance, event dispatch, stall
    /// detection. Runs until [`PeerGroup::shutdown`].
    pub async fn run(&self, mut peer_events: mpsc::Receiver<PeerEvent>) {
        let mut maintain = interval(std::time::Duration::from_secs(5));
        let mut stall_check = interval(self.inner.config.stall_timeout / 2);

        loop {
            if self.inner.closed.load(Ordering::Relaxed) {
                break;
            }

            tokio::select! {
                _ = maintain.tick() => {
                    self.maintain_connections().await;
                }
                _ = stall_check.tick() => {
                    self.check_for_stall().await;
                }
                event = peer_events.recv() => {
                    match event {
                        Some(event) => self.handle_peer_event(event).await,
                        None => break,
                    }
                }
            }
        }
    }

    /// Stop the group: close every session and cancel pending broadcasts.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        info!("peer group shutting down");

        for (_, peer) in self.inner.peers.lock().expect("peers lock").drain() {
            peer.close();
        }
        let mut broadcasts = self.inner.broadcasts.lock().expect("broadcasts lock");
        for (_, mut state) in broadcasts.drain() {
            if let Some(completion) = state.completion.take() {
                let _ = completion.send(Err(BroadcastError::Cancelled));
            }
        }
    }

    /// The number of ready peers.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().expect("peers lock").len()
    }

    /// Install `filter` as the connection filter on every current and
    /// future peer.
    pub async fn load_filter(&self, filter: BloomFilter) {
        let message = filter.to_load_message();
        *self.inner.filter.lock().expect("filter lock") = Some(filter);

        for peer in self.ready_peers() {
            if let Err(error) = peer.send(message.clone()).await {
                debug!(addr = %peer.addr(), %error, "failed to push filter");
            }
        }
    }

    /// Announce a signed transaction to every ready peer and return a
    /// handle resolving at the majority-echo threshold.
    pub async fn broadcast_transaction(
        &self,
        transaction: Arc<transaction::Transaction>,
    ) -> BroadcastHandle {
        let txid = transaction.hash();
        let peers = self.ready_peers();
        let threshold = broadcast_threshold(peers.len());

        let (completion_tx, completion_rx) = oneshot::channel();
        self.inner.broadcasts.lock().expect("broadcasts lock").insert(
            txid,
            BroadcastState {
                transaction: transaction.clone(),
                seen_by: HashSet::new(),
                threshold,
                completion: Some(completion_tx),
            },
        );

        let announcement = Message::Inv(vec![InventoryHash::Tx(txid)]);
        let min_fee = transaction_fee_rate_unknown();
        for peer in peers {
            // Respect remote fee filters when we can tell ours is below.
            if peer.fee_filter() > min_fee {
                trace!(addr = %peer.addr(), "skipping peer with higher fee filter");
                continue;
            }
            if let Err(error) = peer.send(announcement.clone()).await {
                debug!(addr = %peer.addr(), %error, "failed to announce tx");
            }
        }
        metrics::counter!("broadcast.announced", 1);

        BroadcastHandle {
            txid,
            receiver: completion_rx,
        }
    }

    fn ready_peers(&self) -> Vec<Peer> {
        self.inner
            .peers
            .lock()
            .expect("peers lock")
            .values()
            .filter(|peer| peer.is_alive())
            .cloned()
            .collect()
    }

    async fn maintain_connections(&self) {
        let target = self.inner.config.target_peer_count;
        let current = self.peer_count();
        if current >= target {
            return;
        }

        // Refresh the address book from discovery.
        let discovered = self.inner.discovery.discover();
        {
            let mut book = self.inner.address_book.lock().expect("address book lock");
            for addr in discovered {
                book.entry(addr)
                    .or_insert_with(|| MetaAddr::new_local(addr, Default::default()));
            }
        }

        let candidates: Vec<SocketAddr> = {
            let peers = self.inner.peers.lock().expect("peers lock");
            let book = self.inner.address_book.lock().expect("address book lock");
            book.keys()
                .filter(|addr| !peers.contains_key(*addr))
                .take(target - current)
                .copied()
                .collect()
        };

        for addr in candidates {
            let group = self.clone();
            tokio::spawn(async move {
                group.dial(addr).await;
            });
        }
    }

    async fn dial(&self, addr: SocketAddr) {
        let best_height = match self.inner.store.chain_head() {
            Ok(head) => head.height,
            Err(_) => block::Height(0),
        };

        match peer::connect(
            addr,
            &self.inner.config,
            best_height,
            self.inner.peer_events.clone(),
            self.inner.recent_nonces.clone(),
        )
        .await
        {
            Ok(peer) => {
                // Push the filter before anything else so every relayed
                // transaction is already filtered.
                let load_message = self
                    .inner
                    .filter
                    .lock()
                    .expect("filter lock")
                    .as_ref()
                    .map(|filter| filter.to_load_message());
                if let Some(message) = load_message {
                    let _ = peer.send(message).await;
                }
                let _ = peer.send(Message::SendHeaders).await;
                let _ = peer.send(Message::GetAddr).await;

                self.inner
                    .peers
                    .lock()
                    .expect("peers lock")
                    .insert(addr, peer);
                metrics::gauge!("peers.ready", self.peer_count() as f64);

                self.ensure_download_peer().await;
            }
            Err(error) => {
                debug!(%addr, %error, "dial failed");
                // Push failed addresses to the back of the book.
                let mut book = self.inner.address_book.lock().expect("address book lock");
                if let Some(entry) = book.shift_remove(&addr) {
                    book.insert(addr, entry);
                }
            }
        }
    }

    /// Pick a download peer if none is active, and kick off header sync.
    async fn ensure_download_peer(&self) {
        let needs_selection = {
            let peers = self.inner.peers.lock().expect("peers lock");
            let current = self.inner.download_peer.lock().expect("download peer lock");
            match *current {
                Some(addr) => !peers.get(&addr).map(|p| p.is_alive()).unwrap_or(false),
                None => true,
            }
        };
        if !needs_selection {
            return;
        }

        // Prefer the peer claiming the highest chain.
        let best = self
            .ready_peers()
            .into_iter()
            .max_by_key(|peer| peer.start_height().0);

        if let Some(peer) = best {
            info!(addr = %peer.addr(), "selected download peer");
            *self
                .inner
                .download_peer
                .lock()
                .expect("download peer lock") = Some(peer.addr());
            *self.inner.last_progress.lock().expect("progress lock") = Instant::now();
            self.request_headers(&peer).await;
        }
    }

    async fn request_headers(&self, peer: &Peer) {
        let locator = match self.inner.store.block_locator() {
            Ok(locator) => locator,
            Err(error) => {
                warn!(%error, "failed to build locator");
                return;
            }
        };
        let request = Message::GetHeaders(GetHeaders {
            block_locator_hashes: locator,
            stop_hash: None,
        });
        if let Err(error) = peer.send(request).await {
            debug!(addr = %peer.addr(), %error, "failed to request headers");
        }
    }

    async fn check_for_stall(&self) {
        let download_addr = *self.inner.download_peer.lock().expect("download peer lock");
        let addr = match download_addr {
            Some(addr) => addr,
            None => return,
        };

        // Only stalled if somebody claims more chain than we have.
        let our_height = match self.inner.store.chain_head() {
            Ok(head) => head.height,
            Err(_) => return,
        };
        let best_claim = self
            .ready_peers()
            .iter()
            .map(|peer| peer.start_height())
            .max()
            .unwrap_or(block::Height(0));
        if best_claim <= our_height {
            return;
        }

        let stalled = self
            .inner
            .last_progress
            .lock()
            .expect("progress lock")
            .elapsed()
            > self.inner.config.stall_timeout;
        if !stalled {
            return;
        }

        warn!(%addr, "download peer stalled; demoting");
        metrics::counter!("sync.stalls", 1);

        if let Some(peer) = self.inner.peers.lock().expect("peers lock").remove(&addr) {
            peer.close();
        }
        *self
            .inner
            .download_peer
            .lock()
            .expect("download peer lock") = None;
        self.ensure_download_peer().await;
    }

    async fn handle_peer_event(&self, event: PeerEvent) {
        let PeerEvent { addr, kind } = event;
        match kind {
            PeerEventKind::Headers(headers) => self.handle_headers(addr, headers).await,
            PeerEventKind::Inv(items) => self.handle_inv(addr, items).await,
            PeerEventKind::MerkleBlock { message, matched } => {
                self.handle_merkle_block(message, matched).await
            }
            PeerEventKind::Tx(transaction) => {
                let _ = self
                    .inner
                    .network_events
                    .send(NetworkEvent::TransactionRelayed {
                        transaction,
                        from: addr,
                    })
                    .await;
            }
            PeerEventKind::Block(block) => {
                // Headers-first SPV: full blocks are unexpected but
                // harmless; fold the header in.
                let _ = self.accept_header(block.header).await;
            }
            PeerEventKind::Addr(addrs) => {
                let now = Utc::now();
                let mut book = self.inner.address_book.lock().expect("address book lock");
                for mut meta in addrs {
                    // Never trust a future last_seen.
                    if meta.last_seen > now {
                        meta.last_seen = now;
                    }
                    book.insert(meta.addr, meta);
                }
            }
            PeerEventKind::GetData(items) => self.serve_getdata(addr, items).await,
            PeerEventKind::GetHeaders(request) => self.serve_getheaders(addr, request).await,
            PeerEventKind::NotFound(items) => {
                trace!(%addr, count = items.len(), "peer lacked requested items");
            }
            PeerEventKind::FeeFilter(rate) => {
                trace!(%addr, rate, "peer set fee filter");
            }
            PeerEventKind::Disconnected(reason) => {
                self.inner.peers.lock().expect("peers lock").remove(&addr);
                metrics::gauge!("peers.ready", self.peer_count() as f64);
                if reason.is_misbehavior() {
                    self.inner
                        .address_book
                        .lock()
                        .expect("address book lock")
                        .shift_remove(&addr);
                }
                let is_download_peer = *self
                    .inner
                    .download_peer
                    .lock()
                    .expect("download peer lock")
                    == Some(addr);
                if is_download_peer {
                    *self
                        .inner
                        .download_peer
                        .lock()
                        .expect("download peer lock") = None;
                    self.ensure_download_peer().await;
                }
            }
        }
    }

    async fn handle_headers(&self, addr: SocketAddr, headers: Vec<block::CountedHeader>) {
        let count = headers.len();
        let mut advanced = false;

        for counted in headers {
            match self.accept_header(counted.header).await {
                Ok(true) => advanced = true,
                Ok(false) => {}
                // Orphans happen legitimately when our locator raced the
                // peer's tip; a later getheaders round repairs it.
                Err(kestrel_state::ChainError::Orphan(hash)) => {
                    trace!(%addr, %hash, "ignoring unconnected header");
                }
                Err(error) => {
                    warn!(%addr, %error, "peer sent invalid header");
                    if let Some(peer) =
                        self.inner.peers.lock().expect("peers lock").remove(&addr)
                    {
                        peer.close();
                    }
                    return;
                }
            }
        }

        if advanced {
            *self.inner.last_progress.lock().expect("progress lock") = Instant::now();
        }

        // A full message means the peer has more; an empty or partial one
        // means we are caught up.
        if count == constants::MAX_HEADERS_PER_MESSAGE {
            let peer = self.inner.peers.lock().expect("peers lock").get(&addr).cloned();
            if let Some(peer) = peer {
                self.request_headers(&peer).await;
            }
        }
    }

    /// Feed one header to the store, forwarding best-chain changes and
    /// requesting the filtered form of every newly connected block.
    async fn accept_header(&self, header: block::Header) -> Result<bool, kestrel_state::ChainError> {
        let event = self.inner.store.add_header(header, Utc::now())?;
        let event = match event {
            Some(event) => event,
            None => return Ok(false),
        };

        if self.inner.filter.lock().expect("filter lock").is_some() {
            let requests: Vec<InventoryHash> = event
                .connected
                .iter()
                .map(|stored| InventoryHash::FilteredBlock(stored.hash()))
                .collect();
            let download_addr = *self.inner.download_peer.lock().expect("download peer lock");
            let peer = download_addr
                .and_then(|addr| self.inner.peers.lock().expect("peers lock").get(&addr).cloned());
            if let Some(peer) = peer {
                if let Err(error) = peer.request_data(requests).await {
                    debug!(%error, "failed to request filtered blocks");
                }
            }
        }

        let _ = self
            .inner
            .network_events
            .send(NetworkEvent::ChainAdvanced(event))
            .await;
        Ok(true)
    }

    async fn handle_inv(&self, addr: SocketAddr, items: Vec<InventoryHash>) {
        let mut tx_requests = Vec::new();
        let mut saw_blocks = false;

        for item in items {
            match item {
                InventoryHash::Tx(txid) => {
                    if self.record_broadcast_echo(addr, txid) {
                        // Our own broadcast coming back: no need to fetch.
                        continue;
                    }
                    tx_requests.push(InventoryHash::Tx(txid));
                }
                InventoryHash::Block(_) | InventoryHash::FilteredBlock(_) => {
                    saw_blocks = true;
                }
                InventoryHash::Error => {}
            }
        }

        let peer = self.inner.peers.lock().expect("peers lock").get(&addr).cloned();
        let peer = match peer {
            Some(peer) => peer,
            None => return,
        };

        // With a filter loaded, every advertised transaction already
        // matched it server-side, so fetch them all.
        if !tx_requests.is_empty()
            && self.inner.filter.lock().expect("filter lock").is_some()
        {
            if let Err(error) = peer.request_data(tx_requests).await {
                debug!(%addr, %error, "failed to request advertised txs");
            }
        }

        // New blocks announced by inv: ask for headers instead of chasing
        // individual hashes.
        if saw_blocks {
            self.request_headers(&peer).await;
        }
    }

    /// Record a peer echoing one of our broadcasts. Returns whether the
    /// txid belonged to a broadcast.
    fn record_broadcast_echo(&self, addr: SocketAddr, txid: transaction::Hash) -> bool {
        let mut broadcasts = self.inner.broadcasts.lock().expect("broadcasts lock");
        let state = match broadcasts.get_mut(&txid) {
            Some(state) => state,
            None => return false,
        };
        state.seen_by.insert(addr);
        if state.seen_by.len() >= state.threshold {
            if let Some(completion) = state.completion.take() {
                info!(%txid, echoes = state.seen_by.len(), "broadcast confirmed");
                metrics::counter!("broadcast.seen.count", 1);
                let _ = completion.send(Ok(()));
            }
        }
        true
    }

    async fn handle_merkle_block(
        &self,
        message: MerkleBlockMessage,
        matched: Vec<transaction::Hash>,
    ) {
        let hash = message.block_header.hash();
        let _ = self
            .inner
            .network_events
            .send(NetworkEvent::FilteredBlock {
                hash,
                header: message.block_header,
                matched,
            })
            .await;
    }

    async fn serve_getdata(&self, addr: SocketAddr, items: Vec<InventoryHash>) {
        let peer = self.inner.peers.lock().expect("peers lock").get(&addr).cloned();
        let peer = match peer {
            Some(peer) => peer,
            None => return,
        };

        let mut not_found = Vec::new();
        for item in items {
            match item {
                InventoryHash::Tx(txid) => {
                    let transaction = self
                        .inner
                        .broadcasts
                        .lock()
                        .expect("broadcasts lock")
                        .get(&txid)
                        .map(|state| state.transaction.clone());
                    match transaction {
                        Some(transaction) => {
                            let _ = peer.send(Message::Tx(transaction)).await;
                        }
                        None => not_found.push(InventoryHash::Tx(txid)),
                    }
                }
                other => not_found.push(other),
            }
        }

        if !not_found.is_empty() {
            let _ = peer.send(Message::NotFound(not_found)).await;
        }
    }

    async fn serve_getheaders(&self, addr: SocketAddr, request: GetHeaders) {
        let peer = self.inner.peers.lock().expect("peers lock").get(&addr).cloned();
        let peer = match peer {
            Some(peer) => peer,
            None => return,
        };

        // Find the first locator hash on our best chain.
        let mut start = None;
        for hash in request.block_locator_hashes.iter() {
            if let Ok(Some(stored)) = self.inner.store.get(hash) {
                if self.inner.store.is_main_chain(&stored).unwrap_or(false) {
                    start = Some(stored);
                    break;
                }
            }
        }
        let start = match start {
            Some(start) => start,
            // No common ancestor: nothing useful to send.
            None => return,
        };

        let head = match self.inner.store.chain_head() {
            Ok(head) => head,
            Err(_) => return,
        };

        let mut headers = Vec::new();
        let mut height = block::Height(start.height.0 + 1);
        while height <= head.height && headers.len() < constants::MAX_HEADERS_PER_MESSAGE {
            let stored = match self.inner.store.get_undoable(height) {
                Ok(Some(stored)) => stored,
                _ => match self
                    .inner
                    .store
                    .iterate_back(&head.hash(), head.height.0 - height.0)
                {
                    Ok(Some(stored)) => stored,
                    _ => break,
                },
            };
            let hash = stored.hash();
            headers.push(block::CountedHeader {
                header: stored.header,
                transaction_count: 0,
            });
            if Some(hash) == request.stop_hash {
                break;
            }
            height = block::Height(height.0 + 1);
        }

        if !headers.is_empty() {
            let _ = peer.send(Message::Headers(headers)).await;
        }
    }
}

/// We cannot compute a relayed fee rate for foreign transactions; treat
/// our own broadcasts as paying enough for a default-config peer.
fn transaction_fee_rate_unknown() -> u64 {
    1000
}

/// Echoes needed before a broadcast counts as seen: ⌈N/2⌉ + 1 of the N
/// peers connected at announcement time.
fn broadcast_threshold(connected: usize) -> usize {
    (connected + 1) / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_chain::parameters::Network;
    use kestrel_chain::transaction::{LockTime, Transaction};

    #[test]
    fn broadcast_threshold_is_ceiling_majority_plus_one() {
        assert_eq!(broadcast_threshold(1), 2);
        assert_eq!(broadcast_threshold(2), 2);
        assert_eq!(broadcast_threshold(3), 3);
        assert_eq!(broadcast_threshold(4), 3);
        assert_eq!(broadcast_threshold(5), 4);
    }

    /// With three peers connected, the completion must wait for the third
    /// echo, not fire at a bare majority.
    #[test]
    fn broadcast_completes_at_third_echo_of_three() {
        kestrel_test::init();

        let store = Arc::new(
            kestrel_state::ChainStore::open(
                &kestrel_state::Config::ephemeral(),
                Network::Regtest,
            )
            .unwrap(),
        );
        let (group, _network_events, _peer_events) = PeerGroup::new(
            crate::Config::default(),
            store,
            Box::new(StaticDiscovery(Vec::new())),
        );

        let transaction = Arc::new(Transaction::new(
            1,
            Vec::new(),
            Vec::new(),
            LockTime::unlocked(),
        ));
        let txid = transaction.hash();

        // Register the broadcast as if three peers had been connected at
        // announcement time.
        let (completion_tx, mut completion_rx) = oneshot::channel();
        group.inner.broadcasts.lock().unwrap().insert(
            txid,
            BroadcastState {
                transaction,
                seen_by: HashSet::new(),
                threshold: broadcast_threshold(3),
                completion: Some(completion_tx),
            },
        );

        let peer = |n: u8| -> SocketAddr { format!("127.0.0.{}:8333", n).parse().unwrap() };

        assert!(group.record_broadcast_echo(peer(1), txid));
        assert!(completion_rx.try_recv().is_err(), "one echo is not enough");

        assert!(group.record_broadcast_echo(peer(2), txid));
        assert!(
            completion_rx.try_recv().is_err(),
            "two of three echoes is below the ceiling majority"
        );

        // A repeated echo from the same peer must not count twice.
        assert!(group.record_broadcast_echo(peer(2), txid));
        assert!(completion_rx.try_recv().is_err());

        assert!(group.record_broadcast_echo(peer(3), txid));
        assert!(matches!(completion_rx.try_recv(), Ok(Ok(()))));
    }
}
