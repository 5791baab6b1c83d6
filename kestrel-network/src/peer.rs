//! A single peer session: one TCP connection speaking the Bitcoin wire
//! protocol.
//!
//! Sessions move through `Dialed → HandshakeSent → HandshakeAck → Ready →
//! Closed`. [`connect`] performs the first three states inline and returns
//! a [`Peer`] handle plus a spawned worker task owning the socket. The
//! worker converts inbound messages to [`PeerEvent`]s; it never touches
//! wallet or chain state directly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use kestrel_chain::{block, transaction};

use crate::constants;
use crate::error::{HandshakeError, PeerError};
use crate::meta_addr::MetaAddr;
use crate::protocol::external::types::{Nonce, PeerServices, ProtocolVersion};
use crate::protocol::external::{
    Codec, GetHeaders, InventoryHash, MerkleBlockMessage, Message, VersionMessage,
};
use crate::Config;

/// Something a peer told us, tagged with who said it.
#[derive(Debug)]
pub struct PeerEvent {
    /// The reporting peer.
    pub addr: SocketAddr,
    /// What happened.
    pub kind: PeerEventKind,
}

/// The interesting inbound messages, after session-level handling.
#[derive(Debug)]
pub enum PeerEventKind {
    /// The peer advertised objects.
    Inv(Vec<InventoryHash>),
    /// The peer sent headers.
    Headers(Vec<block::CountedHeader>),
    /// The peer sent a filtered block whose merkle proof verified; the
    /// matched ids are in block order.
    MerkleBlock {
        /// The verified message.
        message: MerkleBlockMessage,
        /// The transaction ids the proof matched.
        matched: Vec<transaction::Hash>,
    },
    /// The peer sent a transaction.
    Tx(Arc<transaction::Transaction>),
    /// The peer sent a full block.
    Block(Arc<block::Block>),
    /// The peer lacks objects we requested.
    NotFound(Vec<InventoryHash>),
    /// The peer gossiped addresses.
    Addr(Vec<MetaAddr>),
    /// The peer requested objects from us (e.g. a broadcast transaction).
    GetData(Vec<InventoryHash>),
    /// The peer asked us for headers.
    GetHeaders(GetHeaders),
    /// The peer set a minimum relay fee rate.
    FeeFilter(u64),
    /// The session ended.
    Disconnected(PeerError),
}

struct PeerShared {
    /// Outstanding `getdata` entries; the permit inside each entry holds a
    /// slot of the in-flight window until the reply arrives.
    inflight: Mutex<HashMap<[u8; 32], tokio::sync::OwnedSemaphorePermit>>,
    /// Free in-flight window slots.
    window: Arc<Semaphore>,
    /// The peer's latest `feefilter` rate, satoshis per kilobyte.
    fee_filter: Mutex<u64>,
    /// Signalled by `Peer::close`; the worker exits on it.
    closed: tokio::sync::Notify,
    /// Cleared when the worker exits.
    alive: std::sync::atomic::AtomicBool,
}

/// A handle to a ready peer session.
#[derive(Clone)]
pub struct Peer {
    addr: SocketAddr,
    remote_version: ProtocolVersion,
    services: PeerServices,
    start_height: block::Height,
    outbound: mpsc::Sender<Message>,
    shared: Arc<PeerShared>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("addr", &self.addr)
            .field("version", &self.remote_version)
            .field("services", &self.services)
            .finish()
    }
}

impl Peer {
    /// The remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The negotiated remote protocol version.
    pub fn remote_version(&self) -> ProtocolVersion {
        self.remote_version
    }

    /// The services the peer advertised.
    pub fn services(&self) -> PeerServices {
        self.services
    }

    /// The chain height the peer claimed at handshake.
    pub fn start_height(&self) -> block::Height {
        self.start_height
    }

    /// The peer's current minimum relay fee rate (sat/kB).
    pub fn fee_filter(&self) -> u64 {
        *self.shared.fee_filter.lock().expect("fee filter lock poisoned")
    }

    /// Whether the session worker is still running.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Queue an outbound message.
    ///
    /// The queue is bounded; a full queue suspends the caller, which is the
    /// backpressure the group relies on.
    pub async fn send(&self, message: Message) -> Result<(), PeerError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| PeerError::Closed)
    }

    /// Request objects by hash with `getdata`.
    ///
    /// Hashes already in flight are coalesced away. Each new hash occupies
    /// an in-flight window slot until its reply (or `notfound`) arrives;
    /// when the window is full this suspends.
    pub async fn request_data(&self, items: Vec<InventoryHash>) -> Result<(), PeerError> {
        let mut fresh = Vec::with_capacity(items.len());
        for item in items {
            let key = item.hash_bytes();
            {
                let inflight = self.shared.inflight.lock().expect("inflight lock poisoned");
                if inflight.contains_key(&key) {
                    trace!(addr = %self.addr, "coalesced duplicate getdata");
                    continue;
                }
            }
            let permit = self
                .shared
                .window
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PeerError::Closed)?;
            self.shared
                .inflight
                .lock()
                .expect("inflight lock poisoned")
                .insert(key, permit);
            fresh.push(item);
        }

        if fresh.is_empty() {
            return Ok(());
        }
        self.send(Message::GetData(fresh)).await
    }

    /// Close the session; the worker exits at its next loop turn.
    pub fn close(&self) {
        self.shared.closed.notify_waiters();
        self.shared.window.close();
    }
}

/// Dial `addr` and complete the version/verack handshake.
///
/// `recent_nonces` holds nonces from our own recent version messages; a
/// peer echoing one is ourselves through a loop, and is dropped.
pub async fn connect(
    addr: SocketAddr,
    config: &Config,
    best_height: block::Height,
    events: mpsc::Sender<PeerEvent>,
    recent_nonces: Arc<Mutex<Vec<u64>>>,
) -> Result<Peer, HandshakeError> {
    let connect_and_shake = async {
        let stream = TcpStream::connect(addr).await?;
        let local_addr = stream.local_addr()?;

        let codec = Codec::builder()
            .for_network(config.network)
            .with_metrics_label(addr.to_string())
            .finish();
        let mut framed = Framed::new(stream, codec);

        let nonce = Nonce::random();
        {
            let mut nonces = recent_nonces.lock().expect("nonce lock poisoned");
            nonces.push(nonce.0);
            let excess = nonces.len().saturating_sub(constants::SELF_CONNECTION_NONCES);
            nonces.drain(..excess);
        }

        let our_version = VersionMessage::new(
            constants::CURRENT_VERSION,
            addr,
            PeerServices::NODE_NETWORK,
            PeerServices::empty(),
            local_addr,
            nonce,
            config.user_agent.clone(),
            best_height,
            config.relay,
        );
        framed.send(Message::Version(our_version)).await?;

        // The remote's version and verack can arrive in either order.
        let mut remote_version: Option<VersionMessage> = None;
        let mut got_verack = false;
        while remote_version.is_none() || !got_verack {
            let message = match framed.next().await {
                Some(message) => message?,
                None => {
                    return Err(HandshakeError::Io(std::io::Error::from(
                        std::io::ErrorKind::UnexpectedEof,
                    )))
                }
            };
            match message {
                Message::Version(version) => {
                    if recent_nonces
                        .lock()
                        .expect("nonce lock poisoned")
                        .contains(&version.nonce.0)
                    {
                        return Err(HandshakeError::ConnectedToSelf);
                    }
                    if version.version < constants::MIN_PEER_VERSION {
                        return Err(HandshakeError::ObsoleteVersion(version.version.0));
                    }
                    framed.send(Message::Verack).await?;
                    remote_version = Some(version);
                }
                Message::Verack => got_verack = true,
                _ => return Err(HandshakeError::UnexpectedMessage),
            }
        }
        let remote_version = remote_version.expect("loop exits with version set");

        // Speak the lower of the two versions from here on.
        let negotiated = remote_version.version.min(constants::CURRENT_VERSION);
        framed.codec_mut().reconfigure_version(negotiated);

        Ok::<_, HandshakeError>((framed, remote_version, negotiated))
    };

    let (framed, remote_version, negotiated) =
        timeout(config.handshake_timeout, connect_and_shake)
            .await
            .map_err(|_| HandshakeError::Timeout)??;

    debug!(
        %addr,
        version = %negotiated,
        user_agent = %remote_version.user_agent,
        height = remote_version.best_block.0,
        "handshake complete"
    );
    metrics::counter!("peers.connected", 1);

    let (outbound_tx, outbound_rx) = mpsc::channel(constants::OUTBOUND_QUEUE_LEN);
    let shared = Arc::new(PeerShared {
        inflight: Mutex::new(HashMap::new()),
        window: Arc::new(Semaphore::new(constants::MAX_INFLIGHT_REQUESTS)),
        fee_filter: Mutex::new(0),
        closed: tokio::sync::Notify::new(),
        alive: std::sync::atomic::AtomicBool::new(true),
    });

    let peer = Peer {
        addr,
        remote_version: remote_version.version,
        services: remote_version.services,
        start_height: remote_version.best_block,
        outbound: outbound_tx,
        shared: shared.clone(),
    };

    tokio::spawn(run_session(
        addr,
        framed,
        outbound_rx,
        events,
        shared,
        config.clone(),
    ));

    Ok(peer)
}

/// The session worker: pumps the socket until something closes it.
async fn run_session(
    addr: SocketAddr,
    mut framed: Framed<TcpStream, Codec>,
    mut outbound: mpsc::Receiver<Message>,
    events: mpsc::Sender<PeerEvent>,
    shared: Arc<PeerShared>,
    config: Config,
) {
    let mut ping_interval = tokio::time::interval(config.ping_interval);
    // The first tick fires immediately; skip it so we don't ping during
    // the post-handshake burst.
    ping_interval.tick().await;
    let mut pending_ping: Option<(Nonce, Instant)> = None;

    let close_reason = loop {
        let ping_deadline = pending_ping
            .map(|(_, deadline)| deadline)
            .unwrap_or_else(|| Instant::now() + config.ping_interval);

        tokio::select! {
            inbound = framed.next() => {
                let message = match inbound {
                    Some(Ok(message)) => message,
                    Some(Err(error)) => break classify_decode_error(error),
                    None => break PeerError::Io(std::io::Error::from(
                        std::io::ErrorKind::UnexpectedEof,
                    )),
                };
                match handle_inbound(addr, message, &mut framed, &events, &shared, &mut pending_ping).await {
                    Ok(()) => {}
                    Err(reason) => break reason,
                }
            }

            queued = outbound.recv() => {
                match queued {
                    Some(message) => {
                        if let Err(error) = framed.send(message).await {
                            break classify_decode_error(error);
                        }
                    }
                    // All handles dropped or close() called: orderly exit.
                    None => break PeerError::Closed,
                }
            }

            _ = ping_interval.tick(), if pending_ping.is_none() => {
                let nonce = Nonce::random();
                pending_ping = Some((nonce, Instant::now() + config.ping_timeout));
                if let Err(error) = framed.send(Message::Ping(nonce)).await {
                    break classify_decode_error(error);
                }
            }

            _ = sleep_until(ping_deadline), if pending_ping.is_some() => {
                break PeerError::PingTimeout;
            }

            _ = shared.closed.notified() => {
                break PeerError::Closed;
            }
        }
    };

    shared
        .alive
        .store(false, std::sync::atomic::Ordering::Relaxed);
    shared.window.close();
    shared
        .inflight
        .lock()
        .expect("inflight lock poisoned")
        .clear();

    if close_reason.is_misbehavior() {
        warn!(%addr, reason = %close_reason, "closing misbehaving peer");
        metrics::counter!("peers.misbehavior", 1);
    } else {
        debug!(%addr, reason = %close_reason, "peer closed");
    }

    let _ = events
        .send(PeerEvent {
            addr,
            kind: PeerEventKind::Disconnected(close_reason),
        })
        .await;
}

fn classify_decode_error(error: kestrel_chain::SerializationError) -> PeerError {
    use kestrel_chain::SerializationError as E;
    match error {
        E::Io(io_error) => PeerError::Io(io_error),
        E::Parse("supplied magic did not meet expectations") => PeerError::WrongMagic,
        E::Parse("supplied message checksum does not match computed checksum") => {
            PeerError::BadChecksum
        }
        E::Parse("body length exceeded maximum size") => PeerError::OversizedPayload,
        other => PeerError::Malformed(other),
    }
}

fn release_inflight(shared: &PeerShared, hash: &[u8; 32]) {
    shared
        .inflight
        .lock()
        .expect("inflight lock poisoned")
        .remove(hash);
}

async fn handle_inbound(
    addr: SocketAddr,
    message: Message,
    framed: &mut Framed<TcpStream, Codec>,
    events: &mpsc::Sender<PeerEvent>,
    shared: &Arc<PeerShared>,
    pending_ping: &mut Option<(Nonce, Instant)>,
) -> Result<(), PeerError> {
    let kind = match message {
        // Session-level messages, handled without bothering the group.
        Message::Ping(nonce) => {
            framed
                .send(Message::Pong(nonce))
                .await
                .map_err(classify_decode_error)?;
            return Ok(());
        }
        Message::Pong(nonce) => {
            match pending_ping {
                Some((expected, _)) if *expected == nonce => *pending_ping = None,
                _ => trace!(%addr, "ignoring unsolicited pong"),
            }
            return Ok(());
        }
        Message::Reject {
            message,
            ccode,
            reason,
            ..
        } => {
            debug!(%addr, rejected = %message, ?ccode, %reason, "peer rejected our message");
            return Ok(());
        }
        Message::SendHeaders | Message::Mempool | Message::GetAddr => {
            // Valid requests we choose not to serve.
            return Ok(());
        }
        Message::FilterLoad { .. } | Message::FilterAdd { .. } | Message::FilterClear => {
            // We are the filtering client, not the server.
            return Err(PeerError::UnexpectedMessage("filter command from remote"));
        }
        Message::Version(_) | Message::Verack => {
            return Err(PeerError::UnexpectedMessage("handshake message repeated"));
        }
        Message::GetBlocks(_) => {
            // Header-only node: nothing to announce.
            return Ok(());
        }

        Message::FeeFilter(rate) => {
            *shared.fee_filter.lock().expect("fee filter lock poisoned") = rate;
            PeerEventKind::FeeFilter(rate)
        }

        Message::MerkleBlock(message) => {
            // Verify the proof at the session boundary, so a forged proof
            // is misbehavior here and downstream code sees only valid ones.
            let matched = message
                .extract_matches()
                .map_err(PeerError::Malformed)?;
            release_inflight(shared, &message.block_header.hash().0);
            PeerEventKind::MerkleBlock { message, matched }
        }
        Message::Tx(tx) => {
            release_inflight(shared, &tx.hash().0);
            PeerEventKind::Tx(tx)
        }
        Message::Block(block) => {
            release_inflight(shared, &block.hash().0);
            PeerEventKind::Block(block)
        }
        Message::NotFound(items) => {
            for item in items.iter() {
                release_inflight(shared, &item.hash_bytes());
            }
            PeerEventKind::NotFound(items)
        }

        Message::Inv(items) => PeerEventKind::Inv(items),
        Message::Headers(headers) => PeerEventKind::Headers(headers),
        Message::Addr(addrs) => PeerEventKind::Addr(addrs),
        Message::GetData(items) => PeerEventKind::GetData(items),
        Message::GetHeaders(request) => PeerEventKind::GetHeaders(request),
    };

    events
        .send(PeerEvent { addr, kind })
        .await
        .map_err(|_| PeerError::Closed)
}
