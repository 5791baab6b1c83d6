//! Peer session tests against a scripted remote on a localhost socket.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use kestrel_chain::block;
use kestrel_chain::parameters::Network;
use kestrel_network::protocol::external::types::{Nonce, PeerServices};
use kestrel_network::{
    peer, Codec, Config, InventoryHash, Message, PeerError, PeerEvent, PeerEventKind,
    VersionMessage,
};

fn test_config() -> Config {
    Config {
        network: Network::Regtest,
        handshake_timeout: Duration::from_secs(5),
        ping_interval: Duration::from_secs(60),
        ping_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

/// Accept one inbound connection and complete the server side of the
/// handshake, returning the framed stream.
async fn accept_and_shake(
    listener: TcpListener,
) -> Framed<tokio::net::TcpStream, Codec> {
    let (stream, peer_addr) = listener.accept().await.unwrap();
    let codec = Codec::builder().for_network(Network::Regtest).finish();
    let mut framed = Framed::new(stream, codec);

    // Expect the client's version first.
    match framed.next().await.unwrap().unwrap() {
        Message::Version(_) => {}
        other => panic!("expected version, got {:?}", other),
    }

    let server_version = VersionMessage::new(
        kestrel_network::constants::CURRENT_VERSION,
        peer_addr,
        PeerServices::empty(),
        PeerServices::NODE_NETWORK | PeerServices::NODE_BLOOM,
        "127.0.0.1:0".parse().unwrap(),
        Nonce::random(),
        "/scripted-peer/".into(),
        block::Height(100),
        false,
    );
    framed.send(Message::Version(server_version)).await.unwrap();
    framed.send(Message::Verack).await.unwrap();

    // Expect the client's verack.
    match framed.next().await.unwrap().unwrap() {
        Message::Verack => {}
        other => panic!("expected verack, got {:?}", other),
    }

    framed
}

async fn connect_pair() -> (
    kestrel_network::Peer,
    Framed<tokio::net::TcpStream, Codec>,
    mpsc::Receiver<PeerEvent>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let (events_tx, events_rx) = mpsc::channel(32);
    let nonces = Arc::new(Mutex::new(Vec::new()));

    let server = tokio::spawn(accept_and_shake(listener));
    let peer = peer::connect(addr, &test_config(), block::Height(0), events_tx, nonces)
        .await
        .expect("handshake should succeed");
    let framed = server.await.unwrap();

    (peer, framed, events_rx)
}

#[tokio::test]
async fn handshake_reaches_ready() {
    kestrel_test::init();

    let (peer, _framed, _events) = connect_pair().await;
    assert!(peer.is_alive());
    assert_eq!(peer.start_height(), block::Height(100));
    assert!(peer.services().contains(PeerServices::NODE_NETWORK));
}

#[tokio::test]
async fn pings_are_answered() {
    kestrel_test::init();

    let (_peer, mut framed, _events) = connect_pair().await;

    framed.send(Message::Ping(Nonce(0xDEAD))).await.unwrap();
    match framed.next().await.unwrap().unwrap() {
        Message::Pong(nonce) => assert_eq!(nonce, Nonce(0xDEAD)),
        other => panic!("expected pong, got {:?}", other),
    }
}

#[tokio::test]
async fn inv_events_are_delivered() {
    kestrel_test::init();

    let (_peer, mut framed, mut events) = connect_pair().await;

    let items = vec![InventoryHash::Tx(kestrel_chain::transaction::Hash([9; 32]))];
    framed.send(Message::Inv(items.clone())).await.unwrap();

    match events.recv().await.unwrap().kind {
        PeerEventKind::Inv(received) => assert_eq!(received, items),
        other => panic!("expected inv event, got {:?}", other),
    }
}

#[tokio::test]
async fn duplicate_getdata_is_coalesced() {
    kestrel_test::init();

    let (peer, mut framed, _events) = connect_pair().await;

    let item = InventoryHash::Block(block::Hash([3; 32]));
    peer.request_data(vec![item]).await.unwrap();
    peer.request_data(vec![item]).await.unwrap();

    // Exactly one getdata arrives; follow it with a ping and confirm the
    // next message is its pong, not a second getdata.
    match framed.next().await.unwrap().unwrap() {
        Message::GetData(items) => assert_eq!(items, vec![item]),
        other => panic!("expected getdata, got {:?}", other),
    }
    framed.send(Message::Ping(Nonce(7))).await.unwrap();
    match framed.next().await.unwrap().unwrap() {
        Message::Pong(_) => {}
        other => panic!("expected pong (no duplicate getdata), got {:?}", other),
    }
}

#[tokio::test]
async fn remote_close_reports_disconnect() {
    kestrel_test::init();

    let (peer, framed, mut events) = connect_pair().await;
    drop(framed);

    match events.recv().await.unwrap().kind {
        PeerEventKind::Disconnected(reason) => {
            assert!(!reason.is_misbehavior(), "remote close is not misbehavior");
        }
        other => panic!("expected disconnect event, got {:?}", other),
    }
    assert!(!peer.is_alive());
}

#[tokio::test]
async fn filter_command_from_remote_is_misbehavior() {
    kestrel_test::init();

    let (_peer, mut framed, mut events) = connect_pair().await;

    framed
        .send(Message::FilterAdd { data: vec![1, 2, 3] })
        .await
        .unwrap();

    match events.recv().await.unwrap().kind {
        PeerEventKind::Disconnected(reason) => {
            assert!(matches!(reason, PeerError::UnexpectedMessage(_)));
            assert!(reason.is_misbehavior());
        }
        other => panic!("expected misbehavior disconnect, got {:?}", other),
    }
}
