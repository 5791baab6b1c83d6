use std::convert::TryFrom;
use std::io::Cursor;
use std::sync::Arc;

use proptest::prelude::*;

use crate::amount::{Amount, NonNegative};
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize};
use crate::transaction::{LockTime, Transaction};
use crate::transparent;

use super::*;

#[test]
fn header_serializes_to_80_bytes() {
    kestrel_test::init();

    let header = crate::parameters::genesis_block_header(crate::parameters::Network::Mainnet);
    let bytes = header.bitcoin_serialize_to_vec().unwrap();
    assert_eq!(bytes.len(), Header::len());
}

#[test]
fn header_hash_is_cached_by_deserialization() {
    kestrel_test::init();

    let header = crate::parameters::genesis_block_header(crate::parameters::Network::Mainnet);
    let bytes = header.bitcoin_serialize_to_vec().unwrap();
    let parsed = Header::bitcoin_deserialize(&bytes[..]).unwrap();

    assert!(parsed.cached_hash().is_some());
    assert_eq!(parsed.hash(), header.hash());
}

#[test]
fn hash_display_is_reversed_hex() {
    kestrel_test::init();

    let mut bytes = [0u8; 32];
    bytes[0] = 0xab;
    let hash = Hash(bytes);
    let displayed = hash.to_string();
    assert!(displayed.ends_with("ab"));
    assert_eq!(displayed.parse::<Hash>().unwrap(), hash);
}

#[test]
fn block_roundtrip_with_transactions() {
    kestrel_test::init();

    let coinbase = Transaction::new(
        1,
        vec![transparent::Input::Coinbase {
            data: transparent::CoinbaseData(b"kestrel test block".to_vec()),
            sequence: u32::MAX,
        }],
        vec![transparent::Output {
            value: Amount::<NonNegative>::try_from(50 * crate::amount::COIN).unwrap(),
            lock_script: transparent::Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    );

    let header = crate::parameters::genesis_block_header(crate::parameters::Network::Regtest);
    let block = Block {
        header,
        transactions: vec![Arc::new(coinbase)],
    };

    let bytes = block.bitcoin_serialize_to_vec().unwrap();
    let parsed = Block::bitcoin_deserialize(&bytes[..]).unwrap();
    assert_eq!(block, parsed);
}

#[test]
fn stored_block_accumulates_work_and_height() {
    kestrel_test::init();

    let genesis_header =
        crate::parameters::genesis_block_header(crate::parameters::Network::Regtest);
    let genesis = StoredBlock::genesis(genesis_header).unwrap();
    assert_eq!(genesis.height, Height(0));

    let child_header = Header::new(
        1,
        genesis.hash(),
        genesis_header.merkle_root,
        genesis_header.time,
        genesis_header.difficulty_threshold,
        7,
    );
    let child = StoredBlock::child_of(&genesis, child_header).unwrap();
    assert_eq!(child.height, Height(1));
    assert!(child.chain_work > genesis.chain_work);

    let roundtripped =
        StoredBlock::bitcoin_deserialize(&child.bitcoin_serialize_to_vec().unwrap()[..]).unwrap();
    assert_eq!(roundtripped, child);
}

proptest! {
    #[test]
    fn header_roundtrip(header in any::<Header>()) {
        kestrel_test::init();

        let mut bytes = Cursor::new(Vec::new());
        header.bitcoin_serialize(&mut bytes)?;

        bytes.set_position(0);
        let other_header = Header::bitcoin_deserialize(&mut bytes)?;

        prop_assert_eq![header, other_header];
    }

    #[test]
    fn counted_header_roundtrip(header in any::<Header>(), count in 0usize..500) {
        kestrel_test::init();

        let counted = CountedHeader { header, transaction_count: count };
        let bytes = counted.bitcoin_serialize_to_vec().unwrap();
        let parsed = CountedHeader::bitcoin_deserialize(&bytes[..])?;

        prop_assert_eq![counted, parsed];
    }

    #[test]
    fn header_reserialization_is_identity(header in any::<Header>()) {
        kestrel_test::init();

        let bytes = header.bitcoin_serialize_to_vec().unwrap();
        let parsed = Header::bitcoin_deserialize(&bytes[..])?;
        let bytes2 = parsed.bitcoin_serialize_to_vec().unwrap();

        prop_assert_eq![bytes, bytes2];
    }
}
