use std::convert::TryFrom;
use std::io::Cursor;

use proptest::prelude::*;

use crate::amount::{Amount, COIN};
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize};
use crate::transparent::{self, Script};

use super::*;

fn two_input_tx() -> Transaction {
    let input = |byte: u8| transparent::Input::PrevOut {
        outpoint: transparent::OutPoint {
            hash: Hash([byte; 32]),
            index: byte as u32,
        },
        unlock_script: Script(vec![byte; 3]),
        sequence: u32::MAX,
    };
    Transaction::new(
        1,
        vec![input(1), input(2)],
        vec![transparent::Output {
            value: Amount::try_from(COIN).unwrap(),
            lock_script: Script(vec![0x51]),
        }],
        LockTime::unlocked(),
    )
}

#[test]
fn txid_ignores_witness_data() {
    kestrel_test::init();

    let legacy = two_input_tx();
    let mut segwit = legacy.clone();
    segwit.witnesses = vec![vec![vec![0xaa; 72]], vec![]];

    assert_eq!(legacy.hash(), segwit.hash());
}

#[test]
fn segwit_roundtrip() {
    kestrel_test::init();

    let mut tx = two_input_tx();
    tx.witnesses = vec![vec![vec![0xaa; 72], vec![0x02; 33]], vec![]];

    let bytes = tx.bitcoin_serialize_to_vec().unwrap();
    // Marker and flag directly after the version.
    assert_eq!(&bytes[4..6], &[0x00, 0x01]);

    let parsed = Transaction::bitcoin_deserialize(&bytes[..]).unwrap();
    assert_eq!(tx, parsed);
}

#[test]
fn segwit_bad_flag_rejected() {
    kestrel_test::init();

    let mut tx = two_input_tx();
    tx.witnesses = vec![vec![vec![0xaa]], vec![]];
    let mut bytes = tx.bitcoin_serialize_to_vec().unwrap();
    bytes[5] = 0x02;

    assert!(Transaction::bitcoin_deserialize(&bytes[..]).is_err());
}

#[test]
fn len_matches_serialized_length() {
    kestrel_test::init();

    let legacy = two_input_tx();
    assert_eq!(
        legacy.len(),
        legacy.bitcoin_serialize_to_vec().unwrap().len()
    );

    let mut segwit = legacy;
    segwit.witnesses = vec![vec![vec![0xaa; 72]], vec![vec![0x02; 33]]];
    assert_eq!(
        segwit.len(),
        segwit.bitcoin_serialize_to_vec().unwrap().len()
    );
}

#[test]
fn sighash_single_out_of_range_is_one() {
    kestrel_test::init();

    let tx = two_input_tx();
    // Input 1 has no matching output.
    let sighash = tx.sighash(1, &Script(vec![0x51]), SighashType::SINGLE);
    let mut one = [0u8; 32];
    one[0] = 1;
    assert_eq!(sighash.0, one);
}

#[test]
fn sighash_differs_per_input() {
    kestrel_test::init();

    let tx = two_input_tx();
    let script = Script(vec![0x51]);
    assert_ne!(
        tx.sighash(0, &script, SighashType::ALL),
        tx.sighash(1, &script, SighashType::ALL)
    );
}

#[test]
fn sighash_commits_to_hash_type() {
    kestrel_test::init();

    let tx = two_input_tx();
    let script = Script(vec![0x51]);
    assert_ne!(
        tx.sighash(0, &script, SighashType::ALL),
        tx.sighash(0, &script, SighashType::NONE)
    );
    assert_ne!(
        tx.sighash(0, &script, SighashType::ALL),
        tx.sighash(
            0,
            &script,
            SighashType(SighashType::ALL.0 | SighashType::ANYONE_CAN_PAY_FLAG)
        )
    );
}

#[test]
fn coinbase_detection() {
    kestrel_test::init();

    let coinbase = Transaction::new(
        1,
        vec![transparent::Input::Coinbase {
            data: transparent::CoinbaseData(vec![0x01, 0x02]),
            sequence: u32::MAX,
        }],
        vec![],
        LockTime::unlocked(),
    );
    assert!(coinbase.is_coinbase());
    assert!(!two_input_tx().is_coinbase());
    assert_eq!(coinbase.spent_outpoints().count(), 0);
    assert_eq!(two_input_tx().spent_outpoints().count(), 2);
}

proptest! {
    #[test]
    fn transaction_roundtrip(tx in any::<Transaction>()) {
        kestrel_test::init();

        let mut bytes = Cursor::new(Vec::new());
        tx.bitcoin_serialize(&mut bytes)?;

        bytes.set_position(0);
        let parsed = Transaction::bitcoin_deserialize(&mut bytes)?;

        prop_assert_eq![tx, parsed];
    }

    #[test]
    fn transaction_len_is_exact(tx in any::<Transaction>()) {
        kestrel_test::init();

        prop_assert_eq![tx.len(), tx.bitcoin_serialize_to_vec().unwrap().len()];
    }
}
