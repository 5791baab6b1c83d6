//! End-to-end interpreter tests: real signatures over real sighashes.

use std::convert::TryFrom;

use kestrel_chain::amount::{Amount, COIN};
use kestrel_chain::transaction::{LockTime, SighashType, Transaction};
use kestrel_chain::transparent::{self, hash160, Script};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::opcodes::*;
use crate::template;
use crate::{verify, ScriptError, VerifyFlags};

struct TestKey {
    secret: SecretKey,
    public: PublicKey,
}

fn test_key(seed: u8) -> TestKey {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[seed; 32]).expect("constant seed is a valid key");
    let public = PublicKey::from_secret_key(&secp, &secret);
    TestKey { secret, public }
}

/// A one-input transaction paying one coin onward, for signing tests.
fn spending_tx() -> Transaction {
    Transaction::new(
        1,
        vec![transparent::Input::PrevOut {
            outpoint: transparent::OutPoint {
                hash: kestrel_chain::transaction::Hash([0x22; 32]),
                index: 0,
            },
            unlock_script: Script(Vec::new()),
            sequence: u32::MAX,
        }],
        vec![transparent::Output {
            value: Amount::try_from(COIN).unwrap(),
            lock_script: template::pay_to_pub_key_hash(&[0x33; 20]),
        }],
        LockTime::unlocked(),
    )
}

fn sign(tx: &Transaction, lock_script: &Script, key: &TestKey) -> Vec<u8> {
    let secp = Secp256k1::new();
    let sighash = tx.sighash(0, lock_script, SighashType::ALL);
    let message = Message::from_slice(sighash.as_bytes()).unwrap();
    let mut element = secp.sign(&message, &key.secret).serialize_der().to_vec();
    element.push(SighashType::ALL.0 as u8);
    element
}

#[test]
fn p2pkh_spend_verifies() {
    kestrel_test::init();

    let key = test_key(0x51);
    let lock_script = template::pay_to_pub_key_hash(&hash160(&key.public.serialize()));

    // The signature commits to the sighash, which blanks unlock scripts, so
    // the transaction itself doesn't carry the unlock script here.
    let tx = spending_tx();
    let signature = sign(&tx, &lock_script, &key);
    let unlock_script =
        template::unlock_pay_to_pub_key_hash(&signature, &key.public.serialize());

    assert_eq!(verify(&unlock_script, &lock_script, &tx, 0), Ok(()));
}

#[test]
fn p2pkh_mutated_signature_fails() {
    kestrel_test::init();

    let key = test_key(0x52);
    let lock_script = template::pay_to_pub_key_hash(&hash160(&key.public.serialize()));
    let tx = spending_tx();
    let signature = sign(&tx, &lock_script, &key);

    // Flip one bit in every byte of the signature body in turn; each result
    // must fail one way or another, never verify.
    for index in 0..signature.len() {
        let mut mutated = signature.clone();
        mutated[index] ^= 0x10;
        let unlock_script =
            template::unlock_pay_to_pub_key_hash(&mutated, &key.public.serialize());
        assert!(
            verify(&unlock_script, &lock_script, &tx, 0).is_err(),
            "mutating signature byte {} must not verify",
            index
        );
    }
}

#[test]
fn p2pkh_wrong_key_fails() {
    kestrel_test::init();

    let key = test_key(0x53);
    let other = test_key(0x54);
    let lock_script = template::pay_to_pub_key_hash(&hash160(&key.public.serialize()));
    let tx = spending_tx();

    let signature = sign(&tx, &lock_script, &other);
    let unlock_script =
        template::unlock_pay_to_pub_key_hash(&signature, &other.public.serialize());

    // The pubkey hash doesn't match, so EQUALVERIFY aborts.
    assert_eq!(
        verify(&unlock_script, &lock_script, &tx, 0),
        Err(ScriptError::VerifyFailed)
    );
}

#[test]
fn p2pk_spend_verifies() {
    kestrel_test::init();

    let key = test_key(0x55);
    let lock_script = template::pay_to_pub_key(&key.public.serialize());
    let tx = spending_tx();

    let signature = sign(&tx, &lock_script, &key);
    let unlock_script = template::unlock_pay_to_pub_key(&signature);

    assert_eq!(verify(&unlock_script, &lock_script, &tx, 0), Ok(()));
}

#[test]
fn multisig_two_of_three_verifies() {
    kestrel_test::init();

    let keys = [test_key(0x56), test_key(0x57), test_key(0x58)];
    let pub_keys: Vec<Vec<u8>> = keys.iter().map(|k| k.public.serialize().to_vec()).collect();
    let lock_script = template::multisig(2, &pub_keys);
    let tx = spending_tx();

    // Sign with keys 0 and 2, in key order.
    let mut unlock = Vec::new();
    unlock.push(OP_0); // the dummy
    template::push_data(&mut unlock, &sign(&tx, &lock_script, &keys[0]));
    template::push_data(&mut unlock, &sign(&tx, &lock_script, &keys[2]));
    let unlock_script = Script(unlock);

    assert_eq!(verify(&unlock_script, &lock_script, &tx, 0), Ok(()));
}

#[test]
fn multisig_out_of_order_signatures_fail() {
    kestrel_test::init();

    let keys = [test_key(0x59), test_key(0x5a), test_key(0x5b)];
    let pub_keys: Vec<Vec<u8>> = keys.iter().map(|k| k.public.serialize().to_vec()).collect();
    let lock_script = template::multisig(2, &pub_keys);
    let tx = spending_tx();

    // Key order reversed: greedy matching cannot satisfy this.
    let mut unlock = Vec::new();
    unlock.push(OP_0);
    template::push_data(&mut unlock, &sign(&tx, &lock_script, &keys[2]));
    template::push_data(&mut unlock, &sign(&tx, &lock_script, &keys[0]));
    let unlock_script = Script(unlock);

    assert_eq!(
        verify(&unlock_script, &lock_script, &tx, 0),
        Err(ScriptError::EvalFalse)
    );
}

#[test]
fn p2sh_wrapped_script_verifies() {
    kestrel_test::init();

    // Redeem script: OP_1 (anyone can spend, the simplest redeem).
    let redeem_script = Script(vec![OP_1]);
    let lock_script = template::pay_to_script_hash(&hash160(redeem_script.as_bytes()));
    let tx = spending_tx();

    let mut unlock = Vec::new();
    template::push_data(&mut unlock, redeem_script.as_bytes());
    let unlock_script = Script(unlock);

    assert_eq!(verify(&unlock_script, &lock_script, &tx, 0), Ok(()));
}

#[test]
fn p2sh_unlock_must_be_push_only() {
    kestrel_test::init();

    let redeem_script = Script(vec![OP_1]);
    let lock_script = template::pay_to_script_hash(&hash160(redeem_script.as_bytes()));
    let tx = spending_tx();

    // OP_NOP makes the unlock script non-push-only.
    let mut unlock = vec![OP_NOP];
    template::push_data(&mut unlock, redeem_script.as_bytes());
    let unlock_script = Script(unlock);

    assert!(verify(&unlock_script, &lock_script, &tx, 0).is_err());
}

#[test]
fn conditional_and_arithmetic_execution() {
    kestrel_test::init();

    let tx = spending_tx();

    // 2 3 ADD 5 NUMEQUAL -> truthy.
    let lock_script = Script(vec![OP_2, OP_3, OP_ADD, OP_5, OP_NUMEQUAL]);
    assert_eq!(verify(&Script(vec![]), &lock_script, &tx, 0), Ok(()));

    // IF branch: 1 IF 2 ELSE 3 ENDIF 2 NUMEQUAL.
    let lock_script = Script(vec![OP_1, OP_IF, OP_2, OP_ELSE, OP_3, OP_ENDIF, OP_2, OP_NUMEQUAL]);
    assert_eq!(verify(&Script(vec![]), &lock_script, &tx, 0), Ok(()));

    // Unbalanced conditional.
    let lock_script = Script(vec![OP_1, OP_IF, OP_2]);
    assert_eq!(
        verify(&Script(vec![]), &lock_script, &tx, 0),
        Err(ScriptError::UnbalancedConditional)
    );
}

#[test]
fn op_return_aborts() {
    kestrel_test::init();

    let tx = spending_tx();
    let lock_script = Script(vec![OP_RETURN]);
    assert_eq!(
        verify(&Script(vec![OP_1]), &lock_script, &tx, 0),
        Err(ScriptError::OpReturn)
    );
}

#[test]
fn disabled_opcode_rejected_even_unexecuted() {
    kestrel_test::init();

    let tx = spending_tx();
    // OP_CAT sits in the never-taken branch.
    let lock_script = Script(vec![OP_1, OP_0, OP_IF, OP_CAT, OP_ENDIF]);
    assert_eq!(
        verify(&Script(vec![]), &lock_script, &tx, 0),
        Err(ScriptError::DisabledOpcode)
    );
}

#[test]
fn checklocktimeverify_enforced() {
    kestrel_test::init();

    let mut tx = spending_tx();
    tx.lock_time = LockTime::from(100);
    // CLTV requires a non-final sequence.
    if let transparent::Input::PrevOut { sequence, .. } = &mut tx.inputs[0] {
        *sequence = 0xffff_fffe;
    }

    // Requires height 90, tx locked at 100: satisfied.
    let mut lock = Vec::new();
    template::push_data(&mut lock, &crate::ScriptNum(90).encode());
    lock.extend_from_slice(&[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_1]);
    assert_eq!(verify(&Script(vec![]), &Script(lock), &tx, 0), Ok(()));

    // Requires height 200: not yet satisfied.
    let mut lock = Vec::new();
    template::push_data(&mut lock, &crate::ScriptNum(200).encode());
    lock.extend_from_slice(&[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_1]);
    assert_eq!(
        verify(&Script(vec![]), &Script(lock), &tx, 0),
        Err(ScriptError::LocktimeNotSatisfied)
    );
}

#[test]
fn witness_v0_keyhash_spend_verifies() {
    kestrel_test::init();

    let key = test_key(0x5c);
    let program = hash160(&key.public.serialize());
    let lock_script = template::pay_to_witness_pub_key_hash(&program);

    let mut tx = spending_tx();
    // The implicit script the witness signature commits to.
    let script_code = template::pay_to_pub_key_hash(&program);
    let signature = sign(&tx, &script_code, &key);
    tx.witnesses = vec![vec![signature, key.public.serialize().to_vec()]];

    assert_eq!(verify(&Script(vec![]), &lock_script, &tx, 0), Ok(()));

    // A missing witness is a mismatch.
    tx.witnesses = vec![vec![]];
    assert_eq!(
        verify(&Script(vec![]), &lock_script, &tx, 0),
        Err(ScriptError::WitnessProgramMismatch)
    );
}

#[test]
fn op_count_limit_enforced() {
    kestrel_test::init();

    let tx = spending_tx();
    // 202 OP_NOPs after pushing true.
    let mut lock = vec![OP_1];
    lock.extend(std::iter::repeat(OP_NOP).take(202));
    assert_eq!(
        verify(&Script(vec![]), &Script(lock), &tx, 0),
        Err(ScriptError::OpCount)
    );
}

#[test]
fn verify_without_flags_skips_soft_forks() {
    kestrel_test::init();

    let tx = spending_tx();
    // CLTV as a NOP when its flag is off.
    let mut lock = Vec::new();
    template::push_data(&mut lock, &crate::ScriptNum(1_000_000).encode());
    lock.extend_from_slice(&[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_1]);
    assert_eq!(
        crate::verify_with_flags(&Script(vec![]), &Script(lock), &tx, 0, VerifyFlags::empty()),
        Ok(())
    );
}
