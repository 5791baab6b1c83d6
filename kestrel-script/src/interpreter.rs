//! The script stack machine.

use bitflags::bitflags;
use kestrel_chain::transaction::{LockTime, SighashType, Transaction};
use kestrel_chain::transparent::{hash160, Script};
use ripemd160::Ripemd160;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::num::ScriptNum;
use crate::opcodes::*;
use crate::signature::{check_pub_key, CheckedSignature};
use crate::ScriptError;

/// The consensus limit on script size, in bytes.
const MAX_SCRIPT_SIZE: usize = 10_000;
/// The consensus limit on a pushed element, in bytes.
const MAX_ELEMENT_SIZE: usize = 520;
/// The consensus limit on executed non-push operations per script.
const MAX_OPS_PER_SCRIPT: usize = 201;
/// The consensus limit on stack plus altstack depth.
const MAX_STACK_SIZE: usize = 1000;
/// The consensus limit on public keys per multisig.
const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;

bitflags! {
    /// Optional validation rules layered over base script execution.
    ///
    /// Strict DER and low-S signature encodings are not flags: this engine
    /// always enforces them.
    pub struct VerifyFlags: u32 {
        /// Evaluate P2SH lock scripts by running the redeem script.
        const P2SH = 1 << 0;
        /// Evaluate version-0 witness programs.
        const WITNESS = 1 << 1;
        /// Enforce `OP_CHECKLOCKTIMEVERIFY` (BIP 65); otherwise a no-op.
        const CHECKLOCKTIMEVERIFY = 1 << 2;
        /// Enforce `OP_CHECKSEQUENCEVERIFY` (BIP 112); otherwise a no-op.
        const CHECKSEQUENCEVERIFY = 1 << 3;
        /// Require the `OP_CHECKMULTISIG` dummy element to be empty.
        const NULLDUMMY = 1 << 4;
    }
}

impl Default for VerifyFlags {
    /// Everything on: the rules a post-2016 chain runs with.
    fn default() -> Self {
        VerifyFlags::all()
    }
}

/// Verify that `unlock_script` authorizes spending the output locked by
/// `lock_script`, as input `input_index` of `tx`, under the default flags.
pub fn verify(
    unlock_script: &Script,
    lock_script: &Script,
    tx: &Transaction,
    input_index: usize,
) -> Result<(), ScriptError> {
    verify_with_flags(unlock_script, lock_script, tx, input_index, VerifyFlags::default())
}

/// Verify a spend under an explicit flag set.
pub fn verify_with_flags(
    unlock_script: &Script,
    lock_script: &Script,
    tx: &Transaction,
    input_index: usize,
    flags: VerifyFlags,
) -> Result<(), ScriptError> {
    if input_index >= tx.inputs.len() {
        return Err(ScriptError::InvalidInputIndex);
    }

    let checker = Checker {
        tx,
        input_index,
        secp: secp256k1::Secp256k1::verification_only(),
    };

    let is_p2sh = flags.contains(VerifyFlags::P2SH) && is_p2sh(lock_script.as_bytes());
    if is_p2sh && !is_push_only(unlock_script.as_bytes()) {
        // P2SH unlock scripts must be pure data so the redeem script is
        // fixed by the outpoint, not chosen at spend time.
        return Err(ScriptError::BadOpcode);
    }

    let mut stack: Vec<Vec<u8>> = Vec::new();
    eval_script(&mut stack, unlock_script.as_bytes(), &checker, flags)?;
    let unlock_stack = stack.clone();

    eval_script(&mut stack, lock_script.as_bytes(), &checker, flags)?;
    if !stack_result(&stack) {
        return Err(ScriptError::EvalFalse);
    }

    // Bare witness program.
    if flags.contains(VerifyFlags::WITNESS) {
        if let Some((version, program)) = witness_program(lock_script.as_bytes()) {
            if !unlock_script.as_bytes().is_empty() {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            return verify_witness(version, program, tx, input_index, &checker, flags);
        }
    }

    if is_p2sh {
        let mut stack = unlock_stack;
        let redeem_bytes = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
        let redeem_script = Script(redeem_bytes);

        eval_script(&mut stack, redeem_script.as_bytes(), &checker, flags)?;
        if !stack_result(&stack) {
            return Err(ScriptError::EvalFalse);
        }

        // P2SH-wrapped witness program: the redeem script is the program.
        if flags.contains(VerifyFlags::WITNESS) {
            if let Some((version, program)) = witness_program(redeem_script.as_bytes()) {
                return verify_witness(version, program, tx, input_index, &checker, flags);
            }
        }
    }

    Ok(())
}

struct Checker<'a> {
    tx: &'a Transaction,
    input_index: usize,
    secp: secp256k1::Secp256k1<secp256k1::VerifyOnly>,
}

impl<'a> Checker<'a> {
    fn check_sig(
        &self,
        sig_element: &[u8],
        key_element: &[u8],
        script_code: &[u8],
    ) -> Result<bool, ScriptError> {
        let pub_key = check_pub_key(key_element)?;
        let checked = match CheckedSignature::from_stack_element(sig_element)? {
            Some(checked) => checked,
            None => return Ok(false),
        };

        let sighash = self.tx.sighash(
            self.input_index,
            &Script(script_code.to_vec()),
            checked.hash_type,
        );
        let message = secp256k1::Message::from_slice(sighash.as_bytes())
            .expect("a 32 byte sighash is a valid message");

        Ok(self
            .secp
            .verify(&message, &checked.signature, &pub_key)
            .is_ok())
    }

    fn check_locktime(&self, required: i64) -> Result<(), ScriptError> {
        let tx_raw = i64::from(self.tx.lock_time.raw());

        // Times only compare to times, heights to heights.
        let same_kind = (required < LockTime::MIN_TIMESTAMP)
            == (tx_raw < LockTime::MIN_TIMESTAMP);
        if !same_kind || required > tx_raw {
            return Err(ScriptError::LocktimeNotSatisfied);
        }

        // A final input would let the transaction confirm regardless of its
        // lock time, defeating the check.
        if self.tx.inputs[self.input_index].sequence() == u32::MAX {
            return Err(ScriptError::LocktimeNotSatisfied);
        }
        Ok(())
    }

    fn check_sequence(&self, required: i64) -> Result<(), ScriptError> {
        const DISABLE_FLAG: i64 = 1 << 31;
        const TYPE_FLAG: i64 = 1 << 22;
        const MASK: i64 = 0x0000_ffff | TYPE_FLAG;

        // A set disable bit turns the operand into a no-op.
        if required & DISABLE_FLAG != 0 {
            return Ok(());
        }

        // Relative locks need BIP 68 semantics, which start at version 2.
        if self.tx.version < 2 {
            return Err(ScriptError::SequenceNotSatisfied);
        }

        let sequence = i64::from(self.tx.inputs[self.input_index].sequence());
        if sequence & DISABLE_FLAG != 0 {
            return Err(ScriptError::SequenceNotSatisfied);
        }

        let masked_required = required & MASK;
        let masked_sequence = sequence & MASK;
        let same_kind = (masked_required & TYPE_FLAG) == (masked_sequence & TYPE_FLAG);
        if !same_kind || masked_required > masked_sequence {
            return Err(ScriptError::SequenceNotSatisfied);
        }
        Ok(())
    }
}

fn stack_result(stack: &[Vec<u8>]) -> bool {
    stack
        .last()
        .map(|top| ScriptNum::bytes_as_bool(top))
        .unwrap_or(false)
}

/// Whether `script` is exactly the P2SH template.
fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// Decode `script` as a witness program: one version opcode and a 2..=40
/// byte push.
fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if script.len() < 4 || script.len() > 42 {
        return None;
    }
    let version = decode_small_int(script[0])?;
    if script[1] as usize != script.len() - 2 {
        return None;
    }
    Some((version, &script[2..]))
}

fn is_push_only(script: &[u8]) -> bool {
    let mut pc = 0;
    while pc < script.len() {
        match next_op(script, &mut pc) {
            Ok((op, _)) if is_push(op) => {}
            _ => return false,
        }
    }
    true
}

/// Decode the opcode at `*pc`, advancing past it and any pushed data.
fn next_op<'s>(script: &'s [u8], pc: &mut usize) -> Result<(u8, Option<&'s [u8]>), ScriptError> {
    let op = script[*pc];
    *pc += 1;

    let data_len = match op {
        len @ 0x01..=0x4b => len as usize,
        OP_PUSHDATA1 => {
            let len = *script.get(*pc).ok_or(ScriptError::BadPushData)? as usize;
            *pc += 1;
            len
        }
        OP_PUSHDATA2 => {
            let bytes = script
                .get(*pc..*pc + 2)
                .ok_or(ScriptError::BadPushData)?;
            *pc += 2;
            u16::from_le_bytes([bytes[0], bytes[1]]) as usize
        }
        OP_PUSHDATA4 => {
            let bytes = script
                .get(*pc..*pc + 4)
                .ok_or(ScriptError::BadPushData)?;
            *pc += 4;
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
        }
        _ => return Ok((op, None)),
    };

    let data = script
        .get(*pc..*pc + data_len)
        .ok_or(ScriptError::BadPushData)?;
    *pc += data_len;
    Ok((op, Some(data)))
}

fn eval_script(
    stack: &mut Vec<Vec<u8>>,
    script: &[u8],
    checker: &Checker,
    flags: VerifyFlags,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }

    let mut altstack: Vec<Vec<u8>> = Vec::new();
    let mut cond_stack: Vec<bool> = Vec::new();
    let mut op_count = 0usize;
    let mut last_code_separator = 0usize;
    let mut pc = 0usize;

    macro_rules! pop {
        () => {
            stack.pop().ok_or(ScriptError::InvalidStackOperation)?
        };
    }
    macro_rules! pop_num {
        () => {
            ScriptNum::decode(&pop!(), ScriptNum::MAX_OPERAND_BYTES)?.0
        };
    }
    macro_rules! push_num {
        ($n:expr) => {
            stack.push(ScriptNum($n).encode())
        };
    }
    macro_rules! peek {
        ($depth:expr) => {{
            let depth: usize = $depth;
            if stack.len() <= depth {
                return Err(ScriptError::InvalidStackOperation);
            }
            stack[stack.len() - 1 - depth].clone()
        }};
    }

    while pc < script.len() {
        let (op, data) = next_op(script, &mut pc)?;
        let executing = cond_stack.iter().all(|&branch| branch);

        if let Some(data) = data {
            if data.len() > MAX_ELEMENT_SIZE {
                return Err(ScriptError::PushSize);
            }
            if executing {
                stack.push(data.to_vec());
            }
            check_stack_size(stack, &altstack)?;
            continue;
        }

        // Disabled opcodes poison the script even in unexecuted branches.
        if is_disabled(op) {
            return Err(ScriptError::DisabledOpcode);
        }

        if !is_push(op) {
            op_count += 1;
            if op_count > MAX_OPS_PER_SCRIPT {
                return Err(ScriptError::OpCount);
            }
        }

        // Conditionals run even in unexecuted branches, to track nesting.
        if !executing && !matches!(op, OP_IF | OP_NOTIF | OP_ELSE | OP_ENDIF) {
            continue;
        }

        match op {
            OP_0 => stack.push(Vec::new()),
            OP_1NEGATE => push_num!(-1),
            OP_1..=OP_16 => {
                stack.push(ScriptNum(decode_small_int(op).expect("range checked") as i64).encode())
            }

            // Flow control.
            OP_NOP => {}
            OP_IF | OP_NOTIF => {
                let branch = if executing {
                    let value = ScriptNum::bytes_as_bool(&pop!());
                    if op == OP_IF {
                        value
                    } else {
                        !value
                    }
                } else {
                    false
                };
                cond_stack.push(branch);
            }
            OP_ELSE => {
                let top = cond_stack
                    .last_mut()
                    .ok_or(ScriptError::UnbalancedConditional)?;
                *top = !*top;
            }
            OP_ENDIF => {
                cond_stack
                    .pop()
                    .ok_or(ScriptError::UnbalancedConditional)?;
            }
            OP_VERIFY => {
                if !ScriptNum::bytes_as_bool(&pop!()) {
                    return Err(ScriptError::VerifyFailed);
                }
            }
            OP_RETURN => return Err(ScriptError::OpReturn),

            // Stack.
            OP_TOALTSTACK => altstack.push(pop!()),
            OP_FROMALTSTACK => {
                stack.push(altstack.pop().ok_or(ScriptError::InvalidStackOperation)?)
            }
            OP_2DROP => {
                pop!();
                pop!();
            }
            OP_2DUP => {
                let first = peek!(1);
                let second = peek!(0);
                stack.push(first);
                stack.push(second);
            }
            OP_3DUP => {
                let first = peek!(2);
                let second = peek!(1);
                let third = peek!(0);
                stack.push(first);
                stack.push(second);
                stack.push(third);
            }
            OP_2OVER => {
                let first = peek!(3);
                let second = peek!(2);
                stack.push(first);
                stack.push(second);
            }
            OP_2ROT => {
                if stack.len() < 6 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let depth = stack.len();
                let moved: Vec<Vec<u8>> = stack.drain(depth - 6..depth - 4).collect();
                stack.extend(moved);
            }
            OP_2SWAP => {
                if stack.len() < 4 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let depth = stack.len();
                stack.swap(depth - 4, depth - 2);
                stack.swap(depth - 3, depth - 1);
            }
            OP_IFDUP => {
                let top = peek!(0);
                if ScriptNum::bytes_as_bool(&top) {
                    stack.push(top);
                }
            }
            OP_DEPTH => push_num!(stack.len() as i64),
            OP_DROP => {
                pop!();
            }
            OP_DUP => {
                let top = peek!(0);
                stack.push(top);
            }
            OP_NIP => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let depth = stack.len();
                stack.remove(depth - 2);
            }
            OP_OVER => {
                let second = peek!(1);
                stack.push(second);
            }
            OP_PICK | OP_ROLL => {
                let depth = pop_num!();
                if depth < 0 || depth as usize >= stack.len() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let index = stack.len() - 1 - depth as usize;
                let element = if op == OP_ROLL {
                    stack.remove(index)
                } else {
                    stack[index].clone()
                };
                stack.push(element);
            }
            OP_ROT => {
                if stack.len() < 3 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let depth = stack.len();
                let element = stack.remove(depth - 3);
                stack.push(element);
            }
            OP_SWAP => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let depth = stack.len();
                stack.swap(depth - 2, depth - 1);
            }
            OP_TUCK => {
                if stack.len() < 2 {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let top = peek!(0);
                let depth = stack.len();
                stack.insert(depth - 2, top);
            }

            OP_SIZE => {
                let len = peek!(0).len();
                push_num!(len as i64);
            }

            OP_EQUAL | OP_EQUALVERIFY => {
                let rhs = pop!();
                let lhs = pop!();
                let equal = lhs == rhs;
                if op == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    stack.push(ScriptNum::from(equal).encode());
                }
            }

            // Arithmetic.
            OP_1ADD => {
                let value = pop_num!();
                push_num!(value + 1);
            }
            OP_1SUB => {
                let value = pop_num!();
                push_num!(value - 1);
            }
            OP_NEGATE => {
                let value = pop_num!();
                push_num!(-value);
            }
            OP_ABS => {
                let value = pop_num!();
                push_num!(value.abs());
            }
            OP_NOT => {
                let value = pop_num!();
                push_num!((value == 0) as i64);
            }
            OP_0NOTEQUAL => {
                let value = pop_num!();
                push_num!((value != 0) as i64);
            }
            OP_ADD => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!(lhs + rhs);
            }
            OP_SUB => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!(lhs - rhs);
            }
            OP_BOOLAND => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!((lhs != 0 && rhs != 0) as i64);
            }
            OP_BOOLOR => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!((lhs != 0 || rhs != 0) as i64);
            }
            OP_NUMEQUAL | OP_NUMEQUALVERIFY => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                let equal = lhs == rhs;
                if op == OP_NUMEQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    push_num!(equal as i64);
                }
            }
            OP_NUMNOTEQUAL => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!((lhs != rhs) as i64);
            }
            OP_LESSTHAN => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!((lhs < rhs) as i64);
            }
            OP_GREATERTHAN => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!((lhs > rhs) as i64);
            }
            OP_LESSTHANOREQUAL => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!((lhs <= rhs) as i64);
            }
            OP_GREATERTHANOREQUAL => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!((lhs >= rhs) as i64);
            }
            OP_MIN => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!(lhs.min(rhs));
            }
            OP_MAX => {
                let rhs = pop_num!();
                let lhs = pop_num!();
                push_num!(lhs.max(rhs));
            }
            OP_WITHIN => {
                let max = pop_num!();
                let min = pop_num!();
                let value = pop_num!();
                push_num!((min <= value && value < max) as i64);
            }

            // Crypto.
            OP_RIPEMD160 => {
                let element = pop!();
                stack.push(Ripemd160::digest(&element).to_vec());
            }
            OP_SHA1 => {
                let element = pop!();
                stack.push(Sha1::digest(&element).to_vec());
            }
            OP_SHA256 => {
                let element = pop!();
                stack.push(Sha256::digest(&element).to_vec());
            }
            OP_HASH160 => {
                let element = pop!();
                stack.push(hash160(&element).to_vec());
            }
            OP_HASH256 => {
                let element = pop!();
                stack.push(Sha256::digest(&Sha256::digest(&element)).to_vec());
            }
            OP_CODESEPARATOR => {
                last_code_separator = pc;
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let key = pop!();
                let sig = pop!();
                let script_code = &script[last_code_separator..];
                let valid = checker.check_sig(&sig, &key, script_code)?;
                if op == OP_CHECKSIGVERIFY {
                    if !valid {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    stack.push(ScriptNum::from(valid).encode());
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let key_count = pop_num!();
                if !(0..=MAX_PUBKEYS_PER_MULTISIG).contains(&key_count) {
                    return Err(ScriptError::PubKeyCount);
                }
                // Each key counts toward the op limit, matching the
                // per-signature verification cost.
                op_count += key_count as usize;
                if op_count > MAX_OPS_PER_SCRIPT {
                    return Err(ScriptError::OpCount);
                }

                let mut keys = Vec::with_capacity(key_count as usize);
                for _ in 0..key_count {
                    keys.push(pop!());
                }

                let sig_count = pop_num!();
                if !(0..=key_count).contains(&sig_count) {
                    return Err(ScriptError::SigCount);
                }
                let mut sigs = Vec::with_capacity(sig_count as usize);
                for _ in 0..sig_count {
                    sigs.push(pop!());
                }

                // The off-by-one dummy, consensus forever.
                let dummy = pop!();
                if flags.contains(VerifyFlags::NULLDUMMY) && !dummy.is_empty() {
                    return Err(ScriptError::NullDummy);
                }

                let script_code = &script[last_code_separator..];

                // Signatures must appear in key order, so walk both lists
                // forward, discarding keys that don't match.
                let mut valid = true;
                let mut key_iter = keys.iter();
                'sigs: for sig in sigs.iter() {
                    loop {
                        match key_iter.next() {
                            Some(key) => {
                                if checker.check_sig(sig, key, script_code)? {
                                    continue 'sigs;
                                }
                            }
                            None => {
                                valid = false;
                                break 'sigs;
                            }
                        }
                    }
                }

                if op == OP_CHECKMULTISIGVERIFY {
                    if !valid {
                        return Err(ScriptError::VerifyFailed);
                    }
                } else {
                    stack.push(ScriptNum::from(valid).encode());
                }
            }

            OP_CHECKLOCKTIMEVERIFY => {
                if flags.contains(VerifyFlags::CHECKLOCKTIMEVERIFY) {
                    // 5-byte operand: lock times exceed 4-byte script nums.
                    let required = ScriptNum::decode(&peek!(0), 5)?.0;
                    if required < 0 {
                        return Err(ScriptError::LocktimeNotSatisfied);
                    }
                    checker.check_locktime(required)?;
                }
            }
            OP_CHECKSEQUENCEVERIFY => {
                if flags.contains(VerifyFlags::CHECKSEQUENCEVERIFY) {
                    let required = ScriptNum::decode(&peek!(0), 5)?.0;
                    if required < 0 {
                        return Err(ScriptError::SequenceNotSatisfied);
                    }
                    checker.check_sequence(required)?;
                }
            }

            OP_NOP1 | OP_NOP4..=OP_NOP10 => {}

            _ => return Err(ScriptError::BadOpcode),
        }

        check_stack_size(stack, &altstack)?;
    }

    if !cond_stack.is_empty() {
        return Err(ScriptError::UnbalancedConditional);
    }

    Ok(())
}

fn check_stack_size(stack: &[Vec<u8>], altstack: &[Vec<u8>]) -> Result<(), ScriptError> {
    if stack.len() + altstack.len() > MAX_STACK_SIZE {
        Err(ScriptError::StackSize)
    } else {
        Ok(())
    }
}

fn verify_witness(
    version: u8,
    program: &[u8],
    tx: &Transaction,
    input_index: usize,
    checker: &Checker,
    flags: VerifyFlags,
) -> Result<(), ScriptError> {
    // Unknown witness versions pass, preserving upgrade room; version 0 is
    // the only one with defined semantics here.
    if version != 0 {
        return Ok(());
    }

    let witness = tx
        .witnesses
        .get(input_index)
        .cloned()
        .unwrap_or_default();

    let (witness_script, mut stack) = match program.len() {
        20 => {
            // P2WPKH: exactly a signature and a public key, run against the
            // implicit P2PKH script.
            if witness.len() != 2 {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            let mut implicit = Vec::with_capacity(25);
            implicit.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
            implicit.extend_from_slice(program);
            implicit.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
            (implicit, witness)
        }
        32 => {
            // P2WSH: the last element is the script, the rest the stack.
            let mut witness = witness;
            let script = witness.pop().ok_or(ScriptError::WitnessProgramMismatch)?;
            if Sha256::digest(&script).as_slice() != program {
                return Err(ScriptError::WitnessProgramMismatch);
            }
            (script, witness)
        }
        _ => return Err(ScriptError::WitnessProgramMismatch),
    };

    for element in stack.iter() {
        if element.len() > MAX_ELEMENT_SIZE {
            return Err(ScriptError::PushSize);
        }
    }

    eval_script(&mut stack, &witness_script, checker, flags)?;
    if stack.len() != 1 || !stack_result(&stack) {
        return Err(ScriptError::EvalFalse);
    }
    Ok(())
}
