//! Standard script templates: recognition and synthesis.
//!
//! The wallet only ever creates and matches these shapes; anything else is
//! `NonStandard` and ignored for balance purposes.

use kestrel_chain::transparent::Script;

use crate::opcodes::*;

/// The standard shapes a lock script can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateKind {
    /// `DUP HASH160 <20> EQUALVERIFY CHECKSIG`
    PayToPubKeyHash([u8; 20]),
    /// `<33|65 byte key> CHECKSIG`
    PayToPubKey(Vec<u8>),
    /// `HASH160 <20> EQUAL`
    PayToScriptHash([u8; 20]),
    /// `OP_0 <20>`
    WitnessPubKeyHash([u8; 20]),
    /// `OP_0 <32>`
    WitnessScriptHash([u8; 32]),
    /// `<m> <key>.. <n> CHECKMULTISIG`
    Multisig {
        /// Signatures required.
        required: u8,
        /// The public keys, in script order.
        keys: Vec<Vec<u8>>,
    },
    /// `OP_RETURN ..`: provably unspendable data carrier.
    OpReturn,
    /// Anything else.
    NonStandard,
}

/// The legacy template shape, used by callers that only care about
/// matching, not extraction.
pub type Template = TemplateKind;

/// Classify a lock script against the standard templates.
pub fn classify(script: &Script) -> TemplateKind {
    let bytes = script.as_bytes();

    match bytes {
        [] => return TemplateKind::NonStandard,
        [OP_RETURN, ..] => return TemplateKind::OpReturn,
        _ => {}
    }

    // P2PKH: 76 a9 14 <20> 88 ac
    if bytes.len() == 25
        && bytes[0] == OP_DUP
        && bytes[1] == OP_HASH160
        && bytes[2] == 0x14
        && bytes[23] == OP_EQUALVERIFY
        && bytes[24] == OP_CHECKSIG
    {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[3..23]);
        return TemplateKind::PayToPubKeyHash(hash);
    }

    // P2SH: a9 14 <20> 87
    if bytes.len() == 23 && bytes[0] == OP_HASH160 && bytes[1] == 0x14 && bytes[22] == OP_EQUAL {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[2..22]);
        return TemplateKind::PayToScriptHash(hash);
    }

    // P2PK: <push 33|65> ac
    if (bytes.len() == 35 || bytes.len() == 67)
        && bytes[0] as usize == bytes.len() - 2
        && bytes[bytes.len() - 1] == OP_CHECKSIG
    {
        let key = bytes[1..bytes.len() - 1].to_vec();
        let valid_prefix = matches!(
            (key.len(), key.first()),
            (33, Some(0x02)) | (33, Some(0x03)) | (65, Some(0x04))
        );
        if valid_prefix {
            return TemplateKind::PayToPubKey(key);
        }
    }

    // Witness v0 programs.
    if bytes.len() == 22 && bytes[0] == OP_0 && bytes[1] == 0x14 {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[2..]);
        return TemplateKind::WitnessPubKeyHash(hash);
    }
    if bytes.len() == 34 && bytes[0] == OP_0 && bytes[1] == 0x20 {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..]);
        return TemplateKind::WitnessScriptHash(hash);
    }

    // Bare multisig: <m> (<push key>)+ <n> ae
    if bytes.len() >= 3 && bytes[bytes.len() - 1] == OP_CHECKMULTISIG {
        if let (Some(required), Some(total)) = (
            decode_small_int(bytes[0]),
            decode_small_int(bytes[bytes.len() - 2]),
        ) {
            if required >= 1 && required <= total && total <= 16 {
                let mut keys = Vec::with_capacity(total as usize);
                let mut pc = 1;
                while pc < bytes.len() - 2 {
                    let len = bytes[pc] as usize;
                    if !(matches!(len, 33 | 65)) || pc + 1 + len > bytes.len() - 2 {
                        return TemplateKind::NonStandard;
                    }
                    keys.push(bytes[pc + 1..pc + 1 + len].to_vec());
                    pc += 1 + len;
                }
                if keys.len() == total as usize {
                    return TemplateKind::Multisig { required, keys };
                }
            }
        }
        return TemplateKind::NonStandard;
    }

    TemplateKind::NonStandard
}

/// Append a minimal push of `data` to `script`.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0 => script.push(OP_0),
        1..=0x4b => {
            script.push(data.len() as u8);
            script.extend_from_slice(data);
        }
        0x4c..=0xff => {
            script.push(OP_PUSHDATA1);
            script.push(data.len() as u8);
            script.extend_from_slice(data);
        }
        _ => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(data.len() as u16).to_le_bytes());
            script.extend_from_slice(data);
        }
    }
}

/// Build a P2PKH lock script.
pub fn pay_to_pub_key_hash(hash: &[u8; 20]) -> Script {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
    script.extend_from_slice(hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    Script(script)
}

/// Build a P2PK lock script.
pub fn pay_to_pub_key(key: &[u8]) -> Script {
    let mut script = Vec::with_capacity(key.len() + 2);
    push_data(&mut script, key);
    script.push(OP_CHECKSIG);
    Script(script)
}

/// Build a P2SH lock script.
pub fn pay_to_script_hash(hash: &[u8; 20]) -> Script {
    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[OP_HASH160, 0x14]);
    script.extend_from_slice(hash);
    script.push(OP_EQUAL);
    Script(script)
}

/// Build a P2WPKH lock script.
pub fn pay_to_witness_pub_key_hash(hash: &[u8; 20]) -> Script {
    let mut script = Vec::with_capacity(22);
    script.extend_from_slice(&[OP_0, 0x14]);
    script.extend_from_slice(hash);
    Script(script)
}

/// Build a P2WSH lock script.
pub fn pay_to_witness_script_hash(hash: &[u8; 32]) -> Script {
    let mut script = Vec::with_capacity(34);
    script.extend_from_slice(&[OP_0, 0x20]);
    script.extend_from_slice(hash);
    Script(script)
}

/// Build an m-of-n bare multisig lock script.
pub fn multisig(required: u8, keys: &[Vec<u8>]) -> Script {
    assert!(
        required >= 1 && required as usize <= keys.len() && keys.len() <= 16,
        "m-of-n out of the standard range"
    );
    let mut script = Vec::new();
    script.push(push_small_int(required));
    for key in keys {
        push_data(&mut script, key);
    }
    script.push(push_small_int(keys.len() as u8));
    script.push(OP_CHECKMULTISIG);
    Script(script)
}

/// Build the unlock script spending a P2PKH output.
pub fn unlock_pay_to_pub_key_hash(signature: &[u8], pub_key: &[u8]) -> Script {
    let mut script = Vec::with_capacity(signature.len() + pub_key.len() + 2);
    push_data(&mut script, signature);
    push_data(&mut script, pub_key);
    Script(script)
}

/// Build the unlock script spending a P2PK output.
pub fn unlock_pay_to_pub_key(signature: &[u8]) -> Script {
    let mut script = Vec::with_capacity(signature.len() + 1);
    push_data(&mut script, signature);
    Script(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_roundtrip() {
        let script = pay_to_pub_key_hash(&[7; 20]);
        assert_eq!(classify(&script), TemplateKind::PayToPubKeyHash([7; 20]));
    }

    #[test]
    fn p2sh_roundtrip() {
        let script = pay_to_script_hash(&[9; 20]);
        assert_eq!(classify(&script), TemplateKind::PayToScriptHash([9; 20]));
    }

    #[test]
    fn p2pk_roundtrip() {
        let key = {
            let mut key = vec![0x02];
            key.extend_from_slice(&[0x11; 32]);
            key
        };
        let script = pay_to_pub_key(&key);
        assert_eq!(classify(&script), TemplateKind::PayToPubKey(key));
    }

    #[test]
    fn witness_roundtrips() {
        assert_eq!(
            classify(&pay_to_witness_pub_key_hash(&[3; 20])),
            TemplateKind::WitnessPubKeyHash([3; 20])
        );
        assert_eq!(
            classify(&pay_to_witness_script_hash(&[4; 32])),
            TemplateKind::WitnessScriptHash([4; 32])
        );
    }

    #[test]
    fn multisig_roundtrip() {
        let key = |prefix: u8| {
            let mut key = vec![0x02];
            key.extend_from_slice(&[prefix; 32]);
            key
        };
        let keys = vec![key(1), key(2), key(3)];
        let script = multisig(2, &keys);
        assert_eq!(
            classify(&script),
            TemplateKind::Multisig { required: 2, keys }
        );
    }

    #[test]
    fn op_return_and_garbage() {
        assert_eq!(
            classify(&Script(vec![OP_RETURN, 0x01, 0xaa])),
            TemplateKind::OpReturn
        );
        assert_eq!(classify(&Script(vec![0xff, 0xff])), TemplateKind::NonStandard);
        assert_eq!(classify(&Script(vec![])), TemplateKind::NonStandard);
    }
}
