//! Strict signature encoding checks.
//!
//! Every signature this engine verifies must be canonical: strict DER
//! framing, a low S value, and a defined sighash type byte. Anything else is
//! a `SignatureEncoding` error, never a silent verification failure, so
//! malleated signatures cannot change a transaction's validity.

use kestrel_chain::transaction::SighashType;
use secp256k1::Signature;

use crate::ScriptError;

/// A signature that has passed the canonical encoding checks, split into
/// its DER body and sighash type.
#[derive(Debug, Clone)]
pub struct CheckedSignature {
    /// The parsed ECDSA signature.
    pub signature: Signature,
    /// The sighash type carried in the final byte.
    pub hash_type: SighashType,
}

impl CheckedSignature {
    /// Parse and validate a signature stack element.
    ///
    /// The element is the DER signature with one sighash-type byte appended.
    /// Returns `None` for the empty element, which `OP_CHECKSIG` treats as
    /// an ordinary (non-aborting) failure.
    pub fn from_stack_element(element: &[u8]) -> Result<Option<CheckedSignature>, ScriptError> {
        if element.is_empty() {
            return Ok(None);
        }

        let (der, hash_type_byte) = element
            .split_last()
            .map(|(last, rest)| (rest, *last))
            .expect("non-empty element splits");

        check_defined_hash_type(hash_type_byte)?;
        check_strict_der(der)?;

        let mut signature =
            Signature::from_der(der).map_err(|_| ScriptError::SignatureEncoding)?;

        // Low-S: normalize_s is a no-op on an already-low S, so compare the
        // serialization to detect a high S instead of accepting it.
        let before = signature.serialize_der();
        signature.normalize_s();
        if signature.serialize_der()[..] != before[..] {
            return Err(ScriptError::SignatureEncoding);
        }

        Ok(Some(CheckedSignature {
            signature,
            hash_type: SighashType(hash_type_byte as u32),
        }))
    }
}

fn check_defined_hash_type(byte: u8) -> Result<(), ScriptError> {
    let base = byte & 0x1f;
    let flags = byte & !0x1f;
    if !(1..=3).contains(&base) || (flags != 0 && flags != 0x80) {
        return Err(ScriptError::SignatureEncoding);
    }
    Ok(())
}

/// BIP 66 strict DER: exact framing, no negative or padded integers.
fn check_strict_der(sig: &[u8]) -> Result<(), ScriptError> {
    let err = Err(ScriptError::SignatureEncoding);

    // Shortest conceivable: 30 06 02 01 xx 02 01 xx.
    if sig.len() < 8 || sig.len() > 72 {
        return err;
    }
    if sig[0] != 0x30 || sig[1] as usize != sig.len() - 2 {
        return err;
    }

    let r_len = sig[3] as usize;
    if sig[2] != 0x02 || r_len == 0 || 5 + r_len >= sig.len() {
        return err;
    }
    let s_len = sig[5 + r_len] as usize;
    if sig[4 + r_len] != 0x02 || s_len == 0 || 6 + r_len + s_len != sig.len() {
        return err;
    }

    let r = &sig[4..4 + r_len];
    let s = &sig[6 + r_len..];

    for int in [r, s].iter() {
        // Negative integers and unnecessary leading zeroes are forbidden.
        if int[0] & 0x80 != 0 {
            return err;
        }
        if int.len() > 1 && int[0] == 0x00 && int[1] & 0x80 == 0 {
            return err;
        }
    }

    Ok(())
}

/// Check a public key stack element is a well-formed SEC encoding.
pub fn check_pub_key(element: &[u8]) -> Result<secp256k1::PublicKey, ScriptError> {
    match element.first() {
        Some(0x02) | Some(0x03) if element.len() == 33 => {}
        Some(0x04) if element.len() == 65 => {}
        _ => return Err(ScriptError::PubKeyEncoding),
    }
    secp256k1::PublicKey::from_slice(element).map_err(|_| ScriptError::PubKeyEncoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_signature_is_soft_failure() {
        assert!(CheckedSignature::from_stack_element(&[])
            .unwrap()
            .is_none());
    }

    #[test]
    fn undefined_hash_types_rejected() {
        // A structurally valid DER signature with a bogus hash type byte.
        let secp = secp256k1::Secp256k1::new();
        let key = secp256k1::SecretKey::from_slice(&[0x42; 32]).unwrap();
        let msg = secp256k1::Message::from_slice(&[0x01; 32]).unwrap();
        let mut element = secp.sign(&msg, &key).serialize_der().to_vec();

        element.push(0x00);
        assert_eq!(
            CheckedSignature::from_stack_element(&element).unwrap_err(),
            ScriptError::SignatureEncoding
        );

        *element.last_mut().unwrap() = 0x01;
        assert!(CheckedSignature::from_stack_element(&element).is_ok());
    }

    #[test]
    fn garbage_der_rejected() {
        assert_eq!(
            CheckedSignature::from_stack_element(&[0x30, 0x01, 0x02, 0x01]).unwrap_err(),
            ScriptError::SignatureEncoding
        );
    }

    #[test]
    fn pub_key_length_enforced() {
        // Wrong length for the compressed prefix.
        assert_eq!(
            check_pub_key(&[0x02; 20]).unwrap_err(),
            ScriptError::PubKeyEncoding
        );
        // Unknown prefix byte.
        assert_eq!(
            check_pub_key(&[0x05; 33]).unwrap_err(),
            ScriptError::PubKeyEncoding
        );
        // A real generator point parses.
        let secp = secp256k1::Secp256k1::new();
        let key = secp256k1::SecretKey::from_slice(&[0x42; 32]).unwrap();
        let pub_key = secp256k1::PublicKey::from_secret_key(&secp, &key);
        assert!(check_pub_key(&pub_key.serialize()).is_ok());
    }
}
