//! Signer recovery for Ethereum personal-message signatures.
//!
//! A caller proves control of an address by signing a message (for the
//! registry, the literal `updated` timestamp string) with the key behind it.
//! The message is hashed as
//! `keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)`
//! and the signature is the usual 65-byte `r || s || v`.

use k256::{
    PublicKey,
    ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};

use crate::error::{DdoError, Result};

const SIGNATURE_LEN: usize = 65;

/// Hash `message` the way wallets do for `personal_sign`.
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Address of a public key: last 20 bytes of the Keccak-256 of the
/// uncompressed point without its `0x04` tag.
pub fn address_of(key: &VerifyingKey) -> String {
    let point = PublicKey::from(key).to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..32]))
}

/// Decode a hex signature (with or without `0x`) into its 65 raw bytes.
pub fn decode_signature(signature: &str) -> Result<Vec<u8>> {
    let trimmed = signature
        .strip_prefix("0x")
        .or_else(|| signature.strip_prefix("0X"))
        .unwrap_or(signature);
    let bytes =
        hex::decode(trimmed).map_err(|e| DdoError::InvalidSignature(format!("bad hex: {e}")))?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(DdoError::InvalidSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Recover the lower-case address that signed `message`.
pub fn recover_signer(message: &str, signature: &[u8]) -> Result<String> {
    if signature.len() != SIGNATURE_LEN {
        return Err(DdoError::InvalidSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }

    let v = match signature[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => {
            return Err(DdoError::InvalidSignature(format!(
                "unsupported recovery byte {other}"
            )));
        }
    };

    let mut sig = Signature::from_slice(&signature[..64])
        .map_err(|e| DdoError::InvalidSignature(e.to_string()))?;
    let mut recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| DdoError::InvalidSignature(format!("bad recovery id {v}")))?;

    // Verification only accepts low-S; the mirrored signature recovers the
    // same key with the opposite y parity.
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let prehash = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| DdoError::InvalidSignature(e.to_string()))?;

    Ok(address_of(&key))
}

/// Sign `message` as a personal message, returning `0x`-prefixed hex with
/// `v` in `{27, 28}`.
pub fn sign_message(key: &SigningKey, message: &str) -> Result<String> {
    let prehash = personal_message_hash(message);
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(&prehash)
        .map_err(|e| DdoError::InvalidSignature(e.to_string()))?;

    let mut bytes = Vec::with_capacity(SIGNATURE_LEN);
    bytes.extend_from_slice(&sig.to_bytes());
    bytes.push(recovery_id.to_byte() + 27);
    Ok(format!("0x{}", hex::encode(bytes)))
}
