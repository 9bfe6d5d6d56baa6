//! Blockchain-style account addresses: `0x` followed by 40 hex digits.
//!
//! Addresses arrive both lower-cased and with mixed checksum casing, so every
//! comparison in the registry goes through [`addresses_equal`]. Checksums are
//! not verified.

use crate::error::{DdoError, Result};

const ADDRESS_HEX_LEN: usize = 40;

/// Structural check only.
pub fn is_valid_address(s: &str) -> bool {
    match strip_prefix(s) {
        Some(hex) => hex.len() == ADDRESS_HEX_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

pub fn addresses_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Lower-case a valid address, rejecting anything that fails [`is_valid_address`].
pub fn normalize_address(s: &str) -> Result<String> {
    if !is_valid_address(s) {
        return Err(DdoError::InvalidAddress(s.to_string()));
    }
    Ok(format!("0x{}", s[2..].to_ascii_lowercase()))
}

fn strip_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}
