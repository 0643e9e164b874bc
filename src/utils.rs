//! Utility functions for identifiers

use super::error::{ReferralError, Result};
use bech32::Bech32m;
use uuid7::uuid7;

pub const MAX_IDENTIFIER_LEN: usize = 64;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Participant ids double as key prefixes, so no control bytes (the key separator is `\0`).
pub fn validate_identifier(id: &str) -> Result<()> {
    if id.trim().is_empty() || id.len() > MAX_IDENTIFIER_LEN || id.chars().any(char::is_control) {
        return Err(ReferralError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bech32_ids_carry_the_prefix() {
        let id = new_uuid_to_bech32("purchase_").unwrap();

        assert!(id.starts_with("purchase_1"));
        assert_ne!(id, new_uuid_to_bech32("purchase_").unwrap());
    }

    #[test]
    fn identifier_rules() {
        assert!(validate_identifier("alice").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("   ").is_err());
        assert!(validate_identifier("a\0b").is_err());
        assert!(validate_identifier(&"x".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }
}
