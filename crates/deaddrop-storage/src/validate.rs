//! Drop identifier validation and secure randomness.

use rand::RngCore;

use deaddrop_core::{DropError, DropResult};

/// Check that a drop id matches `^[0-9a-f]{32}$`.
///
/// Every path derived from an external identifier is built only after this
/// check, which is what prevents traversal out of the storage root.
pub fn validate_drop_id(id: &str) -> DropResult<()> {
    if id.len() == 32 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        Ok(())
    } else {
        Err(DropError::InvalidId)
    }
}

/// Generate a fresh 128-bit drop identifier, rendered as 32 lowercase hex.
pub fn generate_drop_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        validate_drop_id("0123456789abcdef0123456789abcdef").unwrap();
        validate_drop_id("00000000000000000000000000000000").unwrap();
        validate_drop_id("ffffffffffffffffffffffffffffffff").unwrap();
    }

    #[test]
    fn test_invalid_ids() {
        let bad = [
            "",
            "abc",
            "0123456789abcdef0123456789abcde",   // 31 chars
            "0123456789abcdef0123456789abcdef0", // 33 chars
            "0123456789ABCDEF0123456789ABCDEF",  // uppercase
            "0123456789abcdeg0123456789abcdef",  // non-hex
            "../../../etc/passwd",
            "./abcdef0123456789abcdef01234567",
            "/etc/passwd",
            "0123456789abcdef0123456789abcde\n",
        ];
        for id in bad {
            assert!(validate_drop_id(id).is_err(), "{id:?} must be rejected");
        }
    }

    #[test]
    fn test_generated_ids_are_valid_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let id = generate_drop_id();
            validate_drop_id(&id).unwrap();
            assert!(seen.insert(id), "ids must be unique");
        }
    }
}
