//! Local id minting and new-vs-existing classification (spec §3, §4.4).

use nanoid::nanoid;

/// Hex alphabet used for locally-minted ids — lowercase, matching the shape
/// a server-assigned id from this catalog never takes.
const HEX_ALPHABET: &[char] = &[
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
];

/// Length of a locally-minted token (spec §3: "a locally minted 32-character hex token").
pub const LOCAL_ID_LENGTH: usize = 32;

/// Mints a fresh 32-character hex token for a new, unsaved entity.
pub fn generate_local_id() -> String {
    nanoid!(LOCAL_ID_LENGTH, HEX_ALPHABET)
}

/// True iff `id` has the shape of a locally-minted token (32 lowercase hex chars).
///
/// Spec §9 notes the source also historically treated the literal string
/// `"new"` as a new-entity marker for backward compatibility; this
/// implementation drops that legacy marker as the spec explicitly permits
/// (§9 "Legacy `new` id marker"), relying solely on the hex-token shape plus
/// the entity's own `is_new` flag (see `entity::EntityState`).
pub fn looks_like_local_id(id: &str) -> bool {
    id.len() == LOCAL_ID_LENGTH && id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

/// Validates that `id` is a positive-integer string, for contexts that
/// require a numeric remote id (spec §7 "Invalid identifier").
pub fn require_positive_integer_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) && id.parse::<u64>().is_ok_and(|n| n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_has_expected_length_and_charset() {
        let id = generate_local_id();
        assert_eq!(id.len(), LOCAL_ID_LENGTH);
        assert!(id.chars().all(|c| HEX_ALPHABET.contains(&c)));
        assert!(looks_like_local_id(&id));
    }

    #[test]
    fn server_ids_do_not_look_local() {
        assert!(!looks_like_local_id("123"));
        assert!(!looks_like_local_id("s1"));
    }

    #[test]
    fn positive_integer_ids() {
        assert!(require_positive_integer_id("123"));
        assert!(!require_positive_integer_id("0"));
        assert!(!require_positive_integer_id("-5"));
        assert!(!require_positive_integer_id("abc"));
        assert!(!require_positive_integer_id(""));
    }
}
