//! Token strings.

use rand::{rngs::OsRng, RngCore};

/// The literal prefix of every token.
pub const TOKEN_PREFIX: &str = "lc0-";

/// Random bytes per token, hex encoded after the prefix.
pub const TOKEN_BYTES: usize = 32;

/// Return whether the string has the shape of a token.
///
/// Only the prefix and a minimum length are checked,
/// the rest of the token is opaque.
#[must_use]
pub fn is_well_formed(token: &str) -> bool {
    token.len() > TOKEN_PREFIX.len() && token.starts_with(TOKEN_PREFIX)
}

/// Generate a new random token.
#[must_use]
pub fn generate() -> String {
    let mut raw = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut raw);
    format!("{TOKEN_PREFIX}{}", hex::encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format() {
        assert!(is_well_formed("lc0-a"));
        assert!(!is_well_formed("lc0-"));
        assert!(!is_well_formed("lc1-abcdef"));
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("xlc0-abc"));
    }

    #[test]
    fn generated_tokens() {
        let token = generate();
        assert!(is_well_formed(&token));
        assert_eq!(token.len(), TOKEN_PREFIX.len() + 2 * TOKEN_BYTES);
        assert!(token[TOKEN_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(token, generate());
    }
}
