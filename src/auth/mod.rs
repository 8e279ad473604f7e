//! Session token generation and validation.

use rand::Rng;

/// Token length in bytes (produces 32 hex characters, 128 bits of entropy).
const TOKEN_BYTES: usize = 16;

/// Generates a CSPRNG session token as a 32-character lowercase hex string.
pub fn generate() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Validates a received token against the session token.
///
/// Uses constant-time comparison to prevent timing attacks.
pub fn verify(received: &str, expected: &str) -> bool {
    if received.len() != expected.len() {
        return false;
    }
    // Constant-time comparison.
    let mut diff = 0u8;
    for (a, b) in received.bytes().zip(expected.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_length() {
        let token = generate();
        assert_eq!(token.len(), 32);
    }

    #[test]
    fn generated_token_is_hex() {
        let token = generate();
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_matching_tokens() {
        let token = generate();
        assert!(verify(&token, &token));
    }

    #[test]
    fn verify_mismatched_tokens() {
        let a = generate();
        let b = generate();
        assert!(!verify(&a, &b));
    }

    #[test]
    fn verify_different_lengths() {
        assert!(!verify("short", "this_is_longer"));
    }
}
