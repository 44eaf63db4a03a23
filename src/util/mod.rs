//! Randomization helpers

use rand::RngCore;

/// Generate random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; N];
    rng.fill_bytes(&mut bytes);
    bytes
}

/// Unguessable URL-safe token with 128 bits of entropy
pub fn url_safe_token() -> String {
    data_encoding::BASE64URL_NOPAD.encode(&random_bytes::<16>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe() {
        let token = url_safe_token();
        assert_eq!(token.len(), 22); // 16 bytes, base64 without padding
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(url_safe_token(), url_safe_token());
    }
}
