//! Unguessable token minting (spec.md §6).
//!
//! Grounded on `everruns_storage::encryption::generate_encryption_key`'s
//! `rand::thread_rng().fill_bytes` + base64 idiom, applied to minting an
//! opaque single-use token instead of a symmetric key.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;

/// Mint a 128-bit unguessable token, base64url-encoded, with `prefix_`.
pub fn mint(prefix: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}_{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// Mint a resume token (spec.md §6 `rt_` prefix).
pub fn mint_resume_token() -> String {
    mint("rt")
}

/// Mint an API key (spec.md §6 `ak_` prefix) - same construction, different
/// namespace; exposed here because both are "unguessable token, `_`-prefixed"
/// per spec.md §6 and nothing else in the core mints one.
pub fn mint_api_key() -> String {
    mint("ak")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_carry_the_declared_prefix() {
        assert!(mint_resume_token().starts_with("rt_"));
        assert!(mint_api_key().starts_with("ak_"));
    }

    #[test]
    fn tokens_are_not_repeated_across_many_mints() {
        let tokens: HashSet<String> = (0..1000).map(|_| mint_resume_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }
}
