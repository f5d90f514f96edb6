// Unit tests for PKCE primitives

use torii::oauth::pkce::{derive_challenge, generate_state, generate_verifier};

#[test]
fn test_challenge_is_deterministic_per_verifier() {
    let verifier = generate_verifier();
    assert_eq!(derive_challenge(&verifier), derive_challenge(&verifier));
}

#[test]
fn test_challenge_differs_across_verifiers() {
    assert_ne!(
        derive_challenge(&generate_verifier()),
        derive_challenge(&generate_verifier())
    );
}

#[test]
fn test_generated_values_have_expected_entropy_encoding() {
    // 32 random bytes -> 43 base64url chars, no padding
    for value in [generate_verifier(), generate_state()] {
        assert_eq!(value.len(), 43);
        assert!(value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
