use std::collections::HashSet;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use gatehouse::crypto::{
    SecretCipher, generate_invitation_token, generate_manifest_state,
    generate_session_token,
};

use crate::helpers::ENCRYPTION_KEY;

#[test]
fn session_token_has_correct_length() {
    let token = generate_session_token();
    assert_eq!(token.expose().len(), 64);
}

#[test]
fn session_token_is_valid_hex() {
    let token = generate_session_token();
    assert!(hex::decode(token.expose()).is_ok());
}

#[test]
fn invitation_token_is_url_safe() {
    let token = generate_invitation_token();
    assert_eq!(token.len(), 43);
    assert!(
        token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
        "token: {token}"
    );
    assert_eq!(URL_SAFE_NO_PAD.decode(&token).map(|b| b.len()).ok(), Some(32));
}

#[test]
fn invitation_tokens_are_unique() {
    let tokens = (0..100)
        .map(|_| generate_invitation_token())
        .collect::<HashSet<_>>();
    assert_eq!(tokens.len(), 100);
}

#[test]
fn manifest_state_differs_from_invitation_token() {
    assert_ne!(generate_manifest_state(), generate_invitation_token());
    assert_eq!(generate_manifest_state().len(), 43);
}

#[test]
fn sealed_secret_does_not_contain_plaintext() {
    let cipher = SecretCipher::from_hex(ENCRYPTION_KEY).expect("cipher");
    let sealed = cipher.seal(b"client-secret").expect("seal");

    assert!(
        !sealed
            .bytes
            .windows(b"client-secret".len())
            .any(|window| window == b"client-secret")
    );
    assert_eq!(cipher.open(&sealed).expect("open"), b"client-secret".to_vec());
}

#[test]
fn sealing_twice_uses_fresh_nonces() {
    let cipher = SecretCipher::from_hex(ENCRYPTION_KEY).expect("cipher");
    let first = cipher.seal(b"same").expect("seal");
    let second = cipher.seal(b"same").expect("seal");
    assert_ne!(first.bytes, second.bytes);
    assert_eq!(first.key_id, second.key_id);
}

#[test]
fn rejects_short_keys() {
    assert!(SecretCipher::from_hex("abcd").is_err());
    assert!(SecretCipher::from_hex("not hex at all").is_err());
    assert!(SecretCipher::from_optional_hex(None).expect("plaintext").key_id().is_none());
}
