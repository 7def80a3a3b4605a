use secrecy::SecretString;
use seft::{
    CHUNK_SIZE, EncryptOptions, ErrorKind, MIN_ITERATIONS, Mode, SeftError, TAG_LEN, container,
    decrypt_bytes, encrypt_bytes,
};

fn pw() -> SecretString {
    SecretString::new("pw".into())
}

fn seal(data: &[u8], mode: Mode) -> Vec<u8> {
    let opts = EncryptOptions::default()
        .with_mode(mode)
        .with_iterations(MIN_ITERATIONS);
    encrypt_bytes(data, pw(), &opts).unwrap()
}

fn two_chunks() -> Vec<u8> {
    (0..CHUNK_SIZE + 100).map(|i| (i % 253) as u8).collect()
}

/// Flip single bits across every region of a two-chunk container.
#[test]
fn any_flipped_bit_in_authenticated_body_fails() {
    let ct = seal(&two_chunks(), Mode::Aes256GcmSiv);
    let h = container::decode(&ct).unwrap().header_len;

    let spots = [
        h,                                  // first chunk ciphertext
        h + CHUNK_SIZE - 1,                 // last byte of first chunk
        h + CHUNK_SIZE,                     // first chunk tag
        h + CHUNK_SIZE + TAG_LEN + 50,      // final chunk ciphertext
        ct.len() - 1,                       // trailing tag
    ];
    for at in spots {
        let mut bad = ct.clone();
        bad[at] ^= 0x01;
        let err = decrypt_bytes(&bad, pw()).unwrap_err();
        assert!(
            matches!(err, SeftError::AuthenticationFailed),
            "offset {at}: {err:?}"
        );
    }
}

/// Header fields are associated data, so editing one that still parses fails auth.
#[test]
fn header_edits_break_authentication() {
    let ct = seal(b"header tamper", Mode::Aes256GcmSiv);
    // iterations low byte: 100000 -> 100001, still in range
    let mut bad = ct.clone();
    bad[9] ^= 0x01;
    assert_eq!(
        decrypt_bytes(&bad, pw()).unwrap_err().kind(),
        ErrorKind::AuthenticationFailed
    );

    // a content hash byte
    let mut bad = ct.clone();
    let hash_at = container::decode(&ct).unwrap().header_len - 8 - 1;
    bad[hash_at] ^= 0x80;
    assert_eq!(
        decrypt_bytes(&bad, pw()).unwrap_err().kind(),
        ErrorKind::AuthenticationFailed
    );
}

/// Dropping the final chunk and patching the length must not yield a shorter plaintext.
#[test]
fn truncation_at_chunk_boundary_is_detected() {
    let ct = seal(&two_chunks(), Mode::Aes256GcmSiv);
    let h = container::decode(&ct).unwrap().header_len;

    let mut cut = ct[..h + CHUNK_SIZE + TAG_LEN].to_vec();
    cut[h - 8..h].copy_from_slice(&(CHUNK_SIZE as u64).to_le_bytes());
    let err = decrypt_bytes(&cut, pw()).unwrap_err();
    assert!(matches!(err, SeftError::AuthenticationFailed), "{err:?}");
}

#[test]
fn plain_truncation_is_a_format_error() {
    let ct = seal(b"short message", Mode::Aes256GcmSiv);
    let err = decrypt_bytes(&ct[..ct.len() - 1], pw()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

/// The legacy mode has no tag; the content hash still catches edits.
#[test]
fn cbc_tamper_fails_integrity_check() {
    let data = vec![0x42u8; 4096];
    let ct = seal(&data, Mode::Aes256Cbc);
    let h = container::decode(&ct).unwrap().header_len;

    for at in [h, h + 2000, ct.len() - 1, h - 8 - 32 - 4 - 1] {
        let mut bad = ct.clone();
        bad[at] ^= 0x01;
        let err = decrypt_bytes(&bad, pw()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityCheckFailed, "offset {at}");
    }
}

#[test]
fn wrong_password_never_returns_plaintext() {
    for mode in [Mode::Aes256GcmSiv, Mode::Aes256Cbc] {
        let ct = seal(b"not so secret", mode);
        let res = decrypt_bytes(&ct, SecretString::new("wrong".into()));
        let kind = res.unwrap_err().kind();
        assert!(
            matches!(
                kind,
                ErrorKind::AuthenticationFailed | ErrorKind::IntegrityCheckFailed
            ),
            "mode={mode:?} kind={kind:?}"
        );
    }
}
