//! Core encryption and decryption primitives.
//!
//! Per-chunk AEAD sealing for the authenticated mode, CBC chaining for the
//! legacy mode, randomness, and content-hash masking. The streaming loops
//! that drive these live in `streaming`.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt};
use aes::{Aes256Dec, Aes256Enc};
use aes_gcm_siv::aead::{AeadInPlace, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce, Tag};
use getrandom::fill as getrandom;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::format::{HASH_LEN, SALT_LEN, TAG_LEN, nonce_len_for};
use crate::kdf::DerivedKey;
use crate::types::{Mode, SeftError};

/// AES block size.
pub const BLOCK_LEN: usize = 16;

const HASH_MASK_LABEL: &[u8] = b"seft/content-hash/v1";

type HmacSha256 = Hmac<Sha256>;

/// Generate a cryptographically secure random nonce for the given mode.
pub fn generate_nonce(mode: Mode) -> Result<Vec<u8>, SeftError> {
    let mut nonce = vec![0u8; nonce_len_for(mode)];
    getrandom(&mut nonce).map_err(|_| SeftError::InvalidInput("system RNG unavailable"))?;
    Ok(nonce)
}

/// Generate a cryptographically secure random 32-byte salt.
pub fn generate_salt() -> Result<[u8; SALT_LEN], SeftError> {
    let mut salt = [0u8; SALT_LEN];
    getrandom(&mut salt).map_err(|_| SeftError::InvalidInput("system RNG unavailable"))?;
    Ok(salt)
}

/// Hide a plaintext digest so the container does not reveal it in clear.
///
/// mask = HMAC-SHA256(key, label || nonce). The operation is its own inverse.
pub fn mask_content_hash(
    digest: &[u8; HASH_LEN],
    key: &DerivedKey,
    nonce: &[u8],
) -> Result<[u8; HASH_LEN], SeftError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| SeftError::InvalidInput("hash mask: invalid key length"))?;
    mac.update(HASH_MASK_LABEL);
    mac.update(nonce);
    let mask = mac.finalize().into_bytes();

    let mut out = [0u8; HASH_LEN];
    for (o, (d, m)) in out.iter_mut().zip(digest.iter().zip(mask.iter())) {
        *o = d ^ m;
    }
    Ok(out)
}

/// Create an AES-256-GCM-SIV cipher instance.
pub fn create_aes256gcmsiv_cipher(key: &DerivedKey) -> Result<Aes256GcmSiv, SeftError> {
    Aes256GcmSiv::new_from_slice(key.as_bytes())
        .map_err(|_| SeftError::InvalidInput("cipher: invalid key length"))
}

/// Nonce for chunk `index`: the base nonce with its last four bytes XORed
/// with the big-endian index.
pub fn chunk_nonce(base: &[u8], index: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&base[..12]);
    for (n, c) in nonce[8..].iter_mut().zip(index.to_be_bytes()) {
        *n ^= c;
    }
    nonce
}

/// Associated data for a chunk: the encoded header plus a final-chunk flag.
pub fn chunk_aad(header: &[u8], is_final: bool) -> Vec<u8> {
    let mut aad = Vec::with_capacity(header.len() + 1);
    aad.extend_from_slice(header);
    aad.push(u8::from(is_final));
    aad
}

/// Encrypt `buf` in place and return the detached tag.
pub fn seal_chunk(
    cipher: &Aes256GcmSiv,
    nonce: &[u8; 12],
    aad: &[u8],
    buf: &mut [u8],
) -> Result<[u8; TAG_LEN], SeftError> {
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, buf)
        .map_err(|_| SeftError::InvalidInput("chunk too large to seal"))?;
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Verify `tag` and decrypt `buf` in place. On failure `buf` holds no plaintext.
pub fn open_chunk(
    cipher: &Aes256GcmSiv,
    nonce: &[u8; 12],
    aad: &[u8],
    buf: &mut [u8],
    tag: &[u8],
) -> Result<(), SeftError> {
    if tag.len() != TAG_LEN {
        return Err(SeftError::AuthenticationFailed);
    }
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), aad, buf, Tag::from_slice(tag))
        .map_err(|_| SeftError::AuthenticationFailed)
}

/// AES-256-CBC encryption state carried across chunks.
pub struct CbcEncryptor {
    cipher: Aes256Enc,
    prev: [u8; BLOCK_LEN],
}

impl CbcEncryptor {
    pub fn new(key: &DerivedKey, iv: &[u8]) -> Result<Self, SeftError> {
        let cipher = Aes256Enc::new_from_slice(key.as_bytes())
            .map_err(|_| SeftError::InvalidInput("cipher: invalid key length"))?;
        let prev: [u8; BLOCK_LEN] = iv
            .try_into()
            .map_err(|_| SeftError::InvalidInput("cbc: IV must be 16 bytes"))?;
        Ok(Self { cipher, prev })
    }

    /// Encrypt whole blocks in place. `buf.len()` must be a multiple of 16.
    pub fn encrypt_blocks(&mut self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % BLOCK_LEN, 0);
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            for (b, p) in block.iter_mut().zip(self.prev.iter()) {
                *b ^= p;
            }
            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
            self.prev.copy_from_slice(block);
        }
    }

    /// Pad the trailing partial block (PKCS#7) and encrypt it.
    pub fn finish(mut self, tail: &[u8]) -> [u8; BLOCK_LEN] {
        debug_assert!(tail.len() < BLOCK_LEN);
        let pad = (BLOCK_LEN - tail.len()) as u8;
        let mut block = [pad; BLOCK_LEN];
        block[..tail.len()].copy_from_slice(tail);
        self.encrypt_blocks(&mut block);
        block
    }
}

/// AES-256-CBC decryption state carried across chunks.
pub struct CbcDecryptor {
    cipher: Aes256Dec,
    prev: [u8; BLOCK_LEN],
}

impl CbcDecryptor {
    pub fn new(key: &DerivedKey, iv: &[u8]) -> Result<Self, SeftError> {
        let cipher = Aes256Dec::new_from_slice(key.as_bytes())
            .map_err(|_| SeftError::InvalidInput("cipher: invalid key length"))?;
        let prev: [u8; BLOCK_LEN] = iv
            .try_into()
            .map_err(|_| SeftError::InvalidInput("cbc: IV must be 16 bytes"))?;
        Ok(Self { cipher, prev })
    }

    /// Decrypt whole blocks in place. `buf.len()` must be a multiple of 16.
    pub fn decrypt_blocks(&mut self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % BLOCK_LEN, 0);
        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            let mut ct = [0u8; BLOCK_LEN];
            ct.copy_from_slice(block);
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
            for (b, p) in block.iter_mut().zip(self.prev.iter()) {
                *b ^= p;
            }
            self.prev = ct;
        }
    }
}

/// Length of the data in a PKCS#7-padded final block.
///
/// Bad padding means a wrong key or a damaged file; in this mode that is an
/// integrity failure.
pub fn unpad_pkcs7(block: &[u8; BLOCK_LEN]) -> Result<usize, SeftError> {
    let pad = block[BLOCK_LEN - 1];
    if pad == 0 || pad as usize > BLOCK_LEN {
        return Err(SeftError::IntegrityCheckFailed);
    }
    let expected = [pad; BLOCK_LEN];
    let start = BLOCK_LEN - pad as usize;
    if !bool::from(block[start..].ct_eq(&expected[start..])) {
        return Err(SeftError::IntegrityCheckFailed);
    }
    Ok(start)
}
