//! Streaming encryption and decryption in bounded memory.
//!
//! [`CipherEngine`] turns a plaintext stream into `ciphertext || tag` (and
//! back) one 1 MiB chunk at a time. [`encrypt_stream`] / [`decrypt_stream`]
//! wrap it with key derivation, the container header and the content hash.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::mem;

use secrecy::SecretString;
use zeroize::Zeroizing;

use crate::crypto::{
    self, BLOCK_LEN, CbcDecryptor, CbcEncryptor, chunk_aad, chunk_nonce, open_chunk, seal_chunk,
};
use crate::format::{self, Header, TAG_LEN, nonce_len_for};
use crate::hash::{self, HashingReader, HashingWriter};
use crate::kdf::{DerivedKey, derive_key};
use crate::types::{
    CHUNK_SIZE, CancelToken, DecryptOptions, DecryptOutcome, EncryptOptions, FormatError, Mode,
    SeftError,
};

/// Totals reported by [`CipherEngine::encrypt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sealed {
    pub plaintext_len: u64,
    pub ciphertext_len: u64,
    /// Final-chunk tag, already written after the ciphertext (GCM-SIV only).
    pub tag: Option<[u8; TAG_LEN]>,
}

/// CipherText length a plaintext of `plaintext_len` bytes produces.
pub fn ciphertext_len_for(mode: Mode, plaintext_len: u64) -> Result<u64, SeftError> {
    match mode {
        Mode::Aes256GcmSiv => {
            let chunks = plaintext_len.div_ceil(CHUNK_SIZE as u64).max(1);
            if chunks > u64::from(u32::MAX) + 1 {
                return Err(SeftError::InvalidInput("input too large for chunk counter"));
            }
            plaintext_len
                .checked_add((chunks - 1) * TAG_LEN as u64)
                .ok_or(SeftError::InvalidInput("input too large"))
        }
        Mode::Aes256Cbc => (plaintext_len / BLOCK_LEN as u64 + 1)
            .checked_mul(BLOCK_LEN as u64)
            .ok_or(SeftError::InvalidInput("input too large")),
    }
}

/// Chunked cipher over one key, nonce and header.
pub struct CipherEngine<'a> {
    mode: Mode,
    key: &'a DerivedKey,
    nonce: &'a [u8],
    header: &'a [u8],
}

impl<'a> CipherEngine<'a> {
    /// `header` is the encoded container header; in GCM-SIV mode it is bound
    /// into every chunk as associated data.
    pub fn new(
        mode: Mode,
        key: &'a DerivedKey,
        nonce: &'a [u8],
        header: &'a [u8],
    ) -> Result<Self, SeftError> {
        if nonce.len() != nonce_len_for(mode) {
            return Err(SeftError::InvalidInput("nonce length does not match mode"));
        }
        Ok(Self {
            mode,
            key,
            nonce,
            header,
        })
    }

    /// Encrypt `reader` to EOF, writing `ciphertext || tag` to `writer`.
    pub fn encrypt<R: Read, W: Write>(
        &self,
        reader: R,
        writer: W,
        cancel: &CancelToken,
    ) -> Result<Sealed, SeftError> {
        match self.mode {
            Mode::Aes256GcmSiv => self.encrypt_gcm_siv(reader, writer, cancel),
            Mode::Aes256Cbc => self.encrypt_cbc(reader, writer, cancel),
        }
    }

    /// Decrypt `ciphertext_len` bytes (plus the trailing tag in GCM-SIV mode)
    /// from `reader`, writing plaintext to `writer`. Returns the plaintext length.
    ///
    /// GCM-SIV chunks are verified before any of their plaintext is written.
    pub fn decrypt<R: Read, W: Write>(
        &self,
        reader: R,
        ciphertext_len: u64,
        writer: W,
        cancel: &CancelToken,
    ) -> Result<u64, SeftError> {
        match self.mode {
            Mode::Aes256GcmSiv => self.decrypt_gcm_siv(reader, ciphertext_len, writer, cancel),
            Mode::Aes256Cbc => self.decrypt_cbc(reader, ciphertext_len, writer, cancel),
        }
    }

    fn encrypt_gcm_siv<R: Read, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
        cancel: &CancelToken,
    ) -> Result<Sealed, SeftError> {
        let cipher = crypto::create_aes256gcmsiv_cipher(self.key)?;
        let aad_next = chunk_aad(self.header, false);
        let aad_last = chunk_aad(self.header, true);

        // One chunk of lookahead tells us whether the current chunk is final.
        let mut cur = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
        let mut next = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
        let mut n = read_full(&mut reader, &mut cur)?;
        let mut index: u32 = 0;
        let mut pt_len = 0u64;
        let mut ct_len = 0u64;

        loop {
            cancel.check()?;
            let m = if n == CHUNK_SIZE {
                read_full(&mut reader, &mut next)?
            } else {
                0
            };
            let is_final = m == 0;
            let nonce = chunk_nonce(self.nonce, index);
            let aad = if is_final { &aad_last } else { &aad_next };
            let tag = seal_chunk(&cipher, &nonce, aad, &mut cur[..n])?;

            writer.write_all(&cur[..n])?;
            pt_len += n as u64;
            ct_len += n as u64;
            writer.write_all(&tag)?;

            if is_final {
                writer.flush()?;
                return Ok(Sealed {
                    plaintext_len: pt_len,
                    ciphertext_len: ct_len,
                    tag: Some(tag),
                });
            }
            ct_len += TAG_LEN as u64;
            mem::swap(&mut cur, &mut next);
            n = m;
            index = index
                .checked_add(1)
                .ok_or(SeftError::InvalidInput("input too large for chunk counter"))?;
        }
    }

    fn decrypt_gcm_siv<R: Read, W: Write>(
        &self,
        mut reader: R,
        ciphertext_len: u64,
        mut writer: W,
        cancel: &CancelToken,
    ) -> Result<u64, SeftError> {
        let cipher = crypto::create_aes256gcmsiv_cipher(self.key)?;
        let aad_next = chunk_aad(self.header, false);
        let aad_last = chunk_aad(self.header, true);
        let framed = (CHUNK_SIZE + TAG_LEN) as u64;

        let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE + TAG_LEN]);
        let mut remaining = ciphertext_len;
        let mut index: u32 = 0;
        let mut pt_len = 0u64;

        loop {
            cancel.check()?;
            if remaining > CHUNK_SIZE as u64 {
                // A non-final chunk always carries a full chunk plus its tag.
                if remaining < framed {
                    return Err(FormatError::Corrupt("truncated chunk").into());
                }
                reader
                    .read_exact(&mut buf[..])
                    .map_err(|e| SeftError::from_read(e, "ciphertext truncated"))?;
                let (ct, tag) = buf.split_at_mut(CHUNK_SIZE);
                open_chunk(&cipher, &chunk_nonce(self.nonce, index), &aad_next, ct, tag)?;
                writer.write_all(ct)?;
                pt_len += CHUNK_SIZE as u64;
                remaining -= framed;
                index = index
                    .checked_add(1)
                    .ok_or(FormatError::Corrupt("too many chunks"))?;
            } else {
                let n = remaining as usize;
                reader
                    .read_exact(&mut buf[..n + TAG_LEN])
                    .map_err(|e| SeftError::from_read(e, "ciphertext truncated"))?;
                let (ct, tag) = buf[..n + TAG_LEN].split_at_mut(n);
                open_chunk(&cipher, &chunk_nonce(self.nonce, index), &aad_last, ct, tag)?;
                writer.write_all(ct)?;
                writer.flush()?;
                return Ok(pt_len + n as u64);
            }
        }
    }

    fn encrypt_cbc<R: Read, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
        cancel: &CancelToken,
    ) -> Result<Sealed, SeftError> {
        let mut enc = CbcEncryptor::new(self.key, self.nonce)?;
        let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
        let mut pt_len = 0u64;
        let mut ct_len = 0u64;

        loop {
            cancel.check()?;
            let n = read_full(&mut reader, &mut buf)?;
            pt_len += n as u64;
            let whole = n - n % BLOCK_LEN;
            enc.encrypt_blocks(&mut buf[..whole]);
            writer.write_all(&buf[..whole])?;
            ct_len += whole as u64;
            if n < CHUNK_SIZE {
                let last = enc.finish(&buf[whole..n]);
                writer.write_all(&last)?;
                writer.flush()?;
                return Ok(Sealed {
                    plaintext_len: pt_len,
                    ciphertext_len: ct_len + BLOCK_LEN as u64,
                    tag: None,
                });
            }
        }
    }

    fn decrypt_cbc<R: Read, W: Write>(
        &self,
        mut reader: R,
        ciphertext_len: u64,
        mut writer: W,
        cancel: &CancelToken,
    ) -> Result<u64, SeftError> {
        if ciphertext_len == 0 || ciphertext_len % BLOCK_LEN as u64 != 0 {
            return Err(FormatError::Corrupt("ciphertext is not whole blocks").into());
        }
        let mut dec = CbcDecryptor::new(self.key, self.nonce)?;
        let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
        // The last block is held back until we know it carries the padding.
        let mut held = Zeroizing::new([0u8; BLOCK_LEN]);
        let mut have_held = false;
        let mut remaining = ciphertext_len;
        let mut pt_len = 0u64;

        while remaining > 0 {
            cancel.check()?;
            let n = remaining.min(CHUNK_SIZE as u64) as usize;
            reader
                .read_exact(&mut buf[..n])
                .map_err(|e| SeftError::from_read(e, "ciphertext truncated"))?;
            dec.decrypt_blocks(&mut buf[..n]);
            if have_held {
                writer.write_all(&held[..])?;
                pt_len += BLOCK_LEN as u64;
            }
            writer.write_all(&buf[..n - BLOCK_LEN])?;
            pt_len += (n - BLOCK_LEN) as u64;
            held.copy_from_slice(&buf[n - BLOCK_LEN..n]);
            have_held = true;
            remaining -= n as u64;
        }

        let keep = crypto::unpad_pkcs7(&held)?;
        writer.write_all(&held[..keep])?;
        writer.flush()?;
        Ok(pt_len + keep as u64)
    }
}

/// Fill `buf` from `reader`, stopping early only at EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Remaining length of a seekable stream from its current position.
fn remaining_len<S: Seek>(stream: &mut S) -> io::Result<u64> {
    let pos = stream.stream_position()?;
    let end = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(pos))?;
    Ok(end.saturating_sub(pos))
}

/// Encrypt a seekable plaintext stream into a complete container.
///
/// The input is read twice: once to hash and measure it, once to encrypt.
/// If it changes in between, the call fails rather than writing a container
/// whose stored hash does not match its content. The password is dropped
/// as soon as the key is derived.
pub fn encrypt_stream<R: Read + Seek, W: Write>(
    mut input: R,
    mut output: W,
    password: SecretString,
    opts: &EncryptOptions,
) -> Result<Header, SeftError> {
    opts.validate()?;
    let start = input.stream_position()?;
    let (digest, pt_len) = hash::hash_reader(&mut input, &opts.cancel)?;
    input.seek(SeekFrom::Start(start))?;

    let salt = crypto::generate_salt()?;
    let nonce = crypto::generate_nonce(opts.mode)?;
    let key = derive_key(&password, &salt, opts.iterations)?;
    drop(password);

    let content_hash = crypto::mask_content_hash(&digest, &key, &nonce)?;
    let ciphertext_len = ciphertext_len_for(opts.mode, pt_len)?;
    let header = Header::new(
        opts.mode,
        opts.iterations,
        salt,
        nonce,
        content_hash,
        ciphertext_len,
    );
    let header_bytes = header.encode();
    output.write_all(&header_bytes)?;

    let engine = CipherEngine::new(opts.mode, &key, &header.nonce, &header_bytes)?;
    let mut reader = HashingReader::new(&mut input);
    let sealed = engine.encrypt(&mut reader, &mut output, &opts.cancel)?;
    let (digest_again, len_again) = reader.finalize();
    if len_again != pt_len
        || sealed.ciphertext_len != ciphertext_len
        || !hash::verify_digest(&digest, &digest_again)
    {
        return Err(SeftError::InvalidInput("input changed during encryption"));
    }
    output.flush()?;

    tracing::debug!(
        mode = ?opts.mode,
        plaintext_len = pt_len,
        ciphertext_len,
        "encrypted stream"
    );
    Ok(header)
}

/// Decrypt a container stream, writing the plaintext to `output`.
///
/// `output` may receive verified plaintext before the content hash is
/// checked at the end; callers writing to disk use a temp file and only
/// publish it on `Ok`.
pub fn decrypt_stream<R: Read + Seek, W: Write>(
    mut input: R,
    output: W,
    password: SecretString,
    opts: &DecryptOptions,
) -> Result<DecryptOutcome, SeftError> {
    let total_len = remaining_len(&mut input)?;
    let header = Header::read_from(&mut input, total_len)?;
    let key = derive_key(&password, &header.salt, header.iterations)?;
    drop(password);

    let header_bytes = header.encode();
    let engine = CipherEngine::new(header.mode, &key, &header.nonce, &header_bytes)?;
    let mut writer = HashingWriter::new(output);
    engine.decrypt(&mut input, header.ciphertext_len, &mut writer, &opts.cancel)?;
    let (digest, plaintext_len) = writer.finalize();

    let expected = crypto::mask_content_hash(&header.content_hash, &key, &header.nonce)?;
    if !hash::verify_digest(&expected, &digest) {
        return Err(SeftError::IntegrityCheckFailed);
    }

    tracing::debug!(mode = ?header.mode, plaintext_len, "integrity confirmed");
    Ok(DecryptOutcome {
        mode: header.mode,
        plaintext_len,
        integrity_confirmed: true,
    })
}

/// Encrypt a byte slice into a complete in-memory container.
pub fn encrypt_bytes(
    plaintext: &[u8],
    password: SecretString,
    opts: &EncryptOptions,
) -> Result<Vec<u8>, SeftError> {
    let mut body = Vec::with_capacity(plaintext.len() + TAG_LEN + BLOCK_LEN);
    let header = encrypt_stream(Cursor::new(plaintext), &mut body, password, opts)?;
    let header_len = header.encoded_len();
    let ct_end = header_len + header.ciphertext_len as usize;

    let tag = if header.mode.is_authenticated() {
        let mut t = [0u8; TAG_LEN];
        t.copy_from_slice(&body[ct_end..]);
        Some(t)
    } else {
        None
    };
    Ok(format::encode(&header, &body[header_len..ct_end], tag.as_ref()))
}

/// Decrypt an in-memory container.
pub fn decrypt_bytes(container: &[u8], password: SecretString) -> Result<Vec<u8>, SeftError> {
    let parsed = format::decode(container)?;
    let key = derive_key(&password, &parsed.header.salt, parsed.header.iterations)?;
    drop(password);

    let header_bytes = &container[..parsed.header_len];
    let engine = CipherEngine::new(parsed.header.mode, &key, &parsed.header.nonce, header_bytes)?;
    let mut plaintext = Vec::with_capacity(parsed.ciphertext.len());
    engine.decrypt(
        &container[parsed.header_len..],
        parsed.header.ciphertext_len,
        &mut plaintext,
        &CancelToken::default(),
    )?;

    let expected =
        crypto::mask_content_hash(&parsed.header.content_hash, &key, &parsed.header.nonce)?;
    if !hash::verify(&expected, &plaintext) {
        return Err(SeftError::IntegrityCheckFailed);
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MIN_ITERATIONS;

    fn opts(mode: Mode) -> EncryptOptions {
        EncryptOptions::default()
            .with_mode(mode)
            .with_iterations(MIN_ITERATIONS)
    }

    fn pw(s: &str) -> SecretString {
        SecretString::new(s.into())
    }

    #[test]
    fn ciphertext_lengths_follow_chunking() {
        let c = CHUNK_SIZE as u64;
        assert_eq!(ciphertext_len_for(Mode::Aes256GcmSiv, 0).unwrap(), 0);
        assert_eq!(ciphertext_len_for(Mode::Aes256GcmSiv, c).unwrap(), c);
        assert_eq!(ciphertext_len_for(Mode::Aes256GcmSiv, c + 1).unwrap(), c + 1 + 16);
        assert_eq!(ciphertext_len_for(Mode::Aes256Cbc, 0).unwrap(), 16);
        assert_eq!(ciphertext_len_for(Mode::Aes256Cbc, 16).unwrap(), 32);
        assert_eq!(ciphertext_len_for(Mode::Aes256Cbc, 17).unwrap(), 32);
    }

    #[test]
    fn round_trip_both_modes_across_chunk_boundary() {
        let data: Vec<u8> = (0..CHUNK_SIZE + 100).map(|i| (i % 251) as u8).collect();
        for mode in [Mode::Aes256GcmSiv, Mode::Aes256Cbc] {
            let ct = encrypt_bytes(&data, pw("pw"), &opts(mode)).unwrap();
            let pt = decrypt_bytes(&ct, pw("pw")).unwrap();
            assert_eq!(pt, data, "mode={mode:?}");
        }
    }

    #[test]
    fn exact_chunk_multiple_round_trips() {
        let data = vec![7u8; CHUNK_SIZE];
        let ct = encrypt_bytes(&data, pw("pw"), &opts(Mode::Aes256GcmSiv)).unwrap();
        assert_eq!(decrypt_bytes(&ct, pw("pw")).unwrap(), data);
    }

    #[test]
    fn stream_api_reports_integrity() {
        let data = b"streamed through the engine".to_vec();
        let mut container = Vec::new();
        encrypt_stream(Cursor::new(&data), &mut container, pw("pw"), &opts(Mode::Aes256Cbc))
            .unwrap();
        let mut out = Vec::new();
        let outcome =
            decrypt_stream(Cursor::new(&container), &mut out, pw("pw"), &DecryptOptions::default())
                .unwrap();
        assert_eq!(out, data);
        assert!(outcome.integrity_confirmed);
        assert_eq!(outcome.mode, Mode::Aes256Cbc);
        assert_eq!(outcome.plaintext_len, data.len() as u64);
    }

    #[test]
    fn cancelled_encryption_stops() {
        let o = opts(Mode::Aes256GcmSiv);
        o.cancel.cancel();
        let err = encrypt_bytes(b"data", pw("pw"), &o).unwrap_err();
        assert!(matches!(err, SeftError::Cancelled));
    }

    /// Fails the test if the engine reads before checking its options.
    struct Untouchable;

    impl Read for Untouchable {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("input was read"))
        }
    }

    impl Seek for Untouchable {
        fn seek(&mut self, _: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn weak_iterations_rejected_before_reading_input() {
        let o = EncryptOptions::default().with_iterations(50);
        let mut out = Vec::new();
        let err = encrypt_stream(Untouchable, &mut out, pw("pw"), &o).unwrap_err();
        assert!(matches!(err, SeftError::InvalidInput(_)), "{err:?}");
        assert!(out.is_empty());
    }

    #[test]
    fn header_tamper_breaks_authentication() {
        let mut ct = encrypt_bytes(b"payload", pw("pw"), &opts(Mode::Aes256GcmSiv)).unwrap();
        // last byte of the salt: still parses, but the AAD no longer matches
        ct[13 + 4 + 31] ^= 0x01;
        let err = decrypt_bytes(&ct, pw("pw")).unwrap_err();
        assert!(matches!(err, SeftError::AuthenticationFailed));
    }
}
