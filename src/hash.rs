//! Content hashing for integrity confirmation.
//!
//! A SHA-256 digest of the plaintext is taken before encryption and checked
//! after decryption, independent of any cipher tag.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::format::HASH_LEN;
use crate::types::{CHUNK_SIZE, CancelToken, SeftError};

/// Hash a byte slice and return the raw digest bytes.
pub fn hash_bytes(data: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(data).into()
}

/// Hash a reader to EOF in bounded chunks, returning the digest and byte count.
pub fn hash_reader<R: Read>(
    reader: R,
    cancel: &CancelToken,
) -> Result<([u8; HASH_LEN], u64), SeftError> {
    let mut reader = BufReader::new(reader);
    let mut h = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    let mut since_check = 0usize;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
        total += n as u64;
        since_check += n;
        if since_check >= CHUNK_SIZE {
            cancel.check()?;
            since_check = 0;
        }
    }
    Ok((h.finalize().into(), total))
}

/// Hash a file (streaming) and return the raw digest bytes.
pub fn hash_file(path: &Path) -> Result<[u8; HASH_LEN], SeftError> {
    let file = File::open(path)?;
    Ok(hash_reader(file, &CancelToken::default())?.0)
}

/// Check `plaintext` against an expected digest.
pub fn verify(expected: &[u8], plaintext: &[u8]) -> bool {
    verify_digest(expected, &hash_bytes(plaintext))
}

/// Constant-time digest comparison.
pub fn verify_digest(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
}

/// Reader adapter that hashes and counts everything read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    len: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            len: 0,
        }
    }

    pub fn finalize(self) -> ([u8; HASH_LEN], u64) {
        (self.hasher.finalize().into(), self.len)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.len += n as u64;
        Ok(n)
    }
}

/// Writer adapter that hashes and counts everything written through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    len: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            len: 0,
        }
    }

    pub fn finalize(self) -> ([u8; HASH_LEN], u64) {
        (self.hasher.finalize().into(), self.len)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Helper to hex-encode (lower-case) for display or logs.
pub fn to_hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_answer() {
        assert_eq!(
            to_hex_lower(&hash_bytes(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn reader_and_slice_agree() {
        let data = vec![0x42u8; 200_000];
        let (d, n) = hash_reader(&data[..], &CancelToken::default()).unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(d, hash_bytes(&data));
        assert!(verify(&d, &data));
        assert!(!verify(&d, &data[1..]));
    }

    #[test]
    fn adapters_see_every_byte() {
        let mut r = HashingReader::new(&b"hello world"[..]);
        let mut sink = Vec::new();
        io::copy(&mut r, &mut sink).unwrap();
        assert_eq!(r.finalize(), (hash_bytes(b"hello world"), 11));

        let mut w = HashingWriter::new(Vec::new());
        w.write_all(b"hello world").unwrap();
        assert_eq!(w.finalize(), (hash_bytes(b"hello world"), 11));
    }

    #[test]
    fn length_mismatch_never_verifies() {
        assert!(!verify_digest(&[0u8; 32], &[0u8; 31]));
    }
}
