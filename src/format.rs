//! On-disk container layout.
//!
//! ```text
//! magic            4   "SEFT"
//! version          4   u32
//! mode             1   0 = AES-256-GCM-SIV, 1 = AES-256-CBC
//! iterations       4   u32, PBKDF2 rounds
//! salt_len + salt  4 + 32
//! nonce_len + nonce 4 + 12 (GCM-SIV) or 16 (CBC)
//! hash_len + hash  4 + 32, SHA-256 of the plaintext XOR a key-derived mask
//! ct_len           8   u64
//! ciphertext       ct_len
//! tag              16  (mode 0 only)
//! ```
//!
//! Integers are little-endian. The header is everything up to and including
//! `ct_len`; its encoded bytes are the associated data of every GCM-SIV chunk.

use std::io::Read;

use crate::types::{FormatError, MAX_ITERATIONS, MIN_ITERATIONS, Mode, SeftError};

pub const MAGIC: &[u8; 4] = b"SEFT";
pub const VERSION: u32 = 1;
pub const SALT_LEN: usize = 32;
pub const HASH_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

/// Header size with every variable-length field empty.
pub const MIN_HEADER_LEN: usize = 4 + 4 + 1 + 4 + 4 + 4 + 4 + 8;

/// Upper bound on a length-prefixed header field before we allocate for it.
const MAX_FIELD_LEN: u32 = 64;

/// Nonce length required by a mode.
pub fn nonce_len_for(mode: Mode) -> usize {
    match mode {
        Mode::Aes256GcmSiv => 12,
        Mode::Aes256Cbc => 16,
    }
}

/// Parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub mode: Mode,
    pub iterations: u32,
    pub salt: [u8; SALT_LEN],
    pub nonce: Vec<u8>,
    /// Masked plaintext digest, see [`crate::crypto::mask_content_hash`].
    pub content_hash: [u8; HASH_LEN],
    pub ciphertext_len: u64,
}

impl Header {
    pub fn new(
        mode: Mode,
        iterations: u32,
        salt: [u8; SALT_LEN],
        nonce: Vec<u8>,
        content_hash: [u8; HASH_LEN],
        ciphertext_len: u64,
    ) -> Self {
        Self {
            version: VERSION,
            mode,
            iterations,
            salt,
            nonce,
            content_hash,
            ciphertext_len,
        }
    }

    pub fn encoded_len(&self) -> usize {
        MIN_HEADER_LEN + SALT_LEN + self.nonce.len() + HASH_LEN
    }

    /// Bytes that follow the header: ciphertext plus the trailing tag, if any.
    pub fn body_len(&self) -> Option<u64> {
        let tag = if self.mode.is_authenticated() { TAG_LEN as u64 } else { 0 };
        self.ciphertext_len.checked_add(tag)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.mode as u8);
        out.extend_from_slice(&self.iterations.to_le_bytes());
        put_field(&mut out, &self.salt);
        put_field(&mut out, &self.nonce);
        put_field(&mut out, &self.content_hash);
        out.extend_from_slice(&self.ciphertext_len.to_le_bytes());
        out
    }

    /// Parse a header from the front of `buf`, returning it with its encoded length.
    ///
    /// Checks, in order: minimum length, magic, version, then each declared
    /// field length against the bytes that remain. A well-formed header for
    /// the wrong password parses fine; that failure surfaces at decryption.
    pub fn decode(buf: &[u8]) -> Result<(Header, usize), FormatError> {
        if buf.len() < MIN_HEADER_LEN {
            return Err(FormatError::Corrupt("container too short"));
        }
        let mut r = SliceReader { buf, pos: 0 };
        if r.take(4)? != MAGIC {
            return Err(FormatError::Corrupt("bad magic bytes"));
        }
        let version = r.u32()?;
        if version != VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let mode = Mode::from_byte(r.u8()?).ok_or(FormatError::Corrupt("unknown mode"))?;
        let iterations = r.u32()?;
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
            return Err(FormatError::Corrupt("iteration count out of range"));
        }

        let salt = r.field("salt length exceeds buffer")?;
        if salt.len() != SALT_LEN {
            return Err(FormatError::Corrupt("unexpected salt length"));
        }
        let nonce = r.field("nonce length exceeds buffer")?;
        if nonce.len() != nonce_len_for(mode) {
            return Err(FormatError::Corrupt("unexpected nonce length"));
        }
        let hash = r.field("hash length exceeds buffer")?;
        if hash.len() != HASH_LEN {
            return Err(FormatError::Corrupt("unexpected hash length"));
        }
        let ciphertext_len = r.u64()?;
        if mode == Mode::Aes256Cbc && (ciphertext_len == 0 || ciphertext_len % 16 != 0) {
            return Err(FormatError::Corrupt("ciphertext is not whole blocks"));
        }

        let mut salt_arr = [0u8; SALT_LEN];
        salt_arr.copy_from_slice(salt);
        let mut hash_arr = [0u8; HASH_LEN];
        hash_arr.copy_from_slice(hash);

        let header = Header {
            version,
            mode,
            iterations,
            salt: salt_arr,
            nonce: nonce.to_vec(),
            content_hash: hash_arr,
            ciphertext_len,
        };
        Ok((header, r.pos))
    }

    /// Read and validate a header from a stream of known total length.
    ///
    /// Field lengths are bounded before anything is allocated, and the
    /// declared ciphertext must account for exactly the bytes that remain.
    pub fn read_from<R: Read>(reader: &mut R, total_len: u64) -> Result<Header, SeftError> {
        if total_len < MIN_HEADER_LEN as u64 {
            return Err(FormatError::Corrupt("container too short").into());
        }
        // magic, version, mode, iterations
        let mut buf = vec![0u8; 13];
        reader
            .read_exact(&mut buf)
            .map_err(|e| SeftError::from_read(e, "truncated header"))?;
        if &buf[..4] != MAGIC {
            return Err(FormatError::Corrupt("bad magic bytes").into());
        }
        let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != VERSION {
            return Err(FormatError::UnsupportedVersion(version).into());
        }

        for _ in 0..3 {
            let mut len = [0u8; 4];
            reader
                .read_exact(&mut len)
                .map_err(|e| SeftError::from_read(e, "truncated header"))?;
            let n = u32::from_le_bytes(len);
            if n > MAX_FIELD_LEN {
                return Err(FormatError::Corrupt("header field length exceeds buffer").into());
            }
            buf.extend_from_slice(&len);
            let start = buf.len();
            buf.resize(start + n as usize, 0);
            reader
                .read_exact(&mut buf[start..])
                .map_err(|e| SeftError::from_read(e, "header field length exceeds buffer"))?;
        }
        let start = buf.len();
        buf.resize(start + 8, 0);
        reader
            .read_exact(&mut buf[start..])
            .map_err(|e| SeftError::from_read(e, "truncated header"))?;

        let (header, used) = Header::decode(&buf)?;
        let remaining = total_len - used as u64;
        match header.body_len() {
            Some(body) if body > remaining => {
                Err(FormatError::Corrupt("ciphertext length exceeds remaining bytes").into())
            }
            Some(body) if body < remaining => {
                Err(FormatError::Corrupt("trailing bytes after container").into())
            }
            Some(_) => Ok(header),
            None => Err(FormatError::Corrupt("ciphertext length exceeds remaining bytes").into()),
        }
    }
}

/// A whole container held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container<'a> {
    pub header: Header,
    pub header_len: usize,
    pub ciphertext: &'a [u8],
    pub tag: Option<[u8; TAG_LEN]>,
}

/// Assemble a full container from its parts.
pub fn encode(header: &Header, ciphertext: &[u8], tag: Option<&[u8; TAG_LEN]>) -> Vec<u8> {
    let mut out = header.encode();
    out.reserve(ciphertext.len() + TAG_LEN);
    out.extend_from_slice(ciphertext);
    if let Some(tag) = tag {
        out.extend_from_slice(tag);
    }
    out
}

/// Split a full container into header, ciphertext and tag.
pub fn decode(bytes: &[u8]) -> Result<Container<'_>, FormatError> {
    let (header, header_len) = Header::decode(bytes)?;
    let remaining = (bytes.len() - header_len) as u64;
    let body = header
        .body_len()
        .ok_or(FormatError::Corrupt("ciphertext length exceeds remaining bytes"))?;
    if body > remaining {
        return Err(FormatError::Corrupt("ciphertext length exceeds remaining bytes"));
    }
    if body < remaining {
        return Err(FormatError::Corrupt("trailing bytes after container"));
    }

    let ct_end = header_len + header.ciphertext_len as usize;
    let ciphertext = &bytes[header_len..ct_end];
    let tag = if header.mode.is_authenticated() {
        let mut t = [0u8; TAG_LEN];
        t.copy_from_slice(&bytes[ct_end..]);
        Some(t)
    } else {
        None
    };
    Ok(Container {
        header,
        header_len,
        ciphertext,
        tag,
    })
}

/// Summary of a container file, readable without the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub version: u32,
    pub mode: Mode,
    pub iterations: u32,
    pub header_len: u64,
    pub ciphertext_len: u64,
    pub total_len: u64,
}

impl ContainerInfo {
    pub fn from_header(header: &Header, total_len: u64) -> Self {
        Self {
            version: header.version,
            mode: header.mode,
            iterations: header.iterations,
            header_len: header.encoded_len() as u64,
            ciphertext_len: header.ciphertext_len,
            total_len,
        }
    }
}

fn put_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_le_bytes());
    out.extend_from_slice(field);
}

struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        self.take_or(n, "truncated header")
    }

    fn take_or(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(FormatError::Corrupt(what))?;
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, FormatError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    /// Length-prefixed field.
    fn field(&mut self, what: &'static str) -> Result<&'a [u8], FormatError> {
        let n = self.u32()? as usize;
        self.take_or(n, what)
    }
}
