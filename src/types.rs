//! Core types and enums for seft.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Streaming chunk size (1 MiB). Fixed for format version 1.
pub const CHUNK_SIZE: usize = 1 << 20;

/// PBKDF2 iterations used for new containers unless configured otherwise.
pub const DEFAULT_ITERATIONS: u32 = 600_000;

/// Lowest iteration count accepted for derivation or found in a container.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Highest iteration count accepted; bounds the work a hostile container can demand.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// Extension appended to every encrypted output.
pub const ENC_EXTENSION: &str = "enc";

/// Cipher mode recorded in byte 8 of every container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Mode {
    /// AES-256-GCM-SIV, chunked, one tag per chunk (12-byte nonce). Preferred.
    #[default]
    Aes256GcmSiv = 0,
    /// AES-256-CBC with PKCS#7 padding (16-byte IV). No tag; integrity rests
    /// on the content hash alone.
    Aes256Cbc = 1,
}

impl Mode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Mode::Aes256GcmSiv),
            1 => Some(Mode::Aes256Cbc),
            _ => None,
        }
    }

    pub fn is_authenticated(self) -> bool {
        matches!(self, Mode::Aes256GcmSiv)
    }
}

/// Cooperative cancellation flag shared between a caller and running operations.
///
/// Operations poll it between chunks and archive entries. A cancelled
/// operation returns [`SeftError::Cancelled`] and removes its temp output.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), SeftError> {
        if self.is_cancelled() {
            Err(SeftError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Options for encryption.
#[derive(Debug, Clone)]
pub struct EncryptOptions {
    pub mode: Mode,
    /// PBKDF2 iteration count, embedded in the container.
    pub iterations: u32,
    /// When `true`, allow overwriting existing output paths.
    pub force: bool,
    pub cancel: CancelToken,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            iterations: DEFAULT_ITERATIONS,
            force: false,
            cancel: CancelToken::default(),
        }
    }
}

impl EncryptOptions {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_force(mut self, on: bool) -> Self {
        self.force = on;
        self
    }

    /// Reject an iteration count outside the accepted range before any input is read.
    pub fn validate(&self) -> Result<(), SeftError> {
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&self.iterations) {
            return Err(SeftError::InvalidInput(
                "iteration count must be between 100000 and 10000000",
            ));
        }
        Ok(())
    }
}

/// Options for decryption. Mode and iterations come from the container.
#[derive(Debug, Clone, Default)]
pub struct DecryptOptions {
    pub force: bool,
    pub cancel: CancelToken,
}

impl DecryptOptions {
    pub fn with_force(mut self, on: bool) -> Self {
        self.force = on;
        self
    }
}

/// Result of a successful decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptOutcome {
    pub mode: Mode,
    pub plaintext_len: u64,
    /// The stored content hash matched the recovered plaintext.
    pub integrity_confirmed: bool,
}

/// Container parsing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("corrupt container: {0}")]
    Corrupt(&'static str),
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
}

/// Library error type (no panics for expected failures).
///
/// Messages never include password or key material.
#[derive(Error, Debug)]
pub enum SeftError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Format(#[from] FormatError),
    /// Wrong password or tampered ciphertext; the two are deliberately indistinguishable.
    #[error("authentication failed: wrong password or corrupted file")]
    AuthenticationFailed,
    #[error("integrity check failed: wrong password or corrupted file")]
    IntegrityCheckFailed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("operation cancelled")]
    Cancelled,
}

/// Coarse classification for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Format,
    AuthenticationFailed,
    IntegrityCheckFailed,
    FileNotFound,
    PermissionDenied,
    OutOfSpace,
    Io,
    Archive,
    Cancelled,
}

impl SeftError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SeftError::InvalidInput(_) => ErrorKind::InvalidInput,
            SeftError::Format(_) => ErrorKind::Format,
            SeftError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
            SeftError::IntegrityCheckFailed => ErrorKind::IntegrityCheckFailed,
            SeftError::Io(e) => match e.kind() {
                io::ErrorKind::NotFound => ErrorKind::FileNotFound,
                io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                io::ErrorKind::StorageFull => ErrorKind::OutOfSpace,
                // ENOSPC on platforms that still report it as `Other`
                _ if e.raw_os_error() == Some(28) => ErrorKind::OutOfSpace,
                _ => ErrorKind::Io,
            },
            SeftError::Archive(_) => ErrorKind::Archive,
            SeftError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Map a read that hit EOF inside a declared field to a format error.
    pub(crate) fn from_read(e: io::Error, what: &'static str) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SeftError::Format(FormatError::Corrupt(what))
        } else {
            SeftError::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bytes_round_trip() {
        for m in [Mode::Aes256GcmSiv, Mode::Aes256Cbc] {
            assert_eq!(Mode::from_byte(m as u8), Some(m));
        }
        assert_eq!(Mode::from_byte(7), None);
        assert!(Mode::Aes256GcmSiv.is_authenticated());
        assert!(!Mode::Aes256Cbc.is_authenticated());
    }

    #[test]
    fn io_errors_are_classified() {
        let nf = SeftError::from(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(nf.kind(), ErrorKind::FileNotFound);
        let pd = SeftError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(pd.kind(), ErrorKind::PermissionDenied);
        let full = SeftError::from(io::Error::from_raw_os_error(28));
        assert_eq!(full.kind(), ErrorKind::OutOfSpace);
    }

    #[test]
    fn encrypt_options_check_iteration_range() {
        assert!(EncryptOptions::default().validate().is_ok());
        let low = EncryptOptions::default().with_iterations(50);
        assert!(matches!(low.validate(), Err(SeftError::InvalidInput(_))));
        let high = EncryptOptions::default().with_iterations(MAX_ITERATIONS + 1);
        assert!(matches!(high.validate(), Err(SeftError::InvalidInput(_))));
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(matches!(token.check(), Err(SeftError::Cancelled)));
    }
}
