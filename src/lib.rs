#![forbid(unsafe_code)]
//! # seft: password-based encryption for files and folders.
//!
//! `seft` encrypts files, folders and byte buffers into a self-describing
//! container. Keys come from PBKDF2-HMAC-SHA256 over a fresh 32-byte salt;
//! data is sealed with AES-256-GCM-SIV in 1 MiB chunks (or, for
//! compatibility, AES-256-CBC), and a SHA-256 content hash confirms the
//! recovered plaintext.
//!
//! ## Features
//! - **File, folder and byte buffer encryption/decryption**
//! - **Streaming** in bounded memory, whatever the input size
//! - **Atomic outputs**: temp file plus rename, nothing partial at the final path
//! - **Batch runs** over many paths with per-item errors and progress callbacks
//! - **Container inspection** without the password
//!
//! ## Example: Encrypt and decrypt a byte array
//! ```no_run
//! use seft::{decrypt_bytes, encrypt_bytes, EncryptOptions};
//! use secrecy::SecretString;
//!
//! let password = SecretString::new("mypassword".into());
//! let ciphertext = encrypt_bytes(b"Hello, world!", password.clone(), &EncryptOptions::default()).unwrap();
//! let plaintext = decrypt_bytes(&ciphertext, password).unwrap();
//! assert_eq!(plaintext, b"Hello, world!");
//! ```
//!
//! ## Example: Encrypt a folder
//! ```no_run
//! use seft::{encrypt_folder, EncryptOptions};
//! use secrecy::SecretString;
//! use std::path::Path;
//!
//! let out = encrypt_folder(
//!     Path::new("photos"),
//!     SecretString::new("mypassword".into()),
//!     None,
//!     &EncryptOptions::default(),
//! )
//! .unwrap();
//! println!("wrote {}", out.display());
//! ```
//!
//! Safety notes
//! - Not audited. Protects data at rest; does not defend against a compromised host.

mod batch;
mod config;
mod crypto;
mod file;
mod folder;
mod format;
mod hash;
mod kdf;
mod password;
mod progress;
mod streaming;
mod types;

pub use batch::{BatchOptions, BatchResult, Operation, run_batch};
pub use config::{CONFIG_FILENAME, ConfigError, EngineConfig, MAX_WORKERS, config_dir};
pub use file::{
    decrypt_file, decrypted_output_path, encrypt_file, encrypted_output_path, inspect_file,
    is_encrypted_file, persist_tempfile_atomic,
};
pub use folder::{
    Archiver, FOLDER_PAYLOAD_MARKER, FOLDER_SUFFIX, FolderInfo, TarGzArchiver, decrypt_folder,
    decrypt_folder_with, encrypt_folder, encrypt_folder_with, folder_info, is_folder_container,
};
pub use format::{ContainerInfo, HASH_LEN, Header, MAGIC, SALT_LEN, TAG_LEN, VERSION};
pub use hash::{hash_bytes, hash_file, to_hex_lower, verify as verify_hash};
pub use kdf::{DerivedKey, KEY_LEN, derive_key};
pub use password::{StrengthLevel, StrengthReport, generate_password, password_strength};
pub use progress::{Progress, ProgressQueue};
pub use streaming::{
    CipherEngine, Sealed, ciphertext_len_for, decrypt_bytes, decrypt_stream, encrypt_bytes,
    encrypt_stream,
};
pub use types::*;

/// Container layout and codec.
pub mod container {
    pub use crate::format::{Container, decode, encode, nonce_len_for};
}
