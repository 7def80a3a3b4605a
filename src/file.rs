//! File-level encryption and decryption.
//!
//! Outputs are written to a temp file next to their final path and renamed
//! into place only after the whole operation succeeded. Any error (including
//! cancellation) drops the temp file, so a final path never holds a partial
//! result.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tempfile::NamedTempFile;

use crate::format::{ContainerInfo, Header, MAGIC};
use crate::streaming::{decrypt_stream, encrypt_stream};
use crate::types::{DecryptOptions, DecryptOutcome, ENC_EXTENSION, EncryptOptions, SeftError};

/// Encrypt a single file to `<output_dir>/<file name>.enc`.
///
/// Without `output_dir` the container is written next to the input.
/// Returns the path of the written container.
///
/// # Errors
///
/// - `SeftError::InvalidInput` if the input is not a regular file, or the
///   output exists and `opts.force` is not set
/// - `SeftError::Io` for read/write failures (see [`SeftError::kind`])
/// - `SeftError::Cancelled` if `opts.cancel` fires mid-stream
pub fn encrypt_file(
    path: &Path,
    password: SecretString,
    output_dir: Option<&Path>,
    opts: &EncryptOptions,
) -> Result<PathBuf, SeftError> {
    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Err(SeftError::InvalidInput("input is not a regular file"));
    }
    let out = encrypted_output_path(path, output_dir)?;
    tracing::debug!(input = %path.display(), output = %out.display(), "encrypting file");

    let input = BufReader::new(File::open(path)?);
    write_container(input, &out, password, opts)?;

    tracing::info!(
        input = %path.display(),
        output = %out.display(),
        bytes = meta.len(),
        "encrypted"
    );
    Ok(out)
}

/// Decrypt a `.enc` container to `<output_dir>/<name without .enc>`.
///
/// The extension is checked before the file is opened.
///
/// # Errors
///
/// - `SeftError::InvalidInput` if the name lacks the `.enc` extension, or the
///   output exists and `opts.force` is not set
/// - `SeftError::Format` for malformed containers
/// - `SeftError::AuthenticationFailed` / `SeftError::IntegrityCheckFailed`
///   for a wrong password or a damaged file
/// - `SeftError::Io` for read/write failures
pub fn decrypt_file(
    path: &Path,
    password: SecretString,
    output_dir: Option<&Path>,
    opts: &DecryptOptions,
) -> Result<PathBuf, SeftError> {
    let out = decrypted_output_path(path, output_dir)?;
    refuse_existing(&out, opts.force)?;
    tracing::debug!(input = %path.display(), output = %out.display(), "decrypting file");

    let mut tmp = temp_beside(&out)?;
    let outcome = {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let outcome = decrypt_container(path, password, &mut writer, opts)?;
        writer.flush()?;
        outcome
    };
    tmp.as_file().sync_all()?;
    persist_tempfile_atomic(tmp, &out, opts.force)?;

    tracing::info!(
        input = %path.display(),
        output = %out.display(),
        bytes = outcome.plaintext_len,
        integrity_confirmed = outcome.integrity_confirmed,
        "decrypted"
    );
    Ok(out)
}

/// Encrypt `input` into a container at `out` via temp file and rename.
pub(crate) fn write_container<R: Read + Seek>(
    input: R,
    out: &Path,
    password: SecretString,
    opts: &EncryptOptions,
) -> Result<Header, SeftError> {
    refuse_existing(out, opts.force)?;
    let mut tmp = temp_beside(out)?;
    let header = {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let header = encrypt_stream(input, &mut writer, password, opts)?;
        writer.flush()?;
        header
    };
    tmp.as_file().sync_all()?;
    persist_tempfile_atomic(tmp, out, opts.force)?;
    Ok(header)
}

/// Decrypt the container at `path` into `output`.
pub(crate) fn decrypt_container<W: Write>(
    path: &Path,
    password: SecretString,
    output: W,
    opts: &DecryptOptions,
) -> Result<DecryptOutcome, SeftError> {
    let input = BufReader::new(File::open(path)?);
    decrypt_stream(input, output, password, opts)
}

/// Output path for encryption: the input file name plus `.enc`.
pub fn encrypted_output_path(
    input: &Path,
    output_dir: Option<&Path>,
) -> Result<PathBuf, SeftError> {
    let name = input
        .file_name()
        .ok_or(SeftError::InvalidInput("input path has no file name"))?;
    let mut os = name.to_os_string();
    os.push(".");
    os.push(ENC_EXTENSION);
    Ok(target_dir(input, output_dir).join(os))
}

/// Output path for decryption: the input file name with `.enc` stripped.
pub fn decrypted_output_path(
    input: &Path,
    output_dir: Option<&Path>,
) -> Result<PathBuf, SeftError> {
    if input.extension() != Some(OsStr::new(ENC_EXTENSION)) {
        return Err(SeftError::InvalidInput("input must have a .enc extension"));
    }
    let stem = input
        .file_stem()
        .filter(|s| !s.is_empty())
        .ok_or(SeftError::InvalidInput("input path has no file name"))?;
    Ok(target_dir(input, output_dir).join(stem))
}

pub(crate) fn target_dir(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => match input.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        },
    }
}

pub(crate) fn refuse_existing(out: &Path, force: bool) -> Result<(), SeftError> {
    if !force && fs::symlink_metadata(out).is_ok() {
        return Err(SeftError::InvalidInput(
            "output exists; use --force to overwrite",
        ));
    }
    Ok(())
}

/// Create a hidden temp file in the directory that will hold `out`.
pub(crate) fn temp_beside(out: &Path) -> Result<NamedTempFile, SeftError> {
    let parent = out
        .parent()
        .ok_or(SeftError::InvalidInput("output path has no parent"))?;
    fs::create_dir_all(parent)?;
    Ok(tempfile::Builder::new().prefix(".seft-").tempfile_in(parent)?)
}

/// Atomically persist a tempfile to the target path, honoring the force overwrite policy.
///
/// Without `force` the rename refuses to replace an existing file, which also
/// catches an output created by someone else while we were working.
pub fn persist_tempfile_atomic(
    tmp: NamedTempFile,
    out: &Path,
    force: bool,
) -> Result<PathBuf, SeftError> {
    let res = if force {
        tmp.persist(out)
    } else {
        tmp.persist_noclobber(out)
    };
    res.map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            SeftError::InvalidInput("output exists; use --force to overwrite")
        } else {
            SeftError::Io(e.error)
        }
    })?;
    Ok(out.to_path_buf())
}

/// Whether `path` starts with the container magic bytes.
///
/// Unreadable or short files are simply not containers.
pub fn is_encrypted_file(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|()| &magic == MAGIC)
        .unwrap_or(false)
}

/// Read and validate a container header without the password.
pub fn inspect_file(path: &Path) -> Result<ContainerInfo, SeftError> {
    let file = File::open(path)?;
    let total_len = file.metadata()?.len();
    let header = Header::read_from(&mut BufReader::new(file), total_len)?;
    Ok(ContainerInfo::from_header(&header, total_len))
}
