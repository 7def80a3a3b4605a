//! Folder encryption: archive a directory tree, then encrypt the archive.
//!
//! A folder `photos/` becomes `photos.tar.gz.enc`. Decryption extracts into a
//! hidden temp directory beside the target and renames it into place only
//! after every entry was written.
//!
//! The encrypted payload starts with [`FOLDER_PAYLOAD_MARKER`] ahead of the
//! archive bytes. A regular file that merely happens to be named
//! `*.tar.gz` encrypts to the same container name, so decryption goes by the
//! marker, not the name, and writes such a payload back out as a file.

use std::fmt::Display;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use secrecy::SecretString;
use walkdir::WalkDir;

use crate::file::{
    decrypt_container, decrypted_output_path, persist_tempfile_atomic, refuse_existing,
    target_dir, temp_beside, write_container,
};
use crate::types::{CancelToken, DecryptOptions, EncryptOptions, SeftError};

/// File name suffix of an encrypted folder.
pub const FOLDER_SUFFIX: &str = ".tar.gz.enc";

/// First bytes of every folder payload, before the archive itself.
pub const FOLDER_PAYLOAD_MARKER: &[u8; 8] = b"SEFTDIR1";

/// Packs a directory tree into one byte stream and unpacks it again.
pub trait Archiver: Send + Sync {
    /// Write every entry under `dir`, with paths relative to `dir`.
    fn archive(
        &self,
        dir: &Path,
        out: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<(), SeftError>;

    /// Recreate the archived tree under `target`, which already exists.
    fn extract(
        &self,
        input: &mut dyn Read,
        target: &Path,
        cancel: &CancelToken,
    ) -> Result<(), SeftError>;
}

/// Gzip-compressed tar. Symlinks are skipped both ways.
#[derive(Debug, Clone, Copy)]
pub struct TarGzArchiver {
    pub level: Compression,
}

impl Default for TarGzArchiver {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

fn archive_err(what: &str, e: impl Display) -> SeftError {
    SeftError::Archive(format!("{what}: {e}"))
}

impl Archiver for TarGzArchiver {
    fn archive(
        &self,
        dir: &Path,
        out: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<(), SeftError> {
        let mut builder = tar::Builder::new(GzEncoder::new(out, self.level));
        builder.follow_symlinks(false);

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            cancel.check()?;
            let entry = entry.map_err(|e| archive_err("walk", e))?;
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| archive_err("walk", e))?;
            let ft = entry.file_type();
            if ft.is_symlink() {
                tracing::warn!(path = %entry.path().display(), "skipping symlink");
                continue;
            }
            if ft.is_dir() {
                builder
                    .append_dir(rel, entry.path())
                    .map_err(|e| archive_err("append directory", e))?;
            } else if ft.is_file() {
                builder
                    .append_path_with_name(entry.path(), rel)
                    .map_err(|e| archive_err("append file", e))?;
            }
        }

        builder
            .into_inner()
            .and_then(|gz| gz.finish())
            .and_then(|w| w.flush())
            .map_err(|e| archive_err("finish archive", e))
    }

    fn extract(
        &self,
        input: &mut dyn Read,
        target: &Path,
        cancel: &CancelToken,
    ) -> Result<(), SeftError> {
        let canonical_target = fs::canonicalize(target)?;
        let mut archive = tar::Archive::new(GzDecoder::new(input));
        let entries = archive.entries().map_err(|e| archive_err("read archive", e))?;

        for entry in entries {
            cancel.check()?;
            let mut entry = entry.map_err(|e| archive_err("read entry", e))?;
            let kind = entry.header().entry_type();
            if kind.is_symlink() || kind.is_hard_link() {
                tracing::warn!("skipping symlink/hardlink archive entry");
                continue;
            }

            let path = entry
                .path()
                .map_err(|e| archive_err("entry path", e))?
                .into_owned();
            let Some(rel) = sanitize_archive_path(&path)? else {
                continue;
            };
            let dest = canonical_target.join(&rel);

            if kind.is_dir() {
                fs::create_dir_all(&dest).map_err(|e| archive_err("create directory", e))?;
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| archive_err("create directory", e))?;
                let canonical_parent =
                    fs::canonicalize(parent).map_err(|e| archive_err("resolve directory", e))?;
                if !canonical_parent.starts_with(&canonical_target) {
                    return Err(SeftError::Archive(
                        "archive entry escaped target directory".into(),
                    ));
                }
            }
            entry
                .unpack(&dest)
                .map_err(|e| archive_err("unpack entry", e))?;
        }
        Ok(())
    }
}

fn sanitize_archive_path(path: &Path) -> Result<Option<PathBuf>, SeftError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SeftError::Archive(format!(
                    "archive contains unsafe path component: {}",
                    path.display()
                )));
            }
        }
    }
    Ok((!clean.as_os_str().is_empty()).then_some(clean))
}

/// Whether `path` is named like an encrypted folder.
pub fn is_folder_container(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.len() > FOLDER_SUFFIX.len() && n.ends_with(FOLDER_SUFFIX))
}

/// Encrypt a directory tree to `<output_dir>/<folder>.tar.gz.enc`.
pub fn encrypt_folder(
    dir: &Path,
    password: SecretString,
    output_dir: Option<&Path>,
    opts: &EncryptOptions,
) -> Result<PathBuf, SeftError> {
    encrypt_folder_with(&TarGzArchiver::default(), dir, password, output_dir, opts)
}

/// [`encrypt_folder`] with a caller-supplied archiver.
pub fn encrypt_folder_with(
    archiver: &dyn Archiver,
    dir: &Path,
    password: SecretString,
    output_dir: Option<&Path>,
    opts: &EncryptOptions,
) -> Result<PathBuf, SeftError> {
    opts.validate()?;
    if !fs::metadata(dir)?.is_dir() {
        return Err(SeftError::InvalidInput("input is not a directory"));
    }
    let dir = fs::canonicalize(dir)?;
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(SeftError::InvalidInput("folder has no usable name"))?;
    let out_dir = target_dir(&dir, output_dir);
    let inside = SeftError::InvalidInput(
        "output directory must not be inside the folder being encrypted",
    );
    if std::path::absolute(&out_dir)?.starts_with(&dir) {
        return Err(inside);
    }
    fs::create_dir_all(&out_dir)?;
    // again after symlinks are resolved
    if fs::canonicalize(&out_dir)?.starts_with(&dir) {
        return Err(inside);
    }
    let out = out_dir.join(format!("{name}{FOLDER_SUFFIX}"));
    refuse_existing(&out, opts.force)?;
    tracing::debug!(input = %dir.display(), output = %out.display(), "archiving folder");

    // Unnamed temp file: the plaintext archive never gets a visible path.
    let mut staged = tempfile::tempfile_in(&out_dir)?;
    {
        let mut writer = BufWriter::new(&mut staged);
        writer.write_all(FOLDER_PAYLOAD_MARKER)?;
        archiver.archive(&dir, &mut writer, &opts.cancel)?;
        writer.flush()?;
    }
    staged.seek(SeekFrom::Start(0))?;
    write_container(BufReader::new(staged), &out, password, opts)?;

    tracing::info!(input = %dir.display(), output = %out.display(), "encrypted folder");
    Ok(out)
}

/// Decrypt a `<folder>.tar.gz.enc` container into `<output_dir>/<folder>/`.
///
/// A container made by [`crate::encrypt_file`] from a file named `*.tar.gz`
/// carries no folder marker; its plaintext is written back as that file and
/// the file's path is returned.
pub fn decrypt_folder(
    path: &Path,
    password: SecretString,
    output_dir: Option<&Path>,
    opts: &DecryptOptions,
) -> Result<PathBuf, SeftError> {
    decrypt_folder_with(&TarGzArchiver::default(), path, password, output_dir, opts)
}

/// [`decrypt_folder`] with a caller-supplied archiver.
pub fn decrypt_folder_with(
    archiver: &dyn Archiver,
    path: &Path,
    password: SecretString,
    output_dir: Option<&Path>,
    opts: &DecryptOptions,
) -> Result<PathBuf, SeftError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(FOLDER_SUFFIX))
        .filter(|n| !n.is_empty())
        .ok_or(SeftError::InvalidInput("folder container must end in .tar.gz.enc"))?;
    let file_target = decrypted_output_path(path, output_dir)?;
    let out_dir = target_dir(path, output_dir);
    let target = out_dir.join(name);
    tracing::debug!(input = %path.display(), output = %target.display(), "decrypting folder");

    let mut payload = temp_beside(&file_target)?;
    {
        let mut writer = BufWriter::new(payload.as_file_mut());
        decrypt_container(path, password, &mut writer, opts)?;
        writer.flush()?;
    }

    let file = payload.as_file_mut();
    file.seek(SeekFrom::Start(0))?;
    let mut marker = [0u8; FOLDER_PAYLOAD_MARKER.len()];
    let is_folder = match file.read_exact(&mut marker) {
        Ok(()) => &marker == FOLDER_PAYLOAD_MARKER,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
        Err(e) => return Err(e.into()),
    };
    if !is_folder {
        refuse_existing(&file_target, opts.force)?;
        payload.as_file().sync_all()?;
        persist_tempfile_atomic(payload, &file_target, opts.force)?;
        tracing::info!(
            input = %path.display(),
            output = %file_target.display(),
            "decrypted file from folder-named container"
        );
        return Ok(file_target);
    }
    refuse_existing(&target, opts.force)?;

    let staging = tempfile::Builder::new()
        .prefix(".seft-")
        .tempdir_in(&out_dir)?;
    archiver.extract(&mut BufReader::new(file), staging.path(), &opts.cancel)?;
    drop(payload);

    let staged = staging.keep();
    if let Err(e) = publish_dir(&staged, &target, opts.force) {
        let _ = fs::remove_dir_all(&staged);
        return Err(e);
    }

    tracing::info!(input = %path.display(), output = %target.display(), "decrypted folder");
    Ok(target)
}

fn publish_dir(staged: &Path, target: &Path, force: bool) -> Result<(), SeftError> {
    match fs::symlink_metadata(target) {
        Ok(meta) if force && meta.is_dir() => fs::remove_dir_all(target)?,
        Ok(_) if force => fs::remove_file(target)?,
        Ok(_) => {
            return Err(SeftError::InvalidInput(
                "output exists; use --force to overwrite",
            ));
        }
        Err(_) => {}
    }
    fs::rename(staged, target)?;
    Ok(())
}

/// Size summary of a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FolderInfo {
    pub files: u64,
    pub dirs: u64,
    pub total_bytes: u64,
}

/// Count files, subdirectories and bytes under `dir`, not following symlinks.
pub fn folder_info(dir: &Path) -> Result<FolderInfo, SeftError> {
    let mut info = FolderInfo::default();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| archive_err("walk", e))?;
        let ft = entry.file_type();
        if ft.is_dir() {
            info.dirs += 1;
        } else if ft.is_file() {
            info.files += 1;
            info.total_bytes += entry.metadata().map_err(|e| archive_err("walk", e))?.len();
        }
    }
    Ok(info)
}
