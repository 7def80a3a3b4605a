//! Batch processing of many files and folders.
//!
//! Each item is independent: a failure is recorded in its [`BatchResult`]
//! and the remaining items still run. With more than one worker, items are
//! spread over a bounded rayon pool while the calling thread delivers
//! progress events to the caller's callback.

use std::any::Any;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use secrecy::SecretString;

use crate::file::{decrypt_file, encrypt_file};
use crate::folder::{decrypt_folder, encrypt_folder, is_folder_container};
use crate::progress::{Progress, ProgressQueue};
use crate::types::{
    CancelToken, DEFAULT_ITERATIONS, DecryptOptions, EncryptOptions, Mode, SeftError,
};

/// Direction of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
}

/// Options shared by every item of a batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub mode: Mode,
    pub iterations: u32,
    pub force: bool,
    /// Worker threads; 0 means one per CPU. Never more than the CPU count.
    pub workers: usize,
    pub cancel: CancelToken,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            iterations: DEFAULT_ITERATIONS,
            force: false,
            workers: 0,
            cancel: CancelToken::default(),
        }
    }
}

impl BatchOptions {
    pub fn encrypt_options(&self) -> EncryptOptions {
        EncryptOptions {
            mode: self.mode,
            iterations: self.iterations,
            force: self.force,
            cancel: self.cancel.clone(),
        }
    }

    pub fn decrypt_options(&self) -> DecryptOptions {
        DecryptOptions {
            force: self.force,
            cancel: self.cancel.clone(),
        }
    }

    /// Pool size for `items` items.
    pub fn effective_workers(&self, items: usize) -> usize {
        let cpus = num_cpus::get().max(1);
        let wanted = if self.workers == 0 { cpus } else { self.workers };
        wanted.min(cpus).min(items).max(1)
    }
}

/// Outcome of one batch item.
#[derive(Debug)]
pub struct BatchResult {
    pub path: PathBuf,
    /// Output path on success.
    pub outcome: Result<PathBuf, SeftError>,
}

impl BatchResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Encrypt or decrypt every path in `items`.
///
/// Directories (on encrypt) and `*.tar.gz.enc` containers (on decrypt) go
/// through the folder codec, everything else through the file codec. A
/// `*.tar.gz.enc` made from a plain file still decrypts back to that file.
/// Results come back in input order, one per item.
///
/// `on_progress` runs on the calling thread after items complete. Events
/// pass through a bounded drop-oldest queue, so under a slow callback some
/// intermediate counts may be skipped; the final count is always delivered.
pub fn run_batch<F>(
    items: &[PathBuf],
    op: Operation,
    password: &SecretString,
    output_dir: Option<&Path>,
    opts: &BatchOptions,
    mut on_progress: F,
) -> Vec<BatchResult>
where
    F: FnMut(&Progress),
{
    let total = items.len();
    let workers = opts.effective_workers(total);
    tracing::debug!(?op, total, workers, "starting batch");

    let results = if workers <= 1 {
        run_sequential(items, op, password, output_dir, opts, &mut on_progress)
    } else {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("seft-worker-{i}"))
            .build()
        {
            Ok(pool) => {
                let queue = ProgressQueue::default();
                thread::scope(|s| {
                    let handle = s.spawn(|| {
                        pool.install(|| {
                            items
                                .par_iter()
                                .map(|path| {
                                    let result = process_item(path, op, password, output_dir, opts);
                                    queue.complete(total, path.clone());
                                    result
                                })
                                .collect::<Vec<_>>()
                        })
                    });
                    while !handle.is_finished() {
                        if let Some(event) = queue.pop_timeout(Duration::from_millis(50)) {
                            on_progress(&event);
                        }
                    }
                    for event in queue.drain() {
                        on_progress(&event);
                    }
                    handle.join().unwrap_or_else(|e| panic::resume_unwind(e))
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "worker pool unavailable, running sequentially");
                run_sequential(items, op, password, output_dir, opts, &mut on_progress)
            }
        }
    };

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    tracing::info!(?op, total, failed, "batch finished");
    results
}

fn run_sequential<F: FnMut(&Progress)>(
    items: &[PathBuf],
    op: Operation,
    password: &SecretString,
    output_dir: Option<&Path>,
    opts: &BatchOptions,
    on_progress: &mut F,
) -> Vec<BatchResult> {
    let total = items.len();
    items
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let result = process_item(path, op, password, output_dir, opts);
            on_progress(&Progress {
                completed: i + 1,
                total,
                current: path.clone(),
            });
            result
        })
        .collect()
}

fn process_item(
    path: &Path,
    op: Operation,
    password: &SecretString,
    output_dir: Option<&Path>,
    opts: &BatchOptions,
) -> BatchResult {
    let outcome = isolate(|| dispatch(path, op, password.clone(), output_dir, opts));
    if let Err(e) = &outcome {
        tracing::warn!(path = %path.display(), kind = ?e.kind(), error = %e, "batch item failed");
    }
    BatchResult {
        path: path.to_path_buf(),
        outcome,
    }
}

/// Run one item, turning a panic into that item's error.
///
/// A panicking item is aborted like an unrecoverable I/O failure; the rest of
/// the batch and the results already collected are unaffected.
fn isolate<F>(item: F) -> Result<PathBuf, SeftError>
where
    F: FnOnce() -> Result<PathBuf, SeftError>,
{
    panic::catch_unwind(AssertUnwindSafe(item)).unwrap_or_else(|payload| {
        Err(SeftError::Io(io::Error::other(format!(
            "item aborted: {}",
            panic_message(payload.as_ref())
        ))))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("panic")
}

fn dispatch(
    path: &Path,
    op: Operation,
    password: SecretString,
    output_dir: Option<&Path>,
    opts: &BatchOptions,
) -> Result<PathBuf, SeftError> {
    opts.cancel.check()?;
    match op {
        Operation::Encrypt => {
            if fs::metadata(path)?.is_dir() {
                encrypt_folder(path, password, output_dir, &opts.encrypt_options())
            } else {
                encrypt_file(path, password, output_dir, &opts.encrypt_options())
            }
        }
        Operation::Decrypt => {
            if is_folder_container(path) {
                decrypt_folder(path, password, output_dir, &opts.decrypt_options())
            } else {
                decrypt_file(path, password, output_dir, &opts.decrypt_options())
            }
        }
    }
}
