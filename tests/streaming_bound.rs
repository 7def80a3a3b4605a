//! Peak heap use while streaming a large input stays near a few chunks.
//!
//! Lives in its own test binary so no other test shares the allocator counters.

use std::alloc::{GlobalAlloc, Layout, System};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicUsize, Ordering};

use secrecy::SecretString;
use seft::{CHUNK_SIZE, DecryptOptions, EncryptOptions, MIN_ITERATIONS, decrypt_stream, encrypt_stream};

struct Counting;

static CURRENT: AtomicUsize = AtomicUsize::new(0);
static PEAK: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { System.alloc(layout) };
        if !p.is_null() {
            let now = CURRENT.fetch_add(layout.size(), Ordering::SeqCst) + layout.size();
            PEAK.fetch_max(now, Ordering::SeqCst);
        }
        p
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        CURRENT.fetch_sub(layout.size(), Ordering::SeqCst);
    }
}

#[global_allocator]
static ALLOC: Counting = Counting;

/// Deterministic synthetic input of `len` bytes that never exists in memory.
struct Synthetic {
    len: u64,
    pos: u64,
}

impl Read for Synthetic {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min((self.len - self.pos) as usize);
        for (i, b) in buf[..n].iter_mut().enumerate() {
            *b = ((self.pos + i as u64) % 251) as u8;
        }
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for Synthetic {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::End(d) => self.len.saturating_add_signed(d),
            SeekFrom::Current(d) => self.pos.saturating_add_signed(d),
        }
        .min(self.len);
        Ok(self.pos)
    }
}

fn peak_during<T>(f: impl FnOnce() -> T) -> (T, usize) {
    let base = CURRENT.load(Ordering::SeqCst);
    PEAK.store(base, Ordering::SeqCst);
    let out = f();
    (out, PEAK.load(Ordering::SeqCst).saturating_sub(base))
}

#[test]
fn encrypt_and_decrypt_use_bounded_memory() {
    let len = 96 * CHUNK_SIZE as u64 + 12_345;
    let bound = 8 * CHUNK_SIZE;
    let container = tempfile::tempfile().unwrap();
    let pw = SecretString::new("pw".into());
    let opts = EncryptOptions::default().with_iterations(MIN_ITERATIONS);

    let (header, enc_peak) = peak_during(|| {
        encrypt_stream(Synthetic { len, pos: 0 }, &container, pw.clone(), &opts).unwrap()
    });
    assert!(header.ciphertext_len > len);
    assert!(enc_peak < bound, "encrypt peak {enc_peak} bytes");

    let mut reader = BufReader::new(&container);
    reader.seek(SeekFrom::Start(0)).unwrap();
    let (outcome, dec_peak) = peak_during(|| {
        decrypt_stream(reader, io::sink(), pw, &DecryptOptions::default()).unwrap()
    });
    assert_eq!(outcome.plaintext_len, len);
    assert!(outcome.integrity_confirmed);
    assert!(dec_peak < bound, "decrypt peak {dec_peak} bytes");
}
