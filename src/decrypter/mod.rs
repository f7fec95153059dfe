//! The decrypter contract shared by every container family, plus the
//! probe-and-rewind registry that picks the right one for a stream.

pub mod kgg;
pub mod ncm;

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{DecryptError, Result};
use crate::format::AudioFormat;

/// Default chunk size for streaming decryption: 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Anything readable and seekable can be probed and decrypted.
pub trait InputStream: Read + Seek {}
impl<T: Read + Seek + ?Sized> InputStream for T {}

/// Cooperative cancellation flag, checked between chunks. Cancelling leaves
/// the output truncated at the last completed chunk; there is no rollback.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options for [`Decrypter::decrypt_range`].
pub struct DecryptOptions<'a> {
    /// Absolute offset into the logical plaintext.
    pub offset: u64,
    /// Bytes to decrypt; `None` means "to end".
    pub length: Option<u64>,
    /// Chunk size for the read/decrypt/write loop.
    pub buffer_size: usize,
    /// Invoked after each chunk with `(bytes_done, bytes_total)`.
    pub progress: Option<&'a mut dyn FnMut(u64, u64)>,
    pub cancel: Option<&'a CancelFlag>,
}

impl Default for DecryptOptions<'_> {
    fn default() -> Self {
        Self {
            offset: 0,
            length: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            progress: None,
            cancel: None,
        }
    }
}

/// One container family's capability set. Implementations hold no per-stream
/// state; the same value may serve many files (each call re-reads whatever
/// header material it needs).
pub trait Decrypter: Send + Sync {
    /// Short family name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Check whether the stream carries this family's header markers.
    /// Truncated or foreign streams fail with `FormatMismatch`, never panic.
    fn probe(&self, input: &mut dyn InputStream) -> Result<()>;

    /// Decrypt just enough of the stream to identify the plaintext format.
    fn detect_format(&self, input: &mut dyn InputStream) -> Result<AudioFormat>;

    /// Total logical plaintext length.
    fn decrypted_size(&self, input: &mut dyn InputStream) -> Result<u64>;

    /// Stream the decrypted plaintext range `[offset, offset+length)` into
    /// `output` in `buffer_size` chunks.
    fn decrypt_range(
        &self,
        input: &mut dyn InputStream,
        output: &mut dyn Write,
        options: DecryptOptions<'_>,
    ) -> Result<()>;
}

/// Validate a requested range against the payload length and resolve an
/// open-ended length. Both containers share these bounds rules.
pub(crate) fn resolve_range(offset: u64, length: Option<u64>, available: u64) -> Result<u64> {
    let length = length.unwrap_or_else(|| available.saturating_sub(offset));
    if offset >= available || offset.checked_add(length).map_or(true, |end| end > available) {
        return Err(DecryptError::OutOfRange {
            offset,
            length,
            available,
        });
    }
    Ok(length)
}

/// The shared read/decrypt/write loop. `apply` receives each chunk together
/// with its absolute payload offset. The input stream must already be
/// positioned at the first payload byte of the range.
pub(crate) fn pump_chunks(
    input: &mut dyn InputStream,
    output: &mut dyn Write,
    length: u64,
    start_offset: u64,
    mut options: DecryptOptions<'_>,
    mut apply: impl FnMut(&mut [u8], u64),
) -> Result<()> {
    let mut buffer = vec![0u8; options.buffer_size.max(1)];
    let mut absolute = start_offset;
    let mut remaining = length;

    while remaining > 0 {
        if let Some(flag) = options.cancel {
            if flag.is_cancelled() {
                return Err(DecryptError::Cancelled);
            }
        }
        let want = (buffer.len() as u64).min(remaining) as usize;
        let read = input.read(&mut buffer[..want])?;
        if read == 0 {
            break;
        }
        apply(&mut buffer[..read], absolute);
        output.write_all(&buffer[..read])?;
        absolute += read as u64;
        remaining -= read as u64;
        if let Some(progress) = options.progress.as_mut() {
            progress(absolute - start_offset, length);
        }
    }
    Ok(())
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Holds every known decrypter and probes them in turn. Each family's magic
/// is disjoint, so registration order does not affect correctness.
pub struct DecrypterRegistry {
    decrypters: Vec<Box<dyn Decrypter>>,
}

impl DecrypterRegistry {
    /// Registry with the self-contained decrypters pre-registered. The
    /// key-table-backed family is added separately once its database loads.
    pub fn new() -> Self {
        Self {
            decrypters: vec![Box::new(ncm::NcmDecrypter::new())],
        }
    }

    pub fn empty() -> Self {
        Self {
            decrypters: Vec::new(),
        }
    }

    pub fn register(&mut self, decrypter: Box<dyn Decrypter>) {
        self.decrypters.push(decrypter);
    }

    /// Probe every registered decrypter, rewinding the stream to the start
    /// before each attempt, and return the first that claims support. The
    /// stream is left rewound for the caller.
    pub fn find(&self, input: &mut dyn InputStream) -> Result<&dyn Decrypter> {
        for decrypter in &self.decrypters {
            input.seek(SeekFrom::Start(0))?;
            match decrypter.probe(input) {
                Ok(()) => {
                    input.seek(SeekFrom::Start(0))?;
                    return Ok(decrypter.as_ref());
                }
                Err(DecryptError::FormatMismatch(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(DecryptError::NoMatchingDecrypter)
    }
}

impl Default for DecrypterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
