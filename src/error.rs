use std::io;
use thiserror::Error;

/// Failure taxonomy for the whole decryption pipeline.
///
/// `FormatMismatch` is the only recoverable variant: the registry catches it
/// and moves on to the next decrypter. Everything else is fatal for the file
/// (or, for the database variants, for KGG support as a whole) and is
/// expected to be logged by the caller before continuing with the batch.
#[derive(Error, Debug)]
pub enum DecryptError {
    #[error("Stream does not match the {0} container layout")]
    FormatMismatch(&'static str),

    #[error("Unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),

    #[error("Decrypted metadata does not name a media format: {0}")]
    UnsupportedMetadata(String),

    #[error("No decryption key for file id {0:?} (load the key database first)")]
    KeyNotFound(String),

    #[error("Wrapped key did not decode to usable cipher material")]
    InvalidEkey,

    #[error("Requested range [{offset}, {offset}+{length}) exceeds payload length {available}")]
    OutOfRange {
        offset: u64,
        length: u64,
        available: u64,
    },

    #[error("No registered decrypter recognises this stream")]
    NoMatchingDecrypter,

    #[error("Unsupported key database: {0}")]
    UnsupportedDatabase(String),

    #[error("Key database integrity check failed: page-1 check bytes {actual} do not match backup {expected}")]
    DatabaseIntegrity { expected: String, actual: String },

    #[error("Key database query failed: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to write cover art tag: {0}")]
    Tag(#[from] lofty::error::LoftyError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, DecryptError>;
