//! Container B: the multi-file-keyed container ("KGG").
//!
//! The header carries no cipher material of its own, only a per-file key
//! identifier. The real secret lives in the per-user key database (see
//! [`crate::kgdb`]); this decrypter therefore holds the loaded [`KeyTable`]
//! and fails with `KeyNotFound` for files whose identifier is absent.

use std::io::{Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt};

use super::{pump_chunks, resolve_range, Decrypter, DecryptOptions, InputStream};
use crate::error::{DecryptError, Result};
use crate::format::AudioFormat;
use crate::kgdb::KeyTable;
use crate::qmc2::Qmc2Cipher;
use crate::stream::read_chunk;

const HEADER_LEN_OFFSET: u64 = 16;
const MODE_OFFSET: u64 = 20;
const KEY_ID_OFFSET: u64 = 68;
/// The only encryption mode this family ships; other values mean a header
/// shape we do not speak.
const SUPPORTED_MODE: u32 = 5;

pub struct KggDecrypter {
    keys: KeyTable,
}

impl KggDecrypter {
    pub fn new(keys: KeyTable) -> Self {
        Self { keys }
    }

    /// Parse the header, returning the payload start offset and the per-file
    /// key identifier.
    fn read_header(input: &mut dyn InputStream) -> Result<(u64, String)> {
        input.seek(SeekFrom::Start(HEADER_LEN_OFFSET))?;
        let header_len = match input.read_u32::<LittleEndian>() {
            Ok(v) => v as u64,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(DecryptError::FormatMismatch("KGG"))
            }
            Err(e) => return Err(e.into()),
        };
        let mode = input.read_u32::<LittleEndian>()?;
        if mode != SUPPORTED_MODE {
            return Err(DecryptError::FormatMismatch("KGG"));
        }
        input.seek(SeekFrom::Start(KEY_ID_OFFSET))?;
        let raw_id = read_chunk(input)?;
        let key_id = String::from_utf8(raw_id)
            .map_err(|_| DecryptError::FormatMismatch("KGG"))?;
        Ok((header_len, key_id))
    }

    fn build_cipher(&self, key_id: &str) -> Result<Qmc2Cipher> {
        let ekey = self
            .keys
            .get(key_id)
            .ok_or_else(|| DecryptError::KeyNotFound(key_id.to_string()))?;
        Qmc2Cipher::from_ekey(ekey)
    }
}

impl Decrypter for KggDecrypter {
    fn name(&self) -> &'static str {
        "kgg"
    }

    fn probe(&self, input: &mut dyn InputStream) -> Result<()> {
        input.seek(SeekFrom::Start(MODE_OFFSET))?;
        match input.read_u32::<LittleEndian>() {
            Ok(SUPPORTED_MODE) => Ok(()),
            Ok(_) => Err(DecryptError::FormatMismatch("KGG")),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(DecryptError::FormatMismatch("KGG"))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn detect_format(&self, input: &mut dyn InputStream) -> Result<AudioFormat> {
        let mut head = Vec::with_capacity(8);
        self.decrypt_range(
            input,
            &mut head,
            DecryptOptions {
                length: Some(8),
                ..Default::default()
            },
        )?;
        AudioFormat::sniff(&head)
            .ok_or_else(|| DecryptError::UnsupportedAudioFormat(hex::encode(&head)))
    }

    fn decrypted_size(&self, input: &mut dyn InputStream) -> Result<u64> {
        let (payload_start, _) = Self::read_header(input)?;
        let total = input.seek(SeekFrom::End(0))?;
        Ok(total.saturating_sub(payload_start))
    }

    fn decrypt_range(
        &self,
        input: &mut dyn InputStream,
        output: &mut dyn Write,
        options: DecryptOptions<'_>,
    ) -> Result<()> {
        let (payload_start, key_id) = Self::read_header(input)?;
        let cipher = self.build_cipher(&key_id)?;
        let available = input.seek(SeekFrom::End(0))?.saturating_sub(payload_start);

        let length = resolve_range(options.offset, options.length, available)?;
        input.seek(SeekFrom::Start(payload_start + options.offset))?;
        pump_chunks(input, output, length, options.offset, options, |chunk, offset| {
            cipher.decrypt(chunk, offset)
        })
    }
}
