//! Container A: the single-key AES + substitution-box stream container
//! ("NCM").
//!
//! Layout, all offsets fixed and lengths little-endian u32:
//!
//! ```text
//! [0]   8-byte magic "CTENFDAM", 2 ignored bytes
//! [10]  key chunk:      bytes XOR 0x64, AES-128-ECB/PKCS7 under CORE_KEY,
//!                       first 17 plaintext bytes discarded → S-box seed
//! [..]  metadata chunk: bytes XOR 0x63; text after the first ':' is
//!                       base64, AES-128-ECB/PKCS7 under META_KEY, first 6
//!                       plaintext bytes discarded → JSON with a `format`
//! [..]  9 CRC bytes (never verified), then cover image chunk
//! [..]  payload to EOF, XOR keystream from the 256-entry S-box
//! ```
//!
//! The keystream is position-pure: the byte at absolute payload index `i`
//! depends only on `i` and the box, so any window decrypts independently.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use aes::Aes128;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ecb::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyInit};
use serde::Deserialize;

use super::{pump_chunks, resolve_range, Decrypter, DecryptOptions, InputStream};
use crate::error::{DecryptError, Result};
use crate::format::AudioFormat;
use crate::stream::{read_chunk, skip_chunk};

const MAGIC: &[u8; 8] = b"CTENFDAM";
/// Two reserved bytes follow the magic; chunks start at offset 10.
const CHUNKS_OFFSET: u64 = 10;
const CORE_KEY: [u8; 16] = *b"hzHRAmso5kInbaxW";
const META_KEY: [u8; 16] = *b"#14ljk_!\\]&0U<'(";
const KEY_CHUNK_XOR: u8 = 0x64;
const META_CHUNK_XOR: u8 = 0x63;
/// Fixed plaintext banner lengths discarded after each AES layer.
const KEY_PREFIX_LEN: usize = 17;
const META_PREFIX_LEN: usize = 6;
const CRC_LEN: i64 = 9;
/// Image chunks at or under this length carry no usable cover art.
const MIN_COVER_LEN: usize = 10;

#[derive(Deserialize)]
struct NcmMetadata {
    format: Option<String>,
}

#[derive(Debug, Default)]
pub struct NcmDecrypter;

impl NcmDecrypter {
    pub fn new() -> Self {
        Self
    }

    /// Seek past the key, metadata, CRC and image chunks, returning the
    /// absolute offset of the first payload byte.
    fn seek_payload(input: &mut dyn InputStream) -> Result<u64> {
        input.seek(SeekFrom::Start(CHUNKS_OFFSET))?;
        skip_chunk(input)?;
        skip_chunk(input)?;
        input.seek(SeekFrom::Current(CRC_LEN))?;
        skip_chunk(input)?;
        Ok(input.stream_position()?)
    }

    /// Read and unwrap the key chunk into the S-box.
    fn read_key_box(input: &mut dyn InputStream) -> Result<[u8; 256]> {
        input.seek(SeekFrom::Start(CHUNKS_OFFSET))?;
        let mut chunk = read_chunk(input)?;
        for byte in chunk.iter_mut() {
            *byte ^= KEY_CHUNK_XOR;
        }
        let plain = aes_ecb_decrypt(&chunk, &CORE_KEY).ok_or(DecryptError::InvalidEkey)?;
        if plain.len() <= KEY_PREFIX_LEN {
            return Err(DecryptError::InvalidEkey);
        }
        Ok(build_key_box(&plain[KEY_PREFIX_LEN..]))
    }

    /// Read and unwrap the metadata chunk. The stream must be positioned at
    /// the metadata chunk (right after the key chunk).
    fn read_metadata(input: &mut dyn InputStream) -> Result<NcmMetadata> {
        let mut chunk = read_chunk(input)?;
        let mut colon = 0usize;
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte ^= META_CHUNK_XOR;
            if *byte == b':' && colon == 0 {
                colon = i + 1;
            }
        }
        let wrapped = STANDARD
            .decode(&chunk[colon..])
            .map_err(|e| DecryptError::UnsupportedMetadata(format!("bad base64: {e}")))?;
        let plain = aes_ecb_decrypt(&wrapped, &META_KEY).ok_or_else(|| {
            DecryptError::UnsupportedMetadata("metadata chunk is undecryptable".into())
        })?;
        if plain.len() < META_PREFIX_LEN {
            return Err(DecryptError::UnsupportedMetadata(
                "metadata shorter than its banner".into(),
            ));
        }
        serde_json::from_slice(&plain[META_PREFIX_LEN..])
            .map_err(|e| DecryptError::UnsupportedMetadata(format!("bad metadata JSON: {e}")))
    }

    /// Re-parse the header and, if the stream carries usable cover art,
    /// embed it as front-cover picture in the already-decrypted output file.
    ///
    /// A distinct post-processing step: it rewrites `dest` in place and does
    /// not touch the audio payload.
    pub fn patch_cover_image(&self, input: &mut dyn InputStream, dest: &Path) -> Result<()> {
        use lofty::config::WriteOptions;
        use lofty::file::{AudioFile, TaggedFileExt};
        use lofty::picture::{MimeType, Picture, PictureType};
        use lofty::probe::Probe;
        use lofty::tag::Tag;

        input.seek(SeekFrom::Start(CHUNKS_OFFSET))?;
        skip_chunk(input)?;
        skip_chunk(input)?;
        input.seek(SeekFrom::Current(CRC_LEN))?;
        let image = read_chunk(input)?;
        if image.len() <= MIN_COVER_LEN {
            return Ok(());
        }

        let mut tagged = Probe::open(dest)?.read()?;
        if tagged.primary_tag().is_none() {
            let tag_type = tagged.primary_tag_type();
            tagged.insert_tag(Tag::new(tag_type));
        }
        if let Some(tag) = tagged.primary_tag_mut() {
            tag.push_picture(Picture::new_unchecked(
                PictureType::CoverFront,
                Some(MimeType::Jpeg),
                None,
                image,
            ));
        }
        let mut file = std::fs::OpenOptions::new().read(true).write(true).open(dest)?;
        tagged.save_to(&mut file, WriteOptions::default())?;
        Ok(())
    }
}

impl Decrypter for NcmDecrypter {
    fn name(&self) -> &'static str {
        "ncm"
    }

    fn probe(&self, input: &mut dyn InputStream) -> Result<()> {
        input.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; MAGIC.len()];
        match input.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(DecryptError::FormatMismatch("NCM"))
            }
            Err(e) => return Err(e.into()),
        }
        if &header != MAGIC {
            return Err(DecryptError::FormatMismatch("NCM"));
        }
        Ok(())
    }

    fn detect_format(&self, input: &mut dyn InputStream) -> Result<AudioFormat> {
        input.seek(SeekFrom::Start(CHUNKS_OFFSET))?;
        skip_chunk(input)?;
        let metadata = Self::read_metadata(input)?;
        let name = metadata.format.ok_or_else(|| {
            DecryptError::UnsupportedMetadata("metadata has no format field".into())
        })?;
        AudioFormat::from_name(&name).ok_or(DecryptError::UnsupportedAudioFormat(name))
    }

    fn decrypted_size(&self, input: &mut dyn InputStream) -> Result<u64> {
        let payload_start = Self::seek_payload(input)?;
        let total = input.seek(SeekFrom::End(0))?;
        Ok(total - payload_start)
    }

    fn decrypt_range(
        &self,
        input: &mut dyn InputStream,
        output: &mut dyn Write,
        options: DecryptOptions<'_>,
    ) -> Result<()> {
        self.probe(input)?;
        let key_box = Self::read_key_box(input)?;
        skip_chunk(input)?;
        input.seek(SeekFrom::Current(CRC_LEN))?;
        skip_chunk(input)?;
        let payload_start = input.stream_position()?;
        let available = input.seek(SeekFrom::End(0))? - payload_start;

        let length = resolve_range(options.offset, options.length, available)?;
        input.seek(SeekFrom::Start(payload_start + options.offset))?;
        pump_chunks(input, output, length, options.offset, options, |chunk, offset| {
            apply_keystream(&key_box, chunk, offset)
        })
    }
}

fn aes_ecb_decrypt(data: &[u8], key: &[u8; 16]) -> Option<Vec<u8>> {
    type Aes128EcbDec = ecb::Decryptor<Aes128>;
    let mut buffer = data.to_vec();
    let plain = Aes128EcbDec::new(key.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .ok()?;
    Some(plain.to_vec())
}

/// Build the 256-entry substitution box from the unwrapped key chunk.
fn build_key_box(secret: &[u8]) -> [u8; 256] {
    let mut key_box = [0u8; 256];
    for (i, slot) in key_box.iter_mut().enumerate() {
        *slot = i as u8;
    }
    let mut last_byte = 0u8;
    let mut key_offset = 0usize;
    for i in 0..256 {
        let swap = key_box[i];
        let c = (swap as usize + last_byte as usize + secret[key_offset] as usize) & 0xFF;
        key_offset += 1;
        if key_offset >= secret.len() {
            key_offset = 0;
        }
        key_box[i] = key_box[c];
        key_box[c] = swap;
        last_byte = c as u8;
    }
    key_box
}

/// XOR the payload keystream over `chunk`, which starts at absolute payload
/// index `offset`.
fn apply_keystream(key_box: &[u8; 256], chunk: &mut [u8], offset: u64) {
    for (i, byte) in chunk.iter_mut().enumerate() {
        let j = ((offset + i as u64 + 1) & 0xFF) as usize;
        let a = key_box[j] as usize;
        *byte ^= key_box[(a + key_box[(a + j) & 0xFF] as usize) & 0xFF];
    }
}
