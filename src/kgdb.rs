//! Decoder for the page-encrypted key database and the identifier→secret
//! table recovered from it.
//!
//! The database is an SQLite image whose 1024-byte pages are individually
//! AES-128-CBC encrypted with a per-page key and IV, both derived from the
//! page number. Page 1 additionally has a shifted layout: the file's first
//! 16 bytes are not the SQLite magic, the ciphertext's first 8 bytes sit at
//! [8,16), and the plaintext header bytes [16,24) are kept in the clear so
//! readers can validate the page size without a key.
//!
//! Decoding is a one-shot in-memory pass. The resulting plaintext image is
//! handed to SQLite through a transient temp file, removed on drop.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;

use aes::Aes128;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use md5::{Digest, Md5};

use crate::error::{DecryptError, Result};

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
const PAGE_SIZE: usize = 1024;
const MASTER_KEY: [u8; 16] = [
    0x1d, 0x61, 0x31, 0x45, 0xb2, 0x47, 0xbf, 0x7f, 0x3d, 0x18, 0x96, 0x72, 0x14, 0x4f, 0xe4,
    0xbf,
];
/// Mixed into every page key derivation, "sAlT" as a little-endian word.
const KEY_SALT: u32 = 0x546C_4173;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

// ── Per-page key material ────────────────────────────────────────────────────

fn page_key(page_no: u32) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(MASTER_KEY);
    hasher.update(page_no.to_le_bytes());
    hasher.update(KEY_SALT.to_le_bytes());
    hasher.finalize().into()
}

/// 16 bytes from an unsigned LCG seeded with `page_no + 1`. The recurrence
/// corrects by the modulus whenever the intermediate value's top bit lands
/// set, keeping the state inside the 31-bit field.
fn page_iv_source(page_no: u32) -> [u8; 16] {
    let mut source = [0u8; 16];
    let mut state = page_no.wrapping_add(1);
    for word in source.chunks_exact_mut(4) {
        let quotient = state / 0xCE26;
        let product = 0x7FFF_FF07u32.wrapping_mul(quotient);
        let mut next = 0x9EF4u32.wrapping_mul(state).wrapping_sub(product);
        if next & 0x8000_0000 != 0 {
            next = next.wrapping_add(0x7FFF_FF07);
        }
        state = next;
        word.copy_from_slice(&next.to_le_bytes());
    }
    source
}

fn page_iv(page_no: u32) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(page_iv_source(page_no));
    hasher.finalize().into()
}

fn cbc_decrypt_page(buffer: &mut [u8], page_no: u32) -> Result<()> {
    if buffer.len() % 16 != 0 {
        return Err(DecryptError::UnsupportedDatabase(format!(
            "page {page_no} region of {} bytes is not block-aligned",
            buffer.len()
        )));
    }
    let key = page_key(page_no);
    let iv = page_iv(page_no);
    Aes128CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_mut::<NoPadding>(buffer)
        .map_err(|_| {
            DecryptError::UnsupportedDatabase(format!("page {page_no} failed to decrypt"))
        })?;
    Ok(())
}

// ── Image decode ─────────────────────────────────────────────────────────────

/// Validate the clear-text structural signature kept at bytes [16,24) of an
/// encrypted page 1: a power-of-two page size in the valid SQLite range and
/// the fixed header constant at offset 20.
fn check_signature(page: &[u8]) -> Result<()> {
    let o10 = u32::from_le_bytes([page[16], page[17], page[18], page[19]]);
    let o14 = u32::from_le_bytes([page[20], page[21], page[22], page[23]]);
    let v6 = ((o10 & 0xFF) << 8) | ((o10 & 0xFF00) << 16);
    let power_of_two = v6 & v6.wrapping_sub(1) == 0;
    if o14 != 0x2020_4000 || v6.wrapping_sub(0x200) > 0xFE00 || !power_of_two {
        return Err(DecryptError::UnsupportedDatabase(
            "page 1 structural signature mismatch".into(),
        ));
    }
    Ok(())
}

/// Decrypt a whole database image. An already-plaintext image passes through
/// byte-identical.
pub fn decrypt_database(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() >= SQLITE_MAGIC.len() && data[..SQLITE_MAGIC.len()] == SQLITE_MAGIC[..] {
        return Ok(data.to_vec());
    }
    if data.is_empty() || data.len() % PAGE_SIZE != 0 {
        return Err(DecryptError::UnsupportedDatabase(format!(
            "image of {} bytes is not a whole number of {PAGE_SIZE}-byte pages",
            data.len()
        )));
    }
    check_signature(&data[..PAGE_SIZE])?;

    let mut output = Vec::with_capacity(data.len());
    for (index, page) in data.chunks_exact(PAGE_SIZE).enumerate() {
        let page_no = index as u32 + 1;
        if page_no == 1 {
            let backup = <[u8; 8]>::try_from(&page[16..24]).unwrap_or_default();
            let mut buffer = page.to_vec();
            buffer.copy_within(8..16, 16);
            cbc_decrypt_page(&mut buffer[16..], page_no)?;
            if buffer[16..24] != backup {
                return Err(DecryptError::DatabaseIntegrity {
                    expected: hex::encode(backup),
                    actual: hex::encode(&buffer[16..24]),
                });
            }
            output.extend_from_slice(SQLITE_MAGIC);
            output.extend_from_slice(&buffer[16..]);
        } else {
            let mut buffer = page.to_vec();
            cbc_decrypt_page(&mut buffer, page_no)?;
            output.extend_from_slice(&buffer);
        }
    }
    Ok(output)
}

// ── Key table ────────────────────────────────────────────────────────────────

/// The identifier→secret mapping recovered from the key database. Built
/// once, then read-only; shared freely across threads.
#[derive(Debug, Default, Clone)]
pub struct KeyTable {
    map: HashMap<String, String>,
}

impl KeyTable {
    pub fn get(&self, key_id: &str) -> Option<&str> {
        self.map.get(key_id).map(String::as_str)
    }

    pub fn insert(&mut self, key_id: String, ekey: String) {
        self.map.insert(key_id, ekey);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Read, decrypt and query the key database at `path`.
pub fn load_key_table(path: &Path) -> Result<KeyTable> {
    let image = decrypt_database(&std::fs::read(path)?)?;
    query_key_table(&image)
}

/// Recover the key table from a plaintext database image. The image goes
/// through a temp file because SQLite wants a file, not a byte slice; the
/// file is removed on drop even when the query fails.
fn query_key_table(image: &[u8]) -> Result<KeyTable> {
    let mut temp = tempfile::NamedTempFile::new()?;
    temp.write_all(image)?;
    temp.flush()?;

    let conn = rusqlite::Connection::open_with_flags(
        temp.path(),
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
    )?;
    let mut table = KeyTable::default();
    let mut stmt = conn.prepare(
        "SELECT EncryptionKeyId, EncryptionKey FROM ShareFileItems \
         WHERE EncryptionKeyId IS NOT NULL AND EncryptionKeyId != '' \
           AND EncryptionKey IS NOT NULL AND EncryptionKey != ''",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (key_id, ekey) = row?;
        if key_id.trim().is_empty() {
            continue;
        }
        table.insert(key_id, ekey);
    }
    Ok(table)
}
