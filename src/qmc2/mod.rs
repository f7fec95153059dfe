//! Cipher suite for the multi-file-keyed container: key unwrap, the two
//! payload ciphers, and the factory that picks between them.

pub mod ekey;
pub mod map;
pub mod rc4;
pub mod tea;

use crate::error::{DecryptError, Result};
use map::QmcMap;
use rc4::QmcRc4;

/// Decoded secrets shorter than this select the map cipher; anything longer
/// selects the stream-derived one.
const RC4_KEY_THRESHOLD: usize = 300;

/// A per-file payload cipher. Owns only immutable derived key material, so
/// a value can decrypt arbitrary absolute windows in any order.
pub enum Qmc2Cipher {
    Map(QmcMap),
    Rc4(QmcRc4),
}

impl Qmc2Cipher {
    /// Build a cipher from raw decoded secret bytes.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.is_empty() {
            return Err(DecryptError::InvalidEkey);
        }
        if secret.len() < RC4_KEY_THRESHOLD {
            Ok(Qmc2Cipher::Map(QmcMap::new(secret)))
        } else {
            Ok(Qmc2Cipher::Rc4(QmcRc4::new(secret)))
        }
    }

    /// Unwrap a textual ekey and build the matching cipher.
    pub fn from_ekey(ekey: &str) -> Result<Self> {
        Self::new(&ekey::decrypt(ekey))
    }

    /// XOR-decrypt `data` in place at absolute payload offset `offset`.
    pub fn decrypt(&self, data: &mut [u8], offset: u64) {
        match self {
            Qmc2Cipher::Map(cipher) => cipher.decrypt(data, offset),
            Qmc2Cipher::Rc4(cipher) => cipher.decrypt(data, offset),
        }
    }
}
