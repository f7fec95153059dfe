//! Unwrapping of the textual "ekey" that protects each file's real cipher
//! secret.
//!
//! Two encodings are in the wild. V1 is base64 over an 8-byte key seed plus
//! a chained-cipher message keyed from that seed. V2 adds a banner prefix
//! and two extra chained-cipher layers under fixed keys; its output is the
//! byte stream of a V1 ekey. Any decoding failure yields an empty secret;
//! the caller treats that as unusable key material rather than an error
//! raised here.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::tea;

const EKEY_V2_PREFIX: &str = "UVFNdXNpYyBFbmNWMixLZXk6";

const EKEY_V2_KEY1: [u8; 16] = [
    0x33, 0x38, 0x36, 0x5A, 0x4A, 0x59, 0x21, 0x40, 0x23, 0x2A, 0x24, 0x25, 0x5E, 0x26, 0x29,
    0x28,
];
const EKEY_V2_KEY2: [u8; 16] = [
    0x2A, 0x2A, 0x23, 0x21, 0x28, 0x23, 0x24, 0x25, 0x26, 0x5E, 0x61, 0x31, 0x63, 0x5A, 0x2C,
    0x54,
];

/// Interpret 16 key bytes as four little-endian u32 words.
fn key_words(key: &[u8; 16]) -> [u32; 4] {
    [
        u32::from_le_bytes(key[0..4].try_into().unwrap()),
        u32::from_le_bytes(key[4..8].try_into().unwrap()),
        u32::from_le_bytes(key[8..12].try_into().unwrap()),
        u32::from_le_bytes(key[12..16].try_into().unwrap()),
    ]
}

/// Decode a wrapped key into raw cipher secret bytes.
///
/// Returns an empty vector when the ekey is malformed.
pub fn decrypt(ekey: &str) -> Vec<u8> {
    match ekey.strip_prefix(EKEY_V2_PREFIX) {
        Some(stripped) => decrypt_v2(stripped.as_bytes()),
        None => decrypt_v1(ekey.as_bytes()),
    }
}

fn decrypt_v2(wrapped: &[u8]) -> Vec<u8> {
    let first = tea::decrypt(wrapped, &key_words(&EKEY_V2_KEY1));
    let second = tea::decrypt(&first, &key_words(&EKEY_V2_KEY2));
    // The result is reinterpreted byte-for-byte as V1 ekey text.
    decrypt_v1(&second)
}

fn decrypt_v1(wrapped: &[u8]) -> Vec<u8> {
    let decoded = match STANDARD.decode(wrapped) {
        Ok(bytes) => bytes,
        Err(_) => return Vec::new(),
    };
    if decoded.len() < 8 {
        return Vec::new();
    }

    let key = [
        0x6900_5600 | ((decoded[0] as u32) << 16) | decoded[1] as u32,
        0x4600_3800 | ((decoded[2] as u32) << 16) | decoded[3] as u32,
        0x2B00_2000 | ((decoded[4] as u32) << 16) | decoded[5] as u32,
        0x1500_0B00 | ((decoded[6] as u32) << 16) | decoded[7] as u32,
    ];

    let plain = tea::decrypt(&decoded[8..], &key);
    if plain.is_empty() {
        return Vec::new();
    }

    let mut secret = Vec::with_capacity(8 + plain.len());
    secret.extend_from_slice(&decoded[..8]);
    secret.extend_from_slice(&plain);
    secret
}
