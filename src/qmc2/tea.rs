//! 16-round Feistel block cipher wrapped in the chained mode used by the
//! wrapped-key encodings.
//!
//! The chaining is not standard CBC: each block's decrypted value is XORed
//! against the previous *ciphertext* block, and the plaintext carries a
//! variable header (1 length byte + up to 7 pad bytes + 2 salt bytes) plus a
//! fixed 7-byte zero tail, both discarded here. Block words are read and
//! written big-endian; the 128-bit key is interpreted as four
//! little-endian u32 words by the callers.
//!
//! The dangling-byte rule at the end of [`decrypt`] (one extra block
//! decrypted, only its first byte copied) is load-bearing: externally
//! produced ciphertexts rely on it, so it must not be "fixed".

const ROUNDS: u32 = 16;
const DELTA: u32 = 0x9E37_79B9;
const BLOCK_SIZE: usize = 8;
const FIXED_SALT_LEN: usize = 2;
const ZERO_PAD_LEN: usize = 7;

#[inline]
fn single_round(value: u32, sum: u32, k1: u32, k2: u32) -> u32 {
    (value << 4).wrapping_add(k1) ^ value.wrapping_add(sum) ^ (value >> 5).wrapping_add(k2)
}

fn block_decrypt(value: u64, key: &[u32; 4]) -> u64 {
    let mut y = (value >> 32) as u32;
    let mut z = value as u32;
    let mut sum = ROUNDS.wrapping_mul(DELTA);
    for _ in 0..ROUNDS {
        z = z.wrapping_sub(single_round(y, sum, key[2], key[3]));
        y = y.wrapping_sub(single_round(z, sum, key[0], key[1]));
        sum = sum.wrapping_sub(DELTA);
    }
    ((y as u64) << 32) | z as u64
}

/// Decrypt one ciphertext block, advancing the `(iv1, iv2)` chain state.
fn decrypt_round(cipher: &[u8], iv1: &mut u64, iv2: &mut u64, key: &[u32; 4]) -> [u8; BLOCK_SIZE] {
    let iv1_next = u64::from_be_bytes(cipher[..BLOCK_SIZE].try_into().unwrap());
    let iv2_next = block_decrypt(iv1_next ^ *iv2, key);
    let plain = iv2_next ^ *iv1;
    *iv1 = iv1_next;
    *iv2 = iv2_next;
    plain.to_be_bytes()
}

/// Decrypt a chained-mode message, stripping the header and the 7-byte tail.
///
/// Inputs that are not a whole number of blocks, or shorter than two blocks,
/// yield an empty vector rather than an error; so do messages whose header
/// consumes the entire payload.
pub fn decrypt(cipher: &[u8], key: &[u32; 4]) -> Vec<u8> {
    if cipher.len() % BLOCK_SIZE != 0 || cipher.len() < BLOCK_SIZE * 2 {
        return Vec::new();
    }

    let mut iv1 = 0u64;
    let mut iv2 = 0u64;
    let mut header = [0u8; BLOCK_SIZE * 2];
    header[..BLOCK_SIZE]
        .copy_from_slice(&decrypt_round(&cipher[..BLOCK_SIZE], &mut iv1, &mut iv2, key));
    header[BLOCK_SIZE..].copy_from_slice(&decrypt_round(
        &cipher[BLOCK_SIZE..2 * BLOCK_SIZE],
        &mut iv1,
        &mut iv2,
        key,
    ));

    let skip = 1 + (header[0] & 7) as usize + FIXED_SALT_LEN;
    let real_len = cipher.len() as i64 - skip as i64 - ZERO_PAD_LEN as i64;
    if real_len <= 0 {
        return Vec::new();
    }
    let real_len = real_len as usize;

    let mut out = vec![0u8; real_len];
    let copy_len = (header.len() - skip).min(real_len);
    out[..copy_len].copy_from_slice(&header[skip..skip + copy_len]);
    let mut copied = copy_len;
    let mut remaining = real_len - copied;

    if remaining > 0 {
        let tail_blocks = cipher.len() / BLOCK_SIZE - 3;
        let mut cursor = &cipher[2 * BLOCK_SIZE..];
        for _ in 0..tail_blocks {
            if remaining == 0 {
                break;
            }
            let block = decrypt_round(cursor, &mut iv1, &mut iv2, key);
            cursor = &cursor[BLOCK_SIZE..];
            let take = BLOCK_SIZE.min(remaining);
            out[copied..copied + take].copy_from_slice(&block[..take]);
            copied += take;
            remaining -= take;
        }
        if remaining > 0 {
            // One dangling byte: decrypt a final block but take only byte 0.
            let block = decrypt_round(cursor, &mut iv1, &mut iv2, key);
            out[copied] = block[0];
        }
    }

    out
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Chained-mode *encryption*, used only to manufacture test vectors.

    use super::*;

    fn block_encrypt(value: u64, key: &[u32; 4]) -> u64 {
        let mut y = (value >> 32) as u32;
        let mut z = value as u32;
        let mut sum = 0u32;
        for _ in 0..ROUNDS {
            sum = sum.wrapping_add(DELTA);
            y = y.wrapping_add(single_round(z, sum, key[0], key[1]));
            z = z.wrapping_add(single_round(y, sum, key[2], key[3]));
        }
        ((y as u64) << 32) | z as u64
    }

    /// Inverse of [`decrypt`]: builds header + salt + plaintext + zero tail
    /// and chain-encrypts the whole thing.
    pub fn encrypt(plain: &[u8], key: &[u32; 4]) -> Vec<u8> {
        let pad_len = (BLOCK_SIZE - (plain.len() + 1 + FIXED_SALT_LEN + ZERO_PAD_LEN) % BLOCK_SIZE)
            % BLOCK_SIZE;
        let mut stream = Vec::with_capacity(plain.len() + 1 + pad_len + FIXED_SALT_LEN + ZERO_PAD_LEN);
        stream.push(pad_len as u8);
        stream.extend(std::iter::repeat(0xAA).take(pad_len));
        stream.extend_from_slice(&[0x5A, 0xA5]);
        stream.extend_from_slice(plain);
        stream.extend_from_slice(&[0u8; ZERO_PAD_LEN]);
        assert_eq!(stream.len() % BLOCK_SIZE, 0);
        assert!(stream.len() >= 2 * BLOCK_SIZE);

        let mut iv1 = 0u64;
        let mut iv2 = 0u64;
        let mut out = Vec::with_capacity(stream.len());
        for block in stream.chunks_exact(BLOCK_SIZE) {
            let plain_word = u64::from_be_bytes(block.try_into().unwrap());
            let iv2_next = plain_word ^ iv1;
            let cipher_word = block_encrypt(iv2_next, key) ^ iv2;
            iv1 = cipher_word;
            iv2 = iv2_next;
            out.extend_from_slice(&cipher_word.to_be_bytes());
        }
        out
    }
}
