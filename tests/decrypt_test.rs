use aes::Aes128;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ecb::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyInit};
use std::io::Cursor;

use musicdec::decrypter::kgg::KggDecrypter;
use musicdec::decrypter::ncm::NcmDecrypter;
use musicdec::qmc2::Qmc2Cipher;
use musicdec::{
    AudioFormat, CancelFlag, DecryptError, DecryptOptions, Decrypter, DecrypterRegistry, KeyTable,
};

// ── Synthetic container builders ─────────────────────────────────────────────

const NCM_CORE_KEY: [u8; 16] = *b"hzHRAmso5kInbaxW";
const NCM_META_KEY: [u8; 16] = *b"#14ljk_!\\]&0U<'(";

type Aes128EcbEnc = ecb::Encryptor<Aes128>;

fn aes_ecb_encrypt(data: &[u8], key: &[u8; 16]) -> Vec<u8> {
    Aes128EcbEnc::new(key.into()).encrypt_padded_vec_mut::<Pkcs7>(data)
}

fn push_chunk(out: &mut Vec<u8>, chunk: &[u8]) {
    out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(chunk);
}

/// Independent rendition of the substitution box and keystream, so the test
/// does not borrow the implementation it is checking.
fn ncm_keystream_xor(secret: &[u8], data: &mut [u8]) {
    let mut key_box: Vec<u8> = (0..=255u8).collect();
    let mut last = 0usize;
    for i in 0..256 {
        let c = (key_box[i] as usize + last + secret[i % secret.len()] as usize) & 0xFF;
        key_box.swap(i, c);
        last = c;
    }
    for (i, byte) in data.iter_mut().enumerate() {
        let j = (i + 1) & 0xFF;
        let a = key_box[j] as usize;
        *byte ^= key_box[(a + key_box[(a + j) & 0xFF] as usize) & 0xFF];
    }
}

/// Assemble a complete encrypted NCM stream around `payload`.
fn build_ncm(secret: &[u8], format: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"CTENFDAM");
    out.extend_from_slice(&[0, 0]);

    let mut key_plain = b"neteasecloudmusic".to_vec();
    key_plain.extend_from_slice(secret);
    let mut key_chunk = aes_ecb_encrypt(&key_plain, &NCM_CORE_KEY);
    for b in key_chunk.iter_mut() {
        *b ^= 0x64;
    }
    push_chunk(&mut out, &key_chunk);

    let json = format!(r#"{{"format":"{format}"}}"#);
    let mut meta_plain = b"music:".to_vec();
    meta_plain.extend_from_slice(json.as_bytes());
    let wrapped = aes_ecb_encrypt(&meta_plain, &NCM_META_KEY);
    let mut meta_chunk = b"163 key(Don't modify):".to_vec();
    meta_chunk.extend_from_slice(STANDARD.encode(&wrapped).as_bytes());
    for b in meta_chunk.iter_mut() {
        *b ^= 0x63;
    }
    push_chunk(&mut out, &meta_chunk);

    out.extend_from_slice(&[0u8; 9]); // CRC, never verified
    push_chunk(&mut out, &[]); // no cover image

    let mut encrypted = payload.to_vec();
    ncm_keystream_xor(secret, &mut encrypted);
    out.extend_from_slice(&encrypted);
    out
}

/// Writer side of the chained Feistel cipher, to manufacture real ekeys.
mod tea_enc {
    const ROUNDS: u32 = 16;
    const DELTA: u32 = 0x9E37_79B9;

    fn single_round(value: u32, sum: u32, k1: u32, k2: u32) -> u32 {
        (value << 4).wrapping_add(k1) ^ value.wrapping_add(sum) ^ (value >> 5).wrapping_add(k2)
    }

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

    /// Header byte + pad + 2 salt bytes + plaintext + 7 zero bytes, chain
    /// encrypted over whole 8-byte blocks.
    pub fn encrypt(plain: &[u8], key: &[u32; 4]) -> Vec<u8> {
        let pad_len = (8 - (plain.len() + 10) % 8) % 8;
        let mut stream = vec![pad_len as u8];
        stream.extend(std::iter::repeat(0xAA).take(pad_len));
        stream.extend_from_slice(&[0x5A, 0xA5]);
        stream.extend_from_slice(plain);
        stream.extend_from_slice(&[0u8; 7]);

        let mut iv1 = 0u64;
        let mut iv2 = 0u64;
        let mut out = Vec::with_capacity(stream.len());
        for block in stream.chunks_exact(8) {
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

/// A valid V1 ekey wrapping a 108-byte secret, short enough to select the
/// map cipher. Returns the ekey text and the raw secret it decodes to.
fn map_ekey() -> (String, Vec<u8>) {
    let seed = *b"QQMusic!";
    let tail: Vec<u8> = (0..100u8).map(|i| i.wrapping_mul(13).wrapping_add(3)).collect();
    let key = [
        0x6900_5600 | ((seed[0] as u32) << 16) | seed[1] as u32,
        0x4600_3800 | ((seed[2] as u32) << 16) | seed[3] as u32,
        0x2B00_2000 | ((seed[4] as u32) << 16) | seed[5] as u32,
        0x1500_0B00 | ((seed[6] as u32) << 16) | seed[7] as u32,
    ];
    let mut decoded = seed.to_vec();
    decoded.extend_from_slice(&tea_enc::encrypt(&tail, &key));

    let mut secret = seed.to_vec();
    secret.extend_from_slice(&tail);
    (STANDARD.encode(decoded), secret)
}

/// Assemble a complete encrypted KGG stream around `payload`.
fn build_kgg(key_id: &str, ekey: &str, payload: &[u8]) -> Vec<u8> {
    let header_len = 68 + 4 + key_id.len();
    let mut out = vec![0u8; header_len];
    out[16..20].copy_from_slice(&(header_len as u32).to_le_bytes());
    out[20..24].copy_from_slice(&5u32.to_le_bytes());
    out[68..72].copy_from_slice(&(key_id.len() as u32).to_le_bytes());
    out[72..].copy_from_slice(key_id.as_bytes());

    // The payload ciphers are XOR streams, so encrypting is decrypting.
    let cipher = Qmc2Cipher::from_ekey(ekey).unwrap();
    let mut encrypted = payload.to_vec();
    cipher.decrypt(&mut encrypted, 0);
    out.extend_from_slice(&encrypted);
    out
}

fn mp3_payload(len: usize) -> Vec<u8> {
    let mut payload = b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec();
    payload.extend((0..len).map(|i| (i % 251) as u8));
    payload
}

// ── NCM end-to-end ───────────────────────────────────────────────────────────

#[test]
fn test_ncm_end_to_end() {
    let secret = b"integration test secret material";
    let payload = mp3_payload(200_000);
    let file = build_ncm(secret, "mp3", &payload);
    let mut input = Cursor::new(file);

    let decrypter = NcmDecrypter::new();
    decrypter.probe(&mut input).unwrap();
    assert_eq!(decrypter.detect_format(&mut input).unwrap(), AudioFormat::Mp3);
    assert_eq!(
        decrypter.decrypted_size(&mut input).unwrap(),
        payload.len() as u64
    );

    let mut output = Vec::new();
    decrypter
        .decrypt_range(&mut input, &mut output, DecryptOptions::default())
        .unwrap();
    assert_eq!(output, payload);
    assert!(output.starts_with(b"ID3"));
}

#[test]
fn test_ncm_ranged_decrypt_matches_whole() {
    let secret = b"another secret";
    let payload = mp3_payload(5000);
    let file = build_ncm(secret, "mp3", &payload);
    let mut input = Cursor::new(file);
    let decrypter = NcmDecrypter::new();

    let mut window = Vec::new();
    decrypter
        .decrypt_range(
            &mut input,
            &mut window,
            DecryptOptions {
                offset: 1234,
                length: Some(700),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(window, payload[1234..1934]);
}

#[test]
fn test_ncm_out_of_range_request() {
    let file = build_ncm(b"secret", "mp3", &mp3_payload(100));
    let mut input = Cursor::new(file);
    let mut output = Vec::new();
    let err = NcmDecrypter::new()
        .decrypt_range(
            &mut input,
            &mut output,
            DecryptOptions {
                offset: 1_000_000,
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, DecryptError::OutOfRange { .. }));
}

#[test]
fn test_ncm_unknown_format_name() {
    let file = build_ncm(b"secret", "midi", &mp3_payload(100));
    let mut input = Cursor::new(file);
    let err = NcmDecrypter::new().detect_format(&mut input).unwrap_err();
    assert!(matches!(err, DecryptError::UnsupportedAudioFormat(name) if name == "midi"));
}

#[test]
fn test_progress_and_cancellation() {
    let payload = mp3_payload(300_000);
    let file = build_ncm(b"progress secret", "mp3", &payload);
    let decrypter = NcmDecrypter::new();

    let mut reports: Vec<(u64, u64)> = Vec::new();
    let mut progress = |done: u64, total: u64| reports.push((done, total));
    let mut output = Vec::new();
    decrypter
        .decrypt_range(
            &mut Cursor::new(file.clone()),
            &mut output,
            DecryptOptions {
                progress: Some(&mut progress),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(reports.len() > 1);
    assert_eq!(reports.last().unwrap().0, payload.len() as u64);
    assert!(reports.iter().all(|&(_, total)| total == payload.len() as u64));

    let flag = CancelFlag::new();
    flag.cancel();
    let mut output = Vec::new();
    let err = decrypter
        .decrypt_range(
            &mut Cursor::new(file),
            &mut output,
            DecryptOptions {
                cancel: Some(&flag),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, DecryptError::Cancelled));
    assert!(output.is_empty());
}

// ── KGG end-to-end ───────────────────────────────────────────────────────────

#[test]
fn test_kgg_end_to_end() {
    let (ekey, _) = map_ekey();
    let payload = {
        let mut p = b"fLaC\x00\x00\x00\x22".to_vec();
        p.extend((0..40_000usize).map(|i| (i % 247) as u8));
        p
    };
    let file = build_kgg("song-key-1", &ekey, &payload);

    let mut table = KeyTable::default();
    table.insert("song-key-1".into(), ekey);
    let decrypter = KggDecrypter::new(table);

    let mut input = Cursor::new(file.clone());
    decrypter.probe(&mut input).unwrap();
    assert_eq!(
        decrypter.detect_format(&mut input).unwrap(),
        AudioFormat::Flac
    );
    assert_eq!(
        decrypter.decrypted_size(&mut input).unwrap(),
        payload.len() as u64
    );

    let mut output = Vec::new();
    decrypter
        .decrypt_range(&mut input, &mut output, DecryptOptions::default())
        .unwrap();
    assert_eq!(output, payload);

    // Independent check: a 108-byte secret selects the map cipher, so the
    // plaintext must be the ciphertext XOR a table derived straight from
    // the key schedule.
    let (_, secret) = map_ekey();
    let table: Vec<u8> = (0..128usize)
        .map(|i| {
            let j = (i * i + 71214) % secret.len();
            let shift = (j + 4) % 8;
            (((secret[j] as u32) << shift) | ((secret[j] as u32) >> shift)) as u8
        })
        .collect();
    let header_len = 68 + 4 + "song-key-1".len();
    let ciphertext = &file[header_len..];
    for k in 0..512 {
        assert_eq!(output[k], ciphertext[k] ^ table[k % 128], "byte {k}");
    }
}

#[test]
fn test_kgg_ranged_decrypt_matches_whole() {
    let (ekey, _) = map_ekey();
    let payload: Vec<u8> = (0..9000u32).map(|i| (i % 239) as u8).collect();
    let file = build_kgg("ranged", &ekey, &payload);

    let mut table = KeyTable::default();
    table.insert("ranged".into(), ekey);
    let decrypter = KggDecrypter::new(table);

    let mut window = Vec::new();
    decrypter
        .decrypt_range(
            &mut Cursor::new(file),
            &mut window,
            DecryptOptions {
                offset: 4000,
                length: Some(2500),
                buffer_size: 777,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(window, payload[4000..6500]);
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[test]
fn test_registry_routes_by_content() {
    let (ekey, _) = map_ekey();
    let mut table = KeyTable::default();
    table.insert("id".into(), ekey.clone());

    let mut registry = DecrypterRegistry::new();
    registry.register(Box::new(KggDecrypter::new(table)));

    let ncm = build_ncm(b"registry secret", "mp3", &mp3_payload(64));
    let mut input = Cursor::new(ncm);
    assert_eq!(registry.find(&mut input).unwrap().name(), "ncm");

    let kgg = build_kgg("id", &ekey, b"fLaC....");
    let mut input = Cursor::new(kgg);
    assert_eq!(registry.find(&mut input).unwrap().name(), "kgg");

    let mut foreign = Cursor::new(b"RIFF plain unencrypted audio data".to_vec());
    assert!(matches!(
        registry.find(&mut foreign),
        Err(DecryptError::NoMatchingDecrypter)
    ));
}

#[test]
fn test_registry_rewinds_between_probes() {
    // A KGG stream probed by NCM first must still be recognised: the
    // registry reseeks to the start before every attempt.
    let (ekey, _) = map_ekey();
    let mut table = KeyTable::default();
    table.insert("id".into(), ekey.clone());

    let mut registry = DecrypterRegistry::empty();
    registry.register(Box::new(NcmDecrypter::new()));
    registry.register(Box::new(KggDecrypter::new(table)));

    let kgg = build_kgg("id", &ekey, b"fLaC tail");
    let mut input = Cursor::new(kgg);
    let found = registry.find(&mut input).unwrap();
    assert_eq!(found.name(), "kgg");
    // Stream is left rewound for the caller.
    assert_eq!(input.position(), 0);
}
