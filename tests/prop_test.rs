use musicdec::qmc2::Qmc2Cipher;
use proptest::prelude::*;

fn make_secret(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(37).wrapping_add(seed) | 1)
        .collect()
}

proptest! {
    /// Decrypting a payload in two arbitrary pieces must equal decrypting
    /// it in one pass, for both payload ciphers.
    #[test]
    fn split_decrypt_equals_whole(
        secret_len in 8usize..600,
        seed in any::<u8>(),
        data in proptest::collection::vec(any::<u8>(), 1..4096),
        split_frac in 0.0f64..1.0,
    ) {
        let cipher = Qmc2Cipher::new(&make_secret(secret_len, seed)).unwrap();
        let split = ((data.len() as f64) * split_frac) as usize;

        let mut whole = data.clone();
        cipher.decrypt(&mut whole, 0);

        let mut head = data[..split].to_vec();
        let mut tail = data[split..].to_vec();
        cipher.decrypt(&mut head, 0);
        cipher.decrypt(&mut tail, split as u64);
        head.extend_from_slice(&tail);
        prop_assert_eq!(head, whole);
    }

    /// Any window decrypted at its absolute offset must match the same
    /// window of a whole-payload decrypt.
    #[test]
    fn window_decrypt_matches_whole(
        secret_len in 8usize..600,
        data in proptest::collection::vec(any::<u8>(), 64..8192),
        start_frac in 0.0f64..1.0,
    ) {
        let cipher = Qmc2Cipher::new(&make_secret(secret_len, 3)).unwrap();
        let start = ((data.len() as f64 - 1.0) * start_frac) as usize;
        let end = (start + 64).min(data.len());

        let mut whole = data.clone();
        cipher.decrypt(&mut whole, 0);

        let mut window = data[start..end].to_vec();
        cipher.decrypt(&mut window, start as u64);
        prop_assert_eq!(&window[..], &whole[start..end]);
    }

    /// XOR ciphers are involutions: decrypting twice restores the input.
    #[test]
    fn double_decrypt_is_identity(
        secret_len in 8usize..600,
        data in proptest::collection::vec(any::<u8>(), 1..2048),
        offset in 0u64..100_000,
    ) {
        let cipher = Qmc2Cipher::new(&make_secret(secret_len, 7)).unwrap();
        let mut buffer = data.clone();
        cipher.decrypt(&mut buffer, offset);
        cipher.decrypt(&mut buffer, offset);
        prop_assert_eq!(buffer, data);
    }
}
