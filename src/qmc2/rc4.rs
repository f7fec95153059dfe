//! Stream-derived payload cipher: the variant selected for long (≥300 byte)
//! secrets.
//!
//! A key-scheduled generator with state length equal to the secret length
//! pre-derives one 5632-byte keystream buffer at construction. The payload
//! is then processed positionally: the first 128 bytes XOR directly against
//! secret bytes chosen by the segment-key formula, and everything after that
//! runs in fixed 5120-byte segments whose keystream slice starts at a
//! per-segment skip inside the buffer. No sequential state survives between
//! calls, so any absolute window can be decrypted independently.

const FIRST_SEGMENT_SIZE: u64 = 0x80;
const OTHER_SEGMENT_SIZE: u64 = 0x1400;
const STREAM_SIZE: usize = (OTHER_SEGMENT_SIZE + 512) as usize;

/// Key-length RC4 state. Only used once, to derive the keystream buffer.
struct Rc4State {
    state: Vec<u8>,
    i: usize,
    j: usize,
}

impl Rc4State {
    fn new(key: &[u8]) -> Self {
        let n = key.len();
        let mut state: Vec<u8> = (0..n).map(|i| i as u8).collect();
        let mut j = 0usize;
        for i in 0..n {
            j = (j + state[i] as usize + key[i] as usize) % n;
            state.swap(i, j);
        }
        Self { state, i: 0, j: 0 }
    }

    fn derive(&mut self, buffer: &mut [u8]) {
        let n = self.state.len();
        for byte in buffer.iter_mut() {
            self.i = (self.i + 1) % n;
            self.j = (self.j + self.state[self.i] as usize) % n;
            self.state.swap(self.i, self.j);
            let idx = (self.state[self.i] as usize + self.state[self.j] as usize) % n;
            *byte ^= self.state[idx];
        }
    }
}

pub struct QmcRc4 {
    key: Vec<u8>,
    hash: f64,
    stream: Vec<u8>,
}

impl QmcRc4 {
    pub fn new(key: &[u8]) -> Self {
        let mut stream = vec![0u8; STREAM_SIZE];
        Rc4State::new(key).derive(&mut stream);
        Self {
            key: key.to_vec(),
            hash: compute_hash(key),
            stream,
        }
    }

    /// XOR-decrypt `data` in place as if it started at absolute payload
    /// offset `offset`.
    pub fn decrypt(&self, data: &mut [u8], mut offset: u64) {
        let mut done = 0usize;
        if offset < FIRST_SEGMENT_SIZE {
            let n = self.decrypt_first_segment(&mut data[..], offset);
            done += n;
            offset += n as u64;
        }
        while done < data.len() {
            let n = self.decrypt_other_segment(&mut data[done..], offset);
            done += n;
            offset += n as u64;
        }
    }

    fn decrypt_first_segment(&self, data: &mut [u8], mut offset: u64) -> usize {
        let n = self.key.len() as u64;
        let process = data.len().min((FIRST_SEGMENT_SIZE - offset) as usize);
        for byte in data[..process].iter_mut() {
            let seed = self.key[(offset % n) as usize];
            let idx = segment_key(self.hash, offset, seed) % n;
            *byte ^= self.key[idx as usize];
            offset += 1;
        }
        process
    }

    fn decrypt_other_segment(&self, data: &mut [u8], offset: u64) -> usize {
        let n = self.key.len() as u64;
        let segment_idx = offset / OTHER_SEGMENT_SIZE;
        let segment_offset = offset % OTHER_SEGMENT_SIZE;

        let seed = self.key[(segment_idx % n) as usize];
        let skip = segment_key(self.hash, segment_idx, seed) & 0x1FF;
        let mut process = data.len().min((OTHER_SEGMENT_SIZE - segment_offset) as usize);
        let start = (skip + segment_offset) as usize;
        // The slice must not overrun the pre-derived keystream buffer.
        if start + process > self.stream.len() {
            process = self.stream.len() - start;
        }

        for (byte, key_byte) in data[..process].iter_mut().zip(&self.stream[start..]) {
            *byte ^= key_byte;
        }
        process
    }
}

/// Rolling multiplicative hash over the secret's non-zero bytes, stopping
/// early when the product overflows or stops increasing.
fn compute_hash(key: &[u8]) -> f64 {
    let mut hash = 1u32;
    for &byte in key {
        if byte == 0 {
            continue;
        }
        let next = hash.wrapping_mul(byte as u32);
        if next <= hash {
            break;
        }
        hash = next;
    }
    hash as f64
}

fn segment_key(hash: f64, id: u64, seed: u8) -> u64 {
    if seed == 0 {
        return 0;
    }
    (hash / (seed as f64 * (id as f64 + 1.0)) * 100.0) as u64
}
