//! Map cipher: the payload cipher selected for short (<300 byte) secrets.

const TABLE_SIZE: usize = 128;
const INDEX_OFFSET: u64 = 71214;
/// Offsets beyond this value are folded with `offset % 0x7FFF`. The fold
/// modulus deliberately differs from the table length; changing either
/// silently breaks compatibility with existing ciphertext.
const OFFSET_BOUNDARY: u64 = 0x7FFF;

pub struct QmcMap {
    table: [u8; TABLE_SIZE],
}

impl QmcMap {
    pub fn new(key: &[u8]) -> Self {
        let n = key.len() as u64;
        let mut table = [0u8; TABLE_SIZE];
        for (i, slot) in table.iter_mut().enumerate() {
            let i = i as u64;
            let j = ((i * i + INDEX_OFFSET) % n) as usize;
            let shift = (j + 4) % 8;
            // Combined left/right shift within the byte, not a rotate.
            *slot = (((key[j] as u32) << shift) | ((key[j] as u32) >> shift)) as u8;
        }
        Self { table }
    }

    /// XOR-decrypt `data` in place as if it started at absolute payload
    /// offset `offset`.
    pub fn decrypt(&self, data: &mut [u8], mut offset: u64) {
        for byte in data.iter_mut() {
            let idx = if offset <= OFFSET_BOUNDARY {
                offset
            } else {
                offset % OFFSET_BOUNDARY
            };
            *byte ^= self.table[(idx % TABLE_SIZE as u64) as usize];
            offset += 1;
        }
    }
}
