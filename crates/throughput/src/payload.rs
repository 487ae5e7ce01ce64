#![forbid(unsafe_code)]

/// Fill `len` bytes from a splitmix64 stream. The data is incompressible
/// enough that neither compression nor deduplication on the target shortens
/// the write.
pub fn pattern(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    let mut buf = Vec::with_capacity(len);
    while buf.len() < len {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        let bytes = z.to_le_bytes();
        let take = (len - buf.len()).min(bytes.len());
        buf.extend_from_slice(&bytes[..take]);
    }
    buf
}

/// Make a reused chunk unique by mixing its index into the leading bytes.
pub fn stamp(chunk: &mut [u8], index: u64) {
    for (byte, idx) in chunk.iter_mut().zip(index.to_le_bytes()) {
        *byte ^= idx;
    }
}
