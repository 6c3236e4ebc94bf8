//! Shared helpers for building synthetic disk images in tests.

/// Write `data` into `target` at `offset`, growing the buffer as needed.
pub fn insert_bytes(target: &mut Vec<u8>, offset: usize, data: &[u8]) {
    let end = offset + data.len();
    if end > target.len() {
        target.resize(end, 0u8);
    }
    target[offset..end].copy_from_slice(data);
}

/// A syntactically valid JPEG of exactly `len` bytes. The filler never
/// contains 0xFF, so the only markers are the outer SOI and EOI. `seed`
/// varies the payload so two images can differ while staying valid.
pub fn jpeg_bytes(len: usize, seed: u8) -> Vec<u8> {
    assert!(len >= 12, "jpeg_bytes needs room for the markers");
    let mut data = vec![0u8; len];
    data[0..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
    data[4..9].copy_from_slice(b"JFIF\0");
    for (i, byte) in data[9..len - 2].iter_mut().enumerate() {
        *byte = (i as u8).wrapping_add(seed) % 0xFE;
    }
    data[len - 2..].copy_from_slice(&[0xFF, 0xD9]);
    data
}
