//! # Carving Engine
//!
//! Signature carving for JPEG inside a chunk of raw bytes. The engine works
//! on a worker's in-memory view of its chunk and never touches the image
//! itself; ownership of what it may emit is decided purely by chunk-local
//! offsets, so workers need no coordination with each other.

use memchr::memchr;
use sha2::{Digest, Sha256};

/// JPEG start-of-image marker.
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker.
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Chunk-local half-open byte range of a possible artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub start: usize,
    pub end: usize,
}

/// A validated artifact, addressed by its offset in the full image.
///
/// The fingerprint is computed from the payload at construction, so worker
/// and coordinator derive the identical value for the identical bytes.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub absolute_start: u64,
    pub payload: Vec<u8>,
    pub fingerprint: String,
}

impl Artifact {
    pub fn from_payload(absolute_start: u64, payload: Vec<u8>) -> Self {
        let fingerprint = fingerprint(&payload);
        Self {
            absolute_start,
            payload,
            fingerprint,
        }
    }

    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }
}

/// Content hash used for duplicate detection, hex encoded SHA-256.
pub fn fingerprint(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy)]
pub struct JpegCarver {
    min_size: u64,
    max_size: u64,
}

impl JpegCarver {
    pub fn new(min_size: u64, max_size: u64) -> Self {
        Self { min_size, max_size }
    }

    /// Pair every start-of-image occurrence with the nearest end-of-image
    /// within the size bound. A start with no terminator in range yields no
    /// candidate: truncating at an arbitrary point would make the payload
    /// depend on chunk geometry and defeat content-hash deduplication.
    pub fn candidates(&self, data: &[u8]) -> Vec<Candidate> {
        let mut found = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            let idx = match memchr(SOI[0], &data[pos..]) {
                Some(i) => pos + i,
                None => break,
            };
            if idx + 1 < data.len() && data[idx + 1] == SOI[1] {
                if let Some(end) = self.find_eoi(data, idx) {
                    found.push(Candidate { start: idx, end });
                }
            }
            // resume one byte on, so images embedded in images are found too
            pos = idx + 1;
        }
        found
    }

    fn find_eoi(&self, data: &[u8], start: usize) -> Option<usize> {
        let limit = (start as u64)
            .saturating_add(self.max_size)
            .min(data.len() as u64) as usize;
        let mut pos = start + SOI.len();
        while pos < limit {
            let idx = match memchr(EOI[0], &data[pos..limit]) {
                Some(i) => pos + i,
                None => return None,
            };
            if idx + 1 < limit && data[idx + 1] == EOI[1] {
                return Some(idx + 2);
            }
            pos = idx + 1;
        }
        None
    }

    /// Cheap structural checks on a candidate payload: bounded length, SOI
    /// prefix, a marker byte right after it, EOI suffix. Failing candidates
    /// are filtered out, not reported as errors.
    pub fn validate(&self, payload: &[u8]) -> bool {
        (payload.len() as u64) >= self.min_size
            && payload.starts_with(&SOI)
            && payload.get(2) == Some(&0xFF)
            && payload.ends_with(&EOI)
    }

    /// Carve every artifact this chunk owns out of `data`.
    ///
    /// `data` covers `[base_offset, base_offset + data.len())` of the image
    /// and `primary_len` marks where the chunk's exclusive territory ends
    /// within it. A candidate is emitted iff it starts inside the primary
    /// span; it may extend into the overlap tail. Candidates starting in the
    /// tail belong to the next chunk and are dropped here, which is what
    /// keeps a boundary-straddling artifact from being reported twice.
    pub fn carve(&self, data: &[u8], primary_len: u64, base_offset: u64) -> Vec<Artifact> {
        let mut artifacts = Vec::new();
        for candidate in self.candidates(data) {
            if (candidate.start as u64) >= primary_len {
                continue;
            }
            let payload = &data[candidate.start..candidate.end];
            if !self.validate(payload) {
                continue;
            }
            artifacts.push(Artifact::from_payload(
                base_offset + candidate.start as u64,
                payload.to_vec(),
            ));
        }
        artifacts
    }
}
