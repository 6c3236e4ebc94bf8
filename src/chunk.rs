use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("overlap must be non-zero")]
    ZeroOverlap,
    #[error("overlap {overlap} must be smaller than chunk size {chunk_size}")]
    OverlapTooLarge { chunk_size: u64, overlap: u64 },
}

/// One unit of work handed to a worker.
///
/// The primary span `[primary_start, primary_end)` is this chunk's exclusive
/// territory; `[primary_end, overlap_end)` is a read-only tail shared with the
/// next chunk so an artifact that starts near the boundary can still be read
/// to completion. Primary spans tile the source with no gaps and no overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub chunk_index: u64,
    pub primary_start: u64,
    pub primary_end: u64,
    pub overlap_end: u64,
}

impl ChunkDescriptor {
    pub fn primary_len(&self) -> u64 {
        self.primary_end - self.primary_start
    }

    /// Bytes actually shipped to the worker, overlap tail included.
    pub fn transfer_len(&self) -> u64 {
        self.overlap_end - self.primary_start
    }
}

pub fn plan_chunks(
    total_len: u64,
    chunk_size: u64,
    overlap: u64,
) -> Result<Vec<ChunkDescriptor>, PlanError> {
    if chunk_size == 0 {
        return Err(PlanError::ZeroChunkSize);
    }
    if overlap == 0 {
        return Err(PlanError::ZeroOverlap);
    }
    if overlap >= chunk_size {
        return Err(PlanError::OverlapTooLarge {
            chunk_size,
            overlap,
        });
    }

    let mut chunks = Vec::new();
    let mut primary_start = 0u64;
    let mut chunk_index = 0u64;

    while primary_start < total_len {
        let primary_end = total_len.min(primary_start.saturating_add(chunk_size));
        let overlap_end = total_len.min(primary_end.saturating_add(overlap));

        chunks.push(ChunkDescriptor {
            chunk_index,
            primary_start,
            primary_end,
            overlap_end,
        });

        primary_start = primary_end;
        chunk_index += 1;
    }

    Ok(chunks)
}
