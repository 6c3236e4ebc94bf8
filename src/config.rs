use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("chunk_size must be non-zero")]
    ZeroChunkSize,
    #[error("overlap_bytes must be non-zero")]
    ZeroOverlap,
    #[error("overlap_bytes {overlap} must be smaller than chunk_size {chunk_size}")]
    OverlapTooLarge { chunk_size: u64, overlap: u64 },
    #[error("min_artifact_bytes {min} must be smaller than max_artifact_bytes {max}")]
    ArtifactBoundsInverted { min: u64, max: u64 },
    #[error("chunk_size plus overlap_bytes is {total}, larger than a frame can carry ({limit})")]
    ChunkExceedsFrame { total: u64, limit: u64 },
    #[error("max_artifact_bytes {max} is larger than a frame can carry ({limit})")]
    ArtifactExceedsFrame { max: u64, limit: u64 },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run_id: String,
    pub listen_port: u16,
    pub registration_window_secs: u64,
    /// Close the registration window early once this many workers joined.
    #[serde(default)]
    pub await_workers: Option<usize>,
    pub chunk_size: u64,
    pub overlap_bytes: u64,
    pub min_artifact_bytes: u64,
    pub max_artifact_bytes: u64,
}

impl Config {
    /// Reject configurations the run could not survive. Chunk and artifact
    /// bounds must fit the 4-byte frame prefix, since each chunk and each
    /// artifact travels as a single frame.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const FRAME_LIMIT: u64 = u32::MAX as u64;

        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.overlap_bytes == 0 {
            return Err(ConfigError::ZeroOverlap);
        }
        if self.overlap_bytes >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap_bytes,
            });
        }
        if self.min_artifact_bytes >= self.max_artifact_bytes {
            return Err(ConfigError::ArtifactBoundsInverted {
                min: self.min_artifact_bytes,
                max: self.max_artifact_bytes,
            });
        }
        let transfer = self.chunk_size.saturating_add(self.overlap_bytes);
        if transfer > FRAME_LIMIT {
            return Err(ConfigError::ChunkExceedsFrame {
                total: transfer,
                limit: FRAME_LIMIT,
            });
        }
        if self.max_artifact_bytes > FRAME_LIMIT {
            return Err(ConfigError::ArtifactExceedsFrame {
                max: self.max_artifact_bytes,
                limit: FRAME_LIMIT,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes)?;
    if config.run_id.trim().is_empty() {
        config.run_id = generate_run_id();
    }

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig {
        config,
        config_hash,
    })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", now.format("%Y%m%dT%H%M%SZ"), rand_suffix())
}

fn rand_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos)
}
