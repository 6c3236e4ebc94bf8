//! Distributed JPEG recovery over raw disk images.
//!
//! A coordinator splits the image into overlapping chunks and ships them
//! over TCP to registered workers. Workers carve JPEG candidates out of
//! their chunks and stream them back, and the coordinator deduplicates by
//! content fingerprint before writing anything to disk.

pub mod carve;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod protocol;
pub mod source;
pub mod store;
pub mod worker;
