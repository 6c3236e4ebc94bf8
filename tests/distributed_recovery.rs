//! End-to-end recovery runs with real TCP between coordinator and workers.
//!
//! Workers run on in-process threads, so they all report the same process
//! id. Assertions therefore stick to run totals and never split counts by
//! worker identity.

mod common;

use std::fs;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::thread;

use scattercarve::carve;
use scattercarve::config::{Config, LoadedConfig};
use scattercarve::coordinator::{Coordinator, RecoverySummary};
use scattercarve::protocol::{self, Message};
use scattercarve::worker;

use common::{insert_bytes, jpeg_bytes};

fn test_config(chunk_size: u64, overlap: u64, await_workers: usize, run_id: &str) -> LoadedConfig {
    LoadedConfig {
        config: Config {
            run_id: run_id.to_string(),
            listen_port: 0,
            registration_window_secs: 10,
            await_workers: Some(await_workers),
            chunk_size,
            overlap_bytes: overlap,
            min_artifact_bytes: 100,
            max_artifact_bytes: 1024 * 1024,
        },
        config_hash: "test".to_string(),
    }
}

fn write_image(dir: &Path, image: &[u8]) -> PathBuf {
    let path = dir.join("image.raw");
    fs::write(&path, image).expect("write image");
    path
}

/// Bind a coordinator, run `worker_count` real workers against it, and
/// drive the run to completion.
fn run_distributed(
    image: &[u8],
    loaded: LoadedConfig,
    worker_count: usize,
) -> (RecoverySummary, PathBuf, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let image_path = write_image(dir.path(), image);
    let output_root = dir.path().join("out");
    let run_id = loaded.config.run_id.clone();

    let coordinator = Coordinator::bind(&loaded, &output_root).expect("bind");
    let port = coordinator.local_addr().port();

    let mut workers = Vec::new();
    for _ in 0..worker_count {
        workers.push(thread::spawn(move || worker::run("127.0.0.1", port)));
    }

    let summary = coordinator.run(&image_path).expect("run");
    for handle in workers {
        handle.join().expect("worker thread").expect("worker run");
    }

    (summary, output_root.join(run_id), dir)
}

/// A worker that registers, accepts one assignment, and then drops the
/// connection without answering.
fn faulty_worker(port: u16) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    protocol::write_message(
        &mut stream,
        &Message::Hello {
            worker_id: "worker_faulty".to_string(),
            hostname: "testhost".to_string(),
        },
    )
    .expect("hello");
    let welcome = protocol::read_message(&mut stream).expect("welcome");
    assert!(matches!(welcome, Message::Welcome { .. }));

    match protocol::read_message(&mut stream).expect("assignment") {
        Message::Assignment { .. } => {
            protocol::read_frame(&mut stream, 16 * 1024 * 1024).expect("chunk frame");
        }
        // another session can drain the queue before this one pulls a chunk
        Message::Shutdown => {}
        other => panic!("expected an assignment, got {}", other.kind()),
    }
    // dropping the stream abandons the chunk mid-flight
}

#[test]
fn recovers_artifacts_across_chunk_boundary() {
    let jpeg_a = jpeg_bytes(600, 3);
    let jpeg_b = jpeg_bytes(800, 7);

    // chunk layout: primaries [0, 5120) and [5120, 10240), overlap 1024.
    // jpeg_b starts at 4800 and runs to 5600, straddling the cut.
    let mut image = vec![0u8; 10240];
    insert_bytes(&mut image, 1000, &jpeg_a);
    insert_bytes(&mut image, 4800, &jpeg_b);

    let loaded = test_config(5120, 1024, 2, "boundary_run");
    let (summary, run_dir, _dir) = run_distributed(&image, loaded, 2);

    assert_eq!(summary.total_chunks, 2);
    assert_eq!(summary.outcome.chunks_collected, 2);
    assert_eq!(summary.outcome.chunks_failed, 0);
    assert!(summary.outcome.missing_chunks.is_empty());
    assert_eq!(summary.outcome.artifacts_recovered, 2);
    assert_eq!(summary.outcome.artifacts_duplicate, 0);
    assert_eq!(summary.outcome.bytes_recovered, 600 + 800);

    let name_a = format!("recovered_{:012X}_{}.jpg", 1000, &carve::fingerprint(&jpeg_a)[..8]);
    let name_b = format!("recovered_{:012X}_{}.jpg", 4800, &carve::fingerprint(&jpeg_b)[..8]);
    let recovered = run_dir.join("recovered");
    assert_eq!(fs::read(recovered.join(name_a)).expect("jpeg_a file"), jpeg_a);
    assert_eq!(fs::read(recovered.join(name_b)).expect("jpeg_b file"), jpeg_b);

    let summary_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_dir.join("summary.json")).expect("summary"))
            .expect("summary json");
    assert_eq!(summary_json["run_id"], "boundary_run");
    assert_eq!(summary_json["artifacts_recovered"], 2);

    let manifest = fs::read_to_string(run_dir.join("manifest.jsonl")).expect("manifest");
    assert_eq!(manifest.lines().count(), 2);
}

#[test]
fn source_without_signatures_completes_clean() {
    let image = vec![0x11u8; 8192];
    let loaded = test_config(4096, 512, 1, "empty_run");
    let (summary, run_dir, _dir) = run_distributed(&image, loaded, 1);

    assert_eq!(summary.outcome.chunks_collected, 2);
    assert!(summary.outcome.missing_chunks.is_empty());
    assert_eq!(summary.outcome.artifacts_recovered, 0);
    assert_eq!(
        fs::read_dir(run_dir.join("recovered")).expect("dir").count(),
        0
    );
}

#[test]
fn identical_payloads_are_stored_once() {
    let jpeg = jpeg_bytes(400, 5);
    let mut image = vec![0u8; 10240];
    insert_bytes(&mut image, 1000, &jpeg);
    insert_bytes(&mut image, 7000, &jpeg);

    let loaded = test_config(5120, 1024, 2, "dedup_run");
    let (summary, run_dir, _dir) = run_distributed(&image, loaded, 2);

    assert_eq!(summary.outcome.artifacts_recovered, 1);
    assert_eq!(summary.outcome.artifacts_duplicate, 1);
    assert_eq!(summary.outcome.bytes_recovered, 400);

    let entries: Vec<_> = fs::read_dir(run_dir.join("recovered"))
        .expect("dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(fs::read(&entries[0]).expect("stored file"), jpeg);
}

#[test]
fn lost_worker_leaves_chunks_missing() {
    let image = vec![0x22u8; 8192];
    let dir = tempfile::tempdir().expect("tempdir");
    let image_path = write_image(dir.path(), &image);
    let output_root = dir.path().join("out");

    let loaded = test_config(4096, 512, 1, "loss_run");
    let coordinator = Coordinator::bind(&loaded, &output_root).expect("bind");
    let port = coordinator.local_addr().port();

    let faulty = thread::spawn(move || faulty_worker(port));
    let summary = coordinator.run(&image_path).expect("run");
    faulty.join().expect("faulty thread");

    // the only session died on its first chunk, so nothing was collected
    assert_eq!(summary.total_chunks, 2);
    assert_eq!(summary.outcome.chunks_collected, 0);
    assert_eq!(summary.outcome.chunks_failed, 1);
    assert_eq!(summary.outcome.missing_chunks, vec![0, 1]);
    assert_eq!(summary.outcome.artifacts_recovered, 0);
}

#[test]
fn surviving_worker_drains_the_queue() {
    let image = vec![0x33u8; 16384];
    let dir = tempfile::tempdir().expect("tempdir");
    let image_path = write_image(dir.path(), &image);
    let output_root = dir.path().join("out");

    let loaded = test_config(4096, 512, 2, "survivor_run");
    let coordinator = Coordinator::bind(&loaded, &output_root).expect("bind");
    let port = coordinator.local_addr().port();

    let faulty = thread::spawn(move || faulty_worker(port));
    let survivor = thread::spawn(move || worker::run("127.0.0.1", port));
    let summary = coordinator.run(&image_path).expect("run");
    faulty.join().expect("faulty thread");
    let stats = survivor.join().expect("survivor thread").expect("survivor run");

    // scheduling decides whether the faulty session gets a chunk before it
    // dies, so allow zero or one casualty
    assert_eq!(summary.total_chunks, 4);
    assert!(summary.outcome.chunks_failed <= 1);
    assert!(summary.outcome.chunks_collected >= 3);
    assert_eq!(
        summary.outcome.chunks_collected + summary.outcome.missing_chunks.len() as u64,
        4
    );
    assert!(stats.chunks_processed >= 3);
}

#[test]
fn no_workers_is_a_startup_error() {
    let image = vec![0u8; 4096];
    let dir = tempfile::tempdir().expect("tempdir");
    let image_path = write_image(dir.path(), &image);
    let output_root = dir.path().join("out");

    let mut loaded = test_config(4096, 512, 1, "silent_run");
    loaded.config.registration_window_secs = 1;
    loaded.config.await_workers = None;

    let coordinator = Coordinator::bind(&loaded, &output_root).expect("bind");
    let err = coordinator.run(&image_path).expect_err("run without workers");
    assert!(err.to_string().contains("no workers registered"));
}
