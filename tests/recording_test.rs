// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use nvr::pipeline::Segment;
use nvr::recording::RecordingCoordinator;
use parking_lot::Mutex;
use tempfile::TempDir;

fn set_mtime(path: &std::path::Path, age: Duration) {
    let file = fs::File::open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn empty_registry() -> Arc<Mutex<HashMap<String, Arc<nvr::supervisor::Supervisor>>>> {
    Arc::new(Mutex::new(HashMap::new()))
}

#[tokio::test]
async fn retention_sweep_deletes_expired_files_and_keeps_recent_ones() {
    let root = TempDir::new().unwrap();
    let old_dir = root.path().join("cam_1").join("20250101");
    let recent_dir = root.path().join("cam_1").join("20260101");
    fs::create_dir_all(&old_dir).unwrap();
    fs::create_dir_all(&recent_dir).unwrap();

    let old_file = old_dir.join("cam_1_20250101_000000.mp4");
    let recent_file = recent_dir.join("cam_1_20260101_000000.mp4");
    fs::write(&old_file, b"stale segment").unwrap();
    fs::write(&recent_file, b"fresh segment").unwrap();
    set_mtime(&old_file, Duration::from_secs(30 * 24 * 3600));
    set_mtime(&recent_file, Duration::from_secs(1));

    let (coordinator, _tx) = RecordingCoordinator::new(root.path().to_path_buf(), empty_registry());
    let report = coordinator.retention_sweep(7).unwrap();

    assert_eq!(report.deleted_files, 1);
    assert!(!old_file.exists());
    assert!(recent_file.exists());
    assert!(!old_dir.exists(), "empty date directory should be removed");
}

#[tokio::test]
async fn retention_sweep_never_deletes_an_open_segment() {
    let root = TempDir::new().unwrap();
    let date_dir = root.path().join("cam_1").join("20250101");
    fs::create_dir_all(&date_dir).unwrap();
    let open_file = date_dir.join("cam_1_20250101_000000.mp4");
    fs::write(&open_file, b"still being written").unwrap();
    set_mtime(&open_file, Duration::from_secs(30 * 24 * 3600));

    let (coordinator, tx) = RecordingCoordinator::new(root.path().to_path_buf(), empty_registry());
    tx.send(Segment {
        camera_id: "cam_1".into(),
        path: open_file.clone(),
        started_at: chrono::Utc::now(),
        ended_at: None,
        byte_size: 0,
    })
    .unwrap();
    // Let the background drain task register the open segment before sweeping.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = coordinator.retention_sweep(7).unwrap();
    assert_eq!(report.deleted_files, 0);
    assert!(open_file.exists());
}

#[tokio::test]
async fn disk_usage_aggregates_every_file_under_the_root() {
    let root = TempDir::new().unwrap();
    let date_dir = root.path().join("cam_2").join("20260101");
    fs::create_dir_all(&date_dir).unwrap();
    fs::write(date_dir.join("a.mp4"), vec![0u8; 1000]).unwrap();
    fs::write(date_dir.join("b.mp4"), vec![0u8; 2000]).unwrap();

    let (coordinator, _tx) = RecordingCoordinator::new(root.path().to_path_buf(), empty_registry());
    let usage = coordinator.disk_usage().unwrap();

    assert_eq!(usage.file_count, 2);
    assert_eq!(usage.total_bytes, 3000);
}

#[tokio::test]
async fn segments_in_range_is_reachable_through_the_coordinator() {
    let root = TempDir::new().unwrap();
    let (coordinator, tx) = RecordingCoordinator::new(root.path().to_path_buf(), empty_registry());

    let start = chrono::Utc::now();
    tx.send(Segment {
        camera_id: "cam_3".into(),
        path: root.path().join("cam_3_segment.mp4"),
        started_at: start,
        ended_at: Some(start + chrono::Duration::seconds(60)),
        byte_size: 4096,
    })
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let hits = coordinator.segments_in_range(
        "cam_3",
        start - chrono::Duration::seconds(1),
        start + chrono::Duration::seconds(1),
    );
    assert_eq!(hits.len(), 1);
    assert_eq!(coordinator.segments_for_camera("cam_3").len(), 1);
}
