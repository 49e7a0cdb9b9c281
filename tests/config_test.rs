// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use nvr::config::{CameraRecord, ConfigurationStore};
use tempfile::TempDir;

fn sample_camera(id: &str) -> CameraRecord {
    CameraRecord {
        camera_id: id.to_string(),
        name: "Front Door".into(),
        rtsp_url: "rtsp://192.0.2.10:554/stream1".into(),
        username: Some("admin".into()),
        password: Some("hunter2".into()),
        enabled: true,
        recording_enabled: true,
        use_hardware_decode: true,
        reconnect: None,
    }
}

#[test]
fn json_round_trip_preserves_camera_and_app_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let store = ConfigurationStore::new();
    store.add_camera(sample_camera("cam_front")).unwrap();
    store.save(&path).unwrap();

    let reloaded = ConfigurationStore::load(&path).unwrap();
    let cameras = reloaded.get_all_cameras();
    assert_eq!(cameras.len(), 1);
    assert_eq!(cameras[0].camera_id, "cam_front");
    assert_eq!(cameras[0].rtsp_url, "rtsp://192.0.2.10:554/stream1");
}

#[test]
fn yaml_round_trip_is_chosen_by_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");

    let store = ConfigurationStore::new();
    store.add_camera(sample_camera("cam_yard")).unwrap();
    store.save(&path).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("cam_yard"));

    let reloaded = ConfigurationStore::load(&path).unwrap();
    assert_eq!(reloaded.get_camera("cam_yard").unwrap().name, "Front Door");
}

#[test]
fn reload_replaces_snapshot_atomically_for_subsequent_reads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let store = ConfigurationStore::new();
    store.add_camera(sample_camera("cam_a")).unwrap();
    store.save(&path).unwrap();
    assert_eq!(store.get_all_cameras().len(), 1);

    store.add_camera(sample_camera("cam_b")).unwrap();
    store.save(&path).unwrap();

    store.reload(&path).unwrap();
    let cameras = store.get_all_cameras();
    assert_eq!(cameras.len(), 2);
}

#[test]
fn enabled_cameras_filters_out_disabled_records() {
    let store = ConfigurationStore::new();
    let mut disabled = sample_camera("cam_disabled");
    disabled.enabled = false;
    store.add_camera(disabled).unwrap();
    store.add_camera(sample_camera("cam_enabled")).unwrap();

    let enabled = store.get_enabled_cameras();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].camera_id, "cam_enabled");
}
