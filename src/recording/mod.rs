// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Recording Coordinator — collects closed segments reported by every
//! camera's [`crate::supervisor::Supervisor`], keeps the [`segment::SegmentIndex`],
//! and runs retention sweeps and disk-usage accounting over the recording
//! root (§4.3).

pub mod segment;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{NvrError, Result};
use crate::pipeline::Segment;
use crate::supervisor::CameraRegistry;
use segment::SegmentIndex;

/// Result of a [`RecordingCoordinator::retention_sweep`] pass (§8 "retention
/// sweep never deletes an open segment").
#[derive(Debug, Clone, Default)]
pub struct RetentionReport {
    pub deleted_files: u64,
    pub freed_bytes: u64,
}

/// Result of [`RecordingCoordinator::disk_usage`].
#[derive(Debug, Clone, Default)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub file_count: u64,
}

/// Result of [`RecordingCoordinator::stop_all`]: every camera is attempted
/// regardless of earlier failures, which are collected rather than bailing
/// out the caller (§4.3 "never partial-failing the caller").
#[derive(Debug, Clone, Default)]
pub struct StopAllReport {
    pub stopped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct RecordingCoordinator {
    root: PathBuf,
    index: Mutex<SegmentIndex>,
    registry: CameraRegistry,
}

impl RecordingCoordinator {
    /// Create a coordinator rooted at `root`, issuing commands against
    /// `registry` (shared with the Host Adapter), and the sender every
    /// supervisor should use to report opened/closed segments.
    pub fn new(root: PathBuf, registry: CameraRegistry) -> (Arc<Self>, mpsc::UnboundedSender<Segment>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = Arc::new(Self {
            root,
            index: Mutex::new(SegmentIndex::new()),
            registry,
        });
        let drain_target = this.clone();
        tokio::spawn(drain_target.drain(rx));
        (this, tx)
    }

    fn supervisor(&self, camera_id: &str) -> Result<Arc<crate::supervisor::Supervisor>> {
        self.registry.lock().get(camera_id).cloned().ok_or_else(|| NvrError::CameraNotFound {
            id: camera_id.to_string(),
        })
    }

    /// Start recording on `camera_id` through its supervisor (§4.3, §6
    /// `Coordinator::start`).
    pub fn start(&self, camera_id: &str) -> Result<()> {
        self.supervisor(camera_id)?.start_recording()
    }

    pub fn stop(&self, camera_id: &str) -> Result<()> {
        self.supervisor(camera_id)?.stop_recording()
    }

    pub fn pause(&self, camera_id: &str) -> Result<()> {
        self.supervisor(camera_id)?.pause_recording()
    }

    pub fn resume(&self, camera_id: &str) -> Result<()> {
        self.supervisor(camera_id)?.resume_recording()
    }

    /// Stop every camera currently known to the registry. Individual
    /// failures are logged and folded into the report rather than aborting
    /// the sweep over the remaining cameras (§4.3).
    pub fn stop_all(&self) -> StopAllReport {
        let supervisors: Vec<(String, Arc<crate::supervisor::Supervisor>)> =
            self.registry.lock().iter().map(|(id, s)| (id.clone(), s.clone())).collect();
        let mut report = StopAllReport::default();
        for (camera_id, supervisor) in supervisors {
            match supervisor.stop_recording() {
                Ok(()) => report.stopped.push(camera_id),
                Err(e) => {
                    warn!(camera = %camera_id, error = %e, "failed to stop recording");
                    report.failed.push((camera_id, e.to_string()));
                }
            }
        }
        report
    }

    async fn drain(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Segment>) {
        while let Some(segment) = rx.recv().await {
            info!(camera = %segment.camera_id, path = %segment.path.display(), "segment recorded");
            self.index.lock().insert(segment);
        }
    }

    pub fn segments_for_camera(&self, camera_id: &str) -> Vec<Segment> {
        self.index
            .lock()
            .segments_for_camera(camera_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn segments_in_range(
        &self,
        camera_id: &str,
        from: chrono::DateTime<Utc>,
        to: chrono::DateTime<Utc>,
    ) -> Vec<Segment> {
        self.index
            .lock()
            .segments_in_range(camera_id, from, to)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Delete files older than `retention_days` under `<root>/<camera_id>/<date>/`,
    /// skipping any path that is still an open segment, and remove date
    /// directories left empty afterwards (§4.3, grounded on the original's
    /// `cleanup_old_recordings`).
    pub fn retention_sweep(&self, retention_days: u32) -> Result<RetentionReport> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let open_paths = self.index.lock().open_segment_paths();
        let mut report = RetentionReport::default();

        let camera_dirs = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => {
                return Err(NvrError::RecordingIoError {
                    path: self.root.to_string_lossy().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        for camera_dir in camera_dirs.flatten() {
            let camera_path = camera_dir.path();
            if !camera_path.is_dir() {
                continue;
            }
            let Ok(date_dirs) = std::fs::read_dir(&camera_path) else { continue };
            for date_dir in date_dirs.flatten() {
                let date_path = date_dir.path();
                if !date_path.is_dir() {
                    continue;
                }
                self.sweep_date_dir(&date_path, cutoff, &open_paths, &mut report)?;
            }
        }

        Ok(report)
    }

    fn sweep_date_dir(
        &self,
        date_path: &Path,
        cutoff: chrono::DateTime<Utc>,
        open_paths: &[PathBuf],
        report: &mut RetentionReport,
    ) -> Result<()> {
        let Ok(files) = std::fs::read_dir(date_path) else { return Ok(()) };
        let mut remaining = 0u64;
        for file in files.flatten() {
            let path = file.path();
            if !path.is_file() {
                remaining += 1;
                continue;
            }
            if open_paths.contains(&path) {
                remaining += 1;
                continue;
            }
            let Ok(meta) = file.metadata() else { continue };
            let modified: chrono::DateTime<Utc> = meta.modified().map(chrono::DateTime::from).unwrap_or_else(|_| Utc::now());
            if modified < cutoff {
                let size = meta.len();
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        report.deleted_files += 1;
                        report.freed_bytes += size;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to delete expired recording"),
                }
            } else {
                remaining += 1;
            }
        }
        if remaining == 0 {
            let _ = std::fs::remove_dir(date_path);
        }
        Ok(())
    }

    /// Aggregate disk usage across the whole recording root (§4.3, grounded
    /// on the original's `get_disk_usage`).
    pub fn disk_usage(&self) -> Result<DiskUsage> {
        let mut usage = DiskUsage::default();
        self.walk_usage(&self.root, &mut usage)?;
        Ok(usage)
    }

    fn walk_usage(&self, dir: &Path, usage: &mut DiskUsage) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(NvrError::RecordingIoError {
                    path: dir.to_string_lossy().to_string(),
                    reason: e.to_string(),
                })
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.walk_usage(&path, usage)?;
            } else if let Ok(meta) = entry.metadata() {
                usage.total_bytes += meta.len();
                usage.file_count += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disk_usage_on_missing_root_is_zero() {
        let registry = Arc::new(parking_lot::Mutex::new(std::collections::HashMap::new()));
        let (coordinator, _tx) = RecordingCoordinator::new(PathBuf::from("/nonexistent/nvr-root-test"), registry);
        let usage = coordinator.disk_usage().unwrap();
        assert_eq!(usage.total_bytes, 0);
        assert_eq!(usage.file_count, 0);
    }

    #[tokio::test]
    async fn start_on_unknown_camera_reports_not_found() {
        let registry = Arc::new(parking_lot::Mutex::new(std::collections::HashMap::new()));
        let (coordinator, _tx) = RecordingCoordinator::new(PathBuf::from("/nonexistent/nvr-root-test"), registry);
        let err = coordinator.start("cam_missing").unwrap_err();
        assert!(matches!(err, NvrError::CameraNotFound { .. }));
    }

    #[tokio::test]
    async fn stop_all_on_empty_registry_reports_nothing() {
        let registry = Arc::new(parking_lot::Mutex::new(std::collections::HashMap::new()));
        let (coordinator, _tx) = RecordingCoordinator::new(PathBuf::from("/nonexistent/nvr-root-test"), registry);
        let report = coordinator.stop_all();
        assert!(report.stopped.is_empty());
        assert!(report.failed.is_empty());
    }
}
