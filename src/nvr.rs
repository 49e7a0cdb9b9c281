// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Orchestration root: wires the Configuration Store, one Camera
//! Supervisor per enabled camera, the Recording Coordinator, and the Host
//! Adapter into a single running system (§2, grounded on the shape of the
//! original `RecordingManager::new`).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{CameraRecord, ConfigurationStore};
use crate::error::{NvrError, Result};
use crate::host::{CameraRegistry, HostAdapter};
use crate::recording::RecordingCoordinator;
use crate::supervisor::Supervisor;

pub struct Nvr {
    config: Arc<ConfigurationStore>,
    supervisors: CameraRegistry,
    recording: Arc<RecordingCoordinator>,
    host: Arc<HostAdapter>,
    segment_tx: mpsc::UnboundedSender<crate::pipeline::Segment>,
}

impl Nvr {
    /// Load configuration from `config_path` and build a supervisor for
    /// every enabled camera. No pipeline is started yet; call
    /// [`Nvr::connect_all`] or [`Nvr::connect`] once constructed.
    pub fn new(config_path: &Path) -> Result<Arc<Self>> {
        let config = Arc::new(ConfigurationStore::load(config_path)?);
        let app = config.app_config();
        let supervisors: CameraRegistry = Arc::new(Mutex::new(HashMap::new()));
        let (recording, segment_tx) = RecordingCoordinator::new(app.recording_path.clone(), supervisors.clone());
        let host = Arc::new(HostAdapter::new(supervisors.clone()));

        let this = Arc::new(Self {
            config,
            supervisors,
            recording,
            host,
            segment_tx,
        });

        for camera in this.config.get_enabled_cameras() {
            this.register_camera(camera);
        }

        Ok(this)
    }

    fn register_camera(self: &Arc<Self>, camera: CameraRecord) {
        let app = self.config.app_config();
        let streaming = self.config.streaming_config();
        let camera_id = camera.camera_id.clone();
        let supervisor = Supervisor::new(
            camera,
            &app,
            streaming,
            app.recording_path.clone(),
            Duration::from_secs(app.segment_duration_seconds),
            self.segment_tx.clone(),
        );
        self.supervisors.lock().insert(camera_id, supervisor);
    }

    /// Start every registered camera's pipeline. Failures are logged and
    /// skipped rather than aborting the whole startup (§4.2 "one faulted
    /// camera must not prevent the rest from starting").
    pub fn connect_all(self: &Arc<Self>) -> Result<()> {
        let supervisors: Vec<Arc<Supervisor>> = self.supervisors.lock().values().cloned().collect();
        for supervisor in supervisors {
            if let Err(e) = supervisor.connect() {
                warn!(camera = %supervisor.camera_id(), error = %e, "failed to start camera");
            } else {
                info!(camera = %supervisor.camera_id(), "camera connected");
            }
        }
        Ok(())
    }

    pub fn disconnect_all(&self) -> Result<()> {
        for supervisor in self.supervisors.lock().values() {
            supervisor.disconnect()?;
        }
        Ok(())
    }

    pub fn connect(&self, camera_id: &str) -> Result<()> {
        self.supervisor(camera_id)?.connect()
    }

    pub fn disconnect(&self, camera_id: &str) -> Result<()> {
        self.supervisor(camera_id)?.disconnect()
    }

    pub fn supervisor(&self, camera_id: &str) -> Result<Arc<Supervisor>> {
        self.supervisors
            .lock()
            .get(camera_id)
            .cloned()
            .ok_or_else(|| NvrError::CameraNotFound {
                id: camera_id.to_string(),
            })
    }

    pub fn add_camera(self: &Arc<Self>, camera: CameraRecord) -> Result<()> {
        self.config.add_camera(camera.clone())?;
        if camera.enabled {
            self.register_camera(camera);
        }
        Ok(())
    }

    pub fn remove_camera(&self, camera_id: &str) -> Result<()> {
        if let Some(supervisor) = self.supervisors.lock().remove(camera_id) {
            supervisor.disconnect()?;
        }
        self.config.remove_camera(camera_id)
    }

    pub fn config(&self) -> Arc<ConfigurationStore> {
        self.config.clone()
    }

    pub fn recording(&self) -> Arc<RecordingCoordinator> {
        self.recording.clone()
    }

    pub fn host(&self) -> Arc<HostAdapter> {
        self.host.clone()
    }

    pub fn camera_ids(&self) -> Vec<String> {
        self.supervisors.lock().keys().cloned().collect()
    }

    /// Run a retention sweep using the configured retention window.
    pub fn retention_sweep(&self) -> Result<crate::recording::RetentionReport> {
        let days = self.config.app_config().retention_days;
        self.recording.retention_sweep(days)
    }
}
