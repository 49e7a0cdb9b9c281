// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Camera Supervisor — owns one [`PipelineHandle`] per camera, reconnects
//! it on bus errors per the camera's [`ReconnectPolicy`], and forwards
//! closed segments to whoever is collecting them (§4.2).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{CameraRecord, ReconnectPolicy, StreamingConfig};
use crate::error::{NvrError, Result};
use crate::pipeline::{PipelineEvent, PipelineHandle, PipelineMode, PipelineState, PipelineStatus, Segment};

/// Aggregate health counters exposed to operators (§4.2 `stats()`).
#[derive(Debug, Clone)]
pub struct SupervisorStats {
    pub status: PipelineState,
    pub connect_attempts: u32,
    pub frames_received: u64,
    pub uptime_s: u64,
    pub last_error: Option<String>,
}

/// Shared camera registry: keyed by `camera_id`, looked up by the Recording
/// Coordinator and the Host Adapter without either owning a pipeline (§3
/// "the Recording Coordinator holds weak references (by camera_id)... The
/// Host Adapter holds by camera_id only").
pub type CameraRegistry = Arc<Mutex<HashMap<String, Arc<Supervisor>>>>;

pub struct Supervisor {
    camera: Mutex<CameraRecord>,
    /// Mutated on a decoder-fault reconnect: the failed candidate is
    /// dropped from `decoder_preference` so the rebuilt pipeline tries the
    /// next one (§7 `DecoderError`).
    streaming: Mutex<StreamingConfig>,
    recording_root: PathBuf,
    file_duration: Duration,
    policy: ReconnectPolicy,
    handle: Mutex<Option<Arc<PipelineHandle>>>,
    mode: Mutex<PipelineMode>,
    attempt: AtomicU32,
    last_error: Mutex<Option<String>>,
    connected_at: Mutex<Option<Instant>>,
    segment_tx: mpsc::UnboundedSender<Segment>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    /// Set once the watchdog exhausts `policy.attempts`; surfaced by
    /// [`Supervisor::stats`] as a terminal `PipelineState::Error` even
    /// though `handle` is `None` by then (§4.2, §7 "terminal Error until
    /// the user intervenes").
    terminal: AtomicBool,
}

impl Supervisor {
    /// Construct a supervisor for `camera`. Does not connect; call
    /// [`Supervisor::connect`] to bring the pipeline up. `segment_tx` is
    /// where closed recording segments are reported (normally owned by the
    /// Recording Coordinator).
    pub fn new(
        camera: CameraRecord,
        app_policy_fallback: &crate::config::AppConfig,
        streaming: StreamingConfig,
        recording_root: PathBuf,
        file_duration: Duration,
        segment_tx: mpsc::UnboundedSender<Segment>,
    ) -> Arc<Self> {
        let policy = camera.reconnect_policy(app_policy_fallback);
        let mode = if camera.recording_enabled {
            PipelineMode::Both
        } else {
            PipelineMode::StreamingOnly
        };
        Arc::new(Self {
            camera: Mutex::new(camera),
            streaming: Mutex::new(streaming),
            recording_root,
            file_duration,
            policy,
            handle: Mutex::new(None),
            mode: Mutex::new(mode),
            attempt: AtomicU32::new(0),
            last_error: Mutex::new(None),
            connected_at: Mutex::new(None),
            segment_tx,
            watchdog: Mutex::new(None),
            terminal: AtomicBool::new(false),
        })
    }

    pub fn camera_id(&self) -> String {
        self.camera.lock().camera_id.clone()
    }

    /// Build and start the pipeline, then spawn a watchdog task that
    /// reacts to [`PipelineEvent::Error`] by reconnecting with backoff
    /// (mirrors the original's `supervised_connect` retry loop, bounded by
    /// `policy.attempts` rather than running forever).
    pub fn connect(self: &Arc<Self>) -> Result<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let record = self.camera.lock().clone();
        let url = record.connect_url();
        let mode = *self.mode.lock();
        let streaming = self.streaming.lock().clone();

        let pipeline = PipelineHandle::build(
            &record.camera_id,
            &record.name,
            &url,
            &streaming,
            &self.recording_root,
            self.file_duration,
            mode,
            events_tx,
        )?;
        pipeline.start()?;

        if record.recording_enabled {
            pipeline.start_recording()?;
        }

        *self.handle.lock() = Some(pipeline);
        self.attempt.store(0, Ordering::SeqCst);
        self.terminal.store(false, Ordering::SeqCst);
        *self.last_error.lock() = None;
        *self.connected_at.lock() = Some(Instant::now());

        let this = self.clone();
        let task = tokio::spawn(this.watch(events_rx));
        *self.watchdog.lock() = Some(task);
        Ok(())
    }

    /// Idempotent (§8 "disconnect; disconnect is equivalent to disconnect").
    /// Also the point at which an operator "intervenes" on a terminal
    /// Error (§4.2/§7): clears the terminal flag and pending-reconnect
    /// counter so a following [`Supervisor::connect`] starts clean.
    pub fn disconnect(self: &Arc<Self>) -> Result<()> {
        if let Some(task) = self.watchdog.lock().take() {
            task.abort();
        }
        *self.connected_at.lock() = None;
        self.terminal.store(false, Ordering::SeqCst);
        self.attempt.store(0, Ordering::SeqCst);
        if let Some(pipeline) = self.handle.lock().take() {
            pipeline.stop()?;
        }
        Ok(())
    }

    /// §4.2 `reconnect`: disconnect, wait `policy.delay_seconds`, then
    /// connect again. This is the explicit, operator-invoked counterpart
    /// to the watchdog's automatic retry loop in [`Supervisor::watch`] —
    /// required by §6's command surface (`Supervisor::{..., reconnect, ...}`)
    /// independent of whatever the watchdog is doing.
    pub fn reconnect(self: &Arc<Self>) -> Result<()> {
        self.disconnect()?;
        std::thread::sleep(Duration::from_secs(self.policy.delay_seconds));
        self.connect()
    }

    pub fn set_mode(self: &Arc<Self>, mode: PipelineMode) -> Result<()> {
        *self.mode.lock() = mode;
        if let Some(pipeline) = self.handle.lock().clone() {
            pipeline.set_mode(mode)?;
        }
        Ok(())
    }

    pub fn start_recording(self: &Arc<Self>) -> Result<()> {
        match self.handle.lock().clone() {
            Some(pipeline) => pipeline.start_recording(),
            None => Err(NvrError::CameraConnection {
                id: self.camera_id(),
                reason: "not connected".into(),
            }),
        }
    }

    pub fn stop_recording(self: &Arc<Self>) -> Result<()> {
        match self.handle.lock().clone() {
            Some(pipeline) => pipeline.stop_recording(),
            None => Ok(()),
        }
    }

    pub fn pause_recording(&self) -> Result<()> {
        match self.handle.lock().clone() {
            Some(pipeline) => pipeline.pause_recording(),
            None => Ok(()),
        }
    }

    pub fn resume_recording(&self) -> Result<()> {
        match self.handle.lock().clone() {
            Some(pipeline) => pipeline.resume_recording(),
            None => Ok(()),
        }
    }

    pub fn set_window_handle(&self, window_handle: usize) {
        if let Some(pipeline) = self.handle.lock().clone() {
            pipeline.set_window_handle(window_handle);
        }
    }

    pub fn status(&self) -> Option<PipelineStatus> {
        self.handle.lock().as_ref().map(|p| p.status())
    }

    pub fn is_connected(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Connected AND (no frame tracked yet OR the last frame arrived within
    /// `timeout_s`) (§4.2, grounded on the original's `check_stream_health`).
    pub fn check_health(&self, timeout_s: u64) -> bool {
        let Some(pipeline) = self.handle.lock().clone() else {
            return false;
        };
        match pipeline.last_frame_age() {
            Some(age) => age <= Duration::from_secs(timeout_s),
            None => true,
        }
    }

    pub fn stats(&self) -> SupervisorStats {
        let pipeline = self.handle.lock().clone();
        let status = if self.terminal.load(Ordering::SeqCst) {
            PipelineState::Error
        } else {
            pipeline.as_ref().map(|p| p.status().state).unwrap_or(PipelineState::Idle)
        };
        SupervisorStats {
            status,
            connect_attempts: self.attempt.load(Ordering::SeqCst),
            frames_received: pipeline.as_ref().map(|p| p.frames_received()).unwrap_or(0),
            uptime_s: self.connected_at.lock().map(|t| t.elapsed().as_secs()).unwrap_or(0),
            last_error: self.last_error.lock().clone(),
        }
    }

    /// Watchdog body: reacts to bus errors by tearing down the faulted
    /// pipeline and retrying `connect` every `policy.delay_seconds`, up to
    /// `policy.attempts` tries, until one succeeds or the counter is
    /// exhausted (mirrors the teacher's `supervised_connect` retry `loop`,
    /// bounded here by `policy.attempts` instead of running forever).
    /// Exhaustion sets the supervisor terminal (§4.2: "else set terminal
    /// Error and surface to the host"; §7; scenario 5).
    async fn watch(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PipelineEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PipelineEvent::Error { reason, decoder_fault } => {
                    warn!(camera = %self.camera_id(), %reason, decoder_fault, "pipeline reported error, reconnecting");
                    let classified = if decoder_fault {
                        NvrError::DecoderError { id: self.camera_id(), reason: reason.clone() }.to_string()
                    } else {
                        NvrError::SourceError { id: self.camera_id(), reason: reason.clone() }.to_string()
                    };
                    *self.last_error.lock() = Some(classified);
                    self.handle.lock().take();
                    *self.connected_at.lock() = None;

                    if decoder_fault {
                        let mut streaming = self.streaming.lock();
                        if !streaming.decoder_preference.is_empty() {
                            let dropped = streaming.decoder_preference.remove(0);
                            warn!(camera = %self.camera_id(), decoder = %dropped, "dropping failed decoder from preference list");
                        }
                    }

                    loop {
                        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
                        if attempt > self.policy.attempts.max(1) {
                            error!(camera = %self.camera_id(), attempt, "reconnect attempts exhausted, entering terminal error");
                            self.terminal.store(true, Ordering::SeqCst);
                            return;
                        }
                        tokio::time::sleep(Duration::from_secs(self.policy.delay_seconds)).await;

                        match self.connect() {
                            Ok(()) => {
                                info!(camera = %self.camera_id(), attempt, "reconnected");
                                // `connect` spawned a fresh watchdog for the
                                // new pipeline; this one's job is done.
                                return;
                            }
                            Err(e) => {
                                error!(camera = %self.camera_id(), error = %e, attempt, "reconnect attempt failed, retrying");
                                *self.last_error.lock() = Some(e.to_string());
                            }
                        }
                    }
                }
                PipelineEvent::SegmentOpened(segment) | PipelineEvent::SegmentClosed(segment) => {
                    let _ = self.segment_tx.send(segment);
                }
            }
        }
    }
}
