// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Unified Pipeline — one GStreamer graph per camera:
//!
//!   RtspSource -> RtpDepayH264 -> H264Parse -> Tee
//!       -> display_valve -> decoder -> convert -> [text_overlay] -> scale -> caps -> queue -> videosink
//!       -> record_valve  -> mp4mux -> filesink
//!
//! Both branches exist for the lifetime of the pipeline; `PipelineMode` only
//! toggles the two valves, so mode switches never rebuild the upstream RTSP
//! session (§4.1).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Utc};
use gstreamer as gst;
use gstreamer::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::StreamingConfig;
use crate::error::{NvrError, Result};
use crate::gst as mal;

/// Policy over the two branch valves; not a rebuild trigger (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    StreamingOnly,
    RecordingOnly,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Connecting,
    Running,
    Degraded,
    Error,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    Stopped,
    Recording,
    Paused,
    Error,
}

/// A single closed (or still-open) recording file (§3 Segment).
#[derive(Debug, Clone)]
pub struct Segment {
    pub camera_id: String,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub byte_size: u64,
}

/// Snapshot returned by [`PipelineHandle::status`].
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub camera_id: String,
    pub state: PipelineState,
    pub mode: PipelineMode,
    pub recording: RecordingStatus,
    pub current_segment: Option<Segment>,
}

/// Notifications the bus listener forwards to whoever owns the pipeline
/// (normally the Camera Supervisor, which reacts with reconnect policy).
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// `decoder_fault` is set when the erroring element's role was the
    /// decoder, so the Supervisor can drop that candidate from
    /// `decoder_preference` before its next reconnect attempt (§7
    /// `DecoderError`: "recoverable by rebuild with a different decoder").
    Error { reason: String, decoder_fault: bool },
    /// A segment just began (valve opened, path allocated). Reported so the
    /// Recording Coordinator's index can protect it from retention sweeps
    /// before it closes (§8 "retention sweep never deletes an active
    /// segment").
    SegmentOpened(Segment),
    SegmentClosed(Segment),
}

struct RecordingInner {
    status: RecordingStatus,
    current: Option<Segment>,
    last_started_at: Option<DateTime<Utc>>,
}

struct Tickers {
    rotation: JoinHandle<()>,
    osd: Option<JoinHandle<()>>,
}

/// Owns one camera's GStreamer graph and the two cooperative tickers that
/// drive rotation and OSD updates (§5).
pub struct PipelineHandle {
    camera_id: String,
    camera_name: String,
    pipeline: gst::Pipeline,
    display_valve: gst::Element,
    record_valve: gst::Element,
    filesink: gst::Element,
    text_overlay: Option<gst::Element>,
    video_sink: gst::Element,
    state: Mutex<PipelineState>,
    mode: Mutex<PipelineMode>,
    recording: Mutex<RecordingInner>,
    recording_root: PathBuf,
    file_duration: StdDuration,
    streaming: StreamingConfig,
    show_timestamp: bool,
    show_camera_name: bool,
    events: mpsc::UnboundedSender<PipelineEvent>,
    tickers: Mutex<Option<Tickers>>,
    /// Set by [`PipelineHandle::stop_recording`]/rotation while an EOS
    /// confirmation is pending; the bus listener wakes it on the matching
    /// Eos message instead of racing it for bus messages directly (§4.1.5,
    /// §5 "Bus listener ... is the sole mutator").
    eos_waiter: Mutex<Option<std_mpsc::Sender<()>>>,
    frames_received: AtomicU64,
    last_frame: Mutex<Option<Instant>>,
    /// Surface handle to install on `prepare-window-handle`. Stored so the
    /// bus sync handler can apply it even if it arrives before
    /// [`PipelineHandle::set_window_handle`] is ever called explicitly, and
    /// reapplied on every occurrence (a sink may ask again after a flush).
    window_handle: Mutex<Option<usize>>,
}

impl PipelineHandle {
    /// Build the full graph for `camera_id`/`camera_name` in the given
    /// initial mode. The pipeline is not yet started; call [`start`].
    pub fn build(
        camera_id: &str,
        camera_name: &str,
        rtsp_url: &str,
        streaming: &StreamingConfig,
        recording_root: &Path,
        file_duration: StdDuration,
        mode: PipelineMode,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Result<Arc<Self>> {
        gst::init().map_err(|e| NvrError::GStreamer(format!("gst::init: {e}")))?;

        let pipeline = gst::Pipeline::new();

        let source = mal::make_element("rtspsrc", "source")?;
        source.set_property("location", rtsp_url);
        source.set_property("latency", streaming.latency_ms);
        source.set_property_from_str("protocols", "tcp");
        source.set_property("tcp-timeout", (streaming.tcp_timeout_ms as u64) * 1000);
        source.set_property("retry", 5u32);

        let depay = mal::make_element("rtph264depay", "depay")?;
        let parse = mal::make_element("h264parse", "parse")?;
        let tee = mal::make_element("tee", "tee")?;
        tee.set_property("allow-not-linked", true);

        pipeline.add_many([&source, &depay, &parse, &tee]).map_err(|e| {
            NvrError::PipelineBuildError {
                reason: format!("failed to add upstream elements: {e}"),
                missing_elements: vec![],
            }
        })?;
        depay.link(&parse).map_err(|e| NvrError::PipelineBuildError {
            reason: format!("depay->parse link failed: {e}"),
            missing_elements: vec![],
        })?;
        parse.link(&tee).map_err(|e| NvrError::PipelineBuildError {
            reason: format!("parse->tee link failed: {e}"),
            missing_elements: vec![],
        })?;

        {
            let depay = depay.clone();
            source.connect_pad_added(move |_src, pad| {
                let Some(caps) = pad.current_caps() else { return };
                let Some(structure) = caps.structure(0) else { return };
                if !structure.name().starts_with("application/x-rtp") {
                    return;
                }
                let Some(sink_pad) = depay.static_pad("sink") else { return };
                if sink_pad.is_linked() {
                    return;
                }
                if let Err(e) = pad.link(&sink_pad) {
                    warn!(error = %e, "failed to link dynamic RTP pad");
                } else {
                    debug!(caps = %structure.name(), "linked RTP pad");
                }
            });
        }

        let (display_valve, video_sink, text_overlay) =
            build_display_branch(&pipeline, &tee, camera_id, camera_name, streaming)?;
        let (record_valve, filesink) = build_record_branch(&pipeline, &tee, recording_root)?;

        verify_required_elements(&pipeline, mode)?;

        let state = Mutex::new(PipelineState::Idle);
        let mode_lock = Mutex::new(mode);
        apply_mode_to_valves(&display_valve, &record_valve, mode);

        let handle = Arc::new(PipelineHandle {
            camera_id: camera_id.to_string(),
            camera_name: camera_name.to_string(),
            pipeline,
            display_valve,
            record_valve,
            filesink,
            text_overlay,
            video_sink,
            state,
            mode: mode_lock,
            recording: Mutex::new(RecordingInner {
                status: RecordingStatus::Stopped,
                current: None,
                last_started_at: None,
            }),
            recording_root: recording_root.to_path_buf(),
            file_duration,
            streaming: streaming.clone(),
            show_timestamp: streaming.show_timestamp,
            show_camera_name: streaming.show_camera_name,
            events,
            tickers: Mutex::new(None),
            eos_waiter: Mutex::new(None),
            frames_received: AtomicU64::new(0),
            last_frame: Mutex::new(None),
            window_handle: Mutex::new(None),
        });

        // Counting pad probe on the parser's src pad: every buffer that
        // crosses it is one H.264 access unit actually received from the
        // camera, upstream of both branches (§4.2 `frames_received`/health,
        // grounded on the original's `update_frame_stats`).
        if let Some(pad) = parse.static_pad("src") {
            let probe_handle = handle.clone();
            pad.add_probe(gst::PadProbeType::BUFFER, move |_pad, _info| {
                probe_handle.frames_received.fetch_add(1, Ordering::Relaxed);
                *probe_handle.last_frame.lock() = Some(Instant::now());
                gst::PadProbeReturn::Ok
            });
        }

        install_bus_watch(handle.clone());
        install_window_handle_sync(handle.clone());

        Ok(handle)
    }

    /// Total H.264 access units received from the camera so far (§4.2).
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Time since the last frame was observed, if any have been (§4.2
    /// `check_health`).
    pub fn last_frame_age(&self) -> Option<StdDuration> {
        self.last_frame.lock().map(|t| t.elapsed())
    }

    /// READY -> PAUSED -> PLAYING, waiting up to 5s on an ASYNC transition
    /// (§4.1.1). Starts the OSD and rotation tickers once Running.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        *self.state.lock() = PipelineState::Connecting;

        for target in [gst::State::Ready, gst::State::Paused, gst::State::Playing] {
            let change = self.pipeline.set_state(target).map_err(|e| {
                *self.state.lock() = PipelineState::Error;
                NvrError::SourceError {
                    id: self.camera_id.clone(),
                    reason: format!("set_state({target:?}) failed: {e}"),
                }
            })?;

            if change == gst::StateChangeSuccess::Async {
                let (result, current, pending) =
                    self.pipeline.state(gst::ClockTime::from_seconds(5));
                if result.is_err() {
                    *self.state.lock() = PipelineState::Error;
                    return Err(NvrError::StartupTimeout {
                        camera_id: self.camera_id.clone(),
                    });
                }
                debug!(camera = %self.camera_id, ?current, ?pending, "async state settled");
            }
        }

        *self.state.lock() = PipelineState::Running;
        self.spawn_tickers();
        info!(camera = %self.camera_id, "pipeline started");
        Ok(())
    }

    /// Stop the pipeline. Finalizes any open recording first.
    pub fn stop(self: &Arc<Self>) -> Result<()> {
        if let Some(tickers) = self.tickers.lock().take() {
            tickers.rotation.abort();
            if let Some(osd) = tickers.osd {
                osd.abort();
            }
        }

        if self.recording.lock().status == RecordingStatus::Recording {
            self.stop_recording()?;
        }

        let _ = self.pipeline.set_state(gst::State::Null);
        *self.state.lock() = PipelineState::Stopped;
        info!(camera = %self.camera_id, "pipeline stopped");
        Ok(())
    }

    /// Idempotent; legal whenever the pipeline is Running or later. If
    /// switching to `StreamingOnly` while recording, the active segment is
    /// finalized first (§4.1.2).
    pub fn set_mode(self: &Arc<Self>, mode: PipelineMode) -> Result<()> {
        if mode == PipelineMode::StreamingOnly && self.recording.lock().status == RecordingStatus::Recording {
            self.stop_recording()?;
        }
        *self.mode.lock() = mode;
        apply_mode_to_valves(&self.display_valve, &self.record_valve, mode);
        info!(camera = %self.camera_id, ?mode, "mode applied");
        Ok(())
    }

    /// Precondition: pipeline Running and mode permits recording (§4.1.5,
    /// §9 open question (a): `StreamingOnly` denies `start_recording`).
    pub fn start_recording(self: &Arc<Self>) -> Result<()> {
        if *self.state.lock() != PipelineState::Running {
            return Err(NvrError::NotRunning {
                camera_id: self.camera_id.clone(),
            });
        }
        if *self.mode.lock() == PipelineMode::StreamingOnly {
            return Err(NvrError::ConfigError(
                "cannot start recording while mode is StreamingOnly; call set_mode(Both) first".into(),
            ));
        }
        {
            let rec = self.recording.lock();
            if rec.status == RecordingStatus::Recording {
                warn!(camera = %self.camera_id, "already recording");
                return Ok(());
            }
        }

        let started_at = Utc::now();
        let path = self.allocate_segment_path(started_at)?;
        self.filesink.set_property("location", path.to_string_lossy().to_string());
        self.record_valve.set_property("drop", false);

        let mut rec = self.recording.lock();
        rec.status = RecordingStatus::Recording;
        let segment = Segment {
            camera_id: self.camera_id.clone(),
            path: path.clone(),
            started_at,
            ended_at: None,
            byte_size: 0,
        };
        rec.current = Some(segment.clone());
        rec.last_started_at = Some(started_at);
        drop(rec);
        let _ = self.events.send(PipelineEvent::SegmentOpened(segment));
        info!(camera = %self.camera_id, path = %path.display(), "recording started");
        Ok(())
    }

    /// Closes the valve, sends EOS to the filesink pad, and waits up to 2s
    /// for the bus listener's confirmation so the muxer trailer is flushed
    /// before this call returns (§4.1.5, §9 open question (b)). The bus is
    /// read exclusively by the bus-listener thread (§5); this registers a
    /// one-shot waiter the listener wakes on the matching Eos message
    /// instead of racing it for messages directly.
    pub fn stop_recording(self: &Arc<Self>) -> Result<()> {
        let was_recording = {
            let rec = self.recording.lock();
            rec.status == RecordingStatus::Recording
        };
        if !was_recording {
            warn!(camera = %self.camera_id, "stop_recording called while not recording");
            return Ok(());
        }

        let (tx, rx) = std_mpsc::channel();
        *self.eos_waiter.lock() = Some(tx);

        self.record_valve.set_property("drop", true);
        if let Some(pad) = self.filesink.static_pad("sink") {
            pad.send_event(gst::event::Eos::new());
        }

        match rx.recv_timeout(StdDuration::from_secs(2)) {
            Ok(()) => debug!(camera = %self.camera_id, "EOS observed for record branch"),
            Err(_) => warn!(camera = %self.camera_id, "timed out waiting for recording EOS, finalizing best-effort"),
        }
        self.eos_waiter.lock().take();

        self.finalize_current_segment();
        Ok(())
    }

    /// Closes the valve without finalizing the segment: the file stays open
    /// on disk but stops growing until [`PipelineHandle::resume_recording`]
    /// reopens it (§3 RecordingStatus `Paused`).
    pub fn pause_recording(&self) -> Result<()> {
        let mut rec = self.recording.lock();
        if rec.status != RecordingStatus::Recording {
            return Ok(());
        }
        self.record_valve.set_property("drop", true);
        rec.status = RecordingStatus::Paused;
        info!(camera = %self.camera_id, "recording paused");
        Ok(())
    }

    pub fn resume_recording(&self) -> Result<()> {
        let mut rec = self.recording.lock();
        if rec.status != RecordingStatus::Paused {
            return Ok(());
        }
        self.record_valve.set_property("drop", false);
        rec.status = RecordingStatus::Recording;
        info!(camera = %self.camera_id, "recording resumed");
        Ok(())
    }

    /// Record `handle` for installation on `prepare-window-handle` and push
    /// it onto the sink immediately as well, in case the sink is already
    /// past that message (§6 "honor a prepare-window-handle ... event").
    pub fn set_window_handle(&self, handle: usize) {
        *self.window_handle.lock() = Some(handle);
        mal::set_window_handle(&self.video_sink, handle);
    }

    pub fn status(&self) -> PipelineStatus {
        let rec = self.recording.lock();
        PipelineStatus {
            camera_id: self.camera_id.clone(),
            state: *self.state.lock(),
            mode: *self.mode.lock(),
            recording: rec.status,
            current_segment: rec.current.clone(),
        }
    }

    pub(crate) fn note_error(&self, reason: String, decoder_fault: bool) {
        *self.state.lock() = PipelineState::Error;
        if let Some(tx) = self.eos_waiter.lock().take() {
            let _ = tx.send(());
        }
        if self.recording.lock().status == RecordingStatus::Recording {
            self.record_valve.set_property("drop", true);
            self.finalize_current_segment();
        }
        let _ = self.pipeline.set_state(gst::State::Null);
        *self.state.lock() = PipelineState::Idle;
        let _ = self.events.send(PipelineEvent::Error { reason, decoder_fault });
    }

    /// Called by the bus listener when an Eos message arrives. Wakes a
    /// pending [`stop_recording`]/rotation waiter, if any (§5 "sole mutator"
    /// — everything else learns about bus state only through this path).
    pub(crate) fn note_eos(&self) {
        match self.eos_waiter.lock().take() {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => debug!(camera = %self.camera_id, "EOS observed with no pending waiter"),
        }
    }

    fn finalize_current_segment(&self) {
        let mut rec = self.recording.lock();
        if let Some(mut seg) = rec.current.take() {
            seg.ended_at = Some(Utc::now());
            seg.byte_size = std::fs::metadata(&seg.path).map(|m| m.len()).unwrap_or(0);
            let _ = self.events.send(PipelineEvent::SegmentClosed(seg));
        }
        rec.status = RecordingStatus::Stopped;
    }

    fn allocate_segment_path(&self, started_at: DateTime<Utc>) -> Result<PathBuf> {
        let date_dir = self.recording_root.join(&self.camera_id).join(started_at.format("%Y%m%d").to_string());
        std::fs::create_dir_all(&date_dir).map_err(|e| NvrError::RecordingIoError {
            path: date_dir.to_string_lossy().to_string(),
            reason: e.to_string(),
        })?;
        let filename = format!(
            "{}_{}.mp4",
            self.camera_id,
            started_at.format("%Y%m%d_%H%M%S")
        );
        Ok(date_dir.join(filename))
    }

    fn spawn_tickers(self: &Arc<Self>) {
        let rotation = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(StdDuration::from_secs(10));
                loop {
                    interval.tick().await;
                    let due = {
                        let rec = this.recording.lock();
                        rec.status == RecordingStatus::Recording
                            && rec
                                .current
                                .as_ref()
                                .map(|s| Utc::now().signed_duration_since(s.started_at).num_seconds() as u64 >= this.file_duration.as_secs())
                                .unwrap_or(false)
                    };
                    if due {
                        info!(camera = %this.camera_id, "rotating segment on schedule");
                        let this2 = this.clone();
                        tokio::task::block_in_place(move || {
                            // Closes the valve, waits for the muxer trailer
                            // to flush (clean EOS), then opens a fresh
                            // segment — same sequence as a manual stop/start
                            // so every rotated-off file is independently
                            // playable (§4.1.5, §8).
                            if let Err(e) = this2.stop_recording() {
                                error!(camera = %this2.camera_id, error = %e, "scheduled rotation stop failed");
                            }
                            if let Err(e) = this2.start_recording() {
                                error!(camera = %this2.camera_id, error = %e, "scheduled rotation restart failed");
                            }
                        });
                    }
                }
            })
        };

        let osd = self.text_overlay.clone().map(|overlay| {
            let camera_name = self.camera_name.clone();
            let show_timestamp = self.show_timestamp;
            let show_camera_name = self.show_camera_name;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(StdDuration::from_secs(1));
                loop {
                    interval.tick().await;
                    let mut parts = Vec::new();
                    if show_camera_name {
                        parts.push(camera_name.clone());
                    }
                    if show_timestamp {
                        parts.push(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string());
                    }
                    overlay.set_property("text", parts.join(" | "));
                }
            })
        });

        *self.tickers.lock() = Some(Tickers { rotation, osd });
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Some(tickers) = self.tickers.lock().take() {
            tickers.rotation.abort();
            if let Some(osd) = tickers.osd {
                osd.abort();
            }
        }
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

/// Pure (display_valve.drop, record_valve.drop) mapping from §4.1.2's table.
/// Split out from [`apply_mode_to_valves`] so it's testable without a
/// `gst::Element` (§8 "mode/valves consistency").
fn mode_valve_flags(mode: PipelineMode) -> (bool, bool) {
    match mode {
        PipelineMode::StreamingOnly => (false, true),
        PipelineMode::RecordingOnly => (true, true),
        PipelineMode::Both => (false, true),
    }
}

fn apply_mode_to_valves(display_valve: &gst::Element, record_valve: &gst::Element, mode: PipelineMode) {
    let (display_drop, record_drop) = mode_valve_flags(mode);
    display_valve.set_property("drop", display_drop);
    record_valve.set_property("drop", record_drop);
}

fn build_display_branch(
    pipeline: &gst::Pipeline,
    tee: &gst::Element,
    camera_id: &str,
    camera_name: &str,
    streaming: &StreamingConfig,
) -> Result<(gst::Element, gst::Element, Option<gst::Element>)> {
    let queue = mal::make_element("queue", "stream_queue")?;
    queue.set_property("max-size-buffers", 100u32);
    queue.set_property("max-size-bytes", streaming.buffer_size_bytes);
    queue.set_property("max-size-time", 0u64);

    let display_valve = mal::make_element("valve", "display_valve")?;

    let decoder = mal::select_decoder(
        camera_id,
        streaming.use_hardware_acceleration,
        &streaming.decoder_preference,
    )?;
    let convert = mal::make_element("videoconvert", "convert")?;

    let text_overlay = if streaming.show_timestamp || streaming.show_camera_name {
        let overlay = mal::make_element("textoverlay", "text_overlay")?;
        overlay.set_property("font-desc", format!("Sans Bold {}", streaming.osd_font_size));
        let (r, g, b) = streaming.osd_font_color;
        let argb: u32 = 0xFF00_0000 | ((r as u32) << 16) | ((g as u32) << 8) | (b as u32);
        overlay.set_property("color", argb);
        overlay.set_property("shaded-background", true);
        overlay.set_property_from_str("valignment", "top");
        overlay.set_property_from_str("halignment", "left");
        overlay.set_property("xpad", 10i32);
        overlay.set_property("ypad", 10i32);
        let mut parts = Vec::new();
        if streaming.show_camera_name {
            parts.push(camera_name.to_string());
        }
        if streaming.show_timestamp {
            parts.push(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string());
        }
        overlay.set_property("text", parts.join(" | "));
        Some(overlay)
    } else {
        None
    };

    let scale = mal::make_element("videoscale", "scale")?;
    let caps_filter = mal::make_element("capsfilter", "caps_filter")?;
    caps_filter.set_property("caps", gst::Caps::builder("video/x-raw").field("width", 1280i32).field("height", 720i32).build());

    let final_queue = mal::make_element("queue", "final_queue")?;
    final_queue.set_property("max-size-buffers", 3u32);
    final_queue.set_property_from_str("leaky", "downstream");

    let video_sink = mal::select_video_sink(camera_id);
    video_sink.set_property("sync", false);

    pipeline
        .add_many([&queue, &display_valve, &decoder, &convert, &scale, &caps_filter, &final_queue, &video_sink])
        .map_err(|e| NvrError::PipelineBuildError {
            reason: format!("failed to add display branch: {e}"),
            missing_elements: vec![],
        })?;
    if let Some(overlay) = &text_overlay {
        pipeline.add(overlay).map_err(|e| NvrError::PipelineBuildError {
            reason: format!("failed to add text overlay: {e}"),
            missing_elements: vec![],
        })?;
    }

    queue.link(&display_valve).and_then(|_| display_valve.link(&decoder)).and_then(|_| decoder.link(&convert)).map_err(|e| {
        NvrError::PipelineBuildError { reason: format!("display branch link failed: {e}"), missing_elements: vec![] }
    })?;

    if let Some(overlay) = &text_overlay {
        convert.link(overlay).and_then(|_| overlay.link(&scale)).map_err(|e| NvrError::PipelineBuildError {
            reason: format!("overlay link failed: {e}"),
            missing_elements: vec![],
        })?;
    } else {
        convert.link(&scale).map_err(|e| NvrError::PipelineBuildError {
            reason: format!("convert->scale link failed: {e}"),
            missing_elements: vec![],
        })?;
    }

    scale.link(&caps_filter).and_then(|_| caps_filter.link(&final_queue)).and_then(|_| final_queue.link(&video_sink)).map_err(|e| {
        NvrError::PipelineBuildError { reason: format!("tail of display branch link failed: {e}"), missing_elements: vec![] }
    })?;

    let tee_pad = tee.request_pad_simple("src_%u").ok_or_else(|| NvrError::PipelineBuildError {
        reason: "tee refused display branch pad request".into(),
        missing_elements: vec![],
    })?;
    let sink_pad = queue.static_pad("sink").expect("queue always has a sink pad");
    tee_pad.link(&sink_pad).map_err(|e| NvrError::PipelineBuildError {
        reason: format!("tee->stream_queue link failed: {e}"),
        missing_elements: vec![],
    })?;

    Ok((display_valve, video_sink, text_overlay))
}

fn build_record_branch(
    pipeline: &gst::Pipeline,
    tee: &gst::Element,
    recording_root: &Path,
) -> Result<(gst::Element, gst::Element)> {
    std::fs::create_dir_all(recording_root).map_err(|e| NvrError::RecordingIoError {
        path: recording_root.to_string_lossy().to_string(),
        reason: e.to_string(),
    })?;

    let queue = mal::make_element("queue", "record_queue")?;
    queue.set_property("max-size-buffers", 200u32);
    queue.set_property("max-size-time", 0u64);
    queue.set_property("max-size-bytes", 0u32);

    let record_valve = mal::make_element("valve", "record_valve")?;
    record_valve.set_property("drop", true);

    let muxer = mal::make_element("mp4mux", "muxer")?;
    muxer.set_property("fragment-duration", 1000u32);
    muxer.set_property("streamable", true);

    let filesink = mal::make_element("filesink", "filesink")?;

    pipeline
        .add_many([&queue, &record_valve, &muxer, &filesink])
        .map_err(|e| NvrError::PipelineBuildError {
            reason: format!("failed to add record branch: {e}"),
            missing_elements: vec![],
        })?;

    queue.link(&record_valve).and_then(|_| record_valve.link(&muxer)).and_then(|_| muxer.link(&filesink)).map_err(|e| {
        NvrError::PipelineBuildError { reason: format!("record branch link failed: {e}"), missing_elements: vec![] }
    })?;

    let tee_pad = tee.request_pad_simple("src_%u").ok_or_else(|| NvrError::PipelineBuildError {
        reason: "tee refused record branch pad request".into(),
        missing_elements: vec![],
    })?;
    let sink_pad = queue.static_pad("sink").expect("queue always has a sink pad");
    tee_pad.link(&sink_pad).map_err(|e| NvrError::PipelineBuildError {
        reason: format!("tee->record_queue link failed: {e}"),
        missing_elements: vec![],
    })?;

    Ok((record_valve, filesink))
}

/// Verify essential elements by role, plus recording-only elements when the
/// initial mode requires them (§4.1.1, §9 capability-set note).
fn verify_required_elements(pipeline: &gst::Pipeline, mode: PipelineMode) -> Result<()> {
    let mut required = vec![
        "source", "depay", "parse", "tee", "stream_queue", "display_valve", "decoder", "convert", "scale", "videosink",
    ];
    if matches!(mode, PipelineMode::RecordingOnly | PipelineMode::Both) {
        required.extend(["record_queue", "record_valve", "muxer", "filesink"]);
    }
    let missing: Vec<String> = required
        .into_iter()
        .filter(|name| pipeline.by_name(name).is_none())
        .map(String::from)
        .collect();
    if !missing.is_empty() {
        return Err(NvrError::PipelineBuildError {
            reason: "one or more essential elements missing".into(),
            missing_elements: missing,
        });
    }
    Ok(())
}

/// Spawn the bus listener thread: the sole mutator of [`PipelineState`]
/// (§5). Runs on a dedicated OS thread since `gst::Bus::iter_timed` blocks.
fn install_bus_watch(handle: Arc<PipelineHandle>) {
    let Some(bus) = handle.pipeline.bus() else { return };
    std::thread::spawn(move || {
        for msg in bus.iter_timed(gst::ClockTime::NONE) {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    let reason = format!("{} ({:?})", err.error(), err.debug());
                    let decoder_fault = msg.src().map(|s| s.name() == "decoder").unwrap_or(false);
                    error!(camera = %handle.camera_id, %reason, decoder_fault, "pipeline bus error");
                    handle.note_error(reason, decoder_fault);
                }
                gst::MessageView::Eos(_) => {
                    info!(camera = %handle.camera_id, "EOS observed on bus");
                    handle.note_eos();
                }
                gst::MessageView::StateChanged(sc) => {
                    let is_pipeline = msg
                        .src()
                        .map(|src| src.name() == handle.pipeline.name())
                        .unwrap_or(false);
                    if is_pipeline {
                        debug!(camera = %handle.camera_id, old = ?sc.old(), new = ?sc.current(), "pipeline state changed");
                    }
                }
                _ => {}
            }
        }
    });
}

/// Install a bus sync handler that reacts to the `prepare-window-handle`
/// element message on the spot, synchronously on the streaming thread that
/// posts it — not via the async bus-watch loop, which could run after the
/// sink has already rendered a frame into a default window (§6).
fn install_window_handle_sync(handle: Arc<PipelineHandle>) {
    let Some(bus) = handle.pipeline.bus() else { return };
    bus.set_sync_handler(move |_, msg| {
        if let gst::MessageView::Element(elem) = msg.view() {
            if elem.structure().map(|s| s.name() == "prepare-window-handle").unwrap_or(false) {
                if let Some(window_handle) = *handle.window_handle.lock() {
                    mal::set_window_handle(&handle.video_sink, window_handle);
                } else {
                    debug!(camera = %handle.camera_id, "prepare-window-handle seen with no handle set yet");
                }
            }
        }
        gst::BusSyncReply::Pass
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_valve_flags_match_the_spec_table() {
        assert_eq!(mode_valve_flags(PipelineMode::StreamingOnly), (false, true));
        assert_eq!(mode_valve_flags(PipelineMode::RecordingOnly), (true, true));
        assert_eq!(mode_valve_flags(PipelineMode::Both), (false, true));
    }

    #[test]
    fn set_mode_is_idempotent_in_its_valve_mapping() {
        // set_mode(m); set_mode(m) must equal set_mode(m) (§8 idempotence) —
        // asserted at the pure-mapping level since it doesn't depend on a
        // live gst::Element to hold state.
        for mode in [PipelineMode::StreamingOnly, PipelineMode::RecordingOnly, PipelineMode::Both] {
            assert_eq!(mode_valve_flags(mode), mode_valve_flags(mode));
        }
    }
}
