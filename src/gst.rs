// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Media Abstraction Layer — a thin adapter over GStreamer: element
//! factory by role, decoder/sink probing, and overlay window-handle
//! installation. The Unified Pipeline builds its graph from these helpers
//! so the rest of the crate never calls `gst::ElementFactory` directly.

use gstreamer as gst;
use gstreamer::prelude::*;

use crate::error::{NvrError, Result};

/// Ordered hardware decoder candidates, probed before falling back to
/// software. Mirrors the Raspberry-Pi-first ordering of the original
/// camera pipeline.
const HARDWARE_DECODERS: &[&str] = &["v4l2h264dec", "nvh264dec", "vaapih264dec", "omxh264dec"];

/// Ordered software decoder candidates.
const SOFTWARE_DECODERS: &[&str] = &["avdec_h264", "openh264dec"];

/// Ordered video sink candidates, most capable first. `autovideosink` is
/// the universal fallback when nothing platform-specific is registered.
const VIDEO_SINKS: &[&str] = &[
    "glimagesink",
    "xvimagesink",
    "ximagesink",
    "waylandsink",
    "autovideosink",
];

/// Build an element, tagging failures with the role that was being built so
/// callers can report a precise `PipelineBuildError`.
pub fn make_element(factory: &str, role: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(factory)
        .name(role)
        .build()
        .map_err(|e| NvrError::PipelineBuildError {
            reason: format!("failed to create '{factory}' for role '{role}': {e}"),
            missing_elements: vec![role.to_string()],
        })
}

/// Pick the first registered element name from `candidates`.
fn first_available(candidates: &[&str]) -> Option<String> {
    let registry = gst::Registry::get();
    candidates
        .iter()
        .find(|name| registry.find_feature(name, gst::ElementFactory::static_type()).is_some())
        .map(|s| s.to_string())
}

/// Decoder selection per §4.1.3: a nonempty `decoder_preference` is probed
/// first (entries that name something other than a decoder are skipped
/// with a warning); otherwise fall back to hardware-then-software order
/// depending on `prefer_hardware`.
pub fn select_decoder(
    camera_id: &str,
    prefer_hardware: bool,
    decoder_preference: &[String],
) -> Result<gst::Element> {
    if !decoder_preference.is_empty() {
        let registry = gst::Registry::get();
        for name in decoder_preference {
            if name == "h264parse" {
                tracing::warn!(camera = camera_id, candidate = %name, "skipping non-decoder entry in decoder_preference");
                continue;
            }
            if registry.find_feature(name, gst::ElementFactory::static_type()).is_some() {
                if let Ok(el) = make_element(name, "decoder") {
                    tracing::info!(camera = camera_id, decoder = %name, "selected decoder from preference list");
                    return Ok(el);
                }
            }
        }
    }

    let ordered: Vec<&str> = if prefer_hardware {
        HARDWARE_DECODERS.iter().chain(SOFTWARE_DECODERS).copied().collect()
    } else {
        SOFTWARE_DECODERS.iter().chain(HARDWARE_DECODERS).copied().collect()
    };

    match first_available(&ordered) {
        Some(name) => {
            tracing::info!(camera = camera_id, decoder = %name, "selected decoder");
            make_element(&name, "decoder")
        }
        None => Err(NvrError::NoDecoderAvailable {
            id: camera_id.to_string(),
        }),
    }
}

/// Video sink selection: first registered candidate from [`VIDEO_SINKS`],
/// or `fakesink` as an absolute last resort so the pipeline still builds
/// headless (e.g. under test).
pub fn select_video_sink(camera_id: &str) -> gst::Element {
    match first_available(VIDEO_SINKS) {
        Some(name) => make_element(&name, "videosink").unwrap_or_else(|_| {
            tracing::warn!(camera = camera_id, "falling back to fakesink");
            gst::ElementFactory::make("fakesink").name("videosink").build().unwrap()
        }),
        None => {
            tracing::warn!(camera = camera_id, "no video sink registered, using fakesink");
            gst::ElementFactory::make("fakesink").name("videosink").build().unwrap()
        }
    }
}

/// Install `handle` on `sink` in response to the `prepare-window-handle`
/// synchronous bus message, via `gstreamer_video`'s `VideoOverlayExt`.
pub fn set_window_handle(sink: &gst::Element, handle: usize) {
    if let Some(overlay) = sink.dynamic_cast_ref::<gstreamer_video::VideoOverlay>() {
        unsafe {
            overlay.set_window_handle(handle);
        }
    } else {
        tracing::warn!(element = %sink.name(), "sink does not implement VideoOverlay");
    }
}
