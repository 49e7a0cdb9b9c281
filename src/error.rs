// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NvrError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed or duplicate camera id: {0}")]
    ConfigError(String),

    #[error("Failed to build pipeline: {reason}")]
    PipelineBuildError {
        reason: String,
        missing_elements: Vec<String>,
    },

    #[error("Pipeline state change timed out for camera '{camera_id}'")]
    StartupTimeout { camera_id: String },

    #[error("Camera '{id}' source error: {reason}")]
    SourceError { id: String, reason: String },

    #[error("Decoder error for camera '{id}': {reason}")]
    DecoderError { id: String, reason: String },

    #[error("No H.264 decoder available for camera '{id}'")]
    NoDecoderAvailable { id: String },

    #[error("Recording I/O error at {path}: {reason}")]
    RecordingIoError { path: String, reason: String },

    #[error("Camera '{camera_id}' pipeline is not running")]
    NotRunning { camera_id: String },

    #[error("GStreamer error: {0}")]
    GStreamer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera '{id}' connection failed: {reason}")]
    CameraConnection { id: String, reason: String },

    #[error("Camera '{id}' not found")]
    CameraNotFound { id: String },
}

pub type Result<T> = std::result::Result<T, NvrError>;
