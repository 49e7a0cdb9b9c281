// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Host Adapter — maps a UI's display channels to camera ids and native
//! window handles, so the UI layer never holds a reference back into a
//! pipeline (§4.4, grounded on `enhanced_camera_manager.py`'s
//! `window_handles`/`assign_camera_to_channel`).

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Result;
pub use crate::supervisor::CameraRegistry;

#[derive(Debug, Clone, Default)]
pub struct ChannelBinding {
    pub channel_index: u32,
    pub camera_id: Option<String>,
    pub surface_handle: Option<usize>,
}

pub struct HostAdapter {
    registry: CameraRegistry,
    bindings: Mutex<HashMap<u32, ChannelBinding>>,
}

impl HostAdapter {
    pub fn new(registry: CameraRegistry) -> Self {
        Self {
            registry,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Record the native surface for `channel_index`, pushing it
    /// immediately to the bound camera's pipeline if one is assigned.
    pub fn set_window_handle(&self, channel_index: u32, surface_handle: usize) {
        let camera_id = {
            let mut bindings = self.bindings.lock();
            let binding = bindings.entry(channel_index).or_insert_with(|| ChannelBinding {
                channel_index,
                ..Default::default()
            });
            binding.surface_handle = Some(surface_handle);
            binding.camera_id.clone()
        };
        if let Some(camera_id) = camera_id {
            self.push_handle(&camera_id, surface_handle);
        }
    }

    /// Assign `camera_id` to `channel_index`. If `surface_handle` is not
    /// given, falls back to whatever handle was previously recorded for
    /// this channel (mirrors the original's `connect_camera` fallback).
    ///
    /// When the channel previously displayed a *different* camera on this
    /// surface, follows the rebind sequence from §4.5: disconnect the prior
    /// supervisor from the surface first, update the binding, then bring
    /// the new camera up bound to it. A framework that can reparent a live
    /// video sink in place would skip straight to `push_handle`; GStreamer's
    /// overlay handle can usually be swapped on an already-running pipeline,
    /// but only one supervisor should ever hold a given native surface at a
    /// time, so the prior one is always released first.
    pub fn assign_camera_to_channel(
        &self,
        channel_index: u32,
        camera_id: &str,
        surface_handle: Option<usize>,
    ) -> Result<()> {
        let (prior_camera, effective_handle) = {
            let mut bindings = self.bindings.lock();
            let binding = bindings.entry(channel_index).or_insert_with(|| ChannelBinding {
                channel_index,
                ..Default::default()
            });
            let prior = binding.camera_id.clone();
            binding.camera_id = Some(camera_id.to_string());
            if let Some(handle) = surface_handle {
                binding.surface_handle = Some(handle);
            }
            (prior, binding.surface_handle)
        };

        if let Some(prior) = prior_camera.filter(|p| p != camera_id) {
            if let Some(supervisor) = self.registry.lock().get(&prior).cloned() {
                info!(camera = %prior, channel = channel_index, "releasing surface for rebind");
                supervisor.disconnect()?;
            }
        }

        if let Some(handle) = effective_handle {
            self.push_handle(camera_id, handle);
        }

        if let Some(supervisor) = self.registry.lock().get(camera_id).cloned() {
            if !supervisor.is_connected() {
                supervisor.connect()?;
                if let Some(handle) = effective_handle {
                    supervisor.set_window_handle(handle);
                }
            }
        }

        Ok(())
    }

    pub fn unassign_channel(&self, channel_index: u32) {
        if let Some(binding) = self.bindings.lock().get_mut(&channel_index) {
            binding.camera_id = None;
        }
    }

    pub fn binding(&self, channel_index: u32) -> Option<ChannelBinding> {
        self.bindings.lock().get(&channel_index).cloned()
    }

    pub fn all_bindings(&self) -> Vec<ChannelBinding> {
        self.bindings.lock().values().cloned().collect()
    }

    fn push_handle(&self, camera_id: &str, handle: usize) {
        match self.registry.lock().get(camera_id) {
            Some(supervisor) => supervisor.set_window_handle(handle),
            None => warn!(camera = camera_id, "channel bound to unknown camera, handle not pushed"),
        }
    }
}
