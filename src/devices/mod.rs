// SPDX-License-Identifier: GPL-3.0-only

//! Capture source abstraction and device registry
//!
//! Downstream components (recorder, switcher, detectors) see every source
//! through [`VideoSource`]: status, a negotiated mode, and three event hubs.
//! Each family (synthetic, transport) has its own manager; the composite
//! registry aggregates families behind one interface. Family id prefixes keep
//! the child id-spaces disjoint.

pub mod capture_loop;
pub mod synthetic;
pub mod transport;
pub mod types;

pub use types::{
    AudioFormat, AudioSampleBlock, DeviceStatus, FrameRate, PixelFormat, StatusChange, VideoFrame,
    VideoMode,
};

use crate::constants::timing::DISCOVERY_POLL_INTERVAL;
use crate::errors::DeviceResult;
use crate::events::{EventHub, Subscription};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// A frame/sample producing source
///
/// Delivery contract: event handlers run off the registrant's thread, on the
/// producer's thread. The frame or sample block reference is valid only for
/// the duration of the callback; retaining data means copying it
/// (`copy_into`) into a pool the consumer owns.
pub trait VideoSource: Send + Sync {
    /// Stable across process runs for the same physical source
    fn device_id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Physical/logical connectors this source can bind (informational)
    fn available_connectors(&self) -> Vec<String>;

    fn status(&self) -> DeviceStatus;

    /// The negotiated mode while capturing; may be auto-detected on first frame
    fn current_mode(&self) -> Option<VideoMode>;

    /// Advertised capabilities
    fn list_modes(&self) -> Vec<VideoMode>;

    /// Begin producing events; fails if already capturing or unresolvable.
    /// On failure the device status becomes `Error`.
    fn start_capture(&self, mode: &VideoMode) -> DeviceResult<()>;

    /// Idempotent; waits for the in-flight producer to drain before returning
    fn stop_capture(&self);

    fn video_frames(&self) -> &EventHub<VideoFrame>;

    fn audio_samples(&self) -> &EventHub<AudioSampleBlock>;

    fn status_changed(&self) -> &EventHub<StatusChange>;
}

/// Per-family device registry
pub trait DeviceManager: Send + Sync {
    /// Family name, also the device-id prefix
    fn family(&self) -> &'static str;

    fn available_devices(&self) -> Vec<Arc<dyn VideoSource>>;

    /// Re-enumerate; transient failure leaves the current set untouched
    fn refresh_devices(&self);

    fn get_device(&self, device_id: &str) -> Option<Arc<dyn VideoSource>>;

    fn device_arrived(&self) -> &EventHub<Arc<dyn VideoSource>>;

    /// Emits the removed device's id after its resources are disposed
    fn device_removed(&self) -> &EventHub<String>;
}

/// FNV-1a hash of the lowercased canonical name, prefixed by family
///
/// Name-derived ids re-bind the same id when a source reappears after a
/// disconnect.
pub fn stable_device_id(family: &str, canonical_name: &str) -> String {
    format!(
        "{}-{:08x}",
        family,
        fnv1a_32(canonical_name.to_lowercase().as_bytes())
    )
}

fn fnv1a_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Shared identity/status/event plumbing embedded by every device family
pub(crate) struct DeviceCore {
    device_id: String,
    display_name: String,
    connectors: Vec<String>,
    status: Mutex<DeviceStatus>,
    current_mode: Mutex<Option<VideoMode>>,
    video_frames: EventHub<VideoFrame>,
    audio_samples: EventHub<AudioSampleBlock>,
    status_changed: EventHub<StatusChange>,
}

impl DeviceCore {
    pub(crate) fn new(device_id: String, display_name: String, connectors: Vec<String>) -> Self {
        Self {
            device_id,
            display_name,
            connectors,
            status: Mutex::new(DeviceStatus::Idle),
            current_mode: Mutex::new(None),
            video_frames: EventHub::new(),
            audio_samples: EventHub::new(),
            status_changed: EventHub::new(),
        }
    }

    pub(crate) fn device_id(&self) -> &str {
        &self.device_id
    }

    pub(crate) fn display_name(&self) -> &str {
        &self.display_name
    }

    pub(crate) fn connectors(&self) -> Vec<String> {
        self.connectors.clone()
    }

    pub(crate) fn status(&self) -> DeviceStatus {
        *self.status.lock().unwrap()
    }

    /// Update status, emitting a change event outside the lock
    pub(crate) fn set_status(&self, new: DeviceStatus) {
        let old = {
            let mut status = self.status.lock().unwrap();
            let old = *status;
            *status = new;
            old
        };
        if old != new {
            debug!(device = %self.device_id, %old, %new, "Device status changed");
            self.status_changed.emit(&StatusChange {
                device_id: self.device_id.clone(),
                old,
                new,
            });
        }
    }

    pub(crate) fn current_mode(&self) -> Option<VideoMode> {
        self.current_mode.lock().unwrap().clone()
    }

    pub(crate) fn set_current_mode(&self, mode: Option<VideoMode>) {
        *self.current_mode.lock().unwrap() = mode;
    }

    pub(crate) fn video_frames(&self) -> &EventHub<VideoFrame> {
        &self.video_frames
    }

    pub(crate) fn audio_samples(&self) -> &EventHub<AudioSampleBlock> {
        &self.audio_samples
    }

    pub(crate) fn status_changed(&self) -> &EventHub<StatusChange> {
        &self.status_changed
    }
}

/// Aggregates family managers behind one registry
///
/// Arrived/removed events fan through from all children without
/// deduplication; family prefixes keep the id spaces disjoint by
/// construction.
pub struct CompositeDeviceManager {
    children: Vec<Arc<dyn DeviceManager>>,
    device_arrived: EventHub<Arc<dyn VideoSource>>,
    device_removed: EventHub<String>,
    _forwards: Vec<ForwardSubs>,
}

struct ForwardSubs {
    _arrived: Subscription<Arc<dyn VideoSource>>,
    _removed: Subscription<String>,
}

impl CompositeDeviceManager {
    pub fn new(children: Vec<Arc<dyn DeviceManager>>) -> Arc<Self> {
        let device_arrived: EventHub<Arc<dyn VideoSource>> = EventHub::new();
        let device_removed: EventHub<String> = EventHub::new();

        let forwards = children
            .iter()
            .map(|child| {
                let arrived_hub = device_arrived.clone();
                let removed_hub = device_removed.clone();
                ForwardSubs {
                    _arrived: child
                        .device_arrived()
                        .subscribe(move |device| arrived_hub.emit(device)),
                    _removed: child
                        .device_removed()
                        .subscribe(move |id| removed_hub.emit(id)),
                }
            })
            .collect();

        info!(families = children.len(), "Device registry created");
        Arc::new(Self {
            children,
            device_arrived,
            device_removed,
            _forwards: forwards,
        })
    }

    pub fn available_devices(&self) -> Vec<Arc<dyn VideoSource>> {
        self.children
            .iter()
            .flat_map(|c| c.available_devices())
            .collect()
    }

    pub fn refresh_devices(&self) {
        for child in &self.children {
            child.refresh_devices();
        }
    }

    pub fn get_device(&self, device_id: &str) -> Option<Arc<dyn VideoSource>> {
        self.children.iter().find_map(|c| c.get_device(device_id))
    }

    pub fn device_arrived(&self) -> &EventHub<Arc<dyn VideoSource>> {
        &self.device_arrived
    }

    pub fn device_removed(&self) -> &EventHub<String> {
        &self.device_removed
    }

    /// Long-poll discovery: refresh all families on a fixed period until the
    /// returned task is aborted
    pub fn spawn_discovery(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DISCOVERY_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.refresh_devices();
            }
        })
    }
}
