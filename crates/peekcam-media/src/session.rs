//! Preview session: wires the stream manager to the activity detector.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use peekcam_core::error::MediaError;
use peekcam_core::types::{DeviceKind, DeviceSelection, MediaConstraints, MutedState};

use crate::detector::{AudioActivityDetector, DetectorOptions};
use crate::manager::{MediaStreamManager, StreamPhase};
use crate::provider::{AudioAnalysisProvider, CaptureProvider};

/// Snapshot of what a preview shows.
#[derive(Debug, Clone, Serialize)]
pub struct PreviewStatus {
    pub phase: StreamPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    pub muted: MutedState,
    pub speaking: bool,
    pub authorized: bool,
    pub selection: DeviceSelection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A camera preview with a speaking indicator.
///
/// The indicator only runs while the camera is on, as it is drawn over the
/// video. After every operation the detector is re-attached to whatever
/// stream the manager now holds.
pub struct PreviewSession {
    manager: Arc<MediaStreamManager>,
    detector: AudioActivityDetector,
}

impl PreviewSession {
    pub fn new(
        capture: Arc<dyn CaptureProvider>,
        analysis: Arc<dyn AudioAnalysisProvider>,
        initial: MediaConstraints,
        options: DetectorOptions,
    ) -> Self {
        Self {
            manager: Arc::new(MediaStreamManager::new(capture, &initial)),
            detector: AudioActivityDetector::new(analysis, options),
        }
    }

    pub fn manager(&self) -> &Arc<MediaStreamManager> {
        &self.manager
    }

    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.detector.subscribe()
    }

    /// Enumerate devices, then acquire the initial stream.
    ///
    /// Both kinds are always requested; a kind the initial constraints turned
    /// off starts as a muted track so it can be unmuted later.
    ///
    /// Enumeration failures are recorded but do not stop the acquisition.
    /// When the first listing came back without labels (no permission yet)
    /// the devices are listed again once the stream is live.
    pub async fn start(&mut self) -> Result<(), MediaError> {
        let labelled = match self.manager.enumerate_devices().await {
            Ok(devices) => devices.iter().all(|d| !d.label.is_empty()),
            Err(e) => {
                warn!("Starting without a device list: {e}");
                true
            }
        };

        let constraints = self.manager.selection().constraints();
        let result = self.manager.acquire(&constraints).await;
        self.sync_detector();
        result?;

        if !labelled {
            self.manager.enumerate_devices().await?;
        }
        info!("Preview started");
        Ok(())
    }

    pub async fn toggle_camera(&mut self) -> Result<(), MediaError> {
        self.toggle(DeviceKind::VideoInput).await
    }

    pub async fn toggle_microphone(&mut self) -> Result<(), MediaError> {
        self.toggle(DeviceKind::AudioInput).await
    }

    async fn toggle(&mut self, kind: DeviceKind) -> Result<(), MediaError> {
        let next = self.manager.muted().toggled(kind);
        let result = self.manager.set_muted(next).await;
        self.sync_detector();
        result
    }

    pub async fn select_device(
        &mut self,
        kind: DeviceKind,
        device_id: impl Into<String>,
    ) -> Result<(), MediaError> {
        let result = self.manager.set_selected_device(kind, device_id).await;
        self.sync_detector();
        result.map(|_| ())
    }

    pub fn status(&self) -> PreviewStatus {
        PreviewStatus {
            phase: self.manager.phase(),
            stream_id: self.manager.stream().map(|s| s.id().to_string()),
            muted: self.manager.muted(),
            speaking: self.detector.is_speaking(),
            authorized: self.manager.is_authorized(),
            selection: self.manager.selection(),
            last_error: self.manager.last_error().map(|e| e.to_string()),
        }
    }

    /// Cancel the detector and release the devices, synchronously.
    pub fn teardown(&mut self) {
        self.detector.detach();
        if self.manager.phase() != StreamPhase::Released {
            self.manager.close();
            info!("Preview torn down");
        }
    }

    fn sync_detector(&mut self) {
        let stream = if self.manager.muted().camera {
            None
        } else {
            self.manager.stream()
        };
        self.detector.attach(stream);
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
