//! In-process capture and analysis backend driven by configuration.
//!
//! Devices come from [`VirtualDevicesConfig`]. Microphones play back their
//! `levels` script, one entry per analysis read; a disabled or stopped track
//! reads as silence. Counters expose what the backend has been asked to do so
//! that callers can check hardware release and graph teardown.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use peekcam_core::config::{VirtualDeviceConfig, VirtualDevicesConfig};
use peekcam_core::error::MediaError;
use peekcam_core::types::{DeviceInfo, DeviceKind, MediaConstraints, TrackConstraint};

use crate::provider::{AnalysisContext, AnalysisNode, AudioAnalysisProvider, CaptureProvider};
use crate::stream::{MediaStream, MediaTrack};

/// Bins returned per read, matching a 2048-point FFT.
pub const FREQUENCY_BIN_COUNT: usize = 1024;

pub struct VirtualBackend {
    cameras: Vec<VirtualDeviceConfig>,
    microphones: Vec<VirtualDeviceConfig>,
    inner: Mutex<BackendState>,
}

#[derive(Default)]
struct BackendState {
    deny_permission: bool,
    fail_enumeration: bool,
    granted: bool,
    unplugged: HashSet<String>,
    issued: Vec<Arc<MediaTrack>>,
    requests: usize,
    next_handle: u64,
    contexts_created: usize,
    open_contexts: HashSet<u64>,
    nodes: HashMap<u64, NodeState>,
    reads: usize,
}

struct NodeState {
    context: u64,
    source: Option<Arc<MediaTrack>>,
    cursor: usize,
}

impl VirtualBackend {
    pub fn new(config: &VirtualDevicesConfig) -> Self {
        Self {
            cameras: config.cameras.clone(),
            microphones: config.microphones.clone(),
            inner: Mutex::new(BackendState {
                deny_permission: config.deny_permission,
                fail_enumeration: config.fail_enumeration,
                ..BackendState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn devices(&self, kind: DeviceKind) -> &[VirtualDeviceConfig] {
        match kind {
            DeviceKind::AudioInput => &self.microphones,
            DeviceKind::VideoInput => &self.cameras,
        }
    }

    pub fn set_deny_permission(&self, deny: bool) {
        self.lock().deny_permission = deny;
    }

    pub fn set_fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    /// Make a device disappear: later requests pinned to it are overconstrained.
    pub fn unplug(&self, device_id: &str) {
        self.lock().unplugged.insert(device_id.to_string());
    }

    pub fn replug(&self, device_id: &str) {
        self.lock().unplugged.remove(device_id);
    }

    /// Stream requests received, successful or not.
    pub fn request_count(&self) -> usize {
        self.lock().requests
    }

    /// Tracks handed out and not yet stopped.
    pub fn live_track_count(&self) -> usize {
        self.lock().issued.iter().filter(|t| t.is_live()).count()
    }

    pub fn contexts_created(&self) -> usize {
        self.lock().contexts_created
    }

    pub fn open_context_count(&self) -> usize {
        self.lock().open_contexts.len()
    }

    pub fn frequency_reads(&self) -> usize {
        self.lock().reads
    }

    fn pick<'a>(
        &'a self,
        state: &BackendState,
        kind: DeviceKind,
        constraint: &TrackConstraint,
    ) -> Result<Option<&'a VirtualDeviceConfig>, MediaError> {
        let available = |d: &&VirtualDeviceConfig| !state.unplugged.contains(&d.id);
        match constraint {
            TrackConstraint::Flag(false) => Ok(None),
            TrackConstraint::Flag(true) => self
                .devices(kind)
                .iter()
                .find(available)
                .map(Some)
                .ok_or_else(|| MediaError::DeviceNotFound(kind.noun().to_string())),
            TrackConstraint::Device { device_id } => self
                .devices(kind)
                .iter()
                .filter(available)
                .find(|d| &d.id == device_id)
                .map(Some)
                .ok_or_else(|| MediaError::Overconstrained {
                    device_id: device_id.clone(),
                }),
        }
    }

    fn levels_for(&self, device_id: &str) -> &[u8] {
        self.microphones
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| d.levels.as_slice())
            .unwrap_or(&[])
    }
}

#[async_trait]
impl CaptureProvider for VirtualBackend {
    async fn request_stream(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, MediaError> {
        let (chosen, latency) = {
            let mut state = self.lock();
            state.requests += 1;

            if state.deny_permission {
                return Err(MediaError::PermissionDenied(
                    "camera and microphone".to_string(),
                ));
            }

            let mut chosen = Vec::new();
            for kind in [DeviceKind::AudioInput, DeviceKind::VideoInput] {
                if let Some(device) = self.pick(&state, kind, constraints.get(kind))? {
                    chosen.push((kind, device));
                }
            }
            let latency = chosen.iter().map(|(_, d)| d.latency_ms).max().unwrap_or(0);
            (chosen, latency)
        };

        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let tracks: Vec<Arc<MediaTrack>> = chosen
            .into_iter()
            .map(|(kind, device)| Arc::new(MediaTrack::new(kind, &device.id, &device.label)))
            .collect();

        let mut state = self.lock();
        state.granted = true;
        state.issued.retain(|t| t.is_live());
        state.issued.extend(tracks.iter().cloned());
        debug!(tracks = tracks.len(), latency_ms = latency, "Virtual stream opened");

        Ok(MediaStream::new(tracks))
    }

    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        let state = self.lock();
        if state.fail_enumeration {
            return Err(MediaError::Enumeration(
                "device list unavailable".to_string(),
            ));
        }

        let mut out = Vec::new();
        for kind in [DeviceKind::VideoInput, DeviceKind::AudioInput] {
            for device in self.devices(kind) {
                if state.unplugged.contains(&device.id) {
                    continue;
                }
                out.push(DeviceInfo {
                    id: device.id.clone(),
                    kind,
                    label: if state.granted {
                        device.label.clone()
                    } else {
                        String::new()
                    },
                });
            }
        }
        Ok(out)
    }
}

impl AudioAnalysisProvider for VirtualBackend {
    fn create_context(&self) -> anyhow::Result<AnalysisContext> {
        let mut state = self.lock();
        state.next_handle += 1;
        let id = state.next_handle;
        state.contexts_created += 1;
        state.open_contexts.insert(id);
        Ok(AnalysisContext(id))
    }

    fn create_analyser(&self, context: AnalysisContext) -> anyhow::Result<AnalysisNode> {
        let mut state = self.lock();
        if !state.open_contexts.contains(&context.0) {
            anyhow::bail!("analysis context {} is closed", context.0);
        }
        state.next_handle += 1;
        let id = state.next_handle;
        state.nodes.insert(
            id,
            NodeState {
                context: context.0,
                source: None,
                cursor: 0,
            },
        );
        Ok(AnalysisNode(id))
    }

    fn connect_source(
        &self,
        context: AnalysisContext,
        stream: &Arc<MediaStream>,
        node: AnalysisNode,
    ) -> anyhow::Result<()> {
        let source = stream
            .tracks_of(DeviceKind::AudioInput)
            .find(|t| t.is_live())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("stream {} has no live audio track", stream.id()))?;

        let mut state = self.lock();
        let node_state = state
            .nodes
            .get_mut(&node.0)
            .filter(|n| n.context == context.0)
            .ok_or_else(|| anyhow::anyhow!("unknown analyser {}", node.0))?;
        node_state.source = Some(source);
        Ok(())
    }

    fn read_frequency_data(&self, node: AnalysisNode) -> Vec<u8> {
        let mut state = self.lock();
        state.reads += 1;

        let Some(node_state) = state.nodes.get_mut(&node.0) else {
            return Vec::new();
        };
        let Some(track) = node_state.source.clone() else {
            return vec![0; FREQUENCY_BIN_COUNT];
        };

        let levels = self.levels_for(track.device_id());
        let level = if levels.is_empty() {
            0
        } else {
            levels[node_state.cursor % levels.len()]
        };
        node_state.cursor += 1;

        if !track.is_live() || !track.is_enabled() {
            return vec![0; FREQUENCY_BIN_COUNT];
        }
        vec![level; FREQUENCY_BIN_COUNT]
    }

    fn close_context(&self, context: AnalysisContext) {
        let mut state = self.lock();
        if state.open_contexts.remove(&context.0) {
            state.nodes.retain(|_, n| n.context != context.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> VirtualBackend {
        VirtualBackend::new(&VirtualDevicesConfig::builtin())
    }

    #[tokio::test]
    async fn test_labels_hidden_until_granted() {
        let backend = backend();
        let before = backend.list_devices().await.unwrap();
        assert_eq!(before.len(), 2);
        assert!(before.iter().all(|d| d.label.is_empty()));

        backend
            .request_stream(&MediaConstraints::default())
            .await
            .unwrap();
        let after = backend.list_devices().await.unwrap();
        assert!(after.iter().all(|d| !d.label.is_empty()));
    }

    #[tokio::test]
    async fn test_track_kinds_follow_constraints() {
        let backend = backend();
        let stream = backend
            .request_stream(&MediaConstraints {
                audio: TrackConstraint::Flag(false),
                video: TrackConstraint::Flag(true),
            })
            .await
            .unwrap();
        assert_eq!(stream.tracks().len(), 1);
        assert!(!stream.has_live_audio());
        assert_eq!(stream.device_id(DeviceKind::VideoInput), Some("cam-0"));
    }

    #[tokio::test]
    async fn test_unplugged_device_is_overconstrained() {
        let backend = backend();
        backend.unplug("cam-0");
        let err = backend
            .request_stream(&MediaConstraints {
                audio: TrackConstraint::Flag(true),
                video: TrackConstraint::device("cam-0"),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MediaError::Overconstrained {
                device_id: "cam-0".into()
            }
        );

        let err = backend
            .request_stream(&MediaConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::DeviceNotFound(_)));
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_ended_tracks_are_not_retained() {
        let backend = backend();
        for _ in 0..50 {
            let stream = backend
                .request_stream(&MediaConstraints::default())
                .await
                .unwrap();
            stream.stop_all();
        }
        let last = backend
            .request_stream(&MediaConstraints::default())
            .await
            .unwrap();

        assert_eq!(backend.lock().issued.len(), last.tracks().len());
        assert_eq!(backend.live_track_count(), 2);
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let backend = backend();
        backend.set_deny_permission(true);
        let err = backend
            .request_stream(&MediaConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::PermissionDenied(_)));
        assert_eq!(backend.live_track_count(), 0);
    }

    #[tokio::test]
    async fn test_levels_play_back_and_mute_reads_silence() {
        let mut config = VirtualDevicesConfig::builtin();
        config.microphones[0].levels = vec![10, 20];
        let backend = VirtualBackend::new(&config);
        let stream = Arc::new(
            backend
                .request_stream(&MediaConstraints::default())
                .await
                .unwrap(),
        );

        let ctx = backend.create_context().unwrap();
        let node = backend.create_analyser(ctx).unwrap();
        backend.connect_source(ctx, &stream, node).unwrap();

        assert_eq!(backend.read_frequency_data(node)[0], 10);
        assert_eq!(backend.read_frequency_data(node)[0], 20);

        stream.tracks_of(DeviceKind::AudioInput).for_each(|t| {
            t.set_enabled(false);
        });
        assert!(backend.read_frequency_data(node).iter().all(|&b| b == 0));

        backend.close_context(ctx);
        assert_eq!(backend.open_context_count(), 0);
        assert!(backend.read_frequency_data(node).is_empty());
        assert!(backend.create_analyser(ctx).is_err());
    }
}
