//! Captured streams and their tracks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use peekcam_core::types::{DeviceKind, MutedState};

/// One camera or microphone feed inside a [`MediaStream`].
///
/// Flags are atomics so that the stream can be shared (`Arc`) between the
/// manager that owns it and the backend or detector that only read it.
#[derive(Debug)]
pub struct MediaTrack {
    id: String,
    kind: DeviceKind,
    device_id: String,
    label: String,
    enabled: AtomicBool,
    live: AtomicBool,
}

impl MediaTrack {
    /// A live, enabled track.
    pub fn new(kind: DeviceKind, device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            device_id: device_id.into(),
            label: label.into(),
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Set the enabled flag. Returns `true` if the flag actually changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel) != enabled
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// End the track and release its device. Idempotent.
    pub fn stop(&self) {
        self.live.store(false, Ordering::Release);
    }
}

/// An acquired capture session: zero or one track per kind.
#[derive(Debug)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: DeviceKind) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn has_live_audio(&self) -> bool {
        self.tracks_of(DeviceKind::AudioInput).any(|t| t.is_live())
    }

    /// Device backing the first track of `kind`, if any.
    pub fn device_id(&self, kind: DeviceKind) -> Option<&str> {
        self.tracks_of(kind).next().map(|t| t.device_id())
    }

    /// Stop every track.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Force the enabled flags to match `muted`. Returns how many flags changed.
    pub fn apply_muted(&self, muted: MutedState) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.set_enabled(!muted.is_muted(t.kind())))
            .count()
    }

    /// Whether every track's enabled flag agrees with `muted`.
    pub fn matches_muted(&self, muted: MutedState) -> bool {
        self.tracks
            .iter()
            .all(|t| t.is_enabled() != muted.is_muted(t.kind()))
    }
}
