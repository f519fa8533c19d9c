//! Media stream manager: acquisition, mute state and device switching.
//!
//! State changes are planned synchronously under the state lock and produce an
//! intent (toggle in place, or re-acquire with some constraints). Acquisition
//! runs without the lock held; each request carries a version and its result
//! is applied only if no newer request started in the meantime. A stale
//! stream is stopped as soon as it resolves.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use peekcam_core::error::MediaError;
use peekcam_core::types::{DeviceInfo, DeviceKind, DeviceSelection, MediaConstraints, MutedState};

use crate::provider::CaptureProvider;
use crate::stream::MediaStream;

/// Lifecycle of the manager's current handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    Unacquired,
    Acquiring,
    Active,
    Failed,
    Released,
}

/// What a mute change requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteTransition {
    Unchanged,
    ToggleInPlace,
    Reacquire,
}

/// Decide how to go from `current` to `next`.
///
/// Turning the camera back on needs a fresh stream. Unmuting the microphone
/// needs one only when `audio_needs_stream` is set: an audio device switch
/// was deferred while it was muted, or the held stream has no audio track.
/// Everything else flips track flags in place.
pub fn plan_mute_change(
    current: MutedState,
    next: MutedState,
    audio_needs_stream: bool,
) -> MuteTransition {
    if current == next {
        return MuteTransition::Unchanged;
    }
    if current.camera && !next.camera {
        return MuteTransition::Reacquire;
    }
    if audio_needs_stream && current.microphone && !next.microphone {
        return MuteTransition::Reacquire;
    }
    MuteTransition::ToggleInPlace
}

struct ManagerState {
    phase: StreamPhase,
    stream: Option<Arc<MediaStream>>,
    muted: MutedState,
    selection: DeviceSelection,
    devices: Vec<DeviceInfo>,
    authorized: bool,
    last_error: Option<MediaError>,
    /// Version of the most recent acquisition request.
    version: u64,
}

impl ManagerState {
    /// The selection names a device for `kind` that the current stream does
    /// not use.
    fn switch_pending(&self, kind: DeviceKind) -> bool {
        let Some(wanted) = self.selection.get(kind) else {
            return false;
        };
        self.stream
            .as_ref()
            .and_then(|s| s.device_id(kind))
            .is_some_and(|current| current != wanted)
    }

    /// A stream is held but carries no track of `kind`.
    fn lacks_track(&self, kind: DeviceKind) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|s| s.tracks_of(kind).next().is_none())
    }

    fn ensure_open(&self) -> Result<(), MediaError> {
        if self.phase == StreamPhase::Released {
            return Err(MediaError::Closed);
        }
        Ok(())
    }
}

/// Permission to complete one acquisition.
#[derive(Debug)]
struct AcquireTicket {
    version: u64,
}

pub struct MediaStreamManager {
    capture: Arc<dyn CaptureProvider>,
    state: Mutex<ManagerState>,
    stream_tx: watch::Sender<Option<Arc<MediaStream>>>,
}

impl MediaStreamManager {
    /// A manager in `Unacquired`. Kinds not requested by `initial` start muted
    /// and devices pinned by `initial` become the selection.
    pub fn new(capture: Arc<dyn CaptureProvider>, initial: &MediaConstraints) -> Self {
        let (stream_tx, _) = watch::channel(None);
        let mut selection = DeviceSelection::default();
        for kind in [DeviceKind::AudioInput, DeviceKind::VideoInput] {
            if let Some(id) = initial.get(kind).device_id() {
                selection.set(kind, id.to_string());
            }
        }
        Self {
            capture,
            state: Mutex::new(ManagerState {
                phase: StreamPhase::Unacquired,
                stream: None,
                muted: MutedState::from_constraints(initial),
                selection,
                devices: Vec::new(),
                authorized: false,
                last_error: None,
                version: 0,
            }),
            stream_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> StreamPhase {
        self.lock().phase
    }

    pub fn stream(&self) -> Option<Arc<MediaStream>> {
        self.lock().stream.clone()
    }

    pub fn muted(&self) -> MutedState {
        self.lock().muted
    }

    pub fn selection(&self) -> DeviceSelection {
        self.lock().selection.clone()
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.lock().devices.clone()
    }

    /// Last enumerated devices of one kind, for pickers.
    pub fn devices_of_kind(&self, kind: DeviceKind) -> Vec<DeviceInfo> {
        self.lock()
            .devices
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }

    pub fn is_authorized(&self) -> bool {
        self.lock().authorized
    }

    pub fn last_error(&self) -> Option<MediaError> {
        self.lock().last_error.clone()
    }

    /// Follow stream replacements. `None` while acquiring, failed or released.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<MediaStream>>> {
        self.stream_tx.subscribe()
    }

    /// Replace the current stream with one matching `constraints`.
    ///
    /// The current mute state is applied to the new tracks.
    pub async fn acquire(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<MediaStream>, MediaError> {
        self.run_acquisition(constraints).await
    }

    /// Bring the tracks in line with `next`, re-acquiring only when needed.
    ///
    /// `next` is recorded immediately. A re-acquisition applies whatever mute
    /// state is current when its stream arrives, so a later in-place change
    /// is never undone by an earlier request still in flight.
    pub async fn set_muted(&self, next: MutedState) -> Result<(), MediaError> {
        let (ticket, constraints) = {
            let mut state = self.lock();
            state.ensure_open()?;
            let audio_needs_stream = state.switch_pending(DeviceKind::AudioInput)
                || state.lacks_track(DeviceKind::AudioInput);

            match plan_mute_change(state.muted, next, audio_needs_stream) {
                MuteTransition::Unchanged => return Ok(()),
                MuteTransition::ToggleInPlace => {
                    let changed = state
                        .stream
                        .as_ref()
                        .map(|s| s.apply_muted(next))
                        .unwrap_or(0);
                    state.muted = next;
                    debug!(
                        camera_muted = next.camera,
                        microphone_muted = next.microphone,
                        changed,
                        "Toggled tracks in place"
                    );
                    return Ok(());
                }
                MuteTransition::Reacquire => {
                    info!(
                        camera_muted = next.camera,
                        microphone_muted = next.microphone,
                        "Mute change needs a fresh stream"
                    );
                    state.muted = next;
                    let constraints = state.selection.constraints();
                    (self.begin_locked(&mut state, &constraints), constraints)
                }
            }
        };

        let result = self.capture.request_stream(&constraints).await;
        self.finish(ticket, result).map(|_| ())
    }

    /// List input devices and remember them.
    ///
    /// Success marks the manager authorized; failure records an
    /// [`MediaError::Enumeration`] and clears the flag.
    pub async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        self.lock().ensure_open()?;
        let result = self.capture.list_devices().await;

        let mut state = self.lock();
        match result {
            Ok(devices) => {
                debug!(count = devices.len(), "Enumerated devices");
                state.devices = devices.clone();
                state.authorized = true;
                Ok(devices)
            }
            Err(e) => {
                let e = match e {
                    MediaError::Enumeration(_) => e,
                    other => MediaError::Enumeration(other.to_string()),
                };
                error!("Device enumeration failed: {e}");
                state.authorized = false;
                state.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Select `device_id` for `kind`.
    ///
    /// Re-acquires with merged constraints when the manager is authorized and
    /// `kind` is live. A switch for a muted kind is only recorded and gets
    /// applied by the next re-acquisition. Returns the new stream when one was
    /// acquired.
    pub async fn set_selected_device(
        &self,
        kind: DeviceKind,
        device_id: impl Into<String>,
    ) -> Result<Option<Arc<MediaStream>>, MediaError> {
        let device_id = device_id.into();
        let constraints = {
            let mut state = self.lock();
            state.ensure_open()?;
            if !state.selection.set(kind, device_id.clone()) {
                return Ok(None);
            }
            info!(%kind, device = %device_id, "Selected device");

            if !state.authorized {
                debug!("Not authorized yet, selection recorded only");
                return Ok(None);
            }
            if state.muted.is_muted(kind) {
                debug!(%kind, "Kind is muted, device switch deferred");
                return Ok(None);
            }
            state.selection.constraints()
        };

        self.run_acquisition(&constraints).await.map(Some)
    }

    /// Stop every track and refuse further work. Synchronous; an acquisition
    /// still in flight is stopped when it resolves.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.phase == StreamPhase::Released {
            return;
        }
        state.version += 1;
        if let Some(stream) = state.stream.take() {
            stream.stop_all();
        }
        state.phase = StreamPhase::Released;
        self.stream_tx.send_replace(None);
        info!("Media stream manager closed");
    }

    async fn run_acquisition(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Arc<MediaStream>, MediaError> {
        let ticket = {
            let mut state = self.lock();
            state.ensure_open()?;
            self.begin_locked(&mut state, constraints)
        };
        let result = self.capture.request_stream(constraints).await;
        self.finish(ticket, result)
    }

    /// Stop the current stream and claim the next version.
    fn begin_locked(
        &self,
        state: &mut ManagerState,
        constraints: &MediaConstraints,
    ) -> AcquireTicket {
        state.version += 1;

        if let Some(old) = state.stream.take() {
            old.stop_all();
            debug!(stream = %old.id(), "Replaced stream stopped");
            self.stream_tx.send_replace(None);
        }
        state.phase = StreamPhase::Acquiring;

        debug!(version = state.version, ?constraints, "Acquiring stream");
        AcquireTicket {
            version: state.version,
        }
    }

    /// Apply an acquisition result if its ticket is still current. The
    /// stream gets the mute state as it stands now, not as it was at `begin`.
    fn finish(
        &self,
        ticket: AcquireTicket,
        result: Result<MediaStream, MediaError>,
    ) -> Result<Arc<MediaStream>, MediaError> {
        let mut state = self.lock();

        if ticket.version != state.version {
            if let Ok(stream) = &result {
                stream.stop_all();
            }
            debug!(
                version = ticket.version,
                latest = state.version,
                "Discarding stale acquisition"
            );
            return Err(if state.phase == StreamPhase::Released {
                MediaError::Closed
            } else {
                MediaError::Superseded {
                    version: ticket.version,
                }
            });
        }

        match result {
            Ok(stream) => {
                stream.apply_muted(state.muted);
                let stream = Arc::new(stream);

                state.stream = Some(stream.clone());
                state.phase = StreamPhase::Active;
                state.last_error = None;
                self.stream_tx.send_replace(Some(stream.clone()));

                info!(
                    stream = %stream.id(),
                    tracks = stream.tracks().len(),
                    version = ticket.version,
                    "Stream active"
                );
                Ok(stream)
            }
            Err(e) => {
                warn!(version = ticket.version, "Acquisition failed: {e}");
                state.phase = StreamPhase::Failed;
                state.last_error = Some(e.clone());
                Err(e)
            }
        }
    }
}

impl Drop for MediaStreamManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn muted(camera: bool, microphone: bool) -> MutedState {
        MutedState { camera, microphone }
    }

    #[test]
    fn test_identical_state_is_unchanged() {
        for camera in [false, true] {
            for microphone in [false, true] {
                let s = muted(camera, microphone);
                assert_eq!(plan_mute_change(s, s, true), MuteTransition::Unchanged);
            }
        }
    }

    #[test]
    fn test_only_camera_unmute_reacquires() {
        assert_eq!(
            plan_mute_change(muted(true, false), muted(false, false), false),
            MuteTransition::Reacquire
        );
        assert_eq!(
            plan_mute_change(muted(true, true), muted(false, false), false),
            MuteTransition::Reacquire
        );
        assert_eq!(
            plan_mute_change(muted(false, false), muted(true, false), false),
            MuteTransition::ToggleInPlace
        );
        assert_eq!(
            plan_mute_change(muted(false, true), muted(false, false), false),
            MuteTransition::ToggleInPlace
        );
        assert_eq!(
            plan_mute_change(muted(false, false), muted(false, true), false),
            MuteTransition::ToggleInPlace
        );
    }

    #[test]
    fn test_pending_audio_switch_reacquires_on_unmute() {
        assert_eq!(
            plan_mute_change(muted(false, true), muted(false, false), true),
            MuteTransition::Reacquire
        );
        // Muting never needs the pending switch.
        assert_eq!(
            plan_mute_change(muted(false, false), muted(false, true), true),
            MuteTransition::ToggleInPlace
        );
    }
}
