use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of capture device, named after the platform's device kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    #[serde(rename = "audioinput")]
    AudioInput,
    #[serde(rename = "videoinput")]
    VideoInput,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AudioInput => "audioinput",
            Self::VideoInput => "videoinput",
        }
    }

    /// Human-facing name used in error messages ("camera", "microphone").
    pub fn noun(self) -> &'static str {
        match self {
            Self::AudioInput => "microphone",
            Self::VideoInput => "camera",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An enumerated capture device. `label` stays empty until permission has
/// been granted at least once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// Constraint for one track kind: a plain on/off flag or a specific device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackConstraint {
    Flag(bool),
    Device {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
}

impl TrackConstraint {
    pub fn device(id: impl Into<String>) -> Self {
        Self::Device {
            device_id: id.into(),
        }
    }

    /// Whether a track of this kind is requested at all.
    pub fn is_requested(&self) -> bool {
        !matches!(self, Self::Flag(false))
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Device { device_id } => Some(device_id),
            Self::Flag(_) => None,
        }
    }
}

impl Default for TrackConstraint {
    fn default() -> Self {
        Self::Flag(true)
    }
}

/// Constraints handed to the capture backend for one stream request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    #[serde(default)]
    pub audio: TrackConstraint,
    #[serde(default)]
    pub video: TrackConstraint,
}

impl MediaConstraints {
    pub fn get(&self, kind: DeviceKind) -> &TrackConstraint {
        match kind {
            DeviceKind::AudioInput => &self.audio,
            DeviceKind::VideoInput => &self.video,
        }
    }
}

/// Per-kind mute flags. `true` means the kind's tracks are disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutedState {
    pub camera: bool,
    pub microphone: bool,
}

impl MutedState {
    /// Kinds that are not requested start out muted.
    pub fn from_constraints(constraints: &MediaConstraints) -> Self {
        Self {
            camera: !constraints.video.is_requested(),
            microphone: !constraints.audio.is_requested(),
        }
    }

    pub fn is_muted(&self, kind: DeviceKind) -> bool {
        match kind {
            DeviceKind::AudioInput => self.microphone,
            DeviceKind::VideoInput => self.camera,
        }
    }

    pub fn toggled(self, kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::AudioInput => Self {
                microphone: !self.microphone,
                ..self
            },
            DeviceKind::VideoInput => Self {
                camera: !self.camera,
                ..self
            },
        }
    }
}

/// Chosen device id per kind; `None` means the platform default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_input: Option<String>,
}

impl DeviceSelection {
    pub fn get(&self, kind: DeviceKind) -> Option<&str> {
        match kind {
            DeviceKind::AudioInput => self.audio_input.as_deref(),
            DeviceKind::VideoInput => self.video_input.as_deref(),
        }
    }

    /// Store `device_id` for `kind`. Returns `false` when nothing changed.
    pub fn set(&mut self, kind: DeviceKind, device_id: String) -> bool {
        let slot = match kind {
            DeviceKind::AudioInput => &mut self.audio_input,
            DeviceKind::VideoInput => &mut self.video_input,
        };
        if slot.as_deref() == Some(device_id.as_str()) {
            return false;
        }
        *slot = Some(device_id);
        true
    }

    /// Merged constraints requesting both kinds, pinned to the selected
    /// devices where one is set.
    pub fn constraints(&self) -> MediaConstraints {
        let pick = |id: Option<&str>| match id {
            Some(id) => TrackConstraint::device(id),
            None => TrackConstraint::Flag(true),
        };
        MediaConstraints {
            audio: pick(self.get(DeviceKind::AudioInput)),
            video: pick(self.get(DeviceKind::VideoInput)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_deser_accepts_flag_and_device() {
        let c: MediaConstraints =
            serde_json::from_str(r#"{"audio": true, "video": {"deviceId": "cam-1"}}"#).unwrap();
        assert_eq!(c.audio, TrackConstraint::Flag(true));
        assert_eq!(c.video.device_id(), Some("cam-1"));
    }

    #[test]
    fn test_muted_state_from_constraints() {
        let c = MediaConstraints {
            audio: TrackConstraint::Flag(false),
            video: TrackConstraint::Flag(true),
        };
        let muted = MutedState::from_constraints(&c);
        assert!(muted.microphone);
        assert!(!muted.camera);
    }

    #[test]
    fn test_selection_merges_other_kind() {
        let mut sel = DeviceSelection::default();
        assert!(sel.set(DeviceKind::AudioInput, "mic-2".into()));
        assert!(!sel.set(DeviceKind::AudioInput, "mic-2".into()));
        sel.set(DeviceKind::VideoInput, "cam-1".into());

        let c = sel.constraints();
        assert_eq!(c.audio.device_id(), Some("mic-2"));
        assert_eq!(c.video.device_id(), Some("cam-1"));
    }

    #[test]
    fn test_selection_defaults_to_plain_flags() {
        let c = DeviceSelection::default().constraints();
        assert_eq!(c, MediaConstraints::default());
    }

    #[test]
    fn test_device_kind_serde_names() {
        let json = serde_json::to_string(&DeviceKind::VideoInput).unwrap();
        assert_eq!(json, r#""videoinput""#);
    }
}
