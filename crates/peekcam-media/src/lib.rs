//! Media pipeline: stream acquisition, device switching, speaking detection.

pub mod detector;
pub mod manager;
pub mod provider;
pub mod sampler;
pub mod session;
pub mod stream;
pub mod virtual_backend;

pub use detector::{AudioActivityDetector, DetectorOptions};
pub use manager::{MediaStreamManager, MuteTransition, StreamPhase, plan_mute_change};
pub use provider::{AnalysisContext, AnalysisNode, AudioAnalysisProvider, CaptureProvider};
pub use session::{PreviewSession, PreviewStatus};
pub use stream::{MediaStream, MediaTrack};
pub use virtual_backend::VirtualBackend;
