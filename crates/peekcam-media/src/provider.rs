//! Platform seams: stream capture and audio analysis.
//!
//! The manager talks to a [`CaptureProvider`], the detector to an
//! [`AudioAnalysisProvider`]. [`crate::virtual_backend::VirtualBackend`]
//! implements both.

use std::sync::Arc;

use async_trait::async_trait;

use peekcam_core::error::MediaError;
use peekcam_core::types::{DeviceInfo, MediaConstraints};

use crate::stream::MediaStream;

/// Acquires capture sessions and lists devices.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Request a stream matching `constraints`. A kind requested as `false`
    /// yields no track of that kind.
    async fn request_stream(&self, constraints: &MediaConstraints)
    -> Result<MediaStream, MediaError>;

    /// List input devices. Labels may be empty before permission was granted.
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, MediaError>;
}

/// Opaque audio-processing context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnalysisContext(pub u64);

/// Opaque analyser node handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnalysisNode(pub u64);

/// Builds analysis graphs and reads frequency data from them.
///
/// Calls are synchronous so that tearing a graph down never has to wait.
pub trait AudioAnalysisProvider: Send + Sync {
    fn create_context(&self) -> anyhow::Result<AnalysisContext>;

    fn create_analyser(&self, context: AnalysisContext) -> anyhow::Result<AnalysisNode>;

    /// Feed `stream`'s audio into `node`.
    fn connect_source(
        &self,
        context: AnalysisContext,
        stream: &Arc<MediaStream>,
        node: AnalysisNode,
    ) -> anyhow::Result<()>;

    /// Current frequency bins (0..255 each).
    fn read_frequency_data(&self, node: AnalysisNode) -> Vec<u8>;

    fn close_context(&self, context: AnalysisContext);
}
