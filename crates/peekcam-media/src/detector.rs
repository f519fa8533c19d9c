//! Speaking-activity detection on a live stream.
//!
//! The detector owns one analysis context and one analyser per attached
//! stream and polls the [`sampler`](crate::sampler) on a fixed interval. The
//! result is published through a `watch` channel; only the latest value is
//! kept.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use peekcam_core::config::Config;

use crate::provider::{AnalysisContext, AnalysisNode, AudioAnalysisProvider};
use crate::sampler;
use crate::stream::MediaStream;

pub const DEFAULT_THRESHOLD: f64 = 0.1;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Normalized level (0..1) that must be exceeded.
    pub threshold: f64,
    pub interval: Duration,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl DetectorOptions {
    /// Non-positive values fall back to the defaults.
    pub fn new(threshold: f64, interval: Duration) -> Self {
        Self {
            threshold: if threshold > 0.0 {
                threshold
            } else {
                DEFAULT_THRESHOLD
            },
            interval: if interval.is_zero() {
                DEFAULT_INTERVAL
            } else {
                interval
            },
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.detector_threshold(),
            Duration::from_millis(config.detector_interval_ms()),
        )
    }
}

/// Audio graph and poll task bound to one stream.
struct Binding {
    context: AnalysisContext,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct AudioActivityDetector {
    analysis: Arc<dyn AudioAnalysisProvider>,
    options: DetectorOptions,
    attached: Option<Arc<MediaStream>>,
    binding: Option<Binding>,
    speaking: Arc<watch::Sender<bool>>,
}

impl AudioActivityDetector {
    pub fn new(analysis: Arc<dyn AudioAnalysisProvider>, options: DetectorOptions) -> Self {
        let (speaking, _) = watch::channel(false);
        Self {
            analysis,
            options,
            attached: None,
            binding: None,
            speaking: Arc::new(speaking),
        }
    }

    /// Latest poll result.
    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.speaking.subscribe()
    }

    /// Whether an analysis graph is currently set up.
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Follow `stream`. Must be called from within a tokio runtime.
    ///
    /// Attaching the stream that is already attached does nothing; anything
    /// else tears the previous graph down first. A stream without a live
    /// audio track leaves the detector permanently not speaking.
    pub fn attach(&mut self, stream: Option<Arc<MediaStream>>) {
        let same = match (&self.attached, &stream) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }

        self.detach();
        let Some(stream) = stream else {
            return;
        };
        self.attached = Some(stream.clone());

        if !stream.has_live_audio() {
            debug!(stream = %stream.id(), "No live audio track, detector stays idle");
            return;
        }

        match self.bind(&stream) {
            Ok(binding) => self.binding = Some(binding),
            Err(e) => warn!(stream = %stream.id(), "Audio analysis unavailable: {e}"),
        }
    }

    /// Cancel the poll task, close the analysis context and report not
    /// speaking.
    ///
    /// Does not wait for the task. On a multi-threaded runtime a poll already
    /// running may still read once after the context is closed; its result is
    /// dropped because cancellation is checked before publishing.
    pub fn detach(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.cancel.cancel();
            binding.task.abort();
            self.analysis.close_context(binding.context);
            debug!(context = binding.context.0, "Detector detached");
        }
        self.attached = None;
        self.speaking
            .send_if_modified(|current| std::mem::replace(current, false));
    }

    fn bind(&self, stream: &Arc<MediaStream>) -> anyhow::Result<Binding> {
        let context = self.analysis.create_context()?;
        let node = match self
            .analysis
            .create_analyser(context)
            .and_then(|node| {
                self.analysis
                    .connect_source(context, stream, node)
                    .map(|_| node)
            }) {
            Ok(node) => node,
            Err(e) => {
                self.analysis.close_context(context);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            self.analysis.clone(),
            node,
            self.options,
            self.speaking.clone(),
            cancel.clone(),
        ));

        debug!(
            stream = %stream.id(),
            context = context.0,
            threshold = self.options.threshold,
            interval_ms = self.options.interval.as_millis() as u64,
            "Detector attached"
        );

        Ok(Binding {
            context,
            cancel,
            task,
        })
    }
}

impl Drop for AudioActivityDetector {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn poll_loop(
    analysis: Arc<dyn AudioAnalysisProvider>,
    node: AnalysisNode,
    options: DetectorOptions,
    speaking: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
) {
    // First tick completes immediately.
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let active = sampler::check_level(options.threshold, analysis.as_ref(), node);
                // Checked under the channel lock; detach cancels before resetting.
                speaking.send_if_modified(|current| {
                    if cancel.is_cancelled() || *current == active {
                        return false;
                    }
                    *current = active;
                    true
                });
            }
        }
    }
}
