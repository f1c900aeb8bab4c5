//! Iframe height negotiation and sizing state machine.
//!
//! The plugin frame owns its sizing state: `Idle` until the auto-resizer is
//! started, `AutoResizing` while a background task measures content and
//! pushes `setHeight` calls over the channel, and `ManualHeight` whenever
//! plugin code pushes an explicit height. A manual push suspends automatic
//! measurement until [`ResizeNegotiator::start_auto_resizer`] is called
//! again.
//!
//! Measurement is periodic; heights are clamped into the host's accepted
//! range and only pushed when they actually changed. The measurement task is
//! held as a `JoinHandle` and aborted on stop, manual override, or drop.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::capabilities::AUTO_RESIZE_INTERVAL;
use crate::capabilities::MAX_FRAME_HEIGHT;
use crate::capabilities::MIN_FRAME_HEIGHT;
use crate::channel::Channel;
use crate::error::Result;

/// Source of the frame's current content height, in pixels.
///
/// In a browser frame this measures the document; tests provide canned
/// values.
pub trait ContentMeasurer: Send + Sync + 'static {
    fn measure(&self) -> u32;
}

/// The sizing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SizingState {
    Idle,
    AutoResizing,
    /// Explicit height pushed; automatic measurement is suspended.
    ManualHeight,
}

/// Snapshot of the negotiator's state, returned by `get_settings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSettings {
    pub state: SizingState,
    /// Last height pushed to the host, if any.
    pub height: Option<u32>,
    pub interval_ms: u64,
}

struct SizingShared {
    state: Mutex<SizingState>,
    last_height: Mutex<Option<u32>>,
}

impl SizingShared {
    fn state(&self) -> SizingState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SizingState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn last_height(&self) -> Option<u32> {
        *self.last_height.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_last_height(&self, height: u32) {
        *self.last_height.lock().unwrap_or_else(PoisonError::into_inner) = Some(height);
    }
}

/// Plugin-side negotiator for frame height and sizing lifecycle.
pub struct ResizeNegotiator {
    channel: Arc<Channel>,
    measurer: Arc<dyn ContentMeasurer>,
    interval: Duration,
    shared: Arc<SizingShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResizeNegotiator {
    pub fn new(channel: Arc<Channel>, measurer: Arc<dyn ContentMeasurer>) -> Self {
        Self::with_interval(channel, measurer, AUTO_RESIZE_INTERVAL)
    }

    pub fn with_interval(channel: Arc<Channel>, measurer: Arc<dyn ContentMeasurer>, interval: Duration) -> Self {
        Self {
            channel,
            measurer,
            interval,
            shared: Arc::new(SizingShared {
                state: Mutex::new(SizingState::Idle),
                last_height: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start periodic measurement. Replaces any running measurement task
    /// and clears a manual override.
    pub fn start_auto_resizer(&self) {
        self.abort_task();
        self.shared.set_state(SizingState::AutoResizing);

        let channel = Arc::clone(&self.channel);
        let measurer = Arc::clone(&self.measurer);
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so measurement starts
            // one interval after the call.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if shared.state() != SizingState::AutoResizing {
                    break;
                }
                let height = clamp_height(measurer.measure());
                if shared.last_height() == Some(height) {
                    continue;
                }
                match channel.call("setHeight", vec![json!(height)]).await {
                    Ok(_) => {
                        shared.set_last_height(height);
                        debug!(height, "auto-resize pushed height");
                    }
                    Err(e) => {
                        warn!(height, error = %e, "auto-resize height push failed");
                    }
                }
            }
        });

        if let Some(old) = self.task.lock().unwrap_or_else(PoisonError::into_inner).replace(handle) {
            old.abort();
        }
    }

    /// Stop periodic measurement and return to `Idle`.
    pub fn stop_auto_resizer(&self) {
        self.abort_task();
        self.shared.set_state(SizingState::Idle);
    }

    /// Push an explicit height. Suspends automatic measurement until
    /// [`start_auto_resizer`](Self::start_auto_resizer) is called again.
    pub async fn update_height(&self, px: u32) -> Result<()> {
        self.abort_task();
        self.shared.set_state(SizingState::ManualHeight);
        let height = clamp_height(px);
        self.channel.call("setHeight", vec![json!(height)]).await?;
        self.shared.set_last_height(height);
        Ok(())
    }

    /// Current sizing settings.
    pub fn get_settings(&self) -> FrameSettings {
        FrameSettings {
            state: self.shared.state(),
            height: self.shared.last_height(),
            interval_ms: self.interval.as_millis() as u64,
        }
    }

    fn abort_task(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

impl Drop for ResizeNegotiator {
    fn drop(&mut self) {
        self.abort_task();
    }
}

fn clamp_height(px: u32) -> u32 {
    px.clamp(MIN_FRAME_HEIGHT, MAX_FRAME_HEIGHT)
}
