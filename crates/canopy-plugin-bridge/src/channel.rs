//! Request/response-correlated message channel between host and plugin frame.
//!
//! One [`Channel`] wraps one direction-agnostic framed transport. Outbound
//! calls get a fresh correlation id and park a oneshot reply sender in the
//! pending-call map; a pump task routes every incoming frame either to the
//! matching pending call (results and errors) or to the registered
//! [`IncomingCalls`] handler (calls from the other side).
//!
//! ## Ordering
//!
//! The underlying transport is best-effort ordered at most. Matching is done
//! solely by correlation id, so responses may arrive in any order; a response
//! whose id is unknown (late arrival after a timeout) is logged and dropped.
//!
//! ## Deadlines and teardown
//!
//! Every call carries a wall-clock deadline. On expiry the pending entry is
//! removed and the caller gets [`BridgeError::Timeout`]. Closing the channel
//! (explicitly or because the frame went away) rejects every pending call
//! uniformly with [`BridgeError::ChannelClosed`] without touching unrelated
//! channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use crate::capabilities::DEFAULT_CALL_DEADLINE;
use crate::error::BridgeError;
use crate::error::Result;
use crate::wire::CorrelationIds;
use crate::wire::Envelope;
use crate::wire::Payload;

/// Frame buffer size for the in-memory duplex used by [`Channel::pair`].
const PAIR_FRAME_BUFFER: usize = 64;

/// One direction of the underlying framed transport.
#[async_trait::async_trait]
pub trait FrameTransport: Send + Sync + 'static {
    /// Push one envelope toward the other side.
    async fn send(&self, frame: Envelope) -> Result<()>;
}

/// Handler for calls arriving from the other side of the channel.
///
/// Returning `Ok(None)` means the call succeeded with no value ("no
/// opinion"). Returning an error produces an error envelope; in particular
/// [`BridgeError::UnknownMethod`] is the required answer for methods outside
/// the capability registry.
#[async_trait::async_trait]
pub trait IncomingCalls: Send + Sync + 'static {
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>>;
}

/// Channel tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Deadline applied to each outbound call.
    pub call_deadline: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            call_deadline: DEFAULT_CALL_DEADLINE,
        }
    }
}

type CallReply = Result<Option<Value>>;

/// State shared between the caller-facing API and the pump task.
struct Inner {
    transport: Arc<dyn FrameTransport>,
    /// In-flight calls keyed by correlation id.
    pending: Mutex<HashMap<u64, oneshot::Sender<CallReply>>>,
    closed: AtomicBool,
}

impl Inner {
    fn pending_lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<CallReply>>> {
        // A poisoned map only means a panicking thread held the guard over a
        // single insert/remove; the map itself is still consistent.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route a response to its pending call, if still pending.
    fn resolve(&self, id: u64, outcome: CallReply) {
        let sender = self.pending_lock().remove(&id);
        match sender {
            Some(tx) => {
                // Receiver may have gone away (caller cancelled); fine.
                let _ = tx.send(outcome);
            }
            None => {
                debug!(id, "response for unknown or expired correlation id, dropping");
            }
        }
    }

    /// Reject every pending call with `ChannelClosed`.
    fn reject_all(&self) {
        let mut pending = self.pending_lock();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(BridgeError::ChannelClosed));
        }
    }
}

/// A bidirectional, correlation-matched RPC channel over one frame transport.
pub struct Channel {
    inner: Arc<Inner>,
    ids: CorrelationIds,
    deadline: Duration,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

impl Channel {
    /// Spawn a channel over `transport`, routing frames arriving on
    /// `incoming` and serving calls from the other side with `handler`.
    pub fn spawn(
        transport: Arc<dyn FrameTransport>,
        incoming: mpsc::Receiver<Envelope>,
        handler: Arc<dyn IncomingCalls>,
        config: ChannelConfig,
    ) -> Arc<Self> {
        let inner = Arc::new(Inner {
            transport,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let pump = tokio::spawn(pump_loop(Arc::clone(&inner), incoming, handler));
        Arc::new(Self {
            inner,
            ids: CorrelationIds::new(),
            deadline: config.call_deadline,
            pump: Mutex::new(Some(pump)),
        })
    }

    /// Build an in-memory duplex pair of channels, one per side.
    ///
    /// The left channel's outbound frames arrive at the right channel and
    /// vice versa. Used for same-process plugin frames and throughout the
    /// test suite.
    pub fn pair(
        left_handler: Arc<dyn IncomingCalls>,
        right_handler: Arc<dyn IncomingCalls>,
        config: ChannelConfig,
    ) -> (Arc<Self>, Arc<Self>) {
        let (to_right_tx, to_right_rx) = mpsc::channel(PAIR_FRAME_BUFFER);
        let (to_left_tx, to_left_rx) = mpsc::channel(PAIR_FRAME_BUFFER);
        let left = Channel::spawn(Arc::new(MpscTransport(to_right_tx)), to_left_rx, left_handler, config);
        let right = Channel::spawn(Arc::new(MpscTransport(to_left_tx)), to_right_rx, right_handler, config);
        (left, right)
    }

    /// Issue a call and await the correlated response.
    ///
    /// Fails with [`BridgeError::Timeout`] when no response arrives within
    /// the configured deadline, and with [`BridgeError::ChannelClosed`] when
    /// the channel is torn down while the call is in flight.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>> {
        if self.is_closed() {
            return Err(BridgeError::ChannelClosed);
        }

        let id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.inner.pending_lock().insert(id, tx);

        if let Err(e) = self.inner.transport.send(Envelope::call(id, method, args)).await {
            self.inner.pending_lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without a reply: channel torn down mid-call.
            Ok(Err(_)) => Err(BridgeError::ChannelClosed),
            Err(_) => {
                self.inner.pending_lock().remove(&id);
                warn!(
                    method,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "call exceeded deadline"
                );
                Err(BridgeError::Timeout {
                    method: method.to_string(),
                    deadline: self.deadline,
                })
            }
        }
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Tear the channel down: stop the pump and reject all pending calls.
    ///
    /// Idempotent. Rejection is uniform (`ChannelClosed`) and never throws
    /// into unrelated channels.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.inner.reject_all();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Route incoming frames until the transport side goes away.
async fn pump_loop(inner: Arc<Inner>, mut incoming: mpsc::Receiver<Envelope>, handler: Arc<dyn IncomingCalls>) {
    while let Some(frame) = incoming.recv().await {
        match frame.payload {
            Payload::Result { value } => inner.resolve(frame.id, Ok(value)),
            Payload::Error { error } => inner.resolve(frame.id, Err(BridgeError::from_wire(error))),
            Payload::Call { method, args } => {
                // Serve each incoming call on its own task so a slow handler
                // cannot stall response routing for concurrent calls.
                let inner = Arc::clone(&inner);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let payload = match handler.handle(&method, args).await {
                        Ok(value) => Payload::Result { value },
                        Err(e) => {
                            debug!(method = %method, error = %e, "incoming call failed");
                            Payload::Error { error: e.to_wire() }
                        }
                    };
                    if let Err(e) = inner.transport.send(Envelope {
                        id: frame.id,
                        payload,
                    })
                    .await
                    {
                        debug!(error = %e, "failed to send response frame");
                    }
                });
            }
        }
    }
    // Frame source gone: the other side was torn down mid-call.
    inner.closed.store(true, Ordering::SeqCst);
    inner.reject_all();
}

/// Frame transport over an in-process mpsc sender.
struct MpscTransport(mpsc::Sender<Envelope>);

#[async_trait::async_trait]
impl FrameTransport for MpscTransport {
    async fn send(&self, frame: Envelope) -> Result<()> {
        self.0.send(frame).await.map_err(|_| BridgeError::ChannelClosed)
    }
}
