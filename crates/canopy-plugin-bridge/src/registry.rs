//! Host-side registry of installed plugin frames.
//!
//! Tracks every connected plugin, its installation order (which drives
//! arbitration tie-breaks), and its lifecycle state:
//!
//! - **Ready** – handshake answered with the implemented hook names
//! - **Failed** – reported as misbehaving; excluded from hook fan-out
//! - **Closed** – frame torn down, all pending calls rejected
//!
//! A plugin that fails its handshake (bad response, protocol-major
//! mismatch) is closed and skipped; it never prevents other plugins from
//! connecting or serving hooks.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tracing::info;
use tracing::warn;

use crate::capabilities::ConnectRequest;
use crate::capabilities::ConnectResponse;
use crate::capabilities::HOOK_INVOCATION_DEADLINE;
use crate::capabilities::MAX_INSTALLED_PLUGINS;
use crate::capabilities::PROTOCOL_VERSION;
use crate::capabilities::is_host_method;
use crate::channel::Channel;
use crate::channel::ChannelConfig;
use crate::channel::FrameTransport;
use crate::channel::IncomingCalls;
use crate::dispatcher::PluginRuntime;
use crate::error::BridgeError;
use crate::error::Result;
use crate::wire::Envelope;

/// Application-provided backend for privileged host operations.
///
/// The bridge routes every capability call a plugin makes (dialogs,
/// navigation, data loading, notifications) to this trait, tagged with the
/// calling plugin's id so implementations can scope side effects.
#[async_trait::async_trait]
pub trait HostCapabilities: Send + Sync + 'static {
    async fn invoke(&self, plugin_id: &str, method: &str, args: Vec<Value>) -> Result<Option<Value>>;
}

/// Per-plugin incoming-call router on the host end of a channel.
///
/// Rejects methods outside the capability registry before the application
/// backend ever sees them.
struct HostCallRouter {
    plugin_id: String,
    capabilities: Arc<dyn HostCapabilities>,
}

#[async_trait::async_trait]
impl IncomingCalls for HostCallRouter {
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>> {
        if !is_host_method(method) {
            return Err(BridgeError::UnknownMethod(method.to_string()));
        }
        self.capabilities.invoke(&self.plugin_id, method, args).await
    }
}

/// Lifecycle state of one installed plugin.
///
/// A plugin only becomes visible to the registry once its handshake has
/// succeeded, so `Ready` is the initial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Ready,
    Failed,
    Closed,
}

/// The host's view of one connected plugin frame.
#[derive(Debug)]
pub struct InstalledPlugin {
    id: String,
    install_order: u32,
    channel: Arc<Channel>,
    implements: Vec<String>,
    /// Encoded as u8: 0=Ready, 1=Failed, 2=Closed.
    state: AtomicU8,
}

impl InstalledPlugin {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Position in installation order; unique, drives arbitration ties.
    pub fn install_order(&self) -> u32 {
        self.install_order
    }

    /// Hook names the plugin declared during the handshake.
    pub fn implements(&self) -> &[String] {
        &self.implements
    }

    pub fn implements_hook(&self, name: &str) -> bool {
        self.implements.iter().any(|h| h == name)
    }

    pub fn state(&self) -> PluginState {
        match self.state.load(Ordering::SeqCst) {
            0 => PluginState::Ready,
            1 => PluginState::Failed,
            _ => PluginState::Closed,
        }
    }

    fn set_state(&self, state: PluginState) {
        let value = match state {
            PluginState::Ready => 0,
            PluginState::Failed => 1,
            PluginState::Closed => 2,
        };
        self.state.store(value, Ordering::SeqCst);
    }

    pub(crate) fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Close the frame's channel, rejecting its pending calls.
    fn close(&self) {
        self.set_state(PluginState::Closed);
        self.channel.close();
    }
}

/// Registry of connected plugin frames plus the hook fan-out entry points.
///
/// Broken plugins are skipped, not fatal: one bad handshake or one hung
/// frame never takes the host down.
pub struct PluginHost {
    plugins: RwLock<Vec<Arc<InstalledPlugin>>>,
    capabilities: Arc<dyn HostCapabilities>,
    next_order: AtomicU32,
    channel_config: ChannelConfig,
    plugin_limit: usize,
    pub(crate) hook_deadline: Duration,
}

impl PluginHost {
    pub fn new(capabilities: Arc<dyn HostCapabilities>) -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
            capabilities,
            next_order: AtomicU32::new(0),
            channel_config: ChannelConfig::default(),
            plugin_limit: MAX_INSTALLED_PLUGINS,
            hook_deadline: HOOK_INVOCATION_DEADLINE,
        }
    }

    /// Override the per-plugin hook invocation deadline.
    pub fn with_hook_deadline(mut self, deadline: Duration) -> Self {
        self.hook_deadline = deadline;
        self
    }

    /// Override the cap on concurrently installed plugins.
    pub fn with_plugin_limit(mut self, limit: usize) -> Self {
        self.plugin_limit = limit;
        self
    }

    /// Override the channel configuration applied to new connections.
    pub fn with_channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    /// Connect a plugin frame over its raw transport.
    ///
    /// Spawns the host end of the channel, performs the `connect` handshake,
    /// and registers the plugin. Fails (for this plugin only) on handshake
    /// errors or a protocol-major mismatch.
    pub async fn connect_frame(
        &self,
        plugin_id: &str,
        transport: Arc<dyn FrameTransport>,
        incoming: mpsc::Receiver<Envelope>,
    ) -> anyhow::Result<Arc<InstalledPlugin>> {
        let router = Arc::new(HostCallRouter {
            plugin_id: plugin_id.to_string(),
            capabilities: Arc::clone(&self.capabilities),
        });
        let channel = Channel::spawn(transport, incoming, router, self.channel_config);
        self.register_channel(plugin_id, channel).await
    }

    /// Connect a same-process plugin runtime over an in-memory duplex.
    ///
    /// Wires a [`Channel::pair`], attaches the plugin end to the runtime so
    /// its contexts can call back into the host, and performs the handshake.
    pub async fn connect_local(
        &self,
        plugin_id: &str,
        runtime: Arc<PluginRuntime>,
    ) -> anyhow::Result<Arc<InstalledPlugin>> {
        let router = Arc::new(HostCallRouter {
            plugin_id: plugin_id.to_string(),
            capabilities: Arc::clone(&self.capabilities),
        });
        let (host_end, plugin_end) = Channel::pair(router, runtime.clone(), self.channel_config);
        runtime.attach(plugin_end);
        self.register_channel(plugin_id, host_end).await
    }

    /// Handshake with the plugin behind `channel` and register it.
    async fn register_channel(&self, plugin_id: &str, channel: Arc<Channel>) -> anyhow::Result<Arc<InstalledPlugin>> {
        // One frame per plugin id: reconnecting replaces the old frame.
        self.teardown(plugin_id).await;

        // Fast-path limit check; the handshake below awaits, so the bound is
        // re-validated under the write lock at insertion.
        if self.plugins.read().await.len() >= self.plugin_limit {
            channel.close();
            anyhow::bail!("plugin limit reached: cannot install more than {} plugins", self.plugin_limit);
        }

        let request = ConnectRequest {
            protocol_version: PROTOCOL_VERSION,
            settings: Value::Null,
        };
        let response = channel.call("connect", vec![serde_json::to_value(&request)?]).await;
        let response: ConnectResponse = match response {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(response) => response,
                Err(e) => {
                    channel.close();
                    anyhow::bail!("plugin '{plugin_id}' sent an invalid connect response: {e}");
                }
            },
            Ok(None) => {
                channel.close();
                anyhow::bail!("plugin '{plugin_id}' sent an empty connect response");
            }
            Err(e) => {
                channel.close();
                anyhow::bail!("plugin '{plugin_id}' failed the connect handshake: {e}");
            }
        };

        if !PROTOCOL_VERSION.compatible_with(&response.protocol_version) {
            channel.close();
            anyhow::bail!(
                "plugin '{plugin_id}' speaks protocol {}.{}, host speaks {}.{}",
                response.protocol_version.major,
                response.protocol_version.minor,
                PROTOCOL_VERSION.major,
                PROTOCOL_VERSION.minor
            );
        }

        let plugin = Arc::new(InstalledPlugin {
            id: plugin_id.to_string(),
            install_order: self.next_order.fetch_add(1, Ordering::Relaxed),
            channel,
            implements: response.implements,
            state: AtomicU8::new(0), // Ready
        });

        {
            let mut plugins = self.plugins.write().await;
            // Another connect may have filled the registry while this one
            // was handshaking; the bound holds under the write lock.
            if plugins.len() >= self.plugin_limit {
                plugin.close();
                anyhow::bail!("plugin limit reached: cannot install more than {} plugins", self.plugin_limit);
            }
            plugins.push(Arc::clone(&plugin));
        }

        info!(
            plugin = %plugin_id,
            install_order = plugin.install_order,
            implements = ?plugin.implements,
            "plugin connected"
        );

        Ok(plugin)
    }

    /// Tear down one plugin: close its channel and remove it.
    ///
    /// Returns `true` if the plugin was connected. Idempotent.
    pub async fn teardown(&self, plugin_id: &str) -> bool {
        let mut plugins = self.plugins.write().await;
        let before = plugins.len();
        plugins.retain(|p| {
            if p.id == plugin_id {
                info!(plugin = %plugin_id, "tearing down plugin frame");
                p.close();
                false
            } else {
                true
            }
        });
        before != plugins.len()
    }

    /// Tear down every connected plugin.
    pub async fn shutdown_all(&self) {
        let mut plugins = self.plugins.write().await;
        for plugin in plugins.drain(..) {
            info!(plugin = %plugin.id, "shutting down plugin frame");
            plugin.close();
        }
    }

    /// Look up a connected plugin by id.
    pub async fn plugin(&self, plugin_id: &str) -> Option<Arc<InstalledPlugin>> {
        self.plugins.read().await.iter().find(|p| p.id == plugin_id).cloned()
    }

    /// Snapshot of plugins currently able to serve hooks, in install order.
    pub(crate) async fn ready_snapshot(&self) -> Vec<Arc<InstalledPlugin>> {
        self.plugins.read().await.iter().filter(|p| p.state() == PluginState::Ready).cloned().collect()
    }

    /// Number of connected plugins.
    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    /// Whether any plugins are connected.
    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }

    /// Report a plugin as misbehaving without tearing it down.
    pub async fn mark_failed(&self, plugin_id: &str) {
        if let Some(plugin) = self.plugin(plugin_id).await {
            warn!(plugin = %plugin_id, "marking plugin as failed");
            plugin.set_state(PluginState::Failed);
        }
    }
}
