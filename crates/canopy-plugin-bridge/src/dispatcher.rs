//! Plugin-side hook dispatch: registration, invocation, fault isolation.
//!
//! A [`HookDispatcher`] maps hook names to registered [`HookHandler`]s.
//! Dispatch rules:
//!
//! - no handler registered → `None` ("no opinion"), a valid answer, not an
//!   error — this is what keeps the hook catalog forward-compatible;
//! - handler returns an error or panics → logged, `None`, and the dispatch
//!   loop keeps serving subsequent invocations;
//! - handler returns a value whose shape fails validation → logged, `None`.
//!
//! [`PluginRuntime`] is the channel-facing endpoint: it answers the host's
//! `connect` handshake and routes `invokeHook` calls through context
//! assembly into the dispatcher.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;

use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::capabilities::ConnectRequest;
use crate::capabilities::ConnectResponse;
use crate::capabilities::Mode;
use crate::capabilities::PROTOCOL_VERSION;
use crate::channel::Channel;
use crate::channel::IncomingCalls;
use crate::context::BaseProperties;
use crate::context::Context;
use crate::context::HostMethods;
use crate::context::build_context;
use crate::error::BridgeError;
use crate::error::Result;
use crate::validate::return_shape;

/// A plugin's implementation of one hook.
///
/// Handlers may be fully synchronous inside the async body; the dispatcher
/// always awaits. `Ok(None)` means "no opinion".
#[async_trait::async_trait]
pub trait HookHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: Context, args: Vec<Value>) -> anyhow::Result<Option<Value>>;
}

/// Adapter turning an async closure into a [`HookHandler`].
pub struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> HookHandler for FnHandler<F>
where
    F: Fn(Context, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
{
    async fn handle(&self, ctx: Context, args: Vec<Value>) -> anyhow::Result<Option<Value>> {
        (self.0)(ctx, args).await
    }
}

/// Registry of hook handlers for one plugin.
#[derive(Default)]
pub struct HookDispatcher {
    handlers: HashMap<String, Arc<dyn HookHandler>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a hook name. Replaces any previous handler.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn HookHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Register an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Context, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler(f)));
    }

    /// Hook names this plugin implements, sorted for a stable handshake.
    pub fn implemented(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke the handler registered for `name`, if any.
    ///
    /// Never fails: every fault degrades to `None` so one hook cannot block
    /// the dispatch loop for the next.
    pub async fn dispatch(&self, name: &str, ctx: Context, args: Vec<Value>) -> Option<Value> {
        let Some(handler) = self.handlers.get(name) else {
            debug!(hook = name, "no handler registered, no opinion");
            return None;
        };

        let mode = ctx.mode;
        let handler = Arc::clone(handler);
        // Run on a separate task so a panicking handler surfaces as a
        // JoinError here instead of unwinding through the dispatch loop.
        let joined = tokio::spawn(async move { handler.handle(ctx, args).await }).await;
        let value = match joined {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(hook = name, error = %e, "hook handler faulted");
                return None;
            }
            Err(e) => {
                warn!(hook = name, error = %e, "hook handler panicked");
                return None;
            }
        };

        match (value, return_shape(mode)) {
            (Some(value), Some(shape)) if !shape.validate(&value) => {
                warn!(hook = name, "hook answer failed shape validation, dropping");
                None
            }
            (value, _) => value,
        }
    }
}

/// The plugin frame's channel endpoint.
///
/// Serves the host's `connect` handshake and `invokeHook` dispatch calls.
/// Construct with [`PluginRuntime::new`], spawn the channel with it as the
/// incoming-call handler, then [`attach`](PluginRuntime::attach) the channel
/// so contexts can proxy privileged calls back to the host.
pub struct PluginRuntime {
    dispatcher: Arc<HookDispatcher>,
    methods: OnceLock<HostMethods>,
}

impl PluginRuntime {
    pub fn new(dispatcher: Arc<HookDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            methods: OnceLock::new(),
        })
    }

    /// Wire the channel in after spawning. Idempotent on first call only.
    pub fn attach(&self, channel: Arc<Channel>) {
        let _ = self.methods.set(HostMethods::new(channel));
    }

    /// Host methods proxy, once attached. Plugin code uses this for
    /// privileged calls outside any hook invocation (e.g. frame sizing).
    pub fn host_methods(&self) -> Option<&HostMethods> {
        self.methods.get()
    }

    fn answer_connect(&self, args: &[Value]) -> Result<Option<Value>> {
        let request: ConnectRequest = match args.first() {
            Some(v) => serde_json::from_value(v.clone())?,
            None => ConnectRequest::default(),
        };
        debug!(
            host_major = request.protocol_version.major,
            host_minor = request.protocol_version.minor,
            "connect handshake received"
        );
        let response = ConnectResponse {
            protocol_version: PROTOCOL_VERSION,
            implements: self.dispatcher.implemented(),
        };
        Ok(Some(serde_json::to_value(response)?))
    }

    async fn answer_invoke(&self, mut args: Vec<Value>) -> Result<Option<Value>> {
        if args.len() < 2 {
            return Err(BridgeError::Remote("invokeHook requires [name, payload, args]".to_string()));
        }
        let hook_args: Vec<Value> = match args.get(2) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let payload = args.remove(1);
        let name = match args.first().and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => return Err(BridgeError::Remote("invokeHook name must be a string".to_string())),
        };

        // Unknown mode is a protocol mismatch: fail this call fast, do not
        // silently answer "no opinion".
        let mode = Mode::parse(&name)?;
        let base: BaseProperties = sub_value(&payload, "base")?;
        let methods = self.methods.get().cloned().ok_or(BridgeError::ChannelClosed)?;
        let ctx = build_context(mode, base, methods, &payload)?;

        Ok(self.dispatcher.dispatch(&name, ctx, hook_args).await)
    }
}

fn sub_value<T>(payload: &Value, key: &str) -> Result<T>
where
    T: for<'de> serde::Deserialize<'de> + Default,
{
    match payload.get(key) {
        Some(v) if !v.is_null() => Ok(serde_json::from_value(v.clone())?),
        _ => Ok(T::default()),
    }
}

#[async_trait::async_trait]
impl IncomingCalls for PluginRuntime {
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Option<Value>> {
        match method {
            "connect" => self.answer_connect(&args),
            "invokeHook" => self.answer_invoke(args).await,
            other => Err(BridgeError::UnknownMethod(other.to_string())),
        }
    }
}
