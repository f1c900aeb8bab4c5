//! Hook dispatch and context bridge between a CMS host and its plugin frames.
//!
//! Plugins run in isolated frames and talk to the host over a framed,
//! correlation-matched message channel. This crate provides both ends:
//!
//! - the **host side** ([`PluginHost`]) connects frames, fans hook
//!   invocations out to every plugin implementing them, and arbitrates the
//!   answers — lowest rank wins for single-result hooks, merged and
//!   rank-sorted for collection hooks;
//! - the **plugin side** ([`PluginRuntime`], [`HookDispatcher`]) answers the
//!   connect handshake, assembles per-invocation contexts from the base
//!   properties plus the mode's additive layer, and dispatches into
//!   registered handlers with full fault isolation.
//!
//! ## Invocation Flow
//!
//! 1. `PluginHost::connect_frame` (or `connect_local`) spawns the channel
//!    and performs the `connect` handshake
//! 2. The plugin answers with the hook names it implements
//! 3. `PluginHost::broadcast` sends `invokeHook` to every implementing
//!    plugin, each under its own deadline
//! 4. The plugin runtime builds a [`Context`] (base properties, host method
//!    proxies, additive layer for the hook's mode) and dispatches
//! 5. Answers are shape-validated on both sides, then arbitrated into one
//!    [`HookOutcome`]
//!
//! A broken plugin — hung, panicking, ill-shaped, protocol-mismatched — is
//! logged and skipped; it never takes down the host or its siblings.

pub mod arbiter;
pub mod broker;
pub mod capabilities;
pub mod channel;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod registry;
pub mod validate;
pub mod wire;

pub use broker::HookOutcome;
pub use capabilities::HookDescriptor;
pub use capabilities::Mode;
pub use capabilities::ResultPolicy;
pub use channel::Channel;
pub use channel::ChannelConfig;
pub use channel::FrameTransport;
pub use channel::IncomingCalls;
pub use context::BaseProperties;
pub use context::Context;
pub use context::HostMethods;
pub use dispatcher::HookDispatcher;
pub use dispatcher::HookHandler;
pub use dispatcher::PluginRuntime;
pub use error::BridgeError;
pub use error::Result;
pub use frame::ContentMeasurer;
pub use frame::ResizeNegotiator;
pub use registry::HostCapabilities;
pub use registry::InstalledPlugin;
pub use registry::PluginHost;
pub use registry::PluginState;
