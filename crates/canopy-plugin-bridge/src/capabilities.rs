//! Capability registry: the enumerable surface shared by host and plugin.
//!
//! Two static catalogs live here. [`HOOKS`] lists every hook a plugin may
//! implement, each with its context [`Mode`] and the [`ResultPolicy`] the
//! host applies when several plugins answer. [`HOST_METHODS`] lists every
//! privileged RPC method a plugin may call on the host.
//!
//! Both catalogs are append-only: adding a hook or method must never break
//! plugins unaware of it, because the dispatcher answers "no opinion" for
//! hooks a plugin did not register and the host rejects unknown methods
//! per call, not per connection.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::BridgeError;
use crate::error::Result;

/// Default deadline for a single RPC call over the channel.
pub const DEFAULT_CALL_DEADLINE: Duration = Duration::from_secs(30);

/// Tighter per-plugin deadline the broker applies to one hook invocation,
/// so a single unresponsive frame cannot stall a menu or a save.
pub const HOOK_INVOCATION_DEADLINE: Duration = Duration::from_secs(10);

/// Interval between automatic content-height measurements.
pub const AUTO_RESIZE_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on concurrently installed plugin frames.
pub const MAX_INSTALLED_PLUGINS: usize = 64;

/// Frame heights pushed to the host are clamped into this range (px).
pub const MIN_FRAME_HEIGHT: u32 = 30;
pub const MAX_FRAME_HEIGHT: u32 = 8_000;

/// Protocol version exchanged during the connect handshake.
///
/// A major mismatch fails the connect for that plugin only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

/// The version this build of the bridge speaks.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

impl ProtocolVersion {
    /// Whether a peer with version `other` can be served by this build.
    pub fn compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}

/// First message of the connect handshake, host → plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    /// Host-chosen frame settings, opaque to the bridge.
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Handshake answer, plugin → host: the hooks this plugin implements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub implements: Vec<String>,
}

/// Tag selecting which additive context layer a hook invocation uses.
///
/// Exactly one mode per hook name. Parsing an unrecognized name fails fast
/// with [`BridgeError::UnknownMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    OnBoot,
    RenderConfigScreen,
    RenderFieldExtension,
    RenderItemFormSidebarPanel,
    RenderModal,
    RenderPage,
    ItemsDropdownActions,
    ExecuteItemsDropdownAction,
    FieldDropdownActions,
    ExecuteFieldDropdownAction,
    BuildItemPresentationInfo,
    InitialLocationQueryForItemSelector,
    AssetSources,
    MainNavigationTabs,
}

impl Mode {
    /// Parse a hook name into its mode.
    pub fn parse(name: &str) -> Result<Mode> {
        hook_descriptor(name).map(|d| d.mode).ok_or_else(|| BridgeError::UnknownMode(name.to_string()))
    }

    /// The hook name this mode belongs to.
    pub fn hook_name(self) -> &'static str {
        // The catalog is the single source of truth; every Mode appears in it.
        HOOKS.iter().find(|d| d.mode == self).map(|d| d.name).unwrap_or("unknown")
    }
}

/// How the arbitrator treats answers when several plugins implement a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultPolicy {
    /// Return value is ignored (render and execute hooks).
    None,
    /// Lowest rank wins; ties broken by installation order.
    SingleWinner,
    /// All valid results are concatenated and rank-sorted.
    Collection,
}

/// Static description of one hook kind. Defined once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookDescriptor {
    /// Hook name as it appears on the wire and in plugin registrations.
    pub name: &'static str,
    /// Context mode selecting the additive layer.
    pub mode: Mode,
    /// Arbitration policy for multi-plugin answers.
    pub result: ResultPolicy,
}

/// The fixed hook catalog. Append-only across protocol minor versions.
pub const HOOKS: &[HookDescriptor] = &[
    HookDescriptor {
        name: "onBoot",
        mode: Mode::OnBoot,
        result: ResultPolicy::None,
    },
    HookDescriptor {
        name: "renderConfigScreen",
        mode: Mode::RenderConfigScreen,
        result: ResultPolicy::None,
    },
    HookDescriptor {
        name: "renderFieldExtension",
        mode: Mode::RenderFieldExtension,
        result: ResultPolicy::None,
    },
    HookDescriptor {
        name: "renderItemFormSidebarPanel",
        mode: Mode::RenderItemFormSidebarPanel,
        result: ResultPolicy::None,
    },
    HookDescriptor {
        name: "renderModal",
        mode: Mode::RenderModal,
        result: ResultPolicy::None,
    },
    HookDescriptor {
        name: "renderPage",
        mode: Mode::RenderPage,
        result: ResultPolicy::None,
    },
    HookDescriptor {
        name: "itemsDropdownActions",
        mode: Mode::ItemsDropdownActions,
        result: ResultPolicy::Collection,
    },
    HookDescriptor {
        name: "executeItemsDropdownAction",
        mode: Mode::ExecuteItemsDropdownAction,
        result: ResultPolicy::None,
    },
    HookDescriptor {
        name: "fieldDropdownActions",
        mode: Mode::FieldDropdownActions,
        result: ResultPolicy::Collection,
    },
    HookDescriptor {
        name: "executeFieldDropdownAction",
        mode: Mode::ExecuteFieldDropdownAction,
        result: ResultPolicy::None,
    },
    HookDescriptor {
        name: "buildItemPresentationInfo",
        mode: Mode::BuildItemPresentationInfo,
        result: ResultPolicy::SingleWinner,
    },
    HookDescriptor {
        name: "initialLocationQueryForItemSelector",
        mode: Mode::InitialLocationQueryForItemSelector,
        result: ResultPolicy::SingleWinner,
    },
    HookDescriptor {
        name: "assetSources",
        mode: Mode::AssetSources,
        result: ResultPolicy::Collection,
    },
    HookDescriptor {
        name: "mainNavigationTabs",
        mode: Mode::MainNavigationTabs,
        result: ResultPolicy::Collection,
    },
];

/// Look up a hook descriptor by name.
pub fn hook_descriptor(name: &str) -> Option<&'static HookDescriptor> {
    HOOKS.iter().find(|d| d.name == name)
}

/// Privileged host operations a plugin may call over the channel.
///
/// Frame-sizing methods (`setHeight`, `getSettings`) and the bridge-internal
/// `connect`/`invokeHook` pair are part of this surface too: the host routes
/// anything not listed here to an `UnknownMethod` error envelope.
pub const HOST_METHODS: &[&str] = &[
    "notice",
    "alert",
    "openModal",
    "openConfirm",
    "selectItem",
    "selectUpload",
    "navigateTo",
    "loadItemTypeFields",
    "loadItemTypeFieldsets",
    "loadUsers",
    "updatePluginParameters",
    "cmaClientToken",
    "setHeight",
    "getSettings",
];

/// Whether `name` is a privileged host method a plugin may call.
pub fn is_host_method(name: &str) -> bool {
    HOST_METHODS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_hook_name_parses_to_its_own_mode() {
        for descriptor in HOOKS {
            let mode = Mode::parse(descriptor.name).expect("catalog name must parse");
            assert_eq!(mode, descriptor.mode);
            assert_eq!(mode.hook_name(), descriptor.name);
        }
    }

    #[test]
    fn unknown_hook_name_fails_fast() {
        let err = Mode::parse("renderHologram").expect_err("must not parse");
        assert!(matches!(err, BridgeError::UnknownMode(name) if name == "renderHologram"));
    }

    #[test]
    fn hook_names_are_unique() {
        for (i, a) in HOOKS.iter().enumerate() {
            for b in &HOOKS[i + 1..] {
                assert_ne!(a.name, b.name, "duplicate hook name in catalog");
            }
        }
    }

    #[test]
    fn host_method_lookup() {
        assert!(is_host_method("notice"));
        assert!(is_host_method("setHeight"));
        assert!(!is_host_method("dropTables"));
    }

    #[test]
    fn protocol_compatibility_is_major_only() {
        let peer = ProtocolVersion { major: 1, minor: 7 };
        assert!(PROTOCOL_VERSION.compatible_with(&peer));
        let next = ProtocolVersion { major: 2, minor: 0 };
        assert!(!PROTOCOL_VERSION.compatible_with(&next));
    }
}
