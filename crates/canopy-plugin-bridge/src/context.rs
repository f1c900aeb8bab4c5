//! Per-invocation context assembly: Base layer plus one mode's additive layer.
//!
//! Every hook invocation receives a [`Context`] composed of:
//!
//! 1. [`BaseProperties`] — an immutable snapshot of host state valid at call
//!    time (plugin config, current user, site, theme, locale, and the
//!    in-memory repositories of item types, fields, and users);
//! 2. [`HostMethods`] — asynchronous proxies for privileged host operations,
//!    each an RPC call over the channel;
//! 3. exactly one [`AdditiveLayer`] selected by the invocation's [`Mode`],
//!    itself composed of named sub-layers (item-form modes carry both an
//!    item-form and a field layer).
//!
//! Contexts are created fresh per invocation and never shared across
//! invocations. Building one performs no host-side mutation; an unrecognized
//! mode fails fast with `UnknownMode` (protocol version mismatch).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::capabilities::Mode;
use crate::channel::Channel;
use crate::error::BridgeError;
use crate::error::Result;

/// Identity and configuration of the plugin the context is built for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSnapshot {
    pub id: String,
    pub name: String,
    /// Plugin-scoped configuration parameters, opaque to the bridge.
    #[serde(default)]
    pub parameters: Value,
}

/// Host UI theme colors, passed through to plugin-rendered surfaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub primary_color: String,
    pub accent_color: String,
    pub semi_transparent_accent_color: String,
    pub light_color: String,
    pub dark_color: String,
}

/// The Base layer shared by every hook: value snapshots of host state.
///
/// Entity repositories are opaque read-only snapshots keyed by id. Staleness
/// is by design; callers re-fetch through [`HostMethods`] when freshness
/// matters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseProperties {
    pub plugin: PluginSnapshot,
    #[serde(default)]
    pub current_user: Value,
    #[serde(default)]
    pub site: Value,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub ui_locale: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub item_types: BTreeMap<String, Value>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub users: BTreeMap<String, Value>,
}

/// Sub-layer carried by every item-form-related mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFormLayer {
    #[serde(default)]
    pub item: Value,
    #[serde(default)]
    pub item_type: Value,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub item_status: String,
}

/// Sub-layer carried by field-level modes, on top of [`ItemFormLayer`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldLayer {
    #[serde(default)]
    pub field: Value,
    #[serde(default)]
    pub field_path: String,
    #[serde(default)]
    pub parent_field: Option<Value>,
    #[serde(default)]
    pub disabled: bool,
}

/// Sub-layer for modal rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalLayer {
    pub modal_id: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Sub-layer for full-page rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLayer {
    pub page_id: String,
    #[serde(default)]
    pub location: Value,
}

/// Sub-layer for item-selection dropdown hooks: the items the menu applies to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionLayer {
    #[serde(default)]
    pub selected_items: Vec<Value>,
}

/// The additive layer for one mode. Exactly one variant per invocation;
/// never a mix of two modes.
#[derive(Debug, Clone, PartialEq)]
pub enum AdditiveLayer {
    /// Modes with no additive properties (boot, config screen, catalog-wide
    /// query hooks).
    None,
    /// Field-level modes: item form plus field sub-layers.
    FieldExtension {
        item_form: ItemFormLayer,
        field: FieldLayer,
    },
    /// Item-form sidebar panels: item form sub-layer only.
    SidebarPanel { item_form: ItemFormLayer },
    Modal(ModalLayer),
    Page(PageLayer),
    /// Item dropdown hooks: the current selection.
    ItemsSelection(SelectionLayer),
}

/// Asynchronous proxies for privileged host operations.
///
/// Every method is an RPC call over the transport channel; none touches
/// local state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HostMethods {
    channel: Arc<Channel>,
}

impl HostMethods {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self { channel }
    }

    /// Show a transient success notification in the host UI.
    pub async fn notice(&self, message: &str) -> Result<()> {
        self.channel.call("notice", vec![Value::String(message.to_string())]).await.map(|_| ())
    }

    /// Show a transient error notification in the host UI.
    pub async fn alert(&self, message: &str) -> Result<()> {
        self.channel.call("alert", vec![Value::String(message.to_string())]).await.map(|_| ())
    }

    /// Open a modal and await its result (`None` if dismissed).
    pub async fn open_modal(&self, options: Value) -> Result<Option<Value>> {
        self.channel.call("openModal", vec![options]).await
    }

    /// Open a confirmation dialog and await the chosen option.
    pub async fn open_confirm(&self, options: Value) -> Result<Option<Value>> {
        self.channel.call("openConfirm", vec![options]).await
    }

    /// Open the item selector for an item type; `None` if cancelled.
    pub async fn select_item(&self, item_type_id: &str, options: Value) -> Result<Option<Value>> {
        self.channel.call("selectItem", vec![Value::String(item_type_id.to_string()), options]).await
    }

    /// Open the upload selector; `None` if cancelled.
    pub async fn select_upload(&self, options: Value) -> Result<Option<Value>> {
        self.channel.call("selectUpload", vec![options]).await
    }

    /// Navigate the host application to `path`.
    pub async fn navigate_to(&self, path: &str) -> Result<()> {
        self.channel.call("navigateTo", vec![Value::String(path.to_string())]).await.map(|_| ())
    }

    /// Load the current fields of an item type, bypassing the snapshot.
    pub async fn load_item_type_fields(&self, item_type_id: &str) -> Result<Vec<Value>> {
        let value = self.channel.call("loadItemTypeFields", vec![Value::String(item_type_id.to_string())]).await?;
        decode_list(value)
    }

    /// Load the fieldsets of an item type.
    pub async fn load_item_type_fieldsets(&self, item_type_id: &str) -> Result<Vec<Value>> {
        let value =
            self.channel.call("loadItemTypeFieldsets", vec![Value::String(item_type_id.to_string())]).await?;
        decode_list(value)
    }

    /// Load the current collaborator list, bypassing the snapshot.
    pub async fn load_users(&self) -> Result<Vec<Value>> {
        let value = self.channel.call("loadUsers", vec![]).await?;
        decode_list(value)
    }

    /// Persist new plugin-scoped configuration parameters.
    pub async fn update_plugin_parameters(&self, parameters: Value) -> Result<()> {
        self.channel.call("updatePluginParameters", vec![parameters]).await.map(|_| ())
    }

    /// Obtain an access token for building a content-management API client.
    ///
    /// The client itself is a host capability, not part of the bridge; the
    /// token is the reachable handle every context must expose.
    pub async fn cma_client_token(&self) -> Result<String> {
        let value = self.channel.call("cmaClientToken", vec![]).await?;
        match value {
            Some(Value::String(token)) => Ok(token),
            other => Err(BridgeError::Remote(format!("cmaClientToken returned non-string value: {other:?}"))),
        }
    }

    /// The underlying channel, for bridge-internal callers (frame sizing).
    pub(crate) fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }
}

fn decode_list(value: Option<Value>) -> Result<Vec<Value>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => Ok(serde_json::from_value(v)?),
    }
}

/// The per-invocation bundle handed to a hook handler.
///
/// Owned exclusively by the single invocation; discarded afterwards.
#[derive(Debug, Clone)]
pub struct Context {
    pub mode: Mode,
    pub properties: BaseProperties,
    pub methods: HostMethods,
    pub additive: AdditiveLayer,
}

/// Build a context for `mode` from the invocation's base snapshot and
/// mode-specific payload.
///
/// Pure read-and-proxy composition: no host mutation happens here. Fails
/// with `UnknownMode` upstream (mode is already parsed) or `Codec` when the
/// payload does not carry the sub-layers the mode requires.
pub fn build_context(mode: Mode, properties: BaseProperties, methods: HostMethods, payload: &Value) -> Result<Context> {
    let additive = additive_for(mode, payload)?;
    Ok(Context {
        mode,
        properties,
        methods,
        additive,
    })
}

/// Decode the additive layer for `mode` out of the invocation payload.
fn additive_for(mode: Mode, payload: &Value) -> Result<AdditiveLayer> {
    let layer = match mode {
        Mode::OnBoot
        | Mode::RenderConfigScreen
        | Mode::BuildItemPresentationInfo
        | Mode::InitialLocationQueryForItemSelector
        | Mode::AssetSources
        | Mode::MainNavigationTabs => AdditiveLayer::None,
        Mode::RenderFieldExtension | Mode::FieldDropdownActions | Mode::ExecuteFieldDropdownAction => {
            AdditiveLayer::FieldExtension {
                item_form: sub_layer(payload, "itemForm")?,
                field: sub_layer(payload, "field")?,
            }
        }
        Mode::RenderItemFormSidebarPanel => AdditiveLayer::SidebarPanel {
            item_form: sub_layer(payload, "itemForm")?,
        },
        Mode::RenderModal => AdditiveLayer::Modal(sub_layer(payload, "modal")?),
        Mode::RenderPage => AdditiveLayer::Page(sub_layer(payload, "page")?),
        Mode::ItemsDropdownActions | Mode::ExecuteItemsDropdownAction => {
            AdditiveLayer::ItemsSelection(sub_layer(payload, "selection")?)
        }
    };
    Ok(layer)
}

/// Deserialize one named sub-layer from the payload object.
fn sub_layer<T>(payload: &Value, key: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let section = payload.get(key).cloned().unwrap_or(Value::Null);
    if section.is_null() {
        // Tolerate a missing section only if the layer can default.
        return serde_json::from_value(Value::Object(serde_json::Map::new())).map_err(BridgeError::from);
    }
    serde_json::from_value(section).map_err(BridgeError::from)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::channel::ChannelConfig;
    use crate::channel::IncomingCalls;

    fn methods() -> HostMethods {
        struct Null;
        #[async_trait::async_trait]
        impl IncomingCalls for Null {
            async fn handle(&self, method: &str, _args: Vec<Value>) -> Result<Option<Value>> {
                Err(BridgeError::UnknownMethod(method.to_string()))
            }
        }
        let (left, _right) = Channel::pair(Arc::new(Null), Arc::new(Null), ChannelConfig::default());
        HostMethods::new(left)
    }

    fn base() -> BaseProperties {
        BaseProperties {
            plugin: PluginSnapshot {
                id: "p1".to_string(),
                name: "Starter".to_string(),
                parameters: json!({"apiKey": "k"}),
            },
            ui_locale: "en".to_string(),
            ..BaseProperties::default()
        }
    }

    #[tokio::test]
    async fn field_extension_mode_gets_both_sub_layers() {
        let payload = json!({
            "itemForm": {"item": {"id": "i1"}, "locale": "en", "itemStatus": "draft"},
            "field": {"field": {"id": "f1"}, "fieldPath": "title", "disabled": false},
        });
        let ctx = build_context(Mode::RenderFieldExtension, base(), methods(), &payload).expect("build");
        match ctx.additive {
            AdditiveLayer::FieldExtension { item_form, field } => {
                assert_eq!(item_form.locale, "en");
                assert_eq!(field.field_path, "title");
            }
            other => panic!("wrong layer: {other:?}"),
        }
        // Base layer is always complete.
        assert_eq!(ctx.properties.plugin.id, "p1");
        assert_eq!(ctx.properties.ui_locale, "en");
    }

    #[tokio::test]
    async fn selection_mode_gets_selected_items_only() {
        let payload = json!({"selection": {"selectedItems": [{"id": "a"}, {"id": "b"}]}});
        let ctx = build_context(Mode::ItemsDropdownActions, base(), methods(), &payload).expect("build");
        match ctx.additive {
            AdditiveLayer::ItemsSelection(selection) => assert_eq!(selection.selected_items.len(), 2),
            other => panic!("wrong layer: {other:?}"),
        }
    }

    #[tokio::test]
    async fn catalog_query_modes_carry_no_additive_layer() {
        for mode in [Mode::OnBoot, Mode::AssetSources, Mode::BuildItemPresentationInfo] {
            let ctx = build_context(mode, base(), methods(), &Value::Null).expect("build");
            assert_eq!(ctx.additive, AdditiveLayer::None, "mode {mode:?}");
        }
    }

    #[tokio::test]
    async fn modal_mode_requires_modal_id() {
        // modalId is mandatory for the modal layer; an empty payload fails.
        let err = build_context(Mode::RenderModal, base(), methods(), &json!({})).expect_err("must fail");
        assert!(matches!(err, BridgeError::Codec(_)), "got {err:?}");

        let ctx = build_context(Mode::RenderModal, base(), methods(), &json!({"modal": {"modalId": "m1"}}))
            .expect("build");
        match ctx.additive {
            AdditiveLayer::Modal(modal) => assert_eq!(modal.modal_id, "m1"),
            other => panic!("wrong layer: {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_layer_leaks_across_modes() {
        let payload = json!({
            "itemForm": {"item": {"id": "i1"}},
            "field": {"fieldPath": "title"},
            "selection": {"selectedItems": [{"id": "a"}]},
        });
        // Even with every section present, the mode picks exactly its own.
        let ctx = build_context(Mode::RenderItemFormSidebarPanel, base(), methods(), &payload).expect("build");
        assert!(matches!(ctx.additive, AdditiveLayer::SidebarPanel { .. }));
    }
}
