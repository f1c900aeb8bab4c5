//! Host-side hook fan-out and result arbitration.
//!
//! A broadcast invokes one hook on every ready plugin that declared it,
//! concurrently, each under its own deadline. Per-plugin failures (timeout,
//! handler fault, torn-down channel, ill-shaped answer) are logged and
//! skipped; the surviving answers feed the hook's [`ResultPolicy`]:
//!
//! - `None` — answers are discarded (render and execute hooks);
//! - `SingleWinner` — rank resolution picks one answer;
//! - `Collection` — all answers are merged and rank-sorted.

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;
use tracing::debug;
use tracing::warn;

use crate::arbiter::PluginAnswer;
use crate::arbiter::merge_collection;
use crate::arbiter::resolve_single;
use crate::capabilities::ResultPolicy;
use crate::capabilities::hook_descriptor;
use crate::context::BaseProperties;
use crate::registry::InstalledPlugin;
use crate::registry::PluginHost;
use crate::validate::return_shape;

/// Arbitrated outcome of one hook broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook carries no result, or nobody answered.
    None,
    /// The single winning answer.
    Single(Value),
    /// The merged, rank-sorted collection.
    Collection(Vec<Value>),
}

impl PluginHost {
    /// Invoke `hook` on every ready plugin that implements it and arbitrate
    /// the answers.
    ///
    /// `payload` carries the mode-specific context layers; the shared `base`
    /// properties are folded in here so callers build them once per
    /// broadcast, not once per plugin.
    pub async fn broadcast(
        &self,
        hook: &str,
        base: &BaseProperties,
        payload: Value,
        args: Vec<Value>,
    ) -> anyhow::Result<HookOutcome> {
        let descriptor =
            hook_descriptor(hook).ok_or_else(|| anyhow::anyhow!("'{hook}' is not in the hook catalog"))?;
        let payload = fold_base(base, payload)?;

        let plugins: Vec<Arc<InstalledPlugin>> =
            self.ready_snapshot().await.into_iter().filter(|p| p.implements_hook(hook)).collect();
        if plugins.is_empty() {
            debug!(hook, "no plugin implements this hook");
            return Ok(HookOutcome::None);
        }

        let mut invocations = Vec::with_capacity(plugins.len());
        for plugin in plugins {
            let hook = hook.to_string();
            let payload = payload.clone();
            let args = args.clone();
            let deadline = self.hook_deadline;
            invocations.push(tokio::spawn(async move {
                let call = plugin.channel().call("invokeHook", vec![json!(hook), payload, Value::Array(args)]);
                let outcome = tokio::time::timeout(deadline, call).await;
                (plugin, outcome)
            }));
        }

        let shape = return_shape(descriptor.mode);
        let mut answers = Vec::new();
        for invocation in invocations {
            let Ok((plugin, outcome)) = invocation.await else {
                continue;
            };
            let value = match outcome {
                Ok(Ok(Some(value))) => value,
                Ok(Ok(None)) => continue, // no opinion
                Ok(Err(e)) => {
                    warn!(hook, plugin = %plugin.id(), error = %e, "hook invocation failed, skipping plugin");
                    continue;
                }
                Err(_) => {
                    warn!(hook, plugin = %plugin.id(), "hook invocation exceeded deadline, skipping plugin");
                    continue;
                }
            };
            // The dispatcher validates plugin-side, but the host cannot trust
            // the frame: re-check before the answer reaches arbitration.
            if let Some(shape) = &shape {
                if !shape.validate(&value) {
                    warn!(hook, plugin = %plugin.id(), "hook answer failed shape validation, skipping");
                    continue;
                }
            }
            answers.push(PluginAnswer {
                plugin_id: plugin.id().to_string(),
                install_order: plugin.install_order(),
                value,
            });
        }

        Ok(match descriptor.result {
            ResultPolicy::None => HookOutcome::None,
            ResultPolicy::SingleWinner => match resolve_single(answers) {
                Some(value) => HookOutcome::Single(value),
                None => HookOutcome::None,
            },
            ResultPolicy::Collection => HookOutcome::Collection(merge_collection(answers)),
        })
    }

    /// Invoke `hook` on one specific plugin, bypassing arbitration.
    ///
    /// Used for targeted invocations such as executing the dropdown action a
    /// particular plugin contributed. Unlike [`broadcast`](Self::broadcast),
    /// failures surface to the caller.
    pub async fn invoke_on(
        &self,
        plugin_id: &str,
        hook: &str,
        base: &BaseProperties,
        payload: Value,
        args: Vec<Value>,
    ) -> anyhow::Result<Option<Value>> {
        if hook_descriptor(hook).is_none() {
            anyhow::bail!("'{hook}' is not in the hook catalog");
        }
        let plugin = self
            .plugin(plugin_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("plugin '{plugin_id}' is not connected"))?;
        let payload = fold_base(base, payload)?;

        let call = plugin.channel().call("invokeHook", vec![json!(hook), payload, Value::Array(args)]);
        let value = tokio::time::timeout(self.hook_deadline, call)
            .await
            .map_err(|_| anyhow::anyhow!("plugin '{plugin_id}' did not answer '{hook}' before the deadline"))??;
        Ok(value)
    }

    /// Announce boot to every plugin implementing `onBoot`.
    ///
    /// Fired once by the host after its plugins are connected; results are
    /// discarded per the hook's policy.
    pub async fn boot(&self, base: &BaseProperties) -> anyhow::Result<()> {
        self.broadcast("onBoot", base, json!({}), Vec::new()).await?;
        Ok(())
    }
}

/// Merge the shared base properties into the mode payload under `"base"`.
fn fold_base(base: &BaseProperties, payload: Value) -> anyhow::Result<Value> {
    let mut object = match payload {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => anyhow::bail!("hook payload must be an object, got {other}"),
    };
    object.insert("base".to_string(), serde_json::to_value(base)?);
    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::dispatcher::HookDispatcher;
    use crate::dispatcher::PluginRuntime;
    use crate::error::BridgeError;
    use crate::error::Result;
    use crate::registry::HostCapabilities;

    struct NullCapabilities;

    #[async_trait::async_trait]
    impl HostCapabilities for NullCapabilities {
        async fn invoke(&self, _plugin_id: &str, method: &str, _args: Vec<Value>) -> Result<Option<Value>> {
            Err(BridgeError::UnknownMethod(method.to_string()))
        }
    }

    fn host() -> PluginHost {
        PluginHost::new(Arc::new(NullCapabilities))
    }

    #[tokio::test]
    async fn broadcast_merges_collections_across_plugins() {
        let host = host();

        let mut first = HookDispatcher::new();
        first.register_fn("itemsDropdownActions", |_ctx, _args| async {
            Ok(Some(json!([{"id": "export", "label": "Export", "rank": 10}])))
        });
        host.connect_local("exporter", PluginRuntime::new(Arc::new(first))).await.expect("connect");

        let mut second = HookDispatcher::new();
        second.register_fn("itemsDropdownActions", |_ctx, _args| async {
            Ok(Some(json!([{"id": "publish", "label": "Publish", "rank": 1}])))
        });
        host.connect_local("publisher", PluginRuntime::new(Arc::new(second))).await.expect("connect");

        let outcome = host
            .broadcast("itemsDropdownActions", &BaseProperties::default(), json!({}), vec![])
            .await
            .expect("broadcast");
        let HookOutcome::Collection(actions) = outcome else {
            panic!("expected collection, got {outcome:?}");
        };
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0]["id"], "publish");
        assert_eq!(actions[1]["id"], "export");
    }

    #[tokio::test]
    async fn broadcast_resolves_single_winner_by_rank() {
        let host = host();

        let mut first = HookDispatcher::new();
        first.register_fn("buildItemPresentationInfo", |_ctx, _args| async {
            Ok(Some(json!({"title": "Fallback"})))
        });
        host.connect_local("fallback", PluginRuntime::new(Arc::new(first))).await.expect("connect");

        let mut second = HookDispatcher::new();
        second.register_fn("buildItemPresentationInfo", |_ctx, _args| async {
            Ok(Some(json!({"title": "Preferred", "rank": 1})))
        });
        host.connect_local("preferred", PluginRuntime::new(Arc::new(second))).await.expect("connect");

        let outcome = host
            .broadcast("buildItemPresentationInfo", &BaseProperties::default(), json!({}), vec![])
            .await
            .expect("broadcast");
        assert_eq!(outcome, HookOutcome::Single(json!({"title": "Preferred", "rank": 1})));
    }

    #[tokio::test]
    async fn faulting_plugin_is_skipped_not_fatal() {
        let host = host();

        let mut broken = HookDispatcher::new();
        broken.register_fn("assetSources", |_ctx, _args| async { anyhow::bail!("backend down") });
        host.connect_local("broken", PluginRuntime::new(Arc::new(broken))).await.expect("connect");

        let mut healthy = HookDispatcher::new();
        healthy.register_fn("assetSources", |_ctx, _args| async {
            Ok(Some(json!([{"id": "unsplash", "name": "Unsplash"}])))
        });
        host.connect_local("healthy", PluginRuntime::new(Arc::new(healthy))).await.expect("connect");

        let outcome =
            host.broadcast("assetSources", &BaseProperties::default(), json!({}), vec![]).await.expect("broadcast");
        let HookOutcome::Collection(sources) = outcome else {
            panic!("expected collection, got {outcome:?}");
        };
        assert_eq!(sources, vec![json!({"id": "unsplash", "name": "Unsplash"})]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_plugin_is_skipped_after_deadline() {
        let host = PluginHost::new(Arc::new(NullCapabilities)).with_hook_deadline(Duration::from_millis(100));

        let mut hung = HookDispatcher::new();
        hung.register_fn("mainNavigationTabs", |_ctx, _args| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        });
        host.connect_local("hung", PluginRuntime::new(Arc::new(hung))).await.expect("connect");

        let mut prompt = HookDispatcher::new();
        prompt.register_fn("mainNavigationTabs", |_ctx, _args| async {
            Ok(Some(json!([{"id": "reports", "label": "Reports"}])))
        });
        host.connect_local("prompt", PluginRuntime::new(Arc::new(prompt))).await.expect("connect");

        let outcome = host
            .broadcast("mainNavigationTabs", &BaseProperties::default(), json!({}), vec![])
            .await
            .expect("broadcast");
        let HookOutcome::Collection(tabs) = outcome else {
            panic!("expected collection, got {outcome:?}");
        };
        assert_eq!(tabs, vec![json!({"id": "reports", "label": "Reports"})]);
    }

    #[tokio::test]
    async fn failed_plugin_is_excluded_from_fan_out() {
        let host = host();

        let mut flaky = HookDispatcher::new();
        flaky.register_fn("assetSources", |_ctx, _args| async {
            Ok(Some(json!([{"id": "flaky", "name": "Flaky"}])))
        });
        host.connect_local("flaky", PluginRuntime::new(Arc::new(flaky))).await.expect("connect");

        let mut steady = HookDispatcher::new();
        steady.register_fn("assetSources", |_ctx, _args| async {
            Ok(Some(json!([{"id": "steady", "name": "Steady"}])))
        });
        host.connect_local("steady", PluginRuntime::new(Arc::new(steady))).await.expect("connect");

        host.mark_failed("flaky").await;

        let outcome =
            host.broadcast("assetSources", &BaseProperties::default(), json!({}), vec![]).await.expect("broadcast");
        assert_eq!(outcome, HookOutcome::Collection(vec![json!({"id": "steady", "name": "Steady"})]));
    }

    #[tokio::test]
    async fn unknown_hook_is_rejected() {
        let host = host();
        let err = host
            .broadcast("renderHologram", &BaseProperties::default(), json!({}), vec![])
            .await
            .expect_err("must reject");
        assert!(err.to_string().contains("hook catalog"));
    }

    #[tokio::test]
    async fn invoke_on_targets_one_plugin() {
        let host = host();

        let mut executor = HookDispatcher::new();
        executor.register_fn("executeItemsDropdownAction", |_ctx, args| async move {
            let action = args.first().and_then(Value::as_str).unwrap_or("?").to_string();
            Ok(Some(json!({"executed": action})))
        });
        host.connect_local("executor", PluginRuntime::new(Arc::new(executor))).await.expect("connect");

        let value = host
            .invoke_on(
                "executor",
                "executeItemsDropdownAction",
                &BaseProperties::default(),
                json!({"selection": {"selectedItems": [{"id": "item-1"}]}}),
                vec![json!("export")],
            )
            .await
            .expect("invoke");
        assert_eq!(value, Some(json!({"executed": "export"})));

        let err = host
            .invoke_on("ghost", "executeItemsDropdownAction", &BaseProperties::default(), json!({}), vec![])
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn boot_reaches_on_boot_handlers() {
        let host = host();

        let booted = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&booted);
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register_fn("onBoot", move |_ctx, _args| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(None)
            }
        });
        host.connect_local("starter", PluginRuntime::new(Arc::new(dispatcher))).await.expect("connect");

        host.boot(&BaseProperties::default()).await.expect("boot");
        assert!(booted.load(std::sync::atomic::Ordering::SeqCst));
    }
}
