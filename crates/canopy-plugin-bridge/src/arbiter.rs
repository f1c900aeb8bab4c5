//! Multi-plugin arbitration: one host-facing result out of many answers.
//!
//! Two policies cover every multi-plugin hook:
//!
//! - **single winner** (presentation info, location-query defaults): the
//!   entry with the lowest `rank` wins; absent rank sorts last; ties break
//!   by plugin installation order. Resolution is total and stable —
//!   re-resolving the same input always yields the same winner.
//! - **collection merge** (dropdown actions, navigation tabs): every valid
//!   answer is flattened into one list, de-duplicated on plugin identity
//!   plus entry id, and rank-sorted with groups ahead of loose entries of
//!   equal rank. Actions inside a group are rank-sorted within it.

use serde_json::Value;

/// One plugin's validated answer to a hook invocation.
#[derive(Debug, Clone)]
pub struct PluginAnswer {
    pub plugin_id: String,
    /// Position in the host's installation order; unique per plugin.
    pub install_order: u32,
    pub value: Value,
}

/// Rank of an entry: explicit integer `rank`, or last when absent.
fn rank_of(value: &Value) -> i64 {
    value.get("rank").and_then(Value::as_i64).unwrap_or(i64::MAX)
}

fn is_group(value: &Value) -> bool {
    value.get("actions").map(Value::is_array).unwrap_or(false)
}

/// Pick the single winning answer, or `None` when nobody answered.
pub fn resolve_single(answers: Vec<PluginAnswer>) -> Option<Value> {
    // (rank, install_order) is a total key: install_order is unique, so no
    // two answers compare equal and min_by_key is deterministic.
    answers.into_iter().min_by_key(|a| (rank_of(&a.value), a.install_order)).map(|a| a.value)
}

/// Merge collection answers from all plugins into one sorted list.
///
/// Each answer value is expected to be an array (enforced upstream by shape
/// validation); non-array values contribute nothing. Entries are keyed by
/// `(plugin id, entry id)` for de-duplication — first occurrence wins —
/// so ids only need to be unique within a single plugin's answer.
pub fn merge_collection(answers: Vec<PluginAnswer>) -> Vec<Value> {
    let mut seen: std::collections::HashSet<(String, String)> = std::collections::HashSet::new();
    let mut merged: Vec<(i64, u8, Value)> = Vec::new();

    for answer in answers {
        let Value::Array(entries) = answer.value else {
            continue;
        };
        for mut entry in entries {
            if let Some(id) = entry.get("id").and_then(Value::as_str) {
                if !seen.insert((answer.plugin_id.clone(), id.to_string())) {
                    continue;
                }
            }
            if is_group(&entry) {
                sort_group_members(&mut entry);
                merged.push((rank_of(&entry), 0, entry));
            } else {
                merged.push((rank_of(&entry), 1, entry));
            }
        }
    }

    // Stable sort: equal keys keep installation-order arrival.
    merged.sort_by_key(|(rank, kind, _)| (*rank, *kind));
    merged.into_iter().map(|(_, _, entry)| entry).collect()
}

/// Rank-sort the `actions` array inside a group entry, in place.
fn sort_group_members(group: &mut Value) {
    if let Some(actions) = group.get_mut("actions").and_then(Value::as_array_mut) {
        actions.sort_by_key(rank_of);
    }
}
