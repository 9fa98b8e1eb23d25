//! Built-in conflict resolution strategies.
//!
//! Every strategy is a pure function of its inputs. Strategies that can be
//! inapplicable return [`StrategyResult::Fallback`] and the resolver picks
//! last-writer-wins on their behalf.

use crate::clock::ClockOrdering;
use crate::resolver::{Resolution, SemanticHint, Strategy, StrategyResult};
use crate::value::ConflictValue;
use std::collections::BTreeMap;
use trustmesh_codec::Value;

/// Last-writer-wins. Causal order first, wall-clock tiebreak when
/// concurrent, agent-id tiebreak when even the clocks read the same.
pub fn lww(local: &ConflictValue, remote: &ConflictValue) -> Resolution {
    match local.clock.compare(&remote.clock) {
        ClockOrdering::After => Resolution::new(
            Strategy::Lww,
            local.data.clone(),
            0.9,
            "local revision is causally newer".to_string(),
        )
        .with_alternative(remote.data.clone()),
        ClockOrdering::Before => Resolution::new(
            Strategy::Lww,
            remote.data.clone(),
            0.9,
            "remote revision is causally newer".to_string(),
        )
        .with_alternative(local.data.clone()),
        ClockOrdering::Equal => Resolution::new(
            Strategy::Lww,
            local.data.clone(),
            1.0,
            "clocks are equal".to_string(),
        ),
        ClockOrdering::Concurrent => {
            let local_wins = match local.timestamp.cmp(&remote.timestamp) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => local.agent_id > remote.agent_id,
            };
            let (winner, loser, side) = if local_wins {
                (local, remote, "local")
            } else {
                (remote, local, "remote")
            };
            Resolution::new(
                Strategy::Lww,
                winner.data.clone(),
                0.7,
                format!("concurrent revisions, {side} wins on timestamp"),
            )
            .with_alternative(loser.data.clone())
        }
    }
}

/// Multi-value register: keep both revisions and ask a human.
pub fn mvr(local: &ConflictValue, remote: &ConflictValue) -> Resolution {
    // Unordered pair, canonicalized so resolution is input-order independent.
    let mut pair = vec![local.data.clone(), remote.data.clone()];
    pair.sort_by_key(|value| {
        trustmesh_codec::to_canonical_json(value).unwrap_or_default()
    });

    let mut resolution = Resolution::new(
        Strategy::Mvr,
        Value::Array(pair),
        0.5,
        "kept both concurrent revisions for manual selection".to_string(),
    );
    resolution.alternatives = vec![local.data.clone(), remote.data.clone()];
    resolution.requires_manual_review = true;
    resolution
}

/// Highest metadata priority wins; ties flag manual review.
pub fn priority(local: &ConflictValue, remote: &ConflictValue) -> Resolution {
    let local_priority = local.priority();
    let remote_priority = remote.priority();

    match local_priority.cmp(&remote_priority) {
        std::cmp::Ordering::Greater => Resolution::new(
            Strategy::Priority,
            local.data.clone(),
            0.8,
            format!("local priority {local_priority} beats {remote_priority}"),
        )
        .with_alternative(remote.data.clone()),
        std::cmp::Ordering::Less => Resolution::new(
            Strategy::Priority,
            remote.data.clone(),
            0.8,
            format!("remote priority {remote_priority} beats {local_priority}"),
        )
        .with_alternative(local.data.clone()),
        std::cmp::Ordering::Equal => {
            let mut resolution = lww(local, remote);
            resolution.strategy = Strategy::Priority;
            resolution.confidence = 0.5;
            resolution.reasoning =
                format!("equal priority {local_priority}, timestamp tiebreak applied");
            resolution.requires_manual_review = true;
            resolution
        }
    }
}

/// Set union over arrays; scalars fall through to last-writer-wins.
pub fn union(local: &ConflictValue, remote: &ConflictValue) -> Resolution {
    match (local.data.as_array(), remote.data.as_array()) {
        (Some(local_items), Some(remote_items)) => {
            let mut merged: Vec<Value> = local_items.to_vec();
            for item in remote_items {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Resolution::new(
                Strategy::Union,
                Value::Array(merged),
                0.9,
                "union of both element sets".to_string(),
            )
        }
        _ => {
            let mut resolution = lww(local, remote);
            resolution.reasoning =
                format!("union inapplicable to scalars; {}", resolution.reasoning);
            resolution
        }
    }
}

/// Set intersection over arrays; scalars fall through to last-writer-wins.
pub fn intersection(local: &ConflictValue, remote: &ConflictValue) -> Resolution {
    match (local.data.as_array(), remote.data.as_array()) {
        (Some(local_items), Some(remote_items)) => {
            let mut merged: Vec<Value> = Vec::new();
            for item in local_items {
                if remote_items.contains(item) && !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Resolution::new(
                Strategy::Intersection,
                Value::Array(merged),
                0.9,
                "intersection of both element sets".to_string(),
            )
        }
        _ => {
            let mut resolution = lww(local, remote);
            resolution.reasoning = format!(
                "intersection inapplicable to scalars; {}",
                resolution.reasoning
            );
            resolution
        }
    }
}

/// Recursive structure-aware merge.
///
/// Objects merge key-wise, arrays by deduplicated union, strings by common
/// prefix/suffix with both middles concatenated, numbers by arithmetic
/// mean. Per-field hints override the recursion.
pub fn semantic(
    local: &ConflictValue,
    remote: &ConflictValue,
    hints: &BTreeMap<String, SemanticHint>,
) -> StrategyResult {
    match merge_semantic("", &local.data, &remote.data, hints) {
        Ok(value) => StrategyResult::Resolved(Resolution::new(
            Strategy::Semantic,
            value,
            0.8,
            "recursive semantic merge".to_string(),
        )),
        Err(reason) => StrategyResult::Fallback(reason),
    }
}

fn merge_semantic(
    path: &str,
    local: &Value,
    remote: &Value,
    hints: &BTreeMap<String, SemanticHint>,
) -> Result<Value, String> {
    if let Some(hint) = hints.get(path) {
        if let Some(value) = apply_hint(*hint, local, remote) {
            return Ok(value);
        }
        // Numeric hint on non-numeric data; fall through to recursion.
    }

    if local == remote {
        return Ok(local.clone());
    }

    match (local, remote) {
        (Value::Null, other) | (other, Value::Null) => Ok(other.clone()),
        (Value::Object(local_map), Value::Object(remote_map)) => {
            let mut merged = std::collections::BTreeMap::new();
            let keys: std::collections::BTreeSet<&String> =
                local_map.keys().chain(remote_map.keys()).collect();
            for key in keys {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                let value = match (local_map.get(key), remote_map.get(key)) {
                    (Some(l), Some(r)) => merge_semantic(&child_path, l, r, hints)?,
                    (Some(l), None) => l.clone(),
                    (None, Some(r)) => r.clone(),
                    (None, None) => unreachable!("key drawn from union of maps"),
                };
                merged.insert(key.clone(), value);
            }
            Ok(Value::Object(merged))
        }
        (Value::Array(local_items), Value::Array(remote_items)) => {
            let mut merged = local_items.clone();
            for item in remote_items {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Ok(Value::Array(merged))
        }
        (Value::String(local_text), Value::String(remote_text)) => {
            Ok(Value::String(merge_strings(local_text, remote_text)))
        }
        (l, r) => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => Ok(mean_value(l, r, a, b)),
            _ => Err(format!(
                "cannot semantically merge mismatched shapes at '{path}'"
            )),
        },
    }
}

fn apply_hint(hint: SemanticHint, local: &Value, remote: &Value) -> Option<Value> {
    match hint {
        SemanticHint::PreferLocal => Some(local.clone()),
        SemanticHint::PreferRemote => Some(remote.clone()),
        SemanticHint::Sum => numeric_pair(local, remote).map(|(a, b)| number(a + b, local, remote)),
        SemanticHint::Max => numeric_pair(local, remote).map(|(a, b)| number(a.max(b), local, remote)),
        SemanticHint::Min => numeric_pair(local, remote).map(|(a, b)| number(a.min(b), local, remote)),
    }
}

fn numeric_pair(local: &Value, remote: &Value) -> Option<(f64, f64)> {
    Some((local.as_f64()?, remote.as_f64()?))
}

fn number(result: f64, local: &Value, remote: &Value) -> Value {
    let both_int = matches!(local, Value::Int(_)) && matches!(remote, Value::Int(_));
    if both_int && result.fract() == 0.0 {
        Value::Int(result as i64)
    } else {
        Value::Float(result)
    }
}

fn mean_value(local: &Value, remote: &Value, a: f64, b: f64) -> Value {
    number((a + b) / 2.0, local, remote)
}

/// Common prefix + local middle + remote middle + common suffix.
fn merge_strings(local: &str, remote: &str) -> String {
    let local_chars: Vec<char> = local.chars().collect();
    let remote_chars: Vec<char> = remote.chars().collect();

    let mut prefix = 0;
    while prefix < local_chars.len()
        && prefix < remote_chars.len()
        && local_chars[prefix] == remote_chars[prefix]
    {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < local_chars.len() - prefix
        && suffix < remote_chars.len() - prefix
        && local_chars[local_chars.len() - 1 - suffix] == remote_chars[remote_chars.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let mut merged: String = local_chars[..prefix].iter().collect();
    merged.extend(&local_chars[prefix..local_chars.len() - suffix]);
    merged.extend(&remote_chars[prefix..remote_chars.len() - suffix]);
    merged.extend(&local_chars[local_chars.len() - suffix..]);
    merged
}
