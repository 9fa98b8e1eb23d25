//! Operational transforms for concurrent string edits.
//!
//! Both sides' edits are expressed as transforms against the common
//! ancestor (retain / insert / delete / replace over char offsets), then
//! applied in priority-then-timestamp order while a running offset keeps
//! later positions honest. Heavy edit sets are flagged for manual review
//! rather than trusted blindly.

use crate::resolver::{Resolution, Strategy, StrategyResult};
use crate::value::ConflictValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trustmesh_codec::Value;

/// Edit-set size at which the merge is flagged for manual review.
const MANUAL_REVIEW_TRANSFORM_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Retain,
    Insert,
    Delete,
    Replace,
}

/// A single edit against ancestor coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub kind: TransformKind,
    /// Char offset in the ancestor string.
    pub position: usize,
    /// Chars covered (retain / delete / replace).
    pub length: usize,
    /// Inserted or replacement text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Agent whose edit this is.
    pub source: String,
    pub priority: i64,
    pub timestamp: DateTime<Utc>,
}

impl Transform {
    fn is_edit(&self) -> bool {
        !matches!(self.kind, TransformKind::Retain)
    }
}

/// Diff one edited string against the ancestor.
///
/// Produces a retain/edit/retain sequence from the common prefix and
/// suffix; the middle becomes a single insert, delete, or replace.
pub fn diff_transforms(
    ancestor: &str,
    edited: &str,
    source: &str,
    priority: i64,
    timestamp: DateTime<Utc>,
) -> Vec<Transform> {
    let old: Vec<char> = ancestor.chars().collect();
    let new: Vec<char> = edited.chars().collect();

    let mut prefix = 0;
    while prefix < old.len() && prefix < new.len() && old[prefix] == new[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old.len() - prefix
        && suffix < new.len() - prefix
        && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let old_mid: String = old[prefix..old.len() - suffix].iter().collect();
    let new_mid: String = new[prefix..new.len() - suffix].iter().collect();

    let mut transforms = Vec::new();
    let base = |kind, position, length, content| Transform {
        kind,
        position,
        length,
        content,
        source: source.to_string(),
        priority,
        timestamp,
    };

    if prefix > 0 {
        transforms.push(base(TransformKind::Retain, 0, prefix, None));
    }
    match (old_mid.is_empty(), new_mid.is_empty()) {
        (true, true) => {}
        (true, false) => transforms.push(base(TransformKind::Insert, prefix, 0, Some(new_mid))),
        (false, true) => transforms.push(base(
            TransformKind::Delete,
            prefix,
            old.len() - suffix - prefix,
            None,
        )),
        (false, false) => transforms.push(base(
            TransformKind::Replace,
            prefix,
            old.len() - suffix - prefix,
            Some(new_mid),
        )),
    }
    if suffix > 0 {
        transforms.push(base(TransformKind::Retain, old.len() - suffix, suffix, None));
    }
    transforms
}

/// Merge two concurrent string revisions through their common ancestor.
pub fn operational(
    local: &ConflictValue,
    remote: &ConflictValue,
    ancestor: Option<&ConflictValue>,
) -> StrategyResult {
    let ancestor = match ancestor {
        Some(a) => a,
        None => {
            return StrategyResult::Fallback(
                "operational transform requires a common ancestor".to_string(),
            )
        }
    };
    let (base, local_text, remote_text) = match (
        ancestor.data.as_str(),
        local.data.as_str(),
        remote.data.as_str(),
    ) {
        (Some(a), Some(l), Some(r)) => (a, l, r),
        _ => {
            return StrategyResult::Fallback(
                "operational transform only applies to string values".to_string(),
            )
        }
    };

    let mut transforms = diff_transforms(
        base,
        local_text,
        &local.agent_id,
        local.priority(),
        local.timestamp,
    );
    transforms.extend(diff_transforms(
        base,
        remote_text,
        &remote.agent_id,
        remote.priority(),
        remote.timestamp,
    ));
    let total = transforms.len();

    let mut edits: Vec<Transform> = transforms.iter().filter(|t| t.is_edit()).cloned().collect();
    edits.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.timestamp.cmp(&b.timestamp))
            .then(a.source.cmp(&b.source))
            .then(a.position.cmp(&b.position))
    });

    // Apply in order, shifting positions by the length delta of every edit
    // already applied at or before the same ancestor offset.
    let mut merged: Vec<char> = base.chars().collect();
    let mut applied: Vec<(usize, i64)> = Vec::new();
    for edit in &edits {
        let shift: i64 = applied
            .iter()
            .filter(|(position, _)| *position <= edit.position)
            .map(|(_, delta)| *delta)
            .sum();
        let at = ((edit.position as i64) + shift).clamp(0, merged.len() as i64) as usize;

        let removed = edit.length.min(merged.len().saturating_sub(at));
        let inserted: Vec<char> = edit
            .content
            .as_deref()
            .unwrap_or("")
            .chars()
            .collect();
        merged.splice(at..at + removed, inserted.iter().copied());
        applied.push((edit.position, inserted.len() as i64 - removed as i64));
    }

    let merged: String = merged.into_iter().collect();
    let needs_review = total >= MANUAL_REVIEW_TRANSFORM_COUNT;
    let mut resolution = Resolution::new(
        Strategy::Operational,
        Value::from(merged),
        0.75,
        format!(
            "applied {} edit transform(s) from {} total against common ancestor",
            edits.len(),
            total
        ),
    );
    resolution.transforms = edits;
    resolution.requires_manual_review = needs_review;
    StrategyResult::Resolved(resolution)
}
