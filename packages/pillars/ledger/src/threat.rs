//! Threat-indicator matching.
//!
//! Three checks per entry: known-bad source addresses, operator-supplied
//! patterns over actor/target ids, and injection signatures in the entry
//! details. Indicator acquisition is external; this module only holds the
//! refreshed sets.

use crate::entry::AuditLogEntry;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use trustmesh_codec::Value;

/// Injection tags recognized in details.
const INJECTION_TAGS: [&str; 4] = [
    "sql_injection",
    "xss",
    "path_traversal",
    "command_injection",
];

/// A matched indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIndicator {
    /// `bad_ip`, `pattern`, or one of the injection tags.
    pub kind: String,
    pub matched: String,
}

/// Refreshable threat-intelligence state.
pub struct ThreatIntel {
    bad_ips: RwLock<HashSet<String>>,
    patterns: RwLock<Vec<Regex>>,
    content_signatures: Vec<(Regex, &'static str)>,
    last_refresh: RwLock<DateTime<Utc>>,
}

impl Default for ThreatIntel {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreatIntel {
    pub fn new() -> Self {
        // A signature match raises an alert, never a block.
        let content_signatures = vec![
            (
                Regex::new(r"(?i)(union\s+select|'\s*or\s+1\s*=\s*1|;\s*drop\s+table)")
                    .expect("static regex"),
                "sql_injection",
            ),
            (
                Regex::new(r"(?i)(<script\b|javascript:|onerror\s*=)").expect("static regex"),
                "xss",
            ),
            (
                Regex::new(r"(\.\./|\.\.\\|%2e%2e%2f)").expect("static regex"),
                "path_traversal",
            ),
            (
                Regex::new(r"(?i)(;\s*rm\s+-rf|\|\s*sh\b|\$\(.*\)|&&\s*curl\s)")
                    .expect("static regex"),
                "command_injection",
            ),
        ];
        Self {
            bad_ips: RwLock::new(HashSet::new()),
            patterns: RwLock::new(Vec::new()),
            content_signatures,
            last_refresh: RwLock::new(Utc::now()),
        }
    }

    /// Replace the indicator sets (threat-feed refresh).
    pub fn refresh(&self, bad_ips: HashSet<String>, patterns: Vec<Regex>) {
        *self.bad_ips.write() = bad_ips;
        *self.patterns.write() = patterns;
        *self.last_refresh.write() = Utc::now();
        tracing::info!("threat intelligence refreshed");
    }

    pub fn add_bad_ip(&self, ip: impl Into<String>) {
        self.bad_ips.write().insert(ip.into());
    }

    pub fn last_refresh(&self) -> DateTime<Utc> {
        *self.last_refresh.read()
    }

    /// Match one entry against all indicator classes.
    pub fn check(&self, entry: &AuditLogEntry) -> Vec<ThreatIndicator> {
        let mut indicators = Vec::new();

        if let Some(ip) = entry.details.get("source_ip").and_then(Value::as_str) {
            if self.bad_ips.read().contains(ip) {
                indicators.push(ThreatIndicator {
                    kind: "bad_ip".to_string(),
                    matched: ip.to_string(),
                });
            }
        }

        for pattern in self.patterns.read().iter() {
            for subject in [&entry.actor, &entry.target] {
                if pattern.is_match(subject) {
                    indicators.push(ThreatIndicator {
                        kind: "pattern".to_string(),
                        matched: subject.clone(),
                    });
                }
            }
        }

        // Explicit tags first, then content signatures over string leaves.
        if let Some(tags) = entry.details.get("tags").and_then(Value::as_array) {
            for tag in tags {
                if let Some(tag) = tag.as_str() {
                    if INJECTION_TAGS.contains(&tag) {
                        indicators.push(ThreatIndicator {
                            kind: tag.to_string(),
                            matched: format!("tag:{tag}"),
                        });
                    }
                }
            }
        }
        for leaf in string_leaves(&entry.details) {
            for (signature, tag) in &self.content_signatures {
                if signature.is_match(leaf) {
                    indicators.push(ThreatIndicator {
                        kind: (*tag).to_string(),
                        matched: leaf.to_string(),
                    });
                }
            }
        }

        indicators
    }
}

fn string_leaves(value: &Value) -> Vec<&str> {
    let mut leaves = Vec::new();
    collect_string_leaves(value, &mut leaves);
    leaves
}

fn collect_string_leaves<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => {
            for item in items {
                collect_string_leaves(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_string_leaves(item, out);
            }
        }
        _ => {}
    }
}
