//! Resolution policy and per-field merge behaviours

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ResolutionRule, ResolutionStrategy};

/// Settings key under which the policy is persisted as JSON
pub const RESOLVER_CONFIG_KEY: &str = "conflict_resolution";

/// Separator placed between two unrelated text edits by the `merge` strategy
pub const MERGE_SEPARATOR: &str = "\n\n--- merged from server ---\n";

/// How the `merge` strategy combines two values of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeBehavior {
    /// Free text: keep the longer when one contains the other, else concatenate
    Text,
    /// Boolean "enabled" flag: true if either side is true
    AnyEnabled,
    /// Merging this field is not allowed
    Unsupported,
}

impl MergeBehavior {
    /// Behaviour implied by the values themselves when none is configured
    pub fn infer(local: &Value, server: &Value) -> Self {
        match (local, server) {
            (Value::String(_), Value::String(_) | Value::Null)
            | (Value::Null, Value::String(_)) => Self::Text,
            (Value::Bool(_), Value::Bool(_) | Value::Null) | (Value::Null, Value::Bool(_)) => {
                Self::AnyEnabled
            }
            _ => Self::Unsupported,
        }
    }

    /// Combine `local` and `server`; `None` when the values cannot be merged.
    pub fn merge(self, local: &Value, server: &Value) -> Option<Value> {
        match self {
            Self::Text => {
                let local = text_or_empty(local)?;
                let server = text_or_empty(server)?;
                Some(Value::String(merge_text(local, server)))
            }
            Self::AnyEnabled => {
                let local = bool_or_false(local)?;
                let server = bool_or_false(server)?;
                Some(Value::Bool(local || server))
            }
            Self::Unsupported => None,
        }
    }
}

fn text_or_empty(value: &Value) -> Option<&str> {
    match value {
        Value::String(text) => Some(text),
        Value::Null => Some(""),
        _ => None,
    }
}

const fn bool_or_false(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Null => Some(false),
        _ => None,
    }
}

/// Containment-or-concatenate text merge.
pub fn merge_text(local: &str, server: &str) -> String {
    if local.contains(server) || server.contains(local) {
        if server.len() > local.len() {
            server.to_string()
        } else {
            local.to_string()
        }
    } else {
        format!("{local}{MERGE_SEPARATOR}{server}")
    }
}

/// Conflict resolution policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Attempt automatic resolution before surfacing a conflict
    pub auto_resolve: bool,
    /// Strategy for fields without an explicit rule
    pub default_strategy: ResolutionStrategy,
    pub rules: Vec<ResolutionRule>,
    /// Explicit merge behaviours; unlisted fields infer one from their values
    pub merge_behaviors: BTreeMap<String, MergeBehavior>,
    /// Fields compared by detection; `None` compares every field
    pub tracked_fields: Option<Vec<String>>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            auto_resolve: true,
            default_strategy: ResolutionStrategy::Latest,
            rules: Vec::new(),
            merge_behaviors: BTreeMap::new(),
            tracked_fields: None,
        }
    }
}

impl ResolverConfig {
    /// Builder-style rule registration
    #[must_use]
    pub fn with_rule(mut self, rule: ResolutionRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Builder-style merge behaviour registration
    #[must_use]
    pub fn with_merge_behavior(mut self, field: impl Into<String>, behavior: MergeBehavior) -> Self {
        self.merge_behaviors.insert(field.into(), behavior);
        self
    }

    #[must_use]
    pub const fn with_default_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Strategy for `field`: the highest-priority matching rule, else the default.
    pub fn strategy_for(&self, field: &str) -> ResolutionStrategy {
        self.rules
            .iter()
            .filter(|rule| rule.field == field)
            .max_by_key(|rule| rule.priority)
            .map_or(self.default_strategy, |rule| rule.strategy)
    }

    /// Merge behaviour for `field` given the two diverging values.
    pub fn merge_behavior_for(&self, field: &str, local: &Value, server: &Value) -> MergeBehavior {
        self.merge_behaviors
            .get(field)
            .copied()
            .unwrap_or_else(|| MergeBehavior::infer(local, server))
    }
}
