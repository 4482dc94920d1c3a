//! Field-level divergence detection and automatic resolution

use std::collections::BTreeSet;

use chrono::Utc;
use serde_json::Value;

use crate::models::{Conflict, FieldConflict, Record, ResolutionStrategy};

use super::policy::ResolverConfig;

/// Detect divergence between a queued local record and the authority's copy.
///
/// Returns `None` when both sides share a baseline, when the authority has not
/// changed since the local copy was derived from it, or when no tracked field
/// differs. Absent fields compare equal to `null`.
pub fn detect(
    local: &Record,
    server: &Record,
    tracked_fields: Option<&[String]>,
) -> Option<Conflict> {
    if local.updated_at == server.updated_at {
        return None;
    }
    if server.updated_at <= local.baseline() {
        return None;
    }

    let fields = diverging_fields(local, server, tracked_fields);
    if fields.is_empty() {
        return None;
    }

    Some(Conflict::new(local.clone(), server.clone(), fields))
}

fn diverging_fields(
    local: &Record,
    server: &Record,
    tracked_fields: Option<&[String]>,
) -> Vec<FieldConflict> {
    let names: BTreeSet<&str> = match tracked_fields {
        Some(tracked) => tracked.iter().map(String::as_str).collect(),
        None => local
            .fields
            .keys()
            .chain(server.fields.keys())
            .map(String::as_str)
            .collect(),
    };

    names
        .into_iter()
        .filter(|name| local.field(name) != server.field(name))
        .map(|name| FieldConflict {
            field: name.to_string(),
            local_value: local.field(name).clone(),
            server_value: server.field(name).clone(),
            local_timestamp: local.field_timestamp(name),
            server_timestamp: server.field_timestamp(name),
        })
        .collect()
}

/// Try to settle every diverging field of `conflict` under `config`.
///
/// Returns the resolved record and the strategy recorded on the conflict, or
/// `None` when any field must be left to the user.
pub fn auto_resolve(
    conflict: &Conflict,
    config: &ResolverConfig,
) -> Option<(Record, ResolutionStrategy)> {
    if !config.auto_resolve || conflict.fields.is_empty() {
        return None;
    }

    let now = Utc::now();
    let mut resolved = conflict.local.clone();
    let mut applied: Option<ResolutionStrategy> = None;
    let mut uniform = true;

    for field in &conflict.fields {
        let strategy = config.strategy_for(&field.field);
        let (value, at) = match strategy {
            ResolutionStrategy::Local => (field.local_value.clone(), field.local_timestamp),
            ResolutionStrategy::Server => (field.server_value.clone(), field.server_timestamp),
            ResolutionStrategy::Latest => {
                if field.server_timestamp > field.local_timestamp {
                    (field.server_value.clone(), field.server_timestamp)
                } else {
                    (field.local_value.clone(), field.local_timestamp)
                }
            }
            ResolutionStrategy::Merge => {
                let behavior = config.merge_behavior_for(
                    &field.field,
                    &field.local_value,
                    &field.server_value,
                );
                (behavior.merge(&field.local_value, &field.server_value)?, now)
            }
            ResolutionStrategy::Manual => return None,
        };

        if value == Value::Null {
            resolved.fields.remove(&field.field);
        } else {
            resolved.fields.insert(field.field.clone(), value);
        }
        resolved.field_updated_at.insert(field.field.clone(), at);
        match applied {
            Some(previous) if previous != strategy => uniform = false,
            _ => applied = Some(strategy),
        }
    }

    resolved.updated_at = now;
    resolved.base_updated_at = Some(conflict.server.updated_at);

    let strategy = applied
        .filter(|_| uniform)
        .unwrap_or(config.default_strategy);
    Some((resolved, strategy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::policy::MergeBehavior;
    use crate::models::{RecordId, ResolutionRule};
    use chrono::{DateTime, Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn base() -> Record {
        let mut record = Record::new("anniversary")
            .with_field("name", "Wedding")
            .with_field("date", "2020-06-01");
        record.id = RecordId::canonical("srv-1");
        record.updated_at = t(0);
        record.base_updated_at = Some(t(0));
        record
    }

    #[test]
    fn identical_timestamps_never_conflict() {
        let local = base();
        let mut other = local.clone();
        other.synced = true;
        other.last_modified = Some(t(99));
        other.fields.insert("memo".into(), json!("unrelated"));

        assert!(detect(&local, &local, None).is_none());
        assert!(detect(&local, &other, None).is_none());
    }

    #[test]
    fn unchanged_remote_is_not_a_conflict() {
        let mut local = base();
        local.set_field_at("memo", "A", t(10));
        let server = base();

        assert!(detect(&local, &server, None).is_none());
    }

    #[test]
    fn timestamp_skew_without_field_changes_is_not_a_conflict() {
        let local = base();
        let mut server = base();
        server.updated_at = t(20);

        assert!(detect(&local, &server, None).is_none());
    }

    #[test]
    fn null_and_missing_are_equivalent() {
        let mut local = base();
        local.set_field_at("memo", Value::Null, t(5));
        let mut server = base();
        server.updated_at = t(20);

        assert!(detect(&local, &server, None).is_none());
    }

    #[test]
    fn detects_diverging_fields() {
        let mut local = base();
        local.set_field_at("memo", "A", t(10));
        let mut server = base();
        server.set_field_at("memo", "B", t(20));
        server.set_field_at("name", "Our Wedding", t(20));

        let conflict = detect(&local, &server, None).unwrap();
        assert_eq!(conflict.field_names(), vec!["memo", "name"]);
        assert_eq!(conflict.fields[0].local_timestamp, t(10));
        assert_eq!(conflict.fields[0].server_timestamp, t(20));
    }

    #[test]
    fn tracked_fields_limit_detection() {
        let mut local = base();
        local.set_field_at("memo", "A", t(10));
        let mut server = base();
        server.set_field_at("memo", "B", t(20));

        let tracked = vec!["name".to_string()];
        assert!(detect(&local, &server, Some(&tracked)).is_none());
    }

    #[test]
    fn latest_takes_newer_server_value() {
        let mut local = base();
        local.set_field_at("memo", "A", t(10));
        let mut server = base();
        server.set_field_at("memo", "B", t(20));

        let conflict = detect(&local, &server, None).unwrap();
        let (resolved, strategy) = auto_resolve(&conflict, &ResolverConfig::default()).unwrap();
        assert_eq!(resolved.field("memo"), &json!("B"));
        assert_eq!(strategy, ResolutionStrategy::Latest);
        assert_eq!(resolved.base_updated_at, Some(t(20)));
        assert_eq!(resolved.id, local.id);
    }

    #[test]
    fn latest_keeps_newer_local_value() {
        let mut local = base();
        let mut server = base();
        server.set_field_at("memo", "B", t(20));
        local.set_field_at("memo", "A", t(30));

        let conflict = detect(&local, &server, None).unwrap();
        let (resolved, _) = auto_resolve(&conflict, &ResolverConfig::default()).unwrap();
        assert_eq!(resolved.field("memo"), &json!("A"));
    }

    #[test]
    fn merge_concatenates_text() {
        let mut local = base();
        local.set_field_at("memo", "A", t(10));
        let mut server = base();
        server.set_field_at("memo", "B", t(20));

        let config = ResolverConfig::default()
            .with_rule(ResolutionRule::new("memo", ResolutionStrategy::Merge));
        let conflict = detect(&local, &server, None).unwrap();
        let (resolved, strategy) = auto_resolve(&conflict, &config).unwrap();

        assert_eq!(
            resolved.field("memo"),
            &json!("A\n\n--- merged from server ---\nB")
        );
        assert_eq!(strategy, ResolutionStrategy::Merge);
    }

    #[test]
    fn merge_without_behavior_forces_manual() {
        let mut local = base();
        local.set_field_at("reminder_days", 3, t(10));
        let mut server = base();
        server.set_field_at("reminder_days", 7, t(20));

        let config = ResolverConfig::default().with_default_strategy(ResolutionStrategy::Merge);
        let conflict = detect(&local, &server, None).unwrap();
        assert!(auto_resolve(&conflict, &config).is_none());

        let config = config.with_merge_behavior("memo", MergeBehavior::Unsupported);
        let mut local = base();
        local.set_field_at("memo", "A", t(10));
        let mut server = base();
        server.set_field_at("memo", "B", t(20));
        let conflict = detect(&local, &server, None).unwrap();
        assert!(auto_resolve(&conflict, &config).is_none());
    }

    #[test]
    fn manual_rule_keeps_conflict_pending() {
        let mut local = base();
        local.set_field_at("name", "Anniversary", t(10));
        let mut server = base();
        server.set_field_at("name", "Wedding Day", t(20));

        let config = ResolverConfig::default()
            .with_rule(ResolutionRule::new("name", ResolutionStrategy::Manual));
        let conflict = detect(&local, &server, None).unwrap();
        assert!(auto_resolve(&conflict, &config).is_none());
    }

    #[test]
    fn disabled_auto_resolve_keeps_conflict_pending() {
        let mut local = base();
        local.set_field_at("memo", "A", t(10));
        let mut server = base();
        server.set_field_at("memo", "B", t(20));

        let config = ResolverConfig {
            auto_resolve: false,
            ..ResolverConfig::default()
        };
        let conflict = detect(&local, &server, None).unwrap();
        assert!(auto_resolve(&conflict, &config).is_none());
    }

    #[test]
    fn mixed_strategies_record_default() {
        let mut local = base();
        local.set_field_at("memo", "A", t(10));
        local.set_field_at("name", "Ours", t(10));
        let mut server = base();
        server.set_field_at("memo", "B", t(20));
        server.set_field_at("name", "Theirs", t(20));

        let config = ResolverConfig::default()
            .with_rule(ResolutionRule::new("name", ResolutionStrategy::Local));
        let conflict = detect(&local, &server, None).unwrap();
        let (resolved, strategy) = auto_resolve(&conflict, &config).unwrap();

        assert_eq!(resolved.field("name"), &json!("Ours"));
        assert_eq!(resolved.field("memo"), &json!("B"));
        assert_eq!(strategy, ResolutionStrategy::Latest);
    }
}
