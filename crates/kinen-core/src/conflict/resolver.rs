//! Conflict resolver service

use chrono::{Duration, Utc};

use crate::models::{
    Conflict, ConflictStatus, ManualChoice, Record, ResolutionStrategy, ResolvedBy, PRIORITY_HIGH,
};
use crate::services::LocalStore;
use crate::Result;

use super::detect::{auto_resolve, detect};
use super::policy::{ResolverConfig, RESOLVER_CONFIG_KEY};

/// Outcome of running detection for one update replay
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Nothing diverged; replay the local record as is
    Clean,
    /// Every field was settled; replay `record` instead of the local copy
    AutoResolved { conflict: Conflict, record: Record },
    /// At least one field needs the user
    Pending(Conflict),
}

/// Detects, settles and records conflicts against the local store.
///
/// The policy is re-read from settings on every call so edits made by the UI
/// apply to the next replay.
#[derive(Clone)]
pub struct ConflictResolver {
    store: LocalStore,
}

impl ConflictResolver {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Current policy, or the default when none has been saved.
    pub async fn config(&self) -> Result<ResolverConfig> {
        Ok(self
            .store
            .get_json_setting(RESOLVER_CONFIG_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Persist a new policy.
    pub async fn set_config(&self, config: &ResolverConfig) -> Result<()> {
        self.store.set_json_setting(RESOLVER_CONFIG_KEY, config).await
    }

    /// Detect and, when the policy allows, settle divergence between a
    /// queued local record and the authority's copy. Any conflict produced is
    /// persisted before returning.
    pub async fn process(&self, local: &Record, server: &Record) -> Result<Resolution> {
        let config = self.config().await?;
        let Some(mut conflict) = detect(local, server, config.tracked_fields.as_deref()) else {
            return Ok(Resolution::Clean);
        };

        if let Some((record, strategy)) = auto_resolve(&conflict, &config) {
            conflict.mark_resolved(
                ConflictStatus::AutoResolved,
                strategy,
                ResolvedBy::System,
                record.clone(),
            );
            self.store.save_conflict(&conflict).await?;
            // Later local edits stay in place; their own mutations follow
            let current = self.store.get(&record.id).await?;
            if !matches!(current, Some(current) if current.updated_at > local.updated_at) {
                self.store.put(&record).await?;
            }
            tracing::info!(
                "Auto-resolved conflict on '{}' ({}) with {}",
                conflict.entity_name,
                conflict.field_names().join(", "),
                strategy
            );
            return Ok(Resolution::AutoResolved { conflict, record });
        }

        self.store.save_conflict(&conflict).await?;
        tracing::warn!("Conflict {} left pending: {}", conflict.id, conflict.message());
        Ok(Resolution::Pending(conflict))
    }

    /// Settle a pending conflict by hand.
    ///
    /// Writes the chosen record locally, marks the conflict resolved by the
    /// user, drops the mutations it blocked and queues a high-priority update.
    /// Returns `false` when the conflict is unknown or already settled.
    pub async fn resolve_manually(&self, conflict_id: &str, choice: ManualChoice) -> Result<bool> {
        let Some(mut conflict) = self.store.get_conflict(conflict_id).await? else {
            tracing::debug!("Manual resolution of unknown conflict {conflict_id}");
            return Ok(false);
        };
        if conflict.status != ConflictStatus::Pending {
            tracing::debug!(
                "Conflict {} is already {}; ignoring manual resolution",
                conflict.id,
                conflict.status
            );
            return Ok(false);
        }

        let (mut record, strategy) = match choice {
            ManualChoice::Local => (conflict.local.clone(), ResolutionStrategy::Local),
            ManualChoice::Server => (conflict.server.clone(), ResolutionStrategy::Server),
            ManualChoice::Custom(record) => (record, ResolutionStrategy::Merge),
        };
        record.id = conflict.local.id.clone();
        record.entity_type = conflict.entity_type.clone();
        record.updated_at = Utc::now();
        record.base_updated_at = Some(conflict.server.updated_at);

        conflict.mark_resolved(
            ConflictStatus::Resolved,
            strategy,
            ResolvedBy::User,
            record.clone(),
        );
        let queued = self
            .store
            .apply_manual_resolution(&conflict, &record, PRIORITY_HIGH)
            .await?;

        tracing::info!(
            "Conflict {} resolved by user with {}; queued update {}",
            conflict.id,
            strategy,
            queued.id
        );
        Ok(true)
    }

    /// Conflicts awaiting the user, newest first.
    pub async fn pending(&self, limit: usize) -> Result<Vec<Conflict>> {
        self.store
            .list_conflicts(Some(ConflictStatus::Pending), limit)
            .await
    }

    /// Delete settled conflicts older than `retention`. Pending ones are kept.
    pub async fn cleanup(&self, retention: Duration) -> Result<usize> {
        let removed = self.store.prune_conflicts(Utc::now() - retention).await?;
        if removed > 0 {
            tracing::debug!("Pruned {removed} settled conflict(s)");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MutationAction, NewMutation, RecordId, ResolutionRule, PRIORITY_NORMAL};
    use chrono::DateTime;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pair(local_memo: &str, server_memo: &str) -> (Record, Record) {
        let base_at: DateTime<Utc> = Utc::now() - Duration::minutes(10);
        let mut base = Record::new("anniversary").with_field("name", "Wedding");
        base.id = RecordId::canonical("srv-7");
        base.updated_at = base_at;
        base.base_updated_at = Some(base_at);

        let mut local = base.clone();
        local.set_field_at("memo", local_memo, base_at + Duration::minutes(1));
        let mut server = base;
        server.set_field_at("memo", server_memo, base_at + Duration::minutes(2));
        (local, server)
    }

    async fn resolver_with(config: ResolverConfig) -> ConflictResolver {
        let store = LocalStore::open_in_memory().unwrap();
        let resolver = ConflictResolver::new(store);
        resolver.set_config(&config).await.unwrap();
        resolver
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clean_when_nothing_diverges() {
        let resolver = resolver_with(ResolverConfig::default()).await;
        let (local, _) = pair("A", "B");

        assert_eq!(
            resolver.process(&local, &local).await.unwrap(),
            Resolution::Clean
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auto_resolution_is_persisted() {
        let config = ResolverConfig::default()
            .with_rule(ResolutionRule::new("memo", ResolutionStrategy::Merge));
        let resolver = resolver_with(config).await;
        let (local, server) = pair("A", "B");

        let Resolution::AutoResolved { conflict, record } =
            resolver.process(&local, &server).await.unwrap()
        else {
            panic!("expected auto resolution");
        };

        assert_eq!(record.field("memo"), &json!("A\n\n--- merged from server ---\nB"));
        let stored = resolver.store.get_conflict(&conflict.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ConflictStatus::AutoResolved);
        assert_eq!(stored.resolved_by, Some(ResolvedBy::System));
        let saved = resolver.store.get(&local.id).await.unwrap().unwrap();
        assert_eq!(saved.field("memo"), record.field("memo"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_rule_leaves_conflict_pending() {
        let config = ResolverConfig::default()
            .with_rule(ResolutionRule::new("memo", ResolutionStrategy::Manual));
        let resolver = resolver_with(config).await;
        let (local, server) = pair("A", "B");

        let Resolution::Pending(conflict) = resolver.process(&local, &server).await.unwrap() else {
            panic!("expected pending conflict");
        };
        assert_eq!(resolver.pending(10).await.unwrap(), vec![conflict]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_manually_requeues_high_priority_update() {
        let config = ResolverConfig {
            auto_resolve: false,
            ..ResolverConfig::default()
        };
        let resolver = resolver_with(config).await;
        let (local, server) = pair("A", "B");

        let blocked = resolver
            .store
            .enqueue(NewMutation::update(local.clone()), PRIORITY_NORMAL)
            .await
            .unwrap();
        let Resolution::Pending(conflict) = resolver.process(&local, &server).await.unwrap() else {
            panic!("expected pending conflict");
        };
        resolver
            .store
            .block_mutation(blocked.id, &conflict.id)
            .await
            .unwrap();

        assert!(resolver
            .resolve_manually(&conflict.id, ManualChoice::Server)
            .await
            .unwrap());

        let queued = resolver.store.dequeue_by_priority(10).collect().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].action, MutationAction::Update);
        assert_eq!(queued[0].priority, PRIORITY_HIGH);

        let stored = resolver.store.get(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.field("memo"), &json!("B"));
        assert_eq!(stored.base_updated_at, Some(server.updated_at));

        let settled = resolver.store.get_conflict(&conflict.id).await.unwrap().unwrap();
        assert_eq!(settled.status, ConflictStatus::Resolved);
        assert_eq!(settled.resolved_by, Some(ResolvedBy::User));

        // Already settled
        assert!(!resolver
            .resolve_manually(&conflict.id, ManualChoice::Local)
            .await
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_manually_with_custom_record() {
        let config = ResolverConfig {
            auto_resolve: false,
            ..ResolverConfig::default()
        };
        let resolver = resolver_with(config).await;
        let (local, server) = pair("A", "B");
        let Resolution::Pending(conflict) = resolver.process(&local, &server).await.unwrap() else {
            panic!("expected pending conflict");
        };

        let custom = Record::new("anniversary")
            .with_field("name", "Wedding")
            .with_field("memo", "A and B");
        assert!(resolver
            .resolve_manually(&conflict.id, ManualChoice::Custom(custom))
            .await
            .unwrap());

        let stored = resolver.store.get(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.field("memo"), &json!("A and B"));
        assert!(!resolver
            .resolve_manually("missing", ManualChoice::Local)
            .await
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cleanup_keeps_pending_conflicts() {
        let config = ResolverConfig {
            auto_resolve: false,
            ..ResolverConfig::default()
        };
        let resolver = resolver_with(config).await;
        let (local, server) = pair("A", "B");
        let Resolution::Pending(mut conflict) = resolver.process(&local, &server).await.unwrap()
        else {
            panic!("expected pending conflict");
        };
        conflict.created_at = Utc::now() - Duration::days(400);
        resolver.store.save_conflict(&conflict).await.unwrap();

        assert_eq!(resolver.cleanup(Duration::days(30)).await.unwrap(), 0);
        assert!(resolver.store.get_conflict(&conflict.id).await.unwrap().is_some());
    }
}
