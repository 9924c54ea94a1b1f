//! Space router
//!
//! Resolves object types to the spaces they are polled from, and keeps the
//! `spaces` collection of owner/classification records up to date.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use super::policy::classify;
use super::{IdentityContext, SpaceKind};
use crate::db::query::Filter;
use crate::db::schemas::SpaceDoc;
use crate::db::{Collection, DocumentCache};
use crate::types::Result;

/// One monitored space and the object types read from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub space_id: String,
    pub kind: SpaceKind,
    pub object_types: Vec<String>,
}

/// Maps object types to spaces
pub struct SpaceRouter {
    identity: Arc<dyn IdentityContext>,
    records: Option<Collection<SpaceDoc>>,
}

impl SpaceRouter {
    /// Router without persisted space records
    pub fn new(identity: Arc<dyn IdentityContext>) -> Self {
        Self {
            identity,
            records: None,
        }
    }

    /// Router that persists space records in the cache
    pub fn with_cache(identity: Arc<dyn IdentityContext>, cache: &DocumentCache) -> Result<Self> {
        Ok(Self {
            identity,
            records: Some(Collection::open(cache)?),
        })
    }

    pub fn identity(&self) -> &Arc<dyn IdentityContext> {
        &self.identity
    }

    /// Space classification of an object type
    pub fn classify(&self, object_type: &str) -> SpaceKind {
        classify(object_type)
    }

    /// Resolve the concrete space of an owner for a classification
    ///
    /// The caller's own spaces come from the identity context; anyone
    /// else's come from the recorded space records.
    pub fn resolve(&self, owner: &str, kind: SpaceKind) -> Result<Option<String>> {
        if self.identity.is_own(owner) {
            if let Some(space) = self.identity.space_for(kind) {
                return Ok(Some(space.to_string()));
            }
        }

        let Some(ref records) = self.records else {
            return Ok(None);
        };
        Ok(records
            .get(&SpaceDoc::record_id(owner, kind))?
            .map(|record| record.space_id))
    }

    /// Record which space an owner uses for a classification
    ///
    /// Replaces any previous record for the same owner and kind, which keeps
    /// at most one private space per owner.
    pub fn record_space(&self, owner: &str, kind: SpaceKind, space_id: &str) -> Result<()> {
        let Some(ref records) = self.records else {
            return Ok(());
        };

        let id = SpaceDoc::record_id(owner, kind);
        let mut record = SpaceDoc::new(owner, kind, space_id);
        if let Some(existing) = records.get(&id)? {
            if existing.space_id == space_id {
                record.last_sync_at = existing.last_sync_at;
            } else {
                info!(
                    owner = owner,
                    kind = %kind,
                    old = %existing.space_id,
                    new = space_id,
                    "Space record replaced"
                );
            }
        }
        records.upsert(&record)
    }

    /// Record every space configured for the caller's own identity
    pub fn record_own_spaces(&self) -> Result<usize> {
        let Some(owner) = self.identity.own_aid() else {
            return Ok(0);
        };
        let mut recorded = 0;
        for kind in SpaceKind::ALL {
            if let Some(space_id) = self.identity.space_for(kind) {
                self.record_space(owner, kind, space_id)?;
                recorded += 1;
            }
        }
        Ok(recorded)
    }

    /// Stamp the last-sync time on every record pointing at a space
    pub fn touch_last_sync(&self, space_id: &str) -> Result<usize> {
        let Some(ref records) = self.records else {
            return Ok(0);
        };

        let matching = records.find(
            &Filter::new().eq("spaceId", space_id),
            &Default::default(),
        )?;
        let now = Utc::now();
        for mut record in matching.iter().cloned() {
            record.last_sync_at = Some(now);
            records.upsert(&record)?;
        }
        Ok(matching.len())
    }

    /// Space records of an owner
    pub fn records_for(&self, owner: &str) -> Result<Vec<SpaceDoc>> {
        let Some(ref records) = self.records else {
            return Ok(Vec::new());
        };
        records.find(&Filter::new().eq("ownerKey", owner), &Default::default())
    }

    /// Group object types into monitored targets
    ///
    /// Each resolved space becomes one target holding every type that reads
    /// from it. Types whose classification has no configured space are
    /// skipped.
    pub fn targets<S: AsRef<str>>(&self, object_types: &[S]) -> Vec<Target> {
        let mut targets: Vec<Target> = Vec::new();

        for object_type in object_types {
            let object_type = object_type.as_ref();
            let kind = classify(object_type);
            let Some(space_id) = self.identity.space_for(kind) else {
                debug!(object_type = object_type, kind = %kind, "No space configured, not polling");
                continue;
            };

            match targets.iter_mut().find(|t| t.space_id == space_id) {
                Some(target) => {
                    if !target.object_types.iter().any(|t| t == object_type) {
                        target.object_types.push(object_type.to_string());
                    }
                }
                None => targets.push(Target {
                    space_id: space_id.to_string(),
                    kind,
                    object_types: vec![object_type.to_string()],
                }),
            }
        }

        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CacheConfig;
    use crate::space::StaticIdentity;

    fn identity() -> Arc<dyn IdentityContext> {
        Arc::new(StaticIdentity {
            own_aid: Some("alice".into()),
            private_space: Some("sp-alice".into()),
            community_space: Some("sp-community".into()),
            community_readonly_space: Some("sp-announce".into()),
            admin_space: None,
            org_ids: vec![],
        })
    }

    #[test]
    fn test_targets_group_by_space() {
        let router = SpaceRouter::new(identity());
        let targets = router.targets(&[
            "ChatMessage",
            "ChatChannel",
            "ChatReaction",
            "Bookmark",
            "ModerationAction",
        ]);

        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].space_id, "sp-community");
        assert_eq!(targets[0].object_types, vec!["ChatMessage", "ChatReaction"]);
        assert_eq!(targets[1].space_id, "sp-announce");
        assert_eq!(targets[1].kind, SpaceKind::CommunityReadonly);
        assert_eq!(targets[2].space_id, "sp-alice");
        // No admin space configured
        assert!(!targets.iter().any(|t| t.kind == SpaceKind::Admin));
    }

    #[test]
    fn test_resolve_own_and_recorded() {
        let cache = DocumentCache::open(CacheConfig::temporary()).unwrap();
        let router = SpaceRouter::with_cache(identity(), &cache).unwrap();

        assert_eq!(
            router.resolve("alice", SpaceKind::Private).unwrap().as_deref(),
            Some("sp-alice")
        );
        assert_eq!(router.resolve("bob", SpaceKind::Private).unwrap(), None);

        router.record_space("bob", SpaceKind::Private, "sp-bob").unwrap();
        assert_eq!(
            router.resolve("bob", SpaceKind::Private).unwrap().as_deref(),
            Some("sp-bob")
        );
    }

    #[test]
    fn test_one_private_space_per_owner() {
        let cache = DocumentCache::open(CacheConfig::temporary()).unwrap();
        let router = SpaceRouter::with_cache(identity(), &cache).unwrap();

        router.record_space("bob", SpaceKind::Private, "sp-bob-1").unwrap();
        router.record_space("bob", SpaceKind::Private, "sp-bob-2").unwrap();

        let records = router.records_for("bob").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].space_id, "sp-bob-2");
    }

    #[test]
    fn test_touch_last_sync() {
        let cache = DocumentCache::open(CacheConfig::temporary()).unwrap();
        let router = SpaceRouter::with_cache(identity(), &cache).unwrap();
        assert_eq!(router.record_own_spaces().unwrap(), 3);

        assert_eq!(router.touch_last_sync("sp-community").unwrap(), 1);
        let records = router.records_for("alice").unwrap();
        let community = records
            .iter()
            .find(|r| r.kind == SpaceKind::Community)
            .unwrap();
        assert!(community.last_sync_at.is_some());

        // Re-recording the same space keeps the sync time
        router.record_own_spaces().unwrap();
        let records = router.records_for("alice").unwrap();
        assert!(records
            .iter()
            .any(|r| r.kind == SpaceKind::Community && r.last_sync_at.is_some()));
    }
}
