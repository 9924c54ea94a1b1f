//! Reconciliation of one monitored space
//!
//! A pass reads the full snapshot of every object type of the target,
//! diffs it against the known-object set, caches what is new (or moved its
//! mutable marker) and publishes one change record for each.
//!
//! The first successful read of a type only records the baseline; it never
//! emits, so restarts do not replay history to clients.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::change::{ChangeKind, ChangeRecord};
use super::known::{KnownObjects, Marker, Phase};
use super::project::{
    dedup_credentials, dedup_latest, project_credential, project_object, Projection,
    CREDENTIAL_TYPE,
};
use super::reader::ObjectReader;
use crate::db::DocumentStore;
use crate::events::EventSink;
use crate::space::{IdentityContext, SpaceKind, SpaceRouter, Target};
use crate::types::{Result, WatchError};

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Time between passes (default: 5 seconds)
    pub interval: Duration,
    /// Skip passes while nobody is subscribed (default: true)
    pub require_subscribers: bool,
    /// Deadline for each replication read and cache call (default: 10 seconds)
    pub upstream_timeout: Duration,
    /// How long `stop` waits for the task to exit (default: 3 seconds)
    pub shutdown_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            require_subscribers: true,
            upstream_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// Why a pass did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    NoSubscribers,
    NoSpace,
}

/// Outcome of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub skipped: Option<SkipReason>,
    /// Ids recorded by seeding
    pub seeded: usize,
    /// `new` records published
    pub created: usize,
    /// `updated` records published
    pub updated: usize,
    /// Objects whose data did not fit their schema
    pub malformed: usize,
    /// Cache writes that failed (retried next pass)
    pub cache_failures: usize,
    /// Seeded objects cached on a later pass, silently
    pub recached: usize,
}

impl PassReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn emitted(&self) -> usize {
        self.created + self.updated
    }
}

/// Per-type view for the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStatus {
    pub object_type: String,
    pub phase: Phase,
    pub known: usize,
    /// Known ids still missing from the cache
    pub uncached: usize,
}

/// Target view for the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub space_id: String,
    pub kind: SpaceKind,
    pub types: Vec<TypeStatus>,
    pub passes: u64,
    pub failures: u64,
    pub emitted: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pass_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Projection result of one snapshot entry
struct Projected {
    id: String,
    projection: Result<Projection>,
}

/// Reconciler for one target
pub struct Reconciler {
    target: Target,
    reader: Arc<dyn ObjectReader>,
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn EventSink>,
    identity: Arc<dyn IdentityContext>,
    router: Option<Arc<SpaceRouter>>,
    config: ReconcileConfig,
    /// Held for the whole pass; serializes ticker and push passes
    known: Mutex<KnownObjects>,
    passes: AtomicU64,
    failures: AtomicU64,
    emitted: AtomicU64,
    status: std::sync::Mutex<TargetStatus>,
}

impl Reconciler {
    pub fn new(
        target: Target,
        reader: Arc<dyn ObjectReader>,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn EventSink>,
        identity: Arc<dyn IdentityContext>,
        config: ReconcileConfig,
    ) -> Self {
        let status = TargetStatus {
            space_id: target.space_id.clone(),
            kind: target.kind,
            types: target
                .object_types
                .iter()
                .map(|t| TypeStatus {
                    object_type: t.clone(),
                    phase: Phase::Unseeded,
                    known: 0,
                    uncached: 0,
                })
                .collect(),
            passes: 0,
            failures: 0,
            emitted: 0,
            last_pass_at: None,
            last_error: None,
        };

        Self {
            target,
            reader,
            store,
            sink,
            identity,
            router: None,
            config,
            known: Mutex::new(KnownObjects::new()),
            passes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            status: std::sync::Mutex::new(status),
        }
    }

    /// Stamp space records after every successful pass
    pub fn with_router(mut self, router: Arc<SpaceRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn space_id(&self) -> &str {
        &self.target.space_id
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Latest status snapshot
    pub fn status(&self) -> TargetStatus {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Phase of one object type
    pub async fn phase(&self, object_type: &str) -> Phase {
        self.known.lock().await.phase(object_type)
    }

    /// Run one pass and log its outcome
    ///
    /// Failures never propagate: the known set is untouched and the next
    /// trigger retries.
    pub async fn run_pass(&self) -> Option<PassReport> {
        match self.reconcile_pass().await {
            Ok(report) => {
                if report.emitted() > 0 || report.seeded > 0 {
                    info!(
                        space_id = %self.target.space_id,
                        seeded = report.seeded,
                        created = report.created,
                        updated = report.updated,
                        "Reconciliation pass"
                    );
                }
                Some(report)
            }
            Err(e) => {
                if e.is_transient() {
                    debug!(space_id = %self.target.space_id, error = %e, "Pass skipped, upstream unavailable");
                } else {
                    warn!(space_id = %self.target.space_id, error = %e, "Pass failed");
                }
                None
            }
        }
    }

    /// One full read-and-diff pass over every type of the target
    ///
    /// Snapshots of all types are read before any state changes; a failed
    /// read leaves the known set exactly as it was.
    pub async fn reconcile_pass(&self) -> Result<PassReport> {
        if self.target.space_id.is_empty() || self.target.object_types.is_empty() {
            return Ok(PassReport::skipped(SkipReason::NoSpace));
        }
        if self.config.require_subscribers && !self.sink.has_subscribers().await {
            return Ok(PassReport::skipped(SkipReason::NoSubscribers));
        }

        let mut known = self.known.lock().await;
        self.passes.fetch_add(1, Ordering::Relaxed);

        for object_type in &self.target.object_types {
            known.begin_seeding(object_type);
        }

        let snapshots = match self.read_snapshots().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.update_status(&known, Some(e.to_string()));
                return Err(e);
            }
        };

        let mut report = PassReport::default();
        for (object_type, entries) in self.target.object_types.iter().zip(snapshots) {
            if known.phase(object_type) == Phase::SteadyState {
                self.apply_changes(&mut known, object_type, entries, &mut report)
                    .await;
            } else {
                self.seed(&mut known, object_type, entries, &mut report).await;
            }
        }

        self.emitted
            .fetch_add(report.emitted() as u64, Ordering::Relaxed);
        self.update_status(&known, None);
        drop(known);

        if let Some(ref router) = self.router {
            if let Err(e) = router.touch_last_sync(&self.target.space_id) {
                warn!(space_id = %self.target.space_id, error = %e, "Failed to record last sync");
            }
        }

        Ok(report)
    }

    async fn read_snapshots(&self) -> Result<Vec<Vec<Projected>>> {
        let space_id = self.target.space_id.as_str();
        let mut snapshots = Vec::with_capacity(self.target.object_types.len());

        for object_type in &self.target.object_types {
            let snapshot = if object_type == CREDENTIAL_TYPE {
                let credentials = self
                    .deadline(self.reader.read_credentials(space_id))
                    .await?;
                dedup_credentials(credentials)
                    .iter()
                    .map(|c| Projected {
                        id: c.said.clone(),
                        projection: project_credential(c, space_id, self.identity.as_ref()),
                    })
                    .collect()
            } else {
                let objects = self
                    .deadline(self.reader.read_objects_by_type(space_id, object_type))
                    .await?;
                dedup_latest(objects)
                    .iter()
                    // Objects of other types are not ours to track
                    .filter(|o| &o.object_type == object_type)
                    .map(|o| Projected {
                        id: o.id.clone(),
                        projection: project_object(o, space_id),
                    })
                    .collect()
            };
            debug!(space_id = %space_id, object_type = %object_type, "Snapshot read");
            snapshots.push(snapshot);
        }

        Ok(snapshots)
    }

    /// Record the baseline of a type; emits nothing
    ///
    /// Documents are still cached so direct queries see history. Ids whose
    /// write fails are known but flagged uncached; steady-state passes
    /// retry them without emitting.
    async fn seed(
        &self,
        known: &mut KnownObjects,
        object_type: &str,
        entries: Vec<Projected>,
        report: &mut PassReport,
    ) {
        let mut observed = Vec::with_capacity(entries.len());
        let mut uncached = Vec::new();
        for entry in entries {
            match entry.projection {
                Ok(projection) => {
                    if let Err(e) = self.cache(&projection).await {
                        report.cache_failures += 1;
                        warn!(object_type = object_type, id = %entry.id, error = %e, "Failed to cache seeded object");
                        uncached.push(entry.id.clone());
                    }
                    observed.push((entry.id, projection.marker));
                }
                Err(e) => {
                    report.malformed += 1;
                    warn!(object_type = object_type, id = %entry.id, error = %e, "Skipping malformed object");
                    observed.push((entry.id, None));
                }
            }
        }

        report.seeded += observed.len();
        known.complete_seed(object_type, observed);
        for id in &uncached {
            known.mark_uncached(object_type, id);
        }
        info!(
            space_id = %self.target.space_id,
            object_type = object_type,
            known = known.len(object_type),
            "Seeded"
        );
    }

    async fn apply_changes(
        &self,
        known: &mut KnownObjects,
        object_type: &str,
        entries: Vec<Projected>,
        report: &mut PassReport,
    ) {
        for entry in entries {
            let is_known = known.contains(object_type, &entry.id);

            let projection = match entry.projection {
                Ok(projection) => projection,
                Err(e) => {
                    if !is_known {
                        report.malformed += 1;
                        warn!(object_type = object_type, id = %entry.id, error = %e, "Skipping malformed object");
                        known.insert(object_type, &entry.id, None);
                    }
                    continue;
                }
            };

            let kind = if !is_known {
                ChangeKind::New
            } else {
                match projection.marker {
                    Some(marker) if advances(&marker, known.marker(object_type, &entry.id)) => {
                        ChangeKind::Updated
                    }
                    _ => {
                        if known.is_uncached(object_type, &entry.id) {
                            self.recache(known, object_type, &entry.id, &projection, report)
                                .await;
                        }
                        continue;
                    }
                }
            };

            // Cache before announcing; a failed write is retried next pass
            if let Err(e) = self.cache(&projection).await {
                report.cache_failures += 1;
                warn!(object_type = object_type, id = %entry.id, error = %e, "Failed to cache object");
                continue;
            }
            known.insert(object_type, &entry.id, projection.marker);
            known.clear_uncached(object_type, &entry.id);

            let mut record = ChangeRecord::new(
                kind,
                object_type,
                entry.id.clone(),
                projection.payload,
                self.target.space_id.clone(),
            );
            if let Some(event) = projection.event {
                if kind == ChangeKind::New {
                    record = record.with_event(event);
                }
            }

            debug!(event = %record.event, id = %entry.id, "Change detected");
            self.sink.publish(record).await;

            match kind {
                ChangeKind::New => report.created += 1,
                ChangeKind::Updated => report.updated += 1,
            }
        }
    }

    /// Retry the cache write of a seeded object; emits nothing
    async fn recache(
        &self,
        known: &mut KnownObjects,
        object_type: &str,
        id: &str,
        projection: &Projection,
        report: &mut PassReport,
    ) {
        match self.cache(projection).await {
            Ok(()) => {
                known.clear_uncached(object_type, id);
                report.recached += 1;
                debug!(object_type = object_type, id = %id, "Seeded object cached");
            }
            Err(e) => {
                report.cache_failures += 1;
                warn!(object_type = object_type, id = %id, error = %e, "Failed to cache seeded object");
            }
        }
    }

    async fn cache(&self, projection: &Projection) -> Result<()> {
        self.deadline(self.store.upsert_doc(
            projection.collection,
            &projection.doc_id,
            projection.doc.clone(),
        ))
        .await
    }

    async fn deadline<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.upstream_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(WatchError::Timeout(format!(
                "no answer within {:?} for space {}",
                self.config.upstream_timeout, self.target.space_id
            ))),
        }
    }

    fn update_status(&self, known: &KnownObjects, error: Option<String>) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.types = self
            .target
            .object_types
            .iter()
            .map(|t| TypeStatus {
                object_type: t.clone(),
                phase: known.phase(t),
                known: known.len(t),
                uncached: known.uncached_len(t),
            })
            .collect();
        status.passes = self.passes.load(Ordering::Relaxed);
        status.failures = self.failures.load(Ordering::Relaxed);
        status.emitted = self.emitted.load(Ordering::Relaxed);
        status.last_pass_at = Some(Utc::now());
        status.last_error = error;
    }
}

/// Whether a marker moves past the last one recorded
fn advances(marker: &Marker, previous: Option<Marker>) -> bool {
    marker.supersedes(&previous.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CacheConfig, DocumentCache};
    use crate::reconcile::reader::{RemoteCredential, RemoteObject};
    use crate::space::StaticIdentity;
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeReader {
        objects: std::sync::Mutex<HashMap<String, Vec<RemoteObject>>>,
        credentials: std::sync::Mutex<Vec<RemoteCredential>>,
        failing: std::sync::atomic::AtomicBool,
    }

    impl FakeReader {
        fn set(&self, object_type: &str, objects: Vec<RemoteObject>) {
            self.objects
                .lock()
                .unwrap()
                .insert(object_type.to_string(), objects);
        }

        fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ObjectReader for FakeReader {
        async fn read_objects_by_type(&self, _space: &str, object_type: &str) -> Result<Vec<RemoteObject>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(WatchError::TransientUpstream("partitioned".into()));
            }
            Ok(self
                .objects
                .lock()
                .unwrap()
                .get(object_type)
                .cloned()
                .unwrap_or_default())
        }

        async fn read_credentials(&self, _space: &str) -> Result<Vec<RemoteCredential>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(WatchError::TransientUpstream("partitioned".into()));
            }
            Ok(self.credentials.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: std::sync::Mutex<Vec<ChangeRecord>>,
        listening: bool,
    }

    impl RecordingSink {
        fn listening() -> Self {
            Self {
                listening: true,
                ..Default::default()
            }
        }

        fn events(&self) -> Vec<(String, String)> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(|r| (r.event.clone(), r.object_id.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, record: ChangeRecord) {
            self.records.lock().unwrap().push(record);
        }

        async fn has_subscribers(&self) -> bool {
            self.listening
        }
    }

    fn channel(id: &str) -> RemoteObject {
        RemoteObject {
            id: id.into(),
            object_type: "ChatChannel".into(),
            data: json!({ "name": id }),
            version: None,
        }
    }

    fn message(id: &str, minute: u32, extra: JsonValue) -> RemoteObject {
        let mut data = json!({
            "channelId": "general",
            "senderAid": "bob",
            "content": format!("text of {}", id),
            "sentAt": format!("2024-05-01T10:{:02}:00Z", minute),
        });
        if let (Some(map), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
            map.extend(extra.clone());
        }
        RemoteObject {
            id: id.into(),
            object_type: "ChatMessage".into(),
            data,
            version: None,
        }
    }

    struct Fixture {
        reader: Arc<FakeReader>,
        sink: Arc<RecordingSink>,
        cache: DocumentCache,
        reconciler: Reconciler,
    }

    fn fixture(types: &[&str], sink: RecordingSink) -> Fixture {
        let reader = Arc::new(FakeReader::default());
        let sink = Arc::new(sink);
        let cache = DocumentCache::open(CacheConfig::temporary()).unwrap();
        let identity = Arc::new(StaticIdentity {
            own_aid: Some("alice".into()),
            community_space: Some("sp-community".into()),
            ..Default::default()
        });
        let target = Target {
            space_id: "sp-community".into(),
            kind: SpaceKind::Community,
            object_types: types.iter().map(|t| t.to_string()).collect(),
        };
        let reconciler = Reconciler::new(
            target,
            reader.clone(),
            Arc::new(cache.clone()),
            sink.clone(),
            identity,
            ReconcileConfig::default(),
        );
        Fixture {
            reader,
            sink,
            cache,
            reconciler,
        }
    }

    #[tokio::test]
    async fn test_seed_is_silent() {
        let f = fixture(&["ChatChannel"], RecordingSink::listening());
        f.reader.set("ChatChannel", vec![channel("a"), channel("b"), channel("c")]);

        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.seeded, 3);
        assert_eq!(report.emitted(), 0);
        assert!(f.sink.events().is_empty());
        assert_eq!(f.reconciler.phase("ChatChannel").await, Phase::SteadyState);

        // History is still queryable
        assert!(f.cache.get("chat_channels", "b").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_detects_each_new_object_once() {
        let f = fixture(&["ChatChannel"], RecordingSink::listening());
        f.reader.set("ChatChannel", vec![channel("a"), channel("b")]);
        f.reconciler.reconcile_pass().await.unwrap();

        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.emitted(), 0);

        f.reader
            .set("ChatChannel", vec![channel("a"), channel("b"), channel("c")]);
        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(
            f.sink.events(),
            vec![("chat:channel:new".to_string(), "c".to_string())]
        );

        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.emitted(), 0);
        assert_eq!(f.sink.events().len(), 1);
    }

    #[tokio::test]
    async fn test_read_failure_leaves_state_untouched() {
        let f = fixture(&["ChatChannel"], RecordingSink::listening());
        f.reader.set("ChatChannel", vec![channel("a")]);
        f.reconciler.reconcile_pass().await.unwrap();

        f.reader.set("ChatChannel", vec![channel("a"), channel("b")]);
        f.reader.fail(true);
        let err = f.reconciler.reconcile_pass().await.unwrap_err();
        assert!(err.is_transient());
        assert!(f.reconciler.run_pass().await.is_none());
        assert!(f.sink.events().is_empty());
        assert_eq!(f.reconciler.status().failures, 2);

        f.reader.fail(false);
        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.created, 1);
    }

    #[tokio::test]
    async fn test_failed_seed_stays_seeding() {
        let f = fixture(&["ChatChannel"], RecordingSink::listening());
        f.reader.set("ChatChannel", vec![channel("a")]);
        f.reader.fail(true);

        assert!(f.reconciler.reconcile_pass().await.is_err());
        assert_eq!(f.reconciler.phase("ChatChannel").await, Phase::Seeding);

        // The retry is still a silent seed
        f.reader.fail(false);
        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.seeded, 1);
        assert!(f.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_no_subscribers_is_noop() {
        let f = fixture(&["ChatChannel"], RecordingSink::default());
        f.reader.set("ChatChannel", vec![channel("a")]);

        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::NoSubscribers));
        assert_eq!(f.reconciler.phase("ChatChannel").await, Phase::Unseeded);
    }

    #[tokio::test]
    async fn test_empty_space_is_noop() {
        let reader = Arc::new(FakeReader::default());
        let cache = DocumentCache::open(CacheConfig::temporary()).unwrap();
        let reconciler = Reconciler::new(
            Target {
                space_id: String::new(),
                kind: SpaceKind::Private,
                object_types: vec!["Bookmark".into()],
            },
            reader,
            Arc::new(cache),
            Arc::new(RecordingSink::listening()),
            Arc::new(StaticIdentity::default()),
            ReconcileConfig::default(),
        );
        let report = reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::NoSpace));
    }

    #[tokio::test]
    async fn test_edit_emits_update_once() {
        let f = fixture(&["ChatMessage"], RecordingSink::listening());
        f.reader.set("ChatMessage", vec![message("m1", 0, json!({}))]);
        f.reconciler.reconcile_pass().await.unwrap();

        let edited = message(
            "m1",
            0,
            json!({ "content": "fixed", "editedAt": "2024-05-01T10:03:00Z" }),
        );
        f.reader.set("ChatMessage", vec![edited]);
        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            f.sink.events(),
            vec![("chat:message:updated".to_string(), "m1".to_string())]
        );
        let cached = f.cache.get("chat_messages", "m1").unwrap().unwrap();
        assert_eq!(cached["content"], "fixed");

        // Same marker again: nothing
        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.emitted(), 0);
    }

    #[tokio::test]
    async fn test_malformed_object_is_skipped_once() {
        let f = fixture(&["ChatMessage"], RecordingSink::listening());
        f.reader.set("ChatMessage", vec![message("m1", 0, json!({}))]);
        f.reconciler.reconcile_pass().await.unwrap();

        let broken = RemoteObject {
            id: "bad".into(),
            object_type: "ChatMessage".into(),
            data: json!({ "content": "no channel" }),
            version: None,
        };
        f.reader
            .set("ChatMessage", vec![message("m1", 0, json!({})), broken]);

        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.malformed, 1);
        assert_eq!(report.emitted(), 0);

        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.malformed, 0);
    }

    #[tokio::test]
    async fn test_credentials_split_by_recipient() {
        let f = fixture(&["Credential"], RecordingSink::listening());
        f.reconciler.reconcile_pass().await.unwrap();

        let credential = |said: &str, recipient: &str| RemoteCredential {
            said: said.into(),
            issuer: "steward".into(),
            recipient: recipient.into(),
            schema: "membership".into(),
            data: JsonValue::Null,
        };
        *f.reader.credentials.lock().unwrap() =
            vec![credential("E1", "alice"), credential("E2", "carol")];

        let report = f.reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(
            f.sink.events(),
            vec![
                ("credential:new".to_string(), "E1".to_string()),
                ("credential:community".to_string(), "E2".to_string()),
            ]
        );
        assert!(f.cache.get("credentials_cache", "E2").unwrap().is_some());
    }

    /// Cache that refuses writes while `failing` is set
    struct FlakyStore {
        cache: DocumentCache,
        failing: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn upsert_doc(&self, collection: &str, id: &str, doc: JsonValue) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(WatchError::Storage("disk full".into()));
            }
            self.cache.upsert_doc(collection, id, doc).await
        }
    }

    #[tokio::test]
    async fn test_seed_cache_failure_is_retried_silently() {
        let reader = Arc::new(FakeReader::default());
        let sink = Arc::new(RecordingSink::listening());
        let cache = DocumentCache::open(CacheConfig::temporary()).unwrap();
        let store = Arc::new(FlakyStore {
            cache: cache.clone(),
            failing: std::sync::atomic::AtomicBool::new(true),
        });
        let reconciler = Reconciler::new(
            Target {
                space_id: "sp-community".into(),
                kind: SpaceKind::Community,
                object_types: vec!["ChatChannel".into()],
            },
            reader.clone(),
            store.clone(),
            sink.clone(),
            Arc::new(StaticIdentity::default()),
            ReconcileConfig::default(),
        );
        reader.set("ChatChannel", vec![channel("a")]);

        let report = reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.seeded, 1);
        assert_eq!(report.cache_failures, 1);
        assert!(cache.get("chat_channels", "a").unwrap().is_none());
        assert_eq!(reconciler.status().types[0].uncached, 1);

        // Still failing: counted again, nothing emitted
        let report = reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.cache_failures, 1);
        assert_eq!(report.recached, 0);

        store.failing.store(false, Ordering::SeqCst);
        let report = reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.recached, 1);
        assert_eq!(report.emitted(), 0);
        assert!(cache.get("chat_channels", "a").unwrap().is_some());
        assert_eq!(reconciler.status().types[0].uncached, 0);

        let report = reconciler.reconcile_pass().await.unwrap();
        assert_eq!(report.recached, 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_passes_emit_once() {
        let f = fixture(&["ChatChannel"], RecordingSink::listening());
        f.reader.set("ChatChannel", vec![channel("a"), channel("b")]);
        f.reconciler.reconcile_pass().await.unwrap();

        f.reader
            .set("ChatChannel", vec![channel("a"), channel("b"), channel("c")]);
        let (first, second) = tokio::join!(
            f.reconciler.reconcile_pass(),
            f.reconciler.reconcile_pass()
        );
        assert_eq!(first.unwrap().created + second.unwrap().created, 1);
        assert_eq!(
            f.sink.events(),
            vec![("chat:channel:new".to_string(), "c".to_string())]
        );
    }

    #[tokio::test]
    async fn test_status_tracks_phases() {
        let f = fixture(&["ChatChannel", "ChatMessage"], RecordingSink::listening());
        f.reader.set("ChatChannel", vec![channel("general")]);
        f.reconciler.reconcile_pass().await.unwrap();

        let status = f.reconciler.status();
        assert_eq!(status.passes, 1);
        assert_eq!(status.types.len(), 2);
        assert_eq!(status.types[0].known, 1);
        assert!(status.types.iter().all(|t| t.phase == Phase::SteadyState));
    }
}
