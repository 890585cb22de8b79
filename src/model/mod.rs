pub mod error;
pub mod store;
pub mod target_api;
pub mod matcher;
pub mod aggregate;
pub mod classify;
pub mod analysis;
pub mod executor;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::domain::matching::{AnalysisBundle, Thresholds};
use crate::domain::progress::ApplyReport;
use crate::server;
use crate::tools::log::{log_info, LogServiceType};

use self::analysis::MatchSnapshot;
use self::classify::ClassifyKnobs;
use self::error::{Error, Result};
use self::executor::{AckItem, AssignItem, CreateFaceItem, Executor, RenameItem};
use self::store::{SourceStore, TargetDbConfig, TargetStore};
use self::target_api::{TargetApiClient, TargetService};

/// Owns the lazily-connected store singletons, the target API client and
/// the analysis snapshot cache. Cheap to clone into handlers.
#[derive(Clone)]
pub struct ModelController {
    source: Arc<RwLock<Option<Arc<SourceStore>>>>,
    target: Arc<RwLock<Option<Arc<TargetStore>>>>,
    api: Arc<TargetApiClient>,
    snapshot: Arc<RwLock<Option<Arc<MatchSnapshot>>>>,
    load_lock: Arc<Mutex<()>>,
}

impl ModelController {
    pub fn new() -> Self {
        Self {
            source: Arc::new(RwLock::new(None)),
            target: Arc::new(RwLock::new(None)),
            api: Arc::new(TargetApiClient::new()),
            snapshot: Arc::new(RwLock::new(None)),
            load_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn source_store(&self) -> Result<Arc<SourceStore>> {
        if let Some(store) = self.source.read().await.clone() {
            return Ok(store);
        }
        let settings = server::get_settings().await;
        let path = settings
            .source_db_path
            .ok_or_else(|| Error::SourceUnreachable("source_db_path is not configured".to_string()))?;
        let store = Arc::new(SourceStore::new(PathBuf::from(path)).await?);
        *self.source.write().await = Some(store.clone());
        Ok(store)
    }

    pub async fn target_store(&self) -> Result<Arc<TargetStore>> {
        if let Some(store) = self.target.read().await.clone() {
            return Ok(store);
        }
        let settings = server::get_settings().await;
        let config = TargetDbConfig {
            host: settings.target_db_host,
            port: settings.target_db_port,
            name: settings.target_db_name,
            user: settings.target_db_user,
            password: settings.target_db_password,
        };
        let store = Arc::new(TargetStore::connect(&config).await?);
        *self.target.write().await = Some(store.clone());
        Ok(store)
    }

    /// Dropped connections are re-established on next use; the snapshot
    /// goes with them since it was read through them.
    pub async fn reset_source(&self) {
        *self.source.write().await = None;
        self.reset_snapshot().await;
    }

    pub async fn reset_target(&self) {
        *self.target.write().await = None;
        self.reset_snapshot().await;
    }

    pub async fn reset_snapshot(&self) {
        *self.snapshot.write().await = None;
    }

    pub async fn source_status(&self) -> Value {
        match self.source_store().await {
            Ok(store) => match store.totals().await {
                Ok(totals) => {
                    let mut status = json!({ "connected": true });
                    merge_into(&mut status, json!(totals));
                    status
                }
                Err(error) => json!({ "connected": false, "error": error.to_string() }),
            },
            Err(error) => json!({ "connected": false, "error": error.to_string() }),
        }
    }

    pub async fn target_status(&self) -> Value {
        match self.target_store().await {
            Ok(store) => match store.totals().await {
                Ok(totals) => {
                    let mut status = json!({ "connected": true });
                    merge_into(&mut status, json!(totals));
                    status
                }
                Err(error) => json!({ "connected": false, "error": error.to_string() }),
            },
            Err(error) => json!({ "connected": false, "error": error.to_string() }),
        }
    }

    pub async fn api_status(&self) -> Value {
        match self.api.ping().await {
            Ok(()) => json!({ "connected": true }),
            Err(error) => json!({ "connected": false, "error": error.to_string() }),
        }
    }

    /// Returns the cached snapshot, loading it if absent. The load lock
    /// serializes concurrent first callers: one loads, the rest wait and
    /// reuse.
    pub async fn snapshot(&self, refresh: bool) -> Result<Arc<MatchSnapshot>> {
        if !refresh {
            if let Some(snapshot) = self.snapshot.read().await.clone() {
                return Ok(snapshot);
            }
        }
        let _guard = self.load_lock.lock().await;
        if !refresh {
            if let Some(snapshot) = self.snapshot.read().await.clone() {
                return Ok(snapshot);
            }
        }
        log_info(LogServiceType::Matching, "Loading analysis snapshot".to_string());
        let source = self.source_store().await?;
        let target = self.target_store().await?;
        let snapshot = Arc::new(analysis::load_snapshot(&source, &target).await?);
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub async fn run_full_analysis(
        &self,
        thresholds: Thresholds,
        refresh: bool,
    ) -> Result<AnalysisBundle> {
        analysis::validate_thresholds(&thresholds)?;
        let snapshot = self.snapshot(refresh).await?;
        let knobs = self.knobs().await;
        Ok(analysis::build_bundle(&snapshot, thresholds, &knobs))
    }

    async fn knobs(&self) -> ClassifyKnobs {
        let settings = server::get_settings().await;
        ClassifyKnobs {
            min_matches: settings.min_matches,
            validation_min_minority_faces: settings.validation_min_minority_faces,
            validation_min_minority_share: settings.validation_min_minority_share,
            name_match_case_insensitive: settings.name_match_case_insensitive,
        }
    }

    async fn executor_rule(&self) -> bool {
        server::get_settings().await.name_match_case_insensitive
    }

    pub async fn apply_renames(&self, items: Vec<RenameItem>, dry_run: bool) -> ApplyReport {
        let executor = Executor::new(self.api.as_ref(), self.executor_rule().await);
        executor
            .rename_clusters(items, dry_run, &CancellationToken::new(), None)
            .await
    }

    pub async fn apply_unclustered(&self, items: Vec<AssignItem>, dry_run: bool) -> ApplyReport {
        let executor = Executor::new(self.api.as_ref(), self.executor_rule().await);
        executor
            .assign_unclustered_faces(items, dry_run, &CancellationToken::new(), None)
            .await
    }

    pub async fn apply_create_faces(
        &self,
        src_person_name: &str,
        faces: Vec<CreateFaceItem>,
        dry_run: bool,
    ) -> ApplyReport {
        let executor = Executor::new(self.api.as_ref(), self.executor_rule().await);
        executor
            .create_faces(src_person_name, faces, dry_run, &CancellationToken::new(), None)
            .await
    }

    pub async fn acknowledge(&self, items: Vec<AckItem>) -> ApplyReport {
        let executor = Executor::new(self.api.as_ref(), self.executor_rule().await);
        executor.acknowledge(items, &CancellationToken::new(), None).await
    }
}

impl Default for ModelController {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_into(base: &mut Value, extra: Value) {
    if let (Value::Object(base), Value::Object(extra)) = (base, extra) {
        for (key, value) in extra {
            base.insert(key, value);
        }
    }
}

#[cfg(test)]
pub mod fixtures {
    use std::collections::BTreeMap;

    use crate::domain::face::{
        Cluster, FaceRect, PhotoKey, SourceFace, SourceInventory, SourcePerson, TargetAsset,
        TargetFace, TargetInventory,
    };

    pub fn source_with(faces: Vec<(i64, &str, PhotoKey, FaceRect)>) -> SourceInventory {
        let mut inventory = SourceInventory::default();
        let mut counts: BTreeMap<i64, (String, u64)> = BTreeMap::new();
        for (i, (person_id, name, photo, rect)) in faces.into_iter().enumerate() {
            counts.entry(person_id).or_insert((name.to_string(), 0)).1 += 1;
            inventory
                .faces_by_photo
                .entry(photo.clone())
                .or_default()
                .push(SourceFace {
                    id: i as i64 + 1,
                    person_id,
                    photo,
                    rect,
                });
        }
        for (id, (name, face_count)) in counts {
            inventory.persons.insert(id, SourcePerson { id, name, face_count });
        }
        inventory
    }

    pub fn target_with(
        faces: Vec<(&str, Option<&str>, PhotoKey, FaceRect)>,
        clusters: Vec<(&str, Option<&str>, i64)>,
    ) -> TargetInventory {
        let mut inventory = TargetInventory::default();
        for (face_id, cluster, photo, rect) in faces {
            inventory
                .assets_by_photo
                .entry(photo.clone())
                .or_insert(TargetAsset {
                    asset_id: format!("asset-{}", photo.file_name),
                    image_width: 1000,
                    image_height: 1000,
                });
            inventory
                .faces_by_photo
                .entry(photo.clone())
                .or_default()
                .push(TargetFace {
                    id: face_id.to_string(),
                    asset_id: format!("asset-{}", photo.file_name),
                    photo,
                    rect,
                    cluster_id: cluster.map(|c| c.to_string()),
                });
        }
        for (id, name, total_faces) in clusters {
            inventory.clusters.insert(
                id.to_string(),
                Cluster {
                    id: id.to_string(),
                    name: name.map(|n| n.to_string()),
                    total_faces,
                },
            );
        }
        inventory
    }
}
