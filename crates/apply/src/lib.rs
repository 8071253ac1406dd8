//! OCM apply: the write path shared by every hub controller.
//!
//! Reads come from informer caches (`ocm-store`); writes go through a [`Writer`]. Status is
//! merge-patched only when it differs from what the cache holds, guarded by the cached
//! resourceVersion so a stale writer gets a conflict instead of clobbering a newer status.

#![forbid(unsafe_code)]

pub mod testing;

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use metrics::counter;
use ocm_core::object_key;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

/// Anything the hub writes: a statically typed, serializable kube resource.
pub trait Object: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static {}

impl<T> Object for T where T: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static {}

pub fn kind_of<K: Object>() -> String { K::kind(&()).into_owned() }

pub fn key_of<K: Object>(obj: &K) -> String { object_key(obj.meta().namespace.as_deref(), obj.meta().name.as_deref().unwrap_or_default()) }

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error("serializing {kind}: {source}")]
    Serialize { kind: String, source: serde_json::Error },
    #[error("{kind} {key:?} not found")]
    NotFound { kind: String, key: String },
    #[error("{kind} {key:?} already exists")]
    AlreadyExists { kind: String, key: String },
    #[error("{kind} has no metadata.name")]
    MissingName { kind: String },
}

impl PatchError {
    pub fn is_not_found(&self) -> bool {
        match self {
            PatchError::NotFound { .. } => true,
            PatchError::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    pub fn is_already_exists(&self) -> bool {
        match self {
            PatchError::AlreadyExists { .. } => true,
            PatchError::Kube(kube::Error::Api(ae)) => ae.code == 409 && ae.reason == "AlreadyExists",
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool { matches!(self, PatchError::Kube(kube::Error::Api(ae)) if ae.code == 409) }
}

#[async_trait]
pub trait Writer: Send + Sync {
    async fn create<K: Object>(&self, obj: &K) -> Result<K, PatchError>;

    async fn replace<K: Object>(&self, obj: &K) -> Result<K, PatchError>;

    async fn delete<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<(), PatchError>;

    /// Merge-patch `status` onto `obj`'s status subresource.
    async fn patch_status<K: Object>(&self, obj: &K, status: serde_json::Value) -> Result<K, PatchError>;
}

/// [`Writer`] backed by the API server.
#[derive(Clone)]
pub struct KubeWriter {
    client: Client,
    manager: String,
}

impl KubeWriter {
    pub fn new(client: Client, manager: &str) -> Self { Self { client, manager: manager.to_string() } }

    fn api<K: Object>(&self, namespace: Option<&str>) -> Api<K> {
        match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &()),
            None => Api::all_with(self.client.clone(), &()),
        }
    }

    fn post_params(&self) -> PostParams { PostParams { dry_run: false, field_manager: Some(self.manager.clone()) } }
}

fn name_of<K: Object>(obj: &K) -> Result<&str, PatchError> {
    obj.meta().name.as_deref().ok_or_else(|| PatchError::MissingName { kind: kind_of::<K>() })
}

#[async_trait]
impl Writer for KubeWriter {
    async fn create<K: Object>(&self, obj: &K) -> Result<K, PatchError> {
        let api = self.api::<K>(obj.meta().namespace.as_deref());
        Ok(api.create(&self.post_params(), obj).await?)
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K, PatchError> {
        let api = self.api::<K>(obj.meta().namespace.as_deref());
        Ok(api.replace(name_of(obj)?, &self.post_params(), obj).await?)
    }

    async fn delete<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<(), PatchError> {
        self.api::<K>(namespace).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn patch_status<K: Object>(&self, obj: &K, status: serde_json::Value) -> Result<K, PatchError> {
        let api = self.api::<K>(obj.meta().namespace.as_deref());
        let mut patch = json!({ "status": status });
        if let Some(rv) = obj.meta().resource_version.as_deref() {
            patch["metadata"] = json!({ "resourceVersion": rv });
        }
        let pp = PatchParams { field_manager: Some(self.manager.clone()), ..Default::default() };
        Ok(api.patch_status(name_of(obj)?, &pp, &Patch::Merge(&patch)).await?)
    }
}

/// Patch `obj`'s status to `new` unless it already equals `old`. Returns whether a write happened.
pub async fn patch_status_if_changed<W, K, S>(writer: &W, obj: &K, new: &S, old: &S) -> Result<bool, PatchError>
where
    W: Writer,
    K: Object,
    S: Serialize + PartialEq + Sync,
{
    if new == old {
        return Ok(false);
    }
    let status = serde_json::to_value(new).map_err(|source| PatchError::Serialize { kind: kind_of::<K>(), source })?;
    writer.patch_status(obj, status).await?;
    counter!("ocm_status_patches_total", 1u64);
    debug!(kind = %kind_of::<K>(), key = %key_of(obj), "status patched");
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

/// Create `desired` when `existing` is absent, otherwise replace it when `differs` says so.
/// The replacement carries the existing resourceVersion.
pub async fn create_or_update<W, K, F>(writer: &W, existing: Option<&K>, mut desired: K, differs: F) -> Result<(Applied, K), PatchError>
where
    W: Writer,
    K: Object,
    F: Fn(&K, &K) -> bool,
{
    match existing {
        None => {
            let created = writer.create(&desired).await?;
            debug!(kind = %kind_of::<K>(), key = %key_of(&created), "created");
            Ok((Applied::Created, created))
        }
        Some(cur) if !differs(cur, &desired) => Ok((Applied::Unchanged, cur.clone())),
        Some(cur) => {
            desired.meta_mut().resource_version = cur.meta().resource_version.clone();
            let updated = writer.replace(&desired).await?;
            debug!(kind = %kind_of::<K>(), key = %key_of(&updated), "updated");
            Ok((Applied::Updated, updated))
        }
    }
}

/// Merge `labels` into `meta`, reporting whether anything changed.
pub fn merge_labels(meta: &mut ObjectMeta, labels: &BTreeMap<String, String>) -> bool {
    let current = meta.labels.get_or_insert_with(BTreeMap::new);
    let mut changed = false;
    for (k, v) in labels {
        if current.get(k) != Some(v) {
            current.insert(k.clone(), v.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingWriter, Verb};
    use ocm_core::placement::{Placement, PlacementSpec, PlacementStatus};

    fn placement() -> Placement {
        let mut p = Placement::new("p", PlacementSpec::default());
        p.metadata.namespace = Some("ns".into());
        p
    }

    #[tokio::test]
    async fn unchanged_status_is_not_written() {
        let w = RecordingWriter::new();
        let p = placement();
        w.seed(&p);
        let status = PlacementStatus { number_of_selected_clusters: 2, ..Default::default() };
        assert!(!patch_status_if_changed(&w, &p, &status, &status).await.expect("ok"));
        assert!(w.actions().is_empty());
        assert!(patch_status_if_changed(&w, &p, &status, &PlacementStatus::default()).await.expect("ok"));
        assert_eq!(w.actions()[0].verb, Verb::PatchStatus);
        let stored: Placement = w.get(Some("ns"), "p").expect("stored");
        assert_eq!(stored.status.map(|s| s.number_of_selected_clusters), Some(2));
    }

    #[tokio::test]
    async fn create_or_update_follows_existing() {
        let w = RecordingWriter::new();
        let differs = |a: &Placement, b: &Placement| a.spec != b.spec;
        let (applied, created) = create_or_update(&w, None, placement(), differs).await.expect("ok");
        assert_eq!(applied, Applied::Created);
        let (applied, _) = create_or_update(&w, Some(&created), placement(), differs).await.expect("ok");
        assert_eq!(applied, Applied::Unchanged);
        let mut next = placement();
        next.spec.number_of_clusters = Some(3);
        let (applied, updated) = create_or_update(&w, Some(&created), next, differs).await.expect("ok");
        assert_eq!(applied, Applied::Updated);
        assert_eq!(updated.spec.number_of_clusters, Some(3));
        assert_eq!(w.actions().iter().map(|a| a.verb).collect::<Vec<_>>(), vec![Verb::Create, Verb::Replace]);
    }

    #[test]
    fn merge_labels_reports_changes() {
        let mut meta = ObjectMeta::default();
        let want = BTreeMap::from([("a".to_string(), "1".to_string())]);
        assert!(merge_labels(&mut meta, &want));
        assert!(!merge_labels(&mut meta, &want));
    }

    #[test]
    fn error_classification() {
        let nf = PatchError::NotFound { kind: "Placement".into(), key: "ns/p".into() };
        assert!(nf.is_not_found());
        assert!(!nf.is_conflict());
        assert!(PatchError::AlreadyExists { kind: "Placement".into(), key: "ns/p".into() }.is_already_exists());
    }
}
