//! In-memory [`Writer`] that records every write, for controller tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ocm_core::object_key;

use crate::{key_of, kind_of, Object, PatchError, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Replace,
    Delete,
    PatchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub verb: Verb,
    pub kind: String,
    pub key: String,
}

#[derive(Default)]
pub struct RecordingWriter {
    objects: Mutex<BTreeMap<(String, String), serde_json::Value>>,
    actions: Mutex<Vec<Action>>,
}

impl RecordingWriter {
    pub fn new() -> Self { Self::default() }

    /// Store `obj` as if it already existed, without recording an action.
    pub fn seed<K: Object>(&self, obj: &K) {
        if let Ok(v) = serde_json::to_value(obj) {
            self.lock_objects().insert((kind_of::<K>(), key_of(obj)), v);
        }
    }

    pub fn actions(&self) -> Vec<Action> { self.actions.lock().unwrap_or_else(|e| e.into_inner()).clone() }

    pub fn clear_actions(&self) { self.actions.lock().unwrap_or_else(|e| e.into_inner()).clear(); }

    pub fn actions_for(&self, kind: &str) -> Vec<Action> { self.actions().into_iter().filter(|a| a.kind == kind).collect() }

    pub fn get<K: Object>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let v = self.lock_objects().get(&(kind_of::<K>(), object_key(namespace, name))).cloned()?;
        serde_json::from_value(v).ok()
    }

    pub fn list<K: Object>(&self) -> Vec<K> {
        let kind = kind_of::<K>();
        self.lock_objects()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .filter_map(|(_, v)| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    fn lock_objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), serde_json::Value>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, verb: Verb, kind: String, key: String) {
        self.actions.lock().unwrap_or_else(|e| e.into_inner()).push(Action { verb, kind, key });
    }

    fn store<K: Object>(&self, obj: &K, verb: Verb) -> Result<K, PatchError> {
        let kind = kind_of::<K>();
        let key = key_of(obj);
        let mut objects = self.lock_objects();
        let prev = objects.get(&(kind.clone(), key.clone()));
        match (verb, prev) {
            (Verb::Create, Some(_)) => return Err(PatchError::AlreadyExists { kind, key }),
            (Verb::Replace, None) => return Err(PatchError::NotFound { kind, key }),
            _ => {}
        }
        let rv = next_resource_version(prev);
        let mut out = obj.clone();
        out.meta_mut().resource_version = Some(rv);
        let v = serde_json::to_value(&out).map_err(|source| PatchError::Serialize { kind: kind.clone(), source })?;
        objects.insert((kind.clone(), key.clone()), v);
        drop(objects);
        self.record(verb, kind, key);
        Ok(out)
    }
}

fn next_resource_version(prev: Option<&serde_json::Value>) -> String {
    let cur = prev
        .and_then(|v| v.pointer("/metadata/resourceVersion"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    (cur + 1).to_string()
}

#[async_trait]
impl Writer for RecordingWriter {
    async fn create<K: Object>(&self, obj: &K) -> Result<K, PatchError> { self.store(obj, Verb::Create) }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K, PatchError> { self.store(obj, Verb::Replace) }

    async fn delete<K: Object>(&self, namespace: Option<&str>, name: &str) -> Result<(), PatchError> {
        let kind = kind_of::<K>();
        let key = object_key(namespace, name);
        if self.lock_objects().remove(&(kind.clone(), key.clone())).is_none() {
            return Err(PatchError::NotFound { kind, key });
        }
        self.record(Verb::Delete, kind, key);
        Ok(())
    }

    async fn patch_status<K: Object>(&self, obj: &K, status: serde_json::Value) -> Result<K, PatchError> {
        let kind = kind_of::<K>();
        let key = key_of(obj);
        let mut objects = self.lock_objects();
        let Some(cur) = objects.get_mut(&(kind.clone(), key.clone())) else {
            return Err(PatchError::NotFound { kind, key });
        };
        let rv = next_resource_version(Some(cur));
        cur["status"] = status;
        cur["metadata"]["resourceVersion"] = serde_json::Value::String(rv);
        let out = serde_json::from_value(cur.clone()).map_err(|source| PatchError::Serialize { kind: kind.clone(), source })?;
        drop(objects);
        self.record(Verb::PatchStatus, kind, key);
        Ok(out)
    }
}
