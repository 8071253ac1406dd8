//! OCM store: read-only listers over informer caches.
//!
//! Controllers and the scheduler only read through [`Lister`]; the API server is the sole
//! writer. In production a lister is a `kube::runtime::reflector::Store`; tests and the
//! `schedule` debug command use [`MemStore`].

#![forbid(unsafe_code)]

pub mod selector;

use std::hash::Hash;
use std::sync::Arc;

use arc_swap::ArcSwap;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use ocm_core::object_key;
use rustc_hash::FxHashMap;
use tracing::trace;

pub use selector::{Operator, Requirement, Selector};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key:?} not found")]
    NotFound { kind: String, key: String },
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
}

impl StoreError {
    pub fn not_found<K: Resource>(namespace: Option<&str>, name: &str) -> Self
    where
        K::DynamicType: Default,
    {
        StoreError::NotFound { kind: K::kind(&K::DynamicType::default()).into_owned(), key: object_key(namespace, name) }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound { .. }) }
}

/// Read-only view over cached objects of one kind.
pub trait Lister<K: Resource>: Send + Sync {
    /// `namespace` is ignored for cluster-scoped kinds.
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<K>, StoreError>;

    fn list(&self) -> Vec<Arc<K>>;

    fn list_namespaced(&self, namespace: &str) -> Vec<Arc<K>> {
        self.list().into_iter().filter(|o| o.meta().namespace.as_deref() == Some(namespace)).collect()
    }

    /// Objects whose labels satisfy `sel`.
    fn list_selected(&self, sel: &Selector) -> Vec<Arc<K>> {
        self.list()
            .into_iter()
            .filter(|o| match &o.meta().labels {
                Some(labels) => sel.matches(labels),
                None => sel.matches(&Default::default()),
            })
            .collect()
    }
}

impl<K> Lister<K> for Store<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<K>, StoreError> {
        let mut r = ObjectRef::<K>::new(name);
        if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
            r = r.within(ns);
        }
        Store::get(self, &r).ok_or_else(|| StoreError::not_found::<K>(namespace, name))
    }

    fn list(&self) -> Vec<Arc<K>> { self.state() }
}

/// In-memory lister: copy-on-write map swapped atomically, so readers never block writers.
pub struct MemStore<K> {
    objects: ArcSwap<FxHashMap<String, Arc<K>>>,
}

impl<K> Default for MemStore<K> {
    fn default() -> Self { Self { objects: ArcSwap::from_pointee(FxHashMap::default()) } }
}

impl<K> MemStore<K>
where
    K: Resource + Send + Sync,
{
    pub fn new() -> Self { Self::default() }

    pub fn from_objects(objs: impl IntoIterator<Item = K>) -> Self {
        let store = Self::new();
        for o in objs {
            store.apply(o);
        }
        store
    }

    fn key_of(obj: &K) -> String { object_key(obj.meta().namespace.as_deref(), obj.meta().name.as_deref().unwrap_or_default()) }

    /// Insert or replace by `namespace/name`.
    pub fn apply(&self, obj: K) {
        let key = Self::key_of(&obj);
        let obj = Arc::new(obj);
        trace!(key = %key, "memstore apply");
        self.objects.rcu(|m| {
            let mut next = FxHashMap::clone(m);
            next.insert(key.clone(), Arc::clone(&obj));
            next
        });
    }

    pub fn delete(&self, namespace: Option<&str>, name: &str) -> Option<Arc<K>> {
        let key = object_key(namespace, name);
        let prev = self.objects.load().get(&key).cloned();
        if prev.is_some() {
            self.objects.rcu(|m| {
                let mut next = FxHashMap::clone(m);
                next.remove(&key);
                next
            });
        }
        prev
    }

    pub fn len(&self) -> usize { self.objects.load().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<K> Lister<K> for MemStore<K>
where
    K: Resource + Send + Sync,
    K::DynamicType: Default,
{
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<K>, StoreError> {
        let objects = self.objects.load();
        objects
            .get(&object_key(namespace, name))
            .or_else(|| objects.get(name))
            .cloned()
            .ok_or_else(|| StoreError::not_found::<K>(namespace, name))
    }

    fn list(&self) -> Vec<Arc<K>> {
        let mut out: Vec<Arc<K>> = self.objects.load().values().cloned().collect();
        out.sort_by(|a, b| (a.namespace(), a.name_any()).cmp(&(b.namespace(), b.name_any())));
        out
    }
}
