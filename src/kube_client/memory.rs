//! In-memory cluster substrate
//!
//! Stores Deployments and ConfigMaps in process and emulates the parts of the
//! API server and garbage collector this tool relies on:
//!
//! - name collisions on create are rejected with [`Error::AlreadyExists`]
//! - every object gets a UID; owner references are tracked in a reverse index
//!   (owner UID -> dependents)
//! - foreground deletion removes dependents depth-first before the owner
//! - default deletion removes only the object; orphaned dependents linger
//!   until [`InMemoryCluster::collect_garbage`] runs, like background GC
//!
//! Every trait call is recorded as an [`ApiCall`] so tests can assert on the
//! exact request sequence.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use parking_lot::Mutex;

use super::{ClusterApi, DeletePropagation, CONFIG_MAP_KIND, DEPLOYMENT_KIND};
use crate::Error;

/// Identity of a stored object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Resource kind
    pub kind: &'static str,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectKey {
    fn new(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// A request issued through [`ClusterApi`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiCall {
    /// `get_deployment`
    GetDeployment { namespace: String, name: String },
    /// `create_deployment`
    CreateDeployment { namespace: String, name: String },
    /// `delete_deployment`
    DeleteDeployment { namespace: String, name: String },
    /// `set_deployment_replicas`
    SetReplicas {
        namespace: String,
        name: String,
        replicas: i32,
    },
    /// `create_config_map`
    CreateConfigMap { namespace: String, name: String },
    /// `get_config_map`
    GetConfigMap { namespace: String, name: String },
    /// `delete_config_map`
    DeleteConfigMap {
        namespace: String,
        name: String,
        propagation: DeletePropagation,
    },
}

impl ApiCall {
    /// True for calls that change cluster state
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::GetDeployment { .. } | Self::GetConfigMap { .. }
        )
    }
}

/// Operation class used to inject failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Any create
    Create,
    /// Any delete
    Delete,
    /// Replica updates
    Update,
}

enum Stored {
    Deployment(Deployment),
    ConfigMap(ConfigMap),
}

impl Stored {
    fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Deployment(d) => &d.metadata,
            Self::ConfigMap(c) => &c.metadata,
        }
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Deployment(d) => &mut d.metadata,
            Self::ConfigMap(c) => &mut c.metadata,
        }
    }
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, Stored>,
    /// UID -> object, for live owners only
    uids: HashMap<String, ObjectKey>,
    /// Owner UID -> objects that reference it
    dependents: HashMap<String, BTreeSet<ObjectKey>>,
    next_uid: u64,
    calls: Vec<ApiCall>,
    failures: HashSet<(Operation, String)>,
}

impl State {
    fn check_failure(&self, op: Operation, kind: &str, name: &str) -> Result<(), Error> {
        if !self.failures.contains(&(op, name.to_string())) {
            return Ok(());
        }
        Err(match op {
            Operation::Create => Error::creation(kind, name, "injected failure"),
            Operation::Delete => Error::deletion(kind, name, "injected failure"),
            Operation::Update => Error::update(kind, name, "injected failure"),
        })
    }

    fn insert(&mut self, key: ObjectKey, mut object: Stored) -> Result<&Stored, Error> {
        if self.objects.contains_key(&key) {
            return Err(Error::already_exists(key.kind, key.name));
        }

        self.next_uid += 1;
        let uid = format!("{:08x}-0000-4000-8000-{:012x}", self.next_uid, self.next_uid);
        let meta = object.meta_mut();
        meta.namespace = Some(key.namespace.clone());
        meta.uid = Some(uid.clone());
        meta.resource_version = Some("1".to_string());

        for owner in meta.owner_references.iter().flatten() {
            self.dependents
                .entry(owner.uid.clone())
                .or_default()
                .insert(key.clone());
        }
        self.uids.insert(uid, key.clone());
        self.objects.insert(key.clone(), object);
        Ok(&self.objects[&key])
    }

    fn remove(&mut self, key: &ObjectKey, propagation: DeletePropagation) {
        let Some(uid) = self.objects.get(key).and_then(|o| o.meta().uid.clone()) else {
            return;
        };

        if propagation == DeletePropagation::Foreground {
            let dependents = self.dependents.remove(&uid).unwrap_or_default();
            for dependent in dependents {
                if self.has_other_live_owner(&dependent, &uid) {
                    self.drop_owner_reference(&dependent, &uid);
                } else {
                    self.remove(&dependent, DeletePropagation::Foreground);
                }
            }
        }

        if let Some(object) = self.objects.remove(key) {
            for owner in object.meta().owner_references.iter().flatten() {
                if let Some(set) = self.dependents.get_mut(&owner.uid) {
                    set.remove(key);
                    if set.is_empty() {
                        self.dependents.remove(&owner.uid);
                    }
                }
            }
        }
        // Orphans left by a default delete are found by scanning objects
        self.dependents.remove(&uid);
        self.uids.remove(&uid);
    }

    fn has_other_live_owner(&self, key: &ObjectKey, owner_uid: &str) -> bool {
        self.objects
            .get(key)
            .and_then(|o| o.meta().owner_references.as_ref())
            .map(|refs| {
                refs.iter()
                    .any(|r| r.uid != owner_uid && self.uids.contains_key(&r.uid))
            })
            .unwrap_or(false)
    }

    fn drop_owner_reference(&mut self, key: &ObjectKey, owner_uid: &str) {
        if let Some(object) = self.objects.get_mut(key) {
            if let Some(refs) = object.meta_mut().owner_references.as_mut() {
                refs.retain(|r| r.uid != owner_uid);
            }
        }
    }
}

/// In-process cluster implementing [`ClusterApi`]
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a Deployment without recording a call
    pub fn with_deployment(self, namespace: &str, deployment: Deployment) -> Self {
        let key = ObjectKey::new(DEPLOYMENT_KIND, namespace, &deployment.name_any());
        // Seeding an already present name is a test setup bug; keep the first copy.
        let _ = self
            .state
            .lock()
            .insert(key, Stored::Deployment(deployment));
        self
    }

    /// Seed a ConfigMap without recording a call
    pub fn with_config_map(self, namespace: &str, config_map: ConfigMap) -> Self {
        let key = ObjectKey::new(CONFIG_MAP_KIND, namespace, &config_map.name_any());
        let _ = self.state.lock().insert(key, Stored::ConfigMap(config_map));
        self
    }

    /// Make every `op` against an object called `name` fail
    pub fn fail_on(&self, op: Operation, name: &str) {
        self.state.lock().failures.insert((op, name.to_string()));
    }

    /// Remove a previously injected failure
    pub fn clear_failure(&self, op: Operation, name: &str) {
        self.state.lock().failures.remove(&(op, name.to_string()));
    }

    /// All calls recorded so far
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Current copy of a Deployment
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        match self
            .state
            .lock()
            .objects
            .get(&ObjectKey::new(DEPLOYMENT_KIND, namespace, name))
        {
            Some(Stored::Deployment(d)) => Some(d.clone()),
            _ => None,
        }
    }

    /// Current copy of a ConfigMap
    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        match self
            .state
            .lock()
            .objects
            .get(&ObjectKey::new(CONFIG_MAP_KIND, namespace, name))
        {
            Some(Stored::ConfigMap(c)) => Some(c.clone()),
            _ => None,
        }
    }

    /// `spec.replicas` of a Deployment, if it exists
    pub fn replicas(&self, namespace: &str, name: &str) -> Option<i32> {
        self.deployment(namespace, name)
            .map(|d| d.spec.and_then(|s| s.replicas).unwrap_or(1))
    }

    /// Objects whose owner references name `uid`
    ///
    /// Scans every object rather than consulting the reverse index.
    pub fn objects_owned_by(&self, uid: &str) -> Vec<ObjectKey> {
        self.state
            .lock()
            .objects
            .iter()
            .filter(|(_, o)| {
                o.meta()
                    .owner_references
                    .iter()
                    .flatten()
                    .any(|r| r.uid == uid)
            })
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Delete objects whose owners are all gone, until nothing changes
    pub fn collect_garbage(&self) -> usize {
        let mut state = self.state.lock();
        let mut collected = 0;
        loop {
            let orphans: Vec<ObjectKey> = state
                .objects
                .iter()
                .filter(|(_, o)| {
                    let refs = o.meta().owner_references.as_deref().unwrap_or_default();
                    !refs.is_empty() && refs.iter().all(|r| !state.uids.contains_key(&r.uid))
                })
                .map(|(k, _)| k.clone())
                .collect();
            if orphans.is_empty() {
                return collected;
            }
            for key in orphans {
                state.remove(&key, DeletePropagation::Default);
                collected += 1;
            }
        }
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, Error> {
        let mut state = self.state.lock();
        state.calls.push(ApiCall::GetDeployment {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        match state
            .objects
            .get(&ObjectKey::new(DEPLOYMENT_KIND, namespace, name))
        {
            Some(Stored::Deployment(d)) => Ok(d.clone()),
            _ => Err(Error::not_found(DEPLOYMENT_KIND, name)),
        }
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: Deployment,
    ) -> Result<Deployment, Error> {
        let name = deployment.name_any();
        let mut state = self.state.lock();
        state.calls.push(ApiCall::CreateDeployment {
            namespace: namespace.to_string(),
            name: name.clone(),
        });
        state.check_failure(Operation::Create, DEPLOYMENT_KIND, &name)?;
        let key = ObjectKey::new(DEPLOYMENT_KIND, namespace, &name);
        match state.insert(key, Stored::Deployment(deployment))? {
            Stored::Deployment(d) => Ok(d.clone()),
            Stored::ConfigMap(_) => unreachable!("deployment key holds a deployment"),
        }
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.calls.push(ApiCall::DeleteDeployment {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        state.check_failure(Operation::Delete, DEPLOYMENT_KIND, name)?;
        let key = ObjectKey::new(DEPLOYMENT_KIND, namespace, name);
        if !state.objects.contains_key(&key) {
            return Err(Error::not_found(DEPLOYMENT_KIND, name));
        }
        state.remove(&key, DeletePropagation::Default);
        Ok(())
    }

    async fn set_deployment_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.calls.push(ApiCall::SetReplicas {
            namespace: namespace.to_string(),
            name: name.to_string(),
            replicas,
        });
        state.check_failure(Operation::Update, DEPLOYMENT_KIND, name)?;
        match state
            .objects
            .get_mut(&ObjectKey::new(DEPLOYMENT_KIND, namespace, name))
        {
            Some(Stored::Deployment(d)) => {
                d.spec
                    .get_or_insert_with(DeploymentSpec::default)
                    .replicas = Some(replicas);
                Ok(())
            }
            _ => Err(Error::not_found(DEPLOYMENT_KIND, name)),
        }
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: ConfigMap,
    ) -> Result<ConfigMap, Error> {
        let name = config_map.name_any();
        let mut state = self.state.lock();
        state.calls.push(ApiCall::CreateConfigMap {
            namespace: namespace.to_string(),
            name: name.clone(),
        });
        state.check_failure(Operation::Create, CONFIG_MAP_KIND, &name)?;
        let key = ObjectKey::new(CONFIG_MAP_KIND, namespace, &name);
        match state.insert(key, Stored::ConfigMap(config_map))? {
            Stored::ConfigMap(c) => Ok(c.clone()),
            Stored::Deployment(_) => unreachable!("configmap key holds a configmap"),
        }
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, Error> {
        let mut state = self.state.lock();
        state.calls.push(ApiCall::GetConfigMap {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        match state
            .objects
            .get(&ObjectKey::new(CONFIG_MAP_KIND, namespace, name))
        {
            Some(Stored::ConfigMap(c)) => Ok(c.clone()),
            _ => Err(Error::not_found(CONFIG_MAP_KIND, name)),
        }
    }

    async fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
        propagation: DeletePropagation,
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.calls.push(ApiCall::DeleteConfigMap {
            namespace: namespace.to_string(),
            name: name.to_string(),
            propagation,
        });
        state.check_failure(Operation::Delete, CONFIG_MAP_KIND, name)?;
        let key = ObjectKey::new(CONFIG_MAP_KIND, namespace, name);
        if !state.objects.contains_key(&key) {
            return Err(Error::not_found(CONFIG_MAP_KIND, name));
        }
        state.remove(&key, propagation);
        Ok(())
    }
}
