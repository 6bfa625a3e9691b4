// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory collaborators for reconciler tests.
//!
//! [`FakeStore`] behaves like a tiny API server: applied objects are recorded
//! in order and the kinds reconcilers read back (secrets, services, pods and
//! node groups) become visible to later reads. [`FakeCompute`] keeps cloud
//! instances in a map and records every insert and delete.

use crate::compute::{
    ComputeClient, ComputeProvider, Image, Instance, Operation, Subnetwork,
};
use crate::constants::{TLS_CA_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use crate::context::Context;
use crate::crd::{Mesh, NodeGroup};
use crate::store::{ChildObject, ObjectStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Pod, Secret, Service, ServiceStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn key_of<K: ResourceExt>(object: &K) -> Key {
    key(&object.namespace().unwrap_or_default(), &object.name_any())
}

#[derive(Default)]
struct StoreState {
    meshes: BTreeMap<Key, Mesh>,
    node_groups: BTreeMap<Key, NodeGroup>,
    secrets: BTreeMap<Key, Secret>,
    services: BTreeMap<Key, Service>,
    pods: BTreeMap<Key, Pod>,
    applied: Vec<ChildObject>,
    deleted_pods: Vec<Key>,
    deleted_pvcs: Vec<Key>,
    finalizer_patches: Vec<(Key, Vec<String>)>,
    remotes: BTreeMap<String, Arc<FakeStore>>,
}

/// In-memory [`ObjectStore`].
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn insert_mesh(&self, mesh: Mesh) {
        self.with_state(|s| s.meshes.insert(key_of(&mesh), mesh));
    }

    pub fn insert_node_group(&self, group: NodeGroup) {
        self.with_state(|s| s.node_groups.insert(key_of(&group), group));
    }

    pub fn insert_secret(&self, secret: Secret) {
        self.with_state(|s| s.secrets.insert(key_of(&secret), secret));
    }

    pub fn insert_service(&self, service: Service) {
        self.with_state(|s| s.services.insert(key_of(&service), service));
    }

    pub fn insert_pod(&self, pod: Pod) {
        self.with_state(|s| s.pods.insert(key_of(&pod), pod));
    }

    /// Register the store returned for `kubeconfig`.
    pub fn add_remote(&self, kubeconfig: &str, remote: Arc<FakeStore>) {
        self.with_state(|s| s.remotes.insert(kubeconfig.to_string(), remote));
    }

    /// Report `ips` as the load balancer ingress of an existing service.
    pub fn set_ingress(&self, namespace: &str, name: &str, ips: &[&str]) {
        self.with_state(|s| {
            let service = s
                .services
                .get_mut(&key(namespace, name))
                .expect("service must be applied before setting its ingress");
            service.status = Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(
                        ips.iter()
                            .map(|ip| LoadBalancerIngress {
                                ip: Some((*ip).to_string()),
                                ..Default::default()
                            })
                            .collect(),
                    ),
                }),
                ..Default::default()
            });
        });
    }

    /// Every applied object, in order.
    pub fn applied(&self) -> Vec<ChildObject> {
        self.with_state(|s| s.applied.clone())
    }

    pub fn applied_of_kind(&self, kind: &str) -> Vec<ChildObject> {
        self.applied()
            .into_iter()
            .filter(|o| o.kind() == kind)
            .collect()
    }

    /// Distinct names of applied objects of `kind`, sorted.
    pub fn applied_names(&self, kind: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .applied_of_kind(kind)
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn clear_applied(&self) {
        self.with_state(|s| s.applied.clear());
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.with_state(|s| s.secrets.get(&key(namespace, name)).cloned())
    }

    pub fn node_group(&self, namespace: &str, name: &str) -> Option<NodeGroup> {
        self.with_state(|s| s.node_groups.get(&key(namespace, name)).cloned())
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.with_state(|s| s.deleted_pods.iter().map(|(_, n)| n.clone()).collect())
    }

    pub fn deleted_pvcs(&self) -> Vec<String> {
        self.with_state(|s| s.deleted_pvcs.iter().map(|(_, n)| n.clone()).collect())
    }

    pub fn finalizer_patches(&self) -> Vec<Vec<String>> {
        self.with_state(|s| {
            s.finalizer_patches
                .iter()
                .map(|(_, f)| f.clone())
                .collect()
        })
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get_mesh(&self, namespace: &str, name: &str) -> Result<Option<Mesh>> {
        Ok(self.with_state(|s| s.meshes.get(&key(namespace, name)).cloned()))
    }

    async fn list_node_groups(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<NodeGroup>> {
        Ok(self.with_state(|s| {
            s.node_groups
                .iter()
                .filter(|((ns, _), _)| ns == namespace)
                .filter(|(_, group)| {
                    let labels = group.labels();
                    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
                })
                .map(|(_, group)| group.clone())
                .collect()
        }))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secret(namespace, name))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.with_state(|s| s.services.get(&key(namespace, name)).cloned()))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.with_state(|s| s.pods.get(&key(namespace, name)).cloned()))
    }

    async fn apply(&self, object: &ChildObject, _field_manager: &str) -> Result<()> {
        self.with_state(|s| {
            s.applied.push(object.clone());
            let k = key(object.namespace(), object.name());
            match object {
                ChildObject::Secret(secret) => {
                    s.secrets.insert(k, secret.clone());
                }
                ChildObject::Service(service) => {
                    let status = s.services.get(&k).and_then(|old| old.status.clone());
                    let mut service = service.clone();
                    service.status = status;
                    s.services.insert(k, service);
                }
                ChildObject::Pod(pod) => {
                    s.pods.insert(k, pod.clone());
                }
                ChildObject::NodeGroup(group) => {
                    s.node_groups.insert(k, group.clone());
                }
                _ => {}
            }
        });
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self.with_state(|s| {
            s.deleted_pods.push(key(namespace, name));
            s.pods.remove(&key(namespace, name)).is_some()
        }))
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self.with_state(|s| {
            s.deleted_pvcs.push(key(namespace, name));
            true
        }))
    }

    async fn patch_finalizers(&self, group: &NodeGroup, finalizers: &[String]) -> Result<()> {
        self.with_state(|s| {
            let k = key_of(group);
            s.finalizer_patches.push((k.clone(), finalizers.to_vec()));
            let stored = s.node_groups.entry(k).or_insert_with(|| group.clone());
            stored.metadata.finalizers = Some(finalizers.to_vec());
        });
        Ok(())
    }

    async fn for_kubeconfig(&self, kubeconfig: &str) -> Result<Arc<dyn ObjectStore>> {
        let remote: Arc<dyn ObjectStore> = self
            .with_state(|s| s.remotes.get(kubeconfig).cloned())
            .ok_or_else(|| anyhow!("unknown kubeconfig"))?;
        Ok(remote)
    }
}

/// A cert-manager style secret with every key populated.
pub fn tls_secret(namespace: &str, name: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (
                TLS_CERT_KEY.to_string(),
                ByteString(format!("{name}-cert").into_bytes()),
            ),
            (
                TLS_PRIVATE_KEY_KEY.to_string(),
                ByteString(format!("{name}-key").into_bytes()),
            ),
            (TLS_CA_KEY.to_string(), ByteString(b"ca".to_vec())),
        ])),
        ..Default::default()
    }
}

/// A secret holding one key.
pub fn opaque_secret(namespace: &str, name: &str, key: &str, value: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            key.to_string(),
            ByteString(value.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

// ============================================================================
// Compute
// ============================================================================

#[derive(Default)]
struct ComputeState {
    instances: BTreeMap<String, Instance>,
    inserted: Vec<Instance>,
    deleted: Vec<String>,
    credentials: Vec<Option<String>>,
}

/// In-memory [`ComputeClient`] and [`ComputeProvider`]. Clones share state.
#[derive(Clone, Default)]
pub struct FakeCompute {
    state: Arc<Mutex<ComputeState>>,
}

struct Done;

#[async_trait]
impl Operation for Done {
    async fn wait(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl FakeCompute {
    fn with_state<T>(&self, f: impl FnOnce(&mut ComputeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn insert_existing(&self, instance: Instance) {
        self.with_state(|s| s.instances.insert(instance.name.clone(), instance));
    }

    pub fn instance(&self, name: &str) -> Option<Instance> {
        self.with_state(|s| s.instances.get(name).cloned())
    }

    pub fn inserted(&self) -> Vec<Instance> {
        self.with_state(|s| s.inserted.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.with_state(|s| s.deleted.clone())
    }

    /// Credentials every client was created with, in order.
    pub fn credentials(&self) -> Vec<Option<String>> {
        self.with_state(|s| s.credentials.clone())
    }
}

#[async_trait]
impl ComputeClient for FakeCompute {
    async fn get_image(&self, project: &str, family: &str) -> Result<Image> {
        Ok(Image {
            name: format!("{family}-latest"),
            self_link: format!("projects/{project}/global/images/{family}-latest"),
        })
    }

    async fn get_subnetwork(&self, project: &str, region: &str, name: &str) -> Result<Subnetwork> {
        Ok(Subnetwork {
            name: name.to_string(),
            self_link: format!("projects/{project}/regions/{region}/subnetworks/{name}"),
            network: String::new(),
        })
    }

    async fn get_instance(&self, _project: &str, _zone: &str, name: &str) -> Result<Option<Instance>> {
        Ok(self.instance(name))
    }

    async fn insert_instance(
        &self,
        _project: &str,
        _zone: &str,
        instance: &Instance,
    ) -> Result<Box<dyn Operation>> {
        self.with_state(|s| {
            s.inserted.push(instance.clone());
            s.instances.insert(instance.name.clone(), instance.clone());
        });
        Ok(Box::new(Done))
    }

    async fn delete_instance(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
    ) -> Result<Box<dyn Operation>> {
        self.with_state(|s| {
            s.deleted.push(name.to_string());
            s.instances.remove(name);
        });
        Ok(Box::new(Done))
    }
}

#[async_trait]
impl ComputeProvider for FakeCompute {
    async fn client(&self, credentials: Option<&str>) -> Result<Arc<dyn ComputeClient>> {
        self.with_state(|s| s.credentials.push(credentials.map(str::to_string)));
        Ok(Arc::new(self.clone()))
    }
}

/// Context over the given fakes.
pub fn context(store: &Arc<FakeStore>, compute: &FakeCompute) -> Context {
    Context::new(store.clone(), Arc::new(compute.clone()))
}
