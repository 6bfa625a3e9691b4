// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Declarative object store.
//!
//! Reconcilers never talk to the API server directly. They read the few
//! collaborator objects they need through [`ObjectStore`] and hand the child
//! objects they render to [`ObjectStore::apply`] as [`ChildObject`]s.
//! [`KubeStore`] is the API server implementation; tests use an in-memory one.

use crate::cert_manager::{Certificate, ClusterIssuer, Issuer};
use crate::crd::{Mesh, NodeGroup};
use crate::metrics::{record_resource_applied, record_resource_deleted};
use crate::reconcilers::resources::{
    apply_cluster, apply_namespaced, delete_namespaced, get_namespaced,
};
use crate::reconcilers::retry::retry_api_call;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use kube::api::{ListParams, ObjectMeta, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Every kind of object the operator writes.
#[derive(Clone, Debug, PartialEq)]
pub enum ChildObject {
    Certificate(Certificate),
    Issuer(Issuer),
    ClusterIssuer(ClusterIssuer),
    ConfigMap(ConfigMap),
    Secret(Secret),
    Service(Service),
    StatefulSet(StatefulSet),
    Deployment(Deployment),
    Pod(Pod),
    PersistentVolumeClaim(PersistentVolumeClaim),
    NodeGroup(NodeGroup),
}

macro_rules! child_object_from {
    ($($kind:ident),* $(,)?) => {
        $(
            impl From<$kind> for ChildObject {
                fn from(object: $kind) -> Self {
                    ChildObject::$kind(object)
                }
            }
        )*

        impl ChildObject {
            /// Metadata of the wrapped object.
            #[must_use]
            pub fn meta(&self) -> &ObjectMeta {
                match self {
                    $(ChildObject::$kind(object) => object.meta(),)*
                }
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                match self {
                    $(ChildObject::$kind(object) => object.meta_mut(),)*
                }
            }

            /// Kubernetes kind of the wrapped object.
            #[must_use]
            pub fn kind(&self) -> &'static str {
                match self {
                    $(ChildObject::$kind(_) => stringify!($kind),)*
                }
            }
        }
    };
}

child_object_from!(
    Certificate,
    Issuer,
    ClusterIssuer,
    ConfigMap,
    Secret,
    Service,
    StatefulSet,
    Deployment,
    Pod,
    PersistentVolumeClaim,
    NodeGroup,
);

impl ChildObject {
    #[must_use]
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Namespace of the object, empty for cluster-scoped kinds.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    /// The object without owner references, for clusters its owners do not live in.
    #[must_use]
    pub fn without_owners(mut self) -> Self {
        self.meta_mut().owner_references = None;
        self
    }
}

/// Read and write access to the objects a reconciler touches.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_mesh(&self, namespace: &str, name: &str) -> Result<Option<Mesh>>;

    /// Node groups in `namespace` carrying every label in `selector`.
    async fn list_node_groups(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<NodeGroup>>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Create or update `object`, owning every field it declares.
    async fn apply(&self, object: &ChildObject, field_manager: &str) -> Result<()>;

    /// Returns `false` when the pod did not exist.
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Returns `false` when the claim did not exist.
    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Replace the finalizer list of a node group.
    async fn patch_finalizers(&self, group: &NodeGroup, finalizers: &[String]) -> Result<()>;

    /// Store for the cluster described by `kubeconfig` (YAML).
    async fn for_kubeconfig(&self, kubeconfig: &str) -> Result<Arc<dyn ObjectStore>>;
}

/// Label selector string in `k=v,k=v` form.
#[must_use]
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_mesh(&self, namespace: &str, name: &str) -> Result<Option<Mesh>> {
        get_namespaced(&self.client, namespace, name).await
    }

    async fn list_node_groups(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<NodeGroup>> {
        let api: Api<NodeGroup> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&selector_string(selector));
        let groups = retry_api_call(|| api.list(&lp), "list node groups").await?;
        debug!(
            namespace = %namespace,
            count = groups.items.len(),
            "Listed node groups"
        );
        Ok(groups.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        get_namespaced(&self.client, namespace, name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        get_namespaced(&self.client, namespace, name).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        get_namespaced(&self.client, namespace, name).await
    }

    async fn apply(&self, object: &ChildObject, field_manager: &str) -> Result<()> {
        let client = &self.client;
        let result = match object {
            ChildObject::Certificate(o) => apply_namespaced(client, o, field_manager).await,
            ChildObject::Issuer(o) => apply_namespaced(client, o, field_manager).await,
            ChildObject::ClusterIssuer(o) => apply_cluster(client, o, field_manager).await,
            ChildObject::ConfigMap(o) => apply_namespaced(client, o, field_manager).await,
            ChildObject::Secret(o) => apply_namespaced(client, o, field_manager).await,
            ChildObject::Service(o) => apply_namespaced(client, o, field_manager).await,
            ChildObject::StatefulSet(o) => apply_namespaced(client, o, field_manager).await,
            ChildObject::Deployment(o) => apply_namespaced(client, o, field_manager).await,
            ChildObject::Pod(o) => apply_namespaced(client, o, field_manager).await,
            ChildObject::PersistentVolumeClaim(o) => {
                apply_namespaced(client, o, field_manager).await
            }
            ChildObject::NodeGroup(o) => apply_namespaced(client, o, field_manager).await,
        };
        result.with_context(|| {
            format!(
                "failed to apply {} {}/{}",
                object.kind(),
                object.namespace(),
                object.name()
            )
        })?;
        record_resource_applied(object.kind());
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<bool> {
        let deleted = delete_namespaced::<Pod>(&self.client, namespace, name).await?;
        if deleted {
            record_resource_deleted("Pod");
        }
        Ok(deleted)
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<bool> {
        let deleted =
            delete_namespaced::<PersistentVolumeClaim>(&self.client, namespace, name).await?;
        if deleted {
            record_resource_deleted("PersistentVolumeClaim");
        }
        Ok(deleted)
    }

    async fn patch_finalizers(&self, group: &NodeGroup, finalizers: &[String]) -> Result<()> {
        let namespace = group.namespace().unwrap_or_default();
        let api: Api<NodeGroup> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        api.patch(&group.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn for_kubeconfig(&self, kubeconfig: &str) -> Result<Arc<dyn ObjectStore>> {
        let kubeconfig =
            Kubeconfig::from_yaml(kubeconfig).context("failed to parse remote kubeconfig")?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("failed to load remote kubeconfig")?;
        let client = Client::try_from(config).context("failed to create remote client")?;
        debug!(namespace = %client.default_namespace(), "Connected to remote cluster");
        Ok(Arc::new(KubeStore::new(client)))
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
