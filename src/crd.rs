// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for Webmesh networks.
//!
//! # Resource Types
//!
//! - [`Mesh`] - One overlay network: image defaults, configuration presets, the
//!   bootstrap node group and the certificate issuer policy
//! - [`NodeGroup`] - A homogeneous set of mesh node replicas and where they run
//!
//! # Example: Declaring a mesh
//!
//! ```rust,no_run
//! use webmesh_operator::crd::{IssuerConfig, MeshSpec, NodeGroupSpec};
//!
//! let spec = MeshSpec {
//!     issuer: IssuerConfig {
//!         create: true,
//!         ..Default::default()
//!     },
//!     bootstrap: NodeGroupSpec {
//!         replicas: 3,
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! ```

use crate::cert_manager::IssuerReference;
use crate::constants::{
    API_GROUP_VERSION, DEFAULT_IPV4_NETWORK, DEFAULT_NODE_IMAGE, KIND_CLUSTER_ISSUER, KIND_ISSUER,
};
use crate::errors::WebmeshError;
use crate::labels::{BOOTSTRAP_NODE_GROUP_ANNOTATION, BOOTSTRAP_NODE_GROUP_LABEL};
use k8s_openapi::api::core::v1::{
    Affinity, Container, LocalObjectReference, ObjectReference, PersistentVolumeClaimSpec,
    PodResourceClaim, ResourceRequirements, Toleration,
    TopologySpreadConstraint, Volume, VolumeMount,
};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_image() -> String {
    DEFAULT_NODE_IMAGE.to_string()
}

fn default_ipv4() -> String {
    DEFAULT_IPV4_NETWORK.to_string()
}

fn default_replicas() -> i32 {
    1
}

fn default_grpc_port() -> i32 {
    8443
}

fn default_wireguard_port() -> i32 {
    51820
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

// ============================================================================
// Mesh
// ============================================================================

/// `Mesh` describes one Webmesh overlay network.
///
/// The mesh reconciler derives every descendant object from it: the issuer
/// chain, the admin certificate, the bootstrap node group(s) and the admin
/// client bundles.
///
/// # Example
///
/// ```yaml
/// apiVersion: mesh.webmesh.io/v1
/// kind: Mesh
/// metadata:
///   name: prod
/// spec:
///   issuer:
///     create: true
///   bootstrap:
///     replicas: 3
///     cluster:
///       service:
///         type: LoadBalancer
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "mesh.webmesh.io",
    version = "v1",
    kind = "Mesh",
    namespaced,
    shortname = "mesh",
    doc = "Mesh is a Webmesh overlay network. The operator issues its certificates, runs its bootstrap node group and publishes admin client configuration."
)]
#[serde(rename_all = "camelCase")]
pub struct MeshSpec {
    /// Default container image for every node group of this mesh.
    #[serde(default = "default_image")]
    pub image: String,

    /// Named configuration presets node groups can reference via `configGroup`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_groups: BTreeMap<String, NodeGroupConfig>,

    /// Node group that forms the founding consensus membership.
    ///
    /// A headless service is always created for it. When it declares a
    /// `cluster.service`, a second single-replica group fronts it externally.
    #[serde(default)]
    pub bootstrap: NodeGroupSpec,

    /// IPv4 CIDR of the mesh. Immutable after creation.
    #[serde(default = "default_ipv4")]
    pub ipv4: String,

    /// Certificate issuer policy.
    #[serde(default)]
    pub issuer: IssuerConfig,

    /// Network policy applied to traffic not covered by explicit policies.
    #[serde(default)]
    pub default_network_policy: NetworkPolicy,
}

/// Certificate issuer policy of a mesh.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerConfig {
    /// Create a self-signed CA and an issuer backed by it.
    #[serde(default)]
    pub create: bool,

    /// Kind of issuer to create.
    #[serde(default, rename = "type")]
    pub kind: IssuerKind,

    /// Existing issuer to use when `create` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_ref: Option<IssuerReference>,
}

/// Kind of cert-manager issuer a mesh creates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum IssuerKind {
    #[default]
    Issuer,
    ClusterIssuer,
}

impl IssuerKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IssuerKind::Issuer => KIND_ISSUER,
            IssuerKind::ClusterIssuer => KIND_CLUSTER_ISSUER,
        }
    }
}

/// Default network policy of a mesh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPolicy {
    #[default]
    Accept,
    Deny,
}

impl NetworkPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkPolicy::Accept => "accept",
            NetworkPolicy::Deny => "deny",
        }
    }
}

impl Mesh {
    /// Issuer every certificate of this mesh is signed by.
    ///
    /// A created issuer is always named `{mesh}-ca`.
    #[must_use]
    pub fn issuer_reference(&self) -> IssuerReference {
        if self.spec.issuer.create {
            return IssuerReference {
                name: crate::naming::mesh_ca_name(self),
                kind: Some(self.spec.issuer.kind.as_str().to_string()),
                group: None,
            };
        }
        self.spec.issuer.issuer_ref.clone().unwrap_or_default()
    }

    /// `ObjectReference` pointing at this mesh, as stored in `NodeGroupSpec::mesh`.
    #[must_use]
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(API_GROUP_VERSION.to_string()),
            kind: Some(crate::constants::KIND_MESH.to_string()),
            name: Some(self.name_any()),
            namespace: self.namespace(),
            ..Default::default()
        }
    }
}

// ============================================================================
// NodeGroup
// ============================================================================

/// `NodeGroup` describes one homogeneous group of mesh nodes.
///
/// Exactly one of `cluster` or `googleCloud` must be set. Use
/// [`NodeGroupSpec::target`] to branch on it.
///
/// # Example
///
/// ```yaml
/// apiVersion: mesh.webmesh.io/v1
/// kind: NodeGroup
/// metadata:
///   name: edge
/// spec:
///   mesh:
///     name: prod
///   replicas: 2
///   configGroup: edge
///   cluster:
///     pvcSpec:
///       accessModes: ["ReadWriteOnce"]
///       resources:
///         requests:
///           storage: 1Gi
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "mesh.webmesh.io",
    version = "v1",
    kind = "NodeGroup",
    namespaced,
    derive = "PartialEq",
    shortname = "ng",
    doc = "NodeGroup is a group of Webmesh nodes running either as in-cluster workloads or as cloud compute instances."
)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupSpec {
    /// Container image, falls back to the mesh image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Number of replicas. Immutable after creation.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Mesh this group belongs to. The namespace defaults to the group's.
    #[serde(default)]
    pub mesh: ObjectReference,

    /// Name of a `Mesh.spec.configGroups` preset to start from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_group: Option<String>,

    /// Inline configuration, merged over the preset (inline wins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<NodeGroupConfig>,

    /// Run the group as in-cluster workloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<NodeGroupClusterConfig>,

    /// Run the group as Compute Engine instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_cloud: Option<NodeGroupGoogleCloudConfig>,
}

/// Where a node group runs. Borrowed from a [`NodeGroupSpec`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeploymentTarget<'a> {
    Cluster(&'a NodeGroupClusterConfig),
    GoogleCloud(&'a NodeGroupGoogleCloudConfig),
}

impl NodeGroupSpec {
    /// Returns the single configured deployment target.
    ///
    /// # Errors
    ///
    /// Returns [`WebmeshError::NoDeploymentTarget`] when neither target is set and
    /// [`WebmeshError::MultipleDeploymentTargets`] when both are.
    pub fn target(&self, group: &str) -> Result<DeploymentTarget<'_>, WebmeshError> {
        match (&self.cluster, &self.google_cloud) {
            (Some(cluster), None) => Ok(DeploymentTarget::Cluster(cluster)),
            (None, Some(cloud)) => Ok(DeploymentTarget::GoogleCloud(cloud)),
            (None, None) => Err(WebmeshError::NoDeploymentTarget {
                group: group.to_string(),
            }),
            (Some(_), Some(_)) => Err(WebmeshError::MultipleDeploymentTargets {
                group: group.to_string(),
            }),
        }
    }

    /// The exposure service of an in-cluster group, if any.
    #[must_use]
    pub fn service(&self) -> Option<&NodeGroupLBConfig> {
        self.cluster.as_ref().and_then(|c| c.service.as_ref())
    }

    /// True when replicas keep their data on persistent volumes.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        match (&self.cluster, &self.google_cloud) {
            (Some(cluster), _) => cluster.pvc_spec.is_some(),
            // Cloud replicas always keep their data on the boot disk
            (None, Some(_)) => true,
            (None, None) => false,
        }
    }

    /// Effective image: the group's, then the mesh's, then the default node image.
    #[must_use]
    pub fn image_or<'a>(&'a self, mesh: &'a Mesh) -> &'a str {
        [self.image.as_deref(), Some(mesh.spec.image.as_str())]
            .into_iter()
            .flatten()
            .find(|image| !image.is_empty())
            .unwrap_or(DEFAULT_NODE_IMAGE)
    }
}

impl NodeGroup {
    /// True when this group is the founding bootstrap group of its mesh.
    #[must_use]
    pub fn is_bootstrap(&self) -> bool {
        self.annotations()
            .get(BOOTSTRAP_NODE_GROUP_ANNOTATION)
            .is_some_and(|v| v == "true")
    }

    /// True when this group belongs to its mesh's bootstrap topology.
    #[must_use]
    pub fn has_bootstrap_label(&self) -> bool {
        self.labels()
            .get(BOOTSTRAP_NODE_GROUP_LABEL)
            .is_some_and(|v| v == "true")
    }

    /// Number of replicas as an iteration bound (negative counts are treated as zero).
    #[must_use]
    pub fn replica_count(&self) -> usize {
        usize::try_from(self.spec.replicas).unwrap_or(0)
    }

    /// Namespace of the referenced mesh, defaulting to the group's namespace.
    #[must_use]
    pub fn mesh_namespace(&self) -> String {
        self.spec
            .mesh
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.namespace().unwrap_or_default())
    }
}

/// How in-cluster replicas are materialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum WorkloadKind {
    /// One `StatefulSet` sharing a single configuration.
    #[default]
    StatefulSet,
    /// One standalone `Pod` and `ConfigMap` per replica, restarted independently.
    Pods,
}

/// In-cluster deployment parameters of a node group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupClusterConfig {
    /// Image pull policy of the node container (default `IfNotPresent`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub host_network: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preemption_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topology_spread_constraints: Vec<TopologySpreadConstraint>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_claims: Vec<PodResourceClaim>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_volumes: Vec<Volume>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_volume_mounts: Vec<VolumeMount>,

    /// Sidecars. These always run with a restricted security context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Expose the group outside the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<NodeGroupLBConfig>,

    /// Persist node data. Immutable after creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_spec: Option<PersistentVolumeClaimSpec>,

    /// Kubeconfig of a remote cluster to run the workloads in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<SecretKeyRef>,

    /// Workload shape.
    #[serde(default)]
    pub workload: WorkloadKind,
}

/// External exposure of an in-cluster node group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupLBConfig {
    /// Service type (`ClusterIP`, `NodePort` or `LoadBalancer`).
    #[serde(default = "default_service_type", rename = "type")]
    pub service_type: String,

    /// Port exposing the gRPC API.
    #[serde(default = "default_grpc_port", rename = "grpcPort")]
    pub grpc_port: i32,

    /// Port exposing WireGuard (first replica's port in pod mode).
    #[serde(default = "default_wireguard_port")]
    pub wire_guard_port: i32,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Static external address, skips reading it back from the service.
    #[serde(default, rename = "externalURL", skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

impl Default for NodeGroupLBConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            grpc_port: default_grpc_port(),
            wire_guard_port: default_wireguard_port(),
            annotations: BTreeMap::new(),
            external_url: None,
        }
    }
}

/// Compute Engine deployment parameters of a node group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupGoogleCloudConfig {
    #[serde(default, rename = "projectID")]
    pub project_id: String,

    pub subnetwork: String,

    /// Region of the subnetwork. Derived from `zone` when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,

    pub zone: String,

    pub machine_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Secret key holding a credentials JSON file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretKeyRef>,
}

impl NodeGroupGoogleCloudConfig {
    /// Region, derived from the zone (`us-central1-a` -> `us-central1`) when unset.
    #[must_use]
    pub fn effective_region(&self) -> String {
        if !self.region.is_empty() {
            return self.region.clone();
        }
        match self.zone.rsplit_once('-') {
            Some((region, _)) => region.to_string(),
            None => self.zone.clone(),
        }
    }
}

/// A key of a secret in the node group's namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

// ============================================================================
// Node configuration presets
// ============================================================================

/// Field-by-field merge where `overrides` wins.
///
/// Non-empty strings replace, `true` booleans stick, nested structures merge
/// recursively and non-empty lists replace.
pub trait Merge: Clone + Default {
    #[must_use]
    fn merge(&self, overrides: &Self) -> Self;

    /// Fill unset fields with their defaults.
    #[must_use]
    fn defaulted(&self) -> Self;
}

/// Merge two optional values. Two absent values yield a defaulted value.
#[must_use]
pub fn merge_optional<T: Merge>(base: Option<&T>, overrides: Option<&T>) -> T {
    match (base, overrides) {
        (None, None) => T::default().defaulted(),
        (Some(base), None) => base.clone(),
        (None, Some(overrides)) => overrides.clone(),
        (Some(base), Some(overrides)) => base.merge(overrides),
    }
}

fn merge_nested<T: Merge>(base: &Option<T>, overrides: &Option<T>) -> Option<T> {
    match overrides {
        None => base.clone(),
        Some(_) => Some(merge_optional(base.as_ref(), overrides.as_ref())),
    }
}

fn merge_string(base: &str, overrides: &str) -> String {
    if overrides.is_empty() {
        base.to_string()
    } else {
        overrides.to_string()
    }
}

fn default_string(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

/// Node runtime options of a group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupConfig {
    /// Log level of the node (default `info`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_level: String,

    /// Disable IPv6 on the mesh interface.
    #[serde(default, rename = "noIPv6")]
    pub no_ipv6: bool,

    /// Allow non-bootstrap members to vote in consensus.
    #[serde(default)]
    pub voter: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<NodeServicesConfig>,
}

impl Merge for NodeGroupConfig {
    fn merge(&self, overrides: &Self) -> Self {
        Self {
            log_level: merge_string(&self.log_level, &overrides.log_level),
            no_ipv6: self.no_ipv6 || overrides.no_ipv6,
            voter: self.voter || overrides.voter,
            services: merge_nested(&self.services, &overrides.services),
        }
    }

    fn defaulted(&self) -> Self {
        Self {
            log_level: default_string(&self.log_level, "info"),
            services: self.services.as_ref().map(Merge::defaulted),
            ..self.clone()
        }
    }
}

/// Services enabled on a group of nodes. A present sub-config enables that service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeServicesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<NodeMetricsConfig>,

    #[serde(default, rename = "webRTC", skip_serializing_if = "Option::is_none")]
    pub web_rtc: Option<NodeWebRTCConfig>,

    #[serde(default, rename = "meshDNS", skip_serializing_if = "Option::is_none")]
    pub mesh_dns: Option<NodeMeshDNSConfig>,

    #[serde(default)]
    pub enable_leader_proxy: bool,

    #[serde(default, rename = "enableMeshAPI")]
    pub enable_mesh_api: bool,

    #[serde(default, rename = "enableAdminAPI")]
    pub enable_admin_api: bool,

    #[serde(default, rename = "enablePeerDiscoveryAPI")]
    pub enable_peer_discovery_api: bool,
}

impl Merge for NodeServicesConfig {
    fn merge(&self, overrides: &Self) -> Self {
        Self {
            metrics: merge_nested(&self.metrics, &overrides.metrics),
            web_rtc: merge_nested(&self.web_rtc, &overrides.web_rtc),
            mesh_dns: merge_nested(&self.mesh_dns, &overrides.mesh_dns),
            enable_leader_proxy: self.enable_leader_proxy || overrides.enable_leader_proxy,
            enable_mesh_api: self.enable_mesh_api || overrides.enable_mesh_api,
            enable_admin_api: self.enable_admin_api || overrides.enable_admin_api,
            enable_peer_discovery_api: self.enable_peer_discovery_api
                || overrides.enable_peer_discovery_api,
        }
    }

    fn defaulted(&self) -> Self {
        Self {
            metrics: self.metrics.as_ref().map(Merge::defaulted),
            web_rtc: self.web_rtc.as_ref().map(Merge::defaulted),
            mesh_dns: self.mesh_dns.as_ref().map(Merge::defaulted),
            ..self.clone()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetricsConfig {
    /// Listen address (default `:8080`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub listen_address: String,

    /// HTTP path (default `/metrics`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl Merge for NodeMetricsConfig {
    fn merge(&self, overrides: &Self) -> Self {
        Self {
            listen_address: merge_string(&self.listen_address, &overrides.listen_address),
            path: merge_string(&self.path, &overrides.path),
        }
    }

    fn defaulted(&self) -> Self {
        Self {
            listen_address: default_string(&self.listen_address, ":8080"),
            path: default_string(&self.path, "/metrics"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeWebRTCConfig {
    /// STUN servers (default Google's public server).
    #[serde(default, rename = "stunServers", skip_serializing_if = "Vec::is_empty")]
    pub stun_servers: Vec<String>,
}

impl Merge for NodeWebRTCConfig {
    fn merge(&self, overrides: &Self) -> Self {
        Self {
            stun_servers: if overrides.stun_servers.is_empty() {
                self.stun_servers.clone()
            } else {
                overrides.stun_servers.clone()
            },
        }
    }

    fn defaulted(&self) -> Self {
        if self.stun_servers.is_empty() {
            return Self {
                stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            };
        }
        self.clone()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeMeshDNSConfig {
    /// UDP listen address (default `:5353`).
    #[serde(default, rename = "listenUDP", skip_serializing_if = "String::is_empty")]
    pub listen_udp: String,

    /// TCP listen address (default `:5353`).
    #[serde(default, rename = "listenTCP", skip_serializing_if = "String::is_empty")]
    pub listen_tcp: String,
}

impl Merge for NodeMeshDNSConfig {
    fn merge(&self, overrides: &Self) -> Self {
        Self {
            listen_udp: merge_string(&self.listen_udp, &overrides.listen_udp),
            listen_tcp: merge_string(&self.listen_tcp, &overrides.listen_tcp),
        }
    }

    fn defaulted(&self) -> Self {
        Self {
            listen_udp: default_string(&self.listen_udp, ":5353"),
            listen_tcp: default_string(&self.listen_tcp, ":5353"),
        }
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
