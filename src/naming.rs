// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deterministic names, selectors and ownership metadata.
//!
//! Every child object name is a pure function of the mesh name, the node group
//! name and an optional replica index. Repeated calls with the same inputs give
//! the same names, which is what makes re-applying the child object set idempotent.
//!
//! Group-derived names start from [`workload_name`]: `{mesh}-{group}`, or just
//! `{group}` when the group name already starts with the mesh name.

use crate::constants::CA_HOST_SUFFIX;
use crate::crd::{Mesh, NodeGroup};
use crate::labels::{
    BOOTSTRAP_NODE_GROUP_LABEL, COMPONENT_EDGE_PROXY, COMPONENT_MESH_NODE, K8S_COMPONENT,
    K8S_MANAGED_BY, K8S_PART_OF, MANAGED_BY_OPERATOR, MESH_NAME_LABEL, MESH_NAMESPACE_LABEL,
    NODE_GROUP_LB_LABEL, NODE_GROUP_NAMESPACE_LABEL, NODE_GROUP_NAME_LABEL, PART_OF_WEBMESH,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

// ============================================================================
// Mesh-level names
// ============================================================================

/// Self-signing issuer that signs the mesh CA.
#[must_use]
pub fn mesh_self_signer_name(mesh: &Mesh) -> String {
    format!("{}-self-signer", mesh.name_any())
}

/// CA certificate, its secret, and the CA-backed issuer.
#[must_use]
pub fn mesh_ca_name(mesh: &Mesh) -> String {
    format!("{}-ca", mesh.name_any())
}

/// Common name of the mesh CA.
#[must_use]
pub fn mesh_ca_hostname(mesh: &Mesh) -> String {
    format!("{}-ca.{CA_HOST_SUFFIX}", mesh.name_any())
}

/// Admin client certificate and its secret.
#[must_use]
pub fn mesh_admin_cert_name(mesh: &Mesh) -> String {
    format!("{}-admin", mesh.name_any())
}

/// Principal name of the mesh administrator.
#[must_use]
pub fn mesh_admin_hostname(mesh: &Mesh) -> String {
    format!("{}-admin", mesh.name_any())
}

/// Secret holding the externally reachable admin client bundle.
#[must_use]
pub fn mesh_admin_config_name(mesh: &Mesh) -> String {
    format!("{}-admin-config", mesh.name_any())
}

/// Secret holding the in-cluster client bundle.
#[must_use]
pub fn mesh_manager_config_name(mesh: &Mesh) -> String {
    format!("{}-manager-config", mesh.name_any())
}

/// Founding bootstrap node group.
#[must_use]
pub fn bootstrap_group_name(mesh: &Mesh) -> String {
    format!("{}-bootstrap", mesh.name_any())
}

/// Single-replica group that exposes the bootstrap topology externally.
#[must_use]
pub fn bootstrap_lb_group_name(mesh: &Mesh) -> String {
    format!("{}-bootstrap-lb", mesh.name_any())
}

// ============================================================================
// Node group names
// ============================================================================

/// Base name of every object derived from a node group.
#[must_use]
pub fn workload_name(mesh: &Mesh, group: &NodeGroup) -> String {
    prefixed_name(&mesh.name_any(), &group.name_any())
}

/// `{mesh}-{group}` unless `group` already starts with `mesh`.
#[must_use]
pub fn prefixed_name(mesh_name: &str, group_name: &str) -> String {
    if group_name.starts_with(mesh_name) {
        group_name.to_string()
    } else {
        format!("{mesh_name}-{group_name}")
    }
}

#[must_use]
pub fn config_map_name(mesh: &Mesh, group: &NodeGroup) -> String {
    workload_name(mesh, group)
}

/// Per-replica config map used by standalone pods.
#[must_use]
pub fn replica_config_map_name(mesh: &Mesh, group: &NodeGroup, index: usize) -> String {
    pod_name(mesh, group, index)
}

#[must_use]
pub fn headless_service_name(mesh: &Mesh, group: &NodeGroup) -> String {
    workload_name(mesh, group)
}

/// Exposure service, edge proxy deployment and edge proxy config map.
#[must_use]
pub fn lb_name(mesh: &Mesh, group: &NodeGroup) -> String {
    format!("{}-public", workload_name(mesh, group))
}

#[must_use]
pub fn pod_name(mesh: &Mesh, group: &NodeGroup, index: usize) -> String {
    format!("{}-{index}", workload_name(mesh, group))
}

#[must_use]
pub fn node_cert_name(mesh: &Mesh, group: &NodeGroup, index: usize) -> String {
    pod_name(mesh, group, index)
}

#[must_use]
pub fn node_hostname(mesh: &Mesh, group: &NodeGroup, index: usize) -> String {
    pod_name(mesh, group, index)
}

/// Claim created by the `data` volume claim template of the `StatefulSet`.
#[must_use]
pub fn statefulset_pvc_name(mesh: &Mesh, group: &NodeGroup, index: usize) -> String {
    format!("data-{}", pod_name(mesh, group, index))
}

/// Claim backing a standalone pod.
#[must_use]
pub fn pod_pvc_name(mesh: &Mesh, group: &NodeGroup, index: usize) -> String {
    pod_name(mesh, group, index)
}

/// Compute instance backing a cloud replica.
#[must_use]
pub fn cloud_instance_name(group: &NodeGroup, index: usize) -> String {
    format!("{}-{index}", group.name_any())
}

// ============================================================================
// DNS names
// ============================================================================

#[must_use]
pub fn headless_service_fqdn(mesh: &Mesh, group: &NodeGroup) -> String {
    format!(
        "{}.{}.svc.cluster.local",
        headless_service_name(mesh, group),
        group.namespace().unwrap_or_default()
    )
}

#[must_use]
pub fn node_cluster_fqdn(mesh: &Mesh, group: &NodeGroup, index: usize) -> String {
    format!(
        "{}.{}",
        pod_name(mesh, group, index),
        headless_service_fqdn(mesh, group)
    )
}

/// Every name a replica can be reached by through the headless service.
#[must_use]
pub fn node_dns_names(mesh: &Mesh, group: &NodeGroup, index: usize) -> Vec<String> {
    let svc = headless_service_name(mesh, group);
    let ns = group.namespace().unwrap_or_default();
    let pod = pod_name(mesh, group, index);
    vec![
        svc.clone(),
        format!("{svc}.{ns}"),
        format!("{svc}.{ns}.svc"),
        headless_service_fqdn(mesh, group),
        format!("{pod}.{svc}"),
        format!("{pod}.{svc}.{ns}"),
        format!("{pod}.{svc}.{ns}.svc"),
        node_cluster_fqdn(mesh, group, index),
    ]
}

// ============================================================================
// Selectors and labels
// ============================================================================

/// Labels identifying every object that belongs to a mesh.
#[must_use]
pub fn mesh_selector(mesh: &Mesh) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MESH_NAME_LABEL.to_string(), mesh.name_any()),
        (
            MESH_NAMESPACE_LABEL.to_string(),
            mesh.namespace().unwrap_or_default(),
        ),
    ])
}

/// Labels identifying the node groups in a mesh's bootstrap topology.
#[must_use]
pub fn bootstrap_group_selector(mesh: &Mesh) -> BTreeMap<String, String> {
    let mut selector = mesh_selector(mesh);
    selector.insert(BOOTSTRAP_NODE_GROUP_LABEL.to_string(), "true".to_string());
    selector
}

/// Labels selecting the mesh node pods of a node group.
#[must_use]
pub fn node_group_selector(mesh: &Mesh, group: &NodeGroup) -> BTreeMap<String, String> {
    let mut selector = mesh_selector(mesh);
    selector.insert(NODE_GROUP_NAME_LABEL.to_string(), group.name_any());
    selector.insert(
        NODE_GROUP_NAMESPACE_LABEL.to_string(),
        group.namespace().unwrap_or_default(),
    );
    selector
}

/// Labels selecting the edge proxy pods of a node group.
#[must_use]
pub fn edge_proxy_selector(mesh: &Mesh, group: &NodeGroup) -> BTreeMap<String, String> {
    let mut selector = node_group_selector(mesh, group);
    selector.insert(NODE_GROUP_LB_LABEL.to_string(), "true".to_string());
    selector
}

fn standard_labels(component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_PART_OF.to_string(), PART_OF_WEBMESH.to_string()),
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_OPERATOR.to_string()),
        (K8S_COMPONENT.to_string(), component.to_string()),
    ])
}

/// Mesh object labels plus the mesh selector.
#[must_use]
pub fn mesh_labels(mesh: &Mesh) -> BTreeMap<String, String> {
    let mut labels = mesh.labels().clone();
    labels.extend(mesh_selector(mesh));
    labels
}

/// Node group object labels, the node group selector and the standard labels.
#[must_use]
pub fn node_group_labels(mesh: &Mesh, group: &NodeGroup) -> BTreeMap<String, String> {
    let mut labels = group.labels().clone();
    labels.extend(standard_labels(COMPONENT_MESH_NODE));
    labels.extend(node_group_selector(mesh, group));
    labels
}

/// Labels of edge proxy objects.
#[must_use]
pub fn edge_proxy_labels(mesh: &Mesh, group: &NodeGroup) -> BTreeMap<String, String> {
    let mut labels = group.labels().clone();
    labels.extend(standard_labels(COMPONENT_EDGE_PROXY));
    labels.extend(edge_proxy_selector(mesh, group));
    labels
}

// ============================================================================
// Ownership
// ============================================================================

/// Controller owner reference to `owner`, blocking its deletion until dependents are gone.
#[must_use]
pub fn owner_references<K>(owner: &K) -> Vec<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    vec![OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.meta().name.clone().unwrap_or_default(),
        uid: owner.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]
}

#[cfg(test)]
#[path = "naming_tests.rs"]
mod naming_tests;
