// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Admission defaulting and validation for `Mesh` and `NodeGroup`.
//!
//! Everything here is a pure function over the submitted objects so it can be
//! served from any admission endpoint. Defaulting mutates in place; validation
//! returns the first offending field as a [`ValidationError`].

use crate::cert_manager::IssuerReference;
use crate::constants::{
    DEFAULT_GRPC_PORT, DEFAULT_IMAGE_PULL_POLICY, DEFAULT_STORAGE_SIZE, DEFAULT_WIREGUARD_PORT,
    KIND_MESH,
};
use crate::crd::{
    Merge, Mesh, NodeGroup, NodeGroupClusterConfig, NodeGroupConfig, NodeGroupGoogleCloudConfig,
    NodeGroupSpec,
};
use crate::errors::ValidationError;
use crate::naming::mesh_ca_name;
use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Top-level key of a managed-fields entry that owns part of the spec.
const SPEC_FIELD_KEY: &str = "f:spec";

// ============================================================================
// Defaulting
// ============================================================================

fn default_config(spec: &mut NodeGroupSpec) {
    let has_group = spec.config_group.as_deref().is_some_and(|g| !g.is_empty());
    spec.config = match spec.config.take() {
        Some(config) => Some(config.defaulted()),
        None if !has_group => Some(NodeGroupConfig::default().defaulted()),
        None => None,
    };
}

fn default_cluster(cluster: &mut NodeGroupClusterConfig) {
    if cluster
        .image_pull_policy
        .as_deref()
        .is_none_or(str::is_empty)
    {
        cluster.image_pull_policy = Some(DEFAULT_IMAGE_PULL_POLICY.to_string());
    }
    if let Some(service) = cluster.service.as_mut() {
        if service.service_type.is_empty() {
            service.service_type = "ClusterIP".to_string();
        }
        if service.grpc_port == 0 {
            service.grpc_port = i32::from(DEFAULT_GRPC_PORT);
        }
        if service.wire_guard_port == 0 {
            service.wire_guard_port = i32::from(DEFAULT_WIREGUARD_PORT);
        }
    }
}

fn default_cloud(cloud: &mut NodeGroupGoogleCloudConfig) {
    if cloud.region.is_empty() {
        cloud.region = cloud.effective_region();
    }
}

/// Persistent storage given to a bootstrap group that declares none.
#[must_use]
pub fn default_bootstrap_storage() -> PersistentVolumeClaimSpec {
    PersistentVolumeClaimSpec {
        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
        resources: Some(VolumeResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(DEFAULT_STORAGE_SIZE.to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Fill the defaults of a submitted mesh.
///
/// The bootstrap group always runs in-cluster on persistent storage, and a
/// created issuer is recorded as the mesh's issuer reference.
pub fn default_mesh(mesh: &mut Mesh) {
    info!(mesh = %mesh.name_any(), "Defaulting Mesh");

    let issuer_ref = mesh.spec.issuer.create.then(|| IssuerReference {
        name: mesh_ca_name(mesh),
        kind: Some(mesh.spec.issuer.kind.as_str().to_string()),
        group: None,
    });

    let bootstrap = &mut mesh.spec.bootstrap;
    default_config(bootstrap);
    let cluster = bootstrap.cluster.get_or_insert_with(Default::default);
    default_cluster(cluster);
    if cluster.pvc_spec.is_none() {
        cluster.pvc_spec = Some(default_bootstrap_storage());
    }

    if issuer_ref.is_some() {
        mesh.spec.issuer.issuer_ref = issuer_ref;
    }
}

/// Fill the defaults of a submitted node group.
///
/// A group without any target runs in-cluster.
pub fn default_node_group(group: &mut NodeGroup) {
    info!(nodegroup = %group.name_any(), "Defaulting NodeGroup");

    let spec = &mut group.spec;
    default_config(spec);
    if spec.cluster.is_none() && spec.google_cloud.is_none() {
        spec.cluster = Some(NodeGroupClusterConfig::default());
    }
    if let Some(cluster) = spec.cluster.as_mut() {
        default_cluster(cluster);
    }
    if let Some(cloud) = spec.google_cloud.as_mut() {
        default_cloud(cloud);
    }
}

// ============================================================================
// Mesh validation
// ============================================================================

/// Validate a mesh on creation.
///
/// # Errors
///
/// Returns a [`ValidationError`] when the bootstrap config group is unknown,
/// or the mesh neither creates an issuer nor names one with a kind.
pub fn validate_mesh_create(mesh: &Mesh) -> Result<(), ValidationError> {
    debug!(mesh = %mesh.name_any(), "Validating Mesh create");

    if let Some(group) = mesh
        .spec
        .bootstrap
        .config_group
        .as_deref()
        .filter(|g| !g.is_empty())
    {
        if !mesh.spec.config_groups.contains_key(group) {
            return Err(ValidationError::new(
                "spec.bootstrap.configGroup",
                format!("configGroup {group} must be a valid config group name"),
            ));
        }
    }

    let issuer_ref = mesh.spec.issuer.issuer_ref.as_ref();
    match issuer_ref.filter(|r| !r.name.is_empty()) {
        None if !mesh.spec.issuer.create => Err(ValidationError::new(
            "spec.issuer.create",
            "create must be true if issuerRef.name is empty",
        )),
        Some(reference) if reference.kind.as_deref().is_none_or(str::is_empty) => {
            Err(ValidationError::new(
                "spec.issuer.issuerRef.kind",
                "kind must not be empty if issuerRef.name is not empty",
            ))
        }
        _ => Ok(()),
    }
}

/// Validate a mesh update.
///
/// # Errors
///
/// Returns a [`ValidationError`] when the address range, the bootstrap replica
/// count or the bootstrap persistence changes.
pub fn validate_mesh_update(old: &Mesh, new: &Mesh) -> Result<(), ValidationError> {
    debug!(mesh = %new.name_any(), "Validating Mesh update");

    if old.spec.ipv4 != new.spec.ipv4 {
        return Err(ValidationError::new("spec.ipv4", "ipv4 is immutable"));
    }
    if old.spec.bootstrap.cluster.is_some() {
        immutable_shape(
            &old.spec.bootstrap,
            &new.spec.bootstrap,
            "spec.bootstrap",
            "bootstrap node group",
        )?;
    }
    Ok(())
}

fn immutable_shape(
    old: &NodeGroupSpec,
    new: &NodeGroupSpec,
    path: &str,
    what: &str,
) -> Result<(), ValidationError> {
    if old.replicas != new.replicas {
        return Err(ValidationError::new(
            format!("{path}.replicas"),
            "replicas is immutable",
        ));
    }
    match (old.is_persistent(), new.is_persistent()) {
        (true, false) => Err(ValidationError::new(
            format!("{path}.cluster.pvcSpec"),
            format!("changing to a non-persistent {what} is not supported"),
        )),
        (false, true) => Err(ValidationError::new(
            format!("{path}.cluster.pvcSpec"),
            format!("changing to a persistent {what} is not supported"),
        )),
        _ => Ok(()),
    }
}

// ============================================================================
// NodeGroup validation
// ============================================================================

fn require(value: &str, field: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(
            format!("spec.googleCloud.{field}"),
            format!("{field} is required"),
        ));
    }
    Ok(())
}

/// Validate a node group on creation.
///
/// # Errors
///
/// Returns a [`ValidationError`] unless exactly one target is set, the cloud
/// target carries its required fields and a config group comes with a mesh
/// reference.
pub fn validate_node_group_create(group: &NodeGroup) -> Result<(), ValidationError> {
    debug!(nodegroup = %group.name_any(), "Validating NodeGroup create");

    if let Err(e) = group.spec.target(&group.name_any()) {
        return Err(ValidationError::new("spec", e.to_string()));
    }
    if let Some(cloud) = &group.spec.google_cloud {
        require(&cloud.project_id, "projectID")?;
        require(&cloud.subnetwork, "subnetwork")?;
        require(&cloud.zone, "zone")?;
        require(&cloud.machine_type, "machineType")?;
    }

    let has_group = group
        .spec
        .config_group
        .as_deref()
        .is_some_and(|g| !g.is_empty());
    let has_mesh = group.spec.mesh.name.as_deref().is_some_and(|n| !n.is_empty());
    if has_group && !has_mesh {
        return Err(ValidationError::new(
            "spec.mesh.name",
            "a mesh reference is required when configGroup is set",
        ));
    }
    Ok(())
}

/// Field managers that own part of the object's spec.
fn spec_managers(entries: &[ManagedFieldsEntry]) -> BTreeSet<&str> {
    entries
        .iter()
        .filter(|entry| {
            entry
                .fields_v1
                .as_ref()
                .and_then(|fields| fields.0.as_object())
                .is_some_and(|fields| fields.contains_key(SPEC_FIELD_KEY))
        })
        .filter_map(|entry| entry.manager.as_deref())
        .collect()
}

fn owned_by_mesh(group: &NodeGroup) -> bool {
    group
        .owner_references()
        .iter()
        .any(|owner| owner.kind == KIND_MESH)
}

/// Validate a node group update.
///
/// Bootstrap groups belong to their mesh: a spec change is only accepted while
/// the group is still owned by a `Mesh` and `field_manager` is the sole manager
/// of its spec fields.
///
/// # Arguments
///
/// * `old` - The stored node group
/// * `new` - The submitted node group, including its `managedFields`
/// * `field_manager` - Field manager the operator applies with
///
/// # Errors
///
/// Returns a [`ValidationError`] for any rule of [`validate_node_group_create`],
/// a changed replica count or persistence, or a foreign bootstrap change.
pub fn validate_node_group_update(
    old: &NodeGroup,
    new: &NodeGroup,
    field_manager: &str,
) -> Result<(), ValidationError> {
    debug!(nodegroup = %new.name_any(), "Validating NodeGroup update");

    validate_node_group_create(new)?;
    immutable_shape(&old.spec, &new.spec, "spec", "node group")?;

    if old.is_bootstrap() && old.spec != new.spec {
        let managers = spec_managers(new.managed_fields());
        let foreign: Vec<&str> = managers
            .into_iter()
            .filter(|m| *m != field_manager)
            .collect();
        if !owned_by_mesh(new) || !foreign.is_empty() {
            return Err(ValidationError::new(
                "spec",
                "bootstrap node groups can only be mutated by the Mesh controller",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod webhook_tests;
