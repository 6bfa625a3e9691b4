// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and Webmesh-specific labels/annotations
//! to ensure consistency across all resources created by the controller.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture (e.g., "mesh-node")
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/part-of` indicating this resource is part of a mesh
pub const PART_OF_WEBMESH: &str = "webmesh";

/// Value for `app.kubernetes.io/managed-by` on every object the operator applies
pub const MANAGED_BY_OPERATOR: &str = "webmesh-operator";

/// Component value for mesh node workloads
pub const COMPONENT_MESH_NODE: &str = "mesh-node";

/// Component value for the edge proxy fronting a node group
pub const COMPONENT_EDGE_PROXY: &str = "edge-proxy";

// ============================================================================
// Webmesh-Specific Labels
// ============================================================================

/// Label holding the name of the owning `Mesh`
pub const MESH_NAME_LABEL: &str = "webmesh.io/mesh-name";

/// Label holding the namespace of the owning `Mesh`
pub const MESH_NAMESPACE_LABEL: &str = "webmesh.io/mesh-namespace";

/// Label holding the name of the owning `NodeGroup`
pub const NODE_GROUP_NAME_LABEL: &str = "webmesh.io/nodegroup-name";

/// Label holding the namespace of the owning `NodeGroup`
pub const NODE_GROUP_NAMESPACE_LABEL: &str = "webmesh.io/nodegroup-namespace";

/// Label marking edge proxy objects of a node group
pub const NODE_GROUP_LB_LABEL: &str = "webmesh.io/nodegroup-lb";

/// Label marking node groups that belong to a mesh's bootstrap topology
pub const BOOTSTRAP_NODE_GROUP_LABEL: &str = "webmesh.io/bootstrap-nodegroup";

/// Label overriding the zone awareness identifier of a node group
pub const ZONE_AWARENESS_LABEL: &str = "webmesh.io/zone-awareness-id";

// ============================================================================
// Webmesh-Specific Annotations
// ============================================================================

/// Annotation marking the founding bootstrap node group (value `"true"`)
pub const BOOTSTRAP_NODE_GROUP_ANNOTATION: &str = "webmesh.io/bootstrap-nodegroup";

/// Annotation holding the checksum of the rendered configuration
pub const CONFIG_CHECKSUM_ANNOTATION: &str = "webmesh.io/config-checksum";

/// Annotation holding the checksum of a standalone pod's spec
pub const SPEC_CHECKSUM_ANNOTATION: &str = "webmesh.io/spec-checksum";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer for `NodeGroup` resources
pub const FINALIZER_NODE_GROUP: &str = "nodegroups.mesh.webmesh.io";
