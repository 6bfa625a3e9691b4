// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Webmesh operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "mesh.webmesh.io/v1";

/// Kind name for `Mesh` resource
pub const KIND_MESH: &str = "Mesh";

/// Kind name for `NodeGroup` resource
pub const KIND_NODE_GROUP: &str = "NodeGroup";

/// API group of cert-manager resources
pub const CERT_MANAGER_GROUP: &str = "cert-manager.io";

/// Kind name for a namespaced cert-manager issuer
pub const KIND_ISSUER: &str = "Issuer";

/// Kind name for a cluster-scoped cert-manager issuer
pub const KIND_CLUSTER_ISSUER: &str = "ClusterIssuer";

/// Namespace cert-manager reads `ClusterIssuer` CA secrets from
pub const CERT_MANAGER_NAMESPACE: &str = "cert-manager";

/// Field manager used for all server-side apply operations
pub const FIELD_MANAGER: &str = "webmesh-operator";

// ============================================================================
// Image Constants
// ============================================================================

/// Default container image for mesh nodes
pub const DEFAULT_NODE_IMAGE: &str = "ghcr.io/webmeshproj/node:latest";

/// Default container image for the edge proxy fronting a node group
pub const DEFAULT_EDGE_PROXY_IMAGE: &str = "traefik:v3.0";

/// Image used by the init container that records the replica ordinal
pub const DEFAULT_INIT_IMAGE: &str = "busybox:1.36";

/// Default image pull policy for node containers
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";

// ============================================================================
// Mesh Network Constants
// ============================================================================

/// Raft consensus port
pub const DEFAULT_RAFT_PORT: u16 = 9443;

/// gRPC API port
pub const DEFAULT_GRPC_PORT: u16 = 8443;

/// WireGuard listen port of replica 0 (replica `i` in pod mode listens on `port + i`)
pub const DEFAULT_WIREGUARD_PORT: u16 = 51820;

/// Edge proxy health/ping entrypoint port
pub const EDGE_PROXY_PING_PORT: u16 = 9000;

/// Default IPv4 network of a mesh
pub const DEFAULT_IPV4_NETWORK: &str = "172.16.0.0/12";

/// Default WireGuard persistent keepalive in seconds (0 disables it)
pub const DEFAULT_PERSISTENT_KEEPALIVE_SECS: u64 = 0;

/// Persistent keepalive used by cloud replicas which usually sit behind NAT
pub const CLOUD_PERSISTENT_KEEPALIVE_SECS: u64 = 10;

// ============================================================================
// Storage and Filesystem Constants
// ============================================================================

/// Default size of a node data volume
pub const DEFAULT_STORAGE_SIZE: &str = "1Gi";

/// Data directory inside a node container
pub const DEFAULT_DATA_DIRECTORY: &str = "/data";

/// Directory that holds per-replica TLS material
pub const DEFAULT_TLS_DIRECTORY: &str = "/etc/webmesh/tls";

/// Directory that holds the node configuration
pub const DEFAULT_CONFIG_DIRECTORY: &str = "/etc/webmesh";

/// Path of the node configuration file
pub const NODE_CONFIG_PATH: &str = "/etc/webmesh/config.yaml";

/// Data key of the node configuration inside its `ConfigMap`
pub const NODE_CONFIG_KEY: &str = "config.yaml";

/// Data key of the edge proxy router configuration inside its `ConfigMap`
pub const EDGE_PROXY_CONFIG_KEY: &str = "dynamic.yaml";

/// Directory the edge proxy watches for router configuration
pub const EDGE_PROXY_CONFIG_DIRECTORY: &str = "/etc/traefik";

/// Data key of client configuration bundles inside their `Secret`
pub const CLIENT_CONFIG_KEY: &str = "config.yaml";

/// Template placeholder the node expands to its own pod name
pub const POD_NAME_TEMPLATE: &str = r#"{{ env "POD_NAME" }}"#;

// ============================================================================
// Certificate Constants
// ============================================================================

/// Key algorithm for every certificate issued for the mesh
pub const TLS_KEY_ALGORITHM: &str = "ECDSA";

/// Key size for every certificate issued for the mesh
pub const TLS_KEY_SIZE: i32 = 384;

/// Suffix of the CA common name
pub const CA_HOST_SUFFIX: &str = "webmesh.internal";

/// Secret data key holding the certificate
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret data key holding the private key
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// Secret data key holding the CA bundle
pub const TLS_CA_KEY: &str = "ca.crt";

// ============================================================================
// Security Constants
// ============================================================================

/// UID/GID used for unprivileged pods (nobody)
pub const NOBODY_UID: i64 = 65534;

/// Capabilities the node container needs to manage tunnel devices
pub const NODE_CAPABILITIES: [&str; 3] = ["NET_ADMIN", "NET_RAW", "SYS_MODULE"];

/// Grace period given to a node to leave the mesh
pub const NODE_TERMINATION_GRACE_SECS: i64 = 60;

/// Grace period given to the edge proxy
pub const EDGE_PROXY_TERMINATION_GRACE_SECS: i64 = 30;

// ============================================================================
// Kubernetes Health Check Constants
// ============================================================================

/// Probe initial delay for the edge proxy
pub const PROBE_INITIAL_DELAY_SECS: i32 = 5;

/// Probe period for the edge proxy
pub const PROBE_PERIOD_SECS: i32 = 10;

/// Probe timeout for the edge proxy
pub const PROBE_TIMEOUT_SECS: i32 = 5;

/// Probe failure threshold for the edge proxy
pub const PROBE_FAILURE_THRESHOLD: i32 = 3;

// ============================================================================
// Cloud Compute Constants
// ============================================================================

/// Image project the cloud replicas boot from
pub const CLOUD_IMAGE_PROJECT: &str = "ubuntu-os-cloud";

/// Image family the cloud replicas boot from
pub const CLOUD_IMAGE_FAMILY: &str = "ubuntu-2204-lts";

/// Base URL of the Compute Engine REST API
pub const COMPUTE_API_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// OAuth2 token endpoint used for key-file credentials
pub const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth2 scope requested for service account credentials
pub const COMPUTE_OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/compute";

/// Grant type of the signed service account assertion
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of a service account assertion (the maximum Google accepts)
pub const SERVICE_ACCOUNT_ASSERTION_LIFETIME_SECS: u64 = 3600;

/// Metadata server token endpoint used when no credentials are configured
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

// ============================================================================
// Controller Requeue Constants
// ============================================================================

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue duration while the mesh waits on certificates or load balancers
pub const MESH_WAIT_REQUEUE_SECS: u64 = 3;

/// Requeue duration while a cluster node group waits on its load balancer
pub const CLUSTER_LB_WAIT_REQUEUE_SECS: u64 = 5;

/// Requeue duration while a cloud node group waits on its join server
pub const CLOUD_LB_WAIT_REQUEUE_SECS: u64 = 3;

/// Requeue duration after deleting a standalone pod whose spec changed
pub const POD_REPLACE_REQUEUE_SECS: u64 = 5;

/// Default requeue duration for resources that reconciled cleanly (5 minutes)
pub const DEFAULT_READY_REQUEUE_SECS: u64 = 300;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Path for the liveness endpoint
pub const HEALTH_SERVER_PATH: &str = "/healthz";

/// Default bind address for the metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0:8080";
