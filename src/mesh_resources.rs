// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Webmesh Kubernetes resource builders
//!
//! Pure functions mapping a mesh, a node group, rendered configuration and an
//! optional replica index to the native objects that must exist for them:
//! certificates and issuers, config maps, services, the node `StatefulSet` or
//! standalone pods, claims, the edge proxy and the synthesized bootstrap groups.
//!
//! Only the mesh node container runs privileged. Every user-supplied sidecar
//! and init container is given [`restricted_security_context`], whatever it
//! declared.

use crate::cert_manager::{
    CaIssuer, Certificate, CertificatePrivateKey, CertificateSpec, ClusterIssuer,
    ClusterIssuerSpec, Issuer, IssuerReference, IssuerSpec, SelfSignedIssuer,
};
use crate::checksum::canonical_json_checksum;
use crate::constants::{
    CERT_MANAGER_GROUP, CERT_MANAGER_NAMESPACE, CLIENT_CONFIG_KEY, DEFAULT_CONFIG_DIRECTORY,
    DEFAULT_DATA_DIRECTORY, DEFAULT_EDGE_PROXY_IMAGE, DEFAULT_GRPC_PORT, DEFAULT_IMAGE_PULL_POLICY,
    DEFAULT_INIT_IMAGE, DEFAULT_RAFT_PORT, DEFAULT_TLS_DIRECTORY, DEFAULT_WIREGUARD_PORT,
    EDGE_PROXY_CONFIG_DIRECTORY, EDGE_PROXY_CONFIG_KEY, EDGE_PROXY_PING_PORT,
    EDGE_PROXY_TERMINATION_GRACE_SECS, KIND_ISSUER, NOBODY_UID, NODE_CAPABILITIES,
    NODE_CONFIG_KEY, NODE_CONFIG_PATH, NODE_TERMINATION_GRACE_SECS, PROBE_FAILURE_THRESHOLD,
    PROBE_INITIAL_DELAY_SECS, PROBE_PERIOD_SECS, PROBE_TIMEOUT_SECS, TLS_KEY_ALGORITHM,
    TLS_KEY_SIZE,
};
use crate::crd::{
    IssuerKind, Mesh, NodeGroup, NodeGroupClusterConfig, NodeGroupConfig, NodeGroupLBConfig,
    NodeGroupSpec, WorkloadKind,
};
use crate::edge_proxy::{offset_port, tunnel_entrypoint, RenderedEdgeProxyConfig, GRPC_ROUTE};
use crate::errors::WebmeshError;
use crate::labels::{
    BOOTSTRAP_NODE_GROUP_ANNOTATION, CONFIG_CHECKSUM_ANNOTATION, SPEC_CHECKSUM_ANNOTATION,
};
use crate::naming::{
    bootstrap_group_name, bootstrap_group_selector, bootstrap_lb_group_name, config_map_name,
    edge_proxy_labels, edge_proxy_selector, headless_service_name, lb_name,
    mesh_admin_cert_name, mesh_admin_hostname, mesh_ca_hostname, mesh_ca_name, mesh_labels,
    mesh_self_signer_name, node_cert_name, node_dns_names, node_group_labels,
    node_group_selector, node_hostname, owner_references, pod_name, pod_pvc_name,
    replica_config_map_name, workload_name,
};
use crate::node_config::RenderedNodeConfig;
use crate::store::ChildObject;
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, RollingUpdateStatefulSetStrategy, StatefulSet,
    StatefulSetPersistentVolumeClaimRetentionPolicy, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort,
    EmptyDirVolumeSource, EnvVar, EnvVarSource, HTTPGetAction, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SeccompProfile, Secret, SecretVolumeSource,
    SecurityContext, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;

/// Key usages of every node and admin certificate.
const NODE_CERT_USAGES: [&str; 4] = [
    "digital signature",
    "key encipherment",
    "server auth",
    "client auth",
];

// Volume names
const CONFIG_VOLUME: &str = "config";
const DATA_VOLUME: &str = "data";
const NODE_TLS_VOLUME: &str = "node-tls";

// Container names
const NODE_CONTAINER: &str = "node";
const WRITE_ORDINAL_CONTAINER: &str = "write-ordinal";
const EDGE_PROXY_CONTAINER: &str = "lb";

// Secret volumes holding key material are readable by the owner only
const TLS_SECRET_MODE: i32 = 0o400;

const EDGE_PROXY_CPU: &str = "100m";
const EDGE_PROXY_MEMORY: &str = "128Mi";

fn tls_private_key() -> CertificatePrivateKey {
    CertificatePrivateKey {
        algorithm: Some(TLS_KEY_ALGORITHM.to_string()),
        size: Some(TLS_KEY_SIZE),
    }
}

/// Namespace of the self-signer and CA certificate.
///
/// A `ClusterIssuer` reads its CA secret from the cert-manager namespace, so
/// the CA chain lives there in that mode.
fn ca_namespace(mesh: &Mesh) -> String {
    match mesh.spec.issuer.kind {
        IssuerKind::ClusterIssuer => CERT_MANAGER_NAMESPACE.to_string(),
        IssuerKind::Issuer => mesh.namespace().unwrap_or_default(),
    }
}

/// Owner references for mesh-level objects, empty when they live outside the mesh namespace.
///
/// Owners must be in the same namespace as their dependents. A cross-namespace
/// or cluster-scoped dependent would be garbage collected immediately.
fn mesh_owner_references_in(mesh: &Mesh, namespace: Option<&str>) -> Option<Vec<OwnerReference>> {
    match namespace {
        Some(ns) if Some(ns) == mesh.namespace().as_deref() => Some(owner_references(mesh)),
        _ => None,
    }
}

// ============================================================================
// Issuer chain
// ============================================================================

/// Self-signing issuer that signs the mesh CA.
#[must_use]
pub fn mesh_self_signer(mesh: &Mesh) -> Issuer {
    let namespace = ca_namespace(mesh);
    Issuer {
        metadata: ObjectMeta {
            name: Some(mesh_self_signer_name(mesh)),
            labels: Some(mesh_labels(mesh)),
            owner_references: mesh_owner_references_in(mesh, Some(&namespace)),
            namespace: Some(namespace),
            ..Default::default()
        },
        spec: IssuerSpec {
            self_signed: Some(SelfSignedIssuer {}),
            ca: None,
        },
    }
}

/// CA certificate of the mesh, issued by [`mesh_self_signer`].
#[must_use]
pub fn mesh_ca_certificate(mesh: &Mesh) -> Certificate {
    let namespace = ca_namespace(mesh);
    Certificate {
        metadata: ObjectMeta {
            name: Some(mesh_ca_name(mesh)),
            labels: Some(mesh_labels(mesh)),
            owner_references: mesh_owner_references_in(mesh, Some(&namespace)),
            namespace: Some(namespace),
            ..Default::default()
        },
        spec: CertificateSpec {
            common_name: Some(mesh_ca_hostname(mesh)),
            secret_name: mesh_ca_name(mesh),
            is_ca: true,
            private_key: Some(tls_private_key()),
            issuer_ref: IssuerReference {
                name: mesh_self_signer_name(mesh),
                kind: Some(KIND_ISSUER.to_string()),
                group: Some(CERT_MANAGER_GROUP.to_string()),
            },
            ..Default::default()
        },
    }
}

/// CA-backed issuer every other mesh certificate is signed by.
#[must_use]
pub fn mesh_issuer(mesh: &Mesh) -> ChildObject {
    let ca = Some(CaIssuer {
        secret_name: mesh_ca_name(mesh),
    });
    match mesh.spec.issuer.kind {
        IssuerKind::ClusterIssuer => ClusterIssuer {
            metadata: ObjectMeta {
                name: Some(mesh_ca_name(mesh)),
                labels: Some(mesh_labels(mesh)),
                ..Default::default()
            },
            spec: ClusterIssuerSpec {
                self_signed: None,
                ca,
            },
        }
        .into(),
        IssuerKind::Issuer => Issuer {
            metadata: ObjectMeta {
                name: Some(mesh_ca_name(mesh)),
                namespace: mesh.namespace(),
                labels: Some(mesh_labels(mesh)),
                owner_references: Some(owner_references(mesh)),
                ..Default::default()
            },
            spec: IssuerSpec {
                self_signed: None,
                ca,
            },
        }
        .into(),
    }
}

/// Client certificate of the mesh administrator.
#[must_use]
pub fn mesh_admin_certificate(mesh: &Mesh) -> Certificate {
    Certificate {
        metadata: ObjectMeta {
            name: Some(mesh_admin_cert_name(mesh)),
            namespace: mesh.namespace(),
            labels: Some(mesh_labels(mesh)),
            owner_references: Some(owner_references(mesh)),
            ..Default::default()
        },
        spec: CertificateSpec {
            common_name: Some(mesh_admin_hostname(mesh)),
            secret_name: mesh_admin_cert_name(mesh),
            usages: NODE_CERT_USAGES.iter().map(ToString::to_string).collect(),
            private_key: Some(tls_private_key()),
            issuer_ref: mesh.issuer_reference(),
            ..Default::default()
        },
    }
}

/// Certificate of one replica, valid for every name of the headless service hierarchy.
#[must_use]
pub fn node_certificate(mesh: &Mesh, group: &NodeGroup, index: usize) -> Certificate {
    Certificate {
        metadata: ObjectMeta {
            name: Some(node_cert_name(mesh, group, index)),
            namespace: group.namespace(),
            labels: Some(node_group_labels(mesh, group)),
            owner_references: Some(owner_references(group)),
            ..Default::default()
        },
        spec: CertificateSpec {
            common_name: Some(node_hostname(mesh, group, index)),
            dns_names: node_dns_names(mesh, group, index),
            secret_name: node_cert_name(mesh, group, index),
            usages: NODE_CERT_USAGES.iter().map(ToString::to_string).collect(),
            private_key: Some(tls_private_key()),
            issuer_ref: mesh.issuer_reference(),
            ..Default::default()
        },
    }
}

/// One certificate per replica index, ascending.
#[must_use]
pub fn node_certificates(mesh: &Mesh, group: &NodeGroup) -> Vec<Certificate> {
    (0..group.replica_count())
        .map(|i| node_certificate(mesh, group, i))
        .collect()
}

// ============================================================================
// Config maps and secrets
// ============================================================================

fn checksum_annotations(checksum: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(
        CONFIG_CHECKSUM_ANNOTATION.to_string(),
        checksum.to_string(),
    )])
}

fn node_config_map_named(
    mesh: &Mesh,
    group: &NodeGroup,
    name: String,
    config: &RenderedNodeConfig,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: group.namespace(),
            labels: Some(node_group_labels(mesh, group)),
            annotations: Some(checksum_annotations(config.checksum())),
            owner_references: Some(owner_references(group)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            NODE_CONFIG_KEY.to_string(),
            config.raw().to_string(),
        )])),
        ..Default::default()
    }
}

/// Config map shared by every replica of a `StatefulSet` group.
#[must_use]
pub fn node_config_map(mesh: &Mesh, group: &NodeGroup, config: &RenderedNodeConfig) -> ConfigMap {
    node_config_map_named(mesh, group, config_map_name(mesh, group), config)
}

/// Config map of one standalone pod.
#[must_use]
pub fn replica_config_map(
    mesh: &Mesh,
    group: &NodeGroup,
    index: usize,
    config: &RenderedNodeConfig,
) -> ConfigMap {
    node_config_map_named(
        mesh,
        group,
        replica_config_map_name(mesh, group, index),
        config,
    )
}

/// Secret holding a rendered client configuration under `config.yaml`.
#[must_use]
pub fn client_config_secret(mesh: &Mesh, name: String, raw: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: mesh.namespace(),
            labels: Some(mesh_labels(mesh)),
            owner_references: Some(owner_references(mesh)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CLIENT_CONFIG_KEY.to_string(),
            ByteString(raw.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

// ============================================================================
// Services
// ============================================================================

fn service_port(name: &str, port: i32, target: IntOrString, protocol: &str) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(target),
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}

/// Headless service giving every replica a stable DNS name.
#[must_use]
pub fn headless_service(mesh: &Mesh, group: &NodeGroup) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(headless_service_name(mesh, group)),
            namespace: group.namespace(),
            labels: Some(node_group_labels(mesh, group)),
            owner_references: Some(owner_references(group)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            type_: Some("ClusterIP".to_string()),
            ip_family_policy: Some("PreferDualStack".to_string()),
            selector: Some(node_group_selector(mesh, group)),
            ports: Some(vec![
                service_port(
                    "grpc",
                    i32::from(DEFAULT_GRPC_PORT),
                    IntOrString::String("grpc".to_string()),
                    "TCP",
                ),
                service_port(
                    "raft",
                    i32::from(DEFAULT_RAFT_PORT),
                    IntOrString::String("raft".to_string()),
                    "TCP",
                ),
                service_port(
                    "wireguard",
                    i32::from(DEFAULT_WIREGUARD_PORT),
                    IntOrString::Int(i32::from(DEFAULT_WIREGUARD_PORT)),
                    "UDP",
                ),
            ]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Exposure service `{workload}-public`.
///
/// A `StatefulSet` group is selected directly. A `Pods` group is fronted by the
/// edge proxy, with one tunnel port per replica starting at `wireGuardPort`.
#[must_use]
pub fn lb_service(
    mesh: &Mesh,
    group: &NodeGroup,
    cluster: &NodeGroupClusterConfig,
    lb: &NodeGroupLBConfig,
) -> Service {
    let mut ports = vec![service_port(
        "grpc",
        lb.grpc_port,
        IntOrString::Int(i32::from(DEFAULT_GRPC_PORT)),
        "TCP",
    )];
    let selector = match cluster.workload {
        WorkloadKind::StatefulSet => {
            ports.push(service_port(
                "wireguard",
                lb.wire_guard_port,
                IntOrString::Int(i32::from(DEFAULT_WIREGUARD_PORT)),
                "UDP",
            ));
            node_group_selector(mesh, group)
        }
        WorkloadKind::Pods => {
            for i in 0..group.replica_count() {
                let port = offset_port(lb.wire_guard_port, i);
                ports.push(service_port(
                    &tunnel_entrypoint(i),
                    port,
                    IntOrString::Int(port),
                    "UDP",
                ));
            }
            edge_proxy_selector(mesh, group)
        }
    };

    Service {
        metadata: ObjectMeta {
            name: Some(lb_name(mesh, group)),
            namespace: group.namespace(),
            labels: Some(node_group_labels(mesh, group)),
            annotations: (!lb.annotations.is_empty()).then(|| lb.annotations.clone()),
            owner_references: Some(owner_references(group)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(lb.service_type.clone()),
            ip_family_policy: Some("PreferDualStack".to_string()),
            selector: Some(selector),
            ports: Some(ports),
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Security contexts
// ============================================================================

fn runtime_default_seccomp() -> SeccompProfile {
    SeccompProfile {
        type_: "RuntimeDefault".to_string(),
        ..Default::default()
    }
}

/// Escalated profile of the mesh node container: tunnel device, packet manipulation, modules.
#[must_use]
pub fn node_security_context() -> SecurityContext {
    SecurityContext {
        capabilities: Some(Capabilities {
            add: Some(NODE_CAPABILITIES.iter().map(ToString::to_string).collect()),
            ..Default::default()
        }),
        run_as_user: Some(0),
        run_as_group: Some(0),
        privileged: Some(true),
        run_as_non_root: Some(false),
        seccomp_profile: Some(runtime_default_seccomp()),
        ..Default::default()
    }
}

/// Profile forced onto every container that is not the mesh node.
#[must_use]
pub fn restricted_security_context() -> SecurityContext {
    SecurityContext {
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        privileged: Some(false),
        run_as_non_root: Some(true),
        read_only_root_filesystem: Some(true),
        allow_privilege_escalation: Some(false),
        seccomp_profile: Some(runtime_default_seccomp()),
        ..Default::default()
    }
}

fn restricted(containers: &[Container]) -> Vec<Container> {
    containers
        .iter()
        .cloned()
        .map(|mut container| {
            container.security_context = Some(restricted_security_context());
            container
        })
        .collect()
}

fn pod_security_context() -> PodSecurityContext {
    PodSecurityContext {
        run_as_user: Some(NOBODY_UID),
        run_as_group: Some(NOBODY_UID),
        run_as_non_root: Some(true),
        fs_group: Some(NOBODY_UID),
        seccomp_profile: Some(runtime_default_seccomp()),
        ..Default::default()
    }
}

// ============================================================================
// Node workloads
// ============================================================================

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}

fn node_ports(wireguard_port: i32) -> Vec<ContainerPort> {
    vec![
        ContainerPort {
            name: Some("grpc".to_string()),
            container_port: i32::from(DEFAULT_GRPC_PORT),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
        ContainerPort {
            name: Some("raft".to_string()),
            container_port: i32::from(DEFAULT_RAFT_PORT),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
        ContainerPort {
            name: Some("wireguard".to_string()),
            container_port: wireguard_port,
            protocol: Some("UDP".to_string()),
            ..Default::default()
        },
    ]
}

fn volume_mount(name: &str, path: String) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path,
        ..Default::default()
    }
}

fn node_container(
    mesh: &Mesh,
    group: &NodeGroup,
    cluster: &NodeGroupClusterConfig,
    wireguard_port: i32,
    mounts: Vec<VolumeMount>,
) -> Container {
    let mut volume_mounts = mounts;
    volume_mounts.extend(cluster.additional_volume_mounts.iter().cloned());
    Container {
        name: NODE_CONTAINER.to_string(),
        image: Some(group.spec.image_or(mesh).to_string()),
        image_pull_policy: Some(
            cluster
                .image_pull_policy
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE_PULL_POLICY.to_string()),
        ),
        args: Some(vec!["--config".to_string(), NODE_CONFIG_PATH.to_string()]),
        env: Some(vec![EnvVar {
            name: "POD_NAME".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.name".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ports: Some(node_ports(wireguard_port)),
        volume_mounts: Some(volume_mounts),
        resources: cluster.resources.clone(),
        security_context: Some(node_security_context()),
        ..Default::default()
    }
}

fn config_volume(name: String) -> Volume {
    Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tls_volume(name: String, secret_name: String) -> Volume {
    Volume {
        name,
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name),
            default_mode: Some(TLS_SECRET_MODE),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// Scheduling knobs shared by the node and edge proxy pod specs.
fn scheduled_pod_spec(cluster: &NodeGroupClusterConfig) -> PodSpec {
    PodSpec {
        image_pull_secrets: non_empty(&cluster.image_pull_secrets),
        node_selector: (!cluster.node_selector.is_empty()).then(|| cluster.node_selector.clone()),
        affinity: cluster.affinity.clone(),
        tolerations: non_empty(&cluster.tolerations),
        preemption_policy: cluster.preemption_policy.clone(),
        topology_spread_constraints: non_empty(&cluster.topology_spread_constraints),
        resource_claims: non_empty(&cluster.resource_claims),
        security_context: Some(pod_security_context()),
        ..Default::default()
    }
}

fn pod_annotations(cluster: &NodeGroupClusterConfig, checksum: &str) -> BTreeMap<String, String> {
    let mut annotations = cluster.pod_annotations.clone();
    annotations.insert(CONFIG_CHECKSUM_ANNOTATION.to_string(), checksum.to_string());
    annotations
}

/// `StatefulSet` running every replica of a group from one shared config map.
///
/// Each replica mounts the TLS secrets of all replicas under
/// `/etc/webmesh/tls/{pod}` and picks its own through `POD_NAME`.
#[must_use]
pub fn node_statefulset(
    mesh: &Mesh,
    group: &NodeGroup,
    cluster: &NodeGroupClusterConfig,
    config_checksum: &str,
) -> StatefulSet {
    let name = workload_name(mesh, group);
    let replicas = group.replica_count();
    debug!(name = %name, replicas, "Building node StatefulSet");

    let mut mounts = vec![
        volume_mount(CONFIG_VOLUME, DEFAULT_CONFIG_DIRECTORY.to_string()),
        volume_mount(DATA_VOLUME, DEFAULT_DATA_DIRECTORY.to_string()),
    ];
    let mut volumes = vec![config_volume(config_map_name(mesh, group))];
    if cluster.pvc_spec.is_none() {
        volumes.push(empty_dir_volume(DATA_VOLUME));
    }
    for i in 0..replicas {
        let volume = format!("{NODE_TLS_VOLUME}-{i}");
        mounts.push(volume_mount(
            &volume,
            format!("{DEFAULT_TLS_DIRECTORY}/{}", pod_name(mesh, group, i)),
        ));
        volumes.push(tls_volume(volume, node_cert_name(mesh, group, i)));
    }
    volumes.extend(cluster.additional_volumes.iter().cloned());

    let mut init_containers = vec![Container {
        name: WRITE_ORDINAL_CONTAINER.to_string(),
        image: Some(DEFAULT_INIT_IMAGE.to_string()),
        image_pull_policy: Some(DEFAULT_IMAGE_PULL_POLICY.to_string()),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo ${{HOSTNAME##*-}} > {DEFAULT_DATA_DIRECTORY}/ordinal"),
        ]),
        volume_mounts: Some(vec![volume_mount(
            DATA_VOLUME,
            DEFAULT_DATA_DIRECTORY.to_string(),
        )]),
        security_context: Some(restricted_security_context()),
        ..Default::default()
    }];
    init_containers.extend(restricted(&cluster.init_containers));

    let mut containers = vec![node_container(
        mesh,
        group,
        cluster,
        i32::from(DEFAULT_WIREGUARD_PORT),
        mounts,
    )];
    containers.extend(restricted(&cluster.additional_containers));

    let volume_claim_templates = cluster.pvc_spec.as_ref().map(|spec| {
        vec![PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(DATA_VOLUME.to_string()),
                ..Default::default()
            },
            spec: Some(spec.clone()),
            status: None,
        }]
    });

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: group.namespace(),
            labels: Some(node_group_labels(mesh, group)),
            owner_references: Some(owner_references(group)),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(group.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(node_group_selector(mesh, group)),
                ..Default::default()
            },
            service_name: headless_service_name(mesh, group).into(),
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    max_unavailable: Some(IntOrString::Int(1)),
                    ..Default::default()
                }),
            }),
            volume_claim_templates,
            persistent_volume_claim_retention_policy: Some(
                StatefulSetPersistentVolumeClaimRetentionPolicy {
                    when_deleted: Some("Delete".to_string()),
                    when_scaled: Some("Retain".to_string()),
                },
            ),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(node_group_labels(mesh, group)),
                    annotations: Some(pod_annotations(cluster, config_checksum)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(init_containers),
                    containers,
                    volumes: Some(volumes),
                    host_network: Some(cluster.host_network),
                    termination_grace_period_seconds: Some(NODE_TERMINATION_GRACE_SECS),
                    ..scheduled_pod_spec(cluster)
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Standalone pod running replica `index`, with its own config map and tunnel port.
///
/// The pod carries a checksum of its own spec so the reconciler can tell when
/// the running pod must be replaced; pod specs are largely immutable.
///
/// # Errors
///
/// Returns [`WebmeshError::ConfigMarshal`] if the pod spec cannot be hashed.
pub fn node_pod(
    mesh: &Mesh,
    group: &NodeGroup,
    cluster: &NodeGroupClusterConfig,
    config_checksum: &str,
    index: usize,
) -> Result<Pod, WebmeshError> {
    let name = pod_name(mesh, group, index);

    let mounts = vec![
        volume_mount(CONFIG_VOLUME, DEFAULT_CONFIG_DIRECTORY.to_string()),
        volume_mount(NODE_TLS_VOLUME, DEFAULT_TLS_DIRECTORY.to_string()),
        volume_mount(DATA_VOLUME, DEFAULT_DATA_DIRECTORY.to_string()),
    ];
    let mut volumes = vec![
        config_volume(replica_config_map_name(mesh, group, index)),
        tls_volume(
            NODE_TLS_VOLUME.to_string(),
            node_cert_name(mesh, group, index),
        ),
    ];
    volumes.push(match cluster.pvc_spec {
        Some(_) => Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: pod_pvc_name(mesh, group, index),
                ..Default::default()
            }),
            ..Default::default()
        },
        None => empty_dir_volume(DATA_VOLUME),
    });
    volumes.extend(cluster.additional_volumes.iter().cloned());

    let mut containers = vec![node_container(
        mesh,
        group,
        cluster,
        offset_port(i32::from(DEFAULT_WIREGUARD_PORT), index),
        mounts,
    )];
    containers.extend(restricted(&cluster.additional_containers));

    let spec = PodSpec {
        hostname: Some(node_hostname(mesh, group, index)),
        subdomain: Some(headless_service_name(mesh, group)),
        init_containers: non_empty(&restricted(&cluster.init_containers)),
        containers,
        volumes: Some(volumes),
        host_network: Some(cluster.host_network),
        termination_grace_period_seconds: Some(NODE_TERMINATION_GRACE_SECS),
        ..scheduled_pod_spec(cluster)
    };

    let spec_checksum =
        canonical_json_checksum(&spec).map_err(|e| WebmeshError::ConfigMarshal {
            document: format!("pod spec {name}"),
            reason: e.to_string(),
        })?;
    let mut annotations = pod_annotations(cluster, config_checksum);
    annotations.insert(SPEC_CHECKSUM_ANNOTATION.to_string(), spec_checksum);

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: group.namespace(),
            labels: Some(node_group_labels(mesh, group)),
            annotations: Some(annotations),
            owner_references: Some(owner_references(group)),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}

/// Claim backing standalone pod `index`, or `None` when the group is ephemeral.
#[must_use]
pub fn replica_pvc(
    mesh: &Mesh,
    group: &NodeGroup,
    cluster: &NodeGroupClusterConfig,
    index: usize,
) -> Option<PersistentVolumeClaim> {
    let spec = cluster.pvc_spec.clone()?;
    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(pod_pvc_name(mesh, group, index)),
            namespace: group.namespace(),
            labels: Some(node_group_labels(mesh, group)),
            owner_references: Some(owner_references(group)),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}

// ============================================================================
// Edge proxy
// ============================================================================

/// Config map holding the edge proxy router configuration.
#[must_use]
pub fn edge_proxy_config_map(
    mesh: &Mesh,
    group: &NodeGroup,
    config: &RenderedEdgeProxyConfig,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(lb_name(mesh, group)),
            namespace: group.namespace(),
            labels: Some(edge_proxy_labels(mesh, group)),
            annotations: Some(checksum_annotations(config.checksum())),
            owner_references: Some(owner_references(group)),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            EDGE_PROXY_CONFIG_KEY.to_string(),
            config.raw().to_string(),
        )])),
        ..Default::default()
    }
}

fn ping_probe() -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/ping".to_string()),
            port: IntOrString::String("traefik".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECS),
        period_seconds: Some(PROBE_PERIOD_SECS),
        timeout_seconds: Some(PROBE_TIMEOUT_SECS),
        success_threshold: Some(1),
        failure_threshold: Some(PROBE_FAILURE_THRESHOLD),
        ..Default::default()
    }
}

fn edge_proxy_resources() -> ResourceRequirements {
    let quantities = BTreeMap::from([
        ("cpu".to_string(), Quantity(EDGE_PROXY_CPU.to_string())),
        ("memory".to_string(), Quantity(EDGE_PROXY_MEMORY.to_string())),
    ]);
    ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
        ..Default::default()
    }
}

/// Arguments of the edge proxy: static entrypoints plus one UDP entrypoint per replica.
#[must_use]
pub fn edge_proxy_args(group: &NodeGroup, lb: &NodeGroupLBConfig) -> Vec<String> {
    let mut args = vec![
        "--ping".to_string(),
        "--ping.entrypoint=traefik".to_string(),
        "--log".to_string(),
        "--log.level=INFO".to_string(),
        format!("--providers.file.directory={EDGE_PROXY_CONFIG_DIRECTORY}"),
        format!("--entrypoints.traefik.address=:{EDGE_PROXY_PING_PORT}/tcp"),
        format!("--entrypoints.{GRPC_ROUTE}.address=:{DEFAULT_GRPC_PORT}/tcp"),
    ];
    for i in 0..group.replica_count() {
        let entrypoint = tunnel_entrypoint(i);
        let port = offset_port(lb.wire_guard_port, i);
        args.push(format!("--entrypoints.{entrypoint}.address=:{port}/udp"));
        args.push(format!("--entrypoints.{entrypoint}.udp.timeout=1m"));
    }
    args
}

/// Edge proxy deployment fronting a `Pods` group.
#[must_use]
pub fn edge_proxy_deployment(
    mesh: &Mesh,
    group: &NodeGroup,
    cluster: &NodeGroupClusterConfig,
    lb: &NodeGroupLBConfig,
    config_checksum: &str,
) -> Deployment {
    let mut ports = vec![
        ContainerPort {
            name: Some("traefik".to_string()),
            container_port: i32::from(EDGE_PROXY_PING_PORT),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
        ContainerPort {
            name: Some(GRPC_ROUTE.to_string()),
            container_port: i32::from(DEFAULT_GRPC_PORT),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
    ];
    for i in 0..group.replica_count() {
        ports.push(ContainerPort {
            name: Some(tunnel_entrypoint(i)),
            container_port: offset_port(lb.wire_guard_port, i),
            protocol: Some("UDP".to_string()),
            ..Default::default()
        });
    }

    let container = Container {
        name: EDGE_PROXY_CONTAINER.to_string(),
        image: Some(DEFAULT_EDGE_PROXY_IMAGE.to_string()),
        image_pull_policy: Some(DEFAULT_IMAGE_PULL_POLICY.to_string()),
        args: Some(edge_proxy_args(group, lb)),
        ports: Some(ports),
        volume_mounts: Some(vec![volume_mount(
            CONFIG_VOLUME,
            EDGE_PROXY_CONFIG_DIRECTORY.to_string(),
        )]),
        liveness_probe: Some(ping_probe()),
        readiness_probe: Some(ping_probe()),
        resources: Some(edge_proxy_resources()),
        security_context: Some(restricted_security_context()),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(lb_name(mesh, group)),
            namespace: group.namespace(),
            labels: Some(edge_proxy_labels(mesh, group)),
            owner_references: Some(owner_references(group)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(edge_proxy_selector(mesh, group)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(edge_proxy_labels(mesh, group)),
                    annotations: Some(checksum_annotations(config_checksum)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![config_volume(lb_name(mesh, group))]),
                    termination_grace_period_seconds: Some(EDGE_PROXY_TERMINATION_GRACE_SECS),
                    ..scheduled_pod_spec(cluster)
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Bootstrap node groups
// ============================================================================

fn bootstrap_group(mesh: &Mesh, name: String, spec: NodeGroupSpec, annotate: bool) -> NodeGroup {
    let mut labels = mesh_labels(mesh);
    labels.extend(bootstrap_group_selector(mesh));
    let annotations = annotate.then(|| {
        BTreeMap::from([(
            BOOTSTRAP_NODE_GROUP_ANNOTATION.to_string(),
            "true".to_string(),
        )])
    });
    let mut group = NodeGroup::new(&name, spec);
    group.metadata = ObjectMeta {
        name: Some(name),
        namespace: mesh.namespace(),
        labels: Some(labels),
        annotations,
        owner_references: Some(owner_references(mesh)),
        ..Default::default()
    };
    group.spec.mesh = mesh.object_reference();
    group
}

/// The node groups forming a mesh's bootstrap topology.
///
/// The first entry is always the founding group `{mesh}-bootstrap`. When the
/// bootstrap spec declares a service, it is moved onto a second single-replica
/// group `{mesh}-bootstrap-lb` that joins the founding group and may vote.
#[must_use]
pub fn bootstrap_groups(mesh: &Mesh) -> Vec<NodeGroup> {
    let mut founding = mesh.spec.bootstrap.clone();
    let service = founding
        .cluster
        .as_mut()
        .and_then(|cluster| cluster.service.take());

    let mut groups = vec![bootstrap_group(
        mesh,
        bootstrap_group_name(mesh),
        founding,
        true,
    )];

    if service.is_some() {
        let mut exposed = mesh.spec.bootstrap.clone();
        exposed.replicas = 1;
        exposed.config = Some(NodeGroupConfig {
            voter: true,
            ..exposed.config.unwrap_or_default()
        });
        groups.push(bootstrap_group(
            mesh,
            bootstrap_lb_group_name(mesh),
            exposed,
            false,
        ));
    }
    groups
}

#[cfg(test)]
#[path = "mesh_resources_tests.rs"]
mod mesh_resources_tests;
