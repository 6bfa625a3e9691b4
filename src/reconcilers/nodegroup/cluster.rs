// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-cluster node groups.
//!
//! Objects are applied in dependency order: exposure first (its addresses end
//! up in the node configuration), then configuration, then the headless
//! service and the workloads. A group with a kubeconfig runs in a remote
//! cluster. Its certificates are still issued at home and mirrored there.

use crate::admin_config::CertificateBundle;
use crate::constants::{
    CLUSTER_LB_WAIT_REQUEUE_SECS, DEFAULT_PERSISTENT_KEEPALIVE_SECS, DEFAULT_RAFT_PORT,
    DEFAULT_TLS_DIRECTORY, DEFAULT_WIREGUARD_PORT, MESH_WAIT_REQUEUE_SECS, POD_NAME_TEMPLATE,
    POD_REPLACE_REQUEUE_SECS,
};
use crate::context::Context;
use crate::crd::{Mesh, NodeGroup, NodeGroupClusterConfig, WorkloadKind};
use crate::edge_proxy::{self, replica_tunnel_port};
use crate::errors::is_lb_not_ready;
use crate::labels::SPEC_CHECKSUM_ANNOTATION;
use crate::mesh_resources::{
    edge_proxy_config_map, edge_proxy_deployment, headless_service, lb_service, node_config_map,
    node_pod, node_statefulset, replica_config_map, replica_pvc,
};
use crate::naming::{
    bootstrap_lb_group_name, headless_service_fqdn, node_cert_name, node_cluster_fqdn,
    node_hostname, pod_name, pod_pvc_name, statefulset_pvc_name,
};
use crate::node_config::{self, NodeConfigOptions};
use crate::reconcilers::nodegroup::endpoints::{
    exposed_addresses, resolve_join_server, wireguard_endpoints,
};
use crate::reconcilers::nodegroup::secret_value;
use crate::reconcilers::Outcome;
use crate::store::{ChildObject, ObjectStore};
use anyhow::{Context as _, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The cluster a group's workloads live in.
struct Target {
    store: Arc<dyn ObjectStore>,
    remote: bool,
    field_manager: String,
}

impl Target {
    async fn resolve(
        ctx: &Context,
        group: &NodeGroup,
        cluster: &NodeGroupClusterConfig,
    ) -> Result<Self> {
        let Some(reference) = &cluster.kubeconfig else {
            return Ok(Self {
                store: ctx.store.clone(),
                remote: false,
                field_manager: ctx.field_manager.clone(),
            });
        };
        let namespace = group.namespace().unwrap_or_default();
        let kubeconfig = secret_value(ctx.store.as_ref(), &namespace, reference).await?;
        let store = ctx
            .store
            .for_kubeconfig(&kubeconfig)
            .await
            .with_context(|| format!("failed to connect with kubeconfig {}", reference.name))?;
        Ok(Self {
            store,
            remote: true,
            field_manager: ctx.field_manager.clone(),
        })
    }

    /// Apply `object`, dropping owner references that would dangle remotely.
    async fn apply(&self, object: impl Into<ChildObject>) -> Result<()> {
        let object = object.into();
        let object = if self.remote {
            object.without_owners()
        } else {
            object
        };
        debug!(
            kind = object.kind(),
            name = %object.name(),
            remote = self.remote,
            "Applying"
        );
        self.store.apply(&object, &self.field_manager).await
    }
}

/// Copy the issued node certificates of `group` into the remote cluster.
///
/// Returns false while any of them has not been issued yet.
async fn mirror_certificates(
    ctx: &Context,
    target: &Target,
    mesh: &Mesh,
    group: &NodeGroup,
) -> Result<bool> {
    let namespace = group.namespace().unwrap_or_default();
    for i in 0..group.replica_count() {
        let name = node_cert_name(mesh, group, i);
        let Some(secret) = ctx.store.get_secret(&namespace, &name).await? else {
            debug!(secret = %name, "Node certificate not issued yet");
            return Ok(false);
        };
        if CertificateBundle::from_secret(&secret).is_none() {
            debug!(secret = %name, "Node certificate incomplete");
            return Ok(false);
        }
        let mirrored = Secret {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(namespace.clone()),
                labels: secret.metadata.labels.clone(),
                ..Default::default()
            },
            data: secret.data.clone(),
            type_: secret.type_.clone(),
            ..Default::default()
        };
        target.apply(mirrored).await?;
    }
    Ok(true)
}

/// Reconcile the in-cluster workloads of `group`.
///
/// # Errors
///
/// Returns an error when the kubeconfig secret is unusable, the configuration
/// cannot be rendered or an apply fails.
pub async fn reconcile(
    ctx: &Context,
    mesh: &Mesh,
    group: &NodeGroup,
    cluster: &NodeGroupClusterConfig,
) -> Result<Outcome> {
    let target = Target::resolve(ctx, group, cluster).await?;

    if target.remote && !mirror_certificates(ctx, &target, mesh, group).await? {
        return Ok(Outcome::requeue(
            MESH_WAIT_REQUEUE_SECS,
            "node certificates pending",
        ));
    }

    // Exposure
    let mut external: Vec<String> = Vec::new();
    let mut external_port = i32::from(DEFAULT_WIREGUARD_PORT);
    if let Some(lb) = &cluster.service {
        if cluster.workload == WorkloadKind::Pods {
            let proxy = edge_proxy::render(mesh, group)?;
            target
                .apply(edge_proxy_config_map(mesh, group, &proxy))
                .await?;
            target
                .apply(edge_proxy_deployment(
                    mesh,
                    group,
                    cluster,
                    lb,
                    proxy.checksum(),
                ))
                .await?;
        }
        target.apply(lb_service(mesh, group, cluster, lb)).await?;

        external = match exposed_addresses(target.store.as_ref(), mesh, group, lb).await {
            Ok(addresses) => addresses,
            Err(e) if is_lb_not_ready(&e) => {
                info!(group = %group.name_any(), "Waiting for load balancer address");
                return Ok(Outcome::requeue(
                    CLUSTER_LB_WAIT_REQUEUE_SECS,
                    "load balancer pending",
                ));
            }
            Err(e) => return Err(e),
        };
        external_port = lb.wire_guard_port;
    }

    // Membership
    let mut opts = NodeConfigOptions {
        is_bootstrap: group.is_bootstrap(),
        is_persistent: cluster.pvc_spec.is_some(),
        primary_endpoint: external.first().cloned().unwrap_or_default(),
        persistent_keepalive: Duration::from_secs(DEFAULT_PERSISTENT_KEEPALIVE_SECS),
        ..Default::default()
    };
    if opts.is_bootstrap {
        if group.spec.replicas > 1 {
            opts.advertise_address = format!(
                "{POD_NAME_TEMPLATE}.{}:{DEFAULT_RAFT_PORT}",
                headless_service_fqdn(mesh, group)
            );
            opts.bootstrap_servers = (0..group.replica_count())
                .map(|i| {
                    (
                        node_hostname(mesh, group, i),
                        format!("{}:{DEFAULT_RAFT_PORT}", node_cluster_fqdn(mesh, group, i)),
                    )
                })
                .collect::<HashMap<_, _>>();
        }
        if mesh.spec.bootstrap.service().is_some() {
            opts.bootstrap_voters = vec![format!("{}-0", bootstrap_lb_group_name(mesh))];
        }
    } else {
        opts.join_server = match resolve_join_server(ctx.store.as_ref(), mesh, group).await {
            Ok(join_server) => join_server,
            Err(e) if is_lb_not_ready(&e) => {
                info!(group = %group.name_any(), "Waiting for join server address");
                return Ok(Outcome::requeue(
                    CLUSTER_LB_WAIT_REQUEUE_SECS,
                    "join server pending",
                ));
            }
            Err(e) => return Err(e),
        };
    }

    let outcome = match cluster.workload {
        WorkloadKind::StatefulSet => {
            opts.cert_dir = format!("{DEFAULT_TLS_DIRECTORY}/{POD_NAME_TEMPLATE}");
            opts.wireguard_listen_port = DEFAULT_WIREGUARD_PORT;
            opts.wireguard_endpoints = wireguard_endpoints(
                mesh,
                group,
                DEFAULT_WIREGUARD_PORT,
                &external,
                external_port,
            );
            let config = node_config::render(mesh, group, &opts)?;
            target.apply(node_config_map(mesh, group, &config)).await?;
            target.apply(headless_service(mesh, group)).await?;
            target
                .apply(node_statefulset(mesh, group, cluster, config.checksum()))
                .await?;
            Outcome::Ready
        }
        WorkloadKind::Pods => {
            opts.cert_dir = DEFAULT_TLS_DIRECTORY.to_string();
            let mut replaced = false;
            // Only indices below the replica count are visited. Admission keeps
            // `spec.replicas` immutable (`webhook::validate_node_group_update`),
            // so there are never higher-index pods or claims to sweep.
            for i in 0..group.replica_count() {
                let listen_port =
                    u16::try_from(replica_tunnel_port(i)).unwrap_or(DEFAULT_WIREGUARD_PORT);
                let replica = NodeConfigOptions {
                    wireguard_listen_port: listen_port,
                    wireguard_endpoints: wireguard_endpoints(
                        mesh,
                        group,
                        listen_port,
                        &external,
                        edge_proxy::offset_port(external_port, i),
                    ),
                    ..opts.clone()
                };
                let config = node_config::render(mesh, group, &replica)?;
                target
                    .apply(replica_config_map(mesh, group, i, &config))
                    .await?;
                if let Some(pvc) = replica_pvc(mesh, group, cluster, i) {
                    target.apply(pvc).await?;
                }
                if replace_pod(&target, mesh, group, cluster, config.checksum(), i).await? {
                    replaced = true;
                }
            }
            target.apply(headless_service(mesh, group)).await?;
            if replaced {
                Outcome::requeue(POD_REPLACE_REQUEUE_SECS, "pod replaced")
            } else {
                Outcome::Ready
            }
        }
    };

    info!(
        group = %group.name_any(),
        replicas = group.spec.replicas,
        remote = target.remote,
        "NodeGroup workloads reconciled"
    );
    Ok(outcome)
}

/// Apply standalone pod `index`, or delete it when its spec changed.
///
/// Returns true when a running pod was deleted; it is recreated on the next pass.
async fn replace_pod(
    target: &Target,
    mesh: &Mesh,
    group: &NodeGroup,
    cluster: &NodeGroupClusterConfig,
    config_checksum: &str,
    index: usize,
) -> Result<bool> {
    let pod = node_pod(mesh, group, cluster, config_checksum, index)?;
    let namespace = group.namespace().unwrap_or_default();
    let name = pod_name(mesh, group, index);

    if let Some(existing) = target.store.get_pod(&namespace, &name).await? {
        let wanted = pod.annotations().get(SPEC_CHECKSUM_ANNOTATION);
        let running = existing.annotations().get(SPEC_CHECKSUM_ANNOTATION);
        if wanted != running {
            info!(pod = %name, "Pod spec changed, deleting for replacement");
            target.store.delete_pod(&namespace, &name).await?;
            return Ok(true);
        }
    }
    target.apply(pod).await?;
    Ok(false)
}

/// Delete the claims of every replica of `group`.
///
/// # Errors
///
/// Returns an error if the kubeconfig secret is unusable or a delete fails.
pub async fn teardown(
    ctx: &Context,
    mesh: &Mesh,
    group: &NodeGroup,
    cluster: &NodeGroupClusterConfig,
) -> Result<()> {
    let target = Target::resolve(ctx, group, cluster).await?;
    let namespace = group.namespace().unwrap_or_default();
    for i in 0..group.replica_count() {
        let claim = match cluster.workload {
            WorkloadKind::StatefulSet => statefulset_pvc_name(mesh, group, i),
            WorkloadKind::Pods => pod_pvc_name(mesh, group, i),
        };
        if target.store.delete_pvc(&namespace, &claim).await? {
            info!(claim = %claim, "Deleted replica data volume claim");
        } else {
            debug!(claim = %claim, "Replica data volume claim already gone");
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;
