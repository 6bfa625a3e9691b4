// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `NodeGroup` reconciliation.
//!
//! Every pass issues the certificates of all replicas first, then branches on
//! the deployment target:
//!
//! - [`cluster`] renders in-cluster workloads, optionally in a remote cluster
//!   and optionally fronted by an exposure service or the edge proxy
//! - [`cloud`] keeps one Compute Engine instance per replica in sync with its
//!   rendered user data
//!
//! Deletion is guarded by a finalizer; see [`FinalizerCleanup`] below.

pub mod cloud;
pub mod cluster;
pub mod endpoints;

use crate::context::Context;
use crate::crd::{DeploymentTarget, Mesh, MeshSpec, NodeGroup, SecretKeyRef};
use crate::errors::WebmeshError;
use crate::labels::FINALIZER_NODE_GROUP;
use crate::mesh_resources::node_certificates;
use crate::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
use crate::reconcilers::{apply_all, Outcome};
use crate::store::{ChildObject, ObjectStore};
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{info, warn};

/// Reconcile a node group.
///
/// # Arguments
///
/// * `ctx` - Shared controller context
/// * `group` - The node group as observed by the controller
///
/// # Errors
///
/// Returns an error when the mesh is missing, the deployment target is
/// invalid, rendering fails or any store or cloud call fails. Waiting on a
/// load balancer or a certificate is an [`Outcome::Requeue`] instead.
pub async fn reconcile_node_group(ctx: &Context, group: &NodeGroup) -> Result<Outcome> {
    let name = group.name_any();
    let namespace = group.namespace().unwrap_or_default();

    if group.metadata.deletion_timestamp.is_some() {
        handle_deletion(ctx, group, FINALIZER_NODE_GROUP).await?;
        return Ok(Outcome::Deleted);
    }

    info!(group = %name, namespace = %namespace, "Reconciling NodeGroup");

    let mesh = fetch_mesh(ctx.store.as_ref(), group).await?;
    let target = group.spec.target(&name)?;

    ensure_finalizer(ctx.store.as_ref(), group, FINALIZER_NODE_GROUP).await?;

    let certificates: Vec<ChildObject> = node_certificates(&mesh, group)
        .into_iter()
        .map(ChildObject::from)
        .collect();
    apply_all(ctx.store.as_ref(), &certificates, &ctx.field_manager)
        .await
        .context("failed to apply node certificates")?;

    match target {
        DeploymentTarget::Cluster(cluster) => {
            cluster::reconcile(ctx, &mesh, group, cluster).await
        }
        DeploymentTarget::GoogleCloud(cloud) => cloud::reconcile(ctx, &mesh, group, cloud).await,
    }
}

async fn fetch_mesh(store: &dyn ObjectStore, group: &NodeGroup) -> Result<Mesh> {
    let namespace = group.mesh_namespace();
    let name = group.spec.mesh.name.clone().unwrap_or_default();
    if name.is_empty() {
        return Err(WebmeshError::MissingField {
            field: "spec.mesh.name".to_string(),
        }
        .into());
    }
    store
        .get_mesh(&namespace, &name)
        .await
        .with_context(|| format!("failed to fetch mesh {namespace}/{name}"))?
        .ok_or_else(|| WebmeshError::MeshNotFound { namespace, name }.into())
}

/// Value of a secret key in `namespace`, as UTF-8 text.
///
/// # Errors
///
/// Fails when the secret does not exist, lacks the key or the value is not UTF-8.
pub(crate) async fn secret_value(
    store: &dyn ObjectStore,
    namespace: &str,
    reference: &SecretKeyRef,
) -> Result<String> {
    let secret = store
        .get_secret(namespace, &reference.name)
        .await
        .with_context(|| format!("failed to fetch secret {namespace}/{}", reference.name))?
        .ok_or_else(|| anyhow!("secret {namespace}/{} not found", reference.name))?;
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&reference.key))
        .ok_or_else(|| WebmeshError::MissingSecretKey {
            namespace: namespace.to_string(),
            name: reference.name.clone(),
            key: reference.key.clone(),
        })?;
    String::from_utf8(value.0.clone()).with_context(|| {
        format!(
            "key {} of secret {namespace}/{} is not valid UTF-8",
            reference.key, reference.name
        )
    })
}

#[async_trait]
impl FinalizerCleanup for NodeGroup {
    /// Delete what garbage collection cannot reach: cloud instances, or the
    /// claims of in-cluster replicas.
    async fn cleanup(&self, ctx: &Context) -> Result<()> {
        let name = self.name_any();
        let target = match self.spec.target(&name) {
            Ok(target) => target,
            Err(e) => {
                warn!(group = %name, error = %e, "Nothing to tear down");
                return Ok(());
            }
        };

        // Names only depend on the mesh name, so a mesh deleted first is not fatal
        let mesh = match fetch_mesh(ctx.store.as_ref(), self).await {
            Ok(mesh) => mesh,
            Err(e) => {
                warn!(group = %name, error = %e, "Mesh unavailable during teardown");
                let mut mesh = Mesh::new(
                    &self.spec.mesh.name.clone().unwrap_or_default(),
                    MeshSpec::default(),
                );
                mesh.metadata.namespace = Some(self.mesh_namespace());
                mesh
            }
        };

        match target {
            DeploymentTarget::Cluster(cluster) => {
                cluster::teardown(ctx, &mesh, self, cluster).await
            }
            DeploymentTarget::GoogleCloud(cloud) => cloud::teardown(ctx, self, cloud).await,
        }
    }
}
