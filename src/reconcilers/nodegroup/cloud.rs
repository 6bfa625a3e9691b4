// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Compute Engine node groups.
//!
//! Every replica is one instance booting a stock Ubuntu image with rendered
//! cloud-init user data. The instance description carries the checksum of that
//! user data; an instance whose checksum differs is deleted and recreated.

use crate::admin_config::CertificateBundle;
use crate::cloud_config::{self, CloudConfigOptions};
use crate::compute::{
    AccessConfig, AttachedDisk, ComputeClient, DiskInitializeParams, Image, Instance, Metadata,
    MetadataItem, NetworkInterface, Subnetwork, Tags,
};
use crate::constants::{
    CLOUD_IMAGE_FAMILY, CLOUD_IMAGE_PROJECT, CLOUD_LB_WAIT_REQUEUE_SECS,
    CLOUD_PERSISTENT_KEEPALIVE_SECS, DEFAULT_TLS_DIRECTORY, MESH_WAIT_REQUEUE_SECS,
};
use crate::context::Context;
use crate::crd::{Mesh, NodeGroup, NodeGroupGoogleCloudConfig};
use crate::errors::is_lb_not_ready;
use crate::naming::{cloud_instance_name, mesh_labels, node_cert_name};
use crate::node_config::{self, NodeConfigOptions};
use crate::reconcilers::nodegroup::endpoints::resolve_join_server;
use crate::reconcilers::nodegroup::secret_value;
use crate::reconcilers::Outcome;
use anyhow::{Context as _, Result};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Metadata key cloud-init reads its configuration from.
const USER_DATA_KEY: &str = "user-data";

const MAX_LABEL_LENGTH: usize = 63;

async fn client(
    ctx: &Context,
    group: &NodeGroup,
    cloud: &NodeGroupGoogleCloudConfig,
) -> Result<Arc<dyn ComputeClient>> {
    let credentials = match &cloud.credentials {
        Some(reference) => {
            let namespace = group.namespace().unwrap_or_default();
            Some(secret_value(ctx.store.as_ref(), &namespace, reference).await?)
        }
        None => None,
    };
    ctx.compute
        .client(credentials.as_deref())
        .await
        .context("failed to create compute client")
}

/// Lowercase, `[a-z0-9_-]` only, at most 63 characters.
fn gce_label(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_LENGTH)
        .collect()
}

/// Mesh labels in the character set instance labels accept.
#[must_use]
pub fn gce_labels(mesh: &Mesh) -> BTreeMap<String, String> {
    mesh_labels(mesh)
        .iter()
        .map(|(k, v)| (gce_label(k), gce_label(v)))
        .collect()
}

/// Instance spec of one cloud replica.
#[must_use]
pub fn instance_for(
    mesh: &Mesh,
    cloud: &NodeGroupGoogleCloudConfig,
    name: String,
    description: String,
    image: &Image,
    subnetwork: &Subnetwork,
    user_data: &str,
) -> Instance {
    Instance {
        name,
        description,
        machine_type: format!("zones/{}/machineTypes/{}", cloud.zone, cloud.machine_type),
        labels: gce_labels(mesh),
        can_ip_forward: true,
        disks: vec![AttachedDisk {
            boot: true,
            auto_delete: true,
            initialize_params: Some(DiskInitializeParams {
                source_image: image.self_link.clone(),
            }),
        }],
        metadata: Some(Metadata {
            items: vec![MetadataItem {
                key: USER_DATA_KEY.to_string(),
                value: user_data.to_string(),
            }],
        }),
        network_interfaces: vec![NetworkInterface {
            subnetwork: subnetwork.self_link.clone(),
            stack_type: "IPV4_IPV6".to_string(),
            access_configs: vec![AccessConfig {
                name: "wanv4".to_string(),
                type_: "ONE_TO_ONE_NAT".to_string(),
                network_tier: String::new(),
            }],
            ipv6_access_configs: vec![AccessConfig {
                name: "wanv6".to_string(),
                type_: "DIRECT_IPV6".to_string(),
                network_tier: "PREMIUM".to_string(),
            }],
        }],
        tags: (!cloud.tags.is_empty()).then(|| Tags {
            items: cloud.tags.clone(),
        }),
    }
}

/// Reconcile the Compute Engine instances of `group`.
///
/// # Errors
///
/// Returns an error when credentials are unusable, rendering fails or a
/// compute call fails.
pub async fn reconcile(
    ctx: &Context,
    mesh: &Mesh,
    group: &NodeGroup,
    cloud: &NodeGroupGoogleCloudConfig,
) -> Result<Outcome> {
    let compute = client(ctx, group, cloud).await?;

    let image = compute
        .get_image(CLOUD_IMAGE_PROJECT, CLOUD_IMAGE_FAMILY)
        .await
        .context("failed to look up boot image")?;
    let region = cloud.effective_region();
    let subnetwork = compute
        .get_subnetwork(&cloud.project_id, &region, &cloud.subnetwork)
        .await
        .with_context(|| format!("failed to look up subnetwork {}", cloud.subnetwork))?;

    let join_server = match resolve_join_server(ctx.store.as_ref(), mesh, group).await {
        Ok(join_server) => join_server,
        Err(e) if is_lb_not_ready(&e) => {
            info!(group = %group.name_any(), "Waiting for join server address");
            return Ok(Outcome::requeue(
                CLOUD_LB_WAIT_REQUEUE_SECS,
                "join server pending",
            ));
        }
        Err(e) => return Err(e),
    };

    let opts = NodeConfigOptions {
        join_server,
        is_persistent: true,
        cert_dir: DEFAULT_TLS_DIRECTORY.to_string(),
        detect_endpoints: true,
        allow_remote_detection: true,
        persistent_keepalive: Duration::from_secs(CLOUD_PERSISTENT_KEEPALIVE_SECS),
        ..Default::default()
    };
    let node_config = node_config::render(mesh, group, &opts)?;

    let namespace = group.namespace().unwrap_or_default();
    for i in 0..group.replica_count() {
        let cert_name = node_cert_name(mesh, group, i);
        let secret = ctx.store.get_secret(&namespace, &cert_name).await?;
        let Some(bundle) = secret.as_ref().and_then(CertificateBundle::from_secret) else {
            debug!(secret = %cert_name, "Node certificate not issued yet");
            return Ok(Outcome::requeue(
                MESH_WAIT_REQUEUE_SECS,
                "node certificates pending",
            ));
        };
        let (tls_cert, tls_key, ca) = bundle.as_text();

        let user_data = cloud_config::render(&CloudConfigOptions {
            image: group.spec.image_or(mesh),
            node_config: &node_config,
            tls_cert: &tls_cert,
            tls_key: &tls_key,
            ca: &ca,
        })?;

        let name = cloud_instance_name(group, i);
        let description = format!("{name} {}", user_data.checksum());

        if let Some(existing) = compute
            .get_instance(&cloud.project_id, &cloud.zone, &name)
            .await
            .with_context(|| format!("failed to look up instance {name}"))?
        {
            if existing.description == description {
                debug!(instance = %name, "Instance up to date");
                continue;
            }
            info!(instance = %name, "Instance configuration changed, replacing");
            compute
                .delete_instance(&cloud.project_id, &cloud.zone, &name)
                .await?
                .wait()
                .await
                .with_context(|| format!("failed to delete instance {name}"))?;
        }

        let instance = instance_for(
            mesh,
            cloud,
            name.clone(),
            description,
            &image,
            &subnetwork,
            user_data.raw(),
        );
        compute
            .insert_instance(&cloud.project_id, &cloud.zone, &instance)
            .await?
            .wait()
            .await
            .with_context(|| format!("failed to insert instance {name}"))?;
        info!(instance = %name, zone = %cloud.zone, "Instance created");
    }

    Ok(Outcome::Ready)
}

/// Delete every existing instance of `group`.
///
/// # Errors
///
/// Returns an error if credentials are unusable or a compute call fails.
pub async fn teardown(
    ctx: &Context,
    group: &NodeGroup,
    cloud: &NodeGroupGoogleCloudConfig,
) -> Result<()> {
    let compute = client(ctx, group, cloud).await?;
    for i in 0..group.replica_count() {
        let name = cloud_instance_name(group, i);
        if compute
            .get_instance(&cloud.project_id, &cloud.zone, &name)
            .await?
            .is_none()
        {
            continue;
        }
        compute
            .delete_instance(&cloud.project_id, &cloud.zone, &name)
            .await?
            .wait()
            .await
            .with_context(|| format!("failed to delete instance {name}"))?;
        info!(instance = %name, "Instance deleted");
    }
    Ok(())
}

#[cfg(test)]
#[path = "cloud_tests.rs"]
mod cloud_tests;
