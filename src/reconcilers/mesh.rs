// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Mesh` reconciliation.
//!
//! A pass walks the mesh through its implicit states:
//!
//! 1. Issuer chain (only when the mesh creates its own CA)
//! 2. Admin certificate and bootstrap node groups
//! 3. Manager client configuration, once the admin certificate is issued
//! 4. Admin client configuration, once an exposed bootstrap group has an address
//!
//! A mesh without external exposure is done after step 3.

use crate::admin_config::{self, client_config, CertificateBundle};
use crate::constants::{DEFAULT_GRPC_PORT, MESH_WAIT_REQUEUE_SECS};
use crate::context::Context;
use crate::crd::Mesh;
use crate::errors::is_lb_not_ready;
use crate::mesh_resources::{
    bootstrap_groups, client_config_secret, mesh_admin_certificate, mesh_ca_certificate,
    mesh_issuer, mesh_self_signer,
};
use crate::naming::{
    headless_service_fqdn, mesh_admin_cert_name, mesh_admin_config_name, mesh_admin_hostname,
    mesh_manager_config_name,
};
use crate::reconcilers::nodegroup::endpoints::{exposed_addresses, host_port};
use crate::reconcilers::{apply_all, Outcome};
use crate::store::ChildObject;
use anyhow::{anyhow, Context as _, Result};
use kube::ResourceExt;
use tracing::{debug, info};

/// Reconcile a mesh.
///
/// # Arguments
///
/// * `ctx` - Shared controller context
/// * `mesh` - The mesh as observed by the controller
///
/// # Errors
///
/// Returns an error if an apply or a read fails, or a client configuration
/// cannot be rendered. A certificate still being issued or a load balancer
/// without an address is an [`Outcome::Requeue`].
pub async fn reconcile_mesh(ctx: &Context, mesh: &Mesh) -> Result<Outcome> {
    let name = mesh.name_any();
    let namespace = mesh.namespace().unwrap_or_default();
    info!(mesh = %name, namespace = %namespace, "Reconciling Mesh");

    let mut objects: Vec<ChildObject> = Vec::new();
    if mesh.spec.issuer.create {
        objects.push(mesh_self_signer(mesh).into());
        objects.push(mesh_ca_certificate(mesh).into());
        objects.push(mesh_issuer(mesh));
    }
    objects.push(mesh_admin_certificate(mesh).into());

    let bootstraps = bootstrap_groups(mesh);
    objects.extend(bootstraps.iter().cloned().map(ChildObject::from));
    apply_all(ctx.store.as_ref(), &objects, &ctx.field_manager)
        .await
        .context("failed to apply mesh objects")?;

    let admin_cert = mesh_admin_cert_name(mesh);
    let bundle = ctx
        .store
        .get_secret(&namespace, &admin_cert)
        .await
        .with_context(|| format!("failed to fetch secret {namespace}/{admin_cert}"))?
        .as_ref()
        .and_then(CertificateBundle::from_secret);
    let Some(bundle) = bundle else {
        debug!(mesh = %name, secret = %admin_cert, "Admin certificate not issued yet");
        return Ok(Outcome::requeue(
            MESH_WAIT_REQUEUE_SECS,
            "admin certificate pending",
        ));
    };

    let founding = bootstraps
        .first()
        .ok_or_else(|| anyhow!("mesh {name} has no bootstrap node group"))?;
    let manager = client_config(
        &name,
        &name,
        &format!("{}:{DEFAULT_GRPC_PORT}", headless_service_fqdn(mesh, founding)),
        &bundle,
    );
    let secret = client_config_secret(
        mesh,
        mesh_manager_config_name(mesh),
        &admin_config::render(&manager)?,
    );
    ctx.store.apply(&secret.into(), &ctx.field_manager).await?;

    let Some((exposed, lb)) = bootstraps
        .iter()
        .find_map(|g| g.spec.service().map(|lb| (g, lb)))
    else {
        debug!(mesh = %name, "No exposed bootstrap group, skipping admin config");
        return Ok(Outcome::Ready);
    };

    let addresses = match exposed_addresses(ctx.store.as_ref(), mesh, exposed, lb).await {
        Ok(addresses) => addresses,
        Err(e) if is_lb_not_ready(&e) => {
            info!(mesh = %name, "Waiting for bootstrap load balancer address");
            return Ok(Outcome::requeue(
                MESH_WAIT_REQUEUE_SECS,
                "load balancer pending",
            ));
        }
        Err(e) => return Err(e),
    };
    let Some(address) = addresses.first() else {
        return Ok(Outcome::requeue(
            MESH_WAIT_REQUEUE_SECS,
            "load balancer pending",
        ));
    };

    let admin = client_config(
        &name,
        &mesh_admin_hostname(mesh),
        &host_port(address, lb.grpc_port),
        &bundle,
    );
    let secret = client_config_secret(
        mesh,
        mesh_admin_config_name(mesh),
        &admin_config::render(&admin)?,
    );
    ctx.store.apply(&secret.into(), &ctx.field_manager).await?;

    info!(mesh = %name, server = %address, "Admin client configuration written");
    Ok(Outcome::Ready)
}

#[cfg(test)]
#[path = "mesh_tests.rs"]
mod mesh_tests;
