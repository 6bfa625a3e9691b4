// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic server-side apply helpers for Kubernetes resources.
//!
//! Every child object the operator writes goes through [`apply_namespaced`] or
//! [`apply_cluster`]. Both use server-side apply with forced ownership, so the
//! operator's field manager always wins conflicts on the fields it declares and
//! re-applying an unchanged object is a no-op on the API server.
//!
//! # Example
//!
//! ```rust,no_run
//! use webmesh_operator::reconcilers::resources::apply_namespaced;
//! use k8s_openapi::api::core::v1::ConfigMap;
//! use kube::Client;
//! use anyhow::Result;
//!
//! async fn example(client: &Client, cm: ConfigMap) -> Result<()> {
//!     apply_namespaced(client, &cm, "webmesh-operator").await
//! }
//! ```

use crate::reconcilers::retry::retry_api_call;
use anyhow::{anyhow, Result};
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::core::{ClusterResourceScope, NamespaceResourceScope};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

/// Server-side apply a namespaced resource with forced ownership.
///
/// # Arguments
///
/// * `client` - Kubernetes API client
/// * `resource` - The desired object, with name and namespace set
/// * `field_manager` - Field manager name for server-side apply
///
/// # Errors
///
/// Returns an error if the object has no name or namespace, or the patch fails.
pub async fn apply_namespaced<T>(client: &Client, resource: &T, field_manager: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + ResourceExt
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    let name = resource
        .meta()
        .name
        .as_ref()
        .ok_or_else(|| anyhow!("{} must have a name", T::kind(&())))?;
    let namespace = resource
        .meta()
        .namespace
        .as_ref()
        .ok_or_else(|| anyhow!("{} {name} must have a namespace", T::kind(&())))?;

    let api: Api<T> = Api::namespaced(client.clone(), namespace);

    debug!(
        namespace = %namespace,
        name = %name,
        kind = %T::kind(&()),
        "Applying resource"
    );

    api.patch(
        name,
        &PatchParams::apply(field_manager).force(),
        &Patch::Apply(resource),
    )
    .await?;

    info!("Applied {} {}/{}", T::kind(&()), namespace, name);
    Ok(())
}

/// Server-side apply a cluster-scoped resource with forced ownership.
///
/// # Errors
///
/// Returns an error if the object has no name or the patch fails.
pub async fn apply_cluster<T>(client: &Client, resource: &T, field_manager: &str) -> Result<()>
where
    T: Resource<DynamicType = (), Scope = ClusterResourceScope>
        + ResourceExt
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned,
{
    let name = resource
        .meta()
        .name
        .as_ref()
        .ok_or_else(|| anyhow!("{} must have a name", T::kind(&())))?;

    let api: Api<T> = Api::all(client.clone());

    debug!(name = %name, kind = %T::kind(&()), "Applying cluster resource");

    api.patch(
        name,
        &PatchParams::apply(field_manager).force(),
        &Patch::Apply(resource),
    )
    .await?;

    info!("Applied {} {}", T::kind(&()), name);
    Ok(())
}

/// Fetch a namespaced resource, mapping "not found" to `None`.
///
/// Transient API failures are retried with [`retry_api_call`].
///
/// # Errors
///
/// Returns an error for any API failure other than not found.
pub async fn get_namespaced<T>(client: &Client, namespace: &str, name: &str) -> Result<Option<T>>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let operation = format!("get {} {namespace}/{name}", T::kind(&()));
    retry_api_call(|| api.get_opt(name), &operation).await
}

/// Delete a namespaced resource.
///
/// # Returns
///
/// `Ok(true)` when a delete was issued, `Ok(false)` when the object was already gone.
///
/// # Errors
///
/// Returns an error for any API failure other than not found.
pub async fn delete_namespaced<T>(client: &Client, namespace: &str, name: &str) -> Result<bool>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!("Deleted {} {}/{}", T::kind(&()), namespace, name);
            Ok(true)
        }
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            debug!("{} {}/{} already deleted", T::kind(&()), namespace, name);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
