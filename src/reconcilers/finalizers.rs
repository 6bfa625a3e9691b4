// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for node groups.
//!
//! A node group owns things garbage collection cannot reach: cloud instances
//! and the claims of its replicas. The reconciler adds a finalizer on first
//! sight and, on deletion, runs [`FinalizerCleanup::cleanup`] before releasing
//! it.
//!
//! # Example
//!
//! ```rust,ignore
//! use webmesh_operator::labels::FINALIZER_NODE_GROUP;
//! use webmesh_operator::reconcilers::finalizers::{ensure_finalizer, handle_deletion};
//!
//! if group.metadata.deletion_timestamp.is_some() {
//!     return handle_deletion(&ctx, &group, FINALIZER_NODE_GROUP).await;
//! }
//! ensure_finalizer(ctx.store.as_ref(), &group, FINALIZER_NODE_GROUP).await?;
//! ```

use crate::context::Context;
use crate::crd::NodeGroup;
use crate::store::ObjectStore;
use anyhow::Result;
use async_trait::async_trait;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::info;

/// Teardown that must finish before the finalizer is released.
#[async_trait]
pub trait FinalizerCleanup {
    /// Release everything the resource owns outside of garbage collection.
    ///
    /// # Errors
    ///
    /// Any error keeps the finalizer in place; deletion is retried on the next
    /// reconciliation.
    async fn cleanup(&self, ctx: &Context) -> Result<()>;
}

#[must_use]
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add `finalizer` to `group` if missing.
///
/// # Returns
///
/// `Ok(true)` when the finalizer was added, `Ok(false)` when it was already present.
///
/// # Errors
///
/// Returns an error if the patch fails.
pub async fn ensure_finalizer(
    store: &dyn ObjectStore,
    group: &NodeGroup,
    finalizer: &str,
) -> Result<bool> {
    if has_finalizer(&group.metadata, finalizer) {
        return Ok(false);
    }

    let mut finalizers = group.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    store.patch_finalizers(group, &finalizers).await?;

    info!(
        "Added finalizer {} to {}/{} NodeGroup",
        finalizer,
        group.namespace().unwrap_or_default(),
        group.name_any()
    );
    Ok(true)
}

/// Remove `finalizer` from `group` if present.
///
/// # Errors
///
/// Returns an error if the patch fails.
pub async fn remove_finalizer(
    store: &dyn ObjectStore,
    group: &NodeGroup,
    finalizer: &str,
) -> Result<()> {
    if !has_finalizer(&group.metadata, finalizer) {
        return Ok(());
    }

    let finalizers: Vec<String> = group
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    store.patch_finalizers(group, &finalizers).await?;

    info!(
        "Removed finalizer {} from {}/{} NodeGroup",
        finalizer,
        group.namespace().unwrap_or_default(),
        group.name_any()
    );
    Ok(())
}

/// Run cleanup, then release the finalizer.
///
/// Does nothing when the finalizer is already gone.
///
/// # Errors
///
/// Returns an error if cleanup or the finalizer patch fails. The finalizer
/// then stays and deletion remains blocked.
pub async fn handle_deletion(ctx: &Context, group: &NodeGroup, finalizer: &str) -> Result<()> {
    info!(
        "NodeGroup {}/{} is being deleted",
        group.namespace().unwrap_or_default(),
        group.name_any()
    );

    if has_finalizer(&group.metadata, finalizer) {
        group.cleanup(ctx).await?;
        remove_finalizer(ctx.store.as_ref(), group, finalizer).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
