// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for Webmesh resources.
//!
//! # Available Reconcilers
//!
//! - [`reconcile_mesh`] - Issuer chain, admin certificate, bootstrap node groups
//!   and the admin/manager client configuration secrets of a `Mesh`
//! - [`reconcile_node_group`] - Certificates, configuration and workloads (or
//!   cloud instances) of a `NodeGroup`, plus teardown on deletion
//!
//! Both return an [`Outcome`] on success. Conditions that resolve on their own
//! (a certificate still being issued, a load balancer without an address yet)
//! are an [`Outcome::Requeue`], never an error. Errors go to the controller's
//! error policy.
//!
//! # Example
//!
//! ```rust,ignore
//! use webmesh_operator::reconcilers::reconcile_mesh;
//!
//! let outcome = reconcile_mesh(&ctx, &mesh).await?;
//! let action = outcome.action(ctx.ready_requeue);
//! ```

pub mod finalizers;
pub mod mesh;
pub mod nodegroup;
pub mod resources;
pub mod retry;

pub use mesh::reconcile_mesh;
pub use nodegroup::reconcile_node_group;

use crate::store::{ChildObject, ObjectStore};
use anyhow::Result;
use kube::runtime::controller::Action;
use std::time::Duration;
use tracing::debug;

/// Result of a successful reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Converged. Check again at the regular interval.
    Ready,
    /// A dependency is not ready yet.
    Requeue {
        after: Duration,
        /// Short label used for the requeue metric
        reason: &'static str,
    },
    /// The resource is gone. Wait for the next change.
    Deleted,
}

impl Outcome {
    #[must_use]
    pub fn requeue(secs: u64, reason: &'static str) -> Self {
        Outcome::Requeue {
            after: Duration::from_secs(secs),
            reason,
        }
    }

    /// Controller action for this outcome.
    #[must_use]
    pub fn action(self, ready_requeue: Duration) -> Action {
        match self {
            Outcome::Ready => Action::requeue(ready_requeue),
            Outcome::Requeue { after, .. } => Action::requeue(after),
            Outcome::Deleted => Action::await_change(),
        }
    }
}

/// Apply `objects` in order, stopping at the first failure.
///
/// # Errors
///
/// Returns the error of the first object that could not be applied.
pub async fn apply_all(
    store: &dyn ObjectStore,
    objects: &[ChildObject],
    field_manager: &str,
) -> Result<()> {
    for object in objects {
        debug!(
            kind = object.kind(),
            namespace = %object.namespace(),
            name = %object.name(),
            "Applying"
        );
        store.apply(object, field_manager).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
