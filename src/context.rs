// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for both controllers.
//!
//! Every reconciliation receives an `Arc<Context>` holding the object store,
//! the cloud compute provider and the operator's runtime settings. Nothing in
//! it is mutated after startup.

use crate::compute::ComputeProvider;
use crate::constants::{DEFAULT_READY_REQUEUE_SECS, FIELD_MANAGER};
use crate::store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Declarative object store the reconcilers read from and apply to
    pub store: Arc<dyn ObjectStore>,

    /// Factory for cloud compute clients
    pub compute: Arc<dyn ComputeProvider>,

    /// Field manager used for every server-side apply
    pub field_manager: String,

    /// Requeue interval after a clean reconciliation
    pub ready_requeue: Duration,
}

impl Context {
    /// Context with the default field manager and requeue interval.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, compute: Arc<dyn ComputeProvider>) -> Self {
        Self {
            store,
            compute,
            field_manager: FIELD_MANAGER.to_string(),
            ready_requeue: Duration::from_secs(DEFAULT_READY_REQUEUE_SECS),
        }
    }

    #[must_use]
    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    #[must_use]
    pub fn with_ready_requeue(mut self, ready_requeue: Duration) -> Self {
        self.ready_requeue = ready_requeue;
        self
    }
}
