// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for rendering and reconciliation.
//!
//! [`WebmeshError`] covers the conditions reconcilers and renderers report:
//! - configuration errors (unknown config group, missing join server, bad target union)
//! - recoverable waits (load balancer address not yet assigned)
//! - collaborator data problems (incomplete secrets, unparsable addresses)
//!
//! [`ValidationError`] is returned by the admission functions in [`crate::webhook`].
//!
//! Reconcilers wrap these in `anyhow::Error` with context; use [`is_lb_not_ready`]
//! to detect the recoverable case after wrapping.

use thiserror::Error;

/// Errors raised while rendering configuration or reconciling mesh resources.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebmeshError {
    /// A node group references a configuration preset the mesh does not define.
    #[error("config group {name} not found")]
    ConfigGroupNotFound {
        /// Name of the missing preset
        name: String,
    },

    /// A non-bootstrap node group was rendered without a join server address.
    #[error("join server is required for non bootstrap node groups")]
    JoinServerRequired,

    /// Serializing a rendered document failed.
    #[error("failed to marshal {document}: {reason}")]
    ConfigMarshal {
        /// Which document was being serialized (e.g. "node config")
        document: String,
        /// Underlying serializer message
        reason: String,
    },

    /// The fronting service of a node group has no external address yet.
    ///
    /// This is a recoverable condition. Reconcilers requeue after a short
    /// delay instead of surfacing it to the controller backoff.
    #[error("load balancer {service} not ready")]
    LbNotReady {
        /// Name of the service being waited on
        service: String,
    },

    /// Neither an in-cluster nor a cloud target is configured on a node group.
    #[error("no deployment configuration provided for node group {group}")]
    NoDeploymentTarget {
        /// Node group name
        group: String,
    },

    /// Both an in-cluster and a cloud target are configured on a node group.
    #[error("node group {group} declares both cluster and googleCloud targets")]
    MultipleDeploymentTargets {
        /// Node group name
        group: String,
    },

    /// No reachable entrypoint exists for a node group to join the mesh through.
    #[error("no join server found for node group {group} in mesh {mesh}")]
    NoJoinServer {
        /// Mesh name
        mesh: String,
        /// Node group name
        group: String,
    },

    /// An exposure service has a type external addresses cannot be derived from.
    #[error("service {service} has unsupported type {service_type}")]
    UnsupportedServiceType {
        /// Service name
        service: String,
        /// The offending `spec.type`
        service_type: String,
    },

    /// An address reported by the platform could not be parsed.
    #[error("invalid address {address}")]
    InvalidAddress {
        /// The unparsable address
        address: String,
    },

    /// A secret exists but lacks a required data key.
    #[error("secret {namespace}/{name} is missing key {key}")]
    MissingSecretKey {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Missing data key
        key: String,
    },

    /// The mesh referenced by a node group does not exist.
    #[error("mesh {namespace}/{name} not found")]
    MeshNotFound {
        /// Mesh namespace
        namespace: String,
        /// Mesh name
        name: String,
    },

    /// A required field is empty.
    #[error("{field} is required")]
    MissingField {
        /// Dotted path of the field
        field: String,
    },
}

/// An admission-time rejection.
///
/// Carries the offending field path and a human readable message, mirroring
/// what the API server shows the submitting client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the rejected field (e.g. `spec.ipv4`)
    pub field: String,
    /// Why the value was rejected
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Returns true when `err` (or anything in its chain) is [`WebmeshError::LbNotReady`].
#[must_use]
pub fn is_lb_not_ready(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<WebmeshError>(),
            Some(WebmeshError::LbNotReady { .. })
        )
    })
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
