// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # webmesh-operator - Webmesh Operator for Kubernetes
//!
//! A Kubernetes operator that runs [Webmesh](https://webmeshproj.github.io)
//! overlay networks from two Custom Resource Definitions (CRDs).
//!
//! ## Overview
//!
//! - A `Mesh` gets a certificate issuer chain, an admin certificate, its
//!   bootstrap node groups and client configuration secrets for in-cluster and
//!   external administration
//! - A `NodeGroup` gets per-replica certificates and node configuration, then
//!   runs either as in-cluster workloads (a `StatefulSet`, or standalone pods
//!   behind an edge proxy) or as Compute Engine instances booted with cloud-init
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`reconcilers`] - Reconciliation logic for each resource type
//! - [`mesh_resources`] - Builders for every child object
//! - [`node_config`], [`edge_proxy`], [`cloud_config`], [`admin_config`] -
//!   Rendered documents
//! - [`store`] - Declarative object store over the Kubernetes API
//! - [`compute`] - Cloud compute seam and the Compute Engine client
//! - [`webhook`] - Admission defaulting and validation
//!
//! ## Example
//!
//! ```rust,no_run
//! use webmesh_operator::crd::{Mesh, MeshSpec};
//! use webmesh_operator::mesh_resources::bootstrap_groups;
//!
//! let mesh = Mesh::new("prod", MeshSpec::default());
//! let groups = bootstrap_groups(&mesh);
//! assert_eq!(groups.len(), 1);
//! ```

pub mod admin_config;
pub mod cert_manager;
pub mod checksum;
pub mod cloud_config;
pub mod compute;
pub mod constants;
pub mod context;
pub mod crd;
pub mod edge_proxy;
pub mod errors;
pub mod labels;
pub mod mesh_resources;
pub mod metrics;
pub mod naming;
pub mod node_config;
pub mod reconcilers;
pub mod store;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;
