// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Edge proxy configuration rendering
//!
//! The edge proxy fronts a node group whose replicas run as standalone pods.
//! It exposes:
//!
//! - one TCP router on the `grpc` entrypoint that passes TLS through (SNI `*`)
//!   to every replica's gRPC port, load balanced
//! - one UDP router per replica on entrypoint `wg{i}`, forwarding to that
//!   replica's dedicated tunnel port only
//!
//! The tree mirrors the proxy's file-provider schema so field names are checked
//! at compile time.

use crate::checksum::sha256_hex;
use crate::constants::{DEFAULT_GRPC_PORT, DEFAULT_WIREGUARD_PORT};
use crate::crd::{Mesh, NodeGroup};
use crate::errors::WebmeshError;
use crate::naming::node_cluster_fqdn;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Name of the gRPC entrypoint, router and service.
pub const GRPC_ROUTE: &str = "grpc";

/// Dynamic configuration of the edge proxy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeProxyConfig {
    pub tcp: TcpConfig,
    pub udp: UdpConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpConfig {
    pub routers: BTreeMap<String, TcpRouter>,
    pub services: BTreeMap<String, LoadBalancedService>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UdpConfig {
    pub routers: BTreeMap<String, UdpRouter>,
    pub services: BTreeMap<String, LoadBalancedService>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpRouter {
    pub entry_points: Vec<String>,
    pub rule: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouterTls>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterTls {
    pub passthrough: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdpRouter {
    pub entry_points: Vec<String>,
    pub service: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancedService {
    pub load_balancer: LoadBalancer,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub servers: Vec<Server>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub address: String,
}

/// A rendered edge proxy configuration and the checksum of its serialized form.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedEdgeProxyConfig {
    pub config: EdgeProxyConfig,
    raw: String,
    checksum: String,
}

impl RenderedEdgeProxyConfig {
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// Entrypoint name of replica `index`'s tunnel.
#[must_use]
pub fn tunnel_entrypoint(index: usize) -> String {
    format!("wg{index}")
}

/// Router and service name of replica `index`'s tunnel.
#[must_use]
pub fn tunnel_route(index: usize) -> String {
    format!("tunnel-{index}")
}

/// Tunnel port replica `index` listens on inside the cluster.
#[must_use]
pub fn replica_tunnel_port(index: usize) -> i32 {
    offset_port(i32::from(DEFAULT_WIREGUARD_PORT), index)
}

/// `base + index`, saturating instead of overflowing.
#[must_use]
pub fn offset_port(base: i32, index: usize) -> i32 {
    base.saturating_add(i32::try_from(index).unwrap_or(i32::MAX))
}

fn single_server(address: String) -> LoadBalancedService {
    LoadBalancedService {
        load_balancer: LoadBalancer {
            servers: vec![Server { address }],
        },
    }
}

/// Render the edge proxy configuration for `group`.
///
/// Replicas are iterated in ascending index order.
///
/// # Errors
///
/// Returns [`WebmeshError::ConfigMarshal`] if serialization fails.
pub fn render(mesh: &Mesh, group: &NodeGroup) -> Result<RenderedEdgeProxyConfig, WebmeshError> {
    let replicas = group.replica_count();
    let mut config = EdgeProxyConfig::default();

    config.tcp.routers.insert(
        GRPC_ROUTE.to_string(),
        TcpRouter {
            entry_points: vec![GRPC_ROUTE.to_string()],
            rule: "HostSNI(`*`)".to_string(),
            service: GRPC_ROUTE.to_string(),
            tls: Some(RouterTls { passthrough: true }),
        },
    );
    config.tcp.services.insert(
        GRPC_ROUTE.to_string(),
        LoadBalancedService {
            load_balancer: LoadBalancer {
                servers: (0..replicas)
                    .map(|i| Server {
                        address: format!(
                            "{}:{DEFAULT_GRPC_PORT}",
                            node_cluster_fqdn(mesh, group, i)
                        ),
                    })
                    .collect(),
            },
        },
    );

    for i in 0..replicas {
        let route = tunnel_route(i);
        config.udp.routers.insert(
            route.clone(),
            UdpRouter {
                entry_points: vec![tunnel_entrypoint(i)],
                service: route.clone(),
            },
        );
        config.udp.services.insert(
            route,
            single_server(format!(
                "{}:{}",
                node_cluster_fqdn(mesh, group, i),
                replica_tunnel_port(i)
            )),
        );
    }

    let raw = serde_yaml::to_string(&config).map_err(|e| WebmeshError::ConfigMarshal {
        document: "edge proxy config".to_string(),
        reason: e.to_string(),
    })?;
    let checksum = sha256_hex(&raw);

    debug!(
        group = %group.name_any(),
        replicas = replicas,
        checksum = %checksum,
        "Rendered edge proxy config"
    );

    Ok(RenderedEdgeProxyConfig {
        config,
        raw,
        checksum,
    })
}

#[cfg(test)]
#[path = "edge_proxy_tests.rs"]
mod edge_proxy_tests;
