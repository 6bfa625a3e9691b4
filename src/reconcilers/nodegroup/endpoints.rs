// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Address resolution for exposed node groups.
//!
//! - [`service_addresses`] reads the externally reachable addresses of an
//!   exposure service
//! - [`resolve_join_server`] picks the address a joining node contacts
//! - [`wireguard_endpoints`] builds the tunnel endpoint list of a replica

use crate::constants::{DEFAULT_GRPC_PORT, POD_NAME_TEMPLATE};
use crate::crd::{Mesh, NodeGroup, NodeGroupLBConfig};
use crate::errors::WebmeshError;
use crate::naming::{bootstrap_group_selector, headless_service_fqdn, lb_name};
use crate::store::ObjectStore;
use anyhow::{Context as _, Result};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use std::net::IpAddr;
use tracing::{debug, info};

/// True for addresses outside the private ranges (RFC 1918 and IPv6 ULA).
fn is_public(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !v4.is_private(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) != 0xfc00,
    }
}

/// `host:port`, bracketing IPv6 literals.
#[must_use]
pub fn host_port(host: &str, port: impl std::fmt::Display) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{host}]:{port}"),
        _ => format!("{host}:{port}"),
    }
}

fn push_unique(addresses: &mut Vec<String>, address: &str) {
    if !address.is_empty() && address != "None" && !addresses.iter().any(|a| a == address) {
        addresses.push(address.to_string());
    }
}

fn public_cluster_ips(service: &str, cluster_ips: &[String]) -> Result<Vec<String>, WebmeshError> {
    let mut public = Vec::new();
    for ip in cluster_ips.iter().filter(|ip| !ip.is_empty() && *ip != "None") {
        let addr: IpAddr = ip.parse().map_err(|_| WebmeshError::InvalidAddress {
            address: format!("{ip} (cluster IP of {service})"),
        })?;
        if is_public(addr) {
            public.push(addr.to_string());
        }
    }
    Ok(public)
}

/// Externally reachable addresses of an exposure service, in preference order.
///
/// # Errors
///
/// - [`WebmeshError::LbNotReady`] while a `LoadBalancer` has no ingress or no
///   address can be derived yet
/// - [`WebmeshError::UnsupportedServiceType`] for types other than
///   `LoadBalancer`, `NodePort` and `ClusterIP`
/// - [`WebmeshError::InvalidAddress`] if a cluster IP does not parse
pub fn service_addresses(service: &Service) -> Result<Vec<String>, WebmeshError> {
    let name = service.name_any();
    let not_ready = || WebmeshError::LbNotReady {
        service: name.clone(),
    };
    let spec = service.spec.clone().unwrap_or_default();
    let cluster_ips = spec.cluster_ips.clone().unwrap_or_default();
    let cluster_ip = spec.cluster_ip.clone().unwrap_or_default();

    let mut addresses = Vec::new();
    match spec.type_.as_deref().unwrap_or("ClusterIP") {
        "LoadBalancer" => {
            let ingress = service
                .status
                .as_ref()
                .and_then(|s| s.load_balancer.as_ref())
                .and_then(|lb| lb.ingress.as_ref())
                .filter(|ingress| !ingress.is_empty())
                .ok_or_else(not_ready)?;
            for entry in ingress {
                if let Some(address) = entry.ip.as_deref().or(entry.hostname.as_deref()) {
                    push_unique(&mut addresses, address);
                }
            }
            // Dual-stack services may carry a global IPv6 address among their cluster IPs
            for ip in public_cluster_ips(&name, &cluster_ips)? {
                push_unique(&mut addresses, &ip);
            }
        }
        "NodePort" => push_unique(&mut addresses, &cluster_ip),
        "ClusterIP" => {
            for ip in public_cluster_ips(&name, &cluster_ips)? {
                push_unique(&mut addresses, &ip);
            }
            push_unique(&mut addresses, &cluster_ip);
        }
        other => {
            return Err(WebmeshError::UnsupportedServiceType {
                service: name.clone(),
                service_type: other.to_string(),
            })
        }
    }

    if addresses.is_empty() {
        return Err(not_ready());
    }
    Ok(addresses)
}

/// Addresses of the exposure service of `group`, read from `store`.
///
/// A service that does not exist yet is reported as not ready.
///
/// # Errors
///
/// See [`service_addresses`]; store failures are returned with context.
pub async fn external_addresses(
    store: &dyn ObjectStore,
    mesh: &Mesh,
    group: &NodeGroup,
) -> Result<Vec<String>> {
    let namespace = group.namespace().unwrap_or_default();
    let name = lb_name(mesh, group);
    let service = store
        .get_service(&namespace, &name)
        .await
        .with_context(|| format!("failed to fetch service {namespace}/{name}"))?
        .ok_or_else(|| WebmeshError::LbNotReady {
            service: name.clone(),
        })?;
    Ok(service_addresses(&service)?)
}

/// External addresses of an exposed group: the static URL when set, else the service's.
///
/// # Errors
///
/// See [`external_addresses`].
pub async fn exposed_addresses(
    store: &dyn ObjectStore,
    mesh: &Mesh,
    group: &NodeGroup,
    lb: &NodeGroupLBConfig,
) -> Result<Vec<String>> {
    match lb.external_url.as_deref().filter(|url| !url.is_empty()) {
        Some(url) => Ok(vec![url.to_string()]),
        None => external_addresses(store, mesh, group).await,
    }
}

/// gRPC address a node of `group` joins the mesh through.
///
/// Candidates are the node groups carrying the mesh's bootstrap selector,
/// sorted by name, excluding `group` itself. The first candidate with an
/// exposure service wins. Without one, the first candidate's headless DNS name
/// is used, but only when `group` is itself part of the bootstrap topology.
///
/// # Errors
///
/// Returns [`WebmeshError::NoJoinServer`] when no candidate qualifies and
/// [`WebmeshError::LbNotReady`] while the exposed candidate has no address.
pub async fn resolve_join_server(
    store: &dyn ObjectStore,
    mesh: &Mesh,
    group: &NodeGroup,
) -> Result<String> {
    let namespace = mesh.namespace().unwrap_or_default();
    let mut candidates = store
        .list_node_groups(&namespace, &bootstrap_group_selector(mesh))
        .await
        .context("failed to list bootstrap node groups")?;
    candidates
        .retain(|c| !(c.name_any() == group.name_any() && c.namespace() == group.namespace()));
    candidates.sort_by_key(ResourceExt::name_any);

    if let Some((exposed, lb)) = candidates
        .iter()
        .find_map(|c| c.spec.service().map(|lb| (c, lb)))
    {
        let addresses = exposed_addresses(store, mesh, exposed, lb).await?;
        let address = addresses
            .first()
            .ok_or_else(|| WebmeshError::LbNotReady {
                service: lb_name(mesh, exposed),
            })?;
        let join_server = host_port(address, lb.grpc_port);
        debug!(
            group = %group.name_any(),
            via = %exposed.name_any(),
            join_server = %join_server,
            "Resolved join server"
        );
        return Ok(join_server);
    }

    if group.has_bootstrap_label() {
        if let Some(first) = candidates.first() {
            let join_server =
                format!("{}:{DEFAULT_GRPC_PORT}", headless_service_fqdn(mesh, first));
            debug!(
                group = %group.name_any(),
                join_server = %join_server,
                "Joining through headless service"
            );
            return Ok(join_server);
        }
    }

    info!(
        mesh = %mesh.name_any(),
        group = %group.name_any(),
        candidates = candidates.len(),
        "No join server available"
    );
    Err(WebmeshError::NoJoinServer {
        mesh: mesh.name_any(),
        group: group.name_any(),
    }
    .into())
}

/// Tunnel endpoints of an in-cluster replica.
///
/// Always includes the in-cluster endpoint on the headless service at
/// `listen_port`, followed by every external address at `external_port`.
#[must_use]
pub fn wireguard_endpoints(
    mesh: &Mesh,
    group: &NodeGroup,
    listen_port: u16,
    external: &[String],
    external_port: i32,
) -> Vec<String> {
    let mut endpoints = vec![format!(
        "{POD_NAME_TEMPLATE}.{}:{listen_port}",
        headless_service_fqdn(mesh, group)
    )];
    endpoints.extend(external.iter().map(|a| host_port(a, external_port)));
    endpoints
}

#[cfg(test)]
#[path = "endpoints_tests.rs"]
mod endpoints_tests;
