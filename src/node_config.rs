// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Node configuration rendering
//!
//! Builds the complete runtime configuration of one mesh node from its mesh,
//! its node group and the per-replica network identity computed by the caller.
//! Rendering is pure: secrets, peer groups and service addresses are fetched by
//! the reconcilers before [`render`] is called.
//!
//! The rendered YAML is hashed exactly once. Every list that may arrive in an
//! arbitrary order (tunnel endpoints, bootstrap servers, voters) is sorted first
//! so the checksum only changes when the content does.

use crate::checksum::sha256_hex;
use crate::constants::{DEFAULT_DATA_DIRECTORY, TLS_CA_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use crate::crd::{merge_optional, Merge, Mesh, NodeGroup, NodeGroupConfig};
use crate::errors::WebmeshError;
use crate::labels::ZONE_AWARENESS_LABEL;
use crate::naming::mesh_admin_hostname;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Per-replica inputs of the node configuration renderer.
#[derive(Clone, Debug, Default)]
pub struct NodeConfigOptions {
    /// Raft advertise address. Only used by multi-replica bootstrap groups.
    pub advertise_address: String,
    /// Endpoint other nodes should prefer.
    pub primary_endpoint: String,
    /// Every endpoint the node's tunnel is reachable on, in any order.
    pub wireguard_endpoints: Vec<String>,
    /// Tunnel listen port. Zero keeps the node's default.
    pub wireguard_listen_port: u16,
    /// Render the founding consensus configuration.
    pub is_bootstrap: bool,
    /// Bootstrap peers keyed by node name, values are `host:port`.
    pub bootstrap_servers: HashMap<String, String>,
    /// Additional voters beyond the bootstrap servers.
    pub bootstrap_voters: Vec<String>,
    /// gRPC address of an existing member. Required for non-bootstrap nodes.
    pub join_server: String,
    /// Keep raft data on disk instead of in memory.
    pub is_persistent: bool,
    /// Directory holding `tls.crt`, `tls.key` and `ca.crt`.
    pub cert_dir: String,
    pub detect_endpoints: bool,
    pub allow_remote_detection: bool,
    pub persistent_keepalive: Duration,
}

/// Runtime configuration of a mesh node, in the node's own wire format.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub global: GlobalOptions,
    pub mesh: MeshOptions,
    pub bootstrap: BootstrapOptions,
    pub raft: RaftOptions,
    pub wireguard: WireGuardOptions,
    pub services: ServiceOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalOptions {
    pub log_level: String,
    #[serde(rename = "tlsCertFile")]
    pub tls_cert_file: String,
    #[serde(rename = "tlsKeyFile")]
    pub tls_key_file: String,
    #[serde(rename = "tlsCAFile")]
    pub tls_ca_file: String,
    #[serde(rename = "mtls")]
    pub mtls: bool,
    pub verify_chain_only: bool,
    #[serde(rename = "disableIPv6")]
    pub disable_ipv6: bool,
    pub detect_endpoints: bool,
    pub allow_remote_detection: bool,
    #[serde(rename = "detectIPv6")]
    pub detect_ipv6: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshOptions {
    #[serde(rename = "zoneAwarenessID")]
    pub zone_awareness_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub join_address: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapOptions {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin: String,
    #[serde(rename = "ipv4Network", default, skip_serializing_if = "String::is_empty")]
    pub ipv4_network: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_network_policy: String,
    pub transport: BootstrapTransportOptions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub voters: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapTransportOptions {
    #[serde(rename = "tcpAdvertiseAddress", default, skip_serializing_if = "String::is_empty")]
    pub tcp_advertise_address: String,
    /// Sorted `name=host:port` entries.
    #[serde(rename = "tcpServers", default, skip_serializing_if = "Vec::is_empty")]
    pub tcp_servers: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaftOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_dir: String,
    pub in_memory: bool,
    pub request_vote: bool,
    pub leave_on_shutdown: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireGuardOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
    /// Go-style duration, e.g. `10s`.
    pub persistent_keep_alive: String,
    pub force_interface_name: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceOptions {
    pub api: ApiOptions,
    pub webrtc: WebRTCOptions,
    pub meshdns: MeshDNSOptions,
    pub metrics: MetricsOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiOptions {
    pub leader_proxy: bool,
    pub mesh: bool,
    pub admin: bool,
    pub peer_discovery: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRTCOptions {
    pub enabled: bool,
    #[serde(rename = "stunServers", default, skip_serializing_if = "Vec::is_empty")]
    pub stun_servers: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshDNSOptions {
    pub enabled: bool,
    #[serde(rename = "listenUDP", default, skip_serializing_if = "String::is_empty")]
    pub listen_udp: String,
    #[serde(rename = "listenTCP", default, skip_serializing_if = "String::is_empty")]
    pub listen_tcp: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsOptions {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub listen_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

/// A rendered node configuration, its serialized form and the checksum of that form.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedNodeConfig {
    pub config: NodeConfig,
    raw: String,
    checksum: String,
}

impl RenderedNodeConfig {
    /// Serialized YAML stored under `config.yaml`.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// SHA-256 of [`Self::raw`].
    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// Resolve the effective configuration of a node group.
///
/// A referenced preset is merged with the inline config (inline wins). The
/// result is defaulted so every field the renderer reads has a value.
///
/// # Errors
///
/// Returns [`WebmeshError::ConfigGroupNotFound`] if the referenced preset does not exist.
pub fn effective_config(mesh: &Mesh, group: &NodeGroup) -> Result<NodeGroupConfig, WebmeshError> {
    let inline = group.spec.config.as_ref();
    let merged = match group.spec.config_group.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => {
            let preset = mesh.spec.config_groups.get(name).ok_or_else(|| {
                WebmeshError::ConfigGroupNotFound {
                    name: name.to_string(),
                }
            })?;
            merge_optional(Some(preset), inline)
        }
        None => merge_optional(None, inline),
    };
    Ok(merged.defaulted())
}

/// Render the configuration of one mesh node.
///
/// # Arguments
///
/// * `mesh` - The mesh the node belongs to
/// * `group` - The node group the node belongs to
/// * `opts` - Per-replica network identity
///
/// # Errors
///
/// Returns [`WebmeshError::ConfigGroupNotFound`] for an unknown preset,
/// [`WebmeshError::JoinServerRequired`] when a non-bootstrap node has no join
/// server, and [`WebmeshError::ConfigMarshal`] if serialization fails.
pub fn render(
    mesh: &Mesh,
    group: &NodeGroup,
    opts: &NodeConfigOptions,
) -> Result<RenderedNodeConfig, WebmeshError> {
    let groupcfg = effective_config(mesh, group)?;

    let mut config = NodeConfig {
        global: GlobalOptions {
            log_level: groupcfg.log_level.clone(),
            tls_cert_file: format!("{}/{TLS_CERT_KEY}", opts.cert_dir),
            tls_key_file: format!("{}/{TLS_PRIVATE_KEY_KEY}", opts.cert_dir),
            tls_ca_file: format!("{}/{TLS_CA_KEY}", opts.cert_dir),
            mtls: true,
            verify_chain_only: mesh.spec.issuer.create,
            disable_ipv6: groupcfg.no_ipv6,
            detect_endpoints: opts.detect_endpoints,
            allow_remote_detection: opts.allow_remote_detection,
            detect_ipv6: opts.detect_endpoints,
        },
        ..Default::default()
    };

    config.mesh.zone_awareness_id = group
        .labels()
        .get(ZONE_AWARENESS_LABEL)
        .cloned()
        .unwrap_or_else(|| group.name_any());
    config.mesh.primary_endpoint = opts.primary_endpoint.clone();

    let mut endpoints = opts.wireguard_endpoints.clone();
    endpoints.sort();
    config.wireguard = WireGuardOptions {
        endpoints,
        persistent_keep_alive: format!("{}s", opts.persistent_keepalive.as_secs()),
        force_interface_name: true,
        listen_port: (opts.wireguard_listen_port > 0).then_some(opts.wireguard_listen_port),
    };

    if opts.is_bootstrap {
        let mut servers: Vec<String> = opts
            .bootstrap_servers
            .iter()
            .map(|(name, addr)| format!("{name}={addr}"))
            .collect();
        servers.sort();
        let mut voters = opts.bootstrap_voters.clone();
        voters.sort();

        config.bootstrap = BootstrapOptions {
            enabled: true,
            admin: mesh_admin_hostname(mesh),
            ipv4_network: mesh.spec.ipv4.clone(),
            default_network_policy: mesh.spec.default_network_policy.as_str().to_string(),
            transport: BootstrapTransportOptions {
                tcp_advertise_address: if group.spec.replicas > 1 {
                    opts.advertise_address.clone()
                } else {
                    String::new()
                },
                tcp_servers: servers,
            },
            voters,
        };
        config.services.api.leader_proxy = true;
    } else {
        if opts.join_server.is_empty() {
            return Err(WebmeshError::JoinServerRequired);
        }
        config.mesh.join_address = opts.join_server.clone();
        config.raft.request_vote = groupcfg.voter;
        config.raft.leave_on_shutdown = true;
    }

    if opts.is_persistent {
        config.raft.data_dir = DEFAULT_DATA_DIRECTORY.to_string();
    } else {
        config.raft.in_memory = true;
    }

    if let Some(services) = &groupcfg.services {
        config.services.api.leader_proxy |= services.enable_leader_proxy;
        config.services.api.mesh = services.enable_mesh_api;
        config.services.api.admin = services.enable_admin_api;
        config.services.api.peer_discovery = services.enable_peer_discovery_api;
        if let Some(webrtc) = &services.web_rtc {
            config.services.webrtc = WebRTCOptions {
                enabled: true,
                stun_servers: webrtc.stun_servers.clone(),
            };
        }
        if let Some(dns) = &services.mesh_dns {
            config.services.meshdns = MeshDNSOptions {
                enabled: true,
                listen_udp: dns.listen_udp.clone(),
                listen_tcp: dns.listen_tcp.clone(),
            };
        }
        if let Some(metrics) = &services.metrics {
            config.services.metrics = MetricsOptions {
                enabled: true,
                listen_address: metrics.listen_address.clone(),
                path: metrics.path.clone(),
            };
        }
    }

    let raw = serde_yaml::to_string(&config).map_err(|e| WebmeshError::ConfigMarshal {
        document: "node config".to_string(),
        reason: e.to_string(),
    })?;
    let checksum = sha256_hex(&raw);

    debug!(
        group = %group.name_any(),
        bootstrap = opts.is_bootstrap,
        checksum = %checksum,
        "Rendered node config"
    );

    Ok(RenderedNodeConfig {
        config,
        raw,
        checksum,
    })
}

#[cfg(test)]
#[path = "node_config_tests.rs"]
mod node_config_tests;
