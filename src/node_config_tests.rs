// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `node_config.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{
        Mesh, MeshSpec, NodeGroup, NodeGroupConfig, NodeGroupSpec, NodeMetricsConfig,
        NodeServicesConfig,
    };
    use crate::errors::WebmeshError;
    use crate::labels::ZONE_AWARENESS_LABEL;
    use crate::node_config::{effective_config, render, NodeConfigOptions};
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;

    fn mesh() -> Mesh {
        let mut mesh = Mesh::new("prod", MeshSpec::default());
        mesh.metadata.namespace = Some("net".into());
        mesh.spec.ipv4 = "172.16.0.0/12".into();
        mesh.spec.issuer.create = true;
        mesh
    }

    fn group(replicas: i32) -> NodeGroup {
        let mut group = NodeGroup::new(
            "edge",
            NodeGroupSpec {
                replicas,
                ..Default::default()
            },
        );
        group.metadata.namespace = Some("net".into());
        group
    }

    fn joining() -> NodeConfigOptions {
        NodeConfigOptions {
            join_server: "prod-bootstrap.net.svc.cluster.local:8443".into(),
            cert_dir: "/etc/webmesh/tls".into(),
            ..Default::default()
        }
    }

    fn bootstrap(servers: HashMap<String, String>) -> NodeConfigOptions {
        NodeConfigOptions {
            is_bootstrap: true,
            advertise_address: "prod-bootstrap-0.prod-bootstrap.net.svc.cluster.local:9443".into(),
            bootstrap_servers: servers,
            cert_dir: "/etc/webmesh/tls".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let m = mesh();
        let g = group(1);
        let a = render(&m, &g, &joining()).unwrap();
        let b = render(&m, &g, &joining()).unwrap();
        assert_eq!(a.raw(), b.raw());
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.checksum().len(), 64);
    }

    #[test]
    fn test_endpoint_order_does_not_change_checksum() {
        let m = mesh();
        let g = group(1);
        let mut a = joining();
        a.wireguard_endpoints = vec!["1.2.3.4:51820".into(), "[2001:db8::1]:51820".into()];
        let mut b = joining();
        b.wireguard_endpoints = vec!["[2001:db8::1]:51820".into(), "1.2.3.4:51820".into()];
        assert_eq!(
            render(&m, &g, &a).unwrap().checksum(),
            render(&m, &g, &b).unwrap().checksum()
        );
    }

    #[test]
    fn test_bootstrap_server_order_does_not_change_checksum() {
        let m = mesh();
        let g = group(3);
        let entries = [
            ("prod-bootstrap-0", "a:9443"),
            ("prod-bootstrap-1", "b:9443"),
            ("prod-bootstrap-2", "c:9443"),
        ];
        let forward: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let reverse: HashMap<String, String> = entries
            .iter()
            .rev()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();

        let a = render(&m, &g, &bootstrap(forward)).unwrap();
        let b = render(&m, &g, &bootstrap(reverse)).unwrap();
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(
            a.config.bootstrap.transport.tcp_servers,
            vec![
                "prod-bootstrap-0=a:9443",
                "prod-bootstrap-1=b:9443",
                "prod-bootstrap-2=c:9443"
            ]
        );
    }

    #[test]
    fn test_bootstrap_sets_mesh_parameters() {
        let m = mesh();
        let rendered = render(&m, &group(3), &bootstrap(HashMap::new())).unwrap();
        let config = rendered.config;
        assert!(config.bootstrap.enabled);
        assert_eq!(config.bootstrap.admin, "prod-admin");
        assert_eq!(config.bootstrap.ipv4_network, "172.16.0.0/12");
        assert_eq!(config.bootstrap.default_network_policy, "accept");
        assert!(config.services.api.leader_proxy);
        assert!(!config.bootstrap.transport.tcp_advertise_address.is_empty());
        assert!(config.mesh.join_address.is_empty());
    }

    #[test]
    fn test_single_replica_bootstrap_has_no_advertise_address() {
        let rendered = render(&mesh(), &group(1), &bootstrap(HashMap::new())).unwrap();
        assert!(rendered
            .config
            .bootstrap
            .transport
            .tcp_advertise_address
            .is_empty());
    }

    #[test]
    fn test_non_bootstrap_requires_join_server() {
        let opts = NodeConfigOptions::default();
        assert_eq!(
            render(&mesh(), &group(1), &opts).unwrap_err(),
            WebmeshError::JoinServerRequired
        );
    }

    #[test]
    fn test_non_bootstrap_joins_and_leaves() {
        let mut g = group(1);
        g.spec.config = Some(NodeGroupConfig {
            voter: true,
            ..Default::default()
        });
        let config = render(&mesh(), &g, &joining()).unwrap().config;
        assert_eq!(
            config.mesh.join_address,
            "prod-bootstrap.net.svc.cluster.local:8443"
        );
        assert!(config.raft.request_vote);
        assert!(config.raft.leave_on_shutdown);
        assert!(!config.bootstrap.enabled);
    }

    #[test]
    fn test_unknown_config_group_fails() {
        let mut g = group(1);
        g.spec.config_group = Some("missing".into());
        assert_eq!(
            render(&mesh(), &g, &joining()).unwrap_err(),
            WebmeshError::ConfigGroupNotFound {
                name: "missing".into()
            }
        );
    }

    #[test]
    fn test_config_group_merges_with_inline() {
        let mut m = mesh();
        m.spec.config_groups = BTreeMap::from([(
            "edge".to_string(),
            NodeGroupConfig {
                log_level: "debug".into(),
                no_ipv6: true,
                ..Default::default()
            },
        )]);
        let mut g = group(1);
        g.spec.config_group = Some("edge".into());
        g.spec.config = Some(NodeGroupConfig {
            voter: true,
            ..Default::default()
        });

        let merged = effective_config(&m, &g).unwrap();
        assert_eq!(merged.log_level, "debug");
        assert!(merged.no_ipv6);
        assert!(merged.voter);
    }

    #[test]
    fn test_storage_mode() {
        let m = mesh();
        let g = group(1);
        let ephemeral = render(&m, &g, &joining()).unwrap().config;
        assert!(ephemeral.raft.in_memory);
        assert!(ephemeral.raft.data_dir.is_empty());

        let mut opts = joining();
        opts.is_persistent = true;
        let persistent = render(&m, &g, &opts).unwrap().config;
        assert!(!persistent.raft.in_memory);
        assert_eq!(persistent.raft.data_dir, "/data");
    }

    #[test]
    fn test_services_default_disabled() {
        let config = render(&mesh(), &group(1), &joining()).unwrap().config;
        assert!(!config.services.metrics.enabled);
        assert!(!config.services.webrtc.enabled);
        assert!(!config.services.meshdns.enabled);
        assert!(!config.services.api.mesh);
        assert!(!config.services.api.leader_proxy);
    }

    #[test]
    fn test_services_copied_from_config() {
        let mut g = group(1);
        g.spec.config = Some(NodeGroupConfig {
            services: Some(NodeServicesConfig {
                metrics: Some(NodeMetricsConfig::default()),
                enable_peer_discovery_api: true,
                ..Default::default()
            }),
            ..Default::default()
        });
        let config = render(&mesh(), &g, &joining()).unwrap().config;
        assert!(config.services.metrics.enabled);
        assert_eq!(config.services.metrics.listen_address, ":8080");
        assert_eq!(config.services.metrics.path, "/metrics");
        assert!(config.services.api.peer_discovery);
    }

    #[test]
    fn test_tls_paths_and_zone_awareness() {
        let mut g = group(1);
        let config = render(&mesh(), &g, &joining()).unwrap().config;
        assert_eq!(config.global.tls_cert_file, "/etc/webmesh/tls/tls.crt");
        assert_eq!(config.global.tls_ca_file, "/etc/webmesh/tls/ca.crt");
        assert!(config.global.verify_chain_only);
        assert!(config.global.mtls);
        assert_eq!(config.mesh.zone_awareness_id, "edge");

        g.metadata.labels = Some(BTreeMap::from([(
            ZONE_AWARENESS_LABEL.to_string(),
            "zone-a".to_string(),
        )]));
        let config = render(&mesh(), &g, &joining()).unwrap().config;
        assert_eq!(config.mesh.zone_awareness_id, "zone-a");
    }

    #[test]
    fn test_keepalive_and_listen_port() {
        let mut opts = joining();
        opts.persistent_keepalive = Duration::from_secs(10);
        opts.wireguard_listen_port = 51821;
        let config = render(&mesh(), &group(1), &opts).unwrap().config;
        assert_eq!(config.wireguard.persistent_keep_alive, "10s");
        assert_eq!(config.wireguard.listen_port, Some(51821));
        assert!(config.wireguard.force_interface_name);
    }

    #[test]
    fn test_raw_is_yaml_of_config() {
        let rendered = render(&mesh(), &group(1), &joining()).unwrap();
        assert!(rendered.raw().contains("joinAddress:"));
        assert!(rendered.raw().contains("tlsCAFile:"));
        let parsed: crate::node_config::NodeConfig = serde_yaml::from_str(rendered.raw()).unwrap();
        assert_eq!(parsed, rendered.config);
    }
}
