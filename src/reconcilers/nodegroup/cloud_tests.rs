// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cloud.rs`

#[cfg(test)]
mod tests {
    use crate::compute::Instance;
    use crate::constants::{CLOUD_LB_WAIT_REQUEUE_SECS, MESH_WAIT_REQUEUE_SECS};
    use crate::crd::{
        Mesh, MeshSpec, NodeGroup, NodeGroupClusterConfig, NodeGroupGoogleCloudConfig,
        NodeGroupLBConfig, NodeGroupSpec, SecretKeyRef,
    };
    use crate::mesh_resources::bootstrap_groups;
    use crate::reconcilers::nodegroup::cloud::{gce_labels, reconcile, teardown};
    use crate::reconcilers::Outcome;
    use crate::testing::{context, opaque_secret, tls_secret, FakeCompute, FakeStore};
    use k8s_openapi::api::core::v1::ObjectReference;
    use std::sync::Arc;

    fn mesh(service: NodeGroupLBConfig) -> Mesh {
        let mut mesh = Mesh::new(
            "prod",
            MeshSpec {
                bootstrap: NodeGroupSpec {
                    cluster: Some(NodeGroupClusterConfig {
                        service: Some(service),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        mesh.metadata.namespace = Some("net".into());
        mesh
    }

    fn exposed_mesh() -> Mesh {
        mesh(NodeGroupLBConfig {
            external_url: Some("mesh.example.com".into()),
            ..Default::default()
        })
    }

    fn cloud_config() -> NodeGroupGoogleCloudConfig {
        NodeGroupGoogleCloudConfig {
            project_id: "proj".into(),
            subnetwork: "mesh-subnet".into(),
            zone: "us-central1-a".into(),
            machine_type: "e2-small".into(),
            tags: vec!["webmesh".into()],
            ..Default::default()
        }
    }

    fn workers(cloud: NodeGroupGoogleCloudConfig) -> NodeGroup {
        let mut group = NodeGroup::new(
            "workers",
            NodeGroupSpec {
                replicas: 2,
                mesh: ObjectReference {
                    name: Some("prod".into()),
                    ..Default::default()
                },
                google_cloud: Some(cloud),
                ..Default::default()
            },
        );
        group.metadata.namespace = Some("net".into());
        group
    }

    fn seeded_store(mesh: &Mesh, with_certs: bool) -> Arc<FakeStore> {
        let store = FakeStore::new();
        store.insert_mesh(mesh.clone());
        for group in bootstrap_groups(mesh) {
            store.insert_node_group(group);
        }
        if with_certs {
            store.insert_secret(tls_secret("net", "prod-workers-0"));
            store.insert_secret(tls_secret("net", "prod-workers-1"));
        }
        store
    }

    #[tokio::test]
    async fn test_instances_wait_for_certificates() {
        let m = exposed_mesh();
        let store = seeded_store(&m, false);
        let compute = FakeCompute::default();
        let ctx = context(&store, &compute);
        let group = workers(cloud_config());

        let outcome = reconcile(&ctx, &m, &group, &cloud_config()).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::requeue(MESH_WAIT_REQUEUE_SECS, "node certificates pending")
        );
        assert!(compute.inserted().is_empty());
    }

    #[tokio::test]
    async fn test_join_server_is_awaited() {
        let m = mesh(NodeGroupLBConfig {
            service_type: "LoadBalancer".into(),
            ..Default::default()
        });
        let store = seeded_store(&m, true);
        let compute = FakeCompute::default();
        let ctx = context(&store, &compute);

        let outcome = reconcile(&ctx, &m, &workers(cloud_config()), &cloud_config())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::requeue(CLOUD_LB_WAIT_REQUEUE_SECS, "join server pending")
        );
        assert!(compute.inserted().is_empty());
    }

    #[tokio::test]
    async fn test_instances_are_created_once() {
        let m = exposed_mesh();
        let store = seeded_store(&m, true);
        let compute = FakeCompute::default();
        let ctx = context(&store, &compute);
        let group = workers(cloud_config());

        let outcome = reconcile(&ctx, &m, &group, &cloud_config()).await.unwrap();
        assert_eq!(outcome, Outcome::Ready);

        let inserted = compute.inserted();
        assert_eq!(inserted.len(), 2);
        let first = &inserted[0];
        assert_eq!(first.name, "workers-0");
        assert!(first.description.starts_with("workers-0 "));
        assert_eq!(first.machine_type, "zones/us-central1-a/machineTypes/e2-small");
        assert!(first.can_ip_forward);
        assert_eq!(
            first.disks[0]
                .initialize_params
                .as_ref()
                .unwrap()
                .source_image,
            "projects/ubuntu-os-cloud/global/images/ubuntu-2204-lts-latest"
        );
        let nic = &first.network_interfaces[0];
        assert_eq!(
            nic.subnetwork,
            "projects/proj/regions/us-central1/subnetworks/mesh-subnet"
        );
        assert_eq!(nic.stack_type, "IPV4_IPV6");
        assert_eq!(nic.access_configs[0].name, "wanv4");
        assert_eq!(nic.ipv6_access_configs[0].type_, "DIRECT_IPV6");
        assert_eq!(first.tags.as_ref().unwrap().items, vec!["webmesh"]);

        let user_data = &first.metadata.as_ref().unwrap().items[0];
        assert_eq!(user_data.key, "user-data");
        assert!(user_data.value.starts_with("#cloud-config"));
        assert!(user_data.value.contains("mesh.example.com:8443"));
        assert!(user_data.value.contains("prod-workers-0-cert"));

        // Unchanged configuration leaves the instances alone
        reconcile(&ctx, &m, &group, &cloud_config()).await.unwrap();
        assert_eq!(compute.inserted().len(), 2);
        assert!(compute.deleted().is_empty());
        assert_eq!(compute.credentials(), vec![None, None]);
    }

    #[tokio::test]
    async fn test_changed_instance_is_replaced() {
        let m = exposed_mesh();
        let store = seeded_store(&m, true);
        let compute = FakeCompute::default();
        compute.insert_existing(Instance {
            name: "workers-0".into(),
            description: "workers-0 stale".into(),
            ..Default::default()
        });
        let ctx = context(&store, &compute);

        reconcile(&ctx, &m, &workers(cloud_config()), &cloud_config())
            .await
            .unwrap();

        assert_eq!(compute.deleted(), vec!["workers-0"]);
        assert_eq!(compute.inserted().len(), 2);
        assert_ne!(
            compute.instance("workers-0").unwrap().description,
            "workers-0 stale"
        );
    }

    #[tokio::test]
    async fn test_credentials_come_from_secret() {
        let m = exposed_mesh();
        let store = seeded_store(&m, true);
        store.insert_secret(opaque_secret("net", "gcp", "key.json", "{\"type\":\"x\"}"));
        let compute = FakeCompute::default();
        let ctx = context(&store, &compute);
        let cloud = NodeGroupGoogleCloudConfig {
            credentials: Some(SecretKeyRef {
                name: "gcp".into(),
                key: "key.json".into(),
            }),
            ..cloud_config()
        };

        reconcile(&ctx, &m, &workers(cloud.clone()), &cloud)
            .await
            .unwrap();

        assert_eq!(
            compute.credentials(),
            vec![Some("{\"type\":\"x\"}".to_string())]
        );
    }

    #[tokio::test]
    async fn test_teardown_deletes_existing_instances_only() {
        let m = exposed_mesh();
        let store = seeded_store(&m, false);
        let compute = FakeCompute::default();
        compute.insert_existing(Instance {
            name: "workers-1".into(),
            ..Default::default()
        });
        let ctx = context(&store, &compute);

        teardown(&ctx, &workers(cloud_config()), &cloud_config())
            .await
            .unwrap();

        assert_eq!(compute.deleted(), vec!["workers-1"]);
    }

    #[test]
    fn test_gce_labels_are_sanitized() {
        let labels = gce_labels(&exposed_mesh());
        assert!(!labels.is_empty());
        for (key, value) in &labels {
            for s in [key, value] {
                assert!(s.len() <= 63);
                assert!(s
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'));
            }
        }
        assert!(labels.get("webmesh-io-mesh-name").map(String::as_str) == Some("prod"));
    }
}
