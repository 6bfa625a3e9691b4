// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `cluster.rs`

#[cfg(test)]
mod tests {
    use crate::constants::{
        CLUSTER_LB_WAIT_REQUEUE_SECS, MESH_WAIT_REQUEUE_SECS, NODE_CONFIG_KEY,
        POD_REPLACE_REQUEUE_SECS,
    };
    use crate::crd::{
        Mesh, MeshSpec, NodeGroup, NodeGroupClusterConfig, NodeGroupLBConfig, NodeGroupSpec,
        SecretKeyRef, WorkloadKind,
    };
    use crate::labels::SPEC_CHECKSUM_ANNOTATION;
    use crate::mesh_resources::bootstrap_groups;
    use crate::reconcilers::nodegroup::cluster::{reconcile, teardown};
    use crate::reconcilers::Outcome;
    use crate::store::ChildObject;
    use crate::testing::{context, opaque_secret, tls_secret, FakeCompute, FakeStore};
    use k8s_openapi::api::core::v1::{ObjectReference, Pod};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn mesh() -> Mesh {
        let mut mesh = Mesh::new(
            "prod",
            MeshSpec {
                bootstrap: NodeGroupSpec {
                    replicas: 3,
                    cluster: Some(NodeGroupClusterConfig {
                        service: Some(NodeGroupLBConfig {
                            external_url: Some("mesh.example.com".into()),
                            ..Default::default()
                        }),
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

    fn edge(cluster: NodeGroupClusterConfig, replicas: i32) -> NodeGroup {
        let mut group = NodeGroup::new(
            "edge",
            NodeGroupSpec {
                replicas,
                mesh: ObjectReference {
                    name: Some("prod".into()),
                    ..Default::default()
                },
                cluster: Some(cluster),
                ..Default::default()
            },
        );
        group.metadata.namespace = Some("net".into());
        group
    }

    fn seeded_store(mesh: &Mesh) -> Arc<FakeStore> {
        let store = FakeStore::new();
        store.insert_mesh(mesh.clone());
        for group in bootstrap_groups(mesh) {
            store.insert_node_group(group);
        }
        store
    }

    fn config_yaml(store: &FakeStore, name: &str) -> String {
        store
            .applied_of_kind("ConfigMap")
            .into_iter()
            .rev()
            .find_map(|o| match o {
                ChildObject::ConfigMap(cm) if cm.metadata.name.as_deref() == Some(name) => {
                    cm.data.and_then(|d| d.get(NODE_CONFIG_KEY).cloned())
                }
                _ => None,
            })
            .unwrap_or_else(|| panic!("config map {name} was not applied"))
    }

    fn cluster_of(group: &NodeGroup) -> NodeGroupClusterConfig {
        group.spec.cluster.clone().unwrap()
    }

    #[tokio::test]
    async fn test_founding_group_without_exposure() {
        let m = mesh();
        let store = seeded_store(&m);
        let ctx = context(&store, &FakeCompute::default());
        let founding = bootstrap_groups(&m).remove(0);

        let outcome = reconcile(&ctx, &m, &founding, &cluster_of(&founding))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(store.applied_names("ConfigMap"), vec!["prod-bootstrap"]);
        assert_eq!(store.applied_names("StatefulSet"), vec!["prod-bootstrap"]);
        assert_eq!(store.applied_names("Service"), vec!["prod-bootstrap"]);

        let config = config_yaml(&store, "prod-bootstrap");
        for i in 0..3 {
            assert!(
                config.contains(&format!(
                    "prod-bootstrap-{i}=prod-bootstrap-{i}.prod-bootstrap.net.svc.cluster.local:9443"
                )),
                "{config}"
            );
        }
        assert!(config.contains("prod-bootstrap-lb-0"), "{config}");
    }

    #[tokio::test]
    async fn test_load_balancer_address_is_awaited() {
        let m = mesh();
        let store = seeded_store(&m);
        let ctx = context(&store, &FakeCompute::default());
        let group = edge(
            NodeGroupClusterConfig {
                service: Some(NodeGroupLBConfig {
                    service_type: "LoadBalancer".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            2,
        );

        let outcome = reconcile(&ctx, &m, &group, &cluster_of(&group))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::requeue(CLUSTER_LB_WAIT_REQUEUE_SECS, "load balancer pending")
        );
        assert_eq!(store.applied_names("Service"), vec!["prod-edge-public"]);
        assert!(store.applied_of_kind("StatefulSet").is_empty());

        store.set_ingress("net", "prod-edge-public", &["203.0.113.7"]);
        let outcome = reconcile(&ctx, &m, &group, &cluster_of(&group))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(store.applied_names("StatefulSet"), vec!["prod-edge"]);

        let config = config_yaml(&store, "prod-edge");
        assert!(config.contains("203.0.113.7:51820"), "{config}");
        assert!(config.contains("mesh.example.com:8443"), "{config}");
    }

    #[tokio::test]
    async fn test_pods_are_fronted_by_edge_proxy() {
        let m = mesh();
        let store = seeded_store(&m);
        let ctx = context(&store, &FakeCompute::default());
        let group = edge(
            NodeGroupClusterConfig {
                workload: WorkloadKind::Pods,
                service: Some(NodeGroupLBConfig {
                    external_url: Some("edge.example.com".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            2,
        );

        let outcome = reconcile(&ctx, &m, &group, &cluster_of(&group))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(store.applied_names("Deployment"), vec!["prod-edge-public"]);
        assert_eq!(
            store.applied_names("ConfigMap"),
            vec!["prod-edge-0", "prod-edge-1", "prod-edge-public"]
        );
        assert_eq!(store.applied_names("Pod"), vec!["prod-edge-0", "prod-edge-1"]);
        assert_eq!(
            store.applied_names("Service"),
            vec!["prod-edge", "prod-edge-public"]
        );
        assert!(store.applied_of_kind("StatefulSet").is_empty());

        let second = config_yaml(&store, "prod-edge-1");
        assert!(second.contains("edge.example.com:51821"), "{second}");
        assert!(second.contains("listenPort: 51821"), "{second}");
    }

    #[tokio::test]
    async fn test_changed_pod_is_deleted_and_requeued() {
        let m = mesh();
        let store = seeded_store(&m);
        let ctx = context(&store, &FakeCompute::default());
        let group = edge(
            NodeGroupClusterConfig {
                workload: WorkloadKind::Pods,
                ..Default::default()
            },
            2,
        );
        store.insert_pod(Pod {
            metadata: ObjectMeta {
                name: Some("prod-edge-0".into()),
                namespace: Some("net".into()),
                annotations: Some(BTreeMap::from([(
                    SPEC_CHECKSUM_ANNOTATION.to_string(),
                    "stale".to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        });

        let outcome = reconcile(&ctx, &m, &group, &cluster_of(&group))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::requeue(POD_REPLACE_REQUEUE_SECS, "pod replaced")
        );
        assert_eq!(store.deleted_pods(), vec!["prod-edge-0"]);
        assert_eq!(store.applied_names("Pod"), vec!["prod-edge-1"]);

        // The next pass recreates the deleted pod and leaves the other alone
        store.clear_applied();
        let outcome = reconcile(&ctx, &m, &group, &cluster_of(&group))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(store.applied_names("Pod"), vec!["prod-edge-0", "prod-edge-1"]);
        assert_eq!(store.deleted_pods().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_cluster_receives_certificates_without_owners() {
        let m = mesh();
        let store = seeded_store(&m);
        let remote = FakeStore::new();
        store.insert_secret(opaque_secret("net", "remote-kc", "config", "remote-data"));
        store.add_remote("remote-data", remote.clone());
        let ctx = context(&store, &FakeCompute::default());
        let group = edge(
            NodeGroupClusterConfig {
                kubeconfig: Some(SecretKeyRef {
                    name: "remote-kc".into(),
                    key: "config".into(),
                }),
                ..Default::default()
            },
            2,
        );

        let outcome = reconcile(&ctx, &m, &group, &cluster_of(&group))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::requeue(MESH_WAIT_REQUEUE_SECS, "node certificates pending")
        );
        assert!(remote.applied().is_empty());

        store.insert_secret(tls_secret("net", "prod-edge-0"));
        store.insert_secret(tls_secret("net", "prod-edge-1"));
        let outcome = reconcile(&ctx, &m, &group, &cluster_of(&group))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(
            remote.applied_names("Secret"),
            vec!["prod-edge-0", "prod-edge-1"]
        );
        assert_eq!(remote.applied_names("StatefulSet"), vec!["prod-edge"]);
        assert!(remote
            .applied()
            .iter()
            .all(|o| o.meta().owner_references.is_none()));
        assert!(store.applied_of_kind("StatefulSet").is_empty());
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_key_is_an_error() {
        let m = mesh();
        let store = seeded_store(&m);
        store.insert_secret(opaque_secret("net", "remote-kc", "other", "x"));
        let ctx = context(&store, &FakeCompute::default());
        let group = edge(
            NodeGroupClusterConfig {
                kubeconfig: Some(SecretKeyRef {
                    name: "remote-kc".into(),
                    key: "config".into(),
                }),
                ..Default::default()
            },
            1,
        );

        let err = reconcile(&ctx, &m, &group, &cluster_of(&group))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing key config"), "{err}");
    }

    #[tokio::test]
    async fn test_teardown_deletes_replica_claims() {
        let m = mesh();
        let store = seeded_store(&m);
        let ctx = context(&store, &FakeCompute::default());

        let group = edge(NodeGroupClusterConfig::default(), 2);
        teardown(&ctx, &m, &group, &cluster_of(&group)).await.unwrap();
        assert_eq!(
            store.deleted_pvcs(),
            vec!["data-prod-edge-0", "data-prod-edge-1"]
        );

        let store = seeded_store(&m);
        let ctx = context(&store, &FakeCompute::default());
        let group = edge(
            NodeGroupClusterConfig {
                workload: WorkloadKind::Pods,
                ..Default::default()
            },
            1,
        );
        teardown(&ctx, &m, &group, &cluster_of(&group)).await.unwrap();
        assert_eq!(store.deleted_pvcs(), vec!["prod-edge-0"]);
    }
}
