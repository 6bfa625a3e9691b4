// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `mesh.rs`

#[cfg(test)]
mod tests {
    use crate::admin_config::ClientConfig;
    use crate::constants::{CLIENT_CONFIG_KEY, MESH_WAIT_REQUEUE_SECS};
    use crate::crd::{
        IssuerConfig, IssuerKind, Mesh, MeshSpec, NodeGroupClusterConfig, NodeGroupLBConfig,
        NodeGroupSpec,
    };
    use crate::reconcilers::{reconcile_mesh, Outcome};
    use crate::testing::{context, tls_secret, FakeCompute, FakeStore};
    use k8s_openapi::api::core::v1::{Service, ServiceSpec};
    use kube::api::ObjectMeta;

    fn mesh(service: Option<NodeGroupLBConfig>, issuer: IssuerConfig) -> Mesh {
        let mut mesh = Mesh::new(
            "prod",
            MeshSpec {
                issuer,
                bootstrap: NodeGroupSpec {
                    replicas: 3,
                    cluster: Some(NodeGroupClusterConfig {
                        service,
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

    fn created_issuer() -> IssuerConfig {
        IssuerConfig {
            create: true,
            ..Default::default()
        }
    }

    fn client_config(store: &FakeStore, name: &str) -> Option<ClientConfig> {
        let secret = store.secret("net", name)?;
        let raw = secret.data?.get(CLIENT_CONFIG_KEY)?.0.clone();
        Some(serde_yaml::from_slice(&raw).unwrap())
    }

    #[tokio::test]
    async fn test_issuer_chain_and_bootstrap_group() {
        let store = FakeStore::new();
        let ctx = context(&store, &FakeCompute::default());

        let outcome = reconcile_mesh(&ctx, &mesh(None, created_issuer()))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::requeue(MESH_WAIT_REQUEUE_SECS, "admin certificate pending")
        );
        assert_eq!(
            store.applied_names("Issuer"),
            vec!["prod-ca", "prod-self-signer"]
        );
        assert_eq!(
            store.applied_names("Certificate"),
            vec!["prod-admin", "prod-ca"]
        );
        assert_eq!(store.applied_names("NodeGroup"), vec!["prod-bootstrap"]);
        assert!(client_config(&store, "prod-manager-config").is_none());
    }

    #[tokio::test]
    async fn test_existing_issuer_is_not_created() {
        let store = FakeStore::new();
        let ctx = context(&store, &FakeCompute::default());

        reconcile_mesh(&ctx, &mesh(None, IssuerConfig::default()))
            .await
            .unwrap();

        assert!(store.applied_of_kind("Issuer").is_empty());
        assert_eq!(store.applied_names("Certificate"), vec!["prod-admin"]);
    }

    #[tokio::test]
    async fn test_cluster_issuer_kind() {
        let store = FakeStore::new();
        let ctx = context(&store, &FakeCompute::default());
        let issuer = IssuerConfig {
            create: true,
            kind: IssuerKind::ClusterIssuer,
            ..Default::default()
        };

        reconcile_mesh(&ctx, &mesh(None, issuer)).await.unwrap();

        assert_eq!(store.applied_names("ClusterIssuer"), vec!["prod-ca"]);
        assert_eq!(store.applied_names("Issuer"), vec!["prod-self-signer"]);
    }

    #[tokio::test]
    async fn test_internal_mesh_gets_manager_config_only() {
        let store = FakeStore::new();
        store.insert_secret(tls_secret("net", "prod-admin"));
        let ctx = context(&store, &FakeCompute::default());

        let outcome = reconcile_mesh(&ctx, &mesh(None, created_issuer()))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Ready);
        let manager = client_config(&store, "prod-manager-config").unwrap();
        assert_eq!(
            manager.clusters[0].cluster.server,
            "prod-bootstrap.net.svc.cluster.local:8443"
        );
        assert_eq!(manager.users[0].name, "prod");
        assert_eq!(manager.current_context, "prod");
        assert!(client_config(&store, "prod-admin-config").is_none());
    }

    #[tokio::test]
    async fn test_admin_config_waits_for_load_balancer() {
        let store = FakeStore::new();
        store.insert_secret(tls_secret("net", "prod-admin"));
        let ctx = context(&store, &FakeCompute::default());
        let m = mesh(
            Some(NodeGroupLBConfig {
                service_type: "LoadBalancer".into(),
                grpc_port: 443,
                ..Default::default()
            }),
            created_issuer(),
        );

        let outcome = reconcile_mesh(&ctx, &m).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::requeue(MESH_WAIT_REQUEUE_SECS, "load balancer pending")
        );
        assert_eq!(
            store.applied_names("NodeGroup"),
            vec!["prod-bootstrap", "prod-bootstrap-lb"]
        );
        assert!(client_config(&store, "prod-admin-config").is_none());

        // The node group reconciler creates the service; the platform assigns an address later
        store.insert_service(Service {
            metadata: ObjectMeta {
                name: Some("prod-bootstrap-lb-public".into()),
                namespace: Some("net".into()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".into()),
                ..Default::default()
            }),
            status: None,
        });
        let outcome = reconcile_mesh(&ctx, &m).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::requeue(MESH_WAIT_REQUEUE_SECS, "load balancer pending")
        );

        store.set_ingress("net", "prod-bootstrap-lb-public", &["203.0.113.7"]);
        let outcome = reconcile_mesh(&ctx, &m).await.unwrap();
        assert_eq!(outcome, Outcome::Ready);

        let admin = client_config(&store, "prod-admin-config").unwrap();
        assert_eq!(admin.clusters[0].name, "prod");
        assert_eq!(admin.clusters[0].cluster.server, "203.0.113.7:443");
        assert_eq!(admin.users[0].name, "prod-admin");
        assert_eq!(admin.contexts[0].context.user, "prod-admin");
        assert_eq!(admin.current_context, "prod");
    }

    #[tokio::test]
    async fn test_static_external_url_skips_service_lookup() {
        let store = FakeStore::new();
        store.insert_secret(tls_secret("net", "prod-admin"));
        let ctx = context(&store, &FakeCompute::default());
        let m = mesh(
            Some(NodeGroupLBConfig {
                external_url: Some("mesh.example.com".into()),
                ..Default::default()
            }),
            created_issuer(),
        );

        let outcome = reconcile_mesh(&ctx, &m).await.unwrap();

        assert_eq!(outcome, Outcome::Ready);
        let admin = client_config(&store, "prod-admin-config").unwrap();
        assert_eq!(admin.clusters[0].cluster.server, "mesh.example.com:8443");
    }
}
