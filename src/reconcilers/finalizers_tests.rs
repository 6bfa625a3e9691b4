// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `finalizers.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{NodeGroup, NodeGroupSpec};
    use crate::reconcilers::finalizers::{ensure_finalizer, has_finalizer, remove_finalizer};
    use crate::testing::FakeStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const TEST_FINALIZER: &str = "nodegroups.mesh.webmesh.io";
    const OTHER_FINALIZER: &str = "example.com/other";

    fn create_test_group(finalizers: Option<Vec<&str>>) -> NodeGroup {
        let mut group = NodeGroup::new("edge", NodeGroupSpec::default());
        group.metadata = ObjectMeta {
            name: Some("edge".to_string()),
            namespace: Some("net".to_string()),
            finalizers: finalizers.map(|f| f.into_iter().map(str::to_string).collect()),
            ..Default::default()
        };
        group
    }

    #[test]
    fn test_has_finalizer() {
        assert!(!has_finalizer(&create_test_group(None).metadata, TEST_FINALIZER));
        assert!(!has_finalizer(
            &create_test_group(Some(vec![OTHER_FINALIZER])).metadata,
            TEST_FINALIZER
        ));
        assert!(has_finalizer(
            &create_test_group(Some(vec![OTHER_FINALIZER, TEST_FINALIZER])).metadata,
            TEST_FINALIZER
        ));
    }

    #[tokio::test]
    async fn test_ensure_finalizer_adds_once() {
        let store = FakeStore::new();

        let added = ensure_finalizer(
            store.as_ref(),
            &create_test_group(Some(vec![OTHER_FINALIZER])),
            TEST_FINALIZER,
        )
        .await
        .unwrap();
        assert!(added);
        assert_eq!(
            store.finalizer_patches(),
            vec![vec![OTHER_FINALIZER.to_string(), TEST_FINALIZER.to_string()]]
        );

        let stored = store.node_group("net", "edge").unwrap();
        let added = ensure_finalizer(store.as_ref(), &stored, TEST_FINALIZER)
            .await
            .unwrap();
        assert!(!added);
        assert_eq!(store.finalizer_patches().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_finalizer_keeps_others() {
        let store = FakeStore::new();
        let group = create_test_group(Some(vec![TEST_FINALIZER, OTHER_FINALIZER]));

        remove_finalizer(store.as_ref(), &group, TEST_FINALIZER)
            .await
            .unwrap();

        assert_eq!(
            store.finalizer_patches(),
            vec![vec![OTHER_FINALIZER.to_string()]]
        );
    }

    #[tokio::test]
    async fn test_remove_absent_finalizer_does_not_patch() {
        let store = FakeStore::new();

        remove_finalizer(store.as_ref(), &create_test_group(None), TEST_FINALIZER)
            .await
            .unwrap();

        assert!(store.finalizer_patches().is_empty());
    }
}
