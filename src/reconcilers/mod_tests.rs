// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `reconcilers/mod.rs`

#[cfg(test)]
mod tests {
    use crate::reconcilers::{apply_all, Outcome};
    use crate::store::ChildObject;
    use crate::testing::FakeStore;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use kube::runtime::controller::Action;
    use std::time::Duration;

    #[test]
    fn test_outcome_actions() {
        let ready = Duration::from_secs(300);
        assert_eq!(Outcome::Ready.action(ready), Action::requeue(ready));
        assert_eq!(
            Outcome::requeue(3, "pending").action(ready),
            Action::requeue(Duration::from_secs(3))
        );
        assert_eq!(Outcome::Deleted.action(ready), Action::await_change());
    }

    #[tokio::test]
    async fn test_apply_all_keeps_order() {
        let store = FakeStore::new();
        let objects: Vec<ChildObject> = ["b", "a", "c"]
            .into_iter()
            .map(|name| {
                ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(name.into()),
                        namespace: Some("net".into()),
                        ..Default::default()
                    },
                    ..Default::default()
                }
                .into()
            })
            .collect();

        apply_all(store.as_ref(), &objects, "test").await.unwrap();

        let names: Vec<String> = store
            .applied()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }
}
