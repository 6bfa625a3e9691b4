// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `admin_config.rs`

#[cfg(test)]
mod tests {
    use crate::admin_config::{client_config, render, CertificateBundle, ClientConfig};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn secret(entries: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("prod-admin".into()),
                namespace: Some("net".into()),
                ..Default::default()
            },
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_bundle_requires_all_three_keys() {
        let complete = secret(&[("tls.crt", "C"), ("tls.key", "K"), ("ca.crt", "A")]);
        let bundle = CertificateBundle::from_secret(&complete).unwrap();
        assert_eq!(bundle.cert, b"C");
        assert_eq!(bundle.ca, b"A");

        let empty_ca = secret(&[("tls.crt", "C"), ("tls.key", "K"), ("ca.crt", "")]);
        assert!(CertificateBundle::from_secret(&empty_ca).is_none());

        // cert-manager writes tls.crt first while issuing
        let partial = secret(&[("tls.crt", "C")]);
        assert!(CertificateBundle::from_secret(&partial).is_none());

        let no_data = Secret::default();
        assert!(CertificateBundle::from_secret(&no_data).is_none());
    }

    #[test]
    fn test_client_config_triad() {
        let bundle = CertificateBundle {
            cert: b"cert".to_vec(),
            key: b"key".to_vec(),
            ca: b"ca".to_vec(),
        };
        let config = client_config("prod", "prod-admin", "1.2.3.4:8443", &bundle);
        assert_eq!(config.clusters[0].cluster.server, "1.2.3.4:8443");
        assert_eq!(config.clusters[0].cluster.certificate_authority_data, "Y2E=");
        assert_eq!(config.users[0].user.client_certificate_data, "Y2VydA==");
        assert_eq!(config.users[0].user.client_key_data, "a2V5");
        assert_eq!(config.contexts[0].context.user, "prod-admin");
        assert_eq!(config.current_context, "prod");

        let raw = render(&config).unwrap();
        assert!(raw.contains("current-context: prod"));
        let parsed: ClientConfig = serde_yaml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }
}
