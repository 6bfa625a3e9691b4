// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Client configuration bundles for mesh administrators.
//!
//! A bundle holds one cluster entry, one user entry, one context joining them
//! and a current-context pointer. Certificate material is embedded base64
//! encoded, so the bundle is self-contained.

use crate::constants::{TLS_CA_KEY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY};
use crate::errors::WebmeshError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use k8s_openapi::api::core::v1::Secret;
use serde::{Deserialize, Serialize};

/// Certificate, key and CA read back from a cert-manager secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateBundle {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
    pub ca: Vec<u8>,
}

impl CertificateBundle {
    /// Extract the bundle from a certificate secret.
    ///
    /// Returns `None` until all three keys hold non-empty data, which is the
    /// case while cert-manager is still issuing.
    #[must_use]
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let data = secret.data.as_ref()?;
        let get = |key: &str| {
            data.get(key)
                .map(|bytes| bytes.0.clone())
                .filter(|bytes| !bytes.is_empty())
        };
        Some(Self {
            cert: get(TLS_CERT_KEY)?,
            key: get(TLS_PRIVATE_KEY_KEY)?,
            ca: get(TLS_CA_KEY)?,
        })
    }

    /// The bundle as UTF-8 text, as written to disk on cloud replicas.
    #[must_use]
    pub fn as_text(&self) -> (String, String, String) {
        (
            String::from_utf8_lossy(&self.cert).into_owned(),
            String::from_utf8_lossy(&self.key).into_owned(),
            String::from_utf8_lossy(&self.ca).into_owned(),
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub users: Vec<NamedUser>,
    pub contexts: Vec<NamedContext>,
    pub current_context: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub server: String,
    pub tls_verify_chain_only: bool,
    pub certificate_authority_data: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: UserEntry,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    pub client_certificate_data: String,
    pub client_key_data: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    pub user: String,
}

/// Build a single-context client configuration.
///
/// # Arguments
///
/// * `cluster` - Name of the cluster entry and of the context
/// * `user` - Name of the user entry
/// * `server` - `host:port` of the mesh gRPC API
/// * `bundle` - Client certificate material
#[must_use]
pub fn client_config(
    cluster: &str,
    user: &str,
    server: &str,
    bundle: &CertificateBundle,
) -> ClientConfig {
    ClientConfig {
        api_version: "webmesh.io/v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![NamedCluster {
            name: cluster.to_string(),
            cluster: ClusterEntry {
                server: server.to_string(),
                tls_verify_chain_only: true,
                certificate_authority_data: BASE64.encode(&bundle.ca),
            },
        }],
        users: vec![NamedUser {
            name: user.to_string(),
            user: UserEntry {
                client_certificate_data: BASE64.encode(&bundle.cert),
                client_key_data: BASE64.encode(&bundle.key),
            },
        }],
        contexts: vec![NamedContext {
            name: cluster.to_string(),
            context: ContextEntry {
                cluster: cluster.to_string(),
                user: user.to_string(),
            },
        }],
        current_context: cluster.to_string(),
    }
}

/// Serialize a client configuration.
///
/// # Errors
///
/// Returns [`WebmeshError::ConfigMarshal`] if serialization fails.
pub fn render(config: &ClientConfig) -> Result<String, WebmeshError> {
    serde_yaml::to_string(config).map_err(|e| WebmeshError::ConfigMarshal {
        document: "client config".to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[path = "admin_config_tests.rs"]
mod admin_config_tests;
