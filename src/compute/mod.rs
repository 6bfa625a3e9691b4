// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloud compute seam.
//!
//! The node group reconciler manages cloud replicas through [`ComputeClient`].
//! Mutating calls return an [`Operation`] the caller must wait on before the
//! next step. [`gce::GceProvider`] is the Compute Engine implementation.
//!
//! The resource types mirror the fields of the Compute Engine v1 REST schema
//! the operator reads or writes; everything else is ignored on decode.

pub mod gce;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A boot image.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub name: String,
    pub self_link: String,
}

/// A regional subnetwork.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnetwork {
    pub name: String,
    pub self_link: String,
    #[serde(default)]
    pub network: String,
}

/// A virtual machine instance, as inserted and as read back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub machine_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub can_ip_forward: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<AttachedDisk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    pub boot: bool,
    pub auto_delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<DiskInitializeParams>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInitializeParams {
    pub source_image: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    pub subnetwork: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stack_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_configs: Vec<AccessConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ipv6_access_configs: Vec<AccessConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_tier: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    #[serde(default)]
    pub items: Vec<String>,
}

/// A long-running cloud operation.
#[async_trait]
pub trait Operation: Send {
    /// Block until the operation is done.
    ///
    /// # Errors
    ///
    /// Returns an error if polling fails or the operation finished with an error.
    async fn wait(self: Box<Self>) -> Result<()>;
}

/// Calls the node group reconciler makes against a cloud compute API.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Latest image of `family` published in `project`.
    async fn get_image(&self, project: &str, family: &str) -> Result<Image>;

    async fn get_subnetwork(&self, project: &str, region: &str, name: &str) -> Result<Subnetwork>;

    /// `None` when the instance does not exist.
    async fn get_instance(&self, project: &str, zone: &str, name: &str) -> Result<Option<Instance>>;

    async fn insert_instance(
        &self,
        project: &str,
        zone: &str,
        instance: &Instance,
    ) -> Result<Box<dyn Operation>>;

    async fn delete_instance(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<Box<dyn Operation>>;
}

/// Builds [`ComputeClient`]s for a set of credentials.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Client authenticated with `credentials` (a JSON key file), or with
    /// ambient credentials when `None`.
    async fn client(&self, credentials: Option<&str>) -> Result<Arc<dyn ComputeClient>>;
}
