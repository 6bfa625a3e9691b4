// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloud-init user data for cloud compute replicas.
//!
//! A cloud replica is a plain Ubuntu VM: cloud-init installs a container
//! runtime, writes the node configuration and TLS material, and starts the
//! node image under a systemd unit with host networking.

use crate::checksum::sha256_hex;
use crate::constants::{
    DEFAULT_TLS_DIRECTORY, NODE_CAPABILITIES, NODE_CONFIG_PATH, TLS_CA_KEY, TLS_CERT_KEY,
    TLS_PRIVATE_KEY_KEY,
};
use crate::errors::WebmeshError;
use crate::node_config::RenderedNodeConfig;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

const CLOUD_CONFIG_HEADER: &str = "#cloud-config\n\n";

const DOCKER_DAEMON_CONFIG_PATH: &str = "/etc/docker/daemon.json";

// Keeps the docker bridge out of the mesh and VPC ranges
const DOCKER_DAEMON_CONFIG: &str = r#"{"bip": "192.168.254.1/24"}"#;

const FIREWALL_UNIT_PATH: &str = "/etc/systemd/system/config-firewall.service";

const FIREWALL_UNIT: &str = "[Unit]
Description=Configures the host firewall

[Service]
Type=oneshot
RemainAfterExit=true
ExecStart=/sbin/iptables -A INPUT -j ACCEPT
";

const NODE_UNIT_PATH: &str = "/etc/systemd/system/node.service";

/// Host directory the node's raft data is bind-mounted from.
const HOST_DATA_DIRECTORY: &str = "/var/lib/webmesh/data";

const PACKAGES: [&str; 9] = [
    "apt-transport-https",
    "ca-certificates",
    "curl",
    "gnupg",
    "lsb-release",
    "unattended-upgrades",
    "wireguard-tools",
    "net-tools",
    "docker.io",
];

const RUN_COMMANDS: [&str; 8] = [
    "sysctl -w net.ipv4.conf.all.forwarding=1",
    "sysctl -w net.ipv6.conf.all.forwarding=1",
    "mkdir -p /var/lib/webmesh/data",
    "systemctl daemon-reload",
    "systemctl enable docker",
    "systemctl start docker",
    "systemctl start config-firewall",
    "systemctl start node",
];

/// Inputs of the cloud-config renderer.
#[derive(Clone, Copy, Debug)]
pub struct CloudConfigOptions<'a> {
    pub image: &'a str,
    pub node_config: &'a RenderedNodeConfig,
    pub tls_cert: &'a str,
    pub tls_key: &'a str,
    pub ca: &'a str,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    pub write_files: Vec<WriteFile>,
    pub packages: Vec<String>,
    pub runcmd: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFile {
    pub path: String,
    pub permissions: String,
    pub owner: String,
    pub content: String,
}

impl WriteFile {
    fn new(path: impl Into<String>, permissions: &str, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            permissions: permissions.to_string(),
            owner: "root".to_string(),
            content: content.into(),
        }
    }
}

/// Rendered user data and its checksum.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedCloudConfig {
    raw: String,
    checksum: String,
}

impl RenderedCloudConfig {
    /// The `user-data` metadata value, including the `#cloud-config` header.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

fn node_unit(image: &str, data_dir: &str) -> String {
    let mut unit = String::from(
        "[Unit]
Description=node
After=docker.service config-firewall.service
Wants=docker.service config-firewall.service

[Service]
ExecStartPre=-/usr/sbin/nft flush ruleset
ExecStart=/usr/bin/docker run --rm \\
  --pull always \\
  --name node \\
  --network host \\
  --privileged \\
",
    );
    for cap in NODE_CAPABILITIES {
        let _ = writeln!(unit, "  --cap-add {cap} \\");
    }
    unit.push_str(
        "  -v /lib/modules:/lib/modules \\
  -v /dev/net/tun:/dev/net/tun \\
  -v /etc/webmesh:/etc/webmesh \\
",
    );
    if !data_dir.is_empty() {
        let _ = writeln!(unit, "  -v {HOST_DATA_DIRECTORY}:{data_dir} \\");
    }
    let _ = write!(
        unit,
        "  {image} --config {NODE_CONFIG_PATH}
ExecStop=/usr/bin/docker kill node
Restart=always

[Install]
WantedBy=multi-user.target
"
    );
    unit
}

/// Render cloud-init user data for one replica.
///
/// # Errors
///
/// Returns [`WebmeshError::ConfigMarshal`] if serialization fails.
pub fn render(opts: &CloudConfigOptions<'_>) -> Result<RenderedCloudConfig, WebmeshError> {
    let config = CloudConfig {
        write_files: vec![
            WriteFile::new(DOCKER_DAEMON_CONFIG_PATH, "0644", DOCKER_DAEMON_CONFIG),
            WriteFile::new(FIREWALL_UNIT_PATH, "0644", FIREWALL_UNIT),
            WriteFile::new(
                NODE_UNIT_PATH,
                "0644",
                node_unit(opts.image, &opts.node_config.config.raft.data_dir),
            ),
            WriteFile::new(NODE_CONFIG_PATH, "0644", opts.node_config.raw()),
            WriteFile::new(
                format!("{DEFAULT_TLS_DIRECTORY}/{TLS_CERT_KEY}"),
                "0644",
                opts.tls_cert,
            ),
            WriteFile::new(
                format!("{DEFAULT_TLS_DIRECTORY}/{TLS_PRIVATE_KEY_KEY}"),
                "0600",
                opts.tls_key,
            ),
            WriteFile::new(
                format!("{DEFAULT_TLS_DIRECTORY}/{TLS_CA_KEY}"),
                "0644",
                opts.ca,
            ),
        ],
        packages: PACKAGES.iter().map(ToString::to_string).collect(),
        runcmd: RUN_COMMANDS.iter().map(ToString::to_string).collect(),
    };

    let body = serde_yaml::to_string(&config).map_err(|e| WebmeshError::ConfigMarshal {
        document: "cloud config".to_string(),
        reason: e.to_string(),
    })?;
    let raw = format!("{CLOUD_CONFIG_HEADER}{body}");
    let checksum = sha256_hex(&raw);
    Ok(RenderedCloudConfig { raw, checksum })
}

#[cfg(test)]
#[path = "cloud_config_tests.rs"]
mod cloud_config_tests;
