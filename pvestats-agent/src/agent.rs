//! One polling run
//!
//! enumerate → collect → publish → (optionally) discovery, strictly in that
//! order. The MQTT session is closed at the end of the run whether or not a
//! step failed; the first error is the one reported.

use crate::api::ProxmoxApi;
use crate::collector::{CollectedStats, Collector, StorageStats};
use crate::config::AgentConfig;
use crate::discovery::DiscoveryEmitter;
use crate::error::Result;
use crate::publisher::{publish_metrics, MetricBus};
use crate::remote::RemoteShell;
use crate::resources::enumerate;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::info;

/// What a run published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub resources: usize,
    pub metrics: usize,
    pub discovery_configs: Option<usize>,
    pub storage_found: bool,
}

pub struct Agent<'a> {
    config: &'a AgentConfig,
    api: &'a dyn ProxmoxApi,
    shell: &'a dyn RemoteShell,
    bus: &'a dyn MetricBus,
    discovery: DiscoveryEmitter,
}

impl<'a> Agent<'a> {
    pub fn new(
        config: &'a AgentConfig,
        api: &'a dyn ProxmoxApi,
        shell: &'a dyn RemoteShell,
        bus: &'a dyn MetricBus,
    ) -> Self {
        Self {
            config,
            api,
            shell,
            bus,
            discovery: DiscoveryEmitter::new(config.mqtt.discovery_prefix.clone()),
        }
    }

    pub fn with_discovery_pace(mut self, pace: Duration) -> Self {
        self.discovery = self.discovery.with_pace(pace);
        self
    }

    /// Runs the pipeline once and closes the MQTT session
    pub async fn run(&self, publish_discovery: bool, now: DateTime<Utc>) -> Result<RunSummary> {
        let outcome = self.cycle(publish_discovery, now).await;
        let closed = self.bus.disconnect().await;
        let summary = outcome?;
        closed?;
        Ok(summary)
    }

    /// Enumerates the node and derives every metric set
    pub async fn collect(&self, now: DateTime<Utc>) -> Result<CollectedStats> {
        let proxmox = &self.config.proxmox;
        let inventory = enumerate(self.api, &proxmox.node, &proxmox.storage).await?;
        info!(
            "Found {} guests on node {}",
            inventory.guests.len(),
            proxmox.node
        );

        Collector::new(&self.config.mqtt.topic_prefix, &self.config.ssh, self.shell, now)
            .collect_all(&inventory)
            .await
    }

    async fn cycle(&self, publish_discovery: bool, now: DateTime<Utc>) -> Result<RunSummary> {
        let stats = self.collect(now).await?;

        let metrics = publish_metrics(self.bus, stats.metric_sets()).await?;
        info!("Published {} metrics", metrics);

        let discovery_configs = if publish_discovery {
            Some(self.discovery.emit(self.bus, stats.metric_sets()).await?)
        } else {
            None
        };

        Ok(RunSummary {
            resources: stats.metric_sets().count(),
            metrics,
            discovery_configs,
            storage_found: matches!(stats.storage, StorageStats::Found(_)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SshTarget, SshTargets};
    use crate::error::AgentError;
    use crate::remote::SshCommand;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pvestats_devkit::{FixtureApi, MockMqttClient, ProxmoxFixtures};
    use serde_json::Value;

    struct DfShell;

    #[async_trait]
    impl RemoteShell for DfShell {
        async fn run(&self, _target: &SshTarget, _command: &str) -> Result<String> {
            Ok("Filesystem Size Used Avail Use% Mounted on\n/dev/vda1 32G 16G 16G 50% /\n".into())
        }
    }

    struct UnreachableShell;

    #[async_trait]
    impl RemoteShell for UnreachableShell {
        async fn run(&self, target: &SshTarget, _command: &str) -> Result<String> {
            Err(AgentError::RemoteShell {
                target: target.to_string(),
                message: "connection refused".into(),
            })
        }
    }

    fn config(ssh: SshTargets) -> AgentConfig {
        let vars = [
            ("PROXMOX_HOST", "pve.lan"),
            ("PROXMOX_NODE", "pve"),
            ("API_USER", "monitor"),
            ("API_REALM", "pve"),
            ("API_TOKEN_ID", "stats"),
            ("API_TOKEN_SECRET", "secret"),
            ("MQTT_BROKER", "mqtt.lan"),
            ("MQTT_PORT", "1883"),
            ("MQTT_USERNAME", "ha"),
            ("MQTT_PASSWORD", "pw"),
            ("MQTT_TOPIC_PREFIX", "homelab"),
            ("MQTT_DISCOVERY_TOPIC", "homeassistant/sensor"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()));
        let mut config = AgentConfig::from_vars(vars).unwrap();
        config.ssh = ssh;
        config
    }

    fn api() -> FixtureApi {
        FixtureApi::for_node("pve")
            .with_host_status(ProxmoxFixtures::node_status(
                16_000_000_000,
                8_000_000_000,
                100_000_000_000,
                50_000_000_000,
                8,
                3600,
            ))
            .with_guest(
                "qemu",
                ProxmoxFixtures::guest_summary(100, Some("haos"), 2),
                ProxmoxFixtures::guest_status(Some("haos"), 2_147_483_648, 4_294_967_296, 0, 34_359_738_368, 2, 120),
            )
            .with_guest(
                "lxc",
                ProxmoxFixtures::guest_summary(101, Some("pihole"), 1),
                ProxmoxFixtures::guest_status(Some("pihole"), 268_435_456, 536_870_912, 1_073_741_824, 4_294_967_296, 1, 120),
            )
            .with_storage(ProxmoxFixtures::storage_entry(
                "nas-public",
                6_000_000_000_000,
                3_000_000_000_000,
                0.5,
            ))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn vm_target() -> SshTargets {
        let mut ssh = SshTargets::default();
        ssh.insert(
            "100",
            SshTarget {
                host: "haos.lan".into(),
                username: "root".into(),
                key_path: "/root/.ssh/id_ed25519".into(),
            },
        );
        ssh
    }

    #[tokio::test]
    async fn test_run_publishes_every_resource() {
        let config = config(vm_target());
        let api = api();
        let bus = MockMqttClient::new();
        let agent = Agent::new(&config, &api, &DfShell, &bus);

        let summary = agent.run(false, now()).await.unwrap();

        // host 6 + vm 7 + lxc 7 + nas 3
        assert_eq!(
            summary,
            RunSummary {
                resources: 4,
                metrics: 23,
                discovery_configs: None,
                storage_found: true,
            }
        );
        assert!(bus.is_disconnected());

        assert_eq!(
            bus.last_payload("homelab/proxmox_host/proxmox_host_unallocated_cpus").as_deref(),
            Some("5")
        );
        assert_eq!(
            bus.last_payload("homelab/proxmox_qemu/100/proxmox_qemu_100_disk_used_percent").as_deref(),
            Some("50.0")
        );
        assert_eq!(
            bus.last_payload("homelab/proxmox_lxc/101/proxmox_lxc_101_disk_used_percent").as_deref(),
            Some("25.0")
        );
        assert_eq!(
            bus.last_payload("homelab/proxmox_nas/proxmox_nas_disk_size_tb").as_deref(),
            Some("6.0")
        );

        let messages = bus.get_published_messages();
        assert!(messages.iter().all(|m| m.retain));
        assert_eq!(messages[0].topic, "homelab/proxmox_host/proxmox_host_disk_size_gb");
        assert_eq!(
            messages.last().unwrap().topic,
            "homelab/proxmox_nas/proxmox_nas_disk_used_percent"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_discovery() {
        let config = config(SshTargets::default());
        let api = api();
        let bus = MockMqttClient::new();
        let agent = Agent::new(&config, &api, &SshCommand, &bus);

        let summary = agent.run(true, now()).await.unwrap();

        // vm without SSH target has no disk usage metric
        assert_eq!(summary.metrics, 22);
        assert_eq!(summary.discovery_configs, Some(22));
        assert_eq!(bus.get_published_messages().len(), 44);

        let vm: Value = bus
            .get_last_json_message("homeassistant/sensor/proxmox_qemu_100_cpus/config")
            .unwrap()
            .unwrap();
        assert_eq!(vm["device"]["name"], "Haos VM");
        assert_eq!(vm["device"]["model"], "VM");
        assert_eq!(vm["device"]["identifiers"][0], "proxmox_qemu_100");
        assert_eq!(vm["state_topic"], "homelab/proxmox_qemu/100/proxmox_qemu_100_cpus");
    }

    #[tokio::test]
    async fn test_missing_storage_still_publishes() {
        let mut config = config(SshTargets::default());
        config.proxmox.storage = "backup".into();
        let api = api();
        let bus = MockMqttClient::new();
        let agent = Agent::new(&config, &api, &DfShell, &bus);

        let summary = agent.run(false, now()).await.unwrap();
        assert!(!summary.storage_found);
        assert_eq!(summary.resources, 3);
        assert!(bus
            .get_published_messages()
            .iter()
            .all(|m| !m.topic.contains("proxmox_nas")));
    }

    #[tokio::test]
    async fn test_api_failure_publishes_nothing() {
        let config = config(SshTargets::default());
        let api = api().without("/nodes/pve/lxc");
        let bus = MockMqttClient::new();
        let agent = Agent::new(&config, &api, &DfShell, &bus);

        let err = agent.run(false, now()).await.unwrap_err();
        assert!(matches!(err, AgentError::Api { .. }));
        assert!(bus.get_published_messages().is_empty());
        assert!(bus.is_disconnected());
    }

    #[tokio::test]
    async fn test_ssh_failure_is_fatal() {
        let config = config(vm_target());
        let api = api();
        let bus = MockMqttClient::new();
        let agent = Agent::new(&config, &api, &UnreachableShell, &bus);

        let err = agent.run(false, now()).await.unwrap_err();
        match err {
            AgentError::RemoteShell { target, .. } => assert_eq!(target, "root@haos.lan"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(bus.get_published_messages().is_empty());
        assert!(bus.is_disconnected());
    }

    #[tokio::test]
    async fn test_broker_failure_is_fatal() {
        let config = config(SshTargets::default());
        let api = api();
        let bus = MockMqttClient::new();
        bus.fail_publishes();
        let agent = Agent::new(&config, &api, &DfShell, &bus)
            .with_discovery_pace(Duration::ZERO);

        let err = agent.run(true, now()).await.unwrap_err();
        assert!(matches!(err, AgentError::Mqtt(_)));
    }
}
