//! Configuration from the environment
//!
//! Handles:
//! - Proxmox API location and token
//! - MQTT broker settings and topic prefixes
//! - Monitored node and storage volume
//! - Per-VM SSH targets for in-guest disk usage
//!
//! Values come from process environment variables, optionally seeded from a
//! `.env` file by the binary. A missing required value is fatal.

use crate::error::{AgentError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_API_PORT: u16 = 8006;
pub const DEFAULT_STORAGE: &str = "nas-public";
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub proxmox: ProxmoxConfig,
    pub mqtt: MqttConfig,
    pub ssh: SshTargets,
}

#[derive(Debug, Clone)]
pub struct ProxmoxConfig {
    pub host: String,
    pub port: u16,
    pub node: String,
    pub storage: String,
    pub token: ApiToken,
}

/// API token parts, rendered as `PVEAPIToken=user@realm!id=secret`
#[derive(Debug, Clone)]
pub struct ApiToken {
    pub user: String,
    pub realm: String,
    pub token_id: String,
    pub secret: Secret,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: String,
    pub password: Secret,
    pub topic_prefix: String,
    pub discovery_prefix: String,
    pub keep_alive_secs: u64,
}

/// Where to run `df` for one VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub username: String,
    pub key_path: PathBuf,
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.host)
    }
}

/// SSH targets keyed by qemu vmid
#[derive(Debug, Clone, Default)]
pub struct SshTargets(BTreeMap<String, SshTarget>);

impl SshTargets {
    pub fn get(&self, vmid: &str) -> Option<&SshTarget> {
        self.0.get(vmid)
    }

    pub fn insert(&mut self, vmid: impl Into<String>, target: SshTarget) {
        self.0.insert(vmid.into(), target);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// String that never shows up in logs or `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl ApiToken {
    pub fn header_value(&self) -> String {
        format!(
            "PVEAPIToken={}@{}!{}={}",
            self.user,
            self.realm,
            self.token_id,
            self.secret.expose()
        )
    }
}

impl ProxmoxConfig {
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.host, self.port)
    }
}

const SSH_HOST_PREFIX: &str = "SSH_HOST_QEMU_";

impl AgentConfig {
    /// Load config from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load config from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let env = Env(&vars);

        let proxmox = ProxmoxConfig {
            host: env.required("PROXMOX_HOST")?,
            port: env.parsed_or("PROXMOX_PORT", DEFAULT_API_PORT)?,
            node: env.required("PROXMOX_NODE")?,
            storage: env
                .optional("PROXMOX_STORAGE")
                .unwrap_or_else(|| DEFAULT_STORAGE.to_string()),
            token: ApiToken {
                user: env.required("API_USER")?,
                realm: env.required("API_REALM")?,
                token_id: env.required("API_TOKEN_ID")?,
                secret: Secret::new(env.required("API_TOKEN_SECRET")?),
            },
        };

        let mqtt = MqttConfig {
            broker_host: env.required("MQTT_BROKER")?,
            broker_port: env.parsed("MQTT_PORT")?,
            username: env.required("MQTT_USERNAME")?,
            password: Secret::new(env.required("MQTT_PASSWORD")?),
            topic_prefix: env.required("MQTT_TOPIC_PREFIX")?,
            discovery_prefix: env.required("MQTT_DISCOVERY_TOPIC")?,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        };

        let ssh = env.ssh_targets();

        Ok(AgentConfig { proxmox, mqtt, ssh })
    }
}

struct Env<'a>(&'a HashMap<String, String>);

impl Env<'_> {
    fn optional(&self, name: &str) -> Option<String> {
        self.0
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| AgentError::Config(format!("missing environment variable {name}")))
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str) -> Result<T> {
        let raw = self.required(name)?;
        raw.parse()
            .map_err(|_| AgentError::Config(format!("invalid value for {name}: {raw:?}")))
    }

    fn parsed_or<T: std::str::FromStr>(&self, name: &str, default: T) -> Result<T> {
        match self.optional(name) {
            Some(_) => self.parsed(name),
            None => Ok(default),
        }
    }

    /// `SSH_HOST_QEMU_<vmid>` + `SSH_USERNAME_QEMU_<vmid>` + a key path
    /// (`SSH_KEY_PATH_QEMU_<vmid>`, else `SSH_KEY_PATH`). Incomplete triples
    /// are ignored and the VM's disk usage is simply not reported.
    fn ssh_targets(&self) -> SshTargets {
        let default_key = self.optional("SSH_KEY_PATH");
        let mut targets = SshTargets::default();

        for (name, host) in self.0 {
            let Some(vmid) = name.strip_prefix(SSH_HOST_PREFIX) else {
                continue;
            };
            let host = host.trim();
            let username = self.optional(&format!("SSH_USERNAME_QEMU_{vmid}"));
            let key_path = self
                .optional(&format!("SSH_KEY_PATH_QEMU_{vmid}"))
                .or_else(|| default_key.clone());

            if let (false, Some(username), Some(key_path)) = (host.is_empty(), username, key_path) {
                targets.insert(
                    vmid,
                    SshTarget {
                        host: host.to_string(),
                        username,
                        key_path: PathBuf::from(key_path),
                    },
                );
            }
        }

        targets
    }
}
